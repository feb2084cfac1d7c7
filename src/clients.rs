use anyhow::{Context as _, Result, anyhow};
use kube::{Client, Config};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) type ClientBuilder = Box<dyn Fn(&Config) -> kube::Result<Client> + Send + Sync>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ApiGroup {
    Core,
    Apps,
    Batch,
    Networking,
    Rbac,
    Storage,
    Metrics,
}

impl ApiGroup {
    pub const ALL: [Self; 7] = [
        Self::Core,
        Self::Apps,
        Self::Batch,
        Self::Networking,
        Self::Rbac,
        Self::Storage,
        Self::Metrics,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Apps => "apps",
            Self::Batch => "batch",
            Self::Networking => "networking",
            Self::Rbac => "rbac",
            Self::Storage => "storage",
            Self::Metrics => "metrics",
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProbeFailure {
    Timeout,
    Unauthorized,
    Connection,
    Other,
}

impl ProbeFailure {
    pub fn label(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unauthorized => "unauthorized",
            Self::Connection => "connection",
            Self::Other => "other",
        }
    }
}

#[derive(Clone)]
enum HandleState {
    Uninitialized { attempts: u32 },
    Ready(Client),
    Failed { reason: String, attempts: u32 },
}

pub struct ClientPool {
    config: Config,
    build: ClientBuilder,
    handles: HashMap<ApiGroup, Mutex<HandleState>>,
    max_attempts: u32,
}

impl ClientPool {
    pub fn new(config: Config, max_attempts: u32) -> Self {
        Self::with_builder(
            config,
            max_attempts,
            Box::new(|config| Client::try_from(config.clone())),
        )
    }

    pub(crate) fn with_builder(config: Config, max_attempts: u32, build: ClientBuilder) -> Self {
        let handles = ApiGroup::ALL
            .into_iter()
            .map(|group| (group, Mutex::new(HandleState::Uninitialized { attempts: 0 })))
            .collect();
        Self {
            config,
            build,
            handles,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn get(&self, group: ApiGroup) -> Result<Client> {
        let Some(handle) = self.handles.get(&group) else {
            return Err(anyhow!("{} API group is not registered", group.label()));
        };
        let mut state = lock_handle(handle);

        let attempt = match &mut *state {
            HandleState::Ready(client) => return Ok(client.clone()),
            HandleState::Failed { reason, attempts } => {
                return Err(anyhow!(
                    "{} API client unavailable after {attempts} attempts: {reason}",
                    group.label()
                ));
            }
            HandleState::Uninitialized { attempts } => {
                *attempts += 1;
                *attempts
            }
        };

        match (self.build)(&self.config) {
            Ok(client) => {
                debug!(group = group.label(), attempt, "constructed API client");
                *state = HandleState::Ready(client.clone());
                Ok(client)
            }
            Err(error) => {
                let reason = error.to_string();
                warn!(
                    group = group.label(),
                    attempt,
                    %reason,
                    "API client construction failed"
                );
                if attempt >= self.max_attempts {
                    *state = HandleState::Failed {
                        reason: reason.clone(),
                        attempts: attempt,
                    };
                }
                Err(anyhow!(error)).with_context(|| {
                    format!(
                        "failed to construct {} API client (attempt {attempt})",
                        group.label()
                    )
                })
            }
        }
    }

    pub fn reset(&self) {
        for handle in self.handles.values() {
            let mut state = lock_handle(handle);
            *state = HandleState::Uninitialized { attempts: 0 };
        }
        debug!("client pool reset");
    }

    pub async fn is_connected(&self) -> bool {
        let client = match self.get(ApiGroup::Core) {
            Ok(client) => client,
            Err(error) => {
                warn!(error = %error, "connectivity probe skipped");
                return false;
            }
        };

        match timeout(CONNECT_PROBE_TIMEOUT, client.apiserver_version()).await {
            Ok(Ok(version)) => {
                debug!(
                    version = format!("{}.{}", version.major, version.minor),
                    "cluster reachable"
                );
                true
            }
            Ok(Err(error)) => {
                let failure = classify_probe_error(&error);
                warn!(
                    kind = failure.label(),
                    error = %error,
                    "connectivity probe failed"
                );
                false
            }
            Err(_) => {
                warn!(kind = ProbeFailure::Timeout.label(), "connectivity probe failed");
                false
            }
        }
    }

    pub async fn cluster_version(&self) -> Result<String> {
        let client = self.get(ApiGroup::Core)?;
        let version = timeout(CONNECT_PROBE_TIMEOUT, client.apiserver_version())
            .await
            .context("version endpoint timed out")?
            .context("failed to query version endpoint")?;
        Ok(format!("{}.{}", version.major, version.minor))
    }
}

fn lock_handle(handle: &Mutex<HandleState>) -> MutexGuard<'_, HandleState> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

fn classify_probe_error(error: &kube::Error) -> ProbeFailure {
    if let kube::Error::Api(status) = error
        && (status.code == 401 || status.code == 403)
    {
        return ProbeFailure::Unauthorized;
    }

    let text = error.to_string().to_ascii_lowercase();
    if text.contains("timed out") || text.contains("timeout") {
        ProbeFailure::Timeout
    } else if text.contains("connection refused")
        || text.contains("connection reset")
        || text.contains("dns error")
        || text.contains("unreachable")
    {
        ProbeFailure::Connection
    } else {
        ProbeFailure::Other
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiGroup, ClientPool, ProbeFailure, classify_probe_error};
    use kube::core::Status;
    use kube::core::response::StatusSummary;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(Box::new(Status {
            status: Some(StatusSummary::Failure),
            message: "denied".to_string(),
            reason: "Forbidden".to_string(),
            code,
            metadata: None,
            details: None,
        }))
    }

    fn loopback_config() -> kube::Config {
        kube::Config::new("http://127.0.0.1:8080".parse().expect("valid url"))
    }

    fn failing_pool(max_attempts: u32) -> (ClientPool, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pool = ClientPool::with_builder(
            loopback_config(),
            max_attempts,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(api_error(503))
            }),
        );
        (pool, calls)
    }

    #[test]
    fn auth_codes_classify_as_unauthorized() {
        assert_eq!(
            classify_probe_error(&api_error(401)),
            ProbeFailure::Unauthorized
        );
        assert_eq!(
            classify_probe_error(&api_error(403)),
            ProbeFailure::Unauthorized
        );
        assert_eq!(classify_probe_error(&api_error(500)), ProbeFailure::Other);
    }

    #[test]
    fn construction_stops_at_the_attempt_cap() {
        let (pool, calls) = failing_pool(3);

        for _ in 0..3 {
            assert!(pool.get(ApiGroup::Core).is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let error = match pool.get(ApiGroup::Core) {
            Err(error) => error,
            Ok(_) => panic!("stored failure returned"),
        };
        assert!(error.to_string().contains("after 3 attempts"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        assert!(pool.get(ApiGroup::Apps).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn reset_rewinds_the_attempt_counter() {
        let (pool, calls) = failing_pool(2);

        assert!(pool.get(ApiGroup::Core).is_err());
        assert!(pool.get(ApiGroup::Core).is_err());
        assert!(pool.get(ApiGroup::Core).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        pool.reset();
        assert!(pool.get(ApiGroup::Core).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn handles_are_cached_and_survive_a_reset() {
        let pool = ClientPool::new(loopback_config(), 3);

        assert!(pool.get(ApiGroup::Core).is_ok());
        assert!(pool.get(ApiGroup::Core).is_ok());
        assert!(pool.get(ApiGroup::Metrics).is_ok());

        pool.reset();
        assert!(pool.get(ApiGroup::Apps).is_ok());
    }

    #[test]
    fn every_group_has_a_stable_label() {
        let mut labels = ApiGroup::ALL
            .into_iter()
            .map(ApiGroup::label)
            .collect::<Vec<_>>();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), ApiGroup::ALL.len());
    }
}
