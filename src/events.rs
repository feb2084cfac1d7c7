use anyhow::Result;
use k8s_openapi::api::core::v1::Event;
use kube::api::{Api, ListParams};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clients::{ApiGroup, ClientPool};
use crate::model::ClusterIssue;

const EVENT_BATCH_LIMIT: u32 = 100;

const CRITICAL_REASONS: [&str; 11] = [
    "Failed",
    "FailedMount",
    "FailedScheduling",
    "FailedCreate",
    "FailedDelete",
    "FailedUpdate",
    "Unhealthy",
    "BackOff",
    "FailedSync",
    "NetworkNotReady",
    "NodeNotReady",
];

#[derive(Debug, Clone, Copy)]
pub struct IssueLimits {
    pub max_age_hours: i64,
    pub max_issues: usize,
    pub max_critical: usize,
}

impl Default for IssueLimits {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            max_issues: 50,
            max_critical: 25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub event_type: String,
    pub reason: String,
    pub message: String,
    pub count: i32,
    pub age: String,
    pub namespace: String,
    pub timestamp_secs: i64,
}

pub struct IssueAggregator {
    pool: Arc<ClientPool>,
    limits: IssueLimits,
}

impl IssueAggregator {
    pub fn new(pool: Arc<ClientPool>, limits: IssueLimits) -> Self {
        Self { pool, limits }
    }

    pub async fn cluster_issues(&self) -> Vec<ClusterIssue> {
        let events = match self.list_events(Some("type!=Normal"), EVENT_BATCH_LIMIT).await {
            Ok(events) => events,
            Err(error) => {
                warn!(error = %error, "failed to list cluster events");
                return Vec::new();
            }
        };

        let now_secs = now_seconds();
        let max_age_secs = self.limits.max_age_hours * 3_600;
        let mut issues = events
            .iter()
            .filter_map(|event| issue_from_event(event, now_secs, max_age_secs))
            .collect::<Vec<_>>();

        finalize_issues(&mut issues, self.limits.max_issues);
        debug!(count = issues.len(), "collected cluster issues");
        issues
    }

    pub async fn critical_issues(&self) -> Vec<ClusterIssue> {
        let events = match self
            .list_events(Some("type=Warning"), EVENT_BATCH_LIMIT * 2)
            .await
        {
            Ok(events) => events,
            Err(error) => {
                warn!(error = %error, "failed to list warning events");
                return Vec::new();
            }
        };

        let now_secs = now_seconds();
        let max_age_secs = self.limits.max_age_hours * 3_600;
        let mut issues = events
            .iter()
            .filter_map(|event| issue_from_event(event, now_secs, max_age_secs))
            .filter(|issue| issue.critical)
            .collect::<Vec<_>>();

        finalize_issues(&mut issues, self.limits.max_critical);
        debug!(count = issues.len(), "collected critical issues");
        issues
    }

    pub async fn resource_events(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Vec<ResourceEvent> {
        let client = match self.pool.get(ApiGroup::Core) {
            Ok(client) => client,
            Err(error) => {
                warn!(error = %error, "failed to obtain events client");
                return Vec::new();
            }
        };

        let api: Api<Event> = match namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::all(client),
        };
        let selector = format!("involvedObject.kind={kind},involvedObject.name={name}");
        let params = ListParams::default().fields(&selector).limit(50);

        let list = match api.list(&params).await {
            Ok(list) => list,
            Err(error) => {
                warn!(kind, name, error = %error, "failed to list resource events");
                return Vec::new();
            }
        };

        let now_secs = now_seconds();
        let mut events = list
            .items
            .iter()
            .map(|event| {
                let timestamp_secs = event_timestamp_seconds(event);
                ResourceEvent {
                    event_type: event.type_.clone().unwrap_or_else(|| "Normal".to_string()),
                    reason: event.reason.clone().unwrap_or_else(|| "Unknown".to_string()),
                    message: event
                        .message
                        .clone()
                        .unwrap_or_else(|| "No message".to_string()),
                    count: event.count.unwrap_or(1),
                    age: age_from_seconds(now_secs, timestamp_secs),
                    namespace: event
                        .metadata
                        .namespace
                        .clone()
                        .or_else(|| namespace.map(str::to_string))
                        .unwrap_or_else(|| "default".to_string()),
                    timestamp_secs,
                }
            })
            .collect::<Vec<_>>();

        events.sort_by(|left, right| right.timestamp_secs.cmp(&left.timestamp_secs));
        events
    }

    async fn list_events(&self, selector: Option<&str>, limit: u32) -> Result<Vec<Event>> {
        let client = self.pool.get(ApiGroup::Core)?;
        let api: Api<Event> = Api::all(client);

        if let Some(selector) = selector {
            let params = ListParams::default().fields(selector).limit(limit);
            match api.list(&params).await {
                Ok(list) => return Ok(list.items),
                Err(error) => {
                    warn!(
                        selector,
                        error = %error,
                        "field selector rejected, retrying unfiltered"
                    );
                }
            }
        }

        let list = api.list(&ListParams::default().limit(limit)).await?;
        Ok(list.items)
    }
}

fn issue_from_event(event: &Event, now_secs: i64, max_age_secs: i64) -> Option<ClusterIssue> {
    let event_type = event.type_.as_deref().unwrap_or("Warning");
    if event_type == "Normal" {
        return None;
    }

    let timestamp_secs = event_timestamp_seconds(event);
    if timestamp_secs > 0 && now_secs - timestamp_secs > max_age_secs {
        return None;
    }

    let object = match (&event.involved_object.kind, &event.involved_object.name) {
        (Some(kind), Some(name)) => format!("{kind}/{name}"),
        _ => "Unknown".to_string(),
    };

    let reason = event.reason.clone().unwrap_or_else(|| "Unknown".to_string());
    Some(ClusterIssue {
        severity: event_type.to_string(),
        critical: is_critical_reason(&reason),
        reason,
        message: truncate(
            event.message.as_deref().unwrap_or("No message"),
            200,
        ),
        object,
        namespace: event
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string()),
        age: age_from_seconds(now_secs, timestamp_secs),
        timestamp_secs,
    })
}

fn finalize_issues(issues: &mut Vec<ClusterIssue>, cap: usize) {
    issues.sort_by(|left, right| right.timestamp_secs.cmp(&left.timestamp_secs));
    issues.truncate(cap);
}

fn is_critical_reason(reason: &str) -> bool {
    CRITICAL_REASONS
        .iter()
        .any(|critical| reason.contains(critical))
}

pub(crate) fn event_timestamp_seconds(event: &Event) -> i64 {
    event
        .event_time
        .as_ref()
        .map(|time| time.0.as_second())
        .or_else(|| event.last_timestamp.as_ref().map(|time| time.0.as_second()))
        .or_else(|| {
            event
                .first_timestamp
                .as_ref()
                .map(|time| time.0.as_second())
        })
        .or_else(|| {
            event
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|time| time.0.as_second())
        })
        .unwrap_or(0)
}

pub(crate) fn now_seconds() -> i64 {
    k8s_openapi::jiff::Timestamp::now().as_second()
}

pub(crate) fn age_from_seconds(now_secs: i64, timestamp_secs: i64) -> String {
    if timestamp_secs <= 0 {
        return "Unknown".to_string();
    }
    format_elapsed_seconds((now_secs - timestamp_secs).max(0))
}

pub(crate) fn format_elapsed_seconds(seconds: i64) -> String {
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}

pub(crate) fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }

    let mut out = value
        .chars()
        .take(max.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::{
        finalize_issues, format_elapsed_seconds, is_critical_reason, issue_from_event, truncate,
    };
    use k8s_openapi::api::core::v1::{Event, ObjectReference};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use k8s_openapi::jiff::Timestamp;

    const NOW: i64 = 1_700_000_000;

    fn warning_event(reason: &str, message: &str, age_secs: i64) -> Event {
        Event {
            type_: Some("Warning".to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some("web-0".to_string()),
                ..ObjectReference::default()
            },
            last_timestamp: Some(Time(
                Timestamp::from_second(NOW - age_secs).expect("valid timestamp"),
            )),
            metadata: ObjectMeta {
                namespace: Some("apps".to_string()),
                ..ObjectMeta::default()
            },
            ..Event::default()
        }
    }

    #[test]
    fn normal_events_are_skipped() {
        let mut event = warning_event("Scheduled", "ok", 60);
        event.type_ = Some("Normal".to_string());
        assert!(issue_from_event(&event, NOW, 86_400).is_none());
    }

    #[test]
    fn stale_events_fall_outside_the_window() {
        let fresh = warning_event("BackOff", "restarting", 3_600);
        let stale = warning_event("BackOff", "restarting", 30 * 3_600);
        assert!(issue_from_event(&fresh, NOW, 86_400).is_some());
        assert!(issue_from_event(&stale, NOW, 86_400).is_none());
    }

    #[test]
    fn issues_carry_truncated_messages_and_object_refs() {
        let long_message = "x".repeat(300);
        let event = warning_event("FailedMount", &long_message, 120);
        let issue = issue_from_event(&event, NOW, 86_400).expect("issue produced");

        assert_eq!(issue.severity, "Warning");
        assert_eq!(issue.object, "Pod/web-0");
        assert_eq!(issue.namespace, "apps");
        assert_eq!(issue.age, "2m");
        assert_eq!(issue.message.chars().count(), 200);
        assert!(issue.message.ends_with('…'));
    }

    #[test]
    fn issues_sort_most_recent_first_and_cap() {
        let mut issues = (0..10)
            .map(|index| {
                let event = warning_event("Unhealthy", "probe failed", index * 60);
                issue_from_event(&event, NOW, 86_400).expect("issue produced")
            })
            .collect::<Vec<_>>();

        finalize_issues(&mut issues, 3);
        assert_eq!(issues.len(), 3);
        assert!(issues[0].timestamp_secs >= issues[1].timestamp_secs);
        assert!(issues[1].timestamp_secs >= issues[2].timestamp_secs);
        assert_eq!(issues[0].timestamp_secs, NOW);
    }

    #[test]
    fn critical_marking_keeps_the_event_type() {
        let event = warning_event("FailedScheduling", "no nodes available", 60);
        let issue = issue_from_event(&event, NOW, 86_400).expect("issue produced");
        assert_eq!(issue.severity, "Warning");
        assert!(issue.critical);

        let benign = warning_event("Killing", "stopping container", 60);
        let issue = issue_from_event(&benign, NOW, 86_400).expect("issue produced");
        assert_eq!(issue.severity, "Warning");
        assert!(!issue.critical);
    }

    #[test]
    fn critical_reason_matching_is_substring_based() {
        assert!(is_critical_reason("FailedScheduling"));
        assert!(is_critical_reason("BackOff"));
        assert!(is_critical_reason("ImagePullBackOff"));
        assert!(!is_critical_reason("Scheduled"));
        assert!(!is_critical_reason(""));
    }

    #[test]
    fn elapsed_seconds_pick_the_largest_unit() {
        assert_eq!(format_elapsed_seconds(30), "30s");
        assert_eq!(format_elapsed_seconds(90), "1m");
        assert_eq!(format_elapsed_seconds(7_200), "2h");
        assert_eq!(format_elapsed_seconds(200_000), "2d");
    }

    #[test]
    fn truncate_is_char_aware() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("àbcdef", 4), "àbc…");
    }
}
