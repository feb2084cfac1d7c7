use anyhow::{Context as _, Result};
use kube::Config;
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::collections::HashMap;
use tracing::info;

#[derive(Clone)]
pub struct ClusterContext {
    context: String,
    cluster_url: String,
    user: String,
    default_namespace: String,
    targets: Vec<KubeTarget>,
    config: Config,
}

#[derive(Debug, Clone)]
pub struct KubeTarget {
    pub context: String,
    pub cluster_name: String,
    pub cluster_server: Option<String>,
    pub user_name: Option<String>,
    pub namespace: Option<String>,
}

impl ClusterContext {
    pub async fn resolve(context: Option<String>) -> Result<Self> {
        let kubeconfig = Kubeconfig::read().ok();

        let config = if let Some(kubeconfig_value) = kubeconfig.clone() {
            let options = KubeConfigOptions {
                context: context.clone(),
                cluster: None,
                user: None,
            };
            Config::from_custom_kubeconfig(kubeconfig_value, &options)
                .await
                .context("failed to resolve Kubernetes configuration")?
        } else {
            if context.is_some() {
                anyhow::bail!(
                    "kubeconfig not found; context selection is unavailable in this environment"
                );
            }
            Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?
        };

        let cluster_url = config.cluster_url.to_string();
        let default_namespace = config.default_namespace.clone();

        let targets = kubeconfig
            .as_ref()
            .map(build_kube_targets)
            .unwrap_or_default();

        let active_context = context
            .or_else(|| {
                kubeconfig
                    .as_ref()
                    .and_then(|cfg| cfg.current_context.clone())
            })
            .unwrap_or_else(|| "in-cluster".to_string());
        let active_user = targets
            .iter()
            .find(|target| target.context == active_context)
            .and_then(|target| target.user_name.clone())
            .unwrap_or_else(|| "-".to_string());

        info!(
            context = %active_context,
            cluster = %cluster_url,
            namespace = %default_namespace,
            "resolved cluster context"
        );

        Ok(Self {
            context: active_context,
            cluster_url,
            user: active_user,
            default_namespace,
            targets,
            config,
        })
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn cluster_url(&self) -> &str {
        &self.cluster_url
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn targets(&self) -> &[KubeTarget] {
        &self.targets
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn build_kube_targets(kubeconfig: &Kubeconfig) -> Vec<KubeTarget> {
    let mut cluster_servers = HashMap::new();
    for cluster in &kubeconfig.clusters {
        let server = cluster
            .cluster
            .as_ref()
            .and_then(|entry| entry.server.clone());
        cluster_servers.insert(cluster.name.clone(), server);
    }

    let mut targets = kubeconfig
        .contexts
        .iter()
        .filter_map(|named| {
            let context = named.context.as_ref()?;
            Some(KubeTarget {
                context: named.name.clone(),
                cluster_name: context.cluster.clone(),
                cluster_server: cluster_servers
                    .get(&context.cluster)
                    .cloned()
                    .unwrap_or(None),
                user_name: context.user.clone(),
                namespace: context.namespace.clone(),
            })
        })
        .collect::<Vec<_>>();

    targets.sort_by(|left, right| {
        left.context
            .cmp(&right.context)
            .then_with(|| left.cluster_name.cmp(&right.cluster_name))
    });
    targets
}

#[cfg(test)]
mod tests {
    use super::build_kube_targets;
    use kube::config::Kubeconfig;

    #[test]
    fn kube_targets_are_sorted_and_carry_servers() {
        let kubeconfig: Kubeconfig = serde_yaml::from_str(
            r#"
apiVersion: v1
kind: Config
current-context: beta
clusters:
  - name: beta-cluster
    cluster:
      server: https://beta.example:6443
  - name: alpha-cluster
    cluster:
      server: https://alpha.example:6443
contexts:
  - name: beta
    context:
      cluster: beta-cluster
      user: beta-admin
      namespace: staging
  - name: alpha
    context:
      cluster: alpha-cluster
      user: alpha-admin
users: []
"#,
        )
        .expect("kubeconfig fixture parses");

        let targets = build_kube_targets(&kubeconfig);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].context, "alpha");
        assert_eq!(
            targets[0].cluster_server.as_deref(),
            Some("https://alpha.example:6443")
        );
        assert_eq!(targets[1].context, "beta");
        assert_eq!(targets[1].user_name.as_deref(), Some("beta-admin"));
        assert_eq!(targets[1].namespace.as_deref(), Some("staging"));
    }
}
