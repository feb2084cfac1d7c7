use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    Pods,
    Deployments,
    ReplicaSets,
    StatefulSets,
    DaemonSets,
    Jobs,
    CronJobs,
    Services,
    Ingresses,
    ConfigMaps,
    Secrets,
    PersistentVolumeClaims,
    PersistentVolumes,
    ServiceAccounts,
    Nodes,
    Namespaces,
    Events,
}

impl ResourceKind {
    pub const ALL: [Self; 17] = [
        Self::Pods,
        Self::Deployments,
        Self::ReplicaSets,
        Self::StatefulSets,
        Self::DaemonSets,
        Self::Jobs,
        Self::CronJobs,
        Self::Services,
        Self::Ingresses,
        Self::ConfigMaps,
        Self::Secrets,
        Self::PersistentVolumeClaims,
        Self::PersistentVolumes,
        Self::ServiceAccounts,
        Self::Nodes,
        Self::Namespaces,
        Self::Events,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Pods => "Pods",
            Self::Deployments => "Deployments",
            Self::ReplicaSets => "ReplicaSets",
            Self::StatefulSets => "StatefulSets",
            Self::DaemonSets => "DaemonSets",
            Self::Jobs => "Jobs",
            Self::CronJobs => "CronJobs",
            Self::Services => "Services",
            Self::Ingresses => "Ingresses",
            Self::ConfigMaps => "ConfigMaps",
            Self::Secrets => "Secrets",
            Self::PersistentVolumeClaims => "PersistentVolumeClaims",
            Self::PersistentVolumes => "PersistentVolumes",
            Self::ServiceAccounts => "ServiceAccounts",
            Self::Nodes => "Nodes",
            Self::Namespaces => "Namespaces",
            Self::Events => "Events",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "po" | "pod" | "pods" => Some(Self::Pods),
            "deploy" | "deployment" | "deployments" | "dp" => Some(Self::Deployments),
            "rs" | "replicaset" | "replicasets" | "replica-set" | "replica-sets" => {
                Some(Self::ReplicaSets)
            }
            "sts" | "statefulset" | "statefulsets" => Some(Self::StatefulSets),
            "ds" | "daemonset" | "daemonsets" | "daemon-set" | "daemon-sets" => {
                Some(Self::DaemonSets)
            }
            "job" | "jobs" => Some(Self::Jobs),
            "cj" | "cronjob" | "cronjobs" | "cron-job" | "cron-jobs" => Some(Self::CronJobs),
            "svc" | "service" | "services" => Some(Self::Services),
            "ing" | "ingress" | "ingresses" => Some(Self::Ingresses),
            "cm" | "configmap" | "configmaps" | "config-map" | "config-maps" => {
                Some(Self::ConfigMaps)
            }
            "secret" | "secrets" => Some(Self::Secrets),
            "pvc"
            | "persistentvolumeclaim"
            | "persistentvolumeclaims"
            | "persistent-volume-claim"
            | "persistent-volume-claims" => Some(Self::PersistentVolumeClaims),
            "pv" | "persistentvolume" | "persistentvolumes" | "persistent-volume"
            | "persistent-volumes" => Some(Self::PersistentVolumes),
            "sa" | "serviceaccount" | "serviceaccounts" | "service-account"
            | "service-accounts" => Some(Self::ServiceAccounts),
            "node" | "nodes" | "no" => Some(Self::Nodes),
            "ns" | "namespace" | "namespaces" => Some(Self::Namespaces),
            "event" | "events" | "ev" => Some(Self::Events),
            _ => None,
        }
    }

    pub fn namespaced(self) -> bool {
        !matches!(
            self,
            Self::Nodes | Self::Namespaces | Self::PersistentVolumes
        )
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NamespaceScope {
    All,
    Named(String),
}

impl Display for NamespaceScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Named(namespace) => write!(f, "{namespace}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MetricsSource {
    Live,
    Requests,
}

impl MetricsSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Requests => "requests",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceStat {
    pub usage_percent: f64,
    pub requests: f64,
    pub limits: f64,
    pub capacity: f64,
    pub allocatable: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PodStat {
    pub count: u64,
    pub capacity: u64,
}

impl PodStat {
    pub fn usage_percent(self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.count as f64 / self.capacity as f64 * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMetrics {
    pub cpu: ResourceStat,
    pub memory: ResourceStat,
    pub pods: PodStat,
    pub source: MetricsSource,
    pub sampled_at: DateTime<Local>,
}

impl ClusterMetrics {
    pub fn fallback() -> Self {
        Self {
            cpu: ResourceStat {
                capacity: 1.0,
                allocatable: 1.0,
                ..ResourceStat::default()
            },
            memory: ResourceStat {
                capacity: 1024.0,
                allocatable: 1024.0,
                ..ResourceStat::default()
            },
            pods: PodStat {
                count: 0,
                capacity: 100,
            },
            source: MetricsSource::Requests,
            sampled_at: Local::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeMetrics {
    pub node: String,
    pub cpu: ResourceStat,
    pub memory: ResourceStat,
    pub pods: PodStat,
    pub source: MetricsSource,
    pub disk_estimate_percent: Option<f64>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClusterIssue {
    pub severity: String,
    pub critical: bool,
    pub reason: String,
    pub message: String,
    pub object: String,
    pub namespace: String,
    pub age: String,
    pub timestamp_secs: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceSummary {
    pub name: String,
    pub namespace: Option<String>,
    pub age: String,
    pub columns: Vec<String>,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResourcePage {
    pub headers: Vec<String>,
    pub items: Vec<ResourceSummary>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MetricsHistory {
    points: VecDeque<ClusterMetrics>,
    capacity: usize,
}

impl MetricsHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, metrics: ClusterMetrics) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(metrics);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn latest(&self) -> Option<&ClusterMetrics> {
        self.points.back()
    }

    pub fn cpu_trend(&self) -> Vec<f64> {
        self.points
            .iter()
            .map(|point| point.cpu.usage_percent)
            .collect()
    }
}
