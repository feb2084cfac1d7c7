use chrono::Local;
use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim, Pod};
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use anyhow::Result;

use crate::clients::{ApiGroup, ClientPool};
use crate::model::{ClusterMetrics, MetricsSource, NodeMetrics, PodStat, ResourceStat};
use crate::quantity::{bytes_to_mebibytes, parse_cpu, parse_memory};

const LIVE_METRICS_TIMEOUT: Duration = Duration::from_secs(5);
const BASE_IMAGE_ALLOWANCE_BYTES: f64 = 200.0 * 1_048_576.0;

#[derive(Debug, Clone, Copy)]
pub struct NodeBatching {
    pub threshold: usize,
    pub batch_size: usize,
    pub pause: Duration,
}

impl Default for NodeBatching {
    fn default() -> Self {
        Self {
            threshold: 50,
            batch_size: 25,
            pause: Duration::from_millis(150),
        }
    }
}

pub struct MetricsAggregator {
    pool: Arc<ClientPool>,
    batching: NodeBatching,
}

impl MetricsAggregator {
    pub fn new(pool: Arc<ClientPool>, batching: NodeBatching) -> Self {
        Self { pool, batching }
    }

    pub async fn cluster_metrics(&self) -> ClusterMetrics {
        match self.try_cluster_metrics().await {
            Ok(metrics) => metrics,
            Err(error) => {
                warn!(error = %error, "cluster metrics unavailable, using fallback");
                ClusterMetrics::fallback()
            }
        }
    }

    async fn try_cluster_metrics(&self) -> Result<ClusterMetrics> {
        let client = self.pool.get(ApiGroup::Core)?;

        let nodes_api: Api<Node> = Api::all(client.clone());
        let nodes = nodes_api.list(&ListParams::default()).await?;

        let pods_api: Api<Pod> = Api::all(client);
        let pods = pods_api.list(&ListParams::default()).await?;

        let live = self.live_node_usage().await;
        let live_totals = live.as_ref().map(|usage| {
            usage
                .values()
                .fold((0.0, 0.0), |acc, (cpu, memory)| (acc.0 + cpu, acc.1 + memory))
        });

        Ok(aggregate_cluster(&nodes.items, &pods.items, live_totals))
    }

    pub async fn node_metrics(&self, name: &str) -> Option<NodeMetrics> {
        let client = match self.pool.get(ApiGroup::Core) {
            Ok(client) => client,
            Err(error) => {
                warn!(error = %error, "failed to obtain node metrics client");
                return None;
            }
        };

        let nodes_api: Api<Node> = Api::all(client.clone());
        let node = match nodes_api.get(name).await {
            Ok(node) => node,
            Err(error) => {
                warn!(node = name, error = %error, "failed to fetch node");
                return None;
            }
        };

        let pods_api: Api<Pod> = Api::all(client);
        let selector = format!("spec.nodeName={name}");
        let pods = match pods_api
            .list(&ListParams::default().fields(&selector))
            .await
        {
            Ok(pods) => pods.items,
            Err(error) => {
                warn!(node = name, error = %error, "failed to fetch node pods");
                Vec::new()
            }
        };

        let pvc_sizes = self.pvc_request_sizes().await;
        let live = self.live_node_usage().await;
        Some(build_node_metrics(
            &node,
            &pods,
            &pvc_sizes,
            live.as_ref().and_then(|usage| usage.get(name).copied()),
        ))
    }

    pub async fn all_node_metrics(&self, names: Option<Vec<String>>) -> Vec<NodeMetrics> {
        let client = match self.pool.get(ApiGroup::Core) {
            Ok(client) => client,
            Err(error) => {
                warn!(error = %error, "failed to obtain node metrics client");
                return Vec::new();
            }
        };

        let nodes_api: Api<Node> = Api::all(client.clone());
        let mut nodes = match nodes_api.list(&ListParams::default()).await {
            Ok(nodes) => nodes.items,
            Err(error) => {
                warn!(error = %error, "failed to list nodes");
                return Vec::new();
            }
        };
        if let Some(names) = &names {
            nodes.retain(|node| names.iter().any(|name| *name == node.name_any()));
        }
        if nodes.is_empty() {
            return Vec::new();
        }

        let pvc_sizes = self.pvc_request_sizes().await;
        let live = self.live_node_usage().await;

        let pods_api: Api<Pod> = Api::all(client);
        let mut results = Vec::with_capacity(nodes.len());

        if nodes.len() <= self.batching.threshold {
            let pods = match pods_api.list(&ListParams::default()).await {
                Ok(pods) => pods.items,
                Err(error) => {
                    warn!(error = %error, "failed to list pods for node metrics");
                    Vec::new()
                }
            };
            let mut by_node: HashMap<String, Vec<Pod>> = HashMap::new();
            for pod in pods {
                let Some(node_name) = pod.spec.as_ref().and_then(|spec| spec.node_name.clone())
                else {
                    continue;
                };
                by_node.entry(node_name).or_default().push(pod);
            }

            for node in &nodes {
                let name = node.name_any();
                let pods = by_node.get(&name).map(Vec::as_slice).unwrap_or(&[]);
                let usage = live.as_ref().and_then(|usage| usage.get(&name).copied());
                results.push(build_node_metrics(node, pods, &pvc_sizes, usage));
            }
            return results;
        }

        debug!(
            nodes = nodes.len(),
            batch_size = self.batching.batch_size,
            "large cluster, batching per-node pod queries"
        );
        for (index, batch) in nodes.chunks(self.batching.batch_size).enumerate() {
            if index > 0 {
                sleep(self.batching.pause).await;
            }
            for node in batch {
                let name = node.name_any();
                let selector = format!("spec.nodeName={name}");
                let pods = match pods_api
                    .list(&ListParams::default().fields(&selector))
                    .await
                {
                    Ok(pods) => pods.items,
                    Err(error) => {
                        warn!(node = %name, error = %error, "failed to fetch node pods");
                        Vec::new()
                    }
                };
                let usage = live.as_ref().and_then(|usage| usage.get(&name).copied());
                results.push(build_node_metrics(node, &pods, &pvc_sizes, usage));
            }
        }
        results
    }

    async fn live_node_usage(&self) -> Option<HashMap<String, (f64, f64)>> {
        let client = self.pool.get(ApiGroup::Metrics).ok()?;
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "NodeMetrics");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "nodes");
        let api: Api<DynamicObject> = Api::all_with(client, &resource);

        let list = match timeout(LIVE_METRICS_TIMEOUT, api.list(&ListParams::default())).await {
            Ok(Ok(list)) => list,
            Ok(Err(error)) => {
                debug!(error = %error, "metrics-server unavailable, deriving usage from requests");
                return None;
            }
            Err(_) => {
                debug!("metrics-server timed out, deriving usage from requests");
                return None;
            }
        };

        let mut usage = HashMap::new();
        for node_metric in list {
            let name = node_metric.name_any();
            usage.insert(name, parse_usage_value(&node_metric.data["usage"]));
        }
        Some(usage)
    }

    async fn pvc_request_sizes(&self) -> HashMap<String, f64> {
        let client = match self.pool.get(ApiGroup::Core) {
            Ok(client) => client,
            Err(_) => return HashMap::new(),
        };
        let api: Api<PersistentVolumeClaim> = Api::all(client);
        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(error) => {
                debug!(error = %error, "failed to list claims for disk estimate");
                return HashMap::new();
            }
        };

        list.items
            .iter()
            .map(|claim| {
                let namespace = claim.namespace().unwrap_or_else(|| "default".to_string());
                let bytes = claim
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.resources.as_ref())
                    .and_then(|resources| resources.requests.as_ref())
                    .and_then(|requests| requests.get("storage"))
                    .map(|quantity| parse_memory(&quantity.0))
                    .unwrap_or(0.0);
                (format!("{namespace}/{}", claim.name_any()), bytes)
            })
            .collect()
    }
}

fn parse_usage_value(value: &Value) -> (f64, f64) {
    let cpu = value
        .get("cpu")
        .and_then(Value::as_str)
        .map(parse_cpu)
        .unwrap_or(0.0);
    let memory = value
        .get("memory")
        .and_then(Value::as_str)
        .map(parse_memory)
        .unwrap_or(0.0);
    (cpu, memory)
}

#[derive(Debug, Default, Clone, Copy)]
struct CapacityTotals {
    cpu_capacity: f64,
    cpu_allocatable: f64,
    memory_capacity_bytes: f64,
    memory_allocatable_bytes: f64,
    pod_capacity: u64,
    ephemeral_capacity_bytes: f64,
}

fn node_capacity(node: &Node) -> CapacityTotals {
    let mut totals = CapacityTotals::default();
    let Some(status) = node.status.as_ref() else {
        return totals;
    };

    if let Some(capacity) = status.capacity.as_ref() {
        totals.cpu_capacity = capacity
            .get("cpu")
            .map(|quantity| parse_cpu(&quantity.0))
            .unwrap_or(0.0);
        totals.memory_capacity_bytes = capacity
            .get("memory")
            .map(|quantity| parse_memory(&quantity.0))
            .unwrap_or(0.0);
        totals.pod_capacity = capacity
            .get("pods")
            .and_then(|quantity| quantity.0.parse::<u64>().ok())
            .unwrap_or(0);
        totals.ephemeral_capacity_bytes = capacity
            .get("ephemeral-storage")
            .map(|quantity| parse_memory(&quantity.0))
            .unwrap_or(0.0);
    }

    if let Some(allocatable) = status.allocatable.as_ref() {
        totals.cpu_allocatable = allocatable
            .get("cpu")
            .map(|quantity| parse_cpu(&quantity.0))
            .unwrap_or(0.0);
        totals.memory_allocatable_bytes = allocatable
            .get("memory")
            .map(|quantity| parse_memory(&quantity.0))
            .unwrap_or(0.0);
    } else {
        totals.cpu_allocatable = totals.cpu_capacity;
        totals.memory_allocatable_bytes = totals.memory_capacity_bytes;
    }

    totals
}

#[derive(Debug, Default, Clone, Copy)]
struct RequestTotals {
    cpu_requests: f64,
    cpu_limits: f64,
    memory_request_bytes: f64,
    memory_limit_bytes: f64,
    ephemeral_request_bytes: f64,
    containers: u64,
    running: u64,
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}

fn pod_totals(pod: &Pod) -> RequestTotals {
    let mut totals = RequestTotals::default();
    if !is_running(pod) {
        return totals;
    }
    totals.running = 1;

    let Some(spec) = pod.spec.as_ref() else {
        return totals;
    };

    for container in &spec.containers {
        totals.containers += 1;
        let Some(resources) = container.resources.as_ref() else {
            continue;
        };
        if let Some(requests) = resources.requests.as_ref() {
            if let Some(cpu) = requests.get("cpu") {
                totals.cpu_requests += parse_cpu(&cpu.0);
            }
            if let Some(memory) = requests.get("memory") {
                totals.memory_request_bytes += parse_memory(&memory.0);
            }
            if let Some(ephemeral) = requests.get("ephemeral-storage") {
                totals.ephemeral_request_bytes += parse_memory(&ephemeral.0);
            }
        }
        if let Some(limits) = resources.limits.as_ref() {
            if let Some(cpu) = limits.get("cpu") {
                totals.cpu_limits += parse_cpu(&cpu.0);
            }
            if let Some(memory) = limits.get("memory") {
                totals.memory_limit_bytes += parse_memory(&memory.0);
            }
        }
    }
    totals
}

fn sum_pod_totals(pods: &[Pod]) -> RequestTotals {
    pods.iter().map(pod_totals).fold(
        RequestTotals::default(),
        |mut acc, totals| {
            acc.cpu_requests += totals.cpu_requests;
            acc.cpu_limits += totals.cpu_limits;
            acc.memory_request_bytes += totals.memory_request_bytes;
            acc.memory_limit_bytes += totals.memory_limit_bytes;
            acc.ephemeral_request_bytes += totals.ephemeral_request_bytes;
            acc.containers += totals.containers;
            acc.running += totals.running;
            acc
        },
    )
}

fn usage_percent(used: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 {
        return 0.0;
    }
    (used / capacity * 100.0).clamp(0.0, 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn aggregate_cluster(
    nodes: &[Node],
    pods: &[Pod],
    live_totals: Option<(f64, f64)>,
) -> ClusterMetrics {
    let capacity = nodes
        .iter()
        .map(node_capacity)
        .fold(CapacityTotals::default(), |mut acc, totals| {
            acc.cpu_capacity += totals.cpu_capacity;
            acc.cpu_allocatable += totals.cpu_allocatable;
            acc.memory_capacity_bytes += totals.memory_capacity_bytes;
            acc.memory_allocatable_bytes += totals.memory_allocatable_bytes;
            acc.pod_capacity += totals.pod_capacity;
            acc
        });
    let requests = sum_pod_totals(pods);

    let (cpu_used, memory_used_bytes, source) = match live_totals {
        Some((cpu, memory)) => (cpu, memory, MetricsSource::Live),
        None => (
            requests.cpu_requests,
            requests.memory_request_bytes,
            MetricsSource::Requests,
        ),
    };

    ClusterMetrics {
        cpu: ResourceStat {
            usage_percent: round2(usage_percent(cpu_used, capacity.cpu_capacity)),
            requests: round2(requests.cpu_requests),
            limits: round2(requests.cpu_limits),
            capacity: round2(capacity.cpu_capacity),
            allocatable: round2(capacity.cpu_allocatable),
        },
        memory: ResourceStat {
            usage_percent: round2(usage_percent(
                memory_used_bytes,
                capacity.memory_capacity_bytes,
            )),
            requests: round2(bytes_to_mebibytes(requests.memory_request_bytes)),
            limits: round2(bytes_to_mebibytes(requests.memory_limit_bytes)),
            capacity: round2(bytes_to_mebibytes(capacity.memory_capacity_bytes)),
            allocatable: round2(bytes_to_mebibytes(capacity.memory_allocatable_bytes)),
        },
        pods: PodStat {
            count: requests.running,
            capacity: capacity.pod_capacity,
        },
        source,
        sampled_at: Local::now(),
    }
}

fn build_node_metrics(
    node: &Node,
    pods: &[Pod],
    pvc_sizes: &HashMap<String, f64>,
    live: Option<(f64, f64)>,
) -> NodeMetrics {
    let name = node.name_any();
    let capacity = node_capacity(node);
    let requests = sum_pod_totals(pods);

    let (cpu_used, memory_used_bytes, source) = match live {
        Some((cpu, memory)) => (cpu, memory, MetricsSource::Live),
        None => (
            requests.cpu_requests,
            requests.memory_request_bytes,
            MetricsSource::Requests,
        ),
    };

    NodeMetrics {
        node: name,
        cpu: ResourceStat {
            usage_percent: round2(usage_percent(cpu_used, capacity.cpu_capacity)),
            requests: round2(requests.cpu_requests),
            limits: round2(requests.cpu_limits),
            capacity: round2(capacity.cpu_capacity),
            allocatable: round2(capacity.cpu_allocatable),
        },
        memory: ResourceStat {
            usage_percent: round2(usage_percent(
                memory_used_bytes,
                capacity.memory_capacity_bytes,
            )),
            requests: round2(bytes_to_mebibytes(requests.memory_request_bytes)),
            limits: round2(bytes_to_mebibytes(requests.memory_limit_bytes)),
            capacity: round2(bytes_to_mebibytes(capacity.memory_capacity_bytes)),
            allocatable: round2(bytes_to_mebibytes(capacity.memory_allocatable_bytes)),
        },
        pods: PodStat {
            count: requests.running,
            capacity: capacity.pod_capacity,
        },
        source,
        disk_estimate_percent: disk_estimate_percent(&capacity, pods, pvc_sizes, &requests),
    }
}

fn disk_estimate_percent(
    capacity: &CapacityTotals,
    pods: &[Pod],
    pvc_sizes: &HashMap<String, f64>,
    requests: &RequestTotals,
) -> Option<f64> {
    if capacity.ephemeral_capacity_bytes <= 0.0 {
        return None;
    }

    let mut claimed_bytes = 0.0;
    for pod in pods {
        if !is_running(pod) {
            continue;
        }
        let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
        let volumes = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.volumes.as_deref())
            .unwrap_or(&[]);
        for volume in volumes {
            if let Some(claim) = volume.persistent_volume_claim.as_ref() {
                let key = format!("{namespace}/{}", claim.claim_name);
                claimed_bytes += pvc_sizes.get(&key).copied().unwrap_or(0.0);
            }
        }
    }

    let estimated = requests.ephemeral_request_bytes
        + claimed_bytes
        + requests.containers as f64 * BASE_IMAGE_ALLOWANCE_BYTES;
    Some(round2(usage_percent(
        estimated,
        capacity.ephemeral_capacity_bytes,
    )))
}

#[cfg(test)]
mod tests {
    use super::{aggregate_cluster, build_node_metrics, node_capacity, sum_pod_totals};
    use crate::model::MetricsSource;
    use k8s_openapi::api::core::v1::{
        Container, Node, NodeStatus, Pod, PodSpec, PodStatus, ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::{BTreeMap, HashMap};

    fn node(cpu: &str, memory: &str, pods: &str) -> Node {
        let mut capacity = BTreeMap::new();
        capacity.insert("cpu".to_string(), Quantity(cpu.to_string()));
        capacity.insert("memory".to_string(), Quantity(memory.to_string()));
        capacity.insert("pods".to_string(), Quantity(pods.to_string()));
        Node {
            status: Some(NodeStatus {
                capacity: Some(capacity.clone()),
                allocatable: Some(capacity),
                ..NodeStatus::default()
            }),
            ..Node::default()
        }
    }

    fn running_pod(cpu_request: &str, memory_request: &str) -> Pod {
        let mut requests = BTreeMap::new();
        requests.insert("cpu".to_string(), Quantity(cpu_request.to_string()));
        requests.insert("memory".to_string(), Quantity(memory_request.to_string()));
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some(requests),
                        ..ResourceRequirements::default()
                    }),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn requests_aggregate_across_running_pods() {
        let nodes = vec![node("4", "8Gi", "110"), node("4", "8Gi", "110")];
        let pods = vec![
            running_pod("500m", "256Mi"),
            running_pod("500m", "256Mi"),
            running_pod("500m", "256Mi"),
        ];

        let metrics = aggregate_cluster(&nodes, &pods, None);

        assert_eq!(metrics.cpu.capacity, 8.0);
        assert_eq!(metrics.cpu.allocatable, 8.0);
        assert_eq!(metrics.cpu.requests, 1.5);
        assert_eq!(metrics.cpu.limits, 0.0);
        assert_eq!(metrics.cpu.usage_percent, 18.75);
        assert_eq!(metrics.memory.capacity, 16_384.0);
        assert_eq!(metrics.memory.allocatable, 16_384.0);
        assert_eq!(metrics.memory.requests, 768.0);
        assert_eq!(metrics.pods.count, 3);
        assert_eq!(metrics.pods.capacity, 220);
        assert_eq!(metrics.source, MetricsSource::Requests);
    }

    #[test]
    fn non_running_pods_are_excluded() {
        let mut pending = running_pod("2", "1Gi");
        pending.status.as_mut().unwrap().phase = Some("Pending".to_string());

        let totals = sum_pod_totals(&[running_pod("1", "512Mi"), pending]);
        assert_eq!(totals.running, 1);
        assert_eq!(totals.cpu_requests, 1.0);
    }

    #[test]
    fn live_usage_wins_over_requests() {
        let nodes = vec![node("4", "8Gi", "110")];
        let pods = vec![running_pod("500m", "256Mi")];

        let metrics = aggregate_cluster(&nodes, &pods, Some((2.0, 4.0 * 1_073_741_824.0)));

        assert_eq!(metrics.source, MetricsSource::Live);
        assert_eq!(metrics.cpu.usage_percent, 50.0);
        assert_eq!(metrics.memory.usage_percent, 50.0);
        assert_eq!(metrics.cpu.requests, 0.5);
    }

    #[test]
    fn usage_is_clamped_and_zero_capacity_is_safe() {
        let nodes = vec![node("1", "1Gi", "10")];
        let pods = vec![running_pod("4", "8Gi")];
        let metrics = aggregate_cluster(&nodes, &pods, None);
        assert_eq!(metrics.cpu.usage_percent, 100.0);
        assert_eq!(metrics.memory.usage_percent, 100.0);

        let empty = aggregate_cluster(&[], &[], None);
        assert_eq!(empty.cpu.usage_percent, 0.0);
        assert_eq!(empty.cpu.capacity, 0.0);
        assert_eq!(empty.pods.capacity, 0);
    }

    #[test]
    fn malformed_quantities_count_as_zero() {
        let broken = node("not-a-cpu", "lots", "many");
        let capacity = node_capacity(&broken);
        assert_eq!(capacity.cpu_capacity, 0.0);
        assert_eq!(capacity.memory_capacity_bytes, 0.0);
        assert_eq!(capacity.pod_capacity, 0);
    }

    #[test]
    fn disk_estimate_requires_ephemeral_capacity() {
        let plain = node("4", "8Gi", "110");
        let pods = vec![running_pod("500m", "256Mi")];
        let metrics = build_node_metrics(&plain, &pods, &HashMap::new(), None);
        assert_eq!(metrics.disk_estimate_percent, None);

        let mut with_disk = node("4", "8Gi", "110");
        with_disk
            .status
            .as_mut()
            .unwrap()
            .capacity
            .as_mut()
            .unwrap()
            .insert(
                "ephemeral-storage".to_string(),
                Quantity("100Gi".to_string()),
            );
        let metrics = build_node_metrics(&with_disk, &pods, &HashMap::new(), None);
        let estimate = metrics.disk_estimate_percent.expect("estimate present");
        assert!(estimate > 0.0 && estimate <= 100.0);
    }
}
