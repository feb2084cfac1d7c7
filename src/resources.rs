use anyhow::Result;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Event, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret,
    Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ListParams, ObjectList};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::clients::{ApiGroup, ClientPool};
use crate::events::{event_timestamp_seconds, format_elapsed_seconds, now_seconds, truncate};
use crate::model::{NamespaceScope, ResourceKind, ResourcePage, ResourceSummary};

pub struct ResourceLoader {
    pool: Arc<ClientPool>,
    page_limit: u32,
}

impl ResourceLoader {
    pub fn new(pool: Arc<ClientPool>, page_limit: u32) -> Self {
        Self {
            pool,
            page_limit: page_limit.max(1),
        }
    }

    pub async fn load(
        &self,
        kind: ResourceKind,
        scope: &NamespaceScope,
        continue_token: Option<&str>,
    ) -> Result<ResourcePage> {
        let mut params = ListParams::default().limit(self.page_limit);
        if let Some(token) = continue_token {
            params = params.continue_token(token);
        }

        match kind {
            ResourceKind::Pods => self.fetch_pods(scope, &params).await,
            ResourceKind::Deployments => self.fetch_deployments(scope, &params).await,
            ResourceKind::ReplicaSets => self.fetch_replicasets(scope, &params).await,
            ResourceKind::StatefulSets => self.fetch_statefulsets(scope, &params).await,
            ResourceKind::DaemonSets => self.fetch_daemonsets(scope, &params).await,
            ResourceKind::Jobs => self.fetch_jobs(scope, &params).await,
            ResourceKind::CronJobs => self.fetch_cronjobs(scope, &params).await,
            ResourceKind::Services => self.fetch_services(scope, &params).await,
            ResourceKind::Ingresses => self.fetch_ingresses(scope, &params).await,
            ResourceKind::ConfigMaps => self.fetch_configmaps(scope, &params).await,
            ResourceKind::Secrets => self.fetch_secrets(scope, &params).await,
            ResourceKind::PersistentVolumeClaims => {
                self.fetch_persistent_volume_claims(scope, &params).await
            }
            ResourceKind::PersistentVolumes => self.fetch_persistent_volumes(&params).await,
            ResourceKind::ServiceAccounts => self.fetch_service_accounts(scope, &params).await,
            ResourceKind::Nodes => self.fetch_nodes(&params).await,
            ResourceKind::Namespaces => self.fetch_namespaces(&params).await,
            ResourceKind::Events => self.fetch_events(scope, &params).await,
        }
    }

    pub async fn load_many(
        &self,
        kinds: &[ResourceKind],
        scope: &NamespaceScope,
    ) -> Vec<(ResourceKind, ResourcePage)> {
        let mut pages = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let page = match self.load(*kind, scope, None).await {
                Ok(page) => page,
                Err(error) => {
                    warn!(kind = kind.title(), error = %error, "resource load failed");
                    ResourcePage::default()
                }
            };
            pages.push((*kind, page));
        }
        pages
    }

    fn scoped_api<K>(&self, group: ApiGroup, scope: &NamespaceScope) -> Result<Api<K>>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        let client = self.pool.get(group)?;
        Ok(match scope {
            NamespaceScope::All => Api::all(client),
            NamespaceScope::Named(namespace) => Api::namespaced(client, namespace),
        })
    }

    fn cluster_api<K>(&self, group: ApiGroup) -> Result<Api<K>>
    where
        K: Resource,
        <K as Resource>::DynamicType: Default,
    {
        Ok(Api::all(self.pool.get(group)?))
    }

    async fn fetch_pods(&self, scope: &NamespaceScope, params: &ListParams) -> Result<ResourcePage> {
        let api: Api<Pod> = self.scoped_api(ApiGroup::Core, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|pod| {
                let name = pod.name_any();
                let namespace = pod.namespace();
                let node = pod
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.node_name.clone())
                    .unwrap_or_else(|| "-".to_string());
                let (ready, total, restarts) =
                    pod.status.as_ref().map(pod_readiness).unwrap_or((0, 0, 0));
                let status = pod_display_status(&pod);
                let age = human_age(pod.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        node,
                        format!("{ready}/{total}"),
                        status,
                        restarts.to_string(),
                        age,
                    ],
                    detail: yaml_detail(&pod),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&[
                "Name", "Namespace", "Node", "Ready", "Status", "Restarts", "Age",
            ]),
            items,
            next_token,
        })
    }

    async fn fetch_deployments(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<Deployment> = self.scoped_api(ApiGroup::Apps, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|deployment| {
                let name = deployment.name_any();
                let namespace = deployment.namespace();
                let desired = deployment
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.replicas)
                    .unwrap_or(0);
                let status = deployment.status.as_ref();
                let ready = status.and_then(|status| status.ready_replicas).unwrap_or(0);
                let updated = status
                    .and_then(|status| status.updated_replicas)
                    .unwrap_or(0);
                let available = status
                    .and_then(|status| status.available_replicas)
                    .unwrap_or(0);
                let age = human_age(deployment.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        format!("{ready}/{desired}"),
                        updated.to_string(),
                        available.to_string(),
                        age,
                    ],
                    detail: yaml_detail(&deployment),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&[
                "Name",
                "Namespace",
                "Ready",
                "Up-to-date",
                "Available",
                "Age",
            ]),
            items,
            next_token,
        })
    }

    async fn fetch_replicasets(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<ReplicaSet> = self.scoped_api(ApiGroup::Apps, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|replicaset| {
                let name = replicaset.name_any();
                let namespace = replicaset.namespace();
                let desired = replicaset
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.replicas)
                    .unwrap_or(0);
                let status = replicaset.status.as_ref();
                let current = status.map(|status| status.replicas).unwrap_or(0);
                let ready = status.and_then(|status| status.ready_replicas).unwrap_or(0);
                let age = human_age(replicaset.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        desired.to_string(),
                        current.to_string(),
                        ready.to_string(),
                        age,
                    ],
                    detail: yaml_detail(&replicaset),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Namespace", "Desired", "Current", "Ready", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_statefulsets(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<StatefulSet> = self.scoped_api(ApiGroup::Apps, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|statefulset| {
                let name = statefulset.name_any();
                let namespace = statefulset.namespace();
                let desired = statefulset
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.replicas)
                    .unwrap_or(0);
                let ready = statefulset
                    .status
                    .as_ref()
                    .and_then(|status| status.ready_replicas)
                    .unwrap_or(0);
                let age = human_age(statefulset.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        format!("{ready}/{desired}"),
                        age,
                    ],
                    detail: yaml_detail(&statefulset),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Namespace", "Ready", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_daemonsets(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<DaemonSet> = self.scoped_api(ApiGroup::Apps, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|daemonset| {
                let name = daemonset.name_any();
                let namespace = daemonset.namespace();
                let status = daemonset.status.as_ref();
                let desired = status
                    .map(|status| status.desired_number_scheduled)
                    .unwrap_or(0);
                let ready = status.map(|status| status.number_ready).unwrap_or(0);
                let available = status
                    .and_then(|status| status.number_available)
                    .unwrap_or(0);
                let age = human_age(daemonset.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        desired.to_string(),
                        ready.to_string(),
                        available.to_string(),
                        age,
                    ],
                    detail: yaml_detail(&daemonset),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Namespace", "Desired", "Ready", "Available", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_jobs(&self, scope: &NamespaceScope, params: &ListParams) -> Result<ResourcePage> {
        let api: Api<Job> = self.scoped_api(ApiGroup::Batch, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|job| {
                let name = job.name_any();
                let namespace = job.namespace();
                let completions = job
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.completions)
                    .unwrap_or(1);
                let succeeded = job
                    .status
                    .as_ref()
                    .and_then(|status| status.succeeded)
                    .unwrap_or(0);
                let age = human_age(job.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        format!("{succeeded}/{completions}"),
                        age,
                    ],
                    detail: yaml_detail(&job),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Namespace", "Completions", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_cronjobs(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<CronJob> = self.scoped_api(ApiGroup::Batch, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|cronjob| {
                let name = cronjob.name_any();
                let namespace = cronjob.namespace();
                let schedule = cronjob
                    .spec
                    .as_ref()
                    .map(|spec| spec.schedule.clone())
                    .unwrap_or_else(|| "-".to_string());
                let suspended = cronjob
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.suspend)
                    .unwrap_or(false);
                let active = cronjob
                    .status
                    .as_ref()
                    .and_then(|status| status.active.as_ref())
                    .map(|active| active.len())
                    .unwrap_or(0);
                let last_schedule = cronjob
                    .status
                    .as_ref()
                    .and_then(|status| status.last_schedule_time.as_ref())
                    .map(|time| human_age(Some(time)))
                    .unwrap_or_else(|| "-".to_string());
                let age = human_age(cronjob.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        schedule,
                        if suspended { "Yes" } else { "No" }.to_string(),
                        active.to_string(),
                        last_schedule,
                        age,
                    ],
                    detail: yaml_detail(&cronjob),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&[
                "Name",
                "Namespace",
                "Schedule",
                "Suspend",
                "Active",
                "Last Schedule",
                "Age",
            ]),
            items,
            next_token,
        })
    }

    async fn fetch_services(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<Service> = self.scoped_api(ApiGroup::Core, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|service| {
                let name = service.name_any();
                let namespace = service.namespace();
                let service_type = service
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.type_.clone())
                    .unwrap_or_else(|| "ClusterIP".to_string());
                let cluster_ip = service
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.cluster_ip.clone())
                    .unwrap_or_else(|| "-".to_string());
                let ports = service
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.ports.clone())
                    .unwrap_or_default()
                    .into_iter()
                    .map(|port| {
                        let protocol = port.protocol.unwrap_or_else(|| "TCP".to_string());
                        format!("{}/{}", port.port, protocol)
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                let age = human_age(service.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        service_type,
                        cluster_ip,
                        if ports.is_empty() {
                            "-".to_string()
                        } else {
                            ports
                        },
                        age,
                    ],
                    detail: yaml_detail(&service),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Namespace", "Type", "Cluster IP", "Ports", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_ingresses(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<Ingress> = self.scoped_api(ApiGroup::Networking, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|ingress| {
                let name = ingress.name_any();
                let namespace = ingress.namespace();
                let class = ingress
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.ingress_class_name.clone())
                    .unwrap_or_else(|| "-".to_string());
                let hosts = ingress
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.rules.as_ref())
                    .map(|rules| {
                        rules
                            .iter()
                            .filter_map(|rule| rule.host.clone())
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                let hosts = if hosts.is_empty() {
                    "-".to_string()
                } else {
                    truncate(&hosts.join(","), 40)
                };
                let address = ingress
                    .status
                    .as_ref()
                    .and_then(|status| status.load_balancer.as_ref())
                    .and_then(|lb| lb.ingress.as_ref())
                    .and_then(|entries| {
                        entries.first().map(|entry| {
                            entry
                                .ip
                                .clone()
                                .or_else(|| entry.hostname.clone())
                                .unwrap_or_else(|| "-".to_string())
                        })
                    })
                    .unwrap_or_else(|| "-".to_string());
                let age = human_age(ingress.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        class,
                        hosts,
                        address,
                        age,
                    ],
                    detail: yaml_detail(&ingress),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Namespace", "Class", "Hosts", "Address", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_configmaps(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<ConfigMap> = self.scoped_api(ApiGroup::Core, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|configmap| {
                let name = configmap.name_any();
                let namespace = configmap.namespace();
                let keys = configmap.data.as_ref().map(|data| data.len()).unwrap_or(0)
                    + configmap
                        .binary_data
                        .as_ref()
                        .map(|data| data.len())
                        .unwrap_or(0);
                let age = human_age(configmap.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        keys.to_string(),
                        age,
                    ],
                    detail: yaml_detail(&configmap),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Namespace", "Keys", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_secrets(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<Secret> = self.scoped_api(ApiGroup::Core, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|secret| {
                let name = secret.name_any();
                let namespace = secret.namespace();
                let secret_type = secret.type_.clone().unwrap_or_else(|| "Opaque".to_string());
                let keys = secret.data.as_ref().map(|data| data.len()).unwrap_or(0);
                let age = human_age(secret.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        secret_type,
                        keys.to_string(),
                        age,
                    ],
                    detail: yaml_detail(&secret),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Namespace", "Type", "Keys", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_persistent_volume_claims(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<PersistentVolumeClaim> = self.scoped_api(ApiGroup::Core, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|claim| {
                let name = claim.name_any();
                let namespace = claim.namespace();
                let status = claim
                    .status
                    .as_ref()
                    .and_then(|status| status.phase.clone())
                    .unwrap_or_else(|| "Unknown".to_string());
                let volume = claim
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.volume_name.clone())
                    .unwrap_or_else(|| "-".to_string());
                let capacity = claim
                    .status
                    .as_ref()
                    .and_then(|status| status.capacity.as_ref())
                    .and_then(|capacity| capacity.get("storage"))
                    .map(|quantity| quantity.0.clone())
                    .unwrap_or_else(|| "-".to_string());
                let age = human_age(claim.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        status,
                        volume,
                        capacity,
                        age,
                    ],
                    detail: yaml_detail(&claim),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Namespace", "Status", "Volume", "Capacity", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_persistent_volumes(&self, params: &ListParams) -> Result<ResourcePage> {
        let api: Api<PersistentVolume> = self.cluster_api(ApiGroup::Core)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|volume| {
                let name = volume.name_any();
                let capacity = volume
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.capacity.as_ref())
                    .and_then(|capacity| capacity.get("storage"))
                    .map(|quantity| quantity.0.clone())
                    .unwrap_or_else(|| "-".to_string());
                let reclaim = volume
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.persistent_volume_reclaim_policy.clone())
                    .unwrap_or_else(|| "-".to_string());
                let status = volume
                    .status
                    .as_ref()
                    .and_then(|status| status.phase.clone())
                    .unwrap_or_else(|| "Unknown".to_string());
                let claim = volume
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.claim_ref.as_ref())
                    .map(|claim| {
                        format!(
                            "{}/{}",
                            claim.namespace.as_deref().unwrap_or("-"),
                            claim.name.as_deref().unwrap_or("-")
                        )
                    })
                    .unwrap_or_else(|| "-".to_string());
                let age = human_age(volume.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: None,
                    age: age.clone(),
                    columns: vec![name, capacity, reclaim, status, claim, age],
                    detail: yaml_detail(&volume),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Capacity", "Reclaim", "Status", "Claim", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_service_accounts(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<ServiceAccount> = self.scoped_api(ApiGroup::Core, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|account| {
                let name = account.name_any();
                let namespace = account.namespace();
                let secrets = account
                    .secrets
                    .as_ref()
                    .map(|secrets| secrets.len())
                    .unwrap_or(0);
                let age = human_age(account.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        secrets.to_string(),
                        age,
                    ],
                    detail: yaml_detail(&account),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Namespace", "Secrets", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_nodes(&self, params: &ListParams) -> Result<ResourcePage> {
        let api: Api<Node> = self.cluster_api(ApiGroup::Core)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|node| {
                let name = node.name_any();
                let status = node_ready_status(&node);
                let roles = node_roles(&node);
                let version = node
                    .status
                    .as_ref()
                    .and_then(|status| status.node_info.as_ref())
                    .map(|info| info.kubelet_version.clone())
                    .unwrap_or_else(|| "-".to_string());
                let age = human_age(node.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: None,
                    age: age.clone(),
                    columns: vec![name, status, roles, version, age],
                    detail: yaml_detail(&node),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Status", "Roles", "Version", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_namespaces(&self, params: &ListParams) -> Result<ResourcePage> {
        let api: Api<Namespace> = self.cluster_api(ApiGroup::Core)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let items = list
            .into_iter()
            .map(|namespace| {
                let name = namespace.name_any();
                let status = namespace
                    .status
                    .as_ref()
                    .and_then(|status| status.phase.clone())
                    .unwrap_or_else(|| "Unknown".to_string());
                let age = human_age(namespace.metadata.creation_timestamp.as_ref());

                ResourceSummary {
                    name: name.clone(),
                    namespace: None,
                    age: age.clone(),
                    columns: vec![name, status, age],
                    detail: yaml_detail(&namespace),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&["Name", "Status", "Age"]),
            items,
            next_token,
        })
    }

    async fn fetch_events(
        &self,
        scope: &NamespaceScope,
        params: &ListParams,
    ) -> Result<ResourcePage> {
        let api: Api<Event> = self.scoped_api(ApiGroup::Core, scope)?;
        let list = api.list(params).await?;
        let next_token = page_token(&list);

        let now_secs = now_seconds();
        let items = list
            .into_iter()
            .map(|event| {
                let name = event.name_any();
                let namespace = event.namespace();
                let kind = event
                    .involved_object
                    .kind
                    .clone()
                    .unwrap_or_else(|| "-".to_string());
                let object = event
                    .involved_object
                    .name
                    .clone()
                    .unwrap_or_else(|| "-".to_string());
                let reason = event.reason.clone().unwrap_or_else(|| "-".to_string());
                let event_type = event.type_.clone().unwrap_or_else(|| "-".to_string());
                let message = event.message.clone().unwrap_or_else(|| "-".to_string());
                let timestamp_secs = event_timestamp_seconds(&event);
                let age = if timestamp_secs > 0 {
                    format_elapsed_seconds((now_secs - timestamp_secs).max(0))
                } else {
                    "Unknown".to_string()
                };

                ResourceSummary {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    age: age.clone(),
                    columns: vec![
                        name,
                        namespace.unwrap_or_else(|| "-".to_string()),
                        kind,
                        object,
                        reason,
                        event_type,
                        truncate(&message, 80),
                        age,
                    ],
                    detail: yaml_detail(&event),
                }
            })
            .collect();

        Ok(ResourcePage {
            headers: headers(&[
                "Name",
                "Namespace",
                "Kind",
                "Object",
                "Reason",
                "Type",
                "Message",
                "Age",
            ]),
            items,
            next_token,
        })
    }
}

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn page_token<K>(list: &ObjectList<K>) -> Option<String>
where
    K: Clone,
{
    nonempty_token(list.metadata.continue_.clone())
}

fn nonempty_token(token: Option<String>) -> Option<String> {
    token.filter(|token| !token.is_empty())
}

fn pod_readiness(status: &k8s_openapi::api::core::v1::PodStatus) -> (usize, usize, i32) {
    let container_statuses = status.container_statuses.as_deref().unwrap_or(&[]);
    let total = container_statuses.len();
    let ready = container_statuses
        .iter()
        .filter(|container| container.ready)
        .count();
    let restarts = container_statuses
        .iter()
        .map(|container| container.restart_count)
        .sum();
    (ready, total, restarts)
}

fn pod_display_status(pod: &Pod) -> String {
    let Some(status) = pod.status.as_ref() else {
        return "Unknown".to_string();
    };
    let phase = status.phase.clone().unwrap_or_else(|| "Unknown".to_string());

    let container_statuses = status.container_statuses.as_deref().unwrap_or(&[]);
    for container in container_statuses {
        let Some(state) = container.state.as_ref() else {
            continue;
        };
        if let Some(waiting) = state.waiting.as_ref()
            && let Some(reason) = waiting.reason.as_deref()
            && matches!(
                reason,
                "CrashLoopBackOff" | "ImagePullBackOff" | "ErrImagePull" | "CreateContainerError"
            )
        {
            return reason.to_string();
        }
        if let Some(terminated) = state.terminated.as_ref()
            && terminated.exit_code != 0
            && phase != "Succeeded"
        {
            return terminated
                .reason
                .clone()
                .unwrap_or_else(|| "Error".to_string());
        }
    }
    phase
}

fn node_ready_status(node: &Node) -> String {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|condition| condition.type_ == "Ready")
        })
        .map(|condition| {
            if condition.status == "True" {
                "Ready".to_string()
            } else {
                "NotReady".to_string()
            }
        })
        .unwrap_or_else(|| "Unknown".to_string())
}

fn node_roles(node: &Node) -> String {
    let roles = node
        .metadata
        .labels
        .as_ref()
        .map(|labels| {
            labels
                .keys()
                .filter_map(|key| key.strip_prefix("node-role.kubernetes.io/"))
                .filter(|role| !role.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if roles.is_empty() {
        "<none>".to_string()
    } else {
        roles.join(",")
    }
}

pub(crate) fn human_age(timestamp: Option<&Time>) -> String {
    let Some(timestamp) = timestamp else {
        return "Unknown".to_string();
    };

    let elapsed_seconds =
        (k8s_openapi::jiff::Timestamp::now().as_second() - timestamp.0.as_second()).max(0);
    format_elapsed_seconds(elapsed_seconds)
}

fn yaml_detail<T>(value: &T) -> String
where
    T: Serialize,
{
    serde_yaml::to_string(value).unwrap_or_else(|error| format!("failed to format detail: {error}"))
}

#[cfg(test)]
mod tests {
    use super::{ResourceLoader, human_age, node_roles, nonempty_token, pod_display_status};
    use crate::clients::ClientPool;
    use crate::model::{NamespaceScope, ResourceKind};
    use http::{Request, Response};
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStateWaiting, ContainerStatus, Node,
        Pod, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use k8s_openapi::jiff::Timestamp;
    use kube::client::Body;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn pod_with_state(phase: &str, state: ContainerState) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "main".to_string(),
                    state: Some(state),
                    ..ContainerStatus::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn waiting_reasons_override_the_phase() {
        let pod = pod_with_state(
            "Running",
            ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some("CrashLoopBackOff".to_string()),
                    ..ContainerStateWaiting::default()
                }),
                ..ContainerState::default()
            },
        );
        assert_eq!(pod_display_status(&pod), "CrashLoopBackOff");
    }

    #[test]
    fn failed_containers_surface_as_errors() {
        let pod = pod_with_state(
            "Running",
            ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code: 137,
                    ..ContainerStateTerminated::default()
                }),
                ..ContainerState::default()
            },
        );
        assert_eq!(pod_display_status(&pod), "Error");
    }

    #[test]
    fn healthy_pods_keep_their_phase() {
        let pod = pod_with_state("Running", ContainerState::default());
        assert_eq!(pod_display_status(&pod), "Running");

        let bare = Pod::default();
        assert_eq!(pod_display_status(&bare), "Unknown");
    }

    fn namespace_list_response(names: &[&str], token: Option<&str>) -> Response<Body> {
        let items = names
            .iter()
            .map(|name| serde_json::json!({ "metadata": { "name": name } }))
            .collect::<Vec<_>>();
        let mut metadata = serde_json::json!({ "resourceVersion": "1" });
        if let Some(token) = token {
            metadata["continue"] = serde_json::json!(token);
        }
        let body = serde_json::json!({
            "apiVersion": "v1",
            "kind": "NamespaceList",
            "metadata": metadata,
            "items": items,
        });
        Response::builder()
            .status(200)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&body).expect("list serializes"),
            ))
            .expect("response builds")
    }

    #[tokio::test]
    async fn continuation_token_resumes_without_repeats_or_gaps() {
        let (mock_service, mut handle) =
            tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = kube::Client::new(mock_service, "default");

        let server = tokio::spawn(async move {
            let (request, respond) = handle.next_request().await.expect("first page request");
            let query = request.uri().query().unwrap_or("").to_string();
            assert!(query.contains("limit=2"));
            assert!(!query.contains("continue="));
            respond.send_response(namespace_list_response(&["alpha", "beta"], Some("page-2")));

            let (request, respond) = handle.next_request().await.expect("second page request");
            let query = request.uri().query().unwrap_or("").to_string();
            assert!(query.contains("continue=page-2"));
            respond.send_response(namespace_list_response(&["gamma"], None));
        });

        let config = kube::Config::new("http://127.0.0.1:8080".parse().expect("valid url"));
        let pool = Arc::new(ClientPool::with_builder(
            config,
            3,
            Box::new(move |_| Ok(client.clone())),
        ));
        let loader = ResourceLoader::new(pool, 2);

        let first = loader
            .load(ResourceKind::Namespaces, &NamespaceScope::All, None)
            .await
            .expect("first page loads");
        assert_eq!(first.next_token.as_deref(), Some("page-2"));

        let second = loader
            .load(
                ResourceKind::Namespaces,
                &NamespaceScope::All,
                first.next_token.as_deref(),
            )
            .await
            .expect("second page loads");
        assert_eq!(second.next_token, None);

        let names = first
            .items
            .iter()
            .chain(second.items.iter())
            .map(|item| item.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);

        server.await.expect("page requests match expectations");
    }

    #[test]
    fn continuation_tokens_pass_through_verbatim() {
        assert_eq!(
            nonempty_token(Some("eyJ2IjoibWV0YS5rOHMi".to_string())),
            Some("eyJ2IjoibWV0YS5rOHMi".to_string())
        );
        assert_eq!(nonempty_token(Some(String::new())), None);
        assert_eq!(nonempty_token(None), None);
    }

    #[test]
    fn missing_creation_timestamp_reads_unknown() {
        assert_eq!(human_age(None), "Unknown");

        let recent = Time(
            Timestamp::from_second(Timestamp::now().as_second() - 90).expect("valid timestamp"),
        );
        assert_eq!(human_age(Some(&recent)), "1m");
    }

    #[test]
    fn node_roles_come_from_labels() {
        let mut labels = BTreeMap::new();
        labels.insert(
            "node-role.kubernetes.io/control-plane".to_string(),
            String::new(),
        );
        labels.insert("kubernetes.io/os".to_string(), "linux".to_string());
        let node = Node {
            metadata: ObjectMeta {
                labels: Some(labels),
                ..ObjectMeta::default()
            },
            ..Node::default()
        };
        assert_eq!(node_roles(&node), "control-plane");

        assert_eq!(node_roles(&Node::default()), "<none>");
    }
}
