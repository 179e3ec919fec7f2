//! `kube`-backed implementation of [`Cluster`]

use std::path::Path;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::Value;
use tracing::debug;

use super::{async_trait, route_base_url, Cluster};
use crate::error::{is_not_found, RemediationError, Result};
use crate::models::ResourceKind;

/// Cluster access through the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using an explicit kubeconfig, or the inferred environment
    /// (in-cluster service account or `~/.kube/config`).
    ///
    /// The session is verified with a version call so that an expired login
    /// surfaces as an environment error before any work starts.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    RemediationError::Configuration(format!(
                        "cannot read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| RemediationError::NotAuthenticated(e.to_string()))?
            }
            None => Config::infer()
                .await
                .map_err(|e| RemediationError::NotAuthenticated(e.to_string()))?,
        };

        let client = Client::try_from(config)
            .map_err(|e| RemediationError::NotAuthenticated(e.to_string()))?;

        let version = client
            .apiserver_version()
            .await
            .map_err(|e| RemediationError::NotAuthenticated(e.to_string()))?;
        debug!(version = %version.git_version, "Connected to API server");

        Ok(Self { client })
    }

    fn dynamic_api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get_opt(namespace).await? {
            Some(_) => Ok(()),
            None => Err(RemediationError::NamespaceNotFound(namespace.to_string())),
        }
    }

    async fn list_resources(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.dynamic_api(kind, namespace);
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(e) if is_not_found(&e) => {
                Err(RemediationError::ResourceTypeMissing(kind.display_name()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn merge_patch_resource(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<()> {
        let api = self.dynamic_api(kind, Some(namespace));
        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Err(RemediationError::ResourceNotFound {
                kind: kind.kind.clone(),
                name: format!("{}/{}", namespace, name),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        match api
            .patch(name, &PatchParams::default(), &Patch::Strategic(patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Err(RemediationError::ResourceNotFound {
                kind: "Deployment".to_string(),
                name: format!("{}/{}", namespace, name),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods(&self, namespace: Option<&str>, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(namespace, pod = name, "Pod already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_route(&self, namespace: &str, selector: &str) -> Result<Option<String>> {
        let api = self.dynamic_api(&ResourceKind::route(), Some(namespace));
        let routes = match api.list(&ListParams::default().labels(selector)).await {
            Ok(list) => list.items,
            Err(e) if is_not_found(&e) => {
                return Err(RemediationError::ResourceTypeMissing(
                    ResourceKind::route().display_name(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(routes.iter().find_map(route_base_url))
    }
}
