//! Helm release lookup
//!
//! Helm v3 stores every revision of a release as a Secret (or ConfigMap,
//! depending on the storage driver) labelled `owner=helm`, `name=<release>`
//! and `version=<revision>`. Only those labels are read; the encoded
//! release payload is never fetched.

use std::str::FromStr;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api;
use kube::api::ListParams;
use tracing::debug;

use crate::client::map_kube_error;
use rtlogs_types::{ClusterError, ReleaseTarget};

/// Storage backend Helm keeps release records in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HelmDriver {
    #[default]
    Secret,
    ConfigMap,
}

impl FromStr for HelmDriver {
    type Err = String;

    /// Accepts the values of Helm's `HELM_DRIVER`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "secret" | "secrets" => Ok(Self::Secret),
            "configmap" | "configmaps" => Ok(Self::ConfigMap),
            other => Err(format!(
                "unsupported Helm storage driver '{}' (expected secret or configmap)",
                other
            )),
        }
    }
}

/// Resolves a release name to the namespace and ownership marker of its workloads
#[async_trait]
pub trait ReleaseLookup: Send + Sync {
    async fn resolve_release(&self, name: &str) -> Result<ReleaseTarget, ClusterError>;
}

/// Looks releases up in Helm's storage objects
pub struct ReleaseLocator {
    client: kube::Client,
    driver: HelmDriver,
    namespace: String,
}

impl ReleaseLocator {
    /// Search `namespace`, or the client's default namespace when unset
    pub fn new(client: kube::Client, driver: HelmDriver, namespace: Option<String>) -> Self {
        let namespace = namespace.unwrap_or_else(|| client.default_namespace().to_string());
        Self {
            client,
            driver,
            namespace,
        }
    }

    async fn storage_records(&self, release: &str) -> Result<Vec<ObjectMeta>, ClusterError> {
        let params = ListParams::default().labels(&format!("owner=helm,name={}", release));

        let items = match self.driver {
            HelmDriver::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
                api.list_metadata(&params)
                    .await
                    .map_err(|e| map_kube_error("secret", release, e))?
                    .items
                    .into_iter()
                    .map(|o| o.metadata)
                    .collect()
            }
            HelmDriver::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
                api.list_metadata(&params)
                    .await
                    .map_err(|e| map_kube_error("configmap", release, e))?
                    .items
                    .into_iter()
                    .map(|o| o.metadata)
                    .collect()
            }
        };

        Ok(items)
    }
}

#[async_trait]
impl ReleaseLookup for ReleaseLocator {
    async fn resolve_release(&self, name: &str) -> Result<ReleaseTarget, ClusterError> {
        let records = self.storage_records(name).await?;
        debug!(
            release = name,
            namespace = %self.namespace,
            revisions = records.len(),
            "Found Helm release records"
        );

        let (namespace, revision) = latest_revision(&records)
            .ok_or_else(|| ClusterError::not_found("release", name))?;
        let namespace = namespace.unwrap_or_else(|| self.namespace.clone());
        debug!(release = name, %namespace, revision, "Resolved release");

        Ok(ReleaseTarget::helm(name, namespace))
    }
}

/// Namespace and revision number of the newest record
fn latest_revision(records: &[ObjectMeta]) -> Option<(Option<String>, u64)> {
    records
        .iter()
        .filter_map(|meta| {
            let version = meta.labels.as_ref()?.get("version")?.parse::<u64>().ok()?;
            Some((meta.namespace.clone(), version))
        })
        .max_by_key(|(_, version)| *version)
}
