use std::collections::HashSet;

use tracing::{debug, warn};

use rtlogs_k8s::ClusterApi;
use rtlogs_types::{ClusterError, PodHandle, ResourceKind};

/// Fetch a workload and list the pods its selector owns
///
/// Fails with `NotFound` if the workload was deleted since it was listed.
/// A workload with an empty selector yields no pods rather than every pod
/// in the namespace.
pub async fn get_pods_for_resource<C>(
    api: &C,
    namespace: &str,
    kind: ResourceKind,
    name: &str,
) -> Result<Vec<PodHandle>, ClusterError>
where
    C: ClusterApi + ?Sized,
{
    let resource = api.get_resource(kind, namespace, name).await?;

    if resource.selector.is_empty() {
        warn!(%kind, resource = name, "Workload has an empty selector, skipping");
        return Ok(Vec::new());
    }

    let mut pods = api.list_pods(namespace, &resource.selector).await?;

    let mut seen = HashSet::new();
    pods.retain(|pod| seen.insert(pod.name.clone()));

    debug!(
        %kind,
        resource = name,
        selector = %resource.selector,
        pods = pods.len(),
        "Resolved pods"
    );
    Ok(pods)
}
