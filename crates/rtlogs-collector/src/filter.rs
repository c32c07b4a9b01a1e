use tracing::debug;

use rtlogs_types::ResourceDescriptor;

/// Names of the resources whose annotation `key` equals `value`, in input order
///
/// A resource without the annotation does not match.
pub fn filter_by_annotation(resources: &[ResourceDescriptor], key: &str, value: &str) -> Vec<String> {
    resources
        .iter()
        .filter(|resource| {
            let actual = resource.annotations.get(key);
            debug!(
                kind = %resource.kind,
                resource = %resource.name,
                annotation = key,
                actual = actual.map(String::as_str).unwrap_or(""),
                expected = value,
                "Filtering"
            );
            actual.is_some_and(|v| v == value)
        })
        .map(|resource| resource.name.clone())
        .collect()
}
