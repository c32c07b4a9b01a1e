use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by the cluster API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The object disappeared between listing and reading it
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// Transport or auth failure talking to the API server
    #[error("cluster API request failed: {0}")]
    Connectivity(#[source] BoxError),
}

impl ClusterError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn connectivity(err: impl Into<BoxError>) -> Self {
        Self::Connectivity(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
