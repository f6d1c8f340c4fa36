use thiserror::Error;

/// Failure of a single upstream read, normalized across the management and cluster APIs.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("upstream call timed out after {0} seconds")]
    Timeout(u64),
    #[error("malformed upstream payload: {0}")]
    Decode(String),
}

/// The one "operation failed" result the resource proxy reports.
///
/// Cluster-scoped reads are a credential fetch followed by a cluster query; the two halves
/// fail differently (`ClusterCredential` points at the management identity, `ClusterQuery`
/// at the cluster itself), so they stay distinct variants.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("control plane request failed: {0}")]
    ControlPlane(UpstreamError),
    #[error("could not obtain cluster credential: {0}")]
    ClusterCredential(UpstreamError),
    #[error("could not query cluster: {0}")]
    ClusterQuery(UpstreamError),
    #[error("invalid operation parameters: {0}")]
    InvalidParameters(String),
}

impl ProxyError {
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            Self::ControlPlane(error)
            | Self::ClusterCredential(error)
            | Self::ClusterQuery(error) => Some(error),
            Self::InvalidParameters(_) => None,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ControlPlane(_) => "control_plane_failed",
            Self::ClusterCredential(_) => "cluster_credential_failed",
            Self::ClusterQuery(_) => "cluster_query_failed",
            Self::InvalidParameters(_) => "invalid_parameters",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ProxyError, UpstreamError};

    #[test]
    fn credential_and_query_failures_stay_distinguishable() {
        let upstream = UpstreamError::Transport("connection reset".to_owned());
        let credential = ProxyError::ClusterCredential(upstream.clone());
        let query = ProxyError::ClusterQuery(upstream);

        assert_ne!(credential.reason_code(), query.reason_code());
        assert!(credential.to_string().starts_with("could not obtain cluster credential"));
        assert!(query.to_string().starts_with("could not query cluster"));
    }

    #[test]
    fn upstream_message_is_carried_through() {
        let error = ProxyError::ControlPlane(UpstreamError::NotFound(
            "storage account `missing` was not found".to_owned(),
        ));

        assert!(error.to_string().contains("storage account `missing` was not found"));
        assert!(matches!(error.upstream(), Some(UpstreamError::NotFound(_))));
    }

    #[test]
    fn invalid_parameters_has_no_upstream_cause() {
        let error = ProxyError::InvalidParameters("expected 2 parameters, got 0".to_owned());
        assert!(error.upstream().is_none());
        assert_eq!(error.reason_code(), "invalid_parameters");
    }
}
