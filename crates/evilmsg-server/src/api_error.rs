//! Mapping of component errors onto HTTP responses.
//!
//! Validation problems become 400, missing projects 404. Storage and build
//! failures become a bare 500; their detail only goes to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::builder::{BuildError, UnknownFlavor};
use crate::gate::IngestError;
use crate::project_id::InvalidProjectId;
use crate::storage::{DatabaseError, ProjectError};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            Self::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<InvalidProjectId> for ApiError {
    fn from(e: InvalidProjectId) -> Self {
        warn!(error = %e, "Malformed project id");
        Self::BadRequest(e.to_string())
    }
}

impl From<UnknownFlavor> for ApiError {
    fn from(e: UnknownFlavor) -> Self {
        Self::NotFound(e.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        error!(error = %e, "Storage failure");
        Self::Internal
    }
}

impl From<ProjectError> for ApiError {
    fn from(e: ProjectError) -> Self {
        match e {
            ProjectError::EmptyName => {
                warn!("Project name is empty");
                Self::BadRequest(e.to_string())
            }
            ProjectError::NotFound(id) => Self::NotFound(format!("Project {id} not found")),
            ProjectError::Storage(e) => e.into(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::InvalidProjectId(e) => Self::BadRequest(e.to_string()),
            // Stopped projects look the same as missing ones to beacons.
            IngestError::UnknownProject(_) | IngestError::ProjectStopped(_) => {
                Self::NotFound("Project not found".to_string())
            }
            // Already logged by the gate.
            IngestError::StorageFailure(_) => Self::Internal,
        }
    }
}

impl From<BuildError> for ApiError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::InvalidProjectId(e) => e.into(),
            BuildError::BuildFailed { reason, .. } => {
                warn!(reason = reason.code(), "Beacon build failed");
                Self::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuildFailure;

    #[test]
    fn build_output_never_reaches_the_response() {
        let err = BuildError::BuildFailed {
            reason: BuildFailure::ExitStatus(Some(2)),
            output: "/home/builder/secret/path: error".to_string(),
        };
        let api: ApiError = err.into();
        assert!(matches!(api, ApiError::Internal));
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Internal.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn stopped_and_unknown_share_not_found() {
        assert!(matches!(
            ApiError::from(IngestError::ProjectStopped(1)),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(IngestError::UnknownProject(1)),
            ApiError::NotFound(_)
        ));
    }
}
