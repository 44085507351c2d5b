//! REST API handler that starts configuration rollouts.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use cfgrid_rollout::{RolloutError, RolloutRequest};

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response};

/// Request body of `POST /api/v1/config/update`.
///
/// The canned bundle is a base64-encoded tar archive.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigBody {
    #[serde(default)]
    pub ref_name: Option<String>,
    #[serde(default)]
    pub canned_bundle: Option<String>,
    #[serde(default)]
    pub bundle_hash: Option<String>,
}

impl UpdateConfigBody {
    fn into_request(self) -> Result<RolloutRequest, String> {
        let canned_bundle = match self.canned_bundle {
            Some(encoded) => Some(
                STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| format!("cannedBundle is not valid base64: {e}"))?
                    .into(),
            ),
            None => None,
        };
        Ok(RolloutRequest {
            ref_name: self.ref_name,
            canned_bundle,
            bundle_hash: self.bundle_hash,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreated {
    pub job_id: String,
}

/// POST /api/v1/config/update
pub async fn update_config(
    State(state): State<ApiState>,
    Json(body): Json<UpdateConfigBody>,
) -> impl IntoResponse {
    let request = match body.into_request() {
        Ok(request) => request,
        Err(msg) => return error_response(&msg, StatusCode::BAD_REQUEST).into_response(),
    };

    match state.coordinator.update_config(request).await {
        Ok(job_id) => {
            info!(%job_id, "configuration update accepted");
            (StatusCode::ACCEPTED, ApiResponse::ok(JobCreated { job_id })).into_response()
        }
        Err(e @ RolloutError::InvalidArgument(_)) => {
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
        Err(e @ RolloutError::Conflict(_)) => {
            error_response(&e.to_string(), StatusCode::CONFLICT).into_response()
        }
        Err(e @ RolloutError::State(_)) => {
            error!(error = %e, "configuration update failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}
