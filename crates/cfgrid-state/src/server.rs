//! HTTP endpoint of the process that owns the shared store.
//!
//! Replicas started with a remote store address send every primitive here
//! as a JSON [`Command`] and long-poll for pub/sub messages. Mount the
//! router next to the replica API on the owning process, or serve it alone.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::{Command, Reply};
use crate::pubsub::{PollReply, PollRequest};
use crate::store::StateStore;

pub const EXEC_PATH: &str = "/store/v1/exec";
pub const POLL_PATH: &str = "/store/v1/poll";

/// Longest a poll is held open, whatever the client asks for.
const MAX_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

type HandlerError = (StatusCode, Json<ErrorBody>);

/// Routes serving `store` to remote replicas.
pub fn router(store: StateStore) -> Router {
    Router::new()
        .route(EXEC_PATH, post(exec))
        .route(POLL_PATH, post(poll))
        .with_state(store)
}

async fn exec(
    State(store): State<StateStore>,
    Json(command): Json<Command>,
) -> Result<Json<Reply>, HandlerError> {
    let name = command.name();
    debug!(command = name, "remote store command");
    store.execute(command).await.map(Json).map_err(|e| {
        warn!(command = name, error = %e, "remote store command failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: e.to_string(),
            }),
        )
    })
}

async fn poll(
    State(store): State<StateStore>,
    Json(mut request): Json<PollRequest>,
) -> Result<Json<PollReply>, HandlerError> {
    request.wait_ms = request.wait_ms.min(MAX_WAIT.as_millis() as u64);
    store.poll(&request).await.map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: e.to_string(),
            }),
        )
    })
}
