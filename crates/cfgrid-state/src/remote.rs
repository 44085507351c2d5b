//! Client side of the shared store for replicas that do not own it.
//!
//! Every command is one JSON `POST` to the owning process, sent over a fresh
//! hyper HTTP/1 connection.
//! Subscriptions long-poll the owner from a background task.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::{Command, Reply};
use crate::error::{StateError, StateResult};
use crate::pubsub::{ChannelHead, PollReply, PollRequest};
use crate::server::{ErrorBody, EXEC_PATH, POLL_PATH};

/// Upper bound for one command round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the owner holds an idle poll open.
const POLL_WAIT: Duration = Duration::from_secs(25);

/// Pause after a failed poll before retrying.
const POLL_RETRY: Duration = Duration::from_secs(1);

/// Buffered payloads per remote subscription.
const SUBSCRIPTION_BUFFER: usize = 64;

/// HTTP client of the process that owns the shared store.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    addr: Arc<str>,
}

impl RemoteStore {
    /// `addr` is the owner's `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        let addr: String = addr.into();
        Self {
            addr: Arc::from(addr),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn execute(&self, command: &Command) -> StateResult<Reply> {
        self.post(EXEC_PATH, command, REQUEST_TIMEOUT).await
    }

    pub async fn poll(&self, request: &PollRequest) -> StateResult<PollReply> {
        let timeout = Duration::from_millis(request.wait_ms) + REQUEST_TIMEOUT;
        self.post(POLL_PATH, request, timeout).await
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> StateResult<R> {
        let uri = format!("http://{}{path}", self.addr);
        let payload = serde_json::to_vec(body).map_err(|e| StateError::Serialize(e.to_string()))?;

        let result = tokio::time::timeout(timeout, async {
            let stream = tokio::net::TcpStream::connect(&*self.addr)
                .await
                .map_err(|e| remote(&uri, e))?;
            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| remote(&uri, e))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method("POST")
                .uri(&uri)
                .header("host", &*self.addr)
                .header("content-type", "application/json")
                .header("user-agent", "cfgrid-state/0.1")
                .body(Full::new(Bytes::from(payload)))
                .map_err(|e| remote(&uri, e))?;

            let resp = sender.send_request(req).await.map_err(|e| remote(&uri, e))?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| remote(&uri, e))?
                .to_bytes();

            if !status.is_success() {
                let message = serde_json::from_slice::<ErrorBody>(&body)
                    .map(|body| body.error)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
                return Err(StateError::Remote(format!("{uri}: {status}: {message}")));
            }
            serde_json::from_slice(&body).map_err(|e| StateError::Deserialize(e.to_string()))
        })
        .await;

        match result {
            Ok(reply) => reply,
            Err(_) => Err(StateError::Remote(format!("{uri}: timed out after {timeout:?}"))),
        }
    }
}

fn remote(uri: &str, e: impl std::fmt::Display) -> StateError {
    StateError::Remote(format!("{uri}: {e}"))
}

/// Long-poll `channel` from `head` onwards and forward payloads until the
/// receiver is dropped.
pub(crate) fn spawn_poller(
    remote: RemoteStore,
    channel: String,
    head: ChannelHead,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

    tokio::spawn(async move {
        let mut epoch = head.epoch;
        let mut after = head.seq;
        debug!(%channel, owner = %remote.addr(), after, "remote subscription started");

        loop {
            let request = PollRequest {
                channel: channel.clone(),
                epoch: epoch.clone(),
                after,
                wait_ms: POLL_WAIT.as_millis() as u64,
            };
            let reply = tokio::select! {
                reply = remote.poll(&request) => reply,
                _ = tx.closed() => break,
            };

            match reply {
                Ok(reply) if reply.epoch != epoch => {
                    info!(%channel, owner = %remote.addr(), "store owner restarted, resubscribing");
                    epoch = reply.epoch;
                    after = 0;
                }
                Ok(reply) => {
                    for message in reply.messages {
                        after = after.max(message.seq);
                        if tx.send(message.payload).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(%channel, error = %e, "subscription poll failed");
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_RETRY) => {}
                        _ = tx.closed() => break,
                    }
                }
            }
        }
        debug!(%channel, "remote subscription stopped");
    });

    rx
}
