//! Sequenced pub/sub channels kept by the owning process.
//!
//! Each channel numbers its messages from 1 and keeps a short backlog.
//! Local subscribers attach to a broadcast sender; remote subscribers
//! long-poll for messages after the last sequence number they saw. The
//! `epoch` changes whenever the owner restarts, which tells a remote
//! subscriber that its sequence numbers no longer apply.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Messages kept per channel for pollers that fell behind.
const BACKLOG: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub seq: u64,
    pub payload: String,
}

/// Latest sequence number of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHead {
    pub epoch: String,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    pub channel: String,
    /// Epoch the `after` sequence number belongs to.
    pub epoch: String,
    pub after: u64,
    pub wait_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReply {
    pub epoch: String,
    pub head: u64,
    pub messages: Vec<Message>,
}

struct Channel {
    seq: u64,
    backlog: VecDeque<Message>,
    tx: broadcast::Sender<Message>,
}

impl Channel {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(BACKLOG);
        Self {
            seq: 0,
            backlog: VecDeque::with_capacity(BACKLOG),
            tx,
        }
    }
}

pub(crate) struct Channels {
    epoch: String,
    channels: Mutex<HashMap<String, Channel>>,
}

impl Channels {
    pub(crate) fn new() -> Self {
        Self {
            epoch: uuid::Uuid::new_v4().to_string(),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message and wake every subscriber. Returns its sequence number.
    pub(crate) fn publish(&self, channel: &str, payload: &str) -> u64 {
        let mut channels = self.lock();
        let entry = channels
            .entry(channel.to_string())
            .or_insert_with(Channel::new);
        entry.seq += 1;
        let message = Message {
            seq: entry.seq,
            payload: payload.to_string(),
        };
        if entry.backlog.len() == BACKLOG {
            entry.backlog.pop_front();
        }
        entry.backlog.push_back(message.clone());
        let local = entry.tx.send(message).unwrap_or(0);
        debug!(%channel, seq = entry.seq, local, "message published");
        entry.seq
    }

    pub(crate) fn head(&self, channel: &str) -> ChannelHead {
        let seq = self.lock().get(channel).map_or(0, |entry| entry.seq);
        ChannelHead {
            epoch: self.epoch.clone(),
            seq,
        }
    }

    /// Receiver for every message published from now on.
    pub(crate) fn watch(&self, channel: &str) -> broadcast::Receiver<Message> {
        self.lock()
            .entry(channel.to_string())
            .or_insert_with(Channel::new)
            .tx
            .subscribe()
    }

    /// Messages after `request.after`, waiting up to `wait_ms` for the
    /// first one when none is pending.
    pub(crate) async fn poll(&self, request: &PollRequest) -> PollReply {
        let mut rx = {
            let mut channels = self.lock();
            let entry = channels
                .entry(request.channel.clone())
                .or_insert_with(Channel::new);
            if request.epoch != self.epoch || request.after > entry.seq {
                return self.reply(entry.seq, Vec::new());
            }
            let pending: Vec<Message> = entry
                .backlog
                .iter()
                .filter(|message| message.seq > request.after)
                .cloned()
                .collect();
            if !pending.is_empty() {
                return self.reply(entry.seq, pending);
            }
            entry.tx.subscribe()
        };

        let wait = Duration::from_millis(request.wait_ms);
        let messages = match tokio::time::timeout(wait, next_after(&mut rx, request.after)).await {
            Ok(Some(message)) => vec![message],
            _ => Vec::new(),
        };
        let head = self.head(&request.channel).seq;
        self.reply(head, messages)
    }

    fn reply(&self, head: u64, messages: Vec<Message>) -> PollReply {
        PollReply {
            epoch: self.epoch.clone(),
            head,
            messages,
        }
    }
}

async fn next_after(rx: &mut broadcast::Receiver<Message>, after: u64) -> Option<Message> {
    loop {
        match rx.recv().await {
            Ok(message) if message.seq > after => return Some(message),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
