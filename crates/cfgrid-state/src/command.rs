//! Wire form of the store primitives.
//!
//! Every primitive is a [`Command`] answered by one [`Reply`]. The owning
//! process executes commands against redb; every other process ships them
//! to the owner as JSON (see [`crate::remote`] and [`crate::server`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};
use crate::pubsub::ChannelHead;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    SetNx {
        key: String,
        value: String,
        ttl_ms: Option<u64>,
    },
    Get {
        key: String,
    },
    DeleteIfEq {
        key: String,
        expected: String,
    },
    /// Upsert fields. With `existing_only` a missing or expired hash is
    /// left alone instead of being created.
    HSet {
        key: String,
        fields: BTreeMap<String, String>,
        existing_only: bool,
    },
    HGet {
        key: String,
        field: String,
    },
    HGetAll {
        key: String,
    },
    HDelIfEq {
        key: String,
        field: String,
        expected: String,
    },
    /// Append values. With `existing_only` a missing or expired list is
    /// left alone instead of being created.
    RPush {
        key: String,
        values: Vec<String>,
        existing_only: bool,
    },
    LRange {
        key: String,
    },
    Expire {
        key: String,
        ttl_ms: u64,
    },
    Delete {
        key: String,
    },
    Exists {
        key: String,
    },
    /// Data commands applied in one write transaction.
    Atomic {
        commands: Vec<Command>,
    },
    Publish {
        channel: String,
        payload: String,
    },
    Head {
        channel: String,
    },
}

impl Command {
    pub(crate) fn is_read_only(&self) -> bool {
        matches!(
            self,
            Command::Get { .. }
                | Command::HGet { .. }
                | Command::HGetAll { .. }
                | Command::LRange { .. }
                | Command::Exists { .. }
        )
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::SetNx { .. } => "setNx",
            Command::Get { .. } => "get",
            Command::DeleteIfEq { .. } => "deleteIfEq",
            Command::HSet { .. } => "hSet",
            Command::HGet { .. } => "hGet",
            Command::HGetAll { .. } => "hGetAll",
            Command::HDelIfEq { .. } => "hDelIfEq",
            Command::RPush { .. } => "rPush",
            Command::LRange { .. } => "lRange",
            Command::Expire { .. } => "expire",
            Command::Delete { .. } => "delete",
            Command::Exists { .. } => "exists",
            Command::Atomic { .. } => "atomic",
            Command::Publish { .. } => "publish",
            Command::Head { .. } => "head",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Reply {
    Flag(bool),
    Value(Option<String>),
    Fields(BTreeMap<String, String>),
    Values(Vec<String>),
    /// New list length, or `None` when an `existing_only` push found no list.
    Length(Option<u64>),
    Sequence(u64),
    Head(ChannelHead),
    Many(Vec<Reply>),
}

impl Reply {
    pub(crate) fn into_flag(self) -> StateResult<bool> {
        match self {
            Reply::Flag(flag) => Ok(flag),
            other => Err(unexpected("flag", &other)),
        }
    }

    pub(crate) fn into_value(self) -> StateResult<Option<String>> {
        match self {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected("value", &other)),
        }
    }

    pub(crate) fn into_fields(self) -> StateResult<BTreeMap<String, String>> {
        match self {
            Reply::Fields(fields) => Ok(fields),
            other => Err(unexpected("fields", &other)),
        }
    }

    pub(crate) fn into_values(self) -> StateResult<Vec<String>> {
        match self {
            Reply::Values(values) => Ok(values),
            other => Err(unexpected("values", &other)),
        }
    }

    pub(crate) fn into_length(self) -> StateResult<Option<u64>> {
        match self {
            Reply::Length(length) => Ok(length),
            other => Err(unexpected("length", &other)),
        }
    }

    pub(crate) fn into_sequence(self) -> StateResult<u64> {
        match self {
            Reply::Sequence(seq) => Ok(seq),
            other => Err(unexpected("sequence", &other)),
        }
    }

    pub(crate) fn into_head(self) -> StateResult<ChannelHead> {
        match self {
            Reply::Head(head) => Ok(head),
            other => Err(unexpected("head", &other)),
        }
    }

    pub(crate) fn into_many(self) -> StateResult<Vec<Reply>> {
        match self {
            Reply::Many(replies) => Ok(replies),
            other => Err(unexpected("many", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &Reply) -> StateError {
    StateError::UnexpectedReply(format!("expected {wanted}, got {got:?}"))
}
