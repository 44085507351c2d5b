//! redb table definitions for the shared store.
//!
//! Every table uses `&str` keys and `&[u8]` values holding a JSON envelope
//! with an optional expiry. The three tables mirror the three value kinds the store exposes.

use redb::TableDefinition;

/// Plain string values (lock handles) keyed by `lock:{resource}`.
pub const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("keys");

/// Field maps keyed by table name (`status`, `job:{id}`).
pub const HASHES: TableDefinition<&str, &[u8]> = TableDefinition::new("hashes");

/// Append-only lists keyed by `job:{id}:logs` / `job:{id}:items`.
pub const LISTS: TableDefinition<&str, &[u8]> = TableDefinition::new("lists");
