//! Persistent mapping store for feed-mirror
//!
//! Keeps a bidirectional mapping between source post ids and the destination
//! message ids that mirror them, in an embedded SQLite file.
//!
//! ## Layout
//!
//! Each partition is one table keyed by a BLOB primary key:
//! - `forward`: source id → concatenated message ids
//! - `reverse`: concatenated message ids → source id
//! - `schema_version`: migration bookkeeping
//!
//! Ids are encoded as 8-byte big-endian integers; an id list is the plain
//! concatenation of its encoded ids (see [`codec`]).
//!
//! ## Submodules
//!
//! - [`migrations`] - Store lifecycle, schema migrations
//! - [`records`] - Delivery record reads and writes
//! - [`codec`] - Binary key/value encoding

use sqlx::sqlite::SqlitePool;

pub mod codec;
mod migrations;
mod records;

/// Name of the source id → message ids partition
pub(crate) const FORWARD: &str = "forward";
/// Name of the message ids → source id partition
pub(crate) const REVERSE: &str = "reverse";

/// Handle to the mapping store
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}
