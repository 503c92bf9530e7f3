// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! relay-storage: the durable state store.
//!
//! Mutations are expressed as [`StateOp`] records, written to a JSONL
//! write-ahead log and applied to an in-memory [`MaterializedState`].
//! Recovery loads the latest zstd snapshot and replays the WAL tail.
//! The [`Store`] facade serializes every operation behind one lock and
//! never holds it across an await point.

mod snapshot;
mod state;
mod store;
mod wal;

pub use snapshot::{Checkpointer, Snapshot, SnapshotError};
pub use state::{MaterializedState, StateOp};
pub use store::{Store, StoreError};
pub use wal::{Wal, WalEntry, WalError};
