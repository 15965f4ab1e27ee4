//! Local-first editing core: server snapshots, buffered edits, reconciled
//! views, bulk commit and the attendance status matrix. Nothing in here
//! knows about the IPC protocol or SQL.

pub mod commit;
pub mod entity;
pub mod error;
pub mod matrix;
pub mod session;
pub mod store;
pub mod tracker;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use error::SyncError;
