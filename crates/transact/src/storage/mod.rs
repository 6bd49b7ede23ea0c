//! Persistence contract for the transaction engine.
//!
//! Every mutation with concurrency implications goes through a
//! compare-and-swap on the current status. A CAS that returns `false` is a
//! lost race, not an error: another worker already advanced the state and
//! the loser abandons its pass. This is what lets the registration path, the
//! branch executor and the recovery scheduler run concurrently over the same
//! rows with no in-process locks.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::trans::{
	BranchOp, BranchStatus, GlobalStatus, Protocol, TransBranch, TransGlobal, TransLogEntry,
};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("transaction not found")]
	NotFound,
	#[error("transaction already exists")]
	AlreadyExists,
	#[error("serialization error: {0}")]
	Serialization(String),
	#[error("storage error: {0}")]
	Storage(String),
}

/// Persistent store for global transactions, branch rows and the audit log.
#[async_trait]
pub trait TransStore: Send + Sync {
	/// Atomically insert a global transaction and its branch rows.
	///
	/// Returns `AlreadyExists` when the gid is taken.
	async fn create_global(
		&self,
		global: TransGlobal,
		branches: Vec<TransBranch>,
	) -> Result<(), StoreError>;

	async fn load_global(&self, gid: &str) -> Result<Option<TransGlobal>, StoreError>;

	/// All branch rows of a transaction, ascending by sequence.
	async fn load_branches(&self, gid: &str) -> Result<Vec<TransBranch>, StoreError>;

	/// Append branch rows to an existing transaction (XA registration).
	async fn append_branches(
		&self,
		gid: &str,
		branches: Vec<TransBranch>,
	) -> Result<(), StoreError>;

	/// CAS the global status. Returns `false` when `expected` no longer
	/// matches; the caller abandons its pass. Refreshes `update_time` on
	/// success.
	async fn update_global_status(
		&self,
		gid: &str,
		expected: GlobalStatus,
		new: GlobalStatus,
	) -> Result<bool, StoreError>;

	/// CAS one branch operation's status, same contract as
	/// [`update_global_status`](Self::update_global_status).
	async fn update_branch_status(
		&self,
		gid: &str,
		branch_id: &str,
		op: BranchOp,
		expected: BranchStatus,
		new: BranchStatus,
	) -> Result<bool, StoreError>;

	/// Refresh `update_time` without a status change. Used to defer expiry
	/// when a prepare-query reports a pending outcome.
	async fn touch(&self, gid: &str) -> Result<(), StoreError>;

	/// Gids of the given status whose `update_time` is older than the
	/// cutoff, oldest first, optionally filtered by protocol.
	async fn scan_expired(
		&self,
		protocol: Option<Protocol>,
		status: GlobalStatus,
		older_than: DateTime<Utc>,
		limit: usize,
	) -> Result<Vec<String>, StoreError>;

	/// Append an audit record.
	async fn append_log(&self, entry: TransLogEntry) -> Result<(), StoreError>;
}
