//! Persistent record types for global and branch transactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The pattern driving a global transaction.
///
/// Immutable once the transaction is created; selects which strategy owns
/// every subsequent status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
	/// Ordered forward actions with reverse-order compensations on failure.
	Saga,
	/// Try/Confirm/Cancel over reserved resources.
	Tcc,
	/// Two-phase commit against remote resource managers.
	Xa,
}

impl std::fmt::Display for Protocol {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Protocol::Saga => "saga",
			Protocol::Tcc => "tcc",
			Protocol::Xa => "xa",
		};
		f.write_str(name)
	}
}

/// Where a global transaction sits in its protocol's state machine.
///
/// `Succeed`, `Failed` and `Canceled` are terminal; everything else is
/// in-flight and eligible for scheduler re-drive. Transitions are monotonic:
/// a terminal status never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalStatus {
	/// Registered, not yet driven forward.
	Prepared,
	/// The caller committed; forward (or rollback) driving is in progress.
	Submitted,
	/// Every branch reached its success outcome.
	Succeed,
	/// Rolled back after a business failure.
	Failed,
	/// Abandoned while still prepared and cancelled by the scheduler.
	Canceled,
}

impl GlobalStatus {
	/// Whether this status is final. Terminal transactions are never
	/// re-driven and their branches are never called again.
	pub fn is_terminal(self) -> bool {
		matches!(
			self,
			GlobalStatus::Succeed | GlobalStatus::Failed | GlobalStatus::Canceled
		)
	}
}

impl std::fmt::Display for GlobalStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			GlobalStatus::Prepared => "prepared",
			GlobalStatus::Submitted => "submitted",
			GlobalStatus::Succeed => "succeed",
			GlobalStatus::Failed => "failed",
			GlobalStatus::Canceled => "canceled",
		};
		f.write_str(name)
	}
}

/// Outcome of one branch operation.
///
/// `Prepared` means not yet successfully executed. A branch operation is
/// executed at most once to completion: once `Succeed`, it is never
/// re-issued, and re-drive only targets operations still `Prepared`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
	Prepared,
	Succeed,
	Failed,
}

impl std::fmt::Display for BranchStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			BranchStatus::Prepared => "prepared",
			BranchStatus::Succeed => "succeed",
			BranchStatus::Failed => "failed",
		};
		f.write_str(name)
	}
}

/// The role of one remote call within its branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchOp {
	/// SAGA forward action.
	Action,
	/// SAGA compensation, undoing a previously succeeded action.
	Compensate,
	/// TCC resource reservation.
	Try,
	/// TCC confirmation of a succeeded try.
	Confirm,
	/// TCC release of a reserved resource.
	Cancel,
	/// XA second-phase commit.
	Commit,
	/// XA second-phase rollback.
	Rollback,
}

impl BranchOp {
	/// Whether a business `FAILURE` reply for this operation is a terminal
	/// branch outcome. Forward reservations may be refused; confirmations,
	/// compensations, cancels, commits and rollbacks are idempotent
	/// collaborator contracts that must eventually succeed, so a refusal
	/// there is retried instead of recorded.
	pub fn failure_is_terminal(self) -> bool {
		matches!(self, BranchOp::Action | BranchOp::Try)
	}
}

impl std::fmt::Display for BranchOp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			BranchOp::Action => "action",
			BranchOp::Compensate => "compensate",
			BranchOp::Try => "try",
			BranchOp::Confirm => "confirm",
			BranchOp::Cancel => "cancel",
			BranchOp::Commit => "commit",
			BranchOp::Rollback => "rollback",
		};
		f.write_str(name)
	}
}

/// One global transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransGlobal {
	/// Caller-assigned unique identifier.
	pub gid: String,
	pub protocol: Protocol,
	pub status: GlobalStatus,
	/// Opaque business payload, forwarded verbatim to every branch call.
	#[serde(default)]
	pub payload: serde_json::Value,
	/// Callback the scheduler queries before deciding the fate of an
	/// expired prepared transaction.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub query_prepared: Option<String>,
	pub create_time: DateTime<Utc>,
	pub update_time: DateTime<Utc>,
}

impl TransGlobal {
	pub fn new(
		gid: impl Into<String>,
		protocol: Protocol,
		payload: serde_json::Value,
		query_prepared: Option<String>,
	) -> Self {
		let now = Utc::now();
		Self {
			gid: gid.into(),
			protocol,
			status: GlobalStatus::Prepared,
			payload,
			query_prepared,
			create_time: now,
			update_time: now,
		}
	}
}

/// One branch operation row.
///
/// The composite key is `(gid, branch_id, op)`; `sequence` is the global
/// insertion index and defines call ordering within the transaction
/// (ascending for forward operations, descending for compensations, cancels
/// and rollbacks).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransBranch {
	pub gid: String,
	pub branch_id: String,
	pub op: BranchOp,
	pub url: String,
	pub status: BranchStatus,
	pub sequence: i32,
}

impl TransBranch {
	pub fn new(
		gid: impl Into<String>,
		branch_id: impl Into<String>,
		op: BranchOp,
		url: impl Into<String>,
		sequence: i32,
	) -> Self {
		Self {
			gid: gid.into(),
			branch_id: branch_id.into(),
			op,
			url: url.into(),
			status: BranchStatus::Prepared,
			sequence,
		}
	}
}

/// Append-only audit record of a status transition.
///
/// Written for diagnosis and replay; never read back for correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransLogEntry {
	pub id: Uuid,
	pub gid: String,
	pub event: String,
	pub timestamp: DateTime<Utc>,
}

impl TransLogEntry {
	pub fn new(gid: impl Into<String>, event: impl Into<String>) -> Self {
		Self {
			id: Uuid::new_v4(),
			gid: gid.into(),
			event: event.into(),
			timestamp: Utc::now(),
		}
	}
}
