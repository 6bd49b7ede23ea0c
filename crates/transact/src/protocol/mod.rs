//! Protocol strategies.
//!
//! Each strategy is pure state-transition logic: given a global
//! transaction's current status and its branches' statuses, decide which
//! branch to call next and which global status to move to afterward.
//! Dispatch is a `match` over the closed [`Protocol`] set. Every pass is
//! safe to run concurrently with live traffic and with the scheduler;
//! status moves are CAS-guarded and a lost race abandons the pass.

mod saga;
mod tcc;
mod xa;

#[cfg(test)]
mod integration_tests;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::branch::{BranchCaller, BranchExecutor, BranchResult};
use crate::storage::{StoreError, TransStore};
use crate::trans::{GlobalStatus, Protocol, RequestError, TransGlobal, TransLogEntry};

/// Engine errors surfaced to callers.
///
/// Transient branch conditions never appear here; callers observe progress
/// through status queries only.
#[derive(Debug, Error)]
pub enum TransError {
	#[error("transaction {0} not found")]
	NotFound(String),

	#[error("transaction {0} conflicts with an existing registration")]
	Conflict(String),

	#[error(transparent)]
	Invalid(#[from] RequestError),

	#[error("{operation} is not supported for {protocol}")]
	Unsupported {
		operation: &'static str,
		protocol: Protocol,
	},

	#[error(transparent)]
	Store(#[from] StoreError),
}

/// Verdict of a prepare-query callback on an expired prepared transaction.
enum PreparedVerdict {
	/// The caller intends to proceed; drive the transaction forward.
	Proceed,
	/// The caller gave up; cancel.
	Cancel,
	/// No answer yet; defer expiry and leave the transaction prepared.
	Defer,
}

/// Drives global transactions through their protocol's state machine.
#[derive(Clone)]
pub struct Driver {
	pub(crate) store: Arc<dyn TransStore>,
	pub(crate) executor: BranchExecutor,
	pub(crate) caller: Arc<dyn BranchCaller>,
}

impl Driver {
	pub fn new(store: Arc<dyn TransStore>, caller: Arc<dyn BranchCaller>) -> Self {
		Self {
			executor: BranchExecutor::new(store.clone(), caller.clone()),
			store,
			caller,
		}
	}

	/// Commit a transaction: move it into the driving state and push it as
	/// far forward as the branches allow. Idempotent on terminal
	/// transactions.
	pub async fn submit(&self, gid: &str) -> Result<GlobalStatus, TransError> {
		let global = self.require(gid).await?;
		if global.status.is_terminal() {
			return Ok(global.status);
		}
		if global.status == GlobalStatus::Prepared {
			self.finish(gid, GlobalStatus::Prepared, GlobalStatus::Submitted)
				.await?;
		}
		let global = self.require(gid).await?;
		if global.status.is_terminal() {
			return Ok(global.status);
		}
		self.forward(&global).await
	}

	/// Caller-initiated abort (XA rollback, TCC cancel-equivalent).
	pub async fn rollback(&self, gid: &str) -> Result<GlobalStatus, TransError> {
		let global = self.require(gid).await?;
		if global.status.is_terminal() {
			return Ok(global.status);
		}
		match global.protocol {
			Protocol::Xa => {
				if global.status == GlobalStatus::Prepared {
					xa::rollback_phase(self, &global, GlobalStatus::Failed).await
				} else {
					// The commit decision is already out; the forward path
					// owns the transaction.
					Ok(global.status)
				}
			},
			Protocol::Tcc => {
				if global.status == GlobalStatus::Prepared {
					tcc::cancel_phase(self, &global, GlobalStatus::Prepared, GlobalStatus::Failed)
						.await
				} else {
					// Confirmation already started; the forward path owns it.
					Ok(global.status)
				}
			},
			Protocol::Saga => Err(TransError::Unsupported {
				operation: "rollback",
				protocol: Protocol::Saga,
			}),
		}
	}

	/// Prepare-phase driving. TCC reserves its resources here, while the
	/// transaction is still `prepared`; the other protocols do nothing
	/// until submit.
	pub async fn prepare_drive(&self, gid: &str) -> Result<GlobalStatus, TransError> {
		let global = self.require(gid).await?;
		if global.status != GlobalStatus::Prepared {
			return Ok(global.status);
		}
		match global.protocol {
			Protocol::Tcc => tcc::forward(self, &global).await,
			Protocol::Saga | Protocol::Xa => Ok(global.status),
		}
	}

	/// Scheduler entry point: re-drive one transaction exactly as if newly
	/// triggered. Invoking this on a terminal transaction is a no-op.
	pub async fn redrive(&self, gid: &str) -> Result<GlobalStatus, TransError> {
		let global = self.require(gid).await?;
		match global.status {
			status if status.is_terminal() => Ok(status),
			GlobalStatus::Submitted => self.forward(&global).await,
			_ => self.redrive_prepared(global).await,
		}
	}

	/// An expired prepared transaction: consult the prepare-query callback
	/// when the caller registered one, otherwise treat the transaction as
	/// abandoned.
	async fn redrive_prepared(&self, global: TransGlobal) -> Result<GlobalStatus, TransError> {
		let verdict = match &global.query_prepared {
			Some(url) => match self.caller.call(url, &global.payload).await {
				Ok(BranchResult::Success) => PreparedVerdict::Proceed,
				Ok(BranchResult::Failure) => PreparedVerdict::Cancel,
				Ok(BranchResult::Pending) => PreparedVerdict::Defer,
				Err(e) => {
					debug!(gid = %global.gid, error = %e, "prepare-query unreachable, deferring");
					PreparedVerdict::Defer
				},
			},
			None => PreparedVerdict::Cancel,
		};
		match verdict {
			PreparedVerdict::Proceed => {
				info!(gid = %global.gid, "prepare-query confirmed intent, submitting");
				self.submit(&global.gid).await
			},
			PreparedVerdict::Cancel => self.cancel_abandoned(&global).await,
			PreparedVerdict::Defer => {
				self.store.touch(&global.gid).await?;
				Ok(GlobalStatus::Prepared)
			},
		}
	}

	/// Roll an abandoned prepared transaction back to a terminal status:
	/// `canceled` for SAGA/TCC, `failed` for XA (whose registered branches
	/// get a rollback first).
	async fn cancel_abandoned(&self, global: &TransGlobal) -> Result<GlobalStatus, TransError> {
		info!(gid = %global.gid, protocol = %global.protocol, "canceling abandoned transaction");
		match global.protocol {
			Protocol::Saga => {
				saga::compensate(
					self,
					global,
					None,
					GlobalStatus::Prepared,
					GlobalStatus::Canceled,
				)
				.await
			},
			Protocol::Tcc => {
				tcc::cancel_phase(self, global, GlobalStatus::Prepared, GlobalStatus::Canceled)
					.await
			},
			Protocol::Xa => xa::rollback_phase(self, global, GlobalStatus::Failed).await,
		}
	}

	/// Forward driving of a submitted transaction.
	async fn forward(&self, global: &TransGlobal) -> Result<GlobalStatus, TransError> {
		match global.protocol {
			Protocol::Saga => saga::forward(self, global).await,
			Protocol::Tcc => tcc::forward(self, global).await,
			Protocol::Xa => xa::commit_phase(self, global).await,
		}
	}

	pub(crate) async fn require(&self, gid: &str) -> Result<TransGlobal, TransError> {
		self.store
			.load_global(gid)
			.await?
			.ok_or_else(|| TransError::NotFound(gid.to_string()))
	}

	/// CAS the global status and log the transition. A lost race means
	/// another worker advanced the transaction; this pass simply reports
	/// the status it was aiming for and lets the next load see the truth.
	pub(crate) async fn finish(
		&self,
		gid: &str,
		from: GlobalStatus,
		to: GlobalStatus,
	) -> Result<GlobalStatus, TransError> {
		let changed = self.store.update_global_status(gid, from, to).await?;
		if changed {
			info!(gid = %gid, from = %from, to = %to, "global status advanced");
			self.store
				.append_log(TransLogEntry::new(gid, format!("status {from} -> {to}")))
				.await?;
		} else {
			debug!(gid = %gid, from = %from, to = %to, "lost status race, abandoning pass");
		}
		Ok(to)
	}
}
