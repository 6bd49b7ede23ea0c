//! Branch-call executor.
//!
//! Issues the HTTP call for one branch operation, classifies the business
//! response, and persists the resulting branch transition. The network seam
//! is the [`BranchCaller`] trait so strategies and tests never touch the
//! wire directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::{StoreError, TransStore};
use crate::trans::{BranchStatus, TransBranch, TransGlobal, TransLogEntry};

/// A business endpoint's classified reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchResult {
	/// The endpoint completed the operation.
	Success,
	/// The endpoint explicitly refused the operation.
	Failure,
	/// The endpoint accepted the request but has not finished; re-query
	/// later. A deliberate business signal, not an error.
	Pending,
}

/// Transport-level failures. All of them leave the branch `prepared` for a
/// later scheduler pass; none are retried synchronously.
#[derive(Debug, Error)]
pub enum CallError {
	#[error("request timed out")]
	Timeout,
	#[error("transport error: {0}")]
	Transport(String),
	#[error("endpoint replied {status} without a recognizable outcome")]
	BadStatus { status: u16 },
	#[error("unrecognizable response body: {0:?}")]
	Unrecognized(String),
}

/// Seam for issuing one branch call.
#[async_trait]
pub trait BranchCaller: Send + Sync {
	/// POST the payload to the endpoint and classify the reply.
	async fn call(
		&self,
		url: &str,
		payload: &serde_json::Value,
	) -> Result<BranchResult, CallError>;
}

/// Classify a business response body by its outcome marker.
///
/// `FAIL` also covers `FAILURE`.
pub fn classify_body(body: &str) -> Option<BranchResult> {
	if body.contains("SUCCESS") {
		Some(BranchResult::Success)
	} else if body.contains("PENDING") {
		Some(BranchResult::Pending)
	} else if body.contains("FAIL") {
		Some(BranchResult::Failure)
	} else {
		None
	}
}

/// [`BranchCaller`] over a shared `reqwest` client with a bounded timeout.
pub struct HttpBranchCaller {
	client: reqwest::Client,
}

impl HttpBranchCaller {
	/// Build a caller whose every request is bounded by `timeout`.
	pub fn new(timeout: Duration) -> Result<Self, CallError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| CallError::Transport(e.to_string()))?;
		Ok(Self { client })
	}
}

#[async_trait]
impl BranchCaller for HttpBranchCaller {
	async fn call(
		&self,
		url: &str,
		payload: &serde_json::Value,
	) -> Result<BranchResult, CallError> {
		let resp = self
			.client
			.post(url)
			.json(payload)
			.send()
			.await
			.map_err(|e| {
				if e.is_timeout() {
					CallError::Timeout
				} else {
					CallError::Transport(e.to_string())
				}
			})?;

		let status = resp.status();
		let body = resp
			.text()
			.await
			.map_err(|e| CallError::Transport(e.to_string()))?;
		if !status.is_success() {
			return Err(CallError::BadStatus {
				status: status.as_u16(),
			});
		}
		classify_body(&body).ok_or(CallError::Unrecognized(body))
	}
}

/// What one executor pass observed for a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
	Success,
	Failure,
	Pending,
	/// Timeout, connection refused, or malformed response. The branch stays
	/// `prepared`; the scheduler retries.
	NetworkError,
}

/// Executes one branch operation and persists its transition.
#[derive(Clone)]
pub struct BranchExecutor {
	store: Arc<dyn TransStore>,
	caller: Arc<dyn BranchCaller>,
}

impl BranchExecutor {
	pub fn new(store: Arc<dyn TransStore>, caller: Arc<dyn BranchCaller>) -> Self {
		Self { store, caller }
	}

	/// Call the branch endpoint once and record the outcome.
	///
	/// `Success` moves the branch `prepared -> succeed`. A business refusal
	/// moves it `prepared -> failed` only for operations where refusal is a
	/// terminal outcome; refusals of compensations, cancels, confirms,
	/// commits and rollbacks are treated as retryable, since those
	/// operations are required to eventually succeed. `Pending` and network
	/// errors leave the branch untouched for the scheduler. No synchronous
	/// retry happens here.
	pub async fn exec_branch(
		&self,
		global: &TransGlobal,
		branch: &TransBranch,
	) -> Result<BranchOutcome, StoreError> {
		debug!(
			gid = %global.gid,
			branch_id = %branch.branch_id,
			op = %branch.op,
			url = %branch.url,
			"executing branch operation"
		);

		let outcome = match self.caller.call(&branch.url, &global.payload).await {
			Ok(BranchResult::Success) => {
				self.record(global, branch, BranchStatus::Succeed).await?;
				BranchOutcome::Success
			},
			Ok(BranchResult::Failure) => {
				if branch.op.failure_is_terminal() {
					self.record(global, branch, BranchStatus::Failed).await?;
					BranchOutcome::Failure
				} else {
					warn!(
						gid = %global.gid,
						branch_id = %branch.branch_id,
						op = %branch.op,
						"endpoint refused an operation that must eventually succeed, will retry"
					);
					BranchOutcome::NetworkError
				}
			},
			Ok(BranchResult::Pending) => {
				debug!(
					gid = %global.gid,
					branch_id = %branch.branch_id,
					op = %branch.op,
					"branch pending, deferring to scheduler"
				);
				BranchOutcome::Pending
			},
			Err(e) => {
				warn!(
					gid = %global.gid,
					branch_id = %branch.branch_id,
					op = %branch.op,
					error = %e,
					"branch call failed, deferring to scheduler"
				);
				BranchOutcome::NetworkError
			},
		};
		Ok(outcome)
	}

	async fn record(
		&self,
		global: &TransGlobal,
		branch: &TransBranch,
		new: BranchStatus,
	) -> Result<(), StoreError> {
		let changed = self
			.store
			.update_branch_status(
				&global.gid,
				&branch.branch_id,
				branch.op,
				BranchStatus::Prepared,
				new,
			)
			.await?;
		if changed {
			self.store
				.append_log(TransLogEntry::new(
					&global.gid,
					format!("branch {} {} -> {}", branch.branch_id, branch.op, new),
				))
				.await?;
		}
		Ok(())
	}
}
