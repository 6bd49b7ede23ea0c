//! End-to-end strategy tests over the in-memory store.
//!
//! Each test plays one coordinator scenario: registration, driving,
//! branch outcomes (including pending and refused replies), and scheduler
//! re-drives, asserting the exact per-branch status vectors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::branch::{BranchCaller, BranchResult, CallError};
use crate::config::CoordinatorConfig;
use crate::coordinator::Coordinator;
use crate::cron::Scheduler;
use crate::storage::memory::MemoryStore;
use crate::storage::TransStore;
use crate::trans::{GlobalStatus, Protocol, StepDef, TransRequest, XaBranchRequest};

const BUSI: &str = "http://busi";

/// Mock business backend keyed by endpoint URL. Unmocked endpoints reply
/// SUCCESS; mocks can be changed mid-test to clear a pending condition.
struct MockBusi {
	responses: Mutex<HashMap<String, BranchResult>>,
	calls: Mutex<Vec<String>>,
}

impl MockBusi {
	fn new() -> Self {
		Self {
			responses: Mutex::new(HashMap::new()),
			calls: Mutex::new(Vec::new()),
		}
	}

	fn mock(&self, path: &str, result: BranchResult) {
		self.responses
			.lock()
			.unwrap()
			.insert(format!("{BUSI}/{path}"), result);
	}

	fn reset(&self, path: &str) {
		self.responses.lock().unwrap().remove(&format!("{BUSI}/{path}"));
	}

	fn call_count(&self, path: &str) -> usize {
		let url = format!("{BUSI}/{path}");
		self.calls.lock().unwrap().iter().filter(|c| **c == url).count()
	}

	fn total_calls(&self) -> usize {
		self.calls.lock().unwrap().len()
	}
}

#[async_trait]
impl BranchCaller for MockBusi {
	async fn call(
		&self,
		url: &str,
		_payload: &serde_json::Value,
	) -> Result<BranchResult, CallError> {
		self.calls.lock().unwrap().push(url.to_string());
		Ok(self
			.responses
			.lock()
			.unwrap()
			.get(url)
			.copied()
			.unwrap_or(BranchResult::Success))
	}
}

struct Harness {
	store: Arc<MemoryStore>,
	busi: Arc<MockBusi>,
	coordinator: Coordinator,
	scheduler: Scheduler,
}

fn harness() -> Harness {
	let store = Arc::new(MemoryStore::new());
	let busi = Arc::new(MockBusi::new());
	let coordinator = Coordinator::new(store.clone(), busi.clone());
	let scheduler = Scheduler::new(
		store.clone(),
		coordinator.driver().clone(),
		CoordinatorConfig::default(),
	);
	Harness {
		store,
		busi,
		coordinator,
		scheduler,
	}
}

impl Harness {
	async fn global_status(&self, gid: &str) -> String {
		self.store
			.load_global(gid)
			.await
			.unwrap()
			.unwrap()
			.status
			.to_string()
	}

	async fn branch_statuses(&self, gid: &str) -> Vec<String> {
		self.store
			.load_branches(gid)
			.await
			.unwrap()
			.iter()
			.map(|b| b.status.to_string())
			.collect()
	}

	/// Scheduler pass with a cutoff in the future, picking up everything
	/// of the status regardless of age.
	async fn cron(&self, status: GlobalStatus) -> usize {
		self.scheduler
			.cron_trans_once(chrono::Duration::seconds(-10), status)
			.await
			.unwrap()
	}
}

fn saga_request(gid: &str) -> TransRequest {
	TransRequest {
		gid: gid.to_string(),
		protocol: Protocol::Saga,
		payload: serde_json::json!({"amount": 30}),
		query_prepared: Some(format!("{BUSI}/TransQuery")),
		steps: vec![
			StepDef::Saga {
				action: format!("{BUSI}/TransOut"),
				compensate: Some(format!("{BUSI}/TransOutCompensate")),
			},
			StepDef::Saga {
				action: format!("{BUSI}/TransIn"),
				compensate: Some(format!("{BUSI}/TransInCompensate")),
			},
		],
	}
}

fn tcc_request(gid: &str) -> TransRequest {
	TransRequest {
		gid: gid.to_string(),
		protocol: Protocol::Tcc,
		payload: serde_json::json!({"amount": 30}),
		query_prepared: Some(format!("{BUSI}/TransQuery")),
		steps: vec![
			StepDef::Tcc {
				r#try: format!("{BUSI}/TransOutTry"),
				confirm: format!("{BUSI}/TransOutConfirm"),
				cancel: format!("{BUSI}/TransOutCancel"),
			},
			StepDef::Tcc {
				r#try: format!("{BUSI}/TransInTry"),
				confirm: format!("{BUSI}/TransInConfirm"),
				cancel: format!("{BUSI}/TransInCancel"),
			},
		],
	}
}

fn xa_request(gid: &str) -> TransRequest {
	TransRequest {
		gid: gid.to_string(),
		protocol: Protocol::Xa,
		payload: serde_json::json!({"amount": 30}),
		query_prepared: None,
		steps: vec![],
	}
}

fn xa_branch(gid: &str, branch_id: &str, rm: &str) -> XaBranchRequest {
	XaBranchRequest {
		gid: gid.to_string(),
		branch_id: branch_id.to_string(),
		commit_url: format!("{BUSI}/{rm}/commit"),
		rollback_url: format!("{BUSI}/{rm}/rollback"),
	}
}

#[tokio::test]
async fn test_saga_commit_success() {
	let h = harness();
	let gid = "gid-normal-saga";

	h.coordinator.prepare(saga_request(gid)).await.unwrap();
	assert_eq!(h.global_status(gid).await, "prepared");

	let status = h.coordinator.submit(saga_request(gid)).await.unwrap();
	assert_eq!(status, GlobalStatus::Succeed);
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["prepared", "succeed", "prepared", "succeed"]
	);
	assert_eq!(h.global_status(gid).await, "succeed");
	// Compensations were never touched.
	assert_eq!(h.busi.call_count("TransOutCompensate"), 0);
	assert_eq!(h.busi.call_count("TransInCompensate"), 0);
}

#[tokio::test]
async fn test_saga_rollback_compensates_preceding_steps() {
	let h = harness();
	let gid = "gid-rollback-saga";
	h.busi.mock("TransIn", BranchResult::Failure);

	let status = h.coordinator.submit(saga_request(gid)).await.unwrap();
	assert_eq!(status, GlobalStatus::Failed);
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["succeed", "succeed", "prepared", "failed"]
	);
	// The failed step had nothing to undo; its compensation is never called.
	assert_eq!(h.busi.call_count("TransInCompensate"), 0);
	assert_eq!(h.busi.call_count("TransOutCompensate"), 1);
}

#[tokio::test]
async fn test_saga_pending_action_resumed_by_scheduler() {
	let h = harness();
	let gid = "gid-committed-pending";

	h.coordinator.prepare(saga_request(gid)).await.unwrap();
	h.busi.mock("TransIn", BranchResult::Pending);
	let status = h.coordinator.submit(saga_request(gid)).await.unwrap();
	assert_eq!(status, GlobalStatus::Submitted);
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["prepared", "succeed", "prepared", "prepared"]
	);

	h.busi.reset("TransIn");
	h.cron(GlobalStatus::Submitted).await;
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["prepared", "succeed", "prepared", "succeed"]
	);
	assert_eq!(h.global_status(gid).await, "succeed");
	// The already-succeeded first action was not re-issued.
	assert_eq!(h.busi.call_count("TransOut"), 1);
}

#[tokio::test]
async fn test_saga_prepared_query_pending_then_success() {
	let h = harness();
	let gid = "gid-prepare-pending";

	h.coordinator.prepare(saga_request(gid)).await.unwrap();
	h.busi.mock("TransQuery", BranchResult::Pending);
	h.cron(GlobalStatus::Prepared).await;
	// The pending query defers expiry instead of force-failing.
	assert_eq!(h.global_status(gid).await, "prepared");

	h.busi.reset("TransQuery");
	h.cron(GlobalStatus::Prepared).await;
	assert_eq!(h.global_status(gid).await, "succeed");
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["prepared", "succeed", "prepared", "succeed"]
	);
}

#[tokio::test]
async fn test_saga_prepared_query_failure_cancels() {
	let h = harness();
	let gid = "gid-prepare-cancel";

	h.coordinator.prepare(saga_request(gid)).await.unwrap();
	h.busi.mock("TransQuery", BranchResult::Failure);
	h.cron(GlobalStatus::Prepared).await;
	assert_eq!(h.global_status(gid).await, "canceled");
	// Nothing ever ran, so nothing was compensated or executed.
	assert_eq!(h.busi.call_count("TransOut"), 0);
	assert_eq!(h.busi.call_count("TransOutCompensate"), 0);
}

#[tokio::test]
async fn test_saga_abandoned_without_query_cancels() {
	let h = harness();
	let gid = "gid-abandoned";
	let mut req = saga_request(gid);
	req.query_prepared = None;

	h.coordinator.prepare(req).await.unwrap();
	h.cron(GlobalStatus::Prepared).await;
	assert_eq!(h.global_status(gid).await, "canceled");
}

#[tokio::test]
async fn test_scheduler_respects_age_cutoff() {
	let h = harness();
	let gid = "gid-fresh";

	h.coordinator.prepare(saga_request(gid)).await.unwrap();
	// A fresh transaction is younger than the cutoff; nothing is scanned.
	let processed = h
		.scheduler
		.cron_trans_once(chrono::Duration::seconds(60), GlobalStatus::Prepared)
		.await
		.unwrap();
	assert_eq!(processed, 0);
	assert_eq!(h.global_status(gid).await, "prepared");
}

#[tokio::test]
async fn test_tcc_commit_success() {
	let h = harness();
	let gid = "gid-tcc-normal";

	// Prepare reserves: tries run while the global stays prepared.
	let status = h.coordinator.prepare(tcc_request(gid)).await.unwrap();
	assert_eq!(status, GlobalStatus::Prepared);
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["prepared", "prepared", "succeed", "prepared", "prepared", "succeed"]
	);

	let status = h.coordinator.submit(tcc_request(gid)).await.unwrap();
	assert_eq!(status, GlobalStatus::Succeed);
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["prepared", "succeed", "succeed", "prepared", "succeed", "succeed"]
	);
	assert_eq!(h.busi.call_count("TransOutCancel"), 0);
	assert_eq!(h.busi.call_count("TransInCancel"), 0);
}

#[tokio::test]
async fn test_tcc_try_failure_cancels_tried_branches() {
	let h = harness();
	let gid = "gid-tcc-rollback";
	h.busi.mock("TransInTry", BranchResult::Failure);

	// Commit without a prior prepare registers and drives in one go.
	let status = h.coordinator.submit(tcc_request(gid)).await.unwrap();
	assert_eq!(status, GlobalStatus::Failed);
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["succeed", "prepared", "succeed", "succeed", "prepared", "failed"]
	);
	// Both tried branches were cancelled; nothing was confirmed.
	assert_eq!(h.busi.call_count("TransOutCancel"), 1);
	assert_eq!(h.busi.call_count("TransInCancel"), 1);
	assert_eq!(h.busi.call_count("TransOutConfirm"), 0);
}

#[tokio::test]
async fn test_tcc_try_failure_during_prepare() {
	let h = harness();
	let gid = "gid-tcc-prepare-fail";
	h.busi.mock("TransInTry", BranchResult::Failure);

	let status = h.coordinator.prepare(tcc_request(gid)).await.unwrap();
	assert_eq!(status, GlobalStatus::Failed);
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["succeed", "prepared", "succeed", "succeed", "prepared", "failed"]
	);
}

#[tokio::test]
async fn test_tcc_pending_cancel_resumed_by_scheduler() {
	let h = harness();
	let gid = "gid-tcc-rollback-pending";
	h.busi.mock("TransInTry", BranchResult::Failure);
	h.busi.mock("TransInCancel", BranchResult::Pending);

	let status = h.coordinator.submit(tcc_request(gid)).await.unwrap();
	assert_eq!(status, GlobalStatus::Submitted);
	assert_eq!(h.global_status(gid).await, "submitted");

	h.busi.reset("TransInCancel");
	h.cron(GlobalStatus::Submitted).await;
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["succeed", "prepared", "succeed", "succeed", "prepared", "failed"]
	);
	assert_eq!(h.global_status(gid).await, "failed");
}

#[tokio::test]
async fn test_tcc_caller_rollback_cancels_reservations() {
	let h = harness();
	let gid = "gid-tcc-caller-rollback";

	h.coordinator.prepare(tcc_request(gid)).await.unwrap();
	let status = h.coordinator.rollback(gid).await.unwrap();
	assert_eq!(status, GlobalStatus::Failed);
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["succeed", "prepared", "succeed", "succeed", "prepared", "succeed"]
	);
	assert_eq!(h.busi.call_count("TransOutConfirm"), 0);
}

#[tokio::test]
async fn test_xa_commit_success() {
	let h = harness();
	let gid = "xa-normal";

	h.coordinator.prepare(xa_request(gid)).await.unwrap();
	h.coordinator
		.register_xa_branch(xa_branch(gid, "01", "rm1"))
		.await
		.unwrap();
	h.coordinator
		.register_xa_branch(xa_branch(gid, "02", "rm2"))
		.await
		.unwrap();

	let status = h.coordinator.submit(xa_request(gid)).await.unwrap();
	assert_eq!(status, GlobalStatus::Succeed);
	assert_eq!(
		h.branch_statuses(gid).await,
		vec!["prepared", "succeed", "prepared", "succeed"]
	);
	assert_eq!(h.busi.call_count("rm1/rollback"), 0);
}

#[tokio::test]
async fn test_xa_rollback_after_failed_prepare() {
	let h = harness();
	let gid = "xa-rollback";

	// Only the first resource manager prepared; the second failed locally
	// and never registered.
	h.coordinator.prepare(xa_request(gid)).await.unwrap();
	h.coordinator
		.register_xa_branch(xa_branch(gid, "01", "rm1"))
		.await
		.unwrap();

	let status = h.coordinator.rollback(gid).await.unwrap();
	assert_eq!(status, GlobalStatus::Failed);
	assert_eq!(h.branch_statuses(gid).await, vec!["succeed", "prepared"]);
	assert_eq!(h.global_status(gid).await, "failed");
}

#[tokio::test]
async fn test_xa_abandoned_prepared_is_rolled_back() {
	let h = harness();
	let gid = "xa-abandoned";

	h.coordinator.prepare(xa_request(gid)).await.unwrap();
	h.coordinator
		.register_xa_branch(xa_branch(gid, "01", "rm1"))
		.await
		.unwrap();

	h.cron(GlobalStatus::Prepared).await;
	assert_eq!(h.global_status(gid).await, "failed");
	assert_eq!(h.branch_statuses(gid).await, vec!["succeed", "prepared"]);
	assert_eq!(h.busi.call_count("rm1/rollback"), 1);
	assert_eq!(h.busi.call_count("rm1/commit"), 0);
}

#[tokio::test]
async fn test_redrive_on_terminal_transaction_is_noop() {
	let h = harness();
	let gid = "gid-terminal";

	h.coordinator.submit(saga_request(gid)).await.unwrap();
	assert_eq!(h.global_status(gid).await, "succeed");
	let calls_before = h.busi.total_calls();
	let branches_before = h.branch_statuses(gid).await;

	let driver = h.coordinator.driver();
	assert_eq!(driver.redrive(gid).await.unwrap(), GlobalStatus::Succeed);
	assert_eq!(driver.redrive(gid).await.unwrap(), GlobalStatus::Succeed);

	assert_eq!(h.busi.total_calls(), calls_before);
	assert_eq!(h.branch_statuses(gid).await, branches_before);
}

#[tokio::test]
async fn test_submit_is_idempotent_after_success() {
	let h = harness();
	let gid = "gid-resubmit";

	h.coordinator.submit(saga_request(gid)).await.unwrap();
	let calls_before = h.busi.total_calls();

	let status = h.coordinator.submit(saga_request(gid)).await.unwrap();
	assert_eq!(status, GlobalStatus::Succeed);
	assert_eq!(h.busi.total_calls(), calls_before);
}

#[tokio::test]
async fn test_network_error_leaves_branch_for_scheduler() {
	struct FlakyBusi {
		inner: MockBusi,
		fail_once: Mutex<bool>,
	}

	#[async_trait]
	impl BranchCaller for FlakyBusi {
		async fn call(
			&self,
			url: &str,
			payload: &serde_json::Value,
		) -> Result<BranchResult, CallError> {
			if url.ends_with("/TransIn") {
				let mut fail = self.fail_once.lock().unwrap();
				if *fail {
					*fail = false;
					return Err(CallError::Timeout);
				}
			}
			self.inner.call(url, payload).await
		}
	}

	let store = Arc::new(MemoryStore::new());
	let busi = Arc::new(FlakyBusi {
		inner: MockBusi::new(),
		fail_once: Mutex::new(true),
	});
	let coordinator = Coordinator::new(store.clone(), busi.clone());
	let scheduler = Scheduler::new(
		store.clone(),
		coordinator.driver().clone(),
		CoordinatorConfig::default(),
	);

	let gid = "gid-flaky";
	let status = coordinator.submit(saga_request(gid)).await.unwrap();
	// The timed-out branch stays prepared; no synchronous retry happened.
	assert_eq!(status, GlobalStatus::Submitted);
	assert_eq!(busi.inner.call_count("TransIn"), 0);

	scheduler
		.cron_trans_once(chrono::Duration::seconds(-10), GlobalStatus::Submitted)
		.await
		.unwrap();
	let global = store.load_global(gid).await.unwrap().unwrap();
	assert_eq!(global.status, GlobalStatus::Succeed);
}
