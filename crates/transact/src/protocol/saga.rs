//! SAGA strategy: ordered forward actions, reverse-order compensations.
//!
//! State machine: `prepared -> submitted -> {succeed | failed}`, with
//! `prepared -> canceled` when an abandoned registration is cancelled by the
//! scheduler.

use std::collections::HashMap;

use tracing::warn;

use super::{Driver, TransError};
use crate::branch::BranchOutcome;
use crate::trans::{BranchOp, BranchStatus, GlobalStatus, TransBranch, TransGlobal};

/// Execute forward actions in declared sequence order, stopping at the
/// first failure.
///
/// Already-succeeded actions are skipped, which is what makes a scheduler
/// re-drive idempotent. A pending or unreachable branch suspends the scan
/// and leaves the transaction in-flight for the next pass.
pub(crate) async fn forward(
	driver: &Driver,
	global: &TransGlobal,
) -> Result<GlobalStatus, TransError> {
	let branches = driver.store.load_branches(&global.gid).await?;

	for action in branches.iter().filter(|b| b.op == BranchOp::Action) {
		match action.status {
			BranchStatus::Succeed => continue,
			// A failed action (from this pass or a previous one) hands the
			// transaction to the compensation scan.
			BranchStatus::Failed => {
				return compensate(
					driver,
					global,
					Some(action.sequence),
					global.status,
					GlobalStatus::Failed,
				)
				.await;
			},
			BranchStatus::Prepared => {
				match driver.executor.exec_branch(global, action).await? {
					BranchOutcome::Success => continue,
					BranchOutcome::Failure => {
						return compensate(
							driver,
							global,
							Some(action.sequence),
							global.status,
							GlobalStatus::Failed,
						)
						.await;
					},
					BranchOutcome::Pending | BranchOutcome::NetworkError => {
						return Ok(global.status);
					},
				}
			},
		}
	}

	driver
		.finish(&global.gid, GlobalStatus::Submitted, GlobalStatus::Succeed)
		.await
}

/// Compensate already-succeeded actions in reverse sequence order.
///
/// `boundary` is the failed action's sequence; only actions strictly before
/// it are compensated, since the failed action itself did nothing to undo. With
/// no boundary, every succeeded action is compensated (the abandoned-
/// registration path). Compensations are retried by the scheduler until
/// they succeed; the transaction only reaches `target` once all of them
/// have.
pub(crate) async fn compensate(
	driver: &Driver,
	global: &TransGlobal,
	boundary: Option<i32>,
	from: GlobalStatus,
	target: GlobalStatus,
) -> Result<GlobalStatus, TransError> {
	let branches = driver.store.load_branches(&global.gid).await?;
	let boundary = boundary.unwrap_or(i32::MAX);

	let actions: HashMap<&str, &TransBranch> = branches
		.iter()
		.filter(|b| b.op == BranchOp::Action)
		.map(|b| (b.branch_id.as_str(), b))
		.collect();
	let mut compensations: Vec<&TransBranch> = branches
		.iter()
		.filter(|b| b.op == BranchOp::Compensate)
		.filter(|b| {
			actions
				.get(b.branch_id.as_str())
				.is_some_and(|a| a.status == BranchStatus::Succeed && a.sequence < boundary)
		})
		.collect();
	compensations.sort_by_key(|b| std::cmp::Reverse(b.sequence));

	for compensation in compensations {
		if compensation.status == BranchStatus::Succeed {
			continue;
		}
		match driver.executor.exec_branch(global, compensation).await? {
			BranchOutcome::Success => continue,
			outcome => {
				warn!(
					gid = %global.gid,
					branch_id = %compensation.branch_id,
					?outcome,
					"compensation incomplete, scheduler will retry"
				);
				return Ok(from);
			},
		}
	}

	driver.finish(&global.gid, from, target).await
}
