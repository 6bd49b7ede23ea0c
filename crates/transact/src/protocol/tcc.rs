//! TCC strategy: Try/Confirm/Cancel.
//!
//! Tries run during the prepare phase, while the transaction is still
//! `prepared`; confirmations run after the caller commits. A refused try
//! hands every tried branch to the cancel scan. Confirm and Cancel are
//! idempotent collaborator contracts; the engine may issue either more
//! than once.

use std::collections::HashSet;

use tracing::warn;

use super::{Driver, TransError};
use crate::branch::BranchOutcome;
use crate::trans::{BranchOp, BranchStatus, GlobalStatus, TransBranch, TransGlobal};

/// Drive reservations, then confirmations.
///
/// Invoked both while `prepared` (reservations only) and while `submitted`
/// (finish reservations if the caller committed without preparing, then
/// confirm). Succeeded operations are skipped on re-drive.
pub(crate) async fn forward(
	driver: &Driver,
	global: &TransGlobal,
) -> Result<GlobalStatus, TransError> {
	let branches = driver.store.load_branches(&global.gid).await?;

	for try_row in branches.iter().filter(|b| b.op == BranchOp::Try) {
		match try_row.status {
			BranchStatus::Succeed => continue,
			BranchStatus::Failed => {
				return cancel_phase(driver, global, global.status, GlobalStatus::Failed).await;
			},
			BranchStatus::Prepared => {
				match driver.executor.exec_branch(global, try_row).await? {
					BranchOutcome::Success => continue,
					BranchOutcome::Failure => {
						return cancel_phase(driver, global, global.status, GlobalStatus::Failed)
							.await;
					},
					BranchOutcome::Pending | BranchOutcome::NetworkError => {
						return Ok(global.status);
					},
				}
			},
		}
	}

	if global.status == GlobalStatus::Prepared {
		// Reservations are in place; confirmation waits for the caller's
		// commit.
		return Ok(GlobalStatus::Prepared);
	}

	confirm_phase(driver, global).await
}

/// Confirm every branch whose try succeeded, in declared order. The global
/// only reaches `succeed` once all confirmations have.
async fn confirm_phase(driver: &Driver, global: &TransGlobal) -> Result<GlobalStatus, TransError> {
	let branches = driver.store.load_branches(&global.gid).await?;
	let reserved: HashSet<&str> = branches
		.iter()
		.filter(|b| b.op == BranchOp::Try && b.status == BranchStatus::Succeed)
		.map(|b| b.branch_id.as_str())
		.collect();

	for confirm in branches
		.iter()
		.filter(|b| b.op == BranchOp::Confirm && reserved.contains(b.branch_id.as_str()))
	{
		if confirm.status == BranchStatus::Succeed {
			continue;
		}
		match driver.executor.exec_branch(global, confirm).await? {
			BranchOutcome::Success => continue,
			outcome => {
				warn!(
					gid = %global.gid,
					branch_id = %confirm.branch_id,
					?outcome,
					"confirmation incomplete, scheduler will retry"
				);
				return Ok(GlobalStatus::Submitted);
			},
		}
	}

	driver
		.finish(&global.gid, GlobalStatus::Submitted, GlobalStatus::Succeed)
		.await
}

/// Cancel every tried branch in reverse sequence order, then move the
/// global to `target` (`failed` on a refused try or caller rollback,
/// `canceled` on the abandoned-registration path).
///
/// The failed try's own branch is cancelled too: its reservation may have
/// partially landed before the refusal, and cancels are idempotent by
/// contract. Branches whose try never ran are left alone.
pub(crate) async fn cancel_phase(
	driver: &Driver,
	global: &TransGlobal,
	from: GlobalStatus,
	target: GlobalStatus,
) -> Result<GlobalStatus, TransError> {
	let branches = driver.store.load_branches(&global.gid).await?;
	let tried: HashSet<&str> = branches
		.iter()
		.filter(|b| b.op == BranchOp::Try && b.status != BranchStatus::Prepared)
		.map(|b| b.branch_id.as_str())
		.collect();

	let mut cancels: Vec<&TransBranch> = branches
		.iter()
		.filter(|b| b.op == BranchOp::Cancel && tried.contains(b.branch_id.as_str()))
		.collect();
	cancels.sort_by_key(|b| std::cmp::Reverse(b.sequence));

	for cancel in cancels {
		if cancel.status == BranchStatus::Succeed {
			continue;
		}
		match driver.executor.exec_branch(global, cancel).await? {
			BranchOutcome::Success => continue,
			outcome => {
				warn!(
					gid = %global.gid,
					branch_id = %cancel.branch_id,
					?outcome,
					"cancel incomplete, scheduler will retry"
				);
				return Ok(from);
			},
		}
	}

	driver.finish(&global.gid, from, target).await
}
