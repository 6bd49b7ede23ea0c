//! XA strategy: two-phase commit over remote resource managers.
//!
//! The caller opens the global transaction before touching any resource
//! manager; each manager that prepares its local work registers a
//! `[rollback, commit]` branch pair here. The coordinator then issues the
//! global decision: commit everything, or roll back every branch that did
//! prepare.

use tracing::warn;

use super::{Driver, TransError};
use crate::branch::BranchOutcome;
use crate::trans::{BranchOp, BranchStatus, GlobalStatus, TransBranch, TransGlobal};

/// Issue commit to every registered branch in declared order; the global
/// reaches `succeed` once all of them have.
pub(crate) async fn commit_phase(
	driver: &Driver,
	global: &TransGlobal,
) -> Result<GlobalStatus, TransError> {
	let branches = driver.store.load_branches(&global.gid).await?;

	for commit in branches.iter().filter(|b| b.op == BranchOp::Commit) {
		if commit.status == BranchStatus::Succeed {
			continue;
		}
		match driver.executor.exec_branch(global, commit).await? {
			BranchOutcome::Success => continue,
			outcome => {
				warn!(
					gid = %global.gid,
					branch_id = %commit.branch_id,
					?outcome,
					"commit incomplete, scheduler will retry"
				);
				return Ok(GlobalStatus::Submitted);
			},
		}
	}

	driver
		.finish(&global.gid, GlobalStatus::Submitted, GlobalStatus::Succeed)
		.await
}

/// Issue rollback to every registered branch in reverse order.
///
/// Rollback is driven while the global stays `prepared` and only then moves
/// to `target`; a crash mid-way is picked up again by the prepared expiry
/// scan. A resource manager that never registered is not contacted; it
/// self-aborts when its own prepare never completes.
pub(crate) async fn rollback_phase(
	driver: &Driver,
	global: &TransGlobal,
	target: GlobalStatus,
) -> Result<GlobalStatus, TransError> {
	let branches = driver.store.load_branches(&global.gid).await?;

	let mut rollbacks: Vec<&TransBranch> = branches
		.iter()
		.filter(|b| b.op == BranchOp::Rollback)
		.collect();
	rollbacks.sort_by_key(|b| std::cmp::Reverse(b.sequence));

	for rollback in rollbacks {
		if rollback.status == BranchStatus::Succeed {
			continue;
		}
		match driver.executor.exec_branch(global, rollback).await? {
			BranchOutcome::Success => continue,
			outcome => {
				warn!(
					gid = %global.gid,
					branch_id = %rollback.branch_id,
					?outcome,
					"rollback incomplete, scheduler will retry"
				);
				return Ok(global.status);
			},
		}
	}

	driver.finish(&global.gid, GlobalStatus::Prepared, target).await
}
