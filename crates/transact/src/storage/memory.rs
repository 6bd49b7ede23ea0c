//! In-memory implementation of the transaction store.
//!
//! Suitable for testing and single-instance deployments. Multi-instance
//! deployments plug a SQL or distributed store in behind the same trait,
//! keeping the CAS contract as conditional writes (`WHERE status = ?`).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{StoreError, TransStore};
use crate::trans::{
	BranchOp, BranchStatus, GlobalStatus, Protocol, TransBranch, TransGlobal, TransLogEntry,
};

#[derive(Default)]
struct Inner {
	globals: HashMap<String, TransGlobal>,
	branches: HashMap<String, Vec<TransBranch>>,
	log: Vec<TransLogEntry>,
}

/// In-memory store guarded by a single mutex; every trait method is one
/// critical section, which is what makes the multi-row operations atomic.
#[derive(Default)]
pub struct MemoryStore {
	inner: Mutex<Inner>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of audit records written so far.
	pub fn log_len(&self) -> usize {
		self.inner.lock().unwrap().log.len()
	}

	/// Clear all state.
	pub fn clear(&self) {
		let mut inner = self.inner.lock().unwrap();
		inner.globals.clear();
		inner.branches.clear();
		inner.log.clear();
	}
}

#[async_trait]
impl TransStore for MemoryStore {
	async fn create_global(
		&self,
		global: TransGlobal,
		branches: Vec<TransBranch>,
	) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().unwrap();
		if inner.globals.contains_key(&global.gid) {
			return Err(StoreError::AlreadyExists);
		}
		inner.branches.insert(global.gid.clone(), branches);
		inner.globals.insert(global.gid.clone(), global);
		Ok(())
	}

	async fn load_global(&self, gid: &str) -> Result<Option<TransGlobal>, StoreError> {
		let inner = self.inner.lock().unwrap();
		Ok(inner.globals.get(gid).cloned())
	}

	async fn load_branches(&self, gid: &str) -> Result<Vec<TransBranch>, StoreError> {
		let inner = self.inner.lock().unwrap();
		let mut rows = inner.branches.get(gid).cloned().unwrap_or_default();
		rows.sort_by_key(|b| b.sequence);
		Ok(rows)
	}

	async fn append_branches(
		&self,
		gid: &str,
		mut branches: Vec<TransBranch>,
	) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().unwrap();
		if !inner.globals.contains_key(gid) {
			return Err(StoreError::NotFound);
		}
		inner
			.branches
			.entry(gid.to_string())
			.or_default()
			.append(&mut branches);
		Ok(())
	}

	async fn update_global_status(
		&self,
		gid: &str,
		expected: GlobalStatus,
		new: GlobalStatus,
	) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().unwrap();
		let Some(global) = inner.globals.get_mut(gid) else {
			return Err(StoreError::NotFound);
		};
		if global.status != expected {
			return Ok(false);
		}
		global.status = new;
		global.update_time = Utc::now();
		Ok(true)
	}

	async fn update_branch_status(
		&self,
		gid: &str,
		branch_id: &str,
		op: BranchOp,
		expected: BranchStatus,
		new: BranchStatus,
	) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().unwrap();
		let Some(rows) = inner.branches.get_mut(gid) else {
			return Err(StoreError::NotFound);
		};
		let Some(row) = rows
			.iter_mut()
			.find(|b| b.branch_id == branch_id && b.op == op)
		else {
			return Err(StoreError::NotFound);
		};
		if row.status != expected {
			return Ok(false);
		}
		row.status = new;
		Ok(true)
	}

	async fn touch(&self, gid: &str) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().unwrap();
		let Some(global) = inner.globals.get_mut(gid) else {
			return Err(StoreError::NotFound);
		};
		global.update_time = Utc::now();
		Ok(())
	}

	async fn scan_expired(
		&self,
		protocol: Option<Protocol>,
		status: GlobalStatus,
		older_than: DateTime<Utc>,
		limit: usize,
	) -> Result<Vec<String>, StoreError> {
		let inner = self.inner.lock().unwrap();
		let mut matches: Vec<&TransGlobal> = inner
			.globals
			.values()
			.filter(|g| g.status == status)
			.filter(|g| g.update_time < older_than)
			.filter(|g| protocol.is_none_or(|p| g.protocol == p))
			.collect();
		matches.sort_by_key(|g| g.update_time);
		Ok(matches
			.into_iter()
			.take(limit)
			.map(|g| g.gid.clone())
			.collect())
	}

	async fn append_log(&self, entry: TransLogEntry) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().unwrap();
		inner.log.push(entry);
		Ok(())
	}
}
