//! Submission and registration surface.
//!
//! Accepts a caller's assembled transaction, persists it, and hands it to
//! the owning protocol strategy. Malformed registrations are rejected
//! synchronously; the transaction is never created.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::branch::BranchCaller;
use crate::protocol::{Driver, TransError};
use crate::storage::{StoreError, TransStore};
use crate::trans::{
	GlobalStatus, Protocol, TransBranch, TransGlobal, TransLogEntry, TransRequest,
	XaBranchRequest,
};

/// Point-in-time view of a transaction, as returned by status queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransSnapshot {
	pub global: TransGlobal,
	pub branches: Vec<TransBranch>,
}

pub struct Coordinator {
	store: Arc<dyn TransStore>,
	driver: Driver,
}

impl Coordinator {
	pub fn new(store: Arc<dyn TransStore>, caller: Arc<dyn BranchCaller>) -> Self {
		Self {
			driver: Driver::new(store.clone(), caller),
			store,
		}
	}

	/// The protocol driver, shared with the recovery scheduler.
	pub fn driver(&self) -> &Driver {
		&self.driver
	}

	/// Register a transaction without committing it. TCC reserves its
	/// resources here. Re-preparing an already-known gid is a no-op.
	pub async fn prepare(&self, req: TransRequest) -> Result<GlobalStatus, TransError> {
		req.validate()?;
		self.register(&req).await?;
		let status = self.driver.require(&req.gid).await?.status;
		if req.protocol == Protocol::Tcc && status == GlobalStatus::Prepared {
			return self.driver.prepare_drive(&req.gid).await;
		}
		Ok(status)
	}

	/// Commit a transaction, registering it first when the gid is new.
	pub async fn submit(&self, req: TransRequest) -> Result<GlobalStatus, TransError> {
		req.validate()?;
		self.register(&req).await?;
		self.driver.submit(&req.gid).await
	}

	/// Caller-initiated abort (XA rollback, TCC cancel-equivalent).
	pub async fn rollback(&self, gid: &str) -> Result<GlobalStatus, TransError> {
		self.driver.rollback(gid).await
	}

	/// An XA resource manager reporting that its local work has prepared.
	/// Re-registering a known branch id is a no-op.
	pub async fn register_xa_branch(&self, req: XaBranchRequest) -> Result<(), TransError> {
		req.validate()?;
		let global = self.driver.require(&req.gid).await?;
		if global.protocol != Protocol::Xa {
			return Err(TransError::Unsupported {
				operation: "branch registration",
				protocol: global.protocol,
			});
		}
		if global.status.is_terminal() {
			return Err(TransError::Conflict(req.gid.clone()));
		}
		let existing = self.store.load_branches(&req.gid).await?;
		if existing.iter().any(|b| b.branch_id == req.branch_id) {
			return Ok(());
		}
		let base = existing.len() as i32;
		self.store
			.append_branches(&req.gid, req.branches(base))
			.await?;
		self.store
			.append_log(TransLogEntry::new(
				&req.gid,
				format!("xa branch {} registered", req.branch_id),
			))
			.await?;
		info!(gid = %req.gid, branch_id = %req.branch_id, "xa branch registered");
		Ok(())
	}

	/// Global + branches snapshot for a gid.
	pub async fn query(&self, gid: &str) -> Result<TransSnapshot, TransError> {
		let global = self.driver.require(gid).await?;
		let branches = self.store.load_branches(gid).await?;
		Ok(TransSnapshot { global, branches })
	}

	/// Persist the transaction if the gid is new. A duplicate registration
	/// of the same protocol is idempotent; a different protocol under the
	/// same gid is a conflict.
	async fn register(&self, req: &TransRequest) -> Result<bool, TransError> {
		let global = TransGlobal::new(
			&req.gid,
			req.protocol,
			req.payload.clone(),
			req.query_prepared.clone(),
		);
		match self.store.create_global(global, req.branches()).await {
			Ok(()) => {
				self.store
					.append_log(TransLogEntry::new(&req.gid, "registered"))
					.await?;
				info!(gid = %req.gid, protocol = %req.protocol, "transaction registered");
				Ok(true)
			},
			Err(StoreError::AlreadyExists) => {
				let existing = self.driver.require(&req.gid).await?;
				if existing.protocol != req.protocol {
					return Err(TransError::Conflict(req.gid.clone()));
				}
				Ok(false)
			},
			Err(e) => Err(e.into()),
		}
	}
}
