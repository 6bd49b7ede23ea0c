//! Recovery scheduler.
//!
//! Periodically scans for global transactions sitting in a non-terminal
//! status longer than their cutoff and re-invokes the owning protocol
//! strategy, exactly as if newly triggered. This is what makes the engine
//! crash-tolerant: a request can die at any point and a later pass finishes
//! the job. CAS makes concurrent passes (and passes racing live traffic)
//! safe; a lost race is abandoned, not retried.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::protocol::{Driver, TransError};
use crate::storage::TransStore;
use crate::trans::GlobalStatus;

pub struct Scheduler {
	store: Arc<dyn TransStore>,
	driver: Driver,
	config: CoordinatorConfig,
}

impl Scheduler {
	pub fn new(store: Arc<dyn TransStore>, driver: Driver, config: CoordinatorConfig) -> Self {
		Self {
			store,
			driver,
			config,
		}
	}

	/// One scan-and-drive pass over transactions of `status` older than
	/// `older_than`. Returns how many transactions were re-driven. Errors
	/// on individual transactions are logged and do not stop the pass.
	pub async fn cron_trans_once(
		&self,
		older_than: chrono::Duration,
		status: GlobalStatus,
	) -> Result<usize, TransError> {
		let cutoff = Utc::now() - older_than;
		let gids = self
			.store
			.scan_expired(None, status, cutoff, self.config.scan_limit)
			.await?;
		if !gids.is_empty() {
			info!(status = %status, count = gids.len(), "re-driving expired transactions");
		}
		let mut processed = 0;
		for gid in gids {
			match self.driver.redrive(&gid).await {
				Ok(new_status) => {
					debug!(gid = %gid, status = %new_status, "re-drive pass finished");
					processed += 1;
				},
				Err(e) => {
					warn!(gid = %gid, error = %e, "re-drive failed, will retry next pass");
				},
			}
		}
		Ok(processed)
	}

	/// Fixed-interval loop: each tick re-drives stuck submitted
	/// transactions and expired prepared ones.
	pub async fn run(self) {
		let mut interval = tokio::time::interval(self.config.cron_interval());
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
		loop {
			interval.tick().await;
			if let Err(e) = self
				.cron_trans_once(self.config.submitted_expire(), GlobalStatus::Submitted)
				.await
			{
				warn!(error = %e, "submitted scan failed");
			}
			if let Err(e) = self
				.cron_trans_once(self.config.prepared_expire(), GlobalStatus::Prepared)
				.await
			{
				warn!(error = %e, "prepared scan failed");
			}
		}
	}
}
