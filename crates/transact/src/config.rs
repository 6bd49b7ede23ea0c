//! Engine configuration.
//!
//! An explicit value passed into the coordinator and the scheduler at
//! construction; there is no process-wide mutable configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordinatorConfig {
	/// How long a transaction may sit in `prepared` before the scheduler
	/// treats it as abandoned and force-queries or cancels it.
	pub prepared_expire_secs: u64,

	/// Scheduler polling interval; also the age cutoff for re-driving
	/// submitted transactions.
	pub cron_interval_secs: u64,

	/// Bound on every outbound branch call.
	pub branch_timeout_secs: u64,

	/// Maximum transactions picked up per scheduler pass.
	pub scan_limit: usize,
}

impl Default for CoordinatorConfig {
	fn default() -> Self {
		Self {
			prepared_expire_secs: 60,
			cron_interval_secs: 10,
			branch_timeout_secs: 10,
			scan_limit: 100,
		}
	}
}

impl CoordinatorConfig {
	pub fn prepared_expire(&self) -> chrono::Duration {
		chrono::Duration::seconds(self.prepared_expire_secs as i64)
	}

	pub fn cron_interval(&self) -> Duration {
		Duration::from_secs(self.cron_interval_secs)
	}

	/// Age cutoff for submitted transactions, as a chrono duration.
	pub fn submitted_expire(&self) -> chrono::Duration {
		chrono::Duration::seconds(self.cron_interval_secs as i64)
	}

	pub fn branch_timeout(&self) -> Duration {
		Duration::from_secs(self.branch_timeout_secs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = CoordinatorConfig::default();
		assert_eq!(config.prepared_expire_secs, 60);
		assert_eq!(config.cron_interval(), Duration::from_secs(10));
		assert_eq!(config.scan_limit, 100);
	}

	#[test]
	fn test_partial_yaml_overrides() {
		let config: CoordinatorConfig =
			serde_json::from_str(r#"{"preparedExpireSecs": 90}"#).unwrap();
		assert_eq!(config.prepared_expire_secs, 90);
		assert_eq!(config.cron_interval_secs, 10);
	}
}
