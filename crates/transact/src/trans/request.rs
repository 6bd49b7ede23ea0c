//! Caller-facing registration requests and their expansion into branch rows.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::types::{BranchOp, Protocol, TransBranch};

/// Errors rejected synchronously at registration. A transaction that fails
/// validation is never created.
#[derive(Debug, Error)]
pub enum RequestError {
	#[error("gid must not be empty")]
	EmptyGid,

	#[error("{protocol} transaction requires at least one step")]
	NoSteps { protocol: Protocol },

	#[error("xa branches are registered by resource managers, not declared at submission")]
	XaSteps,

	#[error("step {index} does not belong to protocol {protocol}")]
	ProtocolMismatch { index: usize, protocol: Protocol },

	#[error("invalid url '{url}': {reason}")]
	InvalidUrl { url: String, reason: String },
}

/// A caller-assembled global transaction, as submitted over the wire.
///
/// The same body is accepted by both the prepare and the submit endpoints;
/// submit registers the transaction first when the gid is not yet known.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransRequest {
	pub gid: String,
	pub protocol: Protocol,

	/// Business payload forwarded to every branch call.
	#[serde(default)]
	pub payload: serde_json::Value,

	/// Callback the scheduler queries when this transaction expires while
	/// still prepared.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub query_prepared: Option<String>,

	/// Ordered branch definitions. Empty for XA, whose branches arrive via
	/// resource-manager registration.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub steps: Vec<StepDef>,
}

/// One declared step of a SAGA or TCC transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDef {
	/// Forward action plus optional compensation.
	Saga {
		action: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		compensate: Option<String>,
	},

	/// Try/Confirm/Cancel endpoint triple.
	Tcc {
		r#try: String,
		confirm: String,
		cancel: String,
	},
}

impl TransRequest {
	/// Validate the request shape. Fatal errors only; transient conditions
	/// never show up here.
	pub fn validate(&self) -> Result<(), RequestError> {
		if self.gid.is_empty() {
			return Err(RequestError::EmptyGid);
		}
		if let Some(query) = &self.query_prepared {
			check_url(query)?;
		}
		match self.protocol {
			Protocol::Saga | Protocol::Tcc => {
				if self.steps.is_empty() {
					return Err(RequestError::NoSteps {
						protocol: self.protocol,
					});
				}
				for (index, step) in self.steps.iter().enumerate() {
					match (self.protocol, step) {
						(Protocol::Saga, StepDef::Saga { action, compensate }) => {
							check_url(action)?;
							if let Some(compensate) = compensate {
								check_url(compensate)?;
							}
						},
						(Protocol::Tcc, StepDef::Tcc { r#try, confirm, cancel }) => {
							check_url(r#try)?;
							check_url(confirm)?;
							check_url(cancel)?;
						},
						_ => {
							return Err(RequestError::ProtocolMismatch {
								index,
								protocol: self.protocol,
							});
						},
					}
				}
			},
			Protocol::Xa => {
				if !self.steps.is_empty() {
					return Err(RequestError::XaSteps);
				}
			},
		}
		Ok(())
	}

	/// Expand the declared steps into branch rows, in insertion order.
	///
	/// Reverse operations are stored ahead of their forward counterpart so
	/// that a branch listing reads compensation-first per step:
	/// SAGA `[compensate, action]`, TCC `[cancel, confirm, try]`.
	pub fn branches(&self) -> Vec<TransBranch> {
		let mut rows = Vec::new();
		let mut sequence = 0i32;
		let mut push = |rows: &mut Vec<TransBranch>, branch_id: &str, op, url: &str| {
			rows.push(TransBranch::new(&self.gid, branch_id, op, url, sequence));
			sequence += 1;
		};
		for (idx, step) in self.steps.iter().enumerate() {
			let branch_id = format!("{:02}", idx + 1);
			match step {
				StepDef::Saga { action, compensate } => {
					if let Some(compensate) = compensate {
						push(&mut rows, &branch_id, BranchOp::Compensate, compensate);
					}
					push(&mut rows, &branch_id, BranchOp::Action, action);
				},
				StepDef::Tcc { r#try, confirm, cancel } => {
					push(&mut rows, &branch_id, BranchOp::Cancel, cancel);
					push(&mut rows, &branch_id, BranchOp::Confirm, confirm);
					push(&mut rows, &branch_id, BranchOp::Try, r#try);
				},
			}
		}
		rows
	}
}

/// An XA resource manager registering itself on an open global transaction,
/// after its local work has prepared successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XaBranchRequest {
	pub gid: String,
	pub branch_id: String,
	pub commit_url: String,
	pub rollback_url: String,
}

impl XaBranchRequest {
	pub fn validate(&self) -> Result<(), RequestError> {
		if self.gid.is_empty() || self.branch_id.is_empty() {
			return Err(RequestError::EmptyGid);
		}
		check_url(&self.commit_url)?;
		check_url(&self.rollback_url)?;
		Ok(())
	}

	/// The `[rollback, commit]` row pair for this resource manager.
	pub fn branches(&self, base_sequence: i32) -> Vec<TransBranch> {
		vec![
			TransBranch::new(
				&self.gid,
				&self.branch_id,
				BranchOp::Rollback,
				&self.rollback_url,
				base_sequence,
			),
			TransBranch::new(
				&self.gid,
				&self.branch_id,
				BranchOp::Commit,
				&self.commit_url,
				base_sequence + 1,
			),
		]
	}
}

fn check_url(raw: &str) -> Result<(), RequestError> {
	let parsed = Url::parse(raw).map_err(|e| RequestError::InvalidUrl {
		url: raw.to_string(),
		reason: e.to_string(),
	})?;
	if parsed.scheme() != "http" && parsed.scheme() != "https" {
		return Err(RequestError::InvalidUrl {
			url: raw.to_string(),
			reason: format!("unsupported scheme '{}'", parsed.scheme()),
		});
	}
	Ok(())
}
