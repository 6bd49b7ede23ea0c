//! HTTP surface over the coordinator.
//!
//! Route naming is an integration detail, not a compatibility contract.
//! Transient branch conditions never surface here; callers observe
//! progress through the query endpoint.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::coordinator::{Coordinator, TransSnapshot};
use crate::protocol::TransError;
use crate::storage::StoreError;
use crate::trans::{TransRequest, XaBranchRequest};

pub fn router(coordinator: Arc<Coordinator>) -> Router {
	Router::new()
		.route("/api/prepare", post(prepare))
		.route("/api/submit", post(submit))
		.route("/api/rollback", post(rollback))
		.route("/api/branch/xa", post(register_xa_branch))
		.route("/api/query/{gid}", get(query))
		.with_state(coordinator)
}

async fn prepare(
	State(coordinator): State<Arc<Coordinator>>,
	Json(req): Json<TransRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
	let status = coordinator.prepare(req).await?;
	Ok(Json(json!({ "status": status })))
}

async fn submit(
	State(coordinator): State<Arc<Coordinator>>,
	Json(req): Json<TransRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
	let status = coordinator.submit(req).await?;
	Ok(Json(json!({ "status": status })))
}

#[derive(Deserialize)]
struct GidBody {
	gid: String,
}

async fn rollback(
	State(coordinator): State<Arc<Coordinator>>,
	Json(body): Json<GidBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
	let status = coordinator.rollback(&body.gid).await?;
	Ok(Json(json!({ "status": status })))
}

async fn register_xa_branch(
	State(coordinator): State<Arc<Coordinator>>,
	Json(req): Json<XaBranchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
	coordinator.register_xa_branch(req).await?;
	Ok(Json(json!({ "status": "registered" })))
}

async fn query(
	State(coordinator): State<Arc<Coordinator>>,
	Path(gid): Path<String>,
) -> Result<Json<TransSnapshot>, ApiError> {
	Ok(Json(coordinator.query(&gid).await?))
}

struct ApiError(TransError);

impl From<TransError> for ApiError {
	fn from(e: TransError) -> Self {
		Self(e)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = match &self.0 {
			TransError::NotFound(_) => StatusCode::NOT_FOUND,
			TransError::Conflict(_) => StatusCode::CONFLICT,
			TransError::Invalid(_) | TransError::Unsupported { .. } => StatusCode::BAD_REQUEST,
			TransError::Store(StoreError::AlreadyExists) => StatusCode::CONFLICT,
			TransError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
		};
		(status, Json(json!({ "error": self.0.to_string() }))).into_response()
	}
}
