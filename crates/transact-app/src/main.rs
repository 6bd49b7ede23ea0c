use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use transact::{Coordinator, CoordinatorConfig, HttpBranchCaller, MemoryStore, Scheduler};

#[derive(Parser)]
#[command(name = "transact", about = "Distributed transaction coordinator")]
struct Args {
	/// Listen address for the coordinator API.
	#[arg(long, default_value = "0.0.0.0:36789")]
	listen: String,

	/// Optional YAML configuration file.
	#[arg(long)]
	config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let args = Args::parse();
	let config: CoordinatorConfig = match &args.config {
		Some(path) => serde_yaml::from_str(&std::fs::read_to_string(path)?)?,
		None => CoordinatorConfig::default(),
	};

	let store = Arc::new(MemoryStore::new());
	let caller = Arc::new(
		HttpBranchCaller::new(config.branch_timeout())
			.map_err(|e| anyhow::anyhow!("building branch client: {e}"))?,
	);
	let coordinator = Arc::new(Coordinator::new(store.clone(), caller));

	let scheduler = Scheduler::new(store, coordinator.driver().clone(), config);
	tokio::spawn(scheduler.run());

	let listener = tokio::net::TcpListener::bind(&args.listen).await?;
	tracing::info!(listen = %args.listen, "coordinator listening");
	axum::serve(listener, transact::http::router(coordinator)).await?;
	Ok(())
}
