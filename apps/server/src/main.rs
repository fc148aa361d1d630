use pf_ai::{Device, ModelBank, ModelBankConfig};
use pf_mesh::VoxelGrid;
use pf_server::{router, AppState, Config};
use pf_utils::error::report_error;

use anyhow::Context;
use clap::Parser;
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pf_=debug")))
		.with(fmt::layer())
		.init();

	let config = Config::parse();

	config
		.create_dirs()
		.await
		.context("Failed to prepare the data directory")?;

	let grid = VoxelGrid::with_resolution(config.grid_size).context("Invalid SDF grid size")?;

	let device = Device::select(config.device);
	pf_ai::init(device).context("Failed to initialize the inference runtime")?;

	let models = ModelBank::load(
		&ModelBankConfig {
			cache_dir: config.model_dir(),
			base_url: config.model_base_url.clone(),
			seed: config.seed,
		},
		device,
	)
	.await
	.context("Failed to load models")?;

	let state = AppState::new(models.image_to_mesh(grid), models.captioner(), &config);
	let app = router(state.clone(), config.max_upload_bytes);

	let listener = TcpListener::bind((config.host, config.port))
		.await
		.with_context(|| format!("Failed to bind to port {}", config.port))?;

	info!(
		"Listening on http://{} with models on {device}",
		listener.local_addr()?
	);

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("HTTP server failed")?;

	info!("Waiting for queued jobs to finish");
	report_error(&state.jobs.shutdown().await);

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!(?e, "Failed to install Ctrl+C handler");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut terminate) => {
				terminate.recv().await;
			}
			Err(e) => {
				error!(?e, "Failed to install SIGTERM handler");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
		() = terminate => info!("Received SIGTERM, shutting down gracefully..."),
	}
}
