//! The gateway binary.
//!
//! Loads the configuration, starts the embedded OPC UA server, discovers
//! and projects every configured IED and keeps the data plane running until
//! interrupted.

use std::{path::Path, sync::Arc};

use iec61850_gateway::{Gateway, GatewayConfig, ua::UaServer};
use snafu::{ResultExt as _, Whatever};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
	EnvFilter, Layer as _, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

#[tokio::main]
async fn main() -> Result<(), Whatever> {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::from("info"));
	let layer = tracing_subscriber::fmt::layer().with_filter(filter);
	tracing_subscriber::registry()
		.with(layer)
		//needed to get the tracing_error working
		.with(ErrorLayer::default().with_filter(EnvFilter::from("debug")))
		.init();

	let path = std::env::args().nth(1).unwrap_or_else(|| "config/gateway.json".to_owned());
	let config =
		GatewayConfig::load(Path::new(&path)).whatever_context("Failed to load configuration")?;

	let server = UaServer::new(&config.opcua).whatever_context("Failed to start OPC UA server")?;
	let gateway = Arc::new(Gateway::new(config, server.space()));

	// The OPC UA server loop owns its own thread; everything else runs on
	// the async runtime.
	std::thread::spawn(move || server.run_blocking());

	match gateway.build_station().await {
		Ok(station) => {
			tracing::info!("Station built with {} IEDs", station.ieds.len());
		}
		Err(e) => {
			tracing::error!("Station build failed: {e}; the gateway starts empty");
		}
	}
	gateway.start();

	tokio::signal::ctrl_c().await.whatever_context("Failed to wait for the shutdown signal")?;
	gateway.shutdown().await;
	Ok(())
}
