//! wsi-ingest - describe pyramidal microscopy slides as display layers.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_ingest::{load_images, Blending, Config, IngestReport};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let report = match load_images(
        &config.paths,
        config.modality,
        config.load_mem,
        &config.ingest_options(),
    )
    .await
    {
        Ok(report) => report,
        Err(e) => {
            error!("Ingestion failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_summary(&report);
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_ingest=debug"
    } else {
        "wsi_ingest=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// One line per layer, then advisories.
fn print_summary(report: &IngestReport) {
    for layer in &report.layers {
        let properties = &layer.properties;
        let shapes: Vec<String> = layer
            .data
            .iter()
            .map(|level| format!("{:?}", level.shape()))
            .collect();
        println!(
            "{}  levels={}  shape={}  dtype={}  scale=({}, {})  limits=[{}, {}]{}",
            properties.name,
            layer.data.len(),
            shapes.join(" > "),
            layer
                .data
                .first()
                .map(|level| level.dtype().to_string())
                .unwrap_or_default(),
            properties.scale[0],
            properties.scale[1],
            properties.contrast_limits[0],
            properties.contrast_limits[1],
            if properties.blending == Some(Blending::Additive) {
                "  blending=additive"
            } else {
                ""
            },
        );
    }

    for advisory in &report.advisories {
        println!("warning: {}", advisory);
    }
}
