//! # plotcache probe
//!
//! Runs one repaint through the full engine against a live backend and
//! prints what came back.
//!
//! Usage:
//!   plotcache-probe --url http://archiver:8080 --start 1700000000000 --end 1700000060000 <uuid>...

use clap::Parser;
use plotcache::{
    Generation, HttpDataService, PlotSession, PlotterConfig, RenderSink, RepaintOutcome,
    ServiceConfig, StreamId, StreamSnapshot, StreamStatus, ViewportController,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "plotcache-probe")]
#[command(about = "Fetch one viewport of time-series data through the plot cache", long_about = None)]
struct Cli {
    /// Backend base URL (overrides PLOTCACHE_BACKEND_URL)
    #[arg(short, long)]
    url: Option<String>,

    /// Engine config file (JSON); defaults plus PLOTCACHE_* variables otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Window start, milliseconds since the epoch
    #[arg(long)]
    start: i64,

    /// Window end, milliseconds since the epoch
    #[arg(long)]
    end: i64,

    /// Pixel width the window is drawn into
    #[arg(short, long, default_value_t = 1000.0)]
    width: f64,

    /// Skip neighbour prefetch
    #[arg(long)]
    no_prefetch: bool,

    /// Streams to plot
    #[arg(required = true)]
    streams: Vec<StreamId>,
}

/// Prints each stream's summary instead of drawing.
struct PrintSink;

impl RenderSink for PrintSink {
    fn data_ready(
        &self,
        generation: Generation,
        streams: &[StreamId],
        data: &HashMap<StreamId, StreamSnapshot>,
    ) {
        println!("generation {}:", generation);
        for stream in streams {
            match data.get(stream) {
                Some(snap) if !snap.points.is_empty() => {
                    let (lo, hi) = snap.points.iter().fold((f64::MAX, f64::MIN), |(lo, hi), p| {
                        (lo.min(p.min), hi.max(p.max))
                    });
                    println!(
                        "  {}  pwe {:>2}  [{}, {})  {:>6} points  range {:.4} .. {:.4}",
                        stream,
                        snap.pwe,
                        snap.start_ms,
                        snap.end_ms,
                        snap.points.len(),
                        lo,
                        hi
                    );
                }
                _ => println!("  {}  no data", stream),
            }
        }
    }

    fn stream_status(&self, stream: StreamId, status: StreamStatus) {
        log::debug!("{}: {:?}", stream, status);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PlotterConfig::load(path)?,
        None => PlotterConfig::from_env()?,
    };
    config.prefetch = !cli.no_prefetch;

    let mut service_config = ServiceConfig::from_env()?;
    if let Some(url) = cli.url {
        service_config.base_url = url;
    }

    let session = Arc::new(PlotSession::new(config));
    let service = Arc::new(HttpDataService::new(service_config)?);
    let controller = ViewportController::new(Arc::clone(&session), service, Arc::new(PrintSink));
    controller.set_selected(cli.streams);

    match controller
        .request_repaint(cli.start, cli.end, cli.width, cli.no_prefetch)
        .await
    {
        RepaintOutcome::Rendered(_) => {}
        RepaintOutcome::Superseded(generation) => {
            eprintln!("repaint {} was superseded", generation);
        }
    }
    controller.stop_polling();

    let stats = session.stats();
    println!();
    println!("Cache Statistics:");
    println!("  - Points: {}", stats.total_points);
    println!("  - Streams: {}", stats.streams);
    println!("  - Tiers: {}", stats.tiers);
    println!("  - Records: {}", stats.records);
    println!("  - Requests issued: {}", stats.requests_issued);
    println!("  - Requests failed: {}", stats.requests_failed);
    println!("  - Cache hits: {}", stats.cache_hits);

    Ok(())
}
