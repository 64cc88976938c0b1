use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use mosaic_cache::{TileGrid, ViewerConfig};
use mosaic_core::{
    DirectorySource, HttpSource, MemorySource, MosaicSession, MosaicSource, SessionEvent,
    SessionState, TileRequest,
};
use mosaic_render::{CellCoord, MosaicMetadata, Rect, Size};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod synthetic;

use synthetic::SyntheticMosaic;

#[derive(Debug, Parser)]
#[command(name = "mosaic-cli")]
#[command(about = "Inspect tiled mosaics and simulate viewport sessions")]
pub struct Cli {
    /// Log scheduling decisions (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the zoom-level catalog of a mosaic as JSON.
    Info {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(value_name = "IMAGE_ID")]
        image_id: String,
    },
    /// Load a mosaic, replay viewport pans and print the resulting tile window.
    Simulate {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(value_name = "IMAGE_ID")]
        image_id: String,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Run a session against a generated in-memory mosaic.
    Demo {
        #[arg(long, default_value_t = 2048)]
        width: u32,
        #[arg(long, default_value_t = 2048)]
        height: u32,
        #[arg(long, default_value_t = 256)]
        tile: u32,
        #[arg(long, default_value_t = 3)]
        levels: u32,
        /// Make a cell of every level fail (ROW,COL)
        #[arg(long = "fail", value_name = "ROW,COL", value_parser = parse_cell)]
        failing: Vec<CellCoord>,
        /// Simulated fetch latency in milliseconds
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Write a generated mosaic to a directory.
    Generate {
        #[arg(value_name = "ROOT")]
        root: PathBuf,
        #[arg(value_name = "IMAGE_ID")]
        image_id: String,
        #[arg(long, default_value_t = 2048)]
        width: u32,
        #[arg(long, default_value_t = 2048)]
        height: u32,
        #[arg(long, default_value_t = 256)]
        tile: u32,
        #[arg(long, default_value_t = 3)]
        levels: u32,
    },
    /// Print the effective viewer configuration as TOML.
    Config {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

/// Where mosaics are read from
#[derive(Debug, Args)]
struct SourceArgs {
    /// Directory holding `{image_id}/metadata.json` and tiles
    #[arg(long, value_name = "DIR", required_unless_present = "url", conflicts_with = "url")]
    root: Option<PathBuf>,
    /// Base URL of a mosaic server
    #[arg(long, value_name = "URL")]
    url: Option<String>,
    /// Bearer token sent with every request
    #[arg(long, requires = "url")]
    token: Option<String>,
    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    http_timeout: u64,
}

/// Viewport script and session tuning
#[derive(Debug, Args)]
struct SessionArgs {
    /// Initial viewport (X,Y,WIDTH,HEIGHT)
    #[arg(long, value_name = "X,Y,W,H", value_parser = parse_rect, default_value = "0,0,512,512")]
    viewport: Rect,
    /// Viewport after a pan; repeat to pan several times
    #[arg(long = "pan", value_name = "X,Y,W,H", value_parser = parse_rect)]
    pans: Vec<Rect>,
    /// Zoom level to switch to before the first viewport report
    #[arg(long)]
    zoom: Option<u32>,
    /// Prefetch margin in tiles
    #[arg(long)]
    buffer: Option<u32>,
    /// Fetch worker threads (0 runs fetches on the main thread)
    #[arg(long)]
    workers: Option<usize>,
    /// TOML configuration file (defaults come from MOSAIC_* variables)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Seconds to wait for each step to settle
    #[arg(long, default_value_t = 30)]
    timeout: u64,
    /// Include the change notifications in the output
    #[arg(long)]
    events: bool,
}

#[derive(Debug, Serialize)]
struct SessionOutput {
    image_id: String,
    state: String,
    zoom_index: Option<u32>,
    generation: u64,
    canvas: Option<Size>,
    passes: Vec<PassOutput>,
    loaded: Vec<CellCoord>,
    loading: Vec<CellCoord>,
    failed: Vec<CellCoord>,
    memory_used: usize,
    evictions: u64,
    stale_discards: u64,
    fetches: FetchOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<SessionEvent>>,
}

#[derive(Debug, Serialize)]
struct PassOutput {
    viewport: Rect,
    requested: usize,
    evicted: usize,
}

#[derive(Debug, Serialize)]
struct FetchOutput {
    submitted: u64,
    completed: u64,
    failed: u64,
    skipped: u64,
    cancelled: u64,
}

#[derive(Debug, Serialize)]
struct GenerateOutput {
    root: String,
    image_id: String,
    zoom_levels: usize,
    tiles: usize,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { source, image_id } => run_info(&source, &image_id),
        Commands::Simulate { source, image_id, session } => {
            let source = open_source(&source)?;
            run_session(source, &image_id, &session)
        }
        Commands::Demo { width, height, tile, levels, failing, latency_ms, session } => {
            let mosaic =
                SyntheticMosaic::new("demo", width, height).with_tile_size(tile).with_levels(levels);
            let source = demo_source(&mosaic, &failing, Duration::from_millis(latency_ms))?;
            run_session(source, &mosaic.image_id, &session)
        }
        Commands::Generate { root, image_id, width, height, tile, levels } => {
            let mosaic =
                SyntheticMosaic::new(image_id, width, height).with_tile_size(tile).with_levels(levels);
            run_generate(&root, &mosaic)
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml().context("failed to serialize configuration")?);
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

fn run_info(args: &SourceArgs, image_id: &str) -> Result<()> {
    let source = open_source(args)?;
    let metadata = source
        .fetch_metadata(image_id)
        .with_context(|| format!("failed to load metadata for '{image_id}'"))?;

    let json = serde_json::to_string_pretty(&metadata)?;
    println!("{json}");

    Ok(())
}

fn run_session(source: Arc<dyn MosaicSource>, image_id: &str, args: &SessionArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(buffer) = args.buffer {
        config = config.with_buffer_tiles(buffer);
    }
    if let Some(workers) = args.workers {
        config = config.with_fetch_workers(workers);
    }
    debug!("session config: {:?}", config);

    let timeout = Duration::from_secs(args.timeout);
    let mut session =
        MosaicSession::with_source(source, config).context("failed to start fetch workers")?;
    let events = args.events.then(|| session.subscribe());

    session
        .load_mosaic_blocking(image_id, timeout)
        .with_context(|| format!("failed to load mosaic '{image_id}'"))?;

    if let Some(zoom) = args.zoom {
        session.select_zoom_level(zoom).context("failed to select zoom level")?;
    }

    let mut passes = Vec::with_capacity(args.pans.len() + 1);
    for viewport in std::iter::once(args.viewport).chain(args.pans.iter().copied()) {
        let update = session.pan_ended(viewport)?;
        session.wait_idle(timeout).context("tile fetches did not settle")?;
        info!(
            "viewport {:?}: {} requested, {} evicted",
            viewport, update.requested, update.evicted
        );
        passes.push(PassOutput { viewport, requested: update.requested, evicted: update.evicted });
    }

    let output = snapshot(&session, image_id, passes, events.map(|rx| rx.try_iter().collect()));
    let json = serde_json::to_string_pretty(&output)?;
    println!("{json}");

    Ok(())
}

fn run_generate(root: &Path, mosaic: &SyntheticMosaic) -> Result<()> {
    let metadata = mosaic.metadata()?;
    let source = DirectorySource::new(root);

    source
        .write_metadata(&metadata)
        .with_context(|| format!("failed to write metadata under {}", root.display()))?;
    let tiles = mosaic.for_each_tile(&metadata, |zoom_index, cell, bytes| {
        let request = TileRequest::new(&mosaic.image_id, zoom_index, cell, &metadata.extension);
        source
            .write_tile(&request, &bytes)
            .with_context(|| format!("failed to write tile {cell} of level {zoom_index}"))?;
        Ok(())
    })?;

    let payload = GenerateOutput {
        root: root.display().to_string(),
        image_id: mosaic.image_id.clone(),
        zoom_levels: metadata.zoom_levels().len(),
        tiles,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    Ok(())
}

fn open_source(args: &SourceArgs) -> Result<Arc<dyn MosaicSource>> {
    if let Some(url) = &args.url {
        let mut source = HttpSource::with_timeout(url, Duration::from_secs(args.http_timeout));
        if let Some(token) = &args.token {
            source = source.with_token(token);
        }
        return Ok(Arc::new(source));
    }

    let root = args.root.as_deref().context("either --root or --url is required")?;
    if !root.is_dir() {
        anyhow::bail!("mosaic root is not a directory: {}", root.display());
    }
    Ok(Arc::new(DirectorySource::new(root)))
}

fn demo_source(
    mosaic: &SyntheticMosaic,
    failing: &[CellCoord],
    latency: Duration,
) -> Result<Arc<dyn MosaicSource>> {
    let metadata: MosaicMetadata = mosaic.metadata()?;
    let source = MemorySource::new().with_latency(latency);

    mosaic.for_each_tile(&metadata, |zoom_index, cell, bytes| {
        source.insert_tile(&mosaic.image_id, zoom_index, cell, bytes);
        Ok(())
    })?;
    for level in metadata.zoom_levels() {
        for cell in failing {
            source.fail_tile(&mosaic.image_id, level.index, *cell);
        }
    }
    source.insert_metadata(metadata);

    Ok(Arc::new(source))
}

fn load_config(path: Option<&Path>) -> Result<ViewerConfig> {
    match path {
        Some(path) => ViewerConfig::from_file(path)
            .with_context(|| format!("failed to read configuration from {}", path.display())),
        None => ViewerConfig::from_env().context("invalid MOSAIC_* environment variable"),
    }
}

fn snapshot(
    session: &MosaicSession,
    image_id: &str,
    passes: Vec<PassOutput>,
    events: Option<Vec<SessionEvent>>,
) -> SessionOutput {
    let grid = session.grid();
    let cells = |select: fn(&TileGrid) -> Vec<CellCoord>| grid.map(select).unwrap_or_default();
    let grid_stats = session.grid_stats().unwrap_or_default();
    let fetch_stats = session.scheduler().stats();

    SessionOutput {
        image_id: image_id.to_string(),
        state: state_label(session.state()).to_string(),
        zoom_index: session.current_zoom_level().map(|level| level.index),
        generation: session.generation(),
        canvas: session.canvas_size(),
        passes,
        loaded: cells(TileGrid::loaded_cells),
        loading: cells(TileGrid::loading_cells),
        failed: cells(TileGrid::failed_cells),
        memory_used: grid_stats.memory_used,
        evictions: grid_stats.evictions,
        stale_discards: grid_stats.stale_discards,
        fetches: FetchOutput {
            submitted: fetch_stats.submitted,
            completed: fetch_stats.completed,
            failed: fetch_stats.failed,
            skipped: fetch_stats.skipped,
            cancelled: fetch_stats.cancelled,
        },
        events,
    }
}

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Uninitialized => "uninitialized",
        SessionState::MetadataLoading => "metadata_loading",
        SessionState::Ready { .. } => "ready",
    }
}

fn parse_rect(value: &str) -> Result<Rect, String> {
    let parts = parse_numbers::<f64>(value, 4)?;
    let rect = Rect::new(parts[0], parts[1], parts[2], parts[3]);
    if rect.width < 0.0 || rect.height < 0.0 {
        return Err(format!("negative viewport size in '{value}'"));
    }
    Ok(rect)
}

fn parse_cell(value: &str) -> Result<CellCoord, String> {
    let parts = parse_numbers::<u32>(value, 2)?;
    Ok(CellCoord::new(parts[0], parts[1]))
}

fn parse_numbers<T: std::str::FromStr>(value: &str, count: usize) -> Result<Vec<T>, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<T>())
        .collect::<Result<Vec<T>, _>>()
        .map_err(|_| format!("'{value}' is not a list of numbers"))?;
    if parts.len() != count {
        return Err(format!("expected {count} comma-separated values, got '{value}'"));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rect() {
        assert_eq!(parse_rect("0,0,512,256").unwrap(), Rect::new(0.0, 0.0, 512.0, 256.0));
        assert_eq!(parse_rect(" -10, 5.5 ,20,20").unwrap(), Rect::new(-10.0, 5.5, 20.0, 20.0));
        assert!(parse_rect("0,0,512").is_err());
        assert!(parse_rect("0,0,a,1").is_err());
        assert!(parse_rect("0,0,-1,1").is_err());
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell("2,3").unwrap(), CellCoord::new(2, 3));
        assert!(parse_cell("2").is_err());
        assert!(parse_cell("-1,0").is_err());
    }

    #[test]
    fn test_demo_session_in_process() {
        let mosaic = SyntheticMosaic::new("demo", 512, 512).with_tile_size(128);
        let source = demo_source(&mosaic, &[CellCoord::new(0, 0)], Duration::ZERO).unwrap();
        let config = ViewerConfig::default().with_fetch_workers(0);
        let mut session = MosaicSession::with_source(source, config).unwrap();

        session.load_mosaic_blocking("demo", Duration::from_secs(5)).unwrap();
        session.pan_ended(Rect::new(0.0, 0.0, 256.0, 256.0)).unwrap();
        session.wait_idle(Duration::from_secs(5)).unwrap();

        let output = snapshot(&session, "demo", Vec::new(), None);
        assert_eq!(output.state, "ready");
        assert_eq!(output.failed, vec![CellCoord::new(0, 0)]);
        assert_eq!(output.loaded.len(), 8);
        assert!(output.loading.is_empty());
        assert_eq!(output.fetches.submitted, 10);
    }
}
