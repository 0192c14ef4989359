use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use paris_choropleth::catalog::{GeometrySource, load_geometry};
use paris_choropleth::config::{Preset, WidgetConfig};
use paris_choropleth::model::Model;
use paris_choropleth::widget::ChoroplethWidget;

#[derive(Parser)]
#[command(about = "Render Paris open-data choropleths to SVG")]
struct Cli {
    /// Built-in widget configuration
    #[arg(long, value_enum, conflicts_with = "config")]
    preset: Option<Preset>,

    /// TOML widget configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Geometry URL or local GeoJSON file, replacing the configured source
    #[arg(long)]
    geometry: Option<String>,

    /// JSON object of area code to value. Repeat to replay successive model
    /// changes; each one renders a frame
    #[arg(long)]
    values: Vec<PathBuf>,

    /// JSON array of {lon, lat, alt} samples for the point overlay
    #[arg(long)]
    points: Option<PathBuf>,

    /// Output SVG path
    #[arg(long, default_value = "choropleth.svg")]
    output: PathBuf,

    /// Cache directory for fetched geometry
    #[arg(long, default_value = ".cache")]
    cache_dir: PathBuf,

    /// Pointer position on the surface, as `x,y`
    #[arg(long, value_parser = parse_point)]
    hover: Option<(f64, f64)>,
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got {s:?}"))?;
    let parse = |v: &str| v.trim().parse::<f64>().map_err(|e| format!("{v:?}: {e}"));
    Ok((parse(x)?, parse(y)?))
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// `out.svg` for a single frame, `out-000.svg`, `out-001.svg`... otherwise.
fn frame_path(output: &Path, frame: usize, frames: usize) -> PathBuf {
    if frames <= 1 {
        return output.to_path_buf();
    }
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    let ext = output
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "svg".to_string());
    output.with_file_name(format!("{stem}-{frame:03}.{ext}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match (&cli.config, cli.preset) {
        (Some(path), _) => WidgetConfig::load_from_file(path)?,
        (None, preset) => preset.unwrap_or(Preset::ArrondissementsPermits).config(),
    };
    let location = cli.geometry.clone().unwrap_or_else(|| config.geometry.url.clone());
    let source = GeometrySource::parse(&location);

    let spinner = ProgressBar::new_spinner();
    spinner.set_message(format!("Loading geometry from {location}"));
    spinner.enable_steady_tick(Duration::from_millis(100));
    let ingested = load_geometry(&source, &config.geometry.schema, &cli.cache_dir)?;
    spinner.finish_and_clear();
    info!(
        features = ingested.collection.len(),
        rejected = ingested.rejected.len(),
        "geometry loaded"
    );

    let model = Model::new();
    if let (Some(path), Some(points)) = (&cli.points, &config.points) {
        model.set(&points.key, read_json(path)?);
    } else if cli.points.is_some() {
        bail!("--points given but the configuration has no point overlay");
    }
    let mut frames = cli.values.iter();
    if let Some(first) = frames.next() {
        model.set(&config.value_key, read_json(first)?);
    }

    let total = cli.values.len().max(1);
    let value_key = config.value_key.clone();
    let widget = ChoroplethWidget::mount(&model, ingested.collection, config)?;

    let progress = ProgressBar::new(total as u64);
    progress.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")?);
    for frame in 0..total {
        if frame > 0 {
            if let Some(path) = frames.next() {
                model.set(&value_key, read_json(path)?);
            }
        }
        if let Some((x, y)) = cli.hover {
            match widget.pointer_at(x, y) {
                Some(hover) => info!(feature = %hover.feature, title = %hover.title, "pointer"),
                None => info!(x, y, "pointer is over no area"),
            }
        }
        let path = frame_path(&cli.output, frame, total);
        std::fs::write(&path, widget.to_svg())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        progress.set_message(path.display().to_string());
        progress.inc(1);
    }
    progress.finish_and_clear();

    let removed = widget.teardown();
    info!(frames = total, removed, "done");
    Ok(())
}
