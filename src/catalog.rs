use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::feature::{Ingested, PropertySchema, parse_collection};

const PARIS_CATALOG_BASE: &str = "https://opendata.paris.fr/api/explore/v2.1/catalog/datasets";

/// GeoJSON export URL of a Paris open-data dataset.
pub fn dataset_url(dataset: &str) -> String {
    format!("{}/{}/exports/geojson", PARIS_CATALOG_BASE, dataset)
}

/// Where a geometry document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometrySource {
    Url(String),
    Path(PathBuf),
}

impl GeometrySource {
    /// `http(s)://` locations are URLs, anything else is a local path.
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            GeometrySource::Url(location.to_string())
        } else {
            GeometrySource::Path(PathBuf::from(location))
        }
    }
}

/// Load and validate a feature collection, fetching through the on-disk
/// cache for remote sources. Fails fast: there is no retry and no partial
/// result.
pub fn load_geometry(
    source: &GeometrySource,
    schema: &PropertySchema,
    cache_dir: &Path,
) -> Result<Ingested> {
    let text = match source {
        GeometrySource::Path(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read geometry file {}", path.display()))?,
        GeometrySource::Url(url) => {
            std::fs::create_dir_all(cache_dir)?;
            let client = reqwest::blocking::Client::builder()
                .user_agent("paris-choropleth/0.1 (choropleth renderer)")
                .build()?;
            fetch_cached(&client, url, &cache_dir.join(cache_file_name(url)))?
        }
    };

    parse_collection(&text, schema).with_context(|| format!("Invalid geometry from {:?}", source))
}

/// Fetch a URL, using a cached file if it exists.
fn fetch_cached(
    client: &reqwest::blocking::Client,
    url: &str,
    cache_path: &Path,
) -> Result<String> {
    if cache_path.exists() {
        debug!(path = %cache_path.display(), "geometry cache hit");
        return std::fs::read_to_string(cache_path).context("Failed to read cache file");
    }

    info!(url, "fetching geometry");
    let response = client.get(url).send()?.error_for_status()?;
    let body = response.text()?;

    std::fs::write(cache_path, &body).context("Failed to write cache file")?;
    Ok(body)
}

/// Filesystem-safe cache name derived from the URL.
fn cache_file_name(url: &str) -> String {
    let stem = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect::<String>();
    format!("{}.geojson", stem.trim_end_matches(".geojson"))
}
