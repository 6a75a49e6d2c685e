//! Loading places from a directory of GeoJSON files.
//!
//! Each file holds a Feature or a FeatureCollection. Features need an
//! integer `id` property (or feature id) and a `name`; `layer` is optional.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use geojson::{Feature, GeoJson};
use tracing::{info, warn};
use walkdir::WalkDir;

use placegrid::geometry::geojson_to_multipolygon;
use placegrid::report::{BatchReport, ItemFailure};
use placegrid::{Place, PlaceStore};

/// Insert every feature under `dir`, continuing past bad files and
/// features.
pub fn load_directory(store: &PlaceStore, dir: &Path) -> Result<BatchReport> {
    info!("Loading GeoJSON files from {}", dir.display());

    let mut report = BatchReport::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.context("Failed to walk input directory")?;
        let path = entry.path();
        let is_geojson = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "geojson" || e == "json");
        if !entry.file_type().is_file() || !is_geojson {
            continue;
        }

        let (places, failures) = match read_places(path) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                report.failures.push(ItemFailure {
                    item: path.display().to_string(),
                    error: format!("{:#}", e),
                });
                continue;
            }
        };
        report.failures.extend(failures);
        report.merge(store.insert_batch(places)?);
    }

    info!(
        "Loaded {} places, {} failures",
        report.succeeded.len(),
        report.failures.len()
    );
    Ok(report)
}

fn read_places(path: &Path) -> Result<(Vec<Place>, Vec<ItemFailure>)> {
    let content = fs::read_to_string(path).context("Failed to read file")?;
    let geojson: GeoJson = content.parse().context("Failed to parse GeoJSON")?;

    let features = match geojson {
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Geometry(_) => anyhow::bail!("bare geometry has no id or name"),
    };

    let mut places = Vec::with_capacity(features.len());
    let mut failures = Vec::new();
    for (n, feature) in features.into_iter().enumerate() {
        match feature_to_place(feature) {
            Ok(place) => places.push(place),
            Err(e) => failures.push(ItemFailure {
                item: format!("{}#{}", path.display(), n),
                error: format!("{:#}", e),
            }),
        }
    }
    Ok((places, failures))
}

fn feature_to_place(feature: Feature) -> Result<Place> {
    let id = feature
        .property("id")
        .and_then(|v| v.as_i64())
        .or_else(|| match &feature.id {
            Some(geojson::feature::Id::Number(n)) => n.as_i64(),
            Some(geojson::feature::Id::String(s)) => s.parse().ok(),
            None => None,
        })
        .context("Feature has no integer id")?;
    let name = feature
        .property("name")
        .and_then(|v| v.as_str())
        .context("Feature has no name")?
        .to_string();
    let layer = feature
        .property("layer")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let mut place = Place::new(id, name);
    place.layer = layer;
    if let Some(geometry) = feature.geometry {
        place.geometry = Some(geojson_to_multipolygon(geometry)?);
    }
    Ok(place)
}
