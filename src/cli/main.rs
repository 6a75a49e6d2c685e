//! Placegrid command line driver.
//!
//! Loads places, builds the tile grid and runs point / containment /
//! extraction queries against a store directory.

mod load;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use placegrid::config::Config;
use placegrid::{
    BuildMode, ExtractionEngine, GridIndex, PipStrategy, PlaceStore, QueryEngine, TileId,
};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "placegrid")]
#[command(about = "Polygon store with bounding-box pruning and a 1-degree tile grid")]
struct Args {
    /// Store directory
    #[arg(long, default_value = "placegrid.db")]
    db: PathBuf,

    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every GeoJSON file under a directory
    Load { dir: PathBuf },

    /// Build grid cells over a tile range (config defaults to the world)
    Grid {
        #[arg(long, allow_hyphen_values = true)]
        min_x: Option<i32>,
        #[arg(long, allow_hyphen_values = true)]
        min_y: Option<i32>,
        #[arg(long, allow_hyphen_values = true)]
        max_x: Option<i32>,
        #[arg(long, allow_hyphen_values = true)]
        max_y: Option<i32>,
        /// Append to existing cells instead of rebuilding each tile
        #[arg(long)]
        additive: bool,
    },

    /// Places containing a point
    Pip {
        #[arg(allow_hyphen_values = true)]
        lon: f64,
        #[arg(allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, value_enum, default_value = "pruned")]
        strategy: Strategy,
    },

    /// Places contained by a place
    Children { id: i64 },

    /// Places containing a place
    Parents { id: i64 },

    /// Copy a place and its descendants into a new store
    Extract { target: PathBuf, root: i64 },

    /// Re-run validity repair over every geometry
    Repair,

    /// Simplify every geometry, preserving topology
    Simplify {
        #[arg(long)]
        tolerance: Option<f64>,
    },

    /// Print store statistics
    Stats,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Strategy {
    Exhaustive,
    Pruned,
    Grid,
}

impl From<Strategy> for PipStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Exhaustive => PipStrategy::Exhaustive,
            Strategy::Pruned => PipStrategy::Pruned,
            Strategy::Grid => PipStrategy::Grid,
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = Config::load_or_default(args.config.as_deref())?;

    let store = PlaceStore::open(&args.db, &config.store)
        .with_context(|| format!("Failed to open store at {}", args.db.display()))?;

    match args.command {
        Command::Load { dir } => {
            let report = load::load_directory(&store, &dir)?;
            print_json(&report)?;
        }
        Command::Grid {
            min_x,
            min_y,
            max_x,
            max_y,
            additive,
        } => {
            let min_x = min_x.unwrap_or(config.grid.min_x);
            let min_y = min_y.unwrap_or(config.grid.min_y);
            let max_x = max_x.unwrap_or(config.grid.max_x);
            let max_y = max_y.unwrap_or(config.grid.max_y);
            let mode = if additive || config.grid.additive {
                BuildMode::Additive
            } else {
                BuildMode::Replace
            };

            if let Some(threads) = config.grid.threads {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build_global()
                    .context("Failed to configure thread pool")?;
            }

            let total = TileId::range(min_x, min_y, max_x, max_y).len() as u64;
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tiles ({per_sec})",
                    )?
                    .progress_chars("#>-"),
            );

            let grid = GridIndex::new(&store).with_mode(mode);
            let report = grid.build_range_with(min_x, min_y, max_x, max_y, |_| pb.inc(1))?;
            pb.finish_with_message("Grid complete");
            print_json(&report)?;
        }
        Command::Pip { lon, lat, strategy } => {
            let ids = QueryEngine::new(&store).pip(lon, lat, strategy.into());
            print_places(&store, &ids)?;
        }
        Command::Children { id } => {
            let ids = QueryEngine::new(&store).find_children(id)?;
            print_places(&store, &ids)?;
        }
        Command::Parents { id } => {
            let ids = QueryEngine::new(&store).find_parents(id)?;
            print_places(&store, &ids)?;
        }
        Command::Extract { target, root } => {
            let target_store = PlaceStore::open(&target, &config.store)
                .with_context(|| format!("Failed to open target store at {}", target.display()))?;
            let report = ExtractionEngine::new(&store).extract(&target_store, root)?;
            target_store.close()?;
            info!("Extraction written to {}", target.display());
            print_json(&report)?;
        }
        Command::Repair => {
            let report = store.repair_all()?;
            print_json(&report)?;
        }
        Command::Simplify { tolerance } => {
            let tolerance = tolerance.unwrap_or(config.simplify.tolerance);
            let report = store.simplify_all(tolerance)?;
            print_json(&report)?;
        }
        Command::Stats => {
            let grid = GridIndex::new(&store);
            let with_geometry = store
                .read()
                .places()
                .filter(|p| p.geometry.is_some())
                .count();
            print_json(&serde_json::json!({
                "places": store.len(),
                "with_geometry": with_geometry,
                "cells": grid.cell_count(),
                "tiles": grid.tiles().len(),
            }))?;
        }
    }

    store.close()?;
    Ok(())
}

fn print_places(store: &PlaceStore, ids: &[i64]) -> Result<()> {
    let rows: Vec<serde_json::Value> = ids
        .iter()
        .filter_map(|id| store.get(*id))
        .map(|p| {
            serde_json::json!({
                "id": p.id,
                "name": p.name,
                "layer": p.layer,
            })
        })
        .collect();
    print_json(&rows)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
