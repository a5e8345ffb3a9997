//! CLI commands for roadloom.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::cancel::CancellationToken;
use crate::components::run_components;
use crate::conditionals::{check_conditionals, dump_conditionals};
use crate::config::ProfileConfig;
use crate::pipeline::{run_build, BuildConfig};

#[derive(Parser)]
#[command(name = "roadloom")]
#[command(about = "Edge-based graph construction for street networks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the edge-based graph from an extracted street network
    Build {
        /// Input network artifact (.rln)
        input: PathBuf,

        /// Output directory for the edge-based artifacts
        #[arg(short, long, default_value = ".")]
        outdir: PathBuf,

        /// Traffic signal penalty in deciseconds
        #[arg(long, default_value = "20")]
        signal_penalty: u32,

        /// U-turn penalty in deciseconds
        #[arg(long, default_value = "200")]
        uturn_penalty: u32,

        /// Access-restriction penalty in deciseconds
        #[arg(long, default_value = "600")]
        access_penalty: u32,

        /// Skip turn classification (emit angle-only directions)
        #[arg(long)]
        no_classify: bool,

        /// Worker threads (0 = one per core)
        #[arg(short, long, default_value = "0")]
        threads: usize,
    },
    /// Write disconnected components as shapefile polylines
    Components {
        /// Input network artifact (.rln)
        input: PathBuf,

        /// Output path prefix (writes <prefix>.shp/.shx/.dbf)
        #[arg(short, long, default_value = "component")]
        output: PathBuf,
    },
    /// Conditional-restriction tooling
    Conditionals {
        #[command(subcommand)]
        command: ConditionalCommands,
    },
}

#[derive(Subcommand)]
pub enum ConditionalCommands {
    /// Dump conditional restrictions from the input artifact as CSV
    Dump {
        /// Input network artifact (.rln)
        input: PathBuf,
        /// Output CSV
        csv: PathBuf,
    },
    /// Filter a dumped CSV down to the restrictions active at an instant
    Check {
        /// Input CSV (from `conditionals dump`)
        csv_in: PathBuf,
        /// Output CSV
        csv_out: PathBuf,
        /// GeoJSON timezone polygons with an `offset` seconds property
        #[arg(long)]
        tz_shapes: Option<PathBuf>,
        /// UTC instant as seconds since the epoch
        #[arg(long)]
        utc_time: i64,
        /// Override the value column of matching rows
        #[arg(long)]
        value: Option<u32>,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Build {
                input,
                outdir,
                signal_penalty,
                uturn_penalty,
                access_penalty,
                no_classify,
                threads,
            } => {
                if threads > 0 {
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(threads)
                        .build_global()
                        .ok();
                }
                let config = BuildConfig {
                    input,
                    outdir,
                    profile: ProfileConfig {
                        traffic_signal_penalty: signal_penalty,
                        uturn_penalty,
                        access_restriction_penalty: access_penalty,
                        classify_turns: !no_classify,
                    },
                };
                run_build(&config, &CancellationToken::new())?;
                Ok(())
            }
            Commands::Components { input, output } => {
                run_components(&input, &output)?;
                Ok(())
            }
            Commands::Conditionals { command } => match command {
                ConditionalCommands::Dump { input, csv } => {
                    let written = dump_conditionals(&input, &csv)?;
                    println!("{} conditional restrictions written to {}", written, csv.display());
                    Ok(())
                }
                ConditionalCommands::Check {
                    csv_in,
                    csv_out,
                    tz_shapes,
                    utc_time,
                    value,
                } => {
                    let stats = check_conditionals(
                        &csv_in,
                        &csv_out,
                        tz_shapes.as_deref(),
                        utc_time,
                        value,
                    )?;
                    println!(
                        "{} active, {} inactive, {} unparsed, {} outside timezone shapes",
                        stats.active, stats.inactive, stats.unparsed, stats.outside_shapes
                    );
                    Ok(())
                }
            },
        }
    }
}
