pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xprop")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "SGP4 satellite propagation from two-line element sets", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Validate element sets and print the parsed elements")]
    Check {
        #[arg(help = "File with two- or three-line element sets")]
        file: PathBuf,
    },
    #[command(about = "Propagate to a single epoch")]
    Prop {
        #[arg(short, long, help = "File with the element set")]
        tle: PathBuf,

        #[arg(long, help = "Target time: RFC 3339 UTC or DS50 days")]
        time: String,

        #[arg(long, help = "Interpret --time as minutes since the element epoch")]
        mse: bool,

        #[arg(short, long, default_value = "eci", help = "Output frame (eci, j2k)")]
        frame: String,
    },
    #[command(about = "Generate an ephemeris over a time grid")]
    Ephem {
        #[arg(short, long, help = "File with one or more element sets")]
        tle: PathBuf,

        #[arg(long, help = "Grid start (RFC 3339 UTC)")]
        start: String,

        #[arg(long, help = "Grid end (RFC 3339 UTC)")]
        end: String,

        #[arg(long, help = "ISO-8601 step, e.g. PT8.5M; omit for a per-satellite step")]
        step: Option<String>,

        #[arg(short, long, default_value = "eci", help = "Output frame (eci, j2k)")]
        frame: String,

        #[arg(long, default_value_t = crate::stream::DEFAULT_CHUNK_SIZE, help = "Points per chunk")]
        chunk_size: usize,
    },
}
