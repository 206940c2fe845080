//! limitomo CLI
//!
//! Command-line interface for limited-angle tomography reconstruction and
//! statistical refinement.
//!
//! # Usage
//!
//! ```bash
//! # Forward-project a stored volume
//! limitomo tomo project phantom.f32 --angle-count 24
//!
//! # Reconstruct a multi-resolution family
//! limitomo tomo reconstruct phantom.f32 --method sirt --iterations 100
//!
//! # Run the full refinement pipeline
//! limitomo tomo refine phantom.f32 --factors 1,2,4 --seed 7
//!
//! # Inspect a stored volume
//! limitomo tomo info phantom.f32
//! ```

use clap::{Parser, Subcommand};

pub mod tomo;

/// limitomo command line interface
#[derive(Parser, Debug)]
#[command(name = "limitomo")]
#[command(author, version, about = "Limited-angle tomography reconstruction and refinement")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Tomography reconstruction commands
    #[command(subcommand)]
    Tomo(tomo::TomoCommand),

    /// Display version information
    Version,
}
