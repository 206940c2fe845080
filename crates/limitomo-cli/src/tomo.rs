//! Tomography CLI subcommands
//!
//! This module provides CLI commands for limited-angle tomography work:
//! - Forward projection of stored volumes
//! - Multi-resolution family reconstruction
//! - Statistical refinement (mixture trends + annealing)
//! - Volume inspection

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

use limitomo_core::{
    utils, AlgorithmKind, GeometryKind, Mask, Volume, VolumeGeometry, VolumeStore,
};
use limitomo_gmm::Gmm;
use limitomo_recon::{
    run_family, storage, AnnealConfig, AnnealingPhase, CpuEngine, FamilyConfig, MemberReport,
    PipelineConfig, Projector, RawVolumeStore, RefinementPipeline, RunReport,
};

/// Tomography subcommand
#[derive(Subcommand, Debug)]
pub enum TomoCommand {
    /// Forward-project a stored volume into a sinogram
    Project(ProjectArgs),

    /// Reconstruct a multi-resolution family from a stored volume
    Reconstruct(ReconstructArgs),

    /// Run the full refinement pipeline: family, mixture trends, annealing
    Refine(RefineArgs),

    /// Inspect a stored volume
    Info(InfoArgs),
}

/// Angle selection shared by the projection-based commands
#[derive(Args, Debug)]
pub struct AngleArgs {
    /// Number of angles, spread evenly over the half rotation
    #[arg(short = 'n', long, default_value = "180", conflicts_with = "angle_list")]
    pub angle_count: usize,

    /// Explicit comma-separated angle list in radians
    #[arg(long)]
    pub angle_list: Option<String>,
}

impl AngleArgs {
    /// The acquisition angle sequence these arguments describe.
    pub fn resolve(&self) -> Result<Vec<f64>> {
        if let Some(list) = &self.angle_list {
            return parse_angle_list(list);
        }
        if self.angle_count == 0 {
            anyhow::bail!("--angle-count must be at least 1");
        }
        Ok(utils::angle_span(self.angle_count))
    }
}

/// Arguments for the project command
#[derive(Args, Debug)]
pub struct ProjectArgs {
    /// Input volume path
    pub input: PathBuf,

    #[command(flatten)]
    pub angles: AngleArgs,

    /// Replace this sentinel intensity with zero after reading the input
    #[arg(long)]
    pub fill_sentinel: Option<f32>,

    /// Output sinogram path (defaults to `<input stem>_sino.f32`)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the reconstruct command
#[derive(Args, Debug)]
pub struct ReconstructArgs {
    /// Input volume path
    pub input: PathBuf,

    /// Reconstruction method
    #[arg(short, long, value_enum, default_value = "sirt")]
    pub method: MethodArg,

    #[command(flatten)]
    pub angles: AngleArgs,

    /// Iteration count for every family member
    #[arg(short, long, default_value = "100")]
    pub iterations: usize,

    /// Comma-separated angular subsampling factors
    #[arg(short, long, default_value = "1,2,3,4")]
    pub factors: String,

    /// Do not restrict updates to the inscribed cylinder
    #[arg(long)]
    pub no_circle_mask: bool,

    /// Replace this sentinel intensity with zero after reading the input
    #[arg(long)]
    pub fill_sentinel: Option<f32>,

    /// Output directory (defaults to the input's directory)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Arguments for the refine command
#[derive(Args, Debug)]
pub struct RefineArgs {
    /// Input volume path
    pub input: PathBuf,

    /// Reconstruction method for the family members
    #[arg(short, long, value_enum, default_value = "sirt")]
    pub method: MethodArg,

    #[command(flatten)]
    pub angles: AngleArgs,

    /// Iteration count for every family member
    #[arg(short, long, default_value = "100")]
    pub iterations: usize,

    /// Comma-separated angular subsampling factors
    #[arg(short, long, default_value = "1,2,3,4")]
    pub factors: String,

    /// Do not restrict updates to the inscribed cylinder
    #[arg(long)]
    pub no_circle_mask: bool,

    /// Replace this sentinel intensity with zero after reading the input
    #[arg(long)]
    pub fill_sentinel: Option<f32>,

    /// Comma-separated component count candidates for the mixture fits
    #[arg(long, default_value = "5")]
    pub components: String,

    /// Histogram bin count for the mixture fits
    #[arg(long, default_value = "200")]
    pub bins: usize,

    /// Relative residual the mixture fits must reach
    #[arg(long, default_value = "0.25")]
    pub fit_tolerance: f64,

    /// Seed for clustering and annealing
    #[arg(short, long, default_value = "0")]
    pub seed: u64,

    /// Annealing start temperature
    #[arg(long, default_value = "100.0")]
    pub initial_temperature: f64,

    /// Annealing floor temperature
    #[arg(long, default_value = "10.0")]
    pub floor_temperature: f64,

    /// Temperature decrement per accepted transition
    #[arg(long, default_value = "1.0")]
    pub cooling_step: f64,

    /// Per-voxel perturbation standard deviation
    #[arg(long, default_value = "10.0")]
    pub perturbation_sd: f64,

    /// Hard cap on annealing trials
    #[arg(long, default_value = "100000")]
    pub max_trials: usize,

    /// Skip the trend-derived prior field
    #[arg(long)]
    pub no_prior: bool,

    /// Output directory (defaults to the input's directory)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Arguments for the info command
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Volume path to inspect
    pub input: PathBuf,
}

/// Reconstruction method argument enum for CLI
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum MethodArg {
    Sirt,
    Cgls,
}

impl From<MethodArg> for AlgorithmKind {
    fn from(val: MethodArg) -> Self {
        match val {
            MethodArg::Sirt => AlgorithmKind::Sirt,
            MethodArg::Cgls => AlgorithmKind::Cgls,
        }
    }
}

// ============================================================================
// Display Structs for Tables
// ============================================================================

/// Family member display row
#[derive(Tabled)]
struct MemberRow {
    #[tabled(rename = "Factor")]
    factor: usize,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Angles")]
    angles: usize,
    #[tabled(rename = "Density")]
    density: String,
    #[tabled(rename = "Support Mean")]
    support_mean: String,
    #[tabled(rename = "Output")]
    output: String,
}

/// Refinement level display row
#[derive(Tabled)]
struct LevelRow {
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Angles")]
    angles: usize,
    #[tabled(rename = "Density")]
    density: String,
    #[tabled(rename = "Components")]
    components: usize,
    #[tabled(rename = "Mixture")]
    mixture: String,
}

// ============================================================================
// Command Execution
// ============================================================================

/// Execute a tomography command
pub fn execute(command: TomoCommand) -> Result<()> {
    match command {
        TomoCommand::Project(args) => execute_project(args),
        TomoCommand::Reconstruct(args) => execute_reconstruct(args),
        TomoCommand::Refine(args) => execute_refine(args),
        TomoCommand::Info(args) => execute_info(args),
    }
}

/// Execute the project command
fn execute_project(args: ProjectArgs) -> Result<()> {
    let store = RawVolumeStore::new();
    let volume = store.read_volume(&args.input).context("reading input volume")?;
    let volume = preprocess(volume, args.fill_sentinel)?;
    let angles = args.angles.resolve()?;

    println!(
        "{} Projecting {} over {} angles...",
        "[INFO]".blue(),
        args.input.display(),
        angles.len()
    );

    let engine = CpuEngine::new();
    let mut projector = Projector::new(&engine);
    projector
        .set_input_volume(&volume)
        .context("uploading input volume")?;
    let sinogram = projector
        .project(angles, GeometryKind::Parallel3d)
        .context("forward projection")?;

    let output = args
        .output
        .unwrap_or_else(|| args.input.with_file_name(format!("{}_sino.f32", input_stem(&args.input))));
    let output = storage::unique_path(&output);

    let shape = sinogram.geometry().sinogram_shape();
    let as_array = Volume::new(VolumeGeometry::from_shape(shape)?, sinogram.into_data())?;
    store
        .write_volume(&output, &as_array)
        .context("writing sinogram")?;

    println!(
        "{} Sinogram {}x{}x{} written to {}",
        "[OK]".green().bold(),
        shape[0],
        shape[1],
        shape[2],
        output.display().to_string().cyan()
    );
    Ok(())
}

/// Execute the reconstruct command
fn execute_reconstruct(args: ReconstructArgs) -> Result<()> {
    let store = RawVolumeStore::new();
    let volume = store.read_volume(&args.input).context("reading input volume")?;
    let volume = preprocess(volume, args.fill_sentinel)?;
    let angles = args.angles.resolve()?;
    let factors = parse_index_list(&args.factors).context("parsing --factors")?;

    let config = FamilyConfig {
        factors,
        algorithm: args.method.into(),
        iterations: args.iterations,
        circle_mask: !args.no_circle_mask,
    };

    println!(
        "{} Reconstructing {} family member(s) with {} ({} iterations, {} angles)...",
        "[INFO]".blue(),
        config.factors.len(),
        config.algorithm,
        config.iterations,
        angles.len()
    );

    let engine = CpuEngine::new();
    let family = run_family(&engine, &volume, &angles, &config).context("family reconstruction")?;

    let dir = output_dir(args.output_dir.as_ref(), &args.input);
    std::fs::create_dir_all(&dir).context("creating output directory")?;
    let stem = input_stem(&args.input);

    let mut report = RunReport::new(config.algorithm, config.iterations);
    let mut rows = Vec::with_capacity(family.len());
    for member in family.values() {
        let name = member_file_name(&stem, config.algorithm, config.iterations, member.angle_count);
        let path = storage::unique_path(&dir.join(name));
        store
            .write_volume(&path, &member.volume)
            .context("writing member volume")?;

        let support_mean =
            Mask::inscribed_cylinder(member.volume.geometry()).masked_mean(&member.volume)?;
        rows.push(MemberRow {
            factor: member.factor,
            label: member.label.clone(),
            angles: member.angle_count,
            density: format!("{:.3}", member.density),
            support_mean: format!("{support_mean:.2}"),
            output: path.display().to_string(),
        });
        report.members.push(MemberReport {
            label: member.label.clone(),
            factor: member.factor,
            angle_count: member.angle_count,
            density: member.density,
            volume_path: path,
            mixture: None,
            histogram: None,
        });
    }

    let count = rows.len();
    println!();
    println!("{}", Table::new(rows).with(Style::rounded()));

    if let Some(report_path) = &args.report {
        report.write(report_path).context("writing run report")?;
        println!(
            "{} Report written to {}",
            "[OK]".green().bold(),
            report_path.display()
        );
    }
    println!(
        "{} Family of {} reconstruction(s) complete",
        "[OK]".green().bold(),
        count
    );
    Ok(())
}

/// Execute the refine command
fn execute_refine(args: RefineArgs) -> Result<()> {
    let store = RawVolumeStore::new();
    let volume = store.read_volume(&args.input).context("reading input volume")?;
    let volume = preprocess(volume, args.fill_sentinel)?;
    let angles = args.angles.resolve()?;
    let factors = parse_index_list(&args.factors).context("parsing --factors")?;
    let candidates = parse_index_list(&args.components).context("parsing --components")?;

    let mut config = PipelineConfig {
        family: FamilyConfig {
            factors,
            algorithm: args.method.into(),
            iterations: args.iterations,
            circle_mask: !args.no_circle_mask,
        },
        component_candidates: candidates,
        histogram_bins: args.bins,
        seed: args.seed,
        use_prior: !args.no_prior,
        anneal: AnnealConfig {
            initial_temperature: args.initial_temperature,
            floor_temperature: args.floor_temperature,
            cooling_step: args.cooling_step,
            perturbation_sd: args.perturbation_sd,
            max_iterations: args.max_trials,
            seed: args.seed,
            ..AnnealConfig::default()
        },
        ..PipelineConfig::default()
    };
    config.fit.tolerance = args.fit_tolerance;

    println!(
        "{} Refining {} ({} family member(s), seed {})...",
        "[INFO]".blue(),
        args.input.display(),
        config.family.factors.len(),
        args.seed
    );

    let engine = CpuEngine::new();
    let pipeline = RefinementPipeline::new(&engine, config.clone());
    let outcome = pipeline.run(&volume, &angles).context("refinement pipeline")?;

    let dir = output_dir(args.output_dir.as_ref(), &args.input);
    std::fs::create_dir_all(&dir).context("creating output directory")?;
    let stem = input_stem(&args.input);

    let mut report = RunReport::new(config.family.algorithm, config.family.iterations);
    let mut rows = Vec::with_capacity(outcome.levels.len());
    for (member, level) in outcome.family.values().zip(&outcome.levels) {
        let name = member_file_name(&stem, config.family.algorithm, config.family.iterations, member.angle_count);
        let path = storage::unique_path(&dir.join(name));
        store
            .write_volume(&path, &member.volume)
            .context("writing member volume")?;

        rows.push(LevelRow {
            label: level.label.clone(),
            angles: level.angle_count,
            density: format!("{:.3}", level.density),
            components: level.mixture.len(),
            mixture: format_mixture(&level.mixture),
        });
        report.members.push(MemberReport {
            label: level.label.clone(),
            factor: level.factor,
            angle_count: level.angle_count,
            density: level.density,
            volume_path: path,
            mixture: Some(level.mixture.clone()),
            histogram: Some(level.histogram.clone()),
        });
    }

    let refined_path = storage::unique_path(&dir.join(format!("{stem}_refined.f32")));
    store
        .write_volume(&refined_path, outcome.refined())
        .context("writing refined volume")?;

    println!();
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!(
        "  {} {}",
        "Extrapolated:".dimmed(),
        format_mixture(&outcome.extrapolated)
    );
    println!();

    let chain = &outcome.annealing;
    if chain.state.phase == AnnealingPhase::Cooled {
        println!(
            "{} Annealing cooled after {} trial(s), {} accepted, final energy {:.4}",
            "[OK]".green().bold(),
            chain.iterations,
            chain.accepted,
            chain.state.energy
        );
    } else {
        println!(
            "{} Trial cap reached before the cooling floor ({} trial(s), {} accepted)",
            "[WARN]".yellow().bold(),
            chain.iterations,
            chain.accepted
        );
    }
    println!(
        "{} Refined volume written to {}",
        "[OK]".green().bold(),
        refined_path.display().to_string().cyan()
    );

    if let Some(report_path) = &args.report {
        report.write(report_path).context("writing run report")?;
        println!(
            "{} Report written to {}",
            "[OK]".green().bold(),
            report_path.display()
        );
    }
    Ok(())
}

/// Execute the info command
fn execute_info(args: InfoArgs) -> Result<()> {
    let store = RawVolumeStore::new();
    let volume = store.read_volume(&args.input).context("reading volume")?;
    let geometry = volume.geometry();

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f64;
    for &v in volume.data().iter() {
        min = min.min(v);
        max = max.max(v);
        sum += f64::from(v);
    }
    let mean = sum / geometry.voxel_count() as f64;
    let support_mean = Mask::inscribed_cylinder(geometry).masked_mean(&volume)?;

    println!("{}", args.input.display().to_string().bold().cyan());
    println!(
        "  {} {}x{}x{} (rows x cols x slices)",
        "Shape:".dimmed(),
        geometry.rows(),
        geometry.cols(),
        geometry.slices()
    );
    println!("  {} {}", "Voxels:".dimmed(), geometry.voxel_count());
    println!("  {} {min:.3} .. {max:.3}", "Range:".dimmed());
    println!("  {} {mean:.3}", "Mean:".dimmed());
    println!("  {} {support_mean:.3}", "Support mean:".dimmed());
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse a comma-separated list of positive integers
fn parse_index_list(list: &str) -> Result<Vec<usize>> {
    let parsed: Vec<usize> = list
        .split(',')
        .map(|s| s.trim().parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("expected comma-separated integers")?;
    if parsed.is_empty() {
        anyhow::bail!("list must not be empty");
    }
    Ok(parsed)
}

/// Parse a comma-separated list of angles in radians
fn parse_angle_list(list: &str) -> Result<Vec<f64>> {
    let parsed: Vec<f64> = list
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("expected comma-separated angles in radians")?;
    if parsed.is_empty() {
        anyhow::bail!("angle list must not be empty");
    }
    Ok(parsed)
}

/// Replaces a sentinel intensity (e.g. the air padding some CT exporters
/// emit) with zero before projection.
fn preprocess(volume: Volume, fill_sentinel: Option<f32>) -> Result<Volume> {
    let Some(sentinel) = fill_sentinel else {
        return Ok(volume);
    };
    let geometry = volume.geometry();
    let mut data = volume.into_data();
    utils::fill_sentinel(&mut data, sentinel);
    println!(
        "{} Cleared sentinel intensity {} from the input",
        "[INFO]".blue(),
        sentinel
    );
    Ok(Volume::new(geometry, data)?)
}

/// Labeled output file name for one family member
fn member_file_name(
    stem: &str,
    algorithm: AlgorithmKind,
    iterations: usize,
    angle_count: usize,
) -> String {
    format!("{stem}_{algorithm}_i{iterations}_a{angle_count}.f32")
}

fn input_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "volume".to_string())
}

fn output_dir(requested: Option<&PathBuf>, input: &Path) -> PathBuf {
    if let Some(dir) = requested {
        return dir.clone();
    }
    match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Compact one-line mixture summary
fn format_mixture(mixture: &Gmm) -> String {
    if mixture.is_empty() {
        return "(empty)".to_string();
    }
    mixture
        .sorted_by_mean()
        .components()
        .iter()
        .map(|c| format!("{:.2}*N({:.1}, {:.1})", c.weight, c.mean, c.sd))
        .collect::<Vec<_>>()
        .join(" + ")
}
