use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use timelapse::{
    ChannelSelection, FailurePolicy, Fps, FramePipeline, IndexRange, MovieSession, OutputFormat,
    PipelineConfig, RunConfig, RunReport, SceneOutcome, SchedulerDescriptor, StrategyConfig,
};

#[derive(Parser, Debug)]
#[command(name = "timelapse", version)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one movie per selected scene (requires `ffmpeg` on PATH).
    Movies(MoviesArgs),
    /// Export one projected and normalized frame as a PNG.
    Frame(FrameArgs),
    /// Serve frame requests from cluster runs.
    Worker(WorkerArgs),
}

#[derive(Args, Debug, Default)]
struct StageArgs {
    /// Projection strategy (max, mean, orthogonal).
    #[arg(long)]
    projection: Option<String>,

    /// Projection parameters as a JSON object, e.g. '{"axis":"z"}'.
    #[arg(long)]
    projection_params: Option<String>,

    /// Normalization strategy (percentile, passthrough).
    #[arg(long)]
    normalization: Option<String>,

    /// Normalization parameters as a JSON object.
    #[arg(long)]
    normalization_params: Option<String>,

    /// Lower clip percentile (percentile normalization).
    #[arg(long)]
    min_percentile: Option<f64>,

    /// Upper clip percentile (percentile normalization).
    #[arg(long)]
    max_percentile: Option<f64>,
}

#[derive(Parser, Debug)]
struct MoviesArgs {
    /// Input plane store. Required unless given by --config.
    #[arg(long = "in")]
    in_path: Option<PathBuf>,

    /// Run configuration JSON; flags given here override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Scene indices, comma separated (default: all scenes).
    #[arg(long, value_delimiter = ',')]
    scenes: Vec<usize>,

    /// Channel index, or `all` for one movie per channel.
    #[arg(long)]
    channel: Option<ChannelSelection>,

    /// First time index (inclusive).
    #[arg(long)]
    time_start: Option<usize>,

    /// Last time index (exclusive).
    #[arg(long)]
    time_end: Option<usize>,

    #[command(flatten)]
    stages: StageArgs,

    /// Frames per second, `N` or `N/D`.
    #[arg(long)]
    fps: Option<Fps>,

    /// Container: mp4, mov, mkv, avi, webm, gif.
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Replace existing movies.
    #[arg(long)]
    overwrite: bool,

    /// Local worker threads.
    #[arg(long)]
    threads: Option<usize>,

    /// Cluster worker addresses (host:port), comma separated. Selects cluster execution.
    #[arg(long, value_delimiter = ',')]
    workers: Vec<String>,

    /// Frames scheduled per window.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Completed frames that may wait for the encoder.
    #[arg(long)]
    channel_capacity: Option<usize>,

    /// What a failed frame does to its scene.
    #[arg(long, value_enum)]
    policy: Option<PolicyChoice>,

    /// Retries for transient chunk reads.
    #[arg(long)]
    retries: Option<u32>,

    /// Scenes rendered at the same time.
    #[arg(long)]
    scene_concurrency: Option<usize>,

    /// Write the per-scene report as JSON.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Input plane store.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Scene index.
    #[arg(long, default_value_t = 0)]
    scene: usize,

    /// Channel index.
    #[arg(long, default_value_t = 0)]
    channel: usize,

    /// Time index (0-based).
    #[arg(long)]
    time: usize,

    #[command(flatten)]
    stages: StageArgs,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Replace an existing PNG.
    #[arg(long)]
    overwrite: bool,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:7341")]
    listen: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyChoice {
    FailScene,
    SkipFrames,
}

impl From<PolicyChoice> for FailurePolicy {
    fn from(p: PolicyChoice) -> Self {
        match p {
            PolicyChoice::FailScene => FailurePolicy::FailScene,
            PolicyChoice::SkipFrames => FailurePolicy::SkipFrames,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.cmd {
        Command::Movies(args) => cmd_movies(args),
        Command::Frame(args) => cmd_frame(args),
        Command::Worker(args) => cmd_worker(args),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_movies(args: MoviesArgs) -> anyhow::Result<()> {
    let cfg = build_run_config(args.config.as_deref(), &args)?;
    let session = MovieSession::open(cfg)?;
    let report = session.run()?;

    print_summary(&report);
    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report).context("serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("write run report '{}'", path.display()))?;
    }

    let failed = report.failed().count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} movie(s) failed", report.results.len());
    }
    Ok(())
}

fn build_run_config(config: Option<&Path>, args: &MoviesArgs) -> anyhow::Result<RunConfig> {
    let mut cfg = match (config, &args.in_path) {
        (Some(path), _) => RunConfig::load(path)?,
        (None, Some(input)) => RunConfig::new(input, "."),
        (None, None) => anyhow::bail!("either --in or --config is required"),
    };
    if let Some(input) = &args.in_path {
        cfg.input = input.clone();
    }
    if let Some(dir) = &args.out_dir {
        cfg.out_dir = dir.clone();
    }
    if !args.scenes.is_empty() {
        cfg.scenes = Some(args.scenes.clone());
    }
    if let Some(channel) = args.channel {
        cfg.channel = channel;
    }
    if args.time_start.is_some() || args.time_end.is_some() {
        let current = cfg.time.unwrap_or(IndexRange {
            start: 0,
            end: usize::MAX,
        });
        cfg.time = Some(IndexRange::new(
            args.time_start.unwrap_or(current.start),
            args.time_end.unwrap_or(current.end),
        )?);
    }

    let p = &mut cfg.pipeline;
    apply_stage_args(p, &args.stages)?;
    if let Some(fps) = args.fps {
        p.fps = fps;
    }
    if let Some(format) = args.format {
        p.format = format;
    }
    if args.overwrite {
        p.overwrite = true;
    }
    if !args.workers.is_empty() {
        if args.threads.is_some() {
            anyhow::bail!("--threads and --workers are mutually exclusive");
        }
        p.scheduler = SchedulerDescriptor::Cluster {
            workers: args.workers.clone(),
        };
    } else if args.threads.is_some() {
        p.scheduler = SchedulerDescriptor::Local {
            threads: args.threads,
        };
    }
    if let Some(n) = args.chunk_size {
        p.chunk_size = n;
    }
    if let Some(n) = args.channel_capacity {
        p.channel_capacity = n;
    }
    if let Some(policy) = args.policy {
        p.failure_policy = policy.into();
    }
    if let Some(n) = args.retries {
        p.chunk_read_retries = n;
    }
    if let Some(n) = args.scene_concurrency {
        p.scene_concurrency = n;
    }
    Ok(cfg)
}

fn apply_stage_args(p: &mut PipelineConfig, args: &StageArgs) -> anyhow::Result<()> {
    override_strategy(
        &mut p.projection,
        args.projection.as_deref(),
        args.projection_params.as_deref(),
    )?;
    override_strategy(
        &mut p.normalization,
        args.normalization.as_deref(),
        args.normalization_params.as_deref(),
    )?;
    if let Some(v) = args.min_percentile {
        p.normalization.params.insert("min_percentile".into(), v.into());
    }
    if let Some(v) = args.max_percentile {
        p.normalization.params.insert("max_percentile".into(), v.into());
    }
    Ok(())
}

fn override_strategy(
    strategy: &mut StrategyConfig,
    name: Option<&str>,
    params: Option<&str>,
) -> anyhow::Result<()> {
    if let Some(name) = name
        && name != strategy.name
    {
        *strategy = StrategyConfig::named(name);
    }
    if let Some(json) = params {
        let extra: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(json).with_context(|| format!("parse parameters '{json}'"))?;
        strategy.params.extend(extra);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    for r in &report.results {
        match &r.outcome {
            SceneOutcome::Written {
                path,
                frames,
                skipped_times,
            } => {
                if skipped_times.is_empty() {
                    eprintln!("S{} C{}: wrote {} ({frames} frames)", r.scene, r.channel, path.display());
                } else {
                    eprintln!(
                        "S{} C{}: wrote {} ({frames} frames, skipped times {skipped_times:?})",
                        r.scene,
                        r.channel,
                        path.display()
                    );
                }
            }
            SceneOutcome::Failed { time, message, .. } => match time {
                Some(t) => eprintln!("S{} C{}: FAILED at time {t}: {message}", r.scene, r.channel),
                None => eprintln!("S{} C{}: FAILED: {message}", r.scene, r.channel),
            },
        }
    }
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let mut cfg = PipelineConfig::default();
    apply_stage_args(&mut cfg, &args.stages)?;
    let stages = cfg.stages()?;

    let view = timelapse::open(&args.in_path)?;
    let times = IndexRange::new(args.time, args.time + 1)?;
    let pipeline = FramePipeline::new(&view, args.scene, args.channel, Some(times), stages)?;
    let frame = pipeline.compute(args.time)?;
    timelapse::save_frame_png(&frame, &args.out, args.overwrite)?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_worker(args: WorkerArgs) -> anyhow::Result<()> {
    timelapse::cluster::worker::listen(args.listen.as_str())?;
    Ok(())
}
