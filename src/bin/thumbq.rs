use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, mpsc},
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use thumbq::{
    ChannelDelegate, FfmpegLogLevel, FfmpegSession, GeneratorOptions, ImageConverter, SerialQueue,
    ThumbnailGenerator, ThumbnailResult,
};

const CLI_AFTER_HELP: &str = "Examples:\n  thumbq generate input.mp4 --at 1,5,00:00:10 --out thumbs\n  thumbq generate input.mp4 --every 30 --count 12 --out thumbs --max-dimension 320 --progress\n  thumbq completions zsh > _thumbq";

#[derive(Debug, Parser)]
#[command(
    name = "thumbq",
    version,
    about = "Generate video thumbnails at chosen timestamps",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Print each saved thumbnail and failure.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long, global = true)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long, global = true)]
    overwrite: bool,

    /// FFmpeg log level (quiet, error, warning, info, debug).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate thumbnails into an output directory.
    #[command(
        about = "Generate thumbnails",
        after_help = "Examples:\n  thumbq generate input.mp4 --at 2,4.5,01:30 --out thumbs --ext jpg\n  thumbq generate input.mp4 --every 10 --count 6 --out thumbs --json"
    )]
    Generate {
        /// Input video path.
        input: PathBuf,
        /// Comma-separated timestamps (seconds, MM:SS or HH:MM:SS).
        #[arg(long, value_delimiter = ',')]
        at: Vec<String>,
        /// Also take a thumbnail every this many seconds, starting at 0.
        #[arg(long)]
        every: Option<String>,
        /// Number of thumbnails to take with --every.
        #[arg(long, default_value_t = 10)]
        count: usize,
        /// Output directory for thumbnails.
        #[arg(long)]
        out: PathBuf,
        /// Output image extension (png, jpg, jpeg, bmp, tiff).
        #[arg(long, default_value = "png")]
        ext: String,
        /// Scale thumbnails to fit this many pixels on the longest edge.
        #[arg(long)]
        max_dimension: Option<u32>,
        /// Delay between a finished seek and the capture, in milliseconds.
        #[arg(long)]
        settle_ms: Option<u64>,
        /// Print a machine-readable JSON report.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse `SECONDS`, `MM:SS` or `HH:MM:SS` (seconds may be fractional) into
/// a non-negative number of seconds.
fn parse_timecode(value: &str) -> Result<f64, Box<dyn std::error::Error>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("time value cannot be empty".into());
    }

    let fields: Vec<&str> = trimmed.split(':').collect();
    if fields.len() > 3 {
        return Err(format!("invalid time format: {trimmed}").into());
    }

    // Seconds come last; each earlier field is worth 60x the next.
    let (seconds_field, unit_fields) = fields
        .split_last()
        .ok_or_else(|| format!("invalid time format: {trimmed}"))?;
    let mut total = seconds_field.parse::<f64>()?;
    let mut unit = 60.0;
    for field in unit_fields.iter().rev() {
        total += field.parse::<u64>()? as f64 * unit;
        unit *= 60.0;
    }

    if !total.is_finite() {
        return Err(format!("time value must be finite: {trimmed}").into());
    }
    Ok(total.max(0.0))
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "debug" => Some(FfmpegLogLevel::Debug),
        _ => None,
    }
}

/// Collect the requested timestamps: explicit `--at` values first, then the
/// `--every` series.
fn requested_times(
    at: &[String],
    every: Option<&str>,
    count: usize,
) -> Result<Vec<f64>, Box<dyn std::error::Error>> {
    let mut times = at
        .iter()
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_timecode(value))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(every) = every {
        let step = parse_timecode(every)?;
        if step <= 0.0 {
            return Err("--every must be greater than 0".into());
        }
        times.extend((0..count).map(|index| index as f64 * step));
    }

    if times.is_empty() {
        return Err("no timestamps requested (use --at or --every)".into());
    }
    Ok(times)
}

fn thumbnail_file_name(index: usize, time: f64, ext: &str) -> String {
    let millis = (time * 1000.0).round() as u64;
    format!("thumb_{index:04}_{millis:08}ms.{ext}")
}

fn ensure_output_directory(out: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if out.exists() {
        if !overwrite {
            return Err(format!(
                "output directory already exists: {} (use --overwrite)",
                out.display()
            )
            .into());
        }
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            format!("writing into existing directory {}", out.display()).yellow()
        );
    }
    fs::create_dir_all(out)?;
    Ok(())
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = &global.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        thumbq::set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Generate {
            input,
            at,
            every,
            count,
            out,
            ext,
            max_dimension,
            settle_ms,
            json,
        } => {
            let times = requested_times(&at, every.as_deref(), count)?;
            ensure_output_directory(&out, cli.global.overwrite)?;
            let ext_clean = ext.trim_start_matches('.').to_ascii_lowercase();

            let mut options = GeneratorOptions::new();
            if let Some(settle_ms) = settle_ms {
                options = options.with_settle_delay(Duration::from_millis(settle_ms));
            }
            let mut converter = ImageConverter::new();
            if let Some(max_dimension) = max_dimension {
                converter = converter.with_max_dimension(max_dimension);
            }

            let session = FfmpegSession::open(&input)?;
            let generator = ThumbnailGenerator::new(
                session,
                converter,
                Arc::new(SerialQueue::new("thumbq-main")?),
                Arc::new(SerialQueue::new("thumbq-background")?),
                options,
            );

            let (sender, receiver) = mpsc::channel();
            let delegate = Arc::new(ChannelDelegate::new(sender));
            generator.set_delegate(&delegate);
            generator.request_thumbnails(&times);

            let progress_bar = if cli.global.progress {
                let pb = ProgressBar::new(times.len() as u64);
                let style = ProgressStyle::with_template(
                    "{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}",
                )?;
                pb.set_style(style.progress_chars("##-"));
                Some(pb)
            } else {
                None
            };

            let mut report = Vec::with_capacity(times.len());
            let mut generated = 0_usize;

            for (index, result) in receiver.iter().take(times.len()).enumerate() {
                let time = result.time();
                match result {
                    ThumbnailResult::Generated { image, .. } => {
                        let output_path = out.join(thumbnail_file_name(index, time, &ext_clean));
                        if output_path.exists() && !cli.global.overwrite {
                            return Err(format!(
                                "output file already exists: {} (use --overwrite)",
                                output_path.display()
                            )
                            .into());
                        }
                        image.save(&output_path)?;
                        generated += 1;
                        if cli.global.verbose {
                            eprintln!("saved {time:.3}s -> {}", output_path.display());
                        }
                        report.push(json!({
                            "time": time,
                            "status": "generated",
                            "path": output_path.display().to_string(),
                            "width": image.width(),
                            "height": image.height(),
                        }));
                    }
                    ThumbnailResult::Failed { error, .. } => {
                        if cli.global.verbose {
                            eprintln!(
                                "{} {}",
                                "failed:".red().bold(),
                                format!("{time:.3}s: {error}").red()
                            );
                        }
                        report.push(json!({
                            "time": time,
                            "status": "failed",
                            "error": error.to_string(),
                        }));
                    }
                }

                if let Some(pb) = &progress_bar {
                    pb.inc(1);
                }
            }

            if let Some(pb) = progress_bar {
                pb.finish_with_message("done");
            }

            if json {
                let payload = json!({
                    "input": input.display().to_string(),
                    "requested": times.len(),
                    "generated": generated,
                    "results": report,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                let failed = report.len() - generated;
                println!(
                    "{} {}",
                    "success:".green().bold(),
                    format!("Generated {generated} thumbnail(s) in {}", out.display()).green()
                );
                if failed > 0 {
                    println!(
                        "{} {}",
                        "warning:".yellow().bold(),
                        format!("{failed} timestamp(s) could not be captured").yellow()
                    );
                }
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "thumbq", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
