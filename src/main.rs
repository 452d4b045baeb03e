//! Command-line interface for the frame selection library
//!
//! Selects representative frames from a video file (with the `opencv`
//! feature) or from a directory of already-decoded frame images, and prints
//! the selection in one of three formats. Useful for tuning thresholds
//! against real clips, especially together with `--debug-dir`.

use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use anyhow::Context;
use rust_keyframes::{
    init_tracing, Config, DirectorySink, FrameSource, ImageSequenceSource, Pipeline, Selection,
    VideoMetadata,
};
use tracing::{debug, info, warn};

/// Command-line arguments structure
#[derive(Debug)]
struct Args {
    input_path: String,
    config_path: Option<PathBuf>,
    sampling_fps: Option<f64>,
    threshold: Option<f64>,
    veto: Option<f64>,
    veto_enabled: Option<bool>,
    target: Option<usize>,
    dedupe: Option<Option<f64>>,
    max_duration: Option<f64>,
    frames_dir: bool,
    source_fps: f64,
    debug_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    verbose: bool,
    show_video_info: bool,
    output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputFormat {
    Simple,   // Just timestamps
    Detailed, // One line per frame with role and scene
    Json,     // JSON format for integration
}

impl Default for Args {
    fn default() -> Self {
        Self {
            input_path: String::new(),
            config_path: None,
            sampling_fps: None,
            threshold: None,
            veto: None,
            veto_enabled: None,
            target: None,
            dedupe: None,
            max_duration: None,
            frames_dir: false,
            source_fps: 30.0,
            debug_dir: None,
            timeout: None,
            verbose: false,
            show_video_info: false,
            output_format: OutputFormat::Simple,
        }
    }
}

const OPTIONS_HELP: &str = "Options:\n\
    --config <file>          Load settings from a JSON file (flags override it)\n\
    --fps <value>            Sampling rate in frames per second (default: 6)\n\
    --threshold <value>      Jump-cut similarity threshold (default: 0.73)\n\
    --veto <value>           Brightness veto threshold (default: 0.9)\n\
    --no-veto                Disable the brightness veto\n\
    --target <n>             Frame budget (default: 24)\n\
    --dedupe <value|off>     Fill deduplication threshold (default: 0.95)\n\
    --max-duration <secs>    Longest accepted video (default: 90)\n\
    --frames-dir             Treat <path> as a directory of frame images\n\
    --source-fps <value>     Native rate of a frame directory (default: 30)\n\
    --debug-dir <dir>        Write cut frames, selected frames and report.json\n\
    --timeout <secs>         Abort the run after this many seconds\n\
    --format <fmt>           Output format: simple|detailed|json (default: simple)\n\
    --verbose                Enable debug logging\n\
    --info                   Show video information only\n\
    --help                   Show this help message";

fn main() {
    let argv: Vec<String> = env::args().collect();

    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    // Initialize tracing based on verbosity
    let log_level = if args.verbose { "debug" } else { "info" };
    init_tracing(log_level);

    info!("Rust Keyframes CLI v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    let source = open_source(&args)?;

    if args.show_video_info {
        show_video_info(source.metadata());
        return Ok(());
    }

    let config = build_config(&args)?;
    debug!("Configuration: {:?}", config);

    let mut pipeline = Pipeline::new(config.clone());
    if let Some(dir) = &args.debug_dir {
        let sink = DirectorySink::new(dir)
            .with_context(|| format!("Failed to create debug directory {}", dir.display()))?;
        pipeline = pipeline.with_sink(sink);
    }
    if let Some(timeout) = args.timeout {
        pipeline = pipeline.with_deadline(Instant::now() + timeout);
    }

    let start_time = Instant::now();
    let selection = pipeline.run(source).context("Frame selection failed")?;
    let selection_time = start_time.elapsed();

    if selection.truncated {
        warn!("Video could only be decoded partially; selection covers the decoded part");
    }

    output_results(&selection, &config, &args, selection_time)
}

fn parse_args(argv: &[String]) -> Result<Args, String> {
    let program = argv.first().map(String::as_str).unwrap_or("rust-keyframes");

    if argv.len() < 2 {
        return Err(format!(
            "Usage: {} <path> [OPTIONS]\n\n\
            {}\n\n\
            Examples:\n\
            {} clip.mp4\n\
            {} clip.mp4 --target 20 --format detailed\n\
            {} frames/ --frames-dir --source-fps 25 --debug-dir debug/",
            program, OPTIONS_HELP, program, program, program
        ));
    }

    if argv[1] == "--help" {
        return Err(format!(
            "Keyframe Selection Tool\n\n\
            Usage: {} <path> [OPTIONS]\n\n\
            Splits a short video into scenes and selects a budgeted set of\n\
            representative frames: one per scene boundary, plus fill frames\n\
            for longer scenes.\n\n\
            {}",
            program, OPTIONS_HELP
        ));
    }

    let mut parsed_args = Args {
        input_path: argv[1].clone(),
        ..Args::default()
    };

    let mut i = 2;
    while i < argv.len() {
        let flag = argv[i].as_str();
        match flag {
            "--config" => {
                parsed_args.config_path = Some(PathBuf::from(value(argv, i)?));
                i += 2;
            }
            "--fps" => {
                parsed_args.sampling_fps = Some(parse_value(argv, i)?);
                i += 2;
            }
            "--threshold" => {
                parsed_args.threshold = Some(parse_value(argv, i)?);
                i += 2;
            }
            "--veto" => {
                parsed_args.veto = Some(parse_value(argv, i)?);
                i += 2;
            }
            "--no-veto" => {
                parsed_args.veto_enabled = Some(false);
                i += 1;
            }
            "--target" => {
                parsed_args.target = Some(parse_value(argv, i)?);
                i += 2;
            }
            "--dedupe" => {
                parsed_args.dedupe = Some(match value(argv, i)? {
                    "off" | "none" => None,
                    _ => Some(parse_value(argv, i)?),
                });
                i += 2;
            }
            "--max-duration" => {
                parsed_args.max_duration = Some(parse_value(argv, i)?);
                i += 2;
            }
            "--frames-dir" => {
                parsed_args.frames_dir = true;
                i += 1;
            }
            "--source-fps" => {
                parsed_args.source_fps = parse_value(argv, i)?;
                i += 2;
            }
            "--debug-dir" => {
                parsed_args.debug_dir = Some(PathBuf::from(value(argv, i)?));
                i += 2;
            }
            "--timeout" => {
                let seconds: f64 = parse_value(argv, i)?;
                if !(seconds.is_finite() && seconds > 0.0) {
                    return Err("--timeout must be a positive number of seconds".to_string());
                }
                parsed_args.timeout = Some(Duration::from_secs_f64(seconds));
                i += 2;
            }
            "--format" => {
                parsed_args.output_format = match value(argv, i)? {
                    "simple" => OutputFormat::Simple,
                    "detailed" => OutputFormat::Detailed,
                    "json" => OutputFormat::Json,
                    _ => return Err("Invalid format. Use 'simple', 'detailed', or 'json'".to_string()),
                };
                i += 2;
            }
            "--verbose" => {
                parsed_args.verbose = true;
                i += 1;
            }
            "--info" => {
                parsed_args.show_video_info = true;
                i += 1;
            }
            _ => {
                return Err(format!("Unknown option: {}", flag));
            }
        }
    }

    Ok(parsed_args)
}

fn value(argv: &[String], i: usize) -> Result<&str, String> {
    argv.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", argv[i]))
}

fn parse_value<T: std::str::FromStr>(argv: &[String], i: usize) -> Result<T, String> {
    let raw = value(argv, i)?;
    raw.parse()
        .map_err(|_| format!("Invalid {} value: {}", argv[i], raw))
}

fn build_config(args: &Args) -> anyhow::Result<Config> {
    let base = match &args.config_path {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    let mut builder = base.to_builder();
    if let Some(fps) = args.sampling_fps {
        builder = builder.sampling_fps(fps);
    }
    if let Some(threshold) = args.threshold {
        builder = builder.jump_cut_threshold(threshold);
    }
    if let Some(veto) = args.veto {
        builder = builder.delta_intensity_veto(veto);
    }
    if let Some(enabled) = args.veto_enabled {
        builder = builder.delta_intensity_veto_enabled(enabled);
    }
    if let Some(target) = args.target {
        builder = builder.target_frame_count(target);
    }
    if let Some(dedupe) = args.dedupe {
        builder = builder.dedupe_threshold(dedupe);
    }
    if let Some(max_duration) = args.max_duration {
        builder = builder.max_video_duration(max_duration);
    }

    Ok(builder.build()?)
}

fn open_source(args: &Args) -> anyhow::Result<Box<dyn FrameSource>> {
    let path = Path::new(&args.input_path);

    if args.frames_dir || path.is_dir() {
        let source = ImageSequenceSource::open(path, args.source_fps)
            .with_context(|| format!("Failed to open frame directory {}", path.display()))?;
        return Ok(Box::new(source));
    }

    open_video(&args.input_path)
}

#[cfg(feature = "opencv")]
fn open_video(video_path: &str) -> anyhow::Result<Box<dyn FrameSource>> {
    let stream = rust_keyframes::VideoStream::open(video_path)
        .with_context(|| format!("Failed to open video {}", video_path))?;
    Ok(Box::new(stream))
}

#[cfg(not(feature = "opencv"))]
fn open_video(video_path: &str) -> anyhow::Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "{} is not a frame directory, and video decoding requires building with --features opencv",
        video_path
    )
}

fn show_video_info(metadata: &VideoMetadata) {
    println!("Video Information:");
    println!("  Source: {}", metadata.source_name);
    println!("  Dimensions: {}x{}", metadata.width, metadata.height);
    println!("  Frame Rate: {:.2} fps", metadata.fps);
    println!("  Frame Count: {}", metadata.frame_count);
    println!("  Duration: {:.2} seconds", metadata.duration_seconds);
    println!("  Description: {}", metadata.description());

    if !metadata.is_valid() {
        warn!("Video properties appear invalid - selection may fail");
    }
}

fn output_results(
    selection: &Selection,
    config: &Config,
    args: &Args,
    selection_time: Duration,
) -> anyhow::Result<()> {
    match args.output_format {
        OutputFormat::Simple => {
            let timestamps: Vec<String> = selection
                .timestamps()
                .iter()
                .map(|t| format!("{:.2}", t))
                .collect();
            println!("Selected frames at seconds: [{}]", timestamps.join(", "));
        }
        OutputFormat::Detailed => {
            let stats = &selection.stats;
            println!("Frame Selection Results:");
            println!("  Selection time: {}ms", selection_time.as_millis());
            println!("  Frames decoded: {}", stats.frames_decoded);
            println!("  Candidates sampled: {}", stats.candidate_count);
            println!("  Scenes found: {} ({} cuts vetoed)", stats.scene_count, stats.vetoed_cuts);
            println!(
                "  Frames selected: {} ({} boundary, {} fill)",
                selection.len(),
                stats.boundary_frames,
                stats.fill_frames
            );
            if stats.dropped_scenes > 0 {
                println!("  Scenes merged to fit the budget: {}", stats.dropped_scenes);
            }
            if selection.truncated {
                println!("  Warning: video was only partially decoded");
            }

            println!("  Frames:");
            for (scene_id, frames) in selection.frames_by_scene() {
                for frame in frames {
                    println!(
                        "    Scene {}: {:>7.2}s {:<8} (covers {:.2}s)",
                        scene_id, frame.record.timestamp, frame.record.role, frame.record.duration
                    );
                }
            }
        }
        OutputFormat::Json => {
            // JSON output for programmatic consumption
            let json_output = serde_json::json!({
                "source": selection.source,
                "selection_time_ms": selection_time.as_millis() as u64,
                "truncated": selection.truncated,
                "frames": selection.records(),
                "scenes": selection.scenes,
                "stats": selection.stats,
                "config": config,
            });

            println!(
                "{}",
                serde_json::to_string_pretty(&json_output).context("JSON serialization failed")?
            );
        }
    }

    info!(
        "Selection completed in {}ms, {} frames from {} scenes",
        selection_time.as_millis(),
        selection.len(),
        selection.stats.scene_count
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_args_parsing_basic() {
        let args = parse_args(&argv(&[
            "rust-keyframes",
            "clip.mp4",
            "--threshold",
            "0.6",
            "--target",
            "20",
            "--no-veto",
            "--format",
            "json",
        ]))
        .unwrap();

        assert_eq!(args.input_path, "clip.mp4");
        assert_eq!(args.threshold, Some(0.6));
        assert_eq!(args.target, Some(20));
        assert_eq!(args.veto_enabled, Some(false));
        assert_eq!(args.output_format, OutputFormat::Json);
    }

    #[test]
    fn test_dedupe_can_be_turned_off() {
        let args = parse_args(&argv(&["rust-keyframes", "clip.mp4", "--dedupe", "off"])).unwrap();
        assert_eq!(args.dedupe, Some(None));

        let args = parse_args(&argv(&["rust-keyframes", "clip.mp4", "--dedupe", "0.9"])).unwrap();
        assert_eq!(args.dedupe, Some(Some(0.9)));
    }

    #[test]
    fn test_args_parsing_errors() {
        assert!(parse_args(&argv(&["rust-keyframes"])).is_err());
        assert!(parse_args(&argv(&["rust-keyframes", "clip.mp4", "--target"])).is_err());
        assert!(parse_args(&argv(&["rust-keyframes", "clip.mp4", "--fps", "fast"])).is_err());
        assert!(parse_args(&argv(&["rust-keyframes", "clip.mp4", "--bogus"])).is_err());
        assert!(parse_args(&argv(&["rust-keyframes", "clip.mp4", "--timeout", "-1"])).is_err());
    }

    #[test]
    fn test_default_args() {
        let args = Args::default();
        assert!(args.input_path.is_empty());
        assert_eq!(args.threshold, None);
        assert_eq!(args.source_fps, 30.0);
        assert!(!args.frames_dir);
        assert!(!args.verbose);
        assert_eq!(args.output_format, OutputFormat::Simple);
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args {
            threshold: Some(0.5),
            veto_enabled: Some(false),
            dedupe: Some(None),
            ..Args::default()
        };

        let config = build_config(&args).unwrap();
        assert_eq!(config.jump_cut_threshold(), 0.5);
        assert!(!config.delta_intensity_veto_enabled());
        assert_eq!(config.dedupe_threshold(), None);
        assert_eq!(config.target_frame_count(), 24);
    }

    #[test]
    fn test_invalid_flag_values_fail_validation() {
        let args = Args {
            target: Some(0),
            ..Args::default()
        };
        assert!(build_config(&args).is_err());
    }
}
