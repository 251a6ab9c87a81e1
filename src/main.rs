use anyhow::{Context, Result, anyhow};
use clap::Parser;
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use voxbridge::audio::WavFrames;
use voxbridge::cli::{Cli, Commands};
use voxbridge::clock::TokioClock;
use voxbridge::config::Config;
use voxbridge::pipeline::{Orchestrator, SessionSummary, TextPath, VoicePath, spawn_wav_source};
use voxbridge::response::{
    ChannelTransport, ResponseQueueHandle, SimulatedService, SimulatorConfig, SimulatorStats,
};
use voxbridge::segment::{CompletedSegment, DispatchEvent, PathOutcome};

/// Frames buffered between the WAV source and the orchestrator.
const FRAME_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Simulate {
            wav,
            source,
            target_language,
            voice,
            latency,
            conflict_every,
            drop_every,
            json,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(source) = source {
                config.audio.source = source;
            }
            if let Some(language) = target_language {
                config.paths.target_language = language;
            }
            if let Some(voice) = voice {
                config.paths.voice = voice;
            }
            config.validate()?;

            let mut simulator = SimulatorConfig::default()
                .with_conflict_every(conflict_every)
                .with_drop_every(drop_every);
            if let Some(latency) = latency {
                simulator = simulator.with_latency(latency);
            }

            run_simulation(config, &wav, simulator, cli.quiet, json).await?;
        }
        Commands::Config { path } => {
            handle_config_command(path, cli.config.as_deref())?;
        }
    }

    Ok(())
}

/// Installs the stderr log subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level follows `-v`.
fn init_logging(verbose: u8) {
    let fallback = match verbose {
        0 => "voxbridge=warn",
        1 => "voxbridge=debug",
        _ => "voxbridge=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/voxbridge/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path()?)?
    };

    Ok(config.with_env_overrides())
}

/// Handle the `config` command.
fn handle_config_command(show_path: bool, custom_path: Option<&Path>) -> Result<()> {
    if show_path {
        let path = match custom_path {
            Some(path) => path.to_path_buf(),
            None => Config::default_path()?,
        };
        println!("{}", path.display());
        return Ok(());
    }

    let config = load_config(custom_path)?;
    config.validate()?;
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Plays `wav` through the full pipeline against a simulated remote service.
async fn run_simulation(
    config: Config,
    wav: &Path,
    simulator: SimulatorConfig,
    quiet: bool,
    json: bool,
) -> Result<()> {
    let frames = WavFrames::open(wav, config.audio.sample_rate, config.audio.frame_ms)
        .with_context(|| format!("failed to open {}", wav.display()))?;
    if !quiet {
        eprintln!(
            "{} {} ({:.1}s, {} → {})",
            "Simulating".green().bold(),
            wav.display(),
            frames.duration().as_secs_f32(),
            config.audio.source.dimmed(),
            config.paths.target_language
        );
    }

    // Remote side: requests go out over a channel, events come back over another
    let (transport, requests) = ChannelTransport::new();
    let (remote_tx, remote_rx) = tokio::sync::mpsc::unbounded_channel();
    let service = SimulatedService::new(simulator, remote_tx).spawn(requests);

    let (queue, queue_task) =
        ResponseQueueHandle::spawn(config.response_queue_config(), Arc::new(transport));
    let forwarder = queue.attach_events(remote_rx);

    let path_config = config.path_config();
    let text = Arc::new(TextPath::new(queue.clone(), path_config.clone()));
    let voice = Arc::new(VoicePath::new(queue.clone(), path_config));

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let printer = std::thread::spawn(move || print_events(event_rx, quiet, json));

    let (frame_rx, source) = spawn_wav_source(frames, Arc::new(TokioClock), FRAME_BUFFER);
    let summary = Orchestrator::new(config.orchestrator_config(), text, voice)
        .with_event_sender(event_tx)
        .with_response_queue(queue.clone())
        .run(frame_rx)
        .await?;
    source.await?;

    // Stopping the queue drops the transport, which lets the simulator drain and exit
    queue.shutdown();
    queue_task.await?;
    let remote = service.await?;
    forwarder.await?;
    printer
        .join()
        .map_err(|_| anyhow!("segment printer thread panicked"))?;

    print_summary(&summary, &remote);
    Ok(())
}

/// Prints segment events until the orchestrator drops its sender.
fn print_events(events: crossbeam_channel::Receiver<DispatchEvent>, quiet: bool, json: bool) {
    for event in events.iter() {
        match event {
            DispatchEvent::SegmentComplete(completed) if json => {
                println!("{}", segment_json(&completed));
            }
            DispatchEvent::SegmentComplete(completed) if !quiet => {
                println!(
                    "  {:>4}  {:>6.2}s  text: {}  voice: {}",
                    format!("#{}", completed.segment.id).bold(),
                    completed.segment.duration_ms as f32 / 1000.0,
                    describe(&completed.text),
                    describe(&completed.voice),
                );
            }
            DispatchEvent::QueueFull {
                segment_id,
                capacity,
            } if !quiet => {
                eprintln!(
                    "  {} segment #{} dropped, queue full ({})",
                    "warning:".yellow(),
                    segment_id,
                    capacity
                );
            }
            _ => {}
        }
    }
}

fn describe(outcome: &PathOutcome) -> String {
    match outcome {
        PathOutcome::Done(result) => format!(
            "{} ({}ms)",
            result.response_id.green(),
            result.elapsed.as_millis()
        ),
        PathOutcome::Failed { reason } => format!("{} ({})", "failed".red(), reason),
    }
}

fn segment_json(completed: &CompletedSegment) -> serde_json::Value {
    fn outcome_json(outcome: &PathOutcome) -> serde_json::Value {
        match outcome {
            PathOutcome::Done(result) => serde_json::json!({
                "status": "done",
                "response_id": result.response_id,
                "elapsed_ms": result.elapsed.as_millis() as u64,
            }),
            PathOutcome::Failed { reason } => serde_json::json!({
                "status": "failed",
                "reason": reason,
            }),
        }
    }

    serde_json::json!({
        "segment": completed.segment.id,
        "duration_ms": completed.segment.duration_ms,
        "text": outcome_json(&completed.text),
        "voice": outcome_json(&completed.voice),
    })
}

fn print_summary(summary: &SessionSummary, remote: &SimulatorStats) {
    eprintln!();
    eprintln!(
        "  {}  {} completed, {} dropped ({} frames)",
        "Segments:".dimmed(),
        summary.segments_completed,
        summary.segments_dropped,
        summary.frames
    );
    eprintln!(
        "  {}  text {}, voice {}",
        "Failures:".dimmed(),
        summary.text_failures,
        summary.voice_failures
    );
    if let Some(queue) = &summary.queue {
        eprintln!(
            "  {}  {} completed, {} failed, {} timed out",
            "Requests:".dimmed(),
            queue.completed,
            queue.failed,
            queue.timed_out
        );
    }
    eprintln!(
        "  {}    {} received, {} overlapping, {} injected conflicts, {} dropped",
        "Remote:".dimmed(),
        remote.requests,
        remote.overlaps,
        remote.injected_conflicts,
        remote.dropped
    );
}
