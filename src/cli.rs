//! Command-line interface for voxbridge
//!
//! Provides argument parsing using clap derive macros.

use crate::audio::vad::SourceProfile;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Concurrency control for real-time speech translation
#[derive(Parser, Debug)]
#[command(
    name = "voxbridge",
    version,
    about = "Concurrency control for real-time speech translation"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress per-segment output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a latency string.
///
/// Supports any duration format accepted by `humantime` (`150ms`, `1s`,
/// `1s500ms`); a bare number is taken as milliseconds.
fn parse_latency(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a WAV file through the pipeline against a simulated remote service
    Simulate {
        /// WAV file to play as live capture
        #[arg(value_name = "WAV")]
        wav: PathBuf,

        /// Capture source profile (microphone, system_audio)
        #[arg(long, value_name = "SOURCE")]
        source: Option<SourceProfile>,

        /// Translation target language (e.g., en, de, ja)
        #[arg(long, value_name = "LANG")]
        target_language: Option<String>,

        /// Synthesized voice for the voice path
        #[arg(long, value_name = "VOICE")]
        voice: Option<String>,

        /// Base latency of the simulated service (default: 150ms). Examples: 80ms, 1s
        #[arg(long, value_name = "DURATION", value_parser = parse_latency)]
        latency: Option<Duration>,

        /// Answer every Nth request with a conflict error (0 = never)
        #[arg(long, value_name = "N", default_value_t = 0)]
        conflict_every: u64,

        /// Never answer every Nth request (0 = never)
        #[arg(long, value_name = "N", default_value_t = 0)]
        drop_every: u64,

        /// Print completed segments as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Print the configuration file path instead
        #[arg(long)]
        path: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate_minimal() {
        let cli = Cli::try_parse_from(["voxbridge", "simulate", "talk.wav"]).unwrap();
        match cli.command {
            Commands::Simulate {
                wav,
                source,
                latency,
                conflict_every,
                json,
                ..
            } => {
                assert_eq!(wav, PathBuf::from("talk.wav"));
                assert_eq!(source, None);
                assert_eq!(latency, None);
                assert_eq!(conflict_every, 0);
                assert!(!json);
            }
            _ => panic!("Expected Simulate command"),
        }
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_parse_simulate_with_options() {
        let cli = Cli::try_parse_from([
            "voxbridge",
            "simulate",
            "talk.wav",
            "--source",
            "system_audio",
            "--target-language",
            "de",
            "--latency",
            "1s",
            "--conflict-every",
            "3",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate {
                source,
                target_language,
                latency,
                conflict_every,
                json,
                ..
            } => {
                assert_eq!(source, Some(SourceProfile::SystemAudio));
                assert_eq!(target_language.as_deref(), Some("de"));
                assert_eq!(latency, Some(Duration::from_secs(1)));
                assert_eq!(conflict_every, 3);
                assert!(json);
            }
            _ => panic!("Expected Simulate command"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_source() {
        let result = Cli::try_parse_from(["voxbridge", "simulate", "a.wav", "--source", "radio"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_latency_formats() {
        assert_eq!(parse_latency("80"), Ok(Duration::from_millis(80)));
        assert_eq!(parse_latency("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_latency("1s500ms"), Ok(Duration::from_millis(1500)));
        assert!(parse_latency("soon").is_err());
    }

    #[test]
    fn test_parse_verbose_repeated_flags() {
        let cli = Cli::try_parse_from(["voxbridge", "-v", "-v", "config"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_config_path_flag() {
        let cli = Cli::try_parse_from(["voxbridge", "config", "--path"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { path: true }));
    }

    #[test]
    fn test_parse_global_config() {
        let cli =
            Cli::try_parse_from(["voxbridge", "config", "--config", "/tmp/vb.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/vb.toml")));
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["voxbridge"]).is_err());
    }
}
