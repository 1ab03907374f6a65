//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use crate::status_queue::QueuePolicy;

fn parse_threshold(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|e| format!("{e}"))?;
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(format!("{value} is not a non-negative ratio"))
    }
}

/// Webcam tongue detector: shows HEHE when your tongue is out, SUS otherwise.
#[derive(Debug, Parser)]
#[command(name = "gato-detector", version, about)]
pub struct Cli {
    /// Config file (defaults to ./gato-detector.toml if present)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Camera device index
    #[arg(long, value_name = "INDEX")]
    pub camera: Option<u32>,

    /// Replay image files (a file or a directory) instead of opening a camera
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Do not mirror the camera image
    #[arg(long)]
    pub no_mirror: bool,

    /// Mouth ratio above which a frame counts as HEHE
    #[arg(long, value_parser = parse_threshold)]
    pub threshold: Option<f32>,

    /// How statuses are handed from the video worker to the display
    #[arg(long, value_enum)]
    pub policy: Option<QueuePolicy>,

    /// Status queue capacity
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub capacity: Option<usize>,

    /// Directory holding the ONNX models
    #[arg(long, value_name = "DIR")]
    pub models_dir: Option<PathBuf>,

    /// Run without a window and log status changes
    #[arg(long)]
    pub headless: bool,

    /// List available cameras and exit
    #[arg(long)]
    pub list_cameras: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_empty() {
        let cli = Cli::try_parse_from(["gato-detector"]).unwrap();
        assert!(cli.threshold.is_none());
        assert!(cli.policy.is_none());
        assert!(!cli.headless);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn negative_threshold_is_rejected() {
        assert!(Cli::try_parse_from(["gato-detector", "--threshold", "-1"]).is_err());
        assert!(Cli::try_parse_from(["gato-detector", "--threshold", "abc"]).is_err());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(Cli::try_parse_from(["gato-detector", "--capacity", "0"]).is_err());
    }

    #[test]
    fn policy_values() {
        let cli = Cli::try_parse_from(["gato-detector", "--policy", "on-change", "-vv"]).unwrap();
        assert_eq!(cli.policy, Some(QueuePolicy::OnChange));
        assert_eq!(cli.verbose, 2);
    }
}
