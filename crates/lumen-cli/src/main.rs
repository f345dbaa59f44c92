//! `lumen run --config-file PATH`: loads a configuration file, builds the
//! audio/mapper/lights/broker tasks, and drives them from a
//! `lumen_scheduler::Scheduler` until an interrupt signal arrives.

mod tasks;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use parking_lot::Mutex;

use lumen_analysis::{BeatProcessor, IdleProcessor, PitchProcessor, SmoothingProcessor};
use lumen_broker::BrokerTask;
use lumen_config::Config;
use lumen_core::LightEngine;
use lumen_io::{AudioCapture, CpalCapture, DeviceSpec, MockCapture};
use lumen_mapper::Mapper;
use lumen_scheduler::Scheduler;

use tasks::{AudioTask, LightsTask, MapperTask};

#[derive(Parser)]
#[command(name = "lumen")]
#[command(author, version, about = "Real-time audio-reactive lighting controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the frame pipeline against a configuration file until interrupted.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the YAML configuration file (spec.md §6).
    #[arg(long, default_value = "./config/main.yaml")]
    config_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
    }
}

fn build_capture(cfg: &lumen_config::CaptureConfig) -> anyhow::Result<Box<dyn AudioCapture>> {
    match cfg.method.as_str() {
        "mock" | "test" => {
            tracing::warn!("Capture.Method = {:?}: using a silent mock capture device", cfg.method);
            Ok(Box::new(MockCapture::new(Vec::new())))
        }
        _ => {
            let spec = DeviceSpec::parse(&cfg.device);
            let capture = CpalCapture::open(&spec, cfg.sample_rate, cfg.fps)?;
            Ok(Box::new(capture))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_config::CaptureConfig;

    fn capture_config(method: &str) -> CaptureConfig {
        CaptureConfig {
            method: method.to_string(),
            device: "default".to_string(),
            sample_rate: 44100,
            fps: 60,
        }
    }

    #[test]
    fn mock_method_never_touches_real_hardware() {
        build_capture(&capture_config("mock")).expect("mock capture always succeeds");
    }

    #[test]
    fn test_method_is_an_alias_for_mock() {
        build_capture(&capture_config("test")).expect("test capture always succeeds");
    }

    #[test]
    fn cli_requires_a_subcommand() {
        assert!(Cli::try_parse_from(["lumen"]).is_err());
    }

    #[test]
    fn run_defaults_to_the_conventional_config_path() {
        let cli = Cli::try_parse_from(["lumen", "run"]).expect("run takes no required args");
        let Commands::Run(args) = cli.command;
        assert_eq!(args.config_file, PathBuf::from("./config/main.yaml"));
    }

    #[test]
    fn run_accepts_an_explicit_config_file() {
        let cli = Cli::try_parse_from(["lumen", "run", "--config-file", "/tmp/lumen.yaml"])
            .expect("explicit config-file should parse");
        let Commands::Run(args) = cli.command;
        assert_eq!(args.config_file, PathBuf::from("/tmp/lumen.yaml"));
    }
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    tracing::info!(config_file = %args.config_file.display(), "loading configuration");
    let Config {
        capture,
        smoothing,
        beat,
        pitch,
        idle,
        lights,
        devices,
        mapping,
        network,
    } = lumen_config::load_config(&args.config_file)?;

    let audio_task = AudioTask::new(
        build_capture(&capture)?,
        SmoothingProcessor::new(smoothing),
        BeatProcessor::new(beat),
        PitchProcessor::new(pitch),
        IdleProcessor::new(idle),
    );

    let engine = Arc::new(Mutex::new(LightEngine::new(lights, devices)?));
    let mapper_task = MapperTask::new(Mapper::new(mapping), engine.clone());
    let lights_task = LightsTask::new(engine);

    let mut scheduler = Scheduler::new("lumenpipe");
    scheduler.add_task(Box::new(audio_task))?;
    scheduler.add_task(Box::new(mapper_task))?;
    scheduler.add_task(Box::new(lights_task))?;
    scheduler.add_threaded_task(Box::new(BrokerTask::new(network.host, network.port)))?;

    scheduler.install_signal_handler()?;
    tracing::info!("lumenpipe running, press Ctrl+C to stop");
    scheduler.run_forever();
    tracing::info!("shutdown complete");
    Ok(())
}
