use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gato_detector::app::{GatoDetectorApp, WINDOW_TITLE};
use gato_detector::assets::ReferenceImages;
use gato_detector::cli::Cli;
use gato_detector::config::AppConfig;
use gato_detector::processor::spawn_worker;
use gato_detector::status_queue::StatusQueue;
use gato_detector::utils::{SharedState, State};
use gato_detector::{headless, webcam, Result};

fn init_logging(verbose: u8) {
    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_cameras {
        for (index, name) in webcam::list_devices()?.iter().enumerate() {
            println!("{index}: {name}");
        }
        return Ok(());
    }

    let config = AppConfig::load(cli.config.as_deref())?.with_cli(&cli);
    config.validate()?;

    let queue = Arc::new(StatusQueue::new(config.queue.capacity, config.queue.policy));
    info!(
        "Status queue: policy {}, capacity {}",
        queue.policy(),
        queue.capacity()
    );

    let shared_state: SharedState = Arc::new(Mutex::new(State::new(config.camera.index)));
    let shutdown = Arc::new(AtomicBool::new(false));

    let worker = spawn_worker(
        config.clone(),
        cli.input.clone(),
        Arc::clone(&shared_state),
        Arc::clone(&queue),
        Arc::clone(&shutdown),
    )?;

    if cli.headless {
        headless::watch(&queue, worker)?;
        return Ok(());
    }

    let references = ReferenceImages::load(&config.assets.sus_image, &config.assets.hehe_image);
    let app = GatoDetectorApp::new(
        shared_state,
        queue,
        shutdown,
        worker,
        references,
        config.detection.threshold,
    );

    let native_options = eframe::NativeOptions {
        initial_window_size: Some(egui::vec2(1200.0, 600.0)),
        ..Default::default()
    };
    eframe::run_native(WINDOW_TITLE, native_options, Box::new(move |_cc| Box::new(app)))?;

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
