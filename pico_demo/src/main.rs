//! PicoGine demo - draws the test triangle on the selected backend
//!
//! Usage: pico_demo [--backend dx11|dx12] [--frames N] [--no-vsync] [--threaded-gpu] [--validation] [--headless]
//!
//! On Windows the backends run on Direct3D unless `--headless` is given.
//! Elsewhere they always run on their headless devices.

use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use pico_engine::pico::{BackendKind, BackendRegistry, Config, Engine, PicoError, PicoResult, Renderer};
use pico_engine::{engine_info, engine_warn};
use pico_engine_renderer_dx11::headless::HeadlessFactory as HeadlessDx11;
use pico_engine_renderer_dx12::headless::{GpuTimeline, HeadlessFactory as HeadlessDx12};

/// Command-line options
#[derive(Debug, Clone, PartialEq)]
struct Options {
    backend: BackendKind,
    frames: u64,
    vsync: bool,
    threaded_gpu: bool,
    validation: bool,
    headless: bool,
}

fn cli() -> Command {
    Command::new("pico_demo")
        .about("Draws the PicoGine test triangle for a number of frames")
        .arg(
            Arg::new("backend")
                .long("backend")
                .value_name("BACKEND")
                .help("Graphics backend: dx11 (immediate) or dx12 (explicit)")
                .value_parser(BackendKind::from_str)
                .default_value("dx11"),
        )
        .arg(
            Arg::new("frames")
                .long("frames")
                .value_name("N")
                .help("Number of frames to render")
                .value_parser(clap::value_parser!(u64))
                .default_value("120"),
        )
        .arg(
            Arg::new("no-vsync")
                .long("no-vsync")
                .help("Present without waiting for vertical blank")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("threaded-gpu")
                .long("threaded-gpu")
                .help("Complete headless GPU work on a background thread")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("validation")
                .long("validation")
                .help("Enable the API debug layer (always on in debug builds)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("headless")
                .long("headless")
                .help("Use the headless devices even where Direct3D is available")
                .action(ArgAction::SetTrue),
        )
}

fn options_from(matches: &ArgMatches) -> Options {
    Options {
        backend: matches.get_one::<BackendKind>("backend").copied().unwrap_or(BackendKind::Immediate),
        frames: matches.get_one::<u64>("frames").copied().unwrap_or(120),
        vsync: !matches.get_flag("no-vsync"),
        threaded_gpu: matches.get_flag("threaded-gpu"),
        validation: matches.get_flag("validation") || cfg!(debug_assertions),
        headless: matches.get_flag("headless"),
    }
}

/// Print an error the way a message box would show it
fn report(error: &PicoError) {
    eprintln!("{}", error.kind_name().red().bold());
    eprintln!("{}", error);
    if let Some(origin) = error.origin() {
        eprintln!("{}", origin.to_string().bright_black());
    }
}

/// Headless devices in use, kept to report their stats
struct HeadlessDevices {
    dx11: Arc<HeadlessDx11>,
    dx12: Arc<HeadlessDx12>,
}

fn register_backends(registry: &mut BackendRegistry, options: &Options) -> PicoResult<Option<HeadlessDevices>> {
    if !options.headless {
        #[cfg(windows)]
        {
            pico_engine_renderer_dx11::register_d3d11(registry)?;
            pico_engine_renderer_dx12::register_d3d12(registry)?;
            engine_info!("pico::demo", "Running on Direct3D");
            return Ok(None);
        }
        #[cfg(not(windows))]
        engine_warn!("pico::demo", "Direct3D needs Windows, running on the headless devices");
    }

    let timeline = if options.threaded_gpu {
        GpuTimeline::Threaded { latency: Duration::from_millis(2) }
    } else {
        GpuTimeline::Immediate
    };
    Ok(Some(HeadlessDevices {
        dx11: pico_engine_renderer_dx11::register_headless(registry),
        dx12: pico_engine_renderer_dx12::register_headless(registry, timeline),
    }))
}

fn report_stats(devices: &HeadlessDevices, backend: BackendKind) {
    match backend {
        BackendKind::Immediate => {
            let stats = devices.dx11.stats();
            engine_info!(
                "pico::demo",
                "dx11: {} draws, {} presents, {} state violations",
                stats.draws,
                stats.total_presents(),
                stats.state_violations
            );
        }
        BackendKind::Explicit => {
            let stats = devices.dx12.stats();
            engine_info!(
                "pico::demo",
                "dx12: {} command lists, {} draws, at most {} frames in flight",
                stats.lists_executed,
                stats.draws,
                stats.max_pending_signals
            );
            if stats.reset_violations > 0 || stats.recording_violations > 0 {
                engine_warn!(
                    "pico::demo",
                    "Debug layer reported {} reset and {} recording violations",
                    stats.reset_violations,
                    stats.recording_violations
                );
            }
        }
    }
}

fn run(options: &Options) -> PicoResult<u64> {
    let config = Config {
        app_name: "PicoGine Demo".to_string(),
        vsync: options.vsync,
        enable_validation: options.validation,
        fence_timeout: Some(Duration::from_secs(5)),
        ..Config::default()
    }
    .with_backend(options.backend);

    let mut registry = BackendRegistry::new();
    let headless = register_backends(&mut registry, options)?;

    let mut engine = Engine::new(config, &registry)?;

    let started = Instant::now();
    let mut remaining = options.frames;
    let frames = engine.run(
        || match remaining.checked_sub(1) {
            Some(left) => {
                remaining = left;
                true
            }
            None => false,
        },
        Renderer::render_test_triangle,
    )?;
    let elapsed = started.elapsed();
    engine.shutdown();

    if let Some(devices) = &headless {
        report_stats(devices, options.backend);
    }
    engine_info!("pico::demo", "{} frames in {:.2?}", frames, elapsed);

    Ok(frames)
}

fn main() -> ExitCode {
    let options = options_from(&cli().get_matches());

    match run(&options) {
        Ok(frames) => {
            println!("{} {} frames on {}", "Done:".green().bold(), frames, options.backend);
            ExitCode::SUCCESS
        }
        Err(error) => {
            report(&error);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
