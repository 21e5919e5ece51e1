//! FrameSync Compositor — real-time multi-layer video compositor driven
//! by external timecode, presenting to one or more DRM/KMS outputs.

mod app;
mod config;
mod display;
mod input;
mod layer;
mod osd;
mod output;
mod remote;
mod render;
mod sync;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};

use config::display_config::DisplayConfiguration;
use config::{CliOverrides, Settings, USAGE};

fn init_logging(level: &str) {
    #[cfg(feature = "tracy")]
    {
        // Tracy wants every span/event flowing through `tracing`, so instead
        // of running `env_logger` (a second, independent `log` consumer)
        // side by side, bridge `log::` call sites into the same `tracing`
        // subscriber via `LogTracer` and let one registry own both.
        use tracing_subscriber::prelude::*;
        let _ = tracing_log::LogTracer::init();
        let env_filter = tracing_subscriber::EnvFilter::try_new(level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer();
        let tracy_layer = tracing_tracy::TracyLayer::default();
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(tracy_layer)
            .try_init();
        return;
    }

    #[cfg(not(feature = "tracy"))]
    {
        let env = env_logger::Env::default().default_filter_or(level.to_string());
        env_logger::Builder::from_env(env).init();
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let overrides = CliOverrides::parse(args);

    if overrides.show_help {
        println!("{USAGE}");
        return Ok(());
    }
    if overrides.show_version {
        println!("framesync-compositor {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut settings = Settings::load(overrides.config_path.as_deref())
        .context("loading process settings")?;
    settings.apply_cli_overrides(&overrides);

    init_logging(&settings.log_level);

    log::info!("starting framesync-compositor {}", env!("CARGO_PKG_VERSION"));

    let display_config_path = PathBuf::from(&settings.display_config_path);
    let display_config = if display_config_path.exists() {
        DisplayConfiguration::load(&display_config_path)
            .with_context(|| format!("loading display configuration {}", display_config_path.display()))?
    } else {
        log::warn!(
            "no display configuration found at {}, starting headless",
            display_config_path.display()
        );
        DisplayConfiguration {
            headless: true,
            ..DisplayConfiguration::default()
        }
    };

    let stdin_commands = settings.stdin_commands;
    let mut application = app::Application::new(settings, display_config);

    if stdin_commands || std::env::var_os("VIDEOCOMPOSER_STDIN_COMMANDS").is_some() {
        let tx = application.command_queue().sender();
        remote::stdin::spawn_stdin_reader(tx);
    }

    application.run()
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("fatal: {err:#}");
            eprintln!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}
