//! `changeomatic` – the change machine's process entry point.
//!
//! 1. Installs tracing (`RUST_LOG`, `CHANGEOMATIC_LOG_FORMAT`, optional OTLP).
//! 2. Loads `~/.changeomatic/config.toml`, writing defaults on first run.
//! 3. Builds the bus, optionally attaches simulated devices, draws the
//!    console panel and starts the [`Kiosk`].
//! 4. Runs until Ctrl-C (or `/quit` in simulation mode), then announces
//!    shutdown.

mod config;
mod console_panel;
mod repl;

use std::sync::Arc;

use changeomatic_hal::Panel;
use changeomatic_hal::sim::{SimHopper, SimValidator};
use changeomatic_middleware::{EventBus, Topic};
use changeomatic_runtime::{Kiosk, init_tracing, panel_readiness};
use changeomatic_types::KioskError;
use colored::Colorize;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::console_panel::ConsolePanel;

fn main() {
    // Before the Tokio runtime exists: the OTLP exporter must not need one.
    let _tracing = init_tracing("changeomatic");

    print_banner();
    let cfg = load_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "could not start the async runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg)) {
        println!("{}: {}", "Fatal".red().bold(), e);
        error!(error = %e, "change-o-matic stopped");
        std::process::exit(1);
    }
}

fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    }
}

async fn run(cfg: Config) -> Result<(), KioskError> {
    cfg.validate()?;
    let bus = EventBus::new(cfg.bus_capacity);
    let shutdown = Arc::new(Notify::new());

    let on_signal = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        on_signal.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit or kill the process");
    }

    let devices = cfg.simulate.then(|| {
        info!("attaching simulated hopper and validator");
        (
            Arc::new(SimHopper::attach(&bus, cfg.note_float())),
            Arc::new(SimValidator::attach(&bus)),
        )
    });
    if let Some(notice) = missing_devices_notice(&bus) {
        println!("  {}", notice.yellow().bold());
        warn!("{notice}");
    }

    let panel = Arc::new(ConsolePanel::new());
    let (ready, wait) = panel_readiness();
    let mut kiosk = Kiosk::new(bus, panel.clone(), cfg.kiosk_config());

    panel.repaint();
    ready.ready();
    kiosk.start(wait).await?;

    match &devices {
        Some((hopper, validator)) => {
            println!(
                "  Simulation mode. Type {} for commands.\n",
                "/help".bold().cyan()
            );
            let (hopper, validator) = (Arc::clone(hopper), Arc::clone(validator));
            let on_quit = Arc::clone(&shutdown);
            std::thread::spawn(move || repl::run(hopper, validator, on_quit));
        }
        None => println!("  Press {} to exit.\n", "Ctrl-C".bold()),
    }

    shutdown.notified().await;
    kiosk.shutdown();
    println!("{}", "  ✓ change-o-matic closed.".green());
    Ok(())
}

/// Describe the device topics nobody listens on, if any.
fn missing_devices_notice(bus: &EventBus) -> Option<String> {
    let silent: Vec<String> = [Topic::HopperRequest, Topic::ValidatorRequest]
        .into_iter()
        .filter(|topic| bus.subscriber_count(*topic) == 0)
        .map(|topic| topic.to_string())
        .collect();
    if silent.is_empty() {
        return None;
    }
    Some(format!(
        "No device attached to {}; requests will go unanswered. Set simulate = true to use simulated devices.",
        silent.join(", ")
    ))
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___ _                                              _   _      "#.bold().cyan());
    println!("{}", r#"  / __| |_  __ _ _ _  __ _ ___ ___ ___ _ __  __ _| |_(_)__   "#.bold().cyan());
    println!("{}", r#" | (__| ' \/ _` | ' \/ _` / -_)___/ _ \ '  \/ _` |  _| / _|  "#.bold().cyan());
    println!("{}", r#"  \___|_||_\__,_|_||_\__, \___|   \___/_|_|_\__,_|\__|_\__|  "#.bold().cyan());
    println!("{}", r#"                     |___/                                   "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "change-o-matic".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Banknote in, coins out");
    println!();
}
