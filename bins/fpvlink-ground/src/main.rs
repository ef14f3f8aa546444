use clap::Parser;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fpvlink_config::{SharedConfig, toml_config};
use fpvlink_core::{CoreEntity, LoopTime, debug};
use fpvlink_entities::MessageRouter;
use fpvlink_entities::clocksync::ClockSync;
use fpvlink_entities::external::DetachedCollaborator;
use fpvlink_entities::links::{InterfaceScanner, LinkManager, StaticScanner, SysfsScanner};
use fpvlink_entities::retransmit::RetransmitCoordinator;
use fpvlink_entities::router_notify::{LogNotificationSink, RouterNotifier};
use fpvlink_entities::sik::{SerialAtHandshake, SikRadioEntity};
use fpvlink_entities::vehicle::vehicle_link::{DetachedChannel, VehicleLink};
use fpvlink_entities::video::Adaptive;
use fpvlink_entities::warnings::WarningBoard;

/// Load configuration file
fn load_config_from_toml(cfg_path: &str) -> SharedConfig {
    match toml_config::from_file(cfg_path) {
        Ok(c) => c,
        Err(e) => {
            println!("Failed to load configuration from {}: {}", cfg_path, e);
            std::process::exit(1);
        }
    }
}

/// Build the ground controller core
fn build_ground_stack(cfg: &SharedConfig) -> MessageRouter {
    let mut router = MessageRouter::new(cfg.clone());

    let scanner: Box<dyn InterfaceScanner> = if cfg.config().controller.scan_interfaces {
        Box::new(SysfsScanner::new())
    } else {
        Box::new(StaticScanner(vec![]))
    };
    router.register_entity(Box::new(LinkManager::new(cfg.clone(), scanner)));
    router.register_entity(Box::new(Adaptive::new(cfg.clone())));
    router.register_entity(Box::new(RetransmitCoordinator::new(cfg.clone())));
    router.register_entity(Box::new(ClockSync::new(cfg.clone())));
    router.register_entity(Box::new(WarningBoard::new(cfg.clone())));
    router.register_entity(Box::new(RouterNotifier::new(Box::new(LogNotificationSink))));

    match SikRadioEntity::new(cfg.clone(), Box::new(SerialAtHandshake::new())) {
        Ok(sik) => router.register_entity(Box::new(sik)),
        Err(e) => {
            println!("Failed to start SiK worker: {}", e);
            std::process::exit(1);
        }
    }

    // Radio stack, video pipeline and vehicle channel attach through these
    router.register_entity(Box::new(VehicleLink::new(cfg.clone(), Box::new(DetachedChannel))));
    router.register_entity(Box::new(DetachedCollaborator::new(CoreEntity::RadioStack)));
    router.register_entity(Box::new(DetachedCollaborator::new(CoreEntity::VideoPipeline)));

    router.set_time(LoopTime::ZERO);
    router.set_realtime(true);
    router
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "FPV ground link controller",
    long_about = "Runs the ground-side radio link core using the provided TOML configuration file"
)]
struct Args {
    /// Config file (required)
    #[arg(help = "TOML config with links, video profiles and tuning")]
    config: String,

    /// Stop after this many ticks instead of running until Ctrl+C
    #[arg(long)]
    ticks: Option<usize>,

    /// Override the control loop period from the config file
    #[arg(long)]
    tick_ms: Option<u64>,
}

/// Applies command line overrides on top of the loaded configuration
fn apply_overrides(cfg: SharedConfig, args: &Args) -> SharedConfig {
    let Some(tick_ms) = args.tick_ms else {
        return cfg;
    };
    let mut c = (*cfg.config()).clone();
    c.tick_ms = tick_ms;
    if let Err(e) = c.validate() {
        println!("Invalid --tick-ms: {}", e);
        std::process::exit(1);
    }
    SharedConfig::from_config(c)
}

fn main() {
    let args = Args::parse();
    let cfg = apply_overrides(load_config_from_toml(&args.config), &args);
    let _log_guard = debug::setup_logging_default(cfg.config().debug_log.clone());

    tracing::info!("fpvlink-ground {} starting, tick {} ms", env!("CARGO_PKG_VERSION"), cfg.config().tick_ms);
    let mut router = build_ground_stack(&cfg);

    // Set up Ctrl+C handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("failed to set Ctrl+C handler");

    router.run_stack(args.ticks, Some(running));
    // router drops here, SikRadioEntity::drop stops the worker thread
}
