//! Ketron Deck - key deck to Ketron arranger MIDI bridge

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ketron_deck::cli;
use ketron_deck::config::AppConfig;
use ketron_deck::control::ControlContext;
use ketron_deck::deck::Deck;
use ketron_deck::dispatch::CommandDispatcher;
use ketron_deck::feedback::FeedbackController;
use ketron_deck::mapping::{KeyMappingResolver, Page};
use ketron_deck::paths::AppPaths;
use ketron_deck::ports::{MemoryBackend, MidiBackend, MidirBackend, PortRegistry};
use ketron_deck::volume::VolumeModel;

/// Port name offered by the dry-run backend
const DRY_RUN_PORT: &str = "Ketron Deck (dry run)";

/// Writes the dry-run backend remembers
const DRY_RUN_HISTORY: usize = 64;

/// Ketron Deck - send Ketron arranger commands from a key deck
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "KETRON_DECK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write daily-rotated JSON log files to this directory
    #[arg(long, env = "KETRON_DECK_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Write log files to the default logs directory
    #[arg(long)]
    log_file: bool,

    /// List available MIDI output ports and exit
    #[arg(long)]
    list_ports: bool,

    /// MIDI output port (overrides midi.port in the config)
    #[arg(short, long, env = "KETRON_DECK_PORT")]
    port: Option<String>,

    /// Press one key (0-14) and exit
    #[arg(long, value_name = "KEY")]
    press: Option<u32>,

    /// Page for --press (1 or 2)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    page: u8,

    /// Log MIDI output instead of opening a real port
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = match &args.config {
        Some(path) => AppPaths::with_config(path),
        None => AppPaths::detect(),
    };

    let log_dir = match (&args.log_dir, args.log_file) {
        (Some(dir), _) => Some(dir.clone()),
        (None, true) => {
            paths.ensure_logs_dir()?;
            Some(paths.logs_dir.clone())
        },
        (None, false) => None,
    };
    let _log_guard = init_logging(&args.log_level, log_dir.as_deref())?;

    info!("Starting Ketron Deck v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", paths.config.display());

    let mut config = AppConfig::load_or_default(&paths.config)
        .await
        .with_context(|| format!("Failed to load config {}", paths.config.display()))?;
    if args.port.is_some() {
        config.midi.port = args.port.clone();
    }

    let backend: Arc<dyn MidiBackend> = if args.dry_run {
        Arc::new(MemoryBackend::bounded([DRY_RUN_PORT], DRY_RUN_HISTORY))
    } else {
        Arc::new(MidirBackend::new(config.midi.client_name.clone()))
    };
    let registry = Arc::new(PortRegistry::new(backend));

    if args.list_ports {
        cli::print_ports(&registry);
        return Ok(());
    }

    let port = registry
        .open(config.midi.port.as_deref())
        .context("Failed to open MIDI output port (use --list-ports to see what is available)")?;
    info!("✅ Sending to MIDI port: {}", port);

    let volume = Arc::new(VolumeModel::new());
    let dispatcher = Arc::new(CommandDispatcher::new(
        registry.clone(),
        volume.clone(),
        port,
        config.dispatch_settings(),
    ));
    let ctx = ControlContext {
        resolver: Arc::new(KeyMappingResolver::new()),
        mappings_file: config.key_mappings_file.clone(),
        dispatcher,
    };
    info!("Key mappings: {}", ctx.mappings_file.display());

    let (feedback, mut updates) = FeedbackController::new(config.flash_duration());
    let deck = Arc::new(Deck::new(&ctx, Arc::new(feedback), &config.controls));

    // Stand-in for the deck renderer
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            debug!("Key {} -> {:?}", update.key_no, update.phase);
        }
    });

    let page = if args.page == 2 { Page::Second } else { Page::First };
    for (key_no, face) in deck.initialize(page).await.into_iter().enumerate() {
        debug!("Key {:>2}: {:?}", key_no, face.label);
    }

    let outcome = match args.press {
        Some(key_no) => press_once(&deck, key_no, page).await,
        None => cli::run_repl(deck.clone(), registry.clone(), volume).await,
    };

    registry.close_all();
    info!("Ketron Deck shutdown complete");
    outcome
}

async fn press_once(deck: &Arc<Deck>, key_no: u32, page: Page) -> Result<()> {
    match deck.spawn_press(key_no, page).await? {
        Some(result) if result.success => {
            info!("Key {} sent", key_no);
            Ok(())
        },
        Some(result) => anyhow::bail!(
            "Key {} failed: {}",
            key_no,
            result.error.map(|e| e.to_string()).unwrap_or_default()
        ),
        None => {
            warn!("Key {} has nothing to send", key_no);
            Ok(())
        },
    }
}

fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "ketron-deck.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer);
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();

    Ok(guard)
}
