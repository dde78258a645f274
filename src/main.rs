use anyhow::Result;
use clap::Parser;
use doorbell::{Collaborators, DoorbellConfig, DoorbellOrchestrator};
use std::path::Path;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "doorbell")]
#[command(about = "Rust-based smart doorbell with photo capture, classification and event publishing")]
#[command(version)]
#[command(long_about = "A Rust-based smart doorbell controller. A button press captures a photo, \
which is classified by a remote image-labelling service and published to a remote event store. \
A heartbeat LED shows the controller is alive. Runs on a Raspberry Pi or fully simulated.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "doorbell.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - build collaborators but don't start
    #[arg(long, help = "Perform dry run - build backends but don't acquire any hardware")]
    dry_run: bool,

    /// Simulated hardware driven from the keyboard
    #[arg(long, help = "Use simulated GPIO, camera and services; SPACE rings, q quits")]
    simulate: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rotated file
    #[arg(long, value_name = "PATH", help = "Write logs to PATH, rotated daily")]
    log_file: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    // Keep the guard alive so buffered file logs are flushed on exit
    let log_guard = init_logging(&args)?;

    info!("Starting doorbell system v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match DoorbellConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let mut orchestrator = if args.simulate {
        let (collaborators, peripheral) = Collaborators::simulated(&config);
        let mut orchestrator = DoorbellOrchestrator::with_collaborators(config, collaborators);
        orchestrator.enable_keyboard(peripheral);
        orchestrator
    } else {
        DoorbellOrchestrator::new(config).map_err(|e| {
            error!("Failed to create orchestrator: {}", e);
            e
        })?
    };

    if args.dry_run {
        info!("Dry run mode - backends built but not started");
        println!("✓ Dry run completed successfully - all backends built");
        return Ok(());
    }

    if let Err(e) = orchestrator.start().await {
        error!("Failed to start system: {}", e);
        // Release whatever was acquired before the failure
        if let Err(e) = orchestrator.shutdown().await {
            warn!("Error during shutdown after failed start: {}", e);
        }
        std::process::exit(1);
    }

    // Run the main application loop with signal handling
    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Doorbell system exited with code: {}", exit_code);

    // Exit with appropriate code for systemd
    drop(log_guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("doorbell={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_names(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    // Raw mode in --simulate mangles terminal output; the file keeps a clean copy
    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let path = Path::new(path);
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("log file path has no file name"))?;
            let appender = tracing_appender::rolling::daily(
                directory.unwrap_or_else(|| Path::new(".")),
                file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_thread_names(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Doorbell Configuration File");
    println!("# This is the default configuration with all available options.");
    println!("# Any key can be overridden with DOORBELL_<SECTION>__<KEY>, e.g.");
    println!("# DOORBELL_GPIO__BUTTON_PIN=BCM17");
    println!();

    let rendered = toml::to_string_pretty(&DoorbellConfig::default())?;
    println!("{}", rendered);
    Ok(())
}
