use anyhow::{Context, Result};
use clap::Parser;
use livescan::{CaptureDevice, LivescanConfig, LivescanEvent, Pipeline, SyntheticDevice};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "livescan")]
#[command(about = "Samples a live camera feed and classifies frames against a remote service")]
#[command(version)]
#[command(long_about = "Livescan opens a capture device, periodically encodes the current frame \
as JPEG and posts it to a classification endpoint. Detections are tallied per session and \
broadcast to subscribers; the endpoint is retried with exponential backoff and sampling stops \
when it stays unavailable.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "livescan.toml", help = "Path to TOML configuration file")]
    config: String,

    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Use the built-in gradient generator instead of a real camera
    #[arg(long, help = "Capture from a synthetic device")]
    synthetic: bool,

    #[arg(long, help = "Probe the classification service and exit")]
    health_check: bool,

    #[arg(long, help = "List capture devices and exit")]
    list_devices: bool,

    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args);

    info!("Starting livescan v{}", env!("CARGO_PKG_VERSION"));

    let config = LivescanConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let pipeline = Pipeline::builder(config)
        .with_device(select_device(args.synthetic)?)
        .build()
        .context("Failed to build pipeline")?;

    if args.list_devices {
        for device in pipeline.devices().await? {
            println!("{}\t{}", device.id, device.label);
        }
        return Ok(());
    }

    match pipeline.health().await {
        Ok(health) if health.models_loaded => {
            info!("Classification service is {}", health.status);
        }
        Ok(health) => warn!(
            "Classification service is {} but its models are not loaded",
            health.status
        ),
        Err(e) => warn!("Classification service health probe failed: {}", e),
    }

    if args.health_check {
        return Ok(());
    }

    let mut events = pipeline.subscribe();
    pipeline.start().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(LivescanEvent::ClassificationResult(result)) => {
                    let labels: Vec<String> = result
                        .detections
                        .iter()
                        .map(|d| format!("{} {:.1}%", d.category, d.confidence_percent()))
                        .collect();
                    info!("Frame {}: [{}]", result.frame_id, labels.join(", "));
                }
                Ok(LivescanEvent::ServiceUnavailable { .. }) => {
                    if let Some((message, remediation)) = pipeline.status().user_message() {
                        error!("{}. {}", message, remediation.unwrap_or_default());
                    }
                    break;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event listener lagged behind by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    pipeline.stop().await;

    let summary = pipeline.summary();
    info!(
        "Session finished: {} cycles, {} detections, {} failures",
        summary.total,
        summary.detections(),
        summary.failures
    );
    for (category, count) in &summary.categories {
        info!("  {}: {}", category, count);
    }

    Ok(())
}

#[cfg(all(target_os = "linux", feature = "camera"))]
fn select_device(synthetic: bool) -> Result<Arc<dyn CaptureDevice>> {
    if synthetic {
        return Ok(Arc::new(SyntheticDevice::new()));
    }
    Ok(Arc::new(livescan::GstCaptureDevice::new()?))
}

#[cfg(not(all(target_os = "linux", feature = "camera")))]
fn select_device(synthetic: bool) -> Result<Arc<dyn CaptureDevice>> {
    if !synthetic {
        warn!("Built without the camera feature, using the synthetic device");
    }
    Ok(Arc::new(SyntheticDevice::new()))
}

fn init_logging(args: &Args) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

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
        .unwrap_or_else(|_| EnvFilter::new(format!("livescan={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}

fn print_default_config() -> Result<()> {
    println!("# Livescan configuration file");
    println!("# Every key is optional; LIVESCAN_<SECTION>__<KEY> environment variables override it");
    println!();
    println!("{}", toml::to_string_pretty(&LivescanConfig::default())?);
    Ok(())
}
