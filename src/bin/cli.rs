//! SPP Capture CLI - Command-line interface
//!
//! Lists ports, runs one-shot captures, monitors a port, or serves the core
//! operations as JSON lines over stdin/stdout for a front end.

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use spp_capture::cli::{print_exit_codes, CliResult, ExitCodes};
use spp_capture::config::{self, AppConfig};
use spp_capture::core::external_api::{event_message, ExternalApi};
use spp_capture::utils::logging;
use spp_capture::{
    list_ports, CaptureRequest, CaptureResult, ConnectionManager, PortDescriptor, SerialEvent,
    TransportError,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::{broadcast::error::RecvError, mpsc, watch};
use tracing::{info, warn};

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
    /// Uppercase hex of received bytes
    Hex,
}

/// SPP Capture CLI
#[derive(Parser, Debug)]
#[command(
    name = "spp-capture",
    version,
    about = "Send a payload over a serial/Bluetooth SPP link and capture the reply",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose logging (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "SPP_CAPTURE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Connect, send one payload, capture the reply, disconnect
    Capture {
        /// Serial port (e.g., COM3, /dev/cu.BS1C-SPP)
        #[arg(short, long)]
        port: Option<String>,

        /// Payload text, or hex digits with --hex
        #[arg(short, long)]
        message: String,

        /// Listening window (ms)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Do not append CR-LF to text payloads
        #[arg(long)]
        no_crlf: bool,

        /// Send the message as raw bytes decoded from hex
        #[arg(long)]
        hex: bool,
    },

    /// Print port events until Ctrl+C
    Monitor {
        /// Serial port
        #[arg(short, long)]
        port: Option<String>,

        /// Exit after timeout (seconds)
        #[arg(long)]
        timeout: Option<u64>,

        /// Show received data as hex
        #[arg(long)]
        hex: bool,
    },

    /// Serve the core operations as JSON lines over stdin/stdout
    Serve,

    /// Print the exit code table
    ExitCodes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    let level = logging::effective_level(&config.logging, cli.verbose, cli.quiet);
    if config.logging.file {
        if let Err(e) = config::init_directories() {
            eprintln!("Warning: could not create log directory: {e}");
        }
    }
    let log_dir = config::log_dir();
    let _guard = match logging::init(&config.logging, &level, log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        }
    };

    match run(&cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let result = match e.downcast_ref::<TransportError>() {
                Some(err) => CliResult::from(err),
                None => CliResult::error(ExitCodes::ERROR, format!("{e:#}")),
            };
            eprintln!("Error: {}", result.message().unwrap_or_default());
            result.to_exit_code()
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<AppConfig, config::ConfigError> {
    match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}

async fn run(cli: &Cli, config: &AppConfig) -> anyhow::Result<()> {
    match &cli.command {
        Commands::ListPorts { detailed } => show_ports(cli, *detailed)?,
        Commands::Capture { port, message, duration, no_crlf, hex } => {
            let port = resolve_port(port.as_deref(), config)?;
            let mut request = if *hex {
                CaptureRequest::hex(message.as_str(), config.capture.duration_ms)
            } else {
                config.capture.text_request(message)
            };
            if let Some(ms) = duration {
                request.duration_ms = Some(*ms as f64);
            }
            if *no_crlf {
                request.append_crlf = false;
            }
            capture(cli, &port, &request).await?;
        }
        Commands::Monitor { port, timeout, hex } => {
            let port = resolve_port(port.as_deref(), config)?;
            monitor(cli, &port, *timeout, *hex).await?;
        }
        Commands::Serve => serve().await?,
        Commands::ExitCodes => print_exit_codes(),
    }

    Ok(())
}

fn resolve_port(port: Option<&str>, config: &AppConfig) -> Result<String, TransportError> {
    port.map(str::to_string)
        .or_else(|| config.default_port.clone())
        .ok_or_else(|| {
            TransportError::InvalidArgument(
                "no port given and no default_port configured".to_string(),
            )
        })
}

fn show_ports(cli: &Cli, detailed: bool) -> anyhow::Result<()> {
    let ports = list_ports()?;

    if cli.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(());
    }

    if detailed {
        println!(
            "{:<32} {:<20} {:<10} {:<16} {}",
            "Path", "Manufacturer", "VID:PID", "Serial", "Name"
        );
        println!("{:-<96}", "");
        for port in &ports {
            println!(
                "{:<32} {:<20} {:<10} {:<16} {}",
                port.path,
                port.manufacturer,
                usb_ids(port),
                port.serial_number,
                port.friendly_name
            );
        }
    } else {
        for port in &ports {
            println!("{}", port.path);
        }
    }

    Ok(())
}

fn usb_ids(port: &PortDescriptor) -> String {
    if port.vendor_id.is_empty() {
        String::new()
    } else {
        format!("{}:{}", port.vendor_id, port.product_id)
    }
}

async fn capture(cli: &Cli, port: &str, request: &CaptureRequest) -> anyhow::Result<()> {
    let manager = ConnectionManager::native();

    let session = manager.connect(port).await?;
    if !cli.quiet {
        eprintln!("Connected to {} ({})", session.path, session.connection_id);
    }

    let result = manager.write_and_capture(request).await;
    manager.disconnect().await;
    let result = result?;

    print_capture(cli, &result)?;
    Ok(())
}

fn print_capture(cli: &Cli, result: &CaptureResult) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        OutputFormat::Hex => println!("{}", result.received_hex),
        OutputFormat::Text => {
            let mut stdout = io::stdout();
            stdout.write_all(result.received.as_bytes())?;
            stdout.flush()?;
        }
    }

    if !cli.quiet {
        eprintln!(
            "Sent {} | received {} bytes in {} ms",
            result.sent_hex, result.received_bytes, result.duration_ms
        );
    }
    Ok(())
}

async fn monitor(cli: &Cli, port: &str, timeout: Option<u64>, hex: bool) -> anyhow::Result<()> {
    let manager = ConnectionManager::native();
    let mut events = manager.subscribe();

    let session = manager.connect(port).await?;
    if !cli.quiet {
        eprintln!("Connected to {} ({}). Press Ctrl+C to exit.", session.path, session.connection_id);
    }

    let (stop_tx, mut stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    })?;

    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            () = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) if event.connection_id() != session.connection_id => {}
                Ok(event) => {
                    let closed = matches!(event, SerialEvent::Closed { .. });
                    print_event(cli, &event, hex);
                    if closed {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "monitor fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.shutdown().await;
    if !cli.quiet {
        eprintln!("Disconnected.");
    }
    Ok(())
}

fn print_event(cli: &Cli, event: &SerialEvent, hex: bool) {
    if cli.format == OutputFormat::Json {
        println!("{}", event_message(event));
        return;
    }

    match event {
        SerialEvent::Data { data, .. } => {
            if hex || cli.format == OutputFormat::Hex {
                println!("{}", event.data_hex().unwrap_or_default());
            } else {
                let mut stdout = io::stdout();
                let _ = stdout.write_all(data.as_bytes());
                let _ = stdout.flush();
            }
        }
        SerialEvent::Error { message, .. } => eprintln!("\n[Error: {message}]"),
        SerialEvent::Closed { path, .. } => eprintln!("\n[Closed: {path}]"),
    }
}

async fn serve() -> anyhow::Result<()> {
    let api = ExternalApi::new(Arc::new(ConnectionManager::native()));
    let (out_tx, mut out_rx) = mpsc::channel::<Value>(256);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = out_rx.recv().await {
            let mut line = message.to_string();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut events = api.manager().subscribe();
    let event_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event_tx.send(event_message(&event)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event forwarder fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!("serving JSON requests on stdin");
    let served = api
        .serve(BufReader::new(tokio::io::stdin()), out_tx.clone())
        .await;
    api.manager().shutdown().await;

    // dropping the last manager handle closes the relay and ends the forwarder
    drop(api);
    let _ = forwarder.await;
    drop(out_tx);
    let _ = writer.await;
    served?;
    Ok(())
}
