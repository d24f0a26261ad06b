//! evstore - command-line client for the evstore event store
//!
//! Runs one command against a node and prints the result.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use evstore_client::{Credentials, EventStoreClient, ExpectedVersion, Settings, TlsSettings};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evstore")]
#[command(about = "Command-line client for the evstore event store")]
#[command(version)]
struct Cli {
    /// Server address (overrides EVSTORE_CONFIG and EVSTORE_ADDR)
    #[arg(short, long)]
    server: Option<SocketAddr>,

    /// Login for the connection
    #[arg(short, long, env = "EVSTORE_USER")]
    user: Option<String>,

    /// Password for the connection
    #[arg(short, long, env = "EVSTORE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    // ===== TLS Options =====
    /// Enable TLS connection
    #[arg(long, env = "EVSTORE_TLS")]
    tls: bool,

    /// Path to CA certificate for server verification
    #[arg(long, env = "EVSTORE_TLS_CA")]
    ca_cert: Option<PathBuf>,

    /// Server name for TLS verification (defaults to the server IP)
    #[arg(long)]
    server_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append one event to a stream
    Append {
        /// Stream name
        stream: String,

        /// Event type
        #[arg(short = 't', long = "type")]
        event_type: String,

        /// Event data JSON (or @file.json to read from file)
        data: String,

        /// Event metadata JSON
        #[arg(short, long)]
        metadata: Option<String>,

        /// Expected version: any, no-stream or an event number
        #[arg(short, long, default_value = "any", value_parser = parse_expected_version)]
        expected_version: ExpectedVersion,
    },

    /// Read events of a stream
    Read {
        /// Stream name
        stream: String,

        /// First event number (-1 with --backward starts at the end)
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        from: i64,

        /// Maximum events to return
        #[arg(short, long, default_value = "20")]
        count: i32,

        /// Read towards the start of the stream
        #[arg(short, long)]
        backward: bool,

        /// Resolve link events
        #[arg(long)]
        resolve_links: bool,
    },

    /// Read one event of a stream
    ReadEvent {
        /// Stream name
        stream: String,

        /// Event number (-1 for the last event)
        #[arg(allow_hyphen_values = true)]
        number: i64,

        /// Resolve link events
        #[arg(long)]
        resolve_links: bool,
    },

    /// Read events of the global log
    ReadAll {
        /// Commit position to start from (-1 with --backward starts at the end)
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        commit: i64,

        /// Prepare position to start from
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        prepare: i64,

        /// Maximum events to return
        #[arg(short, long, default_value = "20")]
        count: i32,

        /// Read towards the start of the log
        #[arg(short, long)]
        backward: bool,

        /// Resolve link events
        #[arg(long)]
        resolve_links: bool,
    },

    /// Delete a stream
    Delete {
        /// Stream name
        stream: String,

        /// Expected version: any, no-stream or an event number
        #[arg(short, long, default_value = "any", value_parser = parse_expected_version)]
        expected_version: ExpectedVersion,

        /// Delete permanently; the stream name cannot be reused
        #[arg(long)]
        hard: bool,
    },

    /// Write the metadata of a stream
    SetMetadata {
        /// Stream name
        stream: String,

        /// Metadata JSON (or @file.json to read from file)
        metadata: String,

        /// Expected version of the metastream
        #[arg(short, long, default_value = "any", value_parser = parse_expected_version)]
        expected_version: ExpectedVersion,
    },

    /// Print new events as they are written, until Ctrl+C
    Subscribe {
        /// Stream name (omit to follow the global log)
        stream: Option<String>,

        /// Resolve link events
        #[arg(long)]
        resolve_links: bool,
    },
}

fn parse_expected_version(value: &str) -> Result<ExpectedVersion, String> {
    match value {
        "any" => Ok(ExpectedVersion::Any),
        "no-stream" => Ok(ExpectedVersion::NoStream),
        number => number
            .parse::<i64>()
            .map(ExpectedVersion::from)
            .map_err(|_| format!("expected 'any', 'no-stream' or a number, got '{}'", value)),
    }
}

fn build_settings(cli: &Cli) -> Result<Settings, Box<dyn std::error::Error>> {
    let mut settings = Settings::load()?;

    if let Some(server) = cli.server {
        settings.endpoints = vec![server];
    }
    match (&cli.user, &cli.password) {
        (Some(user), Some(password)) => {
            settings = settings.with_credentials(Credentials::new(user, password));
        }
        (None, None) => {}
        _ => {
            eprintln!(
                "{}: --user and --password must be used together",
                "Error".red()
            );
            std::process::exit(1);
        }
    }
    if cli.tls || cli.ca_cert.is_some() {
        let tls = TlsSettings {
            enabled: true,
            ca_cert_path: cli.ca_cert.clone().or(settings.tls.ca_cert_path.clone()),
            server_name: cli.server_name.clone().or(settings.tls.server_name.clone()),
        };
        settings = settings.with_tls(tls);
    }

    // one-shot commands should fail fast rather than reconnect forever
    if settings.max_reconnections.is_none() {
        settings = settings.with_max_reconnections(Some(3));
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let settings = build_settings(&cli).map_err(|e| {
        eprintln!("{}: {}", "Invalid configuration".red(), e);
        e
    })?;
    tracing::debug!("using endpoints {:?}", settings.endpoints);
    let client = EventStoreClient::new(settings)?;

    match cli.command {
        Commands::Subscribe {
            stream,
            resolve_links,
        } => {
            if let Err(e) = commands::subscribe(&client, stream, resolve_links).await {
                eprintln!("{}: {}", "Error".red(), e);
                client.close().await;
                std::process::exit(1);
            }
        }
        cmd => match commands::execute(&client, cmd).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                client.close().await;
                std::process::exit(1);
            }
        },
    }

    client.close().await;
    Ok(())
}
