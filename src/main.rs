//! snapdiff - list what changed between two btrfs snapshots.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::io::AsyncRead;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use snapdiff::config::{Config, OutputFormat};
use snapdiff::{Change, ChangeKind};

#[derive(Parser)]
#[command(name = "snapdiff")]
#[command(version)]
#[command(about = "Decode btrfs send streams into container layer changes", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print changes in stream order without normalizing
    #[arg(long, global = true)]
    raw: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,

    /// Disable coloured output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a saved send stream
    Decode {
        /// Stream file; stdin when omitted or `-`
        input: Option<PathBuf>,
    },

    /// Run `btrfs send` and decode its output
    Diff {
        /// Parent snapshot for an incremental send
        #[arg(short, long)]
        parent: Option<PathBuf>,

        /// Snapshot to send
        snapshot: PathBuf,

        /// btrfs binary
        #[arg(long, env = "SNAPDIFF_BTRFS")]
        btrfs: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the change list, logs go to stderr
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let format = cli.format.unwrap_or(config.format);
    let color = config.color && !cli.no_color && io::stdout().is_terminal();

    let changes = match cli.command {
        Commands::Decode { input } => match input {
            Some(path) if path.as_os_str() != "-" => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                decode(file, cli.raw).await?
            }
            _ => decode(tokio::io::stdin(), cli.raw).await?,
        },
        Commands::Diff {
            parent,
            snapshot,
            btrfs,
        } => {
            let bin = btrfs.unwrap_or(config.btrfs_bin);
            if cli.raw {
                snapdiff::transport::raw_snapshot_changes(&bin, parent.as_deref(), &snapshot)
                    .await?
            } else {
                snapdiff::transport::diff_snapshots(&bin, parent.as_deref(), &snapshot).await?
            }
        }
    };

    print_changes(&changes, format, color)
}

async fn decode<R: AsyncRead + Unpin>(reader: R, raw: bool) -> Result<Vec<Change>> {
    let changes = if raw {
        snapdiff::read_send_stream(reader).await
    } else {
        snapdiff::decode_send_stream(reader).await
    };
    changes.context("Failed to decode send stream")
}

fn print_changes(changes: &[Change], format: OutputFormat, color: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());

    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, changes)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            for change in changes {
                if color {
                    let symbol = change.kind.symbol().to_string();
                    let symbol = match change.kind {
                        ChangeKind::Add => symbol.green(),
                        ChangeKind::Modify => symbol.yellow(),
                        ChangeKind::Delete => symbol.red(),
                    };
                    writeln!(out, "{} {}", symbol, change.path.display())?;
                } else {
                    writeln!(out, "{}", change)?;
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}
