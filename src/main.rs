use clap::{Args, Parser, Subcommand};
use lan_share::{Config, DownloadEvent, DownloadPolicy, Node, NodeEvent, Result, utils};
use log::{LevelFilter, debug, info};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "lan-share")]
#[command(about = "Share files with peers on the local network")]
#[command(version)]
struct Cli {
    /// Log verbosely
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Share a folder and serve peers until Ctrl+C
    Start {
        #[command(flatten)]
        node: NodeArgs,
    },
    /// Download a file from the peers currently sharing it
    Download {
        /// Name of the file as advertised by peers
        filename: String,
        #[command(flatten)]
        node: NodeArgs,
        /// Seconds to listen for peers before downloading
        #[arg(long, default_value = "7")]
        wait: u64,
        /// No timeout, no retry, and write the file even if chunks are missing
        #[arg(long)]
        best_effort: bool,
    },
    /// Print the peers and files seen on the network
    List {
        #[command(flatten)]
        node: NodeArgs,
        /// Seconds to listen for peers
        #[arg(long, default_value = "7")]
        wait: u64,
    },
}

#[derive(Args)]
struct NodeArgs {
    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Shared root folder
    #[arg(short, long)]
    dir: Option<PathBuf>,
    /// Token shared by every peer on this LAN
    #[arg(short, long)]
    secret: Option<String>,
    /// Extra folder to share (repeatable)
    #[arg(long = "subfolder")]
    subfolders: Vec<PathBuf>,
    #[arg(long)]
    discovery_port: Option<u16>,
    #[arg(long)]
    transfer_port: Option<u16>,
    /// Treat peers as gone after this many seconds without a beacon
    #[arg(long)]
    peer_ttl: Option<u64>,
}

impl NodeArgs {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(dir) = self.dir {
            config.shared_dir = dir;
        }
        if let Some(secret) = self.secret {
            config.secret = secret;
        }
        if !self.subfolders.is_empty() {
            config.shared_subfolders = self.subfolders;
        }
        if let Some(port) = self.discovery_port {
            config.discovery_port = port;
        }
        if let Some(port) = self.transfer_port {
            config.transfer_port = port;
        }
        if self.peer_ttl.is_some() {
            config.peer_ttl_secs = self.peer_ttl;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    utils::setup_logging(level);

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Start { node } => {
            let node = Node::new(node.into_config()?).await?;
            spawn_event_logger(&node);
            node.run().await?;
            node.metrics().print_stats().await;
        }
        Commands::Download {
            filename,
            node,
            wait,
            best_effort,
        } => {
            let mut config = node.into_config()?;
            if best_effort {
                config.download = DownloadPolicy::best_effort();
            }

            let node = Node::new(config).await?;
            node.start().await?;
            println!("Waiting {}s for peers...", wait);
            tokio::time::sleep(Duration::from_secs(wait)).await;

            let mut download = node.download_file(&filename);
            while let Some(event) = download.next_event().await {
                match event {
                    DownloadEvent::ChunkReceived(progress) => println!(
                        "chunk {:>4} from {:<15} {:>12}/{} bytes ({:.1}%)",
                        progress.chunk_index,
                        progress.peer,
                        progress.bytes_received,
                        progress.total_bytes,
                        progress.percent()
                    ),
                    DownloadEvent::ChunkFailed {
                        peer,
                        chunk_index,
                        attempt,
                        error,
                    } => println!(
                        "chunk {:>4} from {:<15} failed (attempt {}): {}",
                        chunk_index,
                        peer,
                        attempt + 1,
                        error
                    ),
                }
            }

            let outcome = download.wait().await;
            node.shutdown().await?;
            node.metrics().print_stats().await;

            let report = outcome?;
            if report.is_complete() {
                println!("Downloaded {} to {:?}", report.filename, report.path);
            } else {
                println!(
                    "Wrote incomplete {} to {:?}: chunks {:?} missing",
                    report.filename, report.path, report.failed_chunks
                );
                std::process::exit(2);
            }
        }
        Commands::List { node, wait } => {
            let node = Node::new(node.into_config()?).await?;
            node.start().await?;
            println!("Listening {}s for peers...", wait);
            tokio::time::sleep(Duration::from_secs(wait)).await;

            let catalogs = node.list_peer_files().await;
            if catalogs.is_empty() {
                println!("No peers found");
            }
            for (addr, files) in catalogs {
                let state = if node.peer_is_live(addr).await {
                    "live"
                } else {
                    "gone"
                };
                println!("{} ({}):", addr, state);
                for file in files {
                    println!("  {}", file);
                }
            }

            node.shutdown().await?;
        }
    }

    Ok(())
}

fn spawn_event_logger(node: &Node) {
    let mut events = node.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(NodeEvent::PeerDiscovered(addr)) => debug!("Beacon from {}", addr),
                Ok(NodeEvent::PeerDisconnected(addr)) => info!("Peer left: {}", addr),
                Err(RecvError::Lagged(skipped)) => info!("Skipped {} peer events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
