//! Basic usage example for LAN Share
//!
//! Starts one sharing node on loopback, then pulls a file from it with a
//! standalone downloader that writes into a second folder.

use lan_share::core::PeerTable;
use lan_share::storage::SharedFolder;
use lan_share::transfer::{DownloadEvent, Downloader, TransferClient};
use lan_share::{Config, DownloadPolicy, MetricsCollector, Node};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> lan_share::Result<()> {
    lan_share::utils::setup_logging(log::LevelFilter::Info);

    println!("LAN Share - Basic Usage Example");

    let sharer_dir = tempfile::tempdir()?;
    let receiver_dir = tempfile::tempdir()?;
    let payload: Vec<u8> = (0..1_300_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(sharer_dir.path().join("notes.bin"), &payload)?;

    // Beacons go to loopback so the example stays on this machine.
    let config = Config {
        shared_dir: sharer_dir.path().to_path_buf(),
        secret: "example".to_string(),
        broadcast_addr: Ipv4Addr::LOCALHOST,
        discovery_port: 45000,
        transfer_port: 45001,
        ..Default::default()
    };
    let transfer_port = config.transfer_port;

    let node = Node::new(config).await?;
    node.start().await?;
    println!("Sharing: {:?}", node.list_local_files().await);

    // The receiving side only needs a peer table, a folder, and a chunk source.
    let localhost = IpAddr::from(Ipv4Addr::LOCALHOST);
    let peers = PeerTable::new();
    peers
        .record_discovery(localhost, Some(node.list_local_files().await))
        .await;

    let downloader = Downloader::new(
        peers,
        SharedFolder::new(receiver_dir.path().to_path_buf(), Vec::new()),
        Arc::new(TransferClient::new(transfer_port)),
        lan_share::storage::CHUNK_SIZE,
        DownloadPolicy::default(),
        MetricsCollector::new(),
    );

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            if let DownloadEvent::ChunkReceived(progress) = event {
                println!(
                    "  chunk {} from {}: {:.1}%",
                    progress.chunk_index,
                    progress.peer,
                    progress.percent()
                );
            }
        }
    });

    let report = downloader
        .download_file("notes.bin", Some(progress_tx))
        .await?;
    let _ = printer.await;

    let received = std::fs::read(&report.path)?;
    println!(
        "Downloaded {} bytes in {} chunks, identical: {}",
        report.bytes_received,
        report.chunk_count,
        received == payload
    );

    node.shutdown().await?;
    node.metrics().print_stats().await;

    Ok(())
}
