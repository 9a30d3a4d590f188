use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct TransferMetrics {
    pub beacons_sent: u64,
    pub beacons_received: u64,
    pub beacons_rejected: u64,
    pub size_queries_served: u64,
    pub chunks_served: u64,
    pub bytes_served: u64,
    pub chunks_downloaded: u64,
    pub chunks_failed: u64,
    pub bytes_downloaded: u64,
    pub files_downloaded: u64,
    pub connections_failed: u64,
    pub uptime: Duration,
    pub start_time: Instant,
}

impl Default for TransferMetrics {
    fn default() -> Self {
        Self {
            beacons_sent: 0,
            beacons_received: 0,
            beacons_rejected: 0,
            size_queries_served: 0,
            chunks_served: 0,
            bytes_served: 0,
            chunks_downloaded: 0,
            chunks_failed: 0,
            bytes_downloaded: 0,
            files_downloaded: 0,
            connections_failed: 0,
            uptime: Duration::new(0, 0),
            start_time: Instant::now(),
        }
    }
}

#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<TransferMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_beacon_sent(&self) {
        self.metrics.write().await.beacons_sent += 1;
    }

    pub async fn record_beacon_received(&self) {
        self.metrics.write().await.beacons_received += 1;
    }

    pub async fn record_beacon_rejected(&self) {
        self.metrics.write().await.beacons_rejected += 1;
    }

    pub async fn record_size_query_served(&self) {
        self.metrics.write().await.size_queries_served += 1;
    }

    pub async fn record_chunk_served(&self, bytes: u64) {
        let mut metrics = self.metrics.write().await;
        metrics.chunks_served += 1;
        metrics.bytes_served += bytes;
    }

    pub async fn record_chunk_downloaded(&self, bytes: u64) {
        let mut metrics = self.metrics.write().await;
        metrics.chunks_downloaded += 1;
        metrics.bytes_downloaded += bytes;
    }

    pub async fn record_chunk_failed(&self) {
        self.metrics.write().await.chunks_failed += 1;
    }

    pub async fn record_file_downloaded(&self) {
        self.metrics.write().await.files_downloaded += 1;
    }

    pub async fn record_connection_failed(&self) {
        self.metrics.write().await.connections_failed += 1;
    }

    pub async fn get_metrics(&self) -> TransferMetrics {
        let mut metrics = self.metrics.read().await.clone();
        metrics.uptime = metrics.start_time.elapsed();
        metrics
    }

    pub async fn print_stats(&self) {
        let metrics = self.get_metrics().await;

        println!("\n=== LAN Share Statistics ===");
        println!("Uptime: {:.2?}", metrics.uptime);
        println!(
            "Beacons: {} sent, {} received, {} rejected",
            metrics.beacons_sent, metrics.beacons_received, metrics.beacons_rejected
        );
        println!(
            "Served: {} size queries, {} chunks ({} bytes)",
            metrics.size_queries_served, metrics.chunks_served, metrics.bytes_served
        );
        println!(
            "Downloaded: {} files, {} chunks ({} bytes), {} chunks failed",
            metrics.files_downloaded,
            metrics.chunks_downloaded,
            metrics.bytes_downloaded,
            metrics.chunks_failed
        );
        println!("Connection failures: {}", metrics.connections_failed);
        println!("============================\n");
    }
}
