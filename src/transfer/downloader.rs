use log::{debug, info, warn};
use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::core::config::DownloadPolicy;
use crate::core::peer::PeerTable;
use crate::storage::{SharedFolder, chunk_count, chunk_range};
use crate::transfer::client::ChunkSource;
use crate::transfer::scheduler::ChunkScheduler;
use crate::utils::{MetricsCollector, P2PError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    pub peer: IpAddr,
    pub chunk_index: u32,
    pub bytes_received: u64,
    pub total_bytes: u64,
}

impl ChunkProgress {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        100.0 * self.bytes_received as f64 / self.total_bytes as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    ChunkReceived(ChunkProgress),
    ChunkFailed {
        peer: IpAddr,
        chunk_index: u32,
        attempt: u32,
        error: String,
    },
}

pub type ProgressSender = mpsc::UnboundedSender<DownloadEvent>;

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub filename: String,
    pub path: PathBuf,
    pub total_bytes: u64,
    pub bytes_received: u64,
    pub chunk_count: u32,
    pub peers: Vec<IpAddr>,
    /// Chunks that never arrived. Only non-empty when partial writes are allowed.
    pub failed_chunks: Vec<u32>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty() && self.bytes_received == self.total_bytes
    }
}

struct DownloadJob {
    chunks: Vec<Option<Vec<u8>>>,
    bytes_received: u64,
}

#[derive(Clone)]
struct FetchContext {
    filename: Arc<str>,
    source: Arc<dyn ChunkSource>,
    scheduler: Arc<ChunkScheduler>,
    job: Arc<Mutex<DownloadJob>>,
    chunk_size: u64,
    total_bytes: u64,
    request_timeout: Option<Duration>,
    max_retries: u32,
    progress: Option<ProgressSender>,
    metrics: MetricsCollector,
}

/// Multi-source download: splits a file into chunks, spreads them round-robin
/// over every live peer advertising it, and reassembles in index order.
pub struct Downloader {
    peers: PeerTable,
    folder: SharedFolder,
    source: Arc<dyn ChunkSource>,
    chunk_size: u64,
    policy: DownloadPolicy,
    metrics: MetricsCollector,
}

impl Downloader {
    pub fn new(
        peers: PeerTable,
        folder: SharedFolder,
        source: Arc<dyn ChunkSource>,
        chunk_size: u64,
        policy: DownloadPolicy,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            peers,
            folder,
            source,
            chunk_size,
            policy,
            metrics,
        }
    }

    pub async fn download_file(
        &self,
        filename: &str,
        progress: Option<ProgressSender>,
    ) -> Result<DownloadReport> {
        validate_filename(filename)?;

        let candidates = self.peers.peers_with_file(filename).await;
        if candidates.is_empty() {
            return Err(P2PError::NoPeersAvailable(filename.to_string()));
        }
        info!(
            "Starting download of {} from {} peer(s): {:?}",
            filename,
            candidates.len(),
            candidates
        );

        let scheduler = Arc::new(ChunkScheduler::new(candidates, self.policy.rotate_peers));
        let total_bytes = self.query_size(filename, &scheduler).await?;
        let chunk_count = chunk_count(total_bytes, self.chunk_size);
        info!(
            "{}: {} bytes in {} chunk(s) of {} bytes",
            filename, total_bytes, chunk_count, self.chunk_size
        );

        let job = Arc::new(Mutex::new(DownloadJob {
            chunks: vec![None; chunk_count as usize],
            bytes_received: 0,
        }));
        let context = FetchContext {
            filename: Arc::from(filename),
            source: self.source.clone(),
            scheduler: scheduler.clone(),
            job: job.clone(),
            chunk_size: self.chunk_size,
            total_bytes,
            request_timeout: self.policy.request_timeout(),
            max_retries: self.policy.max_retries,
            progress,
            metrics: self.metrics.clone(),
        };

        // One worker slot per candidate peer.
        let permits = Arc::new(Semaphore::new(scheduler.peer_count()));
        let mut tasks = JoinSet::new();
        for chunk_index in 0..chunk_count {
            let context = context.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                context.fetch_and_store(chunk_index).await;
            });
        }
        drop(context);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Chunk task for {} ended abnormally: {}", filename, e);
            }
        }

        let (chunks, bytes_received) = {
            let mut job = job.lock().await;
            (std::mem::take(&mut job.chunks), job.bytes_received)
        };

        let failed_chunks: Vec<u32> = chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| chunk.is_none())
            .map(|(index, _)| index as u32)
            .collect();

        if !failed_chunks.is_empty() {
            if !self.policy.write_partial {
                return Err(P2PError::IncompleteDownload(format!(
                    "{}: chunks {:?} of {} missing",
                    filename, failed_chunks, chunk_count
                )));
            }
            warn!(
                "{}: writing without chunks {:?}; the file will be truncated",
                filename, failed_chunks
            );
        }

        let path = self
            .folder
            .write_file(filename, chunks.iter().flatten().map(Vec::as_slice))
            .await?;

        if failed_chunks.is_empty() {
            self.metrics.record_file_downloaded().await;
            info!("Download completed: {} ({} bytes)", filename, bytes_received);
        }

        Ok(DownloadReport {
            filename: filename.to_string(),
            path,
            total_bytes,
            bytes_received,
            chunk_count,
            peers: scheduler.candidates().to_vec(),
            failed_chunks,
        })
    }

    /// Ask the first candidate for the size. With retries enabled, later
    /// candidates are tried in order when earlier ones fail.
    async fn query_size(&self, filename: &str, scheduler: &ChunkScheduler) -> Result<u64> {
        let attempts = (self.policy.max_retries as usize + 1).min(scheduler.peer_count());
        let mut last_error = P2PError::NoPeersAvailable(filename.to_string());

        for &peer in scheduler.candidates().iter().take(attempts) {
            let request = self.source.file_size(filename, peer);
            match bounded(self.policy.request_timeout(), request, || {
                format!("size of {} from {}", filename, peer)
            })
            .await
            {
                Ok(size) => {
                    debug!("{} reports {} as {} bytes", peer, filename, size);
                    return Ok(size);
                }
                Err(e) => {
                    warn!("Size query for {} to {} failed: {}", filename, peer, e);
                    if e.is_transport_failure() {
                        self.metrics.record_connection_failed().await;
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

impl FetchContext {
    async fn fetch_and_store(&self, chunk_index: u32) {
        match self.fetch(chunk_index).await {
            Some((peer, data)) => self.store(peer, chunk_index, data).await,
            None => self.metrics.record_chunk_failed().await,
        }
    }

    async fn fetch(&self, chunk_index: u32) -> Option<(IpAddr, Vec<u8>)> {
        for attempt in 0..=self.max_retries {
            let peer = self.scheduler.peer_for(chunk_index, attempt)?;
            debug!("Requesting chunk {} from {} (attempt {})", chunk_index, peer, attempt);

            let request = self.source.file_chunk(&self.filename, peer, chunk_index);
            let outcome = bounded(self.request_timeout, request, || {
                format!("chunk {} from {}", chunk_index, peer)
            })
            .await
            .and_then(|data| self.check_length(chunk_index, data));

            match outcome {
                Ok(data) => return Some((peer, data)),
                Err(e) => {
                    warn!(
                        "Chunk {} of {} from {} failed: {}",
                        chunk_index, self.filename, peer, e
                    );
                    if e.is_transport_failure() {
                        self.metrics.record_connection_failed().await;
                    }
                    self.emit(DownloadEvent::ChunkFailed {
                        peer,
                        chunk_index,
                        attempt,
                        error: e.to_string(),
                    });
                }
            }
        }
        None
    }

    /// A peer with a different chunk size or a different file under the same
    /// name answers with the wrong number of bytes.
    fn check_length(&self, chunk_index: u32, data: Vec<u8>) -> Result<Vec<u8>> {
        let expected = chunk_range(chunk_index, self.chunk_size, self.total_bytes);
        let expected_len = expected.end - expected.start;
        if data.len() as u64 != expected_len {
            return Err(P2PError::InvalidResponse(format!(
                "chunk {} is {} bytes, expected {}",
                chunk_index,
                data.len(),
                expected_len
            )));
        }
        Ok(data)
    }

    async fn store(&self, peer: IpAddr, chunk_index: u32, data: Vec<u8>) {
        let len = data.len() as u64;
        let mut job = self.job.lock().await;
        job.chunks[chunk_index as usize] = Some(data);
        job.bytes_received += len;

        // Emitted under the lock so observers see a monotonic byte count.
        self.emit(DownloadEvent::ChunkReceived(ChunkProgress {
            peer,
            chunk_index,
            bytes_received: job.bytes_received,
            total_bytes: self.total_bytes,
        }));
        drop(job);

        self.metrics.record_chunk_downloaded(len).await;
    }

    fn emit(&self, event: DownloadEvent) {
        if let Some(progress) = &self.progress {
            let _ = progress.send(event);
        }
    }
}

async fn bounded<T, F, D>(limit: Option<Duration>, request: F, describe: D) -> Result<T>
where
    F: Future<Output = Result<T>>,
    D: FnOnce() -> String,
{
    match limit {
        Some(limit) => timeout(limit, request)
            .await
            .map_err(|_| P2PError::Timeout(describe()))?,
        None => request.await,
    }
}

/// Downloads land directly in the shared root, so only bare names are allowed.
fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains('/')
        || filename.contains('\\')
    {
        return Err(P2PError::InvalidRequest(format!(
            "not a plain file name: {:?}",
            filename
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use tempfile::TempDir;

    const CHUNK: u64 = 10;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    /// In-memory peers. `down` peers refuse connections; `stalled` peers never
    /// answer; peers in `chunk_sizes` cut chunks with their own size.
    #[derive(Default)]
    struct MockSource {
        content: HashMap<IpAddr, Vec<u8>>,
        down: HashSet<IpAddr>,
        stalled: HashSet<IpAddr>,
        chunk_sizes: HashMap<IpAddr, u64>,
        chunk_calls: std::sync::Mutex<Vec<(IpAddr, u32)>>,
    }

    impl MockSource {
        fn serving(peers: &[IpAddr], content: &[u8]) -> Self {
            Self {
                content: peers.iter().map(|p| (*p, content.to_vec())).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(IpAddr, u32)> {
            let mut calls = self.chunk_calls.lock().unwrap().clone();
            calls.sort_by_key(|(_, index)| *index);
            calls
        }

        async fn reachable(&self, peer: IpAddr) -> Result<&Vec<u8>> {
            if self.stalled.contains(&peer) {
                std::future::pending::<()>().await;
            }
            if self.down.contains(&peer) {
                return Err(P2PError::ConnectionFailed(format!("{} refused", peer)));
            }
            self.content
                .get(&peer)
                .ok_or_else(|| P2PError::FileNotFound(peer.to_string()))
        }
    }

    #[async_trait]
    impl ChunkSource for MockSource {
        async fn file_size(&self, _filename: &str, peer: IpAddr) -> Result<u64> {
            Ok(self.reachable(peer).await?.len() as u64)
        }

        async fn file_chunk(&self, _filename: &str, peer: IpAddr, chunk_index: u32) -> Result<Vec<u8>> {
            self.chunk_calls.lock().unwrap().push((peer, chunk_index));
            let content = self.reachable(peer).await?;
            let chunk_size = self.chunk_sizes.get(&peer).copied().unwrap_or(CHUNK);
            let range = chunk_range(chunk_index, chunk_size, content.len() as u64);
            if range.is_empty() {
                return Err(P2PError::FileNotFound(format!("chunk {}", chunk_index)));
            }
            Ok(content[range.start as usize..range.end as usize].to_vec())
        }
    }

    struct Setup {
        dir: TempDir,
        downloader: Downloader,
        source: Arc<MockSource>,
    }

    async fn setup(source: MockSource, advertised: &[IpAddr], policy: DownloadPolicy) -> Setup {
        let dir = TempDir::new().unwrap();
        let peers = PeerTable::new();
        for peer in advertised {
            peers
                .record_discovery(*peer, Some(vec!["shared.bin".to_string()]))
                .await;
        }
        let source = Arc::new(source);
        let downloader = Downloader::new(
            peers,
            SharedFolder::new(dir.path().to_path_buf(), Vec::new()),
            source.clone(),
            CHUNK,
            policy,
            MetricsCollector::new(),
        );
        Setup {
            dir,
            downloader,
            source,
        }
    }

    fn strict_without_retry() -> DownloadPolicy {
        DownloadPolicy {
            request_timeout_secs: None,
            max_retries: 0,
            rotate_peers: false,
            write_partial: false,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> Vec<DownloadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_round_robin_across_three_peers() {
        let peers = [ip(1), ip(2), ip(3)];
        let content = patterned(65);
        let s = setup(MockSource::serving(&peers, &content), &peers, strict_without_retry()).await;

        let report = s.downloader.download_file("shared.bin", None).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.chunk_count, 7);
        assert_eq!(std::fs::read(s.dir.path().join("shared.bin")).unwrap(), content);

        let calls = s.source.calls();
        assert_eq!(calls.len(), 7);
        for (peer, index) in calls {
            assert_eq!(peer, peers[index as usize % peers.len()]);
        }
    }

    #[tokio::test]
    async fn test_single_peer_serves_every_chunk() {
        let peers = [ip(1)];
        let content = patterned(35);
        let s = setup(MockSource::serving(&peers, &content), &peers, strict_without_retry()).await;

        s.downloader.download_file("shared.bin", None).await.unwrap();
        assert!(s.source.calls().iter().all(|(peer, _)| *peer == ip(1)));
        assert_eq!(s.source.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_reaches_total() {
        let peers = [ip(1), ip(2)];
        let content = patterned(45);
        let s = setup(MockSource::serving(&peers, &content), &peers, strict_without_retry()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        s.downloader.download_file("shared.bin", Some(tx)).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 5);
        let mut last = 0;
        let mut seen = HashSet::new();
        for event in events {
            let DownloadEvent::ChunkReceived(progress) = event else {
                panic!("unexpected {:?}", event);
            };
            assert!(progress.bytes_received > last);
            assert_eq!(progress.total_bytes, 45);
            assert_eq!(progress.peer, peers[progress.chunk_index as usize % 2]);
            last = progress.bytes_received;
            seen.insert(progress.chunk_index);
        }
        assert_eq!(last, 45);
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn test_best_effort_skips_chunks_of_unreachable_peer() {
        let peers = [ip(1), ip(2)];
        let content = patterned(40);
        let mut source = MockSource::serving(&peers, &content);
        source.down.insert(ip(2));
        let s = setup(source, &peers, DownloadPolicy::best_effort()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = s.downloader.download_file("shared.bin", Some(tx)).await.unwrap();

        assert_eq!(report.chunk_count, 4);
        assert_eq!(report.failed_chunks, vec![1, 3]);
        assert!(!report.is_complete());
        assert_eq!(report.bytes_received, 20);

        // Chunks 1 and 3 are simply missing: the file is chunk 0 followed by chunk 2.
        let written = std::fs::read(s.dir.path().join("shared.bin")).unwrap();
        let mut expected = content[0..10].to_vec();
        expected.extend_from_slice(&content[20..30]);
        assert_eq!(written, expected);

        // No retry anywhere: each chunk was asked for exactly once.
        assert_eq!(
            s.source.calls(),
            vec![(ip(1), 0), (ip(2), 1), (ip(1), 2), (ip(2), 3)]
        );

        let mut failures: Vec<u32> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                DownloadEvent::ChunkFailed { chunk_index, .. } => Some(chunk_index),
                _ => None,
            })
            .collect();
        failures.sort();
        assert_eq!(failures, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_strict_mode_refuses_partial_file() {
        let peers = [ip(1), ip(2)];
        let mut source = MockSource::serving(&peers, &patterned(40));
        source.down.insert(ip(2));
        let s = setup(source, &peers, strict_without_retry()).await;

        let result = s.downloader.download_file("shared.bin", None).await;
        assert!(matches!(result, Err(P2PError::IncompleteDownload(_))));
        assert!(!s.dir.path().join("shared.bin").exists());
    }

    #[tokio::test]
    async fn test_retry_rotates_to_alternate_peer() {
        let peers = [ip(1), ip(2)];
        let content = patterned(40);
        let mut source = MockSource::serving(&peers, &content);
        source.down.insert(ip(2));
        let policy = DownloadPolicy {
            request_timeout_secs: None,
            max_retries: 1,
            rotate_peers: true,
            write_partial: false,
        };
        let s = setup(source, &peers, policy).await;

        let report = s.downloader.download_file("shared.bin", None).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(std::fs::read(s.dir.path().join("shared.bin")).unwrap(), content);

        let calls = s.source.calls();
        assert!(calls.contains(&(ip(2), 1)));
        assert!(calls.contains(&(ip(1), 1)));
        assert!(calls.contains(&(ip(2), 3)));
        assert!(calls.contains(&(ip(1), 3)));
    }

    #[tokio::test]
    async fn test_timeout_turns_stall_into_retry() {
        let peers = [ip(1), ip(2)];
        let content = patterned(20);
        let mut source = MockSource::serving(&peers, &content);
        source.stalled.insert(ip(2));
        let policy = DownloadPolicy {
            request_timeout_secs: Some(1),
            max_retries: 1,
            rotate_peers: true,
            write_partial: false,
        };
        let s = setup(source, &peers, policy).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = s.downloader.download_file("shared.bin", Some(tx)).await.unwrap();
        assert!(report.is_complete());

        let timed_out = drain(&mut rx).into_iter().any(|event| {
            matches!(event, DownloadEvent::ChunkFailed { peer, chunk_index: 1, ref error, .. }
                if peer == ip(2) && error.contains("Timed out"))
        });
        assert!(timed_out);
    }

    #[tokio::test]
    async fn test_size_query_uses_first_candidate_only_without_retries() {
        let peers = [ip(1), ip(2)];
        let mut source = MockSource::serving(&peers, &patterned(20));
        source.down.insert(ip(1));
        let s = setup(source, &peers, DownloadPolicy::best_effort()).await;

        let result = s.downloader.download_file("shared.bin", None).await;
        assert!(matches!(result, Err(P2PError::ConnectionFailed(_))));
        assert!(s.source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_size_query_falls_through_with_retries() {
        let peers = [ip(1), ip(2)];
        let content = patterned(20);
        let mut source = MockSource::serving(&peers, &content);
        source.down.insert(ip(1));
        let policy = DownloadPolicy {
            request_timeout_secs: None,
            max_retries: 1,
            rotate_peers: true,
            write_partial: false,
        };
        let s = setup(source, &peers, policy).await;

        let report = s.downloader.download_file("shared.bin", None).await.unwrap();
        assert_eq!(report.total_bytes, 20);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_dead_or_unknown_peers_are_not_candidates() {
        let peers = [ip(1)];
        let s = setup(MockSource::serving(&peers, &patterned(5)), &peers, strict_without_retry()).await;
        s.downloader.peers.record_goodbye(ip(1)).await;

        assert!(matches!(
            s.downloader.download_file("shared.bin", None).await,
            Err(P2PError::NoPeersAvailable(_))
        ));
        assert!(matches!(
            s.downloader.download_file("other.bin", None).await,
            Err(P2PError::NoPeersAvailable(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let peers = [ip(1)];
        let s = setup(MockSource::serving(&peers, &patterned(5)), &peers, strict_without_retry()).await;

        for name in ["", "..", "../escape", "a/b", "a\\b"] {
            assert!(matches!(
                s.downloader.download_file(name, None).await,
                Err(P2PError::InvalidRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_file_downloads_without_chunk_requests() {
        let peers = [ip(1)];
        let s = setup(MockSource::serving(&peers, &[]), &peers, strict_without_retry()).await;

        let report = s.downloader.download_file("shared.bin", None).await.unwrap();
        assert_eq!(report.chunk_count, 0);
        assert!(report.is_complete());
        assert!(s.source.calls().is_empty());
        assert_eq!(std::fs::read(s.dir.path().join("shared.bin")).unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_wrong_length_chunk_fails_strict_download() {
        let peers = [ip(1)];
        let mut source = MockSource::serving(&peers, &patterned(20));
        source.chunk_sizes.insert(ip(1), 5);
        let s = setup(source, &peers, strict_without_retry()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = s.downloader.download_file("shared.bin", Some(tx)).await;
        assert!(matches!(result, Err(P2PError::IncompleteDownload(_))));
        assert!(!s.dir.path().join("shared.bin").exists());

        let rejected = drain(&mut rx)
            .into_iter()
            .filter(|event| {
                matches!(event, DownloadEvent::ChunkFailed { error, .. } if error.contains("Invalid response"))
            })
            .count();
        assert_eq!(rejected, 2);
    }

    #[tokio::test]
    async fn test_wrong_length_chunk_is_retried_elsewhere() {
        let peers = [ip(1), ip(2)];
        let content = patterned(40);
        let mut source = MockSource::serving(&peers, &content);
        source.chunk_sizes.insert(ip(2), 5);
        let policy = DownloadPolicy {
            request_timeout_secs: None,
            max_retries: 1,
            rotate_peers: true,
            write_partial: false,
        };
        let s = setup(source, &peers, policy).await;

        let report = s.downloader.download_file("shared.bin", None).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(std::fs::read(s.dir.path().join("shared.bin")).unwrap(), content);

        let calls = s.source.calls();
        assert!(calls.contains(&(ip(2), 1)));
        assert!(calls.contains(&(ip(1), 1)));
    }
}
