use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    candidates: Vec<IpAddr>,
    rotate_on_retry: bool,
}

impl ChunkScheduler {
    pub fn new(candidates: Vec<IpAddr>, rotate_on_retry: bool) -> Self {
        Self {
            candidates,
            rotate_on_retry,
        }
    }

    pub fn candidates(&self) -> &[IpAddr] {
        &self.candidates
    }

    pub fn peer_count(&self) -> usize {
        self.candidates.len()
    }

    /// Peer for the given attempt at a chunk. Attempt 0 is `candidates[i mod N]`;
    /// with rotation, attempt `r` moves `r` places further along the list.
    pub fn peer_for(&self, chunk_index: u32, attempt: u32) -> Option<IpAddr> {
        if self.candidates.is_empty() {
            return None;
        }
        let shift = if self.rotate_on_retry { attempt as usize } else { 0 };
        let slot = (chunk_index as usize + shift) % self.candidates.len();
        Some(self.candidates[slot])
    }
}
