//! Wire messages.
//!
//! Discovery datagrams are plain ASCII:
//!
//! ```text
//! Discovery:<secret>:<file1>,<file2>,...
//! Goodbye:<secret>
//! ```
//!
//! Transfer requests travel over TCP as length-prefixed text:
//!
//! ```text
//! FileSizeRequest:<filename>
//! FileChunkRequest:<filename>:<chunkIndex>
//! ```
//!
//! Each message is parsed once at the socket boundary into one of the enums below.

use std::fmt;

use crate::utils::{P2PError, Result};

const DISCOVERY_PREFIX: &str = "Discovery:";
const GOODBYE_PREFIX: &str = "Goodbye:";
const FILE_SIZE_PREFIX: &str = "FileSizeRequest:";
const FILE_CHUNK_PREFIX: &str = "FileChunkRequest:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    /// Periodic presence beacon. `files` is `None` when the sender omitted the
    /// catalog section entirely, which leaves any previous catalog in place.
    Announce {
        secret: String,
        files: Option<Vec<String>>,
    },
    Goodbye {
        secret: String,
    },
}

impl DiscoveryMessage {
    pub fn announce(secret: &str, files: Vec<String>) -> Self {
        Self::Announce {
            secret: secret.to_string(),
            files: Some(files),
        }
    }

    pub fn goodbye(secret: &str) -> Self {
        Self::Goodbye {
            secret: secret.to_string(),
        }
    }

    pub fn secret(&self) -> &str {
        match self {
            Self::Announce { secret, .. } | Self::Goodbye { secret } => secret,
        }
    }

    pub fn is_authorized(&self, expected: &str) -> bool {
        self.secret() == expected
    }

    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(datagram).ok()?.trim();

        if let Some(rest) = text.strip_prefix(DISCOVERY_PREFIX) {
            let mut parts = rest.splitn(2, ':');
            let secret = parts.next()?.to_string();
            let files = parts.next().map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            });
            return Some(Self::Announce { secret, files });
        }

        if let Some(secret) = text.strip_prefix(GOODBYE_PREFIX) {
            return Some(Self::Goodbye {
                secret: secret.to_string(),
            });
        }

        None
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for DiscoveryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Announce { secret, files } => {
                write!(f, "{}{}", DISCOVERY_PREFIX, secret)?;
                if let Some(files) = files {
                    write!(f, ":{}", files.join(","))?;
                }
                Ok(())
            }
            Self::Goodbye { secret } => write!(f, "{}{}", GOODBYE_PREFIX, secret),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRequest {
    FileSize { filename: String },
    FileChunk { filename: String, chunk_index: u32 },
}

impl TransferRequest {
    pub fn file_size(filename: &str) -> Self {
        Self::FileSize {
            filename: filename.to_string(),
        }
    }

    pub fn file_chunk(filename: &str, chunk_index: u32) -> Self {
        Self::FileChunk {
            filename: filename.to_string(),
            chunk_index,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        if let Some(filename) = text.strip_prefix(FILE_SIZE_PREFIX) {
            return Ok(Self::file_size(filename));
        }

        if let Some(rest) = text.strip_prefix(FILE_CHUNK_PREFIX) {
            // The index follows the last ':' so filenames may contain colons.
            let (filename, index) = rest.rsplit_once(':').ok_or_else(|| {
                P2PError::InvalidMessage(format!("Chunk request without index: {}", text))
            })?;
            let chunk_index = index.trim().parse::<u32>().map_err(|e| {
                P2PError::InvalidMessage(format!("Bad chunk index {:?}: {}", index, e))
            })?;
            return Ok(Self::file_chunk(filename, chunk_index));
        }

        Err(P2PError::InvalidMessage(format!(
            "Unknown request: {}",
            text.chars().take(64).collect::<String>()
        )))
    }
}

impl fmt::Display for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileSize { filename } => write!(f, "{}{}", FILE_SIZE_PREFIX, filename),
            Self::FileChunk {
                filename,
                chunk_index,
            } => write!(f, "{}{}:{}", FILE_CHUNK_PREFIX, filename, chunk_index),
        }
    }
}
