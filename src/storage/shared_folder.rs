use log::{debug, info, warn};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::storage::chunk::chunk_offset;
use crate::utils::{P2PError, Result};

/// The set of files this node offers: the top level of the shared root plus
/// the top level of each selected subfolder.
///
/// Nothing is cached. Every call walks the filesystem again, so files added or
/// removed between calls are picked up immediately.
#[derive(Debug, Clone)]
pub struct SharedFolder {
    root: PathBuf,
    subfolders: Vec<PathBuf>,
}

impl SharedFolder {
    pub fn new(root: PathBuf, subfolders: Vec<PathBuf>) -> Self {
        let subfolders = subfolders
            .into_iter()
            .map(|p| if p.is_absolute() { p } else { root.join(p) })
            .collect();
        Self { root, subfolders }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        async_fs::create_dir_all(&self.root)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create {:?}: {}", self.root, e)))
    }

    /// Base names of every advertised file, root entries first, then each
    /// subfolder in selection order.
    pub async fn list_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        Self::collect_top_level(&self.root, &mut files).await;
        for folder in &self.subfolders {
            Self::collect_top_level(folder, &mut files).await;
        }
        files
    }

    async fn collect_top_level(dir: &Path, files: &mut Vec<String>) {
        let mut entries = match async_fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read directory {:?}: {}", dir, e);
                return;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_file = entry
                        .file_type()
                        .await
                        .map(|t| t.is_file())
                        .unwrap_or(false);
                    if is_file {
                        files.push(entry.file_name().to_string_lossy().into_owned());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read entry in {:?}: {}", dir, e);
                    break;
                }
            }
        }
    }

    /// Recursive search under the root for a regular file named `filename`.
    /// The first match wins; walk order between sibling directories is unspecified.
    pub async fn find_file(&self, filename: &str) -> Option<PathBuf> {
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match async_fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Failed to read directory {:?}: {}", dir, e);
                    continue;
                }
            };

            let mut subdirs = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_file() && entry.file_name().to_string_lossy() == filename {
                    return Some(entry.path());
                }
                if file_type.is_dir() {
                    subdirs.push(entry.path());
                }
            }
            pending.extend(subdirs.into_iter().rev());
        }

        None
    }

    async fn resolve(&self, filename: &str) -> Result<PathBuf> {
        self.find_file(filename)
            .await
            .ok_or_else(|| P2PError::FileNotFound(filename.to_string()))
    }

    pub async fn file_size(&self, filename: &str) -> Result<u64> {
        let path = self.resolve(filename).await?;
        let metadata = async_fs::metadata(&path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read metadata of {:?}: {}", path, e)))?;
        Ok(metadata.len())
    }

    /// Positioned read of chunk `index`. Returns fewer than `chunk_size` bytes
    /// for the final chunk and none at all past the end of the file.
    pub async fn read_chunk(&self, filename: &str, index: u32, chunk_size: u64) -> Result<Vec<u8>> {
        let path = self.resolve(filename).await?;
        let file = async_fs::File::open(&path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to open {:?}: {}", path, e)))?;

        let len = file.metadata().await?.len();
        let start = chunk_offset(index, chunk_size);
        if start >= len {
            return Ok(Vec::new());
        }

        let mut file = file;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buffer = Vec::with_capacity(chunk_size.min(len - start) as usize);
        file.take(chunk_size)
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read chunk {}: {}", index, e)))?;

        debug!("Read chunk {} of {} ({} bytes)", index, filename, buffer.len());
        Ok(buffer)
    }

    /// Create (or truncate) `<root>/<filename>` and write `chunks` in order.
    pub async fn write_file<'a, I>(&self, filename: &str, chunks: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let output_path = self.root.join(filename);
        let mut file = async_fs::File::create(&output_path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create output file: {}", e)))?;

        for chunk_data in chunks {
            file.write_all(chunk_data)
                .await
                .map_err(|e| P2PError::IoError(format!("Failed to write chunk: {}", e)))?;
        }

        file.flush()
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to flush file: {}", e)))?;

        info!("File written: {:?}", output_path);
        Ok(output_path)
    }
}
