pub mod client;
pub mod downloader;
pub mod scheduler;
pub mod server;

pub use client::{ChunkSource, TransferClient};
pub use downloader::{ChunkProgress, DownloadEvent, DownloadReport, Downloader};
pub use scheduler::ChunkScheduler;
pub use server::TransferServer;
