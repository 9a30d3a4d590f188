pub mod chunk;
pub mod shared_folder;

pub use chunk::{CHUNK_SIZE, chunk_count, chunk_offset, chunk_range};
pub use shared_folder::SharedFolder;
