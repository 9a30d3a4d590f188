pub mod discovery;
pub mod transport;

pub use discovery::{Discovery, NodeEvent};
pub use transport::Transport;
