use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;

/// Initialise the global logger. `RUST_LOG` still takes precedence over `level`.
pub fn setup_logging(level: LevelFilter) {
    let mut builder = Builder::new();

    builder
        .target(Target::Stdout)
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();
}
