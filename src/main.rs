mod cli;

use std::{fs::OpenOptions, path::Path, sync::Mutex};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let data_dir = soulforge::config::base_data_dir()?;
    setup_tracing(&data_dir);
    let result = cli::run(&data_dir);
    if let Err(err) = &result {
        tracing::error!(error = %format!("{err:#}"), "command failed");
    }
    result
}

fn setup_tracing(data_dir: &Path) {
    let log_path = data_dir.join("soulforge.log");
    let file = std::fs::create_dir_all(data_dir)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&log_path));

    match file {
        Ok(file) => {
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .init();
            tracing::debug!(path = %log_path.display(), "logging initialized");
        }
        Err(err) => {
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            tracing::warn!(path = %log_path.display(), %err, "log file unavailable, logging to stderr");
        }
    }
}
