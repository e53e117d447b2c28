// ABOUTME: Shared logging setup for warden binaries.
// ABOUTME: init() logs to stderr, init_file() to a per-app file, init_for() filters to one crate.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

/// Log to stderr at INFO, overridable with RUST_LOG.
pub fn init() {
    tracing_subscriber::fmt().with_env_filter(level_filter(tracing::Level::INFO)).init();
}

fn level_filter(level: tracing::Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(level.into())
}

/// Where `init_file` writes for `app_name`:
/// `~/.config/warden/{app_name}/{app_name}.log`
pub fn log_path(app_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| {
        d.join("warden")
            .join(app_name)
            .join(format!("{app_name}.log"))
    })
}

/// Log to a file at WARN, overridable with RUST_LOG. Used by interactive
/// binaries whose stdout belongs to the conversation.
///
/// Returns the log path. If setup fails, prints a warning to stderr and
/// continues without logging.
pub fn init_file(app_name: &str) -> Option<PathBuf> {
    match init_file_inner(app_name) {
        Ok(path) => Some(path),
        Err(e) => {
            eprintln!("Warning: failed to set up file logging: {e}");
            None
        }
    }
}

fn init_file_inner(app_name: &str) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
    let path = log_path(app_name).ok_or("could not determine config directory")?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(level_filter(tracing::Level::WARN))
        .with_ansi(false)
        .try_init()?;

    Ok(path)
}

/// Log to stderr at INFO for `crate_name` and WARN for everything else.
pub fn init_for(crate_name: &str) {
    tracing_subscriber::fmt().with_env_filter(crate_filter(crate_name)).init();
}

fn crate_filter(crate_name: &str) -> EnvFilter {
    let directive = format!("{}=info", crate_name.replace('-', "_"));
    level_filter(tracing::Level::WARN).add_directive(
        directive
            .parse()
            .unwrap_or_else(|_| tracing::Level::INFO.into()),
    )
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `emit` under a scoped subscriber using `filter` and return what it wrote.
    fn capture(filter: EnvFilter, emit: impl FnOnce()) -> String {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        let bytes = out.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn log_path_is_per_app() {
        if let Some(path) = log_path("warden") {
            assert!(path.ends_with("warden/warden/warden.log"));
        }
    }

    #[test]
    fn stderr_filter_keeps_info_and_drops_debug() {
        let out = capture(level_filter(tracing::Level::INFO), || {
            tracing::info!(target: "anything", "session opened");
            tracing::debug!(target: "anything", "frame details");
        });
        assert!(out.contains("session opened"));
        assert!(!out.contains("frame details"));
    }

    #[test]
    fn crate_filter_favors_named_crate() {
        let out = capture(crate_filter("warden-stream"), || {
            tracing::info!(target: "warden_stream::controller", "connection open");
            tracing::info!(target: "hyper::client", "pool checkout");
            tracing::warn!(target: "hyper::client", "pool exhausted");
        });
        assert!(out.contains("connection open"));
        assert!(!out.contains("pool checkout"));
        assert!(out.contains("pool exhausted"));
    }

    #[test]
    fn crate_filter_normalizes_dashes() {
        let filter = crate_filter("warden-stream").to_string();
        assert!(filter.contains("warden_stream=info"));
    }
}
