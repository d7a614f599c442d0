//! Route hot reload.
//!
//! The watcher re-reads the configuration file on change, skips rewrites that
//! leave the text untouched, and compiles every route (bridge sections
//! included) before handing the new table over. A file that fails any step is
//! logged and ignored, so the live table is only ever replaced by one that
//! compiled.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::error::BridgeError;
use crate::routing::RouteTable;

/// Result of one reload attempt.
#[derive(Debug)]
pub enum Reload {
    /// File content is identical to the last applied version.
    Unchanged,
    Updated(RouteTable),
}

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("failed to compile routes: {0}")]
    Routes(#[from] BridgeError),
}

/// Tracks the last applied file content and compiles new versions.
#[derive(Debug)]
pub struct Reloader {
    path: PathBuf,
    applied: Option<String>,
}

impl Reloader {
    /// The current file content counts as applied.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            applied: fs::read_to_string(path).ok(),
        }
    }

    pub fn reload(&mut self) -> Result<Reload, ReloadError> {
        let content = fs::read_to_string(&self.path).map_err(ConfigError::Io)?;
        if self.applied.as_deref() == Some(content.as_str()) {
            return Ok(Reload::Unchanged);
        }

        let config = parse_config(&content)?;
        let table = RouteTable::from_config(&config.routes)?;
        self.applied = Some(content);
        Ok(Reload::Updated(table))
    }
}

/// Watches the configuration file and emits compiled route tables.
pub struct ConfigWatcher {
    reloader: Reloader,
    update_tx: mpsc::UnboundedSender<RouteTable>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<RouteTable>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                reloader: Reloader::new(path),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            mut reloader,
            update_tx,
        } = self;
        let path = reloader.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match reloader.reload() {
                        Ok(Reload::Unchanged) => {
                            tracing::debug!(path = ?reloader.path, "Config file touched without changes");
                        }
                        Ok(Reload::Updated(table)) => {
                            tracing::info!(routes = table.len(), "Config file changed, routes compiled");
                            let _ = update_tx.send(table);
                        }
                        Err(e) => tracing::error!(
                            error = %e,
                            "Failed to reload config. Keeping current routes."
                        ),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTES: &str = r#"
        [[routes]]
        name = "user"
        upstream = "127.0.0.1:20880"

        [routes.bridge.context]
        service = "com.example.UserService"
        method = "getUser"
    "#;

    struct TempConfig(PathBuf);

    impl TempConfig {
        fn new(content: &str) -> Self {
            let path =
                std::env::temp_dir().join(format!("dubbo-bridge-watch-{}.toml", uuid::Uuid::new_v4()));
            fs::write(&path, content).unwrap();
            Self(path)
        }

        fn write(&self, content: &str) {
            fs::write(&self.0, content).unwrap();
        }
    }

    impl Drop for TempConfig {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    #[test]
    fn initial_content_counts_as_applied() {
        let file = TempConfig::new(ROUTES);
        let mut reloader = Reloader::new(&file.0);
        assert!(matches!(reloader.reload().unwrap(), Reload::Unchanged));
    }

    #[test]
    fn changed_content_is_compiled_once() {
        let file = TempConfig::new("");
        let mut reloader = Reloader::new(&file.0);

        file.write(ROUTES);
        match reloader.reload().unwrap() {
            Reload::Updated(table) => assert_eq!(table.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(reloader.reload().unwrap(), Reload::Unchanged));
    }

    #[test]
    fn broken_bridge_is_rejected_and_retried() {
        let file = TempConfig::new("");
        let mut reloader = Reloader::new(&file.0);

        let broken = format!(
            "{ROUTES}\n[[routes.bridge.context.parameters]]\ntype = \"int\"\nname = \"n\"\ndefault = \"nope\"\n"
        );
        file.write(&broken);
        let err = reloader.reload().unwrap_err();
        assert!(err.to_string().contains("Validation failed"), "{err}");

        // A failed version is not remembered as applied.
        assert!(reloader.reload().is_err());

        file.write(ROUTES);
        assert!(matches!(reloader.reload().unwrap(), Reload::Updated(_)));
    }

    #[test]
    fn missing_file_is_reported() {
        let file = TempConfig::new(ROUTES);
        let mut reloader = Reloader::new(&file.0);
        fs::remove_file(&file.0).unwrap();
        assert!(matches!(
            reloader.reload().unwrap_err(),
            ReloadError::Config(ConfigError::Io(_))
        ));
    }
}
