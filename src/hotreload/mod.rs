use crate::circuit_breaker::CircuitBreakerBank;
use crate::config::InterlinkConfig;
use crate::error::{InterlinkError, Result};
use crate::registry::Registry;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Hot reload configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HotReloadConfig {
    /// Enable hot reload
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Debounce delay in milliseconds (to avoid reloading multiple times for rapid changes)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_enabled() -> bool {
    false
}

fn default_debounce_ms() -> u64 {
    1000
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Apply a validated configuration to a running registry and breaker bank.
///
/// Services missing from `config` are deregistered; surviving services keep
/// their health state. Breakers whose settings changed are updated in place
/// and keep their state.
pub async fn apply_config(
    config: &InterlinkConfig,
    registry: &Registry,
    breakers: &CircuitBreakerBank,
) -> Result<()> {
    config.validate()?;
    registry.reconcile(&config.services)?;

    for service in &config.services {
        breakers
            .configure(&service.name, config.breaker_config_for(service))
            .await?;
    }

    info!(services = config.services.len(), "Configuration applied");
    Ok(())
}

/// Watches the configuration file and re-applies it on change
pub struct HotReloadService {
    config_path: PathBuf,
    registry: Registry,
    breakers: CircuitBreakerBank,
    debounce_duration: Duration,
}

impl HotReloadService {
    /// Create a new hot reload service
    pub fn new(
        config_path: PathBuf,
        registry: Registry,
        breakers: CircuitBreakerBank,
        debounce_ms: u64,
    ) -> Self {
        Self {
            config_path,
            registry,
            breakers,
            debounce_duration: Duration::from_millis(debounce_ms),
        }
    }

    /// Start watching the configuration file until `shutdown` is cancelled
    pub fn start(self, shutdown: CancellationToken) -> Result<JoinHandle<()>> {
        let (tx, rx) = mpsc::channel(100);
        let watched = self.config_path.clone();

        let mut watcher: RecommendedWatcher = Watcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let relevant = matches!(
                        event.kind,
                        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                    ) && event.paths.iter().any(|p| p.file_name() == watched.file_name());
                    if relevant {
                        debug!(?event, "Config file change detected");
                        let _ = tx.blocking_send(());
                    }
                }
            },
            Config::default(),
        )
        .map_err(|e| InterlinkError::Internal(format!("Failed to create file watcher: {}", e)))?;

        // Editors often replace the file, so watch its directory
        let dir = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| InterlinkError::Internal(format!("Failed to watch config file: {}", e)))?;

        info!(
            path = %self.config_path.display(),
            debounce_ms = self.debounce_duration.as_millis() as u64,
            "Hot reload watcher started"
        );

        Ok(tokio::spawn(async move {
            // Keep watcher alive for the lifetime of the task
            let _watcher = watcher;
            self.process_changes(rx, shutdown).await;
        }))
    }

    /// Reload once per burst of change notifications, after the file has been
    /// quiet for the debounce period
    async fn process_changes(self, mut changes: mpsc::Receiver<()>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                change = changes.recv() => {
                    if change.is_none() {
                        break;
                    }
                }
            }

            let settled = loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break false,
                    change = changes.recv() => match change {
                        Some(()) => debug!("Config file still changing, restarting debounce"),
                        None => break false,
                    },
                    _ = tokio::time::sleep(self.debounce_duration) => break true,
                }
            };
            if !settled {
                break;
            }

            match self.reload().await {
                Ok(()) => info!("Configuration reloaded successfully"),
                Err(e) => error!(error = %e, "Failed to reload configuration, keeping current state"),
            }
        }

        info!("Hot reload watcher stopped");
    }

    /// Reload configuration from file and apply it
    pub async fn reload(&self) -> Result<()> {
        info!(path = %self.config_path.display(), "Reloading configuration");
        let config = InterlinkConfig::load(&self.config_path)?;
        apply_config(&config, &self.registry, &self.breakers).await
    }
}
