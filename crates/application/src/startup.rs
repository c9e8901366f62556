//! Startup sequence: decide whether the models are present before anything
//! renders a ready or not-ready view, and fetch whatever is missing.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tally_events::{event_names, publish, DownloadProgressEvent, EventBusRef};
use tally_models::{ModelName, ModelStore};
use tokio::sync::watch;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Presence not determined yet.
    Checking,
    Ready,
    Missing(BTreeSet<ModelName>),
}

/// Publishes model readiness, starting from [`Readiness::Checking`].
pub struct ReadinessProbe {
    store: Arc<ModelStore>,
    tx: watch::Sender<Readiness>,
}

impl ReadinessProbe {
    pub fn new(store: Arc<ModelStore>) -> Self {
        let (tx, _) = watch::channel(Readiness::Checking);
        Self { store, tx }
    }

    pub fn current(&self) -> Readiness {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.tx.subscribe()
    }

    /// Probe the filesystem and publish the result.
    pub async fn check(&self) -> Readiness {
        let store = Arc::clone(&self.store);
        let missing = match tokio::task::spawn_blocking(move || store.missing()).await {
            Ok(missing) => missing,
            Err(e) => {
                tracing::error!("Model presence check failed: {}", e);
                return self.current();
            }
        };

        let readiness = if missing.is_empty() {
            Readiness::Ready
        } else {
            Readiness::Missing(missing)
        };
        tracing::info!(?readiness, "Model readiness determined");
        self.tx.send_replace(readiness.clone());
        readiness
    }
}

/// Download every missing artifact, smallest first, one at a time.
///
/// Stops at the first failure. Returns the paths that were downloaded.
pub async fn prepare_models<F>(store: &ModelStore, on_progress: F) -> Result<Vec<PathBuf>>
where
    F: Fn(ModelName, u8) + Send + Sync,
{
    let mut downloaded = Vec::new();
    for name in store.missing() {
        tracing::info!(model = %name, "Fetching missing model");
        let path = store
            .download(name, |percent| on_progress(name, percent))
            .await?;
        downloaded.push(path);
    }
    Ok(downloaded)
}

/// Progress callback that publishes `models:download_progress` events.
pub fn bus_progress(bus: EventBusRef) -> impl Fn(ModelName, u8) + Send + Sync {
    move |model, percent| {
        publish(
            bus.as_ref(),
            event_names::DOWNLOAD_PROGRESS,
            &DownloadProgressEvent { model, percent },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_events::InMemoryEventBus;
    use tally_models::StoreConfig;
    use tempfile::tempdir;

    fn seed(store: &ModelStore, name: ModelName) {
        let path = store.local_path(name).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"weights").unwrap();
    }

    #[tokio::test]
    async fn starts_checking_then_reports_missing() {
        let dir = tempdir().unwrap();
        let store = Arc::new(ModelStore::new(StoreConfig::rooted_at(dir.path())));
        seed(&store, ModelName::Small);

        let probe = ReadinessProbe::new(Arc::clone(&store));
        let rx = probe.subscribe();
        assert_eq!(probe.current(), Readiness::Checking);

        let readiness = probe.check().await;
        assert_eq!(readiness, Readiness::Missing(BTreeSet::from([ModelName::Large])));
        assert_eq!(*rx.borrow(), readiness);

        seed(&store, ModelName::Large);
        assert_eq!(probe.check().await, Readiness::Ready);
    }

    #[tokio::test]
    async fn prepare_with_nothing_missing_does_nothing() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(StoreConfig::rooted_at(dir.path()));
        seed(&store, ModelName::Small);
        seed(&store, ModelName::Large);

        let downloaded = prepare_models(&store, |_, _| panic!("no progress expected"))
            .await
            .unwrap();
        assert!(downloaded.is_empty());
    }

    #[test]
    fn bus_progress_publishes_events() {
        let bus = Arc::new(InMemoryEventBus::new());
        let progress = bus_progress(bus.clone());
        progress(ModelName::Small, 30);
        let events = bus.events_for("models:download_progress");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["model"], "small");
        assert_eq!(events[0].payload["percent"], 30);
    }
}
