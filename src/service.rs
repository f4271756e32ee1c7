use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::engine::{Materializer, Scheduler};
use crate::observability;
use crate::store::{run_compactor, WalStore};

/// Everything an embedding caller needs: one journal-backed store shared by
/// the scheduler and the materializer, plus its background compactor.
pub struct Services {
    pub store: Arc<WalStore>,
    pub scheduler: Scheduler<WalStore>,
    pub materializer: Materializer<WalStore>,
    shutdown: CancellationToken,
}

impl Services {
    /// Open (or create) the journal under `config.data_dir` and start the
    /// compactor. Must be called from inside a tokio runtime.
    ///
    /// Also installs the fmt tracing subscriber and, when
    /// `config.metrics_port` is set, the Prometheus exporter. Both are
    /// process-global and installed at most once; an embedding caller that
    /// already set a subscriber keeps its own.
    pub fn open(config: &Config) -> std::io::Result<Self> {
        observability::init_tracing();
        observability::init(config.metrics_port).map_err(std::io::Error::other)?;
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(WalStore::open(&config.journal_path())?);

        let shutdown = CancellationToken::new();
        let compactor_store = store.clone();
        let threshold = config.compact_threshold;
        let compactor_shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_compactor(compactor_store, threshold, compactor_shutdown).await;
        });

        info!(
            "slotbook ready: data_dir={} compact_threshold={} horizon_days={}",
            config.data_dir.display(),
            config.compact_threshold,
            config.horizon_days
        );
        Ok(Self {
            scheduler: Scheduler::new(store.clone()),
            materializer: Materializer::new(store.clone()).with_horizon_days(config.horizon_days),
            store,
            shutdown,
        })
    }

    /// Stop background tasks. In-flight operations are not interrupted.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Services {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_service").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn open_creates_data_dir_and_shares_one_store() {
        let config = Config {
            data_dir: test_data_dir("shared"),
            ..Config::default()
        };
        let services = Services::open(&config).unwrap();
        assert!(config.data_dir.is_dir());

        let ctx = CancellationToken::new();
        let provider = Ulid::new();
        let slot = services
            .materializer
            .create_slot(&ctx, provider, 3_600_000, 7_200_000)
            .await
            .unwrap();
        services
            .scheduler
            .book_slot(&ctx, Ulid::new(), Ulid::new(), slot.id)
            .await
            .unwrap();

        let free = services
            .materializer
            .list_free_slots(&ctx, provider, 0, 10_800_000)
            .await
            .unwrap();
        assert!(free.is_empty());
        services.shutdown();
    }

    #[tokio::test]
    async fn reopen_sees_previous_writes() {
        let config = Config {
            data_dir: test_data_dir("reopen"),
            ..Config::default()
        };
        let ctx = CancellationToken::new();
        let user = Ulid::new();
        {
            let services = Services::open(&config).unwrap();
            services
                .scheduler
                .create_booking(&ctx, Ulid::new(), user, 3_600_000, 30)
                .await
                .unwrap();
        }

        let services = Services::open(&config).unwrap();
        let bookings = services.scheduler.list_user_bookings(&ctx, user).await.unwrap();
        assert_eq!(bookings.len(), 1);
    }

    #[tokio::test]
    async fn metrics_port_installs_exporter_once() {
        let config = Config {
            data_dir: test_data_dir("metrics"),
            metrics_port: Some(0),
            ..Config::default()
        };
        let first = Services::open(&config).unwrap();
        // A second open in the same process must not fail on the global recorder.
        let second = Services::open(&Config {
            data_dir: test_data_dir("metrics_again"),
            ..config.clone()
        })
        .unwrap();
        assert!(observability::EXPORTER_PORT.lock().unwrap().is_some());

        let ctx = CancellationToken::new();
        first
            .scheduler
            .create_booking(&ctx, Ulid::new(), Ulid::new(), 3_600_000, 30)
            .await
            .unwrap();
        assert!(second.scheduler.list_all_bookings(&ctx).await.unwrap().is_empty());
    }
}
