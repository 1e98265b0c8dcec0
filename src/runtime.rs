//! Reusable SmartPark runtime.
//!
//! Provides [`ServiceHandle`] that wires the stores, services and background
//! tasks together and shuts them down within a bounded time.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::events::{create_event_bus, SharedEventBus};
use crate::application::ports::NotificationChannel;
use crate::application::parking::{
    detection_channel, AdminService, DetectionListener, DetectionPoller, DetectionPublisher,
    ExpirationSweeper, LifecycleManager, SpotRegistry, WaitlistDispatcher,
};
use crate::config::{AppConfig, ConfigError};
use crate::domain::{DomainError, SharedClock, SharedSettings, SpotStatus, SystemClock};
use crate::infrastructure::{
    InMemoryAuditLog, InMemoryDetectionFeed, InMemoryReservationStore, InMemorySpotStore,
    InMemoryWaitlist, LogNotificationChannel,
};
use crate::shared::{KeyedLocks, ShutdownCoordinator, ShutdownSignal};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to seed spots: {0}")]
    Seed(#[from] DomainError),
}

/// Handle to a running reservation engine.
pub struct ServiceHandle {
    pub lifecycle: Arc<LifecycleManager>,
    pub registry: Arc<SpotRegistry>,
    pub admin: Arc<AdminService>,
    pub dispatcher: Arc<WaitlistDispatcher>,
    pub detections: DetectionPublisher,
    /// Present when the polling fallback is configured
    pub detection_feed: Option<Arc<InMemoryDetectionFeed>>,
    pub event_bus: SharedEventBus,
    pub config: AppConfig,

    shutdown: ShutdownCoordinator,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ServiceHandle {
    /// Start with the system clock.
    pub async fn start(config: AppConfig) -> Result<Self, RuntimeError> {
        Self::start_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Start with the log-backed notification channel.
    pub async fn start_with_clock(config: AppConfig, clock: SharedClock) -> Result<Self, RuntimeError> {
        Self::start_with(config, clock, Arc::new(LogNotificationChannel)).await
    }

    /// Start the engine:
    /// 1. Build in-memory stores and register the configured spots
    /// 2. Wire the lifecycle manager, dispatcher and admin service
    /// 3. Start the sweeper, dispatcher, detection listener and (optionally) poller
    pub async fn start_with(
        config: AppConfig,
        clock: SharedClock,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        info!("Starting SmartPark reservation engine...");

        // ── Stores ─────────────────────────────────────────────
        let registry = Arc::new(SpotRegistry::new(Arc::new(InMemorySpotStore::new()), clock.clone()));
        for seed in &config.spots {
            registry
                .register(&seed.id, &seed.zone, seed.status.unwrap_or(SpotStatus::Available))
                .await?;
        }
        info!(spots = config.spots.len(), "🅿️ Spots registered");

        let reservations = Arc::new(InMemoryReservationStore::new());
        let waitlist = Arc::new(InMemoryWaitlist::new());
        let audit = Arc::new(InMemoryAuditLog::new());

        // ── Services ───────────────────────────────────────────
        let event_bus = create_event_bus();
        let settings = SharedSettings::new(config.toggles.clone());
        let locks = KeyedLocks::new();

        let lifecycle = Arc::new(LifecycleManager::new(
            registry.clone(),
            reservations.clone(),
            locks.clone(),
            Arc::new(settings.clone()),
            event_bus.clone(),
            clock.clone(),
            config.lifecycle.clone(),
        ));

        let admin = Arc::new(AdminService::new(
            registry.clone(),
            reservations,
            audit,
            settings,
            locks,
            event_bus.clone(),
            clock.clone(),
            config.lifecycle.lock_timeout(),
        ));

        let dispatcher = Arc::new(
            WaitlistDispatcher::new(lifecycle.clone(), waitlist, notifier, event_bus.clone())
                .with_reconcile_interval(Duration::from_secs(config.sweeper.interval_secs)),
        );

        // ── Background tasks ───────────────────────────────────
        let shutdown = ShutdownCoordinator::new(config.shutdown_timeout_secs());
        let signal = shutdown.signal();
        let mut tasks = Vec::new();

        let sweeper = Arc::new(
            ExpirationSweeper::new(lifecycle.clone(), event_bus.clone()).with_config(config.sweeper.clone()),
        );
        tasks.push(("sweeper", sweeper.start(signal.clone())));
        tasks.push(("dispatcher", dispatcher.clone().start(signal.clone())));

        let (detections, receiver) = detection_channel(config.detection.channel_capacity);
        let listener = Arc::new(DetectionListener::new(lifecycle.clone()));
        tasks.push(("detection listener", listener.start(receiver, signal.clone())));

        let detection_feed = match config.detection.poll_interval_secs {
            Some(secs) => {
                let feed = Arc::new(InMemoryDetectionFeed::new(clock.clone()));
                let poller = Arc::new(DetectionPoller::new(
                    lifecycle.clone(),
                    feed.clone(),
                    config.detection.window_minutes,
                    Duration::from_secs(secs),
                ));
                tasks.push(("detection poller", poller.start(signal.clone())));
                Some(feed)
            }
            None => None,
        };

        info!(tasks = tasks.len(), "🚀 SmartPark started");

        Ok(Self {
            lifecycle,
            registry,
            admin,
            dispatcher,
            detections,
            detection_feed,
            event_bus,
            config,
            shutdown,
            tasks,
        })
    }

    /// Get a cloneable shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install OS signal listeners (SIGTERM, SIGINT) that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    /// Send the shutdown signal without waiting.
    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|(_, task)| !task.is_finished())
    }

    /// Trigger shutdown and join every task within `shutdown_timeout_secs`.
    /// Returns `false` if some task did not stop in time.
    pub async fn shutdown(self) -> bool {
        info!("🛑 Shutting down SmartPark...");
        self.trigger_shutdown();

        let tasks = self.tasks;
        let completed = self
            .shutdown
            .shutdown_with_cleanup(|| async move {
                for (name, task) in tasks {
                    match task.await {
                        Ok(()) => info!(task = name, "Task stopped"),
                        Err(e) => error!(task = name, error = %e, "Task panicked"),
                    }
                }
            })
            .await;

        info!("👋 SmartPark shutdown complete");
        completed
    }
}

/// Initialize tracing (logging) from the application config.
///
/// Call this once at process startup (before [`ServiceHandle::start`]).
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
