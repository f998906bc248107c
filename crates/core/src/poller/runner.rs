//! Stage poller implementation.
//!
//! Each stage gets its own loop on a fixed interval. Handlers run on
//! spawned tasks and share one pool of slots, so a slow stage cannot hold
//! more than the configured number of handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::session::{Session, SessionError, SessionPatch, SessionStatus, SessionStore};
use crate::stage::{Stage, StageError, StageHandler, StageJob, StageOutcome};
use crate::workdir::WorkdirLayout;

use super::config::PollerConfig;
use super::types::{ActiveStage, PollerError, PollerStatus};

/// State shared between the poller handle, its loops and handler tasks.
struct Shared {
    config: PollerConfig,
    store: Arc<dyn SessionStore>,
    layout: WorkdirLayout,
    active: RwLock<HashMap<String, ActiveStage>>,
    /// `None` when the handler count is unlimited.
    slots: Option<Arc<Semaphore>>,
}

/// Drives sessions through the preprocess, deface and finalize stages.
pub struct StagePoller {
    shared: Arc<Shared>,
    handlers: Vec<Arc<dyn StageHandler>>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl StagePoller {
    /// Create a poller. Stages without a handler are never claimed by this worker.
    pub fn new(
        config: PollerConfig,
        store: Arc<dyn SessionStore>,
        layout: WorkdirLayout,
        handlers: Vec<Arc<dyn StageHandler>>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let slots = match config.max_concurrent_handlers {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        let mut seen = Vec::new();
        let handlers = handlers
            .into_iter()
            .filter(|h| {
                if seen.contains(&h.stage()) {
                    warn!("Ignoring duplicate handler for stage {}", h.stage());
                    return false;
                }
                seen.push(h.stage());
                true
            })
            .collect();

        Self {
            shared: Arc::new(Shared {
                config,
                store,
                layout,
                active: RwLock::new(HashMap::new()),
                slots,
            }),
            handlers,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Start one background loop per stage.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Stage poller already running");
            return;
        }

        info!("Starting stage poller");

        for handler in &self.handlers {
            let stage = handler.stage();
            match self
                .shared
                .store
                .count_by_status(stage.in_progress_status())
            {
                Ok(0) => {}
                Ok(n) => info!(
                    "{} sessions found {}; they are failed once their claim goes stale",
                    n,
                    stage.in_progress_status()
                ),
                Err(e) => error!("Failed to inspect {} sessions: {}", stage, e),
            }
            self.spawn_stage_loop(Arc::clone(handler));
        }

        info!(
            "Stage poller started ({} stages, {} ms interval)",
            self.handlers.len(),
            self.shared.config.poll_interval_ms
        );
    }

    /// Stop the loops and wait up to the shutdown grace for running handlers.
    ///
    /// Handlers still running afterwards are left alone; their sessions stay
    /// in progress and are reaped as stale by whichever worker runs next.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Stage poller not running");
            return;
        }

        info!("Stopping stage poller");

        // Signal shutdown to all loops
        let _ = self.shutdown_tx.send(());

        let deadline = Instant::now() + Duration::from_millis(self.shared.config.shutdown_grace_ms);
        loop {
            let remaining = self.shared.active.read().await.len();
            if remaining == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!("{} stage handlers still running at shutdown", remaining);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!("Stage poller stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Run one cycle of every stage immediately. Returns the number of
    /// sessions claimed.
    pub async fn poll_once(&self) -> usize {
        let mut claimed = 0;
        for handler in &self.handlers {
            match Self::run_cycle(&self.shared, handler).await {
                Ok(n) => claimed += n,
                Err(e) => warn!("{} cycle failed: {}", handler.stage(), e),
            }
        }
        claimed
    }

    /// Get current poller status.
    pub async fn status(&self) -> PollerStatus {
        let active_handlers = self.shared.active.read().await.len();

        // A status whose count cannot be read is left out rather than shown as zero
        let sessions_by_status = SessionStatus::ALL
            .iter()
            .filter_map(|status| match self.shared.store.count_by_status(*status) {
                Ok(count) => Some((status.as_str().to_string(), count)),
                Err(e) => {
                    warn!("Failed to count {} sessions: {}", status, e);
                    None
                }
            })
            .collect();

        PollerStatus {
            running: self.running.load(Ordering::Relaxed),
            active_handlers,
            max_concurrent_handlers: self.shared.config.max_concurrent_handlers,
            sessions_by_status,
        }
    }

    /// Handlers running in this process, oldest first.
    pub async fn active_stages(&self) -> Vec<ActiveStage> {
        let mut active: Vec<ActiveStage> = self.shared.active.read().await.values().cloned().collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    /// Spawn the loop task for one stage.
    fn spawn_stage_loop(&self, handler: Arc<dyn StageHandler>) {
        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);
        let interval = Duration::from_millis(self.shared.config.poll_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let stage = handler.stage();
            info!("{} loop started", stage);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("{} loop received shutdown signal", stage);
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = Self::run_cycle(&shared, &handler).await {
                            warn!("{} cycle failed: {}", stage, e);
                        }
                    }
                }
            }
            info!("{} loop stopped", stage);
        });
    }

    /// Reap stale claims, then claim and dispatch eligible sessions.
    async fn run_cycle(
        shared: &Arc<Shared>,
        handler: &Arc<dyn StageHandler>,
    ) -> Result<usize, PollerError> {
        let stage = handler.stage();

        if let Err(e) = Self::reap_stale(shared, handler).await {
            warn!("Failed to reap stale {} claims: {}", stage, e);
        }

        let candidates = shared.store.list_by_status(stage.trigger_status())?;
        let mut claimed = 0;

        for session in candidates {
            let permit = match &shared.slots {
                Some(slots) => match Arc::clone(slots).try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        debug!(
                            "No free handler slot, {} sessions wait for the next cycle",
                            stage
                        );
                        break;
                    }
                },
                None => None,
            };

            match Self::claim(shared, stage, &session) {
                Ok(session) => {
                    metrics::SESSIONS_CLAIMED
                        .with_label_values(&[stage.name()])
                        .inc();
                    info!("Claimed session {} for {}", session.id, stage);
                    Self::dispatch(shared, handler, session, permit).await;
                    claimed += 1;
                }
                Err(e) if e.is_claim_conflict() => {
                    metrics::CLAIM_CONFLICTS
                        .with_label_values(&[stage.name()])
                        .inc();
                    debug!("Session {} already claimed elsewhere: {}", session.id, e);
                }
                Err(SessionError::NotFound(_)) => {
                    debug!("Session {} was deleted before it could be claimed", session.id);
                }
                Err(e) => {
                    warn!("Failed to claim session {} for {}: {}", session.id, stage, e);
                }
            }
        }

        Ok(claimed)
    }

    fn claim(shared: &Shared, stage: Stage, session: &Session) -> Result<Session, SessionError> {
        let mut patch = SessionPatch::status(stage.in_progress_status()).clear_message();
        if stage == Stage::Preprocess {
            patch = patch.with_preprocess_started_at(Utc::now());
        }
        shared
            .store
            .update(&session.id, patch, stage.trigger_status())
    }

    /// Run the handler for a claimed session on its own task.
    async fn dispatch(
        shared: &Arc<Shared>,
        handler: &Arc<dyn StageHandler>,
        session: Session,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let stage = handler.stage();
        shared.active.write().await.insert(
            session.id.clone(),
            ActiveStage {
                session_id: session.id.clone(),
                stage,
                started_at: Utc::now(),
            },
        );
        metrics::HANDLERS_ACTIVE.inc();

        let shared = Arc::clone(shared);
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            let job = StageJob {
                session_id: session.id.clone(),
                workdir: shared.layout.session_dir(&session.id),
            };
            let started = Instant::now();

            // A panicking handler must still resolve the claim
            let run = tokio::spawn(async move { handler.run(&job).await });
            let result = match run.await {
                Ok(result) => result,
                Err(e) => {
                    error!("{} handler for session {} panicked: {}", stage, session.id, e);
                    Err(StageError::ProcessFailure {
                        program: stage.name().to_string(),
                        reason: "handler panicked".to_string(),
                        diagnostics: None,
                    })
                }
            };

            Self::record_result(&shared, stage, &session.id, result, started.elapsed());

            shared.active.write().await.remove(&session.id);
            metrics::HANDLERS_ACTIVE.dec();
            drop(permit);
        });
    }

    /// Resolve a claim with the handler's result.
    fn record_result(
        shared: &Shared,
        stage: Stage,
        session_id: &str,
        result: Result<StageOutcome, StageError>,
        elapsed: Duration,
    ) {
        let (mut patch, outcome_label, duration_label) = match result {
            Ok(outcome) => {
                let patch = SessionPatch::status(stage.success_status());
                let patch = match outcome.message {
                    Some(message) => patch.with_message(message),
                    None => patch.clear_message(),
                };
                (patch, "success", "success")
            }
            Err(e) => {
                warn!("{} failed for session {}: {}", stage, session_id, e);
                (SessionPatch::failed(e.status_message()), e.kind(), "failed")
            }
        };
        if stage == Stage::Preprocess {
            patch = patch.with_preprocess_finished_at(Utc::now());
        }

        metrics::STAGE_OUTCOMES
            .with_label_values(&[stage.name(), outcome_label])
            .inc();
        metrics::STAGE_DURATION
            .with_label_values(&[stage.name(), duration_label])
            .observe(elapsed.as_secs_f64());

        match shared
            .store
            .update(session_id, patch, stage.in_progress_status())
        {
            Ok(session) => info!(
                "Session {} is now {} after {} ({:.1}s)",
                session_id,
                session.status,
                stage,
                elapsed.as_secs_f64()
            ),
            Err(e) => warn!(
                "Could not record {} result for session {}: {}",
                stage, session_id, e
            ),
        }
    }

    /// Fail in-progress sessions whose claim outlived the stage timeout plus grace.
    async fn reap_stale(
        shared: &Arc<Shared>,
        handler: &Arc<dyn StageHandler>,
    ) -> Result<usize, PollerError> {
        let Some(timeout) = handler.timeout() else {
            return Ok(0);
        };
        let stage = handler.stage();
        let Some(threshold) = timeout.checked_add(Duration::from_secs(shared.config.stale_grace_secs))
        else {
            return Ok(0);
        };
        let Ok(threshold) = chrono::Duration::from_std(threshold) else {
            return Ok(0);
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(threshold) else {
            return Ok(0);
        };

        let in_progress = shared.store.list_by_status(stage.in_progress_status())?;
        let mut reaped = 0;

        for session in in_progress {
            if session.updated_at >= cutoff {
                continue;
            }
            // Our own handlers resolve their claims themselves
            if shared.active.read().await.contains_key(&session.id) {
                continue;
            }

            let message = format!(
                "{} interrupted: no result within {} seconds",
                stage,
                threshold.num_seconds()
            );
            match shared.store.update(
                &session.id,
                SessionPatch::failed(message),
                stage.in_progress_status(),
            ) {
                Ok(_) => {
                    metrics::STALE_CLAIMS_REAPED
                        .with_label_values(&[stage.name()])
                        .inc();
                    warn!("Failed stale {} claim on session {}", stage, session.id);
                    reaped += 1;
                }
                Err(e) if e.is_claim_conflict() => {
                    debug!("Stale session {} already resolved: {}", session.id, e);
                }
                Err(e) => warn!("Failed to reap session {}: {}", session.id, e),
            }
        }

        Ok(reaped)
    }
}
