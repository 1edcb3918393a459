//! Periodic, behavior-driven cache warming.
//!
//! Each cycle ranks routes the user is likely to open (overall, at this time
//! of day, on this weekday), maps them to entities through the route
//! predictor and hands each entity to the prefetch strategy in priority
//! order. The scheduler never fetches anything itself.

use crate::behavior::BehaviorTracker;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tidemark_core::{
    IdleSignal, NetworkConditions, PrefetchStrategy, RoutePredictor, TimeOfDay, WarmingConfig,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Connection types too slow to spend on speculative fetches.
const SLOW_CONNECTION_TYPES: [&str; 2] = ["slow-2g", "2g"];

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    /// Loop running, waiting for the next cycle.
    Scheduled,
    /// A cycle is handing out tasks.
    Warming,
}

/// Why a cycle did no work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    SaveData,
    SlowConnection(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Offline => write!(f, "offline"),
            SkipReason::SaveData => write!(f, "data saver enabled"),
            SkipReason::SlowConnection(kind) => write!(f, "slow connection ({})", kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was still running.
    AlreadyRunning,
    Skipped(SkipReason),
    Completed { scheduled: usize },
}

/// One entity to prefetch. Lower priority values go first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmingTask {
    pub entity: String,
    pub priority: u8,
    /// Route that first mentioned the entity.
    pub route: String,
}

pub const PRIORITY_FREQUENT: u8 = 1;
pub const PRIORITY_TIME_OF_DAY: u8 = 2;
pub const PRIORITY_DAY_OF_WEEK: u8 = 3;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for warming activity.
#[derive(Debug, Default)]
pub struct WarmingMetrics {
    /// Cycles that ran to completion
    pub cycles_completed: AtomicU64,

    /// Cycles skipped because of network conditions
    pub cycles_skipped: AtomicU64,

    /// Entities handed to the prefetch strategy
    pub tasks_scheduled: AtomicU64,

    /// Hand-offs the prefetch strategy rejected
    pub schedule_errors: AtomicU64,
}

impl WarmingMetrics {
    pub fn snapshot(&self) -> WarmingMetricsSnapshot {
        WarmingMetricsSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            tasks_scheduled: self.tasks_scheduled.load(Ordering::Relaxed),
            schedule_errors: self.schedule_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmingMetricsSnapshot {
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub tasks_scheduled: u64,
    pub schedule_errors: u64,
}

// ============================================================================
// CORE
// ============================================================================

struct SchedulerCore {
    behavior: Arc<BehaviorTracker>,
    predictor: Arc<dyn RoutePredictor>,
    prefetch: Arc<dyn PrefetchStrategy>,
    network: OnceCell<Arc<dyn NetworkConditions>>,
    idle: OnceCell<Arc<dyn IdleSignal>>,
    config: WarmingConfig,
    /// Re-entrancy guard for cycles.
    in_cycle: AtomicBool,
    /// Whether the periodic loop is active.
    started: AtomicBool,
    state: watch::Sender<SchedulerState>,
    metrics: WarmingMetrics,
}

impl SchedulerCore {
    fn skip_reason(&self) -> Option<SkipReason> {
        let snapshot = self.network.get()?.snapshot()?;
        if !snapshot.online {
            return Some(SkipReason::Offline);
        }
        if snapshot.save_data {
            return Some(SkipReason::SaveData);
        }
        match snapshot.effective_type {
            Some(kind) if SLOW_CONNECTION_TYPES.contains(&kind.as_str()) => {
                Some(SkipReason::SlowConnection(kind))
            }
            _ => None,
        }
    }

    fn tasks_at<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> Vec<WarmingTask> {
        let limit = self.config.routes_per_list;
        let ranked = [
            (PRIORITY_FREQUENT, self.behavior.frequent_routes(limit)),
            (
                PRIORITY_TIME_OF_DAY,
                self.behavior
                    .routes_for_time_of_day(TimeOfDay::from_hour(at.hour()), limit),
            ),
            (
                PRIORITY_DAY_OF_WEEK,
                self.behavior
                    .routes_for_day(at.weekday().num_days_from_sunday() as u8, limit),
            ),
        ];

        let mut seen = HashSet::new();
        let mut tasks = Vec::new();
        for (priority, routes) in ranked {
            for route in routes {
                for entity in self.predictor.entities_for_route(&route) {
                    if seen.insert(entity.clone()) {
                        tasks.push(WarmingTask {
                            entity,
                            priority,
                            route: route.clone(),
                        });
                    }
                }
            }
        }
        tasks.sort_by_key(|task| task.priority);
        tasks
    }

    async fn wait_for_idle(&self) {
        match self.idle.get() {
            Some(idle) => idle.wait_idle().await,
            None => tokio::time::sleep(self.config.idle_fallback).await,
        }
    }

    fn settle_state(&self) {
        let state = if self.started.load(Ordering::SeqCst) {
            SchedulerState::Scheduled
        } else {
            SchedulerState::Stopped
        };
        self.state.send_replace(state);
    }

    async fn run_cycle(&self) -> CycleOutcome {
        if self
            .in_cycle
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Warming cycle already running");
            return CycleOutcome::AlreadyRunning;
        }

        let outcome = self.cycle().await;
        self.in_cycle.store(false, Ordering::SeqCst);
        self.settle_state();
        outcome
    }

    async fn cycle(&self) -> CycleOutcome {
        if let Some(reason) = self.skip_reason() {
            self.metrics.cycles_skipped.fetch_add(1, Ordering::Relaxed);
            tracing::info!(reason = %reason, "Skipping cache warming");
            return CycleOutcome::Skipped(reason);
        }

        let tasks = self.tasks_at(&Local::now());
        if tasks.is_empty() {
            self.metrics.cycles_completed.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Warming cycle found nothing to warm");
            return CycleOutcome::Completed { scheduled: 0 };
        }

        self.state.send_replace(SchedulerState::Warming);
        self.wait_for_idle().await;

        let mut scheduled = 0usize;
        for task in &tasks {
            match self.prefetch.schedule_entity(&task.entity) {
                Ok(()) => {
                    scheduled += 1;
                    self.metrics.tasks_scheduled.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.metrics.schedule_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, entity = %task.entity, "Prefetch scheduling failed");
                }
            }
            // Let foreground work run between hand-offs.
            tokio::task::yield_now().await;
        }

        self.metrics.cycles_completed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(tasks = tasks.len(), scheduled, "Warming cycle completed");
        CycleOutcome::Completed { scheduled }
    }
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run_loop(core: Arc<SchedulerCore>, mut shutdown_rx: watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(core.config.initial_delay) => {}
        _ = shutdown_requested(&mut shutdown_rx) => {
            tracing::debug!("Warming stopped before first cycle");
            return;
        }
    }
    core.run_cycle().await;

    let mut ticker = interval_at(Instant::now() + core.config.interval, core.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown_rx) => break,
            _ = ticker.tick() => {
                core.run_cycle().await;
            }
        }
    }

    let snapshot = core.metrics.snapshot();
    tracing::debug!(
        cycles_completed = snapshot.cycles_completed,
        cycles_skipped = snapshot.cycles_skipped,
        tasks_scheduled = snapshot.tasks_scheduled,
        "Warming loop exited"
    );
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Runs warming cycles on a fixed period while started.
pub struct WarmingScheduler {
    core: Arc<SchedulerCore>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WarmingScheduler {
    pub fn new(
        behavior: Arc<BehaviorTracker>,
        predictor: Arc<dyn RoutePredictor>,
        prefetch: Arc<dyn PrefetchStrategy>,
        config: WarmingConfig,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Stopped);
        Self {
            core: Arc::new(SchedulerCore {
                behavior,
                predictor,
                prefetch,
                network: OnceCell::new(),
                idle: OnceCell::new(),
                config,
                in_cycle: AtomicBool::new(false),
                started: AtomicBool::new(false),
                state,
                metrics: WarmingMetrics::default(),
            }),
            shutdown: Mutex::new(None),
            loop_handle: Mutex::new(None),
        }
    }

    /// Network signal consulted before each cycle. Without one, cycles always
    /// run.
    pub fn with_network_conditions(self, network: Arc<dyn NetworkConditions>) -> Self {
        let _ = self.core.network.set(network);
        self
    }

    /// Idle signal awaited before handing out tasks. Without one, a fixed
    /// delay is used.
    pub fn with_idle_signal(self, idle: Arc<dyn IdleSignal>) -> Self {
        let _ = self.core.idle.set(idle);
        self
    }

    /// Start periodic warming. Calling it while started does nothing.
    ///
    /// Outside a Tokio runtime this logs a warning and leaves the scheduler
    /// stopped.
    pub fn start(&self) {
        if self.core.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Warming scheduler already started");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.core.started.store(false, Ordering::SeqCst);
                tracing::warn!(error = %e, "No Tokio runtime; warming scheduler not started");
                return;
            }
        };

        let (tx, rx) = watch::channel(false);
        let handle = runtime.spawn(run_loop(self.core.clone(), rx));
        *lock(&self.shutdown) = Some(tx);
        *lock(&self.loop_handle) = Some(handle);

        if !self.core.in_cycle.load(Ordering::SeqCst) {
            self.core.state.send_replace(SchedulerState::Scheduled);
        }
        tracing::info!(
            initial_delay_ms = self.core.config.initial_delay.as_millis() as u64,
            interval_secs = self.core.config.interval.as_secs(),
            "Warming scheduler started"
        );
    }

    /// Stop scheduling cycles. A cycle already running finishes. Calling it
    /// while stopped does nothing.
    pub fn stop(&self) {
        if !self.core.started.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = lock(&self.shutdown).take() {
            let _ = tx.send(true);
        }
        // Detach: the loop exits on its own after any in-flight cycle.
        lock(&self.loop_handle).take();

        if !self.core.in_cycle.load(Ordering::SeqCst) {
            self.core.state.send_replace(SchedulerState::Stopped);
        }
        tracing::info!("Warming scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.core.started.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SchedulerState {
        *self.core.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.core.state.subscribe()
    }

    /// Run one cycle now, independent of the periodic loop.
    pub async fn run_warming_cycle(&self) -> CycleOutcome {
        self.core.run_cycle().await
    }

    /// Whether network conditions currently allow warming.
    pub fn should_warm(&self) -> bool {
        self.core.skip_reason().is_none()
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        self.core.skip_reason()
    }

    /// Tasks for the current local time, sorted by priority.
    pub fn determine_warming_tasks(&self) -> Vec<WarmingTask> {
        self.core.tasks_at(&Local::now())
    }

    /// Tasks as they would be computed at `at`.
    pub fn determine_warming_tasks_at<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> Vec<WarmingTask> {
        self.core.tasks_at(at)
    }

    pub fn metrics(&self) -> WarmingMetricsSnapshot {
        self.core.metrics.snapshot()
    }
}

impl Drop for WarmingScheduler {
    fn drop(&mut self) {
        if let Some(tx) = lock(&self.shutdown).take() {
            let _ = tx.send(true);
        }
    }
}

impl std::fmt::Debug for WarmingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmingScheduler")
            .field("state", &self.state())
            .field("metrics", &self.metrics())
            .finish()
    }
}
