// SPDX-License-Identifier: MPL-2.0

//! Background refresh of the stream the user is looking at.
//!
//! A single task owns the signal receivers and the poll timer. It
//! re-evaluates its gates whenever a signal or a configuration command
//! arrives, and polls the active stream on each tick while every gate holds.

mod routes;

pub use routes::{ContentPreferences, RouteAllowlist, RouteMatcher, resolve_stream_id};

use crate::config::{DEFAULT_POLL_INTERVAL, DEFAULT_POLLED_ROUTES, MIN_POLL_INTERVAL};
use crate::error::Result;
use crate::identity::StreamId;
use crate::settings::SyncSettings;
use crate::streams::{StreamHead, StreamManager};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    /// Every gate holds and the timer is armed; the stream has not been polled yet
    Active,
    /// The active stream has been polled at least once
    Polling,
    Destroyed,
}

/// First gate that failed, checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactiveReason {
    NotAuthenticated,
    RouteNotEnabled,
    PageHidden,
    NoStreamId,
    Destroyed,
}

impl fmt::Display for InactiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InactiveReason::NotAuthenticated => "not authenticated",
            InactiveReason::RouteNotEnabled => "route not enabled",
            InactiveReason::PageHidden => "page hidden",
            InactiveReason::NoStreamId => "no stream for route",
            InactiveReason::Destroyed => "destroyed",
        };
        f.write_str(text)
    }
}

/// Externally owned navigation state, observed through watch channels.
pub struct Signals {
    pub route: watch::Receiver<String>,
    pub visible: watch::Receiver<bool>,
    pub authenticated: watch::Receiver<bool>,
    pub preferences: watch::Receiver<ContentPreferences>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub enabled_routes: RouteAllowlist,
    pub respect_visibility: bool,
    pub interval: Duration,
}

impl CoordinatorConfig {
    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        Ok(Self {
            enabled_routes: RouteAllowlist::new(&settings.polled_routes)?,
            respect_visibility: settings.respect_visibility,
            interval: settings.poll_interval(),
        })
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            enabled_routes: RouteAllowlist::new(DEFAULT_POLLED_ROUTES)
                .expect("default routes are valid"),
            respect_visibility: true,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    pub inactive_reason: Option<InactiveReason>,
    pub stream_id: Option<StreamId>,
    pub head: StreamHead,
    /// Timer ticks handled so far
    pub ticks: u64,
}

impl Default for CoordinatorStatus {
    fn default() -> Self {
        Self {
            state: CoordinatorState::Idle,
            inactive_reason: None,
            stream_id: None,
            head: StreamHead::Skip,
            ticks: 0,
        }
    }
}

enum Command {
    SetEnabledRoutes(RouteAllowlist),
    SetRespectVisibility(bool),
    SetInterval(Duration),
    Destroy,
}

/// Handle to the running coordinator task. Clones share the same task.
#[derive(Clone)]
pub struct PollingCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<CoordinatorStatus>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PollingCoordinator {
    /// Spawn the coordinator task on the current tokio runtime.
    pub fn start(streams: StreamManager, signals: Signals, config: CoordinatorConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(CoordinatorStatus::default());

        let worker = Worker {
            streams,
            signals,
            commands: command_rx,
            status: status_tx,
            routes: config.enabled_routes,
            respect_visibility: config.respect_visibility,
            period: config.interval,
            timer: None,
            active: None,
            polled: false,
            head: StreamHead::Skip,
            ticks: 0,
        };
        let task = tokio::spawn(worker.run());

        Self {
            commands,
            status,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> CoordinatorState {
        self.status.borrow().state
    }

    pub fn inactive_reason(&self) -> Option<InactiveReason> {
        self.status.borrow().inactive_reason
    }

    /// Receiver that sees every status the task publishes.
    pub fn watch_status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.clone()
    }

    pub fn set_enabled_routes<S: AsRef<str>>(&self, patterns: &[S]) -> Result<()> {
        let routes = RouteAllowlist::new(patterns)?;
        self.send(Command::SetEnabledRoutes(routes));
        Ok(())
    }

    pub fn set_respect_visibility(&self, respect: bool) {
        self.send(Command::SetRespectVisibility(respect));
    }

    /// Periods below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn set_interval(&self, interval: Duration) {
        self.send(Command::SetInterval(interval));
    }

    /// Stop the task and release the signal receivers. Later calls do nothing.
    pub async fn destroy(&self) {
        let task = self.task.lock().expect("coordinator lock poisoned").take();
        let Some(task) = task else {
            return;
        };
        self.send(Command::Destroy);
        if let Err(e) = task.await {
            warn!(error = %e, "coordinator task ended abnormally");
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            trace!("coordinator already stopped");
        }
    }
}

struct Worker {
    streams: StreamManager,
    signals: Signals,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<CoordinatorStatus>,
    routes: RouteAllowlist,
    respect_visibility: bool,
    period: Duration,
    timer: Option<Interval>,
    active: Option<StreamId>,
    /// A tick has been handled for `active`
    polled: bool,
    head: StreamHead,
    ticks: u64,
}

impl Worker {
    async fn run(mut self) {
        self.evaluate();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Destroy) | None => break,
                    Some(command) => {
                        self.apply(command);
                        self.evaluate();
                    }
                },
                Ok(()) = self.signals.route.changed() => self.evaluate(),
                Ok(()) = self.signals.visible.changed() => self.evaluate(),
                Ok(()) = self.signals.authenticated.changed() => self.evaluate(),
                Ok(()) = self.signals.preferences.changed() => self.evaluate(),
                () = next_tick(&mut self.timer) => self.poll().await,
            }
        }

        self.timer = None;
        self.status.send_replace(CoordinatorStatus {
            state: CoordinatorState::Destroyed,
            inactive_reason: Some(InactiveReason::Destroyed),
            stream_id: None,
            head: StreamHead::Skip,
            ticks: self.ticks,
        });
        info!("polling coordinator destroyed");
        // Dropping `self` releases every signal receiver
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::SetEnabledRoutes(routes) => self.routes = routes,
            Command::SetRespectVisibility(respect) => self.respect_visibility = respect,
            Command::SetInterval(period) => {
                self.period = period;
                // Replace, never add, the running timer
                if self.timer.is_some() {
                    self.timer = Some(arm(period));
                }
            }
            Command::Destroy => {}
        }
    }

    /// Check the gates in order and return the stream to poll.
    fn resolve(&self) -> std::result::Result<StreamId, InactiveReason> {
        if !*self.signals.authenticated.borrow() {
            return Err(InactiveReason::NotAuthenticated);
        }
        let route = self.signals.route.borrow().clone();
        if !self.routes.allows(&route) {
            return Err(InactiveReason::RouteNotEnabled);
        }
        if self.respect_visibility && !*self.signals.visible.borrow() {
            return Err(InactiveReason::PageHidden);
        }
        let preferences = *self.signals.preferences.borrow();
        resolve_stream_id(&route, &preferences).ok_or(InactiveReason::NoStreamId)
    }

    fn evaluate(&mut self) {
        match self.resolve() {
            Err(reason) => {
                if self.timer.take().is_some() {
                    debug!(%reason, "polling stopped");
                }
                self.polled = false;
                self.publish(CoordinatorState::Idle, Some(reason));
            }
            Ok(stream_id) => {
                if self.active.as_ref() != Some(&stream_id) {
                    debug!(stream = %stream_id, "active stream changed");
                    self.head = StreamHead::Skip;
                    self.active = Some(stream_id);
                    self.polled = false;
                }
                if self.timer.is_none() {
                    trace!("coordinator active");
                    self.timer = Some(arm(self.period));
                }
                let state = if self.polled {
                    CoordinatorState::Polling
                } else {
                    CoordinatorState::Active
                };
                self.publish(state, None);
            }
        }
    }

    async fn poll(&mut self) {
        self.ticks += 1;

        // Context may have moved since the timer was armed
        let stream_id = match self.resolve() {
            Ok(id) if self.active.as_ref() == Some(&id) => id,
            _ => {
                trace!("poll target no longer current");
                return;
            }
        };
        self.polled = true;
        if stream_id.is_engagement_sorted() {
            trace!(stream = %stream_id, "engagement stream not polled");
            self.publish(CoordinatorState::Polling, None);
            return;
        }

        let head = match self.streams.get_stream_head(&stream_id) {
            Ok(head) => head,
            Err(e) => {
                warn!(stream = %stream_id, error = %e, "failed to resolve stream head");
                self.publish(CoordinatorState::Polling, None);
                return;
            }
        };
        self.head = head;

        if head.wants_fetch() {
            match self.streams.fetch_newer(&stream_id, head).await {
                Ok(0) => trace!(stream = %stream_id, "no new posts"),
                Ok(added) => debug!(stream = %stream_id, added, "new posts merged"),
                Err(e) => warn!(stream = %stream_id, error = %e, "poll failed"),
            }
        }
        self.publish(CoordinatorState::Polling, None);
    }

    fn publish(&self, state: CoordinatorState, reason: Option<InactiveReason>) {
        let running = matches!(state, CoordinatorState::Active | CoordinatorState::Polling);
        self.status.send_replace(CoordinatorStatus {
            state,
            inactive_reason: reason,
            stream_id: if running { self.active.clone() } else { None },
            head: self.head,
            ticks: self.ticks,
        });
    }
}

fn arm(period: Duration) -> Interval {
    if period < MIN_POLL_INTERVAL {
        warn!(?period, "poll interval too short, using minimum");
    }
    let period = period.max(MIN_POLL_INTERVAL);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Explicit home for the one coordinator of the application.
#[derive(Default)]
pub struct CoordinatorSlot {
    inner: Mutex<Option<PollingCoordinator>>,
}

impl CoordinatorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the running coordinator, starting it with `start` if there is none.
    pub fn get_or_start(&self, start: impl FnOnce() -> PollingCoordinator) -> PollingCoordinator {
        let mut inner = self.inner.lock().expect("coordinator slot poisoned");
        inner.get_or_insert_with(start).clone()
    }

    pub fn get(&self) -> Option<PollingCoordinator> {
        self.inner.lock().expect("coordinator slot poisoned").clone()
    }

    /// Destroy and forget the coordinator.
    pub async fn reset(&self) {
        let current = self.inner.lock().expect("coordinator slot poisoned").take();
        if let Some(coordinator) = current {
            coordinator.destroy().await;
        }
    }
}
