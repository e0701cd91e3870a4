/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The resolution loop.
//!
//! # Lifecycle of one tick
//!
//! ```text
//!  reset / timer ──► tick(resolve_time = next_resolve_time or now)
//!                      │ premature? (resolve_time > now + lookahead) → wait lookahead
//!                      │ "now" fixup            → SetTimelineTriggerTime
//!                      │ resolver.resolve_at(resolve_time)
//!                      │ per device: filter by mapping → handle_state   (errors and panics isolated)
//!                      │ next event after resolve_time + min_time_unit
//!                      │     found T  → next = T, wake in clamp(T - now - prepare)
//!                      │     none     → clear_future on every device, next = now
//!                      │ callbacks
//!                      ▼
//!                    re-arm the wake timer (also after errors)
//! ```
//!
//! # Concurrency
//!
//! One tokio task owns the loop and never runs two ticks at once.  Owner
//! calls (`set_timeline`, `reset_resolver`, device reconnects, ...) reach it
//! as [`LoopCommand`]s on an unbounded channel; the timer and the channel
//! are raced with a biased `select!`, so a reset always beats a pending
//! wake, and every reset queued while a tick runs collapses into a single
//! immediate tick afterwards.  The timeline, mapping and device registry
//! are whole-value snapshots behind `parking_lot` locks; no lock is held
//! across an `.await`.

pub mod callbacks;
pub mod error;
pub mod now_fixup;

pub use error::ConductorError;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, Time};
use crate::config::ConductorConfig;
use crate::device::{self, DeviceAdapter, DeviceContext, DeviceError, DeviceOptions, SharedReceiver};
use crate::mapping::{self, Mappings};
use crate::notification::{ErrorSource, Notification, NotificationReceiver, Notifier};
use crate::timeline::{ResolveError, TimelineObject, TimelineResolver};

use callbacks::CallbackQueue;

// ── Loop control ──────────────────────────────────────────────────────────────

/// Messages from the owner (and devices) to the loop task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    /// Forget `next_resolve_time` and tick now.
    Reset,
    /// Stop the loop task.
    Shutdown,
}

/// Lets a device ask its Conductor for a full re-resolve.
#[derive(Debug, Clone)]
pub struct ResyncHandle {
    tx: mpsc::UnboundedSender<LoopCommand>,
}

impl ResyncHandle {
    /// A handle not attached to any Conductor; requests go nowhere.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn request_reset(&self) {
        // A stopped loop has nothing to resync.
        let _ = self.tx.send(LoopCommand::Reset);
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct Inner {
    config: ConductorConfig,
    clock: SharedClock,
    resolver: Arc<dyn TimelineResolver>,
    notifier: Notifier,
    resync: ResyncHandle,

    timeline: RwLock<Arc<Vec<TimelineObject>>>,
    mappings: RwLock<Arc<Mappings>>,
    devices: RwLock<BTreeMap<String, Arc<dyn DeviceAdapter>>>,
    command_receiver: RwLock<Option<SharedReceiver>>,
    callbacks: CallbackQueue,

    initialized: AtomicBool,
    destroyed: AtomicBool,
    next_resolve_time: Mutex<Option<Time>>,
    last_wake_delay: Mutex<Option<Time>>,
}

// ── Conductor ─────────────────────────────────────────────────────────────────

/// Owns the timeline, the mapping and the devices, and drives the loop.
pub struct Conductor {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Conductor {
    /// Build a Conductor and spawn its loop on the current tokio runtime.
    pub fn new(
        config: ConductorConfig,
        clock: SharedClock,
        resolver: Arc<dyn TimelineResolver>,
    ) -> (Self, NotificationReceiver) {
        let (notifier, notifications) = Notifier::channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let auto_init = config.auto_init;

        let inner = Arc::new(Inner {
            callbacks: CallbackQueue::new(clock.clone(), notifier.clone()),
            config,
            clock,
            resolver,
            notifier,
            resync: ResyncHandle { tx },
            timeline: RwLock::new(Arc::new(Vec::new())),
            mappings: RwLock::new(Arc::new(Mappings::new())),
            devices: RwLock::new(BTreeMap::new()),
            command_receiver: RwLock::new(None),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            next_resolve_time: Mutex::new(None),
            last_wake_delay: Mutex::new(None),
        });
        let task = tokio::spawn(run_loop(Arc::clone(&inner), rx));

        let conductor = Self {
            inner,
            task: Mutex::new(Some(task)),
        };
        if auto_init {
            conductor.init();
        }
        (conductor, notifications)
    }

    /// Start resolving.
    pub fn init(&self) {
        if !self.inner.initialized.swap(true, Ordering::SeqCst) {
            info!("conductor initialised");
        }
        self.reset_resolver();
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.inner.config
    }

    // ── Timeline & mapping ───────────────────────────────────────────────────

    /// Replace the timeline and re-resolve.
    pub fn set_timeline(&self, timeline: Vec<TimelineObject>) {
        debug!(objects = timeline.len(), "timeline replaced");
        *self.inner.timeline.write() = Arc::new(timeline);
        self.reset_resolver();
    }

    /// Current snapshot, including any "now" fixups already applied.
    pub fn timeline(&self) -> Arc<Vec<TimelineObject>> {
        self.inner.timeline.read().clone()
    }

    /// Validate and replace the mapping, push it to every device and
    /// re-resolve.  An invalid mapping leaves the current one in place.
    pub fn set_mapping(&self, mappings: Mappings) -> Result<(), ConductorError> {
        if let Err(e) = mapping::validate_all(&mappings) {
            self.inner
                .notifier
                .error(ErrorSource::Configuration, None, e.to_string());
            return Err(e.into());
        }
        let mappings = Arc::new(mappings);
        *self.inner.mappings.write() = Arc::clone(&mappings);
        for device in self.devices() {
            device.set_mapping(Arc::clone(&mappings));
        }
        debug!(layers = mappings.len(), "mapping replaced");
        self.reset_resolver();
        Ok(())
    }

    pub fn mapping(&self) -> Arc<Mappings> {
        self.inner.mappings.read().clone()
    }

    /// Discard `next_resolve_time` and tick immediately.
    pub fn reset_resolver(&self) {
        self.inner.resync.request_reset();
    }

    // ── Devices ──────────────────────────────────────────────────────────────

    /// Receiver for devices created by later [`add_device`](Self::add_device)
    /// calls.  Without one, each family logs its commands.
    pub fn set_command_receiver(&self, receiver: SharedReceiver) {
        *self.inner.command_receiver.write() = Some(receiver);
    }

    /// Context for building a custom [`Device`](crate::device::Device)
    /// that reports to this Conductor.
    pub fn device_context(&self) -> DeviceContext {
        DeviceContext {
            clock: self.inner.clock.clone(),
            notifier: self.inner.notifier.clone(),
            resync: self.inner.resync.clone(),
            state_prune_interval: self.inner.config.state_prune_interval,
        }
    }

    /// Create a built-in device for `options.device_type` and register it.
    pub async fn add_device(
        &self,
        device_id: &str,
        options: DeviceOptions,
    ) -> Result<Arc<dyn DeviceAdapter>, ConductorError> {
        self.ensure_alive()?;
        if self.inner.devices.read().contains_key(device_id) {
            return Err(self.reject(device_id, ConductorError::DuplicateDevice(device_id.to_string())));
        }
        let receiver = self.inner.command_receiver.read().clone();
        let device = match device::create_device(device_id, &options, self.device_context(), receiver) {
            Ok(device) => device,
            Err(e) => return Err(self.reject(device_id, e)),
        };
        self.register_device(Arc::clone(&device)).await?;
        Ok(device)
    }

    /// Register an adapter: hand it the mapping, `init` it, and re-resolve.
    /// A device whose `init` fails is not registered.
    pub async fn register_device(&self, device: Arc<dyn DeviceAdapter>) -> Result<(), ConductorError> {
        self.ensure_alive()?;
        let id = device.device_id().to_string();
        if self.inner.devices.read().contains_key(&id) {
            return Err(self.reject(&id, ConductorError::DuplicateDevice(id.clone())));
        }

        device.set_mapping(self.mapping());
        let connected = match device.init().await {
            Ok(connected) => connected,
            Err(e) => return Err(self.reject(&id, e.into())),
        };

        {
            let mut devices = self.inner.devices.write();
            if devices.contains_key(&id) {
                drop(devices);
                return Err(self.reject(&id, ConductorError::DuplicateDevice(id.clone())));
            }
            devices.insert(id.clone(), Arc::clone(&device));
        }
        info!(device = %id, name = %device.device_name(), connected, "device registered");
        self.reset_resolver();
        Ok(())
    }

    /// Unregister and terminate a device.  Its scheduler stops with it.
    pub async fn remove_device(&self, device_id: &str) -> Result<(), ConductorError> {
        let device = self
            .inner
            .devices
            .write()
            .remove(device_id)
            .ok_or_else(|| ConductorError::DeviceNotFound(device_id.to_string()))?;
        if let Err(e) = device.terminate().await {
            self.inner
                .notifier
                .error(ErrorSource::Device, Some(device_id), e.to_string());
        }
        info!(device = %device_id, "device removed");
        Ok(())
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<dyn DeviceAdapter>> {
        self.inner.devices.read().get(device_id).cloned()
    }

    /// Registered devices, ordered by id.
    pub fn devices(&self) -> Vec<Arc<dyn DeviceAdapter>> {
        self.inner.devices.read().values().cloned().collect()
    }

    /// Prepare every device for broadcast, then re-resolve from scratch.
    pub async fn devices_make_ready(&self, destructive: bool) {
        for device in self.devices() {
            if let Err(e) = device.make_ready(destructive).await {
                self.inner
                    .notifier
                    .error(ErrorSource::Device, Some(device.device_id()), e.to_string());
            }
        }
        self.reset_resolver();
    }

    pub async fn devices_stand_down(&self, destructive: bool) {
        for device in self.devices() {
            if let Err(e) = device.stand_down(destructive).await {
                self.inner
                    .notifier
                    .error(ErrorSource::Device, Some(device.device_id()), e.to_string());
            }
        }
    }

    /// Stop the loop and terminate every device.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.resync.tx.send(LoopCommand::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let devices: Vec<_> = std::mem::take(&mut *self.inner.devices.write())
            .into_values()
            .collect();
        for device in devices {
            if let Err(e) = device.terminate().await {
                self.inner
                    .notifier
                    .error(ErrorSource::Device, Some(device.device_id()), e.to_string());
            }
        }
        self.inner.callbacks.dispose();
        info!("conductor destroyed");
    }

    // ── Introspection ────────────────────────────────────────────────────────

    /// Instant the next tick will resolve; `None` means "now".
    pub fn next_resolve_time(&self) -> Option<Time> {
        *self.inner.next_resolve_time.lock()
    }

    /// Delay the last tick armed the wake timer with.
    pub fn last_wake_delay(&self) -> Option<Time> {
        *self.inner.last_wake_delay.lock()
    }

    pub fn resync_handle(&self) -> ResyncHandle {
        self.inner.resync.clone()
    }

    fn ensure_alive(&self) -> Result<(), ConductorError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            Err(ConductorError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Report a rejected registration and hand the error back.
    fn reject(&self, device_id: &str, err: ConductorError) -> ConductorError {
        self.inner
            .notifier
            .error(ErrorSource::Configuration, Some(device_id), err.to_string());
        err
    }
}

impl Drop for Conductor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

// ── Loop task ─────────────────────────────────────────────────────────────────

async fn run_loop(inner: Arc<Inner>, mut commands: mpsc::UnboundedReceiver<LoopCommand>) {
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            Some(at) => tokio::select! {
                biased;
                cmd = commands.recv() => Some(cmd),
                _ = tokio::time::sleep_until(at) => None,
            },
            None => Some(commands.recv().await),
        };

        match command {
            Some(None) | Some(Some(LoopCommand::Shutdown)) => break,
            Some(Some(LoopCommand::Reset)) => {
                let mut shutdown = false;
                while let Ok(extra) = commands.try_recv() {
                    shutdown |= extra == LoopCommand::Shutdown;
                }
                if shutdown {
                    break;
                }
                *inner.next_resolve_time.lock() = None;
            }
            None => {}
        }

        deadline = run_tick(&inner)
            .await
            .map(|delay| Instant::now() + Duration::from_millis(delay.max(0) as u64));
    }
    debug!("resolution loop stopped");
}

/// Run one tick on its own task so a panic inside it is reported and the
/// loop re-arms as after any other tick error.
async fn run_tick(inner: &Arc<Inner>) -> Option<Time> {
    let tick = tokio::spawn({
        let inner = Arc::clone(inner);
        async move { inner.tick().await }
    });
    match tick.await {
        Ok(delay) => delay,
        Err(e) => {
            inner
                .notifier
                .error(ErrorSource::Resolution, None, format!("tick aborted: {}", e));
            let delay = inner.config.lookahead_ms;
            *inner.last_wake_delay.lock() = Some(delay);
            Some(delay)
        }
    }
}

impl Inner {
    /// One tick.  Returns the next wake delay, or `None` while not
    /// initialised (the loop then waits for a command).
    async fn tick(&self) -> Option<Time> {
        if !self.initialized.load(Ordering::SeqCst) {
            debug!("tick skipped: not initialised");
            return None;
        }

        let now = self.clock.now();
        let resolve_time = self.next_resolve_time.lock().unwrap_or(now);
        let lookahead = self.config.lookahead_ms;

        let delay = if resolve_time > now + lookahead {
            warn!(resolve_time, now, "premature tick, resolve time is beyond the lookahead window");
            lookahead
        } else {
            match self.resolve(resolve_time).await {
                Ok(delay) => delay,
                Err(e) => {
                    self.notifier
                        .error(ErrorSource::Resolution, None, format!("resolve at {} failed: {}", resolve_time, e));
                    lookahead
                }
            }
        };

        *self.last_wake_delay.lock() = Some(delay);
        Some(delay)
    }

    async fn resolve(&self, resolve_time: Time) -> Result<Time, ResolveError> {
        debug!(resolve_time, "resolving timeline");
        let cfg = &self.config;

        let snapshot = self.timeline.read().clone();
        let fixup = now_fixup::fix_now_objects(
            self.resolver.as_ref(),
            &snapshot,
            resolve_time,
            cfg.max_fixup_passes,
        )?;
        let timeline = if fixup.fixed.is_empty() {
            snapshot
        } else {
            let fixed = Arc::new(fixup.timeline);
            {
                // Keep an owner's newer timeline if one arrived meanwhile.
                let mut current = self.timeline.write();
                if Arc::ptr_eq(&current, &snapshot) {
                    *current = Arc::clone(&fixed);
                }
            }
            self.notifier
                .emit(Notification::SetTimelineTriggerTime(fixup.fixed));
            fixed
        };

        let state = self.resolver.resolve_at(&timeline, resolve_time)?;

        let mappings = self.mappings.read().clone();
        let devices: Vec<Arc<dyn DeviceAdapter>> = self.devices.read().values().cloned().collect();
        for device in &devices {
            let filtered =
                mapping::filter_state(&state, &mappings, device.device_id(), device.device_type());
            let handled = tokio::spawn({
                let device = Arc::clone(device);
                async move { device.handle_state(&filtered).await }
            });
            let message = match handled.await {
                Ok(Ok(())) => continue,
                // Removed while this tick was running.
                Ok(Err(DeviceError::Terminated(_))) => {
                    debug!(device = %device.device_id(), "skipping terminated device");
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("handle_state aborted: {}", e),
            };
            self.notifier
                .error(ErrorSource::Device, Some(device.device_id()), message);
        }

        let window = self.resolver.windowed_timeline(
            &timeline,
            Some(resolve_time),
            Some(resolve_time + cfg.lookahead_ms),
        )?;
        let next = self
            .resolver
            .next_events_after(&window, resolve_time + cfg.min_time_unit_ms, 1)?;

        let delay = match next.first() {
            Some(event) => {
                *self.next_resolve_time.lock() = Some(event.time);
                cfg.wake_delay(event.time, self.clock.now())
            }
            None => {
                for device in &devices {
                    device.clear_future(resolve_time);
                }
                *self.next_resolve_time.lock() = None;
                cfg.lookahead_ms
            }
        };

        self.callbacks.sync(&state);

        debug!(
            resolve_time,
            next_resolve = ?next.first().map(|e| e.time),
            delay,
            "next resolve scheduled"
        );
        Ok(delay)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
