/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Device adapters.
//!
//! Every device, whatever its family, handles a resolved state the same way:
//!
//! ```text
//!  ResolvedState(t) ──convert──► DeviceState(new) ─┐
//!                                                  ├─diff──► [cmd, cmd, ...]
//!  cache.get_state_before(t) ─────► DeviceState(old)┘             │
//!                                                                 ▼
//!                        scheduler.cancel_from(t, policy) ; enqueue(t, cmd)...
//!                        cache.set_state(t, new)
//! ```
//!
//! That pipeline lives once, in [`Device<B>`].  A family only supplies a
//! [`DeviceBehavior`]: its state and command types, `convert`, `diff`, the
//! empty state and its clear policy.  The Conductor sees every device
//! through the object-safe [`DeviceAdapter`] trait, so custom adapters can
//! be registered next to the built-in ones.
//!
//! | Family    | Changed when            | Clear policy (`handle_state`) | Dispatch filter        |
//! |-----------|-------------------------|-------------------------------|------------------------|
//! | Abstract  | winning object id       | inclusive (`>= t`)            | all                    |
//! | HTTP-Send | content                 | exclusive (`> t`)             | added / changed only   |
//! | Lawo      | node value / transition | exclusive (`> t`)             | all                    |

pub mod abstract_device;
pub mod cache;
pub mod error;
pub mod http_send;
pub mod lawo;

pub use abstract_device::{AbstractBehavior, AbstractCommand};
pub use cache::StateCache;
pub use error::DeviceError;
pub use http_send::{HttpMethod, HttpRequest, HttpSendBehavior, HttpSendCommand};
pub use lawo::{LawoBehavior, LawoCommand, LawoNode};

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::clock::{SharedClock, Time};
use crate::conductor::{ConductorError, ResyncHandle};
use crate::mapping::{self, DeviceType, Mapping, Mappings};
use crate::notification::{Notification, Notifier};
use crate::scheduler::{CommandReceiver, CommandScheduler, LoggingReceiver, PendingCommand, TransportError};
use crate::timeline::{ResolvedLayer, ResolvedState};

// ── Options ───────────────────────────────────────────────────────────────────

/// Registration options: which family, and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOptions {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    #[serde(default)]
    pub options: DeviceSettings,
}

impl DeviceOptions {
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            options: DeviceSettings::default(),
        }
    }
}

/// Connection settings; each family reads the fields it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Lawo: path prefix of the source nodes, e.g. `"Sapphire.Sources"`.
    #[serde(default)]
    pub sources_path: Option<String>,
    /// Lawo: function invoked for timed fader moves.
    #[serde(default)]
    pub ramp_motor_function_path: Option<String>,
}

/// Everything a device needs from its owning Conductor.
#[derive(Clone)]
pub struct DeviceContext {
    pub clock: SharedClock,
    pub notifier: Notifier,
    pub resync: ResyncHandle,
    /// N of the state cache's every-Nth-write pruning.
    pub state_prune_interval: usize,
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Kind of per-layer change found by a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// Any built-in family's command, for owners that want one receiver for all
/// devices.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Abstract(AbstractCommand),
    HttpSend(HttpSendCommand),
    Lawo(LawoCommand),
}

impl From<AbstractCommand> for DeviceCommand {
    fn from(c: AbstractCommand) -> Self {
        DeviceCommand::Abstract(c)
    }
}

impl From<HttpSendCommand> for DeviceCommand {
    fn from(c: HttpSendCommand) -> Self {
        DeviceCommand::HttpSend(c)
    }
}

impl From<LawoCommand> for DeviceCommand {
    fn from(c: LawoCommand) -> Self {
        DeviceCommand::Lawo(c)
    }
}

/// Shared receiver for every built-in device.
pub type SharedReceiver = Arc<dyn CommandReceiver<DeviceCommand>>;

/// Adapts a [`SharedReceiver`] to one family's command type.
struct Funnel<C> {
    inner: SharedReceiver,
    _command: PhantomData<fn(C)>,
}

#[async_trait]
impl<C: Into<DeviceCommand> + Send + 'static> CommandReceiver<C> for Funnel<C> {
    async fn send(&self, time: Time, command: C) -> Result<(), TransportError> {
        self.inner.send(time, command.into()).await
    }
}

// ── Layer helpers ─────────────────────────────────────────────────────────────

/// A resolved layer together with the mapping that routes it to a device.
#[derive(Debug, Clone, Copy)]
pub struct ClaimedLayer<'a> {
    pub name: &'a str,
    pub layer: &'a ResolvedLayer,
    pub mapping: &'a Mapping,
}

/// Layers of `state` that device `(device_id, device_type)` owns.
pub fn claimed_layers<'a>(
    state: &'a ResolvedState,
    mappings: &'a Mappings,
    device_id: &str,
    device_type: DeviceType,
) -> Vec<ClaimedLayer<'a>> {
    state
        .layers
        .iter()
        .filter_map(|(name, layer)| {
            mapping::route(mappings, layer)
                .filter(|m| m.targets(device_id, device_type))
                .map(|mapping| ClaimedLayer {
                    name: name.as_str(),
                    layer,
                    mapping,
                })
        })
        .collect()
}

/// What an Abstract or HTTP-Send device remembers per layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSnapshot {
    pub id: String,
    pub content: Value,
}

pub type LayerStates = BTreeMap<String, LayerSnapshot>;

/// Project claimed layers into [`LayerStates`].
pub fn snapshot_layers(claimed: &[ClaimedLayer<'_>]) -> LayerStates {
    claimed
        .iter()
        .map(|c| {
            (
                c.name.to_string(),
                LayerSnapshot {
                    id: c.layer.id.clone(),
                    content: c.layer.content.clone(),
                },
            )
        })
        .collect()
}

/// Added and changed layers in `new` order, then removed layers in `old`
/// order.
pub fn diff_layers<T, C>(
    old: &BTreeMap<String, T>,
    new: &BTreeMap<String, T>,
    changed: impl Fn(&T, &T) -> bool,
    mut emit: impl FnMut(ChangeKind, &str, &T) -> C,
) -> Vec<C> {
    let mut commands = Vec::new();
    for (key, new_layer) in new {
        match old.get(key) {
            None => commands.push(emit(ChangeKind::Added, key, new_layer)),
            Some(old_layer) if changed(old_layer, new_layer) => {
                commands.push(emit(ChangeKind::Changed, key, new_layer))
            }
            Some(_) => {}
        }
    }
    for (key, old_layer) in old {
        if !new.contains_key(key) {
            commands.push(emit(ChangeKind::Removed, key, old_layer));
        }
    }
    commands
}

// ── Contracts ─────────────────────────────────────────────────────────────────

/// What the Conductor needs from a device.
#[async_trait]
pub trait DeviceAdapter: Send + Sync + 'static {
    fn device_id(&self) -> &str;
    fn device_type(&self) -> DeviceType;
    /// Human-readable name, e.g. `"Abstract myDevice"`.
    fn device_name(&self) -> String;

    /// Connect.  Returns the connection status.
    async fn init(&self) -> Result<bool, DeviceError>;
    async fn terminate(&self) -> Result<(), DeviceError>;

    /// Diff `state` against the cached state before `state.time` and queue
    /// the resulting commands at `state.time`.
    async fn handle_state(&self, state: &ResolvedState) -> Result<(), DeviceError>;

    /// Drop every queued command later than `time`.
    fn clear_future(&self, time: Time);

    fn set_mapping(&self, mappings: Arc<Mappings>);
    fn connected(&self) -> bool;

    /// Relay a transport-level connection change.
    fn connection_changed(&self, connected: bool) {
        let _ = connected;
    }

    /// Queued commands, for introspection.
    fn queue(&self) -> Vec<PendingCommand>;

    async fn make_ready(&self, _destructive: bool) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn stand_down(&self, _destructive: bool) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Family-specific half of a device.
pub trait DeviceBehavior: Send + Sync + 'static {
    type State: Clone + Debug + Send + Sync + 'static;
    type Command: Clone + Debug + Send + 'static;

    fn device_type(&self) -> DeviceType;
    fn device_name(&self, device_id: &str) -> String;

    /// State assumed when nothing has been cached yet.
    fn default_state(&self) -> Self::State;

    /// Pure projection of the layers this device claims.
    fn convert(&self, time: Time, claimed: &[ClaimedLayer<'_>]) -> Result<Self::State, DeviceError>;

    /// Ordered commands turning `old` into `new`.
    fn diff(&self, old: &Self::State, new: &Self::State) -> Vec<Self::Command>;

    /// `true`: `handle_state(t)` cancels queued commands at `>= t`;
    /// `false`: only `> t`.
    fn clear_inclusive(&self) -> bool;

    /// Commands that are computed but never queued return `false`.
    fn should_dispatch(&self, _command: &Self::Command) -> bool {
        true
    }
}

// ── Device<B> ─────────────────────────────────────────────────────────────────

/// The shared convert → diff → queue pipeline around a [`DeviceBehavior`].
pub struct Device<B: DeviceBehavior> {
    id: String,
    behavior: B,
    ctx: DeviceContext,
    scheduler: CommandScheduler<B::Command>,
    cache: Mutex<StateCache<B::State>>,
    mappings: RwLock<Arc<Mappings>>,
    connected: AtomicBool,
    terminated: AtomicBool,
}

impl<B: DeviceBehavior> Device<B> {
    /// Must be created inside a tokio runtime (spawns the scheduler task).
    pub fn new(
        id: impl Into<String>,
        behavior: B,
        ctx: DeviceContext,
        receiver: Arc<dyn CommandReceiver<B::Command>>,
    ) -> Self {
        let id = id.into();
        let scheduler =
            CommandScheduler::new(id.clone(), ctx.clock.clone(), receiver, ctx.notifier.clone());
        let cache = StateCache::new(ctx.clock.clone(), ctx.state_prune_interval);
        Self {
            id,
            behavior,
            ctx,
            scheduler,
            cache: Mutex::new(cache),
            mappings: RwLock::new(Arc::new(Mappings::new())),
            connected: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    /// Cached device state strictly before `time`.
    pub fn state_before(&self, time: Time) -> Option<B::State> {
        self.cache.lock().get_state_before(time).cloned()
    }
}

#[async_trait]
impl<B: DeviceBehavior> DeviceAdapter for Device<B> {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn device_type(&self) -> DeviceType {
        self.behavior.device_type()
    }

    fn device_name(&self) -> String {
        self.behavior.device_name(&self.id)
    }

    async fn init(&self) -> Result<bool, DeviceError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(DeviceError::Terminated(self.id.clone()));
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(device = %self.id, name = %self.device_name(), "device initialised");
        Ok(true)
    }

    async fn terminate(&self) -> Result<(), DeviceError> {
        self.terminated.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.scheduler.dispose();
        self.cache.lock().clear_all();
        info!(device = %self.id, "device terminated");
        Ok(())
    }

    async fn handle_state(&self, state: &ResolvedState) -> Result<(), DeviceError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(DeviceError::Terminated(self.id.clone()));
        }
        let mappings = self.mappings.read().clone();
        let claimed = claimed_layers(state, &mappings, &self.id, self.behavior.device_type());
        let new_state = self.behavior.convert(state.time, &claimed)?;

        let mut cache = self.cache.lock();
        let commands = match cache.get_state_before(state.time) {
            Some(old) => self.behavior.diff(old, &new_state),
            None => self.behavior.diff(&self.behavior.default_state(), &new_state),
        };

        self.scheduler
            .cancel_from(state.time, self.behavior.clear_inclusive());
        let mut queued = 0usize;
        for command in commands {
            if self.behavior.should_dispatch(&command) {
                self.scheduler.enqueue(state.time, command);
                queued += 1;
            }
        }
        cache.set_state(state.time, new_state);

        debug!(device = %self.id, time = state.time, layers = claimed.len(), queued, "state handled");
        Ok(())
    }

    fn clear_future(&self, time: Time) {
        self.scheduler.cancel_after(time);
    }

    fn set_mapping(&self, mappings: Arc<Mappings>) {
        *self.mappings.write() = mappings;
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// On a false → true transition the device no longer knows what it is
    /// showing: forget the cache and ask for a full resolve.
    fn connection_changed(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was == connected {
            return;
        }
        info!(device = %self.id, connected, "connection changed");
        self.ctx.notifier.emit(Notification::ConnectionChanged {
            device_id: self.id.clone(),
            connected,
        });
        if connected {
            self.cache.lock().clear_all();
            self.ctx.resync.request_reset();
        }
    }

    fn queue(&self) -> Vec<PendingCommand> {
        self.scheduler.list_pending()
    }

    async fn make_ready(&self, destructive: bool) -> Result<(), DeviceError> {
        self.cache.lock().clear_all();
        debug!(device = %self.id, destructive, "make ready");
        Ok(())
    }
}

// ── Factory ───────────────────────────────────────────────────────────────────

fn receiver_for<C>(shared: Option<SharedReceiver>, fallback: Arc<dyn CommandReceiver<C>>) -> Arc<dyn CommandReceiver<C>>
where
    C: Into<DeviceCommand> + Send + 'static,
{
    match shared {
        Some(inner) => Arc::new(Funnel {
            inner,
            _command: PhantomData,
        }),
        None => fallback,
    }
}

/// Build a built-in device for `options.device_type`.
///
/// Without a `receiver`, each family logs its commands.
pub fn create_device(
    id: &str,
    options: &DeviceOptions,
    ctx: DeviceContext,
    receiver: Option<SharedReceiver>,
) -> Result<Arc<dyn DeviceAdapter>, ConductorError> {
    let device: Arc<dyn DeviceAdapter> = match options.device_type {
        DeviceType::Abstract => {
            let rx = receiver_for::<AbstractCommand>(receiver, Arc::new(LoggingReceiver::new(id)));
            Arc::new(Device::new(id, AbstractBehavior, ctx, rx))
        }
        DeviceType::HttpSend => {
            let rx = receiver_for::<HttpSendCommand>(
                receiver,
                Arc::new(http_send::HttpLogReceiver::new(id)),
            );
            Arc::new(Device::new(id, HttpSendBehavior, ctx, rx))
        }
        DeviceType::Lawo => {
            let behavior = LawoBehavior::from_settings(&options.options);
            let rx = receiver_for::<LawoCommand>(
                receiver,
                Arc::new(lawo::LawoLogReceiver::new(
                    id,
                    options.options.ramp_motor_function_path.clone(),
                )),
            );
            Arc::new(Device::new(id, behavior, ctx, rx))
        }
        DeviceType::CasparCg | DeviceType::Atem => {
            return Err(ConductorError::UnsupportedDeviceType {
                device_id: id.to_string(),
                device_type: options.device_type,
            })
        }
    };
    Ok(device)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::notification::NotificationReceiver;
    use serde_json::json;
    use std::time::Duration;

    /// Records every command an owner-level receiver gets.
    #[derive(Default)]
    pub(crate) struct RecordingReceiver {
        pub sent: Mutex<Vec<(Time, DeviceCommand)>>,
    }

    #[async_trait]
    impl CommandReceiver<DeviceCommand> for RecordingReceiver {
        async fn send(&self, time: Time, command: DeviceCommand) -> Result<(), TransportError> {
            self.sent.lock().push((time, command));
            Ok(())
        }
    }

    pub(crate) fn test_context() -> (DeviceContext, NotificationReceiver) {
        let (notifier, rx) = Notifier::channel();
        (
            DeviceContext {
                clock: Arc::new(TokioClock::starting_at(0)),
                notifier,
                resync: ResyncHandle::detached(),
                state_prune_interval: 10,
            },
            rx,
        )
    }

    pub(crate) fn resolved(time: Time, layers: &[(&str, &str, Value)]) -> ResolvedState {
        let mut state = ResolvedState::empty(time);
        for (layer, id, content) in layers {
            state.layers.insert(
                layer.to_string(),
                ResolvedLayer {
                    id: id.to_string(),
                    layer: layer.to_string(),
                    content: content.clone(),
                    start_time: time,
                    end_time: None,
                    mixer: BTreeMap::new(),
                    is_background: false,
                    original_layer: None,
                },
            );
        }
        state
    }

    fn mappings(pairs: &[(&str, Mapping)]) -> Arc<Mappings> {
        Arc::new(pairs.iter().cloned().map(|(k, m)| (k.to_string(), m)).collect())
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    // ── diff_layers ───────────────────────────────────────────────────────────

    #[test]
    fn diff_layers_orders_added_changed_then_removed() {
        let old = BTreeMap::from([("a".to_string(), 1), ("b".to_string(), 2)]);
        let new = BTreeMap::from([("b".to_string(), 3), ("c".to_string(), 4)]);
        let out = diff_layers(&old, &new, |o, n| o != n, |k, l, _| (k, l.to_string()));
        assert_eq!(
            out,
            vec![
                (ChangeKind::Changed, "b".to_string()),
                (ChangeKind::Added, "c".to_string()),
                (ChangeKind::Removed, "a".to_string()),
            ]
        );
    }

    // ── factory ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn factory_rejects_families_without_adapter() {
        let (ctx, _rx) = test_context();
        for ty in [DeviceType::CasparCg, DeviceType::Atem] {
            let err = create_device("x", &DeviceOptions::new(ty), ctx.clone(), None)
                .err()
                .unwrap();
            assert!(matches!(err, ConductorError::UnsupportedDeviceType { .. }));
        }
        let dev = create_device("l", &DeviceOptions::new(DeviceType::Lawo), ctx, None).unwrap();
        assert_eq!(dev.device_name(), "Lawo l");
        assert_eq!(dev.device_type(), DeviceType::Lawo);
    }

    // ── Device<B> pipeline ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn unchanged_state_queues_nothing() {
        let (ctx, _rx) = test_context();
        let rec = Arc::new(RecordingReceiver::default());
        let dev = create_device("abs", &DeviceOptions::new(DeviceType::Abstract), ctx, Some(rec.clone() as SharedReceiver))
            .unwrap();
        dev.set_mapping(mappings(&[("L", Mapping::new(DeviceType::Abstract, "abs"))]));

        dev.handle_state(&resolved(50, &[("L", "obj0", json!({"clip": "AMB"}))]))
            .await
            .unwrap();
        dev.handle_state(&resolved(100, &[("L", "obj0", json!({"clip": "AMB"}))]))
            .await
            .unwrap();
        assert_eq!(dev.queue().len(), 1, "only the initial add");

        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;
        let sent = rec.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn layers_of_other_devices_are_ignored() {
        let (ctx, _rx) = test_context();
        let dev = create_device("abs", &DeviceOptions::new(DeviceType::Abstract), ctx, None).unwrap();
        dev.set_mapping(mappings(&[
            ("mine", Mapping::new(DeviceType::Abstract, "abs")),
            ("theirs", Mapping::new(DeviceType::Abstract, "other")),
        ]));
        dev.handle_state(&resolved(
            500,
            &[("mine", "a", Value::Null), ("theirs", "b", Value::Null)],
        ))
        .await
        .unwrap();
        assert_eq!(dev.queue().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_future_keeps_commands_at_the_boundary() {
        let (ctx, _rx) = test_context();
        let dev = create_device("abs", &DeviceOptions::new(DeviceType::Abstract), ctx, None).unwrap();
        dev.set_mapping(mappings(&[("L", Mapping::new(DeviceType::Abstract, "abs"))]));
        dev.handle_state(&resolved(1000, &[("L", "a", Value::Null)])).await.unwrap();
        dev.handle_state(&resolved(2000, &[("L", "b", Value::Null)])).await.unwrap();

        dev.clear_future(1000);
        let times: Vec<Time> = dev.queue().iter().map(|p| p.time).collect();
        assert_eq!(times, vec![1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_clears_cache_and_notifies() {
        let (ctx, mut rx) = test_context();
        let dev = Device::new("abs", AbstractBehavior, ctx, Arc::new(LoggingReceiver::new("abs")));
        dev.set_mapping(mappings(&[("L", Mapping::new(DeviceType::Abstract, "abs"))]));
        assert!(dev.init().await.unwrap());
        dev.handle_state(&resolved(10, &[("L", "a", Value::Null)])).await.unwrap();
        assert!(dev.state_before(11).is_some());

        dev.connection_changed(true);
        assert!(rx.try_recv().is_err(), "no transition, no notification");

        dev.connection_changed(false);
        dev.connection_changed(true);
        assert!(dev.state_before(11).is_none());
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::ConnectionChanged {
                device_id: "abs".into(),
                connected: false
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::ConnectionChanged {
                device_id: "abs".into(),
                connected: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_device_rejects_state() {
        let (ctx, _rx) = test_context();
        let dev = create_device("abs", &DeviceOptions::new(DeviceType::Abstract), ctx, None).unwrap();
        dev.terminate().await.unwrap();
        assert!(!dev.connected());
        let err = dev.handle_state(&resolved(0, &[])).await.unwrap_err();
        assert_eq!(err, DeviceError::Terminated("abs".into()));
    }
}
