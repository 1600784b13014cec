//! Device side of the RTM <-> Device channel.
//!
//! The hardware driver adds its knobs and monitors locally, each with a
//! callback; the runtime manager then pulls tables, reads monitors and sets
//! knobs over the channel. The Device is a pure server: it never initiates
//! traffic and answers every request on the task that received it.
//!
//! ```text
//!  RTM                                   DeviceInterface
//!  ───                                   ───────────────
//!  KNOB_*_REG{req} ────────────────────▶ set_cb(val) for each new knob
//!                  ◀──── RETURN_KNOB_*_REG{req, [knobs]}
//!  fast mon get{req} ──────────────────▶ get_cb() -> (val, min, max)
//!                  ◀──── fast mon return{req}
//!  fast knob set ──────────────────────▶ set_cb(val)   (no reply)
//! ```
//!
//! A whole-table request returns only the entries added since the previous
//! table request of that kind, so a second request without new `add_*`
//! calls yields an empty table. Gets and sets keep working on every entry.
//!
//! Callbacks run with the tables unlocked, so a callback may add or remove
//! entries on the same interface.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Requests for unknown ids are logged and dropped

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use prime_core::{
    now_micros, Cont, DeviceArchitecture, DeviceKnob, DeviceKnobType, DeviceMonitor,
    DeviceMonitorType, Disc, MonitorReading, PackedId, Scalar, ScalarKind, Value,
};
use prime_protocol::{DeviceEntryRef, FastFrame, Frame, RequestId, SlowFrame, SlowMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::directory::{Directory, InterfaceConfig};
use crate::error::ApiResult;
use crate::mirror::Mirror;
use crate::transport::{Datagram, Inbox, PeerMode, Transport};

type SetCallback = Arc<Mutex<dyn FnMut(Value) + Send>>;
type GetCallback = Arc<Mutex<dyn FnMut() -> MonitorReading<Value> + Send>>;

fn call_set(set: &SetCallback, val: Value) {
    let mut set = lock(set);
    (*set)(val);
}

/// Reads the hardware and refreshes `mon` with the reading.
fn read_into(mon: &mut DeviceMonitor<Value>, get: &GetCallback) {
    let reading = {
        let mut get = lock(get);
        (*get)()
    };
    if reading.val.kind() == mon.kind() {
        mon.apply_reading(reading);
    } else {
        warn!(id = %mon.id, "Monitor callback returned the wrong domain");
    }
}

fn reading_of(mon: &DeviceMonitor<Value>) -> MonitorReading<Value> {
    MonitorReading {
        val: mon.val,
        min: mon.min,
        max: mon.max,
    }
}

// ============================================================================
// Tables
// ============================================================================

struct KnobEntry {
    knob: DeviceKnob<Value>,
    set: SetCallback,
    /// Already returned by a whole-table request
    published: bool,
}

struct MonitorEntry {
    mon: DeviceMonitor<Value>,
    get: GetCallback,
    published: bool,
}

#[derive(Default)]
struct Tables {
    knobs: Vec<KnobEntry>,
    monitors: Vec<MonitorEntry>,
}

impl Tables {
    fn knob_mut(&mut self, id: PackedId, kind: ScalarKind) -> Option<&mut KnobEntry> {
        self.knobs
            .iter_mut()
            .find(|e| e.knob.id == id && e.knob.kind() == kind)
    }

    fn monitor_mut(&mut self, id: PackedId, kind: ScalarKind) -> Option<&mut MonitorEntry> {
        self.monitors
            .iter_mut()
            .find(|e| e.mon.id == id && e.mon.kind() == kind)
    }

    fn knob_count(&self, kind: ScalarKind) -> usize {
        self.knobs.iter().filter(|e| e.knob.kind() == kind).count()
    }

    fn monitor_count(&self, kind: ScalarKind) -> usize {
        self.monitors.iter().filter(|e| e.mon.kind() == kind).count()
    }

    /// Marks unpublished knobs of `kind` published. The caller pushes each
    /// value to the hardware once the tables are unlocked.
    fn publish_knobs(&mut self, kind: ScalarKind) -> Vec<(DeviceKnob<Value>, SetCallback)> {
        let mut out = Vec::new();
        for entry in self
            .knobs
            .iter_mut()
            .filter(|e| !e.published && e.knob.kind() == kind)
        {
            entry.published = true;
            out.push((entry.knob, Arc::clone(&entry.set)));
        }
        out
    }

    /// Marks unpublished monitors of `kind` published. The caller reads each
    /// from the hardware once the tables are unlocked.
    fn publish_monitors(&mut self, kind: ScalarKind) -> Vec<(DeviceMonitor<Value>, GetCallback)> {
        let mut out = Vec::new();
        for entry in self
            .monitors
            .iter_mut()
            .filter(|e| !e.published && e.mon.kind() == kind)
        {
            entry.published = true;
            out.push((entry.mon, Arc::clone(&entry.get)));
        }
        out
    }

    /// Stores fresh readings on the entries that still exist.
    fn record(&mut self, mons: &[DeviceMonitor<Value>]) {
        for mon in mons {
            if let Some(entry) = self.monitor_mut(mon.id, mon.kind()) {
                entry.mon = *mon;
            }
        }
    }

    fn remove_knobs(&mut self, refs: &[DeviceEntryRef<DeviceKnobType>]) -> usize {
        let before = self.knobs.len();
        self.knobs.retain(|e| {
            !refs
                .iter()
                .any(|r| r.id == e.knob.id && r.entry_type == e.knob.knob_type)
        });
        before - self.knobs.len()
    }

    fn remove_monitors(&mut self, refs: &[DeviceEntryRef<DeviceMonitorType>]) -> usize {
        let before = self.monitors.len();
        self.monitors.retain(|e| {
            !refs
                .iter()
                .any(|r| r.id == e.mon.id && r.entry_type == e.mon.mon_type)
        });
        before - self.monitors.len()
    }
}

fn size_of(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

// ============================================================================
// Interface
// ============================================================================

/// A Device's connection to the runtime manager.
pub struct DeviceInterface {
    arch_path: PathBuf,
    architecture: DeviceArchitecture,
    tables: Arc<Mutex<Tables>>,
    transport: Transport,
    cancel: CancellationToken,
}

impl DeviceInterface {
    /// Loads the architecture document and starts serving requests.
    pub fn new(config: &InterfaceConfig, arch_path: impl Into<PathBuf>) -> ApiResult<Self> {
        let arch_path = arch_path.into();
        let architecture = DeviceArchitecture::load(&arch_path)?;

        let directory = Directory::new(config);
        let (transport, inbox) = Transport::with_inbox(&directory.dev()?, PeerMode::Server)?;
        let logger = Mirror::open(directory.dev_logger(), "logger");

        let tables = Arc::new(Mutex::new(Tables::default()));
        let cancel = CancellationToken::new();
        let server = DeviceServer {
            arch_path: arch_path.to_string_lossy().into_owned(),
            tables: Arc::clone(&tables),
            transport: transport.clone(),
            logger,
        };
        tokio::spawn(server.run(inbox, cancel.clone()));

        info!(
            arch = %arch_path.display(),
            units = architecture.functional_units.len(),
            "Device interface ready"
        );
        Ok(Self {
            arch_path,
            architecture,
            tables,
            transport,
            cancel,
        })
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        lock(&self.tables)
    }

    pub fn architecture(&self) -> &DeviceArchitecture {
        &self.architecture
    }

    pub fn arch_path(&self) -> &Path {
        &self.arch_path
    }

    // ========================================================================
    // Knobs
    // ========================================================================

    /// Adds a knob driven by `set`. An existing knob with the same id and
    /// domain is replaced.
    #[allow(clippy::too_many_arguments)]
    pub fn add_knob<V, F>(
        &self,
        id: PackedId,
        knob_type: DeviceKnobType,
        min: V,
        max: V,
        val: V,
        init: V,
        mut set: F,
    ) -> DeviceKnob<V>
    where
        V: Scalar,
        F: FnMut(V) + Send + 'static,
    {
        let knob = DeviceKnob {
            id,
            knob_type,
            min,
            max,
            val,
            init,
        };
        let set: SetCallback = Arc::new(Mutex::new(move |value: Value| {
            match V::from_value(value) {
                Some(v) => set(v),
                None => warn!(%id, "Ignoring knob set in the wrong domain"),
            }
        }));
        let entry = KnobEntry {
            knob: knob.erased(),
            set,
            published: false,
        };

        let mut tables = self.tables();
        match tables.knob_mut(id, V::KIND) {
            Some(existing) => {
                debug!(%id, "Replacing device knob");
                *existing = entry;
            }
            None => tables.knobs.push(entry),
        }
        knob
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_knob_disc<F>(
        &self,
        id: PackedId,
        knob_type: DeviceKnobType,
        min: Disc,
        max: Disc,
        val: Disc,
        init: Disc,
        set: F,
    ) -> DeviceKnob<Disc>
    where
        F: FnMut(Disc) + Send + 'static,
    {
        self.add_knob(id, knob_type, min, max, val, init, set)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_knob_cont<F>(
        &self,
        id: PackedId,
        knob_type: DeviceKnobType,
        min: Cont,
        max: Cont,
        val: Cont,
        init: Cont,
        set: F,
    ) -> DeviceKnob<Cont>
    where
        F: FnMut(Cont) + Send + 'static,
    {
        self.add_knob(id, knob_type, min, max, val, init, set)
    }

    /// Removes a knob locally. The RTM is not told.
    pub fn remove_knob(&self, id: PackedId, kind: ScalarKind) -> bool {
        let mut tables = self.tables();
        let before = tables.knobs.len();
        tables
            .knobs
            .retain(|e| !(e.knob.id == id && e.knob.kind() == kind));
        before != tables.knobs.len()
    }

    // ========================================================================
    // Monitors
    // ========================================================================

    /// Adds a monitor read through `get`. An existing monitor with the same
    /// id and domain is replaced.
    pub fn add_monitor<V, F>(
        &self,
        id: PackedId,
        mon_type: DeviceMonitorType,
        val: V,
        min: V,
        max: V,
        mut get: F,
    ) -> DeviceMonitor<V>
    where
        V: Scalar,
        F: FnMut() -> MonitorReading<V> + Send + 'static,
    {
        let mon = DeviceMonitor {
            id,
            mon_type,
            min,
            max,
            val,
        };
        let get: GetCallback = Arc::new(Mutex::new(move || get().erased()));
        let entry = MonitorEntry {
            mon: mon.erased(),
            get,
            published: false,
        };

        let mut tables = self.tables();
        match tables.monitor_mut(id, V::KIND) {
            Some(existing) => {
                debug!(%id, "Replacing device monitor");
                *existing = entry;
            }
            None => tables.monitors.push(entry),
        }
        mon
    }

    pub fn add_monitor_disc<F>(
        &self,
        id: PackedId,
        mon_type: DeviceMonitorType,
        val: Disc,
        min: Disc,
        max: Disc,
        get: F,
    ) -> DeviceMonitor<Disc>
    where
        F: FnMut() -> MonitorReading<Disc> + Send + 'static,
    {
        self.add_monitor(id, mon_type, val, min, max, get)
    }

    pub fn add_monitor_cont<F>(
        &self,
        id: PackedId,
        mon_type: DeviceMonitorType,
        val: Cont,
        min: Cont,
        max: Cont,
        get: F,
    ) -> DeviceMonitor<Cont>
    where
        F: FnMut() -> MonitorReading<Cont> + Send + 'static,
    {
        self.add_monitor(id, mon_type, val, min, max, get)
    }

    /// Removes a monitor locally. The RTM is not told.
    pub fn remove_monitor(&self, id: PackedId, kind: ScalarKind) -> bool {
        let mut tables = self.tables();
        let before = tables.monitors.len();
        tables
            .monitors
            .retain(|e| !(e.mon.id == id && e.mon.kind() == kind));
        before != tables.monitors.len()
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Every knob currently held, published or not.
    pub fn knobs(&self) -> Vec<DeviceKnob<Value>> {
        self.tables().knobs.iter().map(|e| e.knob).collect()
    }

    /// Every monitor currently held, with its last reading.
    pub fn monitors(&self) -> Vec<DeviceMonitor<Value>> {
        self.tables().monitors.iter().map(|e| e.mon).collect()
    }

    /// Stops serving requests and releases the endpoint.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.transport.close();
        info!("Device interface shut down");
    }
}

impl Drop for DeviceInterface {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Request Handling
// ============================================================================

struct DeviceServer {
    arch_path: String,
    tables: Arc<Mutex<Tables>>,
    transport: Transport,
    logger: Mirror,
}

impl DeviceServer {
    async fn run(self, mut inbox: Inbox, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Device server stopping");
                    break;
                }
                datagram = inbox.recv() => {
                    match datagram {
                        Some(datagram) => self.handle(datagram),
                        None => break,
                    }
                }
            }
        }
    }

    fn handle(&self, datagram: Datagram) {
        match Frame::decode(&datagram.bytes) {
            Ok(Frame::Slow(frame)) => self.handle_slow(frame),
            Ok(Frame::Fast(frame)) => self.handle_fast(frame),
            Err(e) => warn!(error = %e, "Dropping malformed device request"),
        }
    }

    fn reply(&self, message: SlowMessage, req: Option<RequestId>) {
        let frame = match req {
            Some(req) => SlowFrame::with_req(message, req),
            None => SlowFrame::new(message),
        };
        match frame.encode() {
            Ok(bytes) => {
                self.transport.send(&bytes);
                self.logger.send_bytes(&bytes);
            }
            Err(e) => warn!(error = %e, "Failed to encode device reply"),
        }
    }

    fn handle_slow(&self, frame: SlowFrame) {
        let SlowFrame { req, message, .. } = frame;
        trace!(msg_type = %message.message_type(), "Device request");
        let mut tables = lock(&self.tables);
        match message {
            SlowMessage::DeviceKnobSize(kind) => {
                let size = size_of(tables.knob_count(kind));
                drop(tables);
                self.reply(SlowMessage::DeviceKnobSizeReturn { kind, size }, req);
            }
            SlowMessage::DeviceMonitorSize(kind) => {
                let size = size_of(tables.monitor_count(kind));
                drop(tables);
                self.reply(SlowMessage::DeviceMonitorSizeReturn { kind, size }, req);
            }
            SlowMessage::DeviceKnobRegister(kind) => {
                let published = tables.publish_knobs(kind);
                drop(tables);
                let knobs: Vec<_> = published
                    .into_iter()
                    .map(|(knob, set)| {
                        call_set(&set, knob.val);
                        knob
                    })
                    .collect();
                debug!(%kind, count = knobs.len(), "Publishing device knobs");
                self.reply(SlowMessage::DeviceKnobRegisterReturn { kind, knobs }, req);
            }
            SlowMessage::DeviceMonitorRegister(kind) => {
                let published = tables.publish_monitors(kind);
                drop(tables);
                let mons: Vec<_> = published
                    .into_iter()
                    .map(|(mut mon, get)| {
                        read_into(&mut mon, &get);
                        mon
                    })
                    .collect();
                lock(&self.tables).record(&mons);
                debug!(%kind, count = mons.len(), "Publishing device monitors");
                self.reply(SlowMessage::DeviceMonitorRegisterReturn { kind, mons }, req);
            }
            SlowMessage::DeviceKnobDeregister { kind, knobs } => {
                let removed = tables.remove_knobs(&knobs);
                debug!(%kind, removed, "Device knobs deregistered");
            }
            SlowMessage::DeviceMonitorDeregister { kind, mons } => {
                let removed = tables.remove_monitors(&mons);
                debug!(%kind, removed, "Device monitors deregistered");
            }
            SlowMessage::ArchGet => {
                drop(tables);
                self.reply(
                    SlowMessage::ArchGetReturn {
                        path: self.arch_path.clone(),
                    },
                    req,
                );
            }
            other => debug!(msg_type = %other.message_type(), "Ignoring message on device channel"),
        }
    }

    fn handle_fast(&self, frame: FastFrame) {
        match frame {
            FastFrame::DeviceKnobSet { id, val, .. } => {
                let set = lock(&self.tables).knob_mut(id, val.kind()).map(|entry| {
                    entry.knob.val = val;
                    Arc::clone(&entry.set)
                });
                match set {
                    Some(set) => {
                        call_set(&set, val);
                        trace!(%id, %val, "Device knob set");
                    }
                    None => warn!(%id, "Set for unknown device knob"),
                }
            }
            FastFrame::DeviceMonitorGet { kind, id, req, .. } => {
                let found = lock(&self.tables)
                    .monitor_mut(id, kind)
                    .map(|entry| (entry.mon, Arc::clone(&entry.get)));
                let Some((mut mon, get)) = found else {
                    warn!(%id, "Get for unknown device monitor");
                    return;
                };
                read_into(&mut mon, &get);
                lock(&self.tables).record(&[mon]);
                let reading = reading_of(&mon);
                let reply = FastFrame::DeviceMonitorReturn {
                    id,
                    reading,
                    req,
                    ts: now_micros(),
                };
                let bytes = reply.encode();
                self.transport.send(&bytes);
                self.logger.send_bytes(&bytes);
            }
            other => debug!(tag = ?other.tag(), "Ignoring fast frame on device channel"),
        }
    }
}
