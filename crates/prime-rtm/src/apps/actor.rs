//! App registry actor - owns every App session and its fan-out endpoint.
//!
//! Registrations arrive on the shared rendezvous endpoint. Each accepted App
//! gets a dedicated fan-out transport, and all later traffic from that App
//! (knob and monitor registration, updates, heartbeats) arrives there.
//!
//! ```text
//!  rendezvous recv task ──┐
//!  fan-out recv task(s) ──┼──▶ AppCommand ──▶ AppRegistryActor ──▶ AppEvent
//!  AppRegistryHandle ─────┘     (mpsc)        (single task)        (broadcast)
//! ```
//!
//! Ids come from one counter shared by knobs and monitors, starting at 1,
//! so an id names exactly one entity for the life of the registry.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Malformed datagrams are logged and dropped
//! - Event and reply send failures are ignored

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use prime_api::{Datagram, Directory, Endpoint, Mirror, PeerMode, Transport};
use prime_core::{now_micros, AppKnob, AppMonitor, Value};
use prime_protocol::{Bound, FastFrame, Frame, RequestId, SlowFrame, SlowMessage};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::commands::{AppCommand, AppEvent, DeregisterReason, RegistryError, SessionView, Source};

/// Maximum number of concurrently registered Apps.
pub const MAX_SESSIONS: usize = 256;

/// Receive-task callback that feeds datagrams into the actor.
pub(crate) fn forward(
    sender: mpsc::Sender<AppCommand>,
    source: Source,
) -> impl FnMut(Datagram) + Send + 'static {
    move |datagram| match sender.try_send(AppCommand::Inbound { source, datagram }) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!(?source, "Registry queue full, dropping datagram"),
        Err(TrySendError::Closed(_)) => trace!(?source, "Registry stopped, dropping datagram"),
    }
}

// ============================================================================
// Session
// ============================================================================

struct AppSession {
    ur_id: u64,
    weight: f32,
    transport: Transport,
    knobs: BTreeMap<u32, AppKnob>,
    monitors: BTreeMap<u32, AppMonitor>,
    registered_at: DateTime<Utc>,
    lease_expires: Instant,
}

impl AppSession {
    fn view(&self, pid: u32) -> SessionView {
        SessionView {
            pid,
            ur_id: self.ur_id,
            weight: self.weight,
            knobs: self.knobs.len(),
            monitors: self.monitors.len(),
            peer: self.transport.peer(),
            registered_at: self.registered_at,
        }
    }
}

// ============================================================================
// Registry Actor
// ============================================================================

/// Single owner of all App sessions.
pub struct AppRegistryActor {
    receiver: mpsc::Receiver<AppCommand>,

    /// Handed to each fan-out transport's receive task
    inbound: mpsc::Sender<AppCommand>,

    directory: Directory,

    rendezvous: Transport,

    sessions: HashMap<u32, AppSession>,

    /// Next knob or monitor id
    next_id: u32,

    lease: Duration,

    logger: Mirror,

    /// Mirror of registration traffic and errors for the UI
    ui: Mirror,

    event_publisher: broadcast::Sender<AppEvent>,
}

impl AppRegistryActor {
    pub fn new(
        receiver: mpsc::Receiver<AppCommand>,
        inbound: mpsc::Sender<AppCommand>,
        event_publisher: broadcast::Sender<AppEvent>,
        directory: Directory,
        rendezvous: Transport,
    ) -> Self {
        let logger = Mirror::open(directory.rtm_app_logger(), "logger");
        let ui = Mirror::open(directory.rtm_app_ui().map(Some), "ui");
        Self {
            receiver,
            inbound,
            lease: directory.config().lease(),
            directory,
            rendezvous,
            sessions: HashMap::new(),
            next_id: 1,
            logger,
            ui,
            event_publisher,
        }
    }

    /// Processes commands until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(endpoint = ?self.rendezvous.local_addr(), "App registry starting");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
            }
        }

        self.rendezvous.close();
        info!(sessions = self.sessions.len(), "App registry stopped");
    }

    fn handle_command(&mut self, cmd: AppCommand) {
        match cmd {
            AppCommand::Inbound { source, datagram } => self.handle_inbound(source, datagram),
            AppCommand::KnobSet {
                pid,
                id,
                val,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_knob_set(pid, id, val));
            }
            AppCommand::SetAppWeight {
                pid,
                weight,
                respond_to,
            } => {
                let result = match self.sessions.get_mut(&pid) {
                    Some(session) => {
                        session.weight = weight;
                        debug!(pid, weight, "App weight set");
                        Ok(())
                    }
                    None => Err(RegistryError::SessionNotFound(pid)),
                };
                let _ = respond_to.send(result);
            }
            AppCommand::GetKnob {
                pid,
                id,
                respond_to,
            } => {
                let knob = self.sessions.get(&pid).and_then(|s| s.knobs.get(&id)).copied();
                let _ = respond_to.send(knob);
            }
            AppCommand::GetMonitor {
                pid,
                id,
                respond_to,
            } => {
                let mon = self
                    .sessions
                    .get(&pid)
                    .and_then(|s| s.monitors.get(&id))
                    .copied();
                let _ = respond_to.send(mon);
            }
            AppCommand::GetKnobs { respond_to } => {
                let mut knobs: Vec<AppKnob> = self
                    .sessions
                    .values()
                    .flat_map(|s| s.knobs.values().copied())
                    .collect();
                knobs.sort_by_key(|k| k.id);
                let _ = respond_to.send(knobs);
            }
            AppCommand::GetMonitors { respond_to } => {
                let mut mons: Vec<AppMonitor> = self
                    .sessions
                    .values()
                    .flat_map(|s| s.monitors.values().copied())
                    .collect();
                mons.sort_by_key(|m| m.id);
                let _ = respond_to.send(mons);
            }
            AppCommand::GetSessions { respond_to } => {
                let mut views: Vec<SessionView> =
                    self.sessions.iter().map(|(pid, s)| s.view(*pid)).collect();
                views.sort_by_key(|v| v.pid);
                let _ = respond_to.send(views);
            }
            AppCommand::ReapExpired { respond_to } => {
                let reaped = self.handle_reap_expired();
                if let Some(tx) = respond_to {
                    let _ = tx.send(reaped);
                }
            }
        }
    }

    fn publish(&self, event: AppEvent) {
        // No subscribers is fine
        let _ = self.event_publisher.send(event);
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    // ========================================================================
    // Inbound Traffic
    // ========================================================================

    fn handle_inbound(&mut self, source: Source, datagram: Datagram) {
        let frame = match Frame::decode(&datagram.bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(?source, error = %e, "Dropping malformed frame");
                return;
            }
        };
        self.logger.send_bytes(&datagram.bytes);

        match source {
            Source::Rendezvous => self.handle_rendezvous(frame, datagram.from),
            Source::Session(pid) => {
                let lease = self.lease;
                match self.sessions.get_mut(&pid) {
                    Some(session) => session.lease_expires = Instant::now() + lease,
                    None => {
                        debug!(pid, "Frame for a closed session");
                        return;
                    }
                }
                match frame {
                    Frame::Slow(frame) => self.handle_session_slow(pid, frame),
                    Frame::Fast(frame) => self.handle_session_fast(pid, frame),
                }
            }
        }
    }

    fn handle_rendezvous(&mut self, frame: Frame, from: Option<Endpoint>) {
        match frame {
            Frame::Slow(SlowFrame {
                req,
                message: SlowMessage::AppRegister { proc_id, ur_id },
                ..
            }) => self.handle_register(proc_id, ur_id, req, from),
            Frame::Slow(frame) => {
                debug!(msg_type = %frame.message.message_type(), "Ignoring message on rendezvous")
            }
            Frame::Fast(frame) => debug!(tag = %frame.tag(), "Ignoring fast frame on rendezvous"),
        }
    }

    fn handle_register(
        &mut self,
        pid: u32,
        ur_id: u64,
        req: Option<RequestId>,
        from: Option<Endpoint>,
    ) {
        if let Some(expected) = self.directory.expected_app_sender(pid) {
            if from.as_ref() != Some(&expected) {
                let sender = from
                    .as_ref()
                    .map_or_else(|| "an unbound socket".to_string(), ToString::to_string);
                let msg = format!(
                    "App registration for pid {pid} came from {sender}, expected {expected}"
                );
                warn!(pid, %sender, "App address mismatch, registration aborted");
                self.send_ui(SlowMessage::UiRtmError { msg });
                self.publish(AppEvent::AddressMismatch {
                    claimed_pid: pid,
                    from,
                });
                return;
            }
        }

        // Re-registration of a live session is acknowledged on its channel
        if let Some(session) = self.sessions.get_mut(&pid) {
            session.lease_expires = Instant::now() + self.lease;
            session.ur_id = ur_id;
            if let Some(from) = from {
                session.transport.set_peer(from);
            }
            let transport = session.transport.clone();
            debug!(pid, "App re-registered");
            self.reply(&transport, SlowMessage::AppRegisterReturn { proc_id: pid }, req);
            return;
        }

        if self.sessions.len() >= MAX_SESSIONS {
            warn!(pid, max = MAX_SESSIONS, "Registry is full, rejecting App");
            self.send_ui(SlowMessage::UiRtmError {
                msg: format!("App registry is full ({MAX_SESSIONS} apps), pid {pid} rejected"),
            });
            return;
        }

        let binding = self.directory.rtm_fanout(pid, from.as_ref());
        let transport = match Transport::with_handler(
            &binding,
            PeerMode::Server,
            forward(self.inbound.clone(), Source::Session(pid)),
        ) {
            Ok(transport) => transport,
            Err(e) => {
                warn!(pid, error = %e, "Failed to open App fan-out endpoint");
                self.send_ui(SlowMessage::UiRtmError {
                    msg: format!("Cannot open endpoint for pid {pid}: {e}"),
                });
                return;
            }
        };

        self.reply(&transport, SlowMessage::AppRegisterReturn { proc_id: pid }, req);
        self.sessions.insert(
            pid,
            AppSession {
                ur_id,
                weight: 1.0,
                transport,
                knobs: BTreeMap::new(),
                monitors: BTreeMap::new(),
                registered_at: Utc::now(),
                lease_expires: Instant::now() + self.lease,
            },
        );
        info!(pid, ur_id, total = self.sessions.len(), "App registered");
        self.publish(AppEvent::AppRegistered { pid, ur_id });
    }

    fn handle_session_slow(&mut self, pid: u32, frame: SlowFrame) {
        let SlowFrame { req, message, .. } = frame;
        match message {
            SlowMessage::AppHeartbeat { .. } => trace!(pid, "Heartbeat"),
            SlowMessage::AppRegister { ur_id, .. } => {
                let from = self.sessions.get(&pid).and_then(|s| s.transport.peer());
                self.handle_register(pid, ur_id, req, from);
            }
            SlowMessage::AppDeregister { .. } => {
                if let Some(session) = self.sessions.remove(&pid) {
                    self.reply(
                        &session.transport,
                        SlowMessage::AppDeregisterReturn { proc_id: pid },
                        req,
                    );
                    self.end_session(pid, session, DeregisterReason::Explicit);
                }
            }
            SlowMessage::KnobRegister(reg) => {
                let id = self.allocate_id();
                let knob = AppKnob {
                    proc_id: pid,
                    id,
                    knob_type: reg.knob_type,
                    min: reg.min,
                    max: reg.max,
                    val: reg.val,
                };
                let Some(session) = self.sessions.get_mut(&pid) else {
                    return;
                };
                session.knobs.insert(id, knob);
                let transport = session.transport.clone();
                self.reply(&transport, SlowMessage::KnobRegisterReturn(knob), req);
                debug!(pid, id, knob_type = %knob.knob_type, "Knob registered");
                self.publish(AppEvent::KnobRegistered(knob));
            }
            SlowMessage::KnobDeregister(knob) => {
                let removed = self
                    .sessions
                    .get_mut(&pid)
                    .and_then(|s| s.knobs.remove(&knob.id));
                if removed.is_some() {
                    debug!(pid, id = knob.id, "Knob deregistered");
                    self.publish(AppEvent::KnobDeregistered { pid, id: knob.id });
                }
            }
            SlowMessage::MonitorRegister(reg) => {
                let id = self.allocate_id();
                let mon = AppMonitor {
                    proc_id: pid,
                    id,
                    mon_type: reg.mon_type,
                    min: reg.min,
                    max: reg.max,
                    val: Value::zero(reg.kind()),
                    weight: reg.weight,
                };
                let Some(session) = self.sessions.get_mut(&pid) else {
                    return;
                };
                session.monitors.insert(id, mon);
                let transport = session.transport.clone();
                self.reply(&transport, SlowMessage::MonitorRegisterReturn(mon), req);
                debug!(pid, id, mon_type = %mon.mon_type, "Monitor registered");
                self.publish(AppEvent::MonitorRegistered(mon));
            }
            SlowMessage::MonitorDeregister(mon) => {
                let removed = self
                    .sessions
                    .get_mut(&pid)
                    .and_then(|s| s.monitors.remove(&mon.id));
                if removed.is_some() {
                    debug!(pid, id = mon.id, "Monitor deregistered");
                    self.publish(AppEvent::MonitorDeregistered { pid, id: mon.id });
                }
            }
            other => debug!(pid, msg_type = %other.message_type(), "Ignoring message on app channel"),
        }
    }

    fn handle_session_fast(&mut self, pid: u32, frame: FastFrame) {
        let Some(session) = self.sessions.get_mut(&pid) else {
            return;
        };
        let update = matches!(
            frame,
            FastFrame::KnobBound { .. }
                | FastFrame::MonitorBound { .. }
                | FastFrame::MonitorWeight { .. }
                | FastFrame::MonitorSet { .. }
        )
        .then(|| frame.encode());
        let event = match frame {
            FastFrame::KnobGet { id, req, .. } => {
                match session.knobs.get(&id) {
                    Some(knob) => {
                        let reply = FastFrame::KnobGetReturn {
                            id,
                            val: knob.val,
                            proc_id: pid,
                            req,
                            ts: now_micros(),
                        };
                        let bytes = reply.encode();
                        session.transport.send(&bytes);
                        self.logger.send_bytes(&bytes);
                    }
                    None => warn!(pid, id, "Get for unknown knob"),
                }
                None
            }
            FastFrame::KnobBound { bound, id, val, .. } => {
                session.knobs.get_mut(&id).map(|knob| {
                    match bound {
                        Bound::Min => knob.min = val,
                        Bound::Max => knob.max = val,
                    }
                    AppEvent::KnobChanged(*knob)
                })
            }
            FastFrame::MonitorBound { bound, id, val, .. } => {
                session.monitors.get_mut(&id).map(|mon| {
                    match bound {
                        Bound::Min => mon.min = val,
                        Bound::Max => mon.max = val,
                    }
                    AppEvent::MonitorChanged(*mon)
                })
            }
            FastFrame::MonitorWeight { id, weight, .. } => {
                session.monitors.get_mut(&id).map(|mon| {
                    mon.weight = weight;
                    AppEvent::MonitorChanged(*mon)
                })
            }
            FastFrame::MonitorSet { id, val, .. } => {
                session.monitors.get_mut(&id).map(|mon| {
                    mon.val = val;
                    AppEvent::MonitorChanged(*mon)
                })
            }
            other => {
                debug!(pid, tag = %other.tag(), "Ignoring fast frame on app channel");
                None
            }
        };
        if let Some(event) = event {
            trace!(pid, ?event, "App update");
            if let Some(bytes) = &update {
                self.ui.send_bytes(bytes);
            }
            self.publish(event);
        }
    }

    // ========================================================================
    // Replies
    // ========================================================================

    /// Answers an App. Registration lifecycle replies are also shown to the UI.
    fn reply(&self, transport: &Transport, message: SlowMessage, req: Option<RequestId>) {
        let lifecycle = matches!(
            message,
            SlowMessage::AppRegisterReturn { .. } | SlowMessage::AppDeregisterReturn { .. }
        );
        let frame = match req {
            Some(req) => SlowFrame::with_req(message, req),
            None => SlowFrame::new(message),
        };
        match frame.encode() {
            Ok(bytes) => {
                transport.send(&bytes);
                self.logger.send_bytes(&bytes);
                if lifecycle {
                    self.ui.send_bytes(&bytes);
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode reply"),
        }
    }

    fn send_ui(&self, message: SlowMessage) {
        match SlowFrame::new(message).encode() {
            Ok(bytes) => {
                self.ui.send_bytes(&bytes);
                self.logger.send_bytes(&bytes);
            }
            Err(e) => warn!(error = %e, "Failed to encode UI message"),
        }
    }

    // ========================================================================
    // Handle Commands
    // ========================================================================

    fn handle_knob_set(&mut self, pid: u32, id: u32, val: Value) -> Result<AppKnob, RegistryError> {
        let session = self
            .sessions
            .get_mut(&pid)
            .ok_or(RegistryError::SessionNotFound(pid))?;
        let knob = session
            .knobs
            .get_mut(&id)
            .ok_or(RegistryError::KnobNotFound { pid, id })?;
        if knob.kind() != val.kind() {
            return Err(RegistryError::DomainMismatch {
                expected: knob.kind(),
                found: val.kind(),
            });
        }
        knob.val = val;
        trace!(pid, id, %val, "Knob set");
        Ok(*knob)
    }

    /// Drops every session whose lease has lapsed.
    fn handle_reap_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.lease_expires <= now)
            .map(|(pid, _)| *pid)
            .collect();

        if expired.is_empty() {
            return 0;
        }
        for pid in &expired {
            if let Some(session) = self.sessions.remove(pid) {
                warn!(pid, "App lease expired");
                self.end_session(*pid, session, DeregisterReason::LeaseExpired);
            }
        }
        expired.len()
    }

    /// Closes the fan-out endpoint and announces the end of a session.
    fn end_session(&self, pid: u32, session: AppSession, reason: DeregisterReason) {
        session.transport.close();
        info!(
            pid,
            %reason,
            knobs = session.knobs.len(),
            monitors = session.monitors.len(),
            "App deregistered"
        );
        self.publish(AppEvent::AppDeregistered { pid, reason });
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    #[cfg(test)]
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_api::{Binding, InterfaceConfig};
    use prime_core::AppKnobType;
    use prime_protocol::KnobRegistration;

    struct Rig {
        _dir: tempfile::TempDir,
        dir_path: std::path::PathBuf,
        actor: AppRegistryActor,
        events: broadcast::Receiver<AppEvent>,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let config = InterfaceConfig {
            logger_enabled: false,
            ..InterfaceConfig::with_socket_dir(dir.path())
        };
        let directory = Directory::new(&config);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, events) = broadcast::channel(16);
        let rendezvous =
            Transport::send_only(&Binding::listen(directory.socket("rtm.app"))).unwrap();
        let actor = AppRegistryActor::new(cmd_rx, cmd_tx, event_tx, directory, rendezvous);
        Rig {
            dir_path: dir.path().to_path_buf(),
            _dir: dir,
            actor,
            events,
        }
    }

    fn slow(message: SlowMessage, req: u64) -> Vec<u8> {
        SlowFrame::with_req(message, RequestId::new(req)).encode().unwrap()
    }

    fn app_sender(rig: &Rig, pid: u32) -> Option<Endpoint> {
        Some(Endpoint::Unix(rig.dir_path.join(format!("app.rtm.{pid}.uds"))))
    }

    fn register(rig: &mut Rig, pid: u32) {
        let from = app_sender(rig, pid);
        rig.actor.handle_inbound(
            Source::Rendezvous,
            Datagram {
                bytes: slow(SlowMessage::AppRegister { proc_id: pid, ur_id: 3 }, 1),
                from,
            },
        );
    }

    #[tokio::test]
    async fn test_register_opens_fanout_endpoint() {
        let mut rig = rig();
        register(&mut rig, 40);
        assert_eq!(rig.actor.session_count(), 1);
        assert!(rig.dir_path.join("rtm.app.40.uds").exists());
        assert_eq!(
            rig.events.try_recv().unwrap(),
            AppEvent::AppRegistered { pid: 40, ur_id: 3 }
        );
    }

    #[tokio::test]
    async fn test_address_mismatch_is_rejected() {
        let mut rig = rig();
        let impostor = app_sender(&rig, 99);
        rig.actor.handle_inbound(
            Source::Rendezvous,
            Datagram {
                bytes: slow(SlowMessage::AppRegister { proc_id: 41, ur_id: 0 }, 1),
                from: impostor.clone(),
            },
        );
        assert_eq!(rig.actor.session_count(), 0);
        assert_eq!(
            rig.events.try_recv().unwrap(),
            AppEvent::AddressMismatch {
                claimed_pid: 41,
                from: impostor
            }
        );
    }

    #[tokio::test]
    async fn test_ids_are_shared_between_knobs_and_monitors() {
        let mut rig = rig();
        register(&mut rig, 42);
        let reg = KnobRegistration {
            proc_id: 42,
            knob_type: AppKnobType::Parallelism,
            min: Value::Disc(0),
            max: Value::Disc(10),
            val: Value::Disc(5),
        };
        rig.actor.handle_session_slow(42, SlowFrame::new(SlowMessage::KnobRegister(reg)));
        rig.actor.handle_session_slow(42, SlowFrame::new(SlowMessage::KnobRegister(reg)));

        let knob_ids: Vec<u32> = rig.actor.sessions[&42].knobs.keys().copied().collect();
        assert_eq!(knob_ids, vec![1, 2]);
        assert_eq!(rig.actor.allocate_id(), 3);
    }

    #[tokio::test]
    async fn test_knob_set_checks_domain() {
        let mut rig = rig();
        register(&mut rig, 43);
        let reg = KnobRegistration {
            proc_id: 43,
            knob_type: AppKnobType::Precision,
            min: Value::Cont(0.0),
            max: Value::Cont(1.0),
            val: Value::Cont(0.5),
        };
        rig.actor.handle_session_slow(43, SlowFrame::new(SlowMessage::KnobRegister(reg)));

        let knob = rig.actor.handle_knob_set(43, 1, Value::Cont(0.25)).unwrap();
        assert_eq!(knob.val, Value::Cont(0.25));
        assert!(matches!(
            rig.actor.handle_knob_set(43, 1, Value::Disc(1)),
            Err(RegistryError::DomainMismatch { .. })
        ));
        assert!(matches!(
            rig.actor.handle_knob_set(43, 9, Value::Cont(0.1)),
            Err(RegistryError::KnobNotFound { pid: 43, id: 9 })
        ));
        assert!(matches!(
            rig.actor.handle_knob_set(7, 1, Value::Cont(0.1)),
            Err(RegistryError::SessionNotFound(7))
        ));
    }

    #[tokio::test]
    async fn test_reap_expired_closes_session() {
        let mut rig = rig();
        rig.actor.lease = Duration::ZERO;
        register(&mut rig, 44);
        let _ = rig.events.try_recv();

        assert_eq!(rig.actor.handle_reap_expired(), 1);
        assert_eq!(rig.actor.session_count(), 0);
        assert!(!rig.dir_path.join("rtm.app.44.uds").exists());
        assert_eq!(
            rig.events.try_recv().unwrap(),
            AppEvent::AppDeregistered {
                pid: 44,
                reason: DeregisterReason::LeaseExpired
            }
        );
    }

    #[tokio::test]
    async fn test_ui_sees_lifecycle_replies_and_fast_updates() {
        use prime_core::AppMonitorType;
        use prime_protocol::MonitorRegistration;
        use std::time::Duration;
        use tokio::time::timeout;

        let mut rig = rig();
        let (_ui, mut ui_inbox) = Transport::with_inbox(
            &Binding::listen(Endpoint::Unix(rig.dir_path.join("ui.uds"))),
            PeerMode::Server,
        )
        .unwrap();
        register(&mut rig, 46);
        let reg = MonitorRegistration {
            proc_id: 46,
            mon_type: AppMonitorType::Performance,
            min: Value::Cont(0.0),
            max: Value::Cont(100.0),
            weight: 1.0,
        };
        rig.actor.handle_session_slow(46, SlowFrame::new(SlowMessage::MonitorRegister(reg)));
        let set = FastFrame::MonitorSet {
            id: 1,
            val: Value::Cont(42.0),
            proc_id: 46,
            ts: 7,
        };
        rig.actor.handle_inbound(
            Source::Session(46),
            Datagram {
                bytes: set.encode(),
                from: app_sender(&rig, 46),
            },
        );
        assert_eq!(rig.actor.sessions[&46].monitors[&1].val, Value::Cont(42.0));

        let wait = Duration::from_secs(2);
        let first = timeout(wait, ui_inbox.recv()).await.unwrap().unwrap();
        assert_eq!(
            SlowFrame::decode(&first.bytes).unwrap().message,
            SlowMessage::AppRegisterReturn { proc_id: 46 }
        );
        // The monitor registration reply is not shown to the UI
        let second = timeout(wait, ui_inbox.recv()).await.unwrap().unwrap();
        assert_eq!(Frame::decode(&second.bytes).unwrap(), Frame::Fast(set));
    }

    #[tokio::test]
    async fn test_frame_for_unknown_session_is_dropped() {
        let mut rig = rig();
        rig.actor.handle_inbound(
            Source::Session(5),
            Datagram {
                bytes: slow(SlowMessage::AppHeartbeat { proc_id: 5 }, 1),
                from: None,
            },
        );
        assert_eq!(rig.actor.session_count(), 0);
        assert!(rig.events.try_recv().is_err());
    }
}
