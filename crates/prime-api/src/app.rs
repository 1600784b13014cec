//! App side of the App <-> RTM channel.
//!
//! An App registers itself, then its knobs and monitors, with the runtime
//! manager. Registration calls block until the RTM answers; bound, weight
//! and value updates are one-way.
//!
//! ```text
//!  AppInterface                         RTM
//!  ────────────                         ───
//!  register ── APP_REG{req} ──────────▶ rtm.app (rendezvous)
//!           ◀─ RETURN_APP_REG{req} ──── rtm.app.<pid> (fan-out)
//!  (peer := sender of the ack, heartbeat starts)
//!  knob_reg ── KNOB_*_REG{req} ───────▶ rtm.app.<pid>
//!           ◀─ RETURN_KNOB_*_REG{req} ─
//!  mon_set  ── fast 'set' ────────────▶ (one-way, mirrored to logger)
//! ```
//!
//! Every blocking call carries its own request id, so calls may overlap
//! freely, and each gives up after `request_timeout` or when the interface
//! shuts down.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Malformed inbound frames are logged and dropped

use std::sync::{Mutex, MutexGuard, PoisonError};

use prime_core::{
    now_micros, AppKnob, AppKnobType, AppMonitor, AppMonitorType, Cont, Disc, Scalar,
};
use prime_protocol::{
    Bound, FastFrame, Frame, KnobRegistration, MonitorRegistration, RequestId, SlowFrame,
    SlowMessage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directory::{Directory, InterfaceConfig};
use crate::error::{ApiError, ApiResult};
use crate::mirror::Mirror;
use crate::transport::{Binding, Endpoint, PeerMode, Transport};
use crate::waiter::{PendingRequests, Reply};

/// An App's connection to the runtime manager.
pub struct AppInterface {
    /// Process id this App registers under
    pid: u32,

    config: InterfaceConfig,

    /// Rendezvous endpoint used while unregistered
    rendezvous: Option<Endpoint>,

    /// Fallback fan-out peer when the ack has no sender address
    fanout: Endpoint,

    transport: Transport,

    /// Mirror of outbound traffic
    logger: Mirror,

    /// Mirror of registration and monitor changes for the UI
    ui: Mirror,

    pending: PendingRequests<Reply>,

    /// Cancels every wait and the heartbeat on shutdown
    cancel: CancellationToken,

    /// Heartbeat token while registered
    session: Mutex<Option<CancellationToken>>,
}

impl AppInterface {
    /// Connects as the current process.
    pub fn new(config: &InterfaceConfig) -> ApiResult<Self> {
        Self::with_pid(config, std::process::id())
    }

    /// Connects under an explicit process id.
    pub fn with_pid(config: &InterfaceConfig, pid: u32) -> ApiResult<Self> {
        let directory = Directory::new(config);
        let binding = directory.app(pid)?;
        let pending = PendingRequests::new();

        let handler_pending = pending.clone();
        let transport = Transport::with_handler(&binding, PeerMode::Client, move |datagram| {
            handler_pending.deliver(datagram);
        })?;

        // The UI interface of this App owns app.ui.<pid>; mirror anonymously
        let ui = match directory.app_ui(pid) {
            Ok(b) => Mirror::open(Ok(b.remote.map(Binding::connect)), "ui"),
            Err(e) => Mirror::open(Err(e), "ui"),
        };

        info!(pid, "App interface ready");
        Ok(Self {
            pid,
            config: config.clone(),
            rendezvous: binding.remote,
            fanout: directory.app_fanout(pid),
            transport,
            logger: Mirror::open(directory.app_logger(pid), "logger"),
            ui,
            pending,
            cancel: CancellationToken::new(),
            session: Mutex::new(None),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_registered(&self) -> bool {
        self.session().is_some()
    }

    /// Where requests currently go.
    pub fn peer(&self) -> Option<Endpoint> {
        self.transport.peer()
    }

    fn session(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_registered(&self) -> ApiResult<()> {
        if self.is_registered() {
            Ok(())
        } else {
            Err(ApiError::NotRegistered)
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    async fn request(&self, message: SlowMessage, to_ui: bool) -> ApiResult<Reply> {
        let (req, waiter) = self.pending.register();
        let frame = SlowFrame::with_req(message, req);
        let bytes = frame.encode()?;
        self.transport.send(&bytes);
        self.logger.send_bytes(&bytes);
        if to_ui {
            self.ui.send_bytes(&bytes);
        }
        debug!(pid = self.pid, req = %req, msg_type = %frame.message.message_type(), "Request sent");
        Ok(waiter
            .wait(self.config.request_timeout(), &self.cancel)
            .await?)
    }

    async fn fast_request(&self, build: impl FnOnce(RequestId) -> FastFrame) -> ApiResult<Reply> {
        let (req, waiter) = self.pending.register();
        let frame = build(req);
        self.send_fast(&frame, false);
        Ok(waiter
            .wait(self.config.request_timeout(), &self.cancel)
            .await?)
    }

    fn send_slow(&self, message: SlowMessage, to_ui: bool) -> ApiResult<()> {
        let bytes = SlowFrame::new(message).encode()?;
        self.transport.send(&bytes);
        self.logger.send_bytes(&bytes);
        if to_ui {
            self.ui.send_bytes(&bytes);
        }
        Ok(())
    }

    fn send_fast(&self, frame: &FastFrame, to_ui: bool) {
        let bytes = frame.encode();
        self.transport.send(&bytes);
        self.logger.send_bytes(&bytes);
        if to_ui {
            self.ui.send_bytes(&bytes);
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers this App and switches to its dedicated channel.
    pub async fn register(&self, ur_id: u64) -> ApiResult<()> {
        let reply = self
            .request(
                SlowMessage::AppRegister {
                    proc_id: self.pid,
                    ur_id,
                },
                true,
            )
            .await?;
        match &reply.frame {
            Frame::Slow(SlowFrame {
                message: SlowMessage::AppRegisterReturn { .. },
                ..
            }) => {}
            other => return Err(ApiError::unexpected("PRIME_API_APP_RETURN_APP_REG", other)),
        }

        let fanout = reply.from.unwrap_or_else(|| self.fanout.clone());
        info!(pid = self.pid, peer = %fanout, "Registered with runtime manager");
        self.transport.set_peer(fanout);

        let heartbeat = self.spawn_heartbeat();
        if let Some(previous) = self.session().replace(heartbeat) {
            previous.cancel();
        }
        Ok(())
    }

    /// Deregisters this App and returns to the rendezvous endpoint.
    pub async fn deregister(&self) -> ApiResult<()> {
        self.ensure_registered()?;
        let reply = self
            .request(SlowMessage::AppDeregister { proc_id: self.pid }, true)
            .await?;
        match &reply.frame {
            Frame::Slow(SlowFrame {
                message: SlowMessage::AppDeregisterReturn { .. },
                ..
            }) => {}
            other => return Err(ApiError::unexpected("PRIME_API_APP_RETURN_APP_DEREG", other)),
        }

        if let Some(heartbeat) = self.session().take() {
            heartbeat.cancel();
        }
        if let Some(rendezvous) = &self.rendezvous {
            self.transport.set_peer(rendezvous.clone());
        }
        info!(pid = self.pid, "Deregistered from runtime manager");
        Ok(())
    }

    fn spawn_heartbeat(&self) -> CancellationToken {
        let token = self.cancel.child_token();
        let stop = token.clone();
        let transport = self.transport.clone();
        let pid = self.pid;
        let period = self.config.heartbeat_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        match SlowFrame::new(SlowMessage::AppHeartbeat { proc_id: pid }).encode() {
                            Ok(bytes) => transport.send(&bytes),
                            Err(e) => warn!(pid, error = %e, "Failed to encode heartbeat"),
                        }
                    }
                }
            }
            debug!(pid, "Heartbeat stopped");
        });
        token
    }

    // ========================================================================
    // Knobs
    // ========================================================================

    /// Registers a knob; the RTM assigns its id.
    pub async fn knob_reg<V: Scalar>(
        &self,
        knob_type: AppKnobType,
        min: V,
        max: V,
        val: V,
    ) -> ApiResult<AppKnob<V>> {
        self.ensure_registered()?;
        let message = SlowMessage::KnobRegister(KnobRegistration {
            proc_id: self.pid,
            knob_type,
            min: min.into_value(),
            max: max.into_value(),
            val: val.into_value(),
        });
        let reply = self.request(message, false).await?;
        match reply.frame {
            Frame::Slow(SlowFrame {
                message: SlowMessage::KnobRegisterReturn(knob),
                ..
            }) => knob.typed::<V>().ok_or_else(|| ApiError::UnexpectedReply {
                expected: "PRIME_API_APP_RETURN_KNOB_*_REG",
                found: format!("{} knob", knob.kind()),
            }),
            other => Err(ApiError::unexpected("PRIME_API_APP_RETURN_KNOB_*_REG", &other)),
        }
    }

    pub async fn knob_disc_reg(
        &self,
        knob_type: AppKnobType,
        min: Disc,
        max: Disc,
        val: Disc,
    ) -> ApiResult<AppKnob<Disc>> {
        self.knob_reg(knob_type, min, max, val).await
    }

    pub async fn knob_cont_reg(
        &self,
        knob_type: AppKnobType,
        min: Cont,
        max: Cont,
        val: Cont,
    ) -> ApiResult<AppKnob<Cont>> {
        self.knob_reg(knob_type, min, max, val).await
    }

    /// Reads the knob's current value from the RTM into `knob.val`.
    pub async fn knob_get<V: Scalar>(&self, knob: &mut AppKnob<V>) -> ApiResult<V> {
        self.ensure_registered()?;
        let (id, proc_id) = (knob.id, self.pid);
        let reply = self
            .fast_request(|req| FastFrame::KnobGet {
                kind: V::KIND,
                id,
                proc_id,
                req,
                ts: now_micros(),
            })
            .await?;
        match reply.frame {
            Frame::Fast(FastFrame::KnobGetReturn { val, .. }) => {
                let val = V::from_value(val).ok_or_else(|| ApiError::UnexpectedReply {
                    expected: "knob get return",
                    found: format!("{} value", val.kind()),
                })?;
                knob.val = val;
                Ok(val)
            }
            other => Err(ApiError::unexpected("knob get return", &other)),
        }
    }

    pub fn knob_min<V: Scalar>(&self, knob: &mut AppKnob<V>, min: V) -> ApiResult<()> {
        self.knob_bound(knob, Bound::Min, min)
    }

    pub fn knob_max<V: Scalar>(&self, knob: &mut AppKnob<V>, max: V) -> ApiResult<()> {
        self.knob_bound(knob, Bound::Max, max)
    }

    fn knob_bound<V: Scalar>(&self, knob: &mut AppKnob<V>, bound: Bound, val: V) -> ApiResult<()> {
        self.ensure_registered()?;
        match bound {
            Bound::Min => knob.min = val,
            Bound::Max => knob.max = val,
        }
        self.send_fast(
            &FastFrame::KnobBound {
                bound,
                id: knob.id,
                val: val.into_value(),
                proc_id: self.pid,
                ts: now_micros(),
            },
            false,
        );
        Ok(())
    }

    /// Removes the knob at the RTM. One-way.
    pub fn knob_dereg<V: Scalar>(&self, knob: &AppKnob<V>) -> ApiResult<()> {
        self.ensure_registered()?;
        self.send_slow(SlowMessage::KnobDeregister(knob.erased()), false)
    }

    // ========================================================================
    // Monitors
    // ========================================================================

    /// Registers a monitor; it starts at zero and the RTM assigns its id.
    pub async fn mon_reg<V: Scalar>(
        &self,
        mon_type: AppMonitorType,
        min: V,
        max: V,
        weight: f32,
    ) -> ApiResult<AppMonitor<V>> {
        self.ensure_registered()?;
        let message = SlowMessage::MonitorRegister(MonitorRegistration {
            proc_id: self.pid,
            mon_type,
            min: min.into_value(),
            max: max.into_value(),
            weight,
        });
        let reply = self.request(message, true).await?;
        match reply.frame {
            Frame::Slow(SlowFrame {
                message: SlowMessage::MonitorRegisterReturn(mon),
                ..
            }) => mon.typed::<V>().ok_or_else(|| ApiError::UnexpectedReply {
                expected: "PRIME_API_APP_RETURN_MON_*_REG",
                found: format!("{} monitor", mon.kind()),
            }),
            other => Err(ApiError::unexpected("PRIME_API_APP_RETURN_MON_*_REG", &other)),
        }
    }

    pub async fn mon_disc_reg(
        &self,
        mon_type: AppMonitorType,
        min: Disc,
        max: Disc,
        weight: f32,
    ) -> ApiResult<AppMonitor<Disc>> {
        self.mon_reg(mon_type, min, max, weight).await
    }

    pub async fn mon_cont_reg(
        &self,
        mon_type: AppMonitorType,
        min: Cont,
        max: Cont,
        weight: f32,
    ) -> ApiResult<AppMonitor<Cont>> {
        self.mon_reg(mon_type, min, max, weight).await
    }

    /// Publishes a new monitor value. One-way; never clamped.
    pub fn mon_set<V: Scalar>(&self, mon: &mut AppMonitor<V>, val: V) -> ApiResult<()> {
        self.ensure_registered()?;
        mon.val = val;
        self.send_fast(
            &FastFrame::MonitorSet {
                id: mon.id,
                val: val.into_value(),
                proc_id: self.pid,
                ts: now_micros(),
            },
            false,
        );
        Ok(())
    }

    pub fn mon_min<V: Scalar>(&self, mon: &mut AppMonitor<V>, min: V) -> ApiResult<()> {
        self.mon_bound(mon, Bound::Min, min)
    }

    pub fn mon_max<V: Scalar>(&self, mon: &mut AppMonitor<V>, max: V) -> ApiResult<()> {
        self.mon_bound(mon, Bound::Max, max)
    }

    fn mon_bound<V: Scalar>(&self, mon: &mut AppMonitor<V>, bound: Bound, val: V) -> ApiResult<()> {
        self.ensure_registered()?;
        match bound {
            Bound::Min => mon.min = val,
            Bound::Max => mon.max = val,
        }
        self.send_fast(
            &FastFrame::MonitorBound {
                bound,
                id: mon.id,
                val: val.into_value(),
                proc_id: self.pid,
                ts: now_micros(),
            },
            true,
        );
        Ok(())
    }

    pub fn mon_weight<V: Scalar>(&self, mon: &mut AppMonitor<V>, weight: f32) -> ApiResult<()> {
        self.ensure_registered()?;
        mon.weight = weight;
        self.send_fast(
            &FastFrame::MonitorWeight {
                kind: V::KIND,
                id: mon.id,
                weight,
                proc_id: self.pid,
                ts: now_micros(),
            },
            true,
        );
        Ok(())
    }

    /// Removes the monitor at the RTM. One-way.
    pub fn mon_dereg<V: Scalar>(&self, mon: &AppMonitor<V>) -> ApiResult<()> {
        self.ensure_registered()?;
        self.send_slow(SlowMessage::MonitorDeregister(mon.erased()), true)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Ends every in-flight call with `Cancelled` and stops the heartbeat.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.pending.cancel_all();
        self.session().take();
        self.transport.close();
        info!(pid = self.pid, "App interface shut down");
    }
}

impl Drop for AppInterface {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
