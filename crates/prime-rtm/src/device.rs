//! RTM side of the RTM <-> Device channel.
//!
//! The runtime manager is the Device's only client. Table and size queries
//! are slow-path round trips; monitor reads are fast-path round trips; knob
//! sets are one-way.
//!
//! Table requests are destructive reads: the Device returns only entries it
//! has not published before, so a second `knob_reg` without new entries on
//! the Device side yields an empty table.

use prime_api::{
    ApiError, ApiResult, Directory, InterfaceConfig, Mirror, PeerMode, PendingRequests, Reply,
    Transport,
};
use prime_core::{now_micros, DeviceArchitecture, DeviceKnob, DeviceMonitor, Scalar, ScalarKind};
use prime_protocol::{DeviceEntryRef, FastFrame, Frame, SlowFrame, SlowMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The runtime manager's connection to its Device.
pub struct RtmDeviceInterface {
    config: InterfaceConfig,
    transport: Transport,
    logger: Mirror,
    pending: PendingRequests<Reply>,
    cancel: CancellationToken,
}

impl RtmDeviceInterface {
    pub fn new(config: &InterfaceConfig) -> ApiResult<Self> {
        let directory = Directory::new(config);
        let pending = PendingRequests::new();
        let handler_pending = pending.clone();
        let transport = Transport::with_handler(&directory.rtm_dev()?, PeerMode::Client, move |datagram| {
            handler_pending.deliver(datagram);
        })?;
        info!(peer = ?transport.peer(), "Device client ready");
        Ok(Self {
            config: config.clone(),
            transport,
            logger: Mirror::open(directory.rtm_dev_logger(), "logger"),
            pending,
            cancel: CancellationToken::new(),
        })
    }

    async fn request(&self, message: SlowMessage) -> ApiResult<SlowMessage> {
        let (req, waiter) = self.pending.register();
        let bytes = SlowFrame::with_req(message, req).encode()?;
        self.transport.send(&bytes);
        self.logger.send_bytes(&bytes);
        let reply = waiter
            .wait(self.config.request_timeout(), &self.cancel)
            .await?;
        match reply.frame {
            Frame::Slow(frame) => Ok(frame.message),
            other => Err(ApiError::unexpected("slow-path device reply", &other)),
        }
    }

    fn send_fast(&self, frame: &FastFrame) {
        let bytes = frame.encode();
        self.transport.send(&bytes);
        self.logger.send_bytes(&bytes);
    }

    fn send_slow(&self, message: SlowMessage) -> ApiResult<()> {
        let bytes = SlowFrame::new(message).encode()?;
        self.transport.send(&bytes);
        self.logger.send_bytes(&bytes);
        Ok(())
    }

    // ========================================================================
    // Sizes and Tables
    // ========================================================================

    /// Number of knobs of domain `V` the Device holds.
    pub async fn knob_size<V: Scalar>(&self) -> ApiResult<u32> {
        match self.request(SlowMessage::DeviceKnobSize(V::KIND)).await? {
            SlowMessage::DeviceKnobSizeReturn { size, .. } => Ok(size),
            other => Err(unexpected("PRIME_API_DEV_RETURN_KNOB_*_SIZE", &other)),
        }
    }

    /// Number of monitors of domain `V` the Device holds.
    pub async fn mon_size<V: Scalar>(&self) -> ApiResult<u32> {
        match self.request(SlowMessage::DeviceMonitorSize(V::KIND)).await? {
            SlowMessage::DeviceMonitorSizeReturn { size, .. } => Ok(size),
            other => Err(unexpected("PRIME_API_DEV_RETURN_MON_*_SIZE", &other)),
        }
    }

    /// Knobs of domain `V` not fetched before.
    pub async fn knob_reg<V: Scalar>(&self) -> ApiResult<Vec<DeviceKnob<V>>> {
        match self.request(SlowMessage::DeviceKnobRegister(V::KIND)).await? {
            SlowMessage::DeviceKnobRegisterReturn { knobs, .. } => {
                debug!(kind = %V::KIND, count = knobs.len(), "Device knobs fetched");
                knobs
                    .iter()
                    .map(|k| k.typed::<V>().ok_or_else(|| wrong_domain::<V>(k.kind())))
                    .collect()
            }
            other => Err(unexpected("PRIME_API_DEV_RETURN_KNOB_*_REG", &other)),
        }
    }

    /// Monitors of domain `V` not fetched before, freshly read.
    pub async fn mon_reg<V: Scalar>(&self) -> ApiResult<Vec<DeviceMonitor<V>>> {
        match self.request(SlowMessage::DeviceMonitorRegister(V::KIND)).await? {
            SlowMessage::DeviceMonitorRegisterReturn { mons, .. } => {
                debug!(kind = %V::KIND, count = mons.len(), "Device monitors fetched");
                mons.iter()
                    .map(|m| m.typed::<V>().ok_or_else(|| wrong_domain::<V>(m.kind())))
                    .collect()
            }
            other => Err(unexpected("PRIME_API_DEV_RETURN_MON_*_REG", &other)),
        }
    }

    /// Tells the Device to drop `knobs`. One-way.
    pub fn knob_dereg<V: Scalar>(&self, knobs: &[DeviceKnob<V>]) -> ApiResult<()> {
        self.send_slow(SlowMessage::DeviceKnobDeregister {
            kind: V::KIND,
            knobs: knobs
                .iter()
                .map(|k| DeviceEntryRef {
                    id: k.id,
                    entry_type: k.knob_type,
                })
                .collect(),
        })
    }

    /// Tells the Device to drop `mons`. One-way.
    pub fn mon_dereg<V: Scalar>(&self, mons: &[DeviceMonitor<V>]) -> ApiResult<()> {
        self.send_slow(SlowMessage::DeviceMonitorDeregister {
            kind: V::KIND,
            mons: mons
                .iter()
                .map(|m| DeviceEntryRef {
                    id: m.id,
                    entry_type: m.mon_type,
                })
                .collect(),
        })
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Sets a device knob. One-way; never clamped.
    pub fn knob_set<V: Scalar>(&self, knob: &mut DeviceKnob<V>, val: V) {
        knob.val = val;
        self.send_fast(&FastFrame::DeviceKnobSet {
            id: knob.id,
            val: val.into_value(),
            ts: now_micros(),
        });
    }

    /// Reads a monitor, refreshing its value and bounds in place.
    pub async fn mon_get<V: Scalar>(&self, mon: &mut DeviceMonitor<V>) -> ApiResult<V> {
        let (req, waiter) = self.pending.register();
        self.send_fast(&FastFrame::DeviceMonitorGet {
            kind: V::KIND,
            id: mon.id,
            req,
            ts: now_micros(),
        });
        let reply = waiter
            .wait(self.config.request_timeout(), &self.cancel)
            .await?;
        match reply.frame {
            Frame::Fast(FastFrame::DeviceMonitorReturn { reading, .. }) => {
                let reading = reading
                    .typed::<V>()
                    .ok_or_else(|| wrong_domain::<V>(reading.val.kind()))?;
                mon.apply_reading(reading);
                Ok(reading.val)
            }
            other => Err(ApiError::unexpected("device monitor return", &other)),
        }
    }

    // ========================================================================
    // Architecture
    // ========================================================================

    /// Asks the Device where its architecture document lives and loads it.
    pub async fn dev_arch_get(&self) -> ApiResult<DeviceArchitecture> {
        match self.request(SlowMessage::ArchGet).await? {
            SlowMessage::ArchGetReturn { path } => {
                info!(%path, "Loading device architecture");
                Ok(DeviceArchitecture::load(&path)?)
            }
            other => Err(unexpected("PRIME_API_DEV_RETURN_ARCH_GET", &other)),
        }
    }

    /// Ends every in-flight call with `Cancelled`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.pending.cancel_all();
        self.transport.close();
    }
}

impl Drop for RtmDeviceInterface {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn unexpected(expected: &'static str, found: &SlowMessage) -> ApiError {
    ApiError::UnexpectedReply {
        expected,
        found: found.message_type().to_string(),
    }
}

fn wrong_domain<V: Scalar>(found: ScalarKind) -> ApiError {
    ApiError::UnexpectedReply {
        expected: match V::KIND {
            ScalarKind::Discrete => "discrete entries",
            ScalarKind::Continuous => "continuous entries",
        },
        found: format!("{found} entry"),
    }
}
