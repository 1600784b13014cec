//! UI side channels.
//!
//! A UI drives Apps, the Device and the RTM with slow-path `PRIME_UI_*`
//! documents and receives status reports back. Each role's UI interface
//! turns inbound documents into a typed command stream and offers one-way
//! status sends. Everything in both directions is mirrored to the logger.

use prime_core::{ScalarKind, Value};
use prime_protocol::{Bound, Frame, SlowFrame, SlowMessage};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::directory::{Directory, InterfaceConfig};
use crate::error::ApiResult;
use crate::mirror::Mirror;
use crate::transport::{Binding, PeerMode, Transport, TransportError};

/// Capacity of a UI command stream.
pub const UI_COMMAND_CAPACITY: usize = 64;

// ============================================================================
// Channel
// ============================================================================

/// A bound UI endpoint with its logger mirror.
#[derive(Debug, Clone)]
pub struct UiChannel {
    transport: Transport,
    logger: Mirror,
}

impl UiChannel {
    /// Binds and forwards every inbound document `map` accepts.
    pub fn open<C, F>(
        binding: &Binding,
        logger: Mirror,
        map: F,
    ) -> Result<(Self, mpsc::Receiver<C>), TransportError>
    where
        C: Send + 'static,
        F: Fn(SlowMessage) -> Option<C> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(UI_COMMAND_CAPACITY);
        let inbound_logger = logger.clone();
        let transport = Transport::with_handler(binding, PeerMode::Server, move |datagram| {
            let frame = match Frame::decode(&datagram.bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed UI frame");
                    return;
                }
            };
            inbound_logger.frame(&frame);
            let Frame::Slow(SlowFrame { message, .. }) = frame else {
                debug!("Ignoring fast-path frame on UI channel");
                return;
            };
            let msg_type = message.message_type();
            match map(message) {
                Some(command) => match tx.try_send(command) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => warn!(%msg_type, "UI command queue full"),
                    Err(TrySendError::Closed(_)) => debug!(%msg_type, "UI command receiver gone"),
                },
                None => debug!(%msg_type, "Ignoring message on UI channel"),
            }
        })?;
        Ok((Self { transport, logger }, rx))
    }

    /// Sends a status document to the UI. One-way.
    pub fn send(&self, message: SlowMessage) {
        let frame = SlowFrame::new(message);
        match frame.encode() {
            Ok(bytes) => {
                self.transport.send(&bytes);
                self.logger.send_bytes(&bytes);
            }
            Err(e) => warn!(error = %e, "Failed to encode UI message"),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

// ============================================================================
// App UI
// ============================================================================

/// Commands a UI can send to an App.
#[derive(Debug, Clone, PartialEq)]
pub enum AppUiCommand {
    Register { proc_id: u32 },
    Deregister { proc_id: u32 },
    MonitorBound { kind: ScalarKind, bound: Bound, id: u32, val: Value },
    MonitorWeight { kind: ScalarKind, id: u32, weight: f32 },
    Stop { proc_id: u32 },
}

impl AppUiCommand {
    fn from_message(message: SlowMessage) -> Option<Self> {
        match message {
            SlowMessage::UiAppRegister { proc_id } => Some(Self::Register { proc_id }),
            SlowMessage::UiAppDeregister { proc_id } => Some(Self::Deregister { proc_id }),
            SlowMessage::UiMonitorBound { kind, bound, id, val } => {
                Some(Self::MonitorBound { kind, bound, id, val })
            }
            SlowMessage::UiMonitorWeight { kind, id, weight } => {
                Some(Self::MonitorWeight { kind, id, weight })
            }
            SlowMessage::UiAppStop { proc_id } => Some(Self::Stop { proc_id }),
            _ => None,
        }
    }
}

/// An App's UI side channel.
#[derive(Debug, Clone)]
pub struct AppUiInterface {
    pid: u32,
    channel: UiChannel,
}

impl AppUiInterface {
    pub fn new(config: &InterfaceConfig) -> ApiResult<(Self, mpsc::Receiver<AppUiCommand>)> {
        Self::with_pid(config, std::process::id())
    }

    pub fn with_pid(
        config: &InterfaceConfig,
        pid: u32,
    ) -> ApiResult<(Self, mpsc::Receiver<AppUiCommand>)> {
        let directory = Directory::new(config);
        let logger = Mirror::open(directory.app_ui_logger(pid), "logger");
        let (channel, commands) =
            UiChannel::open(&directory.app_ui(pid)?, logger, AppUiCommand::from_message)?;
        info!(pid, "App UI interface ready");
        Ok((Self { pid, channel }, commands))
    }

    pub fn return_app_start(&self) {
        self.channel.send(SlowMessage::UiAppStarted { proc_id: self.pid });
    }

    pub fn return_app_stop(&self) {
        self.channel.send(SlowMessage::UiAppStopped { proc_id: self.pid });
    }

    pub fn app_error(&self, msg: impl Into<String>) {
        self.channel.send(SlowMessage::UiAppError {
            proc_id: self.pid,
            msg: msg.into(),
        });
    }
}

// ============================================================================
// Device UI
// ============================================================================

/// Commands a UI can send to the Device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceUiCommand {
    Stop,
}

/// The Device's UI side channel.
#[derive(Debug, Clone)]
pub struct DeviceUiInterface {
    channel: UiChannel,
}

impl DeviceUiInterface {
    pub fn new(config: &InterfaceConfig) -> ApiResult<(Self, mpsc::Receiver<DeviceUiCommand>)> {
        let directory = Directory::new(config);
        let logger = Mirror::open(directory.dev_ui_logger(), "logger");
        let (channel, commands) = UiChannel::open(&directory.dev_ui()?, logger, |message| match message {
            SlowMessage::UiDeviceStop => Some(DeviceUiCommand::Stop),
            _ => None,
        })?;
        info!("Device UI interface ready");
        Ok((Self { channel }, commands))
    }

    pub fn return_dev_start(&self) {
        self.channel.send(SlowMessage::UiDeviceStarted);
    }

    pub fn return_dev_stop(&self) {
        self.channel.send(SlowMessage::UiDeviceStopped);
    }

    pub fn dev_error(&self, msg: impl Into<String>) {
        self.channel.send(SlowMessage::UiDeviceError { msg: msg.into() });
    }
}
