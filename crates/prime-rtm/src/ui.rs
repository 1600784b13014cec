//! The runtime manager's UI side channel.

use prime_api::{ApiResult, Directory, InterfaceConfig, Mirror, UiChannel};
use prime_protocol::SlowMessage;
use tokio::sync::mpsc;
use tracing::info;

/// Commands a UI can send to the runtime manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtmUiCommand {
    Stop,
    /// Relative importance of one App
    AppWeight { proc_id: u32, weight: f32 },
}

impl RtmUiCommand {
    fn from_message(message: SlowMessage) -> Option<Self> {
        match message {
            SlowMessage::UiRtmStop => Some(Self::Stop),
            SlowMessage::UiAppWeight { proc_id, weight } => Some(Self::AppWeight { proc_id, weight }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RtmUiInterface {
    channel: UiChannel,
}

impl RtmUiInterface {
    pub fn new(config: &InterfaceConfig) -> ApiResult<(Self, mpsc::Receiver<RtmUiCommand>)> {
        let directory = Directory::new(config);
        let logger = Mirror::open(directory.rtm_ui_logger(), "logger");
        let (channel, commands) =
            UiChannel::open(&directory.rtm_ui()?, logger, RtmUiCommand::from_message)?;
        info!("RTM UI interface ready");
        Ok((Self { channel }, commands))
    }

    pub fn return_rtm_start(&self) {
        self.channel.send(SlowMessage::UiRtmStarted);
    }

    pub fn return_rtm_stop(&self) {
        self.channel.send(SlowMessage::UiRtmStopped);
    }

    pub fn rtm_error(&self, msg: impl Into<String>) {
        self.channel.send(SlowMessage::UiRtmError { msg: msg.into() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_api::{Binding, Endpoint, PeerMode, Transport};
    use prime_protocol::SlowFrame;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_stop_and_weight_commands() {
        let dir = tempfile::tempdir().unwrap();
        let config = InterfaceConfig {
            logger_enabled: false,
            ..InterfaceConfig::with_socket_dir(dir.path())
        };
        let (ui, mut commands) = RtmUiInterface::new(&config).unwrap();
        let (ui_side, mut status) = Transport::with_inbox(
            &Binding::new(
                Endpoint::Unix(dir.path().join("ui.uds")),
                Endpoint::Unix(dir.path().join("rtm.ui.uds")),
            ),
            PeerMode::Client,
        )
        .unwrap();

        for message in [
            SlowMessage::UiAppWeight {
                proc_id: 8,
                weight: 2.5,
            },
            SlowMessage::UiRtmStop,
        ] {
            ui_side.send(&SlowFrame::new(message).encode().unwrap());
        }

        let first = timeout(Duration::from_secs(2), commands.recv()).await.unwrap();
        assert_eq!(
            first,
            Some(RtmUiCommand::AppWeight {
                proc_id: 8,
                weight: 2.5
            })
        );
        let second = timeout(Duration::from_secs(2), commands.recv()).await.unwrap();
        assert_eq!(second, Some(RtmUiCommand::Stop));

        ui.return_rtm_stop();
        let datagram = timeout(Duration::from_secs(2), status.recv()).await.unwrap().unwrap();
        assert_eq!(
            SlowFrame::decode(&datagram.bytes).unwrap().message,
            SlowMessage::UiRtmStopped
        );
    }
}
