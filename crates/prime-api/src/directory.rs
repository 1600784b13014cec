//! Endpoint directory and interface configuration.
//!
//! Every role resolves its channels here, so two processes started with the
//! same [`InterfaceConfig`] agree on addresses without talking first. With no
//! overrides each channel is a pair of Unix socket files under `socket_dir`:
//!
//! ```text
//! App (pid)      app.rtm.<pid>        ──▶ rtm.app          rendezvous
//!                app.rtm.<pid>        ──▶ rtm.app.<pid>    after registration
//!                app.ui.<pid>         ──▶ ui
//! RTM            rtm.app              ──▶ app.rtm
//!                rtm.app.<pid>        ──▶ app.rtm.<pid>    fan-out
//!                rtm.dev              ──▶ dev.rtm
//!                rtm.ui, rtm.app.ui   ──▶ ui
//! Device         dev.rtm              ──▶ rtm.dev
//!                dev.ui               ──▶ ui
//! any            <role>.logger[.pid]  ──▶ logger
//! ```
//!
//! Overrides in a [`ChannelAddr`] are written from the client's point of view
//! (the App on the api channel, the RTM on the device channel). Server roles
//! swap `local` and `remote`, and bind `host:port` for UDP.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::{Binding, Endpoint, TransportError};

/// Default directory for socket files.
pub const DEFAULT_SOCKET_DIR: &str = "/tmp";

/// Port used when a logger host is given without one.
pub const DEFAULT_LOGGER_PORT: u16 = 9000;

const SOCKET_EXT: &str = "uds";

// ============================================================================
// Configuration
// ============================================================================

/// Address override for one logical channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelAddr {
    Unix { local: PathBuf, remote: PathBuf },
    Udp { host: String, port: u16 },
}

/// Shared address and timing configuration handed to every interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Directory holding default socket files
    pub socket_dir: PathBuf,
    /// Mirror protocol traffic to the logger
    pub logger_enabled: bool,
    /// Logger override
    pub logger: Option<ChannelAddr>,
    /// App <-> RTM override
    pub api: Option<ChannelAddr>,
    /// RTM <-> Device override
    pub device: Option<ChannelAddr>,
    /// UI override
    pub ui: Option<ChannelAddr>,
    /// How long a blocking call waits for its reply
    pub request_timeout_ms: u64,
    /// Session lease granted to an App at the RTM
    pub lease_secs: u64,
    /// How often a registered App renews its lease
    pub heartbeat_secs: u64,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            logger_enabled: true,
            logger: None,
            api: None,
            device: None,
            ui: None,
            request_timeout_ms: 5000,
            lease_secs: 30,
            heartbeat_secs: 10,
        }
    }
}

impl InterfaceConfig {
    /// Default configuration rooted at `dir`.
    pub fn with_socket_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: dir.into(),
            ..Self::default()
        }
    }

    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            source_name: "<inline>".to_string(),
            error: e.to_string(),
        })
    }

    /// Loads a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            source_name: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Applies the command-line logger flags.
    ///
    /// `off` wins over an address. A port without an address targets the
    /// local host.
    pub fn apply_logger_flags(&mut self, off: bool, address: Option<String>, port: Option<u16>) {
        if off {
            self.logger_enabled = false;
            return;
        }
        if address.is_some() || port.is_some() {
            self.logger = Some(ChannelAddr::Udp {
                host: address.unwrap_or_else(|| "127.0.0.1".to_string()),
                port: port.unwrap_or(DEFAULT_LOGGER_PORT),
            });
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Invalid config {source_name}: {error}")]
    Parse { source_name: String, error: String },
}

// ============================================================================
// Directory
// ============================================================================

/// Resolves the bindings of every role from one configuration.
#[derive(Debug, Clone)]
pub struct Directory {
    config: InterfaceConfig,
}

impl Directory {
    pub fn new(config: &InterfaceConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    /// Default socket file for a channel name.
    pub fn socket(&self, name: &str) -> Endpoint {
        Endpoint::Unix(self.config.socket_dir.join(format!("{name}.{SOCKET_EXT}")))
    }

    fn client(&self, addr: Option<&ChannelAddr>, local: &str, remote: &str) -> Result<Binding, TransportError> {
        match addr {
            None => Ok(Binding::new(self.socket(local), self.socket(remote))),
            Some(ChannelAddr::Unix { local, remote }) => Ok(Binding::new(
                Endpoint::Unix(local.clone()),
                Endpoint::Unix(remote.clone()),
            )),
            Some(ChannelAddr::Udp { host, port }) => {
                Ok(Binding::connect(Endpoint::Udp(resolve(host, *port)?)))
            }
        }
    }

    fn server(&self, addr: Option<&ChannelAddr>, local: &str, remote: &str) -> Result<Binding, TransportError> {
        match addr {
            None => Ok(Binding::new(self.socket(local), self.socket(remote))),
            Some(ChannelAddr::Unix { local, remote }) => Ok(Binding::new(
                Endpoint::Unix(remote.clone()),
                Endpoint::Unix(local.clone()),
            )),
            Some(ChannelAddr::Udp { host, port }) => {
                Ok(Binding::listen(Endpoint::Udp(resolve(host, *port)?)))
            }
        }
    }

    /// Sender side of a logger channel; `None` when logging is off.
    ///
    /// Senders always bind their own default file so several roles can share
    /// one logger override.
    fn logger(&self, local: &str) -> Result<Option<Binding>, TransportError> {
        if !self.config.logger_enabled {
            return Ok(None);
        }
        let binding = match &self.config.logger {
            None => Binding::new(self.socket(local), self.socket("logger")),
            Some(ChannelAddr::Unix { remote, .. }) => {
                Binding::new(self.socket(local), Endpoint::Unix(remote.clone()))
            }
            Some(ChannelAddr::Udp { host, port }) => {
                Binding::connect(Endpoint::Udp(resolve(host, *port)?))
            }
        };
        Ok(Some(binding))
    }

    // ========================================================================
    // App
    // ========================================================================

    /// App to RTM rendezvous.
    pub fn app(&self, pid: u32) -> Result<Binding, TransportError> {
        self.client(self.config.api.as_ref(), &format!("app.rtm.{pid}"), "rtm.app")
    }

    /// Default fan-out peer of a registered App.
    pub fn app_fanout(&self, pid: u32) -> Endpoint {
        self.socket(&format!("rtm.app.{pid}"))
    }

    pub fn app_ui(&self, pid: u32) -> Result<Binding, TransportError> {
        self.client(self.config.ui.as_ref(), &format!("app.ui.{pid}"), "ui")
    }

    pub fn app_logger(&self, pid: u32) -> Result<Option<Binding>, TransportError> {
        self.logger(&format!("app.rtm.logger.{pid}"))
    }

    pub fn app_ui_logger(&self, pid: u32) -> Result<Option<Binding>, TransportError> {
        self.logger(&format!("app.ui.logger.{pid}"))
    }

    // ========================================================================
    // RTM
    // ========================================================================

    /// RTM rendezvous for App registration.
    pub fn rtm_app(&self) -> Result<Binding, TransportError> {
        self.server(self.config.api.as_ref(), "rtm.app", "app.rtm")
    }

    pub fn rtm_app_logger(&self) -> Result<Option<Binding>, TransportError> {
        self.logger("rtm.app.logger")
    }

    pub fn rtm_app_ui(&self) -> Result<Binding, TransportError> {
        self.client(self.config.ui.as_ref(), "rtm.app.ui", "ui")
    }

    /// Dedicated channel for one registered App.
    ///
    /// `sender` is where the registration came from. UDP Apps get an
    /// ephemeral port on the unspecified address.
    pub fn rtm_fanout(&self, pid: u32, sender: Option<&Endpoint>) -> Binding {
        let local = self.socket(&format!("rtm.app.{pid}"));
        match sender {
            Some(Endpoint::Udp(addr)) => {
                let any: SocketAddr = if addr.is_ipv4() {
                    SocketAddr::from(([0, 0, 0, 0], 0))
                } else {
                    SocketAddr::from(([0u16; 8], 0))
                };
                Binding::new(Endpoint::Udp(any), Endpoint::Udp(*addr))
            }
            Some(unix @ Endpoint::Unix(_)) => Binding::new(local, unix.clone()),
            None => Binding::new(local, self.socket(&format!("app.rtm.{pid}"))),
        }
    }

    /// Where a genuine registration from `pid` must come from, for Unix
    /// channels. `None` when the channel cannot tell.
    pub fn expected_app_sender(&self, pid: u32) -> Option<Endpoint> {
        self.app(pid).ok().and_then(|b| b.local).filter(Endpoint::is_unix)
    }

    /// RTM to Device.
    pub fn rtm_dev(&self) -> Result<Binding, TransportError> {
        self.client(self.config.device.as_ref(), "rtm.dev", "dev.rtm")
    }

    pub fn rtm_dev_logger(&self) -> Result<Option<Binding>, TransportError> {
        self.logger("rtm.dev.logger")
    }

    pub fn rtm_ui(&self) -> Result<Binding, TransportError> {
        self.client(self.config.ui.as_ref(), "rtm.ui", "ui")
    }

    pub fn rtm_ui_logger(&self) -> Result<Option<Binding>, TransportError> {
        self.logger("rtm.ui.logger")
    }

    // ========================================================================
    // Device
    // ========================================================================

    pub fn dev(&self) -> Result<Binding, TransportError> {
        self.server(self.config.device.as_ref(), "dev.rtm", "rtm.dev")
    }

    pub fn dev_logger(&self) -> Result<Option<Binding>, TransportError> {
        self.logger("dev.rtm.logger")
    }

    pub fn dev_ui(&self) -> Result<Binding, TransportError> {
        self.client(self.config.ui.as_ref(), "dev.ui", "ui")
    }

    pub fn dev_ui_logger(&self) -> Result<Option<Binding>, TransportError> {
        self.logger("dev.ui.logger")
    }

    // ========================================================================
    // Logger
    // ========================================================================

    /// Receiving side of the logger channel.
    pub fn logger_sink(&self) -> Result<Binding, TransportError> {
        match &self.config.logger {
            None => Ok(Binding::listen(self.socket("logger"))),
            Some(ChannelAddr::Unix { remote, .. }) => Ok(Binding::listen(Endpoint::Unix(remote.clone()))),
            Some(ChannelAddr::Udp { host, port }) => {
                Ok(Binding::listen(Endpoint::Udp(resolve(host, *port)?)))
            }
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let resolve_err = |error: String| TransportError::Resolve {
        host: format!("{host}:{port}"),
        error,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|e| resolve_err(e.to_string()))?
        .next()
        .ok_or_else(|| resolve_err("no addresses".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir() -> Directory {
        Directory::new(&InterfaceConfig::default())
    }

    fn unix(path: &str) -> Option<Endpoint> {
        Some(Endpoint::Unix(PathBuf::from(path)))
    }

    #[test]
    fn test_default_app_channels() {
        let d = dir();
        let app = d.app(42).unwrap();
        assert_eq!(app.local, unix("/tmp/app.rtm.42.uds"));
        assert_eq!(app.remote, unix("/tmp/rtm.app.uds"));
        assert_eq!(Some(d.app_fanout(42)), unix("/tmp/rtm.app.42.uds"));

        let ui = d.app_ui(42).unwrap();
        assert_eq!(ui.local, unix("/tmp/app.ui.42.uds"));
        assert_eq!(ui.remote, unix("/tmp/ui.uds"));

        let logger = d.app_logger(42).unwrap().unwrap();
        assert_eq!(logger.local, unix("/tmp/app.rtm.logger.42.uds"));
        assert_eq!(logger.remote, unix("/tmp/logger.uds"));
    }

    #[test]
    fn test_default_rtm_and_device_channels() {
        let d = dir();
        let rtm = d.rtm_app().unwrap();
        assert_eq!(rtm.local, unix("/tmp/rtm.app.uds"));
        assert_eq!(rtm.remote, unix("/tmp/app.rtm.uds"));

        let fanout = d.rtm_fanout(7, None);
        assert_eq!(fanout.local, unix("/tmp/rtm.app.7.uds"));
        assert_eq!(fanout.remote, unix("/tmp/app.rtm.7.uds"));

        let rtm_dev = d.rtm_dev().unwrap();
        let dev = d.dev().unwrap();
        assert_eq!(rtm_dev.local, dev.remote);
        assert_eq!(rtm_dev.remote, dev.local);
        assert_eq!(dev.local, unix("/tmp/dev.rtm.uds"));

        assert_eq!(d.rtm_ui().unwrap().local, unix("/tmp/rtm.ui.uds"));
        assert_eq!(d.dev_ui().unwrap().local, unix("/tmp/dev.ui.uds"));
        assert_eq!(d.logger_sink().unwrap().local, unix("/tmp/logger.uds"));
    }

    #[test]
    fn test_expected_sender_matches_app_binding() {
        let d = dir();
        assert_eq!(d.expected_app_sender(9), unix("/tmp/app.rtm.9.uds"));
    }

    #[test]
    fn test_unix_override_swaps_for_server_roles() {
        let config = InterfaceConfig {
            api: Some(ChannelAddr::Unix {
                local: PathBuf::from("/run/a.uds"),
                remote: PathBuf::from("/run/r.uds"),
            }),
            ..InterfaceConfig::default()
        };
        let d = Directory::new(&config);
        assert_eq!(d.app(1).unwrap().local, unix("/run/a.uds"));
        assert_eq!(d.rtm_app().unwrap().local, unix("/run/r.uds"));
        assert_eq!(d.rtm_app().unwrap().remote, unix("/run/a.uds"));
    }

    #[test]
    fn test_udp_override() {
        let config = InterfaceConfig {
            api: Some(ChannelAddr::Udp {
                host: "127.0.0.1".to_string(),
                port: 7000,
            }),
            ..InterfaceConfig::default()
        };
        let d = Directory::new(&config);
        let addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();

        let server = d.rtm_app().unwrap();
        assert_eq!(server.local, Some(Endpoint::Udp(addr)));
        assert_eq!(server.remote, None);

        let client = d.app(3).unwrap();
        assert_eq!(client.local, None);
        assert_eq!(client.remote, Some(Endpoint::Udp(addr)));
        assert_eq!(d.expected_app_sender(3), None);

        let sender: SocketAddr = "127.0.0.1:45000".parse().unwrap();
        let fanout = d.rtm_fanout(3, Some(&Endpoint::Udp(sender)));
        assert_eq!(fanout.remote, Some(Endpoint::Udp(sender)));
    }

    #[test]
    fn test_logger_disabled() {
        let mut config = InterfaceConfig::default();
        config.apply_logger_flags(true, Some("10.0.0.1".to_string()), Some(1234));
        assert!(!config.logger_enabled);
        assert!(Directory::new(&config).app_logger(1).unwrap().is_none());
    }

    #[test]
    fn test_logger_flags_redirect_to_udp() {
        let mut config = InterfaceConfig::default();
        config.apply_logger_flags(false, Some("127.0.0.1".to_string()), None);
        assert_eq!(
            config.logger,
            Some(ChannelAddr::Udp {
                host: "127.0.0.1".to_string(),
                port: DEFAULT_LOGGER_PORT
            })
        );
        let binding = Directory::new(&config).rtm_app_logger().unwrap().unwrap();
        assert_eq!(binding.local, None);
    }

    #[test]
    fn test_toml_partial_config() {
        let config = InterfaceConfig::from_toml(
            r#"
            socket_dir = "/var/run/prime"
            request_timeout_ms = 250

            [api]
            kind = "udp"
            host = "localhost"
            port = 6000
            "#,
        )
        .unwrap();
        assert_eq!(config.socket_dir, PathBuf::from("/var/run/prime"));
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.lease_secs, 30);
        assert!(config.logger_enabled);
        assert!(matches!(config.api, Some(ChannelAddr::Udp { port: 6000, .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let err = InterfaceConfig::load("/nonexistent/prime.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/prime.toml"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prime.toml");
        std::fs::write(&path, "logger_enabled = false\nlease_secs = 2\n").unwrap();
        let config = InterfaceConfig::load(&path).unwrap();
        assert!(!config.logger_enabled);
        assert_eq!(config.lease(), Duration::from_secs(2));
    }
}
