//! App registry using the actor pattern.
//!
//! ```text
//! ┌──────────────┐  APP_REG   ┌──────────────────┐     ┌───────────────────┐
//! │     Apps     │───────────▶│ AppRegistryActor │────▶│ Broadcast Channel │
//! └──────────────┘            └──────────────────┘     └───────────────────┘
//!        ▲                      │           │                  │
//!        │   rtm.app.<pid>      │ AppCommand│ AppEvent         ▼
//!        └──────────────────────┘ (mpsc)    │             RTM policy,
//!             per-App fan-out               ▼             UI, logging
//!                                   sessions, knobs, monitors
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use std::time::Duration;

use prime_api::{Directory, InterfaceConfig, PeerMode, Transport};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod actor;
mod commands;
mod handle;

pub use actor::{AppRegistryActor, MAX_SESSIONS};
pub use commands::{AppCommand, AppEvent, DeregisterReason, RegistryError, SessionView, Source};
pub use handle::AppRegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 1024;
const EVENT_BUFFER: usize = 256;

/// Upper bound on the lease cleanup period
const CLEANUP_INTERVAL_SECS: u64 = 2;

/// Binds the rendezvous endpoint and spawns the registry.
///
/// Spawns the actor plus a cleanup task that reaps expired leases.
///
/// # Errors
///
/// `RegistryError::Setup` when the rendezvous endpoint cannot be bound.
pub fn spawn_app_registry(config: &InterfaceConfig) -> Result<AppRegistryHandle, RegistryError> {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let directory = Directory::new(config);
    let binding = directory.rtm_app().map_err(RegistryError::setup)?;
    let rendezvous = Transport::with_handler(
        &binding,
        PeerMode::Server,
        actor::forward(cmd_tx.clone(), Source::Rendezvous),
    )
    .map_err(RegistryError::setup)?;

    let cancel = CancellationToken::new();
    let actor = AppRegistryActor::new(cmd_rx, cmd_tx.clone(), event_tx.clone(), directory, rendezvous);
    tokio::spawn(actor.run(cancel.clone()));

    spawn_cleanup_task(cmd_tx.clone(), cleanup_period(config.lease()), cancel.clone());

    Ok(AppRegistryHandle::new(cmd_tx, event_tx, cancel))
}

/// Half the lease, between 100ms and `CLEANUP_INTERVAL_SECS`.
fn cleanup_period(lease: Duration) -> Duration {
    (lease / 2).clamp(
        Duration::from_millis(100),
        Duration::from_secs(CLEANUP_INTERVAL_SECS),
    )
}

/// Spawn a background task that triggers periodic lease cleanup.
fn spawn_cleanup_task(sender: mpsc::Sender<AppCommand>, period: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = interval(period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // Fire-and-forget
                    if sender.send(AppCommand::ReapExpired { respond_to: None }).await.is_err() {
                        debug!("Cleanup task stopping: registry channel closed");
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_period_is_clamped() {
        assert_eq!(cleanup_period(Duration::from_secs(30)), Duration::from_secs(2));
        assert_eq!(cleanup_period(Duration::from_secs(1)), Duration::from_millis(500));
        assert_eq!(cleanup_period(Duration::ZERO), Duration::from_millis(100));
    }
}
