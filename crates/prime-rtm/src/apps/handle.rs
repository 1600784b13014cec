//! Client interface for the `AppRegistryActor`.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors map to `RegistryError::ChannelClosed` or empty answers

use prime_core::{AppKnob, AppMonitor, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::commands::{AppCommand, AppEvent, RegistryError, SessionView};

/// Cheap-to-clone handle to the App registry.
///
/// ```ignore
/// let registry = spawn_app_registry(&config)?;
/// let mut events = registry.subscribe();
/// while let Ok(event) = events.recv().await {
///     // react to registrations and monitor updates
/// }
/// ```
#[derive(Clone)]
pub struct AppRegistryHandle {
    sender: mpsc::Sender<AppCommand>,
    event_sender: broadcast::Sender<AppEvent>,
    cancel: CancellationToken,
}

impl AppRegistryHandle {
    pub fn new(
        sender: mpsc::Sender<AppCommand>,
        event_sender: broadcast::Sender<AppEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sender,
            event_sender,
            cancel,
        }
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> AppCommand,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;
        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Sets the value the App sees on its next knob get.
    ///
    /// # Errors
    ///
    /// - `RegistryError::SessionNotFound` / `KnobNotFound` for unknown ids
    /// - `RegistryError::DomainMismatch` if `val` is in the wrong domain
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn knob_set(&self, pid: u32, id: u32, val: Value) -> Result<AppKnob, RegistryError> {
        self.ask(|respond_to| AppCommand::KnobSet {
            pid,
            id,
            val,
            respond_to,
        })
        .await?
    }

    /// Records the weight a UI assigned to an App.
    pub async fn set_app_weight(&self, pid: u32, weight: f32) -> Result<(), RegistryError> {
        self.ask(|respond_to| AppCommand::SetAppWeight {
            pid,
            weight,
            respond_to,
        })
        .await?
    }

    pub async fn knob(&self, pid: u32, id: u32) -> Option<AppKnob> {
        self.ask(|respond_to| AppCommand::GetKnob { pid, id, respond_to })
            .await
            .ok()
            .flatten()
    }

    pub async fn monitor(&self, pid: u32, id: u32) -> Option<AppMonitor> {
        self.ask(|respond_to| AppCommand::GetMonitor { pid, id, respond_to })
            .await
            .ok()
            .flatten()
    }

    /// Every registered knob, ordered by id.
    pub async fn knobs(&self) -> Vec<AppKnob> {
        self.ask(|respond_to| AppCommand::GetKnobs { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Every registered monitor, ordered by id.
    pub async fn monitors(&self) -> Vec<AppMonitor> {
        self.ask(|respond_to| AppCommand::GetMonitors { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Every live session, ordered by pid.
    pub async fn sessions(&self) -> Vec<SessionView> {
        self.ask(|respond_to| AppCommand::GetSessions { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Removes sessions whose lease lapsed now, without waiting for the
    /// cleanup ticker. Returns how many were removed.
    pub async fn reap_expired(&self) -> Result<usize, RegistryError> {
        self.ask(|tx| AppCommand::ReapExpired {
            respond_to: Some(tx),
        })
        .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.event_sender.subscribe()
    }

    /// Stops the actor. Every fan-out endpoint and the rendezvous close.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_actor_yields_errors_and_empty_answers() {
        let (tx, rx) = mpsc::channel(4);
        let (event_tx, _) = broadcast::channel(4);
        drop(rx);
        let handle = AppRegistryHandle::new(tx, event_tx, CancellationToken::new());

        assert!(!handle.is_running());
        assert!(matches!(
            handle.knob_set(1, 1, Value::Disc(1)).await,
            Err(RegistryError::ChannelClosed)
        ));
        assert!(handle.knob(1, 1).await.is_none());
        assert!(handle.sessions().await.is_empty());
        assert!(handle.knobs().await.is_empty());
    }
}
