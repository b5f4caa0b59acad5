use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::SessionError;
use crate::identity::{Identity, SessionSlot};

/// `Uninitialized -> Resolving -> {Authenticated, Anonymous}`;
/// `Authenticated -> Anonymous` on sign-out.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    Uninitialized,
    Resolving,
    Authenticated(Arc<Identity>),
    Anonymous,
}

impl SessionPhase {
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionPhase::Uninitialized | SessionPhase::Resolving)
    }

    pub fn identity(&self) -> Option<&Arc<Identity>> {
        match self {
            SessionPhase::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub identity: Option<Arc<Identity>>,
    pub is_loading: bool,
}

impl From<&SessionPhase> for SessionSnapshot {
    fn from(phase: &SessionPhase) -> Self {
        Self {
            identity: phase.identity().cloned(),
            is_loading: phase.is_loading(),
        }
    }
}

/// Current identity for one session slot.
pub struct SessionResolver {
    slot: SessionSlot,
    state: watch::Sender<SessionPhase>,
}

impl SessionResolver {
    pub fn new(slot: SessionSlot) -> Self {
        let (state, _) = watch::channel(SessionPhase::Uninitialized);
        Self { slot, state }
    }

    pub fn slot(&self) -> SessionSlot {
        self.slot
    }

    /// Best-known state, without waiting.
    pub fn get_session(&self) -> SessionSnapshot {
        SessionSnapshot::from(&*self.state.borrow())
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.state.subscribe()
    }

    /// First resolution pass. Only runs from `Uninitialized`; later calls
    /// return the current snapshot. Any failure, including the timeout,
    /// leaves the resolver `Anonymous`.
    pub async fn resolve<F>(&self, load: F, timeout: Duration) -> SessionSnapshot
    where
        F: Future<Output = Result<Option<Identity>, SessionError>>,
    {
        let started = self.state.send_if_modified(|phase| {
            if *phase == SessionPhase::Uninitialized {
                *phase = SessionPhase::Resolving;
                true
            } else {
                false
            }
        });
        if !started {
            return self.get_session();
        }

        let resolved = match tokio::time::timeout(timeout, load).await {
            Ok(Ok(Some(identity))) => SessionPhase::Authenticated(Arc::new(identity)),
            Ok(Ok(None)) => SessionPhase::Anonymous,
            Ok(Err(e)) => {
                tracing::warn!("Session resolution failed for {:?} slot: {}", self.slot, e);
                SessionPhase::Anonymous
            }
            Err(_) => {
                tracing::warn!(
                    "Session resolution failed for {:?} slot: {}",
                    self.slot,
                    SessionError::Timeout
                );
                SessionPhase::Anonymous
            }
        };

        // A sign-in or sign-out that landed mid-resolution wins.
        self.state.send_if_modified(|phase| {
            if *phase == SessionPhase::Resolving {
                *phase = resolved;
                true
            } else {
                false
            }
        });
        self.get_session()
    }

    pub fn sign_in(&self, identity: Identity) {
        if *self.state.borrow() == SessionPhase::Uninitialized {
            self.state.send_replace(SessionPhase::Resolving);
        }
        tracing::debug!("{:?} session signed in as {}", self.slot, identity.id);
        self.state
            .send_replace(SessionPhase::Authenticated(Arc::new(identity)));
    }

    pub fn sign_out(&self) {
        self.state.send_replace(SessionPhase::Anonymous);
    }

    /// Wait until the resolver leaves its loading phases.
    pub async fn settled(&self) -> SessionSnapshot {
        let mut rx = self.state.subscribe();
        let snapshot = match rx.wait_for(|phase| !phase.is_loading()).await {
            Ok(phase) => SessionSnapshot::from(&*phase),
            Err(_) => self.get_session(),
        };
        snapshot
    }
}
