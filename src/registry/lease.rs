//! Lease handle for the shared connection

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::chain::{LeaseCore, LeaseId, LeaseState};
use super::closer::IdleCommand;
use super::registry::SharedState;
use crate::error::LeaseError;

/// A caller's claim on the shared connection
///
/// The handle returned by [`conn()`](Lease::conn) is a snapshot taken at
/// acquisition and stays valid until the lease is released. Call
/// [`release()`](Lease::release) on every exit path; a lease that is dropped
/// while still open is released with a warning.
pub struct Lease<C> {
    core: Arc<LeaseCore<C>>,
    state: SharedState<C>,
    idle_tx: mpsc::UnboundedSender<IdleCommand>,
    grace: Duration,
}

impl<C> Lease<C> {
    pub(crate) fn new(
        core: Arc<LeaseCore<C>>,
        state: SharedState<C>,
        idle_tx: mpsc::UnboundedSender<IdleCommand>,
        grace: Duration,
    ) -> Self {
        Self {
            core,
            state,
            idle_tx,
            grace,
        }
    }

    /// Identity of this lease
    pub fn id(&self) -> LeaseId {
        self.core.id
    }

    /// Generation of the connection this lease was attached to
    pub fn generation(&self) -> u64 {
        self.core.generation
    }

    /// Whether this lease is still open
    pub fn is_open(&self) -> bool {
        self.core.state() == LeaseState::Open
    }

    /// Get the connection snapshot
    ///
    /// Fails with [`LeaseError::UseAfterRelease`] once the lease has been
    /// released or revoked by a force close.
    pub fn conn(&self) -> Result<Arc<C>, LeaseError> {
        match self.core.state() {
            LeaseState::Open => Ok(Arc::clone(&self.core.conn)),
            LeaseState::Released | LeaseState::Revoked => Err(LeaseError::UseAfterRelease {
                lease_id: self.core.id,
            }),
        }
    }

    /// Release this lease
    ///
    /// Releasing the last outstanding lease arms the idle closer; the
    /// connection stays open for the grace period in case another lease
    /// arrives. A second call fails with [`LeaseError::AlreadyReleased`],
    /// except on leases invalidated by a force close, where release is a
    /// silent no-op.
    pub fn release(&self) -> Result<(), LeaseError> {
        self.release_inner(true)
    }

    fn release_inner(&self, strict: bool) -> Result<(), LeaseError> {
        let mut registry = self.state.lock().unwrap();

        match self.core.state() {
            LeaseState::Open => {
                registry.chain.remove(self.core.id);
                self.core.set_state(LeaseState::Released);

                let held_ms = (Utc::now() - self.core.acquired_at).num_milliseconds();
                debug!(
                    lease_id = self.core.id,
                    generation = self.core.generation,
                    held_ms,
                    outstanding = registry.chain.len(),
                    "lease released"
                );

                if registry.chain.is_empty() && registry.conn.is_some() {
                    let deadline = tokio::time::Instant::now() + self.grace;
                    debug!(
                        generation = self.core.generation,
                        grace_ms = self.grace.as_millis() as u64,
                        "chain empty, arming idle close"
                    );
                    // The closer may already have exited on shutdown.
                    let _ = self.idle_tx.send(IdleCommand::Arm { deadline });
                }

                Ok(())
            }
            LeaseState::Released if strict => Err(LeaseError::AlreadyReleased {
                lease_id: self.core.id,
            }),
            LeaseState::Released | LeaseState::Revoked => Ok(()),
        }
    }
}

impl<C> Drop for Lease<C> {
    fn drop(&mut self) {
        if self.core.state() == LeaseState::Open {
            warn!(lease_id = self.core.id, "lease dropped while open, releasing");
            let _ = self.release_inner(false);
        }
    }
}

impl<C> std::fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.core.id)
            .field("generation", &self.core.generation)
            .field("state", &self.core.state())
            .finish()
    }
}
