//! Idle teardown worker
//!
//! One background task owns a single resettable deadline. Releasing the last
//! lease arms it; re-arming overwrites the deadline rather than scheduling a
//! competing timer, so rapid idle/busy/idle cycles coalesce into one pending
//! close. When the deadline expires with the chain still empty, the
//! connection is closed exactly once.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::registry::SharedState;
use crate::supplier::ConnectionSupplier;

/// Message sent to the idle closer
#[derive(Debug)]
pub(crate) enum IdleCommand {
    /// The chain became empty; close the connection at `deadline` unless a
    /// new lease arrives first
    Arm {
        /// When the idle connection becomes eligible for close
        deadline: Instant,
    },
    /// Disarm any pending close (force close handles the connection itself)
    Cancel,
}

/// Background task that closes the shared connection after the grace period
///
/// Spawn with `tokio::spawn(closer.run())`. The task exits once the
/// registry and every lease have been dropped, closing any connection still
/// open on the way out.
pub struct IdleCloser<S: ConnectionSupplier> {
    rx: mpsc::UnboundedReceiver<IdleCommand>,
    state: SharedState<S::Conn>,
    io_gate: Arc<tokio::sync::Mutex<()>>,
    supplier: Arc<S>,
}

impl<S: ConnectionSupplier> IdleCloser<S> {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<IdleCommand>,
        state: SharedState<S::Conn>,
        io_gate: Arc<tokio::sync::Mutex<()>>,
        supplier: Arc<S>,
    ) -> Self {
        Self {
            rx,
            state,
            io_gate,
            supplier,
        }
    }

    /// Run the idle closer until every registry and lease handle is gone
    pub async fn run(mut self) {
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                // Queued commands must win over an already-elapsed
                // deadline: a re-arm that raced the old deadline extends
                // it instead of letting the stale timer close first.
                biased;

                msg = self.rx.recv() => match msg {
                    Some(IdleCommand::Arm { deadline: at }) => {
                        debug!("idle close armed");
                        deadline = Some(at);
                    }
                    Some(IdleCommand::Cancel) => {
                        debug!("idle close cancelled");
                        deadline = None;
                    }
                    None => break,
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    deadline = None;
                    self.close_if_idle().await;
                }
            }
        }

        debug!("idle closer shutting down");
        self.close_if_idle().await;
    }

    /// Close the connection if the chain is still empty
    ///
    /// Taking the connection out of the registry before the I/O makes the
    /// close attempt at-most-once per connection instance; a failure is
    /// logged and the connection stays absent.
    async fn close_if_idle(&self) {
        // Gate first so the close cannot overlap an in-flight open.
        let _gate = self.io_gate.lock().await;

        let (conn, generation) = {
            let mut state = self.state.lock().unwrap();
            if !state.chain.is_empty() {
                debug!(
                    outstanding = state.chain.len(),
                    "idle deadline passed but leases are outstanding, skipping close"
                );
                return;
            }
            match state.conn.take() {
                Some(conn) => (conn, state.generation),
                None => return,
            }
        };

        info!(generation, "closing idle shared connection");
        if let Err(error) = self.supplier.close(conn).await {
            warn!(error = ?error, generation, "failed to close idle shared connection");
        }
    }
}
