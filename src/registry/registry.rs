//! Process-wide lease registry for the shared connection
//!
//! The registry is the sole owner of the shared connection and the chain of
//! outstanding leases. All chain and connection mutations are serialized
//! through one `std::sync::Mutex` (the monitor), which is never held across
//! an await point; open and close I/O is serialized separately through an
//! async gate so the monitor stays cheap.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::chain::{LeaseChain, LeaseCore, LeaseState};
use super::closer::{IdleCloser, IdleCommand};
use super::lease::Lease;
use crate::config::{ConnectConfig, IdleConfig};
use crate::error::LeaseError;
use crate::supplier::ConnectionSupplier;

/// Monitor-protected registry state
pub(crate) struct RegistryState<C> {
    /// The single live connection, or absent
    pub(crate) conn: Option<Arc<C>>,
    /// Incremented each time a connection is opened
    pub(crate) generation: u64,
    /// Currently open leases, oldest first
    pub(crate) chain: LeaseChain<C>,
    next_lease_id: u64,
}

pub(crate) type SharedState<C> = Arc<Mutex<RegistryState<C>>>;

/// Registry handing out leases to a single lazily-opened shared connection
///
/// Cloning is cheap and every clone refers to the same underlying state.
/// Construct one registry at startup with [`create_lease_system`] and pass
/// it to every call site; there are no global statics.
pub struct LeaseRegistry<S: ConnectionSupplier> {
    supplier: Arc<S>,
    connect: ConnectConfig,
    idle: IdleConfig,
    state: SharedState<S::Conn>,
    io_gate: Arc<tokio::sync::Mutex<()>>,
    idle_tx: mpsc::UnboundedSender<IdleCommand>,
}

impl<S: ConnectionSupplier> Clone for LeaseRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            supplier: Arc::clone(&self.supplier),
            connect: self.connect.clone(),
            idle: self.idle.clone(),
            state: Arc::clone(&self.state),
            io_gate: Arc::clone(&self.io_gate),
            idle_tx: self.idle_tx.clone(),
        }
    }
}

impl<S: ConnectionSupplier> LeaseRegistry<S> {
    /// Acquire a lease on the shared connection
    ///
    /// Opens the connection if it is currently absent; otherwise attaches
    /// to the live one. The open completes before the lease is handed out,
    /// and at most one open is in flight at a time. Open failures surface
    /// as [`LeaseError::ResourceUnavailable`] and leave the registry
    /// untouched.
    pub async fn acquire(&self) -> Result<Lease<S::Conn>, LeaseError> {
        // Fast path: attach to the live connection.
        if let Some(lease) = self.try_attach() {
            return Ok(lease);
        }

        // Slow path: serialize the open through the I/O gate, then
        // re-check in case another caller opened while we waited.
        let _gate = self.io_gate.lock().await;
        if let Some(lease) = self.try_attach() {
            return Ok(lease);
        }

        debug!(url = %self.connect.url, driver = %self.connect.driver, "opening shared connection");
        let conn = self
            .supplier
            .open(&self.connect)
            .await
            .map_err(|reason| LeaseError::ResourceUnavailable { reason })?;
        let conn = Arc::new(conn);

        let mut state = self.state.lock().unwrap();
        state.generation += 1;
        state.conn = Some(Arc::clone(&conn));
        info!(generation = state.generation, "shared connection opened");

        Ok(self.attach_locked(&mut state, conn))
    }

    /// Abrupt synchronous shutdown, overriding the grace period
    ///
    /// Revokes every outstanding lease (their later `release()` calls
    /// become no-ops), disarms the idle closer, and closes the connection
    /// if one is open. Close failures are logged, never propagated; from
    /// the caller's point of view this always succeeds.
    pub async fn force_close(&self) {
        // Holding the gate first means an in-flight open finishes and is
        // then torn down here rather than surviving the force close.
        let _gate = self.io_gate.lock().await;

        let conn = {
            let mut state = self.state.lock().unwrap();
            let revoked = state.chain.drain();
            for core in &revoked {
                core.set_state(LeaseState::Revoked);
            }
            if !revoked.is_empty() {
                warn!(
                    revoked = revoked.len(),
                    generation = state.generation,
                    "force close revoked outstanding leases"
                );
            }
            state.conn.take()
        };

        let _ = self.idle_tx.send(IdleCommand::Cancel);

        if let Some(conn) = conn {
            info!("force closing shared connection");
            if let Err(error) = self.supplier.close(conn).await {
                warn!(error = ?error, "failed to close shared connection during force close");
            }
        }
    }

    /// Number of currently outstanding leases
    pub fn lease_count(&self) -> usize {
        self.state.lock().unwrap().chain.len()
    }

    /// Whether a shared connection is currently open
    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().conn.is_some()
    }

    /// Generation of the current connection (increments per open)
    pub fn generation(&self) -> u64 {
        self.state.lock().unwrap().generation
    }

    /// Attach a lease to the live connection, if there is one
    fn try_attach(&self) -> Option<Lease<S::Conn>> {
        let mut state = self.state.lock().unwrap();
        let conn = state.conn.clone()?;
        Some(self.attach_locked(&mut state, conn))
    }

    fn attach_locked(
        &self,
        state: &mut RegistryState<S::Conn>,
        conn: Arc<S::Conn>,
    ) -> Lease<S::Conn> {
        let id = state.next_lease_id;
        state.next_lease_id += 1;

        let core = Arc::new(LeaseCore::new(id, state.generation, conn));
        state.chain.push(Arc::clone(&core));
        debug!(
            lease_id = id,
            generation = state.generation,
            outstanding = state.chain.len(),
            "lease acquired"
        );

        Lease::new(
            core,
            Arc::clone(&self.state),
            self.idle_tx.clone(),
            self.idle.grace,
        )
    }
}

/// Create a registry and its idle closer pair
///
/// The caller spawns the closer (`tokio::spawn(closer.run())`); it exits on
/// its own once the registry and every lease have been dropped, closing any
/// connection still open.
pub fn create_lease_system<S: ConnectionSupplier>(
    supplier: S,
    connect: ConnectConfig,
    idle: IdleConfig,
) -> (LeaseRegistry<S>, IdleCloser<S>) {
    let supplier = Arc::new(supplier);
    let state: SharedState<S::Conn> = Arc::new(Mutex::new(RegistryState {
        conn: None,
        generation: 0,
        chain: LeaseChain::new(),
        next_lease_id: 1,
    }));
    let io_gate = Arc::new(tokio::sync::Mutex::new(()));
    let (idle_tx, idle_rx) = mpsc::unbounded_channel();

    let registry = LeaseRegistry {
        supplier: Arc::clone(&supplier),
        connect,
        idle,
        state: Arc::clone(&state),
        io_gate: Arc::clone(&io_gate),
        idle_tx,
    };
    let closer = IdleCloser::new(idle_rx, state, io_gate, supplier);

    (registry, closer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_connect_config, MockSupplier};

    fn registry_without_closer() -> (LeaseRegistry<MockSupplier>, MockSupplier) {
        let supplier = MockSupplier::new();
        let (registry, _closer) =
            create_lease_system(supplier.clone(), test_connect_config(), IdleConfig::default());
        (registry, supplier)
    }

    #[tokio::test]
    async fn test_acquire_opens_once_and_shares() {
        let (registry, supplier) = registry_without_closer();
        assert!(!registry.is_open());

        let l1 = registry.acquire().await.unwrap();
        let l2 = registry.acquire().await.unwrap();

        assert_eq!(supplier.open_count(), 1);
        assert_eq!(registry.lease_count(), 2);
        assert_eq!(registry.generation(), 1);
        assert_eq!(l1.conn().unwrap().serial, l2.conn().unwrap().serial);

        l1.release().unwrap();
        l2.release().unwrap();
        assert_eq!(registry.lease_count(), 0);
        // Teardown is the closer's job; the connection stays for now.
        assert!(registry.is_open());
    }

    #[tokio::test]
    async fn test_open_failure_creates_no_lease() {
        let (registry, supplier) = registry_without_closer();
        supplier.fail_next_open();

        let err = registry.acquire().await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(registry.lease_count(), 0);
        assert!(!registry.is_open());

        // Next acquire succeeds.
        let lease = registry.acquire().await.unwrap();
        assert_eq!(supplier.open_count(), 1);
        lease.release().unwrap();
    }

    #[tokio::test]
    async fn test_double_release_raises() {
        let (registry, _supplier) = registry_without_closer();
        let l1 = registry.acquire().await.unwrap();
        let l2 = registry.acquire().await.unwrap();

        l1.release().unwrap();
        let err = l1.release().unwrap_err();
        assert!(matches!(err, LeaseError::AlreadyReleased { lease_id } if lease_id == l1.id()));

        // The other lease is unaffected.
        assert_eq!(registry.lease_count(), 1);
        assert!(l2.conn().is_ok());
        l2.release().unwrap();
    }

    #[tokio::test]
    async fn test_use_after_release_fails() {
        let (registry, _supplier) = registry_without_closer();
        let lease = registry.acquire().await.unwrap();
        assert!(lease.is_open());

        lease.release().unwrap();
        assert!(!lease.is_open());
        let err = lease.conn().unwrap_err();
        assert!(matches!(err, LeaseError::UseAfterRelease { .. }));
    }

    #[tokio::test]
    async fn test_force_close_revokes_and_tolerates_release() {
        let (registry, supplier) = registry_without_closer();
        let l1 = registry.acquire().await.unwrap();
        let l2 = registry.acquire().await.unwrap();

        registry.force_close().await;
        assert!(!registry.is_open());
        assert_eq!(registry.lease_count(), 0);
        assert_eq!(supplier.close_count(), 1);

        // Revoked handles fail, but releasing them is a silent no-op.
        assert!(l1.conn().is_err());
        l1.release().unwrap();
        l1.release().unwrap();
        l2.release().unwrap();

        // A later acquire opens a fresh connection.
        let l3 = registry.acquire().await.unwrap();
        assert_eq!(supplier.open_count(), 2);
        assert_eq!(l3.generation(), 2);
        l3.release().unwrap();
    }

    #[tokio::test]
    async fn test_force_close_swallows_close_failure() {
        let (registry, supplier) = registry_without_closer();
        let lease = registry.acquire().await.unwrap();

        supplier.fail_next_close();
        registry.force_close().await;
        assert!(!registry.is_open());
        assert_eq!(supplier.close_count(), 1);
        lease.release().unwrap();
    }

    #[tokio::test]
    async fn test_force_close_without_connection_is_noop() {
        let (registry, supplier) = registry_without_closer();
        registry.force_close().await;
        assert_eq!(supplier.close_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_open_lease() {
        let (registry, _supplier) = registry_without_closer();
        {
            let _lease = registry.acquire().await.unwrap();
            assert_eq!(registry.lease_count(), 1);
        }
        assert_eq!(registry.lease_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_open() {
        let supplier = MockSupplier::new();
        supplier.set_open_delay_ms(10);
        let (registry, _closer) =
            create_lease_system(supplier.clone(), test_connect_config(), IdleConfig::default());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.acquire().await.unwrap()
            }));
        }

        let mut leases = Vec::new();
        for handle in handles {
            leases.push(handle.await.unwrap());
        }

        assert_eq!(supplier.open_count(), 1);
        assert_eq!(registry.lease_count(), 8);
        for lease in &leases {
            lease.release().unwrap();
        }
    }
}
