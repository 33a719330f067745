//! conn-lease - Shared-connection lease manager
//!
//! One expensive connection, many call sites. The registry opens the
//! connection lazily on the first [`acquire`](LeaseRegistry::acquire), hands
//! out reference-counted [`Lease`]s to it, and closes it automatically once
//! every lease has been released and an idle grace period has elapsed.
//! Re-acquiring within the grace period reuses the live connection, so
//! bursts of short-lived work never pay the open cost twice. A
//! [`force_close`](LeaseRegistry::force_close) path performs abrupt
//! synchronous shutdown, revoking every outstanding lease.
//!
//! ## Modules
//!
//! - [`config`]: connection parameters and idle-grace tuning
//! - [`error`]: typed lease errors
//! - [`registry`]: the lease registry, lease handles, and idle closer
//! - [`supplier`]: the open/close seam and the SQLite implementation
//! - [`testing`]: shared fixtures (counting mock supplier)
//!
//! ## Usage
//!
//! ```no_run
//! use conn_lease::{create_lease_system, ConnectConfig, IdleConfig, SqliteSupplier};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let connect = ConnectConfig::load("db.json".as_ref())?;
//! let (registry, closer) = create_lease_system(SqliteSupplier::new(), connect, IdleConfig::default());
//! tokio::spawn(closer.run());
//!
//! let lease = registry.acquire().await?;
//! let pool = lease.conn()?;
//! sqlx::query("SELECT 1").execute(&*pool).await?;
//! lease.release()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod supplier;
pub mod testing;

// Re-export commonly used types
pub use config::{ConnectConfig, IdleConfig};
pub use error::LeaseError;
pub use registry::{create_lease_system, IdleCloser, Lease, LeaseId, LeaseRegistry};
pub use supplier::{ConnectionSupplier, SqliteSupplier};
