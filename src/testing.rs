//! Centralized test fixtures and helpers
//!
//! Compiled unconditionally so integration tests can use the mock supplier;
//! production code has no reason to touch this module.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::ConnectConfig;
use crate::supplier::ConnectionSupplier;

/// Mock connection carrying the serial number of its open call
#[derive(Debug)]
pub struct MockConn {
    /// 1-based serial of the `open()` that produced this connection
    pub serial: u64,
}

#[derive(Default)]
struct MockState {
    opens: AtomicU64,
    closes: AtomicU64,
    fail_next_open: AtomicBool,
    fail_next_close: AtomicBool,
    open_delay_ms: AtomicU64,
}

/// Counting supplier for tests
///
/// Clones share counters, so a test can keep one handle while the registry
/// owns another.
#[derive(Clone, Default)]
pub struct MockSupplier {
    state: Arc<MockState>,
}

impl MockSupplier {
    /// Create a new mock supplier
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `open()` calls so far
    pub fn open_count(&self) -> u64 {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of `close()` calls so far
    pub fn close_count(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Make the next `open()` call fail
    pub fn fail_next_open(&self) {
        self.state.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Make the next `close()` call fail
    pub fn fail_next_close(&self) {
        self.state.fail_next_close.store(true, Ordering::SeqCst);
    }

    /// Delay every `open()` call, to widen race windows in tests
    pub fn set_open_delay_ms(&self, ms: u64) {
        self.state.open_delay_ms.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionSupplier for MockSupplier {
    type Conn = MockConn;

    async fn open(&self, _config: &ConnectConfig) -> Result<MockConn> {
        let delay = self.state.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.fail_next_open.swap(false, Ordering::SeqCst) {
            bail!("injected open failure");
        }
        let serial = self.state.opens.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockConn { serial })
    }

    async fn close(&self, _conn: Arc<MockConn>) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_next_close.swap(false, Ordering::SeqCst) {
            bail!("injected close failure");
        }
        Ok(())
    }
}

/// Create connection parameters pointing at an in-memory database
pub fn test_connect_config() -> ConnectConfig {
    ConnectConfig {
        url: "sqlite::memory:".to_string(),
        user: String::new(),
        password: String::new(),
        driver: "sqlite".to_string(),
    }
}
