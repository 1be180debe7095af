//! Utilities to help with testing toolpool

use crate::factory::{self, Factory, ResourceId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicUsize, Ordering};
use tracing::{event, Level};

/// What [TestFactory::connect] hands out.
pub(crate) struct TestConnection {
    #[allow(dead_code)]
    pub(crate) serial: usize,
}

/// A scriptable factory: connections can be refused, rationed, or slowed
/// down, and every connect/disconnect is counted.
pub(crate) struct TestFactory {
    can_connect: AtomicBool,
    // Remaining successful connects; negative means unlimited.
    connect_budget: AtomicIsize,
    connect_delay_ms: AtomicU64,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl TestFactory {
    pub(crate) fn new() -> Self {
        Self {
            can_connect: AtomicBool::new(true),
            connect_budget: AtomicIsize::new(-1),
            connect_delay_ms: AtomicU64::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_connectable(&self, can_connect: bool) {
        self.can_connect.store(can_connect, Ordering::SeqCst);
    }

    /// Allows exactly `budget` more successful connects, then fails.
    pub(crate) fn set_connect_budget(&self, budget: isize) {
        self.connect_budget.store(budget, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub(crate) fn set_connect_delay(&self, delay: tokio::time::Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn take_budget(&self) -> bool {
        self.connect_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |budget| match budget {
                budget if budget < 0 => Some(budget),
                0 => None,
                budget => Some(budget - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl Factory for TestFactory {
    type Handle = TestConnection;

    async fn connect(&self, resource: &ResourceId) -> Result<TestConnection, factory::Error> {
        let delay_ms = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
        }

        if !self.can_connect.load(Ordering::SeqCst) || !self.take_budget() {
            event!(Level::WARN, resource = %resource, "TestFactory::connect - FAIL");
            return Err(factory::Error::Other(anyhow::anyhow!(
                "connection refused"
            )));
        }

        let serial = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        event!(Level::INFO, resource = %resource, serial, "TestFactory::connect - OK");
        Ok(TestConnection { serial })
    }

    async fn disconnect(&self, _handle: &TestConnection) -> Result<(), factory::Error> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
