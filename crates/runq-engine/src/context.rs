use chrono::{DateTime, Utc};
use runq_core::CompanyId;

use crate::db::Store;
use crate::time::whole_seconds;

/// Source of "now" for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    System,
    /// Pinned instant, used by tests and replays.
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => whole_seconds(Utc::now()),
            Clock::Fixed(t) => whole_seconds(*t),
        }
    }
}

/// Explicit per-call state handed to every engine operation: the store, the
/// tenant the caller acts for, and the clock.
///
/// With a tenant set, reads and template lookups only see that company's
/// rows; templates of other tenants behave as not found.
#[derive(Clone)]
pub struct Context {
    store: Store,
    tenant: Option<CompanyId>,
    clock: Clock,
}

impl Context {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            tenant: None,
            clock: Clock::System,
        }
    }

    pub fn with_tenant(mut self, tenant: CompanyId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn tenant(&self) -> Option<CompanyId> {
        self.tenant
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
