use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

/// Flag name that switches the buy worker on
pub const BUY_WORKER_FLAG: &str = "worker_status";

/// Named on/off flags shared with whatever drives the bot from outside
#[derive(Clone, Default)]
pub struct ControlState {
    flags: Arc<Mutex<HashSet<String>>>,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enable(&self, flag: &str) {
        self.lock().insert(flag.to_string());
    }

    pub fn disable(&self, flag: &str) {
        self.lock().remove(flag);
    }

    pub fn is_enabled(&self, flag: &str) -> bool {
        self.lock().contains(flag)
    }

    pub fn buy_enabled(&self) -> bool {
        self.is_enabled(BUY_WORKER_FLAG)
    }

    pub fn set_buy_enabled(&self, enabled: bool) {
        if enabled {
            self.enable(BUY_WORKER_FLAG);
        } else {
            self.disable(BUY_WORKER_FLAG);
        }
    }
}

/// Last computed profit figure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitSnapshot {
    pub value: f64,
    pub computed_at: DateTime<Utc>,
}

/// Single-value cache overwritten wholesale by the profit worker
#[derive(Clone, Default)]
pub struct ProfitCache {
    last: Arc<Mutex<Option<ProfitSnapshot>>>,
}

impl ProfitCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: f64) {
        let snapshot = ProfitSnapshot {
            value,
            computed_at: Utc::now(),
        };
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    pub fn get(&self) -> Option<ProfitSnapshot> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
