use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct RegistryState {
    tracked: HashSet<String>,
    in_flight: HashSet<String>,
}

/// Thread-safe set of order ids the bot still owns resolution for
///
/// Both the stream listener and the reconciliation worker act on tracked ids.
/// Acting goes through `claim`, so one id is only ever handled by one actor at a
/// time and is untracked exactly once.
#[derive(Clone, Default)]
pub struct OrderRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking an order id
    pub fn track(&self, order_id: &str) {
        self.lock().tracked.insert(order_id.to_string());
    }

    pub fn is_tracked(&self, order_id: &str) -> bool {
        self.lock().tracked.contains(order_id)
    }

    /// Stop tracking. Returns false if the id was not tracked.
    pub fn untrack(&self, order_id: &str) -> bool {
        self.lock().tracked.remove(order_id)
    }

    pub fn len(&self) -> usize {
        self.lock().tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take exclusive ownership of a tracked id.
    ///
    /// Returns `None` when the id is not tracked or another actor already holds
    /// a claim on it.
    pub fn claim(&self, order_id: &str) -> Option<OrderClaim> {
        let mut state = self.lock();
        if !state.tracked.contains(order_id) || state.in_flight.contains(order_id) {
            return None;
        }
        state.in_flight.insert(order_id.to_string());

        Some(OrderClaim {
            registry: self.clone(),
            order_id: order_id.to_string(),
        })
    }
}

/// Exclusive right to act on one tracked order.
///
/// `resolve` untracks the id once the terminal action succeeded. Dropping the
/// claim without resolving leaves the id tracked for the next attempt.
pub struct OrderClaim {
    registry: OrderRegistry,
    order_id: String,
}

impl OrderClaim {
    pub fn resolve(self) {
        self.registry.lock().tracked.remove(&self.order_id);
    }
}

impl Drop for OrderClaim {
    fn drop(&mut self) {
        self.registry.lock().in_flight.remove(&self.order_id);
    }
}
