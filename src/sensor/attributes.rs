use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

type Delivery = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    values: HashMap<String, Value>,
    pending: VecDeque<Delivery>,
    draining: bool,
}

/// Per-entity mapping from sensor name to current value.
///
/// Each write queues its change notification in write order. Deliveries run
/// with no lock held, drained by one thread at a time, so subscribers of an
/// entity observe updates in the order they were applied.
///
/// A write made while another thread is draining (or from inside a delivery)
/// returns once queued; the draining thread delivers it.
#[derive(Default)]
pub struct AttributeMap {
    state: Mutex<State>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value, `None` if never set
    pub fn get(&self, name: &str) -> Option<Value> {
        self.state.lock().values.get(name).cloned()
    }

    /// Store `value` and queue the delivery built by `prepare` from the
    /// previous value. Returns the previous value.
    ///
    /// `prepare` runs under the map's lock and must not call back into it.
    pub fn update<F, D>(&self, name: &str, value: Value, prepare: F) -> Option<Value>
    where
        F: FnOnce(Option<&Value>) -> D,
        D: FnOnce() + Send + 'static,
    {
        let old = {
            let mut state = self.state.lock();
            let old = state.values.insert(name.to_string(), value);
            let delivery = prepare(old.as_ref());
            state.pending.push_back(Box::new(delivery));
            old
        };
        self.drain();
        old
    }

    /// Queue `delivery` in update order without retaining anything.
    pub fn publish_only<D>(&self, delivery: D)
    where
        D: FnOnce() + Send + 'static,
    {
        self.state.lock().pending.push_back(Box::new(delivery));
        self.drain();
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.state.lock().values.remove(name)
    }

    /// Snapshot of all retained values
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.state.lock().values.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().values.is_empty()
    }

    /// Number of queued deliveries not yet run
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            if catch_unwind(AssertUnwindSafe(next)).is_err() {
                warn!("Attribute change delivery panicked");
            }
        }
    }
}
