use parking_lot::Mutex;

/// A mutex-guarded integer accumulator.
///
/// Every operation holds the lock for its whole read-modify-write, so
/// concurrent increments and decrements are never lost and [`Counter::get`]
/// always observes a value some serial order of the completed operations
/// could have produced.
#[derive(Debug, Default)]
pub struct Counter {
    value: Mutex<i64>,
}

impl Counter {
    /// Create a counter starting at `initial`
    pub fn new(initial: i64) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn decrement(&self) {
        self.add(-1);
    }

    /// Add `delta` (which may be negative) in a single step
    pub fn add(&self, delta: i64) {
        let mut value = self.value.lock();
        *value += delta;
    }

    pub fn get(&self) -> i64 {
        *self.value.lock()
    }
}
