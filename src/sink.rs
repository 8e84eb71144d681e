//! Destinations for per-item transform failures.
//!
//! A failing item never stops its worker: the worker wraps it in a
//! [`TransformError`] and hands it to the stage's [`ErrorSink`], then moves on.

use crate::error::TransformError;
use log::warn;
use parking_lot::Mutex;

/// Receives items a stage failed to transform
pub trait ErrorSink<T>: Send + Sync {
    fn report(&self, error: TransformError<T>);
}

/// Logs failures at `warn` level and discards the item. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrors;

impl<T> ErrorSink<T> for LogErrors {
    fn report(&self, error: TransformError<T>) {
        warn!("{error}");
    }
}

/// Keeps every failure so it can be inspected after the fact
#[derive(Debug)]
pub struct CollectErrors<T> {
    errors: Mutex<Vec<TransformError<T>>>,
}

impl<T> CollectErrors<T> {
    pub fn new() -> Self {
        Self {
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Number of failures collected so far
    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    /// Remove and return everything collected so far
    pub fn take(&self) -> Vec<TransformError<T>> {
        std::mem::take(&mut *self.errors.lock())
    }
}

impl<T> Default for CollectErrors<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> ErrorSink<T> for CollectErrors<T> {
    fn report(&self, error: TransformError<T>) {
        self.errors.lock().push(error);
    }
}
