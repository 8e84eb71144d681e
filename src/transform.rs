use crate::error::BoxError;
use std::convert::Infallible;
use std::marker::PhantomData;

/// The work a stage applies to every item.
///
/// Transforms are shared by all workers of a stage, hence `&self` and
/// `Send + Sync`. The item is borrowed for the duration of the call: if the
/// transform fails, the worker still owns the item and hands it to the error
/// sink along with the cause.
pub trait Transform<In, Out>: Send + Sync + 'static {
    fn apply(&self, input: &In) -> Result<Out, BoxError>;
}

impl<In, Out, E, F> Transform<In, Out> for F
where
    F: Fn(&In) -> Result<Out, E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    fn apply(&self, input: &In) -> Result<Out, BoxError> {
        self(input).map_err(Into::into)
    }
}

/// Adapter for infallible closures
pub(crate) fn infallible<In, Out, F>(f: F) -> impl Transform<In, Out>
where
    In: 'static,
    Out: 'static,
    F: Fn(&In) -> Out + Send + Sync + 'static,
{
    move |input: &In| Ok::<Out, Infallible>(f(input))
}

/// Passes every item through unchanged
pub struct Identity<T>(PhantomData<fn() -> T>);

impl<T> Identity<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Identity<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Transform<T, T> for Identity<T> {
    fn apply(&self, input: &T) -> Result<T, BoxError> {
        Ok(input.clone())
    }
}
