//! Progress events emitted while a transfer runs.

/// Receives byte counts for one transfer. Rendering is up to the implementor.
pub trait ProgressSink: Send + Sync {
    /// Called once before the first chunk; `offset` is the resume offset.
    fn on_start(&self, _total: u64, _offset: u64) {}

    /// Called after every chunk is written.
    fn on_progress(&self, current: u64, total: u64);

    /// Called once the transfer stops, whatever the outcome.
    fn on_finish(&self) {}
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _current: u64, _total: u64) {}
}

/// Adapts a closure into a [`ProgressSink`].
pub struct FnProgress<F>(pub F);

impl<F> ProgressSink for FnProgress<F>
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_progress(&self, current: u64, total: u64) {
        (self.0)(current, total)
    }
}
