#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// The run is about to touch the raw or translated caches.
    CacheMutationStarted,
    /// Every stage finished without error.
    Completed,
    /// A stage failed; the run is being abandoned.
    Failed,
}
