/// Failure reported by (or caught from) an event listener.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    /// The listener returned an error.
    #[error("listener failed: {0}")]
    Failed(String),

    /// The listener panicked while handling the event.
    #[error("listener panicked: {0}")]
    Panicked(String),
}

impl ListenerError {
    /// Convenience constructor for listener implementations.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}
