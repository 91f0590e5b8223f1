//! Lifecycle states of the bridge.

/// State of a `LifecycleController`.
///
/// Transitions:
/// - Uninitialized -> Starting (start)
/// - Starting -> Ready (all startup steps succeeded)
/// - Starting -> Stopped (a startup step failed, partial resources released)
/// - Ready -> Stopping -> Stopped (stop)
/// - Uninitialized -> Stopped (stop before start)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Starting,
    Ready,
    Stopping,
    /// Terminal
    Stopped,
}

impl LifecycleState {
    /// Whether `stop()` has work to do in this state.
    pub fn needs_teardown(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Ready)
    }
}
