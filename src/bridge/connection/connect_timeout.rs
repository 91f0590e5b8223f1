//! Connection establishment timeout.

use std::time::Duration;

/// Wall-clock bound on the whole connect retry loop.
///
/// A locally spawned server needs some time before it listens on its port,
/// so the bridge keeps retrying until this bound passes.
///
/// # Valid Range
///
/// - Minimum: 100 milliseconds
/// - Maximum: 120 seconds
/// - Default: 20 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTimeout(Duration);

impl ConnectTimeout {
    /// Default timeout: 20 seconds
    const DEFAULT_MILLIS: u64 = 20_000;

    /// Minimum valid timeout: 100 milliseconds
    pub const MIN: Duration = Duration::from_millis(100);

    /// Maximum valid timeout: 120 seconds
    pub const MAX: Duration = Duration::from_secs(120);

    /// Create a new ConnectTimeout with validation.
    ///
    /// # Returns
    /// - `Ok(ConnectTimeout)` if duration is within the valid range (inclusive)
    /// - `Err(io::Error)` with InvalidInput kind otherwise
    pub fn new(duration: Duration) -> std::io::Result<Self> {
        if duration < Self::MIN || duration > Self::MAX {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "Connect timeout must be between {:?} and {:?}, got {:?}",
                    Self::MIN,
                    Self::MAX,
                    duration
                ),
            ));
        }
        Ok(Self(duration))
    }

    /// Get the inner Duration value.
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for ConnectTimeout {
    fn default() -> Self {
        Self(Duration::from_millis(Self::DEFAULT_MILLIS))
    }
}
