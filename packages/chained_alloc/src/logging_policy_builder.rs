use tracing::Level;

use crate::LoggingPolicy;

/// Builder for creating an instance of [`LoggingPolicy`].
///
/// # Examples
///
/// ```
/// use chained_alloc::LoggingPolicy;
/// use tracing::Level;
///
/// let verbose = LoggingPolicy::builder().level(Level::TRACE).build();
///
/// // Keep the policy in the chain but stay quiet until enabled.
/// let quiet = LoggingPolicy::builder().enabled(false).build();
/// assert!(!quiet.is_enabled());
/// ```
#[derive(Debug)]
#[must_use]
pub struct LoggingPolicyBuilder {
    level: Level,
    enabled: bool,
}

impl LoggingPolicyBuilder {
    pub(crate) fn new() -> Self {
        Self {
            level: Level::DEBUG,
            enabled: true,
        }
    }

    /// Sets the level at which events are emitted. Defaults to [`Level::DEBUG`].
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets whether events are emitted at all. Defaults to `true`.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builds the policy with the specified configuration.
    #[must_use]
    pub fn build(self) -> LoggingPolicy {
        LoggingPolicy::new_inner(self.level, self.enabled)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn settings_are_applied() {
        let policy = LoggingPolicyBuilder::new()
            .level(Level::WARN)
            .enabled(false)
            .build();

        assert_eq!(policy.level(), Level::WARN);
        assert!(!policy.is_enabled());
    }
}
