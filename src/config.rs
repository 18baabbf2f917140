//! Configuration for listener behavior.

use std::time::Duration;

/// Configuration options for the query listeners.
///
/// # Example
///
/// ```rust
/// use sea_orm_listeners::ListenerConfig;
/// use std::time::Duration;
///
/// let config = ListenerConfig::default()
///     .with_query_arg_logging(false)
///     .with_slow_query_threshold(Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Whether to serialize bind parameters into `db.query_args`.
    /// Default: `true`. Disable when parameters may contain sensitive data;
    /// spans then report an empty argument sequence.
    pub log_query_args: bool,

    /// Whether to report `db.last_insert_id` and `db.rows_affected`.
    /// Default: `true`
    pub record_cursor_stats: bool,

    /// Threshold for logging slow queries at WARN level.
    /// Default: 500ms
    pub slow_query_threshold: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            log_query_args: true,
            record_cursor_stats: true,
            slow_query_threshold: Duration::from_millis(500),
        }
    }
}

impl ListenerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable bind-parameter serialization.
    ///
    /// **Security Warning**: query parameters often contain user input and
    /// potentially sensitive data. Disable this outside controlled
    /// environments if your traces leave the machine.
    pub fn with_query_arg_logging(mut self, enabled: bool) -> Self {
        self.log_query_args = enabled;
        self
    }

    /// Enable or disable cursor statistics reporting.
    pub fn with_cursor_stats(mut self, enabled: bool) -> Self {
        self.record_cursor_stats = enabled;
        self
    }

    /// Set the threshold for slow query warnings.
    ///
    /// Queries taking longer than this duration are logged at WARN level.
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    /// Development-friendly configuration: everything on, eager slow-query
    /// warnings.
    pub fn development() -> Self {
        Self {
            log_query_args: true,
            record_cursor_stats: true,
            slow_query_threshold: Duration::from_millis(100),
        }
    }

    /// Production-safe configuration: no parameter capture.
    pub fn production() -> Self {
        Self {
            log_query_args: false,
            record_cursor_stats: true,
            slow_query_threshold: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_capture_everything() {
        let config = ListenerConfig::default();
        assert!(config.log_query_args);
        assert!(config.record_cursor_stats);
        assert_eq!(config.slow_query_threshold, Duration::from_millis(500));
    }

    #[test]
    fn test_builder() {
        let config = ListenerConfig::new()
            .with_query_arg_logging(false)
            .with_slow_query_threshold(Duration::from_millis(50));

        assert!(!config.log_query_args);
        assert_eq!(config.slow_query_threshold, Duration::from_millis(50));
    }

    #[test]
    fn test_production_config() {
        let config = ListenerConfig::production();
        assert!(!config.log_query_args);
        assert!(config.record_cursor_stats);
    }
}
