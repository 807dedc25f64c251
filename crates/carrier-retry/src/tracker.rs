use carrier_core::{DateTime, Duration};
use dashmap::DashMap;

/// Error tracker settings
#[derive(Debug, Clone)]
pub struct ErrorTrackerConfig {
    /// Failure count at which a message is considered poison
    pub max_delivery_attempts: u32,
    /// Age after which an entry is eligible for the stale purge
    pub entry_max_age: Duration,
}

impl Default for ErrorTrackerConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 5,
            entry_max_age: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedMessage {
    first_seen: DateTime,
    last_seen: DateTime,
    errors: Vec<String>,
}

/// In-memory map of message id → delivery failures.
///
/// Entries are evicted on successful handling, when dead-lettered, or by the
/// periodic stale purge.
#[derive(Debug, Default)]
pub struct ErrorTracker {
    entries: DashMap<String, TrackedMessage>,
    config: ErrorTrackerConfig,
}

impl ErrorTracker {
    /// Create a tracker with default settings
    pub fn new() -> Self {
        Self::with_config(ErrorTrackerConfig::default())
    }

    /// Create a tracker with the given settings
    pub fn with_config(config: ErrorTrackerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Record a delivery failure for a message
    pub fn register_error(&self, message_id: &str, error: &dyn std::fmt::Display) {
        let now = chrono::Utc::now();
        let mut entry = self
            .entries
            .entry(message_id.to_string())
            .or_insert_with(|| TrackedMessage {
                first_seen: now,
                last_seen: now,
                errors: Vec::new(),
            });
        entry.last_seen = now;
        entry.errors.push(error.to_string());
    }

    /// Number of failures recorded for a message
    pub fn attempt_count(&self, message_id: &str) -> u32 {
        self.entries
            .get(message_id)
            .map(|e| e.errors.len() as u32)
            .unwrap_or(0)
    }

    /// Whether the message has reached the poison threshold
    pub fn has_failed_too_many_times(&self, message_id: &str) -> bool {
        self.attempt_count(message_id) >= self.config.max_delivery_attempts
    }

    /// The failure descriptions recorded for a message, oldest first
    pub fn error_descriptions(&self, message_id: &str) -> Vec<String> {
        self.entries
            .get(message_id)
            .map(|e| e.errors.clone())
            .unwrap_or_default()
    }

    /// Forget a message: called on success and after dead-lettering
    pub fn clear(&self, message_id: &str) {
        self.entries.remove(message_id);
    }

    /// Drop entries older than the configured max age, returning how many
    /// were removed
    pub fn purge_stale(&self) -> usize {
        let now = chrono::Utc::now();
        let max_age = match chrono::Duration::from_std(self.config.entry_max_age) {
            Ok(age) => age,
            Err(_) => return 0,
        };
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.last_seen <= max_age);
        before - self.entries.len()
    }

    /// Current tracker counters
    pub fn stats(&self) -> TrackerStats {
        let now = chrono::Utc::now();
        let oldest_entry_age = self
            .entries
            .iter()
            .map(|e| (now - e.first_seen).to_std().unwrap_or_default())
            .max();
        TrackerStats {
            tracked_messages: self.entries.len(),
            total_errors: self.entries.iter().map(|e| e.errors.len()).sum(),
            oldest_entry_age,
        }
    }
}

/// Error-tracker counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerStats {
    /// Messages currently tracked
    pub tracked_messages: usize,
    /// Failures recorded across all tracked messages
    pub total_errors: usize,
    /// Age of the entry that has been failing the longest
    pub oldest_entry_age: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_register_and_count_errors() {
        let fixture = ErrorTracker::new();

        fixture.register_error("m-1", &"first failure");
        fixture.register_error("m-1", &"second failure");

        assert_eq!(fixture.attempt_count("m-1"), 2);
        assert_eq!(fixture.attempt_count("m-2"), 0);
    }

    #[test]
    fn test_poison_threshold() {
        let fixture = ErrorTracker::with_config(ErrorTrackerConfig {
            max_delivery_attempts: 3,
            ..ErrorTrackerConfig::default()
        });

        for _ in 0..2 {
            fixture.register_error("m-1", &"boom");
        }
        assert!(!fixture.has_failed_too_many_times("m-1"));

        fixture.register_error("m-1", &"boom");
        assert!(fixture.has_failed_too_many_times("m-1"));
    }

    #[test]
    fn test_error_descriptions_in_order() {
        let fixture = ErrorTracker::new();
        fixture.register_error("m-1", &"first");
        fixture.register_error("m-1", &"second");

        let actual = fixture.error_descriptions("m-1");
        let expected = vec!["first".to_string(), "second".to_string()];
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_clear_forgets_the_message() {
        let fixture = ErrorTracker::new();
        fixture.register_error("m-1", &"boom");

        fixture.clear("m-1");

        assert_eq!(fixture.attempt_count("m-1"), 0);
        assert!(fixture.error_descriptions("m-1").is_empty());
    }

    #[test]
    fn test_purge_stale_drops_old_entries() {
        let fixture = ErrorTracker::with_config(ErrorTrackerConfig {
            entry_max_age: Duration::from_secs(0),
            ..ErrorTrackerConfig::default()
        });
        fixture.register_error("m-1", &"boom");
        fixture.register_error("m-2", &"boom");

        // Zero max age: everything is stale immediately
        std::thread::sleep(Duration::from_millis(5));
        let actual = fixture.purge_stale();

        assert_eq!(actual, 2);
        assert_eq!(fixture.stats().tracked_messages, 0);
    }

    #[test]
    fn test_purge_keeps_fresh_entries() {
        let fixture = ErrorTracker::new();
        fixture.register_error("m-1", &"boom");

        let actual = fixture.purge_stale();

        assert_eq!(actual, 0);
        assert_eq!(fixture.stats().tracked_messages, 1);
    }

    #[test]
    fn test_stats() {
        let fixture = ErrorTracker::new();
        fixture.register_error("m-1", &"boom");
        fixture.register_error("m-1", &"boom again");
        fixture.register_error("m-2", &"bang");

        let actual = fixture.stats();
        assert_eq!(actual.tracked_messages, 2);
        assert_eq!(actual.total_errors, 3);
        assert!(actual.oldest_entry_age.is_some());
    }
}
