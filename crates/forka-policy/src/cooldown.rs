use forka_identity::CanonicalId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

// Upper bound accepted by `bot.cooldown_ms`.
const MAX_TRACKED: Duration = Duration::from_secs(60);

/// Minimum interval between two commands of the same sender.
#[derive(Debug)]
pub struct CooldownTracker {
    interval: Duration,
    /// Longest interval ever checked; older entries can never block.
    retention: Duration,
    last_accepted: HashMap<CanonicalId, Instant>,
}

impl CooldownTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            retention: interval.max(MAX_TRACKED),
            last_accepted: HashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records an accepted command for `sender`, or returns the time left
    /// before the next one is allowed. Rejected attempts do not extend the
    /// wait. `interval` overrides the default for a single command.
    pub fn check(&mut self, sender: &CanonicalId, interval: Option<Duration>) -> Result<(), Duration> {
        let interval = interval.unwrap_or(self.interval);
        let now = Instant::now();
        self.retention = self.retention.max(interval);

        // Keep only entries that can still block to bound memory usage.
        let retention = self.retention;
        self.last_accepted
            .retain(|_, at| now.saturating_duration_since(*at) < retention);

        if let Some(at) = self.last_accepted.get(sender) {
            let elapsed = now.saturating_duration_since(*at);
            if elapsed < interval {
                return Err(interval - elapsed);
            }
        }

        self.last_accepted.insert(sender.clone(), now);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }
}

/// Whole seconds shown to the user, rounded up.
pub fn remaining_secs(remaining: Duration) -> u64 {
    let millis = remaining.as_millis() as u64;
    millis.div_ceil(1000).max(1)
}
