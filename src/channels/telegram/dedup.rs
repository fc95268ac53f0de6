//! Webhook update deduplication
//!
//! Telegram re-delivers an update until it gets a 200, so a slow handler or
//! a restart can hand us the same update twice. Keys are
//! `update:{integration}:{update_id}`; entries expire after a TTL and the
//! cache is capped so a flood cannot grow it without bound. The message
//! store's provider-id guard remains the durable line of defense - this
//! cache just keeps retries from reaching the pipeline at all.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const TTL: Duration = Duration::from_secs(300);
const MAX_ENTRIES: usize = 2000;

/// In-memory TTL cache of recently seen update keys
#[derive(Debug, Default)]
pub struct UpdateDedup {
    seen: HashMap<String, Instant>,
}

impl UpdateDedup {
    /// Record a key; returns `true` if it was already seen within the TTL
    pub fn seen(&mut self, key: &str) -> bool {
        let now = Instant::now();

        if let Some(at) = self.seen.get(key) {
            if now.duration_since(*at) < TTL {
                return true;
            }
        }

        if self.seen.len() >= MAX_ENTRIES {
            self.seen.retain(|_, at| now.duration_since(*at) < TTL);
        }
        if self.seen.len() >= MAX_ENTRIES {
            // Still full of live entries - drop the oldest one
            if let Some(oldest) = self
                .seen
                .iter()
                .min_by_key(|(_, at)| *at)
                .map(|(k, _)| k.clone())
            {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(key.to_string(), now);
        false
    }
}
