//! In-process store for pending magic-link logins.
//!
//! The store is deliberately ephemeral: entries live in one process-wide map
//! and are lost on restart. Expiry is enforced at redemption time; the
//! periodic [`InMemoryTokenStore::purge_expired`] sweep only bounds memory.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// What a stored magic token is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// Injectable token store. The default is in-memory; a durable key-value
/// backing can replace it without touching call sites.
pub trait TokenStore: Send + Sync {
    fn put(&self, token: &str, email: &str, expires_at: DateTime<Utc>);

    fn peek(&self, token: &str) -> Option<PendingLogin>;

    fn remove(&self, token: &str);

    /// Atomically remove and return the entry. Redemption must go through
    /// this: peek-then-remove would let two concurrent redemptions of the
    /// same token both succeed.
    fn take(&self, token: &str) -> Option<PendingLogin>;
}

pub struct InMemoryTokenStore {
    entries: Mutex<HashMap<String, PendingLogin>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Drop entries whose expiry lies before `now`. Returns how many were
    /// dropped.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, pending| pending.expires_at >= now);
        before - entries.len()
    }
}

impl TokenStore for InMemoryTokenStore {
    fn put(&self, token: &str, email: &str, expires_at: DateTime<Utc>) {
        self.entries.lock().unwrap().insert(
            token.to_string(),
            PendingLogin {
                email: email.to_string(),
                expires_at,
            },
        );
    }

    fn peek(&self, token: &str) -> Option<PendingLogin> {
        self.entries.lock().unwrap().get(token).cloned()
    }

    fn remove(&self, token: &str) {
        self.entries.lock().unwrap().remove(token);
    }

    fn take(&self, token: &str) -> Option<PendingLogin> {
        self.entries.lock().unwrap().remove(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::ops::Add;

    #[test]
    fn take_consumes_exactly_once() {
        let store = InMemoryTokenStore::new();
        let expires = Utc::now().add(Duration::minutes(15));
        store.put("tok", "jane@example.com", expires);

        let first = store.take("tok").unwrap();
        assert_eq!(first.email, "jane@example.com");
        assert_eq!(first.expires_at, expires);

        assert!(store.take("tok").is_none());
        assert!(store.peek("tok").is_none());
    }

    #[test]
    fn peek_does_not_consume() {
        let store = InMemoryTokenStore::new();
        store.put("tok", "a@b.c", Utc::now().add(Duration::minutes(1)));
        assert!(store.peek("tok").is_some());
        assert!(store.peek("tok").is_some());
        store.remove("tok");
        assert!(store.peek("tok").is_none());
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        store.put("stale", "a@b.c", now - Duration::minutes(1));
        store.put("live", "d@e.f", now.add(Duration::minutes(10)));

        assert_eq!(store.purge_expired(now), 1);
        assert!(store.peek("stale").is_none());
        assert!(store.peek("live").is_some());
    }
}
