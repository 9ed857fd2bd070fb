//! Process-wide presence tracking for live connections.
//!
//! Two maps, one lock: the total connection count per queue and the count per
//! (queue, email) must change together, and the snapshot published in
//! `QUEUE_CONNECTIONS_UPDATE` must be the one captured under the lock.
//! Callers publish the returned delta after the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ohq_domain::Tid;

#[derive(Default)]
struct Maps {
    count: HashMap<Tid, usize>,
    by_email: HashMap<Tid, HashMap<String, usize>>,
}

/// What a connect/disconnect changed, captured under the lock.
#[derive(Debug, PartialEq, Eq)]
pub struct PresenceDelta {
    /// Total connections on the queue after the change.
    pub connections: usize,
    /// `(email, online)` when the user's connection count crossed 0↔1.
    pub transition: Option<(String, bool)>,
}

#[derive(Clone, Default)]
pub struct Presence {
    inner: Arc<Mutex<Maps>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, queue: Tid, email: Option<&str>) -> PresenceDelta {
        let mut maps = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let count = maps.count.entry(queue).or_default();
        *count += 1;
        let connections = *count;

        let transition = email.and_then(|email| {
            let per_user = maps
                .by_email
                .entry(queue)
                .or_default()
                .entry(email.to_string())
                .or_default();
            *per_user += 1;
            (*per_user == 1).then(|| (email.to_string(), true))
        });

        PresenceDelta {
            connections,
            transition,
        }
    }

    pub fn disconnect(&self, queue: Tid, email: Option<&str>) -> PresenceDelta {
        let mut maps = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let connections = match maps.count.get_mut(&queue) {
            Some(count) => {
                *count = count.saturating_sub(1);
                let remaining = *count;
                if remaining == 0 {
                    maps.count.remove(&queue);
                }
                remaining
            }
            None => 0,
        };

        let transition = email.and_then(|email| {
            let users = maps.by_email.get_mut(&queue)?;
            let per_user = users.get_mut(email)?;
            *per_user = per_user.saturating_sub(1);
            if *per_user > 0 {
                return None;
            }
            users.remove(email);
            if users.is_empty() {
                maps.by_email.remove(&queue);
            }
            Some((email.to_string(), false))
        });

        PresenceDelta {
            connections,
            transition,
        }
    }

    /// Emails with at least one open connection to the queue.
    pub fn online(&self, queue: Tid) -> Vec<String> {
        let maps = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut emails: Vec<String> = maps
            .by_email
            .get(&queue)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default();
        emails.sort();
        emails
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_fire_only_on_zero_crossings() {
        let presence = Presence::new();
        let queue = Tid::new();

        let first = presence.connect(queue, Some("a@x.edu"));
        assert_eq!(first.connections, 1);
        assert_eq!(first.transition, Some(("a@x.edu".to_string(), true)));

        // A second tab: no transition.
        let second = presence.connect(queue, Some("a@x.edu"));
        assert_eq!(second.connections, 2);
        assert_eq!(second.transition, None);

        let drop_one = presence.disconnect(queue, Some("a@x.edu"));
        assert_eq!(drop_one.connections, 1);
        assert_eq!(drop_one.transition, None);

        let drop_last = presence.disconnect(queue, Some("a@x.edu"));
        assert_eq!(drop_last.connections, 0);
        assert_eq!(drop_last.transition, Some(("a@x.edu".to_string(), false)));
    }

    #[test]
    fn anonymous_connections_count_without_transitions() {
        let presence = Presence::new();
        let queue = Tid::new();

        let delta = presence.connect(queue, None);
        assert_eq!(delta.connections, 1);
        assert_eq!(delta.transition, None);
        assert!(presence.online(queue).is_empty());

        let delta = presence.disconnect(queue, None);
        assert_eq!(delta.connections, 0);
        assert_eq!(delta.transition, None);
    }

    #[test]
    fn online_lists_current_users_per_queue() {
        let presence = Presence::new();
        let q1 = Tid::new();
        let q2 = Tid::new();

        presence.connect(q1, Some("a@x.edu"));
        presence.connect(q1, Some("b@x.edu"));
        presence.connect(q2, Some("c@x.edu"));

        assert_eq!(presence.online(q1), vec!["a@x.edu", "b@x.edu"]);
        assert_eq!(presence.online(q2), vec!["c@x.edu"]);

        presence.disconnect(q1, Some("b@x.edu"));
        assert_eq!(presence.online(q1), vec!["a@x.edu"]);
    }

    #[test]
    fn counts_match_any_interleaving() {
        let presence = Presence::new();
        let queue = Tid::new();
        let mut open = 0usize;
        // connect/disconnect storm for one user; count tracks exactly.
        for step in 0..50 {
            if step % 3 == 2 && open > 0 {
                let delta = presence.disconnect(queue, Some("a@x.edu"));
                open -= 1;
                assert_eq!(delta.connections, open);
                assert_eq!(delta.transition.is_some(), open == 0);
            } else {
                let delta = presence.connect(queue, Some("a@x.edu"));
                open += 1;
                assert_eq!(delta.connections, open);
                assert_eq!(delta.transition.is_some(), open == 1);
            }
        }
    }
}
