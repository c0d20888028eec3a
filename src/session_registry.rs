//! Session registry: lifecycle, bounded admission, FIFO activation, expiry,
//! and per-session read progress.
//!
//! The registry is not internally synchronized; the orchestrator serializes
//! all access behind its coordination lock. No operation panics; failure is
//! a `false` or an empty list.

use chrono::{DateTime, Duration, Utc};
use data_connector::{RegistrySnapshot, SessionActivity, SessionRecord};
use tracing::warn;

use std::collections::HashMap;

/// Sessions are either queued for later activation or actively being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Queued,
    Active,
}

/// The state of one scanner's session.
#[derive(Debug, Clone)]
pub struct Session {
    pub platform: String,
    pub state: ActivityState,
    pub created_at: DateTime<Utc>,
    pub last_heard_from: DateTime<Utc>,
    pub vulns_read: usize,
    /// Admission order, used to break `created_at` ties deterministically.
    seq: u64,
}

/// Tracks all known sessions and enforces the active/queued bounds.
#[derive(Debug)]
pub struct SessionRegistry {
    max_active_sessions: usize,
    max_queued_sessions: usize,
    sessions: HashMap<String, Session>,
    next_seq: u64,
}

impl SessionRegistry {
    pub fn new(max_active_sessions: usize, max_queued_sessions: usize) -> Self {
        Self {
            max_active_sessions,
            max_queued_sessions,
            sessions: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn max_active_sessions(&self) -> usize {
        self.max_active_sessions
    }

    pub fn max_queued_sessions(&self) -> usize {
        self.max_queued_sessions
    }

    pub fn queued_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.state == ActivityState::Queued)
            .count()
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.state == ActivityState::Active)
            .count()
    }

    /// Admit a new queued session. Fails if the id is already present or the
    /// queue is full; a rejected admission leaves the registry untouched.
    pub fn queue(&mut self, session_id: &str, platform: &str) -> bool {
        if self.sessions.contains_key(session_id) {
            return false;
        }
        if self.queued_count() >= self.max_queued_sessions {
            return false;
        }

        let now = Utc::now();
        self.sessions.insert(
            session_id.to_string(),
            Session {
                platform: platform.to_string(),
                state: ActivityState::Queued,
                created_at: now,
                last_heard_from: now,
                vulns_read: 0,
                seq: self.next_seq,
            },
        );
        self.next_seq += 1;

        true
    }

    /// Snapshot copy of a session; mutating it does not touch the registry.
    pub fn lookup(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).cloned()
    }

    /// Record that the session's owner was heard from, advancing its read
    /// offset by `read_vulns`. Returns `false` if the session is unknown.
    pub fn notify_activity(&mut self, session_id: &str, read_vulns: usize) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.last_heard_from = Utc::now();
                session.vulns_read += read_vulns;
                true
            }
            None => false,
        }
    }

    /// Promote queued sessions to active, oldest admission first.
    ///
    /// The number promoted is bounded by the free active capacity, by `max`
    /// when given, and by the number of queued sessions. Returns the
    /// promoted ids in promotion order.
    pub fn activate_sessions(&mut self, max: Option<usize>) -> Vec<String> {
        let capacity = self.max_active_sessions.saturating_sub(self.active_count());
        let limit = capacity.min(max.unwrap_or(self.max_active_sessions));

        let mut queued: Vec<(DateTime<Utc>, u64, String)> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state == ActivityState::Queued)
            .map(|(id, s)| (s.created_at, s.seq, id.clone()))
            .collect();
        queued.sort();

        let mut promoted = Vec::new();
        for (_, _, id) in queued.into_iter().take(limit) {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.state = ActivityState::Active;
                promoted.push(id);
            }
        }

        promoted
    }

    /// Ids of active sessions in admission order, optionally filtered to
    /// those that have read at least `read_at_least` records and/or are
    /// scanning `platform`.
    pub fn active(&self, read_at_least: Option<usize>, platform: Option<&str>) -> Vec<String> {
        let mut actives: Vec<(u64, String)> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state == ActivityState::Active)
            .filter(|(_, s)| read_at_least.is_none_or(|n| s.vulns_read >= n))
            .filter(|(_, s)| platform.is_none_or(|p| s.platform == p))
            .map(|(id, s)| (s.seq, id.clone()))
            .collect();
        actives.sort();

        actives.into_iter().map(|(_, id)| id).collect()
    }

    /// Ids of sessions (queued and active alike) whose owner has not been
    /// heard from for `timeout_seconds` or longer, in admission order.
    pub fn timed_out(&self, timeout_seconds: u64) -> Vec<String> {
        let now = Utc::now();
        let timeout = Duration::seconds(timeout_seconds as i64);

        let mut expired: Vec<(u64, String)> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.last_heard_from + timeout <= now)
            .map(|(id, s)| (s.seq, id.clone()))
            .collect();
        expired.sort();

        expired.into_iter().map(|(_, id)| id).collect()
    }

    /// Remove a session. Returns `false` if it was not present.
    pub fn terminate(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Snapshot the registry for persistence.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let sessions = self
            .sessions
            .iter()
            .map(|(id, s)| {
                let record = SessionRecord {
                    platform: s.platform.clone(),
                    state: match s.state {
                        ActivityState::Queued => SessionActivity::Queued,
                        ActivityState::Active => SessionActivity::Active,
                    },
                    created_at: s.created_at,
                    last_heard_from: s.last_heard_from,
                    vulnerabilities_read: s.vulns_read as u64,
                };
                (id.clone(), record)
            })
            .collect();

        RegistrySnapshot {
            max_active_sessions: self.max_active_sessions,
            max_queued_sessions: self.max_queued_sessions,
            sessions,
        }
    }

    /// Rebuild a registry from a snapshot. Admission order is reconstructed
    /// from `created_at` (ties broken by id) so activation FIFO survives a
    /// restart. Sessions that exceed the persisted bounds are dropped.
    pub fn restore(snapshot: RegistrySnapshot) -> Self {
        let mut registry = Self::new(snapshot.max_active_sessions, snapshot.max_queued_sessions);

        let mut records: Vec<(String, SessionRecord)> = snapshot.sessions.into_iter().collect();
        records.sort_by(|(id_a, a), (id_b, b)| {
            a.created_at.cmp(&b.created_at).then_with(|| id_a.cmp(id_b))
        });

        for (id, record) in records {
            let state = match record.state {
                SessionActivity::Queued => ActivityState::Queued,
                SessionActivity::Active => ActivityState::Active,
            };
            let at_bound = match state {
                ActivityState::Queued => registry.queued_count() >= registry.max_queued_sessions,
                ActivityState::Active => registry.active_count() >= registry.max_active_sessions,
            };
            if at_bound {
                warn!(session = %id, "persisted session exceeds registry bounds, dropping");
                continue;
            }
            let seq = registry.next_seq;
            registry.sessions.insert(
                id,
                Session {
                    platform: record.platform,
                    state,
                    created_at: record.created_at,
                    last_heard_from: record.last_heard_from,
                    vulns_read: record.vulnerabilities_read as usize,
                    seq,
                },
            );
            registry.next_seq += 1;
        }

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_rejects_duplicates_and_overflow() {
        let mut registry = SessionRegistry::new(1, 3);

        assert!(registry.queue("test1", "ubuntu:18.04"));
        assert!(!registry.queue("test1", "ubuntu:18.04"));
        assert!(registry.queue("test2", "ubuntu:18.04"));
        assert!(registry.queue("test3", "ubuntu:18.04"));
        assert!(!registry.queue("test4", "ubuntu:18.04"));
    }

    #[test]
    fn rejected_admission_leaves_registry_unchanged() {
        let mut registry = SessionRegistry::new(1, 1);

        assert!(registry.queue("test1", "ubuntu:18.04"));
        let before = registry.lookup("test1").expect("session");

        assert!(!registry.queue("test1", "alpine:3.4"));
        assert!(!registry.queue("test2", "ubuntu:18.04"));

        let after = registry.lookup("test1").expect("session");
        assert_eq!(after.platform, before.platform);
        assert_eq!(after.vulns_read, before.vulns_read);
        assert_eq!(registry.queued_count(), 1);
        assert!(registry.lookup("test2").is_none());
    }

    #[test]
    fn notify_activity_requires_a_known_session() {
        let mut registry = SessionRegistry::new(1, 3);

        registry.queue("test1", "ubuntu:18.04");

        assert!(registry.notify_activity("test1", 0));
        assert!(!registry.notify_activity("test2", 0));
    }

    #[test]
    fn notify_activity_is_monotone() {
        let mut registry = SessionRegistry::new(1, 3);
        registry.queue("test1", "ubuntu:18.04");

        let before = registry.lookup("test1").expect("session");
        registry.notify_activity("test1", 5);
        registry.notify_activity("test1", 0);
        registry.notify_activity("test1", 3);
        let after = registry.lookup("test1").expect("session");

        assert_eq!(after.vulns_read, 8);
        assert!(after.last_heard_from >= before.last_heard_from);
    }

    #[test]
    fn activation_is_fifo_and_bounded() {
        let mut registry = SessionRegistry::new(1, 3);

        registry.queue("test1", "ubuntu:18.04");
        registry.queue("test2", "ubuntu:18.04");

        assert_eq!(registry.activate_sessions(None), ["test1"]);
        assert!(registry.activate_sessions(None).is_empty());

        registry.terminate("test1");
        registry.queue("test1", "alpine:3.4");

        assert_eq!(registry.activate_sessions(None), ["test2"]);
    }

    #[test]
    fn activation_respects_an_explicit_max() {
        let mut registry = SessionRegistry::new(10, 10);

        for id in ["a", "b", "c"] {
            registry.queue(id, "ubuntu:18.04");
        }

        assert_eq!(registry.activate_sessions(Some(2)), ["a", "b"]);
        assert_eq!(registry.activate_sessions(Some(2)), ["c"]);
    }

    #[test]
    fn active_bound_holds_at_every_observation() {
        let mut registry = SessionRegistry::new(2, 8);

        for id in ["a", "b", "c", "d", "e"] {
            registry.queue(id, "ubuntu:18.04");
            registry.activate_sessions(None);
            assert!(registry.active_count() <= 2);
            assert!(registry.queued_count() <= 8);
        }
    }

    #[test]
    fn active_filters_by_progress_and_platform() {
        let mut registry = SessionRegistry::new(4, 8);

        registry.queue("u1", "ubuntu:18.04");
        registry.queue("u2", "ubuntu:18.04");
        registry.queue("a1", "alpine:3.4");
        registry.activate_sessions(None);

        registry.notify_activity("u2", 10);

        assert_eq!(registry.active(None, None), ["u1", "u2", "a1"]);
        assert_eq!(registry.active(None, Some("ubuntu:18.04")), ["u1", "u2"]);
        assert_eq!(registry.active(Some(10), None), ["u2"]);
        assert_eq!(registry.active(Some(10), Some("alpine:3.4")), Vec::<String>::new());
        assert_eq!(registry.active(Some(0), Some("alpine:3.4")), ["a1"]);
    }

    #[test]
    fn timed_out_applies_to_queued_and_active() {
        let mut registry = SessionRegistry::new(1, 3);

        registry.queue("test1", "ubuntu:18.04");
        registry.queue("test2", "ubuntu:18.04");
        registry.activate_sessions(None);

        // With a zero-second timeout every session has already expired.
        assert_eq!(registry.timed_out(0), ["test1", "test2"]);
        // With a generous timeout nothing has.
        assert!(registry.timed_out(3600).is_empty());
    }

    #[test]
    fn terminate_removes_the_session() {
        let mut registry = SessionRegistry::new(1, 3);

        registry.queue("test1", "ubuntu:18.04");

        assert!(registry.terminate("test1"));
        assert!(!registry.terminate("test2"));
        assert!(registry.lookup("test1").is_none());
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let mut registry = SessionRegistry::new(2, 8);
        registry.queue("first", "ubuntu:18.04");
        registry.queue("second", "alpine:3.4");
        registry.activate_sessions(Some(1));
        registry.notify_activity("first", 17);

        let restored = SessionRegistry::restore(registry.snapshot());

        assert_eq!(restored.max_active_sessions(), 2);
        assert_eq!(restored.max_queued_sessions(), 8);

        let first = restored.lookup("first").expect("session");
        assert_eq!(first.state, ActivityState::Active);
        assert_eq!(first.vulns_read, 17);
        assert_eq!(first.platform, "ubuntu:18.04");

        let second = restored.lookup("second").expect("session");
        assert_eq!(second.state, ActivityState::Queued);

        // Activation FIFO survives the round trip.
        let mut again = restored;
        assert_eq!(again.activate_sessions(None), ["second"]);
    }

    #[test]
    fn restore_drops_sessions_beyond_bounds() {
        let mut registry = SessionRegistry::new(8, 1);
        registry.queue("first", "ubuntu:18.04");

        let mut snapshot = registry.snapshot();
        let extra = snapshot.sessions["first"].clone();
        snapshot.sessions.insert("second".to_string(), extra);

        let restored = SessionRegistry::restore(snapshot);
        assert_eq!(restored.queued_count(), 1);
    }
}
