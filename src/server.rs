//! Server state orchestrator.
//!
//! Composes the session registry, the bucketed cache, and the per-platform
//! vulnerability sources under a single coordination lock, and advances that
//! joint state machine on every request via [`ServerState::update`].

use std::{
    collections::{BTreeSet, HashMap},
    fmt::Write,
};

use data_connector::StateSnapshot;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    cache::Cache,
    config::StateConfig,
    session_registry::{ActivityState, SessionRegistry},
    sources::{self, SourceConfigs, VulnSource},
    vulnerability::Vulnerability,
};

/// State shared between requests.
///
/// All mutation happens through the three entry points, each of which holds
/// the coordination lock for the duration of its work. The registry, the
/// cache, and the source map are not synchronized on their own.
pub struct ServerState {
    inner: Mutex<StateInner>,
}

struct StateInner {
    sessions: SessionRegistry,
    cache: Cache,
    source_configs: SourceConfigs,
    active_sources: HashMap<String, Box<dyn VulnSource>>,
    max_vulns_to_serve: usize,
    session_timeout_seconds: u64,
    http: reqwest::Client,
}

impl ServerState {
    /// Build the orchestrator from its configuration and the shared
    /// upstream HTTP client.
    pub fn configure(config: StateConfig, http: reqwest::Client) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                sessions: SessionRegistry::new(
                    config.max_active_sessions,
                    config.max_queued_sessions,
                ),
                cache: Cache::new(),
                source_configs: config.sources,
                active_sources: HashMap::new(),
                max_vulns_to_serve: config.max_vulns_to_serve,
                session_timeout_seconds: config.session_timeout_seconds,
                http,
            }),
        }
    }

    /// Create and queue a new session for a scanner on `platform`.
    ///
    /// Returns the fresh session id, or `None` when the platform is
    /// unsupported or the queue has no room.
    pub async fn queue_session(&self, platform: &str) -> Option<String> {
        if !sources::is_supported(platform) {
            return None;
        }

        let session_id = generate_id();

        let mut inner = self.inner.lock().await;
        if !inner.sessions.queue(&session_id, platform) {
            return None;
        }

        debug!(session = %session_id, platform = %platform, "queued session");
        Some(session_id)
    }

    /// Retrieve the next batch of vulnerabilities for a session.
    ///
    /// Returns `None` when the session is unknown or not yet active. An
    /// empty batch means the scanner has caught up with the feed.
    pub async fn retrieve_vulns(&self, session_id: &str) -> Option<Vec<Vulnerability>> {
        let mut inner = self.inner.lock().await;

        let session = inner.sessions.lookup(session_id)?;
        if session.state != ActivityState::Active {
            return None;
        }

        let batch = inner.cache.retrieve(
            &session.platform,
            session.vulns_read,
            Some(inner.max_vulns_to_serve),
        );

        match batch {
            None => {
                // No bucket yet for this platform; touch the session so it
                // does not expire while it waits.
                inner.sessions.notify_activity(session_id, 0);
                None
            }
            Some(vulns) => {
                inner.sessions.notify_activity(session_id, vulns.len());
                Some(vulns)
            }
        }
    }

    /// The housekeeping tick, run before every request is served:
    /// expire stale sessions, bootstrap activation and caches when the
    /// server is idle, and advance each platform whose readers have all
    /// caught up.
    pub async fn update(&self) {
        let mut inner = self.inner.lock().await;

        inner.expire_timed_out();

        if inner.sessions.active_count() == 0 {
            inner.bootstrap().await;
        }

        inner.advance().await;
    }

    /// Snapshot the registry and cache for persistence.
    pub async fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().await;
        StateSnapshot {
            registry: inner.sessions.snapshot(),
            cache: inner.cache.snapshot(),
        }
    }

    /// Rehydrate the registry and cache from a persisted snapshot.
    ///
    /// Restored sessions have no live source; once they drain what is
    /// resident, the next tick retires their platform as exhausted.
    pub async fn restore(&self, snapshot: StateSnapshot) {
        let mut inner = self.inner.lock().await;

        inner.sessions = SessionRegistry::restore(snapshot.registry);
        let mut cache = Cache::new();
        cache.restore(snapshot.cache);
        inner.cache = cache;

        info!(
            active = inner.sessions.active_count(),
            queued = inner.sessions.queued_count(),
            "rehydrated server state"
        );
    }

    pub async fn active_session_count(&self) -> usize {
        self.inner.lock().await.sessions.active_count()
    }

    pub async fn queued_session_count(&self) -> usize {
        self.inner.lock().await.sessions.queued_count()
    }
}

impl StateInner {
    fn expire_timed_out(&mut self) {
        for session_id in self.sessions.timed_out(self.session_timeout_seconds) {
            info!(session = %session_id, "terminating timed out session");
            self.sessions.terminate(&session_id);
        }
    }

    /// Distinct platforms among currently active sessions.
    fn active_platforms(&self) -> BTreeSet<String> {
        self.sessions
            .active(None, None)
            .iter()
            .filter_map(|id| self.sessions.lookup(id))
            .map(|s| s.platform)
            .collect()
    }

    /// Promote queued sessions and build a fresh source + bucket for each
    /// platform they are scanning. Only called when nothing is active.
    async fn bootstrap(&mut self) {
        let activated = self.sessions.activate_sessions(None);
        if activated.is_empty() {
            return;
        }

        let platforms: BTreeSet<String> = activated
            .iter()
            .filter_map(|id| self.sessions.lookup(id))
            .map(|s| s.platform)
            .collect();

        for platform in platforms {
            self.cache.remove_bucket(&platform);

            match sources::create(&platform, &self.source_configs, &self.http) {
                Some(source) => {
                    self.active_sources.insert(platform.clone(), source);
                    let vulns = self.load_vulns(&platform).await;
                    info!(
                        platform = %platform,
                        count = vulns.len(),
                        "initialized cache bucket"
                    );
                    self.cache.cache(&platform, vulns);
                }
                None => {
                    self.active_sources.remove(&platform);
                    warn!(platform = %platform, "no source available for platform");
                }
            }
        }
    }

    /// For each platform whose active sessions have all consumed the full
    /// set so far, pull the next batch from its source, or retire the
    /// platform when the source is exhausted.
    async fn advance(&mut self) {
        for platform in self.active_platforms() {
            let cache_size = self.cache.size(&platform);
            if cache_size == 0 {
                continue;
            }

            let complete = self.sessions.active(Some(cache_size), Some(&platform));
            let actives = self.sessions.active(None, Some(&platform));
            if complete.is_empty() || complete.len() != actives.len() {
                continue;
            }

            let vulns = self.load_vulns(&platform).await;
            if !vulns.is_empty() {
                debug!(platform = %platform, count = vulns.len(), "advanced cache bucket");
                self.cache.cache(&platform, vulns);
            } else {
                info!(
                    platform = %platform,
                    sessions = complete.len(),
                    "source exhausted, retiring platform"
                );
                self.cache.remove_bucket(&platform);
                self.active_sources.remove(&platform);
                for session_id in complete {
                    self.sessions.terminate(&session_id);
                }
            }
        }
    }

    /// Pull up to `max_vulns_to_serve` records from a platform's live
    /// source. A platform without a live source produces nothing, which the
    /// caller treats the same as an exhausted source.
    async fn load_vulns(&mut self, platform: &str) -> Vec<Vulnerability> {
        let Some(source) = self.active_sources.get_mut(platform) else {
            return Vec::new();
        };

        let mut vulns = Vec::new();
        while vulns.len() < self.max_vulns_to_serve {
            match source.next().await {
                Some(vuln) => vulns.push(vuln),
                None => break,
            }
        }

        vulns
    }
}

/// Generate a 128-bit random hex session id.
fn generate_id() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);

    let mut id = String::with_capacity(32);
    for b in &bytes {
        // Writing to a String is infallible; discard the always-Ok result.
        let _ = write!(id, "{b:02x}");
    }
    id
}
