//! Vulnerability sources.
//!
//! A source is a finite, lazy producer of vulnerability records for one
//! platform. Selection is by platform tag: each supported tag maps to a
//! source kind, and each kind has a strongly typed configuration section
//! plus a factory that builds the live producer.

mod clair;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use clair::ClairSourceConfig;
use clair::ClairSource;

use crate::vulnerability::{Package, Severity, Vulnerability};

/// A lazy, finite producer of vulnerability records.
///
/// `next` returns `None` once the sequence is exhausted; after that it keeps
/// returning `None`. Upstream failures never surface here: a source that
/// cannot make progress reports itself exhausted.
#[async_trait]
pub trait VulnSource: Send {
    async fn next(&mut self) -> Option<Vulnerability>;
}

/// The kinds of source this server can construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Clair,
    Testing,
}

/// Platform tag reserved for the deterministic testing source.
pub const TESTING_PLATFORM: &str = "__testing_stub__";

const CLAIR_PLATFORMS: &[&str] = &["ubuntu:18.04", "alpine:3.4", "debian:unstable"];

/// Configuration for the testing stub: how many copies of the fixed record
/// to emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestingSourceConfig {
    pub vulns: usize,
}

/// One typed section per source kind. Kinds without a section cannot be
/// constructed, even for platforms that map to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfigs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clair: Option<ClairSourceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testing: Option<TestingSourceConfig>,
}

impl SourceConfigs {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(clair) = &self.clair {
            clair.validate()?;
        }
        Ok(())
    }
}

/// The source kind serving a platform, if the platform is supported.
pub fn kind_for_platform(platform: &str) -> Option<SourceKind> {
    if platform == TESTING_PLATFORM {
        return Some(SourceKind::Testing);
    }
    CLAIR_PLATFORMS
        .contains(&platform)
        .then_some(SourceKind::Clair)
}

/// Whether any source can serve vulnerabilities for this platform.
pub fn is_supported(platform: &str) -> bool {
    kind_for_platform(platform).is_some()
}

/// Construct a live source for a platform. Returns `None` when the platform
/// is unsupported or its kind has no configuration section.
pub fn create(
    platform: &str,
    configs: &SourceConfigs,
    http: &reqwest::Client,
) -> Option<Box<dyn VulnSource>> {
    match kind_for_platform(platform)? {
        SourceKind::Clair => {
            let config = configs.clair.as_ref()?;
            Some(Box::new(ClairSource::new(
                http.clone(),
                config.clone(),
                platform,
            )))
        }
        SourceKind::Testing => {
            let config = configs.testing.as_ref()?;
            Some(Box::new(StubSource::new(config.vulns)))
        }
    }
}

/// Emits one fixed record a configured number of times. Used by integration
/// tests that need a deterministic feed.
struct StubSource {
    vuln: Vulnerability,
    remaining: usize,
}

impl StubSource {
    fn new(vulns: usize) -> Self {
        Self {
            vuln: Vulnerability::new(
                "testvuln",
                TESTING_PLATFORM,
                "",
                Severity::Low,
                vec![Package::new("testpackage", "1.2.3")],
            ),
            remaining: vulns,
        }
    }
}

#[async_trait]
impl VulnSource for StubSource {
    async fn next(&mut self) -> Option<Vulnerability> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.vuln.clone())
    }
}
