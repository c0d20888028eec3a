//! Vulnerability data model shared by the cache, the sources, and the
//! HTTP transport.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Severity of a vulnerability, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Negligible,
    Low,
    Medium,
    High,
    Urgent,
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Severity::Unknown => "unknown",
            Severity::Negligible => "negligible",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Urgent => "urgent",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// A package version that fixes a vulnerability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// An immutable vulnerability record served to scanners.
///
/// Identity is the `(name, platform)` pair; link, severity, and the fixed-in
/// list are payload and do not participate in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub name: String,
    pub platform: String,
    pub link: String,
    pub severity: Severity,
    #[serde(rename = "fixedIn")]
    pub fixed_in: Vec<Package>,
}

impl Vulnerability {
    pub fn new(
        name: impl Into<String>,
        platform: impl Into<String>,
        link: impl Into<String>,
        severity: Severity,
        fixed_in: Vec<Package>,
    ) -> Self {
        Self {
            name: name.into(),
            platform: platform.into(),
            link: link.into(),
            severity,
            fixed_in,
        }
    }
}

impl PartialEq for Vulnerability {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.platform == other.platform
    }
}

impl Eq for Vulnerability {}
