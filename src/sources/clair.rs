//! Source backed by version 1 of the Clair vulnerability API.
//!
//! Iterates paged summary listings for a platform's namespace, then fetches
//! the detailed description of each listed vulnerability. Descriptions
//! missing a required field are dropped; a failed page fetch exhausts the
//! source.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::VulnSource;
use crate::vulnerability::{Package, Severity, Vulnerability};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClairSourceConfig {
    /// Base url pointing at a Clair instance, e.g. `http://127.0.0.1:6060`.
    pub base_address: String,
    /// Maximum number of summaries to request per page.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

fn default_fetch_limit() -> usize {
    128
}

impl ClairSourceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_address.trim().is_empty() {
            return Err("clair baseAddress should not be empty".to_string());
        }
        if self.fetch_limit == 0 {
            return Err("clair fetchLimit must be greater than 0".to_string());
        }
        Ok(())
    }
}

pub(super) struct ClairSource {
    http: reqwest::Client,
    config: ClairSourceConfig,
    platform: String,
    buffered: VecDeque<Vulnerability>,
    next_page: Option<String>,
    done: bool,
}

impl ClairSource {
    pub(super) fn new(http: reqwest::Client, config: ClairSourceConfig, platform: &str) -> Self {
        Self {
            http,
            config,
            platform: platform.to_string(),
            buffered: VecDeque::new(),
            next_page: None,
            done: false,
        }
    }

    /// Fetch one page of summaries and buffer the decoded descriptions.
    /// A page-level failure exhausts the source; a failed or malformed
    /// description only drops that record.
    async fn fetch_page(&mut self) {
        let url = summaries_url(
            &self.config.base_address,
            &self.platform,
            self.config.fetch_limit,
            self.next_page.as_deref(),
        );

        let page = match self.fetch_json::<SummaryPage>(&url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(platform = %self.platform, error = %e, "clair summary fetch failed");
                self.done = true;
                return;
            }
        };

        self.next_page = page.next_page.filter(|p| !p.is_empty());
        if self.next_page.is_none() {
            self.done = true;
        }

        debug!(
            platform = %self.platform,
            summaries = page.vulnerabilities.len(),
            "fetched clair summary page"
        );

        for summary in page.vulnerabilities {
            let url = description_url(&self.config.base_address, &self.platform, &summary.name);
            match self.fetch_json::<VulnDescription>(&url).await {
                Ok(description) => {
                    if let Some(vuln) = description.into_vulnerability(&self.platform) {
                        self.buffered.push_back(vuln);
                    } else {
                        warn!(
                            platform = %self.platform,
                            vulnerability = %summary.name,
                            "dropping description with missing fields"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        platform = %self.platform,
                        vulnerability = %summary.name,
                        error = %e,
                        "clair description fetch failed, skipping record"
                    );
                }
            }
        }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> reqwest::Result<T> {
        self.http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await
    }
}

#[async_trait]
impl VulnSource for ClairSource {
    async fn next(&mut self) -> Option<Vulnerability> {
        loop {
            if let Some(vuln) = self.buffered.pop_front() {
                return Some(vuln);
            }
            if self.done {
                return None;
            }
            self.fetch_page().await;
        }
    }
}

fn summaries_url(base: &str, platform: &str, limit: usize, page: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    match page {
        None => format!("{base}/v1/namespaces/{platform}/vulnerabilities?limit={limit}"),
        Some(page) => {
            format!("{base}/v1/namespaces/{platform}/vulnerabilities?limit={limit}&page={page}")
        }
    }
}

fn description_url(base: &str, platform: &str, vuln_name: &str) -> String {
    let base = base.trim_end_matches('/');
    format!("{base}/v1/namespaces/{platform}/vulnerabilities/{vuln_name}?fixedIn")
}

// ---- Wire types ----

#[derive(Debug, Deserialize)]
struct SummaryPage {
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Vec<VulnSummary>,
    #[serde(rename = "NextPage")]
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VulnSummary {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct VulnDescription {
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Link")]
    link: Option<String>,
    #[serde(rename = "Severity")]
    severity: Option<String>,
    #[serde(rename = "FixedIn")]
    fixed_in: Option<Vec<FixedInEntry>>,
}

#[derive(Debug, Deserialize)]
struct FixedInEntry {
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Version")]
    version: Option<String>,
}

impl VulnDescription {
    /// Convert into the internal record. Any missing top-level field drops
    /// the whole record; a fixed-in entry missing a field drops only that
    /// entry.
    fn into_vulnerability(self, platform: &str) -> Option<Vulnerability> {
        let name = self.name?;
        let link = self.link?;
        let severity = decode_severity(&self.severity?);
        let fixed_in = self
            .fixed_in?
            .into_iter()
            .filter_map(|fix| Some(Package::new(fix.name?, fix.version?)))
            .collect();

        Some(Vulnerability::new(name, platform, link, severity, fixed_in))
    }
}

fn decode_severity(name: &str) -> Severity {
    match name {
        "Unknown" => Severity::Unknown,
        "Negligible" => Severity::Negligible,
        "Low" => Severity::Low,
        "Medium" => Severity::Medium,
        "High" => Severity::High,
        "Urgent" => Severity::Urgent,
        "Defcon" => Severity::Critical,
        _ => Severity::Unknown,
    }
}
