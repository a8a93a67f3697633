//! Reconnaissance Engine (Scout).
//!
//! Probes the live host read-only and produces a `HostProfile`. Probes run
//! concurrently, each under its own timeout. A probe that fails or times out
//! leaves its facts unknown and adds a `DegradedFact`; Scout itself never
//! fails. Missing tools and paths are facts, not errors.

pub mod hint;
pub mod probes;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

pub use hint::RequestHint;
pub use probes::{DisplayProbe, MountsProbe, OsProbe, PathsProbe, ServicesProbe, ToolsProbe};

/// Distribution family, from `ID` / `ID_LIKE` in os-release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Debian,
    Redhat,
    Arch,
    Suse,
    Alpine,
    Gentoo,
    Other,
    #[default]
    Unknown,
}

impl OsFamily {
    /// Classify from os-release `ID` and `ID_LIKE` values.
    pub fn from_ids(id: &str, id_like: &str) -> Self {
        let ids: Vec<String> = std::iter::once(id)
            .chain(id_like.split_whitespace())
            .map(|s| s.trim_matches('"').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if ids.is_empty() {
            return OsFamily::Unknown;
        }
        let any = |names: &[&str]| ids.iter().any(|id| names.contains(&id.as_str()));
        if any(&["debian", "ubuntu", "linuxmint", "pop", "raspbian", "kali", "elementary"]) {
            OsFamily::Debian
        } else if any(&["rhel", "fedora", "centos", "rocky", "almalinux", "ol", "amzn"]) {
            OsFamily::Redhat
        } else if any(&["arch", "manjaro", "endeavouros", "garuda"]) {
            OsFamily::Arch
        } else if any(&["suse", "opensuse", "opensuse-leap", "opensuse-tumbleweed", "sles"]) {
            OsFamily::Suse
        } else if any(&["alpine"]) {
            OsFamily::Alpine
        } else if any(&["gentoo"]) {
            OsFamily::Gentoo
        } else {
            OsFamily::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Debian => "debian",
            OsFamily::Redhat => "redhat",
            OsFamily::Arch => "arch",
            OsFamily::Suse => "suse",
            OsFamily::Alpine => "alpine",
            OsFamily::Gentoo => "gentoo",
            OsFamily::Other => "other",
            OsFamily::Unknown => "unknown",
        }
    }

    /// Native package manager command, when the family implies one
    pub fn package_manager(&self) -> Option<&'static str> {
        match self {
            OsFamily::Debian => Some("apt"),
            OsFamily::Redhat => Some("dnf"),
            OsFamily::Arch => Some("pacman"),
            OsFamily::Suse => Some("zypper"),
            OsFamily::Alpine => Some("apk"),
            OsFamily::Gentoo => Some("emerge"),
            OsFamily::Other | OsFamily::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayServer {
    X11,
    Wayland,
    None,
    #[default]
    Unknown,
}

impl DisplayServer {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayServer::X11 => "x11",
            DisplayServer::Wayland => "wayland",
            DisplayServer::None => "none",
            DisplayServer::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
}

/// State of the ports, processes, containers and hosts a request names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFacts {
    /// Port -> something is listening on it (TCP, v4 or v6)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<u16, bool>,
    /// Pid -> process name, `None` when no such process
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub processes: BTreeMap<u32, Option<String>>,
    /// Container -> status line from the runtime, `None` when not found
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, Option<String>>,
    /// Address -> loopback, private, link-local or public
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ips: BTreeMap<Ipv4Addr, String>,
    /// Domain -> resolved addresses; empty when it does not resolve
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub domains: BTreeMap<String, Vec<String>>,
}

impl ServiceFacts {
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
            && self.processes.is_empty()
            && self.containers.is_empty()
            && self.ips.is_empty()
            && self.domains.is_empty()
    }

    fn merge(&mut self, other: ServiceFacts) {
        for (port, listening) in other.ports {
            *self.ports.entry(port).or_insert(false) |= listening;
        }
        for (pid, name) in other.processes {
            let slot = self.processes.entry(pid).or_insert(None);
            if name.is_some() {
                *slot = name;
            }
        }
        for (container, status) in other.containers {
            let slot = self.containers.entry(container).or_insert(None);
            if status.is_some() {
                *slot = status;
            }
        }
        self.ips.extend(other.ips);
        self.domains.extend(other.domains);
    }

    fn summary_lines(&self, lines: &mut Vec<String>) {
        for (port, listening) in &self.ports {
            lines.push(format!(
                "Port {}: {}",
                port,
                if *listening { "listening" } else { "nothing listening" }
            ));
        }
        for (pid, name) in &self.processes {
            match name {
                Some(name) => lines.push(format!("Process {}: {}", pid, name)),
                None => lines.push(format!("Process {}: not running", pid)),
            }
        }
        for (container, status) in &self.containers {
            match status {
                Some(status) => lines.push(format!("Container {}: {}", container, status)),
                None => lines.push(format!("Container {}: not found", container)),
            }
        }
        for (ip, scope) in &self.ips {
            lines.push(format!("Address {}: {}", ip, scope));
        }
        for (domain, addrs) in &self.domains {
            if addrs.is_empty() {
                lines.push(format!("Host {}: does not resolve", domain));
            } else {
                lines.push(format!("Host {}: {}", domain, addrs.join(", ")));
            }
        }
    }
}

/// A fact that could not be determined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedFact {
    pub probe: String,
    pub reason: String,
}

/// Facts reported by a single probe. Unset fields mean "not this probe's concern".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeFacts {
    pub os_family: Option<OsFamily>,
    pub os_name: Option<String>,
    pub display_server: Option<DisplayServer>,
    pub installed_tools: BTreeSet<String>,
    pub missing_tools: BTreeSet<String>,
    pub probed_paths: BTreeMap<String, bool>,
    pub mounts: Vec<MountPoint>,
    pub services: ServiceFacts,
}

/// Host facts for one request. Built once, read-only, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProfile {
    pub os_family: OsFamily,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    pub display_server: DisplayServer,
    pub installed_tools: BTreeSet<String>,
    pub missing_tools: BTreeSet<String>,
    pub probed_paths: BTreeMap<String, bool>,
    pub mounts: Vec<MountPoint>,
    #[serde(default, skip_serializing_if = "ServiceFacts::is_empty")]
    pub services: ServiceFacts,
    pub degraded: Vec<DegradedFact>,
}

impl HostProfile {
    fn merge(&mut self, facts: ProbeFacts) {
        if let Some(family) = facts.os_family {
            self.os_family = family;
        }
        if facts.os_name.is_some() {
            self.os_name = facts.os_name;
        }
        if let Some(display) = facts.display_server {
            self.display_server = display;
        }
        self.installed_tools.extend(facts.installed_tools);
        self.missing_tools.extend(facts.missing_tools);
        // installed wins if two probes disagree
        let installed = &self.installed_tools;
        self.missing_tools.retain(|t| !installed.contains(t));
        for (path, exists) in facts.probed_paths {
            let slot = self.probed_paths.entry(path).or_insert(false);
            *slot |= exists;
        }
        self.mounts.extend(facts.mounts);
        self.services.merge(facts.services);
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.installed_tools.contains(tool)
    }

    /// `Some(true/false)` if probed, `None` if never looked at
    pub fn path_exists(&self, path: &str) -> Option<bool> {
        self.probed_paths.get(path).copied()
    }

    pub fn is_degraded(&self, probe: &str) -> bool {
        self.degraded.iter().any(|d| d.probe == probe)
    }

    /// Compact fact sheet for the generation prompt.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        let os = match &self.os_name {
            Some(name) => format!("{} ({})", name, self.os_family.as_str()),
            None => self.os_family.as_str().to_string(),
        };
        lines.push(format!("OS: {}", os));
        if let Some(pm) = self.os_family.package_manager() {
            lines.push(format!("Package manager: {}", pm));
        }
        lines.push(format!("Display server: {}", self.display_server.as_str()));
        if !self.installed_tools.is_empty() {
            lines.push(format!(
                "Installed tools: {}",
                self.installed_tools.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        if !self.missing_tools.is_empty() {
            lines.push(format!(
                "NOT installed: {}",
                self.missing_tools.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        for (path, exists) in &self.probed_paths {
            lines.push(format!(
                "Path {}: {}",
                path,
                if *exists { "exists" } else { "does not exist" }
            ));
        }
        for mount in &self.mounts {
            lines.push(format!(
                "Mounted: {} on {} ({})",
                mount.device, mount.mount_point, mount.fs_type
            ));
        }
        self.services.summary_lines(&mut lines);
        for fact in &self.degraded {
            lines.push(format!("Unknown ({} probe failed: {})", fact.probe, fact.reason));
        }
        lines.join("\n")
    }
}

/// One read-only host probe.
#[async_trait]
pub trait HostProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn probe(&self, hint: &RequestHint) -> Result<ProbeFacts, String>;
}

/// Runs every probe concurrently and merges the results.
#[derive(Clone)]
pub struct Scout {
    probes: Vec<Arc<dyn HostProbe>>,
    probe_timeout: Duration,
}

impl Scout {
    pub fn new(probes: Vec<Arc<dyn HostProbe>>, probe_timeout: Duration) -> Self {
        Self {
            probes,
            probe_timeout,
        }
    }

    /// The built-in probe set: os, display, tools, paths, mounts, services.
    pub fn builtin(probe_timeout: Duration) -> Self {
        Self::new(
            vec![
                Arc::new(OsProbe::default()),
                Arc::new(DisplayProbe::from_env()),
                Arc::new(ToolsProbe::from_env()),
                Arc::new(PathsProbe::from_env()),
                Arc::new(MountsProbe::from_env()),
                Arc::new(ServicesProbe::from_env()),
            ],
            probe_timeout,
        )
    }

    pub fn probe_names(&self) -> Vec<String> {
        self.probes.iter().map(|p| p.name().to_string()).collect()
    }

    /// Run all probes. Results are merged in probe order, so the profile
    /// does not depend on which probe finished first.
    pub async fn probe(&self, hint: &RequestHint) -> HostProfile {
        let hint = Arc::new(hint.clone());
        let mut set = JoinSet::new();

        for (index, probe) in self.probes.iter().enumerate() {
            let probe = Arc::clone(probe);
            let hint = Arc::clone(&hint);
            let limit = self.probe_timeout;
            set.spawn(async move {
                let name = probe.name().to_string();
                let result = match timeout(limit, probe.probe(&hint)).await {
                    Ok(result) => result,
                    Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
                };
                (index, name, result)
            });
        }

        let mut results = Vec::with_capacity(self.probes.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Probe task failed to join: {}", e),
            }
        }

        // A panicked probe never reports back; its facts stay unknown
        for (index, probe) in self.probes.iter().enumerate() {
            if !results.iter().any(|(i, _, _)| *i == index) {
                results.push((index, probe.name().to_string(), Err("probe task panicked".to_string())));
            }
        }
        results.sort_by_key(|(index, _, _)| *index);

        let mut profile = HostProfile::default();
        for (_, name, result) in results {
            match result {
                Ok(facts) => {
                    debug!(probe = %name, "probe ok");
                    profile.merge(facts);
                }
                Err(reason) => {
                    warn!(probe = %name, "Probe degraded: {}", reason);
                    profile.degraded.push(DegradedFact { probe: name, reason });
                }
            }
        }

        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_family_from_ids() {
        assert_eq!(OsFamily::from_ids("ubuntu", "debian"), OsFamily::Debian);
        assert_eq!(OsFamily::from_ids("rocky", "rhel centos fedora"), OsFamily::Redhat);
        assert_eq!(OsFamily::from_ids("manjaro", "arch"), OsFamily::Arch);
        assert_eq!(OsFamily::from_ids("\"opensuse-tumbleweed\"", ""), OsFamily::Suse);
        assert_eq!(OsFamily::from_ids("nixos", ""), OsFamily::Other);
        assert_eq!(OsFamily::from_ids("", ""), OsFamily::Unknown);
    }

    #[test]
    fn test_merge_installed_wins() {
        let mut profile = HostProfile::default();
        profile.merge(ProbeFacts {
            missing_tools: ["ffmpeg".to_string()].into(),
            ..Default::default()
        });
        profile.merge(ProbeFacts {
            installed_tools: ["ffmpeg".to_string()].into(),
            ..Default::default()
        });
        assert!(profile.has_tool("ffmpeg"));
        assert!(profile.missing_tools.is_empty());
    }

    #[test]
    fn test_summary_mentions_degraded_facts() {
        let profile = HostProfile {
            os_family: OsFamily::Debian,
            os_name: Some("Ubuntu 24.04 LTS".to_string()),
            degraded: vec![DegradedFact {
                probe: "mounts".to_string(),
                reason: "timed out after 2000ms".to_string(),
            }],
            ..Default::default()
        };
        let summary = profile.summary();
        assert!(summary.contains("Ubuntu 24.04 LTS (debian)"));
        assert!(summary.contains("Package manager: apt"));
        assert!(summary.contains("mounts probe failed"));
    }

    #[test]
    fn test_service_facts_merge_and_summary() {
        let mut profile = HostProfile::default();
        let mut first = ServiceFacts::default();
        first.ports.insert(8080, false);
        first.processes.insert(4242, None);
        let mut second = ServiceFacts::default();
        second.ports.insert(8080, true);
        second.domains.insert("example.invalid".to_string(), Vec::new());
        profile.merge(ProbeFacts {
            services: first,
            ..Default::default()
        });
        profile.merge(ProbeFacts {
            services: second,
            ..Default::default()
        });

        assert_eq!(profile.services.ports.get(&8080), Some(&true));
        let summary = profile.summary();
        assert!(summary.contains("Port 8080: listening"));
        assert!(summary.contains("Process 4242: not running"));
        assert!(summary.contains("Host example.invalid: does not resolve"));
    }
}
