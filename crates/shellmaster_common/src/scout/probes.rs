//! Built-in probes. All read-only; filesystem work runs on the blocking pool.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use sysinfo::{Pid, System};
use tokio::process::Command;
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use super::hint::RequestHint;
use super::{DisplayServer, HostProbe, MountPoint, OsFamily, ProbeFacts, ServiceFacts};

/// Tools always checked, whatever the request says
pub const BASELINE_TOOLS: &[&str] = &[
    "apt", "dnf", "yum", "pacman", "zypper", "apk", "systemctl", "sudo", "git", "curl", "wget",
    "python3", "ffmpeg", "docker", "rsync", "tar", "unzip", "jq", "lsblk", "findmnt", "df",
];

/// Filesystems that never hold user data
const PSEUDO_FS: &[&str] = &[
    "proc", "sysfs", "devtmpfs", "devpts", "tmpfs", "cgroup", "cgroup2", "securityfs",
    "pstore", "bpf", "debugfs", "tracefs", "mqueue", "hugetlbfs", "configfs", "fusectl",
    "autofs", "binfmt_misc", "efivarfs", "overlay", "nsfs", "ramfs", "rpc_pipefs", "squashfs",
];

async fn blocking<T, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T, String> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| format!("probe task failed: {}", e))?
}

// ============================================================================
// OS
// ============================================================================

/// Distribution from os-release, sysinfo as fallback.
pub struct OsProbe {
    pub os_release_paths: Vec<PathBuf>,
}

impl Default for OsProbe {
    fn default() -> Self {
        Self {
            os_release_paths: vec![
                PathBuf::from("/etc/os-release"),
                PathBuf::from("/usr/lib/os-release"),
            ],
        }
    }
}

impl OsProbe {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            os_release_paths: vec![path.into()],
        }
    }
}

/// Parse os-release `KEY=value` lines.
pub fn parse_os_release(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| {
            (
                k.trim().to_string(),
                v.trim().trim_matches('"').trim_matches('\'').to_string(),
            )
        })
        .collect()
}

#[async_trait]
impl HostProbe for OsProbe {
    fn name(&self) -> &str {
        "os"
    }

    async fn probe(&self, _hint: &RequestHint) -> Result<ProbeFacts, String> {
        let paths = self.os_release_paths.clone();
        blocking(move || {
            for path in &paths {
                if let Ok(content) = fs::read_to_string(path) {
                    let fields = parse_os_release(&content);
                    let id = fields.get("ID").map(String::as_str).unwrap_or("");
                    let id_like = fields.get("ID_LIKE").map(String::as_str).unwrap_or("");
                    let name = fields
                        .get("PRETTY_NAME")
                        .or_else(|| fields.get("NAME"))
                        .cloned();
                    return Ok(ProbeFacts {
                        os_family: Some(OsFamily::from_ids(id, id_like)),
                        os_name: name,
                        ..Default::default()
                    });
                }
            }

            let id = System::distribution_id();
            if id.is_empty() || id == "unknown" {
                return Err("no readable os-release file".to_string());
            }
            Ok(ProbeFacts {
                os_family: Some(OsFamily::from_ids(&id, "")),
                os_name: System::long_os_version(),
                ..Default::default()
            })
        })
        .await
    }
}

// ============================================================================
// Display server
// ============================================================================

/// Display server from the session environment.
pub struct DisplayProbe {
    vars: BTreeMap<String, String>,
}

impl DisplayProbe {
    const VARS: [&'static str; 3] = ["XDG_SESSION_TYPE", "WAYLAND_DISPLAY", "DISPLAY"];

    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn from_env() -> Self {
        Self::new(
            Self::VARS
                .iter()
                .filter_map(|k| std::env::var(k).ok().map(|v| (k.to_string(), v)))
                .collect(),
        )
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn detect(&self) -> DisplayServer {
        match self.var("XDG_SESSION_TYPE").map(str::to_lowercase).as_deref() {
            Some("wayland") => return DisplayServer::Wayland,
            Some("x11") => return DisplayServer::X11,
            Some("tty") => return DisplayServer::None,
            _ => {}
        }
        if self.var("WAYLAND_DISPLAY").is_some() {
            DisplayServer::Wayland
        } else if self.var("DISPLAY").is_some() {
            DisplayServer::X11
        } else {
            DisplayServer::None
        }
    }
}

#[async_trait]
impl HostProbe for DisplayProbe {
    fn name(&self) -> &str {
        "display"
    }

    async fn probe(&self, _hint: &RequestHint) -> Result<ProbeFacts, String> {
        Ok(ProbeFacts {
            display_server: Some(self.detect()),
            ..Default::default()
        })
    }
}

// ============================================================================
// Tools
// ============================================================================

/// Looks up baseline and hinted tools on PATH without executing anything.
pub struct ToolsProbe {
    path_dirs: Vec<PathBuf>,
    baseline: Vec<String>,
}

impl ToolsProbe {
    pub fn new(path_dirs: Vec<PathBuf>, baseline: Vec<String>) -> Self {
        Self { path_dirs, baseline }
    }

    pub fn from_env() -> Self {
        let dirs = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self::new(dirs, BASELINE_TOOLS.iter().map(|s| s.to_string()).collect())
    }
}

/// True if `dir/name` is a regular file with an execute bit set.
pub fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                meta.permissions().mode() & 0o111 != 0
            }
            #[cfg(not(unix))]
            {
                true
            }
        }
        _ => false,
    }
}

#[async_trait]
impl HostProbe for ToolsProbe {
    fn name(&self) -> &str {
        "tools"
    }

    async fn probe(&self, hint: &RequestHint) -> Result<ProbeFacts, String> {
        if self.path_dirs.is_empty() {
            return Err("PATH is empty".to_string());
        }
        let dirs = self.path_dirs.clone();
        let mut wanted = self.baseline.clone();
        wanted.extend(hint.tools.iter().cloned());

        blocking(move || {
            let mut facts = ProbeFacts::default();
            for tool in wanted {
                if dirs.iter().any(|d| is_executable(&d.join(&tool))) {
                    facts.installed_tools.insert(tool);
                } else {
                    facts.missing_tools.insert(tool);
                }
            }
            Ok(facts)
        })
        .await
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Existence of every path the request mentions.
pub struct PathsProbe {
    home: Option<PathBuf>,
}

impl PathsProbe {
    pub fn new(home: Option<PathBuf>) -> Self {
        Self { home }
    }

    pub fn from_env() -> Self {
        Self::new(dirs::home_dir())
    }

    pub fn expand(&self, path: &str) -> Option<PathBuf> {
        if path == "~" {
            return self.home.clone();
        }
        match path.strip_prefix("~/") {
            Some(rest) => self.home.as_ref().map(|h| h.join(rest)),
            None if path.starts_with('~') => None, // ~otheruser
            None => Some(PathBuf::from(path)),
        }
    }
}

#[async_trait]
impl HostProbe for PathsProbe {
    fn name(&self) -> &str {
        "paths"
    }

    async fn probe(&self, hint: &RequestHint) -> Result<ProbeFacts, String> {
        let targets: Vec<(String, Option<PathBuf>)> = hint
            .paths
            .iter()
            .map(|p| (p.clone(), self.expand(p)))
            .collect();

        blocking(move || {
            let mut facts = ProbeFacts::default();
            for (written, expanded) in targets {
                let exists = expanded.map(|p| p.exists()).unwrap_or(false);
                facts.probed_paths.insert(written, exists);
            }
            Ok(facts)
        })
        .await
    }
}

// ============================================================================
// Mounts
// ============================================================================

/// Mounted filesystems plus the usual mount locations of named volumes.
pub struct MountsProbe {
    mounts_path: PathBuf,
    user: Option<String>,
}

impl MountsProbe {
    pub fn new(mounts_path: impl Into<PathBuf>, user: Option<String>) -> Self {
        Self {
            mounts_path: mounts_path.into(),
            user,
        }
    }

    pub fn from_env() -> Self {
        Self::new("/proc/mounts", std::env::var("USER").ok())
    }

    /// Where a volume labelled `name` would normally be mounted.
    pub fn candidate_dirs(&self, name: &str) -> Vec<String> {
        let mut dirs = Vec::new();
        if let Some(user) = &self.user {
            dirs.push(format!("/media/{}/{}", user, name));
            dirs.push(format!("/run/media/{}/{}", user, name));
        }
        dirs.push(format!("/media/{}", name));
        dirs.push(format!("/mnt/{}", name));
        dirs
    }
}

/// Undo the octal escapes /proc/mounts uses for space, tab, newline, backslash.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            if let Some(value) = field
                .get(i + 1..i + 4)
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
            {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse /proc/mounts, dropping pseudo filesystems.
pub fn parse_mounts(content: &str) -> Vec<MountPoint> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            if PSEUDO_FS.contains(&fs_type) {
                return None;
            }
            Some(MountPoint {
                device: unescape_mount_field(device),
                mount_point: unescape_mount_field(mount_point),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl HostProbe for MountsProbe {
    fn name(&self) -> &str {
        "mounts"
    }

    async fn probe(&self, hint: &RequestHint) -> Result<ProbeFacts, String> {
        let mounts_path = self.mounts_path.clone();
        let candidates: Vec<(String, Vec<String>)> = hint
            .names
            .iter()
            .map(|n| (n.clone(), self.candidate_dirs(n)))
            .collect();

        blocking(move || {
            let content = fs::read_to_string(&mounts_path)
                .map_err(|e| format!("cannot read {}: {}", mounts_path.display(), e))?;
            let mounts = parse_mounts(&content);

            let mut facts = ProbeFacts::default();
            for (name, dirs) in candidates {
                let suffix = format!("/{}", name);
                for m in mounts.iter().filter(|m| m.mount_point.ends_with(&suffix)) {
                    facts.probed_paths.insert(m.mount_point.clone(), true);
                }
                for dir in dirs {
                    let exists = Path::new(&dir).is_dir();
                    facts.probed_paths.entry(dir).or_insert(exists);
                }
            }
            facts.mounts = mounts;
            Ok(facts)
        })
        .await
    }
}

// ============================================================================
// Services
// ============================================================================

/// Runtimes asked about named containers, in preference order
const CONTAINER_RUNTIMES: &[&str] = &["docker", "podman"];

/// Ports, processes, containers and hosts the request names. Reports
/// nothing when the request names none of them.
pub struct ServicesProbe {
    tcp_tables: Vec<PathBuf>,
    path_dirs: Vec<PathBuf>,
    resolve_domains: bool,
}

impl ServicesProbe {
    pub fn new(tcp_tables: Vec<PathBuf>, path_dirs: Vec<PathBuf>) -> Self {
        Self {
            tcp_tables,
            path_dirs,
            resolve_domains: true,
        }
    }

    pub fn from_env() -> Self {
        let dirs = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self::new(
            vec![PathBuf::from("/proc/net/tcp"), PathBuf::from("/proc/net/tcp6")],
            dirs,
        )
    }

    /// Leave domains unresolved.
    pub fn without_dns(mut self) -> Self {
        self.resolve_domains = false;
        self
    }

    fn container_runtime(&self) -> Option<PathBuf> {
        CONTAINER_RUNTIMES.iter().find_map(|name| {
            self.path_dirs
                .iter()
                .map(|dir| dir.join(name))
                .find(|path| is_executable(path))
        })
    }
}

/// Local ports in LISTEN state from a /proc/net/tcp or tcp6 table.
pub fn parse_listening_ports(content: &str) -> BTreeSet<u16> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let local = fields.nth(1)?;
            let state = fields.nth(1)?;
            if state != "0A" {
                return None;
            }
            let (_, port) = local.rsplit_once(':')?;
            u16::from_str_radix(port, 16).ok()
        })
        .collect()
}

pub fn ip_scope(ip: &Ipv4Addr) -> &'static str {
    if ip.is_loopback() {
        "loopback"
    } else if ip.is_private() {
        "private"
    } else if ip.is_link_local() {
        "link-local"
    } else if ip.is_unspecified() {
        "unspecified"
    } else {
        "public"
    }
}

/// Status of one container by exact name, then by id prefix.
async fn container_status(runtime: &Path, container: &str) -> Result<Option<String>, String> {
    for filter in [format!("name=^{}$", container), format!("id={}", container)] {
        let output = Command::new(runtime)
            .args(["ps", "--all", "--filter", filter.as_str(), "--format", "{{.Status}}"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("cannot run {}: {}", runtime.display(), e))?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(status) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            return Ok(Some(status.to_string()));
        }
    }
    Ok(None)
}

async fn resolve(domain: &str) -> Vec<String> {
    match tokio::net::lookup_host((domain, 0)).await {
        Ok(addrs) => addrs
            .map(|a| a.ip().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        Err(e) => {
            debug!(domain, "lookup failed: {}", e);
            Vec::new()
        }
    }
}

#[async_trait]
impl HostProbe for ServicesProbe {
    fn name(&self) -> &str {
        "services"
    }

    async fn probe(&self, hint: &RequestHint) -> Result<ProbeFacts, String> {
        if !hint.has_service_entities() {
            return Ok(ProbeFacts::default());
        }

        let tables = self.tcp_tables.clone();
        let ports: Vec<u16> = hint.ports.iter().copied().collect();
        let pids: Vec<u32> = hint.pids.iter().copied().collect();
        let mut services = blocking(move || {
            let mut services = ServiceFacts::default();
            if !ports.is_empty() {
                let mut listening = BTreeSet::new();
                let mut readable = false;
                for table in &tables {
                    if let Ok(content) = fs::read_to_string(table) {
                        readable = true;
                        listening.extend(parse_listening_ports(&content));
                    }
                }
                if !readable {
                    return Err("no readable TCP socket table".to_string());
                }
                for port in ports {
                    services.ports.insert(port, listening.contains(&port));
                }
            }
            if !pids.is_empty() {
                let mut sys = System::new();
                for pid in pids {
                    let id = Pid::from_u32(pid);
                    sys.refresh_process(id);
                    let name = sys.process(id).map(|p| p.name().to_string());
                    services.processes.insert(pid, name);
                }
            }
            Ok(services)
        })
        .await?;

        for ip in &hint.ips {
            services.ips.insert(*ip, ip_scope(ip).to_string());
        }

        if !hint.containers.is_empty() {
            match self.container_runtime() {
                Some(runtime) => {
                    for container in &hint.containers {
                        match container_status(&runtime, container).await {
                            Ok(status) => {
                                services.containers.insert(container.clone(), status);
                            }
                            Err(e) => warn!(container = %container, "Container lookup failed: {}", e),
                        }
                    }
                }
                None => debug!("no container runtime on PATH"),
            }
        }

        if self.resolve_domains {
            for domain in &hint.domains {
                services.domains.insert(domain.clone(), resolve(domain).await);
            }
        }

        Ok(ProbeFacts {
            services,
            ..Default::default()
        })
    }
}
