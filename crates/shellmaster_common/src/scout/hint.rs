//! What the request text says Scout should look at.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use crate::text::cached_regex;

/// Tools worth checking when a request mentions them by name.
pub const KNOWN_TOOLS: &[&str] = &[
    "ffmpeg", "ffprobe", "ffplay", "vlc", "mpv", "mplayer", "python", "python3", "pip",
    "pip3", "node", "npm", "npx", "java", "javac", "mvn", "gradle", "gcc", "g++", "make",
    "cmake", "git", "docker", "podman", "vim", "nano", "emacs", "code", "curl", "wget",
    "ssh", "scp", "rsync", "tar", "zip", "unzip", "gzip", "7z", "htop", "top", "ps", "kill",
    "mysql", "psql", "mongo", "redis-cli", "nginx", "apache2", "httpd", "systemctl",
    "tensorboard", "jupyter", "streamlit", "convert", "magick", "pandoc", "jq", "yq",
    "lsblk", "findmnt", "smartctl", "nmap", "netstat", "ss", "ip", "iptables", "nft", "ufw",
];

static PATH_RE: OnceLock<Option<Regex>> = OnceLock::new();
static NAMED_RE: OnceLock<Option<Regex>> = OnceLock::new();
static QUOTED_RE: OnceLock<Option<Regex>> = OnceLock::new();
static NAMED_ZH_RE: OnceLock<Option<Regex>> = OnceLock::new();
static PORT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static HOST_PORT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static PID_RE: OnceLock<Option<Regex>> = OnceLock::new();
static CONTAINER_RE: OnceLock<Option<Regex>> = OnceLock::new();
static IP_RE: OnceLock<Option<Regex>> = OnceLock::new();
static DOMAIN_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Words that follow "container" without naming one
const CONTAINER_STOPWORDS: &[&str] = &[
    "is", "was", "the", "a", "an", "that", "which", "with", "and", "or", "for", "logs", "log",
    "status", "running", "stopped", "image", "images", "list", "ps", "to", "in", "on", "of",
];

/// Last labels that make `name.ext` a file rather than a host
const FILE_EXTENSIONS: &[&str] = &[
    "txt", "log", "md", "csv", "json", "yaml", "yml", "toml", "ini", "conf", "cfg", "xml",
    "html", "js", "ts", "py", "rs", "go", "sh", "c", "h", "cpp", "java", "mkv", "mp4", "avi",
    "mov", "webm", "mp3", "wav", "flac", "ogg", "jpg", "jpeg", "png", "gif", "svg", "webp",
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "tar", "gz", "tgz", "bz2", "xz", "zip",
    "rar", "7z", "iso", "img", "deb", "rpm", "bak", "tmp", "old", "db", "sql", "pem", "crt",
    "key", "service", "socket", "timer", "conf.d", "lock", "pid", "sock",
];

/// Entities pulled out of the request text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHint {
    /// Absolute or home-relative paths, as written
    pub paths: BTreeSet<String>,
    /// Known tool names mentioned in the text
    pub tools: BTreeSet<String>,
    /// Labels introduced by "named"/"called" or quoted (disk labels, dirs)
    pub names: BTreeSet<String>,
    /// TCP ports, from "port 8080" or "localhost:8080"
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ports: BTreeSet<u16>,
    /// Process ids, from "pid 1234" or "process 1234"
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub pids: BTreeSet<u32>,
    /// Container names or ids, from "container web"
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub containers: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ips: BTreeSet<Ipv4Addr>,
    /// Host names such as example.com, lowercased
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub domains: BTreeSet<String>,
}

impl RequestHint {
    pub fn from_text(text: &str) -> Self {
        let mut hint = Self::default();

        if let Some(re) = cached_regex(&PATH_RE, r#"(?:^|[\s"'“(])((?:~|/)[\w.\-/~]*)"#) {
            for cap in re.captures_iter(text) {
                let path = cap[1].trim_end_matches(['.', ',']);
                if path.len() > 1 || path == "/" {
                    hint.paths.insert(path.to_string());
                }
            }
        }

        for word in text
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '_'))
            .filter(|w| !w.is_empty())
        {
            let lower = word.to_lowercase();
            if KNOWN_TOOLS.contains(&lower.as_str()) {
                hint.tools.insert(lower);
            }
        }

        let name_patterns = [
            (&NAMED_RE, r"(?i)\b(?:named|called|labell?ed|label)\s+[\x22'“]?([\w.\-]+)"),
            (&QUOTED_RE, r#"["“]([^"”/\s][^"”/]{0,63})["”]"#),
            (&NAMED_ZH_RE, r"(?:名为|名叫|叫做|叫|标签为)\s*[\x22“]?([A-Za-z0-9_.\-]+)"),
        ];
        for (cell, pattern) in name_patterns {
            if let Some(re) = cached_regex(cell, pattern) {
                for cap in re.captures_iter(text) {
                    let name = cap[1].trim();
                    if !name.is_empty() {
                        hint.names.insert(name.to_string());
                    }
                }
            }
        }

        hint.read_services(text);
        hint
    }

    /// Ports, processes, containers and network targets.
    fn read_services(&mut self, text: &str) {
        let port_patterns = [
            (&PORT_RE, r"(?i)(?:端口|\bports?)\s*(?:号)?\s*[:：#]?\s*(\d{2,5})\b"),
            (&HOST_PORT_RE, r"(?i)\b(?:localhost|\d{1,3}(?:\.\d{1,3}){3}|\[::1?\]):(\d{2,5})\b"),
        ];
        for (cell, pattern) in port_patterns {
            if let Some(re) = cached_regex(cell, pattern) {
                for cap in re.captures_iter(text) {
                    if let Ok(port) = cap[1].parse::<u16>() {
                        if port > 0 {
                            self.ports.insert(port);
                        }
                    }
                }
            }
        }

        if let Some(re) = cached_regex(&PID_RE, r"(?i)(?:进程号?|\bpid|\bprocess)\s*(?:号|id)?\s*[:：#]?\s*(\d+)\b") {
            for cap in re.captures_iter(text) {
                if let Ok(pid) = cap[1].parse::<u32>() {
                    self.pids.insert(pid);
                }
            }
        }

        if let Some(re) = cached_regex(
            &CONTAINER_RE,
            r#"(?i)(?:容器|\bcontainer\b)\s*(?:(?:named|called|name|id|名|名为)\s*)?[:：]?\s*["'“]?([A-Za-z0-9][A-Za-z0-9_.\-]*)"#,
        ) {
            for cap in re.captures_iter(text) {
                let name = &cap[1];
                if !CONTAINER_STOPWORDS.contains(&name.to_lowercase().as_str()) {
                    self.containers.insert(name.to_string());
                }
            }
        }

        if let Some(re) = cached_regex(&IP_RE, r"\b(\d{1,3}(?:\.\d{1,3}){3})\b") {
            for cap in re.captures_iter(text) {
                if let Ok(ip) = cap[1].parse::<Ipv4Addr>() {
                    self.ips.insert(ip);
                }
            }
        }

        if let Some(re) = cached_regex(&DOMAIN_RE, r"\b((?:[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?\.)+[A-Za-z]{2,63})\b") {
            for m in re.find_iter(text) {
                // part of a path or a file name
                let before = text[..m.start()].chars().last();
                if matches!(before, Some('/') | Some('~') | Some('.') | Some('@')) {
                    continue;
                }
                let domain = m.as_str().to_lowercase();
                let last = domain.rsplit('.').next().unwrap_or("");
                if FILE_EXTENSIONS.contains(&last) {
                    continue;
                }
                self.domains.insert(domain);
            }
        }
    }

    /// Whether the text names anything the services probe can look up.
    pub fn has_service_entities(&self) -> bool {
        !(self.ports.is_empty()
            && self.pids.is_empty()
            && self.containers.is_empty()
            && self.ips.is_empty()
            && self.domains.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
            && self.tools.is_empty()
            && self.names.is_empty()
            && !self.has_service_entities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_disk() {
        let hint = RequestHint::from_text("show free space on mounted disk named LENOVO");
        assert!(hint.names.contains("LENOVO"));
        assert!(hint.paths.is_empty());
    }

    #[test]
    fn test_paths_and_tools() {
        let hint = RequestHint::from_text("convert ~/Videos/a.mkv to mp4 with ffmpeg and save in /tmp/out.");
        assert!(hint.paths.contains("~/Videos/a.mkv"));
        assert!(hint.paths.contains("/tmp/out"));
        assert!(hint.tools.contains("ffmpeg"));
        assert!(hint.tools.contains("convert"));
    }

    #[test]
    fn test_quoted_and_chinese_names() {
        let hint = RequestHint::from_text("挂载名为 BACKUP 的磁盘 and open \"My Photos\"");
        assert!(hint.names.contains("BACKUP"));
        assert!(hint.names.contains("My Photos"));
    }

    #[test]
    fn test_ports_and_processes() {
        let hint = RequestHint::from_text("what is listening on port 8080, is localhost:5432 up, and kill pid 4242");
        assert_eq!(hint.ports, BTreeSet::from([5432, 8080]));
        assert_eq!(hint.pids, BTreeSet::from([4242]));
        assert!(hint.has_service_entities());

        let zh = RequestHint::from_text("查看端口：3306 和进程号 99");
        assert!(zh.ports.contains(&3306));
        assert!(zh.pids.contains(&99));
    }

    #[test]
    fn test_containers_hosts_and_files() {
        let hint = RequestHint::from_text("restart the container named web-1 and ping 10.0.0.7 or example.com");
        assert!(hint.containers.contains("web-1"));
        assert!(hint.ips.contains(&Ipv4Addr::new(10, 0, 0, 7)));
        assert!(hint.domains.contains("example.com"));

        let plural = RequestHint::from_text("list running docker containers");
        assert!(plural.containers.is_empty());

        let files = RequestHint::from_text("show container logs for report.pdf and ~/notes.txt");
        assert!(files.containers.is_empty());
        assert!(files.domains.is_empty());
        assert!(files.ips.is_empty());
    }

    #[test]
    fn test_plain_text_is_empty() {
        assert!(RequestHint::from_text("what time is it").is_empty());
    }
}
