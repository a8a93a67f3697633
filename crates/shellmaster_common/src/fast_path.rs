//! Fast path for trivial requests.
//!
//! A fixed table of one-word requests ("pwd", "free", "磁盘空间") that map to
//! a single well-known command. These skip the generation backend but still
//! go through the Safety Gate.

use crate::candidate::{CandidateCommand, SourceStage};

/// (request, command, rationale)
const TRIVIAL_COMMANDS: &[(&str, &str, &str)] = &[
    ("pwd", "pwd", "Print the current working directory"),
    ("当前目录", "pwd", "显示当前工作目录"),
    ("当前路径", "pwd", "显示当前工作目录"),
    ("我在哪", "pwd", "显示当前工作目录"),
    ("whoami", "whoami", "Print the current user name"),
    ("我是谁", "whoami", "显示当前用户名"),
    ("当前用户", "whoami", "显示当前用户名"),
    ("date", "date", "Print the current date and time"),
    ("时间", "date '+%Y-%m-%d %H:%M:%S'", "显示当前日期和时间"),
    ("日期", "date '+%Y-%m-%d'", "显示当前日期"),
    ("几点", "date '+%H:%M:%S'", "显示当前时间"),
    ("uptime", "uptime", "Show how long the system has been running"),
    ("运行时间", "uptime", "显示系统运行时间"),
    ("开机多久", "uptime", "显示系统运行时间"),
    ("hostname", "hostname", "Print the host name"),
    ("主机名", "hostname", "显示主机名"),
    ("uname", "uname -a", "Print kernel and system information"),
    ("系统版本", "uname -a", "显示内核与系统信息"),
    ("内核版本", "uname -r", "显示内核版本"),
    ("id", "id", "Print user and group ids"),
    ("用户id", "id", "显示用户和组 ID"),
    ("用户信息", "id", "显示用户和组 ID"),
    ("df", "df -h", "Show disk space usage of mounted filesystems"),
    ("磁盘空间", "df -h", "显示已挂载文件系统的磁盘使用情况"),
    ("磁盘使用", "df -h", "显示已挂载文件系统的磁盘使用情况"),
    ("free", "free -h", "Show memory usage"),
    ("内存", "free -h", "显示内存使用情况"),
    ("内存使用", "free -h", "显示内存使用情况"),
];

/// Normalise a request for table lookup: trim, lowercase, drop trailing
/// punctuation (`pwd?`, `内存？`).
fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(|c: char| matches!(c, '?' | '？' | '!' | '！' | '.' | '。'))
        .trim()
        .to_lowercase()
}

/// Candidate for a trivial request, if the text is one.
pub fn lookup(text: &str) -> Option<CandidateCommand> {
    let key = normalize(text);
    TRIVIAL_COMMANDS
        .iter()
        .find(|(request, _, _)| *request == key)
        .map(|(_, command, rationale)| CandidateCommand::new(*command, *rationale, SourceStage::FastPath))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_english_and_chinese() {
        assert_eq!(lookup("pwd").unwrap().text, "pwd");
        assert_eq!(lookup("  Free? ").unwrap().text, "free -h");
        assert_eq!(lookup("磁盘空间").unwrap().text, "df -h");
        assert_eq!(lookup("内存？").unwrap().source_stage, SourceStage::FastPath);
    }

    #[test]
    fn test_non_trivial_requests_miss() {
        assert!(lookup("show free space on mounted disk named LENOVO").is_none());
        assert!(lookup("pwd and list files").is_none());
    }
}
