//! Scout never fails: missing facts are facts, broken probes degrade.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use shellmaster_common::scout::{
    HostProbe, OsFamily, PathsProbe, ProbeFacts, RequestHint, Scout, ServicesProbe, ToolsProbe,
};

struct FailingProbe;

#[async_trait]
impl HostProbe for FailingProbe {
    fn name(&self) -> &str {
        "failing"
    }

    async fn probe(&self, _hint: &RequestHint) -> Result<ProbeFacts, String> {
        Err("permission denied".to_string())
    }
}

struct PanickingProbe;

#[async_trait]
impl HostProbe for PanickingProbe {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn probe(&self, _hint: &RequestHint) -> Result<ProbeFacts, String> {
        panic!("probe bug");
    }
}

struct OsOnly(OsFamily);

#[async_trait]
impl HostProbe for OsOnly {
    fn name(&self) -> &str {
        "os"
    }

    async fn probe(&self, _hint: &RequestHint) -> Result<ProbeFacts, String> {
        Ok(ProbeFacts {
            os_family: Some(self.0),
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn test_missing_tools_and_paths_are_false() {
    let dir = tempfile::tempdir().unwrap();
    let scout = Scout::new(
        vec![
            Arc::new(ToolsProbe::new(vec![dir.path().to_path_buf()], Vec::new())),
            Arc::new(PathsProbe::new(Some(dir.path().to_path_buf()))),
        ],
        Duration::from_secs(2),
    );
    let hint = RequestHint::from_text("convert ~/Videos/a.mkv with ffmpeg");

    let profile = scout.probe(&hint).await;

    assert!(!profile.has_tool("ffmpeg"));
    assert!(profile.missing_tools.contains("ffmpeg"));
    assert_eq!(profile.path_exists("~/Videos/a.mkv"), Some(false));
    assert_eq!(profile.path_exists("/never/probed"), None);
    assert!(profile.degraded.is_empty());
}

#[tokio::test]
async fn test_failing_and_panicking_probes_degrade() {
    let scout = Scout::new(
        vec![
            Arc::new(OsOnly(OsFamily::Arch)),
            Arc::new(FailingProbe),
            Arc::new(PanickingProbe),
        ],
        Duration::from_secs(2),
    );

    let profile = scout.probe(&RequestHint::default()).await;

    assert_eq!(profile.os_family, OsFamily::Arch);
    assert!(profile.is_degraded("failing"));
    assert!(profile.is_degraded("panicking"));
    assert_eq!(profile.degraded.len(), 2);
    assert!(profile.summary().contains("failing probe failed: permission denied"));
}

#[tokio::test]
async fn test_merge_follows_probe_order() {
    let scout = Scout::new(
        vec![Arc::new(OsOnly(OsFamily::Debian)), Arc::new(OsOnly(OsFamily::Suse))],
        Duration::from_secs(2),
    );
    for _ in 0..5 {
        assert_eq!(scout.probe(&RequestHint::default()).await.os_family, OsFamily::Suse);
    }
}

#[tokio::test]
async fn test_builtin_scout_on_this_host() {
    let scout = Scout::builtin(Duration::from_secs(5));
    assert_eq!(
        scout.probe_names(),
        vec!["os", "display", "tools", "paths", "mounts", "services"]
    );
    let hint = RequestHint::from_text("list /definitely/not/a/real/dir");
    let profile = scout.probe(&hint).await;
    assert_eq!(profile.path_exists("/definitely/not/a/real/dir"), Some(false));
}

#[tokio::test]
async fn test_service_entities_reach_the_profile() {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join("tcp");
    std::fs::write(
        &table,
        "  sl  local_address rem_address   st\n   0: 00000000:0016 00000000:0000 0A\n",
    )
    .unwrap();
    let scout = Scout::new(
        vec![Arc::new(ServicesProbe::new(vec![table], Vec::new()).without_dns())],
        Duration::from_secs(2),
    );

    let profile = scout
        .probe(&RequestHint::from_text("is sshd still on port 22? check process 4000000000"))
        .await;
    assert!(profile.degraded.is_empty());
    assert_eq!(profile.services.ports.get(&22), Some(&true));
    assert_eq!(profile.services.processes.get(&4000000000), Some(&None));
    assert!(profile.summary().contains("Port 22: listening"));
}
