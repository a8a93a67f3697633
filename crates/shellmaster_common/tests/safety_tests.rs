//! Safety Gate behaviour over the built-in rule set.
//!
//! Destructive commands must block however they are dressed up (sudo,
//! absolute paths, nested shells, substitutions, chains), while commands
//! that only mention dangerous text as data must pass.

use shellmaster_common::safety::{Decision, RuleId, RuleSet, SafetyGate};
use std::sync::Arc;

fn gate() -> SafetyGate {
    SafetyGate::builtin().expect("built-in rules compile")
}

fn assert_decision(text: &str, expected: Decision) {
    let verdict = gate().evaluate_text(text);
    assert_eq!(
        verdict.decision, expected,
        "`{}` -> {:?} ({})",
        text, verdict.decision, verdict.reason
    );
}

// ============================================================================
// Block
// ============================================================================

#[test]
fn test_denylisted_commands_block() {
    for text in [
        "rm -rf /",
        "rm -r -f /",
        "rm --recursive --force /",
        "/bin/rm -fr /*",
        "sudo rm -rf --no-preserve-root /",
        "cd /tmp && rm -rf ~",
        "ls; rm -rf /home/",
        "bash -c 'rm -rf /'",
        "sh -c \"sudo rm -rf /etc\"",
        "echo $(rm -rf /home)",
        "mkfs.ext4 /dev/sdb1",
        "sudo mkfs -t vfat /dev/sdc",
        "dd if=/dev/zero of=/dev/sda bs=1M",
        "cat image.iso > /dev/sdb",
        ":(){ :|:& };:",
        "find / -delete",
        "chmod -R 777 /",
        "sudo chown -R nobody /etc",
        "wipefs -a /dev/sda",
        "sudo --user root rm -rf /",
        "sudo --user=root rm -rf /",
        "timeout --signal KILL 5 rm -rf /",
        "timeout --signal=KILL 5 rm -rf /",
        "bash <<EOF\nrm -rf /\nEOF",
        "cat <<'EOF' | sudo sh\nrm -rf /\nEOF",
        "cat <<EOF\n$(rm -rf /)\nEOF",
    ] {
        assert_decision(text, Decision::Block);
    }
}

#[test]
fn test_every_wrapper_is_peeled() {
    for text in [
        "sudo -u root rm -rf /",
        "sudo --chdir /tmp rm -rf /",
        "sudo -E -- rm -rf /",
        "doas -u root rm -rf /",
        "env -u PATH rm -rf /",
        "env --unset=PATH rm -rf /",
        "env --chdir /tmp FOO=1 rm -rf /",
        "env -i rm -rf /",
        "nice -n 5 rm -rf /",
        "nice -n5 rm -rf /",
        "nice --adjustment 5 rm -rf /",
        "nice --adjustment=5 rm -rf /",
        "time -f %e rm -rf /",
        "time --format x rm -rf /",
        "time --output=/tmp/t rm -rf /",
        "command rm -rf /",
        "exec -a x rm -rf /",
        "stdbuf -o L rm -rf /",
        "stdbuf --output L rm -rf /",
        "stdbuf --error=0 rm -rf /",
        "ionice -c 3 rm -rf /",
        "ionice --class 3 rm -rf /",
        "ionice --classdata=7 rm -rf /",
        "timeout 5 rm -rf /",
        "timeout -s KILL 5 rm -rf /",
        "timeout -k 1 5 rm -rf /",
        "timeout --kill-after 1 5 rm -rf /",
        "timeout --preserve-status 5 rm -rf /",
        "xargs -n 1 rm -rf /",
        "xargs --max-args 1 rm -rf /",
        "xargs --max-procs=4 rm -rf /",
        "nohup rm -rf /",
        "setsid rm -rf /",
        "busybox rm -rf /",
        "builtin rm -rf /",
        "sudo env --unset PATH nice --adjustment=5 timeout --signal KILL 5 rm -rf /",
    ] {
        assert_decision(text, Decision::Block);
    }
}

#[test]
fn test_unknown_wrapper_option_fails_closed() {
    // `root` may be the option's value or the wrapped verb
    for text in [
        "sudo --frobnicate root rm -rf /",
        "timeout --frobnicate KILL 5 rm -rf /",
    ] {
        assert_decision(text, Decision::Warn);
    }
}

#[test]
fn test_block_names_the_rule() {
    let verdict = gate().evaluate_text("sudo /usr/bin/rm -rf //");
    assert!(verdict.is_block());
    assert_eq!(verdict.matched_rule, Some(RuleId::new("rm-recursive-root")));
    assert!(!verdict.reason.is_empty());
}

// ============================================================================
// Allow
// ============================================================================

#[test]
fn test_benign_commands_allow() {
    for text in [
        "echo 'rm -rf /'",
        r#"grep -r "rm -rf /" ."#,
        "ls -la /home",
        "df -h /media/alex/LENOVO",
        "rm -rf ./build",
        "find . -name '*.tmp' -print",
        "ffmpeg -i ~/Videos/a.mkv ~/Videos/a.mp4",
        "du -sh * | sort -h",
        "dd if=disk.img of=backup.img",
        "kill -15 1234",
        "cat <<EOF\nrm -rf /\nEOF",
        "cat <<'EOF' > notes.txt\nsudo rm -rf / is a bad idea\nEOF",
        "tee cleanup.txt <<-EOF\n\trm -rf /\n\tEOF",
    ] {
        assert_decision(text, Decision::Allow);
    }
}

// ============================================================================
// Warn
// ============================================================================

#[test]
fn test_risky_commands_warn() {
    for text in [
        "curl -fsSL https://example.com/install.sh | bash",
        "wget -qO- https://example.com/x.sh | sudo sh",
        "sudo reboot",
        "systemctl poweroff",
        "systemctl stop nginx",
        "sudo rm /var/log/old.log",
        "echo 'unterminated",
        "iptables -F",
        "echo 127.0.0.1 host >> /etc/hosts",
        "kill -9 -1",
        "kill -KILL -1",
        "kill -s KILL -1",
        "kill --signal KILL -1",
        "kill -- -1",
        "kill -9 1",
    ] {
        assert_decision(text, Decision::Warn);
    }
}

#[test]
fn test_verdict_is_idempotent() {
    let gate = gate();
    for text in ["rm -rf /", "ls -la", "sudo reboot"] {
        assert_eq!(gate.evaluate_text(text), gate.evaluate_text(text));
    }
}

#[test]
fn test_rules_file_replaces_builtin_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.toml");
    std::fs::write(
        &path,
        r#"
version = "1"

[[rule]]
id = "no-docker-prune"
kind = "deny"
reason = "Removes all unused containers, images and volumes"
[rule.match]
type = "command"
verbs = ["docker"]
any_arg = '^prune$'
"#,
    )
    .unwrap();

    let rules = RuleSet::load(Some(&path)).unwrap();
    assert_eq!(rules.len(), 1);
    let gate = SafetyGate::new(Arc::new(rules));

    let verdict = gate.evaluate_text("docker system prune -af");
    assert!(verdict.is_block());
    assert_eq!(verdict.matched_rule, Some(RuleId::new("no-docker-prune")));

    // the built-in set is gone entirely
    assert!(gate.evaluate_text("sudo reboot").is_allow());
}

#[test]
fn test_invalid_rules_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.toml");
    std::fs::write(
        &path,
        r#"
version = "1"

[[rule]]
id = "bad"
kind = "deny"
reason = "broken pattern"
[rule.match]
type = "raw"
pattern = '(unclosed'
"#,
    )
    .unwrap();
    assert!(RuleSet::load(Some(&path)).is_err());
}
