//! CLI surface: argument parsing, exit codes, confirmation, config and log files.

use clap::Parser;
use std::fs;

use shellmaster::cli::{Cli, Commands, IndexCommands};
use shellmaster::commands::{ask, check, config_cmd, index};
use shellmaster::display::Ui;
use shellmaster::errors::{EXIT_BLOCKED, EXIT_SUCCESS};
use shellmaster::logging::InvocationLog;
use shellmaster::redacted_args;
use shellmaster_common::knowledge::CorpusFile;
use shellmaster_common::{Decision, Locale, SafetyGate, ShellmasterConfig};

// ============================================================================
// Argument parsing
// ============================================================================

#[test]
fn test_bare_request_is_ask() {
    let cli = Cli::try_parse_from(["sm", "show", "disk", "usage", "--debug"]).unwrap();
    assert!(cli.command.is_none());
    assert_eq!(cli.ask.text(), "show disk usage");
    assert!(cli.debug());
    assert_eq!(cli.command_name(), "ask");
    assert_eq!(cli.ask.locale, Locale::Auto);
}

#[test]
fn test_ask_subcommand_with_flags() {
    let cli = Cli::try_parse_from(["sm", "ask", "--run", "--locale", "zh", "list", "files"]).unwrap();
    match cli.command {
        Some(Commands::Ask(args)) => {
            assert!(args.run);
            assert_eq!(args.locale, Locale::Zh);
            assert_eq!(args.text(), "list files");
        }
        other => panic!("expected ask, got {:?}", other),
    }
}

#[test]
fn test_subcommand_words_need_explicit_ask() {
    let bare = Cli::try_parse_from(["sm", "check", "disk", "usage"]).unwrap();
    assert_eq!(bare.command_name(), "check");

    let cli = Cli::try_parse_from(["sm", "ask", "check", "disk", "usage"]).unwrap();
    match cli.command {
        Some(Commands::Ask(args)) => assert_eq!(args.text(), "check disk usage"),
        other => panic!("expected ask, got {:?}", other),
    }
}

#[test]
fn test_unknown_locale_is_usage_error() {
    assert!(Cli::try_parse_from(["sm", "--locale", "fr", "hello"]).is_err());
}

#[test]
fn test_check_takes_hyphenated_words() {
    let cli = Cli::try_parse_from(["sm", "check", "rm", "-rf", "/"]).unwrap();
    match cli.command {
        Some(Commands::Check { command, .. }) => assert_eq!(command, vec!["rm", "-rf", "/"]),
        other => panic!("expected check, got {:?}", other),
    }
}

#[test]
fn test_index_build_defaults() {
    let cli = Cli::try_parse_from(["sm", "index", "build", "--nl", "all.nl", "--cm", "all.cm"]).unwrap();
    match cli.command {
        Some(Commands::Index {
            action: IndexCommands::Build { batch_size, out, embedding, .. },
        }) => {
            assert_eq!(batch_size, shellmaster_common::knowledge::DEFAULT_BATCH_SIZE);
            assert!(out.is_none());
            assert!(embedding.is_none());
        }
        other => panic!("expected index build, got {:?}", other),
    }
}

// ============================================================================
// Confirmation and check
// ============================================================================

#[test]
fn test_confirmation_rules() {
    assert!(ask::confirmation_accepted(Decision::Allow, "y\n"));
    assert!(ask::confirmation_accepted(Decision::Allow, "YES"));
    assert!(!ask::confirmation_accepted(Decision::Allow, "\n"));

    assert!(!ask::confirmation_accepted(Decision::Warn, "y"));
    assert!(!ask::confirmation_accepted(Decision::Warn, "YES"));
    assert!(ask::confirmation_accepted(Decision::Warn, "yes\n"));

    assert!(!ask::confirmation_accepted(Decision::Block, "yes"));
}

#[test]
fn test_join_words_keeps_nested_scripts_intact() {
    let words: Vec<String> = ["bash", "-c", "rm -rf /"].iter().map(|s| s.to_string()).collect();
    let text = check::join_words(&words);
    assert_eq!(text, "bash -c 'rm -rf /'");

    let gate = SafetyGate::builtin().unwrap();
    assert!(gate.evaluate_text(&text).is_block());

    let single = vec!["ls -la | sort".to_string()];
    assert_eq!(check::join_words(&single), "ls -la | sort");
}

#[test]
fn test_check_exit_codes() {
    let config = ShellmasterConfig::default();
    let words = |s: &str| s.split_whitespace().map(str::to_string).collect::<Vec<_>>();

    let blocked = check::run(&words("rm -rf /"), false, false, &config, &Ui::plain()).unwrap();
    assert_eq!(blocked.exit_code, EXIT_BLOCKED);
    assert_eq!(blocked.outcome, "safety_blocked");

    let warned = check::run(&words("sudo reboot"), true, false, &config, &Ui::plain()).unwrap();
    assert_eq!(warned.exit_code, EXIT_SUCCESS);
    assert_eq!(warned.outcome, "warn");

    let allowed = check::run(&words("ls -la"), false, true, &config, &Ui::plain()).unwrap();
    assert_eq!(allowed.exit_code, EXIT_SUCCESS);
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn test_config_set_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let effective = ShellmasterConfig::default();

    config_cmd::run(false, false, Some("backend.model=Qwen-14B"), &path, &effective).unwrap();
    config_cmd::run(false, false, Some("retrieval.top_k = 8"), &path, &effective).unwrap();

    let saved = ShellmasterConfig::load_from_path(&path).unwrap();
    assert_eq!(saved.backend.model, "Qwen-14B");
    assert_eq!(saved.retrieval.top_k, 8);

    assert!(config_cmd::run(false, false, Some("no.such.key=1"), &path, &effective).is_err());
    assert!(config_cmd::parse_assignment("missing-equals").is_err());
}

#[test]
fn test_config_render_masks_api_key() {
    let mut config = ShellmasterConfig::default();
    config.backend.api_key = "sk-very-secret".to_string();
    let rendered = config_cmd::render(&config).unwrap();
    assert!(!rendered.contains("sk-very-secret"));
    assert!(rendered.contains("********"));
}

// ============================================================================
// Index
// ============================================================================

#[tokio::test]
async fn test_index_build_with_hash_embedder() {
    let dir = tempfile::tempdir().unwrap();
    let nl = dir.path().join("all.nl");
    let cm = dir.path().join("all.cm");
    let out = dir.path().join("corpus.json.gz");
    fs::write(&nl, "show disk usage\nlist files by size\n").unwrap();
    fs::write(&cm, "df -h\nls -lS\n").unwrap();

    let args = index::BuildArgs {
        nl: &nl,
        cm: &cm,
        out: Some(&out),
        batch_size: 1,
        embedding: Some("hash"),
    };
    let report = index::build(args, &ShellmasterConfig::default(), &Ui::plain())
        .await
        .unwrap();
    assert!(report.is_ok());

    let corpus = CorpusFile::read(&out).unwrap();
    assert_eq!(corpus.entries.len(), 2);
    assert!(index::info(Some(&out), &ShellmasterConfig::default()).unwrap().is_ok());
}

// ============================================================================
// Invocation log
// ============================================================================

#[test]
fn test_invocation_log_appends_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state/shellmaster/sm.jsonl");
    let entry = InvocationLog {
        ts: InvocationLog::now(),
        request_id: "req-1".to_string(),
        command: "ask".to_string(),
        args: vec!["show".to_string(), "disk".to_string()],
        outcome: "accepted".to_string(),
        exit_code: 0,
        duration_ms: 12,
        ok: true,
        error: None,
    };
    entry.write_to_file(&path).unwrap();
    entry.write_to_file(&path).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    let parsed: InvocationLog = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(parsed.request_id, "req-1");
    assert!(!lines[0].contains("\"error\""));
}

#[test]
fn test_api_keys_never_reach_the_log() {
    let args = redacted_args(vec![
        "config".to_string(),
        "--set".to_string(),
        "backend.api_key=sk-secret".to_string(),
    ]);
    assert_eq!(args, vec!["config", "--set", "<redacted>"]);
}
