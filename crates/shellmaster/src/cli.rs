//! CLI - Command-line argument parsing
//!
//! `sm <request...>` is shorthand for `sm ask <request...>`, except when the
//! first word names a subcommand (`check`, `rules`, `config`, `index`, `ask`):
//! `sm check disk usage` runs the check subcommand. Such requests need the
//! explicit form, `sm ask check disk usage`.

use clap::{Args, Parser, Subcommand};
use shellmaster_common::Locale;
use std::path::PathBuf;

/// ShellMaster CLI
#[derive(Parser, Debug)]
#[command(name = "sm")]
#[command(about = "ShellMaster - one safe shell command from plain words")]
#[command(long_about = "ShellMaster - one safe shell command from plain words

`sm <request...>` is shorthand for `sm ask <request...>`. A request whose
first word is a subcommand name (check, rules, config, index, ask) runs that
subcommand instead; write `sm ask check disk usage` to ask about it.")]
#[command(version = env!("SHELLMASTER_VERSION"))]
#[command(args_conflicts_with_subcommands = true)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Config file (overrides $SHELLMASTER_CONFIG and the XDG default)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub ask: AskArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Whether debug output was requested for the selected command
    pub fn debug(&self) -> bool {
        match &self.command {
            Some(Commands::Ask(args)) => args.debug,
            Some(Commands::Check { debug, .. }) => *debug,
            Some(_) => false,
            None => self.ask.debug,
        }
    }

    /// Name of the selected command, for the invocation log
    pub fn command_name(&self) -> &'static str {
        match &self.command {
            None | Some(Commands::Ask(_)) => "ask",
            Some(Commands::Check { .. }) => "check",
            Some(Commands::Rules { .. }) => "rules",
            Some(Commands::Config { .. }) => "config",
            Some(Commands::Index { .. }) => "index",
        }
    }
}

/// Arguments of a natural-language request
#[derive(Args, Debug, Clone, Default)]
pub struct AskArgs {
    /// What you want to do, in plain words. Start with `sm ask` when the
    /// first word is check, rules, config or index.
    #[arg(value_name = "REQUEST")]
    pub request: Vec<String>,

    /// Print the pipeline trace and raise log level to debug
    #[arg(long)]
    pub debug: bool,

    /// Language of the explanation: auto, zh or en
    #[arg(long, default_value = "auto")]
    pub locale: Locale,

    /// Ask for confirmation, then run the accepted command with `sh -c`
    #[arg(long)]
    pub run: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskArgs {
    pub fn text(&self) -> String {
        self.request.join(" ").trim().to_string()
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Translate a request into a shell command
    Ask(AskArgs),

    /// Run a command line through the safety gate
    Check {
        /// The command line to check
        #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,

        /// Show the parsed commands and every matching rule
        #[arg(long)]
        explain: bool,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,

        /// Raise log level to debug
        #[arg(long)]
        debug: bool,
    },

    /// List the active safety rules
    Rules {
        /// Rules file to inspect instead of the configured one
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// Print the rules as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or change configuration
    Config {
        /// Print the effective configuration (default)
        #[arg(long)]
        show: bool,

        /// Print the config file location
        #[arg(long)]
        path: bool,

        /// Set a configuration value in the config file (key=value)
        #[arg(long, value_name = "KEY=VALUE")]
        set: Option<String>,
    },

    /// Build or inspect the knowledge corpus
    Index {
        #[command(subcommand)]
        action: IndexCommands,
    },
}

/// Corpus subcommands
#[derive(Subcommand, Debug)]
pub enum IndexCommands {
    /// Embed NL2Bash-style pairs into a corpus file
    Build {
        /// Descriptions, one per line
        #[arg(long, value_name = "FILE")]
        nl: PathBuf,

        /// Commands, line-aligned with --nl
        #[arg(long, value_name = "FILE")]
        cm: PathBuf,

        /// Output corpus (defaults to retrieval.corpus_path); `.gz` compresses
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,

        /// Descriptions per embedding request
        #[arg(long, default_value_t = shellmaster_common::knowledge::DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Embedding backend: http or hash (defaults to embedding.kind)
        #[arg(long, value_name = "KIND")]
        embedding: Option<String>,
    },

    /// Show a corpus file's header and verify its checksum
    Info {
        /// Corpus file (defaults to retrieval.corpus_path)
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
}
