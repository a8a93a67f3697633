//! Terminal rendering for sm
//!
//! The accepted command is the only thing written to stdout, so
//! `$(sm ...)` captures exactly the command. Everything else goes to stderr.

use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

use shellmaster_common::pipeline::{Accepted, Rejection};
use shellmaster_common::safety::Evaluation;
use shellmaster_common::{Decision, Trace, Verdict};

/// Output capabilities, detected once per invocation
#[derive(Debug, Clone, Copy)]
pub struct Ui {
    colors: bool,
    interactive: bool,
}

impl Ui {
    pub fn detect() -> Self {
        let stderr = Term::stderr();
        Self {
            colors: console::colors_enabled_stderr() && stderr.is_term(),
            interactive: stderr.is_term(),
        }
    }

    pub fn plain() -> Self {
        Self {
            colors: false,
            interactive: false,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Spinner on stderr while the pipeline runs; hidden off-terminal.
    pub fn spinner(&self, message: &str) -> ProgressBar {
        if !self.interactive {
            return ProgressBar::hidden();
        }

        let spinner = ProgressBar::new_spinner();
        let (frames, template): (&[&str], &str) = if self.colors {
            (
                &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"],
                "{spinner:.cyan} {msg}",
            )
        } else {
            (&["-", "\\", "|", "/"], "{spinner} {msg}")
        };
        if let Ok(style) = ProgressStyle::with_template(template) {
            spinner.set_style(style.tick_strings(frames));
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }

    fn decision_tag(&self, decision: Decision) -> String {
        let tag = decision.indicator();
        if !self.colors {
            return tag.to_string();
        }
        match decision {
            Decision::Allow => tag.green().to_string(),
            Decision::Warn => tag.yellow().bold().to_string(),
            Decision::Block => tag.red().bold().to_string(),
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.colors {
            text.dimmed().to_string()
        } else {
            text.to_string()
        }
    }

    fn heading(&self, text: &str) -> String {
        if self.colors {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn print_accepted(&self, accepted: &Accepted) {
        println!("{}", accepted.candidate.text);

        if !accepted.candidate.rationale.is_empty() {
            eprintln!("{}", self.dim(&accepted.candidate.rationale));
        }
        if accepted.verdict.is_warn() {
            eprintln!(
                "{} {}",
                self.decision_tag(Decision::Warn),
                warning_line(&accepted.verdict)
            );
        }
    }

    pub fn print_rejected(&self, rejection: &Rejection) {
        eprintln!("{} {}", self.decision_tag(Decision::Block), rejection.reason);
        if let Some(rule) = &rejection.matched_rule {
            eprintln!("{}", self.dim(&format!("    rule: {}", rule)));
        }
        if rejection.attempts > 1 {
            eprintln!(
                "{}",
                self.dim(&format!("    gave up after {} attempts", rejection.attempts))
            );
        }
    }

    pub fn print_trace(&self, trace: &Trace) {
        eprintln!();
        eprintln!("{}", self.heading("Pipeline trace"));
        eprint!("{}", trace);
    }

    pub fn print_verdict(&self, verdict: &Verdict) {
        println!("{} {}", self.decision_tag(verdict.decision), verdict.decision);
        println!("    {}", verdict.reason);
        if let Some(rule) = &verdict.matched_rule {
            println!("{}", self.dim(&format!("    rule: {}", rule)));
        }
    }

    pub fn print_evaluation(&self, evaluation: &Evaluation) {
        self.print_verdict(&evaluation.verdict);

        println!();
        println!("{}", self.heading("Parsed commands"));
        if let Some(problem) = &evaluation.analysis.unparseable {
            println!("    unparseable: {}", problem);
        }
        for command in &evaluation.analysis.commands {
            let mut notes = Vec::new();
            if command.privileged {
                notes.push("privileged".to_string());
            }
            if !command.wrappers.is_empty() {
                notes.push(format!("via {}", command.wrappers.join(", ")));
            }
            if command.depth > 0 {
                notes.push(format!("nested depth {}", command.depth));
            }
            let indent = "  ".repeat(command.depth);
            if notes.is_empty() {
                println!("    {}{}", indent, command.display());
            } else {
                println!("    {}{} {}", indent, command.display(), self.dim(&format!("({})", notes.join("; "))));
            }
        }
        for redirection in &evaluation.analysis.redirections {
            println!("    redirect -> {}", redirection.target);
        }

        println!();
        println!("{}", self.heading("Matching rules"));
        if evaluation.matches.is_empty() {
            println!("    none");
        }
        for hit in &evaluation.matches {
            println!("    {:<6} {:<28} {}", hit.kind.as_str(), hit.rule.as_str(), hit.detail);
        }
    }
}

fn warning_line(verdict: &Verdict) -> String {
    match &verdict.matched_rule {
        Some(rule) => format!("{} ({})", verdict.reason, rule),
        None => verdict.reason.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellmaster_common::safety::RuleId;

    #[test]
    fn test_warning_line_names_rule() {
        let verdict = Verdict {
            decision: Decision::Warn,
            reason: "Reboots the machine".to_string(),
            matched_rule: Some(RuleId::new("power-state")),
        };
        assert_eq!(warning_line(&verdict), "Reboots the machine (power-state)");
    }

    #[test]
    fn test_plain_ui_spinner_is_hidden() {
        let ui = Ui::plain();
        assert!(!ui.is_interactive());
        assert!(ui.spinner("thinking").is_hidden());
        assert_eq!(ui.decision_tag(Decision::Block), "[X]");
    }
}
