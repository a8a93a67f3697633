//! Structural analysis of a candidate command.
//!
//! Turns lexer tokens into a flat list of simple commands with their
//! wrappers peeled off (`sudo`, `env`, `xargs`, ...), verbs reduced to a
//! basename and nested scripts (`sh -c`, `su -c`, `eval`, substitutions)
//! analysed recursively. Rules only ever look at this structure, so
//! `echo 'rm -rf /'` is an `echo` with a data argument.

use super::lexer::{tokenize, Operator, RedirectOp, SubstitutionKind, Token, Word};

/// Nesting limit for `sh -c` / `eval` / substitution recursion.
const MAX_DEPTH: usize = 8;

const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "mksh", "ash", "fish"];

/// Reserved words that can precede a command without being its verb.
const RESERVED: &[&str] = &[
    "!", "{", "}", "if", "then", "else", "elif", "fi", "do", "done", "while", "until",
];

/// One argument after the verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub text: String,
    pub quoted: bool,
}

/// A simple command after wrapper removal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimpleCommand {
    /// Basename of the executed program (`/usr/bin/rm` -> `rm`)
    pub verb: String,
    pub args: Vec<Arg>,
    /// Runs under sudo, doas or su
    pub privileged: bool,
    /// Wrappers that were peeled off, outermost first
    pub wrappers: Vec<String>,
    /// 0 for top-level commands, +1 per nested script or substitution
    pub depth: usize,
}

impl SimpleCommand {
    /// Short flags (bundles expanded) and long flags (without dashes).
    pub fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        for arg in &self.args {
            if arg.text == "--" {
                break;
            }
            if let Some(long) = arg.text.strip_prefix("--") {
                let name = long.split('=').next().unwrap_or(long);
                flags.push(name.to_string());
            } else if let Some(short) = arg.text.strip_prefix('-') {
                if short.is_empty() {
                    continue;
                }
                for c in short.chars() {
                    flags.push(c.to_string());
                }
                // single-dash long options such as `find -delete`
                if short.chars().count() > 1 {
                    flags.push(short.to_string());
                }
            }
        }
        flags
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.flags().iter().any(|f| f == name)
    }

    /// Arguments that are not flags, normalised for path matching.
    pub fn positionals(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut options_done = false;
        for arg in &self.args {
            if !options_done && arg.text == "--" {
                options_done = true;
                continue;
            }
            if !options_done && arg.text.starts_with('-') && arg.text.len() > 1 {
                continue;
            }
            out.push(normalize_path_arg(&arg.text));
        }
        out
    }

    /// Space-joined verb and arguments, for display.
    pub fn display(&self) -> String {
        let mut parts = vec![self.verb.clone()];
        parts.extend(self.args.iter().map(|a| a.text.clone()));
        parts.join(" ")
    }
}

/// An output or input redirection attached to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub op: RedirectOp,
    pub fd: Option<u32>,
    pub target: String,
    /// Index into `Analysis::commands` of the command it belongs to, if any
    pub command: Option<usize>,
}

/// Output of one command feeding another (pipe or substitution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feed {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Analysis {
    pub commands: Vec<SimpleCommand>,
    pub redirections: Vec<Redirection>,
    pub feeds: Vec<Feed>,
    /// Set when some part of the text could not be lexed
    pub unparseable: Option<String>,
}

impl Analysis {
    pub fn is_parseable(&self) -> bool {
        self.unparseable.is_none()
    }
}

/// Analyse a full command line.
pub fn analyze(text: &str) -> Analysis {
    let mut analysis = Analysis::default();
    analyze_into(text, 0, false, &mut analysis);
    analysis
}

fn analyze_into(text: &str, depth: usize, privileged: bool, out: &mut Analysis) -> Vec<usize> {
    if depth > MAX_DEPTH {
        out.unparseable
            .get_or_insert_with(|| "nesting too deep".to_string());
        return Vec::new();
    }

    let tokens = match tokenize(text) {
        Ok(tokens) => tokens,
        Err(e) => {
            out.unparseable.get_or_insert_with(|| e.to_string());
            return Vec::new();
        }
    };

    let mut produced = Vec::new();
    let mut words: Vec<Word> = Vec::new();
    let mut redirs: Vec<(RedirectOp, Option<u32>, String)> = Vec::new();
    let mut pending_redirect: Option<(RedirectOp, Option<u32>)> = None;
    let mut stdin: Option<String> = None;
    let mut piped_from: Option<(usize, Option<String>)> = None;

    let mut iter = tokens.into_iter();
    loop {
        let (op, last) = match iter.next() {
            Some(Token::Word(word)) => {
                if let Some((op, fd)) = pending_redirect.take() {
                    // redirect targets may carry substitutions too
                    for sub in &word.substitutions {
                        produced.extend(analyze_into(&sub.body, depth + 1, privileged, out));
                    }
                    match op {
                        RedirectOp::Heredoc => stdin = word.heredoc.clone(),
                        RedirectOp::HereString => stdin = Some(word.text.clone()),
                        _ => {}
                    }
                    redirs.push((op, fd, word.text));
                } else {
                    words.push(word);
                }
                continue;
            }
            Some(Token::Redirect { op, fd }) => {
                pending_redirect = Some((op, fd));
                continue;
            }
            Some(Token::Op(op)) => (Some(op), false),
            None => (None, true),
        };

        let here = stdin.take();
        let idx = finish_command(
            std::mem::take(&mut words),
            std::mem::take(&mut redirs),
            here.clone(),
            depth,
            privileged,
            out,
            &mut produced,
        );

        if let (Some((from, upstream)), Some(to)) = (piped_from.take(), idx) {
            out.feeds.push(Feed { from, to });
            // `cat <<EOF | sh` runs the heredoc body
            if let (Some(script), Some(shell_privileged)) =
                (upstream, stdin_shell(&out.commands[to]))
            {
                produced.extend(analyze_into(&script, depth + 1, shell_privileged, out));
            }
        }
        if last {
            break;
        }
        match op {
            Some(op) if op.is_pipe() => piped_from = idx.map(|i| (i, here)),
            Some(Operator::Subshell) => piped_from = None,
            _ => {}
        }
    }

    produced
}

/// Build one simple command from its words; returns its index if one was
/// recorded.
fn finish_command(
    words: Vec<Word>,
    redirs: Vec<(RedirectOp, Option<u32>, String)>,
    stdin: Option<String>,
    depth: usize,
    privileged: bool,
    out: &mut Analysis,
    produced: &mut Vec<usize>,
) -> Option<usize> {
    // Substitutions run before the command itself
    let mut fed_by = Vec::new();
    for word in &words {
        for sub in &word.substitutions {
            let children = analyze_into(&sub.body, depth + 1, privileged, out);
            produced.extend(children.iter().copied());
            if sub.kind != SubstitutionKind::ProcessOutput {
                fed_by.extend(children);
            }
        }
    }

    let (mut command, ambiguity) = unwrap_command(words, privileged);
    command.depth = depth;
    if let Some(problem) = ambiguity {
        out.unparseable.get_or_insert(problem);
    }

    let idx = if command.verb.is_empty() {
        None
    } else {
        let nested = nested_script(&command).or_else(|| {
            let privileged = stdin_shell(&command)?;
            stdin.map(|script| (script, privileged))
        });
        out.commands.push(command);
        let idx = out.commands.len() - 1;
        produced.push(idx);

        if let Some((script, nested_privileged)) = nested {
            let children = analyze_into(&script, depth + 1, nested_privileged, out);
            produced.extend(children);
        }
        Some(idx)
    };

    if let Some(to) = idx {
        for from in fed_by {
            out.feeds.push(Feed { from, to });
        }
    }

    for (op, fd, target) in redirs {
        out.redirections.push(Redirection {
            op,
            fd,
            target: normalize_path_arg(&target),
            command: idx,
        });
    }

    idx
}

/// Option grammar of a command that runs another command.
struct WrapperSpec {
    name: &'static str,
    /// Short options that consume the next word (`-u root`)
    short_with_arg: &'static [&'static str],
    /// Long options that consume the next word unless written `--opt=value`
    long_with_arg: &'static [&'static str],
    /// Long options known to take no value
    long_flags: &'static [&'static str],
    /// Skip `NAME=value` words (env)
    assignments: bool,
    /// Positional words between the options and the command (timeout's duration)
    operands: usize,
    privileged: bool,
}

const WRAPPERS: &[WrapperSpec] = &[
    WrapperSpec {
        name: "sudo",
        short_with_arg: &["u", "g", "C", "D", "h", "p", "r", "t", "U", "T", "R"],
        long_with_arg: &[
            "user", "group", "close-from", "chdir", "host", "prompt", "role", "type",
            "other-user", "command-timeout", "chroot",
        ],
        long_flags: &[
            "preserve-env", "login", "non-interactive", "shell", "background", "stdin",
            "reset-timestamp", "remove-timestamp", "set-home", "preserve-groups", "askpass",
            "bell", "validate", "list", "edit",
        ],
        assignments: true,
        operands: 0,
        privileged: true,
    },
    WrapperSpec {
        name: "doas",
        short_with_arg: &["u", "C"],
        long_with_arg: &[],
        long_flags: &[],
        assignments: false,
        operands: 0,
        privileged: true,
    },
    WrapperSpec {
        name: "env",
        short_with_arg: &["u", "C", "S"],
        long_with_arg: &["unset", "chdir", "split-string", "default-signal", "ignore-signal", "block-signal"],
        long_flags: &["ignore-environment", "null", "debug", "list-signal-handling"],
        assignments: true,
        operands: 0,
        privileged: false,
    },
    WrapperSpec {
        name: "nice",
        short_with_arg: &["n"],
        long_with_arg: &["adjustment"],
        long_flags: &[],
        assignments: false,
        operands: 0,
        privileged: false,
    },
    WrapperSpec {
        name: "time",
        short_with_arg: &["f", "o"],
        long_with_arg: &["format", "output"],
        long_flags: &["verbose", "portability", "append", "quiet"],
        assignments: false,
        operands: 0,
        privileged: false,
    },
    WrapperSpec {
        name: "command",
        short_with_arg: &[],
        long_with_arg: &[],
        long_flags: &[],
        assignments: false,
        operands: 0,
        privileged: false,
    },
    WrapperSpec {
        name: "exec",
        short_with_arg: &["a"],
        long_with_arg: &[],
        long_flags: &[],
        assignments: false,
        operands: 0,
        privileged: false,
    },
    WrapperSpec {
        name: "stdbuf",
        short_with_arg: &["i", "o", "e"],
        long_with_arg: &["input", "output", "error"],
        long_flags: &[],
        assignments: false,
        operands: 0,
        privileged: false,
    },
    WrapperSpec {
        name: "ionice",
        short_with_arg: &["c", "n", "p", "P", "u"],
        long_with_arg: &["class", "classdata", "pid", "pgid", "uid"],
        long_flags: &["ignore"],
        assignments: false,
        operands: 0,
        privileged: false,
    },
    WrapperSpec {
        name: "timeout",
        short_with_arg: &["s", "k"],
        long_with_arg: &["signal", "kill-after"],
        long_flags: &["preserve-status", "foreground", "verbose"],
        assignments: false,
        operands: 1,
        privileged: false,
    },
    WrapperSpec {
        name: "xargs",
        short_with_arg: &["I", "n", "P", "L", "s", "d", "E", "a"],
        long_with_arg: &[
            "max-args", "max-procs", "max-lines", "max-chars", "delimiter", "arg-file", "eof",
            "process-slot-var",
        ],
        long_flags: &[
            "null", "no-run-if-empty", "verbose", "interactive", "exit", "open-tty",
            "show-limits", "replace",
        ],
        assignments: false,
        operands: 0,
        privileged: false,
    },
];

/// How many leading words a wrapper occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Skip {
    Words(usize),
    /// An unknown long option is followed by a word that may be its value
    /// or the wrapped verb; the count assumes it takes no value.
    Ambiguous { words: usize, option: String },
}

/// Peel wrappers, assignments and reserved words off a word list. The
/// second value describes an option that made the split ambiguous.
fn unwrap_command(words: Vec<Word>, privileged: bool) -> (SimpleCommand, Option<String>) {
    let mut rest: Vec<Word> = words;
    let mut command = SimpleCommand {
        privileged,
        ..Default::default()
    };
    let mut ambiguity = None;

    loop {
        // reserved words and leading assignments
        while let Some(first) = rest.first() {
            if !first.quoted && (RESERVED.contains(&first.text.as_str()) || is_assignment(&first.text)) {
                rest.remove(0);
            } else {
                break;
            }
        }

        let Some(first) = rest.first() else {
            return (command, ambiguity);
        };

        let verb = basename(&first.text);
        let skip = match verb.as_str() {
            "nohup" | "builtin" | "setsid" | "busybox" => Some(1),
            name => WRAPPERS.iter().find(|w| w.name == name).map(|spec| {
                if spec.privileged {
                    command.privileged = true;
                }
                match wrapper_skip(&rest, spec) {
                    Skip::Words(n) => n,
                    Skip::Ambiguous { words, option } => {
                        ambiguity.get_or_insert_with(|| {
                            format!("cannot tell whether {} option --{} takes a value", spec.name, option)
                        });
                        words
                    }
                }
            }),
        };

        match skip {
            Some(n) if n < rest.len() => {
                command.wrappers.push(verb);
                rest.drain(..n);
            }
            _ => {
                command.verb = verb;
                command.args = rest
                    .into_iter()
                    .skip(1)
                    .map(|w| Arg {
                        text: w.text,
                        quoted: w.quoted,
                    })
                    .collect();
                return (command, ambiguity);
            }
        }
    }
}

/// Number of leading words a wrapper occupies: the wrapper itself, its
/// options with their values, and its fixed operands.
fn wrapper_skip(words: &[Word], spec: &WrapperSpec) -> Skip {
    let mut i = 1;
    let mut ambiguous: Option<String> = None;
    while i < words.len() {
        let text = words[i].text.as_str();
        if text == "--" {
            i += 1;
            break;
        }
        if spec.assignments && is_assignment(text) {
            i += 1;
            continue;
        }
        let Some(opt) = text.strip_prefix('-') else {
            break;
        };
        if opt.is_empty() {
            i += 1;
            continue;
        }
        if let Some(long) = opt.strip_prefix('-') {
            // `--user=root` carries its value
            if long.contains('=') {
                i += 1;
                continue;
            }
            if spec.long_with_arg.contains(&long) {
                i += 2;
                continue;
            }
            let next_is_word = words
                .get(i + 1)
                .map(|w| !w.text.starts_with('-'))
                .unwrap_or(false);
            if !spec.long_flags.contains(&long) && next_is_word && ambiguous.is_none() {
                ambiguous = Some(long.to_string());
            }
            i += 1;
            continue;
        }
        // `-n5` has its argument attached; `-n 5` takes the next word
        let last = opt.chars().last().map(|c| c.to_string()).unwrap_or_default();
        let takes_next = opt.chars().count() == 1 && spec.short_with_arg.contains(&last.as_str())
            || (opt.chars().count() > 1
                && opt.chars().all(|c| c.is_ascii_alphabetic())
                && spec.short_with_arg.contains(&last.as_str()));
        i += if takes_next { 2 } else { 1 };
    }

    let words_used = i + spec.operands;
    match ambiguous {
        Some(option) => Skip::Ambiguous {
            words: words_used,
            option,
        },
        None => Skip::Words(words_used),
    }
}

/// For `sh -c SCRIPT`, `su -c SCRIPT` and `eval ARGS`, the script to recurse into.
fn nested_script(command: &SimpleCommand) -> Option<(String, bool)> {
    let verb = command.verb.as_str();

    if verb == "eval" {
        let script = command
            .args
            .iter()
            .map(|a| a.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        return Some((script, command.privileged));
    }

    if SHELLS.contains(&verb) || verb == "su" {
        let privileged = command.privileged || verb == "su";
        let mut iter = command.args.iter();
        while let Some(arg) = iter.next() {
            let text = arg.text.as_str();
            if let Some(script) = text.strip_prefix("--command=") {
                return Some((script.to_string(), privileged));
            }
            let is_c = text == "--command"
                || (text.starts_with('-') && !text.starts_with("--") && text[1..].contains('c'));
            if is_c {
                return iter.next().map(|script| (script.text.clone(), privileged));
            }
        }
    }

    None
}

/// For a shell that reads its script from stdin, whether it runs privileged.
fn stdin_shell(command: &SimpleCommand) -> Option<bool> {
    let verb = command.verb.as_str();
    if !(SHELLS.contains(&verb) || verb == "su") || nested_script(command).is_some() {
        return None;
    }
    // `bash script.sh` reads the file, not stdin
    if verb != "su" && !command.positionals().is_empty() && !command.has_flag("s") {
        return None;
    }
    Some(command.privileged || verb == "su")
}

fn is_assignment(text: &str) -> bool {
    match text.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_alphabetic() || c == '_')
                    .unwrap_or(false)
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn basename(text: &str) -> String {
    text.rsplit('/').next().unwrap_or(text).to_string()
}

/// Collapse duplicate slashes and drop a trailing slash (except for `/`).
pub fn normalize_path_arg(text: &str) -> String {
    if !text.contains('/') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut prev_slash = false;
    for c in text.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verbs(text: &str) -> Vec<String> {
        analyze(text).commands.into_iter().map(|c| c.verb).collect()
    }

    #[test]
    fn test_simple_pipeline() {
        let a = analyze("df -h | grep sda");
        assert_eq!(verbs("df -h | grep sda"), vec!["df", "grep"]);
        assert_eq!(a.feeds, vec![Feed { from: 0, to: 1 }]);
    }

    #[test]
    fn test_wrappers_are_peeled() {
        let a = analyze("sudo -u root env FOO=1 nice -n 5 /bin/rm -rf /");
        let cmd = &a.commands[0];
        assert_eq!(cmd.verb, "rm");
        assert!(cmd.privileged);
        assert_eq!(cmd.wrappers, vec!["sudo", "env", "nice"]);
        assert!(cmd.has_flag("r"));
        assert!(cmd.has_flag("f"));
        assert_eq!(cmd.positionals(), vec!["/"]);
    }

    #[test]
    fn test_escaped_verb() {
        assert_eq!(verbs(r"\rm -r x"), vec!["rm"]);
    }

    #[test]
    fn test_timeout_skips_duration() {
        assert_eq!(verbs("timeout -s KILL 10 dd if=/dev/zero of=x"), vec!["dd"]);
    }

    #[test]
    fn test_shell_c_recurses() {
        let a = analyze("bash -lc 'rm -rf /home'");
        assert_eq!(
            a.commands.iter().map(|c| c.verb.as_str()).collect::<Vec<_>>(),
            vec!["bash", "rm"]
        );
        assert_eq!(a.commands[1].depth, 1);
    }

    #[test]
    fn test_su_c_is_privileged() {
        let a = analyze("su - root -c 'chmod -R 777 /'");
        let chmod = a.commands.iter().find(|c| c.verb == "chmod").unwrap();
        assert!(chmod.privileged);
    }

    #[test]
    fn test_substitution_recurses() {
        let a = analyze("echo $(rm -rf ~)");
        assert!(a.commands.iter().any(|c| c.verb == "rm"));
    }

    #[test]
    fn test_quoted_data_is_not_code() {
        assert_eq!(verbs("echo 'rm -rf /'"), vec!["echo"]);
        assert_eq!(verbs(r#"grep -r "rm -rf /" ."#), vec!["grep"]);
    }

    #[test]
    fn test_redirection_targets() {
        let a = analyze("echo x > /etc//hosts 2>/dev/null");
        assert_eq!(a.redirections.len(), 2);
        assert_eq!(a.redirections[0].target, "/etc/hosts");
        assert_eq!(a.redirections[0].command, Some(0));
    }

    #[test]
    fn test_process_substitution_feeds_command() {
        let a = analyze("bash <(curl -fsSL https://example.com/x.sh)");
        let curl = a.commands.iter().position(|c| c.verb == "curl").unwrap();
        let bash = a.commands.iter().position(|c| c.verb == "bash").unwrap();
        assert!(a.feeds.contains(&Feed { from: curl, to: bash }));
    }

    #[test]
    fn test_unparseable() {
        let a = analyze("echo 'unterminated");
        assert!(!a.is_parseable());
        assert!(a.commands.is_empty());
    }

    #[test]
    fn test_heredoc_fed_to_shell_is_analyzed() {
        assert_eq!(verbs("cat <<EOF\nrm -rf /\nEOF"), vec!["cat"]);
        assert!(verbs("bash <<EOF\nrm -rf /\nEOF").contains(&"rm".to_string()));
        assert!(verbs("cat <<'EOF' | sh\nrm -rf /\nEOF").contains(&"rm".to_string()));
        assert!(verbs("sh <<< 'reboot'").contains(&"reboot".to_string()));
        // a script file argument means stdin is not the script
        assert_eq!(verbs("bash build.sh <<EOF\nrm -rf /\nEOF"), vec!["bash"]);
    }

    #[test]
    fn test_long_wrapper_options_are_peeled() {
        let a = analyze("sudo --user root timeout --signal=KILL --kill-after 1 5 rm -rf /");
        assert!(a.is_parseable());
        assert_eq!(a.commands[0].verb, "rm");
        assert_eq!(a.commands[0].wrappers, vec!["sudo", "timeout"]);
        assert!(a.commands[0].privileged);
    }

    #[test]
    fn test_unknown_long_wrapper_option_is_unparseable() {
        let a = analyze("sudo --frobnicate root rm -rf /");
        assert!(!a.is_parseable());
        // a trailing flag leaves no doubt
        assert!(analyze("sudo --preserve-env rm -rf /").is_parseable());
    }

    #[test]
    fn test_normalize_path_arg() {
        assert_eq!(normalize_path_arg("//"), "/");
        assert_eq!(normalize_path_arg("/home/"), "/home");
        assert_eq!(normalize_path_arg("/var//log/"), "/var/log");
        assert_eq!(normalize_path_arg("file.txt"), "file.txt");
    }
}
