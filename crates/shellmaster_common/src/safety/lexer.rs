//! Shell lexer for candidate commands.
//!
//! Produces words, control operators and redirections. It understands enough
//! of POSIX sh to keep quoted data apart from code: single and double quotes,
//! backslash escapes, `$(...)`, backticks and process substitution. Bodies of
//! substitutions are returned verbatim so the analyzer can recurse into them.
//! Heredoc bodies are data: they are cut out of the token stream and kept on
//! the delimiter word. It does not expand anything.

use std::fmt;

/// A word after quote removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    /// Text with quotes and escapes removed. Substitutions are kept literally.
    pub text: String,
    /// True when any part of the word was quoted or escaped.
    pub quoted: bool,
    /// Bodies of `$(...)`, backtick and process substitutions inside this word.
    pub substitutions: Vec<Substitution>,
    /// Body of the heredoc this word delimits, when it follows `<<`.
    pub heredoc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub body: String,
    pub kind: SubstitutionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstitutionKind {
    /// `$(...)` or backticks
    Command,
    /// `<(...)`
    ProcessInput,
    /// `>(...)`
    ProcessOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `|`
    Pipe,
    /// `|&`
    PipeAll,
    /// `||`
    Or,
    /// `&&`
    And,
    /// `&`
    Background,
    /// `;`
    Semi,
    Newline,
    /// `(` or `)`
    Subshell,
}

impl Operator {
    pub fn is_pipe(&self) -> bool {
        matches!(self, Operator::Pipe | Operator::PipeAll)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    /// `>`
    Write,
    /// `>>`
    Append,
    /// `>|`
    Clobber,
    /// `&>`
    WriteAll,
    /// `&>>`
    AppendAll,
    /// `<`
    Read,
    /// `<>`
    ReadWrite,
    /// `<<` and `<<-`
    Heredoc,
    /// `<<<`
    HereString,
    /// `>&` and `<&`
    Duplicate,
}

impl RedirectOp {
    /// Whether the target is a file that gets written.
    pub fn writes_file(&self) -> bool {
        matches!(
            self,
            RedirectOp::Write
                | RedirectOp::Append
                | RedirectOp::Clobber
                | RedirectOp::WriteAll
                | RedirectOp::AppendAll
                | RedirectOp::ReadWrite
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectOp::Write => ">",
            RedirectOp::Append => ">>",
            RedirectOp::Clobber => ">|",
            RedirectOp::WriteAll => "&>",
            RedirectOp::AppendAll => "&>>",
            RedirectOp::Read => "<",
            RedirectOp::ReadWrite => "<>",
            RedirectOp::Heredoc => "<<",
            RedirectOp::HereString => "<<<",
            RedirectOp::Duplicate => ">&",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(Word),
    Op(Operator),
    Redirect { op: RedirectOp, fd: Option<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    UnterminatedSingleQuote,
    UnterminatedDoubleQuote,
    UnterminatedBacktick,
    UnbalancedParen,
    UnbalancedBrace,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            LexError::UnterminatedSingleQuote => "unterminated single quote",
            LexError::UnterminatedDoubleQuote => "unterminated double quote",
            LexError::UnterminatedBacktick => "unterminated backtick",
            LexError::UnbalancedParen => "unbalanced parenthesis",
            LexError::UnbalancedBrace => "unbalanced brace",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for LexError {}

/// Split `input` into tokens.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(input).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    heredocs: Vec<PendingHeredoc>,
}

/// A `<<WORD` seen on the current line whose body starts after the newline.
struct PendingHeredoc {
    delimiter: String,
    strip_tabs: bool,
    /// Unquoted delimiters leave `$(...)` and backticks live in the body
    expands: bool,
    token: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Lexer {
            chars: input.chars().collect(),
            pos: 0,
            heredocs: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => self.pos += 1,
                '\n' => {
                    self.pos += 1;
                    tokens.push(Token::Op(Operator::Newline));
                    self.read_heredoc_bodies(&mut tokens)?;
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                ';' => {
                    self.pos += 1;
                    // `;;` only appears in case arms; treat it like `;`
                    if self.peek() == Some(';') {
                        self.pos += 1;
                    }
                    tokens.push(Token::Op(Operator::Semi));
                }
                '|' => {
                    self.pos += 1;
                    let op = match self.peek() {
                        Some('|') => {
                            self.pos += 1;
                            Operator::Or
                        }
                        Some('&') => {
                            self.pos += 1;
                            Operator::PipeAll
                        }
                        _ => Operator::Pipe,
                    };
                    tokens.push(Token::Op(op));
                }
                '&' => match self.peek_at(1) {
                    Some('&') => {
                        self.pos += 2;
                        tokens.push(Token::Op(Operator::And));
                    }
                    Some('>') => {
                        self.pos += 2;
                        let op = if self.peek() == Some('>') {
                            self.pos += 1;
                            RedirectOp::AppendAll
                        } else {
                            RedirectOp::WriteAll
                        };
                        tokens.push(Token::Redirect { op, fd: None });
                    }
                    _ => {
                        self.pos += 1;
                        tokens.push(Token::Op(Operator::Background));
                    }
                },
                '(' | ')' => {
                    self.pos += 1;
                    tokens.push(Token::Op(Operator::Subshell));
                }
                '<' | '>' if self.peek_at(1) == Some('(') => {
                    tokens.push(Token::Word(self.read_word()?));
                }
                '<' | '>' => {
                    let op = self.read_redirect();
                    tokens.push(Token::Redirect { op, fd: None });
                    if op == RedirectOp::Heredoc {
                        self.read_heredoc_delimiter(&mut tokens)?;
                    }
                }
                _ => {
                    let word = self.read_word()?;
                    // `2>file`: an unquoted all-digit word glued to a redirection is its fd
                    if !word.quoted
                        && !word.text.is_empty()
                        && word.text.chars().all(|c| c.is_ascii_digit())
                        && matches!(self.peek(), Some('<') | Some('>'))
                        && self.peek_at(1) != Some('(')
                    {
                        let fd = word.text.parse().ok();
                        let op = self.read_redirect();
                        tokens.push(Token::Redirect { op, fd });
                        if op == RedirectOp::Heredoc {
                            self.read_heredoc_delimiter(&mut tokens)?;
                        }
                    } else {
                        tokens.push(Token::Word(word));
                    }
                }
            }
        }

        // A heredoc cut short by end of input still swallows the rest
        self.read_heredoc_bodies(&mut tokens)?;
        Ok(tokens)
    }

    /// Read the word after `<<` and remember that its body follows the next newline.
    fn read_heredoc_delimiter(&mut self, tokens: &mut Vec<Token>) -> Result<(), LexError> {
        let strip_tabs = self.pos > 0 && self.chars[self.pos - 1] == '-';
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.pos += 1;
        }
        let word = self.read_word()?;
        if word.text.is_empty() {
            return Ok(());
        }
        self.heredocs.push(PendingHeredoc {
            delimiter: word.text.clone(),
            strip_tabs,
            expands: !word.quoted,
            token: tokens.len(),
        });
        tokens.push(Token::Word(word));
        Ok(())
    }

    /// Consume the bodies of every heredoc opened on the line just ended.
    fn read_heredoc_bodies(&mut self, tokens: &mut [Token]) -> Result<(), LexError> {
        for heredoc in std::mem::take(&mut self.heredocs) {
            let mut body = String::new();
            while self.pos < self.chars.len() {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    self.pos += 1;
                    if c == '\n' {
                        break;
                    }
                }
                let line: String = self.chars[start..self.pos].iter().collect();
                let content = line.trim_end_matches(['\n', '\r']);
                let content = if heredoc.strip_tabs {
                    content.trim_start_matches('\t')
                } else {
                    content
                };
                if content == heredoc.delimiter {
                    break;
                }
                body.push_str(&line);
            }

            let substitutions = if heredoc.expands {
                Lexer::new(&body).body_substitutions()?
            } else {
                Vec::new()
            };
            if let Some(Token::Word(word)) = tokens.get_mut(heredoc.token) {
                word.substitutions.extend(substitutions);
                word.heredoc = Some(body);
            }
        }
        Ok(())
    }

    /// Command substitutions inside an expanding heredoc body. Quotes are
    /// plain characters there, so only `\`, `$` and backticks matter.
    fn body_substitutions(mut self) -> Result<Vec<Substitution>, LexError> {
        let mut word = Word {
            text: String::new(),
            quoted: false,
            substitutions: Vec::new(),
            heredoc: None,
        };
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.pos += 2,
                '$' => self.read_dollar(&mut word)?,
                '`' => {
                    self.pos += 1;
                    let body = self.read_backtick()?;
                    word.substitutions.push(Substitution {
                        body,
                        kind: SubstitutionKind::Command,
                    });
                }
                _ => self.pos += 1,
            }
        }
        Ok(word.substitutions)
    }

    fn read_redirect(&mut self) -> RedirectOp {
        let first = self.chars[self.pos];
        self.pos += 1;
        if first == '>' {
            match self.peek() {
                Some('>') => {
                    self.pos += 1;
                    RedirectOp::Append
                }
                Some('|') => {
                    self.pos += 1;
                    RedirectOp::Clobber
                }
                Some('&') => {
                    self.pos += 1;
                    RedirectOp::Duplicate
                }
                _ => RedirectOp::Write,
            }
        } else {
            match self.peek() {
                Some('<') => {
                    self.pos += 1;
                    match self.peek() {
                        Some('<') => {
                            self.pos += 1;
                            RedirectOp::HereString
                        }
                        Some('-') => {
                            self.pos += 1;
                            RedirectOp::Heredoc
                        }
                        _ => RedirectOp::Heredoc,
                    }
                }
                Some('>') => {
                    self.pos += 1;
                    RedirectOp::ReadWrite
                }
                Some('&') => {
                    self.pos += 1;
                    RedirectOp::Duplicate
                }
                _ => RedirectOp::Read,
            }
        }
    }

    fn read_word(&mut self) -> Result<Word, LexError> {
        let mut word = Word {
            text: String::new(),
            quoted: false,
            substitutions: Vec::new(),
            heredoc: None,
        };

        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' | ';' | '|' | '&' | ')' => break,
                // `name()` in function definitions ends the word too
                '(' => break,
                '<' | '>' => {
                    if self.peek_at(1) == Some('(') {
                        self.pos += 2;
                        let body = self.read_balanced_paren()?;
                        word.text.push(c);
                        word.text.push('(');
                        word.text.push_str(&body);
                        word.text.push(')');
                        word.substitutions.push(Substitution {
                            body,
                            kind: if c == '<' {
                                SubstitutionKind::ProcessInput
                            } else {
                                SubstitutionKind::ProcessOutput
                            },
                        });
                    } else {
                        break;
                    }
                }
                '\'' => {
                    self.pos += 1;
                    word.quoted = true;
                    loop {
                        match self.peek() {
                            Some('\'') => {
                                self.pos += 1;
                                break;
                            }
                            Some(c) => {
                                word.text.push(c);
                                self.pos += 1;
                            }
                            None => return Err(LexError::UnterminatedSingleQuote),
                        }
                    }
                }
                '"' => {
                    self.pos += 1;
                    word.quoted = true;
                    self.read_double_quoted(&mut word)?;
                }
                '\\' => {
                    self.pos += 1;
                    match self.peek() {
                        // line continuation
                        Some('\n') => self.pos += 1,
                        Some(c) => {
                            word.quoted = true;
                            word.text.push(c);
                            self.pos += 1;
                        }
                        None => word.text.push('\\'),
                    }
                }
                '$' => self.read_dollar(&mut word)?,
                '`' => {
                    self.pos += 1;
                    let body = self.read_backtick()?;
                    word.text.push('`');
                    word.text.push_str(&body);
                    word.text.push('`');
                    word.substitutions.push(Substitution {
                        body,
                        kind: SubstitutionKind::Command,
                    });
                }
                _ => {
                    word.text.push(c);
                    self.pos += 1;
                }
            }
        }

        Ok(word)
    }

    fn read_double_quoted(&mut self, word: &mut Word) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some('"') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ ('"' | '\\' | '$' | '`')) => {
                            word.text.push(c);
                            self.pos += 1;
                        }
                        Some('\n') => self.pos += 1,
                        Some(c) => {
                            word.text.push('\\');
                            word.text.push(c);
                            self.pos += 1;
                        }
                        None => return Err(LexError::UnterminatedDoubleQuote),
                    }
                }
                Some('$') => self.read_dollar(word)?,
                Some('`') => {
                    self.pos += 1;
                    let body = self.read_backtick()?;
                    word.text.push('`');
                    word.text.push_str(&body);
                    word.text.push('`');
                    word.substitutions.push(Substitution {
                        body,
                        kind: SubstitutionKind::Command,
                    });
                }
                Some(c) => {
                    word.text.push(c);
                    self.pos += 1;
                }
                None => return Err(LexError::UnterminatedDoubleQuote),
            }
        }
    }

    /// Handles `$(...)`, `$((...))`, `${...}` and plain `$`.
    fn read_dollar(&mut self, word: &mut Word) -> Result<(), LexError> {
        self.pos += 1;
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let body = self.read_balanced_paren()?;
                word.text.push_str("$(");
                word.text.push_str(&body);
                word.text.push(')');
                // `$((1+2))` is arithmetic, not a command
                let arithmetic = body.starts_with('(') && body.ends_with(')');
                if !arithmetic {
                    word.substitutions.push(Substitution {
                        body,
                        kind: SubstitutionKind::Command,
                    });
                }
            }
            Some('{') => {
                self.pos += 1;
                word.text.push_str("${");
                let mut depth = 1;
                loop {
                    match self.peek() {
                        Some('{') => depth += 1,
                        Some('}') => {
                            depth -= 1;
                            if depth == 0 {
                                self.pos += 1;
                                word.text.push('}');
                                break;
                            }
                        }
                        Some(_) => {}
                        None => return Err(LexError::UnbalancedBrace),
                    }
                    if let Some(c) = self.peek() {
                        word.text.push(c);
                    }
                    self.pos += 1;
                }
            }
            _ => word.text.push('$'),
        }
        Ok(())
    }

    /// Reads up to the `)` matching an already-consumed `(`; returns the body.
    fn read_balanced_paren(&mut self) -> Result<String, LexError> {
        let mut body = String::new();
        let mut depth = 1usize;

        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(body);
                    }
                }
                '\\' => {
                    body.push(c);
                    if let Some(next) = self.peek() {
                        body.push(next);
                        self.pos += 1;
                    }
                    continue;
                }
                '\'' => {
                    body.push(c);
                    loop {
                        match self.peek() {
                            Some(q) => {
                                body.push(q);
                                self.pos += 1;
                                if q == '\'' {
                                    break;
                                }
                            }
                            None => return Err(LexError::UnterminatedSingleQuote),
                        }
                    }
                    continue;
                }
                '"' => {
                    body.push(c);
                    loop {
                        match self.peek() {
                            Some('\\') => {
                                body.push('\\');
                                self.pos += 1;
                                if let Some(next) = self.peek() {
                                    body.push(next);
                                    self.pos += 1;
                                }
                            }
                            Some(q) => {
                                body.push(q);
                                self.pos += 1;
                                if q == '"' {
                                    break;
                                }
                            }
                            None => return Err(LexError::UnterminatedDoubleQuote),
                        }
                    }
                    continue;
                }
                _ => {}
            }
            body.push(c);
        }

        Err(LexError::UnbalancedParen)
    }

    fn read_backtick(&mut self) -> Result<String, LexError> {
        let mut body = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '`' => return Ok(body),
                '\\' => {
                    if let Some(next) = self.peek() {
                        if next != '`' {
                            body.push('\\');
                        }
                        body.push(next);
                        self.pos += 1;
                    }
                }
                _ => body.push(c),
            }
        }
        Err(LexError::UnterminatedBacktick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(input: &str) -> Vec<String> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w.text),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_quotes_removed() {
        assert_eq!(words(r#"echo 'a b' "c d" e\ f"#), vec!["echo", "a b", "c d", "e f"]);
    }

    #[test]
    fn test_operators() {
        let tokens = tokenize("a && b || c | d; e &").unwrap();
        let ops: Vec<Operator> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Op(op) => Some(*op),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                Operator::And,
                Operator::Or,
                Operator::Pipe,
                Operator::Semi,
                Operator::Background
            ]
        );
    }

    #[test]
    fn test_redirections_with_fd() {
        let tokens = tokenize("cmd 2>/dev/null >>log &>all").unwrap();
        assert!(tokens.contains(&Token::Redirect {
            op: RedirectOp::Write,
            fd: Some(2)
        }));
        assert!(tokens.contains(&Token::Redirect {
            op: RedirectOp::Append,
            fd: None
        }));
        assert!(tokens.contains(&Token::Redirect {
            op: RedirectOp::WriteAll,
            fd: None
        }));
    }

    #[test]
    fn test_command_substitution_extracted() {
        let tokens = tokenize(r#"echo "$(rm -rf /tmp/x)" `id`"#).unwrap();
        let subs: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w.substitutions.clone()),
                _ => None,
            })
            .flatten()
            .map(|s| s.body)
            .collect();
        assert_eq!(subs, vec!["rm -rf /tmp/x", "id"]);
    }

    #[test]
    fn test_single_quotes_hide_substitution() {
        let tokens = tokenize("echo '$(reboot)'").unwrap();
        for token in tokens {
            if let Token::Word(w) = token {
                assert!(w.substitutions.is_empty());
            }
        }
    }

    #[test]
    fn test_process_substitution() {
        let tokens = tokenize("bash <(curl -s http://x)").unwrap();
        let Token::Word(word) = &tokens[1] else {
            panic!("expected word");
        };
        assert_eq!(word.substitutions[0].kind, SubstitutionKind::ProcessInput);
        assert_eq!(word.substitutions[0].body, "curl -s http://x");
    }

    #[test]
    fn test_arithmetic_is_not_a_command() {
        let tokens = tokenize("echo $((1 + 2))").unwrap();
        let Token::Word(word) = &tokens[1] else {
            panic!("expected word");
        };
        assert!(word.substitutions.is_empty());
    }

    #[test]
    fn test_heredoc_body_is_data() {
        let tokens = tokenize("cat <<EOF\nrm -rf /\ndon't panic\nEOF\necho done").unwrap();
        assert_eq!(
            words("cat <<EOF\nrm -rf /\ndon't panic\nEOF\necho done"),
            vec!["cat", "EOF", "echo", "done"]
        );
        let Token::Word(delimiter) = &tokens[2] else {
            panic!("expected delimiter word");
        };
        assert_eq!(delimiter.heredoc.as_deref(), Some("rm -rf /\ndon't panic\n"));
        assert!(delimiter.substitutions.is_empty());
    }

    #[test]
    fn test_heredoc_tab_stripping_and_quoted_delimiter() {
        let tokens = tokenize("cat <<-'END'\n\t$(reboot)\n\tEND\n").unwrap();
        let Token::Word(delimiter) = &tokens[2] else {
            panic!("expected delimiter word");
        };
        assert!(delimiter.quoted);
        assert_eq!(delimiter.heredoc.as_deref(), Some("\t$(reboot)\n"));
        assert!(delimiter.substitutions.is_empty());
    }

    #[test]
    fn test_unquoted_heredoc_keeps_substitutions() {
        let tokens = tokenize("cat <<EOF\nhost: $(hostname)\nEOF").unwrap();
        let Token::Word(delimiter) = &tokens[2] else {
            panic!("expected delimiter word");
        };
        assert_eq!(delimiter.substitutions[0].body, "hostname");
    }

    #[test]
    fn test_unterminated_heredoc_runs_to_end() {
        assert_eq!(words("cat <<EOF\nrm -rf /"), vec!["cat", "EOF"]);
    }

    #[test]
    fn test_unbalanced_input() {
        assert_eq!(tokenize("echo 'oops"), Err(LexError::UnterminatedSingleQuote));
        assert_eq!(tokenize("echo \"oops"), Err(LexError::UnterminatedDoubleQuote));
        assert_eq!(tokenize("echo $(ls"), Err(LexError::UnbalancedParen));
    }
}
