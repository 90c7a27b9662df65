//! Shell-style splitting of a command line into program and arguments.
//!
//! Supported: single quotes, double quotes, backslash escapes, `$NAME` and
//! `${NAME}` parameter expansion, a leading `~` for the home directory and
//! `#` comments. Unquoted expansions are split into fields on blanks; quoted
//! ones are not. Everything that would need a real shell (pipes, redirection,
//! command lists, subshells, command substitution) is rejected.

use std::iter::Peekable;
use std::str::Chars;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizeError {
    #[error("reached end of command without closing quote {0}")]
    UnterminatedQuote(char),

    #[error("reached end of command after a backslash")]
    DanglingEscape,

    #[error("reached end of command without closing brace of parameter expansion")]
    UnterminatedBrace,

    #[error("bad substitution: {0}")]
    BadSubstitution(String),

    #[error("command substitution is not supported")]
    CommandSubstitution,

    #[error("unsupported shell operator {0:?}")]
    Operator(char),

    #[error("unsupported special parameter ${0}")]
    SpecialParameter(char),
}

/// Result of reading a `$` sequence.
enum Parameter {
    /// A lone `$` that does not start an expansion.
    Dollar,
    Value(String),
}

struct Splitter<'a, F> {
    chars: Peekable<Chars<'a>>,
    lookup: F,
    words: Vec<String>,
    current: String,
    /// Whether `current` holds a word, possibly empty (`''`).
    in_word: bool,
}

/// Split `command` into words, expanding variables through `lookup`.
///
/// An unset variable expands to nothing.
///
/// # Examples
///
/// ```ignore
/// let words = split("ls -l \"$HOME/my files\"", |name| std::env::var(name).ok())?;
/// ```
pub fn split<F>(command: &str, lookup: F) -> Result<Vec<String>, TokenizeError>
where
    F: Fn(&str) -> Option<String>,
{
    Splitter {
        chars: command.chars().peekable(),
        lookup,
        words: Vec::new(),
        current: String::new(),
        in_word: false,
    }
    .run()
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n')
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<F> Splitter<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn run(mut self) -> Result<Vec<String>, TokenizeError> {
        while let Some(c) = self.chars.next() {
            match c {
                c if is_blank(c) => self.finish_word(),
                '\'' => self.single_quoted()?,
                '"' => self.double_quoted()?,
                '\\' => match self.chars.next() {
                    None => return Err(TokenizeError::DanglingEscape),
                    Some('\n') => {}
                    Some(escaped) => self.push(escaped),
                },
                '$' => match self.parameter()? {
                    Parameter::Dollar => self.push('$'),
                    Parameter::Value(value) => self.push_fields(&value),
                },
                '~' if !self.in_word
                    && self.chars.peek().is_none_or(|&c| c == '/' || is_blank(c)) =>
                {
                    let home = self.value_of("HOME");
                    self.current.push_str(&home);
                    self.in_word = true;
                }
                '#' if !self.in_word => break,
                '`' => return Err(TokenizeError::CommandSubstitution),
                '|' | '&' | ';' | '<' | '>' | '(' | ')' => return Err(TokenizeError::Operator(c)),
                c => self.push(c),
            }
        }
        self.finish_word();
        Ok(self.words)
    }

    fn push(&mut self, c: char) {
        self.current.push(c);
        self.in_word = true;
    }

    fn finish_word(&mut self) {
        if self.in_word {
            self.words.push(std::mem::take(&mut self.current));
            self.in_word = false;
        }
    }

    /// Append an unquoted expansion, splitting it into fields on blanks.
    fn push_fields(&mut self, value: &str) {
        for (i, field) in value.split(is_blank).enumerate() {
            if i > 0 {
                self.finish_word();
            }
            if !field.is_empty() {
                self.current.push_str(field);
                self.in_word = true;
            }
        }
    }

    fn single_quoted(&mut self) -> Result<(), TokenizeError> {
        self.in_word = true;
        loop {
            match self.chars.next() {
                None => return Err(TokenizeError::UnterminatedQuote('\'')),
                Some('\'') => return Ok(()),
                Some(c) => self.current.push(c),
            }
        }
    }

    fn double_quoted(&mut self) -> Result<(), TokenizeError> {
        self.in_word = true;
        loop {
            match self.chars.next() {
                None => return Err(TokenizeError::UnterminatedQuote('"')),
                Some('"') => return Ok(()),
                Some('\\') => match self.chars.peek() {
                    Some(&c) if matches!(c, '$' | '`' | '"' | '\\') => {
                        self.chars.next();
                        self.current.push(c);
                    }
                    Some('\n') => {
                        self.chars.next();
                    }
                    _ => self.current.push('\\'),
                },
                Some('$') => match self.parameter()? {
                    Parameter::Dollar => self.current.push('$'),
                    Parameter::Value(value) => self.current.push_str(&value),
                },
                Some('`') => return Err(TokenizeError::CommandSubstitution),
                Some(c) => self.current.push(c),
            }
        }
    }

    /// Read what follows a `$`.
    fn parameter(&mut self) -> Result<Parameter, TokenizeError> {
        match self.chars.peek().copied() {
            Some('{') => {
                self.chars.next();
                let mut name = String::new();
                loop {
                    match self.chars.next() {
                        None => return Err(TokenizeError::UnterminatedBrace),
                        Some('}') => break,
                        Some(c) => name.push(c),
                    }
                }
                let valid = name.chars().next().is_some_and(is_name_start)
                    && name.chars().all(is_name_char);
                if !valid {
                    return Err(TokenizeError::BadSubstitution(format!("${{{name}}}")));
                }
                Ok(Parameter::Value(self.value_of(&name)))
            }
            Some(c) if is_name_start(c) => {
                let mut name = String::new();
                while let Some(&c) = self.chars.peek() {
                    if !is_name_char(c) {
                        break;
                    }
                    name.push(c);
                    self.chars.next();
                }
                Ok(Parameter::Value(self.value_of(&name)))
            }
            // Positional parameters are never set.
            Some(c) if c.is_ascii_digit() => {
                self.chars.next();
                Ok(Parameter::Value(String::new()))
            }
            Some('(') => Err(TokenizeError::CommandSubstitution),
            Some(c) if matches!(c, '@' | '*' | '#' | '?' | '$' | '!' | '-') => {
                Err(TokenizeError::SpecialParameter(c))
            }
            _ => Ok(Parameter::Dollar),
        }
    }

    fn value_of(&self, name: &str) -> String {
        (self.lookup)(name).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/alice".into()),
            "USER" => Some("alice".into()),
            "SPACED" => Some("  one two\tthree ".into()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    fn words(command: &str) -> Vec<String> {
        split(command, env).unwrap()
    }

    #[test]
    fn test_plain_words() {
        assert_eq!(words("ls -l  /tmp"), ["ls", "-l", "/tmp"]);
        assert_eq!(words("  \t echo\nhi  "), ["echo", "hi"]);
    }

    #[test]
    fn test_empty_and_blank_commands() {
        assert!(words("").is_empty());
        assert!(words("   \t\n").is_empty());
        assert!(words("# just a comment").is_empty());
    }

    #[test]
    fn test_quotes() {
        assert_eq!(words("echo 'a  b' \"c  d\""), ["echo", "a  b", "c  d"]);
        assert_eq!(words("echo '' \"\""), ["echo", "", ""]);
        assert_eq!(words("echo ab'cd'\"ef\""), ["echo", "abcdef"]);
        assert_eq!(words("echo '$HOME' \"$HOME\""), ["echo", "$HOME", "/home/alice"]);
    }

    #[test]
    fn test_backslash_escapes() {
        assert_eq!(words(r"echo a\ b \'x\'"), ["echo", "a b", "'x'"]);
        assert_eq!(words(r#"echo "a\"b" "\$HOME" "\n""#), ["echo", "a\"b", "$HOME", "\\n"]);
        assert_eq!(words("echo a\\\nb"), ["echo", "ab"]);
    }

    #[test]
    fn test_parameter_expansion() {
        assert_eq!(words("echo $USER ${USER}x $USER.log"), ["echo", "alice", "alicex", "alice.log"]);
        assert_eq!(words("echo $UNSET end"), ["echo", "end"]);
        assert_eq!(words("echo \"$UNSET\""), ["echo", ""]);
        assert_eq!(words("echo $1 cost $ 5"), ["echo", "cost", "$", "5"]);
    }

    #[test]
    fn test_unquoted_expansion_is_field_split() {
        assert_eq!(words("printf $SPACED"), ["printf", "one", "two", "three"]);
        assert_eq!(words("printf x$SPACED"), ["printf", "x", "one", "two", "three"]);
        assert_eq!(words("printf \"$SPACED\""), ["printf", "  one two\tthree "]);
        assert_eq!(words("printf $EMPTY"), ["printf"]);
    }

    #[test]
    fn test_tilde_expansion() {
        assert_eq!(words("cat ~/notes ~"), ["cat", "/home/alice/notes", "/home/alice"]);
        assert_eq!(words("echo a~ '~/x' ~bob"), ["echo", "a~", "~/x", "~bob"]);
    }

    #[test]
    fn test_comment_after_words() {
        assert_eq!(words("echo hi # ignored"), ["echo", "hi"]);
        assert_eq!(words("echo a#b"), ["echo", "a#b"]);
    }

    #[test]
    fn test_errors() {
        assert_eq!(split("echo 'open", env), Err(TokenizeError::UnterminatedQuote('\'')));
        assert_eq!(split("echo \"open", env), Err(TokenizeError::UnterminatedQuote('"')));
        assert_eq!(split("echo \\", env), Err(TokenizeError::DanglingEscape));
        assert_eq!(split("echo ${HOME", env), Err(TokenizeError::UnterminatedBrace));
        assert_eq!(
            split("echo ${HOME:-x}", env),
            Err(TokenizeError::BadSubstitution("${HOME:-x}".into()))
        );
        assert_eq!(split("echo $(id)", env), Err(TokenizeError::CommandSubstitution));
        assert_eq!(split("echo `id`", env), Err(TokenizeError::CommandSubstitution));
        assert_eq!(split("echo $?", env), Err(TokenizeError::SpecialParameter('?')));
    }

    #[test]
    fn test_shell_operators_are_rejected() {
        for command in ["ls | wc", "a && b", "a; b", "cat < f", "echo > f", "(ls)"] {
            assert!(
                matches!(split(command, env), Err(TokenizeError::Operator(_))),
                "{command} should be rejected"
            );
        }
        assert_eq!(words("echo '|' \"&&\" \\;"), ["echo", "|", "&&", ";"]);
    }

    #[test]
    fn test_error_messages_are_readable() {
        let err = split("echo 'x", env).unwrap_err();
        assert_eq!(err.to_string(), "reached end of command without closing quote '");
    }
}
