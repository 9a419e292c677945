//! Parse text command lines into a [`Command`] and compose them back to text.
//!
//! The expected format of a command line is
//!
//! ```text
//! name arg1 arg2 keyA=valueA keyB:valueB
//! ```
//!
//! where keyword arguments can stand at any position. Lines are split following shell-like
//! quoting rules, such that arguments can contain whitespace if they are quoted.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use crate::DaemonError;

/// Characters that separate the key from the value of a keyword argument.
const SEPARATORS: [char; 2] = ['=', ':'];

/// A parsed text command with an optional name, positional, and keyword arguments.
///
/// The name is the first token of the line, as long as it does not contain a key/value separator
/// (`=` or `:`). All other tokens without a separator are positional arguments, in order. Tokens
/// with a separator are split at the first separator into key and value. If a key occurs more
/// than once, the last value wins.
///
/// # Example
///
/// ```
/// use labdaemon::Command;
///
/// let cmd: Command = "move 1000 upos=0".parse().unwrap();
/// assert_eq!(cmd.name(), Some("move"));
/// assert_eq!(cmd.args(), ["1000"]);
/// assert_eq!(cmd.get("upos"), Some("0"));
/// assert_eq!(cmd.to_string(), "move 1000 upos=0");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    name: Option<String>,
    args: Vec<String>,
    kwargs: BTreeMap<String, String>,
    tokens: Vec<String>,
}

impl Command {
    /// Create a new, empty command with an optional name.
    ///
    /// Use [`Command::with_arg`] and [`Command::with_kwarg`] to add arguments, e.g., in order to
    /// compose a reply to a client.
    pub fn new(name: Option<&str>) -> Self {
        Command {
            name: name.map(str::to_string),
            ..Default::default()
        }
    }

    /// Parse a command line.
    ///
    /// A line that only contains whitespace parses into an empty command. An error is returned if
    /// the line contains an unterminated quote or ends with an escaping backslash.
    pub fn parse(line: &str) -> Result<Self, DaemonError> {
        let tokens = split_shell(line)?;
        let mut cmd = Command::default();

        for (i, token) in tokens.iter().enumerate() {
            match token.find(SEPARATORS) {
                None if i == 0 => cmd.name = Some(token.clone()),
                None => cmd.args.push(token.clone()),
                Some(pos) => {
                    let key = &token[..pos];
                    let value = &token[pos + 1..];
                    cmd.kwargs.insert(key.to_string(), value.to_string());
                }
            }
        }
        cmd.tokens = tokens;
        Ok(cmd)
    }

    /// Add a positional argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add a keyword argument, replacing any previous value of the same key.
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// The name of the command, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Positional arguments, in the order they were given.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Keyword arguments. Callers must not depend on their order.
    pub fn kwargs(&self) -> &BTreeMap<String, String> {
        &self.kwargs
    }

    /// Get the value of a keyword argument.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).map(String::as_str)
    }

    /// Check if a keyword argument is present.
    pub fn has_key(&self, key: &str) -> bool {
        self.kwargs.contains_key(key)
    }

    /// All tokens of the parsed line, in order, including the name.
    ///
    /// This is empty for commands that were not created by parsing a line.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Everything after the name, joined by single spaces.
    pub fn body(&self) -> String {
        let skip = usize::from(self.name.is_some());
        self.tokens
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Check if the command has neither a name nor any arguments.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.args.is_empty() && self.kwargs.is_empty()
    }
}

impl FromStr for Command {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s)
    }
}

impl Display for Command {
    /// Compose the command back into a line: name, positional arguments, then `key=value` pairs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if let Some(name) = &self.name {
            parts.push(quote(name));
        }
        parts.extend(self.args.iter().map(|arg| quote(arg)));
        parts.extend(
            self.kwargs
                .iter()
                .map(|(key, value)| quote(&format!("{key}={value}"))),
        );
        write!(f, "{}", parts.join(" "))
    }
}

/// Sanitize a line received from the network such that it can be parsed as a command.
///
/// Line endings, which may be LF or CR LF, are stripped.
pub fn sanitize_command_line(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// Split a line into its `;`-separated sub-commands.
///
/// Sub-commands are trimmed and empty ones are skipped.
pub fn split_subcommands(line: &str) -> impl Iterator<Item = &str> {
    line.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Quote a token for composing if it would not survive splitting as is.
fn quote(token: &str) -> String {
    if token.is_empty() {
        return "''".to_string();
    }
    let needs_quotes = token
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '\\'));
    if needs_quotes {
        format!("'{}'", token.replace('\'', r#"'"'"'"#))
    } else {
        token.to_string()
    }
}

/// Split a line into tokens following shell-like rules.
///
/// Whitespace separates tokens. Single quotes keep everything literally, double quotes allow
/// escaping `"` and `\` with a backslash, and a backslash outside of quotes escapes the next
/// character.
fn split_shell(line: &str) -> Result<Vec<String>, DaemonError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(unterminated(line)),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(unterminated(line)),
                        },
                        Some(c) => current.push(c),
                        None => return Err(unterminated(line)),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => {
                        return Err(DaemonError::CommandSyntax(format!(
                            "unable to parse command, line ends with an escape character: {line}"
                        )));
                    }
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn unterminated(line: &str) -> DaemonError {
    DaemonError::CommandSyntax(format!(
        "unable to parse command, unterminated quote in: {line}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_shell_quotes() {
        let tokens = split_shell(r#"say 'hello world' "a \"b\"" c\ d"#).unwrap();
        assert_eq!(tokens, vec!["say", "hello world", "a \"b\"", "c d"]);
    }

    #[test]
    fn test_split_shell_empty_quotes() {
        assert_eq!(split_shell("a '' b").unwrap(), vec!["a", "", "b"]);
    }

    #[test]
    fn test_split_shell_unterminated() {
        assert!(split_shell("say 'hello").is_err());
        assert!(split_shell("say \"hello").is_err());
        assert!(split_shell("say hello\\").is_err());
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("two words"), "'two words'");
        assert_eq!(quote("it's"), r#"'it'"'"'s'"#);
        assert_eq!(split_shell(&quote("it's")).unwrap(), vec!["it's"]);
    }
}
