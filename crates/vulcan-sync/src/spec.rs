//! Sync specs loaded from the configuration store
//!
//! A spec file holds the argument list handed to the admin client for one
//! target kind. The text is tokenized once into [`SpecArgs`] so the rest of
//! the crate works with flags and values instead of an opaque string; it is
//! turned back into an argument vector only when the admin client is invoked.

use std::fmt;

/// What an upsert targets on the control plane
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Backend,
    Frontend,
    /// Middleware type, e.g. `ratelimit` or `connlimit`
    Middleware(String),
}

impl TargetKind {
    /// Name used both for the admin client subcommand and in messages
    pub fn as_str(&self) -> &str {
        match self {
            TargetKind::Backend => "backend",
            TargetKind::Frontend => "frontend",
            TargetKind::Middleware(kind) => kind,
        }
    }

    /// Derive a middleware kind from its storage entry name
    ///
    /// `ratelimit` and `ratelimit.api` both map to `ratelimit`, so several
    /// middlewares of one type can live side by side.
    pub fn from_middleware_entry(entry: &str) -> Option<Self> {
        let kind = entry.split('.').next().unwrap_or_default();
        if kind.is_empty() {
            return None;
        }
        Some(TargetKind::Middleware(kind.to_string()))
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of a spec's argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecArg {
    /// `--name value`, `--name=value` or a bare `--name`
    Flag {
        name: String,
        value: Option<String>,
        inline: bool,
    },
    Positional(String),
}

/// Structured argument list of a spec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecArgs {
    args: Vec<SpecArg>,
}

impl SpecArgs {
    /// Parse the stored spec text
    ///
    /// Lines whose first non-blank character is `#` are ignored, a trailing
    /// unescaped `\` joins a line with the next one, and single or double
    /// quotes group words into one argument.
    pub fn parse(text: &str) -> Result<Self, String> {
        let lines: Vec<&str> = text
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .map(str::trim_end)
            .collect();
        let last = lines.len().saturating_sub(1);
        let joined = lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                if i < last {
                    strip_continuation(line)
                } else {
                    *line
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        let tokens = tokenize(&joined)?;
        let mut args = Vec::with_capacity(tokens.len());
        let mut iter = tokens.into_iter().peekable();

        while let Some(token) = iter.next() {
            if !is_flag(&token) {
                args.push(SpecArg::Positional(token));
                continue;
            }

            if let Some((name, value)) = token.split_once('=') {
                args.push(SpecArg::Flag {
                    name: name.to_string(),
                    value: Some(value.to_string()),
                    inline: true,
                });
                continue;
            }

            let value = match iter.peek() {
                Some(next) if !is_flag(next) => iter.next(),
                _ => None,
            };
            args.push(SpecArg::Flag {
                name: token,
                value,
                inline: false,
            });
        }

        Ok(Self { args })
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpecArg> {
        self.args.iter()
    }

    /// Look up a flag value by name, with or without leading dashes
    pub fn get(&self, name: &str) -> Option<&str> {
        let wanted = name.trim_start_matches('-');
        self.args.iter().find_map(|arg| match arg {
            SpecArg::Flag {
                name,
                value: Some(value),
                ..
            } if name.trim_start_matches('-') == wanted => Some(value.as_str()),
            _ => None,
        })
    }

    /// Render back into the argument vector for the admin client
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() * 2);
        for arg in &self.args {
            match arg {
                SpecArg::Flag {
                    name,
                    value: Some(value),
                    inline: true,
                } => argv.push(format!("{}={}", name, value)),
                SpecArg::Flag { name, value, .. } => {
                    argv.push(name.clone());
                    if let Some(value) = value {
                        argv.push(value.clone());
                    }
                }
                SpecArg::Positional(value) => argv.push(value.clone()),
            }
        }
        argv
    }
}

/// A project's spec for one target kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSyncSpec {
    pub kind: TargetKind,
    pub args: SpecArgs,
}

/// Drop the continuation marker: one `\` when the line ends in an odd run
/// of them. An even run is a sequence of escaped backslashes.
fn strip_continuation(line: &str) -> &str {
    let run = line.len() - line.trim_end_matches('\\').len();
    if run % 2 == 1 {
        &line[..line.len() - 1]
    } else {
        line
    }
}

fn is_flag(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-')
}

fn tokenize(input: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = input.chars();

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
                        None => return Err("unterminated single quote".to_string()),
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
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(c) => current.push(c),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_token = true;
                // a dangling backslash at the very end is kept literally
                current.push(chars.next().unwrap_or('\\'));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags_with_values() {
        let args = SpecArgs::parse("--id b1 --type http").unwrap();
        assert_eq!(args.get("id"), Some("b1"));
        assert_eq!(args.get("--type"), Some("http"));
        assert_eq!(args.to_argv(), vec!["--id", "b1", "--type", "http"]);
    }

    #[test]
    fn test_parse_inline_and_bare_flags() {
        let args = SpecArgs::parse("-id=f1 --verbose --route 'Path(\"/\")'").unwrap();
        assert_eq!(args.get("id"), Some("f1"));
        assert_eq!(args.get("verbose"), None);
        assert_eq!(
            args.to_argv(),
            vec!["-id=f1", "--verbose", "--route", "Path(\"/\")"]
        );
    }

    #[test]
    fn test_parse_comments_and_continuations() {
        let text = "# rate limit for the api\n--id rl1 \\\n  --requests 10\n";
        let args = SpecArgs::parse(text).unwrap();
        assert_eq!(args.to_argv(), vec!["--id", "rl1", "--requests", "10"]);
    }

    #[test]
    fn test_parse_keeps_escaped_trailing_backslashes() {
        let args = SpecArgs::parse("--sep \\\\").unwrap();
        assert_eq!(args.to_argv(), vec!["--sep", "\\"]);

        let args = SpecArgs::parse("--prefix C:\\\\").unwrap();
        assert_eq!(args.to_argv(), vec!["--prefix", "C:\\"]);

        // even run on a middle line is not a continuation marker
        let args = SpecArgs::parse("--prefix C:\\\\\n--id x").unwrap();
        assert_eq!(args.to_argv(), vec!["--prefix", "C:\\", "--id", "x"]);

        // odd run: one backslash continues the line, the pair before it stays
        let args = SpecArgs::parse("--sep a\\\\\\\n--id x").unwrap();
        assert_eq!(args.to_argv(), vec!["--sep", "a\\", "--id", "x"]);
    }

    #[test]
    fn test_parse_dangling_backslash_on_last_line() {
        let args = SpecArgs::parse("--id x \\").unwrap();
        assert_eq!(args.to_argv(), vec!["--id", "x", "\\"]);
    }

    #[test]
    fn test_parse_double_quoted_value_with_spaces() {
        let args = SpecArgs::parse(r#"--route "Host(`a.io`) && Path(\"/x\")""#).unwrap();
        assert_eq!(args.get("route"), Some(r#"Host(`a.io`) && Path("/x")"#));
    }

    #[test]
    fn test_parse_unterminated_quote() {
        assert!(SpecArgs::parse("--id 'b1").is_err());
        assert!(SpecArgs::parse("--id \"b1").is_err());
    }

    #[test]
    fn test_parse_positional() {
        let args = SpecArgs::parse("extra --id x -").unwrap();
        assert_eq!(args.to_argv(), vec!["extra", "--id", "x", "-"]);
        assert!(matches!(args.iter().next(), Some(SpecArg::Positional(p)) if p == "extra"));
    }

    #[test]
    fn test_empty_spec() {
        assert!(SpecArgs::parse("# nothing here\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_middleware_kind_from_entry() {
        assert_eq!(
            TargetKind::from_middleware_entry("ratelimit"),
            Some(TargetKind::Middleware("ratelimit".to_string()))
        );
        assert_eq!(
            TargetKind::from_middleware_entry("ratelimit.api"),
            Some(TargetKind::Middleware("ratelimit".to_string()))
        );
        assert_eq!(TargetKind::from_middleware_entry(".hidden"), None);
        assert_eq!(TargetKind::Backend.to_string(), "backend");
    }
}
