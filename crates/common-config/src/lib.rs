//! Shared configuration helpers for the session gate.
//!
//! Besides environment lookups, this crate reads the constants the WordPress
//! logged-in cookie is keyed with out of `wp-config.php`. Only the statement
//! forms WordPress itself writes are recognized: `define('KEY', 'value');`
//! and the `$table_prefix = 'value';` assignment. Text outside `<?php ... ?>`
//! is ignored.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// File name of the WordPress configuration inside an install directory.
pub const CONFIG_FILE_NAME: &str = "wp-config.php";
pub const LOGGED_IN_KEY: &str = "LOGGED_IN_KEY";
pub const LOGGED_IN_SALT: &str = "LOGGED_IN_SALT";
pub const COOKIEHASH: &str = "COOKIEHASH";
/// Synthetic key the `table_prefix` assignment is stored under.
pub const TABLE_PREFIX: &str = "table_prefix";

const REQUIRED_KEYS: [&str; 2] = [LOGGED_IN_KEY, LOGGED_IN_SALT];

/// Resolve the port for a service from an environment variable.
///
/// Falls back to the provided default when the variable is missing or cannot be
/// parsed into a `u16`.
pub fn service_port(var: &str, default: u16) -> u16 {
    match env::var(var) {
        Ok(value) => value
            .parse::<u16>()
            .inspect_err(|error| {
                tracing::warn!(%var, %value, %error, "invalid port override, using default");
            })
            .unwrap_or(default),
        Err(_) => default,
    }
}

/// Errors raised while loading or querying a WordPress configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration file {} is empty", .0.display())]
    Empty(PathBuf),
    #[error("required constant {0} is not defined")]
    MissingKey(&'static str),
    #[error("configuration key not found: {0}")]
    KeyNotFound(String),
}

/// Constants extracted from a `wp-config.php` file.
///
/// Built once at load time and immutable afterwards, so it can be shared
/// across threads without locking.
#[derive(Clone, PartialEq, Eq)]
pub struct WpConfig {
    entries: HashMap<String, String>,
    base_path: Option<PathBuf>,
}

impl WpConfig {
    /// Load `wp-config.php` from a WordPress install directory.
    pub fn from_base_path(base_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(base_path.as_ref().join(CONFIG_FILE_NAME))
    }

    /// Load and parse the configuration file at `path`.
    ///
    /// Fails if the file is missing, unreadable, empty, or lacks one of the
    /// logged-in secrets.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Err(ConfigError::Empty(path.to_path_buf()));
        }

        let mut config = Self::parse(&contents)?;
        config.base_path = path.parent().map(Path::to_path_buf);
        tracing::debug!(
            path = %path.display(),
            entries = config.entries.len(),
            "loaded wordpress configuration"
        );
        Ok(config)
    }

    /// Parse configuration source text.
    ///
    /// Later definitions of a key overwrite earlier ones. Commented-out
    /// statements and non-string constants are ignored.
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let mut entries = HashMap::new();
        for statement in Scanner::new(source) {
            match statement {
                Statement::Define { key, value } => {
                    entries.insert(key, value);
                }
                Statement::TablePrefix(prefix) => {
                    entries.insert(TABLE_PREFIX.to_string(), prefix);
                }
            }
        }

        if let Some(missing) = REQUIRED_KEYS
            .into_iter()
            .find(|key| !entries.contains_key(*key))
        {
            return Err(ConfigError::MissingKey(missing));
        }

        Ok(Self {
            entries,
            base_path: None,
        })
    }

    /// Look up a single constant.
    pub fn get(&self, key: &str) -> Result<&str, ConfigError> {
        self.entries
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))
    }

    /// Every constant that was parsed, keyed by name.
    pub fn entries(&self) -> &HashMap<String, String> {
        &self.entries
    }

    /// The `COOKIEHASH` constant, when the site defines one.
    pub fn cookie_hash(&self) -> Option<&str> {
        self.entries.get(COOKIEHASH).map(String::as_str)
    }

    pub fn table_prefix(&self) -> Option<&str> {
        self.entries.get(TABLE_PREFIX).map(String::as_str)
    }

    /// Directory the configuration file was loaded from; `None` for parsed
    /// text.
    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }
}

impl fmt::Debug for WpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("WpConfig")
            .field("base_path", &self.base_path)
            .field("keys", &keys)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Statement {
    Define { key: String, value: String },
    TablePrefix(String),
}

/// Minimal PHP tokenizer that only understands what `wp-config.php` needs.
struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    in_php: bool,
}

const OPEN_TAG: &str = "<?php";
const CLOSE_TAG: &str = "?>";

impl<'a> Scanner<'a> {
    /// A file without an opening tag is treated as PHP throughout.
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            in_php: !src.contains(OPEN_TAG),
        }
    }

    /// Move past the next opening tag. Returns `false` when there is none.
    fn enter_php(&mut self) -> bool {
        match self.src[self.pos..].find(OPEN_TAG) {
            Some(offset) => {
                self.pos += offset + OPEN_TAG.len();
                self.in_php = true;
                true
            }
            None => {
                self.pos = self.src.len();
                false
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Option<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Some(())
        } else {
            None
        }
    }

    fn skip_trivia(&mut self) {
        let src = self.src;
        loop {
            match &src.as_bytes()[self.pos..] {
                [byte, ..] if byte.is_ascii_whitespace() => self.pos += 1,
                [b'/', b'/', ..] | [b'#', ..] => self.skip_line(),
                [b'/', b'*', ..] => match src[self.pos + 2..].find("*/") {
                    Some(end) => self.pos += end + 4,
                    None => self.pos = self.src.len(),
                },
                _ => break,
            }
        }
    }

    fn skip_line(&mut self) {
        match self.src[self.pos..].find('\n') {
            Some(end) => self.pos += end + 1,
            None => self.pos = self.src.len(),
        }
    }

    fn identifier(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_identifier_byte) {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    /// Read a single- or double-quoted literal, resolving PHP escapes.
    /// Leaves the cursor untouched when not positioned on a quote or when
    /// the literal is never closed.
    fn quoted(&mut self) -> Option<String> {
        let quote = self.peek().filter(|byte| matches!(*byte, b'\'' | b'"'))?;
        let start = self.pos;
        self.pos += 1;

        let mut out = String::new();
        let mut run = self.pos;
        while let Some(byte) = self.peek() {
            if byte == b'\\' {
                if let Some((resolved, len)) = self.escape(quote) {
                    out.push_str(&self.src[run..self.pos]);
                    out.push(resolved);
                    self.pos += len;
                    run = self.pos;
                    continue;
                }
            } else if byte == quote {
                out.push_str(&self.src[run..self.pos]);
                self.pos += 1;
                return Some(out);
            }
            self.pos += 1;
        }

        self.pos = start;
        None
    }

    /// Resolve the escape sequence at the cursor. Returns the character and
    /// the number of bytes consumed, or `None` when PHP keeps the backslash.
    fn escape(&self, quote: u8) -> Option<(char, usize)> {
        let rest = &self.src.as_bytes()[self.pos + 1..];
        let next = *rest.first()?;
        if next == quote || next == b'\\' {
            return Some((char::from(next), 2));
        }
        if quote == b'\'' {
            return None;
        }

        let simple = match next {
            b'$' => Some('$'),
            b'n' => Some('\n'),
            b't' => Some('\t'),
            b'r' => Some('\r'),
            b'v' => Some('\x0B'),
            b'e' => Some('\x1B'),
            b'f' => Some('\x0C'),
            _ => None,
        };
        if let Some(resolved) = simple {
            return Some((resolved, 2));
        }

        // Numeric escapes are resolved only in the ASCII range; anything
        // above would be a raw byte rather than a character.
        let (digits, radix) = match next {
            b'0'..=b'7' => (
                rest.iter()
                    .take(3)
                    .take_while(|b| (b'0'..=b'7').contains(*b))
                    .count(),
                8,
            ),
            b'x' => (
                rest[1..].iter().take(2).take_while(|b| b.is_ascii_hexdigit()).count(),
                16,
            ),
            _ => return None,
        };
        let offset = usize::from(radix == 16);
        let text = std::str::from_utf8(&rest[offset..offset + digits]).ok()?;
        let value = u8::from_str_radix(text, radix).ok().filter(u8::is_ascii)?;
        Some((char::from(value), 1 + offset + digits))
    }

    fn define_call(&mut self) -> Option<Statement> {
        self.skip_trivia();
        self.expect(b'(')?;
        self.skip_trivia();
        let key = self.quoted()?;
        self.skip_trivia();
        self.expect(b',')?;
        self.skip_trivia();
        let value = self.quoted()?;
        Some(Statement::Define { key, value })
    }

    fn table_prefix_assignment(&mut self) -> Option<Statement> {
        self.skip_trivia();
        self.expect(b'=')?;
        self.skip_trivia();
        self.quoted().map(Statement::TablePrefix)
    }
}

impl Iterator for Scanner<'_> {
    type Item = Statement;

    fn next(&mut self) -> Option<Statement> {
        loop {
            if !self.in_php && !self.enter_php() {
                return None;
            }
            self.skip_trivia();
            match self.peek()? {
                b'\'' | b'"' => {
                    // An unterminated literal only costs the rest of its line.
                    if self.quoted().is_none() {
                        self.skip_line();
                    }
                }
                b'?' if self.src[self.pos..].starts_with(CLOSE_TAG) => {
                    self.pos += CLOSE_TAG.len();
                    self.in_php = false;
                }
                b'$' => {
                    self.pos += 1;
                    if self.identifier() == TABLE_PREFIX {
                        if let Some(statement) = self.table_prefix_assignment() {
                            return Some(statement);
                        }
                    }
                }
                byte if is_identifier_byte(byte) => {
                    let identifier = self.identifier();
                    let statement = if identifier.eq_ignore_ascii_case("define") {
                        self.define_call()
                    } else if identifier == TABLE_PREFIX {
                        self.table_prefix_assignment()
                    } else {
                        None
                    };
                    if statement.is_some() {
                        return statement;
                    }
                }
                _ => self.pos += 1,
            }
        }
    }
}

fn is_identifier_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte >= 0x80
}
