//! Textual command channel announcing client lifecycle events.
//!
//! Each command is a single line of the form `"<id> <VERB>"` where `id` is a
//! positive decimal connection identifier and `VERB` is `UP` or `DOWN`.
//! [`decode`] accepts exactly the lines matching `^\d+\s+(UP|DOWN)$` with a
//! non-zero identifier that fits in a `u64`.

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::registry::ConnectionId;

/// Lifecycle verb carried by a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// The connection has been accepted and may carry data.
    Up,
    /// The connection has closed; no further data will reference it.
    Down,
}

impl Verb {
    /// Wire spelling of the verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Errors raised while parsing a command line.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The line does not start with a decimal identifier.
    #[error("missing connection id in {0:?}")]
    MissingId(String),
    /// The identifier is zero or does not fit in a `u64`.
    #[error("invalid connection id {0:?}")]
    InvalidId(String),
    /// No whitespace separates the identifier from the verb.
    #[error("missing separator in {0:?}")]
    MissingSeparator(String),
    /// The verb is neither `UP` nor `DOWN`.
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),
}

/// A decoded lifecycle command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Command {
    /// Connection the command refers to.
    pub id: ConnectionId,
    /// Lifecycle transition announced.
    pub verb: Verb,
}

impl Command {
    /// Construct a command.
    #[must_use]
    pub const fn new(id: ConnectionId, verb: Verb) -> Self { Self { id, verb } }

    /// Shorthand for an `UP` command.
    #[must_use]
    pub const fn up(id: ConnectionId) -> Self { Self::new(id, Verb::Up) }

    /// Shorthand for a `DOWN` command.
    #[must_use]
    pub const fn down(id: ConnectionId) -> Self { Self::new(id, Verb::Down) }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{} {}", self.id, self.verb) }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { decode(s) }
}

/// Encode a command as its wire line, without a trailing delimiter.
///
/// # Examples
///
/// ```
/// use wiremux::{
///     ConnectionId,
///     command::{Verb, encode},
/// };
///
/// assert_eq!(encode(ConnectionId::new(1), Verb::Up), "1 UP");
/// ```
#[must_use]
pub fn encode(id: ConnectionId, verb: Verb) -> String { Command::new(id, verb).to_string() }

/// Decode a command line.
///
/// # Errors
///
/// Returns a [`CommandError`] describing the first rule the line violates.
///
/// # Examples
///
/// ```
/// use wiremux::{
///     ConnectionId,
///     command::{Command, Verb, decode},
/// };
///
/// let cmd = decode("7   DOWN").expect("valid command");
/// assert_eq!(cmd, Command::new(ConnectionId::new(7), Verb::Down));
/// assert!(decode("7 down").is_err());
/// ```
pub fn decode(text: &str) -> Result<Command, CommandError> {
    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if digits_end == 0 {
        return Err(CommandError::MissingId(text.to_owned()));
    }
    let (digits, rest) = text.split_at(digits_end);

    let verb_text = rest.trim_start_matches(char::is_whitespace);
    if verb_text.len() == rest.len() {
        return Err(CommandError::MissingSeparator(text.to_owned()));
    }
    let verb = match verb_text {
        "UP" => Verb::Up,
        "DOWN" => Verb::Down,
        other => return Err(CommandError::UnknownVerb(other.to_owned())),
    };

    let id = match digits.parse::<u64>() {
        Ok(0) | Err(_) => return Err(CommandError::InvalidId(digits.to_owned())),
        Ok(value) => ConnectionId::new(value),
    };
    Ok(Command { id, verb })
}
