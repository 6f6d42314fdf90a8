//! Key types shared by the wordstats store and its collaborators.
//!
//! Chat networks are loose about spelling: `#Lab`, `#lab` and `#LAB` name the
//! same room, and under RFC 1459 casemapping so do `#[x]` and `#{x}`. Every
//! lookup keyed by a channel therefore goes through [`ChannelName`], whose
//! equality, ordering and hashing use the folded form while the first-seen
//! spelling is kept for display. Tracked words get the same treatment through
//! [`Word`], folded to lowercase so that `Pizza` and `pizza` are one key.
//!
//! [`tokenize`] turns a raw message body into the lowercase tokens that
//! tracked words are matched against.
//!
//! ```rust
//! use wordstats_types::{ChannelName, Word, identical, tokenize};
//!
//! assert!(identical("#Lab[1]", "#lab{1}"));
//! assert_eq!(ChannelName::new("#LAB"), ChannelName::new("#lab"));
//! assert!(Word::parse("pizza").unwrap().matches("pizza"));
//! assert_eq!(tokenize("Hello, world!!").collect::<Vec<_>>(), ["hello", "world"]);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::ParseIntError;
use std::str::FromStr;

/// Fold a name using RFC 1459 casemapping.
///
/// ASCII letters lowercase, and `[`, `]`, `\`, `~` fold to `{`, `}`, `|`, `^`.
/// Everything else is left alone.
pub fn irc_fold(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            other => other,
        })
        .collect()
}

/// Whether two channel (or nick) names refer to the same entity.
///
/// Agrees with [`ChannelName`] equality, which compares the same folded form.
pub fn identical(a: &str, b: &str) -> bool {
    irc_fold(a) == irc_fold(b)
}

/// Whether `target` looks like a channel rather than a private-message nick.
///
/// Names containing a space, comma, BEL, NUL or line break are rejected, as
/// RFC 1459 forbids them.
pub fn is_channel(target: &str) -> bool {
    let Some(first) = target.chars().next() else {
        return false;
    };
    matches!(first, '#' | '&' | '+' | '!')
        && target.len() > 1
        && !target.contains([' ', ',', '\x07', '\0', '\r', '\n'])
}

/// A channel name compared by its folded form.
#[derive(Clone, Debug)]
pub struct ChannelName {
    display: String,
    folded: String,
}

impl ChannelName {
    pub fn new(raw: &str) -> Self {
        Self {
            display: raw.to_string(),
            folded: irc_fold(raw),
        }
    }

    /// Spelling this channel was first seen with.
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// Folded key used for comparisons.
    pub fn folded(&self) -> &str {
        &self.folded
    }
}

impl PartialEq for ChannelName {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for ChannelName {}

impl Hash for ChannelName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl PartialOrd for ChannelName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded.cmp(&other.folded)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Rejected word argument: empty, or containing non-alphanumeric characters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidWord(pub String);

impl fmt::Display for InvalidWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} must contain only alphanumeric characters", self.0)
    }
}

impl std::error::Error for InvalidWord {}

/// A tracked word: spelling preserved, compared case-insensitively.
#[derive(Clone, Debug)]
pub struct Word {
    display: String,
    folded: String,
}

impl Word {
    /// Validate and build a word key. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, InvalidWord> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.chars().all(char::is_alphanumeric) {
            return Err(InvalidWord(raw.to_string()));
        }
        Ok(Self {
            display: trimmed.to_string(),
            folded: trimmed.to_lowercase(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.display
    }

    pub fn folded(&self) -> &str {
        &self.folded
    }

    /// Whether a lowercase token produced by [`tokenize`] is this word.
    pub fn matches(&self, token: &str) -> bool {
        self.folded == token
    }
}

impl PartialEq for Word {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for Word {}

impl Hash for Word {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl PartialOrd for Word {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Word {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded.cmp(&other.folded)
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Stable participant identifier handed out by the identity collaborator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(UserId)
    }
}

/// Split a message body into lowercase word tokens.
///
/// Tokens are whitespace separated; leading and trailing non-alphanumeric runs
/// are stripped and tokens left empty are dropped. Inner punctuation stays, so
/// `don't` is a single token.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|raw| raw.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}
