//! Topic filters with optionally named wildcards.
//!
//! A route pattern is an MQTT filter where `+` and `#` may carry a name:
//! `apps/conference/api/v1/rooms/+roomId/events` matches
//! `apps/conference/api/v1/rooms/42/events` and captures `roomId = "42"`.
//! [`TopicFilter::subscription`] strips the names for the broker.

use std::collections::HashMap;
use std::fmt::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wildcard captures of a matched topic, keyed by wildcard name
pub type TopicParams = HashMap<String, String>;

#[inline]
fn is_metadata<T: AsRef<str>>(s: T) -> bool {
    s.as_ref().starts_with('$')
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("InvalidTopic({0})")]
    InvalidTopic(String),
    #[error("InvalidLevel({0})")]
    InvalidLevel(String),
}

#[derive(Debug, Eq, PartialEq, Clone, Hash, Serialize, Deserialize)]
pub enum Level {
    Normal(String),
    Metadata(String), // $SYS
    Blank,
    SingleWildcard(Option<String>), // +, +name
    MultiWildcard(Option<String>),  // #, #name
}

impl Level {
    #[inline]
    pub fn value(&self) -> Option<&str> {
        match *self {
            Level::Normal(ref s) | Level::Metadata(ref s) => Some(s),
            _ => None,
        }
    }

    /// Name of a wildcard level, if it has one
    #[inline]
    pub fn name(&self) -> Option<&str> {
        match *self {
            Level::SingleWildcard(Some(ref n)) | Level::MultiWildcard(Some(ref n)) => Some(n),
            _ => None,
        }
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        matches!(*self, Level::SingleWildcard(_) | Level::MultiWildcard(_))
    }

    #[inline]
    pub fn is_metadata(&self) -> bool {
        matches!(*self, Level::Metadata(_))
    }

    #[inline]
    fn match_str(&self, level: &str) -> bool {
        match *self {
            Level::Normal(ref s) => !is_metadata(level) && s == level,
            Level::Metadata(ref s) => is_metadata(level) && s == level,
            Level::Blank => level.is_empty(),
            Level::SingleWildcard(_) | Level::MultiWildcard(_) => !is_metadata(level),
        }
    }

    fn write_plain(&self, f: &mut impl Write) -> fmt::Result {
        match *self {
            Level::Normal(ref s) | Level::Metadata(ref s) => f.write_str(s.as_str()),
            Level::Blank => Ok(()),
            Level::SingleWildcard(_) => f.write_char('+'),
            Level::MultiWildcard(_) => f.write_char('#'),
        }
    }
}

fn wildcard_name(s: &str) -> Result<Option<String>, TopicError> {
    if s.contains(['+', '#', '/']) {
        return Err(TopicError::InvalidLevel(format!("invalid wildcard name `{s}`")));
    }
    Ok(if s.is_empty() { None } else { Some(s.to_owned()) })
}

impl FromStr for Level {
    type Err = TopicError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, TopicError> {
        if s.is_empty() {
            return Ok(Level::Blank);
        }
        if let Some(name) = s.strip_prefix('+') {
            return Ok(Level::SingleWildcard(wildcard_name(name)?));
        }
        if let Some(name) = s.strip_prefix('#') {
            return Ok(Level::MultiWildcard(wildcard_name(name)?));
        }
        if s.contains(['+', '#']) {
            Err(TopicError::InvalidLevel(format!("invalid level `{s}` contains +|#")))
        } else if is_metadata(s) {
            Ok(Level::Metadata(String::from(s)))
        } else {
            Ok(Level::Normal(String::from(s)))
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_plain(f)?;
        if let Some(name) = self.name() {
            f.write_str(name)?;
        }
        Ok(())
    }
}

/// A parsed topic filter
#[derive(Debug, Eq, PartialEq, Clone, Hash, Serialize, Deserialize)]
pub struct TopicFilter(Vec<Level>);

impl TopicFilter {
    #[inline]
    pub fn levels(&self) -> &[Level] {
        &self.0
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        let last = self.0.len().saturating_sub(1);
        let mut names = Vec::new();
        for (pos, level) in self.0.iter().enumerate() {
            match level {
                Level::MultiWildcard(_) if pos != last => return false,
                Level::Metadata(_) if pos != 0 => return false,
                _ => {}
            }
            if let Some(name) = level.name() {
                if names.contains(&name) {
                    return false;
                }
                names.push(name);
            }
        }
        true
    }

    /// `true` when the filter has no wildcard and can be used as a publish topic
    #[inline]
    pub fn is_literal(&self) -> bool {
        !self.0.iter().any(Level::is_wildcard)
    }

    /// The filter as it is sent to the broker, wildcard names removed
    pub fn subscription(&self) -> String {
        let mut out = String::new();
        for (i, level) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('/');
            }
            let _ = level.write_plain(&mut out);
        }
        out
    }

    #[inline]
    pub fn matches_str<S: AsRef<str> + ?Sized>(&self, topic: &S) -> bool {
        self.capture(topic.as_ref()).is_some()
    }

    /// Matches `topic` against the filter and collects named wildcard values.
    ///
    /// A trailing `#` also matches its parent level, then captures an empty string.
    pub fn capture(&self, topic: &str) -> Option<TopicParams> {
        let mut params = TopicParams::new();
        let mut rhs = topic.split('/');
        let mut consumed = 0usize;

        for lhs in self.0.iter() {
            match lhs {
                Level::MultiWildcard(name) => {
                    let rest = if consumed >= topic.len() { "" } else { &topic[consumed..] };
                    if let Some(first) = rest.split('/').next() {
                        if !rest.is_empty() && is_metadata(first) && consumed == 0 {
                            return None;
                        }
                    }
                    if let Some(name) = name {
                        params.insert(name.clone(), rest.to_owned());
                    }
                    return Some(params);
                }
                _ => {
                    let level = rhs.next()?;
                    if !lhs.match_str(level) {
                        return None;
                    }
                    if let Level::SingleWildcard(Some(name)) = lhs {
                        params.insert(name.clone(), level.to_owned());
                    }
                    consumed += level.len() + 1;
                }
            }
        }

        match rhs.next() {
            Some(_) => None,
            None => Some(params),
        }
    }
}

impl FromStr for TopicFilter {
    type Err = TopicError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, TopicError> {
        s.split('/').map(Level::from_str).collect::<Result<Vec<_>, TopicError>>().map(TopicFilter).and_then(
            |topic| {
                if topic.is_valid() {
                    Ok(topic)
                } else {
                    Err(TopicError::InvalidTopic(format!("invalid topic `{s}`")))
                }
            },
        )
    }
}

impl From<Vec<Level>> for TopicFilter {
    fn from(v: Vec<Level>) -> Self {
        TopicFilter(v)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;

        for level in &self.0 {
            if first {
                first = false;
            } else {
                f.write_char('/')?;
            }

            level.fmt(f)?;
        }

        Ok(())
    }
}
