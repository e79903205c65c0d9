use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Where log records go and which of them are kept
#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default = "Log::to_default")]
    pub to: To,
    #[serde(default = "Log::level_default")]
    pub level: Level,
    #[serde(default = "Log::dir_default")]
    pub dir: String,
    #[serde(default = "Log::file_default")]
    pub file: String,
}

impl Default for Log {
    #[inline]
    fn default() -> Self {
        Self {
            to: Self::to_default(),
            level: Self::level_default(),
            dir: Self::dir_default(),
            file: Self::file_default(),
        }
    }
}

impl Log {
    #[inline]
    fn to_default() -> To {
        To::Console
    }
    #[inline]
    fn level_default() -> Level {
        Level::from(slog::Level::Info)
    }
    #[inline]
    fn dir_default() -> String {
        "/var/log/mqrpc".into()
    }
    #[inline]
    fn file_default() -> String {
        "mqrpc.log".into()
    }

    /// Full path of the log file, empty when no file is configured
    #[inline]
    pub fn filename(&self) -> String {
        let file = &self.file;
        if file.is_empty() {
            return "".into();
        }
        if self.dir.is_empty() {
            return file.to_owned();
        }
        let dir = self.dir.trim_end_matches(['/', '\\']);
        format!("{dir}/{file}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum To {
    Off,
    File,
    Console,
    Both,
}

impl To {
    #[inline]
    pub fn file(&self) -> bool {
        matches!(self, To::Both | To::File)
    }
    #[inline]
    pub fn console(&self) -> bool {
        matches!(self, To::Both | To::Console)
    }
    #[inline]
    pub fn off(&self) -> bool {
        matches!(self, To::Off)
    }
}

impl FromStr for To {
    type Err = ();

    /// Unrecognized targets fall back to `Both` so nothing is lost silently.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "off" => To::Off,
            "file" => To::File,
            "console" => To::Console,
            _ => To::Both,
        })
    }
}

impl fmt::Display for To {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            To::Off => "off",
            To::File => "file",
            To::Console => "console",
            To::Both => "both",
        };
        f.write_str(s)
    }
}

impl<'de> Deserialize<'de> for To {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let to = String::deserialize(deserializer)?;
        To::from_str(&to).map_err(|_| de::Error::custom("invalid log target"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Level {
    inner: slog::Level,
}

impl Level {
    #[inline]
    pub fn inner(&self) -> slog::Level {
        self.inner
    }
}

impl From<slog::Level> for Level {
    #[inline]
    fn from(inner: slog::Level) -> Self {
        Level { inner }
    }
}

impl Deref for Level {
    type Target = slog::Level;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Level {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<'de> Deserialize<'de> for Level {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level = String::deserialize(deserializer)?;
        let level = slog::Level::from_str(&level).map_err(|_e| de::Error::custom(format!("invalid log level: {level}")))?;
        Ok(Level { inner: level })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename() {
        let mut log = Log::default();
        assert_eq!(log.filename(), "/var/log/mqrpc/mqrpc.log");
        log.dir = "logs//".into();
        assert_eq!(log.filename(), "logs/mqrpc.log");
        log.dir.clear();
        assert_eq!(log.filename(), "mqrpc.log");
        log.file.clear();
        assert_eq!(log.filename(), "");
    }

    #[test]
    fn test_to() {
        assert_eq!("OFF".parse::<To>(), Ok(To::Off));
        assert_eq!("somewhere".parse::<To>(), Ok(To::Both));
        assert!(To::Both.file() && To::Both.console());
        assert!(!To::File.console());
        assert_eq!(To::Console.to_string(), "console");
    }

    #[test]
    fn test_deserialize_log() {
        let log: Log = serde_json::from_str(r#"{"to": "file", "level": "warn"}"#).unwrap();
        assert_eq!(log.to, To::File);
        assert_eq!(log.level.inner(), slog::Level::Warning);
        assert!(serde_json::from_str::<Log>(r#"{"level": "loud"}"#).is_err());
    }
}
