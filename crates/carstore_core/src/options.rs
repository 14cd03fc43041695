//! Context configuration.
//!
//! # Responsibility
//! - Describe which store a context opens and how it resolves write conflicts.
//! - Parse host-supplied connection strings into typed options.
//!
//! # Invariants
//! - Options are immutable once built; a context keeps its own copy.
//! - Parsing never touches the store; opening failures surface from `db`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MEMORY_STORE_NAME: &str = "default";
const MEMORY_DATA_SOURCE: &str = ":memory:";

/// Backing store selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provider {
    /// SQLite database file.
    File { path: PathBuf },
    /// Named in-memory database shared by every connection in this process
    /// that uses the same name. It lives while at least one is open.
    Memory { name: String },
}

/// How `save_changes` treats an update whose version is stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Later commits overwrite earlier ones regardless of version.
    #[default]
    LastWriteWins,
    /// Updates and deletes only apply to the version that was read.
    RejectStale,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastWriteWins => "last-write-wins",
            Self::RejectStale => "reject-stale",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "last-write-wins" | "lastwritewins" => Some(Self::LastWriteWins),
            "reject-stale" | "rejectstale" => Some(Self::RejectStale),
            _ => None,
        }
    }
}

/// Immutable configuration handed to `CarDbContext::new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOptions {
    pub provider: Provider,
    #[serde(default = "default_busy_timeout", with = "duration_ms")]
    pub busy_timeout: Duration,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default)]
    pub read_only: bool,
}

/// Connection string parse failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    MalformedSegment(String),
    UnknownKey(String),
    MissingDataSource,
    InvalidValue { key: String, value: String },
}

impl Display for OptionsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedSegment(segment) => {
                write!(f, "connection string segment `{segment}` is not key=value")
            }
            Self::UnknownKey(key) => write!(f, "unknown connection string key `{key}`"),
            Self::MissingDataSource => write!(f, "connection string has no data source"),
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value `{value}` for connection string key `{key}`")
            }
        }
    }
}

impl Error for OptionsError {}

impl ContextOptions {
    /// Options for a SQLite file store with default settings.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::with_provider(Provider::File { path: path.into() })
    }

    /// Options for a named shared in-memory store with default settings.
    pub fn memory(name: impl Into<String>) -> Self {
        Self::with_provider(Provider::Memory { name: name.into() })
    }

    fn with_provider(provider: Provider) -> Self {
        Self {
            provider,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            conflict_policy: ConflictPolicy::default(),
            read_only: false,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_conflict_policy(mut self, conflict_policy: ConflictPolicy) -> Self {
        self.conflict_policy = conflict_policy;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Parses `key=value;key=value` connection strings.
    ///
    /// Recognized keys (case-insensitive, spaces ignored): `Data Source`,
    /// `DataSource`, `Filename`, `Name`, `Busy Timeout` (milliseconds),
    /// `Conflict Policy`, `Mode` (`ReadOnly` | `ReadWrite`).
    ///
    /// # Errors
    /// - `MalformedSegment` for segments without `=`.
    /// - `UnknownKey` for unrecognized keys.
    /// - `MissingDataSource` when no data source key is present.
    /// - `InvalidValue` for values that fail to parse.
    pub fn from_connection_string(input: &str) -> Result<Self, OptionsError> {
        let mut data_source: Option<String> = None;
        let mut name: Option<String> = None;
        let mut busy_timeout = DEFAULT_BUSY_TIMEOUT;
        let mut conflict_policy = ConflictPolicy::default();
        let mut read_only = false;

        for segment in input.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let Some((raw_key, raw_value)) = segment.split_once('=') else {
                return Err(OptionsError::MalformedSegment(segment.to_string()));
            };
            let value = raw_value.trim();
            let key: String = raw_key
                .chars()
                .filter(|ch| !ch.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase();

            match key.as_str() {
                "datasource" | "filename" => {
                    if value.is_empty() {
                        return Err(invalid_value(raw_key, value));
                    }
                    data_source = Some(value.to_string());
                }
                "name" => {
                    if value.is_empty() {
                        return Err(invalid_value(raw_key, value));
                    }
                    name = Some(value.to_string());
                }
                "busytimeout" => {
                    let millis = value
                        .parse::<u64>()
                        .map_err(|_| invalid_value(raw_key, value))?;
                    busy_timeout = Duration::from_millis(millis);
                }
                "conflictpolicy" => {
                    conflict_policy =
                        ConflictPolicy::parse(value).ok_or_else(|| invalid_value(raw_key, value))?;
                }
                "mode" => {
                    read_only = match value.to_ascii_lowercase().as_str() {
                        "readonly" => true,
                        "readwrite" => false,
                        _ => return Err(invalid_value(raw_key, value)),
                    };
                }
                _ => return Err(OptionsError::UnknownKey(raw_key.trim().to_string())),
            }
        }

        let data_source = data_source.ok_or(OptionsError::MissingDataSource)?;
        let provider = if data_source.eq_ignore_ascii_case(MEMORY_DATA_SOURCE) {
            Provider::Memory {
                name: name.unwrap_or_else(|| DEFAULT_MEMORY_STORE_NAME.to_string()),
            }
        } else {
            Provider::File {
                path: PathBuf::from(data_source),
            }
        };

        Ok(Self {
            provider,
            busy_timeout,
            conflict_policy,
            read_only,
        })
    }

    /// Short provider label used in log lines; never includes paths.
    pub fn mode_label(&self) -> &'static str {
        match self.provider {
            Provider::File { .. } => "file",
            Provider::Memory { .. } => "memory",
        }
    }
}

fn invalid_value(key: &str, value: &str) -> OptionsError {
    OptionsError::InvalidValue {
        key: key.trim().to_string(),
        value: value.to_string(),
    }
}

fn default_busy_timeout() -> Duration {
    DEFAULT_BUSY_TIMEOUT
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConflictPolicy, ContextOptions, OptionsError, Provider, DEFAULT_BUSY_TIMEOUT};
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn file_data_source_uses_defaults() {
        let options = ContextOptions::from_connection_string("Data Source=cars.db").unwrap();
        assert_eq!(
            options.provider,
            Provider::File {
                path: PathBuf::from("cars.db")
            }
        );
        assert_eq!(options.busy_timeout, DEFAULT_BUSY_TIMEOUT);
        assert_eq!(options.conflict_policy, ConflictPolicy::LastWriteWins);
        assert!(!options.read_only);
    }

    #[test]
    fn memory_data_source_takes_name_and_flags() {
        let options = ContextOptions::from_connection_string(
            " datasource = :memory: ; Name=fleet; Busy Timeout=250; conflict policy=Reject-Stale; Mode=ReadOnly;",
        )
        .unwrap();
        assert_eq!(
            options.provider,
            Provider::Memory {
                name: "fleet".to_string()
            }
        );
        assert_eq!(options.busy_timeout, Duration::from_millis(250));
        assert_eq!(options.conflict_policy, ConflictPolicy::RejectStale);
        assert!(options.read_only);
    }

    #[test]
    fn memory_data_source_defaults_name() {
        let options = ContextOptions::from_connection_string("Filename=:memory:").unwrap();
        assert_eq!(options, ContextOptions::memory("default"));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            ContextOptions::from_connection_string("Name=x").unwrap_err(),
            OptionsError::MissingDataSource
        );
        assert_eq!(
            ContextOptions::from_connection_string("Data Source=a.db;Pooling=true").unwrap_err(),
            OptionsError::UnknownKey("Pooling".to_string())
        );
        assert_eq!(
            ContextOptions::from_connection_string("Data Source").unwrap_err(),
            OptionsError::MalformedSegment("Data Source".to_string())
        );
        assert!(matches!(
            ContextOptions::from_connection_string("Data Source=a.db;Busy Timeout=soon"),
            Err(OptionsError::InvalidValue { .. })
        ));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: ContextOptions = serde_json::from_value(serde_json::json!({
            "provider": { "kind": "file", "path": "/var/lib/cars.db" }
        }))
        .unwrap();
        assert_eq!(options, ContextOptions::file("/var/lib/cars.db"));

        let json = serde_json::to_value(&options.with_conflict_policy(ConflictPolicy::RejectStale))
            .unwrap();
        assert_eq!(json["busy_timeout"], 5000);
        assert_eq!(json["conflict_policy"], "reject-stale");
    }
}
