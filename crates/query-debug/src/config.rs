//! Engine and session configuration.

#![allow(missing_docs)]

use std::path::Path;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{DebugError, Result};

const DEFAULT_DATABASE: &str = "postgres";
const DEFAULT_MAX_HISTORY: usize = 1000;
const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Debug output verbosity for a session.
///
/// Levels are ordered; each one publishes everything the one below does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DebugLevel {
    /// Statement boundaries and breakpoint hits only.
    #[default]
    Basic,
    /// Adds `planCaptured` and `dataChanged` events.
    Detailed,
    /// Adds a `boundaryEvaluated` event at every statement boundary.
    Verbose,
}

impl DebugLevel {
    fn parse(text: &str) -> Result<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "detailed" => Ok(Self::Detailed),
            "verbose" => Ok(Self::Verbose),
            _ => Err(DebugError::InvalidConfig(
                format!("invalid session.level '{text}'").into(),
            )),
        }
    }
}

/// Per-session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Label of the target database (vendor or logical name).
    pub database: SmolStr,
    /// Debug verbosity.
    pub level: DebugLevel,
    /// Move the session to `error` when a statement fails.
    pub auto_break_on_error: bool,
    /// Bound on retained execution points and recorded operations.
    pub max_history_size: usize,
    /// Record data changes so they can be rewound.
    pub time_travel_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            database: SmolStr::new(DEFAULT_DATABASE),
            level: DebugLevel::Basic,
            auto_break_on_error: false,
            max_history_size: DEFAULT_MAX_HISTORY,
            time_travel_enabled: true,
        }
    }
}

/// Optional overrides merged onto a [`SessionConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfigUpdate {
    pub database: Option<SmolStr>,
    pub level: Option<DebugLevel>,
    pub auto_break_on_error: Option<bool>,
    pub max_history_size: Option<usize>,
    pub time_travel_enabled: Option<bool>,
}

impl SessionConfig {
    /// Merge overrides, rejecting a zero history bound.
    pub fn apply_update(&mut self, update: SessionConfigUpdate) -> Result<()> {
        if update.max_history_size == Some(0) {
            return Err(DebugError::validation("maxHistorySize must be at least 1"));
        }
        if let Some(database) = update.database {
            let trimmed = database.trim();
            if !trimmed.is_empty() {
                self.database = SmolStr::new(trimmed);
            }
        }
        if let Some(level) = update.level {
            self.level = level;
        }
        if let Some(auto_break_on_error) = update.auto_break_on_error {
            self.auto_break_on_error = auto_break_on_error;
        }
        if let Some(max_history_size) = update.max_history_size {
            self.max_history_size = max_history_size;
        }
        if let Some(time_travel_enabled) = update.time_travel_enabled {
            self.time_travel_enabled = time_travel_enabled;
        }
        Ok(())
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Defaults applied to every new session before caller overrides.
    pub session: SessionConfig,
    /// Events kept for polling callers while nobody is subscribed.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            DebugError::InvalidConfig(format!("{}: {err}", path.display()).into())
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: EngineToml = toml::from_str(text)
            .map_err(|err| DebugError::InvalidConfig(format!("debugger.toml: {err}").into()))?;
        raw.into_config()
    }
}

#[derive(Debug, Deserialize)]
struct EngineToml {
    engine: Option<EngineSection>,
    session: Option<SessionSection>,
}

#[derive(Debug, Deserialize)]
struct EngineSection {
    event_buffer: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SessionSection {
    database: Option<String>,
    level: Option<String>,
    auto_break_on_error: Option<bool>,
    max_history_size: Option<usize>,
    time_travel: Option<bool>,
}

impl EngineToml {
    fn into_config(self) -> Result<EngineConfig> {
        let mut config = EngineConfig::default();
        if let Some(engine) = self.engine {
            if let Some(event_buffer) = engine.event_buffer {
                config.event_buffer = event_buffer;
            }
        }
        if let Some(session) = self.session {
            let level = session.level.as_deref().map(DebugLevel::parse).transpose()?;
            config
                .session
                .apply_update(SessionConfigUpdate {
                    database: session.database.map(SmolStr::from),
                    level,
                    auto_break_on_error: session.auto_break_on_error,
                    max_history_size: session.max_history_size,
                    time_travel_enabled: session.time_travel,
                })
                .map_err(|err| DebugError::InvalidConfig(err.to_string().into()))?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_overrides_only_given_fields() {
        let mut config = SessionConfig::default();
        config
            .apply_update(SessionConfigUpdate {
                auto_break_on_error: Some(true),
                max_history_size: Some(5),
                ..SessionConfigUpdate::default()
            })
            .unwrap();
        assert!(config.auto_break_on_error);
        assert_eq!(config.max_history_size, 5);
        assert_eq!(config.database, "postgres");
        assert!(config.time_travel_enabled);
    }

    #[test]
    fn zero_history_is_rejected() {
        let mut config = SessionConfig::default();
        let err = config
            .apply_update(SessionConfigUpdate {
                max_history_size: Some(0),
                ..SessionConfigUpdate::default()
            })
            .unwrap_err();
        assert!(matches!(err, DebugError::Validation(_)));
        assert_eq!(config.max_history_size, 1000);
    }

    #[test]
    fn loads_toml_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
[engine]
event_buffer = 16

[session]
database = "mysql"
level = "Verbose"
max_history_size = 50
time_travel = false
"#,
        )
        .unwrap();
        assert_eq!(config.event_buffer, 16);
        assert_eq!(config.session.database, "mysql");
        assert_eq!(config.session.level, DebugLevel::Verbose);
        assert_eq!(config.session.max_history_size, 50);
        assert!(!config.session.time_travel_enabled);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn unknown_level_is_rejected() {
        let err = EngineConfig::from_toml_str("[session]\nlevel = \"chatty\"\n").unwrap_err();
        assert!(matches!(err, DebugError::InvalidConfig(_)));
    }
}
