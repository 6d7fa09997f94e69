use thiserror::Error;

/// Fatal failures of a selection run.
///
/// Per-file problems (unreadable or unparseable sources, malformed diff
/// lines, unresolved call targets) are never fatal: they become warnings on
/// the report and the engine keeps going. Only the two kinds below abort.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration record is incomplete or inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The change-enumerator backend failed outright (non-zero exit,
    /// unreadable output). No partial result is produced.
    #[error("source enumeration failed: {0:#}")]
    SourceEnumeration(anyhow::Error),
}

impl EngineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }
}
