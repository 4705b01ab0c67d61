use std::path::Path;

use ignore::overrides::OverrideBuilder;
use ignore::Match;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggersError {
    #[error("invalid triggers glob pattern(s): {0}")]
    InvalidPattern(#[source] ignore::Error),
}

/// `triggers` is a file-glob gate: a step with `triggers` set only runs if at
/// least one changed file in the event matches one of the patterns. An empty
/// pattern list means the gate is not configured and always passes.
pub fn matches_triggers(patterns: &[String], changed_files: &[String]) -> Result<bool, TriggersError> {
    if patterns.is_empty() {
        return Ok(true);
    }
    let mut builder = OverrideBuilder::new(".");
    for pattern in patterns {
        builder.add(pattern).map_err(TriggersError::InvalidPattern)?;
    }
    let overrides = builder.build().map_err(TriggersError::InvalidPattern)?;
    Ok(changed_files
        .iter()
        .any(|file| matches!(overrides.matched(Path::new(file), false), Match::Whitelist(_))))
}
