//! Environment lookup helpers shared by the config resolvers.

use std::str::FromStr;

use crate::error::ConfigError;

/// Source of configuration variables.
///
/// The process environment in production; a map in tests.
pub(crate) type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read from the process environment.
pub(crate) fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an optional variable, treating an empty value as unset.
pub(crate) fn optional_env(lookup: EnvLookup<'_>, key: &str) -> Result<Option<String>, ConfigError> {
    Ok(lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
}

/// Parse an optional variable, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(
    lookup: EnvLookup<'_>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_env(lookup, key)?.unwrap_or(default))
}

/// Parse an optional variable, keeping `None` when unset.
pub(crate) fn parse_env<T>(lookup: EnvLookup<'_>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(lookup, key)?
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}
