//! Common validation utilities.

use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

/// Maximum length of a server name.
pub const MAX_SERVER_NAME_LENGTH: usize = 128;

lazy_static! {
    static ref SERVER_NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._@/-]*$").unwrap();
    static ref ENV_NAME_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Validates a server name: alphanumeric start, then `._@/-` allowed.
pub fn validate_server_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > MAX_SERVER_NAME_LENGTH {
        let mut err = ValidationError::new("server_name_length");
        err.message = Some(
            format!(
                "Server name must be between 1 and {} characters",
                MAX_SERVER_NAME_LENGTH
            )
            .into(),
        );
        return Err(err);
    }
    if SERVER_NAME_RE.is_match(name) {
        Ok(())
    } else {
        let mut err = ValidationError::new("server_name_format");
        err.message = Some("Server name contains invalid characters".into());
        Err(err)
    }
}

/// Validates an environment variable name.
pub fn validate_env_name(name: &str) -> Result<(), ValidationError> {
    if ENV_NAME_RE.is_match(name) {
        Ok(())
    } else {
        let mut err = ValidationError::new("env_name_format");
        err.message = Some(format!("Invalid environment variable name: {}", name).into());
        Err(err)
    }
}

/// Validates a command string: non-blank and free of NUL bytes.
pub fn validate_command(command: &str) -> Result<(), ValidationError> {
    if command.trim().is_empty() || command.contains('\0') {
        let mut err = ValidationError::new("command_format");
        err.message = Some("Command must be a non-empty string".into());
        Err(err)
    } else {
        Ok(())
    }
}

/// Returns true if an environment value is a reference (`${VAR}` or `$VAR`)
/// rather than a literal.
pub fn is_env_reference(value: &str) -> bool {
    let value = value.trim();
    if let Some(inner) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        return ENV_NAME_RE.is_match(inner);
    }
    if let Some(inner) = value.strip_prefix('$') {
        return ENV_NAME_RE.is_match(inner);
    }
    false
}
