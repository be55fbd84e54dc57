//! Username validation
//!
//! Pure checks applied to a candidate name before it ever reaches the registry.

use crate::error::AppError;

/// Minimum username length in characters
pub const MIN_USERNAME_LEN: usize = 3;

/// Maximum username length in characters
pub const MAX_USERNAME_LEN: usize = 20;

/// Validate a candidate username.
///
/// Surrounding whitespace is trimmed; the trimmed name is returned on success.
pub fn validate_username(raw: &str) -> Result<&str, AppError> {
    let name = raw.trim();

    if name.is_empty() {
        return Err(AppError::InvalidUsername("username cannot be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(AppError::InvalidUsername("username cannot contain spaces"));
    }

    let len = name.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(AppError::InvalidUsername(
            "username must be between 3 and 20 characters",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::InvalidUsername(
            "username may only contain letters, digits, '_' and '-'",
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(AppError::InvalidUsername(
            "username must start with a letter or digit",
        ));
    }

    Ok(name)
}
