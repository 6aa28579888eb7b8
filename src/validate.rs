//! Input validation for client-supplied identifiers.
//!
//! Pure predicates over display names, room ids, passwords, and custom
//! message types. Each refusal carries a stable code so clients can react
//! programmatically, a human-readable reason, and the offending value.
//!
//! Lengths are measured in UTF-16 code units so limits agree with what a
//! browser client measures with `.length`.

use thiserror::Error;

/// Maximum display name length, in UTF-16 code units.
pub const MAX_DISPLAY_NAME_LEN: usize = 50;
/// Maximum room id length, in UTF-16 code units.
pub const MAX_ROOM_ID_LEN: usize = 64;
/// Minimum room password length, in UTF-16 code units.
pub const MIN_PASSWORD_LEN: usize = 4;
/// Maximum room password length, in UTF-16 code units.
pub const MAX_PASSWORD_LEN: usize = 128;
/// Maximum custom message type length, in UTF-16 code units.
pub const MAX_CUSTOM_TYPE_LEN: usize = 32;

/// Stable refusal codes for validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationCode {
    DisplayNameEmpty,
    DisplayNameTooLong,
    RoomIdEmpty,
    RoomIdTooLong,
    RoomIdInvalidPattern,
    PasswordEmpty,
    PasswordTooShort,
    PasswordTooLong,
    CustomTypeEmpty,
    CustomTypeTooLong,
    CustomTypeInvalidPattern,
}

impl ValidationCode {
    /// The wire-stable rendering of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisplayNameEmpty => "DISPLAY_NAME_EMPTY",
            Self::DisplayNameTooLong => "DISPLAY_NAME_TOO_LONG",
            Self::RoomIdEmpty => "ROOM_ID_EMPTY",
            Self::RoomIdTooLong => "ROOM_ID_TOO_LONG",
            Self::RoomIdInvalidPattern => "ROOM_ID_INVALID_PATTERN",
            Self::PasswordEmpty => "PASSWORD_EMPTY",
            Self::PasswordTooShort => "PASSWORD_TOO_SHORT",
            Self::PasswordTooLong => "PASSWORD_TOO_LONG",
            Self::CustomTypeEmpty => "CUSTOM_TYPE_EMPTY",
            Self::CustomTypeTooLong => "CUSTOM_TYPE_TOO_LONG",
            Self::CustomTypeInvalidPattern => "CUSTOM_TYPE_INVALID_PATTERN",
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured validation refusal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} [{code}]: {value:?}")]
pub struct ValidationError {
    /// Stable machine-readable code.
    pub code: ValidationCode,
    /// Human-readable reason.
    pub reason: &'static str,
    /// The offending input.
    pub value: String,
}

impl ValidationError {
    fn new(code: ValidationCode, reason: &'static str, value: &str) -> Self {
        Self {
            code,
            reason,
            value: value.to_string(),
        }
    }
}

/// Number of UTF-16 code units in `s`.
fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Validate a display name: non-empty after trimming, at most 50 code units.
///
/// The length check applies to the trimmed value, which is also what
/// [`crate::peer::Peer::update_display_name`] stores.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(
            ValidationCode::DisplayNameEmpty,
            "display name must not be empty",
            name,
        ));
    }
    if utf16_len(trimmed) > MAX_DISPLAY_NAME_LEN {
        return Err(ValidationError::new(
            ValidationCode::DisplayNameTooLong,
            "display name exceeds 50 characters",
            name,
        ));
    }
    Ok(())
}

/// Validate a room id: non-empty, at most 64 code units, `[A-Za-z0-9_-]+`.
pub fn validate_room_id(room_id: &str) -> Result<(), ValidationError> {
    if room_id.is_empty() {
        return Err(ValidationError::new(
            ValidationCode::RoomIdEmpty,
            "room id must not be empty",
            room_id,
        ));
    }
    if utf16_len(room_id) > MAX_ROOM_ID_LEN {
        return Err(ValidationError::new(
            ValidationCode::RoomIdTooLong,
            "room id exceeds 64 characters",
            room_id,
        ));
    }
    if !room_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::new(
            ValidationCode::RoomIdInvalidPattern,
            "room id may only contain letters, digits, underscores and hyphens",
            room_id,
        ));
    }
    Ok(())
}

/// Validate a room password: non-empty, between 4 and 128 code units.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::new(
            ValidationCode::PasswordEmpty,
            "password must not be empty",
            password,
        ));
    }
    let len = utf16_len(password);
    if len < MIN_PASSWORD_LEN {
        return Err(ValidationError::new(
            ValidationCode::PasswordTooShort,
            "password must be at least 4 characters",
            password,
        ));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(ValidationError::new(
            ValidationCode::PasswordTooLong,
            "password exceeds 128 characters",
            password,
        ));
    }
    Ok(())
}

/// Validate a custom message type: non-empty, at most 32 code units,
/// `[A-Za-z0-9._-]+`.
pub fn validate_custom_type(custom_type: &str) -> Result<(), ValidationError> {
    if custom_type.is_empty() {
        return Err(ValidationError::new(
            ValidationCode::CustomTypeEmpty,
            "custom type must not be empty",
            custom_type,
        ));
    }
    if utf16_len(custom_type) > MAX_CUSTOM_TYPE_LEN {
        return Err(ValidationError::new(
            ValidationCode::CustomTypeTooLong,
            "custom type exceeds 32 characters",
            custom_type,
        ));
    }
    if !custom_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return Err(ValidationError::new(
            ValidationCode::CustomTypeInvalidPattern,
            "custom type may only contain letters, digits, dots, underscores and hyphens",
            custom_type,
        ));
    }
    Ok(())
}
