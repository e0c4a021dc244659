//! Color tokens
//!
//! A color is `#` followed by exactly six hex digits. Input is accepted in
//! either case and normalized to upper case, so `#ff0000` and `#FF0000` are
//! the same color on the wire and in storage.

use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Marker character that prefixes every color token
pub const COLOR_MARKER: char = '#';

/// Validated `#RRGGBB` color
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    /// Parse and normalize a color token.
    pub fn parse(token: &str) -> Result<Self, ValidationError> {
        let digits = token
            .strip_prefix(COLOR_MARKER)
            .ok_or(ValidationError::InvalidColor)?;

        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidColor);
        }

        Ok(Self(format!("{}{}", COLOR_MARKER, digits.to_ascii_uppercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Color {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Color {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
