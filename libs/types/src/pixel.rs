//! Pixel requests and accepted updates
//!
//! A `PixelRequest` is what a caller sends. It becomes a `ValidatedPixel`
//! once coordinates, color and identity have been checked, and a
//! `PixelUpdate` only when the server stamps it with an acceptance time.
//! Ingestion only ever builds updates through [`ValidatedPixel::stamp`].
//! The fields stay public and the type deserializes, so stored and
//! broadcast updates can be read back; those paths trust their source.

use crate::canvas::CanvasBounds;
use crate::color::Color;
use crate::errors::ValidationError;
use crate::ids::UserId;
use serde::{Deserialize, Serialize};

/// Decoded but unvalidated pixel request
///
/// Coordinates are signed so negative input is reported as out of range
/// instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelRequest {
    pub x: i64,
    pub y: i64,
    pub color: String,
    #[serde(default)]
    pub user_id: String,
}

impl PixelRequest {
    pub fn new(x: i64, y: i64, color: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            x,
            y,
            color: color.into(),
            user_id: user_id.into(),
        }
    }

    /// Check coordinates, color and identity, in that order.
    pub fn validate(self, bounds: &CanvasBounds) -> Result<ValidatedPixel, ValidationError> {
        if !(0..bounds.width as i64).contains(&self.x) {
            return Err(ValidationError::XOutOfRange {
                max: bounds.width.saturating_sub(1),
            });
        }
        if !(0..bounds.height as i64).contains(&self.y) {
            return Err(ValidationError::YOutOfRange {
                max: bounds.height.saturating_sub(1),
            });
        }

        let color = Color::parse(&self.color)?;

        if self.user_id.is_empty() {
            return Err(ValidationError::MissingUserId);
        }

        Ok(ValidatedPixel {
            x: self.x as u32,
            y: self.y as u32,
            color,
            user_id: UserId::new(self.user_id),
        })
    }
}

/// Pixel that passed validation but has not been accepted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPixel {
    x: u32,
    y: u32,
    color: Color,
    user_id: UserId,
}

impl ValidatedPixel {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Attach the server-assigned acceptance time (Unix millis).
    pub fn stamp(self, timestamp: i64) -> PixelUpdate {
        PixelUpdate {
            x: self.x,
            y: self.y,
            color: self.color,
            user_id: self.user_id,
            timestamp,
        }
    }
}

/// Accepted pixel change, as queued, broadcast and persisted
///
/// Wire form: `{"x":0,"y":0,"color":"#FF0000","userId":"alice","timestamp":1700000000000}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelUpdate {
    pub x: u32,
    pub y: u32,
    pub color: Color,
    pub user_id: UserId,
    /// Unix milliseconds, assigned by the server at acceptance
    pub timestamp: i64,
}

impl PixelUpdate {
    /// Grid coordinate used as the last-write-wins key.
    pub fn coordinate(&self) -> (u32, u32) {
        (self.x, self.y)
    }
}
