//! Canvas grid bounds

use serde::{Deserialize, Serialize};

/// Default grid width in pixels
pub const DEFAULT_CANVAS_WIDTH: u32 = 1000;
/// Default grid height in pixels
pub const DEFAULT_CANVAS_HEIGHT: u32 = 1000;

/// Half-open bounds `[0, width) x [0, height)` of the shared grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasBounds {
    pub width: u32,
    pub height: u32,
}

impl CanvasBounds {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether `(x, y)` lies on the grid.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        (0..self.width as i64).contains(&x) && (0..self.height as i64).contains(&y)
    }

    /// Total number of addressable pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl Default for CanvasBounds {
    fn default() -> Self {
        Self {
            width: DEFAULT_CANVAS_WIDTH,
            height: DEFAULT_CANVAS_HEIGHT,
        }
    }
}
