//! In-memory canvas state
//!
//! One entry per painted coordinate, last write wins. `BTreeMap` keeps
//! iteration order deterministic so the state hash is stable.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use types::pixel::PixelUpdate;

/// Current color of every painted pixel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasState {
    pixels: BTreeMap<(u32, u32), PixelUpdate>,
}

impl CanvasState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Apply an update. An older update never overwrites a newer one at the
    /// same coordinate; equal timestamps resolve to the later call.
    ///
    /// Returns whether the stored pixel changed.
    pub fn apply(&mut self, update: PixelUpdate) -> bool {
        match self.pixels.get(&update.coordinate()) {
            Some(existing) if existing.timestamp > update.timestamp => false,
            _ => {
                self.pixels.insert(update.coordinate(), update);
                true
            }
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<&PixelUpdate> {
        self.pixels.get(&(x, y))
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// All painted pixels, oldest first.
    pub fn pixels(&self) -> Vec<PixelUpdate> {
        let mut pixels: Vec<PixelUpdate> = self.pixels.values().cloned().collect();
        pixels.sort_by_key(|p| p.timestamp);
        pixels
    }

    /// Deterministic SHA-256 over every stored pixel.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for ((x, y), pixel) in &self.pixels {
            hasher.update(x.to_le_bytes());
            hasher.update(y.to_le_bytes());
            hasher.update(pixel.color.as_str().as_bytes());
            hasher.update((pixel.user_id.as_str().len() as u32).to_le_bytes());
            hasher.update(pixel.user_id.as_str().as_bytes());
            hasher.update(pixel.timestamp.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}
