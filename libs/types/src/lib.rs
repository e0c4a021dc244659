//! Types library for the shared pixel canvas
//!
//! Core type definitions shared by the canvas server and the persistence
//! service. Everything in here is plain data plus validation; no I/O.
//!
//! # Modules
//! - `ids`: Identifiers (UserId, ConnectionId)
//! - `color`: `#RRGGBB` color tokens
//! - `canvas`: Grid bounds
//! - `pixel`: Pixel requests and accepted updates
//! - `errors`: Validation error taxonomy

pub mod ids;
pub mod color;
pub mod canvas;
pub mod pixel;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::color::*;
    pub use crate::canvas::*;
    pub use crate::pixel::*;
    pub use crate::errors::*;
}
