pub mod canvas;
pub mod health;
pub mod pixel;
pub mod ws;
