// Configuration management module

pub mod crawler;

// Re-export common configuration types
pub use crawler::{Settings, defaults};
