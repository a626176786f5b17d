pub mod category;
pub mod config;
pub mod consolidate;
pub mod decode;
pub mod matrix;
pub mod pipeline;
pub mod reduce;
pub mod table;
pub mod trust;
pub mod truth;

/// Application name for XDG paths
pub const APP_NAME: &str = "ntn-consensus";
