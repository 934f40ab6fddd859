//! Command implementations

pub mod jobs;
pub mod locks;
pub mod logs;
