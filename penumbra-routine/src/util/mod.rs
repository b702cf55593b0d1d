//! Small wgpu helpers.

pub mod bind_merge;
pub mod error_scope;
pub mod math;
