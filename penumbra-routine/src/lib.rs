//! Draws the instanced shadow batches of a [`penumbra::ShadowAtlas`] into a
//! single `Depth32Float` atlas texture with wgpu.
//!
//! [`AtlasRenderer`] owns the atlas texture, the dynamic-offset instance
//! uniform buffer and the depth-only pipeline. Call
//! [`AtlasRenderer::update`] once per frame, then [`AtlasRenderer::render`]
//! to record the shadow pass, and sample [`AtlasRenderer::atlas_texture`]
//! with the coordinates from [`AtlasRenderer::atlas_entry`].

pub use penumbra;

mod error;
mod layout;
mod renderer;
pub mod util;

pub use error::*;
pub use layout::*;
pub use renderer::*;
