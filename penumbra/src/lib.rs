//! Dynamic shadow atlas for real-time renderers.
//!
//! Every frame the [`ShadowAtlas`] decides which shadow-casting lights are
//! visible, scores them, and packs one depth tile per light face into a
//! single square atlas texture using a quad tree. Placements are kept stable
//! from frame to frame unless something important changes, in which case the
//! whole atlas is rebuilt in priority order.
//!
//! The [`ShadowBatchBuilder`] then turns the placements into instanced draw
//! batches grouped by mesh, ready to be uploaded into a uniform block and
//! drawn into the atlas with a single whole-atlas viewport.
//!
//! ```no_run
//! use penumbra::{
//!     types::{glam::{Mat4, Vec3}, RawLightHandle, ShadowLight},
//!     ShadowAtlas, ShadowAtlasOptions, ShadowBatchBuilder, ViewCamera,
//! };
//!
//! let mut atlas = ShadowAtlas::new(ShadowAtlasOptions::default())?;
//! let mut builder = ShadowBatchBuilder::new();
//!
//! let camera = ViewCamera::new(Mat4::IDENTITY, Vec3::ZERO);
//! let lights = [ShadowLight::point(RawLightHandle::new(0), Vec3::ZERO, 10.0, 100.0)];
//!
//! let mut frame = atlas.update(&camera, &lights);
//! let batches = builder.build(&atlas, &mut frame, &lights, &[]);
//! # Ok::<(), penumbra::OptionsError>(())
//! ```

pub use penumbra_types as types;

mod atlas;
mod batch;
mod camera;
mod options;
pub mod priority;
pub mod quadtree;
pub mod util;
pub mod visibility;

pub use atlas::*;
pub use batch::*;
pub use camera::*;
pub use options::*;
