//! Type declarations for the penumbra shadow atlas.
//!
//! These are the values collaborators hand to the atlas every frame: lights,
//! shadow casters and the handles that identify them across frames. This is
//! reexported in the penumbra crate proper.

use std::{fmt::Debug, hash::Hash, marker::PhantomData};

/// Reexport of the glam version penumbra is using.
pub use glam;

mod caster;
mod light;

pub use caster::*;
pub use light::*;

/// Non-owning resource handle.
///
/// Handles are the identity of a light or mesh across frames. Two handles
/// compare equal iff their indices are equal, regardless of where the value
/// they refer to lives.
pub struct RawResourceHandle<T> {
    /// Underlying value of the handle.
    pub idx: usize,
    _phantom: PhantomData<T>,
}

impl<T> RawResourceHandle<T> {
    /// Creates a new handle with the given value
    pub const fn new(idx: usize) -> Self {
        Self {
            idx,
            _phantom: PhantomData,
        }
    }
}

// Need Debug/Copy/Clone impls that don't require T: Trait.
impl<T> Debug for RawResourceHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResourceHandle").field("idx", &self.idx).finish()
    }
}

impl<T> Copy for RawResourceHandle<T> {}

impl<T> Clone for RawResourceHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for RawResourceHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx
    }
}

impl<T> Eq for RawResourceHandle<T> {}

impl<T> PartialOrd for RawResourceHandle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for RawResourceHandle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.idx.cmp(&other.idx)
    }
}

impl<T> Hash for RawResourceHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.idx.hash(state);
    }
}

/// Tag type for differentiating meshes on the type level.
#[doc(hidden)]
pub struct MeshTag;

/// Non-owning handle to a light.
pub type RawLightHandle = RawResourceHandle<ShadowLight>;
/// Non-owning handle to a mesh usable by the shadow pass.
pub type RawMeshHandle = RawResourceHandle<MeshTag>;
