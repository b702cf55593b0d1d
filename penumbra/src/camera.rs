use glam::{Mat4, Vec3};
use penumbra_types::BoundingSphere;

use crate::util::frustum::Frustum;

/// The user camera as seen by the shadow atlas.
#[derive(Debug, Clone)]
pub struct ViewCamera {
    view_proj: Mat4,
    location: Vec3,
    frustum: Frustum,
}

impl ViewCamera {
    pub fn new(view_proj: Mat4, location: Vec3) -> Self {
        Self {
            view_proj,
            location,
            frustum: Frustum::from_matrix(view_proj),
        }
    }

    /// Builds the camera from separate view and projection matrices, taking
    /// the location from the inverse view.
    pub fn from_view_projection(view: Mat4, projection: Mat4) -> Self {
        let location = view.inverse().w_axis.truncate();
        Self::new(projection * view, location)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.view_proj
    }

    pub fn location(&self) -> Vec3 {
        self.location
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.frustum.contains_sphere(BoundingSphere::new(center, radius))
    }

    pub fn contains_frustum(&self, other: &Frustum) -> bool {
        self.frustum.intersects_frustum(other)
    }
}
