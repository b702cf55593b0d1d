use glam::{Mat4, Vec3, Vec3A, Vec4Swizzles};

use crate::RawMeshHandle;

/// Represents a point in space and a radius from that point.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C, align(16))]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    pub fn from_mesh(mesh: &[Vec3]) -> Self {
        let center = find_mesh_center(mesh);
        let radius = find_mesh_bounding_sphere_radius(center, mesh);

        Self {
            center: Vec3::from(center),
            radius,
        }
    }

    /// Moves the sphere into the space of `transform`, growing the radius by its largest axis scale.
    pub fn apply_transform(self, transform: Mat4) -> Self {
        let max_scale = transform
            .x_axis
            .xyz()
            .length_squared()
            .max(
                transform
                    .y_axis
                    .xyz()
                    .length_squared()
                    .max(transform.z_axis.xyz().length_squared()),
            )
            .sqrt();
        let center = transform * self.center.extend(1.0);

        Self {
            center: center.truncate(),
            radius: max_scale * self.radius,
        }
    }
}

fn find_mesh_center(mesh: &[Vec3]) -> Vec3A {
    let first = if let Some(first) = mesh.first() {
        *first
    } else {
        return Vec3A::ZERO;
    };
    let mut max = Vec3A::from(first);
    let mut min = max;

    for pos in mesh.iter().skip(1) {
        let pos = Vec3A::from(*pos);
        max = max.max(pos);
        min = min.min(pos);
    }

    (max + min) / 2.0
}

fn find_mesh_bounding_sphere_radius(mesh_center: Vec3A, mesh: &[Vec3]) -> f32 {
    mesh.iter()
        .fold(0.0, |distance, pos| distance.max((Vec3A::from(*pos) - mesh_center).length()))
}

/// A renderable that can cast shadows.
#[derive(Debug, Clone)]
pub struct ShadowCaster {
    /// Mesh drawn in the shadow pass. Casters sharing a mesh are instanced together.
    pub mesh: RawMeshHandle,
    /// Model-to-world transform.
    pub transform: Mat4,
    /// Bounding sphere in model space.
    pub bounding_sphere: BoundingSphere,
}

impl ShadowCaster {
    pub fn world_bounding_sphere(&self) -> BoundingSphere {
        self.bounding_sphere.apply_transform(self.transform)
    }
}
