//! Frustums and bounding spheres.
//!
//! Plane extraction follows <https://www.gamedevs.org/uploads/fast-extraction-viewing-frustum-planes-from-world-view-projection-matrix.pdf>,
//! adapted to the `[0, 1]` clip depth range wgpu and glam's `*_rh` projections use.

use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};
use penumbra_types::BoundingSphere;

/// Determinants smaller than this are treated as non-invertible.
const DEGENERATE_DETERMINANT: f32 = 1e-12;

/// Represents a plane as a vec4 (or vec3 + f32)
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(C, align(16))]
pub struct Plane {
    pub abc: Vec3,
    pub d: f32,
}

impl Plane {
    pub fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self {
            abc: Vec3::new(a, b, c),
            d,
        }
    }

    fn from_vec4(v: Vec4) -> Self {
        Self::new(v.x, v.y, v.z, v.w)
    }

    pub fn normalize(mut self) -> Self {
        let mag = self.abc.length();
        if mag > 0.0 {
            self.abc /= mag;
            self.d /= mag;
        }

        self
    }

    /// Signed distance, positive on the inside.
    pub fn distance(self, point: Vec3) -> f32 {
        self.abc.dot(point) + self.d
    }
}

/// A closed frustum made of six planes, plus its eight world space corners
/// when the matrix is invertible.
#[derive(Debug, Copy, Clone)]
pub struct Frustum {
    planes: [Plane; 6],
    corners: Option<[Vec3; 8]>,
}

impl Frustum {
    pub fn from_matrix(matrix: Mat4) -> Self {
        let row0 = matrix.row(0);
        let row1 = matrix.row(1);
        let row2 = matrix.row(2);
        let row3 = matrix.row(3);

        let left = Plane::from_vec4(row3 + row0);
        let right = Plane::from_vec4(row3 - row0);
        let bottom = Plane::from_vec4(row3 + row1);
        let top = Plane::from_vec4(row3 - row1);
        // clip z is in [0, w]
        let near = Plane::from_vec4(row2);
        let far = Plane::from_vec4(row3 - row2);

        Self {
            planes: [
                left.normalize(),
                right.normalize(),
                bottom.normalize(),
                top.normalize(),
                near.normalize(),
                far.normalize(),
            ],
            corners: frustum_corners(matrix),
        }
    }

    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    pub fn corners(&self) -> Option<&[Vec3; 8]> {
        self.corners.as_ref()
    }

    /// Determines if the sphere is at all inside the frustum.
    pub fn contains_sphere(&self, sphere: BoundingSphere) -> bool {
        let neg_radius = -sphere.radius;

        self.planes
            .iter()
            .all(|plane| plane.distance(sphere.center) >= neg_radius)
    }

    /// Conservative intersection test between two frustums.
    ///
    /// Returns false only if one of the frustums has a plane with every corner
    /// of the other frustum outside of it. Frustums without corners always
    /// intersect.
    pub fn intersects_frustum(&self, other: &Frustum) -> bool {
        let (Some(own_corners), Some(other_corners)) = (&self.corners, &other.corners) else {
            return true;
        };

        !separated_by(&self.planes, other_corners) && !separated_by(&other.planes, own_corners)
    }
}

fn separated_by(planes: &[Plane; 6], corners: &[Vec3; 8]) -> bool {
    planes
        .iter()
        .any(|plane| corners.iter().all(|&corner| plane.distance(corner) < 0.0))
}

fn frustum_corners(matrix: Mat4) -> Option<[Vec3; 8]> {
    if matrix.determinant().abs() < DEGENERATE_DETERMINANT {
        return None;
    }
    let inverse = matrix.inverse();

    let mut corners = [Vec3::ZERO; 8];
    for (idx, corner) in corners.iter_mut().enumerate() {
        let x = if idx & 1 == 0 { -1.0 } else { 1.0 };
        let y = if idx & 2 == 0 { -1.0 } else { 1.0 };
        let z = if idx & 4 == 0 { 0.0 } else { 1.0 };

        let world = inverse * Vec4::new(x, y, z, 1.0);
        if world.w.abs() <= f32::EPSILON {
            return None;
        }
        *corner = world.xyz() / world.w;
    }

    Some(corners)
}
