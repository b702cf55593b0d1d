use std::f32::consts::{FRAC_PI_2, PI};

use glam::{Mat4, Vec3};

use crate::RawLightHandle;

/// Near plane shared by every perspective shadow projection.
pub const SHADOW_NEAR_PLANE: f32 = 0.1;

/// Number of faces a point light renders, one per cube face.
pub const POINT_LIGHT_FACES: usize = 6;

/// Kind of a shadow-casting light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    Point,
    Spot,
    Directional,
    Projector,
}

impl LightKind {
    /// Number of atlas tiles a light of this kind occupies.
    pub const fn face_count(self) -> usize {
        match self {
            LightKind::Point => POINT_LIGHT_FACES,
            _ => 1,
        }
    }
}

/// View-projection matrices of a light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightProjection {
    /// One frustum. Spot, directional and projector lights.
    Single(Mat4),
    /// One frustum per cube face, ordered +X, -X, +Y, -Y, +Z, -Z.
    Cube([Mat4; POINT_LIGHT_FACES]),
}

/// A light as seen by the shadow atlas.
#[derive(Debug, Clone)]
pub struct ShadowLight {
    /// Stable identity of the light across frames.
    pub handle: RawLightHandle,
    pub kind: LightKind,
    /// World transform. The translation is the light's position.
    pub transform: Mat4,
    pub range: f32,
    pub intensity: f32,
    /// If false the light never takes part in shadow allocation.
    pub cast_shadows: bool,
    /// Scene-level visibility (e.g. disabled entity). Independent of the camera.
    pub visible: bool,
    pub projection: LightProjection,
}

impl ShadowLight {
    pub fn new(
        handle: RawLightHandle,
        kind: LightKind,
        transform: Mat4,
        range: f32,
        intensity: f32,
        projection: LightProjection,
    ) -> Self {
        Self {
            handle,
            kind,
            transform,
            range,
            intensity,
            cast_shadows: true,
            visible: true,
            projection,
        }
    }

    /// Point light at `position`, with cube face matrices reaching out to `range`.
    pub fn point(handle: RawLightHandle, position: Vec3, range: f32, intensity: f32) -> Self {
        Self::new(
            handle,
            LightKind::Point,
            Mat4::from_translation(position),
            range,
            intensity,
            LightProjection::Cube(cube_face_view_projections(position, range)),
        )
    }

    /// Spot light at `position` shining along `direction` with the given outer cone half angle.
    pub fn spot(
        handle: RawLightHandle,
        position: Vec3,
        direction: Vec3,
        outer_angle: f32,
        range: f32,
        intensity: f32,
    ) -> Self {
        let forward = direction.try_normalize().unwrap_or(Vec3::NEG_Z);
        let up = stable_up(forward);
        let far = range.max(SHADOW_NEAR_PLANE + 0.1);
        let fov = (outer_angle * 2.0).clamp(0.1, PI - 0.1);

        let view = Mat4::look_at_rh(position, position + forward, up);
        let projection = Mat4::perspective_rh(fov, 1.0, SHADOW_NEAR_PLANE, far);

        Self::new(
            handle,
            LightKind::Spot,
            Mat4::from_translation(position),
            range,
            intensity,
            LightProjection::Single(projection * view),
        )
    }

    /// Directional light covering a square of half-width `extent` around `focus`.
    ///
    /// The shadow camera sits `distance` units back along `direction`.
    pub fn directional(
        handle: RawLightHandle,
        direction: Vec3,
        focus: Vec3,
        extent: f32,
        distance: f32,
        intensity: f32,
    ) -> Self {
        let forward = direction.try_normalize().unwrap_or(Vec3::NEG_Y);
        let up = stable_up(forward);
        let position = focus - forward * distance;
        let extent = extent.max(0.1);

        let view = Mat4::look_at_rh(position, focus, up);
        let projection = Mat4::orthographic_rh(-extent, extent, -extent, extent, SHADOW_NEAR_PLANE, distance * 2.0);

        Self::new(
            handle,
            LightKind::Directional,
            Mat4::from_translation(position),
            distance,
            intensity,
            LightProjection::Single(projection * view),
        )
    }

    pub fn position(&self) -> Vec3 {
        self.transform.w_axis.truncate()
    }

    pub fn face_count(&self) -> usize {
        self.kind.face_count()
    }

    /// View-projection matrix of one face.
    ///
    /// `face` must be `Some(0..6)` for cube projections and `None` otherwise.
    pub fn face_view_proj(&self, face: Option<u8>) -> Option<Mat4> {
        match (&self.projection, face) {
            (LightProjection::Single(matrix), None) => Some(*matrix),
            (LightProjection::Cube(matrices), Some(face)) => matrices.get(face as usize).copied(),
            _ => None,
        }
    }
}

/// View-projection matrices for the six faces of a point light's cube.
pub fn cube_face_view_projections(position: Vec3, range: f32) -> [Mat4; POINT_LIGHT_FACES] {
    let far = range.max(SHADOW_NEAR_PLANE + 0.1);
    let projection = Mat4::perspective_rh(FRAC_PI_2, 1.0, SHADOW_NEAR_PLANE, far);

    let dirs = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
    let ups = [Vec3::Y, Vec3::Y, Vec3::Z, Vec3::NEG_Z, Vec3::Y, Vec3::Y];

    let mut matrices = [Mat4::IDENTITY; POINT_LIGHT_FACES];
    for ((matrix, dir), up) in matrices.iter_mut().zip(dirs).zip(ups) {
        *matrix = projection * Mat4::look_at_rh(position, position + dir, up);
    }
    matrices
}

fn stable_up(forward: Vec3) -> Vec3 {
    if forward.dot(Vec3::Y).abs() > 0.95 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}
