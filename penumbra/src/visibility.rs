//! Decides which lights, and which of their faces, can affect what the camera sees.

use bitflags::bitflags;
use penumbra_types::{LightKind, LightProjection, ShadowLight, POINT_LIGHT_FACES};

use crate::{util::frustum::Frustum, ViewCamera};

bitflags! {
    /// Set of faces of a light. Single-face lights only ever use bit 0.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FaceMask: u8 {
        const POSITIVE_X = 1 << 0;
        const NEGATIVE_X = 1 << 1;
        const POSITIVE_Y = 1 << 2;
        const NEGATIVE_Y = 1 << 3;
        const POSITIVE_Z = 1 << 4;
        const NEGATIVE_Z = 1 << 5;
    }
}

impl FaceMask {
    /// Mask holding only the given face.
    pub const fn face(index: u8) -> Self {
        Self::from_bits_truncate(1 << index)
    }

    /// Mask of the one face a spot, directional or projector light has.
    pub const fn single() -> Self {
        Self::POSITIVE_X
    }

    pub fn count(self) -> usize {
        self.bits().count_ones() as usize
    }

    /// Indices of the faces in the mask, ascending.
    pub fn indices(self) -> impl Iterator<Item = u8> {
        (0..POINT_LIGHT_FACES as u8).filter(move |&idx| self.contains(Self::face(idx)))
    }
}

/// Visibility of one light for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightVisibility {
    pub visible: bool,
    /// Faces whose frustum touches the camera frustum. Empty when not visible.
    pub faces: FaceMask,
}

impl LightVisibility {
    pub const HIDDEN: Self = Self {
        visible: false,
        faces: FaceMask::empty(),
    };
}

/// Lights that take part in shadow allocation at all.
pub fn is_eligible(light: &ShadowLight) -> bool {
    light.cast_shadows
}

pub fn classify(camera: &ViewCamera, light: &ShadowLight) -> LightVisibility {
    if !is_eligible(light) || !light.visible {
        return LightVisibility::HIDDEN;
    }

    let faces = match (light.kind, &light.projection) {
        (LightKind::Point, LightProjection::Cube(matrices)) => {
            if !camera.contains_sphere(light.position(), light.range) {
                return LightVisibility::HIDDEN;
            }
            matrices
                .iter()
                .enumerate()
                .filter(|(_, matrix)| camera.contains_frustum(&Frustum::from_matrix(**matrix)))
                .fold(FaceMask::empty(), |mask, (idx, _)| mask | FaceMask::face(idx as u8))
        }
        (LightKind::Spot, LightProjection::Single(matrix)) => {
            let in_range = camera.contains_sphere(light.position(), light.range);
            if in_range && camera.contains_frustum(&Frustum::from_matrix(*matrix)) {
                FaceMask::single()
            } else {
                FaceMask::empty()
            }
        }
        (LightKind::Directional | LightKind::Projector, LightProjection::Single(matrix)) => {
            if camera.contains_frustum(&Frustum::from_matrix(*matrix)) {
                FaceMask::single()
            } else {
                FaceMask::empty()
            }
        }
        (kind, _) => {
            log::warn!(
                "Light {:?} of kind {:?} has a mismatched projection, ignoring it",
                light.handle,
                kind
            );
            FaceMask::empty()
        }
    };

    LightVisibility {
        visible: !faces.is_empty(),
        faces,
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};
    use penumbra_types::{RawLightHandle, ShadowLight};

    use super::{classify, FaceMask};
    use crate::ViewCamera;

    fn camera() -> ViewCamera {
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
        ViewCamera::from_view_projection(view, projection)
    }

    #[test]
    fn face_mask_helpers() {
        let mask = FaceMask::face(0) | FaceMask::face(4);
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.indices().collect::<Vec<_>>(), vec![0, 4]);
        assert_eq!(FaceMask::all().count(), 6);
    }

    #[test]
    fn point_light_in_view_has_faces() {
        let light = ShadowLight::point(RawLightHandle::new(0), Vec3::new(0.0, 0.0, -20.0), 5.0, 100.0);
        let visibility = classify(&camera(), &light);
        assert!(visibility.visible);
        // the face pointing back at the camera always overlaps the view
        assert!(visibility.faces.contains(FaceMask::POSITIVE_Z));
    }

    #[test]
    fn point_light_behind_camera_is_hidden() {
        let light = ShadowLight::point(RawLightHandle::new(0), Vec3::new(0.0, 0.0, 20.0), 5.0, 100.0);
        let visibility = classify(&camera(), &light);
        assert!(!visibility.visible);
        assert!(visibility.faces.is_empty());
    }

    #[test]
    fn disabled_lights_are_hidden() {
        let mut light = ShadowLight::point(RawLightHandle::new(0), Vec3::new(0.0, 0.0, -20.0), 5.0, 100.0);
        light.cast_shadows = false;
        assert!(!classify(&camera(), &light).visible);

        light.cast_shadows = true;
        light.visible = false;
        assert!(!classify(&camera(), &light).visible);
    }

    #[test]
    fn spot_light_pointing_into_view_is_visible() {
        let light = ShadowLight::spot(
            RawLightHandle::new(0),
            Vec3::new(0.0, 10.0, -20.0),
            Vec3::NEG_Y,
            0.6,
            30.0,
            100.0,
        );
        let visibility = classify(&camera(), &light);
        assert!(visibility.visible);
        assert_eq!(visibility.faces, FaceMask::single());
    }

    #[test]
    fn directional_light_over_view_is_visible() {
        let light = ShadowLight::directional(
            RawLightHandle::new(0),
            Vec3::new(0.3, -1.0, 0.2),
            Vec3::new(0.0, 0.0, -20.0),
            30.0,
            50.0,
            100.0,
        );
        assert!(classify(&camera(), &light).visible);
    }
}
