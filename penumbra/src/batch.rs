use std::ops::Range;

use arrayvec::ArrayVec;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use penumbra_types::{BoundingSphere, LightKind, RawMeshHandle, ShadowCaster, ShadowLight, POINT_LIGHT_FACES};

use crate::{
    util::{frustum::Frustum, typedefs::FastIndexMap},
    ShadowAtlas, ShadowFrame,
};

/// Size of the uniform block instances are uploaded into.
///
/// 16KiB is the smallest `max_uniform_buffer_binding_size` wgpu guarantees.
pub const SHADOW_INSTANCE_BLOCK_SIZE: usize = 16384;

/// How many instances fit into one uniform block, and so into one draw.
pub const MAX_SHADOW_INSTANCES_PER_MESH: usize = SHADOW_INSTANCE_BLOCK_SIZE / std::mem::size_of::<ShadowInstanceData>();

/// Per-instance data of the shadow pass, laid out the way the shader reads it.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ShadowInstanceData {
    pub model: Mat4,
    pub light_view_proj: Mat4,
    /// (scale x, scale y, offset x, offset y) in atlas uv.
    pub atlas_scale_offset: Vec4,
    /// (min x, min y, max x, max y) in atlas texels.
    pub tile_bounds: Vec4,
    pub light_index: u32,
    _pad0: [u32; 3],
    /// Cube face, -1 for single-face lights.
    pub face_index: i32,
    _pad1: [i32; 3],
}

const _: () = assert!(std::mem::size_of::<ShadowInstanceData>() == 192);

impl ShadowInstanceData {
    pub fn new(
        model: Mat4,
        light_view_proj: Mat4,
        atlas_scale_offset: Vec4,
        tile_bounds: Vec4,
        light_index: u32,
        face_index: i32,
    ) -> Self {
        Self {
            model,
            light_view_proj,
            atlas_scale_offset,
            tile_bounds,
            light_index,
            _pad0: [0; 3],
            face_index,
            _pad1: [0; 3],
        }
    }
}

/// One instanced draw of one mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowBatch {
    pub mesh: RawMeshHandle,
    /// Range into [`ShadowBatches::instances`], never longer than the instance limit.
    pub instances: Range<u32>,
}

impl ShadowBatch {
    pub fn instance_count(&self) -> u32 {
        self.instances.end - self.instances.start
    }
}

/// All draws of one frame's shadow pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShadowBatches {
    pub instances: Vec<ShadowInstanceData>,
    pub batches: Vec<ShadowBatch>,
}

impl ShadowBatches {
    pub fn batch_instances(&self, batch: &ShadowBatch) -> &[ShadowInstanceData] {
        &self.instances[batch.instances.start as usize..batch.instances.end as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Groups shadow casters by mesh into instanced draws, one instance per
/// (caster, light face) pair that touch.
#[derive(Debug)]
pub struct ShadowBatchBuilder {
    max_instances: usize,
    grouped: FastIndexMap<RawMeshHandle, Vec<ShadowInstanceData>>,
    world_spheres: Vec<BoundingSphere>,
}

impl Default for ShadowBatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowBatchBuilder {
    pub fn new() -> Self {
        Self::with_max_instances(MAX_SHADOW_INSTANCES_PER_MESH)
    }

    /// Overrides the batch length limit. Values above the block capacity are clamped.
    pub fn with_max_instances(max_instances: usize) -> Self {
        Self {
            max_instances: max_instances.clamp(1, MAX_SHADOW_INSTANCES_PER_MESH),
            grouped: FastIndexMap::default(),
            world_spheres: Vec::new(),
        }
    }

    pub fn max_instances(&self) -> usize {
        self.max_instances
    }

    /// Builds the batches for a frame returned by [`ShadowAtlas::update`] with the same lights.
    ///
    /// Also fills in [`LightShadowInfo::casters`](crate::LightShadowInfo::casters).
    pub fn build(
        &mut self,
        atlas: &ShadowAtlas,
        frame: &mut ShadowFrame,
        lights: &[ShadowLight],
        casters: &[ShadowCaster],
    ) -> ShadowBatches {
        profiling::scope!("ShadowBatchBuilder::build");

        self.grouped.clear();
        self.world_spheres.clear();
        self.world_spheres
            .extend(casters.iter().map(ShadowCaster::world_bounding_sphere));

        for info in frame.lights.iter_mut() {
            info.casters.clear();
            if !info.has_shadow() {
                continue;
            }
            let Some(light) = lights.get(info.light_index) else {
                debug_assert!(false, "light index {} out of range", info.light_index);
                continue;
            };

            let faces: ArrayVec<Option<u8>, POINT_LIGHT_FACES> = match light.kind {
                LightKind::Point => info.faces.indices().map(Some).collect(),
                LightKind::Spot | LightKind::Directional | LightKind::Projector => [None].into_iter().collect(),
            };

            for face in faces {
                let (Some(entry), Some(view_proj)) = (atlas.entry(info.light, face), light.face_view_proj(face)) else {
                    continue;
                };
                let frustum = Frustum::from_matrix(view_proj);
                let coordinate = entry.tile.coordinate();
                let scale_offset = coordinate.scale_offset(atlas.size());
                let bounds = coordinate.bounds();

                for (caster_idx, (caster, sphere)) in casters.iter().zip(&self.world_spheres).enumerate() {
                    if !frustum.contains_sphere(*sphere) {
                        continue;
                    }
                    info.casters.push(caster_idx);
                    self.grouped.entry(caster.mesh).or_default().push(ShadowInstanceData::new(
                        caster.transform,
                        view_proj,
                        scale_offset,
                        bounds,
                        info.light_index as u32,
                        entry.face_index(),
                    ));
                }
            }

            info.casters.sort_unstable();
            info.casters.dedup();
            log::trace!("Light {:?} has {} shadow casters", info.light, info.casters.len());
        }

        let mut output = ShadowBatches::default();
        for (mesh, instances) in self.grouped.drain(..) {
            for chunk in instances.chunks(self.max_instances) {
                let start = output.instances.len() as u32;
                output.instances.extend_from_slice(chunk);
                output.batches.push(ShadowBatch {
                    mesh,
                    instances: start..output.instances.len() as u32,
                });
            }
        }

        log::trace!(
            "Built {} shadow batches from {} instances",
            output.batches.len(),
            output.instances.len()
        );
        output
    }
}
