use std::mem;

use penumbra::{ShadowAtlasOptions, ShadowInstanceData, MAX_SHADOW_INSTANCES_PER_MESH};
use wgpu::Limits;

use crate::{util::math::round_up_pot, AtlasInitError, LimitType};

/// Placement of the per-batch instance blocks inside the instance uniform buffer.
///
/// Every batch gets its own slot, bound with a dynamic offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceBufferLayout {
    /// Bytes visible to the shader through one binding.
    pub binding_size: u64,
    /// Distance between two slots, a multiple of the uniform offset alignment.
    pub slot_stride: u64,
    pub slots: u32,
}

impl InstanceBufferLayout {
    /// Checks the options against the device limits and lays out the instance buffer.
    pub fn new(limits: &Limits, options: &ShadowAtlasOptions) -> Result<Self, AtlasInitError> {
        if options.atlas_size > limits.max_texture_dimension_2d {
            return Err(AtlasInitError::LowDeviceLimit {
                ty: LimitType::MaxTextureDimension2d,
                device_limit: limits.max_texture_dimension_2d as u64,
                required_limit: options.atlas_size as u64,
            });
        }

        let binding_size = (MAX_SHADOW_INSTANCES_PER_MESH * mem::size_of::<ShadowInstanceData>()) as u64;
        if binding_size > limits.max_uniform_buffer_binding_size as u64 {
            return Err(AtlasInitError::LowDeviceLimit {
                ty: LimitType::UniformBufferBindingSize,
                device_limit: limits.max_uniform_buffer_binding_size as u64,
                required_limit: binding_size,
            });
        }

        let slot_stride = round_up_pot(binding_size, limits.min_uniform_buffer_offset_alignment.max(1) as u64);
        let layout = Self {
            binding_size,
            slot_stride,
            slots: options.max_batches_per_frame.max(1),
        };
        if layout.buffer_size() > limits.max_buffer_size {
            return Err(AtlasInitError::LowDeviceLimit {
                ty: LimitType::MaxBufferSize,
                device_limit: limits.max_buffer_size,
                required_limit: layout.buffer_size(),
            });
        }

        Ok(layout)
    }

    pub fn buffer_size(&self) -> u64 {
        self.slot_stride * self.slots as u64
    }

    /// Dynamic offset of the given slot.
    pub fn offset(&self, slot: u32) -> u64 {
        debug_assert!(slot < self.slots);
        self.slot_stride * slot as u64
    }
}
