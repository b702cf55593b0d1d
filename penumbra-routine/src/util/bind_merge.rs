use std::num::NonZeroU64;

use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor, BindGroupLayoutEntry,
    BindingResource, BindingType, Buffer, BufferBinding, Device, ShaderStages,
};

/// Builds a bind group layout, numbering bindings in append order.
#[derive(Debug, Default)]
pub struct BindGroupLayoutBuilder {
    bgl_entries: Vec<BindGroupLayoutEntry>,
}

impl BindGroupLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, visibility: ShaderStages, ty: BindingType) -> &mut Self {
        let binding = self.bgl_entries.len() as u32;
        self.bgl_entries.push(BindGroupLayoutEntry {
            binding,
            visibility,
            ty,
            count: None,
        });
        self
    }

    pub fn build(&self, device: &Device, label: Option<&str>) -> BindGroupLayout {
        device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label,
            entries: &self.bgl_entries,
        })
    }
}

/// Builds a bind group, numbering bindings in append order.
pub struct BindGroupBuilder<'a> {
    label: Option<&'a str>,
    bg_entries: Vec<BindGroupEntry<'a>>,
}

impl<'a> BindGroupBuilder<'a> {
    pub fn new(label: Option<&'a str>) -> Self {
        Self {
            label,
            bg_entries: Vec::with_capacity(4),
        }
    }

    pub fn append(&mut self, resource: BindingResource<'a>) -> &mut Self {
        let binding = self.bg_entries.len() as u32;
        self.bg_entries.push(BindGroupEntry { binding, resource });
        self
    }

    /// Binds a window of `size` bytes at the start of the buffer, for use with dynamic offsets.
    pub fn append_buffer_with_size(&mut self, buffer: &'a Buffer, size: u64) -> &mut Self {
        self.append(BindingResource::Buffer(BufferBinding {
            buffer,
            offset: 0,
            size: NonZeroU64::new(size),
        }))
    }

    pub fn build(&self, device: &Device, bgl: &BindGroupLayout) -> BindGroup {
        device.create_bind_group(&BindGroupDescriptor {
            label: self.label,
            layout: bgl,
            entries: &self.bg_entries,
        })
    }
}
