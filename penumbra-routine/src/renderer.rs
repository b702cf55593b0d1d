use std::{borrow::Cow, mem, num::NonZeroU64};

use penumbra::{
    quadtree::ShadowCoordinate,
    types::{RawLightHandle, RawMeshHandle, ShadowCaster, ShadowLight},
    ShadowAtlas, ShadowAtlasOptions, ShadowBatchBuilder, ShadowBatches, ShadowFrame, ViewCamera,
};
use rust_embed::RustEmbed;
use wgpu::{
    BindGroup, BindingType, Buffer, BufferBindingType, BufferDescriptor, BufferUsages, CommandEncoder,
    CompareFunction, DepthBiasState, DepthStencilState, Device, Extent3d, Face, FragmentState, FrontFace,
    IndexFormat, LoadOp, MultisampleState, Operations, PipelineLayoutDescriptor, PolygonMode, PrimitiveState,
    PrimitiveTopology, Queue, RenderPassDepthStencilAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, ShaderModuleDescriptor, ShaderSource, ShaderStages, StencilState, StoreOp, Texture,
    TextureDescriptor, TextureDimension, TextureFormat, TextureUsages, TextureView, TextureViewDescriptor,
    VertexAttribute, VertexBufferLayout, VertexState, VertexStepMode,
};

use crate::{
    util::{
        bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder},
        error_scope::ValidationErrorScope,
    },
    AtlasInitError, InstanceBufferLayout,
};

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/shaders"]
struct PenumbraShaderSources;

pub const SHADOW_ATLAS_SHADER: &str = "shadow_atlas.wgsl";
pub const ATLAS_FORMAT: TextureFormat = TextureFormat::Depth32Float;

const POSITION_ATTRIBUTES: [VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];

/// Reads one of the embedded shaders.
pub fn shader_source(name: &'static str) -> Result<String, AtlasInitError> {
    let file = PenumbraShaderSources::get(name).ok_or(AtlasInitError::MissingShader(name))?;
    String::from_utf8(file.data.into_owned()).map_err(|source| AtlasInitError::ShaderEncoding { name, source })
}

/// GPU buffers of one mesh as the shadow pass needs them.
#[derive(Debug, Clone, Copy)]
pub struct ShadowMesh<'a> {
    /// Tightly packed `Float32x3` positions.
    pub vertex_buffer: &'a Buffer,
    /// `u32` indices.
    pub index_buffer: &'a Buffer,
    pub index_count: u32,
}

/// Resolves the meshes named by shadow batches.
pub trait ShadowMeshSource {
    fn shadow_mesh(&self, mesh: RawMeshHandle) -> Option<ShadowMesh<'_>>;
}

/// Owns the shadow atlas texture and draws a frame's shadow batches into it.
pub struct AtlasRenderer {
    atlas: ShadowAtlas,
    builder: ShadowBatchBuilder,
    layout: InstanceBufferLayout,

    _texture: Texture,
    view: TextureView,
    instance_buffer: Buffer,
    bind_group: BindGroup,
    pipeline: RenderPipeline,

    frame: Option<ShadowFrame>,
    batches: ShadowBatches,
    staging: Vec<u8>,
}

impl AtlasRenderer {
    pub fn new(device: &Device, options: ShadowAtlasOptions) -> Result<Self, AtlasInitError> {
        profiling::scope!("AtlasRenderer::new");

        let atlas = ShadowAtlas::new(options)?;
        let layout = InstanceBufferLayout::new(&device.limits(), atlas.options())?;
        let source = shader_source(SHADOW_ATLAS_SHADER)?;

        let scope = ValidationErrorScope::new(device);

        let texture = device.create_texture(&TextureDescriptor {
            label: Some("shadow atlas"),
            size: Extent3d {
                width: atlas.size(),
                height: atlas.size(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: ATLAS_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());

        let instance_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("shadow atlas instances"),
            size: layout.buffer_size(),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bgl = BindGroupLayoutBuilder::new()
            .append(
                ShaderStages::VERTEX_FRAGMENT,
                BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(layout.binding_size),
                },
            )
            .build(device, Some("shadow atlas bgl"));
        let bind_group = BindGroupBuilder::new(Some("shadow atlas bg"))
            .append_buffer_with_size(&instance_buffer, layout.binding_size)
            .build(device, &bgl);

        let module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(SHADOW_ATLAS_SHADER),
            source: ShaderSource::Wgsl(Cow::Owned(source)),
        });
        let pll = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("shadow atlas pll"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        let pipeline = create_atlas_pipeline(device, &pll, &module);

        scope.end().map_err(AtlasInitError::RenderTarget)?;

        log::debug!(
            "Created {0}x{0} shadow atlas with {1} instance slots of {2} bytes",
            atlas.size(),
            layout.slots,
            layout.slot_stride
        );

        Ok(Self {
            atlas,
            builder: ShadowBatchBuilder::new(),
            layout,
            _texture: texture,
            view,
            instance_buffer,
            bind_group,
            pipeline,
            frame: None,
            batches: ShadowBatches::default(),
            staging: Vec::new(),
        })
    }

    pub fn atlas(&self) -> &ShadowAtlas {
        &self.atlas
    }

    pub fn layout(&self) -> &InstanceBufferLayout {
        &self.layout
    }

    pub fn atlas_texture(&self) -> &TextureView {
        &self.view
    }

    pub fn atlas_entry(&self, light: RawLightHandle, face: Option<u8>) -> Option<ShadowCoordinate> {
        self.atlas.atlas_entry(light, face)
    }

    /// Forces the next update to rebuild the atlas.
    pub fn mark_dirty(&mut self) {
        self.atlas.mark_dirty();
    }

    /// Result of the last [`AtlasRenderer::update`].
    pub fn frame(&self) -> Option<&ShadowFrame> {
        self.frame.as_ref()
    }

    pub fn batches(&self) -> &ShadowBatches {
        &self.batches
    }

    /// Runs visibility, allocation and batching for this frame.
    pub fn update(&mut self, camera: &ViewCamera, lights: &[ShadowLight], casters: &[ShadowCaster]) -> &ShadowFrame {
        profiling::scope!("AtlasRenderer::update");

        let mut frame = self.atlas.update(camera, lights);
        self.batches = self.builder.build(&self.atlas, &mut frame, lights, casters);
        self.frame.insert(frame)
    }

    /// Uploads the instance data and records the shadow pass.
    pub fn render(&mut self, queue: &Queue, encoder: &mut CommandEncoder, meshes: &impl ShadowMeshSource) {
        profiling::scope!("AtlasRenderer::render");

        let batches = &self.batches.batches;
        let drawn = batches.len().min(self.layout.slots as usize);
        if drawn < batches.len() {
            log::warn!(
                "Skipping {} of {} shadow batches, the instance buffer only has {} slots",
                batches.len() - drawn,
                batches.len(),
                self.layout.slots
            );
        }

        self.staging.clear();
        self.staging.resize(self.layout.slot_stride as usize * drawn, 0);
        for (slot, batch) in batches[..drawn].iter().enumerate() {
            let bytes: &[u8] = bytemuck::cast_slice(self.batches.batch_instances(batch));
            let start = self.layout.offset(slot as u32) as usize;
            self.staging[start..start + bytes.len()].copy_from_slice(bytes);
        }
        if !self.staging.is_empty() {
            queue.write_buffer(&self.instance_buffer, 0, &self.staging);
        }

        let mut rpass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("shadow atlas"),
            color_attachments: &[],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: &self.view,
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(1.0),
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let size = self.atlas.size() as f32;
        rpass.set_viewport(0.0, 0.0, size, size, 0.0, 1.0);
        rpass.set_pipeline(&self.pipeline);

        for (slot, batch) in batches[..drawn].iter().enumerate() {
            let Some(mesh) = meshes.shadow_mesh(batch.mesh) else {
                log::trace!("Mesh {:?} has no shadow buffers, skipping its batch", batch.mesh);
                continue;
            };

            rpass.set_bind_group(0, &self.bind_group, &[self.layout.offset(slot as u32) as u32]);
            rpass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            rpass.set_index_buffer(mesh.index_buffer.slice(..), IndexFormat::Uint32);
            rpass.draw_indexed(0..mesh.index_count, 0, 0..batch.instance_count());
        }
    }
}

fn create_atlas_pipeline(
    device: &Device,
    pll: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
) -> RenderPipeline {
    profiling::scope!("build shadow atlas pipeline");
    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("shadow atlas"),
        layout: Some(pll),
        vertex: VertexState {
            module,
            entry_point: "vs_main",
            buffers: &[VertexBufferLayout {
                array_stride: mem::size_of::<[f32; 3]>() as u64,
                step_mode: VertexStepMode::Vertex,
                attributes: &POSITION_ATTRIBUTES,
            }],
        },
        primitive: PrimitiveState {
            topology: PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: FrontFace::Ccw,
            cull_mode: Some(Face::Front),
            unclipped_depth: false,
            polygon_mode: PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: Some(DepthStencilState {
            format: ATLAS_FORMAT,
            depth_write_enabled: true,
            depth_compare: CompareFunction::LessEqual,
            stencil: StencilState::default(),
            bias: DepthBiasState {
                constant: 2,
                slope_scale: 2.0,
                clamp: 0.0,
            },
        }),
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            module,
            entry_point: "fs_main",
            targets: &[],
        }),
        multiview: None,
    })
}
