/*! A GLES-on-Direct3D11 translation core.
 *
 * The modules here sit between the GL frontend and the native device:
 * buffers multiplex one logical allocation across the usage classes the
 * device forces apart, images shuttle texel data between staging memory
 * and texture storages, and the state manager diffs GL pipeline state
 * down to the minimal set of device calls.
 *
 * The device itself is reached through the [`Api`] trait family, so the
 * whole core can run against the in-memory [`null`] backend in tests.
 */

pub mod buffer;
pub mod conv;
pub mod image;
pub mod input_layout;
pub mod null;
pub mod pixel_transfer;
pub mod render_states;
pub mod state;
pub mod types;

use crate::types::{
    BindFlags, BlendDesc, Box3, CpuAccess, DepthStencilDesc, DxgiFormat, Extent, Format, MapMode,
    NativeUsage, Origin, RasterizerDesc, Rect, SamplerDesc, ShaderElementType, ShaderStage,
    Topology, Viewport,
};

use std::{
    cell::Cell,
    fmt,
    num::NonZeroU64,
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
};

pub const MAX_VERTEX_ATTRIBS: usize = 16;
pub const MAX_DRAW_BUFFERS: usize = 8;
pub const MAX_UNIFORM_BUFFER_SLOTS: usize = 12;
pub const MAX_TEXTURE_SLOTS: usize = 16;
pub const MAX_SAMPLER_SLOTS: usize = 16;
pub const MAX_TRANSFORM_FEEDBACK_BUFFERS: usize = 4;

static SERIAL: AtomicU64 = AtomicU64::new(1);

/// Monotonic id used to diff resources without holding references.
pub fn next_serial() -> NonZeroU64 {
    // Relaxed suffices, serials only need uniqueness.
    let id = SERIAL.fetch_add(1, Ordering::Relaxed);
    NonZeroU64::new(id).unwrap_or_else(|| unreachable!())
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device is lost")]
    Lost,
}

/// Why the device reported removal, mirroring the DXGI reason codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalReason {
    Hung,
    Removed,
    Reset,
    InternalError,
    InvalidCall,
}

pub trait Resource: Clone + PartialEq + fmt::Debug + 'static {}
impl<T: Clone + PartialEq + fmt::Debug + 'static> Resource for T {}

/// Families of native handle types behind a single device flavor.
///
/// Selected at compile time; everything in this crate is generic over
/// one implementation rather than dispatching dynamically.
pub trait Api: Clone + Sized + 'static {
    type Adapter: Adapter<Self>;
    type Device: Device<Self>;
    type Context: Context<Self>;

    type Buffer: Resource;
    type Texture: Resource;
    type ShaderResourceView: Resource;
    type RenderTargetView: Resource;
    type DepthStencilView: Resource;
    type InputLayout: Resource;
    type VertexShader: Resource;
    type GeometryShader: Resource;
    type PixelShader: Resource;
    type BlendState: Resource;
    type RasterizerState: Resource;
    type DepthStencilState: Resource;
    type SamplerState: Resource;
    type Query: Resource;
}

pub struct OpenDevice<A: Api> {
    pub device: A::Device,
    pub context: A::Context,
}

pub trait Adapter<A: Api> {
    fn open(&self) -> Result<OpenDevice<A>, DeviceError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub size: u64,
    pub usage: NativeUsage,
    pub bind: BindFlags,
    pub cpu_access: CpuAccess,
    pub structure_stride: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureDimension {
    D2,
    D3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub extent: Extent,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: u32,
    pub format: DxgiFormat,
    pub dimension: TextureDimension,
    pub usage: NativeUsage,
    pub bind: BindFlags,
    pub cpu_access: CpuAccess,
}

/// A typed view of a buffer for shader access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferViewDescriptor {
    pub format: DxgiFormat,
    pub first_element: u32,
    pub element_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureViewDescriptor {
    pub format: DxgiFormat,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

pub trait Device<A: Api> {
    fn create_buffer(
        &self,
        desc: &BufferDescriptor,
        init: Option<&[u8]>,
    ) -> Result<A::Buffer, DeviceError>;
    fn create_texture(&self, desc: &TextureDescriptor) -> Result<A::Texture, DeviceError>;
    fn create_buffer_view(
        &self,
        buffer: &A::Buffer,
        desc: &BufferViewDescriptor,
    ) -> Result<A::ShaderResourceView, DeviceError>;
    fn create_texture_view(
        &self,
        texture: &A::Texture,
        desc: &TextureViewDescriptor,
    ) -> Result<A::ShaderResourceView, DeviceError>;
    fn create_render_target_view(
        &self,
        texture: &A::Texture,
        format: DxgiFormat,
        mip: u32,
        layer: u32,
    ) -> Result<A::RenderTargetView, DeviceError>;
    fn create_depth_stencil_view(
        &self,
        texture: &A::Texture,
        format: DxgiFormat,
        mip: u32,
        layer: u32,
    ) -> Result<A::DepthStencilView, DeviceError>;

    fn create_input_layout(
        &self,
        elements: &[InputElement],
        vertex_signature: &[u8],
    ) -> Result<A::InputLayout, DeviceError>;

    fn create_vertex_shader(&self, bytecode: &[u8]) -> Result<A::VertexShader, DeviceError>;
    fn create_geometry_shader(&self, bytecode: &[u8]) -> Result<A::GeometryShader, DeviceError>;
    fn create_pixel_shader(&self, bytecode: &[u8]) -> Result<A::PixelShader, DeviceError>;

    fn create_blend_state(
        &self,
        desc: &BlendDesc,
        rt_masks: &[types::ColorMask],
    ) -> Result<A::BlendState, DeviceError>;
    fn create_rasterizer_state(
        &self,
        desc: &RasterizerDesc,
        scissor_enabled: bool,
    ) -> Result<A::RasterizerState, DeviceError>;
    fn create_depth_stencil_state(
        &self,
        desc: &DepthStencilDesc,
    ) -> Result<A::DepthStencilState, DeviceError>;
    fn create_sampler_state(&self, desc: &SamplerDesc) -> Result<A::SamplerState, DeviceError>;

    fn create_event_query(&self) -> Result<A::Query, DeviceError>;

    /// `Some` once the device has been removed.
    fn removal_reason(&self) -> Option<RemovalReason>;
}

#[derive(Clone, Copy, Debug)]
pub struct MappedSubresource {
    pub data: NonNull<u8>,
    pub row_pitch: u32,
    pub depth_pitch: u32,
}

/// One element of an input layout as handed to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InputElement {
    pub semantic_index: u32,
    pub format: DxgiFormat,
    pub input_slot: u32,
    pub per_instance: bool,
    pub instance_step_rate: u32,
}

pub trait Context<A: Api> {
    /// Valid until the matching unmap; the caller keeps the pointer
    /// inside the allocation.
    unsafe fn map_buffer(
        &self,
        buffer: &A::Buffer,
        mode: MapMode,
    ) -> Result<NonNull<u8>, DeviceError>;
    fn unmap_buffer(&self, buffer: &A::Buffer);
    unsafe fn map_texture(
        &self,
        texture: &A::Texture,
        subresource: u32,
        mode: MapMode,
    ) -> Result<MappedSubresource, DeviceError>;
    fn unmap_texture(&self, texture: &A::Texture, subresource: u32);

    fn update_buffer(&self, buffer: &A::Buffer, offset: u64, data: &[u8]);
    fn copy_buffer(
        &self,
        dst: &A::Buffer,
        dst_offset: u64,
        src: &A::Buffer,
        src_offset: u64,
        size: u64,
    );
    fn copy_texture_region(
        &self,
        dst: &A::Texture,
        dst_subresource: u32,
        dst_origin: Origin,
        src: &A::Texture,
        src_subresource: u32,
        src_box: Box3,
    );
    fn resolve_texture(
        &self,
        dst: &A::Texture,
        dst_subresource: u32,
        src: &A::Texture,
        src_subresource: u32,
        format: DxgiFormat,
    );

    fn set_input_layout(&self, layout: Option<&A::InputLayout>);
    fn set_vertex_buffers(
        &self,
        first_slot: u32,
        buffers: &[Option<A::Buffer>],
        strides: &[u32],
        offsets: &[u32],
    );
    fn set_index_buffer(&self, buffer: Option<&A::Buffer>, format: DxgiFormat, offset: u32);
    fn set_primitive_topology(&self, topology: Topology);

    fn set_vertex_shader(&self, shader: Option<&A::VertexShader>);
    fn set_geometry_shader(&self, shader: Option<&A::GeometryShader>);
    fn set_pixel_shader(&self, shader: Option<&A::PixelShader>);

    fn set_shader_resources(
        &self,
        stage: ShaderStage,
        first_slot: u32,
        views: &[Option<A::ShaderResourceView>],
    );
    fn set_samplers(
        &self,
        stage: ShaderStage,
        first_slot: u32,
        samplers: &[Option<A::SamplerState>],
    );
    fn set_constant_buffers(
        &self,
        stage: ShaderStage,
        first_slot: u32,
        buffers: &[Option<A::Buffer>],
    );
    fn set_stream_out_targets(&self, buffers: &[Option<A::Buffer>], offsets: &[u32]);

    fn set_render_targets(
        &self,
        colors: &[Option<A::RenderTargetView>],
        depth_stencil: Option<&A::DepthStencilView>,
    );
    fn set_blend_state(
        &self,
        state: Option<&A::BlendState>,
        blend_color: [f32; 4],
        sample_mask: u32,
    );
    fn set_depth_stencil_state(&self, state: Option<&A::DepthStencilState>, stencil_ref: u32);
    fn set_rasterizer_state(&self, state: Option<&A::RasterizerState>);
    fn set_viewport(&self, viewport: &Viewport);
    fn set_scissor(&self, rect: &Rect);

    fn draw(&self, vertex_count: u32, first_vertex: u32);
    fn draw_instanced(&self, vertex_count: u32, instance_count: u32, first_vertex: u32);
    fn draw_indexed(&self, index_count: u32, first_index: u32, base_vertex: i32);
    fn draw_indexed_instanced(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
    );

    fn end_query(&self, query: &A::Query);
    /// `Ok(true)` once the GPU has passed the query's end point.
    fn poll_query(&self, query: &A::Query) -> Result<bool, DeviceError>;
    fn flush(&self);
    fn clear_state(&self);
}

/// The open device plus the loss bookkeeping every module shares.
pub struct Gpu<A: Api> {
    pub device: A::Device,
    pub context: A::Context,
    lost: Cell<bool>,
    loss_notified: Cell<bool>,
    loss_sink: Option<Arc<dyn Fn()>>,
}

impl<A: Api> Gpu<A> {
    pub fn new(device: A::Device, context: A::Context) -> Self {
        Self {
            device,
            context,
            lost: Cell::new(false),
            loss_notified: Cell::new(false),
            loss_sink: None,
        }
    }

    pub fn with_loss_sink(
        device: A::Device,
        context: A::Context,
        sink: Arc<dyn Fn()>,
    ) -> Self {
        Self {
            loss_sink: Some(sink),
            ..Self::new(device, context)
        }
    }

    /// The sink survives a device reset; the new device inherits it.
    pub fn loss_sink(&self) -> Option<Arc<dyn Fn()>> {
        self.loss_sink.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.get()
    }

    pub fn mark_lost(&self) {
        self.lost.set(true);
    }

    /// Tells the frontend about a loss, at most once per device.
    pub fn notify_loss(&self) {
        if !self.loss_notified.replace(true) {
            if let Some(sink) = &self.loss_sink {
                sink();
            }
        }
    }
}

/// A renderable surface: the texture, its views, and the identity
/// the state manager diffs against.
pub struct RenderTarget<A: Api> {
    pub serial: NonZeroU64,
    pub texture: A::Texture,
    pub rtv: Option<A::RenderTargetView>,
    pub dsv: Option<A::DepthStencilView>,
    pub subresource: u32,
    pub format: Format,
    pub dxgi_format: DxgiFormat,
    pub extent: Extent,
    pub samples: u32,
}

impl<A: Api> RenderTarget<A> {
    pub fn new_color(
        texture: A::Texture,
        rtv: A::RenderTargetView,
        format: Format,
        extent: Extent,
        samples: u32,
    ) -> Self {
        Self {
            serial: next_serial(),
            texture,
            rtv: Some(rtv),
            dsv: None,
            subresource: 0,
            format,
            dxgi_format: types::format_info(format).rtv_format,
            extent,
            samples,
        }
    }

    pub fn new_depth_stencil(
        texture: A::Texture,
        dsv: A::DepthStencilView,
        format: Format,
        extent: Extent,
        samples: u32,
    ) -> Self {
        Self {
            serial: next_serial(),
            texture,
            rtv: None,
            dsv: Some(dsv),
            subresource: 0,
            format,
            dxgi_format: types::format_info(format).dsv_format,
            extent,
            samples,
        }
    }
}

/// The compiled shaders and vertex interface of a linked program, as
/// the draw path consumes them.
pub struct ProgramExecutables<A: Api> {
    pub vertex_shader: A::VertexShader,
    pub pixel_shader: A::PixelShader,
    pub geometry_shader: Option<A::GeometryShader>,
    /// Variant emitting point sprites, applied when rasterizing points.
    pub point_geometry_shader: Option<A::GeometryShader>,
    pub stream_out_shader: Option<A::GeometryShader>,
    pub vertex_signature: Vec<u8>,
    /// Maps attribute index to HLSL semantic index, -1 when inactive.
    pub attribute_semantics: [i32; MAX_VERTEX_ATTRIBS],
    pub attribute_element_types: [ShaderElementType; MAX_VERTEX_ATTRIBS],
    pub serial: NonZeroU64,
}

/// One vertex attribute after translation: the native buffer it reads
/// from and the fetch parameters.
pub struct TranslatedAttribute<A: Api> {
    pub active: bool,
    pub buffer: Option<Arc<parking_lot::Mutex<buffer::Buffer<A>>>>,
    pub format: DxgiFormat,
    pub element_type: ShaderElementType,
    pub stride: u32,
    pub offset: u32,
    pub divisor: u32,
}

impl<A: Api> Default for TranslatedAttribute<A> {
    fn default() -> Self {
        Self {
            active: false,
            buffer: None,
            format: DxgiFormat::Unknown,
            element_type: ShaderElementType::None,
            stride: 0,
            offset: 0,
            divisor: 0,
        }
    }
}
