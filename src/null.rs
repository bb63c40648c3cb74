//! Software implementation of the [`Api`] family.
//!
//! Buffers and textures hold real bytes, maps hand out pointers into
//! them, and copies move data, so everything above the device boundary
//! runs headless. The context counts its entry points and records draw
//! calls, and the device can be flagged removed, which is how the
//! loss, reset, and redundant-call behaviors get verified.

use crate::{
    types::{
        BlendDesc, Box3, ColorMask, DepthStencilDesc, DxgiFormat, MapMode, Origin, RasterizerDesc,
        SamplerDesc, ShaderStage, Topology, Viewport,
    },
    Adapter, Api, BufferDescriptor, BufferViewDescriptor, Context, Device, DeviceError, Gpu,
    InputElement, MappedSubresource, OpenDevice, RemovalReason, TextureDescriptor,
    TextureViewDescriptor, MAX_TEXTURE_SLOTS,
};

use parking_lot::Mutex;

use std::{
    fmt,
    ptr::NonNull,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
};

#[derive(Clone, Debug)]
pub struct Null;

macro_rules! handle {
    ($name:ident, $inner:ty) => {
        #[derive(Clone)]
        pub struct $name(Arc<$inner>);

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:p})"), Arc::as_ptr(&self.0))
            }
        }
    };
}

pub struct BufferInner {
    desc: BufferDescriptor,
    // Fixed-size allocation so map pointers stay valid.
    data: Mutex<Vec<u8>>,
}

pub struct TextureInner {
    desc: TextureDescriptor,
    subresources: Mutex<Vec<Vec<u8>>>,
}

impl TextureInner {
    fn mip_dims(&self, subresource: u32) -> (u32, u32, u32) {
        let mip = subresource % self.desc.mip_levels;
        (
            (self.desc.extent.width >> mip).max(1),
            (self.desc.extent.height >> mip).max(1),
            (self.desc.extent.depth >> mip).max(1),
        )
    }

    fn pitches(&self, subresource: u32) -> (u32, u32) {
        let (w, h, _) = self.mip_dims(subresource);
        let (block_w, block_h) = self.desc.format.block_dims();
        let row_pitch = (w + block_w - 1) / block_w * self.desc.format.element_bytes();
        let depth_pitch = row_pitch * ((h + block_h - 1) / block_h);
        (row_pitch, depth_pitch)
    }
}

pub struct ViewInner {
    #[allow(dead_code)]
    format: DxgiFormat,
}

pub struct ShaderInner {
    #[allow(dead_code)]
    bytecode: Vec<u8>,
}

pub struct LayoutInner {
    #[allow(dead_code)]
    elements: Vec<InputElement>,
}

pub struct StateInner;

pub struct QueryInner {
    ended: AtomicBool,
}

handle!(NullBuffer, BufferInner);
handle!(NullTexture, TextureInner);
handle!(NullShaderResourceView, ViewInner);
handle!(NullRenderTargetView, ViewInner);
handle!(NullDepthStencilView, ViewInner);
handle!(NullInputLayout, LayoutInner);
handle!(NullVertexShader, ShaderInner);
handle!(NullGeometryShader, ShaderInner);
handle!(NullPixelShader, ShaderInner);
handle!(NullBlendState, StateInner);
handle!(NullRasterizerState, StateInner);
handle!(NullDepthStencilState, StateInner);
handle!(NullSamplerState, StateInner);
handle!(NullQuery, QueryInner);

impl Api for Null {
    type Adapter = NullAdapter;
    type Device = NullDevice;
    type Context = NullContext;

    type Buffer = NullBuffer;
    type Texture = NullTexture;
    type ShaderResourceView = NullShaderResourceView;
    type RenderTargetView = NullRenderTargetView;
    type DepthStencilView = NullDepthStencilView;
    type InputLayout = NullInputLayout;
    type VertexShader = NullVertexShader;
    type GeometryShader = NullGeometryShader;
    type PixelShader = NullPixelShader;
    type BlendState = NullBlendState;
    type RasterizerState = NullRasterizerState;
    type DepthStencilState = NullDepthStencilState;
    type SamplerState = NullSamplerState;
    type Query = NullQuery;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceCounts {
    pub buffers_created: u64,
    pub textures_created: u64,
    pub input_layouts_created: u64,
    pub blend_states_created: u64,
    pub rasterizer_states_created: u64,
    pub depth_stencil_states_created: u64,
    pub sampler_states_created: u64,
}

pub struct NullDevice {
    removed: Arc<Mutex<Option<RemovalReason>>>,
    fail_next_creation: AtomicBool,
    counts: Mutex<DeviceCounts>,
}

impl NullDevice {
    fn new(removed: Arc<Mutex<Option<RemovalReason>>>) -> Self {
        Self {
            removed,
            fail_next_creation: AtomicBool::new(false),
            counts: Mutex::new(DeviceCounts::default()),
        }
    }

    pub fn counts(&self) -> DeviceCounts {
        *self.counts.lock()
    }

    /// The next create_* call returns `OutOfMemory`.
    pub fn fail_next_creation(&self) {
        self.fail_next_creation.store(true, Ordering::SeqCst);
    }

    pub fn set_removed(&self, reason: RemovalReason) {
        *self.removed.lock() = Some(reason);
    }

    pub fn buffer_bytes(buffer: &NullBuffer) -> Vec<u8> {
        buffer.0.data.lock().clone()
    }

    pub fn texture_bytes(texture: &NullTexture, subresource: u32) -> Vec<u8> {
        texture.0.subresources.lock()[subresource as usize].clone()
    }

    fn check_creation(&self) -> Result<(), DeviceError> {
        if self.fail_next_creation.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::OutOfMemory);
        }
        Ok(())
    }
}

impl Device<Null> for NullDevice {
    fn create_buffer(
        &self,
        desc: &BufferDescriptor,
        init: Option<&[u8]>,
    ) -> Result<NullBuffer, DeviceError> {
        self.check_creation()?;
        self.counts.lock().buffers_created += 1;
        let mut data = vec![0; desc.size as usize];
        if let Some(init) = init {
            data[..init.len()].copy_from_slice(init);
        }
        Ok(NullBuffer(Arc::new(BufferInner {
            desc: *desc,
            data: Mutex::new(data),
        })))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<NullTexture, DeviceError> {
        self.check_creation()?;
        self.counts.lock().textures_created += 1;
        let inner = TextureInner {
            desc: *desc,
            subresources: Mutex::new(Vec::new()),
        };
        let count = desc.mip_levels * desc.array_layers;
        let mut subresources = Vec::with_capacity(count as usize);
        for sub in 0..count {
            let (_, _, d) = inner.mip_dims(sub);
            let (_, depth_pitch) = inner.pitches(sub);
            subresources.push(vec![0; (depth_pitch * d) as usize]);
        }
        *inner.subresources.lock() = subresources;
        Ok(NullTexture(Arc::new(inner)))
    }

    fn create_buffer_view(
        &self,
        _buffer: &NullBuffer,
        desc: &BufferViewDescriptor,
    ) -> Result<NullShaderResourceView, DeviceError> {
        self.check_creation()?;
        Ok(NullShaderResourceView(Arc::new(ViewInner {
            format: desc.format,
        })))
    }

    fn create_texture_view(
        &self,
        _texture: &NullTexture,
        desc: &TextureViewDescriptor,
    ) -> Result<NullShaderResourceView, DeviceError> {
        self.check_creation()?;
        Ok(NullShaderResourceView(Arc::new(ViewInner {
            format: desc.format,
        })))
    }

    fn create_render_target_view(
        &self,
        _texture: &NullTexture,
        format: DxgiFormat,
        _mip: u32,
        _layer: u32,
    ) -> Result<NullRenderTargetView, DeviceError> {
        self.check_creation()?;
        Ok(NullRenderTargetView(Arc::new(ViewInner { format })))
    }

    fn create_depth_stencil_view(
        &self,
        _texture: &NullTexture,
        format: DxgiFormat,
        _mip: u32,
        _layer: u32,
    ) -> Result<NullDepthStencilView, DeviceError> {
        self.check_creation()?;
        Ok(NullDepthStencilView(Arc::new(ViewInner { format })))
    }

    fn create_input_layout(
        &self,
        elements: &[InputElement],
        _vertex_signature: &[u8],
    ) -> Result<NullInputLayout, DeviceError> {
        self.check_creation()?;
        self.counts.lock().input_layouts_created += 1;
        Ok(NullInputLayout(Arc::new(LayoutInner {
            elements: elements.to_vec(),
        })))
    }

    fn create_vertex_shader(&self, bytecode: &[u8]) -> Result<NullVertexShader, DeviceError> {
        self.check_creation()?;
        Ok(NullVertexShader(Arc::new(ShaderInner {
            bytecode: bytecode.to_vec(),
        })))
    }

    fn create_geometry_shader(&self, bytecode: &[u8]) -> Result<NullGeometryShader, DeviceError> {
        self.check_creation()?;
        Ok(NullGeometryShader(Arc::new(ShaderInner {
            bytecode: bytecode.to_vec(),
        })))
    }

    fn create_pixel_shader(&self, bytecode: &[u8]) -> Result<NullPixelShader, DeviceError> {
        self.check_creation()?;
        Ok(NullPixelShader(Arc::new(ShaderInner {
            bytecode: bytecode.to_vec(),
        })))
    }

    fn create_blend_state(
        &self,
        _desc: &BlendDesc,
        _rt_masks: &[ColorMask],
    ) -> Result<NullBlendState, DeviceError> {
        self.check_creation()?;
        self.counts.lock().blend_states_created += 1;
        Ok(NullBlendState(Arc::new(StateInner)))
    }

    fn create_rasterizer_state(
        &self,
        _desc: &RasterizerDesc,
        _scissor_enabled: bool,
    ) -> Result<NullRasterizerState, DeviceError> {
        self.check_creation()?;
        self.counts.lock().rasterizer_states_created += 1;
        Ok(NullRasterizerState(Arc::new(StateInner)))
    }

    fn create_depth_stencil_state(
        &self,
        _desc: &DepthStencilDesc,
    ) -> Result<NullDepthStencilState, DeviceError> {
        self.check_creation()?;
        self.counts.lock().depth_stencil_states_created += 1;
        Ok(NullDepthStencilState(Arc::new(StateInner)))
    }

    fn create_sampler_state(&self, _desc: &SamplerDesc) -> Result<NullSamplerState, DeviceError> {
        self.check_creation()?;
        self.counts.lock().sampler_states_created += 1;
        Ok(NullSamplerState(Arc::new(StateInner)))
    }

    fn create_event_query(&self) -> Result<NullQuery, DeviceError> {
        self.check_creation()?;
        Ok(NullQuery(Arc::new(QueryInner {
            ended: AtomicBool::new(false),
        })))
    }

    fn removal_reason(&self) -> Option<RemovalReason> {
        *self.removed.lock()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ContextCounts {
    pub map_buffer: u64,
    pub update_buffer: u64,
    pub copy_buffer: u64,
    pub copy_texture_region: u64,
    pub set_input_layout: u64,
    pub set_vertex_buffers: u64,
    pub last_vertex_buffer_range: (u32, u32),
    pub set_index_buffer: u64,
    pub set_primitive_topology: u64,
    pub set_vertex_shader: u64,
    pub set_geometry_shader: u64,
    pub set_pixel_shader: u64,
    pub set_shader_resources: u64,
    pub set_samplers: u64,
    pub set_constant_buffers: u64,
    pub set_stream_out_targets: u64,
    pub set_render_targets: u64,
    pub set_blend_state: u64,
    pub set_depth_stencil_state: u64,
    pub set_rasterizer_state: u64,
    pub set_viewport: u64,
    pub set_scissor: u64,
    pub flush: u64,
    pub clear_state: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCall {
    pub indexed: bool,
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first: u32,
    pub base_vertex: i32,
    pub topology: Topology,
}

pub struct NullContext {
    removed: Arc<Mutex<Option<RemovalReason>>>,
    counts: Mutex<ContextCounts>,
    draws: Mutex<Vec<DrawCall>>,
    topology: Mutex<Topology>,
    index_buffer: Mutex<Option<(NullBuffer, DxgiFormat, u32)>>,
    srvs: Mutex<[[Option<NullShaderResourceView>; MAX_TEXTURE_SLOTS]; 3]>,
    constant_buffers: Mutex<[[Option<NullBuffer>; 16]; 3]>,
}

fn stage_index(stage: ShaderStage) -> usize {
    match stage {
        ShaderStage::Vertex => 0,
        ShaderStage::Geometry => 1,
        ShaderStage::Pixel => 2,
    }
}

impl NullContext {
    fn new(removed: Arc<Mutex<Option<RemovalReason>>>) -> Self {
        Self {
            removed,
            counts: Mutex::new(ContextCounts::default()),
            draws: Mutex::new(Vec::new()),
            topology: Mutex::new(Topology::Undefined),
            index_buffer: Mutex::new(None),
            srvs: Mutex::new(Default::default()),
            constant_buffers: Mutex::new(Default::default()),
        }
    }

    pub fn counts(&self) -> ContextCounts {
        *self.counts.lock()
    }

    pub fn draws(&self) -> Vec<DrawCall> {
        self.draws.lock().clone()
    }

    pub fn bound_index_buffer(&self) -> Option<(NullBuffer, DxgiFormat, u32)> {
        self.index_buffer.lock().clone()
    }

    pub fn bound_constant_buffer(&self, stage: ShaderStage, slot: usize) -> Option<NullBuffer> {
        self.constant_buffers.lock()[stage_index(stage)][slot].clone()
    }

    pub fn bound_shader_resource(
        &self,
        stage: ShaderStage,
        slot: usize,
    ) -> Option<NullShaderResourceView> {
        self.srvs.lock()[stage_index(stage)][slot].clone()
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.removed.lock().is_some() {
            return Err(DeviceError::Lost);
        }
        Ok(())
    }

    fn record_draw(&self, draw: DrawCall) {
        self.draws.lock().push(draw);
    }
}

impl Context<Null> for NullContext {
    unsafe fn map_buffer(
        &self,
        buffer: &NullBuffer,
        _mode: MapMode,
    ) -> Result<NonNull<u8>, DeviceError> {
        self.check_lost()?;
        self.counts.lock().map_buffer += 1;
        let ptr = buffer.0.data.lock().as_mut_ptr();
        Ok(NonNull::new(ptr).unwrap_or_else(|| unreachable!()))
    }

    fn unmap_buffer(&self, _buffer: &NullBuffer) {}

    unsafe fn map_texture(
        &self,
        texture: &NullTexture,
        subresource: u32,
        _mode: MapMode,
    ) -> Result<MappedSubresource, DeviceError> {
        self.check_lost()?;
        let (row_pitch, depth_pitch) = texture.0.pitches(subresource);
        let ptr = texture.0.subresources.lock()[subresource as usize].as_mut_ptr();
        Ok(MappedSubresource {
            data: NonNull::new(ptr).unwrap_or_else(|| unreachable!()),
            row_pitch,
            depth_pitch,
        })
    }

    fn unmap_texture(&self, _texture: &NullTexture, _subresource: u32) {}

    fn update_buffer(&self, buffer: &NullBuffer, offset: u64, data: &[u8]) {
        self.counts.lock().update_buffer += 1;
        let mut bytes = buffer.0.data.lock();
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
    }

    fn copy_buffer(
        &self,
        dst: &NullBuffer,
        dst_offset: u64,
        src: &NullBuffer,
        src_offset: u64,
        size: u64,
    ) {
        self.counts.lock().copy_buffer += 1;
        let src_bytes = src.0.data.lock();
        let mut dst_bytes = dst.0.data.lock();
        let (s, d, n) = (src_offset as usize, dst_offset as usize, size as usize);
        dst_bytes[d..d + n].copy_from_slice(&src_bytes[s..s + n]);
    }

    fn copy_texture_region(
        &self,
        dst: &NullTexture,
        dst_subresource: u32,
        dst_origin: Origin,
        src: &NullTexture,
        src_subresource: u32,
        src_box: Box3,
    ) {
        self.counts.lock().copy_texture_region += 1;
        let (src_row, src_depth) = src.0.pitches(src_subresource);
        let (dst_row, dst_depth) = dst.0.pitches(dst_subresource);
        let bpp = src.0.desc.format.element_bytes() as usize;
        let (block_w, block_h) = src.0.desc.format.block_dims();
        let row_bytes = ((src_box.width + block_w - 1) / block_w) as usize * bpp;
        let rows = ((src_box.height + block_h - 1) / block_h) as usize;

        let src_subs = src.0.subresources.lock();
        let mut dst_subs = dst.0.subresources.lock();
        let src_bytes = &src_subs[src_subresource as usize];
        let dst_bytes = &mut dst_subs[dst_subresource as usize];
        for z in 0..src_box.depth.max(1) as usize {
            for y in 0..rows {
                let s = (src_box.z as usize + z) * src_depth as usize
                    + ((src_box.y / block_h) as usize + y) * src_row as usize
                    + (src_box.x / block_w) as usize * bpp;
                let d = (dst_origin.z as usize + z) * dst_depth as usize
                    + ((dst_origin.y / block_h) as usize + y) * dst_row as usize
                    + (dst_origin.x / block_w) as usize * bpp;
                dst_bytes[d..d + row_bytes].copy_from_slice(&src_bytes[s..s + row_bytes]);
            }
        }
    }

    fn resolve_texture(
        &self,
        dst: &NullTexture,
        dst_subresource: u32,
        src: &NullTexture,
        src_subresource: u32,
        _format: DxgiFormat,
    ) {
        // One sample stored per texel, so a resolve is a plain copy.
        let src_subs = src.0.subresources.lock();
        let mut dst_subs = dst.0.subresources.lock();
        let src_bytes = &src_subs[src_subresource as usize];
        let dst_bytes = &mut dst_subs[dst_subresource as usize];
        let n = src_bytes.len().min(dst_bytes.len());
        dst_bytes[..n].copy_from_slice(&src_bytes[..n]);
    }

    fn set_input_layout(&self, _layout: Option<&NullInputLayout>) {
        self.counts.lock().set_input_layout += 1;
    }

    fn set_vertex_buffers(
        &self,
        first_slot: u32,
        buffers: &[Option<NullBuffer>],
        _strides: &[u32],
        _offsets: &[u32],
    ) {
        let mut counts = self.counts.lock();
        counts.set_vertex_buffers += 1;
        counts.last_vertex_buffer_range = (first_slot, buffers.len() as u32);
    }

    fn set_index_buffer(&self, buffer: Option<&NullBuffer>, format: DxgiFormat, offset: u32) {
        self.counts.lock().set_index_buffer += 1;
        *self.index_buffer.lock() = buffer.map(|b| (b.clone(), format, offset));
    }

    fn set_primitive_topology(&self, topology: Topology) {
        self.counts.lock().set_primitive_topology += 1;
        *self.topology.lock() = topology;
    }

    fn set_vertex_shader(&self, _shader: Option<&NullVertexShader>) {
        self.counts.lock().set_vertex_shader += 1;
    }

    fn set_geometry_shader(&self, _shader: Option<&NullGeometryShader>) {
        self.counts.lock().set_geometry_shader += 1;
    }

    fn set_pixel_shader(&self, _shader: Option<&NullPixelShader>) {
        self.counts.lock().set_pixel_shader += 1;
    }

    fn set_shader_resources(
        &self,
        stage: ShaderStage,
        first_slot: u32,
        views: &[Option<NullShaderResourceView>],
    ) {
        self.counts.lock().set_shader_resources += 1;
        let mut srvs = self.srvs.lock();
        for (i, view) in views.iter().enumerate() {
            srvs[stage_index(stage)][first_slot as usize + i] = view.clone();
        }
    }

    fn set_samplers(
        &self,
        _stage: ShaderStage,
        _first_slot: u32,
        _samplers: &[Option<NullSamplerState>],
    ) {
        self.counts.lock().set_samplers += 1;
    }

    fn set_constant_buffers(
        &self,
        stage: ShaderStage,
        first_slot: u32,
        buffers: &[Option<NullBuffer>],
    ) {
        self.counts.lock().set_constant_buffers += 1;
        let mut bound = self.constant_buffers.lock();
        for (i, buffer) in buffers.iter().enumerate() {
            bound[stage_index(stage)][first_slot as usize + i] = buffer.clone();
        }
    }

    fn set_stream_out_targets(&self, _buffers: &[Option<NullBuffer>], _offsets: &[u32]) {
        self.counts.lock().set_stream_out_targets += 1;
    }

    fn set_render_targets(
        &self,
        _colors: &[Option<NullRenderTargetView>],
        _depth_stencil: Option<&NullDepthStencilView>,
    ) {
        self.counts.lock().set_render_targets += 1;
    }

    fn set_blend_state(
        &self,
        _state: Option<&NullBlendState>,
        _blend_color: [f32; 4],
        _sample_mask: u32,
    ) {
        self.counts.lock().set_blend_state += 1;
    }

    fn set_depth_stencil_state(&self, _state: Option<&NullDepthStencilState>, _stencil_ref: u32) {
        self.counts.lock().set_depth_stencil_state += 1;
    }

    fn set_rasterizer_state(&self, _state: Option<&NullRasterizerState>) {
        self.counts.lock().set_rasterizer_state += 1;
    }

    fn set_viewport(&self, _viewport: &Viewport) {
        self.counts.lock().set_viewport += 1;
    }

    fn set_scissor(&self, _rect: &crate::types::Rect) {
        self.counts.lock().set_scissor += 1;
    }

    fn draw(&self, vertex_count: u32, first_vertex: u32) {
        self.record_draw(DrawCall {
            indexed: false,
            vertex_count,
            instance_count: 1,
            first: first_vertex,
            base_vertex: 0,
            topology: *self.topology.lock(),
        });
    }

    fn draw_instanced(&self, vertex_count: u32, instance_count: u32, first_vertex: u32) {
        self.record_draw(DrawCall {
            indexed: false,
            vertex_count,
            instance_count,
            first: first_vertex,
            base_vertex: 0,
            topology: *self.topology.lock(),
        });
    }

    fn draw_indexed(&self, index_count: u32, first_index: u32, base_vertex: i32) {
        self.record_draw(DrawCall {
            indexed: true,
            vertex_count: index_count,
            instance_count: 1,
            first: first_index,
            base_vertex,
            topology: *self.topology.lock(),
        });
    }

    fn draw_indexed_instanced(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
    ) {
        self.record_draw(DrawCall {
            indexed: true,
            vertex_count: index_count,
            instance_count,
            first: first_index,
            base_vertex,
            topology: *self.topology.lock(),
        });
    }

    fn end_query(&self, query: &NullQuery) {
        query.0.ended.store(true, Ordering::SeqCst);
    }

    fn poll_query(&self, query: &NullQuery) -> Result<bool, DeviceError> {
        self.check_lost()?;
        Ok(query.0.ended.load(Ordering::SeqCst))
    }

    fn flush(&self) {
        self.counts.lock().flush += 1;
    }

    fn clear_state(&self) {
        self.counts.lock().clear_state += 1;
    }
}

#[derive(Clone)]
pub struct NullAdapter {
    fail_next_open: Arc<AtomicBool>,
}

impl NullAdapter {
    pub fn new() -> Self {
        Self {
            fail_next_open: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The next open attempt fails, driving the fatal-reset path.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }
}

impl Default for NullAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter<Null> for NullAdapter {
    fn open(&self) -> Result<OpenDevice<Null>, DeviceError> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::Lost);
        }
        let removed = Arc::new(Mutex::new(None));
        Ok(OpenDevice {
            device: NullDevice::new(removed.clone()),
            context: NullContext::new(removed),
        })
    }
}

/// A fresh software device, ready for headless use.
pub fn gpu() -> Gpu<Null> {
    let open = NullAdapter::new()
        .open()
        .unwrap_or_else(|_| unreachable!());
    Gpu::new(open.device, open.context)
}

pub fn gpu_with_loss_sink(sink: impl Fn() + 'static) -> Gpu<Null> {
    let open = NullAdapter::new()
        .open()
        .unwrap_or_else(|_| unreachable!());
    Gpu::with_loss_sink(open.device, open.context, Arc::new(sink))
}

#[cfg(test)]
pub fn test_program(gpu: &Gpu<Null>) -> crate::ProgramExecutables<Null> {
    let mut semantics = [-1i32; crate::MAX_VERTEX_ATTRIBS];
    let mut element_types =
        [crate::types::ShaderElementType::None; crate::MAX_VERTEX_ATTRIBS];
    for i in 0..crate::MAX_VERTEX_ATTRIBS {
        semantics[i] = i as i32;
        element_types[i] = crate::types::ShaderElementType::Float;
    }
    crate::ProgramExecutables {
        vertex_shader: gpu.device.create_vertex_shader(&[0xAA]).unwrap(),
        pixel_shader: gpu.device.create_pixel_shader(&[0xBB]).unwrap(),
        geometry_shader: None,
        point_geometry_shader: None,
        stream_out_shader: None,
        vertex_signature: vec![0xCC],
        attribute_semantics: semantics,
        attribute_element_types: element_types,
        serial: crate::next_serial(),
    }
}

#[cfg(test)]
pub fn test_render_target(
    gpu: &Gpu<Null>,
    format: crate::types::Format,
    width: u32,
    height: u32,
    fill_texel: &[u8],
) -> crate::RenderTarget<Null> {
    use crate::types::{format_info, BindFlags, CpuAccess, Extent, NativeUsage};

    let info = format_info(format);
    let texture = gpu
        .device
        .create_texture(&TextureDescriptor {
            extent: Extent::new(width, height, 1),
            mip_levels: 1,
            array_layers: 1,
            samples: 1,
            format: info.tex_format,
            dimension: crate::TextureDimension::D2,
            usage: NativeUsage::Default,
            bind: BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
            cpu_access: CpuAccess::empty(),
        })
        .unwrap();
    {
        let mut subs = texture.0.subresources.lock();
        for chunk in subs[0].chunks_exact_mut(fill_texel.len()) {
            chunk.copy_from_slice(fill_texel);
        }
    }
    let rtv = gpu
        .device
        .create_render_target_view(&texture, info.rtv_format, 0, 0)
        .unwrap();
    crate::RenderTarget::new_color(texture, rtv, format, Extent::new(width, height, 1), 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Extent;

    #[test]
    fn copies_preserve_texture_bytes() {
        let gpu = gpu();
        let desc = TextureDescriptor {
            extent: Extent::new(4, 4, 1),
            mip_levels: 1,
            array_layers: 1,
            samples: 1,
            format: DxgiFormat::R8G8B8A8Unorm,
            dimension: crate::TextureDimension::D2,
            usage: crate::types::NativeUsage::Default,
            bind: crate::types::BindFlags::empty(),
            cpu_access: crate::types::CpuAccess::empty(),
        };
        let a = gpu.device.create_texture(&desc).unwrap();
        let b = gpu.device.create_texture(&desc).unwrap();
        a.0.subresources.lock()[0][0..4].copy_from_slice(&[1, 2, 3, 4]);
        gpu.context.copy_texture_region(
            &b,
            0,
            Origin::default(),
            &a,
            0,
            Box3::from_extent(Extent::new(4, 4, 1)),
        );
        assert_eq!(&NullDevice::texture_bytes(&b, 0)[0..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn removal_shows_up_in_maps_and_polls() {
        let gpu = gpu();
        let buffer = gpu
            .device
            .create_buffer(
                &BufferDescriptor {
                    size: 4,
                    usage: crate::types::NativeUsage::Staging,
                    bind: crate::types::BindFlags::empty(),
                    cpu_access: crate::types::CpuAccess::READ,
                    structure_stride: 0,
                },
                None,
            )
            .unwrap();
        gpu.device.set_removed(RemovalReason::Hung);
        assert_eq!(gpu.device.removal_reason(), Some(RemovalReason::Hung));
        let err = unsafe { gpu.context.map_buffer(&buffer, MapMode::Read) };
        assert_eq!(err.unwrap_err(), DeviceError::Lost);
    }

    #[test]
    fn handles_compare_by_identity() {
        let gpu = gpu();
        let desc = BufferDescriptor {
            size: 4,
            usage: crate::types::NativeUsage::Default,
            bind: crate::types::BindFlags::VERTEX_BUFFER,
            cpu_access: crate::types::CpuAccess::empty(),
            structure_stride: 0,
        };
        let a = gpu.device.create_buffer(&desc, None).unwrap();
        let b = gpu.device.create_buffer(&desc, None).unwrap();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
