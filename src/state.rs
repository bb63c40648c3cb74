//! Draw-time device state management.
//!
//! Every piece of pipeline state follows one pattern: compare the
//! incoming value against the cached copy (or a force flag), and touch
//! the device only on a real change. The state manager also owns draw
//! emission, emulation of the two primitive modes the device lacks,
//! the coarse sync point, and the device-loss state machine.

use crate::{
    buffer::{BufferRef, BufferUsage},
    conv,
    input_layout::InputLayoutCache,
    pixel_transfer::{self, PixelTransfer, PixelTransferShaders},
    render_states::RenderStateCache,
    types::{
        BindFlags, BlendDesc, Box3, CpuAccess, DepthStencilDesc, DxgiFormat, Extent, Format,
        IndexData, IndexType, MapMode, NativeUsage, PixelUnpackState, PrimitiveMode,
        RasterizerDesc, Rect, SamplerDesc, ShaderStage, Topology, Viewport,
    },
    Adapter, Api, BufferDescriptor, Context, Device, DeviceError, Gpu, ProgramExecutables,
    RenderTarget, TranslatedAttribute, MAX_DRAW_BUFFERS, MAX_SAMPLER_SLOTS, MAX_TEXTURE_SLOTS,
    MAX_TRANSFORM_FEEDBACK_BUFFERS, MAX_UNIFORM_BUFFER_SLOTS,
};

use arrayvec::ArrayVec;

use std::num::NonZeroU64;

/// Slot 0 of each stage carries the driver constant block; application
/// uniform blocks start one slot later.
const DRIVER_CONSTANTS_SLOT: u32 = 0;
const APP_UNIFORM_SLOT_OFFSET: u32 = 1;

bitflags::bitflags! {
    struct ForceDirty: u32 {
        const BLEND = 1;
        const RASTERIZER = 2;
        const DEPTH_STENCIL = 4;
        const SCISSOR = 8;
        const VIEWPORT = 16;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceStatus {
    Initialized,
    Lost,
    /// Reset failed; every subsequent operation fails.
    Fatal,
}

/// Values the viewport feeds to the shaders via the driver constant
/// block. 32 bytes, 16-byte aligned.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct DriverConstants {
    view_coords: [f32; 4],
    depth_range: [f32; 4],
}

impl DriverConstants {
    fn to_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, v) in self
            .view_coords
            .iter()
            .chain(self.depth_range.iter())
            .enumerate()
        {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// Growable 32-bit index buffer refilled per emulated draw.
struct ScratchIndexBuffer<A: Api> {
    buffer: Option<A::Buffer>,
    capacity: u64,
}

impl<A: Api> ScratchIndexBuffer<A> {
    fn new() -> Self {
        Self {
            buffer: None,
            capacity: 0,
        }
    }

    fn release(&mut self) {
        self.buffer = None;
        self.capacity = 0;
    }

    fn upload(&mut self, gpu: &Gpu<A>, indices: &[u32]) -> Result<A::Buffer, DeviceError> {
        let needed = (indices.len() * 4) as u64;
        if self.buffer.is_none() || self.capacity < needed {
            self.buffer = Some(gpu.device.create_buffer(
                &BufferDescriptor {
                    size: needed,
                    usage: NativeUsage::Dynamic,
                    bind: BindFlags::INDEX_BUFFER,
                    cpu_access: CpuAccess::WRITE,
                    structure_stride: 0,
                },
                None,
            )?);
            self.capacity = needed;
        }
        let buffer = self.buffer.clone().unwrap_or_else(|| unreachable!());
        let ptr = unsafe { gpu.context.map_buffer(&buffer, MapMode::WriteDiscard)? };
        unsafe {
            std::ptr::copy_nonoverlapping(
                indices.as_ptr() as *const u8,
                ptr.as_ptr(),
                indices.len() * 4,
            );
        }
        gpu.context.unmap_buffer(&buffer);
        Ok(buffer)
    }
}

pub struct StateManager<A: Api> {
    gpu: Gpu<A>,
    adapter: A::Adapter,
    status: DeviceStatus,

    force: ForceDirty,
    force_samplers: [[bool; MAX_SAMPLER_SLOTS]; 3],

    cur_blend: Option<(BlendDesc, [f32; 4], u32)>,
    cur_rasterizer: Option<RasterizerDesc>,
    scissor_enabled: bool,
    cur_depth_stencil: Option<(DepthStencilDesc, u32)>,
    cur_scissor: Option<Rect>,
    cur_viewport: Option<(Rect, f32, f32)>,

    samplers: [[Option<SamplerDesc>; MAX_SAMPLER_SLOTS]; 3],
    srvs: [SrvSlots<A>; 3],
    applied_uniform_buffers: [[Option<A::Buffer>; MAX_UNIFORM_BUFFER_SLOTS]; 3],

    applied_ib: Option<(A::Buffer, DxgiFormat, u32)>,
    applied_program: Option<(NonZeroU64, bool, bool)>,
    applied_pixel_shader: Option<A::PixelShader>,
    applied_geometry_shader: Option<A::GeometryShader>,
    cur_topology: Topology,

    rt_serials: [Option<NonZeroU64>; MAX_DRAW_BUFFERS],
    ds_serial: Option<NonZeroU64>,
    rt_formats: [Option<Format>; MAX_DRAW_BUFFERS],
    rt_extent: Extent,
    rt_desc_valid: bool,
    depth_stencil_initialized: bool,

    tf_buffers: [Option<A::Buffer>; MAX_TRANSFORM_FEEDBACK_BUFFERS],
    tf_offsets: [u32; MAX_TRANSFORM_FEEDBACK_BUFFERS],

    driver_constants: DriverConstants,
    driver_constants_dirty: bool,
    driver_cbs: Option<(A::Buffer, A::Buffer)>,

    input_layouts: InputLayoutCache<A>,
    render_states: RenderStateCache<A>,
    pixel_transfer: PixelTransfer<A>,
    line_loop_ib: ScratchIndexBuffer<A>,
    triangle_fan_ib: ScratchIndexBuffer<A>,
    sync_query: Option<A::Query>,
}

type SrvSlots<A> =
    [Option<(<A as Api>::ShaderResourceView, <A as Api>::Texture)>; MAX_TEXTURE_SLOTS];

fn stage_slot(stage: ShaderStage) -> usize {
    match stage {
        ShaderStage::Vertex => 0,
        ShaderStage::Geometry => 1,
        ShaderStage::Pixel => 2,
    }
}

impl<A: Api> StateManager<A> {
    pub fn new(
        adapter: A::Adapter,
        transfer_shaders: PixelTransferShaders,
        loss_sink: Option<std::sync::Arc<dyn Fn()>>,
    ) -> Result<Self, DeviceError> {
        let open = adapter.open()?;
        let gpu = match loss_sink {
            Some(sink) => Gpu::with_loss_sink(open.device, open.context, sink),
            None => Gpu::new(open.device, open.context),
        };
        let mut manager = Self {
            gpu,
            adapter,
            status: DeviceStatus::Initialized,
            force: ForceDirty::empty(),
            force_samplers: [[false; MAX_SAMPLER_SLOTS]; 3],
            cur_blend: None,
            cur_rasterizer: None,
            scissor_enabled: false,
            cur_depth_stencil: None,
            cur_scissor: None,
            cur_viewport: None,
            samplers: Default::default(),
            srvs: Default::default(),
            applied_uniform_buffers: Default::default(),
            applied_ib: None,
            applied_program: None,
            applied_pixel_shader: None,
            applied_geometry_shader: None,
            cur_topology: Topology::Undefined,
            rt_serials: Default::default(),
            ds_serial: None,
            rt_formats: Default::default(),
            rt_extent: Extent::default(),
            rt_desc_valid: false,
            depth_stencil_initialized: false,
            tf_buffers: Default::default(),
            tf_offsets: [0; MAX_TRANSFORM_FEEDBACK_BUFFERS],
            driver_constants: DriverConstants::default(),
            driver_constants_dirty: true,
            driver_cbs: None,
            input_layouts: InputLayoutCache::new(),
            render_states: RenderStateCache::new(),
            pixel_transfer: PixelTransfer::new(transfer_shaders),
            line_loop_ib: ScratchIndexBuffer::new(),
            triangle_fan_ib: ScratchIndexBuffer::new(),
            sync_query: None,
        };
        manager.mark_all_state_dirty();
        Ok(manager)
    }

    pub fn gpu(&self) -> &Gpu<A> {
        &self.gpu
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    fn ensure_usable(&self) -> Result<(), DeviceError> {
        match self.status {
            DeviceStatus::Initialized => Ok(()),
            DeviceStatus::Lost | DeviceStatus::Fatal => Err(DeviceError::Lost),
        }
    }

    /// Forgets everything ever applied; the next pass re-applies and
    /// rebinds the full pipeline.
    pub fn mark_all_state_dirty(&mut self) {
        self.force = ForceDirty::all();
        self.force_samplers = [[true; MAX_SAMPLER_SLOTS]; 3];
        self.cur_blend = None;
        self.cur_rasterizer = None;
        self.cur_depth_stencil = None;
        self.cur_scissor = None;
        self.cur_viewport = None;
        self.samplers = Default::default();
        self.srvs = Default::default();
        self.applied_uniform_buffers = Default::default();
        self.applied_ib = None;
        self.applied_program = None;
        self.applied_pixel_shader = None;
        self.applied_geometry_shader = None;
        self.cur_topology = Topology::Undefined;
        self.rt_serials = Default::default();
        self.ds_serial = None;
        self.rt_desc_valid = false;
        self.depth_stencil_initialized = false;
        self.tf_buffers = Default::default();
        self.driver_constants_dirty = true;
        self.input_layouts.mark_dirty();
    }

    /// Drops every device object this manager created. Called before a
    /// reset; the handles would be dangling on the new device.
    pub fn release_device_resources(&mut self) {
        self.input_layouts.clear();
        self.render_states.clear();
        self.pixel_transfer.release_device_resources();
        self.line_loop_ib.release();
        self.triangle_fan_ib.release();
        self.sync_query = None;
        self.driver_cbs = None;
        self.mark_all_state_dirty();
    }

    pub fn apply_blend_state(
        &mut self,
        desc: &BlendDesc,
        blend_color: [f32; 4],
        sample_mask: u32,
    ) -> Result<(), DeviceError> {
        let incoming = (*desc, blend_color, sample_mask);
        if !self.force.contains(ForceDirty::BLEND) && self.cur_blend == Some(incoming) {
            return Ok(());
        }
        let state = self
            .render_states
            .blend_state(&self.gpu, desc, &self.rt_formats)?;
        // The device has one blend-constant register; when the RGB
        // factors reference the constant alpha, feed alpha everywhere.
        let factors = if desc.src_rgb.references_constant_alpha()
            || desc.dst_rgb.references_constant_alpha()
        {
            [blend_color[3]; 4]
        } else {
            blend_color
        };
        self.gpu
            .context
            .set_blend_state(Some(&state), factors, sample_mask);
        self.cur_blend = Some(incoming);
        self.force.remove(ForceDirty::BLEND);
        Ok(())
    }

    pub fn apply_rasterizer_state(&mut self, desc: &RasterizerDesc) -> Result<(), DeviceError> {
        if !self.force.contains(ForceDirty::RASTERIZER) && self.cur_rasterizer == Some(*desc) {
            return Ok(());
        }
        let state = self
            .render_states
            .rasterizer_state(&self.gpu, desc, self.scissor_enabled)?;
        self.gpu.context.set_rasterizer_state(Some(&state));
        self.cur_rasterizer = Some(*desc);
        self.force.remove(ForceDirty::RASTERIZER);
        Ok(())
    }

    pub fn apply_depth_stencil_state(
        &mut self,
        desc: &DepthStencilDesc,
        stencil_ref: u32,
    ) -> Result<(), DeviceError> {
        let stencil_ref = stencil_ref.min(0xFF);
        let incoming = (*desc, stencil_ref);
        if !self.force.contains(ForceDirty::DEPTH_STENCIL)
            && self.cur_depth_stencil == Some(incoming)
        {
            return Ok(());
        }
        let state = self.render_states.depth_stencil_state(&self.gpu, desc)?;
        self.gpu
            .context
            .set_depth_stencil_state(Some(&state), stencil_ref);
        self.cur_depth_stencil = Some(incoming);
        self.force.remove(ForceDirty::DEPTH_STENCIL);
        Ok(())
    }

    pub fn apply_scissor(&mut self, rect: Rect, enabled: bool) {
        if enabled != self.scissor_enabled {
            // The scissor-enable bit lives in the rasterizer object.
            self.force.insert(ForceDirty::RASTERIZER);
        }
        if self.force.contains(ForceDirty::SCISSOR)
            || self.cur_scissor != Some(rect)
            || enabled != self.scissor_enabled
        {
            if enabled {
                self.gpu.context.set_scissor(&rect);
            }
            self.cur_scissor = Some(rect);
            self.scissor_enabled = enabled;
            self.force.remove(ForceDirty::SCISSOR);
        }
    }

    pub fn apply_viewport(&mut self, viewport: Rect, near: f32, far: f32) {
        if !self.force.contains(ForceDirty::VIEWPORT)
            && self.cur_viewport == Some((viewport, near, far))
        {
            return;
        }
        let mut actual = Viewport {
            x: viewport.x.max(0) as f32,
            y: viewport.y.max(0) as f32,
            width: viewport.width.max(0) as f32,
            height: viewport.height.max(0) as f32,
            min_depth: near.max(0.0).min(1.0),
            max_depth: far.max(0.0).min(1.0),
        };
        if self.rt_desc_valid {
            actual.width = actual.width.min(self.rt_extent.width as f32 - actual.x);
            actual.height = actual.height.min(self.rt_extent.height as f32 - actual.y);
        }
        self.gpu.context.set_viewport(&actual);

        let constants = DriverConstants {
            view_coords: [
                actual.width * 0.5,
                actual.height * 0.5,
                actual.x + actual.width * 0.5,
                actual.y + actual.height * 0.5,
            ],
            depth_range: [near, far, far - near, 0.0],
        };
        if constants != self.driver_constants {
            self.driver_constants = constants;
            self.driver_constants_dirty = true;
        }

        self.cur_viewport = Some((viewport, near, far));
        self.force.remove(ForceDirty::VIEWPORT);
    }

    /// Uploads and binds the driver constant block when its values
    /// changed since the last draw.
    pub fn apply_driver_uniforms(&mut self) -> Result<(), DeviceError> {
        let newly_created = self.driver_cbs.is_none();
        if newly_created {
            let desc = BufferDescriptor {
                size: std::mem::size_of::<DriverConstants>() as u64,
                usage: NativeUsage::Dynamic,
                bind: BindFlags::CONSTANT_BUFFER,
                cpu_access: CpuAccess::WRITE,
                structure_stride: 0,
            };
            let vs = self.gpu.device.create_buffer(&desc, None)?;
            let ps = self.gpu.device.create_buffer(&desc, None)?;
            self.driver_cbs = Some((vs, ps));
        }
        let (vs, ps) = self.driver_cbs.as_ref().unwrap_or_else(|| unreachable!());
        if self.driver_constants_dirty {
            let bytes = self.driver_constants.to_bytes();
            self.gpu.context.update_buffer(vs, 0, &bytes);
            self.gpu.context.update_buffer(ps, 0, &bytes);
            self.driver_constants_dirty = false;
        }
        if newly_created {
            self.gpu.context.set_constant_buffers(
                ShaderStage::Vertex,
                DRIVER_CONSTANTS_SLOT,
                &[Some(vs.clone())],
            );
            self.gpu.context.set_constant_buffers(
                ShaderStage::Pixel,
                DRIVER_CONSTANTS_SLOT,
                &[Some(ps.clone())],
            );
        }
        Ok(())
    }

    pub fn apply_shaders(
        &mut self,
        program: &ProgramExecutables<A>,
        point_drawing: bool,
        transform_feedback_active: bool,
    ) {
        let key = (program.serial, point_drawing, transform_feedback_active);
        if self.applied_program == Some(key) {
            return;
        }
        let geometry = if transform_feedback_active {
            program.stream_out_shader.as_ref()
        } else if point_drawing {
            program.point_geometry_shader.as_ref()
        } else {
            program.geometry_shader.as_ref()
        };
        self.gpu.context.set_vertex_shader(Some(&program.vertex_shader));
        self.gpu.context.set_geometry_shader(geometry);
        self.gpu.context.set_pixel_shader(Some(&program.pixel_shader));
        self.applied_program = Some(key);
        self.applied_pixel_shader = Some(program.pixel_shader.clone());
        self.applied_geometry_shader = geometry.cloned();
    }

    /// Binds one texture slot, remembering the underlying resource so
    /// it can be unbound if it later becomes a render target.
    pub fn set_shader_resource(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        binding: Option<(&A::ShaderResourceView, &A::Texture)>,
    ) {
        let slots = &mut self.srvs[stage_slot(stage)];
        let cur = slots[slot as usize].as_ref().map(|(view, _)| view);
        if cur == binding.map(|(view, _)| view) {
            return;
        }
        self.gpu
            .context
            .set_shader_resources(stage, slot, &[binding.map(|(view, _)| view.clone())]);
        slots[slot as usize] = binding.map(|(view, texture)| (view.clone(), texture.clone()));
    }

    pub fn apply_sampler(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        desc: &SamplerDesc,
    ) -> Result<(), DeviceError> {
        let stage_index = stage_slot(stage);
        if !self.force_samplers[stage_index][slot as usize]
            && self.samplers[stage_index][slot as usize] == Some(*desc)
        {
            return Ok(());
        }
        let state = self.render_states.sampler_state(&self.gpu, desc)?;
        self.gpu.context.set_samplers(stage, slot, &[Some(state)]);
        self.samplers[stage_index][slot as usize] = Some(*desc);
        self.force_samplers[stage_index][slot as usize] = false;
        Ok(())
    }

    /// Syncs each bound uniform block's backing store and rebinds the
    /// slots whose native buffer changed. The sync runs every call so
    /// CPU writes reach the device; only the bind itself is diffed.
    pub fn apply_uniform_buffers(
        &mut self,
        stage: ShaderStage,
        bindings: &[Option<BufferRef<A>>],
    ) -> Result<(), DeviceError> {
        debug_assert!(bindings.len() <= MAX_UNIFORM_BUFFER_SLOTS);
        let stage_index = stage_slot(stage);
        for (slot, binding) in bindings.iter().enumerate() {
            let native = match binding {
                Some(buffer) => Some(buffer.lock().get_native_buffer(&self.gpu, BufferUsage::Uniform)?),
                None => None,
            };
            if self.applied_uniform_buffers[stage_index][slot] == native {
                continue;
            }
            self.gpu.context.set_constant_buffers(
                stage,
                APP_UNIFORM_SLOT_OFFSET + slot as u32,
                &[native.clone()],
            );
            self.applied_uniform_buffers[stage_index][slot] = native;
        }
        Ok(())
    }

    pub fn apply_index_buffer(
        &mut self,
        buffer: &BufferRef<A>,
        index_type: IndexType,
        offset: u32,
    ) -> Result<(), DeviceError> {
        let native = buffer
            .lock()
            .get_native_buffer(&self.gpu, BufferUsage::Index)?;
        let format = index_type.dxgi_format();
        let incoming = (native, format, offset);
        if self.applied_ib.as_ref() == Some(&incoming) {
            return Ok(());
        }
        self.gpu
            .context
            .set_index_buffer(Some(&incoming.0), format, offset);
        self.applied_ib = Some(incoming);
        Ok(())
    }

    pub fn apply_vertex_buffers(
        &mut self,
        attributes: &[TranslatedAttribute<A>],
        program: &ProgramExecutables<A>,
    ) -> Result<(), DeviceError> {
        self.input_layouts
            .apply_vertex_buffers(&self.gpu, attributes, program)
    }

    pub fn apply_transform_feedback_buffers(
        &mut self,
        bindings: &[Option<BufferRef<A>>],
        offsets: &[u32],
    ) -> Result<(), DeviceError> {
        debug_assert!(bindings.len() <= MAX_TRANSFORM_FEEDBACK_BUFFERS);
        let mut natives: [Option<A::Buffer>; MAX_TRANSFORM_FEEDBACK_BUFFERS] = Default::default();
        let mut new_offsets = [0u32; MAX_TRANSFORM_FEEDBACK_BUFFERS];
        for (slot, binding) in bindings.iter().enumerate() {
            natives[slot] = match binding {
                Some(buffer) => Some(
                    buffer
                        .lock()
                        .get_native_buffer(&self.gpu, BufferUsage::VertexOrTransformFeedback)?,
                ),
                None => None,
            };
            new_offsets[slot] = offsets.get(slot).copied().unwrap_or(0);
        }
        if natives != self.tf_buffers || new_offsets != self.tf_offsets {
            self.gpu
                .context
                .set_stream_out_targets(&natives, &new_offsets);
            self.tf_buffers = natives;
            self.tf_offsets = new_offsets;
        }
        Ok(())
    }

    /// Binds the draw framebuffer. A zero-sized default framebuffer is
    /// silently skipped; binding only happens when a render-target
    /// serial actually changed, and any shader-resource view aliasing
    /// an incoming render target is unbound first.
    pub fn apply_render_targets(
        &mut self,
        colors: &[Option<&RenderTarget<A>>],
        depth_stencil: Option<&RenderTarget<A>>,
    ) -> Result<(), DeviceError> {
        profiling::scope!("StateManager::apply_render_targets");
        self.ensure_usable()?;
        debug_assert!(colors.len() <= MAX_DRAW_BUFFERS);

        let first = colors
            .iter()
            .flatten()
            .next()
            .copied()
            .or(depth_stencil);
        let extent = match first {
            Some(rt) => rt.extent,
            None => return Ok(()),
        };
        if extent.is_zero() {
            return Ok(());
        }

        let mut serials: [Option<NonZeroU64>; MAX_DRAW_BUFFERS] = Default::default();
        for (i, rt) in colors.iter().enumerate() {
            serials[i] = rt.map(|rt| rt.serial);
        }
        let ds_serial = depth_stencil.map(|rt| rt.serial);
        if self.rt_desc_valid && serials == self.rt_serials && ds_serial == self.ds_serial {
            return Ok(());
        }

        // A texture can't be simultaneously read and rendered.
        for rt in colors.iter().flatten().copied().chain(depth_stencil) {
            self.unset_srvs_with_resource(&rt.texture);
        }

        let mut rtvs: ArrayVec<Option<A::RenderTargetView>, MAX_DRAW_BUFFERS> = ArrayVec::new();
        let mut formats: [Option<Format>; MAX_DRAW_BUFFERS] = Default::default();
        for (i, rt) in colors.iter().enumerate() {
            rtvs.push(rt.and_then(|rt| rt.rtv.clone()));
            formats[i] = rt.map(|rt| rt.format);
        }
        let dsv = depth_stencil.and_then(|rt| rt.dsv.as_ref());
        self.gpu.context.set_render_targets(&rtvs, dsv);

        if depth_stencil.is_some() && !self.depth_stencil_initialized {
            self.force.insert(ForceDirty::RASTERIZER);
            self.depth_stencil_initialized = true;
        }
        self.rt_serials = serials;
        self.ds_serial = ds_serial;
        self.rt_formats = formats;
        self.rt_extent = extent;
        self.rt_desc_valid = true;
        self.force
            .insert(ForceDirty::VIEWPORT | ForceDirty::SCISSOR | ForceDirty::BLEND);
        Ok(())
    }

    fn unset_srvs_with_resource(&mut self, texture: &A::Texture) {
        for (stage_index, stage) in [ShaderStage::Vertex, ShaderStage::Geometry, ShaderStage::Pixel]
            .iter()
            .enumerate()
        {
            for slot in 0..MAX_TEXTURE_SLOTS {
                let aliases = matches!(
                    &self.srvs[stage_index][slot],
                    Some((_, resource)) if resource == texture
                );
                if aliases {
                    self.gpu
                        .context
                        .set_shader_resources(*stage, slot as u32, &[None]);
                    self.srvs[stage_index][slot] = None;
                }
            }
        }
    }

    /// Maps the GL draw mode onto a native topology and binds it.
    /// Returns false when the vertex count cannot form a primitive.
    pub fn apply_primitive_type(&mut self, mode: PrimitiveMode, count: u32) -> bool {
        let topology = match conv::map_primitive_mode(mode) {
            Some(native) => native,
            // Emulated over an index buffer on a native topology.
            None if mode == PrimitiveMode::LineLoop => Topology::LineStrip,
            None => Topology::TriangleList,
        };
        let min_count = match mode {
            PrimitiveMode::Points => 1,
            PrimitiveMode::Lines | PrimitiveMode::LineStrip | PrimitiveMode::LineLoop => 2,
            _ => 3,
        };
        if count < min_count {
            return false;
        }
        if self.cur_topology != topology {
            self.gpu.context.set_primitive_topology(topology);
            self.cur_topology = topology;
        }
        true
    }

    pub fn draw_arrays(
        &mut self,
        mode: PrimitiveMode,
        first: u32,
        count: u32,
        instances: u32,
        transform_feedback_active: bool,
    ) -> Result<(), DeviceError> {
        profiling::scope!("StateManager::draw_arrays");
        self.ensure_usable()?;
        match mode {
            PrimitiveMode::LineLoop => self.draw_line_loop(count, None, first as i32, instances),
            PrimitiveMode::TriangleFan => {
                self.draw_triangle_fan(count, None, first as i32, instances)
            }
            PrimitiveMode::Points if transform_feedback_active => {
                // Capture pass: stream output only, no rasterization.
                self.gpu.context.set_pixel_shader(None);
                self.gpu.context.set_geometry_shader(None);
                if instances > 0 {
                    self.gpu.context.draw_instanced(count, instances, first);
                } else {
                    self.gpu.context.draw(count, first);
                }
                self.gpu
                    .context
                    .set_pixel_shader(self.applied_pixel_shader.as_ref());
                self.gpu
                    .context
                    .set_geometry_shader(self.applied_geometry_shader.as_ref());
                let rasterizing = !self
                    .cur_rasterizer
                    .map_or(false, |r| r.rasterizer_discard);
                if rasterizing {
                    if instances > 0 {
                        self.gpu.context.draw_instanced(count, instances, first);
                    } else {
                        self.gpu.context.draw(count, first);
                    }
                }
                Ok(())
            }
            _ => {
                if instances > 0 {
                    self.gpu.context.draw_instanced(count, instances, first);
                } else {
                    self.gpu.context.draw(count, first);
                }
                Ok(())
            }
        }
    }

    /// Indexed draw. `indices` holds the resolved index values (client
    /// memory or element-array bytes); the index buffer itself must
    /// already be applied for the non-emulated modes.
    pub fn draw_elements(
        &mut self,
        mode: PrimitiveMode,
        count: u32,
        indices: IndexData,
        min_index: u32,
        instances: u32,
    ) -> Result<(), DeviceError> {
        profiling::scope!("StateManager::draw_elements");
        self.ensure_usable()?;
        debug_assert_eq!(
            conv::index_range(indices, 0, count as usize).map(|(min, _)| min),
            Some(min_index)
        );
        let base_vertex = -(min_index as i32);
        match mode {
            PrimitiveMode::LineLoop => {
                self.draw_line_loop(count, Some(indices), base_vertex, instances)
            }
            PrimitiveMode::TriangleFan => {
                self.draw_triangle_fan(count, Some(indices), base_vertex, instances)
            }
            _ => {
                if instances > 0 {
                    self.gpu
                        .context
                        .draw_indexed_instanced(count, instances, 0, base_vertex);
                } else {
                    self.gpu.context.draw_indexed(count, 0, base_vertex);
                }
                Ok(())
            }
        }
    }

    fn bind_scratch_index_buffer(&mut self, buffer: A::Buffer) {
        let incoming = (buffer, DxgiFormat::R32Uint, 0);
        if self.applied_ib.as_ref() != Some(&incoming) {
            self.gpu
                .context
                .set_index_buffer(Some(&incoming.0), DxgiFormat::R32Uint, 0);
            self.applied_ib = Some(incoming);
        }
    }

    fn draw_line_loop(
        &mut self,
        count: u32,
        indices: Option<IndexData>,
        base_vertex: i32,
        instances: u32,
    ) -> Result<(), DeviceError> {
        let mut synthesized = Vec::with_capacity(count as usize + 1);
        match indices {
            Some(data) => {
                for i in 0..count as usize {
                    synthesized.push(data.get(i));
                }
                synthesized.push(data.get(0));
            }
            None => {
                synthesized.extend(0..count);
                synthesized.push(0);
            }
        }
        let buffer = self.line_loop_ib.upload(&self.gpu, &synthesized)?;
        self.bind_scratch_index_buffer(buffer);
        let index_count = synthesized.len() as u32;
        if instances > 0 {
            self.gpu
                .context
                .draw_indexed_instanced(index_count, instances, 0, base_vertex);
        } else {
            self.gpu.context.draw_indexed(index_count, 0, base_vertex);
        }
        Ok(())
    }

    fn draw_triangle_fan(
        &mut self,
        count: u32,
        indices: Option<IndexData>,
        base_vertex: i32,
        instances: u32,
    ) -> Result<(), DeviceError> {
        debug_assert!(count >= 3);
        let triangles = count as usize - 2;
        let mut synthesized = Vec::with_capacity(triangles * 3);
        for i in 0..triangles {
            match indices {
                Some(data) => {
                    synthesized.push(data.get(0));
                    synthesized.push(data.get(i + 1));
                    synthesized.push(data.get(i + 2));
                }
                None => {
                    synthesized.push(0);
                    synthesized.push(i as u32 + 1);
                    synthesized.push(i as u32 + 2);
                }
            }
        }
        let buffer = self.triangle_fan_ib.upload(&self.gpu, &synthesized)?;
        self.bind_scratch_index_buffer(buffer);
        let index_count = synthesized.len() as u32;
        if instances > 0 {
            self.gpu
                .context
                .draw_indexed_instanced(index_count, instances, 0, base_vertex);
        } else {
            self.gpu.context.draw_indexed(index_count, 0, base_vertex);
        }
        Ok(())
    }

    /// GPU-side buffer-to-texture copy through the transfer pipeline.
    /// Every piece of cached state is force-dirtied afterwards since
    /// the transfer binds the device directly.
    pub fn fast_copy_buffer_to_texture(
        &mut self,
        unpack: &PixelUnpackState,
        source: &BufferRef<A>,
        offset: u32,
        destination: &RenderTarget<A>,
        dest_format: Format,
        dest_area: Box3,
    ) -> Result<(), DeviceError> {
        self.ensure_usable()?;
        debug_assert!(pixel_transfer::supports_fast_copy(dest_format));
        self.pixel_transfer.copy_buffer_to_texture(
            &self.gpu,
            unpack,
            source,
            offset,
            destination,
            dest_format,
            dest_area,
        )?;
        self.mark_all_state_dirty();
        Ok(())
    }

    pub fn supports_fast_copy_buffer_to_texture(&self, format: Format) -> bool {
        pixel_transfer::supports_fast_copy(format)
    }

    /// Flushes queued work; when blocking, spin-polls an event query
    /// with a cooperative yield until the GPU catches up or the device
    /// is lost.
    pub fn sync(&mut self, block: bool) -> Result<(), DeviceError> {
        self.ensure_usable()?;
        if !block {
            self.gpu.context.flush();
            return Ok(());
        }
        if self.sync_query.is_none() {
            self.sync_query = Some(self.gpu.device.create_event_query()?);
        }
        let query = self.sync_query.clone().unwrap_or_else(|| unreachable!());
        self.gpu.context.end_query(&query);
        self.gpu.context.flush();
        loop {
            match self.gpu.context.poll_query(&query) {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    std::thread::yield_now();
                    if self.test_device_lost(true) {
                        return Err(DeviceError::Lost);
                    }
                }
                Err(_) => {
                    self.test_device_lost(true);
                    return Err(DeviceError::Lost);
                }
            }
        }
    }

    /// Polls the removal reason. The first detection logs and, when
    /// asked, broadcasts the loss notification; both happen at most
    /// once per device.
    pub fn test_device_lost(&mut self, notify: bool) -> bool {
        if self.status == DeviceStatus::Lost || self.status == DeviceStatus::Fatal {
            return true;
        }
        match self.gpu.device.removal_reason() {
            Some(reason) => {
                log::error!("device removed: {:?}", reason);
                self.status = DeviceStatus::Lost;
                self.gpu.mark_lost();
                if notify {
                    self.gpu.notify_loss();
                }
                true
            }
            None => false,
        }
    }

    /// Tears the device down and reopens it from the adapter. On
    /// failure the manager is fatally wedged.
    pub fn reset_device(&mut self) -> Result<(), DeviceError> {
        if self.status == DeviceStatus::Fatal {
            return Err(DeviceError::Lost);
        }
        self.release_device_resources();
        self.gpu.context.clear_state();
        let sink = self.gpu.loss_sink();
        match self.adapter.open() {
            Ok(open) => {
                self.gpu = match sink {
                    Some(sink) => Gpu::with_loss_sink(open.device, open.context, sink),
                    None => Gpu::new(open.device, open.context),
                };
                self.status = DeviceStatus::Initialized;
                self.mark_all_state_dirty();
                Ok(())
            }
            Err(e) => {
                log::error!("device reset failed");
                self.status = DeviceStatus::Fatal;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, UsageHint};
    use crate::null::{self, Null, NullAdapter, NullDevice};

    fn shaders() -> PixelTransferShaders {
        PixelTransferShaders {
            vertex: vec![1],
            geometry: None,
            pixel_float: vec![2],
            pixel_int: vec![3],
            pixel_uint: vec![4],
        }
    }

    fn manager() -> StateManager<Null> {
        StateManager::new(NullAdapter::new(), shaders(), None).unwrap()
    }

    fn apply_default_target(mgr: &mut StateManager<Null>) -> crate::RenderTarget<Null> {
        let rt = null::test_render_target(mgr.gpu(), Format::Rgba8Unorm, 8, 8, &[0; 4]);
        mgr.apply_render_targets(&[Some(&rt)], None).unwrap();
        rt
    }

    #[test]
    fn repeated_blend_application_is_one_driver_call() {
        let mut mgr = manager();
        apply_default_target(&mut mgr);
        let base = mgr.gpu().context.counts().set_blend_state;
        let desc = BlendDesc::default();
        mgr.apply_blend_state(&desc, [0.0; 4], !0).unwrap();
        mgr.apply_blend_state(&desc, [0.0; 4], !0).unwrap();
        assert_eq!(mgr.gpu().context.counts().set_blend_state, base + 1);

        mgr.mark_all_state_dirty();
        mgr.apply_blend_state(&desc, [0.0; 4], !0).unwrap();
        assert_eq!(mgr.gpu().context.counts().set_blend_state, base + 2);
    }

    #[test]
    fn constant_alpha_replicates_into_blend_factors() {
        let mut mgr = manager();
        apply_default_target(&mut mgr);
        let desc = BlendDesc {
            blend_enabled: true,
            src_rgb: crate::types::BlendFactor::ConstantAlpha,
            ..BlendDesc::default()
        };
        // Exercises the replication path; the null device only counts.
        mgr.apply_blend_state(&desc, [0.1, 0.2, 0.3, 0.9], !0).unwrap();
    }

    #[test]
    fn scissor_toggle_forces_rasterizer_reapply() {
        let mut mgr = manager();
        let desc = RasterizerDesc::default();
        mgr.apply_rasterizer_state(&desc).unwrap();
        let base = mgr.gpu().context.counts().set_rasterizer_state;
        mgr.apply_rasterizer_state(&desc).unwrap();
        assert_eq!(mgr.gpu().context.counts().set_rasterizer_state, base);

        let rect = Rect {
            x: 0,
            y: 0,
            width: 4,
            height: 4,
        };
        mgr.apply_scissor(rect, true);
        mgr.apply_rasterizer_state(&desc).unwrap();
        assert_eq!(mgr.gpu().context.counts().set_rasterizer_state, base + 1);
    }

    #[test]
    fn zero_sized_framebuffer_is_silently_skipped() {
        let mut mgr = manager();
        let base = mgr.gpu().context.counts().set_render_targets;
        mgr.apply_render_targets(&[None], None).unwrap();
        assert_eq!(mgr.gpu().context.counts().set_render_targets, base);
    }

    #[test]
    fn render_target_change_forces_viewport() {
        let mut mgr = manager();
        apply_default_target(&mut mgr);
        let vp = Rect {
            x: 0,
            y: 0,
            width: 8,
            height: 8,
        };
        mgr.apply_viewport(vp, 0.0, 1.0);
        let base = mgr.gpu().context.counts().set_viewport;
        mgr.apply_viewport(vp, 0.0, 1.0);
        assert_eq!(mgr.gpu().context.counts().set_viewport, base);

        // A different render target reinstates the force flag.
        apply_default_target(&mut mgr);
        mgr.apply_viewport(vp, 0.0, 1.0);
        assert_eq!(mgr.gpu().context.counts().set_viewport, base + 1);
    }

    #[test]
    fn same_render_target_serials_do_not_rebind() {
        let mut mgr = manager();
        let rt = apply_default_target(&mut mgr);
        let base = mgr.gpu().context.counts().set_render_targets;
        mgr.apply_render_targets(&[Some(&rt)], None).unwrap();
        assert_eq!(mgr.gpu().context.counts().set_render_targets, base);
    }

    #[test]
    fn aliasing_shader_resource_is_unbound_on_render_target_apply() {
        let mut mgr = manager();
        let rt = null::test_render_target(mgr.gpu(), Format::Rgba8Unorm, 8, 8, &[0; 4]);
        let view = mgr
            .gpu()
            .device
            .create_texture_view(
                &rt.texture,
                &crate::TextureViewDescriptor {
                    format: DxgiFormat::R8G8B8A8Unorm,
                    base_mip: 0,
                    mip_count: 1,
                    base_layer: 0,
                    layer_count: 1,
                },
            )
            .unwrap();
        mgr.set_shader_resource(ShaderStage::Pixel, 0, Some((&view, &rt.texture)));
        assert!(mgr
            .gpu()
            .context
            .bound_shader_resource(ShaderStage::Pixel, 0)
            .is_some());

        mgr.apply_render_targets(&[Some(&rt)], None).unwrap();
        assert!(mgr
            .gpu()
            .context
            .bound_shader_resource(ShaderStage::Pixel, 0)
            .is_none());
    }

    #[test]
    fn primitive_type_enforces_minimum_counts() {
        let mut mgr = manager();
        assert!(!mgr.apply_primitive_type(PrimitiveMode::Triangles, 2));
        assert!(mgr.apply_primitive_type(PrimitiveMode::Triangles, 3));
        assert!(!mgr.apply_primitive_type(PrimitiveMode::LineLoop, 1));
        let binds = mgr.gpu().context.counts().set_primitive_topology;
        assert!(mgr.apply_primitive_type(PrimitiveMode::Triangles, 6));
        assert_eq!(mgr.gpu().context.counts().set_primitive_topology, binds);
    }

    #[test]
    fn triangle_fan_synthesizes_one_indexed_draw() {
        let mut mgr = manager();
        assert!(mgr.apply_primitive_type(PrimitiveMode::TriangleFan, 5));
        mgr.draw_arrays(PrimitiveMode::TriangleFan, 0, 5, 0, false)
            .unwrap();

        let draws = mgr.gpu().context.draws();
        assert_eq!(draws.len(), 1);
        assert!(draws[0].indexed);
        assert_eq!(draws[0].vertex_count, 9);
        assert_eq!(draws[0].topology, Topology::TriangleList);

        let (buffer, format, offset) = mgr.gpu().context.bound_index_buffer().unwrap();
        assert_eq!(format, DxgiFormat::R32Uint);
        assert_eq!(offset, 0);
        let bytes = NullDevice::buffer_bytes(&buffer);
        let indices: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 2, 3, 0, 3, 4]);
    }

    #[test]
    fn line_loop_appends_the_first_index() {
        let mut mgr = manager();
        assert!(mgr.apply_primitive_type(PrimitiveMode::LineLoop, 4));
        mgr.draw_arrays(PrimitiveMode::LineLoop, 0, 4, 0, false)
            .unwrap();
        let draws = mgr.gpu().context.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].vertex_count, 5);
        assert_eq!(draws[0].topology, Topology::LineStrip);

        let (buffer, _, _) = mgr.gpu().context.bound_index_buffer().unwrap();
        let bytes = NullDevice::buffer_bytes(&buffer);
        let indices: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 0]);
    }

    #[test]
    fn indexed_line_loop_reuses_resolved_indices() {
        let mut mgr = manager();
        assert!(mgr.apply_primitive_type(PrimitiveMode::LineLoop, 3));
        let client = [7u16, 8, 9];
        mgr.draw_elements(PrimitiveMode::LineLoop, 3, IndexData::U16(&client), 7, 0)
            .unwrap();
        let (buffer, _, _) = mgr.gpu().context.bound_index_buffer().unwrap();
        let bytes = NullDevice::buffer_bytes(&buffer);
        let indices: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(indices, vec![7, 8, 9, 7]);
        let draws = mgr.gpu().context.draws();
        assert_eq!(draws[0].base_vertex, -7);
    }

    #[test]
    fn indexed_draw_offsets_by_min_index() {
        let mut mgr = manager();
        assert!(mgr.apply_primitive_type(PrimitiveMode::Triangles, 3));
        let client = [10u16, 11, 12];
        mgr.draw_elements(PrimitiveMode::Triangles, 3, IndexData::U16(&client), 10, 0)
            .unwrap();
        let draws = mgr.gpu().context.draws();
        assert_eq!(draws[0].base_vertex, -10);
        assert_eq!(draws[0].vertex_count, 3);
    }

    #[test]
    fn uniform_buffer_rebinds_only_on_identity_change() {
        let mut mgr = manager();
        let buffer = Buffer::new_ref();
        buffer
            .lock()
            .set_data(mgr.gpu(), &[0u8; 64], UsageHint::Dynamic)
            .unwrap();
        mgr.apply_uniform_buffers(ShaderStage::Vertex, &[Some(buffer.clone())])
            .unwrap();
        let base = mgr.gpu().context.counts().set_constant_buffers;
        mgr.apply_uniform_buffers(ShaderStage::Vertex, &[Some(buffer.clone())])
            .unwrap();
        assert_eq!(mgr.gpu().context.counts().set_constant_buffers, base);

        let other = Buffer::new_ref();
        other
            .lock()
            .set_data(mgr.gpu(), &[0u8; 64], UsageHint::Dynamic)
            .unwrap();
        mgr.apply_uniform_buffers(ShaderStage::Vertex, &[Some(other)])
            .unwrap();
        assert_eq!(mgr.gpu().context.counts().set_constant_buffers, base + 1);
    }

    #[test]
    fn uniform_writes_reach_the_device_between_draws() {
        let mut mgr = manager();
        let buffer = Buffer::new_ref();
        buffer
            .lock()
            .set_data(mgr.gpu(), &[1, 2, 3, 4], UsageHint::Dynamic)
            .unwrap();
        mgr.apply_uniform_buffers(ShaderStage::Vertex, &[Some(buffer.clone())])
            .unwrap();
        let base = mgr.gpu().context.counts().set_constant_buffers;

        buffer.lock().set_sub_data(mgr.gpu(), 0, &[9, 9, 9, 9]).unwrap();
        mgr.apply_uniform_buffers(ShaderStage::Vertex, &[Some(buffer.clone())])
            .unwrap();

        let bound = mgr
            .gpu()
            .context
            .bound_constant_buffer(ShaderStage::Vertex, APP_UNIFORM_SLOT_OFFSET as usize)
            .unwrap();
        assert_eq!(NullDevice::buffer_bytes(&bound), vec![9, 9, 9, 9]);
        // The data moved without touching the bind.
        assert_eq!(mgr.gpu().context.counts().set_constant_buffers, base);
    }

    #[test]
    fn grown_uniform_buffer_is_rebound() {
        let mut mgr = manager();
        let buffer = Buffer::new_ref();
        buffer
            .lock()
            .set_data(mgr.gpu(), &[1, 2, 3, 4], UsageHint::Dynamic)
            .unwrap();
        mgr.apply_uniform_buffers(ShaderStage::Vertex, &[Some(buffer.clone())])
            .unwrap();
        let base = mgr.gpu().context.counts().set_constant_buffers;

        // Growth recreates the native allocation; the stale handle
        // must not stay bound.
        buffer
            .lock()
            .set_data(mgr.gpu(), &[5u8; 32], UsageHint::Dynamic)
            .unwrap();
        mgr.apply_uniform_buffers(ShaderStage::Vertex, &[Some(buffer.clone())])
            .unwrap();
        assert_eq!(mgr.gpu().context.counts().set_constant_buffers, base + 1);
        let bound = mgr
            .gpu()
            .context
            .bound_constant_buffer(ShaderStage::Vertex, APP_UNIFORM_SLOT_OFFSET as usize)
            .unwrap();
        assert_eq!(NullDevice::buffer_bytes(&bound), vec![5u8; 32]);
    }

    #[test]
    fn geometry_stage_bindings_are_tracked_separately() {
        let mut mgr = manager();
        let rt = null::test_render_target(mgr.gpu(), Format::Rgba8Unorm, 8, 8, &[0; 4]);
        let view = mgr
            .gpu()
            .device
            .create_texture_view(
                &rt.texture,
                &crate::TextureViewDescriptor {
                    format: DxgiFormat::R8G8B8A8Unorm,
                    base_mip: 0,
                    mip_count: 1,
                    base_layer: 0,
                    layer_count: 1,
                },
            )
            .unwrap();
        mgr.set_shader_resource(ShaderStage::Pixel, 0, Some((&view, &rt.texture)));
        mgr.set_shader_resource(ShaderStage::Geometry, 0, Some((&view, &rt.texture)));
        assert!(mgr
            .gpu()
            .context
            .bound_shader_resource(ShaderStage::Geometry, 0)
            .is_some());

        mgr.apply_render_targets(&[Some(&rt)], None).unwrap();
        assert!(mgr
            .gpu()
            .context
            .bound_shader_resource(ShaderStage::Geometry, 0)
            .is_none());
    }

    #[test]
    fn shaders_rebind_on_point_mode_change() {
        let mut mgr = manager();
        let program = null::test_program(mgr.gpu());
        mgr.apply_shaders(&program, false, false);
        let base = mgr.gpu().context.counts().set_vertex_shader;
        mgr.apply_shaders(&program, false, false);
        assert_eq!(mgr.gpu().context.counts().set_vertex_shader, base);
        mgr.apply_shaders(&program, true, false);
        assert_eq!(mgr.gpu().context.counts().set_vertex_shader, base + 1);
    }

    #[test]
    fn fast_copy_dirties_all_cached_state() {
        let mut mgr = manager();
        apply_default_target(&mut mgr);
        let desc = BlendDesc::default();
        mgr.apply_blend_state(&desc, [0.0; 4], !0).unwrap();
        let base = mgr.gpu().context.counts().set_blend_state;

        let source = Buffer::new_ref();
        source
            .lock()
            .set_data(mgr.gpu(), &[0u8; 256], UsageHint::Static)
            .unwrap();
        let dest = null::test_render_target(mgr.gpu(), Format::Rgba8Unorm, 8, 8, &[0; 4]);
        mgr.fast_copy_buffer_to_texture(
            &PixelUnpackState::default(),
            &source,
            0,
            &dest,
            Format::Rgba8Unorm,
            Box3 {
                x: 0,
                y: 0,
                z: 0,
                width: 4,
                height: 4,
                depth: 1,
            },
        )
        .unwrap();

        // The transfer touched the device directly, so the same blend
        // state must be re-applied.
        mgr.apply_blend_state(&desc, [0.0; 4], !0).unwrap();
        assert!(mgr.gpu().context.counts().set_blend_state > base + 1);
    }

    #[test]
    fn sync_blocking_polls_the_event_query() {
        let mut mgr = manager();
        mgr.sync(false).unwrap();
        assert_eq!(mgr.gpu().context.counts().flush, 1);
        mgr.sync(true).unwrap();
        assert_eq!(mgr.gpu().context.counts().flush, 2);
    }

    #[test]
    fn sync_aborts_on_device_loss() {
        let mut mgr = manager();
        mgr.gpu().device.set_removed(crate::RemovalReason::Hung);
        assert_eq!(mgr.sync(true).unwrap_err(), DeviceError::Lost);
        assert_eq!(mgr.status(), DeviceStatus::Lost);
    }

    #[test]
    fn loss_is_latched_and_notified_once() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;
        let notifications = Arc::new(AtomicU32::new(0));
        let n = notifications.clone();
        let mut mgr = StateManager::<Null>::new(
            NullAdapter::new(),
            shaders(),
            Some(Arc::new(move || {
                n.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

        assert!(!mgr.test_device_lost(true));
        mgr.gpu().device.set_removed(crate::RemovalReason::Removed);
        assert!(mgr.test_device_lost(true));
        assert!(mgr.test_device_lost(true));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.status(), DeviceStatus::Lost);

        // Draws fail while lost.
        assert_eq!(
            mgr.draw_arrays(PrimitiveMode::Triangles, 0, 3, 0, false)
                .unwrap_err(),
            DeviceError::Lost
        );
    }

    #[test]
    fn reset_restores_an_operational_device() {
        let mut mgr = manager();
        mgr.gpu().device.set_removed(crate::RemovalReason::Reset);
        assert!(mgr.test_device_lost(false));
        mgr.reset_device().unwrap();
        assert_eq!(mgr.status(), DeviceStatus::Initialized);
        apply_default_target(&mut mgr);
        mgr.apply_blend_state(&BlendDesc::default(), [0.0; 4], !0)
            .unwrap();
        mgr.draw_arrays(PrimitiveMode::Triangles, 0, 3, 0, false)
            .unwrap();
    }

    #[test]
    fn failed_reset_is_fatal() {
        let adapter = NullAdapter::new();
        let adapter_handle = adapter.clone();
        let mut mgr = StateManager::<Null>::new(adapter, shaders(), None).unwrap();
        mgr.gpu().device.set_removed(crate::RemovalReason::Hung);
        assert!(mgr.test_device_lost(false));

        adapter_handle.fail_next_open();
        assert!(mgr.reset_device().is_err());
        assert_eq!(mgr.status(), DeviceStatus::Fatal);

        // Terminal: nothing works anymore, including another reset.
        assert_eq!(mgr.sync(false).unwrap_err(), DeviceError::Lost);
        assert_eq!(mgr.reset_device().unwrap_err(), DeviceError::Lost);
    }

    #[test]
    fn driver_uniforms_upload_on_viewport_change() {
        let mut mgr = manager();
        apply_default_target(&mut mgr);
        mgr.apply_viewport(
            Rect {
                x: 0,
                y: 0,
                width: 8,
                height: 8,
            },
            0.0,
            1.0,
        );
        mgr.apply_driver_uniforms().unwrap();
        let base = mgr.gpu().context.counts().update_buffer;
        // Same viewport: no re-upload.
        mgr.apply_driver_uniforms().unwrap();
        assert_eq!(mgr.gpu().context.counts().update_buffer, base);

        mgr.apply_viewport(
            Rect {
                x: 0,
                y: 0,
                width: 4,
                height: 4,
            },
            0.0,
            1.0,
        );
        mgr.apply_driver_uniforms().unwrap();
        assert_eq!(mgr.gpu().context.counts().update_buffer, base + 2);
    }

    #[test]
    fn transform_feedback_targets_rebind_on_change() {
        let mut mgr = manager();
        let buffer = Buffer::new_ref();
        buffer
            .lock()
            .set_data(mgr.gpu(), &[0u8; 64], UsageHint::Dynamic)
            .unwrap();
        mgr.apply_transform_feedback_buffers(&[Some(buffer.clone())], &[0])
            .unwrap();
        let base = mgr.gpu().context.counts().set_stream_out_targets;
        mgr.apply_transform_feedback_buffers(&[Some(buffer.clone())], &[0])
            .unwrap();
        assert_eq!(mgr.gpu().context.counts().set_stream_out_targets, base);
        mgr.apply_transform_feedback_buffers(&[Some(buffer)], &[16])
            .unwrap();
        assert_eq!(
            mgr.gpu().context.counts().set_stream_out_targets,
            base + 1
        );
    }

    #[test]
    fn index_buffer_application_is_idempotent() {
        let mut mgr = manager();
        let buffer = Buffer::new_ref();
        buffer
            .lock()
            .set_data(mgr.gpu(), &[0u8; 12], UsageHint::Static)
            .unwrap();
        mgr.apply_index_buffer(&buffer, IndexType::U16, 0).unwrap();
        let base = mgr.gpu().context.counts().set_index_buffer;
        mgr.apply_index_buffer(&buffer, IndexType::U16, 0).unwrap();
        assert_eq!(mgr.gpu().context.counts().set_index_buffer, base);
        mgr.apply_index_buffer(&buffer, IndexType::U16, 4).unwrap();
        assert_eq!(mgr.gpu().context.counts().set_index_buffer, base + 1);
    }

    #[test]
    fn points_with_transform_feedback_draw_twice() {
        let mut mgr = manager();
        let program = null::test_program(mgr.gpu());
        mgr.apply_shaders(&program, true, true);
        mgr.apply_rasterizer_state(&RasterizerDesc::default()).unwrap();
        assert!(mgr.apply_primitive_type(PrimitiveMode::Points, 4));
        mgr.draw_arrays(PrimitiveMode::Points, 0, 4, 0, true).unwrap();
        // One stream-out capture pass plus one raster pass.
        assert_eq!(mgr.gpu().context.draws().len(), 2);
    }
}
