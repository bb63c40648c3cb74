//! GPU-side buffer-to-texture pixel transfers.
//!
//! Unpacking a pixel buffer into a texture normally round-trips
//! through the CPU. For formats the device can render to directly we
//! instead draw one point per destination pixel: a vertex shader
//! computes each point's position and source buffer element from the
//! copy parameters, and a pixel shader per component class writes the
//! texel. The destination must be renderable, non-sRGB, not
//! three-component, and free of load-time conversion.

use crate::{
    buffer::BufferRef,
    types::{
        format_info, BindFlags, Box3, CompareFunc, CpuAccess, CullMode, DepthStencilDesc,
        ComponentClass, Extent, Format, NativeUsage, PixelUnpackState, RasterizerDesc,
        ShaderStage, Topology, Viewport,
    },
    Api, BufferDescriptor, Context, Device, DeviceError, Gpu, RenderTarget,
};

/// Compiled shader blobs for the transfer pipeline, supplied by the
/// shader collaborator.
pub struct PixelTransferShaders {
    pub vertex: Vec<u8>,
    /// Present when the device can route points to texture layers.
    pub geometry: Option<Vec<u8>>,
    pub pixel_float: Vec<u8>,
    pub pixel_int: Vec<u8>,
    pub pixel_uint: Vec<u8>,
}

/// Constant-buffer layout consumed by the copy shaders. 32 bytes,
/// 16-byte aligned.
#[derive(Clone, Copy, Debug, PartialEq)]
struct CopyShaderParams {
    first_pixel_offset: u32,
    pixels_per_row: u32,
    row_stride: u32,
    rows_per_slice: u32,
    position_upper_left: [f32; 2],
    position_scale: [f32; 2],
}

impl CopyShaderParams {
    fn compute(
        unpack: &PixelUnpackState,
        offset: u32,
        pixel_bytes: u32,
        dest_area: &Box3,
        dest_size: Extent,
    ) -> Self {
        let alignment_pixels = if unpack.alignment <= pixel_bytes {
            1
        } else {
            unpack.alignment / pixel_bytes
        };
        let pixels_per_row = if unpack.row_length > 0 {
            unpack.row_length
        } else {
            dest_area.width
        };
        // Center the points on the destination texels.
        let texel_center_x = 1.0 / dest_size.width as f32;
        let texel_center_y = 1.0 / dest_size.height as f32;
        Self {
            first_pixel_offset: offset / pixel_bytes,
            pixels_per_row,
            row_stride: crate::conv::align_up(pixels_per_row, alignment_pixels),
            rows_per_slice: dest_area.height,
            position_upper_left: [
                -1.0 + 2.0 * dest_area.x as f32 / dest_size.width as f32 + texel_center_x,
                1.0 - 2.0 * dest_area.y as f32 / dest_size.height as f32 - texel_center_y,
            ],
            position_scale: [
                2.0 / dest_size.width as f32,
                -2.0 / dest_size.height as f32,
            ],
        }
    }

    fn to_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..4].copy_from_slice(&self.first_pixel_offset.to_le_bytes());
        out[4..8].copy_from_slice(&self.pixels_per_row.to_le_bytes());
        out[8..12].copy_from_slice(&self.row_stride.to_le_bytes());
        out[12..16].copy_from_slice(&self.rows_per_slice.to_le_bytes());
        out[16..20].copy_from_slice(&self.position_upper_left[0].to_le_bytes());
        out[20..24].copy_from_slice(&self.position_upper_left[1].to_le_bytes());
        out[24..28].copy_from_slice(&self.position_scale[0].to_le_bytes());
        out[28..32].copy_from_slice(&self.position_scale[1].to_le_bytes());
        out
    }
}

struct Resources<A: Api> {
    vertex_shader: A::VertexShader,
    geometry_shader: Option<A::GeometryShader>,
    pixel_float: A::PixelShader,
    pixel_int: A::PixelShader,
    pixel_uint: A::PixelShader,
    rasterizer: A::RasterizerState,
    depth_stencil: A::DepthStencilState,
    params_buffer: A::Buffer,
}

pub struct PixelTransfer<A: Api> {
    shaders: PixelTransferShaders,
    resources: Option<Resources<A>>,
    cached_params: Option<CopyShaderParams>,
}

/// Whether a format is eligible for the point-per-pixel fast path.
pub fn supports_fast_copy(format: Format) -> bool {
    let info = format_info(format);
    !info.srgb
        && info.rtv_format != crate::types::DxgiFormat::Unknown
        && info.component_count != 3
        && !info.conversion_required
}

impl<A: Api> PixelTransfer<A> {
    pub fn new(shaders: PixelTransferShaders) -> Self {
        Self {
            shaders,
            resources: None,
            cached_params: None,
        }
    }

    /// Drops the device objects; they come back on next use.
    pub fn release_device_resources(&mut self) {
        self.resources = None;
        self.cached_params = None;
    }

    fn load_resources(&mut self, gpu: &Gpu<A>) -> Result<&Resources<A>, DeviceError> {
        if self.resources.is_none() {
            let rasterizer = gpu.device.create_rasterizer_state(
                &RasterizerDesc {
                    cull_mode: CullMode::None,
                    ..RasterizerDesc::default()
                },
                false,
            )?;
            let depth_stencil = gpu.device.create_depth_stencil_state(&DepthStencilDesc {
                depth_test: true,
                depth_func: CompareFunc::Always,
                depth_write: true,
                ..DepthStencilDesc::default()
            })?;
            let params_buffer = gpu.device.create_buffer(
                &BufferDescriptor {
                    size: std::mem::size_of::<CopyShaderParams>() as u64,
                    usage: NativeUsage::Dynamic,
                    bind: BindFlags::CONSTANT_BUFFER,
                    cpu_access: CpuAccess::WRITE,
                    structure_stride: 0,
                },
                None,
            )?;
            let geometry_shader = match &self.shaders.geometry {
                Some(bytecode) => Some(gpu.device.create_geometry_shader(bytecode)?),
                None => None,
            };
            self.resources = Some(Resources {
                vertex_shader: gpu.device.create_vertex_shader(&self.shaders.vertex)?,
                geometry_shader,
                pixel_float: gpu.device.create_pixel_shader(&self.shaders.pixel_float)?,
                pixel_int: gpu.device.create_pixel_shader(&self.shaders.pixel_int)?,
                pixel_uint: gpu.device.create_pixel_shader(&self.shaders.pixel_uint)?,
                rasterizer,
                depth_stencil,
                params_buffer,
            });
        }
        Ok(self.resources.as_ref().unwrap_or_else(|| unreachable!()))
    }

    /// Draws the source buffer range into the destination render
    /// target. The caller must force-dirty all cached device state
    /// afterwards; this path binds the pipeline directly.
    pub fn copy_buffer_to_texture(
        &mut self,
        gpu: &Gpu<A>,
        unpack: &PixelUnpackState,
        source: &BufferRef<A>,
        offset: u32,
        destination: &RenderTarget<A>,
        dest_format: Format,
        dest_area: Box3,
    ) -> Result<(), DeviceError> {
        profiling::scope!("PixelTransfer::copy_buffer_to_texture");
        debug_assert!(supports_fast_copy(dest_format));

        let info = format_info(dest_format);
        let params = CopyShaderParams::compute(
            unpack,
            offset,
            info.pixel_bytes,
            &dest_area,
            destination.extent,
        );
        let source_view = source.lock().get_typed_view(gpu, info.srv_format)?;
        self.load_resources(gpu)?;
        let params_changed = self.cached_params != Some(params);
        self.cached_params = Some(params);
        let resources = self.resources.as_ref().unwrap_or_else(|| unreachable!());
        let pixel_shader = match info.component_class {
            ComponentClass::Float => &resources.pixel_float,
            ComponentClass::Int => &resources.pixel_int,
            ComponentClass::Uint => &resources.pixel_uint,
        };

        if params_changed {
            gpu.context
                .update_buffer(&resources.params_buffer, 0, &params.to_bytes());
        }

        let ctx = &gpu.context;
        ctx.set_input_layout(None);
        ctx.set_primitive_topology(Topology::PointList);
        ctx.set_vertex_shader(Some(&resources.vertex_shader));
        ctx.set_geometry_shader(resources.geometry_shader.as_ref());
        ctx.set_pixel_shader(Some(pixel_shader));
        ctx.set_rasterizer_state(Some(&resources.rasterizer));
        ctx.set_depth_stencil_state(Some(&resources.depth_stencil), 0xFF);
        ctx.set_blend_state(None, [0.0; 4], !0);
        ctx.set_constant_buffers(
            ShaderStage::Vertex,
            0,
            &[Some(resources.params_buffer.clone())],
        );
        ctx.set_shader_resources(ShaderStage::Vertex, 0, &[Some(source_view)]);
        ctx.set_render_targets(&[destination.rtv.clone()], None);
        ctx.set_viewport(&Viewport {
            x: 0.0,
            y: 0.0,
            width: destination.extent.width as f32,
            height: destination.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });

        ctx.draw(dest_area.pixel_count(), 0);

        // Leave no dangling references to the caller's resources.
        ctx.set_shader_resources(ShaderStage::Vertex, 0, &[None]);
        ctx.set_constant_buffers(ShaderStage::Vertex, 0, &[None]);
        ctx.set_render_targets(&[None], None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, UsageHint};
    use crate::null::{self, Null};

    fn transfer() -> PixelTransfer<Null> {
        PixelTransfer::new(PixelTransferShaders {
            vertex: vec![1],
            geometry: None,
            pixel_float: vec![2],
            pixel_int: vec![3],
            pixel_uint: vec![4],
        })
    }

    #[test]
    fn eligibility_rejects_the_slow_formats() {
        assert!(supports_fast_copy(Format::Rgba8Unorm));
        assert!(supports_fast_copy(Format::Rgba32Uint));
        assert!(!supports_fast_copy(Format::Rgba8Srgb));
        assert!(!supports_fast_copy(Format::Rgb8Unorm));
        assert!(!supports_fast_copy(Format::Depth24Stencil8));
        assert!(!supports_fast_copy(Format::Bc1RgbaUnorm));
    }

    #[test]
    fn row_stride_honors_unpack_alignment() {
        let unpack = PixelUnpackState {
            alignment: 8,
            row_length: 0,
        };
        let area = Box3 {
            x: 0,
            y: 0,
            z: 0,
            width: 5,
            height: 2,
            depth: 1,
        };
        // 1-byte pixels with 8-byte alignment: 8 pixels of stride.
        let params = CopyShaderParams::compute(&unpack, 16, 1, &area, Extent::new(8, 8, 1));
        assert_eq!(params.row_stride, 8);
        assert_eq!(params.pixels_per_row, 5);
        assert_eq!(params.first_pixel_offset, 16);
    }

    #[test]
    fn draws_one_point_per_destination_pixel() {
        let gpu = null::gpu();
        let mut transfer = transfer();
        let source = Buffer::new_ref();
        source
            .lock()
            .set_data(&gpu, &[0u8; 256], UsageHint::Static)
            .unwrap();
        let dest = null::test_render_target(&gpu, Format::Rgba8Unorm, 8, 8, &[0, 0, 0, 0]);
        let area = Box3 {
            x: 2,
            y: 2,
            z: 0,
            width: 4,
            height: 3,
            depth: 1,
        };
        transfer
            .copy_buffer_to_texture(
                &gpu,
                &PixelUnpackState::default(),
                &source,
                0,
                &dest,
                Format::Rgba8Unorm,
                area,
            )
            .unwrap();
        let draws = gpu.context.draws();
        let last = draws.last().unwrap();
        assert_eq!(last.vertex_count, 12);
        assert_eq!(last.topology, Topology::PointList);
    }

    #[test]
    fn constant_buffer_reuploads_only_on_parameter_change() {
        let gpu = null::gpu();
        let mut transfer = transfer();
        let source = Buffer::new_ref();
        source
            .lock()
            .set_data(&gpu, &[0u8; 256], UsageHint::Static)
            .unwrap();
        let dest = null::test_render_target(&gpu, Format::Rgba8Unorm, 8, 8, &[0, 0, 0, 0]);
        let area = Box3 {
            x: 0,
            y: 0,
            z: 0,
            width: 4,
            height: 4,
            depth: 1,
        };
        let unpack = PixelUnpackState::default();
        transfer
            .copy_buffer_to_texture(&gpu, &unpack, &source, 0, &dest, Format::Rgba8Unorm, area)
            .unwrap();
        let uploads = gpu.context.counts().update_buffer;
        transfer
            .copy_buffer_to_texture(&gpu, &unpack, &source, 0, &dest, Format::Rgba8Unorm, area)
            .unwrap();
        assert_eq!(gpu.context.counts().update_buffer, uploads);
        transfer
            .copy_buffer_to_texture(&gpu, &unpack, &source, 64, &dest, Format::Rgba8Unorm, area)
            .unwrap();
        assert_eq!(gpu.context.counts().update_buffer, uploads + 1);
    }
}
