//! Plain data shared across the backend: GL-level pipeline state
//! descriptions, the DXGI format vocabulary, and the static format
//! information table that drives image loads and copies.

pub type BufferAddress = u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Origin {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// A 3D sub-region of a buffer-backed image or texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Box3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Box3 {
    pub fn from_extent(extent: Extent) -> Self {
        Self {
            x: 0,
            y: 0,
            z: 0,
            width: extent.width,
            height: extent.height,
            depth: extent.depth,
        }
    }

    pub fn pixel_count(&self) -> u32 {
        self.width * self.height * self.depth
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Floating-point viewport as the device consumes it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// The subset of DXGI formats this core traffics in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DxgiFormat {
    Unknown,
    R8Unorm,
    R8G8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8UnormSrgb,
    B8G8R8A8Unorm,
    R16Uint,
    R32Uint,
    R32Float,
    R32G32B32A32Float,
    R32G32B32A32Uint,
    R32G32B32A32Sint,
    D24UnormS8Uint,
    Bc1Unorm,
}

impl DxgiFormat {
    /// Bytes per pixel for uncompressed formats, bytes per block for
    /// block-compressed ones.
    pub fn element_bytes(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R8Unorm => 1,
            Self::R8G8Unorm | Self::R16Uint => 2,
            Self::R8G8B8A8Unorm
            | Self::R8G8B8A8UnormSrgb
            | Self::B8G8R8A8Unorm
            | Self::R32Uint
            | Self::R32Float
            | Self::D24UnormS8Uint => 4,
            Self::Bc1Unorm => 8,
            Self::R32G32B32A32Float | Self::R32G32B32A32Uint | Self::R32G32B32A32Sint => 16,
        }
    }

    pub fn block_dims(self) -> (u32, u32) {
        match self {
            Self::Bc1Unorm => (4, 4),
            _ => (1, 1),
        }
    }
}

/// Numeric class of a format's components, used to select the pixel
/// shader variant for GPU-side pixel transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentClass {
    Float,
    Int,
    Uint,
}

/// GL-level internal formats understood by the image path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    None,
    R8Unorm,
    Rg8Unorm,
    Rgb8Unorm,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    R32Float,
    Rgba32Float,
    Rgba32Uint,
    Rgba32Sint,
    Depth24Stencil8,
    Bc1RgbaUnorm,
}

/// Copies pixel rows between two differently pitched allocations.
///
/// Both pointers address the first pixel of the region; `width` is in
/// pixels for uncompressed formats and in blocks for compressed ones.
pub type LoadImageFn = unsafe fn(
    width: u32,
    height: u32,
    depth: u32,
    input: *const u8,
    input_row_pitch: u32,
    input_depth_pitch: u32,
    output: *mut u8,
    output_row_pitch: u32,
    output_depth_pitch: u32,
);

unsafe fn load_rows(
    row_bytes: u32,
    height: u32,
    depth: u32,
    input: *const u8,
    input_row_pitch: u32,
    input_depth_pitch: u32,
    output: *mut u8,
    output_row_pitch: u32,
    output_depth_pitch: u32,
) {
    for z in 0..depth as usize {
        for y in 0..height as usize {
            let src = input.add(z * input_depth_pitch as usize + y * input_row_pitch as usize);
            let dst = output.add(z * output_depth_pitch as usize + y * output_row_pitch as usize);
            std::ptr::copy_nonoverlapping(src, dst, row_bytes as usize);
        }
    }
}

macro_rules! direct_loader {
    ($name:ident, $bpp:expr) => {
        unsafe fn $name(
            width: u32,
            height: u32,
            depth: u32,
            input: *const u8,
            irp: u32,
            idp: u32,
            output: *mut u8,
            orp: u32,
            odp: u32,
        ) {
            load_rows(width * $bpp, height, depth, input, irp, idp, output, orp, odp);
        }
    };
}

direct_loader!(load_1bpp, 1);
direct_loader!(load_2bpp, 2);
direct_loader!(load_4bpp, 4);
direct_loader!(load_16bpp, 16);

// RGB8 has no D3D11 representation; expand to RGBA8 with opaque alpha.
unsafe fn load_rgb8_to_rgba8(
    width: u32,
    height: u32,
    depth: u32,
    input: *const u8,
    irp: u32,
    idp: u32,
    output: *mut u8,
    orp: u32,
    odp: u32,
) {
    for z in 0..depth as usize {
        for y in 0..height as usize {
            let src = input.add(z * idp as usize + y * irp as usize);
            let dst = output.add(z * odp as usize + y * orp as usize);
            for x in 0..width as usize {
                std::ptr::copy_nonoverlapping(src.add(x * 3), dst.add(x * 4), 3);
                *dst.add(x * 4 + 3) = 0xFF;
            }
        }
    }
}

// Block-compressed rows: width arrives in blocks, 8 bytes per BC1 block.
unsafe fn load_bc1(
    width: u32,
    height: u32,
    depth: u32,
    input: *const u8,
    irp: u32,
    idp: u32,
    output: *mut u8,
    orp: u32,
    odp: u32,
) {
    load_rows(width * 8, height, depth, input, irp, idp, output, orp, odp);
}

fn read_rgba8(texel: &[u8]) -> [f32; 4] {
    [
        texel[0] as f32 / 255.0,
        texel[1] as f32 / 255.0,
        texel[2] as f32 / 255.0,
        texel[3] as f32 / 255.0,
    ]
}

fn write_rgba8(color: [f32; 4], texel: &mut [u8]) {
    for (i, c) in color.iter().enumerate() {
        texel[i] = (c.max(0.0).min(1.0) * 255.0 + 0.5) as u8;
    }
}

fn read_bgra8(texel: &[u8]) -> [f32; 4] {
    [
        texel[2] as f32 / 255.0,
        texel[1] as f32 / 255.0,
        texel[0] as f32 / 255.0,
        texel[3] as f32 / 255.0,
    ]
}

fn write_bgra8(color: [f32; 4], texel: &mut [u8]) {
    write_rgba8([color[2], color[1], color[0], color[3]], texel);
}

fn read_r8(texel: &[u8]) -> [f32; 4] {
    [texel[0] as f32 / 255.0, 0.0, 0.0, 1.0]
}

fn write_r8(color: [f32; 4], texel: &mut [u8]) {
    texel[0] = (color[0].max(0.0).min(1.0) * 255.0 + 0.5) as u8;
}

fn read_rg8(texel: &[u8]) -> [f32; 4] {
    [texel[0] as f32 / 255.0, texel[1] as f32 / 255.0, 0.0, 1.0]
}

fn write_rg8(color: [f32; 4], texel: &mut [u8]) {
    texel[0] = (color[0].max(0.0).min(1.0) * 255.0 + 0.5) as u8;
    texel[1] = (color[1].max(0.0).min(1.0) * 255.0 + 0.5) as u8;
}

fn read_r32f(texel: &[u8]) -> [f32; 4] {
    let mut bits = [0u8; 4];
    bits.copy_from_slice(&texel[..4]);
    [f32::from_le_bytes(bits), 0.0, 0.0, 1.0]
}

fn write_r32f(color: [f32; 4], texel: &mut [u8]) {
    texel[..4].copy_from_slice(&color[0].to_le_bytes());
}

fn read_rgba32f(texel: &[u8]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (i, chunk) in texel.chunks_exact(4).take(4).enumerate() {
        let mut bits = [0u8; 4];
        bits.copy_from_slice(chunk);
        out[i] = f32::from_le_bytes(bits);
    }
    out
}

fn write_rgba32f(color: [f32; 4], texel: &mut [u8]) {
    for (i, c) in color.iter().enumerate() {
        texel[i * 4..i * 4 + 4].copy_from_slice(&c.to_le_bytes());
    }
}

/// Per-pixel conversion hooks for the slow texture read-back path.
pub type ReadPixelFn = fn(&[u8]) -> [f32; 4];
pub type WritePixelFn = fn([f32; 4], &mut [u8]);

pub struct FormatInfo {
    /// Format of the backing texture allocation.
    pub tex_format: DxgiFormat,
    pub srv_format: DxgiFormat,
    pub rtv_format: DxgiFormat,
    pub dsv_format: DxgiFormat,
    pub pixel_bytes: u32,
    pub component_count: u32,
    pub component_class: ComponentClass,
    pub srgb: bool,
    /// The D3D representation is wider than the GL one, so every load
    /// goes through a conversion (and fast buffer-to-texture copies are
    /// ineligible).
    pub conversion_required: bool,
    /// Formats whose D3D representation carries channels the GL format
    /// lacks must be filled before first use.
    pub requires_init: bool,
    pub load: LoadImageFn,
    pub read_pixel: Option<ReadPixelFn>,
    pub write_pixel: Option<WritePixelFn>,
}

pub fn format_info(format: Format) -> &'static FormatInfo {
    match format {
        Format::None => &FormatInfo {
            tex_format: DxgiFormat::Unknown,
            srv_format: DxgiFormat::Unknown,
            rtv_format: DxgiFormat::Unknown,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 0,
            component_count: 0,
            component_class: ComponentClass::Float,
            srgb: false,
            conversion_required: false,
            requires_init: false,
            load: load_1bpp,
            read_pixel: None,
            write_pixel: None,
        },
        Format::R8Unorm => &FormatInfo {
            tex_format: DxgiFormat::R8Unorm,
            srv_format: DxgiFormat::R8Unorm,
            rtv_format: DxgiFormat::R8Unorm,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 1,
            component_count: 1,
            component_class: ComponentClass::Float,
            srgb: false,
            conversion_required: false,
            requires_init: false,
            load: load_1bpp,
            read_pixel: Some(read_r8),
            write_pixel: Some(write_r8),
        },
        Format::Rg8Unorm => &FormatInfo {
            tex_format: DxgiFormat::R8G8Unorm,
            srv_format: DxgiFormat::R8G8Unorm,
            rtv_format: DxgiFormat::R8G8Unorm,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 2,
            component_count: 2,
            component_class: ComponentClass::Float,
            srgb: false,
            conversion_required: false,
            requires_init: false,
            load: load_2bpp,
            read_pixel: Some(read_rg8),
            write_pixel: Some(write_rg8),
        },
        Format::Rgb8Unorm => &FormatInfo {
            tex_format: DxgiFormat::R8G8B8A8Unorm,
            srv_format: DxgiFormat::R8G8B8A8Unorm,
            rtv_format: DxgiFormat::R8G8B8A8Unorm,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 4,
            component_count: 3,
            component_class: ComponentClass::Float,
            srgb: false,
            conversion_required: true,
            requires_init: true,
            load: load_rgb8_to_rgba8,
            read_pixel: Some(read_rgba8),
            write_pixel: Some(write_rgba8),
        },
        Format::Rgba8Unorm => &FormatInfo {
            tex_format: DxgiFormat::R8G8B8A8Unorm,
            srv_format: DxgiFormat::R8G8B8A8Unorm,
            rtv_format: DxgiFormat::R8G8B8A8Unorm,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 4,
            component_count: 4,
            component_class: ComponentClass::Float,
            srgb: false,
            conversion_required: false,
            requires_init: false,
            load: load_4bpp,
            read_pixel: Some(read_rgba8),
            write_pixel: Some(write_rgba8),
        },
        Format::Rgba8Srgb => &FormatInfo {
            tex_format: DxgiFormat::R8G8B8A8UnormSrgb,
            srv_format: DxgiFormat::R8G8B8A8UnormSrgb,
            rtv_format: DxgiFormat::R8G8B8A8UnormSrgb,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 4,
            component_count: 4,
            component_class: ComponentClass::Float,
            srgb: true,
            conversion_required: false,
            requires_init: false,
            load: load_4bpp,
            read_pixel: Some(read_rgba8),
            write_pixel: Some(write_rgba8),
        },
        Format::Bgra8Unorm => &FormatInfo {
            tex_format: DxgiFormat::B8G8R8A8Unorm,
            srv_format: DxgiFormat::B8G8R8A8Unorm,
            rtv_format: DxgiFormat::B8G8R8A8Unorm,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 4,
            component_count: 4,
            component_class: ComponentClass::Float,
            srgb: false,
            conversion_required: false,
            requires_init: false,
            load: load_4bpp,
            read_pixel: Some(read_bgra8),
            write_pixel: Some(write_bgra8),
        },
        Format::R32Float => &FormatInfo {
            tex_format: DxgiFormat::R32Float,
            srv_format: DxgiFormat::R32Float,
            rtv_format: DxgiFormat::R32Float,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 4,
            component_count: 1,
            component_class: ComponentClass::Float,
            srgb: false,
            conversion_required: false,
            requires_init: false,
            load: load_4bpp,
            read_pixel: Some(read_r32f),
            write_pixel: Some(write_r32f),
        },
        Format::Rgba32Float => &FormatInfo {
            tex_format: DxgiFormat::R32G32B32A32Float,
            srv_format: DxgiFormat::R32G32B32A32Float,
            rtv_format: DxgiFormat::R32G32B32A32Float,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 16,
            component_count: 4,
            component_class: ComponentClass::Float,
            srgb: false,
            conversion_required: false,
            requires_init: false,
            load: load_16bpp,
            read_pixel: Some(read_rgba32f),
            write_pixel: Some(write_rgba32f),
        },
        Format::Rgba32Uint => &FormatInfo {
            tex_format: DxgiFormat::R32G32B32A32Uint,
            srv_format: DxgiFormat::R32G32B32A32Uint,
            rtv_format: DxgiFormat::R32G32B32A32Uint,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 16,
            component_count: 4,
            component_class: ComponentClass::Uint,
            srgb: false,
            conversion_required: false,
            requires_init: false,
            load: load_16bpp,
            read_pixel: None,
            write_pixel: None,
        },
        Format::Rgba32Sint => &FormatInfo {
            tex_format: DxgiFormat::R32G32B32A32Sint,
            srv_format: DxgiFormat::R32G32B32A32Sint,
            rtv_format: DxgiFormat::R32G32B32A32Sint,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 16,
            component_count: 4,
            component_class: ComponentClass::Int,
            srgb: false,
            conversion_required: false,
            requires_init: false,
            load: load_16bpp,
            read_pixel: None,
            write_pixel: None,
        },
        Format::Depth24Stencil8 => &FormatInfo {
            tex_format: DxgiFormat::D24UnormS8Uint,
            srv_format: DxgiFormat::Unknown,
            rtv_format: DxgiFormat::Unknown,
            dsv_format: DxgiFormat::D24UnormS8Uint,
            pixel_bytes: 4,
            component_count: 2,
            component_class: ComponentClass::Float,
            srgb: false,
            conversion_required: false,
            requires_init: false,
            load: load_4bpp,
            read_pixel: None,
            write_pixel: None,
        },
        Format::Bc1RgbaUnorm => &FormatInfo {
            tex_format: DxgiFormat::Bc1Unorm,
            srv_format: DxgiFormat::Bc1Unorm,
            rtv_format: DxgiFormat::Unknown,
            dsv_format: DxgiFormat::Unknown,
            pixel_bytes: 8,
            component_count: 4,
            component_class: ComponentClass::Float,
            srgb: false,
            conversion_required: false,
            requires_init: false,
            load: load_bc1,
            read_pixel: None,
            write_pixel: None,
        },
    }
}

/// Row pitch of client pixel data honoring the unpack alignment.
pub fn compute_row_pitch(format: Format, width: u32, alignment: u32) -> u32 {
    let info = format_info(format);
    let (block_w, _) = info.tex_format.block_dims();
    let unconverted_bytes = if info.conversion_required {
        // Client rows are tightly packed in the GL format's own width.
        info.component_count
    } else {
        info.pixel_bytes
    };
    let row = (width + block_w - 1) / block_w * unconverted_bytes;
    let align = alignment.max(1);
    (row + align - 1) / align * align
}

bitflags::bitflags! {
    /// Color channels a render target write is allowed to touch.
    pub struct ColorMask: u8 {
        const RED = 1;
        const GREEN = 2;
        const BLUE = 4;
        const ALPHA = 8;
        const ALL = Self::RED.bits | Self::GREEN.bits | Self::BLUE.bits | Self::ALPHA.bits;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
}

impl BlendFactor {
    pub fn references_constant_alpha(self) -> bool {
        matches!(self, Self::ConstantAlpha | Self::OneMinusConstantAlpha)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendDesc {
    pub blend_enabled: bool,
    pub src_rgb: BlendFactor,
    pub dst_rgb: BlendFactor,
    pub op_rgb: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub op_alpha: BlendOp,
    pub color_mask: ColorMask,
    pub sample_alpha_to_coverage: bool,
    pub dither: bool,
}

impl Default for BlendDesc {
    fn default() -> Self {
        Self {
            blend_enabled: false,
            src_rgb: BlendFactor::One,
            dst_rgb: BlendFactor::Zero,
            op_rgb: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            op_alpha: BlendOp::Add,
            color_mask: ColorMask::ALL,
            sample_alpha_to_coverage: false,
            dither: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterizerDesc {
    pub cull_mode: CullMode,
    pub front_face_ccw: bool,
    pub polygon_offset_fill: bool,
    pub polygon_offset_factor: f32,
    pub polygon_offset_units: f32,
    pub point_draw_mode: bool,
    pub multisample: bool,
    pub rasterizer_discard: bool,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_face_ccw: true,
            polygon_offset_fill: false,
            polygon_offset_factor: 0.0,
            polygon_offset_units: 0.0,
            point_draw_mode: false,
            multisample: false,
            rasterizer_discard: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    Increment,
    Decrement,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilFaceDesc {
    pub func: CompareFunc,
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
}

impl Default for StencilFaceDesc {
    fn default() -> Self {
        Self {
            func: CompareFunc::Always,
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_func: CompareFunc,
    pub depth_write: bool,
    pub stencil_test: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front: StencilFaceDesc,
    pub back: StencilFaceDesc,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_func: CompareFunc::Less,
            depth_write: true,
            stencil_test: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            front: StencilFaceDesc::default(),
            back: StencilFaceDesc::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mip_filter: Option<FilterMode>,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub wrap_r: WrapMode,
    pub min_lod: f32,
    pub max_lod: f32,
    pub base_level: u32,
    pub compare: Option<CompareFunc>,
    pub max_anisotropy: u8,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
            mip_filter: None,
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
            wrap_r: WrapMode::Repeat,
            min_lod: f32::MIN,
            max_lod: f32::MAX,
            base_level: 0,
            compare: None,
            max_anisotropy: 1,
        }
    }
}

/// GL draw modes as the frontend submits them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// Primitive topologies the device natively rasterizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    Undefined,
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn dxgi_format(self) -> DxgiFormat {
        match self {
            Self::U16 => DxgiFormat::R16Uint,
            Self::U32 => DxgiFormat::R32Uint,
        }
    }
}

/// Raw index data for a draw, either a client-memory slice or resolved
/// element-array-buffer bytes.
#[derive(Clone, Copy, Debug)]
pub enum IndexData<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
}

impl IndexData<'_> {
    pub fn len(&self) -> usize {
        match *self {
            Self::U8(s) => s.len(),
            Self::U16(s) => s.len(),
            Self::U32(s) => s.len(),
        }
    }

    pub fn get(&self, i: usize) -> u32 {
        match *self {
            Self::U8(s) => s[i] as u32,
            Self::U16(s) => s[i] as u32,
            Self::U32(s) => s[i],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Pixel,
}

/// GLSL-side type class of a vertex attribute, part of the input
/// layout cache key since HLSL register types must match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderElementType {
    None,
    Float,
    Int,
    Uint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapMode {
    Read,
    Write,
    ReadWrite,
    WriteDiscard,
    WriteNoOverwrite,
}

/// CPU access and usage flavor of a native allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NativeUsage {
    Default,
    Immutable,
    Dynamic,
    Staging,
}

bitflags::bitflags! {
    pub struct BindFlags: u32 {
        const VERTEX_BUFFER = 1;
        const INDEX_BUFFER = 2;
        const CONSTANT_BUFFER = 4;
        const SHADER_RESOURCE = 8;
        const STREAM_OUTPUT = 16;
        const RENDER_TARGET = 32;
        const DEPTH_STENCIL = 64;
    }
}

bitflags::bitflags! {
    pub struct CpuAccess: u32 {
        const READ = 1;
        const WRITE = 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelUnpackState {
    pub alignment: u32,
    pub row_length: u32,
}

impl Default for PixelUnpackState {
    fn default() -> Self {
        Self {
            alignment: 4,
            row_length: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_pitch_honors_alignment() {
        assert_eq!(compute_row_pitch(Format::R8Unorm, 3, 4), 4);
        assert_eq!(compute_row_pitch(Format::Rgba8Unorm, 3, 4), 12);
        assert_eq!(compute_row_pitch(Format::Rgb8Unorm, 2, 1), 6);
        assert_eq!(compute_row_pitch(Format::Rgb8Unorm, 2, 4), 8);
    }

    #[test]
    fn compressed_pitch_counts_blocks() {
        // 8x8 BC1 = 2 blocks per row, 8 bytes each.
        assert_eq!(compute_row_pitch(Format::Bc1RgbaUnorm, 8, 1), 16);
    }

    #[test]
    fn rgb8_loader_expands_alpha() {
        let input = [1u8, 2, 3, 4, 5, 6];
        let mut output = [0u8; 8];
        unsafe {
            load_rgb8_to_rgba8(2, 1, 1, input.as_ptr(), 6, 6, output.as_mut_ptr(), 8, 8);
        }
        assert_eq!(output, [1, 2, 3, 0xFF, 4, 5, 6, 0xFF]);
    }
}
