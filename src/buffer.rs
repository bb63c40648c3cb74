//! Logical buffers multiplexed over per-usage native allocations.
//!
//! GL exposes one buffer object that may serve as vertex data, index
//! data, a uniform block, or a pixel pack/unpack target. The device
//! wants distinct allocations with distinct bind flags for those roles,
//! so each logical buffer owns a lazily created backing store per usage
//! class and copies data between them on demand, tracking freshness
//! with per-store revision counters.

use crate::{
    types::{BindFlags, Box3, CpuAccess, DxgiFormat, Format, MapMode, NativeUsage},
    Api, BufferDescriptor, BufferViewDescriptor, Context, Device, DeviceError,
    Gpu,
};

use fxhash::FxHashMap;

use std::{num::NonZeroU64, sync::Arc};

pub type BufferRef<A> = Arc<parking_lot::Mutex<Buffer<A>>>;

/// GPU reads of a buffer that go by without a CPU read before the
/// cached resolved copy is dropped.
const RESOLVE_CACHE_USAGE_LIMIT: u32 = 5;

/// Role a backing store plays. One native allocation per class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// CPU-accessible scratch partner for every other class.
    Staging,
    VertexOrTransformFeedback,
    Index,
    /// Shader-readable source for GPU pixel unpack operations.
    PixelUnpack,
    /// Readback target of pixel pack operations, CPU bytes.
    PixelPack,
    Uniform,
}

impl BufferUsage {
    pub fn is_mappable(self) -> bool {
        matches!(self, Self::Staging | Self::PixelPack)
    }

    fn descriptor(self, size: u64) -> BufferDescriptor {
        let (usage, bind, cpu_access) = match self {
            Self::Staging => (
                NativeUsage::Staging,
                BindFlags::empty(),
                CpuAccess::READ | CpuAccess::WRITE,
            ),
            Self::VertexOrTransformFeedback => (
                NativeUsage::Default,
                BindFlags::VERTEX_BUFFER | BindFlags::STREAM_OUTPUT,
                CpuAccess::empty(),
            ),
            Self::Index => (
                NativeUsage::Default,
                BindFlags::INDEX_BUFFER,
                CpuAccess::empty(),
            ),
            Self::PixelUnpack => (
                NativeUsage::Default,
                BindFlags::SHADER_RESOURCE,
                CpuAccess::empty(),
            ),
            // Pack stores live in host memory; no native descriptor.
            Self::PixelPack => (NativeUsage::Staging, BindFlags::empty(), CpuAccess::READ),
            Self::Uniform => (
                NativeUsage::Dynamic,
                BindFlags::CONSTANT_BUFFER,
                CpuAccess::WRITE,
            ),
        };
        BufferDescriptor {
            size,
            usage,
            bind,
            cpu_access,
            structure_stride: 0,
        }
    }
}

/// Frontend hint carried from `glBufferData`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageHint {
    Static,
    Dynamic,
}

/// Parameters of a queued pack readback, resolved when the pack store
/// is next read.
#[derive(Clone, Copy, Debug)]
struct QueuedPack {
    dst_offset: u64,
    area: Box3,
    format: Format,
}

struct NativeStorage<A: Api> {
    buffer: A::Buffer,
    size: u64,
}

struct PackStorage<A: Api> {
    host: Vec<u8>,
    staging: Option<(A::Texture, Box3)>,
    queued: Option<QueuedPack>,
}

enum Kind<A: Api> {
    Native(NativeStorage<A>),
    Pack(PackStorage<A>),
}

/// One backing store: a native allocation (or host bytes for the pack
/// class) plus the revision of the logical contents it holds.
pub struct Storage<A: Api> {
    usage: BufferUsage,
    revision: u64,
    kind: Kind<A>,
}

impl<A: Api> Storage<A> {
    fn new_native(gpu: &Gpu<A>, usage: BufferUsage, size: u64) -> Result<Self, DeviceError> {
        let buffer = gpu
            .device
            .create_buffer(&usage.descriptor(size.max(1)), None)?;
        Ok(Self {
            usage,
            revision: 0,
            kind: Kind::Native(NativeStorage { buffer, size }),
        })
    }

    fn new_pack(size: u64) -> Self {
        Self {
            usage: BufferUsage::PixelPack,
            revision: 0,
            kind: Kind::Pack(PackStorage {
                host: vec![0; size as usize],
                staging: None,
                queued: None,
            }),
        }
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn size(&self) -> u64 {
        match &self.kind {
            Kind::Native(n) => n.size,
            Kind::Pack(p) => p.host.len() as u64,
        }
    }

    fn native(&self) -> &A::Buffer {
        match &self.kind {
            Kind::Native(n) => &n.buffer,
            Kind::Pack(_) => unreachable!("pack stores have no native buffer"),
        }
    }

    /// Grows the allocation to `size`, optionally carrying contents.
    fn resize(&mut self, gpu: &Gpu<A>, size: u64, preserve: bool) -> Result<(), DeviceError> {
        match &mut self.kind {
            Kind::Native(n) => {
                let fresh = gpu.device.create_buffer(&self.usage.descriptor(size), None)?;
                if preserve {
                    gpu.context
                        .copy_buffer(&fresh, 0, &n.buffer, 0, n.size.min(size));
                }
                n.buffer = fresh;
                n.size = size;
            }
            Kind::Pack(p) => {
                if !preserve {
                    p.host.clear();
                }
                p.host.resize(size as usize, 0);
            }
        }
        Ok(())
    }

    /// Copies mapped bytes out of a CPU-accessible store.
    fn read_into(&mut self, gpu: &Gpu<A>, offset: u64, out: &mut [u8]) -> Result<(), DeviceError> {
        match &mut self.kind {
            Kind::Native(n) => {
                let ptr = unsafe { gpu.context.map_buffer(&n.buffer, MapMode::Read)? };
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        ptr.as_ptr().add(offset as usize),
                        out.as_mut_ptr(),
                        out.len(),
                    );
                }
                gpu.context.unmap_buffer(&n.buffer);
                Ok(())
            }
            Kind::Pack(_) => {
                self.flush_queued_pack(gpu)?;
                let p = match &self.kind {
                    Kind::Pack(p) => p,
                    Kind::Native(_) => unreachable!(),
                };
                let start = offset as usize;
                out.copy_from_slice(&p.host[start..start + out.len()]);
                Ok(())
            }
        }
    }

    fn write_from(&mut self, gpu: &Gpu<A>, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        match &mut self.kind {
            Kind::Native(n) => {
                let ptr = unsafe { gpu.context.map_buffer(&n.buffer, MapMode::Write)? };
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        data.as_ptr(),
                        ptr.as_ptr().add(offset as usize),
                        data.len(),
                    );
                }
                gpu.context.unmap_buffer(&n.buffer);
                Ok(())
            }
            Kind::Pack(p) => {
                // A CPU write supersedes whatever readback was pending.
                p.queued = None;
                let start = offset as usize;
                p.host[start..start + data.len()].copy_from_slice(data);
                Ok(())
            }
        }
    }

    /// Resolves a pending pack readback into the host bytes.
    fn flush_queued_pack(&mut self, gpu: &Gpu<A>) -> Result<(), DeviceError> {
        let p = match &mut self.kind {
            Kind::Pack(p) => p,
            Kind::Native(_) => return Ok(()),
        };
        let queued = match p.queued.take() {
            Some(q) => q,
            None => return Ok(()),
        };
        let (staging, _) = match &p.staging {
            Some(s) => s,
            None => return Ok(()),
        };
        let info = crate::types::format_info(queued.format);
        let row_bytes = (queued.area.width * info.pixel_bytes) as usize;
        let mapped = unsafe { gpu.context.map_texture(staging, 0, MapMode::Read)? };
        for z in 0..queued.area.depth as usize {
            for y in 0..queued.area.height as usize {
                let src = unsafe {
                    mapped
                        .data
                        .as_ptr()
                        .add(z * mapped.depth_pitch as usize + y * mapped.row_pitch as usize)
                };
                let dst_start = queued.dst_offset as usize
                    + (z * queued.area.height as usize + y) * row_bytes;
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        src,
                        p.host[dst_start..dst_start + row_bytes].as_mut_ptr(),
                        row_bytes,
                    );
                }
            }
        }
        gpu.context.unmap_texture(staging, 0);
        Ok(())
    }

    /// Copies `size` bytes from `src` into this store. Callers route
    /// through the staging partner first when neither side is mappable
    /// compatible; by the time we get here one of the direct paths
    /// below must apply.
    fn copy_from_storage(
        &mut self,
        gpu: &Gpu<A>,
        src: &mut Storage<A>,
        src_offset: u64,
        size: u64,
        dst_offset: u64,
    ) -> Result<(), DeviceError> {
        match (&self.kind, &src.kind) {
            (Kind::Native(dst), Kind::Native(src_n)) => {
                gpu.context
                    .copy_buffer(&dst.buffer, dst_offset, &src_n.buffer, src_offset, size);
                Ok(())
            }
            (_, Kind::Pack(_)) => {
                debug_assert!(self.usage.is_mappable());
                let mut bytes = vec![0; size as usize];
                src.read_into(gpu, src_offset, &mut bytes)?;
                self.write_from(gpu, dst_offset, &bytes)
            }
            (Kind::Pack(_), Kind::Native(_)) => {
                debug_assert!(src.usage.is_mappable());
                let mut bytes = vec![0; size as usize];
                src.read_into(gpu, src_offset, &mut bytes)?;
                self.write_from(gpu, dst_offset, &bytes)
            }
        }
    }
}

/// The logical GL buffer object.
pub struct Buffer<A: Api> {
    serial: NonZeroU64,
    size: u64,
    usage_hint: UsageHint,
    storages: FxHashMap<BufferUsage, Storage<A>>,
    /// CPU copy of the freshest contents, kept until GPU reads crowd
    /// it out.
    resolved_data: Vec<u8>,
    resolved_revision: Option<u64>,
    read_usage_count: u32,
    typed_views: FxHashMap<DxgiFormat, (A::Buffer, A::ShaderResourceView)>,
}

impl<A: Api> Buffer<A> {
    pub fn new() -> Self {
        Self {
            serial: crate::next_serial(),
            size: 0,
            usage_hint: UsageHint::Static,
            storages: FxHashMap::default(),
            resolved_data: Vec::new(),
            resolved_revision: None,
            read_usage_count: 0,
            typed_views: FxHashMap::default(),
        }
    }

    pub fn new_ref() -> BufferRef<A> {
        Arc::new(parking_lot::Mutex::new(Self::new()))
    }

    pub fn serial(&self) -> NonZeroU64 {
        self.serial
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage_hint(&self) -> UsageHint {
        self.usage_hint
    }

    fn latest_revision(&self) -> u64 {
        self.storages.values().map(|s| s.revision).max().unwrap_or(0)
    }

    fn freshest_usage(&self) -> Option<BufferUsage> {
        self.storages
            .values()
            .max_by_key(|s| s.revision)
            .map(|s| s.usage)
    }

    /// Lazily creates the store for `usage`, sized to the logical size.
    fn ensure_storage(
        &mut self,
        gpu: &Gpu<A>,
        usage: BufferUsage,
    ) -> Result<&mut Storage<A>, DeviceError> {
        if !self.storages.contains_key(&usage) {
            let storage = if usage == BufferUsage::PixelPack {
                Storage::new_pack(self.size)
            } else {
                Storage::new_native(gpu, usage, self.size)?
            };
            self.storages.insert(usage, storage);
        }
        let size = self.size;
        let storage = self
            .storages
            .get_mut(&usage)
            .unwrap_or_else(|| unreachable!());
        if storage.size() < size {
            storage.resize(gpu, size, true)?;
        }
        Ok(storage)
    }

    /// Brings the store for `usage` up to the latest revision, copying
    /// from the freshest store if needed, and returns it.
    fn sync_storage(
        &mut self,
        gpu: &Gpu<A>,
        usage: BufferUsage,
    ) -> Result<&mut Storage<A>, DeviceError> {
        let latest = self.latest_revision();
        self.ensure_storage(gpu, usage)?;
        let stale = self.storages[&usage].revision < latest;
        if stale {
            let src_usage = self
                .freshest_usage()
                .unwrap_or_else(|| unreachable!("latest > 0 implies a storage"));
            if src_usage != usage {
                self.copy_between(gpu, src_usage, usage, 0, self.size, 0)?;
            }
            if let Some(s) = self.storages.get_mut(&usage) {
                s.revision = latest;
            }
        }
        Ok(self
            .storages
            .get_mut(&usage)
            .unwrap_or_else(|| unreachable!()))
    }

    /// Copies between two of our own stores, routing through the
    /// staging partner when neither side can be mapped.
    fn copy_between(
        &mut self,
        gpu: &Gpu<A>,
        src_usage: BufferUsage,
        dst_usage: BufferUsage,
        src_offset: u64,
        size: u64,
        dst_offset: u64,
    ) -> Result<(), DeviceError> {
        debug_assert_ne!(src_usage, dst_usage);
        if size == 0 {
            return Ok(());
        }
        let pack_involved =
            src_usage == BufferUsage::PixelPack || dst_usage == BufferUsage::PixelPack;
        let other_mappable = if src_usage == BufferUsage::PixelPack {
            dst_usage.is_mappable()
        } else {
            src_usage.is_mappable()
        };
        if pack_involved && !other_mappable {
            // Two hops via staging.
            if src_usage == BufferUsage::PixelPack {
                self.ensure_storage(gpu, BufferUsage::Staging)?;
                self.copy_between(gpu, src_usage, BufferUsage::Staging, src_offset, size, 0)?;
                self.copy_between(gpu, BufferUsage::Staging, dst_usage, 0, size, dst_offset)?;
            } else {
                self.sync_storage(gpu, BufferUsage::Staging)?;
                self.copy_between(
                    gpu,
                    BufferUsage::Staging,
                    dst_usage,
                    src_offset,
                    size,
                    dst_offset,
                )?;
            }
            return Ok(());
        }
        let mut dst = self
            .storages
            .remove(&dst_usage)
            .unwrap_or_else(|| unreachable!("destination store exists"));
        let src = self
            .storages
            .get_mut(&src_usage)
            .unwrap_or_else(|| unreachable!("source store exists"));
        let result = dst.copy_from_storage(gpu, src, src_offset, size, dst_offset);
        self.storages.insert(dst_usage, dst);
        result
    }

    /// Replaces the whole contents.
    pub fn set_data(
        &mut self,
        gpu: &Gpu<A>,
        data: &[u8],
        hint: UsageHint,
    ) -> Result<(), DeviceError> {
        self.usage_hint = hint;
        self.size = data.len() as u64;
        self.write_through_staging(gpu, 0, data, true)
    }

    /// Writes a byte range, growing the logical size if the range ends
    /// past it.
    pub fn set_sub_data(
        &mut self,
        gpu: &Gpu<A>,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let end = offset + data.len() as u64;
        if end > self.size {
            self.size = end;
        }
        let covers_all = offset == 0 && end >= self.size;
        self.write_through_staging(gpu, offset, data, covers_all)
    }

    fn write_through_staging(
        &mut self,
        gpu: &Gpu<A>,
        offset: u64,
        data: &[u8],
        covers_all: bool,
    ) -> Result<(), DeviceError> {
        let next = self.latest_revision() + 1;
        let staging = if covers_all {
            // Nothing worth carrying over.
            self.ensure_storage(gpu, BufferUsage::Staging)?
        } else {
            self.sync_storage(gpu, BufferUsage::Staging)?
        };
        if !data.is_empty() {
            staging.write_from(gpu, offset, data)?;
        }
        staging.revision = next;
        self.read_usage_count = 0;
        Ok(())
    }

    /// Reads the whole contents through the resolve cache.
    pub fn get_data(&mut self, gpu: &Gpu<A>) -> Result<&[u8], DeviceError> {
        let latest = self.latest_revision();
        if self.resolved_revision != Some(latest) || self.resolved_data.len() != self.size as usize
        {
            let size = self.size;
            let staging = self.sync_storage(gpu, BufferUsage::Staging)?;
            let mut bytes = vec![0; size as usize];
            staging.read_into(gpu, 0, &mut bytes)?;
            self.resolved_data = bytes;
            self.resolved_revision = Some(latest);
        }
        self.read_usage_count = 0;
        Ok(&self.resolved_data)
    }

    /// Backing store for a GPU usage, synced to the latest contents.
    ///
    /// Each call counts as a GPU read; once enough reads go by without
    /// a CPU read the resolve cache is released.
    pub fn get_native_buffer(
        &mut self,
        gpu: &Gpu<A>,
        usage: BufferUsage,
    ) -> Result<A::Buffer, DeviceError> {
        debug_assert!(!usage.is_mappable(), "GPU roles use native stores");
        self.mark_gpu_usage();
        let storage = self.sync_storage(gpu, usage)?;
        Ok(storage.native().clone())
    }

    fn mark_gpu_usage(&mut self) {
        self.read_usage_count += 1;
        if self.read_usage_count > RESOLVE_CACHE_USAGE_LIMIT && !self.resolved_data.is_empty() {
            self.resolved_data = Vec::new();
            self.resolved_revision = None;
        }
    }

    #[cfg(test)]
    fn has_resolved_data(&self) -> bool {
        !self.resolved_data.is_empty()
    }

    /// Shader-resource view of the pixel-unpack store, reinterpreted
    /// as `format`. Views are cached per format and recreated when the
    /// underlying allocation was replaced by a grow.
    pub fn get_typed_view(
        &mut self,
        gpu: &Gpu<A>,
        format: DxgiFormat,
    ) -> Result<A::ShaderResourceView, DeviceError> {
        self.mark_gpu_usage();
        let storage = self.sync_storage(gpu, BufferUsage::PixelUnpack)?;
        let buffer = storage.native().clone();
        if let Some((cached_buffer, view)) = self.typed_views.get(&format) {
            if *cached_buffer == buffer {
                return Ok(view.clone());
            }
        }
        let element_bytes = format.element_bytes();
        debug_assert_ne!(element_bytes, 0);
        let view = gpu.device.create_buffer_view(
            &buffer,
            &BufferViewDescriptor {
                format,
                first_element: 0,
                element_count: (self.size / element_bytes as u64) as u32,
            },
        )?;
        self.typed_views.insert(format, (buffer, view.clone()));
        Ok(view)
    }

    /// Copies a range from another logical buffer.
    pub fn copy_from(
        &mut self,
        gpu: &Gpu<A>,
        source: &mut Buffer<A>,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), DeviceError> {
        if size == 0 {
            return Ok(());
        }
        let end = dst_offset + size;
        if end > self.size {
            self.size = end;
        }
        let next = self.latest_revision() + 1;

        let mut dst_usage = self
            .freshest_usage()
            .unwrap_or(BufferUsage::Staging);
        let mut src_usage = source.freshest_usage().unwrap_or(BufferUsage::Staging);
        // Pack stores can only exchange data with a mappable partner.
        if dst_usage == BufferUsage::PixelPack && !src_usage.is_mappable() {
            src_usage = BufferUsage::Staging;
        } else if src_usage == BufferUsage::PixelPack && !dst_usage.is_mappable() {
            dst_usage = BufferUsage::Staging;
        }

        let src = source.sync_storage(gpu, src_usage)?;
        let dst = self.sync_storage(gpu, dst_usage)?;
        dst.copy_from_storage(gpu, src, src_offset, size, dst_offset)?;
        dst.revision = next;
        self.read_usage_count = 0;
        Ok(())
    }

    /// Copies a range within this buffer. When source and destination
    /// would land in the same store, the source is substituted: the
    /// vertex store when the shared store was staging, otherwise the
    /// staging store.
    pub fn copy_within(
        &mut self,
        gpu: &Gpu<A>,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), DeviceError> {
        if size == 0 {
            return Ok(());
        }
        let end = dst_offset + size;
        if end > self.size {
            self.size = end;
        }
        let next = self.latest_revision() + 1;

        let dst_usage = self.freshest_usage().unwrap_or(BufferUsage::Staging);
        let src_usage = if dst_usage == BufferUsage::Staging {
            BufferUsage::VertexOrTransformFeedback
        } else {
            BufferUsage::Staging
        };
        self.sync_storage(gpu, src_usage)?;
        self.sync_storage(gpu, dst_usage)?;
        self.copy_between(gpu, src_usage, dst_usage, src_offset, size, dst_offset)?;
        if let Some(dst) = self.storages.get_mut(&dst_usage) {
            dst.revision = next;
        }
        self.read_usage_count = 0;
        Ok(())
    }

    /// Queues a readback of a texture region into the pack store.
    pub fn pack_pixels(
        &mut self,
        gpu: &Gpu<A>,
        src: &A::Texture,
        src_subresource: u32,
        area: Box3,
        format: Format,
        dst_offset: u64,
    ) -> Result<(), DeviceError> {
        let next = self.latest_revision() + 1;
        let info = crate::types::format_info(format);
        self.ensure_storage(gpu, BufferUsage::PixelPack)?;
        let storage = self
            .storages
            .get_mut(&BufferUsage::PixelPack)
            .unwrap_or_else(|| unreachable!());
        storage.flush_queued_pack(gpu)?;
        let p = match &mut storage.kind {
            Kind::Pack(p) => p,
            Kind::Native(_) => unreachable!(),
        };
        let needs_staging = match &p.staging {
            Some((_, have)) => have.width < area.width || have.height < area.height,
            None => true,
        };
        if needs_staging {
            let texture = gpu.device.create_texture(&crate::TextureDescriptor {
                extent: crate::types::Extent::new(area.width, area.height, area.depth.max(1)),
                mip_levels: 1,
                array_layers: 1,
                samples: 1,
                format: info.tex_format,
                dimension: crate::TextureDimension::D2,
                usage: NativeUsage::Staging,
                bind: BindFlags::empty(),
                cpu_access: CpuAccess::READ,
            })?;
            p.staging = Some((texture, area));
        }
        let (staging, _) = p.staging.as_ref().unwrap_or_else(|| unreachable!());
        gpu.context.copy_texture_region(
            staging,
            0,
            crate::types::Origin::default(),
            src,
            src_subresource,
            area,
        );
        p.queued = Some(QueuedPack {
            dst_offset,
            area,
            format,
        });
        storage.revision = next;
        self.read_usage_count = 0;
        Ok(())
    }

    /// Drops every native allocation; contents survive only in the
    /// resolve cache. Used when tearing the device down.
    pub fn release_native_storages(&mut self) {
        self.storages.clear();
        self.typed_views.clear();
    }
}

impl<A: Api> Default for Buffer<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::{Null, NullDevice};

    fn gpu() -> Gpu<Null> {
        crate::null::gpu()
    }

    #[test]
    fn revisions_move_forward_across_stores() {
        let gpu = gpu();
        let mut buf = Buffer::<Null>::new();
        buf.set_data(&gpu, &[1, 2, 3, 4], UsageHint::Static).unwrap();
        let r1 = buf.latest_revision();
        buf.get_native_buffer(&gpu, BufferUsage::Index).unwrap();
        assert_eq!(buf.latest_revision(), r1, "reads do not advance revisions");
        buf.set_sub_data(&gpu, 0, &[9]).unwrap();
        assert!(buf.latest_revision() > r1);
    }

    #[test]
    fn stale_store_is_refreshed_before_gpu_use() {
        let gpu = gpu();
        let mut buf = Buffer::<Null>::new();
        buf.set_data(&gpu, &[1, 2, 3, 4], UsageHint::Static).unwrap();
        let vertex = buf
            .get_native_buffer(&gpu, BufferUsage::VertexOrTransformFeedback)
            .unwrap();
        assert_eq!(NullDevice::buffer_bytes(&vertex), vec![1, 2, 3, 4]);
        buf.set_sub_data(&gpu, 2, &[7, 8]).unwrap();
        let vertex = buf
            .get_native_buffer(&gpu, BufferUsage::VertexOrTransformFeedback)
            .unwrap();
        assert_eq!(NullDevice::buffer_bytes(&vertex), vec![1, 2, 7, 8]);
    }

    #[test]
    fn resolve_cache_released_after_repeated_gpu_reads() {
        let gpu = gpu();
        let mut buf = Buffer::<Null>::new();
        buf.set_data(&gpu, &[5; 16], UsageHint::Dynamic).unwrap();
        assert_eq!(buf.get_data(&gpu).unwrap(), &[5; 16]);
        assert!(buf.has_resolved_data());
        for _ in 0..RESOLVE_CACHE_USAGE_LIMIT {
            buf.get_native_buffer(&gpu, BufferUsage::Index).unwrap();
            assert!(buf.has_resolved_data());
        }
        buf.get_native_buffer(&gpu, BufferUsage::Index).unwrap();
        assert!(!buf.has_resolved_data());
    }

    #[test]
    fn growth_preserves_prefix_on_offset_write() {
        let gpu = gpu();
        let mut buf = Buffer::<Null>::new();
        buf.set_data(&gpu, &[1, 2, 3, 4], UsageHint::Static).unwrap();
        buf.set_sub_data(&gpu, 4, &[5, 6]).unwrap();
        assert_eq!(buf.size(), 6);
        assert_eq!(buf.get_data(&gpu).unwrap(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn offset_write_rebuilds_staging_from_vertex_store() {
        let gpu = gpu();
        let mut buf = Buffer::<Null>::new();
        let first_half = [1u8; 32];
        let second_half = [2u8; 32];
        let mut initial = [0u8; 64];
        initial[..32].copy_from_slice(&first_half);
        buf.set_data(&gpu, &initial, UsageHint::Static).unwrap();
        buf.get_native_buffer(&gpu, BufferUsage::VertexOrTransformFeedback)
            .unwrap();
        // Leave the vertex store as the only one holding the data.
        buf.storages.remove(&BufferUsage::Staging);

        buf.set_sub_data(&gpu, 32, &second_half).unwrap();
        assert_eq!(buf.size(), 64);
        assert!(buf.storages.contains_key(&BufferUsage::Staging));
        let data = buf.get_data(&gpu).unwrap();
        assert_eq!(&data[..32], &first_half);
        assert_eq!(&data[32..], &second_half);
    }

    #[test]
    fn copy_between_logical_buffers() {
        let gpu = gpu();
        let mut a = Buffer::<Null>::new();
        let mut b = Buffer::<Null>::new();
        a.set_data(&gpu, &[1, 2, 3, 4, 5, 6], UsageHint::Static).unwrap();
        b.set_data(&gpu, &[0; 4], UsageHint::Static).unwrap();
        b.copy_from(&gpu, &mut a, 2, 1, 3).unwrap();
        assert_eq!(b.get_data(&gpu).unwrap(), &[0, 3, 4, 5]);
    }

    #[test]
    fn self_copy_substitutes_a_second_store() {
        let gpu = gpu();
        let mut buf = Buffer::<Null>::new();
        buf.set_data(&gpu, &[1, 2, 3, 4, 5, 6, 7, 8], UsageHint::Static)
            .unwrap();
        // Freshest store is staging, so the source becomes the vertex
        // store and the overlapping ranges never share an allocation.
        buf.copy_within(&gpu, 0, 4, 4).unwrap();
        assert_eq!(buf.get_data(&gpu).unwrap(), &[1, 2, 3, 4, 1, 2, 3, 4]);
        assert!(buf
            .storages
            .contains_key(&BufferUsage::VertexOrTransformFeedback));
    }

    #[test]
    fn typed_view_recreated_after_growth() {
        let gpu = gpu();
        let mut buf = Buffer::<Null>::new();
        buf.set_data(&gpu, &[0; 16], UsageHint::Static).unwrap();
        let v1 = buf.get_typed_view(&gpu, DxgiFormat::R32Float).unwrap();
        let v2 = buf.get_typed_view(&gpu, DxgiFormat::R32Float).unwrap();
        assert_eq!(v1, v2);
        buf.set_sub_data(&gpu, 16, &[0; 16]).unwrap();
        let v3 = buf.get_typed_view(&gpu, DxgiFormat::R32Float).unwrap();
        assert_ne!(v1, v3);
    }

    #[test]
    fn creation_failure_surfaces_as_out_of_memory() {
        let gpu = gpu();
        let mut buf = Buffer::<Null>::new();
        buf.set_data(&gpu, &[1, 2, 3, 4], UsageHint::Static).unwrap();
        gpu.device.fail_next_creation();
        let err = buf.get_native_buffer(&gpu, BufferUsage::Index);
        assert_eq!(err.unwrap_err(), DeviceError::OutOfMemory);
        // The buffer stays usable.
        assert!(buf.get_native_buffer(&gpu, BufferUsage::Index).is_ok());
    }

    #[test]
    fn pack_readback_resolves_through_get_data() {
        let gpu = gpu();
        let rt = crate::null::test_render_target(&gpu, Format::Rgba8Unorm, 2, 2, &[1, 2, 3, 4]);
        let mut buf = Buffer::<Null>::new();
        buf.set_data(&gpu, &[0; 16], UsageHint::Dynamic).unwrap();
        buf.pack_pixels(
            &gpu,
            &rt.texture,
            rt.subresource,
            Box3::from_extent(crate::types::Extent::new(2, 2, 1)),
            Format::Rgba8Unorm,
            0,
        )
        .unwrap();
        // The readback is queued; get_data forces the resolve.
        assert_eq!(buf.get_data(&gpu).unwrap(), &[1, 2, 3, 4].repeat(4)[..]);
    }

    #[test]
    fn packed_bytes_route_to_an_unmappable_store() {
        let gpu = gpu();
        let rt = crate::null::test_render_target(&gpu, Format::Rgba8Unorm, 2, 2, &[1, 2, 3, 4]);
        let mut buf = Buffer::<Null>::new();
        buf.set_data(&gpu, &[0; 16], UsageHint::Static).unwrap();
        buf.pack_pixels(
            &gpu,
            &rt.texture,
            rt.subresource,
            Box3::from_extent(crate::types::Extent::new(2, 2, 1)),
            Format::Rgba8Unorm,
            0,
        )
        .unwrap();
        // The index store cannot be mapped; the copy hops through the
        // staging partner.
        let native = buf.get_native_buffer(&gpu, BufferUsage::Index).unwrap();
        assert_eq!(NullDevice::buffer_bytes(&native), [1, 2, 3, 4].repeat(4));
    }
}
