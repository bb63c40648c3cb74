//! Staging images and their texture storages.
//!
//! A staging image holds one subresource's worth of texel data in a
//! CPU-mappable texture. Once its contents are flushed into a texture
//! storage it can hand ownership of the bytes to the storage and drop
//! the staging allocation, keeping only a back-reference so the data
//! can be recovered if the CPU touches the image again. An image
//! either has a staging texture or an association, never both, and a
//! storage subresource is associated with at most one image.
//!
//! Recovering evicted data costs a GPU-to-CPU round trip, so after two
//! recoveries the staging texture is kept for good.

use crate::{
    types::{
        format_info, Box3, CpuAccess, DxgiFormat, Extent, Format, MapMode, NativeUsage, Origin,
        PixelUnpackState,
    },
    Api, Context, Device, DeviceError, Gpu, MappedSubresource, RenderTarget, TextureDescriptor,
    TextureDimension,
};

use std::{
    num::NonZeroU64,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

const STORAGE_RECOVERY_LIMIT: u32 = 2;

pub type ImageRef<A> = Arc<Mutex<Image<A>>>;
pub type StorageRef<A> = Arc<Mutex<TextureStorage<A>>>;

struct Association<A: Api> {
    storage: Weak<Mutex<TextureStorage<A>>>,
    storage_serial: NonZeroU64,
    subresource: usize,
}

pub struct Image<A: Api> {
    serial: NonZeroU64,
    format: Format,
    extent: Extent,
    dimension: TextureDimension,
    staging: Option<A::Texture>,
    dirty: bool,
    assoc: Option<Association<A>>,
    recovered: u32,
}

/// The persistent GPU texture a set of images flushes into, with the
/// table of images currently storing their data here.
pub struct TextureStorage<A: Api> {
    serial: NonZeroU64,
    format: Format,
    extent: Extent,
    mip_levels: u32,
    array_layers: u32,
    dimension: TextureDimension,
    texture: Option<A::Texture>,
    associated: Vec<Option<(NonZeroU64, Weak<Mutex<Image<A>>>)>>,
}

impl<A: Api> TextureStorage<A> {
    pub fn new(
        format: Format,
        extent: Extent,
        mip_levels: u32,
        array_layers: u32,
        dimension: TextureDimension,
    ) -> StorageRef<A> {
        Arc::new(Mutex::new(Self {
            serial: crate::next_serial(),
            format,
            extent,
            mip_levels,
            array_layers,
            dimension,
            texture: None,
            associated: (0..(mip_levels * array_layers) as usize)
                .map(|_| None)
                .collect(),
        }))
    }

    pub fn serial(&self) -> NonZeroU64 {
        self.serial
    }

    fn descriptor(&self) -> TextureDescriptor {
        let info = format_info(self.format);
        let mut bind = crate::types::BindFlags::empty();
        if info.srv_format != DxgiFormat::Unknown {
            bind |= crate::types::BindFlags::SHADER_RESOURCE;
        }
        if info.rtv_format != DxgiFormat::Unknown {
            bind |= crate::types::BindFlags::RENDER_TARGET;
        }
        if info.dsv_format != DxgiFormat::Unknown {
            bind |= crate::types::BindFlags::DEPTH_STENCIL;
        }
        TextureDescriptor {
            extent: self.extent,
            mip_levels: self.mip_levels,
            array_layers: self.array_layers,
            samples: 1,
            format: info.tex_format,
            dimension: self.dimension,
            usage: NativeUsage::Default,
            bind,
            cpu_access: CpuAccess::empty(),
        }
    }

    /// The device texture, created on first use.
    pub fn native_texture(&mut self, gpu: &Gpu<A>) -> Result<A::Texture, DeviceError> {
        if self.texture.is_none() {
            self.texture = Some(gpu.device.create_texture(&self.descriptor())?);
        }
        Ok(self.texture.clone().unwrap_or_else(|| unreachable!()))
    }

    fn mip_extent(&self, subresource: usize) -> Extent {
        let mip = subresource as u32 % self.mip_levels;
        Extent::new(
            (self.extent.width >> mip).max(1),
            (self.extent.height >> mip).max(1),
            (self.extent.depth >> mip).max(1),
        )
    }

    /// Evicts whichever image currently stores its data in
    /// `subresource`, forcing it to recover first. `except` skips the
    /// image that is about to take the slot over.
    pub fn release_associated_image(
        this: &StorageRef<A>,
        gpu: &Gpu<A>,
        subresource: usize,
        except: Option<NonZeroU64>,
    ) -> Result<(), DeviceError> {
        let evictee = {
            let storage = this.lock();
            match storage.associated.get(subresource) {
                Some(Some((serial, weak))) if except != Some(*serial) => weak.upgrade(),
                _ => None,
            }
        };
        if let Some(image) = evictee {
            Image::recover_from_associated_storage(&image, gpu)?;
        }
        Ok(())
    }

    /// Contract check: `subresource` must currently be associated with
    /// the given image.
    pub fn verify_associated_image(&self, subresource: usize, image_serial: NonZeroU64) {
        let entry = self.associated.get(subresource).and_then(|e| e.as_ref());
        assert!(
            matches!(entry, Some((serial, _)) if *serial == image_serial),
            "storage subresource is associated with a different image"
        );
    }

    fn disassociate_image(&mut self, subresource: usize, image_serial: NonZeroU64) {
        if let Some(entry) = self.associated.get_mut(subresource) {
            if matches!(entry, Some((serial, _)) if *serial == image_serial) {
                *entry = None;
            }
        }
    }

    /// Drops the device texture after forcing every associated image
    /// to pull its data back out.
    pub fn release_native_texture(this: &StorageRef<A>, gpu: &Gpu<A>) -> Result<(), DeviceError> {
        let count = this.lock().associated.len();
        for subresource in 0..count {
            Self::release_associated_image(this, gpu, subresource, None)?;
        }
        this.lock().texture = None;
        Ok(())
    }
}

impl<A: Api> Image<A> {
    pub fn new(format: Format, extent: Extent, dimension: TextureDimension) -> ImageRef<A> {
        Arc::new(Mutex::new(Self {
            serial: crate::next_serial(),
            format,
            extent,
            dimension,
            staging: None,
            dirty: format_info(format).requires_init,
            assoc: None,
            recovered: 0,
        }))
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[cfg(test)]
    fn has_staging(&self) -> bool {
        self.staging.is_some()
    }

    #[cfg(test)]
    fn is_associated(&self) -> bool {
        self.assoc.is_some()
    }

    /// Changes target, format or size. A no-op when nothing changes
    /// (unless `force_release` insists); otherwise any association or
    /// staging allocation is released and the recovery counter starts
    /// over.
    pub fn redefine(
        &mut self,
        dimension: TextureDimension,
        format: Format,
        extent: Extent,
        force_release: bool,
    ) {
        if !force_release
            && self.dimension == dimension
            && self.format == format
            && self.extent == extent
        {
            return;
        }
        self.clear_association();
        self.staging = None;
        self.recovered = 0;
        self.dimension = dimension;
        self.format = format;
        self.extent = extent;
        self.dirty = format_info(format).requires_init;
    }

    fn clear_association(&mut self) {
        if let Some(assoc) = self.assoc.take() {
            if let Some(storage) = assoc.storage.upgrade() {
                storage
                    .lock()
                    .disassociate_image(assoc.subresource, self.serial);
            }
        }
    }

    fn staging_descriptor(&self) -> TextureDescriptor {
        TextureDescriptor {
            extent: self.extent,
            mip_levels: 1,
            array_layers: 1,
            samples: 1,
            format: format_info(self.format).tex_format,
            dimension: self.dimension,
            usage: NativeUsage::Staging,
            bind: crate::types::BindFlags::empty(),
            cpu_access: CpuAccess::READ | CpuAccess::WRITE,
        }
    }

    fn ensure_staging(&mut self, gpu: &Gpu<A>) -> Result<A::Texture, DeviceError> {
        if self.staging.is_none() {
            self.staging = Some(gpu.device.create_texture(&self.staging_descriptor())?);
        }
        Ok(self.staging.clone().unwrap_or_else(|| unreachable!()))
    }

    /// Flushes a `region` of the staging contents into `subresource`
    /// of `storage`.
    ///
    /// While the recovery budget lasts, the staging texture is released
    /// afterwards and the storage becomes the sole holder of the data.
    pub fn copy_to_storage(
        this: &ImageRef<A>,
        gpu: &Gpu<A>,
        storage: &StorageRef<A>,
        subresource: usize,
        region: Box3,
    ) -> Result<(), DeviceError> {
        let (image_serial, release_staging) = {
            let image = this.lock();
            (image.serial, image.recovered < STORAGE_RECOVERY_LIMIT)
        };
        if release_staging {
            TextureStorage::release_associated_image(storage, gpu, subresource, Some(image_serial))?;
        }

        let staging = this.lock().ensure_staging(gpu)?;
        let texture = {
            let mut storage = storage.lock();
            let mip = storage.mip_extent(subresource);
            debug_assert!(
                region.x + region.width <= mip.width
                    && region.y + region.height <= mip.height
                    && region.z + region.depth <= mip.depth,
                "copy region exceeds the target subresource"
            );
            storage.native_texture(gpu)?
        };
        gpu.context.copy_texture_region(
            &texture,
            subresource as u32,
            Origin {
                x: region.x,
                y: region.y,
                z: region.z,
            },
            &staging,
            0,
            region,
        );

        this.lock().dirty = false;
        if release_staging {
            let previous = {
                let mut image = this.lock();
                image.staging = None;
                image.assoc.take()
            };
            if let Some(prev) = previous {
                if let Some(s) = prev.storage.upgrade() {
                    s.lock().disassociate_image(prev.subresource, image_serial);
                }
            }
            let storage_serial = {
                let mut storage_guard = storage.lock();
                storage_guard.associated[subresource] = Some((image_serial, Arc::downgrade(this)));
                storage_guard.serial
            };
            this.lock().assoc = Some(Association {
                storage: Arc::downgrade(storage),
                storage_serial,
                subresource,
            });
        }
        Ok(())
    }

    /// Pulls the data back out of the associated storage into a fresh
    /// staging texture and severs the association on both sides.
    pub fn recover_from_associated_storage(
        this: &ImageRef<A>,
        gpu: &Gpu<A>,
    ) -> Result<(), DeviceError> {
        let assoc = {
            let image = this.lock();
            match &image.assoc {
                Some(a) => (a.storage.clone(), a.storage_serial, a.subresource, image.serial),
                None => return Ok(()),
            }
        };
        let (weak_storage, storage_serial, subresource, image_serial) = assoc;
        let storage = match weak_storage.upgrade() {
            Some(s) => s,
            None => {
                // The storage died with our data; nothing to recover.
                this.lock().assoc = None;
                return Ok(());
            }
        };

        let texture = {
            let storage_guard = storage.lock();
            assert_eq!(storage_guard.serial, storage_serial);
            storage_guard.verify_associated_image(subresource, image_serial);
            storage_guard
                .texture
                .clone()
                .unwrap_or_else(|| unreachable!("associated storage has a texture"))
        };

        // The staging texture is image-sized; read back just that much.
        let region = Box3::from_extent(this.lock().extent);

        let staging = this.lock().ensure_staging(gpu)?;
        gpu.context.copy_texture_region(
            &staging,
            0,
            Origin::default(),
            &texture,
            subresource as u32,
            region,
        );

        storage.lock().disassociate_image(subresource, image_serial);
        let mut image = this.lock();
        image.assoc = None;
        image.recovered += 1;
        Ok(())
    }

    /// Maps the staging texture for CPU access, recovering evicted
    /// data first. Loss-classified failures go to the loss sink.
    pub fn map(
        this: &ImageRef<A>,
        gpu: &Gpu<A>,
        mode: MapMode,
    ) -> Result<MappedSubresource, DeviceError> {
        Self::recover_from_associated_storage(this, gpu)?;
        let staging = this.lock().ensure_staging(gpu)?;
        let mapped = unsafe { gpu.context.map_texture(&staging, 0, mode) };
        match mapped {
            Ok(m) => {
                this.lock().dirty = true;
                Ok(m)
            }
            Err(DeviceError::Lost) => {
                gpu.mark_lost();
                gpu.notify_loss();
                Err(DeviceError::Lost)
            }
            Err(e) => Err(e),
        }
    }

    pub fn unmap(this: &ImageRef<A>, gpu: &Gpu<A>) {
        let staging = this.lock().staging.clone();
        if let Some(staging) = staging {
            gpu.context.unmap_texture(&staging, 0);
        }
    }

    /// Writes client pixel data into a region of the image.
    pub fn load_data(
        this: &ImageRef<A>,
        gpu: &Gpu<A>,
        region: Box3,
        unpack: &PixelUnpackState,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let (format, extent) = {
            let image = this.lock();
            (image.format, image.extent)
        };
        debug_assert!(region.x + region.width <= extent.width);
        debug_assert!(region.y + region.height <= extent.height);

        let info = format_info(format);
        let width_for_pitch = if unpack.row_length != 0 {
            unpack.row_length
        } else {
            region.width
        };
        let input_row_pitch = crate::types::compute_row_pitch(format, width_for_pitch, unpack.alignment);
        let input_depth_pitch = input_row_pitch * region.height;

        let mapped = Self::map(this, gpu, MapMode::Write)?;
        let dst = unsafe {
            mapped
                .data
                .as_ptr()
                .add(region.z as usize * mapped.depth_pitch as usize
                    + region.y as usize * mapped.row_pitch as usize
                    + region.x as usize * info.pixel_bytes as usize)
        };
        unsafe {
            (info.load)(
                region.width,
                region.height,
                region.depth.max(1),
                data.as_ptr(),
                input_row_pitch,
                input_depth_pitch,
                dst,
                mapped.row_pitch,
                mapped.depth_pitch,
            );
        }
        Self::unmap(this, gpu);
        Ok(())
    }

    /// Writes block-compressed client data; offsets and sizes are in
    /// pixels and must be block aligned.
    pub fn load_compressed_data(
        this: &ImageRef<A>,
        gpu: &Gpu<A>,
        region: Box3,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let format = this.lock().format;
        let info = format_info(format);
        let (block_w, block_h) = info.tex_format.block_dims();
        debug_assert_eq!(region.x % block_w, 0);
        debug_assert_eq!(region.y % block_h, 0);

        let blocks_wide = (region.width + block_w - 1) / block_w;
        let blocks_high = (region.height + block_h - 1) / block_h;
        let input_row_pitch = blocks_wide * info.tex_format.element_bytes();
        let input_depth_pitch = input_row_pitch * blocks_high;

        let mapped = Self::map(this, gpu, MapMode::Write)?;
        let dst = unsafe {
            mapped
                .data
                .as_ptr()
                .add(region.z as usize * mapped.depth_pitch as usize
                    + (region.y / block_h) as usize * mapped.row_pitch as usize
                    + (region.x / block_w) as usize * info.tex_format.element_bytes() as usize)
        };
        unsafe {
            (info.load)(
                blocks_wide,
                blocks_high,
                region.depth.max(1),
                data.as_ptr(),
                input_row_pitch,
                input_depth_pitch,
                dst,
                mapped.row_pitch,
                mapped.depth_pitch,
            );
        }
        Self::unmap(this, gpu);
        Ok(())
    }

    /// Copies a render-target region into the image. Same-format
    /// sources take a GPU copy (resolving multisample sources first);
    /// everything else falls back to read-back-and-convert.
    pub fn copy_from_render_target(
        this: &ImageRef<A>,
        gpu: &Gpu<A>,
        source: &RenderTarget<A>,
        src_box: Box3,
        dst_origin: Origin,
    ) -> Result<(), DeviceError> {
        Self::recover_from_associated_storage(this, gpu)?;
        let (format, image_dxgi) = {
            let image = this.lock();
            (image.format, format_info(image.format).tex_format)
        };
        let staging = this.lock().ensure_staging(gpu)?;

        if image_dxgi == source.dxgi_format {
            let (src_texture, src_subresource) = if source.samples > 1 {
                let resolved = gpu.device.create_texture(&TextureDescriptor {
                    extent: source.extent,
                    mip_levels: 1,
                    array_layers: 1,
                    samples: 1,
                    format: source.dxgi_format,
                    dimension: TextureDimension::D2,
                    usage: NativeUsage::Default,
                    bind: crate::types::BindFlags::empty(),
                    cpu_access: CpuAccess::empty(),
                })?;
                gpu.context.resolve_texture(
                    &resolved,
                    0,
                    &source.texture,
                    source.subresource,
                    source.dxgi_format,
                );
                (resolved, 0)
            } else {
                (source.texture.clone(), source.subresource)
            };
            gpu.context.copy_texture_region(
                &staging,
                0,
                dst_origin,
                &src_texture,
                src_subresource,
                src_box,
            );
            this.lock().dirty = true;
            return Ok(());
        }

        // Format conversion: read the source back and convert texel by
        // texel through an RGBA f32 intermediate.
        let src_info = format_info(source.format);
        let dst_info = format_info(format);
        let (read, write) = match (src_info.read_pixel, dst_info.write_pixel) {
            (Some(r), Some(w)) => (r, w),
            _ => {
                log::warn!(
                    "no conversion path from {:?} to {:?}, copy skipped",
                    source.format,
                    format
                );
                return Ok(());
            }
        };

        let readback = gpu.device.create_texture(&TextureDescriptor {
            extent: source.extent,
            mip_levels: 1,
            array_layers: 1,
            samples: 1,
            format: source.dxgi_format,
            dimension: TextureDimension::D2,
            usage: NativeUsage::Staging,
            bind: crate::types::BindFlags::empty(),
            cpu_access: CpuAccess::READ,
        })?;
        gpu.context.copy_texture_region(
            &readback,
            0,
            Origin::default(),
            &source.texture,
            source.subresource,
            src_box,
        );

        let src_mapped = unsafe { gpu.context.map_texture(&readback, 0, MapMode::Read)? };
        let dst_mapped = Self::map(this, gpu, MapMode::Write)?;
        let src_bytes = src_info.pixel_bytes as usize;
        let dst_bytes = dst_info.pixel_bytes as usize;
        for y in 0..src_box.height as usize {
            for x in 0..src_box.width as usize {
                unsafe {
                    let src = src_mapped
                        .data
                        .as_ptr()
                        .add(y * src_mapped.row_pitch as usize + x * src_bytes);
                    let dst = dst_mapped.data.as_ptr().add(
                        (dst_origin.y as usize + y) * dst_mapped.row_pitch as usize
                            + (dst_origin.x as usize + x) * dst_bytes,
                    );
                    let color = read(std::slice::from_raw_parts(src, src_bytes));
                    write(color, std::slice::from_raw_parts_mut(dst, dst_bytes));
                }
            }
        }
        Self::unmap(this, gpu);
        gpu.context.unmap_texture(&readback, 0);
        Ok(())
    }
}

impl<A: Api> Drop for Image<A> {
    fn drop(&mut self) {
        self.clear_association();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::Null;

    fn gpu() -> Gpu<Null> {
        crate::null::gpu()
    }

    fn image(gpu: &Gpu<Null>, w: u32, h: u32) -> ImageRef<Null> {
        let img = Image::new(Format::Rgba8Unorm, Extent::new(w, h, 1), TextureDimension::D2);
        // Give it defined contents.
        let data = vec![7u8; (w * h * 4) as usize];
        Image::load_data(
            &img,
            gpu,
            Box3 {
                x: 0,
                y: 0,
                z: 0,
                width: w,
                height: h,
                depth: 1,
            },
            &PixelUnpackState::default(),
            &data,
        )
        .unwrap();
        img
    }

    fn full(img: &ImageRef<Null>) -> Box3 {
        Box3::from_extent(img.lock().extent())
    }

    fn storage() -> StorageRef<Null> {
        TextureStorage::new(
            Format::Rgba8Unorm,
            Extent::new(4, 4, 1),
            1,
            1,
            TextureDimension::D2,
        )
    }

    #[test]
    fn copy_within_budget_hands_data_to_storage() {
        let gpu = gpu();
        let img = image(&gpu, 4, 4);
        let sto = storage();
        Image::copy_to_storage(&img, &gpu, &sto, 0, full(&img)).unwrap();
        let guard = img.lock();
        assert!(!guard.has_staging());
        assert!(guard.is_associated());
        assert!(!guard.is_dirty());
    }

    #[test]
    fn subresource_holds_at_most_one_image() {
        let gpu = gpu();
        let a = image(&gpu, 4, 4);
        let b = image(&gpu, 4, 4);
        let sto = storage();
        Image::copy_to_storage(&a, &gpu, &sto, 0, full(&a)).unwrap();
        Image::copy_to_storage(&b, &gpu, &sto, 0, full(&b)).unwrap();
        // `a` was forced to recover before `b` took the slot.
        assert!(a.lock().has_staging());
        assert!(!a.lock().is_associated());
        assert!(b.lock().is_associated());
    }

    #[test]
    fn recovery_budget_pins_staging_after_two_round_trips() {
        let gpu = gpu();
        let img = image(&gpu, 4, 4);
        let sto = storage();
        for _ in 0..2 {
            Image::copy_to_storage(&img, &gpu, &sto, 0, full(&img)).unwrap();
            assert!(!img.lock().has_staging());
            Image::recover_from_associated_storage(&img, &gpu).unwrap();
            assert!(img.lock().has_staging());
        }
        // Third time: the copy happens but the staging texture stays.
        Image::copy_to_storage(&img, &gpu, &sto, 0, full(&img)).unwrap();
        let guard = img.lock();
        assert!(guard.has_staging());
        assert!(!guard.is_associated());
    }

    #[test]
    fn map_recovers_evicted_data() {
        let gpu = gpu();
        let img = image(&gpu, 2, 2);
        let sto = storage();
        Image::copy_to_storage(&img, &gpu, &sto, 0, full(&img)).unwrap();
        assert!(!img.lock().has_staging());
        let mapped = Image::map(&img, &gpu, MapMode::Read).unwrap();
        let texel = unsafe { *mapped.data.as_ptr() };
        assert_eq!(texel, 7);
        Image::unmap(&img, &gpu);
        assert!(!img.lock().is_associated());
    }

    #[test]
    fn redefine_resets_protocol_state() {
        let gpu = gpu();
        let img = image(&gpu, 4, 4);
        let sto = storage();
        Image::copy_to_storage(&img, &gpu, &sto, 0, full(&img)).unwrap();
        img.lock().redefine(
            TextureDimension::D2,
            Format::Rgba8Unorm,
            Extent::new(8, 8, 1),
            false,
        );
        let guard = img.lock();
        assert!(!guard.is_associated());
        assert!(!guard.has_staging());
        assert_eq!(guard.recovered, 0);
        drop(guard);
        // Storage side forgot the image too: a new tenant moves in
        // without forcing any recovery.
        let other = image(&gpu, 4, 4);
        Image::copy_to_storage(&other, &gpu, &sto, 0, full(&other)).unwrap();
        assert!(other.lock().is_associated());
    }

    #[test]
    fn redefine_to_same_shape_is_a_noop() {
        let gpu = gpu();
        let img = image(&gpu, 4, 4);
        let sto = storage();
        Image::copy_to_storage(&img, &gpu, &sto, 0, full(&img)).unwrap();
        img.lock().redefine(
            TextureDimension::D2,
            Format::Rgba8Unorm,
            Extent::new(4, 4, 1),
            false,
        );
        assert!(img.lock().is_associated());
    }

    #[test]
    fn forced_redefine_releases_even_when_unchanged() {
        let gpu = gpu();
        let img = image(&gpu, 4, 4);
        let sto = storage();
        Image::copy_to_storage(&img, &gpu, &sto, 0, full(&img)).unwrap();
        img.lock().redefine(
            TextureDimension::D2,
            Format::Rgba8Unorm,
            Extent::new(4, 4, 1),
            true,
        );
        let guard = img.lock();
        assert!(!guard.is_associated());
        assert!(!guard.has_staging());
        assert_eq!(guard.recovered, 0);
    }

    #[test]
    fn image_smaller_than_storage_level_round_trips() {
        let gpu = gpu();
        let img = image(&gpu, 2, 2);
        let sto = storage();
        Image::copy_to_storage(&img, &gpu, &sto, 0, full(&img)).unwrap();
        Image::recover_from_associated_storage(&img, &gpu).unwrap();
        let mapped = Image::map(&img, &gpu, MapMode::Read).unwrap();
        let texel = unsafe { *mapped.data.as_ptr() };
        assert_eq!(texel, 7);
        Image::unmap(&img, &gpu);
    }

    #[test]
    fn lost_map_notifies_sink_once() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let notifications = Arc::new(AtomicU32::new(0));
        let n = notifications.clone();
        let gpu = crate::null::gpu_with_loss_sink(Box::new(move || {
            n.fetch_add(1, Ordering::SeqCst);
        }));
        let img = image(&gpu, 2, 2);
        gpu.device.set_removed(crate::RemovalReason::Reset);
        assert_eq!(
            Image::map(&img, &gpu, MapMode::Write).unwrap_err(),
            DeviceError::Lost
        );
        assert_eq!(Image::map(&img, &gpu, MapMode::Write).unwrap_err(), DeviceError::Lost);
        assert!(gpu.is_lost());
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn render_target_copy_converts_formats() {
        let gpu = gpu();
        let img = Image::<Null>::new(
            Format::Bgra8Unorm,
            Extent::new(2, 2, 1),
            TextureDimension::D2,
        );
        let rt = crate::null::test_render_target(&gpu, Format::Rgba8Unorm, 2, 2, &[10, 20, 30, 255]);
        Image::copy_from_render_target(
            &img,
            &gpu,
            &rt,
            Box3 {
                x: 0,
                y: 0,
                z: 0,
                width: 2,
                height: 2,
                depth: 1,
            },
            Origin::default(),
        )
        .unwrap();
        let mapped = Image::map(&img, &gpu, MapMode::Read).unwrap();
        let texel = unsafe { std::slice::from_raw_parts(mapped.data.as_ptr(), 4) };
        // BGRA ordering.
        assert_eq!(texel, &[30, 20, 10, 255]);
        Image::unmap(&img, &gpu);
    }
}
