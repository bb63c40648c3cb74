//! Caches of immutable device state objects.
//!
//! Blend, rasterizer, depth-stencil and sampler objects are created
//! from GL-level descriptions and reused; each kind keeps a bounded
//! pool evicting the least recently used entry when full.

use crate::{
    types::{
        format_info, BlendDesc, ColorMask, CullMode, DepthStencilDesc, Format, RasterizerDesc,
        SamplerDesc,
    },
    Api, Device, DeviceError, Gpu, MAX_DRAW_BUFFERS,
};

use fxhash::FxHashMap;

use std::hash::Hash;

const MAX_BLEND_STATES: usize = 100;
const MAX_RASTERIZER_STATES: usize = 100;
const MAX_DEPTH_STENCIL_STATES: usize = 100;
const MAX_SAMPLER_STATES: usize = 100;

struct StatePool<K, V> {
    map: FxHashMap<K, (V, u64)>,
    counter: u64,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> StatePool<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            map: FxHashMap::default(),
            counter: 0,
            capacity,
        }
    }

    fn get_or_create(
        &mut self,
        key: K,
        create: impl FnOnce() -> Result<V, DeviceError>,
    ) -> Result<V, DeviceError> {
        self.counter += 1;
        if let Some((value, last_used)) = self.map.get_mut(&key) {
            *last_used = self.counter;
            return Ok(value.clone());
        }
        let value = create()?;
        if self.map.len() >= self.capacity {
            let evictee = self
                .map
                .iter()
                .min_by_key(|(_, (_, last_used))| *last_used)
                .map(|(key, _)| key.clone());
            if let Some(evictee) = evictee {
                self.map.remove(&evictee);
            }
        }
        self.map.insert(key, (value.clone(), self.counter));
        Ok(value)
    }

    fn clear(&mut self) {
        self.map.clear();
        self.counter = 0;
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct BlendKey {
    desc: BlendDesc,
    rt_masks: [ColorMask; MAX_DRAW_BUFFERS],
}

/// f32 fields keyed by bit pattern; two states differing only in NaN
/// payload would be distinct, which is harmless.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct RasterizerKey {
    cull_mode: CullMode,
    front_face_ccw: bool,
    polygon_offset_fill: bool,
    polygon_offset_factor: u32,
    polygon_offset_units: u32,
    point_draw_mode: bool,
    multisample: bool,
    rasterizer_discard: bool,
    scissor_enabled: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct SamplerKey {
    min_filter: crate::types::FilterMode,
    mag_filter: crate::types::FilterMode,
    mip_filter: Option<crate::types::FilterMode>,
    wrap_s: crate::types::WrapMode,
    wrap_t: crate::types::WrapMode,
    wrap_r: crate::types::WrapMode,
    min_lod: u32,
    max_lod: u32,
    base_level: u32,
    compare: Option<crate::types::CompareFunc>,
    max_anisotropy: u8,
}

pub struct RenderStateCache<A: Api> {
    blend: StatePool<BlendKey, A::BlendState>,
    rasterizer: StatePool<RasterizerKey, A::RasterizerState>,
    depth_stencil: StatePool<DepthStencilDesc, A::DepthStencilState>,
    sampler: StatePool<SamplerKey, A::SamplerState>,
}

impl<A: Api> RenderStateCache<A> {
    pub fn new() -> Self {
        Self {
            blend: StatePool::new(MAX_BLEND_STATES),
            rasterizer: StatePool::new(MAX_RASTERIZER_STATES),
            depth_stencil: StatePool::new(MAX_DEPTH_STENCIL_STATES),
            sampler: StatePool::new(MAX_SAMPLER_STATES),
        }
    }

    pub fn clear(&mut self) {
        self.blend.clear();
        self.rasterizer.clear();
        self.depth_stencil.clear();
        self.sampler.clear();
    }

    /// The effective write mask per draw buffer folds in the channels
    /// the attachment format actually has.
    pub fn blend_state(
        &mut self,
        gpu: &Gpu<A>,
        desc: &BlendDesc,
        rt_formats: &[Option<Format>],
    ) -> Result<A::BlendState, DeviceError> {
        let mut rt_masks = [ColorMask::empty(); MAX_DRAW_BUFFERS];
        for (i, slot) in rt_formats.iter().enumerate().take(MAX_DRAW_BUFFERS) {
            if let Some(format) = slot {
                let components = format_info(*format).component_count;
                let mut mask = desc.color_mask;
                if components < 4 {
                    mask.remove(ColorMask::ALPHA);
                }
                if components < 3 {
                    mask.remove(ColorMask::BLUE);
                }
                if components < 2 {
                    mask.remove(ColorMask::GREEN);
                }
                rt_masks[i] = mask;
            }
        }
        let key = BlendKey {
            desc: *desc,
            rt_masks,
        };
        self.blend
            .get_or_create(key, || gpu.device.create_blend_state(desc, &rt_masks))
    }

    pub fn rasterizer_state(
        &mut self,
        gpu: &Gpu<A>,
        desc: &RasterizerDesc,
        scissor_enabled: bool,
    ) -> Result<A::RasterizerState, DeviceError> {
        let key = RasterizerKey {
            cull_mode: desc.cull_mode,
            front_face_ccw: desc.front_face_ccw,
            polygon_offset_fill: desc.polygon_offset_fill,
            polygon_offset_factor: desc.polygon_offset_factor.to_bits(),
            polygon_offset_units: desc.polygon_offset_units.to_bits(),
            point_draw_mode: desc.point_draw_mode,
            multisample: desc.multisample,
            rasterizer_discard: desc.rasterizer_discard,
            scissor_enabled,
        };
        self.rasterizer
            .get_or_create(key, || gpu.device.create_rasterizer_state(desc, scissor_enabled))
    }

    pub fn depth_stencil_state(
        &mut self,
        gpu: &Gpu<A>,
        desc: &DepthStencilDesc,
    ) -> Result<A::DepthStencilState, DeviceError> {
        self.depth_stencil
            .get_or_create(*desc, || gpu.device.create_depth_stencil_state(desc))
    }

    pub fn sampler_state(
        &mut self,
        gpu: &Gpu<A>,
        desc: &SamplerDesc,
    ) -> Result<A::SamplerState, DeviceError> {
        let key = SamplerKey {
            min_filter: desc.min_filter,
            mag_filter: desc.mag_filter,
            mip_filter: desc.mip_filter,
            wrap_s: desc.wrap_s,
            wrap_t: desc.wrap_t,
            wrap_r: desc.wrap_r,
            min_lod: desc.min_lod.to_bits(),
            max_lod: desc.max_lod.to_bits(),
            base_level: desc.base_level,
            compare: desc.compare,
            max_anisotropy: desc.max_anisotropy,
        };
        self.sampler
            .get_or_create(key, || gpu.device.create_sampler_state(desc))
    }
}

impl<A: Api> Default for RenderStateCache<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::{self, Null};

    #[test]
    fn identical_descriptions_share_one_object() {
        let gpu = null::gpu();
        let mut cache = RenderStateCache::<Null>::new();
        let desc = BlendDesc::default();
        let formats = [Some(Format::Rgba8Unorm)];
        let a = cache.blend_state(&gpu, &desc, &formats).unwrap();
        let b = cache.blend_state(&gpu, &desc, &formats).unwrap();
        assert_eq!(a, b);
        assert_eq!(gpu.device.counts().blend_states_created, 1);
    }

    #[test]
    fn attachment_channels_shape_the_key() {
        let gpu = null::gpu();
        let mut cache = RenderStateCache::<Null>::new();
        let desc = BlendDesc::default();
        let a = cache
            .blend_state(&gpu, &desc, &[Some(Format::Rgba8Unorm)])
            .unwrap();
        // An RG attachment masks off blue and alpha, a different state.
        let b = cache
            .blend_state(&gpu, &desc, &[Some(Format::Rg8Unorm)])
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn pool_evicts_least_recent_at_capacity() {
        let mut pool: StatePool<u32, u32> = StatePool::new(3);
        for key in 0..3 {
            pool.get_or_create(key, || Ok(key * 10)).unwrap();
        }
        // Touch 0 so 1 is the oldest.
        pool.get_or_create(0, || unreachable!()).unwrap();
        pool.get_or_create(3, || Ok(30)).unwrap();
        assert_eq!(pool.map.len(), 3);
        assert!(pool.map.contains_key(&0));
        assert!(!pool.map.contains_key(&1));
        assert!(pool.map.contains_key(&2));
        assert!(pool.map.contains_key(&3));
    }

    #[test]
    fn scissor_toggle_is_a_distinct_rasterizer_state() {
        let gpu = null::gpu();
        let mut cache = RenderStateCache::<Null>::new();
        let desc = RasterizerDesc::default();
        let a = cache.rasterizer_state(&gpu, &desc, false).unwrap();
        let b = cache.rasterizer_state(&gpu, &desc, true).unwrap();
        assert_ne!(a, b);
        assert_eq!(gpu.device.counts().rasterizer_states_created, 2);
    }
}
