//! Cache of compiled input layouts keyed by vertex attribute layout.
//!
//! Input layouts are validated against shader input signatures at
//! creation, which is expensive enough to matter on every draw. The
//! cache keys on everything the layout depends on and keeps the most
//! recently used 1024 entries. It also owns the vertex-buffer slot
//! bindings so redundant `IASetVertexBuffers` calls collapse into the
//! smallest contiguous dirty range.

use crate::{
    buffer::BufferUsage,
    types::{DxgiFormat, ShaderElementType},
    Api, Context, Device, DeviceError, Gpu, InputElement, ProgramExecutables,
    TranslatedAttribute, MAX_VERTEX_ATTRIBS,
};

use arrayvec::ArrayVec;
use fxhash::FxHashMap;

const CACHE_CAPACITY: usize = 1024;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct LayoutElement {
    element: InputElement,
    element_type: ShaderElementType,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct LayoutKey {
    elements: ArrayVec<LayoutElement, MAX_VERTEX_ATTRIBS>,
}

struct CacheEntry<A: Api> {
    layout: A::InputLayout,
    last_used: u64,
}

pub struct InputLayoutCache<A: Api> {
    layouts: FxHashMap<LayoutKey, CacheEntry<A>>,
    use_counter: u64,
    current_layout: Option<A::InputLayout>,
    current_buffers: [Option<A::Buffer>; MAX_VERTEX_ATTRIBS],
    current_strides: [u32; MAX_VERTEX_ATTRIBS],
    current_offsets: [u32; MAX_VERTEX_ATTRIBS],
}

impl<A: Api> InputLayoutCache<A> {
    pub fn new() -> Self {
        Self {
            layouts: FxHashMap::default(),
            use_counter: 0,
            current_layout: None,
            current_buffers: Default::default(),
            current_strides: [0; MAX_VERTEX_ATTRIBS],
            current_offsets: [0; MAX_VERTEX_ATTRIBS],
        }
    }

    /// Forgets the applied bindings so the next apply rebinds
    /// everything. The compiled layouts stay cached.
    pub fn mark_dirty(&mut self) {
        self.current_layout = None;
        self.current_buffers = Default::default();
        self.current_strides = [0; MAX_VERTEX_ATTRIBS];
        self.current_offsets = [0; MAX_VERTEX_ATTRIBS];
    }

    /// Drops every compiled layout. Used on device teardown.
    pub fn clear(&mut self) {
        self.layouts.clear();
        self.use_counter = 0;
        self.mark_dirty();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.layouts.len()
    }

    fn build_key(
        attributes: &[TranslatedAttribute<A>],
        program: &ProgramExecutables<A>,
    ) -> LayoutKey {
        let mut elements = ArrayVec::new();
        for (index, attr) in attributes.iter().enumerate() {
            if !attr.active || program.attribute_semantics[index] < 0 {
                continue;
            }
            elements.push(LayoutElement {
                element: InputElement {
                    semantic_index: program.attribute_semantics[index] as u32,
                    format: attr.format,
                    input_slot: index as u32,
                    per_instance: attr.divisor > 0,
                    instance_step_rate: attr.divisor,
                },
                element_type: attr.element_type,
            });
        }
        LayoutKey { elements }
    }

    fn get_or_create_layout(
        &mut self,
        gpu: &Gpu<A>,
        key: LayoutKey,
        program: &ProgramExecutables<A>,
    ) -> Result<A::InputLayout, DeviceError> {
        self.use_counter += 1;
        if let Some(entry) = self.layouts.get_mut(&key) {
            entry.last_used = self.use_counter;
            return Ok(entry.layout.clone());
        }

        let elements: Vec<InputElement> = key.elements.iter().map(|e| e.element).collect();
        let layout = gpu
            .device
            .create_input_layout(&elements, &program.vertex_signature)?;

        if self.layouts.len() >= CACHE_CAPACITY {
            let evictee = self
                .layouts
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(evictee) = evictee {
                self.layouts.remove(&evictee);
            }
        }
        self.layouts.insert(
            key,
            CacheEntry {
                layout: layout.clone(),
                last_used: self.use_counter,
            },
        );
        Ok(layout)
    }

    /// Binds the input layout and vertex buffers for a draw, touching
    /// the device only where something actually changed.
    pub fn apply_vertex_buffers(
        &mut self,
        gpu: &Gpu<A>,
        attributes: &[TranslatedAttribute<A>],
        program: &ProgramExecutables<A>,
    ) -> Result<(), DeviceError> {
        debug_assert!(attributes.len() <= MAX_VERTEX_ATTRIBS);

        let key = Self::build_key(attributes, program);
        let layout = self.get_or_create_layout(gpu, key, program)?;
        if self.current_layout.as_ref() != Some(&layout) {
            gpu.context.set_input_layout(Some(&layout));
            self.current_layout = Some(layout);
        }

        let mut dirty_range: Option<(usize, usize)> = None;
        for slot in 0..MAX_VERTEX_ATTRIBS {
            let attr = attributes.get(slot).filter(|a| a.active);
            let (buffer, stride, offset) = match attr {
                Some(attr) => {
                    let buffer = match &attr.buffer {
                        Some(buffer) => Some(
                            buffer
                                .lock()
                                .get_native_buffer(gpu, BufferUsage::VertexOrTransformFeedback)?,
                        ),
                        None => None,
                    };
                    (buffer, attr.stride, attr.offset)
                }
                None => (None, 0, 0),
            };
            if self.current_buffers[slot] != buffer
                || self.current_strides[slot] != stride
                || self.current_offsets[slot] != offset
            {
                self.current_buffers[slot] = buffer;
                self.current_strides[slot] = stride;
                self.current_offsets[slot] = offset;
                dirty_range = Some(match dirty_range {
                    Some((lo, _)) => (lo, slot),
                    None => (slot, slot),
                });
            }
        }

        if let Some((lo, hi)) = dirty_range {
            gpu.context.set_vertex_buffers(
                lo as u32,
                &self.current_buffers[lo..=hi],
                &self.current_strides[lo..=hi],
                &self.current_offsets[lo..=hi],
            );
        }
        Ok(())
    }
}

impl<A: Api> Default for InputLayoutCache<A> {
    fn default() -> Self {
        Self::new()
    }
}
