//! One-way translations from GL enums to what the device consumes.

use crate::types::{IndexData, PrimitiveMode, Topology};

/// Topology a GL draw mode rasterizes as. `None` for the modes the
/// device lacks; those are emulated with a synthesized index buffer.
pub fn map_primitive_mode(mode: PrimitiveMode) -> Option<Topology> {
    match mode {
        PrimitiveMode::Points => Some(Topology::PointList),
        PrimitiveMode::Lines => Some(Topology::LineList),
        PrimitiveMode::LineStrip => Some(Topology::LineStrip),
        PrimitiveMode::Triangles => Some(Topology::TriangleList),
        PrimitiveMode::TriangleStrip => Some(Topology::TriangleStrip),
        PrimitiveMode::LineLoop | PrimitiveMode::TriangleFan => None,
    }
}

pub fn align_up(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Smallest and largest index referenced by a draw. `None` when empty.
pub fn index_range(indices: IndexData, first: usize, count: usize) -> Option<(u32, u32)> {
    if count == 0 {
        return None;
    }
    let mut min = u32::MAX;
    let mut max = 0;
    for i in first..first + count {
        let v = indices.get(i);
        min = min.min(v);
        max = max.max(v);
    }
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulated_modes_have_no_native_topology() {
        assert_eq!(map_primitive_mode(PrimitiveMode::LineLoop), None);
        assert_eq!(map_primitive_mode(PrimitiveMode::TriangleFan), None);
        assert_eq!(
            map_primitive_mode(PrimitiveMode::Triangles),
            Some(Topology::TriangleList)
        );
    }

    #[test]
    fn index_range_scans_the_window() {
        let data = [5u16, 1, 9, 3];
        assert_eq!(index_range(IndexData::U16(&data), 0, 4), Some((1, 9)));
        assert_eq!(index_range(IndexData::U16(&data), 2, 2), Some((3, 9)));
        assert_eq!(index_range(IndexData::U16(&data), 0, 0), None);
    }
}
