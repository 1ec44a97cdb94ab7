//! Property tests for device placement in the process image.

use modio_common::pictory::{DeviceDescriptor, DevicePosition, IoDescriptor};
use modio_core::address_map::DeviceAddressMap;
use proptest::prelude::*;

fn device(position: i64, offset: usize, length: usize) -> DeviceDescriptor {
    DeviceDescriptor {
        device_type: "LEFT_RIGHT".to_string(),
        name: format!("dev{position}"),
        position: DevicePosition::Index(position),
        offset,
        product_type: None,
        inp: vec![IoDescriptor {
            name: format!("In_{position}"),
            default: 0,
            bit_length: (length * 8) as u32,
            byte_offset: offset,
            exported: false,
            sort_pos: 0,
            bmk: String::new(),
            bit_address: None,
        }],
        out: Vec::new(),
        mem: Vec::new(),
    }
}

fn layout() -> impl Strategy<Value = Vec<(i64, usize, usize)>> {
    prop::collection::btree_set(0i64..256, 1..12).prop_flat_map(|positions| {
        let n = positions.len();
        (
            Just(positions.into_iter().collect::<Vec<_>>()),
            prop::collection::vec(0usize..128, n),
            prop::collection::vec(1usize..16, n),
        )
            .prop_map(|(positions, offsets, lengths)| {
                positions
                    .into_iter()
                    .zip(offsets)
                    .zip(lengths)
                    .map(|((p, o), l)| (p, o, l))
                    .collect()
            })
    })
}

proptest! {
    #[test]
    fn placements_never_overlap(layout in layout()) {
        let mut descriptors: Vec<_> = layout.iter().map(|&(p, o, l)| device(p, o, l)).collect();
        descriptors.reverse();
        let map = DeviceAddressMap::build(&descriptors).unwrap();

        let placements = map.placements();
        prop_assert_eq!(placements.len(), layout.len());
        let mut end = 0;
        for (placement, &(position, offset, length)) in placements.iter().zip(&layout) {
            prop_assert_eq!(placement.position, position);
            prop_assert_eq!(placement.length, length);
            prop_assert!(placement.offset >= offset);
            prop_assert!(placement.offset >= end);
            end = placement.offset + placement.length;
        }
        prop_assert_eq!(map.length(), end);
    }

    #[test]
    fn stale_offsets_pack_devices(lengths in prop::collection::vec(1usize..32, 1..10)) {
        let descriptors: Vec<_> = lengths
            .iter()
            .enumerate()
            .map(|(i, &l)| device(i as i64, 0, l))
            .collect();
        let map = DeviceAddressMap::build(&descriptors).unwrap();
        prop_assert_eq!(map.length(), lengths.iter().sum::<usize>());
    }
}
