use super::*;

use crate::format::{bit_is_set, rank};
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeMap;

/// One of the four legal bitmap or value widths.
#[derive(Clone, Copy, Debug, Arbitrary)]
enum Width {
    One,
    Two,
    Four,
    Eight,
}

impl Width {
    fn bytes(self) -> usize {
        match self {
            Width::One => 1,
            Width::Two => 2,
            Width::Four => 4,
            Width::Eight => 8,
        }
    }

    fn mask(self) -> u64 {
        u64::MAX >> (64 - self.bytes() * 8)
    }
}

/// Raw pairs whose keys are narrowed to `key_bits` bits, so both dense and
/// sparse key spaces get exercised.
fn mapping(raw: Vec<(u64, u64)>, key_bits: u32, value: Width) -> BTreeMap<u64, u64> {
    raw.into_iter()
        .map(|(k, v)| (k >> (64 - key_bits), v & value.mask()))
        .collect()
}

fn raw_pairs() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec(any::<(u64, u64)>(), 0..=400)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_round_trip(
        bitmap in any::<Width>(),
        value in any::<Width>(),
        key_bits in 1u32..=64,
        raw in raw_pairs(),
        probes in prop::collection::vec(any::<u64>(), 0..=200)
    ) {
        let m = mapping(raw, key_bits, value);
        let config = TrieConfig::new(bitmap.bytes(), value.bytes()).unwrap();
        let bytes = build(config, m.clone()).unwrap();
        let reader = TrieReader::new(bytes.as_slice()).unwrap();

        for (&k, &v) in &m {
            prop_assert_eq!(reader.lookup(k).unwrap(), Some(v));
        }
        for p in probes {
            // Both in-range and out-of-range probes.
            for k in [p, p >> (64 - key_bits)] {
                prop_assert_eq!(reader.lookup(k).unwrap(), m.get(&k).copied());
                prop_assert_eq!(reader.exists(k).unwrap(), m.contains_key(&k));
            }
        }

        let got: Vec<(u64, u64)> = reader.iter().collect::<Result<_>>().unwrap();
        let expected: Vec<(u64, u64)> = m.iter().map(|(&k, &v)| (k, v)).collect();
        prop_assert_eq!(got, expected);
        prop_assert_eq!(reader.verify().unwrap(), m.len());
    }

    #[test]
    fn prop_deterministic(
        bitmap in any::<Width>(),
        value in any::<Width>(),
        key_bits in 1u32..=64,
        raw in raw_pairs()
    ) {
        let m = mapping(raw, key_bits, value);
        let config = TrieConfig::new(bitmap.bytes(), value.bytes()).unwrap();
        let first = build(config, m.clone()).unwrap();
        let second = build(config, m.iter().rev().map(|(&k, &v)| (k, v))).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_pointer_size_is_minimal(
        bitmap in any::<Width>(),
        key_bits in 8u32..=64,
        raw in raw_pairs()
    ) {
        // 8-byte values make leaves large enough to need wider pointers.
        let m = mapping(raw, key_bits, Width::Eight);
        let config = TrieConfig::new(bitmap.bytes(), 8).unwrap();
        let bytes = build(config, m.clone()).unwrap();
        let chosen = TrieReader::new(bytes.as_slice()).unwrap().header().pointer_size as usize;

        if chosen > 1 {
            let narrower = config.with_pointer_size(chosen - 1).unwrap();
            let err = build(narrower, m.clone()).unwrap_err();
            prop_assert_eq!(err.kind(), ErrorKind::Capacity);
        }
        for w in chosen..=4 {
            let forced = build(config.with_pointer_size(w).unwrap(), m.clone()).unwrap();
            let reader = TrieReader::new(forced.as_slice()).unwrap();
            prop_assert_eq!(reader.header().pointer_size as usize, w);
            prop_assert!(forced.len() >= bytes.len());
            for (&k, &v) in &m {
                prop_assert_eq!(reader.lookup(k).unwrap(), Some(v));
            }
        }
    }

    #[test]
    fn prop_corruption_never_panics(
        bitmap in any::<Width>(),
        value in any::<Width>(),
        key_bits in 1u32..=64,
        raw in raw_pairs(),
        flips in prop::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 0..8),
        cut in any::<prop::sample::Index>()
    ) {
        let m = mapping(raw, key_bits, value);
        let config = TrieConfig::new(bitmap.bytes(), value.bytes()).unwrap();
        let mut bytes = build(config, m.clone()).unwrap();
        for (at, x) in flips {
            let i = at.index(bytes.len());
            bytes[i] ^= x;
        }
        let len = cut.index(bytes.len() + 1);
        bytes.truncate(len);

        if let Ok(reader) = TrieReader::new(bytes.as_slice()) {
            for &k in m.keys() {
                if let Err(e) = reader.lookup(k) {
                    prop_assert_eq!(e.kind(), ErrorKind::Decoding);
                }
            }
            let _ = reader.verify();
            prop_assert!(reader.iter().filter(|r| r.is_err()).count() <= 1);
        }
    }

    #[test]
    fn prop_rank_matches_scan(word in any::<u64>(), bucket in 0usize..64) {
        let bitmap = word.to_le_bytes();
        let naive = (0..bucket).filter(|&b| bit_is_set(&bitmap, b)).count();
        prop_assert_eq!(rank(&bitmap, bucket), naive);
        prop_assert_eq!(bit_is_set(&bitmap, bucket), (word >> bucket) & 1 == 1);
    }
}

#[test]
fn nested_prefixes_share_nodes() {
    // Keys that only differ in their lowest chunk end up in one leaf.
    let config = TrieConfig::new(1, 1).unwrap();
    let keys: Vec<u64> = (0..8).map(|low| (5 << 6) | (3 << 3) | low).collect();
    let bytes = build(config, keys.iter().map(|&k| (k, k as u8 as u64))).unwrap();
    // header + root (1 + 1) + middle (1 + 1) + leaf (1 + 8)
    assert_eq!(bytes.len(), 2 + 2 + 2 + 9);

    let reader = TrieReader::new(bytes).unwrap();
    for &k in &keys {
        assert_eq!(reader.lookup(k).unwrap(), Some(k & 0xFF));
    }
    assert_eq!(reader.lookup((5 << 6) | (2 << 3)).unwrap(), None);
}
