use crate::dense::DenseRegisters;
use crate::settings::Settings;
use crate::{DecodeError, Hll, HllError, HllType, Registers};

fn settings(log_2m: u32, reg_width: u32, explicit_threshold: i32, sparse_enabled: bool) -> Settings {
    Settings::new(log_2m, reg_width, explicit_threshold, sparse_enabled).unwrap()
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn construct_hll_value(log2m: u32, register: u32, value: u32) -> u64 {
    let substream_value: u64 = 1 << (value - 1);
    (substream_value << log2m) | register as u64
}

// spec.md 8, scenario 1
#[test]
fn scenario_empty_hll_serializes_minimal() {
    let hll = Hll::new(settings(13, 5, -1, true));

    assert_eq!(0, hll.cardinality());
    assert_eq!(HllType::Empty, hll.type_of());

    let bytes = hll.to_bytes();
    assert_eq!(vec![0x11, (((5u32 - 1) << 5) | 13) as u8], bytes);
}

// spec.md 8, scenario 2
#[test]
fn scenario_single_explicit_value_round_trips_verbatim() {
    let mut hll = Hll::new(settings(11, 5, -1, true));
    hll.add_raw(0x7FFF_FFFF_FFFF_FFFF);

    assert_eq!(1, hll.cardinality());
    assert_eq!(HllType::Explicit, hll.type_of());

    let bytes = hll.to_bytes();
    assert_eq!(&0x7FFF_FFFF_FFFF_FFFFu64.to_be_bytes(), &bytes[3..]);

    let round_tripped = Hll::from_bytes(&bytes).unwrap();
    assert_eq!(HllType::Explicit, round_tripped.type_of());
    assert_eq!(1, round_tripped.cardinality());
}

// spec.md 8, scenario 3: a hash of 0 means every inspected bit of the substream was
// zero, so p(w) = pw_bits + 1, capped to the register's maximum representable value.
#[test]
fn scenario_hash_zero_sets_register_zero_to_capped_pw_bits_plus_one() {
    let mut hll = Hll::new(settings(13, 5, 0, false));
    hll.add_raw(0);

    assert_eq!(HllType::Full, hll.type_of());
    let Hll::Dense(dense) = &hll else {
        panic!("expected Full/Dense representation");
    };
    assert_eq!(31, dense.get(0));
}

// spec.md 8 boundary: a hash with all ones in the low log2m bits and all ones
// elsewhere sets register M-1 to 1 (the lowest set bit of the substream is bit 0).
#[test]
fn scenario_all_ones_hash_sets_last_register_to_one() {
    let s = settings(13, 5, 0, false);
    let mut dense = DenseRegisters::with_settings(&s);

    dense.set(u64::MAX);

    let m = 1u32 << s.log_2m;
    assert_eq!(1, dense.get(m - 1));
}

// spec.md 8, scenario 4
#[test]
fn scenario_union_of_disjoint_ranges_estimates_within_tolerance() {
    let mut h1 = Hll::new(settings(13, 5, -1, true));
    let mut h2 = Hll::new(settings(13, 5, -1, true));

    for i in 0..10_000u64 {
        h1.add_raw(splitmix64(i));
        h2.add_raw(splitmix64(i + 10_000));
    }

    h1.union(true, &h2).unwrap();

    let card = h1.cardinality() as f64;
    let expected = 20_000.0;
    let tolerance = expected * 0.025;
    assert!(
        (card - expected).abs() <= tolerance,
        "cardinality {card} not within 2.5% of {expected}"
    );
}

// spec.md 8, scenario 5: the hex fixture round-trips byte-identically.
#[test]
fn scenario_hex_fixture_round_trips() {
    let bytes = hex::decode("128D7FFFFFFFFFF6A5C420").unwrap();

    let hll = Hll::from_bytes(&bytes).unwrap();
    assert_eq!(HllType::Explicit, hll.type_of());
    assert_eq!(13, hll.settings().log_2m());
    assert_eq!(5, hll.settings().reg_width());

    assert_eq!(bytes, hll.to_bytes());
}

// spec.md 8, scenario 6
#[test]
fn scenario_sparse_promotes_to_full_preserving_registers() {
    let s = settings(4, 5, 0, true);
    let threshold = s.sparse_threshold.unwrap() as u32;

    let mut hll = Hll::new(s);
    for i in 0..threshold {
        hll.add_raw(construct_hll_value(s.log_2m, i, 1 + (i % 30)));
    }
    assert_eq!(HllType::Sparse, hll.type_of());

    // one more distinct register forces the promotion to FULL.
    hll.add_raw(construct_hll_value(s.log_2m, threshold, 5));
    assert_eq!(HllType::Full, hll.type_of());

    let Hll::Dense(dense) = &hll else {
        panic!("expected Full/Dense representation after promotion");
    };
    for i in 0..threshold {
        assert_eq!(1 + (i % 30), dense.get(i) as u32);
    }
    assert_eq!(5, dense.get(threshold));
}

#[test]
fn idempotent_add_of_same_hash() {
    let mut a = Hll::new(settings(11, 5, -1, true));
    let mut b = Hll::new(settings(11, 5, -1, true));

    a.add_raw(0xDEAD_BEEF_CAFE_F00D);

    b.add_raw(0xDEAD_BEEF_CAFE_F00D);
    b.add_raw(0xDEAD_BEEF_CAFE_F00D);

    assert_eq!(a.cardinality(), b.cardinality());
    assert_eq!(a.to_bytes(), b.to_bytes());
}

#[test]
fn round_trip_preserves_cardinality_and_bytes_across_representations() {
    let cases: Vec<(u32, u32, i32, bool, u64)> = vec![
        (11, 5, -1, true, 0),
        (11, 5, -1, true, 50),
        (11, 5, -1, true, 5_000),
        (11, 5, 0, false, 5_000),
    ];

    for (log_2m, reg_width, explicit_threshold, sparse_enabled, n) in cases {
        let mut hll = Hll::new(settings(log_2m, reg_width, explicit_threshold, sparse_enabled));
        for i in 0..n {
            hll.add_raw(splitmix64(i));
        }

        let bytes = hll.to_bytes();
        let decoded = Hll::from_bytes(&bytes).unwrap();

        assert_eq!(hll.cardinality(), decoded.cardinality());
        assert_eq!(bytes, decoded.to_bytes());
    }
}

#[test]
fn union_is_commutative_and_monotone_over_cardinality() {
    let mut a = Hll::new(settings(11, 5, -1, true));
    let mut b = Hll::new(settings(11, 5, -1, true));

    for i in 0..2_000u64 {
        a.add_raw(splitmix64(i));
    }
    for i in 1_000..3_000u64 {
        b.add_raw(splitmix64(i));
    }

    let card_a = a.cardinality();
    let card_b = b.cardinality();

    let mut a_union_b = a.clone();
    a_union_b.union(true, &b).unwrap();

    let mut b_union_a = b.clone();
    b_union_a.union(true, &a).unwrap();

    assert_eq!(a_union_b.cardinality(), b_union_a.cardinality());
    assert!(a_union_b.cardinality() >= card_a.max(card_b));
}

#[test]
fn union_is_associative_over_cardinality() {
    let build = |lo: u64, hi: u64| {
        let mut h = Hll::new(settings(11, 5, -1, true));
        for i in lo..hi {
            h.add_raw(splitmix64(i));
        }
        h
    };

    let a = build(0, 1_000);
    let b = build(800, 1_800);
    let c = build(1_600, 2_600);

    let mut ab_then_c = a.clone();
    ab_then_c.union(true, &b).unwrap();
    ab_then_c.union(true, &c).unwrap();

    let mut bc = b.clone();
    bc.union(true, &c).unwrap();
    let mut a_then_bc = a.clone();
    a_then_bc.union(true, &bc).unwrap();

    assert_eq!(ab_then_c.cardinality(), a_then_bc.cardinality());
}

#[test]
fn union_rejects_mismatched_parameters() {
    let mut a = Hll::new(settings(11, 5, -1, true));
    let b = Hll::new(settings(12, 5, -1, true));
    a.add_raw(1);

    let err = a.union(true, &b).unwrap_err();
    assert!(matches!(err, HllError::Settings(_)));
}

#[test]
fn boundary_log2m_accepts_4_and_30_rejects_3_and_31() {
    assert!(Settings::new(4, 5, -1, true).is_ok());
    assert!(Settings::new(30, 5, -1, true).is_ok());
    assert!(Settings::new(3, 5, -1, true).is_err());
    assert!(Settings::new(31, 5, -1, true).is_err());
}

#[test]
fn boundary_regwidth_accepts_1_and_8_rejects_0_and_9() {
    assert!(Settings::new(11, 1, -1, true).is_ok());
    assert!(Settings::new(11, 8, -1, true).is_ok());
    assert!(Settings::new(11, 0, -1, true).is_err());
    assert!(Settings::new(11, 9, -1, true).is_err());
}

#[test]
fn decode_error_sub_kinds_are_distinguished() {
    assert!(matches!(
        Hll::from_bytes(&[]).unwrap_err(),
        HllError::Decode(DecodeError::BadLength { .. })
    ));
    assert!(matches!(
        Hll::from_bytes(&[0x21, 0x80, 0x00]).unwrap_err(),
        HllError::Decode(DecodeError::UnknownVersion(2))
    ));
    assert!(matches!(
        Hll::from_bytes(&[0x1F, 0x80, 0x00]).unwrap_err(),
        HllError::Decode(DecodeError::UnknownType(0xF))
    ));
}

#[test]
fn decode_rejects_cutoff_byte_with_unshiftable_threshold() {
    // buf[2] = 0x22 -> threshold = 0x22 & 0x3F = 34, which would overflow a `1 << (34 - 1)`
    // shift. Must surface as a DecodeError, never panic.
    let buf = [0x12, 0x8D, 0x22];
    assert!(matches!(
        Hll::from_bytes(&buf).unwrap_err(),
        HllError::Decode(DecodeError::BadParameters(_))
    ));
}

#[test]
fn strict_decode_rejects_non_ascending_explicit_entries_lenient_dedupes() {
    // Two identical 8-byte big-endian entries: not strictly ascending.
    let mut buf = vec![0x12, (((5u32 - 1) << 5) | 11) as u8, 0x3F];
    buf.extend_from_slice(&1u64.to_be_bytes());
    buf.extend_from_slice(&1u64.to_be_bytes());

    let err = Hll::from_bytes_strict(&buf).unwrap_err();
    assert!(matches!(
        err,
        HllError::Decode(DecodeError::NonMonotonicExplicit(1))
    ));

    let lenient = Hll::from_bytes(&buf).unwrap();
    assert_eq!(1, lenient.cardinality());
}
