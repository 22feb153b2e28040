use proptest::prelude::*;
use proveit::ledger::abi;
use proveit::{
    fingerprint_of_bytes, fingerprint_of_file, fingerprint_of_reader, Address, Fingerprint,
};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

fn scratch_file(bytes: &[u8]) -> std::path::PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let path = std::env::temp_dir().join(format!("proveit_prop_{unique}.bin"));
    fs::write(&path, bytes).unwrap();
    path
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn file_reader_and_buffer_digests_agree(
        bytes in proptest::collection::vec(any::<u8>(), 0..40_000),
    ) {
        let expected = fingerprint_of_bytes(&bytes);
        prop_assert_eq!(fingerprint_of_reader(bytes.as_slice()).unwrap(), expected);
        let path = scratch_file(&bytes);
        let from_file = fingerprint_of_file(&path).unwrap();
        let _ = fs::remove_file(&path);
        prop_assert_eq!(from_file, expected);
    }

    #[test]
    fn canonical_form_is_stable(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let fp = fingerprint_of_bytes(&bytes);
        let text = fp.to_string();
        prop_assert_eq!(text.len(), 66);
        prop_assert!(text.starts_with("0x"));
        prop_assert!(text[2..].chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        prop_assert_eq!(Fingerprint::parse(&text).unwrap(), fp);
    }

    #[test]
    fn user_spellings_normalize(
        raw in proptest::array::uniform32(any::<u8>()),
        upper in any::<bool>(),
        prefix in 0usize..3,
    ) {
        let fp = Fingerprint::from_bytes(raw);
        let mut digits = hex::encode(raw);
        if upper {
            digits = digits.to_uppercase();
        }
        let input = match prefix {
            0 => digits,
            1 => format!("0x{digits}"),
            _ => format!("0X{digits}"),
        };
        prop_assert_eq!(Fingerprint::parse(&input).unwrap(), fp);
    }

    #[test]
    fn wrong_length_hex_is_rejected(len in 0usize..80) {
        prop_assume!(len != 64);
        let input = "a".repeat(len);
        prop_assert!(Fingerprint::parse(&input).is_err());
    }

    #[test]
    fn register_calldata_decodes_back(
        raw in proptest::array::uniform32(any::<u8>()),
        metadata in "\\PC{0,80}",
    ) {
        let fp = Fingerprint::from_bytes(raw);
        let data = abi::encode_register(&fp, &metadata);
        let (decoded_fp, decoded_meta) = abi::decode_register_call(&data).unwrap();
        prop_assert_eq!(decoded_fp, fp);
        prop_assert_eq!(decoded_meta, metadata);
    }

    #[test]
    fn address_display_parses_back(raw in proptest::array::uniform20(any::<u8>())) {
        let addr = Address::from_bytes(raw);
        let text = addr.to_string();
        prop_assert_eq!(Address::parse(&text).unwrap(), addr);
        prop_assert_eq!(Address::parse(&text.to_lowercase()).unwrap(), addr);
    }
}
