use std::io::{self, Read};

use crate::hash::{hash_hex, sha1_hex, HashAlgorithm, HashReader};

#[test]
fn one_shot_digests_match_known_vectors() {
    assert_eq!(
        hash_hex(b"abc", HashAlgorithm::Sha1),
        "a9993e364706816aba3e25717850c26c9cd0d89d"
    );
    assert_eq!(
        hash_hex(b"abc", HashAlgorithm::Sha256),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_eq!(sha1_hex(b"abc"), hash_hex(b"abc", HashAlgorithm::Sha1));
}

#[test]
fn streaming_digest_equals_the_one_shot() {
    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let mut reader = HashReader::new(io::Cursor::new(payload.clone()));

    let mut passed_through = Vec::new();
    reader.read_to_end(&mut passed_through).unwrap();
    assert_eq!(passed_through, payload, "filter altered the bytes");

    let expected = sha1_hex(&payload);
    assert_eq!(reader.hex(), expected);
    assert!(reader.matches(&expected));
    assert!(reader.matches(&expected.to_ascii_uppercase()));
}

#[test]
fn tampered_payload_fails_the_match() {
    let expected = sha1_hex(b"original bytes");
    let mut reader = HashReader::new(io::Cursor::new(b"tampered bytes".to_vec()));
    io::copy(&mut reader, &mut io::sink()).unwrap();
    assert!(!reader.matches(&expected));
}
