//! Fixed-width big-endian integer <-> byte array helpers, plus the UTF-8 and
//! URL-safe base64 codecs used by the root chunk, page headers, and record
//! identifiers. Kept as free functions rather than a trait so hot paths in
//! `page` and `store` can call them without indirection.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

pub fn read_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes(buf[..4].try_into().expect("4-byte slice"))
}

pub fn write_u32(buf: &mut [u8], value: u32) {
    buf[..4].copy_from_slice(&value.to_be_bytes());
}

pub fn read_u64(buf: &[u8]) -> u64 {
    u64::from_be_bytes(buf[..8].try_into().expect("8-byte slice"))
}

pub fn write_u64(buf: &mut [u8], value: u64) {
    buf[..8].copy_from_slice(&value.to_be_bytes());
}

pub fn read_u8(buf: &[u8]) -> u8 {
    buf[0]
}

pub fn write_u8(buf: &mut [u8], value: u8) {
    buf[0] = value;
}

/// Random 32-bit salt used to disambiguate a record's identity within a slot
/// across its lifetime (the slot is reused after an overwrite; the salt is not).
pub fn random_u32() -> u32 {
    rand::thread_rng().next_u32()
}

/// Random 64-bit secret stored in the root chunk and used to key the
/// identifier obfuscator.
pub fn random_u64() -> u64 {
    rand::thread_rng().next_u64()
}

pub fn utf8_to_bytes(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

pub fn bytes_to_utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

pub fn base64_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn base64_decode(s: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_round_trips() {
        let mut buf = [0u8; 4];
        write_u32(&mut buf, 0xDEAD_BEEF);
        assert_eq!(read_u32(&buf), 0xDEAD_BEEF);
    }

    #[test]
    fn u64_round_trips() {
        let mut buf = [0u8; 8];
        write_u64(&mut buf, 0x0102_0304_0506_0708);
        assert_eq!(read_u64(&buf), 0x0102_0304_0506_0708);
    }

    #[test]
    fn base64_round_trips() {
        let original = b"hello overflow chain \x00\x01\xff";
        let encoded = base64_encode(original);
        assert_eq!(base64_decode(&encoded).unwrap(), original);
    }
}
