//! Incremental hash sink over all bytes written, with final verification
//! (spec §4.A "Checksum Streamer").

use crate::error::{EngineError, Result};
use digest::Digest;
use storage::ChecksumAlgorithm;

/// Tagged-variant dispatch over the five supported digest algorithms
/// (spec §9: "a tagged variant + a small constructor table").
enum Inner {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
    Blake3(blake3::Hasher),
}

/// A hash sink parameterized by algorithm.
///
/// Used in two modes (spec §4.A): an end-to-end read of the finished file,
/// or wrapped around a write sink for the single-chunk fast path where byte
/// order is naturally preserved.
pub struct ChecksumStreamer {
    algorithm: ChecksumAlgorithm,
    inner: Inner,
}

impl ChecksumStreamer {
    /// Create a new streamer for `algorithm`.
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let inner = match algorithm {
            ChecksumAlgorithm::Md5 => Inner::Md5(md5::Md5::new()),
            ChecksumAlgorithm::Sha1 => Inner::Sha1(sha1::Sha1::new()),
            ChecksumAlgorithm::Sha256 => Inner::Sha256(sha2::Sha256::new()),
            ChecksumAlgorithm::Sha512 => Inner::Sha512(sha2::Sha512::new()),
            ChecksumAlgorithm::Blake3 => Inner::Blake3(blake3::Hasher::new()),
        };
        Self { algorithm, inner }
    }

    /// Parse `"alg:hex"` into `(algorithm, hex)`, validating the algorithm
    /// tag and the digest's hex length (spec §6 "Checksum string").
    pub fn parse_checksum_string(s: &str) -> Result<(ChecksumAlgorithm, String)> {
        let (alg_str, hex) = s
            .split_once(':')
            .ok_or_else(|| EngineError::MalformedChecksum(s.to_string()))?;
        let algorithm = ChecksumAlgorithm::parse(alg_str)
            .ok_or_else(|| EngineError::UnsupportedAlgorithm(alg_str.to_string()))?;
        if hex.len() != algorithm.hex_len() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(EngineError::MalformedChecksum(s.to_string()));
        }
        Ok((algorithm, hex.to_lowercase()))
    }

    /// Fold `bytes` into the digest. The caller must present bytes in
    /// file-offset order (spec §4.A).
    pub fn write(&mut self, bytes: &[u8]) {
        match &mut self.inner {
            Inner::Md5(h) => h.update(bytes),
            Inner::Sha1(h) => h.update(bytes),
            Inner::Sha256(h) => h.update(bytes),
            Inner::Sha512(h) => h.update(bytes),
            Inner::Blake3(h) => {
                h.update(bytes);
            }
        }
    }

    /// Finalize and return the lowercase hex digest. Idempotent: calling
    /// this consumes the streamer, matching the underlying hashers'
    /// one-shot `finalize` semantics.
    pub fn digest(self) -> String {
        match self.inner {
            Inner::Md5(h) => hex_encode(&h.finalize()),
            Inner::Sha1(h) => hex_encode(&h.finalize()),
            Inner::Sha256(h) => hex_encode(&h.finalize()),
            Inner::Sha512(h) => hex_encode(&h.finalize()),
            Inner::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }

    /// Finalize and compare against `expected` in constant time.
    pub fn verify(self, expected: &str) -> Result<String> {
        let algorithm = self.algorithm;
        let actual = self.digest();
        if constant_time_eq(&actual, expected) {
            Ok(actual)
        } else {
            Err(EngineError::ChecksumMismatch {
                algorithm: algorithm.as_str().to_string(),
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        s.push(HEX[(byte >> 4) as usize] as char);
        s.push(HEX[(byte & 0x0f) as usize] as char);
    }
    s
}

/// Constant-time comparison of two equal-length-expected hex strings
/// (spec §4.A "constant-time compare of equal-length hex").
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Hash a file end-to-end by streaming it through a [`ChecksumStreamer`]
/// (spec §4.F.5 "compute the final hash (streamed read)").
pub async fn hash_file(
    path: &std::path::Path,
    algorithm: ChecksumAlgorithm,
) -> Result<String> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| EngineError::io(path, e))?;
    let mut streamer = ChecksumStreamer::new(algorithm);
    let mut buf = vec![0u8; 128 * 1024];

    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| EngineError::io(path, e))?;
        if n == 0 {
            break;
        }
        streamer.write(&buf[..n]);
    }

    Ok(streamer.digest())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_input() {
        let mut streamer = ChecksumStreamer::new(ChecksumAlgorithm::Sha256);
        streamer.write(b"test");
        let digest = streamer.digest();
        assert_eq!(
            digest,
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn digest_lengths_match_spec() {
        for (alg, expected_len) in [
            (ChecksumAlgorithm::Md5, 32),
            (ChecksumAlgorithm::Sha1, 40),
            (ChecksumAlgorithm::Sha256, 64),
            (ChecksumAlgorithm::Sha512, 128),
            (ChecksumAlgorithm::Blake3, 64),
        ] {
            let mut streamer = ChecksumStreamer::new(alg);
            streamer.write(b"hello world");
            assert_eq!(streamer.digest().len(), expected_len);
        }
    }

    #[test]
    fn verify_matches() {
        let mut streamer = ChecksumStreamer::new(ChecksumAlgorithm::Sha256);
        streamer.write(b"test");
        let expected = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
        assert!(streamer.verify(expected).is_ok());
    }

    #[test]
    fn verify_mismatch() {
        let mut streamer = ChecksumStreamer::new(ChecksumAlgorithm::Sha256);
        streamer.write(b"test");
        let err = streamer.verify(&"0".repeat(64)).unwrap_err();
        assert!(matches!(err, EngineError::ChecksumMismatch { .. }));
    }

    #[test]
    fn parse_checksum_string_valid() {
        let hex = "a".repeat(64);
        let (alg, parsed_hex) =
            ChecksumStreamer::parse_checksum_string(&format!("sha256:{hex}")).unwrap();
        assert_eq!(alg, ChecksumAlgorithm::Sha256);
        assert_eq!(parsed_hex, hex);
    }

    #[test]
    fn parse_checksum_string_unsupported_algorithm() {
        let err = ChecksumStreamer::parse_checksum_string(&format!("crc32:{}", "a".repeat(8)))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn parse_checksum_string_wrong_length() {
        let err = ChecksumStreamer::parse_checksum_string("sha256:abcd").unwrap_err();
        assert!(matches!(err, EngineError::MalformedChecksum(_)));
    }

    #[test]
    fn parse_checksum_string_lowercases_hex() {
        let hex_upper = "A".repeat(64);
        let (alg, hex) =
            ChecksumStreamer::parse_checksum_string(&format!("sha256:{hex_upper}")).unwrap();
        assert_eq!(alg, ChecksumAlgorithm::Sha256);
        assert_eq!(hex, "a".repeat(64));
    }
}
