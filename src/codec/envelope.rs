/// Compression-aware value framing
///
/// With a threshold `T > 0` every stored value carries a one byte flag:
/// `[0x01][u32 BE original length][gzip(payload)]` when the payload is longer
/// than `T`, `[0x00][payload]` otherwise. With `T == 0` values are stored raw.
/// Empty values are never framed.
use crate::error::{TejidoError, TejidoResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub const FLAG_PLAIN: u8 = 0x00;
pub const FLAG_COMPRESSED: u8 = 0x01;

const HEADER_LEN: usize = 5;
const MAX_PRESIZE: usize = 16 * 1024 * 1024;

pub fn encode(payload: &[u8], threshold: usize) -> TejidoResult<Vec<u8>> {
    if threshold == 0 || payload.is_empty() {
        return Ok(payload.to_vec());
    }

    if payload.len() <= threshold {
        let mut out = Vec::with_capacity(payload.len() + 1);
        out.push(FLAG_PLAIN);
        out.extend_from_slice(payload);
        return Ok(out);
    }

    let length = u32::try_from(payload.len())
        .map_err(|_| TejidoError::codec("payload longer than u32::MAX"))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() / 2);
    out.push(FLAG_COMPRESSED);
    out.extend_from_slice(&length.to_be_bytes());

    let mut encoder = GzEncoder::new(out, Compression::default());
    encoder
        .write_all(payload)
        .map_err(|e| TejidoError::codec(format!("gzip failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| TejidoError::codec(format!("gzip failed: {}", e)))
}

pub fn decode(stored: &[u8], threshold: usize) -> TejidoResult<Vec<u8>> {
    if threshold == 0 || stored.is_empty() {
        return Ok(stored.to_vec());
    }

    match stored[0] {
        FLAG_PLAIN => Ok(stored[1..].to_vec()),
        FLAG_COMPRESSED => {
            if stored.len() < HEADER_LEN {
                return Err(TejidoError::codec("truncated envelope length"));
            }
            let mut length = [0u8; 4];
            length.copy_from_slice(&stored[1..HEADER_LEN]);
            let length = u32::from_be_bytes(length) as usize;

            let mut out = Vec::with_capacity(length.min(MAX_PRESIZE));
            GzDecoder::new(&stored[HEADER_LEN..])
                .read_to_end(&mut out)
                .map_err(|e| TejidoError::codec(format!("gunzip failed: {}", e)))?;
            Ok(out)
        }
        flag => Err(TejidoError::codec(format!("unknown envelope flag {:#04x}", flag))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_payload_is_flagged_plain() {
        let encoded = encode(b"hello", 10).unwrap();
        assert_eq!(encoded, vec![0x00, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(decode(&encoded, 10).unwrap(), b"hello");
    }

    #[test]
    fn test_large_payload_is_compressed() {
        let encoded = encode(b"helloworld!", 10).unwrap();
        assert_eq!(&encoded[..5], &[0x01, 0x00, 0x00, 0x00, 0x0B]);
        assert_eq!(decode(&encoded, 10).unwrap(), b"helloworld!");
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let payload = vec![b'x'; 10];
        assert_eq!(encode(&payload, 10).unwrap()[0], FLAG_PLAIN);
        let payload = vec![b'x'; 11];
        assert_eq!(encode(&payload, 10).unwrap()[0], FLAG_COMPRESSED);
    }

    #[test]
    fn test_zero_threshold_is_raw() {
        let payload = [0x01, 0x02, 0x03];
        assert_eq!(encode(&payload, 0).unwrap(), payload);
        assert_eq!(decode(&payload, 0).unwrap(), payload);
    }

    #[test]
    fn test_empty_passthrough() {
        for threshold in [0, 1, 1024] {
            assert!(encode(&[], threshold).unwrap().is_empty());
            assert!(decode(&[], threshold).unwrap().is_empty());
        }
    }

    #[test]
    fn test_round_trip_various_sizes() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i * 31 % 251) as u8).collect();
        for threshold in [0usize, 1, 100, 4999, 5000, 10_000] {
            for len in [1usize, 2, 99, 100, 101, 5000] {
                let slice = &payload[..len];
                let encoded = encode(slice, threshold).unwrap();
                assert_eq!(decode(&encoded, threshold).unwrap(), slice);
            }
        }
    }

    #[test]
    fn test_malformed_envelopes() {
        assert!(decode(&[0x01, 0x00, 0x00], 10).is_err());
        assert!(decode(&[0x01, 0x00, 0x00, 0x00, 0x05, 0xde, 0xad], 10).is_err());
        assert!(decode(&[0x07, b'a'], 10).is_err());
    }
}
