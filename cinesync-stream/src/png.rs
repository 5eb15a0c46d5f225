//! TS-as-PNG disguise.
//!
//! Some CDNs and hotlink filters only pass image content types. When
//! enabled, each segment is served as `image/png` with a valid 1×1
//! grayscale PNG prepended; PNG decoders stop at IEND, media players strip
//! the prefix before handing bytes to the demuxer.

use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rand::Rng;
use std::io::Write;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn write_chunk(out: &mut BytesMut, kind: &[u8; 4], payload: &[u8]) {
    out.put_u32(payload.len() as u32);
    out.put_slice(kind);
    out.put_slice(payload);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(payload);
    out.put_u32(hasher.finalize());
}

/// A complete 1×1 8-bit grayscale PNG with a random shade.
#[must_use]
pub fn random_png() -> Bytes {
    let shade: u8 = rand::thread_rng().gen();

    let mut out = BytesMut::with_capacity(96);
    out.put_slice(&PNG_SIGNATURE);

    // IHDR: 1x1, bit depth 8, color type 0 (grayscale)
    let ihdr = [0, 0, 0, 1, 0, 0, 0, 1, 8, 0, 0, 0, 0];
    write_chunk(&mut out, b"IHDR", &ihdr);

    // IDAT: one scanline: filter byte + the pixel
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    let _ = encoder.write_all(&[0, shade]);
    let idat = encoder.finish().unwrap_or_default();
    write_chunk(&mut out, b"IDAT", &idat);

    write_chunk(&mut out, b"IEND", &[]);
    out.freeze()
}

/// Segment payload with the PNG header prepended.
#[must_use]
pub fn disguise_segment(segment: &Bytes) -> Bytes {
    let png = random_png();
    let mut out = BytesMut::with_capacity(png.len() + segment.len());
    out.put_slice(&png);
    out.put_slice(segment);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_structure() {
        let png = random_png();
        assert_eq!(&png[..8], &PNG_SIGNATURE);
        // IHDR length and type at fixed offsets
        assert_eq!(&png[8..12], &[0, 0, 0, 13]);
        assert_eq!(&png[12..16], b"IHDR");
        // Ends with an IEND chunk
        assert_eq!(&png[png.len() - 8..png.len() - 4], b"IEND");
    }

    #[test]
    fn test_disguise_prefixes_segment() {
        let segment = Bytes::from_static(&[0x47, 0x40, 0x00, 0x10]);
        let disguised = disguise_segment(&segment);
        assert_eq!(&disguised[..8], &PNG_SIGNATURE);
        assert!(disguised.ends_with(&[0x47, 0x40, 0x00, 0x10]));
        assert!(disguised.len() > segment.len());
    }
}
