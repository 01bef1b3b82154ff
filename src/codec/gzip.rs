use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Largest body `decompress` will inflate.
pub const MAX_INFLATED_BYTES: u64 = 8 * 1024 * 1024;

/// Inflate a gzip stream, refusing anything that grows past
/// `MAX_INFLATED_BYTES`.
pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data).take(MAX_INFLATED_BYTES + 1);
    let mut out = Vec::with_capacity(data.len().saturating_mul(4).min(64 * 1024));
    decoder.read_to_end(&mut out)?;
    if out.len() as u64 > MAX_INFLATED_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("inflated body exceeds {MAX_INFLATED_BYTES} bytes"),
        ));
    }
    Ok(out)
}

/// Does a `Content-Encoding` / `Accept-Encoding` value mention gzip?
pub fn mentions_gzip(header: Option<&str>) -> bool {
    header.is_some_and(|v| v.to_ascii_lowercase().contains("gzip"))
}
