//! Content-encoding helpers.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Content-type prefixes worth compressing.
pub const COMPRESSIBLE_TYPES: [&str; 5] = [
    "text/",
    "application/javascript",
    "application/json",
    "application/xml",
    "application/x-www-form-urlencoded",
];

/// Whether a `content-type` value starts with a compressible prefix.
pub fn is_compressible(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    COMPRESSIBLE_TYPES
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
}

pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(data).read_to_end(&mut decoded)?;
    Ok(decoded)
}
