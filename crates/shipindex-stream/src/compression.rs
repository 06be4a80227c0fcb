//! Payload compression for `traces` / `deltas`.
//!
//! Which transform applies is configured per payload; bytes are never sniffed.

use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use shipindex_core::config::Compression;
use shipindex_core::error::IndexerError;

pub fn decompress(compression: Compression, bytes: &[u8]) -> Result<Vec<u8>, IndexerError> {
    let mut out = Vec::with_capacity(bytes.len() * 4);
    let result = match compression {
        Compression::None => return Ok(bytes.to_vec()),
        Compression::Zlib => ZlibDecoder::new(bytes).read_to_end(&mut out),
        Compression::Gzip => GzDecoder::new(bytes).read_to_end(&mut out),
    };
    result.map_err(|e| IndexerError::Protocol(format!("{compression:?} payload: {e}")))?;
    Ok(out)
}

/// Inverse of [`decompress`], for feeding test sessions.
pub fn compress(compression: Compression, bytes: &[u8]) -> Result<Vec<u8>, IndexerError> {
    let io_err = |e: std::io::Error| IndexerError::Protocol(e.to_string());
    match compression {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Zlib => {
            let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(bytes).map_err(io_err)?;
            enc.finish().map_err(io_err)
        }
        Compression::Gzip => {
            let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(bytes).map_err(io_err)?;
            enc.finish().map_err(io_err)
        }
    }
}
