// File checksums (MD5 as recorded by the scanner, BLAKE3 accepted too)

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};

use crate::constants::HASH_CHUNK_SIZE;
use crate::error::{Result, XBakeError};
use crate::store::Checksum;

fn stream_file(path: &Path, mut update: impl FnMut(&[u8])) -> Result<()> {
    let mut file = File::open(path)
        .map_err(|e| XBakeError::Hash(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| XBakeError::Hash(format!("Failed to read {}: {}", path.display(), e)))?;
        if bytes_read == 0 {
            break;
        }
        update(&buffer[..bytes_read]);
    }

    Ok(())
}

/// Lowercase hex MD5 of the whole file
pub fn compute_md5(path: &Path) -> Result<String> {
    let mut hasher = Md5::new();
    stream_file(path, |chunk| hasher.update(chunk))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Lowercase hex BLAKE3 of the whole file
pub fn compute_blake3(path: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    stream_file(path, |chunk| {
        hasher.update(chunk);
    })?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// True if `path` is a regular file whose content matches the recorded
/// checksum. A record with no usable checksum never matches.
pub fn file_matches_checksum(path: &Path, checksum: &Checksum) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }

    if let Some(expected) = checksum.md5.as_deref() {
        return Ok(compute_md5(path)?.eq_ignore_ascii_case(expected));
    }
    if let Some(expected) = checksum.blake3.as_deref() {
        return Ok(compute_blake3(path)?.eq_ignore_ascii_case(expected));
    }

    Ok(false)
}
