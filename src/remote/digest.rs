//! Content equality between a local and a remote file.
//!
//! Callers are expected to have compared sizes first; the functions here always
//! read both streams in full.

use std::io::Read;

use sha2::{Digest, Sha256};

/// Read buffer size used while hashing (10 MB).
pub const DIGEST_BUFFER_SIZE: usize = 10_000_000;

/// Allocate a digest buffer of the standard size.
pub fn digest_buffer() -> Vec<u8> {
    vec![0u8; DIGEST_BUFFER_SIZE]
}

/// Compute the hex SHA256 digest of a stream, reading through `buffer`.
pub fn content_digest<R: Read>(mut reader: R, buffer: &mut [u8]) -> std::io::Result<String> {
    let mut hasher = Sha256::new();

    loop {
        let n = match reader.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Whether two streams carry byte-identical content.
pub fn is_identical<L: Read, R: Read>(
    local: L,
    remote: R,
    buffer: &mut [u8],
) -> std::io::Result<bool> {
    let local_digest = content_digest(local, buffer)?;
    let remote_digest = content_digest(remote, buffer)?;
    Ok(local_digest == remote_digest)
}
