//! XXH64 hashing for cache keys and content fingerprints.

use std::hash::Hasher as _;
use std::io::Read;
use std::path::Path;

use twox_hash::XxHash64;

/// 1 MiB chunks keep memory flat while hashing large media files.
const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// XXH64 of a string, as 16 lowercase hex digits.
pub fn hash_string(s: &str) -> String {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(s.as_bytes());
    format!("{:016x}", hasher.finish())
}

/// XXH64 of a file's contents, as 16 lowercase hex digits.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = XxHash64::with_seed(0);
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.write(&buf[..n]);
    }
    Ok(format!("{:016x}", hasher.finish()))
}
