//! Short random identifiers for naming per-run resources

use rand::Rng;

const BASE62: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const UNIQUE_ID_LEN: usize = 6;

/// Six base62 characters, unique enough to keep concurrent runs apart
pub fn unique_id() -> String {
    let mut rng = rand::thread_rng();
    (0..UNIQUE_ID_LEN)
        .map(|_| BASE62[rng.gen_range(0..BASE62.len())] as char)
        .collect()
}
