use rand::rngs::OsRng;
use rand::Rng;

const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const TOKEN_LENGTH: usize = 27;

/// Generate a fresh relay session token
pub fn generate_token() -> String {
    let mut rng = OsRng;
    (0..TOKEN_LENGTH)
        .map(|_| BASE62[rng.gen_range(0..BASE62.len())] as char)
        .collect()
}
