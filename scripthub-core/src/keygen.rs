//! Key string generation
//!
//! Keys look like `SH-<time>-<8>-<8>-<4>`: a base-36 millisecond timestamp
//! followed by random upper-case alphanumeric segments.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Prefix every generated key carries
pub const KEY_PREFIX: &str = "SH";

const SEGMENT_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generate a fresh key value stamped with `now`
pub fn generate_key_value(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let mut segment = |len: usize| -> String {
        (0..len)
            .map(|_| SEGMENT_ALPHABET[rng.gen_range(0..SEGMENT_ALPHABET.len())] as char)
            .collect()
    };
    let a = segment(8);
    let b = segment(8);
    let c = segment(4);
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    format!("{KEY_PREFIX}-{}-{a}-{b}-{c}", to_base36(millis))
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(SEGMENT_ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
