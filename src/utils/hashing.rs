//! Hashing utilities

use xxhash_rust::xxh3::xxh3_128;

/// Separates fields so ("ab", "c") and ("a", "bc") hash differently
const FIELD_SEPARATOR: char = '\u{1f}';

/// Create a case-insensitive, alphanumeric-normalized hash
///
/// # Arguments
/// * `args` - Strings to hash together
/// * `decode` - Whether to decode unicode to ASCII
///
/// # Returns
/// A 32-character hex string hash
pub fn create_hash(args: &[&str], decode: bool) -> String {
    let mut combined = String::new();

    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            combined.push(FIELD_SEPARATOR);
        }
        let processed = if decode {
            remove_non_alnum(&deunicode::deunicode(arg))
        } else {
            remove_non_alnum(arg)
        };
        combined.push_str(&processed);
    }

    format!("{:032x}", xxh3_128(combined.as_bytes()))
}

/// Remove non-alphanumeric characters and normalize
fn remove_non_alnum(token: &str) -> String {
    let lower = token.to_lowercase();
    let trimmed = lower.trim().replace(' ', "");

    let filtered: String = trimmed.chars().filter(|c| c.is_alphanumeric()).collect();

    if filtered.is_empty() {
        trimmed
    } else {
        filtered
    }
}

/// Content hash for a track that has no stable service identifier
pub fn create_track_hash(name: &str, album: &str, artists: &str) -> String {
    create_hash(&[name, album, artists], true)
}
