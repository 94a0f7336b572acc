//! Work item identifiers.
//!
//! Upstream tables sometimes carry the legacy numeric id (`avid`) instead of
//! the public `BV...` id the API expects; [`av_to_bv`] converts between them.

const TABLE: &[u8; 58] = b"fZodR9XQDSUm21yCkr6zBqiveYah8bt4xsWpHnJE7jL5VG3guMTKNPAwcF";
const POSITIONS: [usize; 6] = [11, 10, 3, 8, 4, 6];
const XOR: u64 = 177_451_812;
const ADD: u64 = 8_728_348_608;

/// Convert a legacy numeric id into its public `BV1...` form
pub fn av_to_bv(av: u64) -> String {
    let x = (av ^ XOR) + ADD;
    let mut out = *b"BV1  4 1 7  ";
    let mut power = 1u64;
    for pos in POSITIONS {
        out[pos] = TABLE[((x / power) % 58) as usize];
        power *= 58;
    }
    out.iter().map(|&b| b as char).collect()
}

/// Whether a string looks like a public id the API will accept
pub fn is_public_id(id: &str) -> bool {
    id.len() == 12 && id.starts_with("BV") && id.chars().all(|c| c.is_ascii_alphanumeric())
}
