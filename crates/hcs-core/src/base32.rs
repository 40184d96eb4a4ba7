//! Human-readable base32 rendering for object ids.
//!
//! Uses a Crockford-like alphabet without the easily confused characters
//! (no I, L, O, 0). The output is left-padded to a multiple of three digits
//! and grouped with dashes so ids can be read aloud and compared by eye.

const ALPHABET: &[u8; 32] = b"ABCDEFGHJKMNPQRSTUVWXYZ123456789";

/// Encode a 64-bit id, e.g. `to_base32(1) == "AAB"`.
pub fn to_base32(mut number: u64) -> String {
    let mut digits: Vec<u8> = Vec::new();
    while number > 0 {
        digits.push(ALPHABET[(number % 32) as usize]);
        number /= 32;
    }
    if digits.is_empty() {
        digits.push(ALPHABET[0]);
    }
    digits.reverse();

    // Pad to the next multiple of 3 with the zero digit.
    let padded_len = digits.len().div_ceil(3) * 3;
    let mut result = Vec::with_capacity(padded_len + padded_len / 3);
    result.resize(padded_len - digits.len(), ALPHABET[0]);
    result.extend_from_slice(&digits);

    // Dash after every group of 3.
    let mut out = String::with_capacity(result.len() + result.len() / 3);
    for (i, ch) in result.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            out.push('-');
        }
        out.push(char::from(*ch));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_renders_as_single_group() {
        assert_eq!(to_base32(0), "AAA");
    }

    #[test]
    fn small_values_are_left_padded() {
        assert_eq!(to_base32(1), "AAB");
        assert_eq!(to_base32(31), "AA9");
        assert_eq!(to_base32(32), "ABA");
    }

    #[test]
    fn groups_are_dash_separated() {
        // 32^3 needs four digits and therefore two groups.
        assert_eq!(to_base32(32 * 32 * 32), "AAB-AAA");
    }
}
