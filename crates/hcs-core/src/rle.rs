//! Run-length encoding for binary object masks.
//!
//! The store keeps masks in a compact run form: each run is a `u32`
//! little-endian length followed by one byte that is `1` for foreground.
//! An empty input encodes to an empty buffer.

/// Encode a binary mask (any value > 0 is foreground) into RLE bytes.
pub fn rle_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let Some(first) = data.first() else {
        return out;
    };

    let mut current = *first > 0;
    let mut count: u32 = 1;
    for value in &data[1..] {
        if (*value > 0) == current {
            count += 1;
        } else {
            out.extend_from_slice(&count.to_le_bytes());
            out.push(u8::from(current));
            current = *value > 0;
            count = 1;
        }
    }
    out.extend_from_slice(&count.to_le_bytes());
    out.push(u8::from(current));
    out
}

/// Decode RLE bytes back into a flat binary mask of 0/1 values.
pub fn rle_decode(encoded: &[u8]) -> crate::Result<Vec<u8>> {
    if encoded.len() % 5 != 0 {
        return Err(crate::Error::Corrupted(format!(
            "rle buffer length {} is not a multiple of 5",
            encoded.len()
        )));
    }
    let mut out = Vec::new();
    for run in encoded.chunks_exact(5) {
        let count = u32::from_le_bytes([run[0], run[1], run[2], run[3]]) as usize;
        let value = u8::from(run[4] > 0);
        out.resize(out.len() + count, value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_runs() {
        let mask = [0, 0, 1, 1, 1, 0, 1];
        let encoded = rle_encode(&mask);
        assert_eq!(encoded.len(), 4 * 5);
        assert_eq!(rle_decode(&encoded).unwrap(), vec![0, 0, 1, 1, 1, 0, 1]);
    }

    #[test]
    fn empty_mask_encodes_empty() {
        assert!(rle_encode(&[]).is_empty());
        assert!(rle_decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn truncated_buffer_is_corrupted() {
        assert!(rle_decode(&[1, 0, 0]).is_err());
    }
}
