//! Payload masking (RFC 6455 section 5.3).
//!
//! Masking and unmasking are the same XOR, so one routine serves both
//! directions. The 4-byte key is doubled into a u64 and applied to aligned
//! 8-byte blocks; the tail shorter than a block is handled byte-wise.

/// XOR `data` in place with the masking key.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    let key64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let block = u64::from_ne_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ]);
        chunk.copy_from_slice(&(block ^ key64).to_ne_bytes());
    }

    let tail = chunks.into_remainder();
    for (i, byte) in tail.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}
