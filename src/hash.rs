//! Hashing of command lines, so the command log can detect when the command
//! for an output changed without storing the command itself.
//!
//! This is MurmurHash64A with a fixed seed.  The values are persisted in
//! `.ninja_log`, so the function must stay bit-for-bit stable.

const SEED: u64 = 0xDECA_FBAD_DECA_FBAD;
const M: u64 = 0xc6a4_a793_5bd1_e995;
const R: u32 = 47;

fn murmur_hash_64a(key: &[u8]) -> u64 {
    let mut h = SEED ^ (key.len() as u64).wrapping_mul(M);

    let mut chunks = key.chunks_exact(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let mut k = u64::from_le_bytes(word);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, &b) in tail.iter().enumerate() {
            h ^= (b as u64) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

/// Hash a fully-expanded command line.
pub fn hash_command(command: &str) -> u64 {
    murmur_hash_64a(command.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(hash_command(""), 0x87c2bc0beaf1d91d);
        assert_eq!(hash_command("command"), 0xc34ad9619fad4845);
        // Exactly one 8-byte block and no tail.
        assert_eq!(hash_command("abcdefgh"), 0xb06e38308dda3e98);
        assert_eq!(hash_command("cat in1 in2 > out"), 0x08cdc7b25b2c5d13);
    }

    #[test]
    fn sensitive_to_every_byte() {
        assert_ne!(hash_command("cc -O2 a.c"), hash_command("cc -O3 a.c"));
        assert_ne!(hash_command("x"), hash_command("x "));
    }
}
