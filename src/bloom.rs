/*!
The engine-wide Bloom filter.

A single filter is shared across the memtable tier and the persistent store to short-circuit
negative lookups before any disk seek. Unlike the per-file filters of LevelDB-style engines,
this one is mutable: every write inserts its key, the filter is persisted alongside the WAL
checkpoint, and recovery rebuilds it before the first public read.
*/

use integer_encoding::FixedInt;

/**
An incremental Bloom filter.

This follows the LevelDB construction: an in-house Murmur-like hash with double hashing,
where the sequence of probe positions is generated by repeatedly adding a delta made of the
initial hash rotated by 17 bits. A good value for bits per key is 10, which yields roughly a
1% false positive rate.

# Serialization

The serialized form is 1 byte for the probe count, a fixed-width u64 for the bit length, and
the raw bit vector.
*/
#[derive(Debug)]
pub(crate) struct BloomFilter {
    /// The filter's bit vector.
    bits: Vec<u8>,

    /// The number of usable bits in the vector.
    num_bits: u64,

    /// This is the number of hash probes used for insertion and checking.
    num_probes: u8,
}

/// Crate-only methods
impl BloomFilter {
    /**
    Create a filter sized for `expected_keys` at the requested false positive rate.

    The classic sizing formulas apply: `bits_per_key = -ln(p) / ln(2)^2` and
    `probes = bits_per_key * ln(2)`, with the probe count clamped to keep lookup cost
    bounded even for very aggressive rates.
    */
    pub(crate) fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        let rate = false_positive_rate.clamp(1e-9, 0.5);
        let bits_per_key = (-rate.ln() / (2_f64.ln() * 2_f64.ln())).ceil() as usize;

        let mut num_probes = (bits_per_key as f64 * 0.69).floor() as u8;
        if num_probes < 1 {
            num_probes = 1;
        } else if num_probes > 30 {
            num_probes = 30;
        }

        let mut filter_size_bits = expected_keys * bits_per_key;
        if filter_size_bits < 64 {
            filter_size_bits = 64;
        }

        // The additional 7 makes the division by 8 round up instead of down
        let filter_size_bytes = (filter_size_bits + 7) / 8;

        Self {
            bits: vec![0; filter_size_bytes],
            num_bits: (filter_size_bytes * 8) as u64,
            num_probes,
        }
    }

    /// Add a key to the filter.
    pub(crate) fn insert(&mut self, key: &[u8]) {
        let mut hash = BloomFilter::hash(key);
        // Double-hashing: the sequence of probe positions is derived by adding a delta
        // component of the initial hash rotated 17 bits.
        let delta: u32 = (hash >> 17) | (hash << 15);

        for _ in 0..self.num_probes {
            let bit_position = hash as u64 % self.num_bits;
            self.bits[(bit_position / 8) as usize] |= 1 << (bit_position % 8);
            hash = hash.overflowing_add(delta).0;
        }
    }

    /**
    Test a key against the filter.

    Keys that were inserted always test true; keys that were not test false with high
    probability.
    */
    pub(crate) fn may_contain(&self, key: &[u8]) -> bool {
        let mut hash = BloomFilter::hash(key);
        let delta: u32 = (hash >> 17) | (hash << 15);

        for _ in 0..self.num_probes {
            let bit_position = hash as u64 % self.num_bits;
            if self.bits[(bit_position / 8) as usize] & (1 << (bit_position % 8)) == 0 {
                return false;
            }
            hash = hash.overflowing_add(delta).0;
        }

        true
    }

    /// Serialize the filter to a snapshot suitable for the metadata tree.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::with_capacity(1 + 8 + self.bits.len());
        buf.push(self.num_probes);
        buf.extend_from_slice(&u64::encode_fixed_vec(self.num_bits));
        buf.extend_from_slice(&self.bits);

        buf
    }

    /// Deserialize a filter snapshot. Returns [`None`] for malformed snapshots.
    pub(crate) fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < 9 {
            return None;
        }

        let num_probes = buf[0];
        let num_bits = u64::decode_fixed(&buf[1..9]);
        let bits = buf[9..].to_vec();
        if num_probes == 0 || num_bits == 0 || bits.len() as u64 * 8 != num_bits {
            return None;
        }

        Some(Self {
            bits,
            num_bits,
            num_probes,
        })
    }
}

/// Private methods
impl BloomFilter {
    /// Generates a 32-bit hash similar to the Murmur hash.
    fn hash(val: &[u8]) -> u32 {
        let seed: u32 = 0xbc9f1d34;
        let multiplier: u32 = 0xc6a4a793;
        let rotation_factor: u32 = 24;
        let val_length = val.len() as u32;
        let mut hash: u32 = seed ^ val_length.wrapping_mul(multiplier);

        // Read and process the value in groups of 4 bytes
        let mut idx: usize = 0;
        while idx + 4 <= val.len() {
            let word = u32::decode_fixed(&val[idx..idx + 4]);
            hash = hash.wrapping_add(word);
            hash = hash.wrapping_mul(multiplier);
            hash ^= hash >> 16;

            idx += 4;
        }

        // Process remaining bytes. There are at most 3 remaining since we processed in
        // 4 byte chunks above.
        let remaining_buf = &val[idx..];
        if remaining_buf.len() >= 3 {
            hash = hash.wrapping_add((remaining_buf[2] as u32) << 16);
        }

        if remaining_buf.len() >= 2 {
            hash = hash.wrapping_add((remaining_buf[1] as u32) << 8);
        }

        if !remaining_buf.is_empty() {
            hash = hash.wrapping_add(remaining_buf[0] as u32);
            hash = hash.wrapping_mul(multiplier);
            hash ^= hash >> rotation_factor;
        }

        hash
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn inserted_keys_always_test_positive() {
        let mut filter = BloomFilter::new(1000, 0.01);
        for i in 0..1000 {
            filter.insert(format!("key_{i}").as_bytes());
        }

        for i in 0..1000 {
            assert!(filter.may_contain(format!("key_{i}").as_bytes()));
        }
    }

    #[test]
    fn absent_keys_mostly_test_negative() {
        let mut filter = BloomFilter::new(1000, 0.01);
        for i in 0..1000 {
            filter.insert(format!("key_{i}").as_bytes());
        }

        let false_positives = (0..1000)
            .filter(|i| filter.may_contain(format!("other_{i}").as_bytes()))
            .count();

        // 1% nominal rate; leave generous slack to keep the test deterministic-enough
        assert!(
            false_positives < 100,
            "false positive count was {false_positives}"
        );
    }

    #[test]
    fn snapshots_round_trip() {
        let mut filter = BloomFilter::new(100, 0.01);
        filter.insert(b"persisted key");

        let restored = BloomFilter::from_bytes(&filter.to_bytes()).unwrap();
        assert!(restored.may_contain(b"persisted key"));
        assert_eq!(restored.num_probes, filter.num_probes);
        assert_eq!(restored.num_bits, filter.num_bits);
    }

    #[test]
    fn malformed_snapshots_are_rejected() {
        assert!(BloomFilter::from_bytes(&[]).is_none());
        assert!(BloomFilter::from_bytes(&[1, 2, 3]).is_none());
    }
}
