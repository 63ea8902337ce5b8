//! Hashes whose output is fixed by this module rather than by the standard
//! library, so batch ids stay the same across toolchains and platforms.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// SplitMix64 output mixer.
pub fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// FNV-1a over length-prefixed fields, finished with `mix64`.
struct StableHasher {
    state: u64,
}

impl StableHasher {
    fn new(seed: u64) -> Self {
        let mut hasher = Self { state: FNV_OFFSET };
        hasher.write_u64(seed);
        hasher
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= u64::from(*byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    // Length prefix keeps ["ab", "c"] and ["a", "bc"] apart.
    fn write_str(&mut self, value: &str) {
        self.write_u64(value.len() as u64);
        self.write_bytes(value.as_bytes());
    }

    fn finish(&self) -> u64 {
        mix64(self.state)
    }
}

pub fn stable_hash_str(seed: u64, value: &str) -> u64 {
    let mut hasher = StableHasher::new(seed);
    hasher.write_str(value);
    hasher.finish()
}

/// Order-sensitive hash over a sequence of strings.
pub fn stable_hash_seq<'a, I>(seed: u64, values: I) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = StableHasher::new(seed);
    for value in values {
        hasher.write_str(value);
    }
    hasher.finish()
}
