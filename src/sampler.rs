use std::collections::HashSet;

use crate::constants::sampler::{FRACTION_EPSILON, SAMPLE_SEED_OFFSET};
use crate::data::Record;
use crate::errors::ReviewError;
use crate::hash::mix64;

#[derive(Debug, Clone)]
/// Small deterministic RNG (SplitMix64) so samples reproduce across runs and platforms.
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64_internal(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        mix64(self.state)
    }
}

impl rand::RngCore for DeterministicRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64_internal() as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.next_u64_internal()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut offset = 0;
        while offset < dest.len() {
            let value = self.next_u64_internal();
            let bytes = value.to_le_bytes();
            let remaining = dest.len() - offset;
            let copy_len = remaining.min(bytes.len());
            dest[offset..offset + copy_len].copy_from_slice(&bytes[..copy_len]);
            offset += copy_len;
        }
    }
}

/// Number of records a sample of `fraction` draws from `len` records.
///
/// `fraction` is clamped into `(0, 1]`; a non-empty input always yields at
/// least one record. Non-positive or NaN fractions behave like the smallest
/// possible fraction.
pub fn sample_size(len: usize, fraction: f64) -> usize {
    if len == 0 {
        return 0;
    }
    if fraction.is_nan() || fraction <= 0.0 {
        return 1;
    }
    let fraction = fraction.min(1.0);
    let raw = (len as f64 * fraction + FRACTION_EPSILON).floor() as usize;
    raw.clamp(1, len)
}

/// Draw a reproducible, ordered subset of `records`.
///
/// Records are first put into canonical id order so the result does not
/// depend on the order the store returned them in; the same records, seed,
/// and fraction always produce the same subset in the same order.
pub fn sample_records(
    records: &[Record],
    fraction: f64,
    seed: u64,
) -> Result<Vec<Record>, ReviewError> {
    validate_identifiers(records)?;
    if records.is_empty() {
        return Err(ReviewError::EmptyInput);
    }

    let mut canonical: Vec<&Record> = records.iter().collect();
    canonical.sort_by(|a, b| a.id.cmp(&b.id));

    let amount = sample_size(canonical.len(), fraction);
    let mut rng = DeterministicRng::new(seed.wrapping_add(SAMPLE_SEED_OFFSET));
    let picked = rand::seq::index::sample(&mut rng, canonical.len(), amount);
    Ok(picked
        .into_iter()
        .map(|position| canonical[position].clone())
        .collect())
}

fn validate_identifiers(records: &[Record]) -> Result<(), ReviewError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if record.id.trim().is_empty() {
            return Err(ReviewError::InvalidRecord {
                record_id: record.id.clone(),
                reason: format!("record with serial {} has a blank identifier", record.serial),
            });
        }
        if !seen.insert(record.id.as_str()) {
            return Err(ReviewError::InvalidRecord {
                record_id: record.id.clone(),
                reason: "duplicate identifier".to_string(),
            });
        }
    }
    Ok(())
}
