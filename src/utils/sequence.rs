use std::io::{self, Write};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use crate::config::defs::PHRED_OFFSET;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DNA {
    A,
    C,
    G,
    T,
}

impl DNA {
    /// Convert nucleotide to its byte representation.
    pub fn to_byte(&self) -> u8 {
        match self {
            DNA::A => b'A',
            DNA::C => b'C',
            DNA::G => b'G',
            DNA::T => b'T',
        }
    }

    /// Get all possible nucleotides as a static slice.
    pub fn all() -> &'static [DNA] {
        &[DNA::A, DNA::C, DNA::G, DNA::T]
    }

    /// Generate a random nucleotide with a provided RNG.
    pub fn random_with_rng<R: Rng + ?Sized>(rng: &mut R) -> DNA {
        DNA::all().choose(rng).copied().unwrap_or(DNA::A)
    }

    /// Generate a random sequence of nucleotides of the given length.
    pub fn random_sequence<R: Rng + ?Sized>(rng: &mut R, length: usize) -> Vec<u8> {
        (0..length).map(|_| DNA::random_with_rng(&mut *rng).to_byte()).collect()
    }
}


/// Draws phred scores from a normal distribution, clamped to 0..=40.
pub fn normal_phred_quals<R: Rng + ?Sized>(rng: &mut R, length: usize, mean: f32, stdev: f32) -> Vec<u8> {
    match Normal::new(mean, stdev) {
        Ok(normal) => (0..length)
            .map(|_| normal.sample(&mut *rng).clamp(0.0, 40.0) as u8)
            .collect(),
        Err(_) => vec![mean.clamp(0.0, 40.0) as u8; length],
    }
}


/// Generates synthetic CCS reads drawn from a reference, for tests and benchmarks.
///
/// Reads are named `synthetic/<hole>/ccs` and carry `np=` and `rq=` tags.
pub struct SyntheticReads {
    rng: StdRng,
    reference: Vec<u8>,
    read_len: usize,
    substitution_rate: f64,
}

impl SyntheticReads {
    pub fn new(seed: u64, reference: Vec<u8>, read_len: usize, substitution_rate: f64) -> Self {
        let read_len = read_len.min(reference.len());
        SyntheticReads {
            rng: StdRng::seed_from_u64(seed),
            reference,
            read_len,
            substitution_rate,
        }
    }

    /// One read taken from a random reference window, with random substitutions.
    pub fn next_read(&mut self) -> (Vec<u8>, Vec<u8>) {
        let max_start = self.reference.len().saturating_sub(self.read_len);
        let start = self.rng.random_range(0..=max_start);
        let mut seq = self.reference[start..start + self.read_len].to_vec();
        for base in seq.iter_mut() {
            if self.rng.random_bool(self.substitution_rate) {
                let replacement = DNA::random_with_rng(&mut self.rng).to_byte();
                *base = replacement;
            }
        }
        let qual = normal_phred_quals(&mut self.rng, seq.len(), 30.0, 5.0);
        (seq, qual)
    }

    /// Writes `count` reads as FASTQ, hole numbers starting at 0.
    pub fn write_fastq<W: Write>(&mut self, writer: &mut W, count: usize) -> io::Result<()> {
        for hole in 0..count {
            let (seq, qual) = self.next_read();
            let passes = self.rng.random_range(3..30);
            writeln!(writer, "@synthetic/{}/ccs np={} rq=0.99", hole, passes)?;
            writer.write_all(&seq)?;
            writeln!(writer, "\n+")?;
            let encoded: Vec<u8> = qual.iter().map(|q| q + PHRED_OFFSET).collect();
            writer.write_all(&encoded)?;
            writeln!(writer)?;
        }
        Ok(())
    }
}
