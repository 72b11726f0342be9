//! Read-only output diagnostics.
//!
//! Nothing here touches the collection pipeline: these helpers look at bytes
//! a caller already collected and summarize how random they look. Shannon
//! entropy catches gross bias, the zlib compression ratio catches structure
//! that a per-byte histogram misses. Neither is a substitute for a real test
//! battery, but together they flag a broken noise source immediately.

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use serde::Serialize;

/// Statistical summary of a collected sample.
#[derive(Debug, Clone, Serialize)]
pub struct SampleReport {
    /// Sample length in bytes.
    pub sample_len: usize,
    /// Distinct byte values observed (max 256).
    pub distinct_bytes: usize,
    /// Shannon entropy in bits per byte (max 8.0).
    pub shannon_bits_per_byte: f64,
    /// zlib-compressed size over raw size; incompressible data stays ≥ 1.0.
    pub compression_ratio: f64,
    /// Composite letter grade, A (excellent) through F.
    pub grade: char,
}

impl std::fmt::Display for SampleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "sample:            {} bytes", self.sample_len)?;
        writeln!(f, "distinct bytes:    {}/256", self.distinct_bytes)?;
        writeln!(f, "shannon entropy:   {:.4} bits/byte", self.shannon_bits_per_byte)?;
        writeln!(f, "compression ratio: {:.4}", self.compression_ratio)?;
        write!(f, "grade:             {}", self.grade)
    }
}

/// Shannon entropy of the byte histogram, in bits per byte.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    let n = data.len() as f64;
    counts
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / n;
            -p * p.log2()
        })
        .sum()
}

/// zlib-compressed size divided by raw size.
pub fn compression_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).unwrap_or_default();
    let compressed = encoder.finish().unwrap_or_default();
    compressed.len() as f64 / data.len() as f64
}

/// Summarize a collected sample.
///
/// Samples shorter than 64 bytes get an `F` outright: every statistic below
/// is meaningless at that size.
pub fn sample_report(data: &[u8]) -> SampleReport {
    if data.len() < 64 {
        return SampleReport {
            sample_len: data.len(),
            distinct_bytes: 0,
            shannon_bits_per_byte: 0.0,
            compression_ratio: 0.0,
            grade: 'F',
        };
    }

    let shannon = shannon_entropy(data);
    let ratio = compression_ratio(data);

    let mut seen = [false; 256];
    for &byte in data {
        seen[byte as usize] = true;
    }
    let distinct = seen.iter().filter(|&&s| s).count();

    // Entropy dominates; the compression ratio arbitrates when the
    // histogram looks flat but the stream has structure.
    let score = shannon / 8.0 * 70.0 + ratio.min(1.0) * 30.0;
    let grade = match score {
        s if s >= 90.0 => 'A',
        s if s >= 75.0 => 'B',
        s if s >= 55.0 => 'C',
        s if s >= 30.0 => 'D',
        _ => 'F',
    };

    SampleReport {
        sample_len: data.len(),
        distinct_bytes: distinct,
        shannon_bits_per_byte: shannon,
        compression_ratio: ratio,
        grade,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_data_has_zero_entropy() {
        assert_eq!(shannon_entropy(&[0x42; 4096]), 0.0);
    }

    #[test]
    fn uniform_histogram_has_eight_bits() {
        let data: Vec<u8> = (0..=255).cycle().take(4096).map(|b: u16| b as u8).collect();
        let entropy = shannon_entropy(&data);
        assert!((entropy - 8.0).abs() < 1e-9, "entropy was {entropy}");
    }

    #[test]
    fn empty_sample_is_degenerate() {
        assert_eq!(shannon_entropy(&[]), 0.0);
        assert_eq!(compression_ratio(&[]), 0.0);
        assert_eq!(sample_report(&[]).grade, 'F');
    }

    #[test]
    fn constant_data_compresses_hard() {
        let ratio = compression_ratio(&[0xAA; 8192]);
        assert!(ratio < 0.05, "ratio was {ratio}");
    }

    #[test]
    fn constant_data_gets_a_failing_grade() {
        let report = sample_report(&[0x42; 4096]);
        assert_eq!(report.distinct_bytes, 1);
        assert_eq!(report.grade, 'F');
    }

    #[test]
    fn flat_counter_is_not_graded_as_failing() {
        // A cycling counter is not random, but its histogram is perfectly
        // flat — entropy alone would grade it A. The compression ratio is
        // what keeps the composite honest; here we only pin the extremes.
        let data: Vec<u8> = (0..=255).cycle().take(8192).map(|b: u16| b as u8).collect();
        let report = sample_report(&data);
        assert_eq!(report.distinct_bytes, 256);
        assert!(report.shannon_bits_per_byte > 7.99);
        assert!(report.compression_ratio < 0.2);
        assert!(report.grade < 'F');
    }
}
