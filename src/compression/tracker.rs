//! Per-compression-factor fill histogram.

use crate::config::MAX_COMPRESSIBILITY;

/// Counts how many filled lines landed at each compression factor.
/// The count for factor `cf` is stored at index `cf - 1`.
#[derive(Clone, Debug, Default)]
pub struct CompressionTracker {
    counts: [u64; MAX_COMPRESSIBILITY],
}

impl CompressionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fill at the given compression factor (1, 2 or 4).
    pub fn increment(&mut self, compression_factor: u32) {
        assert!(
            matches!(compression_factor, 1 | 2) || compression_factor == MAX_COMPRESSIBILITY as u32,
            "compression factor out of range: {compression_factor}"
        );
        self.counts[compression_factor as usize - 1] += 1;
    }

    /// Fill count recorded at the given compression factor.
    pub fn count(&self, compression_factor: u32) -> u64 {
        self.counts[compression_factor as usize - 1]
    }

    fn factors() -> impl Iterator<Item = u32> {
        // 4, 2, 1
        std::iter::successors(Some(MAX_COMPRESSIBILITY as u32), |&f| {
            (f > 1).then_some(f / 2)
        })
    }

    /// Render the histogram plus the derived compression ratios. Rows are
    /// labelled by the factor itself.
    pub fn report(&self) -> String {
        let total_lines: u64 = Self::factors().map(|f| self.count(f)).sum();
        if total_lines == 0 {
            return "No lines filled\n".to_string();
        }

        let mut out = String::new();
        let mut denominator = 0.0;
        for f in Self::factors() {
            let n = self.count(f);
            let ratio = n as f64 / total_lines as f64;
            denominator += n as f64 / f as f64;
            out.push_str(&format!("Compressible {f}: {n} ({:.2}%)\n", ratio * 100.0));
        }

        let bench_comp = total_lines as f64 / denominator;
        let line_comp = (4 * self.count(4) + 2 * self.count(2) + self.count(1)) as f64
            / total_lines as f64;
        out.push_str(&format!("Benchmark Compression Ratio: {bench_comp:.2}\n"));
        out.push_str(&format!("Average Line Compressibility: {line_comp:.2}\n"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_factor() {
        let mut t = CompressionTracker::new();
        t.increment(4);
        t.increment(4);
        t.increment(2);
        t.increment(1);
        assert_eq!(t.count(4), 2);
        assert_eq!(t.count(2), 1);
        assert_eq!(t.count(1), 1);
    }

    #[test]
    fn report_labels_rows_by_factor() {
        let mut t = CompressionTracker::new();
        t.increment(4);
        t.increment(1);
        let report = t.report();
        assert!(report.contains("Compressible 4: 1"));
        assert!(report.contains("Compressible 1: 1"));
        // 2 lines / (1/4 + 1/1) = 1.6
        assert!(report.contains("Benchmark Compression Ratio: 1.60"));
    }

    #[test]
    #[should_panic(expected = "compression factor out of range")]
    fn rejects_factor_three() {
        CompressionTracker::new().increment(3);
    }
}
