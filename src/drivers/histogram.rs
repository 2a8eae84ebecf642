use std::collections::BTreeMap;

/// Amplitude histogram with a fixed bin width and bin count.
///
/// Negative amplitudes land in bin 0 and anything past the range lands in the
/// last bin, so the tails merge into the boundary bins.
#[derive(Clone, Debug)]
pub struct RunningHistogram {
    bin_width: f64,
    bin_count: usize,
    counts: BTreeMap<usize, u64>,
    total: u64,
}

impl RunningHistogram {
    pub fn new(bin_width: f64, bin_count: usize) -> Self {
        Self {
            bin_width,
            bin_count: bin_count.max(1),
            counts: BTreeMap::new(),
            total: 0,
        }
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub fn bin_index(&self, value: f64) -> usize {
        let raw = (value / self.bin_width).floor();
        if raw.is_nan() || raw <= 0.0 {
            return 0;
        }
        let last = self.bin_count - 1;
        if raw >= last as f64 {
            last
        } else {
            raw as usize
        }
    }

    pub fn add(&mut self, value: f64) {
        let bin = self.bin_index(value);
        *self.counts.entry(bin).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn count(&self, bin: usize) -> u64 {
        self.counts.get(&bin).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Center of the most populated bin. Ties go to the lowest bin.
    pub fn mode_center(&self) -> Option<f64> {
        let mut best: Option<(usize, u64)> = None;
        for (&bin, &count) in &self.counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((bin, count));
            }
        }
        best.map(|(bin, _)| (bin as f64 + 0.5) * self.bin_width)
    }
}
