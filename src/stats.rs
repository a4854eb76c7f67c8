//! Incremental RTT statistics.
//!
//! Single-pass mean/variance via Welford's online algorithm, so a long run
//! never needs to retain individual samples.

/// Online accumulator for RTT samples (milliseconds).
#[derive(Debug, Clone, Default)]
pub struct StatsAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

/// Point-in-time summary of an accumulator.
#[derive(Debug, Clone)]
pub struct Summary {
    pub count: u64,
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
    pub stddev: f64,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample. Samples are append-only; there is no removal.
    pub fn add(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);

        if self.count == 1 {
            self.min = sample;
            self.max = sample;
        } else {
            if sample < self.min {
                self.min = sample;
            }
            if sample > self.max {
                self.max = sample;
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sample standard deviation: sqrt(M2 / (n - 1)) for n > 1, else 0.
    pub fn summarize(&self) -> Summary {
        let stddev = if self.count > 1 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        };
        Summary {
            count: self.count,
            min: (self.count > 0).then_some(self.min),
            avg: (self.count > 0).then_some(self.mean),
            max: (self.count > 0).then_some(self.max),
            stddev,
        }
    }
}

/// Loss percentage from sent/received counts. Zero sent reads as 0% loss.
pub fn loss_pct(sent: u64, received: u64) -> f64 {
    if sent == 0 {
        0.0
    } else {
        (sent - received) as f64 / sent as f64 * 100.0
    }
}
