/// Running average of a scalar stream (per-epoch loss)
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    steps: usize,
    total: f64,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.total += value;
        self.steps += 1;
    }

    /// Mean of all values so far, 0 before the first update
    pub fn value(&self) -> f64 {
        if self.steps == 0 {
            return 0.0;
        }
        self.total / self.steps as f64
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
