/// Rolling frame counter. Frames are counted over a fixed window; each
/// completed window is blended into the running estimate.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window_ms: f64,
    window_start: Option<f64>,
    frames: u32,
    estimate: f64,
}

impl FpsCounter {
    pub fn new(window_ms: f64) -> Self {
        Self {
            window_ms,
            window_start: None,
            frames: 0,
            estimate: 0.0,
        }
    }

    /// Records one frame at `now_ms` and returns the current estimate, which
    /// stays 0 until the first window completes.
    pub fn record(&mut self, now_ms: f64) -> f64 {
        let Some(start) = self.window_start else {
            self.window_start = Some(now_ms);
            return self.estimate;
        };

        self.frames += 1;
        let elapsed = now_ms - start;
        if elapsed >= self.window_ms && elapsed > 0.0 {
            let measured = f64::from(self.frames) * 1000.0 / elapsed;
            self.estimate = if self.estimate > 0.0 {
                0.5 * self.estimate + 0.5 * measured
            } else {
                measured
            };
            self.window_start = Some(now_ms);
            self.frames = 0;
        }
        self.estimate
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.frames = 0;
        self.estimate = 0.0;
    }
}
