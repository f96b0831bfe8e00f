use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::{config::LightingConfig, external::LightingSink, BeatSyncError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Average colour of an RGBA buffer, looking at every `stride`-th pixel.
pub fn average_color(rgba: &[u8], stride: usize) -> Option<RgbColor> {
    let stride = stride.max(1);
    let mut sums = [0u64; 3];
    let mut count = 0u64;
    for pixel in rgba.chunks_exact(4).step_by(stride) {
        sums[0] += u64::from(pixel[0]);
        sums[1] += u64::from(pixel[1]);
        sums[2] += u64::from(pixel[2]);
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(RgbColor {
        r: (sums[0] / count) as u8,
        g: (sums[1] / count) as u8,
        b: (sums[2] / count) as u8,
    })
}

/// Render-side half of the lighting bridge. Sampling is rate limited and the
/// hand-off never blocks: when the worker is still busy the colour is dropped.
#[derive(Debug)]
pub struct LightingForwarder {
    min_interval_ms: f64,
    stride: usize,
    last_sent_ms: Option<f64>,
    dropped: u64,
    tx: Sender<RgbColor>,
}

impl LightingForwarder {
    pub fn is_due(&self, now_ms: f64) -> bool {
        self.last_sent_ms
            .map(|last| now_ms - last >= self.min_interval_ms)
            .unwrap_or(true)
    }

    /// Offers the current surface pixels. Returns whether a colour was queued.
    pub fn offer(&mut self, now_ms: f64, rgba: &[u8]) -> bool {
        if !self.is_due(now_ms) {
            return false;
        }
        let Some(color) = average_color(rgba, self.stride) else {
            return false;
        };
        self.last_sent_ms = Some(now_ms);
        match self.tx.try_send(color) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("lighting worker has stopped");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Background thread that delivers colours to the sink.
#[derive(Debug)]
pub struct LightingWorker {
    handle: JoinHandle<()>,
}

impl LightingWorker {
    pub fn spawn(
        config: &LightingConfig,
        mut sink: Box<dyn LightingSink>,
    ) -> Result<(LightingForwarder, LightingWorker)> {
        let (tx, rx) = bounded::<RgbColor>(1);
        let handle = thread::Builder::new()
            .name("lighting-sink".to_string())
            .spawn(move || {
                for color in rx.iter() {
                    if let Err(err) = sink.send_color(color) {
                        tracing::warn!(error = %err, "lighting sink rejected colour");
                    }
                }
            })?;

        let forwarder = LightingForwarder {
            min_interval_ms: 1000.0 / config.effective_rate_hz(),
            stride: config.sample_stride,
            last_sent_ms: None,
            dropped: 0,
            tx,
        };
        Ok((forwarder, LightingWorker { handle }))
    }

    /// Waits for the worker to drain. The forwarder must be dropped first.
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| BeatSyncError::msg("lighting worker panicked"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct Recording(Arc<Mutex<Vec<RgbColor>>>);

    impl LightingSink for Recording {
        fn send_color(&mut self, color: RgbColor) -> Result<()> {
            self.0.lock().unwrap().push(color);
            Ok(())
        }
    }

    #[test]
    fn averages_sampled_pixels() {
        let rgba = [255, 0, 0, 255, 0, 0, 255, 255];
        assert_eq!(
            average_color(&rgba, 1),
            Some(RgbColor { r: 127, g: 0, b: 127 })
        );
        assert_eq!(average_color(&rgba, 2), Some(RgbColor { r: 255, g: 0, b: 0 }));
        assert_eq!(average_color(&[], 1), None);
    }

    #[test]
    fn forwards_at_most_thirty_times_per_second() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let config = LightingConfig {
            max_rate_hz: 240.0,
            sample_stride: 1,
        };
        let (mut forwarder, worker) =
            LightingWorker::spawn(&config, Box::new(Recording(received.clone()))).unwrap();

        let pixels = [10, 20, 30, 255];
        let mut queued = 0;
        let mut offered = 0;
        for frame in 0..60 {
            let now = frame as f64 * 1000.0 / 60.0;
            if forwarder.is_due(now) {
                offered += 1;
            }
            if forwarder.offer(now, &pixels) {
                queued += 1;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(offered <= 30, "offered {offered} colours in one second");

        drop(forwarder);
        worker.join().unwrap();
        let received = received.lock().unwrap();
        assert_eq!(received.len(), queued);
        assert!(received.iter().all(|c| *c == RgbColor { r: 10, g: 20, b: 30 }));
    }
}
