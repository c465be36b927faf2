/// Default sample rate of session audio in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Default number of samples in one analysis frame.
pub const DEFAULT_ANALYSIS_FRAME_SIZE: usize = 2048;

/// A point-in-time window of remote audio, every sample in [-1, 1].
///
/// The length is fixed for the lifetime of a session by the configured analysis
/// resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        let samples = samples
            .into_iter()
            .map(|s| if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) })
            .collect();
        Self { samples }
    }

    pub fn silent(len: usize) -> Self {
        Self {
            samples: vec![0.0; len],
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_clamps_samples() {
        let frame = AudioFrame::new(vec![-2.0, -0.5, 0.0, 0.5, 3.0, f32::NAN]);
        assert_eq!(frame.samples(), &[-1.0, -0.5, 0.0, 0.5, 1.0, 0.0]);
        assert_eq!(frame.len(), 6);
    }

    #[test]
    fn test_silent_frame() {
        let frame = AudioFrame::silent(4);
        assert_eq!(frame.samples(), &[0.0; 4]);
    }
}
