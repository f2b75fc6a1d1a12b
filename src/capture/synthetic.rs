//! Generated test pattern for running without a camera
//!
//! Produces a gradient that shifts every frame, which gives the encoder real
//! temporal changes to work with.

use super::{FrameSource, PixelFormat, RawFrame};
use crate::errors::CaptureError;
use crate::timing::MediaClock;

pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_number: u64,
    clock: MediaClock,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_number: 0,
            clock: MediaClock::video(),
        }
    }

    pub fn frames_produced(&self) -> u64 {
        self.frame_number
    }
}

/// RGB gradient that varies by position and frame number
pub fn gradient_frame(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0u8; (width * height * 3) as usize];
    let base = (frame_number % 256) as u8;

    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }

    data
}

impl FrameSource for SyntheticSource {
    fn poll(&mut self) -> Result<RawFrame, CaptureError> {
        let data = gradient_frame(self.frame_number, self.width, self.height);
        self.frame_number += 1;

        Ok(RawFrame {
            data,
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgb24,
            pts: self.clock.now(),
        })
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_change_and_timestamps_advance() {
        let mut source = SyntheticSource::new(32, 16);
        let first = source.poll().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let second = source.poll().unwrap();

        assert!(first.check_len().is_ok());
        assert_ne!(first.data, second.data);
        assert!(second.pts > first.pts);
        assert_eq!(first.pts.clock_rate, 90_000);
        assert_eq!(source.frames_produced(), 2);
    }
}
