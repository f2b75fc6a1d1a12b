//! Frame sources feeding the outbound video track
//!
//! A [`FrameSource`] hands out one timestamped RGB frame per `poll`. Polls
//! block, so callers run them on a blocking worker. A failed poll is reported
//! but leaves the source usable.

pub mod device;
pub mod synthetic;

use crate::config::CameraConfig;
use crate::errors::{CaptureError, DeviceError};
use crate::timing::MediaTime;
use std::sync::{Arc, Mutex};

pub use device::CameraSource;
pub use synthetic::SyntheticSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, 3 bytes per pixel
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// One uncompressed frame as delivered by a source
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pts: MediaTime,
}

impl RawFrame {
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn check_len(&self) -> Result<(), CaptureError> {
        let expected = self.expected_len();
        if self.data.len() != expected {
            return Err(CaptureError::BadLength {
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

pub trait FrameSource: Send {
    /// Block until the next frame is available
    fn poll(&mut self) -> Result<RawFrame, CaptureError>;

    /// Requested capture resolution
    fn resolution(&self) -> (u32, u32);
}

/// The process-wide source, borrowed frame by frame by whichever session is streaming
pub type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

pub fn shared(source: Box<dyn FrameSource>) -> SharedSource {
    Arc::new(Mutex::new(source))
}

/// Open the source described by the camera section of the config
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>, DeviceError> {
    if config.synthetic {
        log::info!(
            "Using synthetic {}x{} test pattern instead of a camera",
            config.width,
            config.height
        );
        return Ok(Box::new(SyntheticSource::new(config.width, config.height)));
    }

    let camera = CameraSource::open(config.device_index, config.width, config.height, config.fps)?;
    Ok(Box::new(camera))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::VIDEO_CLOCK_RATE;

    #[test]
    fn test_check_len() {
        let mut frame = RawFrame {
            data: vec![0; 4 * 2 * 3],
            width: 4,
            height: 2,
            format: PixelFormat::Rgb24,
            pts: MediaTime {
                ticks: 0,
                clock_rate: VIDEO_CLOCK_RATE,
            },
        };
        assert!(frame.check_len().is_ok());

        frame.data.pop();
        assert!(matches!(
            frame.check_len(),
            Err(CaptureError::BadLength { expected: 24, actual: 23, .. })
        ));
    }

    #[test]
    fn test_open_synthetic_source() {
        let config = CameraConfig {
            synthetic: true,
            width: 64,
            height: 48,
            ..CameraConfig::default()
        };
        let mut source = open_source(&config).unwrap();
        assert_eq!(source.resolution(), (64, 48));
        let frame = source.poll().unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
    }
}
