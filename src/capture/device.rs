use super::{FrameSource, PixelFormat, RawFrame};
use crate::errors::{CaptureError, DeviceError};
use crate::timing::MediaClock;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    CallbackCamera,
};

/// Camera device opened through nokhwa's native backend (V4L2 on Linux)
///
/// The device handle is held exclusively from `open` until drop; dropping
/// stops the stream on every exit path.
pub struct CameraSource {
    camera: Option<CallbackCamera>,
    index: u32,
    width: u32,
    height: u32,
    clock: MediaClock,
}

impl CameraSource {
    /// Open camera `index` and start streaming, asking for the closest
    /// format to `width`x`height`@`fps`
    pub fn open(index: u32, width: u32, height: u32, fps: u32) -> Result<Self, DeviceError> {
        let wanted = nokhwa::utils::CameraFormat::new(
            Resolution::new(width, height),
            FrameFormat::MJPEG,
            fps,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let mut camera = CallbackCamera::new(CameraIndex::Index(index), requested, |_| {})
            .map_err(|e| DeviceError::Open {
                index,
                message: e.to_string(),
            })?;

        camera.open_stream().map_err(|e| DeviceError::Stream {
            index,
            message: e.to_string(),
        })?;

        match camera.camera_format() {
            Ok(format) => log::info!(
                "Camera {} opened at {} (asked for {}x{}@{})",
                index,
                format,
                width,
                height,
                fps
            ),
            Err(e) => log::warn!("Camera {} opened, format unknown: {}", index, e),
        }

        Ok(Self {
            camera: Some(camera),
            index,
            width,
            height,
            clock: MediaClock::video(),
        })
    }

    /// Stop the stream and release the device now instead of at drop
    pub fn close(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            match camera.stop_stream() {
                Ok(()) => log::info!("Camera {} released", self.index),
                Err(e) => log::warn!("Failed to stop camera {} stream: {}", self.index, e),
            }
        }
    }
}

impl FrameSource for CameraSource {
    fn poll(&mut self) -> Result<RawFrame, CaptureError> {
        let camera = self.camera.as_mut().ok_or(CaptureError::Released)?;

        let buffer = camera
            .poll_frame()
            .map_err(|e| CaptureError::Poll(e.to_string()))?;
        let pts = self.clock.now();

        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::Decode(e.to_string()))?;

        let frame = RawFrame {
            width: image.width(),
            height: image.height(),
            data: image.into_raw(),
            format: PixelFormat::Rgb24,
            pts,
        };
        frame.check_len()?;
        Ok(frame)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}
