use crate::capture::{PixelFormat, RawFrame, SharedSource};
use crate::errors::CaptureError;
use crate::timing::MediaTime;
use bytes::Bytes;
use openh264::encoder::Encoder;
use openh264::formats::YUVBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Largest even size that fits in `width`x`height`; I420 needs both even
pub fn even_dimensions(width: u32, height: u32) -> (u32, u32) {
    (width & !1, height & !1)
}

/// Convert RGB24 to YUV420 planar (I420)
///
/// Odd widths or heights drop the last column or row, so the output is
/// always `even_dimensions(width, height)` in size.
pub fn rgb_to_i420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let stride = width as usize;
    let (out_w, out_h) = even_dimensions(width, height);
    let w = out_w as usize;
    let h = out_h as usize;

    // Y plane (w*h) + U plane (w/2 * h/2) + V plane (w/2 * h/2)
    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let rgb_idx = (y * stride + x) * 3;
            let r = rgb[rgb_idx] as i32;
            let g = rgb[rgb_idx + 1] as i32;
            let b = rgb[rgb_idx + 2] as i32;

            // BT.601
            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

            // Chroma from the top-left pixel of each 2x2 block
            if y % 2 == 0 && x % 2 == 0 {
                let uv_idx = (y / 2) * (w / 2) + (x / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}

/// H.264 encoder that follows the resolution of the frames it is given
///
/// Cameras do not always honour the requested size, so the underlying
/// encoder is rebuilt whenever the frame dimensions change.
pub struct H264Encoder {
    inner: Option<(u32, u32, Encoder)>,
    keyframe_pending: bool,
    frame_count: u64,
}

impl H264Encoder {
    pub fn new() -> Self {
        Self {
            inner: None,
            keyframe_pending: true,
            frame_count: 0,
        }
    }

    /// Make the next encoded frame an IDR frame
    pub fn request_keyframe(&mut self) {
        self.keyframe_pending = true;
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Size the encoder is currently configured for
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.inner.as_ref().map(|(w, h, _)| (*w, *h))
    }

    /// Encode one frame into an Annex B access unit
    pub fn encode(&mut self, frame: &RawFrame) -> Result<Vec<u8>, CaptureError> {
        frame.check_len()?;
        let (width, height) = even_dimensions(frame.width, frame.height);
        if width == 0 || height == 0 {
            return Err(CaptureError::Encode(format!(
                "frame too small to encode: {}x{}",
                frame.width, frame.height
            )));
        }
        if (width, height) != (frame.width, frame.height) {
            log::trace!(
                "Cropping {}x{} frame to {}x{}",
                frame.width,
                frame.height,
                width,
                height
            );
        }

        let yuv = match frame.format {
            PixelFormat::Rgb24 => rgb_to_i420(&frame.data, frame.width, frame.height),
        };

        if self.dimensions() != Some((width, height)) {
            log::debug!("Creating H.264 encoder for {}x{}", width, height);
            let encoder = Encoder::new()
                .map_err(|e| CaptureError::Encode(format!("failed to create encoder: {}", e)))?;
            self.inner = Some((width, height, encoder));
            self.keyframe_pending = false;
        }

        let (_, _, encoder) = self
            .inner
            .as_mut()
            .ok_or_else(|| CaptureError::Encode("encoder unavailable".to_string()))?;

        if self.keyframe_pending {
            encoder.force_intra_frame();
            self.keyframe_pending = false;
        }

        let buffer = YUVBuffer::from_vec(yuv, width as usize, height as usize);
        let bitstream = encoder
            .encode(&buffer)
            .map_err(|e| CaptureError::Encode(e.to_string()))?;

        self.frame_count += 1;
        Ok(bitstream.to_vec())
    }
}

impl Default for H264Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// One encoded access unit and the capture timestamp of its source frame
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub pts: MediaTime,
}

/// Capture one frame and encode it. Runs on a blocking worker.
pub fn capture_and_encode(
    source: &SharedSource,
    encoder: &Mutex<H264Encoder>,
) -> Result<EncodedFrame, CaptureError> {
    let frame = {
        let mut source = source.lock().map_err(|_| CaptureError::Poisoned)?;
        source.poll()?
    };
    log::trace!("Captured {}x{} frame at {}", frame.width, frame.height, frame.pts);

    let mut encoder = encoder.lock().map_err(|_| CaptureError::Poisoned)?;
    let data = encoder.encode(&frame)?;
    Ok(EncodedFrame {
        data,
        pts: frame.pts,
    })
}

/// Turns frame timestamps into RTP sample durations
///
/// The track advances its RTP clock by each sample's duration, so durations
/// are taken from the gap between consecutive capture timestamps. Frames
/// skipped in between are covered by the next gap. The first frame after a
/// reset, or a timestamp that does not move forward, falls back to the
/// nominal frame interval.
#[derive(Debug, Clone)]
pub struct SampleTimer {
    nominal: Duration,
    last: Option<MediaTime>,
}

impl SampleTimer {
    pub fn new(nominal: Duration) -> Self {
        Self {
            nominal,
            last: None,
        }
    }

    /// Forget the previous frame, e.g. when streaming pauses
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn next_duration(&mut self, pts: MediaTime) -> Duration {
        let duration = self
            .last
            .and_then(|last| pts.checked_since(last))
            .unwrap_or(self.nominal);
        if self.last.map_or(true, |last| pts > last) {
            self.last = Some(pts);
        }
        duration
    }
}

/// Feeds encoded camera frames into one session's video track
///
/// Frames are only captured while `streaming` is set, which the session
/// raises when the peer connection reaches `connected`. Dropping the pump
/// stops it.
pub struct VideoPump {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl VideoPump {
    pub fn spawn(
        session_id: String,
        track: Arc<TrackLocalStaticSample>,
        source: SharedSource,
        streaming: Arc<AtomicBool>,
        frame_interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(pump_loop(
            session_id,
            track,
            source,
            streaming,
            Arc::clone(&stop),
            frame_interval,
        ));
        Self { stop, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.task.abort();
    }
}

impl Drop for VideoPump {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn pump_loop(
    session_id: String,
    track: Arc<TrackLocalStaticSample>,
    source: SharedSource,
    streaming: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    frame_interval: Duration,
) {
    log::debug!("Video pump started for session {}", session_id);

    let encoder = Arc::new(Mutex::new(H264Encoder::new()));
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut timer = SampleTimer::new(frame_interval);
    let mut was_streaming = false;
    let mut skipped = 0u64;

    loop {
        ticker.tick().await;
        if stop.load(Ordering::Relaxed) {
            break;
        }

        if !streaming.load(Ordering::Relaxed) {
            if was_streaming {
                timer.reset();
            }
            was_streaming = false;
            continue;
        }
        if !was_streaming {
            if let Ok(mut encoder) = encoder.lock() {
                encoder.request_keyframe();
            }
            was_streaming = true;
            log::info!("Session {} streaming video", session_id);
        }

        let job_source = Arc::clone(&source);
        let job_encoder = Arc::clone(&encoder);
        let result =
            tokio::task::spawn_blocking(move || capture_and_encode(&job_source, &job_encoder))
                .await;

        match result {
            Ok(Ok(frame)) => {
                let sample = Sample {
                    duration: timer.next_duration(frame.pts),
                    data: Bytes::from(frame.data),
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    log::warn!("Failed to write video sample for session {}: {}", session_id, e);
                }
            }
            Ok(Err(e)) => {
                skipped += 1;
                log::warn!("Skipping frame for session {} ({} skipped): {}", session_id, skipped, e);
            }
            Err(e) => {
                log::error!("Capture worker for session {} failed: {}", session_id, e);
                break;
            }
        }
    }

    log::debug!("Video pump stopped for session {}", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameSource, SyntheticSource};

    #[test]
    fn test_rgb_to_i420_plane_sizes() {
        let rgb = vec![0u8; 4 * 4 * 3];
        let yuv = rgb_to_i420(&rgb, 4, 4);
        assert_eq!(yuv.len(), 16 + 4 + 4);
    }

    #[test]
    fn test_rgb_to_i420_white_and_black() {
        let white = rgb_to_i420(&[255u8; 2 * 2 * 3], 2, 2);
        assert_eq!(white[0], 235);
        assert_eq!(white[4], 128);
        assert_eq!(white[5], 128);

        let black = rgb_to_i420(&[0u8; 2 * 2 * 3], 2, 2);
        assert_eq!(black[0], 16);
        assert_eq!(black[4], 128);
    }

    #[test]
    fn test_encoder_rejects_short_frame() {
        let mut encoder = H264Encoder::new();
        let frame = RawFrame {
            data: vec![0; 10],
            width: 16,
            height: 16,
            format: PixelFormat::Rgb24,
            pts: MediaTime {
                ticks: 0,
                clock_rate: 90_000,
            },
        };
        assert!(matches!(
            encoder.encode(&frame),
            Err(CaptureError::BadLength { .. })
        ));
        assert_eq!(encoder.frame_count(), 0);
    }

    #[test]
    fn test_encode_synthetic_frames() {
        let mut source = SyntheticSource::new(64, 48);
        let mut encoder = H264Encoder::new();

        let first = encoder.encode(&source.poll().unwrap()).unwrap();
        let second = encoder.encode(&source.poll().unwrap()).unwrap();

        // Annex B start code
        assert!(first.starts_with(&[0, 0, 0, 1]) || first.starts_with(&[0, 0, 1]));
        assert!(!second.is_empty());
        assert_eq!(encoder.frame_count(), 2);
    }

    #[test]
    fn test_capture_and_encode_shared_source() {
        let source = crate::capture::shared(Box::new(SyntheticSource::new(32, 32)));
        let encoder = Mutex::new(H264Encoder::new());
        let encoded = capture_and_encode(&source, &encoder).unwrap();
        assert!(!encoded.data.is_empty());
    }

    fn gray_frame(width: u32, height: u32) -> RawFrame {
        RawFrame {
            data: vec![128; width as usize * height as usize * 3],
            width,
            height,
            format: PixelFormat::Rgb24,
            pts: MediaTime {
                ticks: 0,
                clock_rate: 90_000,
            },
        }
    }

    #[test]
    fn test_rgb_to_i420_crops_odd_sizes() {
        assert_eq!(even_dimensions(5, 3), (4, 2));
        // 4x2 luma + two 2x1 chroma planes
        assert_eq!(rgb_to_i420(&[0u8; 5 * 3 * 3], 5, 3).len(), 8 + 2 + 2);
    }

    #[test]
    fn test_encoder_crops_odd_frames() {
        let mut encoder = H264Encoder::new();
        let access_unit = encoder.encode(&gray_frame(641, 481)).unwrap();
        assert!(!access_unit.is_empty());
        assert_eq!(encoder.dimensions(), Some((640, 480)));

        // Same cropped size reuses the encoder
        encoder.encode(&gray_frame(640, 480)).unwrap();
        assert_eq!(encoder.frame_count(), 2);
    }

    #[test]
    fn test_encoder_rejects_degenerate_frames() {
        let mut encoder = H264Encoder::new();
        assert!(matches!(
            encoder.encode(&gray_frame(1, 1)),
            Err(CaptureError::Encode(_))
        ));
        assert_eq!(encoder.dimensions(), None);
    }

    #[test]
    fn test_sample_timer_follows_pts_gaps() {
        let at = |ms: u64| MediaTime {
            ticks: ms * 90,
            clock_rate: 90_000,
        };
        let mut timer = SampleTimer::new(Duration::from_millis(33));

        assert_eq!(timer.next_duration(at(1000)), Duration::from_millis(33));
        assert_eq!(timer.next_duration(at(1060)), Duration::from_millis(60));
        assert_eq!(timer.next_duration(at(1070)), Duration::from_millis(10));
        // Stalled clock
        assert_eq!(timer.next_duration(at(1070)), Duration::from_millis(33));
        assert_eq!(timer.next_duration(at(1100)), Duration::from_millis(30));

        timer.reset();
        assert_eq!(timer.next_duration(at(5000)), Duration::from_millis(33));
    }
}
