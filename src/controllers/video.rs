//! video.rs
//! Keeps the most recent camera frame and hands it out on GET_LATEST_IMG.
//! - Commands are polled without blocking between frame grabs
//! - Each frame is stamped with wall-clock capture time so image age survives the hop between workers
//! - `SimCamera` paces synthetic frames with SpinSleeper at the configured frame interval

use std::time::{Duration, Instant, SystemTime};

use log::debug;
use rand::Rng;
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::config::VideoConfig;
use crate::controllers::Controller;
use crate::error::VideoError;
use crate::ipc::messages::{Frame, VideoCmd, VideoImage, VideoResp};
use crate::ipc::SlaveEndpoint;

pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), VideoError>;

    /// Wait for the next frame. `Ok(None)` for an incomplete frame.
    fn grab(&mut self) -> Result<Option<Frame>, VideoError>;

    fn close(&mut self) {}
}

/// Bytes in one 8-bit frame, computed in `usize` so large sizes cannot wrap.
fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

/// Synthetic 8-bit camera: dark noisy background crossed by one bright,
/// slowly wandering horizontal crack.
pub struct SimCamera {
    width: u32,
    height: u32,
    interval: Duration,
    sleeper: SpinSleeper,
    next_frame: Instant,
    crack_row: f64,
}

impl SimCamera {
    pub fn new(cfg: &VideoConfig) -> Self {
        Self {
            width: cfg.width,
            height: cfg.height,
            interval: cfg.frame_interval(),
            sleeper: SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread),
            next_frame: Instant::now(),
            crack_row: f64::from(cfg.height) / 2.0,
        }
    }

    fn render(&mut self) -> Frame {
        let mut rng = rand::rng();
        let max_row = f64::from(self.height.saturating_sub(1));
        self.crack_row = (self.crack_row + rng.random_range(-1.0..=1.0)).clamp(0.0, max_row);
        let crack_row = self.crack_row.round() as u32;

        let mut pixels: Vec<u8> = Vec::with_capacity(pixel_count(self.width, self.height));
        for row in 0..self.height {
            for _ in 0..self.width {
                let px = if row == crack_row {
                    rng.random_range(200..=255)
                } else {
                    rng.random_range(0..40)
                };
                pixels.push(px);
            }
        }
        Frame::new(self.width, self.height, pixels)
    }
}

impl FrameSource for SimCamera {
    fn open(&mut self) -> Result<(), VideoError> {
        if self.width == 0 || self.height == 0 {
            return Err(VideoError::Camera(format!(
                "invalid frame size {}x{}",
                self.width, self.height
            )));
        }
        self.next_frame = Instant::now() + self.interval;
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<Frame>, VideoError> {
        let now = Instant::now();
        if self.next_frame > now {
            self.sleeper.sleep(self.next_frame - now);
        }
        self.next_frame += self.interval;
        Ok(Some(self.render()))
    }
}

pub struct VideoController {
    camera: Box<dyn FrameSource>,
    endpoint: SlaveEndpoint<VideoCmd, VideoResp>,
    latest: Option<VideoImage>,
}

impl VideoController {
    pub fn new(camera: Box<dyn FrameSource>, endpoint: SlaveEndpoint<VideoCmd, VideoResp>) -> Self {
        Self {
            camera,
            endpoint,
            latest: None,
        }
    }

    /// Answer everything queued. Returns `false` once TERMINATE was answered.
    fn service_commands(&mut self) -> Result<bool, VideoError> {
        while let Some((op_id, cmd)) = self.endpoint.get_cmd(false)? {
            let resp = match cmd {
                VideoCmd::Terminate => {
                    self.endpoint.send_resp(op_id, VideoResp::Ok)?;
                    return Ok(false);
                }
                VideoCmd::IsReady => VideoResp::True,
                VideoCmd::GetLatestImg => VideoResp::LatestImg(self.latest.clone()),
            };
            self.endpoint.send_resp(op_id, resp)?;
        }
        Ok(true)
    }
}

impl Controller for VideoController {
    type Error = VideoError;
    const NAME: &'static str = "VideoController";

    fn init(&mut self) -> Result<(), VideoError> {
        self.latest = None;
        self.camera.open()
    }

    fn start(&mut self) -> Result<(), VideoError> {
        while self.service_commands()? {
            match self.camera.grab()? {
                Some(frame) => {
                    self.latest = Some(VideoImage {
                        frame,
                        captured_at: SystemTime::now(),
                    })
                }
                None => debug!("[VideoController] incomplete frame skipped"),
            }
        }
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), VideoError> {
        self.camera.close();
        self.endpoint.shutdown();
        self.latest = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_frames_have_one_bright_row() {
        let cfg = VideoConfig {
            width: 16,
            height: 8,
            frame_interval_ms: 0,
        };
        let mut cam = SimCamera::new(&cfg);
        cam.open().unwrap();
        let frame = cam.grab().unwrap().unwrap();
        assert_eq!(frame.pixels.len(), 16 * 8);

        let bright_rows = frame
            .pixels
            .chunks(16)
            .filter(|row| row.iter().all(|&px| px >= 200))
            .count();
        assert_eq!(bright_rows, 1);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn pixel_count_does_not_wrap_in_u32() {
        assert_eq!(pixel_count(70_000, 70_000), 4_900_000_000);
        assert_eq!(pixel_count(300, 300), 90_000);
    }

    #[test]
    fn zero_sized_camera_fails_open() {
        let cfg = VideoConfig {
            width: 0,
            height: 8,
            frame_interval_ms: 0,
        };
        assert!(SimCamera::new(&cfg).open().is_err());
    }
}
