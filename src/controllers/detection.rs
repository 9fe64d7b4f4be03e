//! detection.rs
//! Serves DETECT requests by handing each frame to a `Detector`.
//! - The inference engine sits behind the `Detector` trait
//! - `SimDetector` stands in for it: a slowly drifting crack offset with occasional misses

use log::debug;
use rand::Rng;

use crate::controllers::Controller;
use crate::error::DetectionError;
use crate::ipc::messages::{DetectRequest, DetectionCmd, DetectionResp, DetectionResult};
use crate::ipc::SlaveEndpoint;

/// Crack detector behind the Detection worker.
pub trait Detector: Send {
    /// Load models or calibration; called once from `init`.
    fn load(&mut self) -> Result<(), DetectionError>;

    /// Lateral crack offset for one frame plus an annotated copy of it.
    fn detect(&mut self, req: &DetectRequest) -> Result<DetectionResult, DetectionError>;
}

/// Random-walk offset generator.
///
/// The miss probability scales with the detection threshold, so raising the
/// threshold from the console visibly thins out the results.
pub struct SimDetector {
    y_mm: f64,
    step_mm: f64,
    range_mm: f64,
}

impl SimDetector {
    pub fn new(range_mm: f64, step_mm: f64) -> Self {
        Self {
            y_mm: 0.0,
            step_mm,
            range_mm,
        }
    }
}

impl Default for SimDetector {
    fn default() -> Self {
        Self::new(20.0, 0.5)
    }
}

impl Detector for SimDetector {
    fn load(&mut self) -> Result<(), DetectionError> {
        if !(self.range_mm.is_finite() && self.range_mm > 0.0) {
            return Err(DetectionError::Detector(format!(
                "invalid offset range {}",
                self.range_mm
            )));
        }
        Ok(())
    }

    fn detect(&mut self, req: &DetectRequest) -> Result<DetectionResult, DetectionError> {
        let mut rng = rand::rng();
        self.y_mm = (self.y_mm + rng.random_range(-self.step_mm..=self.step_mm))
            .clamp(-self.range_mm, self.range_mm);

        let miss = rng.random_bool((req.detect_thresh * 0.2).clamp(0.0, 1.0));
        Ok(DetectionResult {
            y_mm: if miss { None } else { Some(self.y_mm) },
            image: Some(req.image.frame.clone()),
        })
    }
}

pub struct DetectionController {
    detector: Box<dyn Detector>,
    endpoint: SlaveEndpoint<DetectionCmd, DetectionResp>,
}

impl DetectionController {
    pub fn new(
        detector: Box<dyn Detector>,
        endpoint: SlaveEndpoint<DetectionCmd, DetectionResp>,
    ) -> Self {
        Self { detector, endpoint }
    }
}

impl Controller for DetectionController {
    type Error = DetectionError;
    const NAME: &'static str = "DetectionController";

    fn init(&mut self) -> Result<(), DetectionError> {
        self.detector.load()
    }

    fn start(&mut self) -> Result<(), DetectionError> {
        loop {
            let Some((op_id, cmd)) = self.endpoint.get_cmd(true)? else {
                continue;
            };
            match cmd {
                DetectionCmd::Terminate => {
                    self.endpoint.send_resp(op_id, DetectionResp::Ok)?;
                    return Ok(());
                }
                DetectionCmd::IsReady => self.endpoint.send_resp(op_id, DetectionResp::True)?,
                DetectionCmd::Detect(req) => match self.detector.detect(&req) {
                    Ok(result) => {
                        debug!("[DetectionController] y_mm = {:?}", result.y_mm);
                        self.endpoint
                            .send_resp(op_id, DetectionResp::DetectionResult(result))?
                    }
                    Err(e) => {
                        let _ = self.endpoint.send_resp(op_id, DetectionResp::Error);
                        return Err(e);
                    }
                },
            }
        }
    }

    fn deinit(&mut self) -> Result<(), DetectionError> {
        self.endpoint.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::messages::{FilterMode, Frame, VideoImage};
    use std::time::SystemTime;

    fn request(detect_thresh: f64) -> DetectRequest {
        DetectRequest {
            image: VideoImage {
                frame: Frame::new(4, 4, vec![0; 16]),
                captured_at: SystemTime::now(),
            },
            detect_thresh,
            simpfilter_thresh: 60,
            adaptfilter_thresh: 0.85,
            adaptfilter_radius: 8,
            filter_mode: FilterMode::Adaptive,
        }
    }

    #[test]
    fn sim_offset_stays_in_range() {
        let mut det = SimDetector::new(2.0, 1.5);
        det.load().unwrap();
        for _ in 0..500 {
            let result = det.detect(&request(0.0)).unwrap();
            let y = result.y_mm.unwrap();
            assert!((-2.0..=2.0).contains(&y));
            assert_eq!(result.image.unwrap().width, 4);
        }
    }

    #[test]
    fn invalid_range_fails_load() {
        assert!(SimDetector::new(0.0, 1.0).load().is_err());
    }
}
