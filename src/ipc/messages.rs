//! Operation messages exchanged between workers.
//!
//! One closed enum per channel direction, one variant per token, payloads
//! carried as typed fields. Messages are moved into the channel and never
//! mutated afterwards.

use std::{
    fmt,
    sync::Arc,
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

/// Per-sender correlation id; unique only within one issuing endpoint.
pub type OpId = u64;

/// Common surface of every command, response and event.
pub trait OpObj: fmt::Debug + Send + 'static {
    /// Token name, used for logging.
    fn token(&self) -> &'static str;
}

// ============================================================================
// Shared payload types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CcMode {
    Manual,
    Auto,
}

impl CcMode {
    pub fn toggled(self) -> Self {
        match self {
            CcMode::Manual => CcMode::Auto,
            CcMode::Auto => CcMode::Manual,
        }
    }
}

impl fmt::Display for CcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CcMode::Manual => write!(f, "MANUAL"),
            CcMode::Auto => write!(f, "AUTO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Simple,
    Adaptive,
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMode::Simple => write!(f, "SIMPLE"),
            FilterMode::Adaptive => write!(f, "ADAPTIVE"),
        }
    }
}

/// 8-bit grayscale frame. Pixel storage is shared, so cloning is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({}x{})", self.width, self.height)
    }
}

/// A captured frame with its wall-clock capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoImage {
    pub frame: Frame,
    pub captured_at: SystemTime,
}

/// Actuator position request: a millimeter target or "stop the motor".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    Stop,
    Mm(f64),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Stop => write!(f, "STOP"),
            Target::Mm(mm) => write!(f, "{:.1}", mm),
        }
    }
}

/// Everything the detector needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectRequest {
    pub image: VideoImage,
    pub detect_thresh: f64,
    pub simpfilter_thresh: i32,
    pub adaptfilter_thresh: f64,
    pub adaptfilter_radius: i32,
    pub filter_mode: FilterMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    /// Lateral crack offset; `None` when too few points survived filtering.
    pub y_mm: Option<f64>,
    /// Annotated copy of the input frame.
    pub image: Option<Frame>,
}

/// Snapshot served to the supervisor by `GET_STATUS`.
#[derive(Debug, Clone, PartialEq)]
pub struct CcStatus {
    pub mode: CcMode,
    pub detect_thresh: f64,
    pub simpfilter_thresh: i32,
    pub adaptfilter_thresh: f64,
    pub adaptfilter_radius: i32,
    pub filter_mode: FilterMode,
    /// Full cycles per second since START.
    pub ips: f64,
    pub dc_call_ms: f64,
    pub img_age_ms: f64,
    pub dc_y_mm: Option<f64>,
    /// Current actuator target, `STOP` or one decimal of mm.
    pub target: String,
    pub img: Option<Frame>,
}

// ============================================================================
// MainController
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum MainCmd {
    Terminate,
    IsReady,
    Start,
    GetStatus,
    SetMode(CcMode),
    ToggleMode,
    SetDetectThresh(f64),
    SetSimpFilterThresh(i32),
    SetAdaptFilterThresh(f64),
    SetAdaptFilterRadius(i32),
    SetFilterMode(FilterMode),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MainResp {
    Ok,
    Error,
    True,
    False,
    Status(Option<Box<CcStatus>>),
}

impl OpObj for MainCmd {
    fn token(&self) -> &'static str {
        match self {
            MainCmd::Terminate => "TERMINATE",
            MainCmd::IsReady => "IS_READY",
            MainCmd::Start => "START",
            MainCmd::GetStatus => "GET_STATUS",
            MainCmd::SetMode(_) => "SET_MODE",
            MainCmd::ToggleMode => "TOGGLE_MODE",
            MainCmd::SetDetectThresh(_) => "SET_DETECT_THRESH",
            MainCmd::SetSimpFilterThresh(_) => "SET_SIMPFILTER_THRESH",
            MainCmd::SetAdaptFilterThresh(_) => "SET_ADAPTFILTER_THRESH",
            MainCmd::SetAdaptFilterRadius(_) => "SET_ADAPTFILTER_RADIUS",
            MainCmd::SetFilterMode(_) => "SET_FILTER_MODE",
        }
    }
}

impl OpObj for MainResp {
    fn token(&self) -> &'static str {
        match self {
            MainResp::Ok => "OK",
            MainResp::Error => "ERROR",
            MainResp::True => "TRUE",
            MainResp::False => "FALSE",
            MainResp::Status(_) => "STATUS",
        }
    }
}

// ============================================================================
// ActuatorController
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCmd {
    Terminate,
    IsReady,
    GetTargetMm,
    SetTargetMm(f64),
    StopMotor,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorResp {
    Ok,
    Error,
    True,
    False,
    TargetValue(f64),
}

impl OpObj for ActuatorCmd {
    fn token(&self) -> &'static str {
        match self {
            ActuatorCmd::Terminate => "TERMINATE",
            ActuatorCmd::IsReady => "IS_READY",
            ActuatorCmd::GetTargetMm => "GET_TARGET_MM",
            ActuatorCmd::SetTargetMm(_) => "SET_TARGET_MM",
            ActuatorCmd::StopMotor => "STOP_MOTOR",
        }
    }
}

impl OpObj for ActuatorResp {
    fn token(&self) -> &'static str {
        match self {
            ActuatorResp::Ok => "OK",
            ActuatorResp::Error => "ERROR",
            ActuatorResp::True => "TRUE",
            ActuatorResp::False => "FALSE",
            ActuatorResp::TargetValue(_) => "TARGET_VALUE",
        }
    }
}

// ============================================================================
// DetectionController
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionCmd {
    Terminate,
    IsReady,
    Detect(Box<DetectRequest>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionResp {
    Ok,
    Error,
    True,
    False,
    DetectionResult(DetectionResult),
}

impl OpObj for DetectionCmd {
    fn token(&self) -> &'static str {
        match self {
            DetectionCmd::Terminate => "TERMINATE",
            DetectionCmd::IsReady => "IS_READY",
            DetectionCmd::Detect(_) => "DETECT",
        }
    }
}

impl OpObj for DetectionResp {
    fn token(&self) -> &'static str {
        match self {
            DetectionResp::Ok => "OK",
            DetectionResp::Error => "ERROR",
            DetectionResp::True => "TRUE",
            DetectionResp::False => "FALSE",
            DetectionResp::DetectionResult(_) => "DETECTION_RESULT",
        }
    }
}

// ============================================================================
// JoystickController
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum JoystickCmd {
    Terminate,
    IsReady,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoystickResp {
    Ok,
    Error,
    True,
    False,
}

/// One-way notifications from the joystick worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JoystickEvent {
    ButtonDown,
    /// Normalized axis value in [-1, 1].
    Position(f64),
}

impl OpObj for JoystickCmd {
    fn token(&self) -> &'static str {
        match self {
            JoystickCmd::Terminate => "TERMINATE",
            JoystickCmd::IsReady => "IS_READY",
        }
    }
}

impl OpObj for JoystickResp {
    fn token(&self) -> &'static str {
        match self {
            JoystickResp::Ok => "OK",
            JoystickResp::Error => "ERROR",
            JoystickResp::True => "TRUE",
            JoystickResp::False => "FALSE",
        }
    }
}

impl OpObj for JoystickEvent {
    fn token(&self) -> &'static str {
        match self {
            JoystickEvent::ButtonDown => "BUTTON_DOWN",
            JoystickEvent::Position(_) => "POSITION",
        }
    }
}

// ============================================================================
// VideoController
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum VideoCmd {
    Terminate,
    IsReady,
    GetLatestImg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VideoResp {
    Ok,
    Error,
    True,
    False,
    /// `None` until the camera has produced its first frame.
    LatestImg(Option<VideoImage>),
}

impl OpObj for VideoCmd {
    fn token(&self) -> &'static str {
        match self {
            VideoCmd::Terminate => "TERMINATE",
            VideoCmd::IsReady => "IS_READY",
            VideoCmd::GetLatestImg => "GET_LATEST_IMG",
        }
    }
}

impl OpObj for VideoResp {
    fn token(&self) -> &'static str {
        match self {
            VideoResp::Ok => "OK",
            VideoResp::Error => "ERROR",
            VideoResp::True => "TRUE",
            VideoResp::False => "FALSE",
            VideoResp::LatestImg(_) => "LATEST_IMG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_renders_stop_or_one_decimal() {
        assert_eq!(Target::Stop.to_string(), "STOP");
        assert_eq!(Target::Mm(40.0).to_string(), "40.0");
        assert_eq!(Target::Mm(12.345).to_string(), "12.3");
    }

    #[test]
    fn mode_toggles_both_ways() {
        assert_eq!(CcMode::Manual.toggled(), CcMode::Auto);
        assert_eq!(CcMode::Auto.toggled(), CcMode::Manual);
    }
}
