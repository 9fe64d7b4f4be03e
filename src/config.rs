//! Runtime configuration.
//!
//! Built once at startup (defaults, then an optional JSON file, then CLI
//! overrides) and handed to every worker by value. Nothing mutates it after
//! the workers are spawned.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::CcError;
use crate::ipc::messages::FilterMode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ipc: IpcConfig,
    pub main: MainConfig,
    pub actuator: ActuatorConfig,
    pub calibration: CalibrationConfig,
    pub detection: DetectionConfig,
    pub joystick: JoystickConfig,
    pub video: VideoConfig,
}

impl Config {
    /// Load a (possibly partial) JSON config; missing fields keep defaults.
    pub fn load(path: &Path) -> Result<Self, CcError> {
        let text = fs::read_to_string(path)
            .map_err(|e| CcError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| CcError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }
}

/// Channel capacities and timeouts shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    pub cmd_queue_capacity: usize,
    pub resp_queue_capacity: usize,
    pub event_queue_capacity: usize,
    /// Bounded wait for a send into a full channel.
    pub queue_timeout_ms: u64,
    pub cmd_sync_timeout_ms: u64,
    /// Synchronous round trips slower than this are logged.
    pub cmd_sync_warn_ms: u64,
    /// Grace delay before an endpoint drains and closes its outbound channel.
    pub shutdown_delay_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            cmd_queue_capacity: 8,
            resp_queue_capacity: 8,
            event_queue_capacity: 16,
            queue_timeout_ms: 100,
            cmd_sync_timeout_ms: 2_000,
            cmd_sync_warn_ms: 500,
            shutdown_delay_ms: 100,
        }
    }
}

impl IpcConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn cmd_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.cmd_sync_timeout_ms)
    }

    pub fn cmd_sync_warn(&self) -> Duration {
        Duration::from_millis(self.cmd_sync_warn_ms)
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MainConfig {
    /// Minimum MainController loop period.
    pub min_period_ms: u64,
    /// Video silence longer than this after GET_LATEST_IMG is fatal.
    pub video_max_img_req_delay_ms: u64,
    /// Wait after retracting the actuator at shutdown.
    pub actuator_settle_ms: u64,
    pub startup_pause_ms: u64,
    pub ready_poll_ms: u64,
    pub ready_timeout_ms: u64,
    pub proc_check_interval_ms: u64,
    /// Spawn workers at maximum thread priority.
    pub realtime_workers: bool,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            min_period_ms: 10,
            video_max_img_req_delay_ms: 2_000,
            actuator_settle_ms: 6_000,
            startup_pause_ms: 1_000,
            ready_poll_ms: 250,
            ready_timeout_ms: 30_000,
            proc_check_interval_ms: 1_000,
            realtime_workers: false,
        }
    }
}

impl MainConfig {
    pub fn min_period(&self) -> Duration {
        Duration::from_millis(self.min_period_ms)
    }

    pub fn video_max_img_req_delay(&self) -> Duration {
        Duration::from_millis(self.video_max_img_req_delay_ms)
    }

    pub fn actuator_settle(&self) -> Duration {
        Duration::from_millis(self.actuator_settle_ms)
    }

    pub fn startup_pause(&self) -> Duration {
        Duration::from_millis(self.startup_pause_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn proc_check_interval(&self) -> Duration {
        Duration::from_millis(self.proc_check_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub device: String,
    /// `None` for USB CDC links, where the baud rate is ignored.
    pub baud: Option<u32>,
    pub timeout_ms: u64,
    pub crc_enabled: bool,
    pub check_errflags_after_cmds: bool,
    pub stroke_mm: f64,
}

/// Baud handed to the serial layer when the link ignores it.
pub const DUMMY_USB_BAUD: u32 = 9_600;

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyACM0".to_string(),
            baud: None,
            timeout_ms: 100,
            crc_enabled: true,
            check_errflags_after_cmds: true,
            stroke_mm: 60.0,
        }
    }
}

impl ActuatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn baud_or_dummy(&self) -> u32 {
        self.baud.unwrap_or(DUMMY_USB_BAUD)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Actuator position that puts the tool over image Y = 0.
    pub actuator_mm_at_y_origin: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            actuator_mm_at_y_origin: 50.0,
        }
    }
}

/// Initial detection parameters; MainController owns the live values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub detect_thresh: f64,
    pub simpfilter_thresh: i32,
    pub adaptfilter_thresh: f64,
    pub adaptfilter_radius: i32,
    pub filter_mode: FilterMode,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            detect_thresh: 0.5,
            simpfilter_thresh: 60,
            adaptfilter_thresh: 0.85,
            adaptfilter_radius: 8,
            filter_mode: FilterMode::Adaptive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JoystickConfig {
    pub axis_num: u8,
    pub button_num: u8,
    /// Dead zone half-width in normalized axis units.
    pub zero_max_norm: f64,
    pub positive_is_extend: bool,
    /// Device events in this window after open are discarded.
    pub initial_ignore_ms: u64,
    pub loop_sleep_ms: u64,
}

impl Default for JoystickConfig {
    fn default() -> Self {
        Self {
            axis_num: 1,
            button_num: 0,
            zero_max_norm: 0.05,
            positive_is_extend: true,
            initial_ignore_ms: 500,
            loop_sleep_ms: 5,
        }
    }
}

impl JoystickConfig {
    pub fn initial_ignore(&self) -> Duration {
        Duration::from_millis(self.initial_ignore_ms)
    }

    pub fn loop_sleep(&self) -> Duration {
        Duration::from_millis(self.loop_sleep_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub frame_interval_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 300,
            height: 300,
            frame_interval_ms: 33,
        }
    }
}

impl VideoConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}
