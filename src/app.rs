//! app.rs
//! Supervisor: wires every channel, spawns the five workers and drives
//! MainController through synchronous calls.
//! - Startup: spawn, pause, poll IS_READY until TRUE (bounded), then START
//! - Runtime: liveness queries, status snapshots, mode and parameter setters
//! - Shutdown: TERMINATE to MainController, close its command channel, join every worker

use std::{
    thread,
    time::Instant,
};

use log::{info, warn};

use crate::config::Config;
use crate::controllers::{
    actuator::{ActuatorController, ActuatorLink},
    detection::{DetectionController, Detector, SimDetector},
    joystick::{IdleJoystick, JoystickController, JoystickSource},
    main_controller::{MainController, MainEndpoints},
    run_worker,
    video::{FrameSource, SimCamera, VideoController},
    worker::Worker,
};
use crate::error::CcError;
use crate::ipc::messages::{CcMode, CcStatus, FilterMode, MainCmd, MainResp, OpObj};
use crate::ipc::{command_channel, event_channel, MasterEndpoint};
use crate::jrkg2::SimJrkG2;

/// Hardware handed to the workers.
pub struct Devices {
    pub actuator: ActuatorLink,
    pub detector: Box<dyn Detector>,
    pub joystick: Box<dyn JoystickSource>,
    pub camera: Box<dyn FrameSource>,
}

impl Devices {
    /// Everything simulated: SimJrkG2, drifting detector, idle joystick, synthetic camera.
    pub fn simulated(cfg: &Config) -> Self {
        Self {
            actuator: ActuatorLink::Sim(SimJrkG2::new(cfg.actuator.crc_enabled)),
            detector: Box::new(SimDetector::default()),
            joystick: Box::new(IdleJoystick),
            camera: Box::new(SimCamera::new(&cfg.video)),
        }
    }
}

/// Exit status of one joined worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub name: String,
    pub code: i32,
}

pub struct CcApp {
    cfg: Config,
    main: MasterEndpoint<MainCmd, MainResp>,
    workers: Vec<Worker>,
    stopped: bool,
}

impl CcApp {
    /// Spawn every worker and bring the system to the running cycle.
    ///
    /// If the workers never report ready or START is refused, the system
    /// is stopped again before the error is returned.
    pub fn start(cfg: Config, devices: Devices) -> Result<Self, CcError> {
        let mut app = Self::spawn(cfg, devices)?;
        thread::sleep(app.cfg.main.startup_pause());

        if let Err(e) = app.wait_until_ready().and_then(|_| app.expect_ok(MainCmd::Start)) {
            app.stop();
            return Err(e);
        }
        info!("[CcApp] running");
        Ok(app)
    }

    fn spawn(cfg: Config, devices: Devices) -> Result<Self, CcError> {
        let ipc = &cfg.ipc;
        let (main_master, main_slave) = command_channel("MainController", ipc);
        let (act_master, act_slave) = command_channel("ActuatorController", ipc);
        let (det_master, det_slave) = command_channel("DetectionController", ipc);
        let (joy_master, joy_slave) = command_channel("JoystickController", ipc);
        let (vid_master, vid_slave) = command_channel("VideoController", ipc);
        let (joy_events, joy_event_consumer) = event_channel(ipc);

        let main = MainController::new(
            cfg.clone(),
            MainEndpoints {
                cmd: main_slave,
                actuator: act_master,
                detection: det_master,
                joystick: joy_master,
                joystick_events: joy_event_consumer,
                video: vid_master,
            },
        );
        let actuator = ActuatorController::new(cfg.actuator.clone(), devices.actuator, act_slave);
        let detection = DetectionController::new(devices.detector, det_slave);
        let joystick =
            JoystickController::new(cfg.joystick.clone(), devices.joystick, joy_slave, joy_events);
        let video = VideoController::new(devices.camera, vid_slave);

        let realtime = cfg.main.realtime_workers;
        let workers = vec![
            Worker::spawn("mainworker", realtime, move || run_worker(main))?,
            Worker::spawn("actuatorworker", realtime, move || run_worker(actuator))?,
            Worker::spawn("detectionworker", realtime, move || run_worker(detection))?,
            Worker::spawn("joystickworker", realtime, move || run_worker(joystick))?,
            Worker::spawn("videoworker", realtime, move || run_worker(video))?,
        ];

        Ok(Self {
            cfg,
            main: main_master,
            workers,
            stopped: false,
        })
    }

    fn call(&mut self, cmd: MainCmd) -> Result<MainResp, CcError> {
        let command = cmd.token();
        self.main
            .send_cmd_sync(cmd, self.cfg.ipc.cmd_sync_timeout())?
            .ok_or(CcError::NoResponse {
                worker: "MainController",
                command,
            })
    }

    fn expect_ok(&mut self, cmd: MainCmd) -> Result<(), CcError> {
        let command = cmd.token();
        match self.call(cmd)? {
            MainResp::Ok => Ok(()),
            MainResp::Error => Err(CcError::Rejected { command }),
            other => Err(CcError::Protocol(format!(
                "unexpected {} to {}",
                other.token(),
                command
            ))),
        }
    }

    fn wait_until_ready(&mut self) -> Result<(), CcError> {
        let timeout = self.cfg.main.ready_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            match self.call(MainCmd::IsReady)? {
                MainResp::True => return Ok(()),
                MainResp::False => {}
                other => {
                    return Err(CcError::Protocol(format!(
                        "unexpected {} to IS_READY",
                        other.token()
                    )))
                }
            }
            if Instant::now() >= deadline {
                return Err(CcError::NotReady(timeout));
            }
            thread::sleep(self.cfg.main.ready_poll());
        }
    }

    /// Names of workers whose thread has exited.
    pub fn dead_workers(&self) -> Vec<String> {
        self.workers
            .iter()
            .filter(|w| !w.is_alive())
            .map(|w| w.name().to_string())
            .collect()
    }

    /// Latest snapshot; `None` before the first full cycle.
    pub fn get_status(&mut self) -> Result<Option<CcStatus>, CcError> {
        match self.call(MainCmd::GetStatus)? {
            MainResp::Status(status) => Ok(status.map(|s| *s)),
            other => Err(CcError::Protocol(format!(
                "unexpected {} to GET_STATUS",
                other.token()
            ))),
        }
    }

    pub fn set_mode(&mut self, mode: CcMode) -> Result<(), CcError> {
        self.expect_ok(MainCmd::SetMode(mode))
    }

    pub fn toggle_mode(&mut self) -> Result<(), CcError> {
        self.expect_ok(MainCmd::ToggleMode)
    }

    pub fn set_detect_thresh(&mut self, value: f64) -> Result<(), CcError> {
        self.expect_ok(MainCmd::SetDetectThresh(value))
    }

    pub fn set_simpfilter_thresh(&mut self, value: i32) -> Result<(), CcError> {
        self.expect_ok(MainCmd::SetSimpFilterThresh(value))
    }

    pub fn set_adaptfilter_thresh(&mut self, value: f64) -> Result<(), CcError> {
        self.expect_ok(MainCmd::SetAdaptFilterThresh(value))
    }

    pub fn set_adaptfilter_radius(&mut self, value: i32) -> Result<(), CcError> {
        self.expect_ok(MainCmd::SetAdaptFilterRadius(value))
    }

    pub fn set_filter_mode(&mut self, mode: FilterMode) -> Result<(), CcError> {
        self.expect_ok(MainCmd::SetFilterMode(mode))
    }

    /// Terminate MainController and join every worker. Safe to call twice;
    /// the second call joins nothing.
    pub fn stop(&mut self) -> Vec<WorkerExit> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;

        info!("[CcApp] stopping...");
        match self.call(MainCmd::Terminate) {
            Ok(MainResp::Ok) => {}
            Ok(other) => warn!("[CcApp] unexpected {} to TERMINATE", other.token()),
            Err(e) => warn!("[CcApp] TERMINATE: {}", e),
        }
        self.main.shutdown();

        let exits: Vec<WorkerExit> = self
            .workers
            .iter_mut()
            .filter_map(|w| {
                w.join().map(|code| WorkerExit {
                    name: w.name().to_string(),
                    code,
                })
            })
            .collect();
        info!("[CcApp] stopped");
        exits
    }
}

impl Drop for CcApp {
    fn drop(&mut self) {
        self.stop();
    }
}
