//! main_controller.rs
//! Orchestrates the crack-following cycle: latest image → detection → actuator target.
//! - FSM is stepped once per iteration and never blocks on a subordinate worker
//! - At most one supervisor command and one joystick event are serviced per iteration
//! - SpinSleeper paces the loop to the configured minimum period
//! - On TERMINATE, retracts the actuator and stops every subordinate worker in a fixed order

use std::{
    thread,
    time::{Duration, Instant, SystemTime},
};

use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::config::Config;
use crate::controllers::Controller;
use crate::error::CcError;
use crate::ipc::messages::{
    ActuatorCmd, ActuatorResp, CcMode, CcStatus, DetectRequest, DetectionCmd, DetectionResp,
    FilterMode, JoystickCmd, JoystickEvent, JoystickResp, MainCmd, MainResp, OpObj, Target,
    VideoCmd, VideoResp,
};
use crate::ipc::{EventConsumer, MasterEndpoint, OpId, SlaveEndpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Starting,
    Ready,
    AcquireImage,
    AwaitImage,
    AwaitResult,
    AwaitActuator,
    Terminate,
}

/// Actuator position that puts the tool over a crack at lateral offset
/// `dc_y_mm`, clamped to [0, stroke_mm].
pub fn calc_act_mm_from_dc_mm(y_origin_mm: f64, stroke_mm: f64, dc_y_mm: f64) -> f64 {
    (y_origin_mm - dc_y_mm).max(0.0).min(stroke_mm)
}

/// Every channel end MainController owns.
pub struct MainEndpoints {
    pub cmd: SlaveEndpoint<MainCmd, MainResp>,
    pub actuator: MasterEndpoint<ActuatorCmd, ActuatorResp>,
    pub detection: MasterEndpoint<DetectionCmd, DetectionResp>,
    pub joystick: MasterEndpoint<JoystickCmd, JoystickResp>,
    pub joystick_events: EventConsumer<JoystickEvent>,
    pub video: MasterEndpoint<VideoCmd, VideoResp>,
}

/// Readiness bookkeeping for one subordinate worker.
#[derive(Debug, Default, Clone, Copy)]
struct Probe {
    ready: bool,
    pending: Option<OpId>,
}

fn unexpected<R: OpObj>(worker: &str, resp: &R, state: FsmState) -> CcError {
    CcError::Protocol(format!(
        "unexpected {} from {} in {:?}",
        resp.token(),
        worker,
        state
    ))
}

/// Issue an IS_READY probe if none is outstanding, else poll for its answer.
/// FALSE clears the probe so the next call probes again.
fn poll_probe<C: OpObj, R: OpObj>(
    ep: &mut MasterEndpoint<C, R>,
    probe: &mut Probe,
    is_ready: fn() -> C,
    readiness: fn(&R) -> Option<bool>,
) -> Result<(), CcError> {
    if probe.ready {
        return Ok(());
    }
    match probe.pending {
        None => probe.pending = Some(ep.send_cmd_async(is_ready())?),
        Some(op_id) => {
            if let Some(resp) = ep.check_for_resp(op_id) {
                probe.pending = None;
                probe.ready =
                    readiness(&resp).ok_or_else(|| unexpected(ep.name(), &resp, FsmState::Starting))?;
                info!("[MainController] {} ready: {}", ep.name(), resp.token());
            }
        }
    }
    Ok(())
}

/// Synchronous shutdown-time call; a missing or wrong answer is logged only.
fn sync_or_warn<C: OpObj, R: OpObj>(
    ep: &mut MasterEndpoint<C, R>,
    cmd: C,
    timeout: Duration,
    expected: fn(&R) -> bool,
) -> bool {
    let token = cmd.token();
    match ep.send_cmd_sync(cmd, timeout) {
        Ok(Some(resp)) if expected(&resp) => true,
        Ok(Some(resp)) => {
            warn!(
                "[MainController] unexpected {} from {} to {}",
                resp.token(),
                ep.name(),
                token
            );
            false
        }
        Ok(None) => {
            warn!(
                "[MainController] timed out waiting for {} response to {}",
                ep.name(),
                token
            );
            false
        }
        Err(e) => {
            warn!("[MainController] {} to {} failed: {}", token, ep.name(), e);
            false
        }
    }
}

pub struct MainController {
    cfg: Config,
    ep: MainEndpoints,

    fsm: FsmState,
    mode: CcMode,
    filter_mode: FilterMode,
    detect_thresh: f64,
    simpfilter_thresh: i32,
    adaptfilter_thresh: f64,
    adaptfilter_radius: i32,

    /// `None` until the first actuator command is acknowledged.
    target_cur: Option<Target>,
    target_req: Option<Target>,

    probe_actuator: Probe,
    probe_detection: Probe,
    probe_joystick: Probe,
    probe_video: Probe,

    pending_video: Option<OpId>,
    pending_detection: Option<OpId>,
    /// Outstanding actuator command and the target it will establish.
    pending_actuator: Option<(OpId, Target)>,

    started_at: Instant,
    img_req_at: Instant,
    dc_call_at: Instant,
    img_captured_at: SystemTime,
    num_full_cycles: u64,
    status: Option<CcStatus>,
}

impl MainController {
    pub fn new(cfg: Config, ep: MainEndpoints) -> Self {
        let now = Instant::now();
        Self {
            mode: CcMode::Manual,
            filter_mode: cfg.detection.filter_mode,
            detect_thresh: cfg.detection.detect_thresh,
            simpfilter_thresh: cfg.detection.simpfilter_thresh,
            adaptfilter_thresh: cfg.detection.adaptfilter_thresh,
            adaptfilter_radius: cfg.detection.adaptfilter_radius,
            cfg,
            ep,
            fsm: FsmState::Starting,
            target_cur: None,
            target_req: None,
            probe_actuator: Probe::default(),
            probe_detection: Probe::default(),
            probe_joystick: Probe::default(),
            probe_video: Probe::default(),
            pending_video: None,
            pending_detection: None,
            pending_actuator: None,
            started_at: now,
            img_req_at: now,
            dc_call_at: now,
            img_captured_at: SystemTime::UNIX_EPOCH,
            num_full_cycles: 0,
            status: None,
        }
    }

    pub fn fsm_state(&self) -> FsmState {
        self.fsm
    }

    pub fn mode(&self) -> CcMode {
        self.mode
    }

    pub fn target_req(&self) -> Option<Target> {
        self.target_req
    }

    pub fn target_cur(&self) -> Option<Target> {
        self.target_cur
    }

    pub fn status(&self) -> Option<&CcStatus> {
        self.status.as_ref()
    }

    /// One loop iteration without pacing: FSM step, then at most one
    /// command, then at most one joystick event.
    pub fn step(&mut self) -> Result<FsmState, CcError> {
        self.step_fsm()?;
        self.service_command()?;
        self.service_joystick();
        Ok(self.fsm)
    }

    fn run_loop(&mut self) -> Result<(), CcError> {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let min_period = self.cfg.main.min_period();
        let mut last_loop = Instant::now();

        while self.fsm != FsmState::Terminate {
            self.step()?;

            let elapsed = last_loop.elapsed();
            if elapsed < min_period {
                sleeper.sleep(min_period - elapsed);
            }
            last_loop = Instant::now();
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // FSM
    // ------------------------------------------------------------------------

    fn step_fsm(&mut self) -> Result<(), CcError> {
        match self.fsm {
            FsmState::Starting => self.probe_workers(),
            FsmState::Ready | FsmState::Terminate => Ok(()),
            FsmState::AcquireImage => self.acquire_image(),
            FsmState::AwaitImage => self.await_image(),
            FsmState::AwaitResult => self.await_result(),
            FsmState::AwaitActuator => self.await_actuator(),
        }
    }

    fn probe_workers(&mut self) -> Result<(), CcError> {
        poll_probe(
            &mut self.ep.actuator,
            &mut self.probe_actuator,
            || ActuatorCmd::IsReady,
            |r| match r {
                ActuatorResp::True => Some(true),
                ActuatorResp::False => Some(false),
                _ => None,
            },
        )?;
        poll_probe(
            &mut self.ep.detection,
            &mut self.probe_detection,
            || DetectionCmd::IsReady,
            |r| match r {
                DetectionResp::True => Some(true),
                DetectionResp::False => Some(false),
                _ => None,
            },
        )?;
        poll_probe(
            &mut self.ep.joystick,
            &mut self.probe_joystick,
            || JoystickCmd::IsReady,
            |r| match r {
                JoystickResp::True => Some(true),
                JoystickResp::False => Some(false),
                _ => None,
            },
        )?;
        poll_probe(
            &mut self.ep.video,
            &mut self.probe_video,
            || VideoCmd::IsReady,
            |r| match r {
                VideoResp::True => Some(true),
                VideoResp::False => Some(false),
                _ => None,
            },
        )?;

        let all_ready = [
            self.probe_actuator,
            self.probe_detection,
            self.probe_joystick,
            self.probe_video,
        ]
        .iter()
        .all(|p| p.ready);
        if all_ready {
            info!("[MainController] all workers ready");
            self.fsm = FsmState::Ready;
        }
        Ok(())
    }

    fn acquire_image(&mut self) -> Result<(), CcError> {
        self.pending_video = Some(self.ep.video.send_cmd_async(VideoCmd::GetLatestImg)?);
        self.img_req_at = Instant::now();
        self.fsm = FsmState::AwaitImage;
        Ok(())
    }

    fn await_image(&mut self) -> Result<(), CcError> {
        let op_id = self
            .pending_video
            .ok_or_else(|| CcError::Protocol("no image request outstanding".into()))?;

        match self.ep.video.check_for_resp(op_id) {
            Some(VideoResp::LatestImg(Some(image))) => {
                self.pending_video = None;
                self.img_captured_at = image.captured_at;
                let request = DetectRequest {
                    image,
                    detect_thresh: self.detect_thresh,
                    simpfilter_thresh: self.simpfilter_thresh,
                    adaptfilter_thresh: self.adaptfilter_thresh,
                    adaptfilter_radius: self.adaptfilter_radius,
                    filter_mode: self.filter_mode,
                };
                self.dc_call_at = Instant::now();
                let op_id = self
                    .ep
                    .detection
                    .send_cmd_async(DetectionCmd::Detect(Box::new(request)))?;
                self.pending_detection = Some(op_id);
                self.fsm = FsmState::AwaitResult;
            }
            Some(VideoResp::LatestImg(None)) => {
                self.pending_video = None;
                debug!("[MainController] no image captured yet");
                self.fsm = FsmState::AcquireImage;
            }
            Some(other) => return Err(unexpected(self.ep.video.name(), &other, self.fsm)),
            None => {
                let max_delay = self.cfg.main.video_max_img_req_delay();
                if self.img_req_at.elapsed() > max_delay {
                    error!(
                        "[MainController] no image from {} after {:?}; terminating",
                        self.ep.video.name(),
                        max_delay
                    );
                    self.fsm = FsmState::Terminate;
                }
            }
        }
        Ok(())
    }

    fn await_result(&mut self) -> Result<(), CcError> {
        let op_id = self
            .pending_detection
            .ok_or_else(|| CcError::Protocol("no detection request outstanding".into()))?;
        let Some(resp) = self.ep.detection.check_for_resp(op_id) else {
            return Ok(());
        };
        self.pending_detection = None;
        let result = match resp {
            DetectionResp::DetectionResult(result) => result,
            other => return Err(unexpected(self.ep.detection.name(), &other, self.fsm)),
        };

        let dc_call_ms = self.dc_call_at.elapsed().as_secs_f64() * 1000.0;
        if let (CcMode::Auto, Some(dc_y_mm)) = (self.mode, result.y_mm) {
            let mm = calc_act_mm_from_dc_mm(
                self.cfg.calibration.actuator_mm_at_y_origin,
                self.cfg.actuator.stroke_mm,
                dc_y_mm,
            );
            self.target_req = Some(Target::Mm(mm));
        }

        self.num_full_cycles += 1;
        let run_secs = self.started_at.elapsed().as_secs_f64();
        let ips = if run_secs > 0.0 {
            self.num_full_cycles as f64 / run_secs
        } else {
            0.0
        };
        let img_age_ms = SystemTime::now()
            .duration_since(self.img_captured_at)
            .map(|age| age.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        self.status = Some(CcStatus {
            mode: self.mode,
            detect_thresh: self.detect_thresh,
            simpfilter_thresh: self.simpfilter_thresh,
            adaptfilter_thresh: self.adaptfilter_thresh,
            adaptfilter_radius: self.adaptfilter_radius,
            filter_mode: self.filter_mode,
            ips,
            dc_call_ms,
            img_age_ms,
            dc_y_mm: result.y_mm,
            target: self.target_cur.unwrap_or(Target::Stop).to_string(),
            img: result.image,
        });

        self.command_actuator_if_changed()
    }

    fn command_actuator_if_changed(&mut self) -> Result<(), CcError> {
        let req = match self.target_req {
            Some(req) if self.target_req != self.target_cur => req,
            _ => {
                self.fsm = FsmState::AcquireImage;
                return Ok(());
            }
        };
        let cmd = match req {
            Target::Stop => ActuatorCmd::StopMotor,
            Target::Mm(mm) => ActuatorCmd::SetTargetMm(mm),
        };
        debug!("[MainController] actuator target {} -> {}", self.target_cur.unwrap_or(Target::Stop), req);
        let op_id = self.ep.actuator.send_cmd_async(cmd)?;
        self.pending_actuator = Some((op_id, req));
        self.fsm = FsmState::AwaitActuator;
        Ok(())
    }

    fn await_actuator(&mut self) -> Result<(), CcError> {
        let (op_id, commanded) = self
            .pending_actuator
            .ok_or_else(|| CcError::Protocol("no actuator command outstanding".into()))?;
        match self.ep.actuator.check_for_resp(op_id) {
            None => Ok(()),
            Some(ActuatorResp::Ok) => {
                self.pending_actuator = None;
                self.target_cur = Some(commanded);
                self.fsm = FsmState::AcquireImage;
                Ok(())
            }
            Some(other) => Err(unexpected(self.ep.actuator.name(), &other, self.fsm)),
        }
    }

    // ------------------------------------------------------------------------
    // Commands and joystick events
    // ------------------------------------------------------------------------

    fn set_mode(&mut self, mode: CcMode) {
        if mode != self.mode {
            info!("[MainController] mode {} -> {}", self.mode, mode);
        }
        self.mode = mode;
        if mode == CcMode::Manual {
            self.target_req = Some(Target::Stop);
        }
    }

    fn apply_setter(&mut self, name: &str, valid: bool, set: impl FnOnce(&mut Self)) -> MainResp {
        if valid {
            set(self);
            MainResp::Ok
        } else {
            warn!("[MainController] rejected out-of-range {}", name);
            MainResp::Error
        }
    }

    fn service_command(&mut self) -> Result<(), CcError> {
        let (op_id, cmd) = match self.ep.cmd.get_cmd(false) {
            Ok(Some(next)) => next,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("[MainController] command channel lost ({}); terminating", e);
                self.fsm = FsmState::Terminate;
                return Ok(());
            }
        };
        debug!("[MainController] command {}", cmd.token());

        let resp = match cmd {
            MainCmd::Terminate => {
                self.fsm = FsmState::Terminate;
                MainResp::Ok
            }
            MainCmd::Start => {
                if self.fsm == FsmState::Ready {
                    info!("[MainController] starting cycle");
                    self.started_at = Instant::now();
                    self.fsm = FsmState::AcquireImage;
                    MainResp::Ok
                } else {
                    warn!("[MainController] START rejected in {:?}", self.fsm);
                    MainResp::Error
                }
            }
            MainCmd::IsReady => {
                if self.fsm != FsmState::Starting {
                    MainResp::True
                } else {
                    MainResp::False
                }
            }
            MainCmd::GetStatus => MainResp::Status(self.status.clone().map(Box::new)),
            MainCmd::SetMode(mode) => {
                self.set_mode(mode);
                MainResp::Ok
            }
            MainCmd::ToggleMode => {
                self.set_mode(self.mode.toggled());
                MainResp::Ok
            }
            MainCmd::SetDetectThresh(v) => {
                self.apply_setter("detect_thresh", (0.0..=1.0).contains(&v), |s| {
                    s.detect_thresh = v
                })
            }
            MainCmd::SetSimpFilterThresh(v) => {
                self.apply_setter("simpfilter_thresh", (0..=255).contains(&v), |s| {
                    s.simpfilter_thresh = v
                })
            }
            MainCmd::SetAdaptFilterThresh(v) => {
                self.apply_setter("adaptfilter_thresh", v.is_finite(), |s| {
                    s.adaptfilter_thresh = v
                })
            }
            MainCmd::SetAdaptFilterRadius(v) => {
                self.apply_setter("adaptfilter_radius", v >= 1, |s| s.adaptfilter_radius = v)
            }
            MainCmd::SetFilterMode(mode) => {
                self.filter_mode = mode;
                MainResp::Ok
            }
        };

        if let Err(e) = self.ep.cmd.send_resp(op_id, resp) {
            warn!("[MainController] failed to answer op {}: {}", op_id, e);
        }
        Ok(())
    }

    fn service_joystick(&mut self) {
        let Some(event) = self.ep.joystick_events.check_for_event() else {
            return;
        };
        match event {
            JoystickEvent::ButtonDown => self.set_mode(self.mode.toggled()),
            JoystickEvent::Position(value) => {
                if value.is_nan() || value.abs() <= self.cfg.joystick.zero_max_norm {
                    self.target_req = Some(Target::Stop);
                } else {
                    self.mode = CcMode::Manual;
                    let extend = (value > 0.0) == self.cfg.joystick.positive_is_extend;
                    let mm = if extend { self.cfg.actuator.stroke_mm } else { 0.0 };
                    self.target_req = Some(Target::Mm(mm));
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    fn shutdown_workers(&mut self) {
        let timeout = self.cfg.ipc.cmd_sync_timeout();

        info!("[MainController] retracting actuator...");
        sync_or_warn(
            &mut self.ep.actuator,
            ActuatorCmd::SetTargetMm(0.0),
            timeout,
            |r| matches!(r, ActuatorResp::Ok),
        );
        thread::sleep(self.cfg.main.actuator_settle());

        info!("[MainController] stopping actuator motor...");
        sync_or_warn(
            &mut self.ep.actuator,
            ActuatorCmd::StopMotor,
            timeout,
            |r| matches!(r, ActuatorResp::Ok),
        );

        info!("[MainController] terminating {}...", self.ep.actuator.name());
        sync_or_warn(
            &mut self.ep.actuator,
            ActuatorCmd::Terminate,
            timeout,
            |r| matches!(r, ActuatorResp::Ok),
        );
        info!("[MainController] terminating {}...", self.ep.detection.name());
        sync_or_warn(
            &mut self.ep.detection,
            DetectionCmd::Terminate,
            timeout,
            |r| matches!(r, DetectionResp::Ok),
        );
        info!("[MainController] terminating {}...", self.ep.joystick.name());
        sync_or_warn(
            &mut self.ep.joystick,
            JoystickCmd::Terminate,
            timeout,
            |r| matches!(r, JoystickResp::Ok),
        );
        info!("[MainController] terminating {}...", self.ep.video.name());
        sync_or_warn(
            &mut self.ep.video,
            VideoCmd::Terminate,
            timeout,
            |r| matches!(r, VideoResp::Ok),
        );
    }
}

impl Controller for MainController {
    type Error = CcError;
    const NAME: &'static str = "MainController";

    fn init(&mut self) -> Result<(), CcError> {
        debug!(
            "[MainController] min period {:?}, stroke {} mm, y origin {} mm",
            self.cfg.main.min_period(),
            self.cfg.actuator.stroke_mm,
            self.cfg.calibration.actuator_mm_at_y_origin
        );
        Ok(())
    }

    /// Runs the loop until TERMINATE (or a fatal error), then always stops
    /// the subordinate workers before returning.
    fn start(&mut self) -> Result<(), CcError> {
        let outcome = self.run_loop();
        self.fsm = FsmState::Terminate;
        self.shutdown_workers();
        outcome
    }

    fn deinit(&mut self) -> Result<(), CcError> {
        self.ep.cmd.shutdown();
        self.ep.actuator.shutdown();
        self.ep.detection.shutdown();
        self.ep.joystick.shutdown();
        self.ep.video.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_maps_through_origin_and_clamps() {
        assert_eq!(calc_act_mm_from_dc_mm(50.0, 60.0, 10.0), 40.0);
        assert_eq!(calc_act_mm_from_dc_mm(50.0, 60.0, -25.0), 60.0);
        assert_eq!(calc_act_mm_from_dc_mm(50.0, 60.0, 80.0), 0.0);
        assert_eq!(calc_act_mm_from_dc_mm(50.0, 60.0, 50.0), 0.0);
    }
}
