//! MainController driven one `step()` at a time, with the test holding the
//! other end of every channel.

use std::{
    thread,
    time::{Duration, Instant, SystemTime},
};

use crack_clean::config::Config;
use crack_clean::controllers::Controller;
use crack_clean::controllers::main_controller::{FsmState, MainController, MainEndpoints};
use crack_clean::ipc::messages::{
    ActuatorCmd, ActuatorResp, CcMode, DetectionCmd, DetectionResp, DetectionResult, Frame,
    JoystickCmd, JoystickEvent, JoystickResp, MainCmd, MainResp, OpId, OpObj, Target, VideoCmd,
    VideoImage, VideoResp,
};
use crack_clean::ipc::{command_channel, event_channel, EventProducer, MasterEndpoint, SlaveEndpoint};

struct Rig {
    main: MainController,
    cmd: MasterEndpoint<MainCmd, MainResp>,
    actuator: SlaveEndpoint<ActuatorCmd, ActuatorResp>,
    detection: SlaveEndpoint<DetectionCmd, DetectionResp>,
    joystick: SlaveEndpoint<JoystickCmd, JoystickResp>,
    events: EventProducer<JoystickEvent>,
    video: SlaveEndpoint<VideoCmd, VideoResp>,
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.ipc.shutdown_delay_ms = 0;
    cfg.main.video_max_img_req_delay_ms = 20;
    cfg
}

fn build_rig(cfg: Config) -> Rig {
    let ipc = cfg.ipc.clone();
    let (cmd, main_slave) = command_channel("MainController", &ipc);
    let (act_master, actuator) = command_channel("ActuatorController", &ipc);
    let (det_master, detection) = command_channel("DetectionController", &ipc);
    let (joy_master, joystick) = command_channel("JoystickController", &ipc);
    let (vid_master, video) = command_channel("VideoController", &ipc);
    let (events, joy_consumer) = event_channel(&ipc);

    let main = MainController::new(
        cfg,
        MainEndpoints {
            cmd: main_slave,
            actuator: act_master,
            detection: det_master,
            joystick: joy_master,
            joystick_events: joy_consumer,
            video: vid_master,
        },
    );
    Rig {
        main,
        cmd,
        actuator,
        detection,
        joystick,
        events,
        video,
    }
}

impl Rig {
    fn step(&mut self) -> FsmState {
        self.main.step().unwrap()
    }

    fn answer_probes(&mut self) {
        let (id, cmd) = self.actuator.get_cmd(false).unwrap().unwrap();
        assert_eq!(cmd, ActuatorCmd::IsReady);
        self.actuator.send_resp(id, ActuatorResp::True).unwrap();

        let (id, cmd) = self.detection.get_cmd(false).unwrap().unwrap();
        assert_eq!(cmd, DetectionCmd::IsReady);
        self.detection.send_resp(id, DetectionResp::True).unwrap();

        let (id, cmd) = self.joystick.get_cmd(false).unwrap().unwrap();
        assert_eq!(cmd, JoystickCmd::IsReady);
        self.joystick.send_resp(id, JoystickResp::True).unwrap();

        let (id, cmd) = self.video.get_cmd(false).unwrap().unwrap();
        assert_eq!(cmd, VideoCmd::IsReady);
        self.video.send_resp(id, VideoResp::True).unwrap();
    }

    fn to_ready(&mut self) {
        assert_eq!(self.step(), FsmState::Starting);
        self.answer_probes();
        assert_eq!(self.step(), FsmState::Ready);
    }

    /// Send a command, run one step, return the answer.
    fn command(&mut self, cmd: MainCmd) -> MainResp {
        let id = self.cmd.send_cmd_async(cmd).unwrap();
        self.step();
        self.cmd.check_for_resp(id).unwrap()
    }

    fn start_cycle(&mut self) {
        assert_eq!(self.command(MainCmd::Start), MainResp::Ok);
        assert_eq!(self.step(), FsmState::AwaitImage);
    }

    fn serve_image(&mut self) {
        let (id, cmd) = self.video.get_cmd(false).unwrap().unwrap();
        assert_eq!(cmd, VideoCmd::GetLatestImg);
        let image = VideoImage {
            frame: Frame::new(2, 2, vec![0; 4]),
            captured_at: SystemTime::now(),
        };
        self.video.send_resp(id, VideoResp::LatestImg(Some(image))).unwrap();
        assert_eq!(self.step(), FsmState::AwaitResult);
    }

    fn serve_detection(&mut self, y_mm: Option<f64>) -> FsmState {
        let (id, cmd) = self.detection.get_cmd(false).unwrap().unwrap();
        assert!(matches!(cmd, DetectionCmd::Detect(_)));
        self.detection
            .send_resp(id, DetectionResp::DetectionResult(DetectionResult { y_mm, image: None }))
            .unwrap();
        self.step()
    }
}

#[test]
fn becomes_ready_once_every_worker_answers_true() {
    let mut rig = build_rig(test_config());
    assert_eq!(rig.command(MainCmd::IsReady), MainResp::False);
    rig.answer_probes();
    assert_eq!(rig.step(), FsmState::Ready);
    assert_eq!(rig.command(MainCmd::IsReady), MainResp::True);
}

#[test]
fn false_readiness_is_probed_again() {
    let mut rig = build_rig(test_config());
    rig.step();

    let (id, _) = rig.video.get_cmd(false).unwrap().unwrap();
    rig.video.send_resp(id, VideoResp::False).unwrap();
    let (id, _) = rig.actuator.get_cmd(false).unwrap().unwrap();
    rig.actuator.send_resp(id, ActuatorResp::True).unwrap();
    let (id, _) = rig.detection.get_cmd(false).unwrap().unwrap();
    rig.detection.send_resp(id, DetectionResp::True).unwrap();
    let (id, _) = rig.joystick.get_cmd(false).unwrap().unwrap();
    rig.joystick.send_resp(id, JoystickResp::True).unwrap();

    assert_eq!(rig.step(), FsmState::Starting);
    assert_eq!(rig.step(), FsmState::Starting);

    let (id, cmd) = rig.video.get_cmd(false).unwrap().unwrap();
    assert_eq!(cmd, VideoCmd::IsReady);
    rig.video.send_resp(id, VideoResp::True).unwrap();
    assert_eq!(rig.step(), FsmState::Ready);
}

#[test]
fn start_is_rejected_outside_ready() {
    let mut rig = build_rig(test_config());
    assert_eq!(rig.command(MainCmd::Start), MainResp::Error);
    assert_eq!(rig.main.fsm_state(), FsmState::Starting);

    rig.answer_probes();
    rig.step();
    rig.start_cycle();
    assert_eq!(rig.command(MainCmd::Start), MainResp::Error);
}

#[test]
fn start_requests_the_latest_image() {
    let mut rig = build_rig(test_config());
    rig.to_ready();
    rig.start_cycle();
    let (_, cmd) = rig.video.get_cmd(false).unwrap().unwrap();
    assert_eq!(cmd, VideoCmd::GetLatestImg);
}

#[test]
fn empty_image_is_requested_again_then_silence_terminates() {
    let mut rig = build_rig(test_config());
    rig.to_ready();
    rig.start_cycle();

    let (id, _) = rig.video.get_cmd(false).unwrap().unwrap();
    rig.video.send_resp(id, VideoResp::LatestImg(None)).unwrap();
    assert_eq!(rig.step(), FsmState::AcquireImage);
    assert_eq!(rig.step(), FsmState::AwaitImage);

    let (_, cmd) = rig.video.get_cmd(false).unwrap().unwrap();
    assert_eq!(cmd, VideoCmd::GetLatestImg);

    thread::sleep(Duration::from_millis(40));
    assert_eq!(rig.step(), FsmState::Terminate);
}

#[test]
fn auto_mode_commands_actuator_once_per_change() {
    let mut rig = build_rig(test_config());
    rig.to_ready();
    assert_eq!(rig.command(MainCmd::SetMode(CcMode::Auto)), MainResp::Ok);
    rig.start_cycle();

    rig.serve_image();
    assert_eq!(rig.serve_detection(Some(10.0)), FsmState::AwaitActuator);
    assert_eq!(rig.main.target_req(), Some(Target::Mm(40.0)));

    let (id, cmd) = rig.actuator.get_cmd(false).unwrap().unwrap();
    assert_eq!(cmd, ActuatorCmd::SetTargetMm(40.0));
    rig.actuator.send_resp(id, ActuatorResp::Ok).unwrap();
    assert_eq!(rig.step(), FsmState::AcquireImage);
    assert_eq!(rig.main.target_cur(), Some(Target::Mm(40.0)));

    // Same offset again: no new actuator traffic
    assert_eq!(rig.step(), FsmState::AwaitImage);
    rig.serve_image();
    assert_eq!(rig.serve_detection(Some(10.0)), FsmState::AcquireImage);
    assert!(rig.actuator.get_cmd(false).unwrap().is_none());

    let status = rig.main.status().unwrap();
    assert_eq!(status.mode, CcMode::Auto);
    assert_eq!(status.dc_y_mm, Some(10.0));
    assert_eq!(status.target, "40.0");
}

#[test]
fn missing_offset_keeps_target() {
    let mut rig = build_rig(test_config());
    rig.to_ready();
    assert_eq!(rig.command(MainCmd::SetMode(CcMode::Auto)), MainResp::Ok);
    rig.start_cycle();

    rig.serve_image();
    assert_eq!(rig.serve_detection(None), FsmState::AcquireImage);
    assert_eq!(rig.main.target_req(), None);
    assert!(rig.actuator.get_cmd(false).unwrap().is_none());
}

#[test]
fn joystick_dead_zone_stops_without_changing_mode() {
    let mut rig = build_rig(test_config());
    rig.to_ready();
    assert_eq!(rig.command(MainCmd::SetMode(CcMode::Auto)), MainResp::Ok);

    assert!(rig.events.send_event(JoystickEvent::Position(0.02)));
    rig.step();
    assert_eq!(rig.main.mode(), CcMode::Auto);
    assert_eq!(rig.main.target_req(), Some(Target::Stop));

    assert!(rig.events.send_event(JoystickEvent::Position(0.8)));
    rig.step();
    assert_eq!(rig.main.mode(), CcMode::Manual);
    assert_eq!(rig.main.target_req(), Some(Target::Mm(60.0)));

    assert!(rig.events.send_event(JoystickEvent::Position(-0.8)));
    rig.step();
    assert_eq!(rig.main.target_req(), Some(Target::Mm(0.0)));
}

#[test]
fn button_toggles_mode_and_manual_requests_stop() {
    let mut rig = build_rig(test_config());
    rig.to_ready();

    assert!(rig.events.send_event(JoystickEvent::ButtonDown));
    rig.step();
    assert_eq!(rig.main.mode(), CcMode::Auto);

    assert!(rig.events.send_event(JoystickEvent::ButtonDown));
    rig.step();
    assert_eq!(rig.main.mode(), CcMode::Manual);
    assert_eq!(rig.main.target_req(), Some(Target::Stop));
}

#[test]
fn setters_reject_out_of_range_values() {
    let mut rig = build_rig(test_config());
    assert_eq!(rig.command(MainCmd::SetDetectThresh(1.5)), MainResp::Error);
    assert_eq!(rig.command(MainCmd::SetSimpFilterThresh(300)), MainResp::Error);
    assert_eq!(rig.command(MainCmd::SetAdaptFilterThresh(f64::NAN)), MainResp::Error);
    assert_eq!(rig.command(MainCmd::SetAdaptFilterRadius(0)), MainResp::Error);

    assert_eq!(rig.command(MainCmd::SetDetectThresh(0.7)), MainResp::Ok);
    assert_eq!(rig.command(MainCmd::SetSimpFilterThresh(120)), MainResp::Ok);
    assert_eq!(rig.command(MainCmd::SetAdaptFilterRadius(3)), MainResp::Ok);
}

#[test]
fn status_is_empty_before_first_cycle() {
    let mut rig = build_rig(test_config());
    assert_eq!(rig.command(MainCmd::GetStatus), MainResp::Status(None));
}

#[test]
fn terminate_command_and_lost_supervisor_both_terminate() {
    let mut rig = build_rig(test_config());
    assert_eq!(rig.command(MainCmd::Terminate), MainResp::Ok);
    assert_eq!(rig.main.fsm_state(), FsmState::Terminate);

    let mut rig = rig_without_supervisor();
    assert_eq!(rig.step(), FsmState::Terminate);
}

fn rig_without_supervisor() -> Rig {
    let mut rig = build_rig(test_config());
    rig.cmd.shutdown();
    rig
}

/// Next command on a slave end, skipping readiness probes still queued from
/// the last loop iteration.
fn next_non_probe<C: OpObj, R: OpObj>(
    ep: &SlaveEndpoint<C, R>,
    is_probe: fn(&C) -> bool,
) -> (OpId, C) {
    loop {
        let (id, cmd) = ep.get_cmd(true).unwrap().unwrap();
        if !is_probe(&cmd) {
            return (id, cmd);
        }
    }
}

#[test]
fn shutdown_retracts_then_terminates_workers_in_order() {
    let mut cfg = test_config();
    cfg.ipc.cmd_sync_timeout_ms = 100;
    cfg.main.actuator_settle_ms = 10;
    let Rig {
        mut main,
        cmd: mut supervisor,
        actuator,
        detection,
        joystick,
        events: _events,
        video,
    } = build_rig(cfg);

    let terminate_id = supervisor.send_cmd_async(MainCmd::Terminate).unwrap();
    let main_thread = thread::spawn(move || {
        let outcome = main.start();
        (outcome.is_ok(), main.fsm_state())
    });

    let mut actuator_seq = Vec::new();
    loop {
        let (id, cmd) = next_non_probe(&actuator, |c| *c == ActuatorCmd::IsReady);
        actuator.send_resp(id, ActuatorResp::Ok).unwrap();
        let done = cmd == ActuatorCmd::Terminate;
        actuator_seq.push(cmd);
        if done {
            break;
        }
    }
    assert_eq!(
        actuator_seq,
        vec![ActuatorCmd::SetTargetMm(0.0), ActuatorCmd::StopMotor, ActuatorCmd::Terminate]
    );

    let (id, cmd) = next_non_probe(&detection, |c| *c == DetectionCmd::IsReady);
    assert_eq!(cmd, DetectionCmd::Terminate);
    detection.send_resp(id, DetectionResp::Ok).unwrap();
    let detection_done = Instant::now();

    // Joystick stays silent; its TERMINATE times out and video is still stopped.
    let (id, cmd) = next_non_probe(&video, |c| *c == VideoCmd::IsReady);
    assert_eq!(cmd, VideoCmd::Terminate);
    assert!(detection_done.elapsed() >= Duration::from_millis(90));
    video.send_resp(id, VideoResp::Ok).unwrap();

    let (ok, state) = main_thread.join().unwrap();
    assert!(ok);
    assert_eq!(state, FsmState::Terminate);

    let (_, cmd) = next_non_probe(&joystick, |c| *c == JoystickCmd::IsReady);
    assert_eq!(cmd, JoystickCmd::Terminate);
    assert_eq!(supervisor.check_for_resp(terminate_id), Some(MainResp::Ok));
}
