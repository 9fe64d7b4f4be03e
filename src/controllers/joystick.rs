//! joystick.rs
//! Forwards joystick input to MainController as best-effort events.
//! - Axis motion on the configured axis becomes POSITION, a press of the configured button BUTTON_DOWN
//! - Input arriving during the initial settling window is discarded
//! - Commands are serviced without blocking once per loop iteration

use std::{thread, time::Instant};

use log::debug;

use crate::config::JoystickConfig;
use crate::controllers::Controller;
use crate::error::JoystickError;
use crate::ipc::messages::{JoystickCmd, JoystickEvent, JoystickResp};
use crate::ipc::{EventProducer, SlaveEndpoint};

/// Decoded device input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JoystickInput {
    /// Normalized axis position in [-1, 1].
    Axis { axis: u8, value: f64 },
    Button { button: u8, pressed: bool },
}

pub trait JoystickSource: Send {
    fn open(&mut self) -> Result<(), JoystickError>;

    /// Next pending input, never blocking.
    fn poll(&mut self) -> Result<Option<JoystickInput>, JoystickError>;

    fn close(&mut self) {}
}

/// A joystick nobody touches.
#[derive(Debug, Default)]
pub struct IdleJoystick;

impl JoystickSource for IdleJoystick {
    fn open(&mut self) -> Result<(), JoystickError> {
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<JoystickInput>, JoystickError> {
        Ok(None)
    }
}

/// Event for an input, if the configuration maps it to one.
pub fn map_input(cfg: &JoystickConfig, input: JoystickInput) -> Option<JoystickEvent> {
    match input {
        JoystickInput::Axis { axis, value } if axis == cfg.axis_num => {
            Some(JoystickEvent::Position(value.clamp(-1.0, 1.0)))
        }
        JoystickInput::Button {
            button,
            pressed: true,
        } if button == cfg.button_num => Some(JoystickEvent::ButtonDown),
        _ => None,
    }
}

pub struct JoystickController {
    cfg: JoystickConfig,
    source: Box<dyn JoystickSource>,
    endpoint: SlaveEndpoint<JoystickCmd, JoystickResp>,
    events: EventProducer<JoystickEvent>,
    opened_at: Instant,
}

impl JoystickController {
    pub fn new(
        cfg: JoystickConfig,
        source: Box<dyn JoystickSource>,
        endpoint: SlaveEndpoint<JoystickCmd, JoystickResp>,
        events: EventProducer<JoystickEvent>,
    ) -> Self {
        Self {
            cfg,
            source,
            endpoint,
            events,
            opened_at: Instant::now(),
        }
    }

    fn forward_input(&mut self, ignoring: bool) -> Result<(), JoystickError> {
        while let Some(input) = self.source.poll()? {
            if ignoring {
                continue;
            }
            if let Some(event) = map_input(&self.cfg, input) {
                if !self.events.send_event(event) {
                    debug!("[JoystickController] dropped {:?}", event);
                }
            }
        }
        Ok(())
    }
}

impl Controller for JoystickController {
    type Error = JoystickError;
    const NAME: &'static str = "JoystickController";

    fn init(&mut self) -> Result<(), JoystickError> {
        self.source.open()?;
        self.opened_at = Instant::now();
        Ok(())
    }

    fn start(&mut self) -> Result<(), JoystickError> {
        loop {
            let ignoring = self.opened_at.elapsed() < self.cfg.initial_ignore();
            self.forward_input(ignoring)?;

            if let Some((op_id, cmd)) = self.endpoint.get_cmd(false)? {
                match cmd {
                    JoystickCmd::Terminate => {
                        self.endpoint.send_resp(op_id, JoystickResp::Ok)?;
                        return Ok(());
                    }
                    JoystickCmd::IsReady => self.endpoint.send_resp(op_id, JoystickResp::True)?,
                }
            }

            thread::sleep(self.cfg.loop_sleep());
        }
    }

    fn deinit(&mut self) -> Result<(), JoystickError> {
        self.source.close();
        self.endpoint.shutdown();
        self.events.shutdown();
        Ok(())
    }
}
