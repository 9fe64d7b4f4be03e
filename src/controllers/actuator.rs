//! actuator.rs
//! Serves actuator commands by translating them into JrkG2 serial transactions.
//! - Blocks on its command channel; the device is only touched in response to a command
//! - Out-of-range targets are answered with ERROR, device faults end the worker

use log::{info, warn};

use crate::config::ActuatorConfig;
use crate::controllers::Controller;
use crate::error::ActuatorError;
use crate::ipc::messages::{ActuatorCmd, ActuatorResp};
use crate::ipc::SlaveEndpoint;
use crate::jrkg2::{open_serial, JrkG2, JrkG2Settings, Link, SimJrkG2};

/// Where the JrkG2 lives.
#[derive(Clone)]
pub enum ActuatorLink {
    /// The serial device named in the config.
    Serial,
    Sim(SimJrkG2),
}

pub struct ActuatorController {
    cfg: ActuatorConfig,
    link: ActuatorLink,
    endpoint: SlaveEndpoint<ActuatorCmd, ActuatorResp>,
    jrk: Option<JrkG2<dyn Link>>,
}

impl ActuatorController {
    pub fn new(
        cfg: ActuatorConfig,
        link: ActuatorLink,
        endpoint: SlaveEndpoint<ActuatorCmd, ActuatorResp>,
    ) -> Self {
        Self {
            cfg,
            link,
            endpoint,
            jrk: None,
        }
    }

    /// Run one command against the device. `Ok(None)` means TERMINATE.
    fn handle(&mut self, cmd: ActuatorCmd) -> Result<Option<ActuatorResp>, ActuatorError> {
        let jrk = self.jrk.as_mut().ok_or(ActuatorError::NotInitialized)?;
        let resp = match cmd {
            ActuatorCmd::Terminate => return Ok(None),
            ActuatorCmd::IsReady => ActuatorResp::True,
            ActuatorCmd::GetTargetMm => ActuatorResp::TargetValue(jrk.get_target_mm()?),
            ActuatorCmd::SetTargetMm(mm) => {
                if jrk.set_target_mm(mm)? {
                    ActuatorResp::Ok
                } else {
                    warn!("[ActuatorController] target {} mm outside stroke", mm);
                    ActuatorResp::Error
                }
            }
            ActuatorCmd::StopMotor => {
                jrk.stop_motor()?;
                ActuatorResp::Ok
            }
        };
        Ok(Some(resp))
    }
}

impl Controller for ActuatorController {
    type Error = ActuatorError;
    const NAME: &'static str = "ActuatorController";

    fn init(&mut self) -> Result<(), ActuatorError> {
        let link: Box<dyn Link> = match &self.link {
            ActuatorLink::Serial => open_serial(&self.cfg)?,
            ActuatorLink::Sim(sim) => Box::new(sim.clone()),
        };
        let mut jrk = JrkG2::new(link, JrkG2Settings::from(&self.cfg))?;

        let halting = jrk.get_and_clear_error_flags_halting()?;
        if !halting.reportable().is_empty() {
            info!(
                "[ActuatorController] cleared halting flags: {}",
                halting.descriptions().join(",")
            );
        }
        jrk.stop_motor()?;

        self.jrk = Some(jrk);
        Ok(())
    }

    fn start(&mut self) -> Result<(), ActuatorError> {
        loop {
            let Some((op_id, cmd)) = self.endpoint.get_cmd(true)? else {
                continue;
            };
            match self.handle(cmd) {
                Ok(Some(resp)) => self.endpoint.send_resp(op_id, resp)?,
                Ok(None) => {
                    self.endpoint.send_resp(op_id, ActuatorResp::Ok)?;
                    return Ok(());
                }
                Err(e) => {
                    // Still owed an answer; the caller must not wait out its timeout.
                    let _ = self.endpoint.send_resp(op_id, ActuatorResp::Error);
                    return Err(e);
                }
            }
        }
    }

    fn deinit(&mut self) -> Result<(), ActuatorError> {
        self.endpoint.shutdown();
        if let Some(jrk) = self.jrk.take() {
            jrk.close()?;
        }
        Ok(())
    }
}
