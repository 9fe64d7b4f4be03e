//! Driver for the Pololu Jrk G2 motor controller over its compact serial
//! protocol.
//!
//! Every command frame is the command byte plus payload, optionally followed
//! by a CRC-7 byte. Responses have a fixed length known from the command, so
//! there is no framing beyond the link's own read timeout.

pub mod crc;
pub mod error_flags;
pub mod sim;

use std::io::{ErrorKind, Read, Write};

use log::{debug, warn};
use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::config::ActuatorConfig;
use crate::error::JrkG2Error;

pub use crc::crc7;
pub use error_flags::ErrorFlags;
pub use sim::SimJrkG2;

pub const TARGET_MIN: u16 = 0x0000;
pub const TARGET_MAX: u16 = 0x0FFF;

pub const CMD_GET_AND_CLEAR_ERRORS_HALTING: u8 = 0xB3;
pub const CMD_GET_AND_CLEAR_ERRORS_OCCURRED: u8 = 0xB5;
pub const CMD_SET_TARGET_HIRES: u8 = 0xC0;
pub const CMD_GET_VARIABLES: u8 = 0xE5;
pub const CMD_STOP_MOTOR: u8 = 0xFF;

pub const VAR_TARGET: u8 = 0x02;
pub const VAR_FEEDBACK: u8 = 0x04;
pub const VAR_ERRORS_HALTING: u8 = 0x12;
pub const VAR_ERRORS_OCCURRED: u8 = 0x14;
/// Every variable read here is a little-endian u16.
pub const VAR_LEN_U16: u8 = 2;

/// Anything the driver can talk through: a serial port or a simulator.
pub trait Link: Read + Write + Send {}
impl<T: Read + Write + Send + ?Sized> Link for T {}

/// Open the configured serial device with 8N1 framing and no flow control.
pub fn open_serial(cfg: &ActuatorConfig) -> Result<Box<dyn Link>, JrkG2Error> {
    let port = serialport::new(cfg.device.as_str(), cfg.baud_or_dummy())
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(cfg.timeout())
        .open()?;
    debug!("[JrkG2] opened {} at {} baud", cfg.device, cfg.baud_or_dummy());
    Ok(Box::new(port))
}

/// Encode a 12-bit target into the two-byte "set target high resolution" frame.
pub fn set_target_frame(target: u16) -> [u8; 2] {
    [
        CMD_SET_TARGET_HIRES + (target & 0x1F) as u8,
        ((target >> 5) & 0x7F) as u8,
    ]
}

#[derive(Debug, Clone, Copy)]
pub struct JrkG2Settings {
    pub crc_enabled: bool,
    pub check_errflags_after_cmds: bool,
    pub stroke_mm: f64,
}

impl From<&ActuatorConfig> for JrkG2Settings {
    fn from(cfg: &ActuatorConfig) -> Self {
        Self {
            crc_enabled: cfg.crc_enabled,
            check_errflags_after_cmds: cfg.check_errflags_after_cmds,
            stroke_mm: cfg.stroke_mm,
        }
    }
}

pub struct JrkG2<L: Link + ?Sized> {
    settings: JrkG2Settings,
    link: Box<L>,
}

impl<L: Link + ?Sized> JrkG2<L> {
    pub fn new(link: Box<L>, settings: JrkG2Settings) -> Result<Self, JrkG2Error> {
        if !(settings.stroke_mm.is_finite() && settings.stroke_mm > 0.0) {
            return Err(JrkG2Error::InvalidArgument("stroke_mm"));
        }
        Ok(Self { settings, link })
    }

    pub fn stroke_mm(&self) -> f64 {
        self.settings.stroke_mm
    }

    /// Flush and release the link.
    pub fn close(mut self) -> Result<(), JrkG2Error> {
        self.link.flush()?;
        Ok(())
    }

    fn issue_cmd(
        &mut self,
        cmd: &[u8],
        resp_len: usize,
        check_errflags: bool,
    ) -> Result<Vec<u8>, JrkG2Error> {
        let mut frame = cmd.to_vec();
        if self.settings.crc_enabled {
            frame.push(crc7(cmd));
        }
        self.link.write_all(&frame)?;
        self.link.flush()?;

        let resp = self.recv(resp_len)?;

        if check_errflags && self.settings.check_errflags_after_cmds {
            let flags = self.get_and_clear_error_flags_occurred()?.reportable();
            if !flags.is_empty() {
                warn!(
                    "[JrkG2] error flags occurred after 0x{:02X}: {}",
                    cmd[0],
                    flags.descriptions().join(",")
                );
            }
        }
        Ok(resp)
    }

    fn recv(&mut self, expected: usize) -> Result<Vec<u8>, JrkG2Error> {
        let mut buf = vec![0u8; expected];
        let mut read = 0;
        while read < expected {
            match self.link.read(&mut buf[read..]) {
                Ok(0) => return Err(JrkG2Error::ReadTimeout { read, expected }),
                Ok(n) => read += n,
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    return Err(JrkG2Error::ReadTimeout { read, expected });
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf)
    }

    fn read_u16(&mut self, offset: u8) -> Result<u16, JrkG2Error> {
        let data = self.get_variables(offset, VAR_LEN_U16)?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    /// Raw bytes of the variable file starting at `offset`.
    pub fn get_variables(&mut self, offset: u8, len: u8) -> Result<Vec<u8>, JrkG2Error> {
        self.issue_cmd(&[CMD_GET_VARIABLES, offset, len], len as usize, true)
    }

    /// Raw target in [TARGET_MIN, TARGET_MAX].
    pub fn get_target(&mut self) -> Result<u16, JrkG2Error> {
        self.read_u16(VAR_TARGET)
    }

    pub fn set_target(&mut self, target: u16) -> Result<(), JrkG2Error> {
        if target > TARGET_MAX {
            return Err(JrkG2Error::InvalidArgument("target"));
        }
        self.issue_cmd(&set_target_frame(target), 0, true)?;
        Ok(())
    }

    pub fn get_feedback(&mut self) -> Result<u16, JrkG2Error> {
        self.read_u16(VAR_FEEDBACK)
    }

    /// Target mapped linearly onto [0, 1].
    pub fn get_target_norm(&mut self) -> Result<f64, JrkG2Error> {
        let target = self.get_target()?;
        Ok(f64::from(target - TARGET_MIN) / f64::from(TARGET_MAX - TARGET_MIN))
    }

    pub fn set_target_norm(&mut self, norm: f64) -> Result<(), JrkG2Error> {
        if !(0.0..=1.0).contains(&norm) {
            return Err(JrkG2Error::InvalidArgument("norm"));
        }
        let span = f64::from(TARGET_MAX - TARGET_MIN);
        let target = TARGET_MIN + (norm * span).round() as u16;
        self.set_target(target)
    }

    pub fn get_target_mm(&mut self) -> Result<f64, JrkG2Error> {
        Ok(self.get_target_norm()? * self.settings.stroke_mm)
    }

    /// Returns `Ok(false)` without touching the device when `mm` is outside
    /// [0, stroke_mm].
    pub fn set_target_mm(&mut self, mm: f64) -> Result<bool, JrkG2Error> {
        if !(0.0..=self.settings.stroke_mm).contains(&mm) {
            return Ok(false);
        }
        self.set_target_norm(mm / self.settings.stroke_mm)?;
        Ok(true)
    }

    pub fn stop_motor(&mut self) -> Result<(), JrkG2Error> {
        self.issue_cmd(&[CMD_STOP_MOTOR], 0, true)?;
        Ok(())
    }

    pub fn get_and_clear_error_flags_halting(&mut self) -> Result<ErrorFlags, JrkG2Error> {
        let data = self.issue_cmd(
            &[CMD_GET_AND_CLEAR_ERRORS_HALTING],
            VAR_LEN_U16 as usize,
            false,
        )?;
        Ok(ErrorFlags::from_register(u16::from_le_bytes([data[0], data[1]])))
    }

    pub fn get_and_clear_error_flags_occurred(&mut self) -> Result<ErrorFlags, JrkG2Error> {
        let data = self.issue_cmd(
            &[CMD_GET_AND_CLEAR_ERRORS_OCCURRED],
            VAR_LEN_U16 as usize,
            false,
        )?;
        Ok(ErrorFlags::from_register(u16::from_le_bytes([data[0], data[1]])))
    }
}
