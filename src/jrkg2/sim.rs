//! Register-level Jrk G2 stand-in.
//!
//! Parses command frames written to it, keeps a 256-byte variable file and
//! queues the response bytes the real device would send. Clones share state,
//! so a test can keep a handle while the driver owns the link.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::Arc,
};

use parking_lot::Mutex;

use super::{
    crc7, ErrorFlags, CMD_GET_AND_CLEAR_ERRORS_HALTING, CMD_GET_AND_CLEAR_ERRORS_OCCURRED,
    CMD_GET_VARIABLES, CMD_SET_TARGET_HIRES, CMD_STOP_MOTOR, TARGET_MAX, VAR_ERRORS_HALTING,
    VAR_ERRORS_OCCURRED, VAR_FEEDBACK, VAR_TARGET,
};

pub const FRAME_LOG_CAPACITY: usize = 1024;

struct SimState {
    crc_enabled: bool,
    unresponsive: bool,
    vars: [u8; 256],
    halting: ErrorFlags,
    occurred: ErrorFlags,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    frames: VecDeque<Vec<u8>>,
}

impl SimState {
    fn write_u16(&mut self, offset: u8, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.vars[offset as usize] = lo;
        self.vars[offset as usize + 1] = hi;
    }

    fn read_u16(&self, offset: u8) -> u16 {
        u16::from_le_bytes([self.vars[offset as usize], self.vars[offset as usize + 1]])
    }

    fn sync_flag_vars(&mut self) {
        self.write_u16(VAR_ERRORS_HALTING, self.halting.bits());
        self.write_u16(VAR_ERRORS_OCCURRED, self.occurred.bits());
    }

    fn raise(&mut self, flags: ErrorFlags) {
        self.halting |= flags;
        self.occurred |= flags;
        self.sync_flag_vars();
    }

    fn respond(&mut self, bytes: &[u8]) {
        if !self.unresponsive {
            self.tx.extend(bytes);
        }
    }

    /// Consume every complete frame sitting in the receive buffer.
    fn process_rx(&mut self) {
        loop {
            let Some(&cmd) = self.rx.first() else {
                return;
            };
            let Some(payload_len) = payload_len(cmd) else {
                self.rx.remove(0);
                self.raise(ErrorFlags::SERIAL_PROTOCOL_ERROR);
                continue;
            };
            let frame_len = payload_len + usize::from(self.crc_enabled);
            if self.rx.len() < frame_len {
                return;
            }
            let frame: Vec<u8> = self.rx.drain(..frame_len).collect();
            if self.frames.len() == FRAME_LOG_CAPACITY {
                self.frames.pop_front();
            }
            self.frames.push_back(frame.clone());

            if self.crc_enabled && crc7(&frame) != 0 {
                self.raise(ErrorFlags::SERIAL_CRC_ERROR);
                continue;
            }
            self.execute(&frame[..payload_len]);
        }
    }

    fn execute(&mut self, cmd: &[u8]) {
        match cmd[0] {
            CMD_GET_AND_CLEAR_ERRORS_HALTING => {
                let bits = self.halting.bits().to_le_bytes();
                self.respond(&bits);
                self.halting &= ErrorFlags::AWAITING_COMMAND;
                self.sync_flag_vars();
            }
            CMD_GET_AND_CLEAR_ERRORS_OCCURRED => {
                let bits = self.occurred.bits().to_le_bytes();
                self.respond(&bits);
                self.occurred = ErrorFlags::empty();
                self.sync_flag_vars();
            }
            CMD_GET_VARIABLES => {
                let (offset, len) = (cmd[1] as usize, cmd[2] as usize);
                let bytes: Vec<u8> = (offset..offset + len)
                    .map(|i| self.vars.get(i).copied().unwrap_or(0))
                    .collect();
                self.respond(&bytes);
            }
            CMD_STOP_MOTOR => {
                self.halting |= ErrorFlags::AWAITING_COMMAND;
                self.sync_flag_vars();
            }
            byte0 => {
                let target = u16::from(byte0 & 0x1F) | (u16::from(cmd[1] & 0x7F) << 5);
                self.write_u16(VAR_TARGET, target.min(TARGET_MAX));
                // Ideal plant: feedback tracks the target immediately.
                self.write_u16(VAR_FEEDBACK, target.min(TARGET_MAX));
                self.halting -= ErrorFlags::AWAITING_COMMAND;
                self.sync_flag_vars();
            }
        }
    }
}

/// Command byte plus payload length, or `None` for an unknown command.
fn payload_len(cmd: u8) -> Option<usize> {
    match cmd {
        CMD_GET_AND_CLEAR_ERRORS_HALTING | CMD_GET_AND_CLEAR_ERRORS_OCCURRED | CMD_STOP_MOTOR => {
            Some(1)
        }
        CMD_GET_VARIABLES => Some(3),
        c if (CMD_SET_TARGET_HIRES..=CMD_SET_TARGET_HIRES + 0x1F).contains(&c) => Some(2),
        _ => None,
    }
}

#[derive(Clone)]
pub struct SimJrkG2 {
    state: Arc<Mutex<SimState>>,
}

impl SimJrkG2 {
    /// Fresh device: target 0, halted awaiting its first command.
    pub fn new(crc_enabled: bool) -> Self {
        let mut state = SimState {
            crc_enabled,
            unresponsive: false,
            vars: [0; 256],
            halting: ErrorFlags::AWAITING_COMMAND,
            occurred: ErrorFlags::AWAITING_COMMAND,
            rx: Vec::new(),
            tx: VecDeque::new(),
            frames: VecDeque::new(),
        };
        state.sync_flag_vars();
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn target(&self) -> u16 {
        self.state.lock().read_u16(VAR_TARGET)
    }

    pub fn occurred(&self) -> ErrorFlags {
        self.state.lock().occurred
    }

    /// Frames received so far, oldest first, checksum byte included.
    /// Only the most recent `FRAME_LOG_CAPACITY` are kept.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().frames.iter().cloned().collect()
    }

    pub fn inject_errors(&self, flags: ErrorFlags) {
        self.state.lock().raise(flags);
    }

    /// Stop answering, as if the cable had been pulled.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.state.lock().unresponsive = unresponsive;
    }
}

impl Read for SimJrkG2 {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.tx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no response"));
        }
        let n = buf.len().min(state.tx.len());
        for (slot, byte) in buf.iter_mut().zip(state.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimJrkG2 {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.rx.extend_from_slice(buf);
        state.process_rx();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
