//! Jrk G2 error flag register decoding.

use bitflags::bitflags;

bitflags! {
    /// 16-bit "error flags halting" / "error flags occurred" register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ErrorFlags: u16 {
        const AWAITING_COMMAND      = 1 << 0;
        const NO_POWER              = 1 << 1;
        const MOTOR_DRIVER_ERROR    = 1 << 2;
        const INPUT_INVALID         = 1 << 3;
        const INPUT_DISCONNECT      = 1 << 4;
        const FEEDBACK_DISCONNECT   = 1 << 5;
        const SOFT_OVERCURRENT      = 1 << 6;
        const SERIAL_SIGNAL_ERROR   = 1 << 7;
        const SERIAL_OVERRUN        = 1 << 8;
        const SERIAL_RX_BUFFER_FULL = 1 << 9;
        const SERIAL_CRC_ERROR      = 1 << 10;
        const SERIAL_PROTOCOL_ERROR = 1 << 11;
        const SERIAL_TIMEOUT_ERROR  = 1 << 12;
        const HARD_OVERCURRENT      = 1 << 13;
    }
}

const DESCRIPTIONS: [(ErrorFlags, &str); 14] = [
    (ErrorFlags::AWAITING_COMMAND, "awaiting command"),
    (ErrorFlags::NO_POWER, "no power"),
    (ErrorFlags::MOTOR_DRIVER_ERROR, "motor driver error"),
    (ErrorFlags::INPUT_INVALID, "input invalid"),
    (ErrorFlags::INPUT_DISCONNECT, "input disconnect"),
    (ErrorFlags::FEEDBACK_DISCONNECT, "feedback disconnect"),
    (ErrorFlags::SOFT_OVERCURRENT, "soft overcurrent"),
    (ErrorFlags::SERIAL_SIGNAL_ERROR, "serial signal error"),
    (ErrorFlags::SERIAL_OVERRUN, "serial overrun"),
    (ErrorFlags::SERIAL_RX_BUFFER_FULL, "serial RX buffer full"),
    (ErrorFlags::SERIAL_CRC_ERROR, "serial CRC error"),
    (ErrorFlags::SERIAL_PROTOCOL_ERROR, "serial protocol error"),
    (ErrorFlags::SERIAL_TIMEOUT_ERROR, "serial timeout error"),
    (ErrorFlags::HARD_OVERCURRENT, "hard overcurrent"),
];

impl ErrorFlags {
    /// Decode a raw register value; bits 14 and 15 are reserved and dropped.
    pub fn from_register(raw: u16) -> Self {
        Self::from_bits_truncate(raw)
    }

    /// Human readable name for a single flag.
    pub fn describe(flag: ErrorFlags) -> &'static str {
        DESCRIPTIONS
            .iter()
            .find(|(f, _)| *f == flag)
            .map_or("unknown", |(_, desc)| *desc)
    }

    /// Descriptions of every set flag, lowest bit first.
    pub fn descriptions(self) -> Vec<&'static str> {
        self.iter().map(Self::describe).collect()
    }

    /// Flags worth reporting after a command; AWAITING_COMMAND is expected
    /// on an idle link.
    pub fn reportable(self) -> Self {
        self - ErrorFlags::AWAITING_COMMAND
    }
}
