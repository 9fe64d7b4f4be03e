//! Error types, one enum per failure domain.
//!
//! Contract violations and device faults propagate as `Err`; expected
//! operational outcomes (no frame yet, no offset, out-of-range target) are
//! plain values and never show up here.

use std::time::Duration;

use thiserror::Error;

/// Channel-level failures seen by an endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// The peer endpoint was dropped.
    #[error("channel disconnected")]
    Disconnected,

    /// A bounded send did not land before its deadline.
    #[error("channel full: send timed out after {0:?}")]
    SendTimeout(Duration),
}

/// Failures talking to the JrkG2 motor controller.
#[derive(Error, Debug)]
pub enum JrkG2Error {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes arrived than the command's response length.
    #[error("read timed out: {read} bytes read, {expected} expected")]
    ReadTimeout { read: usize, expected: usize },

    /// Caller passed a value outside the operation's domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("JrkG2 error: {0}")]
    JrkG2(#[from] JrkG2Error),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("actuator not initialized")]
    NotInitialized,
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("detector failure: {0}")]
    Detector(String),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),
}

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("camera failure: {0}")]
    Camera(String),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),
}

#[derive(Error, Debug)]
pub enum JoystickError {
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),
}

/// MainController and supervisor failures.
#[derive(Error, Debug)]
pub enum CcError {
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// A peer answered with a token that is not valid at this point.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A synchronous call got no answer within its timeout.
    #[error("no response from {worker} to {command}")]
    NoResponse {
        worker: &'static str,
        command: &'static str,
    },

    /// MainController answered ERROR.
    #[error("{command} rejected")]
    Rejected { command: &'static str },

    #[error("workers not ready after {0:?}")]
    NotReady(Duration),

    #[error("failed to spawn worker {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),
}
