//! Crack-following control plane.
//!
//! Five workers on their own threads (main, actuator, detection, joystick,
//! video) exchange typed commands, responses and events over bounded
//! channels. MainController runs the image → detection → actuator cycle and
//! drives a Pololu Jrk G2 linear actuator over its serial protocol.

pub mod app;
pub mod config;
pub mod controllers;
pub mod error;
pub mod ipc;
pub mod jrkg2;
pub mod utils;
