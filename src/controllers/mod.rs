// Workers of the crack-following control plane.
// Each worker hosts one Controller on its own thread and talks to the others
// only through ipc endpoints. MainController orchestrates; the rest serve.

pub mod actuator;
pub mod detection;
pub mod joystick;
pub mod main_controller;
pub mod video;
pub mod worker;

use log::{error, info};

/// Contract every worker's controller implements.
///
/// `init` acquires devices and fails loudly; `start` runs the command loop
/// until TERMINATE; `deinit` releases devices and closes the channels the
/// controller writes to.
pub trait Controller {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Log prefix and thread name.
    const NAME: &'static str;

    fn init(&mut self) -> Result<(), Self::Error>;
    fn start(&mut self) -> Result<(), Self::Error>;
    fn deinit(&mut self) -> Result<(), Self::Error>;
}

/// Worker entry point: `init → start → deinit`.
///
/// `deinit` runs even when `start` fails. A failed `init` returns straight
/// away and fails the worker.
pub fn run_worker<C: Controller>(mut controller: C) -> Result<(), C::Error> {
    info!("[{}] initializing...", C::NAME);
    controller.init()?;

    info!("[{}] starting...", C::NAME);
    let started = controller.start();
    if let Err(e) = &started {
        error!("[{}] {}", C::NAME, e);
    }

    info!("[{}] deinitializing...", C::NAME);
    let deinit = controller.deinit();
    if let Err(e) = &deinit {
        error!("[{}] deinit failed: {}", C::NAME, e);
    }

    info!("[{}] exiting worker", C::NAME);
    started.and(deinit)
}
