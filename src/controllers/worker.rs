//! worker.rs
//! Named worker threads: spawn, liveness, join with an exit status.
//! - Optional ThreadPriority::Max for the real-time configuration
//! - Exit status follows process conventions: 0 ok, 1 error, 101 panic

use std::{
    fmt,
    thread::{self, JoinHandle},
};

use log::{error, info, warn};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::error::CcError;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_PANIC: i32 = 101;

pub struct Worker {
    name: String,
    handle: Option<JoinHandle<Result<(), String>>>,
}

impl Worker {
    /// Launch `entry` on a thread named `name`.
    pub fn spawn<F, E>(name: &str, realtime: bool, entry: F) -> Result<Self, CcError>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: fmt::Display,
    {
        let body = move || entry().map_err(|e| e.to_string());
        let builder = thread::Builder::new().name(name.to_string());
        let thread_name = name.to_string();

        let spawned = if realtime {
            builder.spawn_with_priority(ThreadPriority::Max, move |prio| {
                if let Err(e) = prio {
                    warn!("[Worker] {}: could not raise priority: {:?}", thread_name, e);
                }
                body()
            })
        } else {
            builder.spawn(body)
        };
        let handle = spawned.map_err(|source| CcError::Spawn {
            name: name.to_string(),
            source,
        })?;

        info!("[Worker] {} started", name);
        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True until the worker's entry function returns or panics.
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wait for the worker to exit. `None` if it was already joined.
    pub fn join(&mut self) -> Option<i32> {
        let handle = self.handle.take()?;
        info!("[Worker] {} shutting down...", self.name);
        let code = match handle.join() {
            Ok(Ok(())) => EXIT_OK,
            Ok(Err(e)) => {
                error!("[Worker] {} failed: {}", self.name, e);
                EXIT_FAILURE
            }
            Err(_) => {
                error!("[Worker] {} panicked", self.name);
                EXIT_PANIC
            }
        };
        info!("[Worker] {} shut down (exit {})", self.name, code);
        Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_outcome() {
        let mut ok = Worker::spawn("ok", false, || Ok::<(), String>(())).unwrap();
        let mut failed = Worker::spawn("failed", false, || Err::<(), _>("boom")).unwrap();
        let mut panicked =
            Worker::spawn("panicked", false, || -> Result<(), String> { panic!("bad") }).unwrap();

        assert_eq!(ok.join(), Some(EXIT_OK));
        assert_eq!(failed.join(), Some(EXIT_FAILURE));
        assert_eq!(panicked.join(), Some(EXIT_PANIC));
        assert_eq!(ok.join(), None);
    }

    #[test]
    fn liveness_tracks_thread() {
        let (tx, rx) = crossbeam::channel::bounded::<()>(1);
        let mut worker = Worker::spawn("sleeper", false, move || {
            rx.recv().map_err(|e| e.to_string())
        })
        .unwrap();
        assert!(worker.is_alive());
        tx.send(()).unwrap();
        assert_eq!(worker.join(), Some(EXIT_OK));
        assert!(!worker.is_alive());
    }
}
