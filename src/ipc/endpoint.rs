//! Endpoint roles built on bounded crossbeam channels.
//!
//! - `MasterEndpoint`: issues commands, correlates responses by op id.
//! - `SlaveEndpoint`: serves commands, answers with the caller's op id.
//! - `EventProducer` / `EventConsumer`: one-way, best-effort notifications.
//!
//! Every outbound channel is FIFO. A master may see responses for several of
//! its ids interleaved; anything that is not the id being waited for goes to
//! the response cache and is handed out exactly once when claimed.

use std::{
    collections::BTreeMap,
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError,
};
use log::{debug, warn};

use crate::config::IpcConfig;
use crate::error::IpcError;
use crate::ipc::messages::{OpId, OpObj};

/// Unclaimed responses kept per master before the oldest is evicted.
pub const RESP_CACHE_CAPACITY: usize = 64;

/// An operation tagged with its sender-scoped id.
#[derive(Debug)]
pub struct Envelope<T> {
    pub op_id: OpId,
    pub op: T,
}

/// Timing knobs copied out of `IpcConfig` into every endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EndpointTiming {
    pub send_timeout: Duration,
    pub sync_warn: Duration,
    pub shutdown_delay: Duration,
}

impl From<&IpcConfig> for EndpointTiming {
    fn from(cfg: &IpcConfig) -> Self {
        Self {
            send_timeout: cfg.queue_timeout(),
            sync_warn: cfg.cmd_sync_warn(),
            shutdown_delay: cfg.shutdown_delay(),
        }
    }
}

/// Create a command/response channel pair for one worker.
pub fn command_channel<C: OpObj, R: OpObj>(
    name: &'static str,
    cfg: &IpcConfig,
) -> (MasterEndpoint<C, R>, SlaveEndpoint<C, R>) {
    let timing = EndpointTiming::from(cfg);
    let (cmd_tx, cmd_rx) = bounded(cfg.cmd_queue_capacity);
    let (resp_tx, resp_rx) = bounded(cfg.resp_queue_capacity);

    let master = MasterEndpoint {
        name,
        tx: Some(cmd_tx),
        tx_drain: cmd_rx.clone(),
        rx: resp_rx.clone(),
        resp_cache: BTreeMap::new(),
        next_op_id: 0,
        timing,
    };
    let slave = SlaveEndpoint {
        name,
        tx: Some(resp_tx),
        tx_drain: resp_rx,
        rx: cmd_rx,
        timing,
    };
    (master, slave)
}

/// Create a best-effort event channel.
pub fn event_channel<E: OpObj>(cfg: &IpcConfig) -> (EventProducer<E>, EventConsumer<E>) {
    let timing = EndpointTiming::from(cfg);
    let (tx, rx) = bounded(cfg.event_queue_capacity);
    let producer = EventProducer {
        tx: Some(tx),
        tx_drain: rx.clone(),
        next_op_id: 0,
        timing,
    };
    (producer, EventConsumer { rx })
}

/// Drain and close an outbound channel after the grace delay.
///
/// Whatever the reader has not picked up by then is discarded, so no writer
/// can stay blocked on a full queue during teardown.
fn shutdown_channel<T>(tx: Option<Sender<T>>, drain: &Receiver<T>, grace: Duration) {
    let Some(tx) = tx else {
        return;
    };
    thread::sleep(grace);
    let mut dropped = 0usize;
    while drain.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!("[Endpoint] discarded {} unread messages at shutdown", dropped);
    }
    drop(tx);
}

fn send_bounded<T>(tx: &Option<Sender<T>>, item: T, timeout: Duration) -> Result<(), IpcError> {
    let tx = tx.as_ref().ok_or(IpcError::Disconnected)?;
    tx.send_timeout(item, timeout).map_err(|e| match e {
        SendTimeoutError::Timeout(_) => IpcError::SendTimeout(timeout),
        SendTimeoutError::Disconnected(_) => IpcError::Disconnected,
    })
}

// ============================================================================
// Command issuer
// ============================================================================

pub struct MasterEndpoint<C, R> {
    name: &'static str,
    tx: Option<Sender<Envelope<C>>>,
    tx_drain: Receiver<Envelope<C>>,
    rx: Receiver<Envelope<R>>,
    resp_cache: BTreeMap<OpId, R>,
    next_op_id: OpId,
    timing: EndpointTiming,
}

impl<C: OpObj, R: OpObj> MasterEndpoint<C, R> {
    /// Worker name this endpoint talks to, for logging.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn reserve_op_id(&mut self) -> OpId {
        let op_id = self.next_op_id;
        self.next_op_id += 1;
        op_id
    }

    /// Queue a command and return its op id without waiting for the answer.
    ///
    /// Waits at most the configured queue timeout for space; a command is
    /// never dropped silently, a full queue comes back as an error.
    pub fn send_cmd_async(&mut self, cmd: C) -> Result<OpId, IpcError> {
        let op_id = self.reserve_op_id();
        send_bounded(&self.tx, Envelope { op_id, op: cmd }, self.timing.send_timeout)?;
        Ok(op_id)
    }

    /// Send a command and block until its response arrives or `timeout`
    /// elapses. `Ok(None)` means the timeout elapsed.
    pub fn send_cmd_sync(&mut self, cmd: C, timeout: Duration) -> Result<Option<R>, IpcError> {
        let started = Instant::now();
        let token = cmd.token();
        let op_id = self.send_cmd_async(cmd)?;
        let resp = self.wait_for_resp(op_id, started + timeout)?;

        let took = started.elapsed();
        if resp.is_some() && took > self.timing.sync_warn {
            warn!(
                "[Endpoint] send_cmd_sync response to {}.{} took {} ms",
                self.name,
                token,
                took.as_millis()
            );
        }
        Ok(resp)
    }

    /// Non-blocking: the response for `op_id` if cached or already queued.
    pub fn check_for_resp(&mut self, op_id: OpId) -> Option<R> {
        if let Some(resp) = self.resp_cache.remove(&op_id) {
            return Some(resp);
        }
        loop {
            match self.rx.try_recv() {
                Ok(env) if env.op_id == op_id => return Some(env.op),
                Ok(env) => self.cache(env),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    debug!("[Endpoint] {} response channel disconnected", self.name);
                    return None;
                }
            }
        }
    }

    fn wait_for_resp(&mut self, op_id: OpId, deadline: Instant) -> Result<Option<R>, IpcError> {
        if let Some(resp) = self.resp_cache.remove(&op_id) {
            return Ok(Some(resp));
        }
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(env) if env.op_id == op_id => return Ok(Some(env.op)),
                Ok(env) => self.cache(env),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(IpcError::Disconnected),
            }
        }
    }

    fn cache(&mut self, env: Envelope<R>) {
        if self.resp_cache.len() >= RESP_CACHE_CAPACITY {
            if let Some((stale_id, stale)) = self.resp_cache.pop_first() {
                warn!(
                    "[Endpoint] {} response cache full; evicting {} for op {}",
                    self.name,
                    stale.token(),
                    stale_id
                );
            }
        }
        self.resp_cache.insert(env.op_id, env.op);
    }

    /// Number of responses received but not yet claimed.
    pub fn cached_responses(&self) -> usize {
        self.resp_cache.len()
    }

    pub fn shutdown(&mut self) {
        shutdown_channel(self.tx.take(), &self.tx_drain, self.timing.shutdown_delay);
    }
}

// ============================================================================
// Command server
// ============================================================================

pub struct SlaveEndpoint<C, R> {
    name: &'static str,
    tx: Option<Sender<Envelope<R>>>,
    tx_drain: Receiver<Envelope<R>>,
    rx: Receiver<Envelope<C>>,
    timing: EndpointTiming,
}

impl<C: OpObj, R: OpObj> SlaveEndpoint<C, R> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Next inbound command. With `block == false`, `Ok(None)` means the
    /// queue was empty.
    pub fn get_cmd(&self, block: bool) -> Result<Option<(OpId, C)>, IpcError> {
        if block {
            return self
                .rx
                .recv()
                .map(|env| Some((env.op_id, env.op)))
                .map_err(|_| IpcError::Disconnected);
        }
        match self.rx.try_recv() {
            Ok(env) => Ok(Some((env.op_id, env.op))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(IpcError::Disconnected),
        }
    }

    /// Answer the command identified by `op_id`.
    pub fn send_resp(&self, op_id: OpId, resp: R) -> Result<(), IpcError> {
        send_bounded(&self.tx, Envelope { op_id, op: resp }, self.timing.send_timeout)
    }

    pub fn shutdown(&mut self) {
        shutdown_channel(self.tx.take(), &self.tx_drain, self.timing.shutdown_delay);
    }
}

// ============================================================================
// Best-effort events
// ============================================================================

pub struct EventProducer<E> {
    tx: Option<Sender<Envelope<E>>>,
    tx_drain: Receiver<Envelope<E>>,
    next_op_id: OpId,
    timing: EndpointTiming,
}

impl<E: OpObj> EventProducer<E> {
    /// Try to enqueue within the queue timeout. Returns `false` if the event
    /// was dropped; losing events under backpressure is acceptable.
    pub fn send_event(&mut self, event: E) -> bool {
        let op_id = self.next_op_id;
        self.next_op_id += 1;
        match send_bounded(&self.tx, Envelope { op_id, op: event }, self.timing.send_timeout) {
            Ok(()) => true,
            Err(e) => {
                debug!("[EventProducer] event {} dropped: {}", op_id, e);
                false
            }
        }
    }

    pub fn shutdown(&mut self) {
        shutdown_channel(self.tx.take(), &self.tx_drain, self.timing.shutdown_delay);
    }
}

pub struct EventConsumer<E> {
    rx: Receiver<Envelope<E>>,
}

impl<E: OpObj> EventConsumer<E> {
    /// Never blocks; `None` when no event is waiting.
    pub fn check_for_event(&self) -> Option<E> {
        self.rx.try_recv().ok().map(|env| env.op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::messages::{ActuatorCmd, ActuatorResp, JoystickEvent};

    fn fast_ipc() -> IpcConfig {
        IpcConfig {
            cmd_queue_capacity: 4,
            resp_queue_capacity: 4,
            event_queue_capacity: 2,
            queue_timeout_ms: 5,
            cmd_sync_timeout_ms: 200,
            cmd_sync_warn_ms: 1_000,
            shutdown_delay_ms: 0,
        }
    }

    #[test]
    fn op_ids_increase_per_master() {
        let cfg = fast_ipc();
        let (mut master, slave) = command_channel::<ActuatorCmd, ActuatorResp>("actuator", &cfg);
        let a = master.send_cmd_async(ActuatorCmd::IsReady).unwrap();
        let b = master.send_cmd_async(ActuatorCmd::StopMotor).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(slave.get_cmd(false).unwrap(), Some((0, ActuatorCmd::IsReady)));
        assert_eq!(slave.get_cmd(false).unwrap(), Some((1, ActuatorCmd::StopMotor)));
        assert_eq!(slave.get_cmd(false).unwrap(), None);
    }

    #[test]
    fn out_of_order_responses_are_cached_and_claimed_once() {
        let cfg = fast_ipc();
        let (mut master, slave) = command_channel::<ActuatorCmd, ActuatorResp>("actuator", &cfg);
        let first = master.send_cmd_async(ActuatorCmd::GetTargetMm).unwrap();
        let second = master.send_cmd_async(ActuatorCmd::IsReady).unwrap();

        slave.send_resp(second, ActuatorResp::True).unwrap();
        slave.send_resp(first, ActuatorResp::TargetValue(12.5)).unwrap();

        assert_eq!(master.check_for_resp(first), Some(ActuatorResp::TargetValue(12.5)));
        assert_eq!(master.cached_responses(), 1);
        assert_eq!(master.check_for_resp(second), Some(ActuatorResp::True));
        assert_eq!(master.cached_responses(), 0);
        assert_eq!(master.check_for_resp(second), None);
    }

    #[test]
    fn check_for_resp_is_none_when_nothing_arrived() {
        let cfg = fast_ipc();
        let (mut master, _slave) = command_channel::<ActuatorCmd, ActuatorResp>("actuator", &cfg);
        let id = master.send_cmd_async(ActuatorCmd::IsReady).unwrap();
        assert_eq!(master.check_for_resp(id), None);
    }

    #[test]
    fn sync_send_times_out_without_responder() {
        let cfg = fast_ipc();
        let (mut master, _slave) = command_channel::<ActuatorCmd, ActuatorResp>("actuator", &cfg);
        let started = Instant::now();
        let resp = master
            .send_cmd_sync(ActuatorCmd::IsReady, Duration::from_millis(30))
            .unwrap();
        assert_eq!(resp, None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn late_answer_after_sync_timeout_is_cached() {
        let cfg = fast_ipc();
        let (mut master, slave) = command_channel::<ActuatorCmd, ActuatorResp>("actuator", &cfg);
        let responder = thread::spawn(move || {
            let (op_id, _) = slave.get_cmd(true).unwrap().unwrap();
            thread::sleep(Duration::from_millis(60));
            slave.send_resp(op_id, ActuatorResp::True).unwrap();
        });

        let resp = master
            .send_cmd_sync(ActuatorCmd::IsReady, Duration::from_millis(15))
            .unwrap();
        assert_eq!(resp, None);

        responder.join().unwrap();
        assert_eq!(master.check_for_resp(0), Some(ActuatorResp::True));
        assert_eq!(master.check_for_resp(0), None);
    }

    #[test]
    fn response_cache_evicts_oldest_when_full() {
        let cfg = fast_ipc();
        let (mut master, slave) = command_channel::<ActuatorCmd, ActuatorResp>("actuator", &cfg);
        let answered = RESP_CACHE_CAPACITY as OpId + 6;
        let unclaimed = answered + 100;

        for op_id in 0..answered {
            slave.send_resp(op_id, ActuatorResp::TargetValue(op_id as f64)).unwrap();
            assert_eq!(master.check_for_resp(unclaimed), None);
        }
        assert_eq!(master.cached_responses(), RESP_CACHE_CAPACITY);

        assert_eq!(master.check_for_resp(0), None);
        assert_eq!(master.check_for_resp(5), None);
        let newest = answered - 1;
        assert_eq!(
            master.check_for_resp(newest),
            Some(ActuatorResp::TargetValue(newest as f64))
        );
        assert_eq!(master.check_for_resp(newest), None);
        assert_eq!(master.cached_responses(), RESP_CACHE_CAPACITY - 1);
    }

    #[test]
    fn sync_send_is_satisfied_from_cache() {
        let cfg = fast_ipc();
        let (mut master, slave) = command_channel::<ActuatorCmd, ActuatorResp>("actuator", &cfg);
        let stale = master.send_cmd_async(ActuatorCmd::IsReady).unwrap();
        slave.send_resp(stale, ActuatorResp::False).unwrap();

        // The reply to the sync command is pre-loaded behind the stale one.
        slave.send_resp(stale + 1, ActuatorResp::Ok).unwrap();
        let resp = master
            .send_cmd_sync(ActuatorCmd::StopMotor, Duration::from_millis(50))
            .unwrap();
        assert_eq!(resp, Some(ActuatorResp::Ok));
        assert_eq!(master.check_for_resp(stale), Some(ActuatorResp::False));
    }

    #[test]
    fn full_command_queue_reports_timeout() {
        let cfg = fast_ipc();
        let (mut master, _slave) = command_channel::<ActuatorCmd, ActuatorResp>("actuator", &cfg);
        for _ in 0..cfg.cmd_queue_capacity {
            master.send_cmd_async(ActuatorCmd::IsReady).unwrap();
        }
        assert!(matches!(
            master.send_cmd_async(ActuatorCmd::IsReady),
            Err(IpcError::SendTimeout(_))
        ));
    }

    #[test]
    fn events_drop_under_backpressure() {
        let cfg = fast_ipc();
        let (mut producer, consumer) = event_channel::<JoystickEvent>(&cfg);
        assert!(producer.send_event(JoystickEvent::ButtonDown));
        assert!(producer.send_event(JoystickEvent::Position(0.5)));
        assert!(!producer.send_event(JoystickEvent::Position(0.9)));

        assert_eq!(consumer.check_for_event(), Some(JoystickEvent::ButtonDown));
        assert_eq!(consumer.check_for_event(), Some(JoystickEvent::Position(0.5)));
        assert_eq!(consumer.check_for_event(), None);
    }

    #[test]
    fn shutdown_drains_and_disconnects() {
        let cfg = fast_ipc();
        let (mut master, slave) = command_channel::<ActuatorCmd, ActuatorResp>("actuator", &cfg);
        master.send_cmd_async(ActuatorCmd::IsReady).unwrap();
        master.shutdown();
        assert_eq!(slave.get_cmd(false), Err(IpcError::Disconnected));
        assert_eq!(
            master.send_cmd_async(ActuatorCmd::IsReady),
            Err(IpcError::Disconnected)
        );
    }
}
