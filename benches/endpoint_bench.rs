/*
This benchmark measures command/response round trips through the bounded
crossbeam channels behind the IPC endpoints: an async send answered in order,
an answer served from the out-of-order cache, and best-effort event delivery.
*/

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use crack_clean::config::IpcConfig;
use crack_clean::ipc::{command_channel, event_channel};
use crack_clean::ipc::messages::{ActuatorCmd, ActuatorResp, JoystickEvent};

fn bench_round_trip(c: &mut Criterion) {
    let cfg = IpcConfig::default();
    let (mut master, slave) = command_channel::<ActuatorCmd, ActuatorResp>("bench", &cfg);

    c.bench_function("endpoint_round_trip", |b| {
        b.iter(|| {
            let op_id = master.send_cmd_async(ActuatorCmd::IsReady).ok();
            if let Ok(Some((id, _))) = slave.get_cmd(false) {
                let _ = slave.send_resp(id, ActuatorResp::True);
            }
            black_box(op_id.and_then(|id| master.check_for_resp(id)))
        })
    });
}

fn bench_cached_response(c: &mut Criterion) {
    let cfg = IpcConfig::default();
    let (mut master, slave) = command_channel::<ActuatorCmd, ActuatorResp>("bench", &cfg);

    // Two requests answered together, collected newest first
    c.bench_function("endpoint_out_of_order", |b| {
        b.iter(|| {
            let first = master.send_cmd_async(ActuatorCmd::GetTargetMm).ok();
            let second = master.send_cmd_async(ActuatorCmd::GetTargetMm).ok();
            while let Ok(Some((id, _))) = slave.get_cmd(false) {
                let _ = slave.send_resp(id, ActuatorResp::TargetValue(12.5));
            }
            let newest = second.and_then(|id| master.check_for_resp(id));
            let oldest = first.and_then(|id| master.check_for_resp(id));
            black_box((newest, oldest))
        })
    });
}

fn bench_events(c: &mut Criterion) {
    let cfg = IpcConfig::default();
    let (mut producer, consumer) = event_channel::<JoystickEvent>(&cfg);

    c.bench_function("event_send_check", |b| {
        b.iter(|| {
            producer.send_event(JoystickEvent::Position(black_box(0.5)));
            black_box(consumer.check_for_event())
        })
    });
}

criterion_group!(benches, bench_round_trip, bench_cached_response, bench_events);
criterion_main!(benches);
