use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use ddos_mitigation_service::core::engine::ProtectionEngine;
use ddos_mitigation_service::core::event::{Event, Protocol};
use ddos_mitigation_service::core::simulator::{AttackProfile, AttackSimulator};
use ddos_mitigation_service::core::DetectionConfig;

fn quiet_traffic(count: usize) -> Vec<Event> {
    let base = Utc::now();
    (0..count)
        .map(|i| {
            let source = format!("10.0.{}.{}", (i / 250) % 250, i % 250 + 1).parse().unwrap();
            Event::new(source, Protocol::Http, 400 + (i % 20) as u64 * 10, base + Duration::milliseconds(i as i64 * 20))
        })
        .collect()
}

fn engine_benchmark(c: &mut Criterion) {
    c.bench_function("evaluate_quiet_traffic", |b| {
        b.iter_batched(
            || (ProtectionEngine::new(DetectionConfig::default()).unwrap(), quiet_traffic(1000)),
            |(engine, events)| {
                for event in events {
                    black_box(engine.evaluate(event));
                }
            },
            BatchSize::LargeInput,
        )
    });

    c.bench_function("evaluate_syn_flood", |b| {
        b.iter_batched(
            || {
                let mut simulator = AttackSimulator::seeded(42, "10.10.0.1".parse().unwrap());
                let wave = simulator.wave(AttackProfile::SynFlood, 1000, Utc::now(), Duration::milliseconds(1));
                (ProtectionEngine::new(DetectionConfig::default()).unwrap(), wave)
            },
            |(engine, events)| {
                for event in events {
                    black_box(engine.evaluate(event));
                }
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, engine_benchmark);
criterion_main!(benches);
