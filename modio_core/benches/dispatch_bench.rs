//! Event dispatch benchmark: change detection and firing for one cycle
//! over a configuration with many bit points.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::io::Cursor;

use modio_common::config::ModIoSettings;
use modio_common::pictory::PictoryConfig;
use modio_core::dispatch::EventDispatcher;
use modio_core::{EventOptions, ModIo};

/// One device with `bytes` output bytes of eight bit points each.
fn config(bytes: usize) -> String {
    let entries: Vec<String> = (0..bytes * 8)
        .map(|n| format!(r#""{n}": ["O_{n}", "0", "1", "{}", true, "{n}", "", "{}"]"#, n / 8, n % 8))
        .collect();
    format!(
        r#"{{"Devices": [{{"type": "BASE", "name": "core", "position": 0, "offset": 0, "out": {{ {} }} }}]}}"#,
        entries.join(", ")
    )
}

fn setup(bytes: usize) -> ModIo {
    let config = PictoryConfig::from_json(&config(bytes)).expect("config");
    let modio = ModIo::from_config(
        ModIoSettings::default(),
        config,
        Box::new(Cursor::new(vec![0u8; bytes])),
        None,
    )
    .expect("modio");
    for n in 0..bytes * 8 {
        modio
            .reg_event(&format!("O_{n}"), |_, value| {
                black_box(value);
            }, EventOptions::default())
            .expect("register");
    }
    modio
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_cycle");

    for &bytes in &[1usize, 8, 64] {
        let modio = setup(bytes);
        let mut dispatcher = EventDispatcher::new();
        dispatcher.capture_baseline(modio.devices());
        let mut state = false;

        group.bench_with_input(BenchmarkId::new("toggle_all", bytes * 8), &bytes, |b, &_n| {
            b.iter(|| {
                state = !state;
                for n in 0..bytes * 8 {
                    modio.set_value(&format!("O_{n}"), state).expect("set");
                }
                dispatcher.process_cycle(modio.devices(), modio.cycle_time());
            });
        });

        group.bench_with_input(BenchmarkId::new("steady", bytes * 8), &bytes, |b, &_n| {
            b.iter(|| dispatcher.process_cycle(modio.devices(), modio.cycle_time()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
