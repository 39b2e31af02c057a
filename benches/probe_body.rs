//! Probe body rendering benchmark
//!
//! Bodies are rendered on submission inside the in-flight window, so
//! rendering sits on the measurement path of every round. The template is
//! serialized once per run and is benchmarked separately.
//!
//! ```bash
//! cargo bench --bench probe_body
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hashprobe::oracle::{key_at, KeySet};
use hashprobe::probe::{BodyLayout, BodyTemplate};

fn bench_render(c: &mut Criterion) {
    let spoof = KeySet::new(1, (100..1636).map(key_at).collect());
    let targets = KeySet::new(1, (0..17).map(key_at).collect());
    let layout = BodyLayout::default();

    let mut group = c.benchmark_group("render");
    for amplification in [20usize, 1024, 32768] {
        let Ok(template) = BodyTemplate::new(&spoof, &targets, amplification, &layout) else {
            continue;
        };
        group.throughput(Throughput::Bytes(template.render("p000").len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(amplification),
            &template,
            |b, template| b.iter(|| template.render(black_box("p000"))),
        );
    }
    group.finish();
}

fn bench_template(c: &mut Criterion) {
    let spoof = KeySet::new(1, (100..1636).map(key_at).collect());
    let targets = KeySet::new(1, (0..17).map(key_at).collect());
    let layout = BodyLayout::default();

    c.bench_function("template_new", |b| {
        b.iter(|| BodyTemplate::new(black_box(&spoof), black_box(&targets), 4096, &layout))
    });
}

criterion_group!(benches, bench_render, bench_template);
criterion_main!(benches);
