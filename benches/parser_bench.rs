//! Benchmarks for the spot and WCY grammars.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use dxcluster_mqtt::{
    parser::{looks_like_spot, parse_spot},
    wcy::parse_weather,
    worker::classify_line,
};

/// Sample spot lines for benchmarking.
const SAMPLE_SPOTS: &[&str] = &[
    "DX de K4VTE:     21142.3  VE6KIX                                      1829Z",
    "DX de OH0M:      21044.0  K5OHY        WWFF KFF-2989                  1830Z",
    "DX de W3LPL:     14025.0  JA1ABC       CQ CQ up 2                     2259Z",
    "DX de G4BFG:      7018.3  RW1M         599 tnx QSO                    0004Z",
    "DX de DL1ABC:    28074.0  PY2XYZ       FT8 -12dB                      1311Z",
    "DX de VK2ABC:     3505.5  ZL1ABC/P                                    0815Z",
    "DX de N1MM:      50313.0  EA8/G4XYZ    FT8 JN16 <ES> IL18             1622Z\x07\x07",
    "DX  de KB1H:     10136.0  OX3LX        FT8                            2050Z",
];

const SAMPLE_WCY: &str =
    "WCY de DK0WCY-2 <19> : K=2 expK=0 A=5 R=126 SFI=141 SA=eru GMF=qui Au=no";

fn bench_parse_spot(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_spot");

    // Benchmark single spot parsing
    group.throughput(Throughput::Elements(1));
    group.bench_function("single", |b| {
        b.iter(|| parse_spot(black_box(SAMPLE_SPOTS[0])))
    });

    // Benchmark batch parsing
    group.throughput(Throughput::Elements(SAMPLE_SPOTS.len() as u64));
    group.bench_function("batch", |b| {
        b.iter(|| {
            for line in SAMPLE_SPOTS {
                let _ = parse_spot(black_box(line));
            }
        })
    });

    group.finish();
}

fn bench_parse_weather(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_weather");

    group.throughput(Throughput::Elements(1));
    group.bench_function("full", |b| b.iter(|| parse_weather(black_box(SAMPLE_WCY))));
    group.bench_function("partial", |b| {
        b.iter(|| parse_weather(black_box("WCY de DK0WCY-2 <12> : K=3 SFI=150")))
    });

    group.finish();
}

fn bench_looks_like_spot(c: &mut Criterion) {
    let mut group = c.benchmark_group("looks_like_spot");

    let valid_spot = SAMPLE_SPOTS[0];
    let invalid_line = "Hello M0LTE, this is G4BFG-9 in Warminster, Wiltshire";

    group.bench_function("valid_spot", |b| {
        b.iter(|| looks_like_spot(black_box(valid_spot)))
    });

    group.bench_function("invalid_line", |b| {
        b.iter(|| looks_like_spot(black_box(invalid_line)))
    });

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify_line");

    // Mix of spots, weather and chatter as seen after login
    let mixed_lines: Vec<&str> = vec![
        "DX de K4VTE:     21142.3  VE6KIX                                      1829Z",
        "Hello M0LTE, this is G4BFG-9 in Warminster, Wiltshire",
        SAMPLE_WCY,
        "M0LTE de G4BFG-9  1-Feb-2026 1830Z dxspider >",
        "DX de OH0M:      21044.0  K5OHY        WWFF KFF-2989                  1830Z",
        "To ALL de G4BFG: contest this weekend",
    ];

    group.throughput(Throughput::Elements(mixed_lines.len() as u64));
    group.bench_function("mixed_input", |b| {
        b.iter(|| {
            for line in &mixed_lines {
                let _ = classify_line(black_box(line));
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_parse_spot,
    bench_parse_weather,
    bench_looks_like_spot,
    bench_classify
);
criterion_main!(benches);
