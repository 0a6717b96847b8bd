//! Benchmarks for text normalization and transcript formatting.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use youtubingest::text::{clean_description, clean_title, parse_iso8601_duration};
use youtubingest::transcript::{format_cues, Cue};

fn description_fixture() -> String {
    let mut desc = String::new();
    for i in 0..50 {
        desc.push_str(&format!(
            "Line {i} with some   spaced   content and a link https://example.com/{i}\n"
        ));
        if i % 10 == 0 {
            desc.push_str("Don't forget to like and subscribe!\n\n\n");
        }
    }
    desc
}

fn cue_fixture() -> Vec<Cue> {
    (0..500)
        .map(|i| Cue {
            start_seconds: i as f64 * 2.5,
            duration_seconds: 2.5,
            text: format!("segment number {i} with a few words"),
        })
        .collect()
}

fn bench_normalization(c: &mut Criterion) {
    let desc = description_fixture();
    c.bench_function("clean_description_50_lines", |b| {
        b.iter(|| clean_description(black_box(&desc)))
    });

    c.bench_function("clean_title", |b| {
        b.iter(|| clean_title(black_box("An Interesting Video | Some Channel #tag1 #tag2")))
    });

    c.bench_function("parse_duration", |b| {
        b.iter(|| parse_iso8601_duration(black_box("PT1H23M45S")))
    });
}

fn bench_transcript_formatting(c: &mut Criterion) {
    let cues = cue_fixture();
    c.bench_function("format_cues_500_interval_10", |b| {
        b.iter(|| format_cues(black_box(&cues), 10))
    });
    c.bench_function("format_cues_500_interval_0", |b| {
        b.iter(|| format_cues(black_box(&cues), 0))
    });
}

criterion_group!(benches, bench_normalization, bench_transcript_formatting);
criterion_main!(benches);
