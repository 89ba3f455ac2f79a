use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use voxloop::audio::classifier::EnergyClassifier;
use voxloop::audio::crossfade::CrossFader;
use voxloop::audio::segmenter::{SegmentationConfig, SegmentationEngine};
use voxloop::audio::wav::{decode_clip, encode_wav};
use voxloop::pipeline::types::{AudioFrame, ms_to_samples};

const PLAYBACK_RATE: u32 = 32000;
const CAPTURE_RATE: u32 = 16000;

/// Sine clip at the playback rate
fn tone(ms: u32) -> Vec<i16> {
    (0..ms_to_samples(ms, PLAYBACK_RATE))
        .map(|i| ((i as f32 * 0.05).sin() * 12000.0) as i16)
        .collect()
}

fn bench_crossfade_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("crossfade_join");
    for clip_ms in [200u32, 1000, 4000] {
        let clip = tone(clip_ms);
        group.throughput(Throughput::Elements(clip.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(clip_ms), &clip, |b, clip| {
            let mut fader = CrossFader::new(ms_to_samples(50, PLAYBACK_RATE));
            fader.join(clip);
            b.iter(|| black_box(fader.join(black_box(clip))));
        });
    }
    group.finish();
}

fn bench_decode_clip(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_clip");
    let samples = tone(2000);
    let native = encode_wav(&samples, PLAYBACK_RATE).expect("encode native clip");
    let foreign = encode_wav(&samples, 24000).expect("encode resampled clip");

    group.bench_function("native_rate", |b| {
        b.iter(|| decode_clip(black_box(&native), PLAYBACK_RATE))
    });
    group.bench_function("resampled", |b| {
        b.iter(|| decode_clip(black_box(&foreign), PLAYBACK_RATE))
    });
    group.finish();
}

fn bench_segmentation(c: &mut Criterion) {
    let frame: Vec<i16> = (0..ms_to_samples(500, CAPTURE_RATE))
        .map(|i| if i % 3 == 0 { 4000 } else { 200 })
        .collect();

    c.bench_function("segmentation_push_frame_500ms", |b| {
        let mut engine = SegmentationEngine::new(
            SegmentationConfig::default(),
            Box::new(EnergyClassifier::default()),
        )
        .expect("default segmentation config");
        let mut sequence = 0;
        b.iter(|| {
            sequence += 1;
            let event = engine.push_frame(AudioFrame::new(frame.clone(), CAPTURE_RATE, sequence));
            black_box(event)
        });
    });
}

criterion_group!(benches, bench_crossfade_join, bench_decode_clip, bench_segmentation);
criterion_main!(benches);
