use callvox::audio::{MockClock, Vad, VadConfig, VadEvent, calculate_rms};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

/// Samples in one 16 ms frame at 16 kHz.
const FRAME_LEN: usize = 256;

fn frame(amplitude: i16) -> Vec<i16> {
    (0..FRAME_LEN)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect()
}

/// One utterance: `speech_frames` loud frames, then enough silence to endpoint.
fn run_utterance(vad: &mut Vad<MockClock>, clock: &MockClock, speech_frames: usize) -> usize {
    let loud = frame(3000);
    let quiet = frame(0);
    let mut endpoints = 0;
    for i in 0..speech_frames + 45 {
        let samples = if i < speech_frames { &loud } else { &quiet };
        if let VadEvent::EndOfSpeech { .. } = vad.process(black_box(samples)) {
            endpoints += 1;
        }
        clock.advance(Duration::from_millis(16));
    }
    endpoints
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("calculate_rms_256", |b| {
        let samples = frame(1200);
        b.iter(|| calculate_rms(black_box(&samples)))
    });

    let mut group = c.benchmark_group("vad_utterance");
    for speech_frames in [16usize, 125, 625] {
        group.bench_with_input(
            BenchmarkId::from_parameter(speech_frames),
            &speech_frames,
            |b, &speech_frames| {
                let clock = MockClock::new();
                let mut vad = Vad::with_clock(VadConfig::default(), clock.clone());
                vad.set_listening(true);
                b.iter(|| run_utterance(&mut vad, &clock, speech_frames))
            },
        );
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
