//! Benchmarks for the signal-processing hot paths
//!
//! Spectrum derivation runs once per single-shot acquisition, while
//! reconstruction runs once per received phase-encode row during live
//! preview, so both are worth watching.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use num_complex::Complex;

use mrconsole_rust::analysis::kspace::KSpaceBuffer;
use mrconsole_rust::analysis::recon::{default_center, reconstruct};
use mrconsole_rust::analysis::relaxometry::{fit, RelaxationKind, RelaxationSeries};
use mrconsole_rust::analysis::spectrum::SpectrumRecord;

fn synthetic_fid(n: usize) -> Vec<Complex<f32>> {
    (0..n)
        .map(|i| {
            let t = i as f32 / n as f32;
            let phase = 2.0 * std::f32::consts::PI * 40.0 * t;
            let envelope = 0.01 * (-3.0 * t).exp();
            Complex::new(envelope * phase.cos(), envelope * phase.sin())
        })
        .collect()
}

fn bench_spectrum_derivation(c: &mut Criterion) {
    let readout = synthetic_fid(5000);
    c.bench_function("spectrum_record_5000", |b| {
        b.iter(|| {
            let record = SpectrumRecord::new(black_box(&readout), 20.0, 250_000.0, 20.0971);
            black_box(record.peak_parameters());
        })
    });
}

fn bench_spectral_metrics(c: &mut Criterion) {
    let readout = synthetic_fid(5000);
    let record = SpectrumRecord::new(&readout, 20.0, 250_000.0, 20.0971);
    c.bench_function("fwhm_and_snr", |b| {
        b.iter(|| {
            black_box(record.fwhm(black_box(1000)));
            black_box(record.snr(black_box(1.2)));
        })
    });
}

fn bench_reconstruction(c: &mut Criterion) {
    let npe = 64;
    let crop_len = KSpaceBuffer::default_crop_len(npe);
    let mut buffer = KSpaceBuffer::new(npe, crop_len, 0);
    let trace = synthetic_fid(crop_len);
    for row in 0..npe {
        buffer.set_row(row, &trace).expect("row fits");
    }
    let center = default_center(crop_len);
    c.bench_function("reconstruct_64x640", |b| {
        b.iter(|| black_box(reconstruct(black_box(&buffer), center)))
    });
}

fn bench_relaxation_fit(c: &mut Criterion) {
    let mut series = RelaxationSeries::new();
    for i in 1..=10 {
        let t = i as f64 * 40.0;
        series.push(t, 5.0 - 8.0 * (-0.01 * t).exp());
    }
    c.bench_function("t1_fit_10_points", |b| {
        b.iter(|| black_box(fit(RelaxationKind::T1, black_box(&series), None)))
    });
}

criterion_group!(
    benches,
    bench_spectrum_derivation,
    bench_spectral_metrics,
    bench_reconstruction,
    bench_relaxation_fit
);
criterion_main!(benches);
