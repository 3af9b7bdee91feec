use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::Matrix3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sver::demodata::{identity_matches, perturbed_grid_kpts};
use sver::keypoint::diag_extent_sqrd;
use sver::neighbors::Descriptors;
use sver::{
    affine_hypothesis_errors, spatially_verify, transform_keypoints, Keypoint, MatchingSettings,
    SverSettings, VsOneMatcher,
};

fn fixture() -> (Vec<Keypoint>, Vec<Keypoint>) {
    let h = Matrix3::new(1.1, 0.05, 12.0, -0.04, 0.95, -3.0, 1e-4, 0.0, 1.0);
    let kpts1 = perturbed_grid_kpts(3, 2.0);
    let kpts2 = transform_keypoints(&kpts1, &h);
    (kpts1, kpts2)
}

fn bench_hypothesis_errors(c: &mut Criterion) {
    let (kpts1, kpts2) = fixture();
    let matches = identity_matches(kpts1.len());
    let thresh = 0.01 * diag_extent_sqrd(&kpts2);
    c.bench_function("affine_hypothesis_errors_49", |b| {
        b.iter(|| {
            let hyps = affine_hypothesis_errors(
                black_box(&kpts1),
                black_box(&kpts2),
                &matches,
                thresh,
                4.0,
                1.57,
            )
            .expect("fixture is well formed");
            black_box(hyps)
        })
    });
}

fn bench_spatially_verify(c: &mut Criterion) {
    let (kpts1, kpts2) = fixture();
    let matches = identity_matches(kpts1.len());
    let dlen_sqrd2 = diag_extent_sqrd(&kpts2);
    let settings = SverSettings::default();
    c.bench_function("spatially_verify_49", |b| {
        b.iter(|| {
            let res = spatially_verify(
                black_box(&kpts1),
                black_box(&kpts2),
                &matches,
                dlen_sqrd2,
                None,
                &settings,
            )
            .expect("fixture is well formed");
            black_box(res)
        })
    });
}

fn bench_vsone(c: &mut Criterion) {
    let (kpts1, kpts2) = fixture();
    let dlen_sqrd2 = diag_extent_sqrd(&kpts2);
    let mut rng = StdRng::seed_from_u64(17);
    let rows1: Vec<Vec<f32>> = (0..kpts1.len())
        .map(|_| (0..128).map(|_| rng.gen_range(0.0f32..255.0)).collect())
        .collect();
    let rows2: Vec<Vec<f32>> = rows1
        .iter()
        .map(|r| r.iter().map(|&v| v + rng.gen_range(-2.0f32..2.0)).collect())
        .collect();
    let vecs1 = Descriptors::from_rows(&rows1).expect("rows share a length");
    let vecs2 = Descriptors::from_rows(&rows2).expect("rows share a length");
    let mut matcher =
        VsOneMatcher::new(MatchingSettings::default()).expect("default settings are valid");
    c.bench_function("vsone_two_pass_49", |b| {
        b.iter(|| {
            let out = matcher
                .run(&kpts1, black_box(&vecs1), &kpts2, black_box(&vecs2), dlen_sqrd2)
                .expect("fixture is well formed");
            black_box(out)
        })
    });
}

criterion_group!(
    hypotheses,
    bench_hypothesis_errors,
    bench_spatially_verify,
    bench_vsone
);
criterion_main!(hypotheses);
