//! Integration tests for the verification and matching pipeline.
//!
//! These run the public API end to end on synthetic keypoints with known
//! geometry.

use approx::assert_abs_diff_eq;
use nalgebra::Matrix3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sver::demodata::{grid_kpts, identity_matches, perturbed_grid_kpts, random_matches};
use sver::keypoint::diag_extent_sqrd;
use sver::neighbors::Descriptors;
use sver::refine::RefineParams;
use sver::*;

fn similarity(scale: f64, theta: f64, tx: f64, ty: f64) -> Matrix3<f64> {
    let (s, c) = theta.sin_cos();
    Matrix3::new(
        scale * c,
        -scale * s,
        tx,
        scale * s,
        scale * c,
        ty,
        0.0,
        0.0,
        1.0,
    )
}

fn normalized(h: &Matrix3<f64>) -> Matrix3<f64> {
    h / h[(2, 2)]
}

#[test]
fn corrupted_correspondence_is_rejected() {
    let kpts1 = grid_kpts(1, 3, 10.0, 3.0);
    let mut kpts2 = kpts1.clone();
    kpts2[2].x += 40.0;
    kpts2[2].y += 40.0;
    let matches = identity_matches(3);
    let dlen_sqrd2 = diag_extent_sqrd(&kpts2);

    let result = spatially_verify(
        &kpts1,
        &kpts2,
        &matches,
        dlen_sqrd2,
        None,
        &SverSettings::default(),
    )
    .unwrap()
    .expect("two consistent correspondences verify");

    assert_eq!(result.best_index, 0);
    assert_eq!(result.aff_inliers, vec![0, 1]);
    assert_eq!(result.homog_inliers, vec![0, 1]);
    assert_eq!(result.homog_errors.len(), 2);
    assert_eq!(result.kind, TransformKind::AffineFallback);
    assert_abs_diff_eq!((result.h - Matrix3::identity()).norm(), 0.0, epsilon = 1e-9);
}

#[test]
fn empty_correspondences_give_no_result() {
    let kpts = grid_kpts(2, 2, 10.0, 3.0);
    let out = spatially_verify(&kpts, &kpts, &[], 200.0, None, &SverSettings::default()).unwrap();
    assert!(out.is_none());
}

#[test]
fn refinement_recovers_known_homography() {
    let h_true = Matrix3::new(1.05, 0.08, 12.0, -0.04, 0.97, -6.0, 1.5e-4, -1e-4, 1.0);
    let kpts1 = grid_kpts(5, 5, 20.0, 4.0);
    let kpts2 = transform_keypoints(&kpts1, &h_true);
    let matches = identity_matches(kpts1.len());
    let data = MatchData::new(&kpts1, &kpts2, &matches).unwrap();
    let all: Vec<usize> = (0..matches.len()).collect();

    let out = refine_homography(
        &data,
        &all,
        &AffineHypothesis::new(Matrix3::identity()),
        &RefineParams::new(1.0),
    )
    .unwrap();
    let refined = out.refined().expect("exact correspondences refine");
    assert_eq!(refined.inliers, all);
    assert!((normalized(&refined.h) - normalized(&h_true)).norm() < 1e-4);
}

#[test]
fn verification_recovers_mild_perspective() {
    let h_true = Matrix3::new(0.98, 0.05, 25.0, -0.03, 1.02, 8.0, 1e-4, 5e-5, 1.0);
    let kpts1 = grid_kpts(5, 5, 20.0, 4.0);
    let kpts2 = transform_keypoints(&kpts1, &h_true);
    let matches = identity_matches(kpts1.len());
    let dlen_sqrd2 = diag_extent_sqrd(&kpts2);

    let result = spatially_verify(
        &kpts1,
        &kpts2,
        &matches,
        dlen_sqrd2,
        None,
        &SverSettings::default(),
    )
    .unwrap()
    .unwrap();
    assert_eq!(result.kind, TransformKind::Homography);
    assert_eq!(result.homog_inliers.len(), kpts1.len());
    assert!((normalized(&result.h) - normalized(&h_true)).norm() < 1e-4);
    assert!(result.homog_errors.iter().all(|&e| e < 1e-8));
}

#[test]
fn weights_do_not_change_the_refit() {
    let h_true = Matrix3::new(1.1, 0.1, 15.0, -0.05, 0.95, 4.0, 0.0, 0.0, 1.0);
    let kpts1 = grid_kpts(5, 5, 20.0, 4.0);
    let kpts2 = transform_keypoints(&kpts1, &h_true);
    let matches = identity_matches(kpts1.len());
    let dlen_sqrd2 = diag_extent_sqrd(&kpts2);
    let settings = SverSettings::default();

    let unit = vec![1.0; matches.len()];
    let mut sparse = vec![0.0; matches.len()];
    for i in [0, 1, 5] {
        sparse[i] = 1.0;
    }
    let a = spatially_verify(&kpts1, &kpts2, &matches, dlen_sqrd2, Some(&unit), &settings)
        .unwrap()
        .unwrap();
    let b = spatially_verify(&kpts1, &kpts2, &matches, dlen_sqrd2, Some(&sparse), &settings)
        .unwrap()
        .unwrap();

    assert_eq!(a.best_index, b.best_index);
    assert_eq!(a.kind, TransformKind::Homography);
    assert_eq!(b.kind, TransformKind::Homography);
    assert_eq!(a.homog_inliers, b.homog_inliers);
    assert_eq!(a.homog_inliers.len(), kpts1.len());
    assert_eq!(a.h, b.h);
}

#[test]
fn zero_hypothesis_cap_is_rejected() {
    let kpts = grid_kpts(2, 2, 10.0, 3.0);
    let settings = SverSettings {
        max_hypotheses: Some(0),
        ..SverSettings::default()
    };
    let out = spatially_verify(&kpts, &kpts, &identity_matches(4), 200.0, None, &settings);
    assert!(matches!(
        out,
        Err(SverError::InvalidThreshold {
            name: "max_hypotheses",
            ..
        })
    ));
}

#[test]
fn every_hypothesis_accepts_its_own_seed() {
    let kpts1 = perturbed_grid_kpts(7, 1.0);
    let kpts2 = perturbed_grid_kpts(8, 1.0);
    let matches = random_matches(9, kpts1.len(), kpts2.len(), 30);

    let hyps = affine_hypothesis_errors(&kpts1, &kpts2, &matches, 1e-6, 1.0 + 1e-6, 1e-6).unwrap();
    for k in 0..matches.len() {
        assert!(hyps.inlier_masks[k][k], "hypothesis {k} rejects its seed");
    }
}

#[test]
fn thresholds_are_monotone() {
    let kpts1 = perturbed_grid_kpts(1, 4.0);
    let kpts2 = transform_keypoints(&perturbed_grid_kpts(2, 4.0), &similarity(1.1, 0.2, 5.0, 5.0));
    let matches = random_matches(3, kpts1.len(), kpts2.len(), 40);

    let levels = [(50.0, 1.5, 0.2), (200.0, 2.0, 0.5), (800.0, 4.0, 1.5)];
    let counts: Vec<Vec<usize>> = levels
        .iter()
        .map(|&(xy, scale, ori)| {
            affine_hypothesis_errors(&kpts1, &kpts2, &matches, xy, scale, ori)
                .unwrap()
                .inlier_counts()
        })
        .collect();
    for pair in counts.windows(2) {
        for (lo, hi) in pair[0].iter().zip(&pair[1]) {
            assert!(hi >= lo);
        }
    }
}

#[test]
fn equal_counts_select_the_first_hypothesis() {
    let kp = |x: f64, y: f64| Keypoint::new(x, y, 3.0, 0.0, 3.0, 0.0);
    let kpts1 = vec![kp(0.0, 0.0), kp(50.0, 0.0), kp(10.0, 0.0)];
    let kpts2 = vec![kp(0.0, 0.0), kp(50.0, 90.0), kp(10.0, 0.0)];
    let matches = identity_matches(3);

    let hyps = affine_hypothesis_errors(&kpts1, &kpts2, &matches, 4.0, 4.0, 1.0).unwrap();
    assert_eq!(hyps.inlier_counts(), vec![2, 1, 2]);
    for _ in 0..3 {
        let best = select_best_hypothesis(&hyps.inlier_masks, None).unwrap();
        assert_eq!(best.index, 0);
        assert_eq!(best.inliers, vec![0, 2]);
    }
}

#[test]
fn half_turn_policy_accepts_flipped_orientations() {
    let kpts1 = grid_kpts(2, 2, 10.0, 3.0);
    let mut kpts2 = kpts1.clone();
    // Seed 0 is unrotated; the others are flipped by half a turn.
    for kp in kpts2.iter_mut().skip(1) {
        kp.ori = std::f64::consts::PI;
    }
    let matches = identity_matches(4);
    let dlen = diag_extent_sqrd(&kpts2);

    let oriented = SverSettings::default();
    let symmetric = SverSettings {
        orientation_policy: OrientationPolicy::HalfTurnSymmetric,
        ..SverSettings::default()
    };
    let a = spatially_verify(&kpts1, &kpts2, &matches, dlen, None, &oriented)
        .unwrap()
        .unwrap();
    let b = spatially_verify(&kpts1, &kpts2, &matches, dlen, None, &symmetric)
        .unwrap()
        .unwrap();
    assert_eq!(a.aff_inliers, vec![0]);
    assert_eq!(b.aff_inliers, vec![0, 1, 2, 3]);
}

fn random_descriptors(rng: &mut StdRng, n: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(0.0f32..255.0)).collect())
        .collect()
}

#[test]
fn two_pass_matcher_recovers_similarity() {
    let h_true = similarity(1.2, 0.15, 30.0, -10.0);
    let kpts1 = perturbed_grid_kpts(11, 2.0);
    let kpts2 = transform_keypoints(&kpts1, &h_true);
    let dlen_sqrd2 = diag_extent_sqrd(&kpts2);

    let mut rng = StdRng::seed_from_u64(5);
    let rows1 = random_descriptors(&mut rng, kpts1.len(), 32);
    let rows2: Vec<Vec<f32>> = rows1
        .iter()
        .map(|r| r.iter().map(|&v| v + rng.gen_range(-1.0f32..1.0)).collect())
        .collect();
    let vecs1 = Descriptors::from_rows(&rows1).unwrap();
    let vecs2 = Descriptors::from_rows(&rows2).unwrap();

    let mut matcher = VsOneMatcher::new(MatchingSettings::default()).unwrap();
    let (base, next) = matcher
        .run(&kpts1, &vecs1, &kpts2, &vecs2, dlen_sqrd2)
        .unwrap();

    assert_eq!(base.orig.len(), kpts2.len());
    assert_eq!(base.rat.len(), kpts2.len());
    assert_eq!(base.sv.len(), kpts2.len());
    assert!(base.sv.fm.iter().all(|m| m.fx1 == m.fx2));
    assert!((normalized(&base.h) - h_true).norm() < 1e-6);

    assert!(next.scrsv.len() >= kpts2.len() - 2);
    assert!(next.sc.fm_norm.is_some());
    assert!(next.scrsv.fm.iter().all(|m| m.fx1 == m.fx2));
    assert!((normalized(&next.h) - h_true).norm() < 1e-6);
    // Both passes index the same descriptors.
    assert_eq!(matcher.cache().len(), 1);
}

#[test]
fn failed_verification_reports_identity() {
    let kpts1 = grid_kpts(1, 2, 10.0, 3.0);
    let kpts2 = grid_kpts(1, 2, 10.0, 3.0);
    let vecs1 = Descriptors::from_rows(&[[0.0f32, 0.0], [100.0, 100.0]]).unwrap();
    // Both queries are ambiguous, so nothing survives the ratio test.
    let vecs2 = Descriptors::from_rows(&[[50.0f32, 50.0], [50.0, 50.0]]).unwrap();

    let mut matcher = VsOneMatcher::new(MatchingSettings::default()).unwrap();
    let base = matcher
        .baseline(&kpts1, &vecs1, &kpts2, &vecs2, diag_extent_sqrd(&kpts2))
        .unwrap();
    assert_eq!(base.orig.len(), 2);
    assert!(base.rat.is_empty());
    assert!(base.sv.is_empty());
    assert_eq!(base.h, Matrix3::identity());
}

#[test]
fn settings_round_trip_through_json() {
    let settings = MatchingSettings {
        search_k: 5,
        ..MatchingSettings::default()
    };
    let json = serde_json::to_string(&settings).unwrap();
    let back: MatchingSettings = serde_json::from_str(&json).unwrap();
    assert_eq!(back, settings);
}
