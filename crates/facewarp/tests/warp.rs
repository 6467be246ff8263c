use facewarp::landmarks::EXTENDED_POINTS;
use facewarp::synthetic::{frontal_face_at, pack};
use facewarp::{split_faces, warp_face, FaceAnalysis, FaceMesh, Knob, KnobSet, Vector2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn jittered(rng: &mut StdRng) -> facewarp::FaceLandmarks {
    let offset = Vector2::new(rng.gen_range(260.0..380.0), rng.gen_range(-40.0..40.0));
    let scale = rng.gen_range(0.7..1.1);
    let yaw = rng.gen_range(0.0..0.8);
    let mut face = frontal_face_at(offset, scale, yaw);
    for idx in 0..face.len() {
        let p = face[idx];
        face[idx] = Vector2::new(
            p.x + rng.gen_range(-1.5..1.5),
            p.y + rng.gen_range(-1.5..1.5),
        );
    }
    face
}

fn random_knobs(rng: &mut StdRng) -> KnobSet {
    let mut knobs = KnobSet::default();
    for knob in Knob::ALL {
        if rng.gen_bool(0.5) {
            knobs.set(knob, rng.gen_range(0.0..=1.0));
        }
    }
    knobs
}

#[test]
fn miscut_stays_in_unit_range() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..64 {
        let analysis = FaceAnalysis::analyze(&jittered(&mut rng));
        for value in [analysis.miscut, analysis.l_miscut, analysis.r_miscut] {
            assert!((0.0..=1.0).contains(&value), "out of range: {value}");
        }
    }
}

#[test]
fn random_warps_produce_finite_full_frame_meshes() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..24 {
        let face = jittered(&mut rng);
        let knobs = random_knobs(&mut rng);
        let warped = warp_face(face, &knobs);
        assert_eq!(warped.target.len(), EXTENDED_POINTS);
        assert!(warped
            .target
            .points()
            .iter()
            .all(|p| p.x.is_finite() && p.y.is_finite()));

        let mesh = FaceMesh::build(&warped, 640.0, 480.0);
        assert!(mesh.triangle_count() > EXTENDED_POINTS);
        let max = mesh.vertex_count() as u32;
        assert!(mesh.indices.iter().all(|&i| i < max));
    }
}

#[test]
fn detector_round_trip_feeds_the_warp() {
    let mut rng = StdRng::seed_from_u64(3);
    let faces = [jittered(&mut rng), jittered(&mut rng)];
    let data = pack(&faces);
    let split = split_faces(&data).unwrap();
    assert_eq!(split.len(), 2);

    let mut knobs = KnobSet::default();
    knobs.set(Knob::ShrinkNose, 1.0);
    let warped = warp_face(split[0].clone(), &knobs);
    assert_ne!(warped.rest, warped.target);
}
