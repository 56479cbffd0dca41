mod common;

use std::{path::PathBuf, sync::atomic::Ordering};

use captcha_solver::{
    BoundingBox, CaptchaSolver, CaptchaSolverBuilder, ErrorKind, FilterOptions, LabelSet,
    SolveError,
};
use common::*;

#[test]
fn six_clean_glyphs_read_left_to_right() {
    init_logging();
    let canvas = spaced(&[2, 0, 5, 9, 1, 7]);
    let solver = solver(FakeDetector::new(canvas.boxes.clone()));

    let answer = solver.solve(&canvas.dynamic()).expect("solve");

    assert_eq!(answer.len(), 6);
    assert_eq!(answer.text(), "cafjbh");
    let positions: Vec<usize> = answer.characters.iter().map(|it| it.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn noisy_ninth_detection_is_dropped() {
    init_logging();
    let canvas = spaced(&[0, 1, 2, 3, 4, 5, 6, 7]).noise(330, 30);
    let solver = solver(FakeDetector::new(canvas.boxes.clone()));

    let answer = solver.solve(&canvas.dynamic()).expect("solve");

    assert_eq!(answer.text(), "abcdefgh");
}

#[test]
fn genuine_ninth_detection_is_kept() {
    init_logging();
    let canvas = spaced(&[0, 1, 2, 3, 4, 5, 6, 7, 0]);
    let solver = solver(FakeDetector::new(canvas.boxes.clone()));

    let answer = solver.solve(&canvas.dynamic()).expect("solve");

    assert_eq!(answer.text(), "abcdefgha");
}

#[test]
fn detections_past_the_ninth_are_ignored() {
    init_logging();
    let canvas = spaced(&[1, 1, 1, 1, 1, 1, 1, 1, 0, 3]);
    let solver = solver(FakeDetector::new(canvas.boxes.clone()));

    let answer = solver.solve(&canvas.dynamic()).expect("solve");

    assert_eq!(answer.len(), 9);
    assert!(!answer.text().contains('d'));
}

#[test]
fn noise_in_early_positions_is_kept() {
    init_logging();
    let canvas = Canvas::new(200).noise(10, 30).glyph(60, 3);
    let solver = solver(FakeDetector::new(canvas.boxes.clone()));

    let answer = solver.solve(&canvas.dynamic()).expect("solve");

    // Blank crops classify as the all-white class.
    assert_eq!(answer.text(), "jd");
}

#[test]
fn overlapping_detection_is_skipped() {
    init_logging();
    let mut canvas = Canvas::new(200).glyph(5, 1).glyph(50, 2);
    canvas.boxes.insert(1, BoundingBox::new(12, GLYPH_TOP, 32, GLYPH_TOP + GLYPH_HEIGHT));
    let solver = solver(FakeDetector::new(canvas.boxes.clone()));

    let boxes = solver.localize(&canvas.dynamic()).unwrap();
    assert_eq!(boxes.iter().map(|it| it.x1).collect::<Vec<_>>(), vec![5, 12, 50]);
    assert_eq!(solver.select_glyphs(&canvas.dynamic(), &boxes).len(), 2);

    let answer = solver.solve(&canvas.dynamic()).expect("solve");
    assert_eq!(answer.text(), "bc");
}

#[test]
fn out_of_bounds_boxes_are_clipped_or_dropped() {
    init_logging();
    let canvas = Canvas::new(100).glyph(80, 0);
    let detector = FakeDetector::new(vec![
        BoundingBox::new(80, GLYPH_TOP, 140, GLYPH_TOP + GLYPH_HEIGHT),
        BoundingBox::new(150, 0, 170, 20),
    ]);
    let solver = solver(detector);

    let boxes = solver.localize(&canvas.dynamic()).unwrap();

    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].x2, 100);
}

#[test]
fn no_detections_localize_to_nothing() {
    init_logging();
    let canvas = Canvas::new(100);
    let solver = solver(FakeDetector::new(Vec::new()));

    assert!(solver.localize(&canvas.dynamic()).unwrap().is_empty());

    let err = solver.solve(&canvas.dynamic()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Detection);
}

#[test]
fn detector_failure_aborts_pipeline() {
    init_logging();
    let solver = solver(FailingDetector);

    let err = solver.solve(&Canvas::new(100).dynamic()).unwrap_err();

    assert!(matches!(err, SolveError::Detection(_)));
}

#[test]
fn malformed_classifier_output_is_classification_failure() {
    init_logging();
    let canvas = spaced(&[1, 2]);
    let solver = CaptchaSolver::new(
        Box::new(FakeDetector::new(canvas.boxes.clone())),
        Box::new(TruncatedClassifier),
        LabelSet::new(LABELS),
        FilterOptions::default(),
    );

    let err = solver.solve(&canvas.dynamic()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Classification);
}

#[test]
fn solve_path_reads_png_from_disk() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("captcha.png");
    let canvas = spaced(&[4, 4, 8]);
    std::fs::write(&path, canvas.png()).unwrap();
    let detector = FakeDetector::new(canvas.boxes.clone());
    let solver = solver(detector);

    assert_eq!(solver.solve_path(&path).unwrap().text(), "eei");
}

#[test]
fn undecodable_image_is_detection_failure() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    std::fs::write(&path, b"definitely not a png").unwrap();
    let solver = solver(FakeDetector::new(Vec::new()));

    let err = solver.solve_path(&path).unwrap_err();

    assert!(matches!(err, SolveError::Image { .. }));
    assert_eq!(err.kind(), ErrorKind::Detection);
}

#[test]
fn solver_is_stateless_between_runs() {
    init_logging();
    let first = spaced(&[1, 2, 3]);
    let detector = FakeDetector::new(first.boxes.clone());
    let solver = solver(detector);

    let a = solver.solve(&first.dynamic()).unwrap();
    let b = solver.solve(&first.dynamic()).unwrap();

    assert_eq!(a, b);
}

#[test]
fn detector_is_called_once_per_solve() {
    init_logging();
    let canvas = spaced(&[1]);
    let detector = std::sync::Arc::new(FakeDetector::new(canvas.boxes.clone()));

    use captcha_solver::CharacterDetector;

    struct Shared(std::sync::Arc<FakeDetector>);
    impl CharacterDetector for Shared {
        fn detect(
            &self,
            image: &image::DynamicImage,
        ) -> captcha_solver::Result<Vec<BoundingBox>> {
            self.0.detect(image)
        }
    }

    let solver = common::solver(Shared(detector.clone()));
    solver.solve(&canvas.dynamic()).unwrap();
    solver.solve(&canvas.dynamic()).unwrap();

    assert_eq!(detector.calls.load(Ordering::SeqCst), 2);
}

#[test]
#[ignore = "needs exported models under tests/data/models"]
fn onnx_models_solve_sample() {
    init_logging();
    let models = PathBuf::from("tests/data/models");
    let solver = CaptchaSolverBuilder::new()
        .det_model(models.join("detector.onnx"))
        .cls_model(models.join("classifier.onnx"), models.join("labels.txt"))
        .build()
        .expect("Failed to build engine");

    let answer = solver
        .solve_path("tests/data/captcha.png")
        .expect("Failed recognition.");
    log::debug!("{answer:?}");
    assert!(!answer.is_empty());
}
