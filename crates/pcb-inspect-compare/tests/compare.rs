use image::{Rgb, RgbImage};
use pcb_inspect_compare::{
    ComparatorParams, DefectClassifier, DefectType, Severity, SimilarityComparator,
};
use pcb_inspect_core::{BoundingBox, Frame};

fn textured(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        let mut v = (y * w + x).wrapping_add(0x1234_5678);
        v ^= v >> 16;
        v = v.wrapping_mul(0x85eb_ca6b);
        v ^= v >> 13;
        v = v.wrapping_mul(0xc2b2_ae35);
        v ^= v >> 16;
        let g = 40 + (v >> 24) as u8 % 180;
        Rgb([g, g.wrapping_add(10), g])
    })
}

#[test]
fn image_compared_to_itself_is_identical() {
    let frame = Frame::new(textured(160, 120));
    let result = SimilarityComparator::default()
        .compare(&frame, &frame)
        .expect("compare");
    assert_eq!(result.similarity_score, 1.0);
    assert_eq!(result.difference_percentage, 0.0);
    assert!(result.regions.is_empty());
    assert!(result.passed);

    let analysis = DefectClassifier::default().classify(&frame, &frame, &result);
    assert_eq!(analysis.severity, Severity::None);
    assert_eq!(
        analysis.recommendations(),
        vec!["Board passes inspection - no defects detected"]
    );
}

#[test]
fn zeroed_block_is_one_missing_component() {
    let reference = Frame::new(textured(400, 300));
    let mut test_img = reference.image().clone();
    for y in 80..280 {
        for x in 120..320 {
            test_img.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    let test = Frame::new(test_img);

    let result = SimilarityComparator::default()
        .compare(&reference, &test)
        .expect("compare");
    assert!(!result.passed);
    assert_eq!(result.regions.len(), 1, "{:?}", result.regions);

    let region = &result.regions[0];
    assert_eq!(region.id, 0);
    assert!(
        region.bounding_box.contains(&BoundingBox::new(120, 80, 200, 200)),
        "{:?}",
        region.bounding_box
    );
    assert!(BoundingBox::new(114, 74, 212, 212).contains(&region.bounding_box));
    assert!(result.difference_percentage > 30.0 && result.difference_percentage < 40.0);

    let analysis = DefectClassifier::default().classify(&reference, &test, &result);
    assert_eq!(analysis.defects.len(), 1);
    let defect = &analysis.defects[0];
    assert_eq!(defect.region_id, region.id);
    assert_eq!(defect.defect_type, DefectType::MissingComponent);
    assert!(defect.similarity < 0.3);
    assert!((defect.confidence - (1.0 - defect.similarity)).abs() < 1e-12);
    assert_eq!(analysis.severity, Severity::Critical);
    assert_eq!(
        analysis.recommendations(),
        vec![
            "CRITICAL: Missing components detected - board requires rework",
            "Total defects found: 1"
        ]
    );
}

#[test]
fn defects_only_reference_known_regions() {
    let reference = Frame::new(textured(300, 200));
    let mut test_img = reference.image().clone();
    // two separate damaged patches of different strength
    for y in 20..70 {
        for x in 20..70 {
            test_img.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    for y in 120..170 {
        for x in 200..260 {
            let p = test_img.get_pixel(x, y).0;
            test_img.put_pixel(x, y, Rgb([255 - p[0], 255 - p[1], 255 - p[2]]));
        }
    }
    let test = Frame::new(test_img);

    let result = SimilarityComparator::default()
        .compare(&reference, &test)
        .expect("compare");
    assert_eq!(result.regions.len(), 2);
    let analysis = DefectClassifier::default().classify(&reference, &test, &result);
    assert!(!analysis.defects.is_empty());
    for d in &analysis.defects {
        assert!(result.region(d.region_id).is_some());
    }
}

#[test]
fn mismatched_sizes_are_resized_to_reference() {
    let reference = Frame::new(textured(200, 150));
    let small = Frame::new(image::imageops::resize(
        reference.image(),
        100,
        75,
        image::imageops::FilterType::Triangle,
    ));
    let result = SimilarityComparator::default()
        .compare(&reference, &small)
        .expect("compare");
    assert!(result.similarity_score < 1.0);
    for r in &result.regions {
        assert!(r.bounding_box.x + r.bounding_box.w <= 200);
        assert!(r.bounding_box.y + r.bounding_box.h <= 150);
    }
}

#[test]
fn lower_threshold_relaxes_pass() {
    let reference = Frame::new(textured(120, 120));
    let mut test_img = reference.image().clone();
    for y in 10..50 {
        for x in 10..50 {
            test_img.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    let test = Frame::new(test_img);
    let strict = SimilarityComparator::default()
        .compare(&reference, &test)
        .expect("compare");
    let lenient = SimilarityComparator::new(ComparatorParams {
        threshold: 0.5,
        ..ComparatorParams::default()
    })
    .compare(&reference, &test)
    .expect("compare");
    assert!(!strict.passed);
    assert!(lenient.passed);
    assert_eq!(strict.similarity_score, lenient.similarity_score);
}
