use image::{Rgb, RgbImage};
use pcb_inspect_board::{BoardLocator, ZoomPlanner};
use pcb_inspect_core::{BoundingBox, Frame};

fn board_frame(x0: u32, y0: u32, w: u32, h: u32) -> Frame {
    Frame::new(RgbImage::from_fn(640, 480, |x, y| {
        if (x0..x0 + w).contains(&x) && (y0..y0 + h).contains(&y) {
            Rgb([220, 220, 220])
        } else {
            Rgb([30, 30, 30])
        }
    }))
}

#[test]
fn finds_bright_board_on_dark_background() {
    let frame = board_frame(180, 130, 280, 215);
    let board = BoardLocator::default()
        .locate(&frame)
        .expect("board should be found");

    assert!(board.confidence >= 0.7, "confidence {}", board.confidence);
    assert!(
        (4..=6).contains(&board.boundary.len()),
        "boundary {:?}",
        board.boundary
    );

    // the outline hugs the board within the threshold neighbourhood
    let bb = board.bounding_box;
    let outer = BoundingBox::new(165, 115, 310, 245);
    let inner = BoundingBox::new(185, 135, 270, 205);
    assert!(outer.contains(&bb), "bbox {bb:?}");
    assert!(bb.contains(&inner), "bbox {bb:?}");

    assert!((board.center.x - 320.0).abs() < 4.0);
    assert!((board.center.y - 237.0).abs() < 4.0);
    assert!(board.aspect_ratio > 1.1 && board.aspect_ratio < 1.5);
}

#[test]
fn locate_is_deterministic() {
    let frame = board_frame(100, 80, 300, 260);
    let locator = BoardLocator::default();
    assert_eq!(locator.locate(&frame), locator.locate(&frame));
}

#[test]
fn flat_frame_has_no_board() {
    let frame = Frame::new(RgbImage::from_pixel(320, 240, Rgb([90, 90, 90])));
    assert!(BoardLocator::default().locate(&frame).is_none());
    assert!(BoardLocator::default().candidates(&frame).is_empty());
}

#[test]
fn small_patch_is_not_a_board() {
    let frame = board_frame(300, 200, 40, 40);
    assert!(BoardLocator::default().locate(&frame).is_none());
}

#[test]
fn located_board_drives_zoom() {
    let frame = board_frame(180, 130, 280, 215);
    let board = BoardLocator::default().locate(&frame).expect("board");
    let planner = ZoomPlanner::default();

    let level = planner.plan(frame.size(), &board.bounding_box);
    assert!(level > 1.0 && level <= 4.0, "level {level}");

    let zoomed = planner.apply_zoom(&frame, level);
    assert_eq!(zoomed.size(), frame.size());
    assert_eq!(zoomed.captured_at(), frame.captured_at());
}
