//! Integration tests for the focus-following camera.
//!
//! Covers single-focus edge clamping, multi-focus zoom framing, vertical
//! flipping, and bounds properties over random focus sets.

use proptest::prelude::*;
use tilerun_core::geometry::Rect;
use tilerun_engine::camera::Camera;

const WORLD: f32 = 1000.0;

fn camera() -> Camera {
    Camera::new(100.0, 100.0, 20.0)
}

// ---------------------------------------------------------------------------
// Single focus
// ---------------------------------------------------------------------------

#[test]
fn single_focus_centres_away_from_edges() {
    let mut cam = camera();
    cam.update(&[Rect::new(45.0, 45.0, 10.0, 10.0)], WORLD, WORLD);
    assert_eq!(cam.translation(), (50.0, 50.0));
}

#[test]
fn single_focus_clamps_at_world_edge() {
    let mut cam = camera();
    cam.update(&[Rect::new(5.0, 5.0, 0.0, 0.0)], WORLD, WORLD);
    assert_eq!(cam.translation(), (50.0, 50.0));

    cam.update(&[Rect::new(998.0, 990.0, 0.0, 0.0)], WORLD, WORLD);
    assert_eq!(cam.translation(), (950.0, 950.0));
}

#[test]
fn single_focus_in_world_smaller_than_viewport_pins_far_edge() {
    let mut cam = camera();
    cam.update(&[Rect::new(10.0, 10.0, 1.0, 1.0)], 60.0, 60.0);
    // Lower bound applied first, then the (negative) upper bound wins.
    assert_eq!(cam.translation(), (10.0, 10.0));
}

// ---------------------------------------------------------------------------
// Multi focus
// ---------------------------------------------------------------------------

#[test]
fn two_focus_entities_zoom_out_to_fit() {
    let mut cam = camera();
    let focus = [
        Rect::new(0.0, 0.0, 10.0, 10.0),
        Rect::new(200.0, 200.0, 10.0, 10.0),
    ];
    cam.update(&focus, WORLD, WORLD);
    assert!((cam.zoom() - 2.5).abs() < 1e-6, "zoom was {}", cam.zoom());
    assert_eq!(cam.translation(), (125.0, 125.0));
}

#[test]
fn close_focus_entities_never_zoom_in() {
    let mut cam = camera();
    let focus = [
        Rect::new(500.0, 500.0, 5.0, 5.0),
        Rect::new(510.0, 505.0, 5.0, 5.0),
    ];
    cam.update(&focus, WORLD, WORLD);
    assert_eq!(cam.zoom(), 1.0);
}

#[test]
fn wide_focus_box_zooms_by_width() {
    let mut cam = camera();
    let focus = [
        Rect::new(100.0, 500.0, 10.0, 10.0),
        Rect::new(400.0, 520.0, 10.0, 10.0),
    ];
    cam.update(&focus, WORLD, WORLD);
    // 310 wide plus 40 padding, over a 100-unit viewport.
    assert!((cam.zoom() - 3.5).abs() < 1e-6, "zoom was {}", cam.zoom());
}

#[test]
fn losing_focus_entities_switches_back_to_single_mode() {
    let mut cam = camera();
    let a = Rect::new(0.0, 0.0, 10.0, 10.0);
    let b = Rect::new(200.0, 200.0, 10.0, 10.0);
    cam.update(&[a, b], WORLD, WORLD);
    let zoom = cam.zoom();

    cam.update(&[Rect::new(495.0, 495.0, 10.0, 10.0)], WORLD, WORLD);
    assert_eq!(cam.translation(), (500.0, 500.0));
    assert_eq!(cam.zoom(), zoom, "single mode leaves the zoom alone");
}

// ---------------------------------------------------------------------------
// Orientation
// ---------------------------------------------------------------------------

#[test]
fn flipping_twice_restores_orientation() {
    let mut cam = camera();
    let before = cam.frame();
    cam.flip_vertical();
    assert!(cam.is_flipped());
    assert!(cam.frame().flip_y);
    cam.flip_vertical();
    assert!(!cam.is_flipped());
    assert_eq!(cam.frame(), before);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

fn focus_rect() -> impl Strategy<Value = Rect> {
    (0.0f32..990.0, 0.0f32..990.0, 1.0f32..10.0, 1.0f32..10.0)
        .prop_map(|(x, y, w, h)| Rect::new(x, y, w, h))
}

proptest! {
    #[test]
    fn multi_focus_zoom_is_at_least_one(focus in prop::collection::vec(focus_rect(), 2..6)) {
        let mut cam = camera();
        cam.update(&focus, WORLD, WORLD);
        prop_assert!(cam.zoom() >= 1.0);
    }

    #[test]
    fn translation_stays_inside_world(focus in prop::collection::vec(focus_rect(), 1..6)) {
        let mut cam = camera();
        cam.update(&focus, WORLD, WORLD);
        let (tx, ty) = cam.translation();
        prop_assert!((0.0..=WORLD).contains(&tx), "tx = {}", tx);
        prop_assert!((0.0..=WORLD).contains(&ty), "ty = {}", ty);
    }

    #[test]
    fn multi_focus_view_stays_inside_world(focus in prop::collection::vec(focus_rect(), 2..6)) {
        let mut cam = camera();
        cam.update(&focus, WORLD, WORLD);
        let (tx, ty) = cam.translation();
        let half = 50.0 * cam.zoom();
        if half * 2.0 < WORLD {
            prop_assert!(tx - half >= -1e-3 && tx + half <= WORLD + 1e-3);
            prop_assert!(ty - half >= -1e-3 && ty + half <= WORLD + 1e-3);
        }
    }
}
