use gesso::{PixelBuffer, Selection, flood_fill};
use image::Rgba;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[test]
fn white_square_turns_red() {
    let mut buf = PixelBuffer::new_filled(10, 10, WHITE);
    let region = flood_fill(&mut buf, (5, 5), RED, 0, None).expect("fill happened");
    assert_eq!((region.x, region.y, region.width, region.height), (0, 0, 10, 10));
    for y in 0..10 {
        for x in 0..10 {
            assert_eq!(buf.get_pixel(x, y), RED);
        }
    }
}

#[test]
fn exact_fill_stays_inside_its_wall() {
    // A black ring from (2,2) to (7,7) encloses a 4x4 white interior.
    let mut buf = PixelBuffer::new_filled(10, 10, WHITE);
    for i in 2..=7 {
        buf.put_pixel(i, 2, BLACK);
        buf.put_pixel(i, 7, BLACK);
        buf.put_pixel(2, i, BLACK);
        buf.put_pixel(7, i, BLACK);
    }
    let before = buf.clone();
    let region = flood_fill(&mut buf, (4, 4), RED, 0, None).expect("fill happened");
    assert_eq!((region.x, region.y, region.width, region.height), (3, 3, 4, 4));

    for y in 0..10 {
        for x in 0..10 {
            let inside = (3..=6).contains(&x) && (3..=6).contains(&y);
            if inside {
                assert_eq!(buf.get_pixel(x, y), RED);
            } else {
                assert_eq!(buf.get_pixel(x, y), before.get_pixel(x, y), "({}, {}) leaked", x, y);
            }
        }
    }
}

#[test]
fn diagonal_gaps_do_not_leak() {
    // 4-connectivity: a diagonal line of black pixels is a wall.
    let mut buf = PixelBuffer::new_filled(6, 6, WHITE);
    for i in 0..6 {
        buf.put_pixel(i, i, BLACK);
    }
    flood_fill(&mut buf, (5, 0), RED, 0, None);
    assert_eq!(buf.get_pixel(5, 0), RED);
    assert_eq!(buf.get_pixel(0, 5), WHITE);
}

#[test]
fn out_of_bounds_or_same_colour_is_a_no_op() {
    let mut buf = PixelBuffer::new_filled(4, 4, RED);
    assert!(flood_fill(&mut buf, (1, 1), RED, 0, None).is_none());
    assert!(flood_fill(&mut buf, (-1, 1), WHITE, 0, None).is_none());
    assert!(flood_fill(&mut buf, (1, 4), WHITE, 0, None).is_none());
    assert_eq!(buf, PixelBuffer::new_filled(4, 4, RED));
}

#[test]
fn tolerance_sums_rgb_difference() {
    let mut buf = PixelBuffer::new_filled(3, 1, WHITE);
    buf.put_pixel(1, 0, Rgba([245, 245, 245, 255])); // 30 away
    buf.put_pixel(2, 0, Rgba([235, 235, 235, 255])); // 60 away from white
    flood_fill(&mut buf, (0, 0), RED, 10, None);
    assert_eq!(buf.get_pixel(1, 0), RED);
    assert_eq!(buf.get_pixel(2, 0), Rgba([235, 235, 235, 255]));
}

#[test]
fn selection_clip_bounds_the_fill() {
    let mut buf = PixelBuffer::new_filled(10, 10, WHITE);
    let clip = Selection::from_drag(egui::pos2(0.0, 0.0), egui::pos2(5.0, 10.0));
    flood_fill(&mut buf, (1, 1), RED, 0, Some(&clip));
    assert_eq!(buf.get_pixel(4, 9), RED);
    assert_eq!(buf.get_pixel(5, 0), WHITE);
}
