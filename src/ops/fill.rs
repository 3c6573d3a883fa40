// ============================================================================
// FLOOD FILL: scanline, 4-connected, with colour tolerance
// ============================================================================

use image::Rgba;

use crate::canvas::{PixelBuffer, PixelRegion, Selection};

#[inline(always)]
fn pix(flat: &[u8], idx: usize) -> [u8; 4] {
    let o = idx * 4;
    [flat[o], flat[o + 1], flat[o + 2], flat[o + 3]]
}

/// Exact RGBA equality at tolerance 0, otherwise summed RGB distance
/// `<= tolerance * 3` (alpha is not compared).
#[inline(always)]
pub fn colors_match(p: [u8; 4], target: [u8; 4], tolerance: u8) -> bool {
    if tolerance == 0 {
        return p == target;
    }
    let dr = (p[0] as i32 - target[0] as i32).unsigned_abs();
    let dg = (p[1] as i32 - target[1] as i32).unsigned_abs();
    let db = (p[2] as i32 - target[2] as i32).unsigned_abs();
    dr + dg + db <= tolerance as u32 * 3
}

/// Fill the region connected to `seed` whose pixels match the seed colour.
/// Pixels outside `clip` never match.  Returns the bounding region of every
/// pixel written, or `None` when nothing changed (seed out of bounds, seed
/// outside the clip, or the seed already has `fill_color`).
pub fn flood_fill(
    buffer: &mut PixelBuffer,
    seed: (i64, i64),
    fill_color: Rgba<u8>,
    tolerance: u8,
    clip: Option<&Selection>,
) -> Option<PixelRegion> {
    let (w, h) = (buffer.width(), buffer.height());
    let (sx, sy) = seed;
    if sx < 0 || sy < 0 || sx >= w as i64 || sy >= h as i64 {
        return None;
    }
    let (sx, sy) = (sx as u32, sy as u32);

    let wu = w as usize;
    let target = buffer.get_pixel(sx, sy).0;
    if target == fill_color.0 {
        return None;
    }
    let clip = clip.filter(|c| !c.is_empty());
    if let Some(c) = clip
        && !c.contains_pixel(sx, sy)
    {
        return None;
    }

    // visited doubles as the "already filled" marker
    let mut visited = vec![false; wu * h as usize];
    let fill = fill_color.0;

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (sx, sy, sx, sy);
    let mut stack: Vec<(u32, u32)> = Vec::with_capacity(1024);
    stack.push((sx, sy));

    let raw = buffer.as_raw_mut();

    let matches = |raw: &[u8], visited: &[bool], x: u32, y: u32| -> bool {
        let idx = y as usize * wu + x as usize;
        !visited[idx]
            && colors_match(pix(raw, idx), target, tolerance)
            && clip.is_none_or(|c| c.contains_pixel(x, y))
    };

    while let Some((x, y)) = stack.pop() {
        if !matches(&*raw, &visited, x, y) {
            continue;
        }

        // Extend the run left and right
        let mut left = x;
        while left > 0 && matches(&*raw, &visited, left - 1, y) {
            left -= 1;
        }
        let mut right = x;
        while right + 1 < w && matches(&*raw, &visited, right + 1, y) {
            right += 1;
        }

        let row = y as usize * wu;
        for px in left..=right {
            visited[row + px as usize] = true;
        }
        raw[(row + left as usize) * 4..(row + right as usize + 1) * 4]
            .chunks_exact_mut(4)
            .for_each(|p| p.copy_from_slice(&fill));

        min_x = min_x.min(left);
        max_x = max_x.max(right);
        min_y = min_y.min(y);
        max_y = max_y.max(y);

        // Seed one entry per matching sub-run in the neighbouring rows
        for ny in [y.checked_sub(1), (y + 1 < h).then_some(y + 1)].into_iter().flatten() {
            let mut in_run = false;
            for px in left..=right {
                if matches(&*raw, &visited, px, ny) {
                    if !in_run {
                        stack.push((px, ny));
                        in_run = true;
                    }
                } else {
                    in_run = false;
                }
            }
        }
    }

    Some(PixelRegion::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::pos2;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    #[test]
    fn fills_uniform_buffer_completely() {
        let mut buf = PixelBuffer::new_filled(10, 10, WHITE);
        let region = flood_fill(&mut buf, (5, 5), RED, 0, None).unwrap();
        assert_eq!(region, PixelRegion::new(0, 0, 10, 10));
        assert!(buf.image().pixels().all(|p| *p == RED));
    }

    #[test]
    fn stops_at_boundaries() {
        // Vertical wall at x = 4 splits the buffer in two
        let mut buf = PixelBuffer::new_filled(10, 6, WHITE);
        for y in 0..6 {
            buf.put_pixel(4, y, BLACK);
        }
        let region = flood_fill(&mut buf, (1, 1), RED, 0, None).unwrap();
        assert_eq!(region, PixelRegion::new(0, 0, 4, 6));
        assert_eq!(buf.get_pixel(4, 2), BLACK);
        assert_eq!(buf.get_pixel(7, 2), WHITE);
    }

    #[test]
    fn wraps_around_concave_shapes() {
        // U-shaped wall; the fill enters the cup from above
        let mut buf = PixelBuffer::new_filled(9, 9, WHITE);
        for y in 2..8 {
            buf.put_pixel(2, y, BLACK);
            buf.put_pixel(6, y, BLACK);
        }
        for x in 2..7 {
            buf.put_pixel(x, 7, BLACK);
        }
        flood_fill(&mut buf, (0, 0), RED, 0, None);
        assert_eq!(buf.get_pixel(4, 6), RED);
        assert_eq!(buf.get_pixel(4, 8), RED);
        assert_eq!(buf.get_pixel(4, 7), BLACK);
    }

    #[test]
    fn tolerance_widens_the_match() {
        let mut buf = PixelBuffer::new_filled(4, 1, WHITE);
        buf.put_pixel(2, 0, Rgba([250, 250, 250, 255]));
        buf.put_pixel(3, 0, Rgba([200, 200, 200, 255]));

        let mut exact = buf.clone();
        flood_fill(&mut exact, (0, 0), RED, 0, None);
        assert_eq!(exact.get_pixel(2, 0), Rgba([250, 250, 250, 255]));

        flood_fill(&mut buf, (0, 0), RED, 10, None);
        assert_eq!(buf.get_pixel(2, 0), RED);
        assert_eq!(buf.get_pixel(3, 0), Rgba([200, 200, 200, 255]));
    }

    #[test]
    fn seed_already_fill_color_is_noop() {
        let mut buf = PixelBuffer::new_filled(3, 3, RED);
        assert!(flood_fill(&mut buf, (1, 1), RED, 32, None).is_none());
        assert!(flood_fill(&mut buf, (-1, 1), WHITE, 0, None).is_none());
        assert!(flood_fill(&mut buf, (3, 0), WHITE, 0, None).is_none());
    }

    #[test]
    fn clip_limits_the_fill() {
        let mut buf = PixelBuffer::new_filled(10, 10, WHITE);
        let clip = Selection::from_drag(pos2(2.0, 2.0), pos2(5.0, 5.0));
        let region = flood_fill(&mut buf, (3, 3), RED, 0, Some(&clip)).unwrap();
        assert_eq!(region, PixelRegion::new(2, 2, 3, 3));
        assert_eq!(buf.get_pixel(1, 1), WHITE);
        assert_eq!(buf.get_pixel(4, 4), RED);
        assert!(flood_fill(&mut buf, (8, 8), RED, 0, Some(&clip)).is_none());
    }
}
