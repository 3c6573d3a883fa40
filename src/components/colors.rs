// HSV helpers for the brush colour.  Hue is in 0..1, saturation and value in 0..1.

pub(crate) fn color_to_hsv(color: [u8; 4]) -> [f32; 3] {
    let r = color[0] as f32 / 255.0;
    let g = color[1] as f32 / 255.0;
    let b = color[2] as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let d = max - min;

    let h = if d == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / d % 6.0) / 6.0
    } else if max == g {
        (((b - r) / d) + 2.0) / 6.0
    } else {
        (((r - g) / d) + 4.0) / 6.0
    };
    let h = if h < 0.0 { h + 1.0 } else { h };
    let s = if max == 0.0 { 0.0 } else { d / max };
    [h, s, max]
}

pub(crate) fn hsv_to_color(h: f32, s: f32, v: f32, a: u8) -> [u8; 4] {
    let h = h.rem_euclid(1.0);
    let h6 = h * 6.0;
    let c = v * s;
    let x = c * (1.0 - ((h6 % 2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h6 as i32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    [
        ((r + m) * 255.0).round().clamp(0.0, 255.0) as u8,
        ((g + m) * 255.0).round().clamp(0.0, 255.0) as u8,
        ((b + m) * 255.0).round().clamp(0.0, 255.0) as u8,
        a,
    ]
}

/// Rotate the hue by `degrees`.  Near-grey colours get a minimum saturation
/// of 50/255 first so the shift is visible.
pub fn shift_hue(color: [u8; 4], degrees: f32) -> [u8; 4] {
    let [h, mut s, v] = color_to_hsv(color);
    if s < 10.0 / 255.0 {
        s = 50.0 / 255.0;
    }
    hsv_to_color(h + degrees / 360.0, s, v, color[3])
}
