// ============================================================================
// COMPOSITOR: flattens the layer stack into one display buffer
// ============================================================================

use image::Rgba;

use crate::canvas::{BlendMode, Layer, PixelBuffer, PixelRegion};
use crate::config::Background;
use crate::ops::transform::{Affine, draw_transformed};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Compositor {
    pub background: Background,
}

impl Compositor {
    pub fn new(background: Background) -> Self {
        Self { background }
    }

    /// Render every visible layer, bottom to top, onto a `width`×`height`
    /// buffer initialised with the background.
    pub fn render(&self, layers: &[Layer], width: u32, height: u32) -> PixelBuffer {
        self.render_region(layers, PixelRegion::full(width.max(1), height.max(1)))
    }

    /// Render only `region` of the canvas.  The result is region-sized, with
    /// its origin at `(region.x, region.y)`.
    pub fn render_region(&self, layers: &[Layer], region: PixelRegion) -> PixelBuffer {
        let mut out = PixelBuffer::new_filled(region.width, region.height, Rgba(self.background.color()));
        let shift = Affine::translate(-(region.x as f32), -(region.y as f32));
        for layer in layers.iter().filter(|l| l.visible && l.opacity > 0.0) {
            let m = layer.matrix().then(&shift);
            draw_transformed(&mut out, &layer.pixels, &m, layer.opacity, layer.blend_mode);
        }
        out
    }

    /// Composited colour of a single canvas pixel.
    pub fn sample(&self, layers: &[Layer], x: u32, y: u32) -> Rgba<u8> {
        self.render_region(layers, PixelRegion::new(x, y, 1, 1)).get_pixel(0, 0)
    }
}

/// Straight-alpha source-over with the blend mode applied to the colour
/// channels.  `opacity` scales the top pixel's alpha.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    // Fully transparent top pixel: nothing to blend
    if top[3] == 0 {
        return base;
    }

    // Opaque Normal at full opacity overwrites
    if matches!(mode, BlendMode::Normal) && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);

    let base_r = base[0] as f32 / 255.0;
    let base_g = base[1] as f32 / 255.0;
    let base_b = base[2] as f32 / 255.0;
    let base_a = base[3] as f32 / 255.0;

    let top_r = top[0] as f32 / 255.0;
    let top_g = top[1] as f32 / 255.0;
    let top_b = top[2] as f32 / 255.0;
    let top_a = (top[3] as f32 / 255.0) * opacity;

    let (r, g, b) = match mode {
        BlendMode::Normal => (top_r, top_g, top_b),
        BlendMode::Multiply => (base_r * top_r, base_g * top_g, base_b * top_b),
        BlendMode::Screen => (
            1.0 - (1.0 - base_r) * (1.0 - top_r),
            1.0 - (1.0 - base_g) * (1.0 - top_g),
            1.0 - (1.0 - base_b) * (1.0 - top_b),
        ),
        BlendMode::Overlay => (
            overlay_channel(base_r, top_r),
            overlay_channel(base_g, top_g),
            overlay_channel(base_b, top_b),
        ),
        BlendMode::Darken => (base_r.min(top_r), base_g.min(top_g), base_b.min(top_b)),
        BlendMode::Lighten => (base_r.max(top_r), base_g.max(top_g), base_b.max(top_b)),
        BlendMode::Add => (
            (base_r + top_r).min(1.0),
            (base_g + top_g).min(1.0),
            (base_b + top_b).min(1.0),
        ),
    };

    // Over a transparent base the mode has nothing to act on.
    let (r, g, b) = if base_a == 0.0 { (top_r, top_g, top_b) } else { (r, g, b) };

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a == 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let out_r = (r * top_a + base_r * base_a * (1.0 - top_a)) / out_a;
    let out_g = (g * top_a + base_g * base_a * (1.0 - top_a)) / out_a;
    let out_b = (b * top_a + base_b * base_a * (1.0 - top_a)) / out_a;

    Rgba([
        (out_r * 255.0).clamp(0.0, 255.0) as u8,
        (out_g * 255.0).clamp(0.0, 255.0) as u8,
        (out_b * 255.0).clamp(0.0, 255.0) as u8,
        (out_a * 255.0).clamp(0.0, 255.0) as u8,
    ])
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::LayerTransform;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn solid(name: &str, color: Rgba<u8>) -> Layer {
        Layer::new(name, 4, 4, color)
    }

    #[test]
    fn half_opacity_red_over_white() {
        let mut top = solid("top", RED);
        top.opacity = 0.5;
        let out = Compositor::default().render(&[solid("bg", WHITE), top], 4, 4);
        assert_eq!(out.get_pixel(2, 2), Rgba([255, 127, 127, 255]));
    }

    #[test]
    fn hidden_layers_are_skipped() {
        let mut top = solid("top", RED);
        top.visible = false;
        let out = Compositor::new(Background::Transparent).render(&[top], 4, 4);
        assert_eq!(out.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn blend_modes_follow_channel_formulas() {
        let base = Rgba([255, 0, 255, 255]);
        let top = Rgba([0, 255, 255, 255]);
        assert_eq!(blend_pixel(base, top, BlendMode::Darken, 1.0), Rgba([0, 0, 255, 255]));
        assert_eq!(blend_pixel(base, top, BlendMode::Lighten, 1.0), WHITE);
        assert_eq!(blend_pixel(base, top, BlendMode::Add, 1.0), WHITE);
        let m = blend_pixel(WHITE, RED, BlendMode::Multiply, 1.0);
        assert_eq!(m, RED);
        let s = blend_pixel(RED, Rgba([0, 0, 255, 255]), BlendMode::Screen, 1.0);
        assert_eq!(s, Rgba([255, 0, 255, 255]));
    }

    #[test]
    fn translated_layer_lands_offset() {
        let mut dot = Layer::new("dot", 2, 2, Rgba([0, 0, 0, 0]));
        dot.pixels.put_pixel(0, 0, RED);
        dot.transform = LayerTransform::translation(3.0, 1.0);
        let out = Compositor::new(Background::Transparent).render(&[dot], 8, 8);
        assert_eq!(out.get_pixel(3, 1), RED);
        assert_eq!(out.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn region_render_matches_full_render() {
        let mut top = solid("top", RED);
        top.opacity = 0.25;
        top.blend_mode = BlendMode::Overlay;
        let layers = [solid("bg", Rgba([30, 60, 90, 255])), top];
        let c = Compositor::default();
        let full = c.render(&layers, 4, 4);
        let part = c.render_region(&layers, PixelRegion::new(1, 2, 2, 2));
        assert_eq!(part.get_pixel(0, 0), full.get_pixel(1, 2));
        assert_eq!(c.sample(&layers, 3, 3), full.get_pixel(3, 3));
    }
}
