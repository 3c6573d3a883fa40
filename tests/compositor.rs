use gesso::{Background, BlendMode, Compositor, Layer, LayerTransform};
use image::Rgba;

#[test]
fn half_opacity_red_over_white() {
    let mut red = Layer::new("red", 4, 4, Rgba([255, 0, 0, 255]));
    red.opacity = 0.5;
    let layers = vec![Layer::new("bg", 4, 4, Rgba([255, 255, 255, 255])), red];
    let out = Compositor::default().render(&layers, 4, 4);
    assert_eq!(out.get_pixel(2, 2), Rgba([255, 127, 127, 255]));
}

#[test]
fn hidden_layers_are_skipped() {
    let mut top = Layer::new("top", 2, 2, Rgba([0, 0, 0, 255]));
    top.visible = false;
    let layers = vec![top];
    let out = Compositor::new(Background::Opaque([0, 255, 0, 255])).render(&layers, 2, 2);
    assert_eq!(out.get_pixel(0, 0), Rgba([0, 255, 0, 255]));
}

#[test]
fn transparent_background_stays_clear() {
    let layers = vec![Layer::new("empty", 3, 3, Rgba([0, 0, 0, 0]))];
    let out = Compositor::new(Background::Transparent).render(&layers, 3, 3);
    assert_eq!(out.get_pixel(1, 1)[3], 0);
}

#[test]
fn integer_translation_is_pixel_exact() {
    let mut layer = Layer::new("dot", 4, 4, Rgba([0, 0, 0, 0]));
    layer.pixels.put_pixel(0, 0, Rgba([12, 34, 56, 255]));
    layer.pixels.put_pixel(3, 3, Rgba([200, 100, 50, 255]));
    layer.transform = LayerTransform::translation(3.0, 2.0);
    let out = Compositor::new(Background::Transparent).render(&[layer], 8, 8);
    assert_eq!(out.get_pixel(3, 2), Rgba([12, 34, 56, 255]));
    assert_eq!(out.get_pixel(6, 5), Rgba([200, 100, 50, 255]));
    assert_eq!(out.get_pixel(2, 2)[3], 0);
}

#[test]
fn multiply_and_screen_modes() {
    let magenta = Rgba([255, 0, 255, 255]);
    let cyan = Rgba([0, 255, 255, 255]);

    let mut mul = Layer::new("mul", 1, 1, cyan);
    mul.blend_mode = BlendMode::Multiply;
    let out = Compositor::default().render(&[Layer::new("bg", 1, 1, magenta), mul], 1, 1);
    assert_eq!(out.get_pixel(0, 0), Rgba([0, 0, 255, 255]));

    let mut scr = Layer::new("scr", 1, 1, cyan);
    scr.blend_mode = BlendMode::Screen;
    let out = Compositor::default().render(&[Layer::new("bg", 1, 1, magenta), scr], 1, 1);
    assert_eq!(out.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
}
