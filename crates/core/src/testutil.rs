//! Synthetic screens shared by unit tests.

use image::{imageops, GrayImage, Luma};

/// Smooth, non-periodic test card: a few blobs over a gradient.
pub fn card(w: u32, h: u32) -> GrayImage {
    let blobs = [(40.0, 30.0, 9.0, 120.0), (130.0, 70.0, 14.0, -90.0), (90.0, 120.0, 11.0, 100.0)];
    GrayImage::from_fn(w, h, |x, y| {
        let (fx, fy) = (x as f64, y as f64);
        let mut v = 40.0 + 0.4 * fx + 0.2 * fy;
        for (cx, cy, s, a) in blobs {
            v += a * (-((fx - cx).powi(2) + (fy - cy).powi(2)) / (2.0 * s * s)).exp();
        }
        Luma([v.clamp(0.0, 255.0) as u8])
    })
}

/// Hashed noise glyph, distinct per `seed`.
pub fn glyph(w: u32, h: u32, seed: u32) -> GrayImage {
    GrayImage::from_fn(w, h, |x, y| {
        let mut v = x
            .wrapping_mul(374_761_393)
            .wrapping_add(y.wrapping_mul(668_265_263))
            .wrapping_add(seed.wrapping_mul(2_246_822_519));
        v = (v ^ (v >> 13)).wrapping_mul(1_274_126_177);
        Luma([((v ^ (v >> 16)) & 0xff) as u8])
    })
}

/// Copy `tpl` onto `screen` at (x, y).
pub fn paste(screen: &mut GrayImage, tpl: &GrayImage, x: u32, y: u32) {
    imageops::replace(screen, tpl, x as i64, y as i64);
}

/// Flat grey screen.
pub fn blank(w: u32, h: u32) -> GrayImage {
    GrayImage::from_pixel(w, h, Luma([30]))
}
