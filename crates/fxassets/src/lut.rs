use image::{Rgba, RgbaImage};

/// Levels per channel in the 8x8-tile LUT layout.
pub const LUT_LEVELS: u32 = 64;
/// Side of the square LUT image.
pub const LUT_SIZE: u32 = 512;

/// A 512x512 LUT that maps every color to itself.
///
/// Tile `(bx, by)` holds blue level `by * 8 + bx`; inside a tile x is the red
/// level and y the green level.
pub fn identity_lut64() -> RgbaImage {
    let tile = LUT_SIZE / 8;
    let level = |v: u32| ((v * 255 + (LUT_LEVELS - 1) / 2) / (LUT_LEVELS - 1)) as u8;
    RgbaImage::from_fn(LUT_SIZE, LUT_SIZE, |x, y| {
        let blue = (y / tile) * 8 + x / tile;
        Rgba([level(x % tile), level(y % tile), level(blue), 255])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_lut_corners() {
        let lut = identity_lut64();
        assert_eq!(lut.dimensions(), (512, 512));
        assert_eq!(lut.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(lut.get_pixel(63, 63).0, [255, 255, 0, 255]);
        assert_eq!(lut.get_pixel(511, 511).0, [255, 255, 255, 255]);
        assert_eq!(lut.get_pixel(64, 0).0[2], 4);
    }
}
