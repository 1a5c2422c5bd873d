//! Planar YUV 4:2:0 to packed RGB24 conversion.
//!
//! Fixed-point BT.601 full-swing conversion. Strides are honored so the
//! planes can come straight from the decoder without a repack pass.

/// One source plane: pixel data plus its line stride.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    pub stride: usize,
}

/// Convert YUV420p planes into `out` as packed RGB24.
///
/// `out` is resized to `width * height * 3`. Chroma planes are half
/// resolution in both dimensions.
pub fn yuv420_to_rgb24(y: Plane, u: Plane, v: Plane, width: usize, height: usize, out: &mut Vec<u8>) {
    out.resize(width * height * 3, 0);

    for row in 0..height {
        let y_row = &y.data[row * y.stride..];
        let u_row = &u.data[(row / 2) * u.stride..];
        let v_row = &v.data[(row / 2) * v.stride..];
        let out_row = &mut out[row * width * 3..(row + 1) * width * 3];

        for col in 0..width {
            let yv = y_row[col] as i32;
            let uv = u_row[col / 2] as i32 - 128;
            let vv = v_row[col / 2] as i32 - 128;

            // BT.601: R = Y + 1.402 V, G = Y - 0.344 U - 0.714 V, B = Y + 1.772 U
            let r = yv + ((91_881 * vv) >> 16);
            let g = yv - ((22_554 * uv + 46_802 * vv) >> 16);
            let b = yv + ((116_130 * uv) >> 16);

            let px = &mut out_row[col * 3..col * 3 + 3];
            px[0] = r.clamp(0, 255) as u8;
            px[1] = g.clamp(0, 255) as u8;
            px[2] = b.clamp(0, 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert_uniform(y: u8, u: u8, v: u8) -> [u8; 3] {
        let yp = [y; 4];
        let up = [u; 1];
        let vp = [v; 1];
        let mut out = Vec::new();
        yuv420_to_rgb24(
            Plane { data: &yp, stride: 2 },
            Plane { data: &up, stride: 1 },
            Plane { data: &vp, stride: 1 },
            2,
            2,
            &mut out,
        );
        [out[0], out[1], out[2]]
    }

    #[test]
    fn black_and_white() {
        assert_eq!(convert_uniform(0, 128, 128), [0, 0, 0]);
        assert_eq!(convert_uniform(255, 128, 128), [255, 255, 255]);
    }

    #[test]
    fn neutral_chroma_is_grayscale() {
        let [r, g, b] = convert_uniform(100, 128, 128);
        assert_eq!((r, g, b), (100, 100, 100));
    }

    #[test]
    fn red_chroma_pushes_red() {
        let [r, g, b] = convert_uniform(128, 128, 255);
        assert!(r > 240, "r = {r}");
        assert!(g < 128);
        assert_eq!(b, 128);
    }

    #[test]
    fn blue_chroma_pushes_blue() {
        let [r, g, b] = convert_uniform(128, 255, 128);
        assert_eq!(r, 128);
        assert!(g < 128);
        assert!(b > 240, "b = {b}");
    }

    #[test]
    fn output_has_rgb24_size() {
        let y = vec![128u8; 8 * 6];
        let u = vec![128u8; 4 * 3];
        let v = vec![128u8; 4 * 3];
        let mut out = Vec::new();
        yuv420_to_rgb24(
            Plane { data: &y, stride: 8 },
            Plane { data: &u, stride: 4 },
            Plane { data: &v, stride: 4 },
            8,
            6,
            &mut out,
        );
        assert_eq!(out.len(), 8 * 6 * 3);
    }

    #[test]
    fn strides_larger_than_width_are_skipped() {
        // 2x2 luma stored with stride 4; padding bytes must not leak in
        let y = [10, 20, 0xAA, 0xAA, 30, 40, 0xAA, 0xAA];
        let u = [128u8, 0xAA];
        let v = [128u8, 0xAA];
        let mut out = Vec::new();
        yuv420_to_rgb24(
            Plane { data: &y, stride: 4 },
            Plane { data: &u, stride: 2 },
            Plane { data: &v, stride: 2 },
            2,
            2,
            &mut out,
        );
        assert_eq!(&out[0..3], &[10, 10, 10]);
        assert_eq!(&out[9..12], &[40, 40, 40]);
    }
}
