//! Pure-Rust pixel resampling kernels for 8-bit interleaved RGB.

/// Bilinear interpolation resize.
pub(crate) fn resize_bilinear(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    let mut dst = vec![0u8; dst_w * dst_h * 3];

    for dst_y in 0..dst_h {
        // Map destination pixel center to source coordinates
        let src_yf = (dst_y as f64 + 0.5) * src_h as f64 / dst_h as f64 - 0.5;
        let src_y0 = src_yf.floor().max(0.0) as usize;
        let src_y1 = (src_y0 + 1).min(src_h - 1);
        let fy = (src_yf - src_y0 as f64).clamp(0.0, 1.0);

        for dst_x in 0..dst_w {
            let src_xf = (dst_x as f64 + 0.5) * src_w as f64 / dst_w as f64 - 0.5;
            let src_x0 = src_xf.floor().max(0.0) as usize;
            let src_x1 = (src_x0 + 1).min(src_w - 1);
            let fx = (src_xf - src_x0 as f64).clamp(0.0, 1.0);

            let di = (dst_y * dst_w + dst_x) * 3;

            for c in 0..3 {
                let p00 = src[(src_y0 * src_w + src_x0) * 3 + c] as f64;
                let p10 = src[(src_y0 * src_w + src_x1) * 3 + c] as f64;
                let p01 = src[(src_y1 * src_w + src_x0) * 3 + c] as f64;
                let p11 = src[(src_y1 * src_w + src_x1) * 3 + c] as f64;

                let top = p00 * (1.0 - fx) + p10 * fx;
                let bot = p01 * (1.0 - fx) + p11 * fx;
                let val = top * (1.0 - fy) + bot * fy;

                dst[di + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    dst
}

/// Catmull-Rom kernel weight (bicubic with a = -0.5).
fn cubic_weight(x: f64) -> f64 {
    let x = x.abs();
    if x <= 1.0 {
        1.5 * x * x * x - 2.5 * x * x + 1.0
    } else if x < 2.0 {
        -0.5 * (x * x * x - 5.0 * x * x + 8.0 * x - 4.0)
    } else {
        0.0
    }
}

/// Bicubic (Catmull-Rom) resize with edge replication.
///
/// Kernel weights sum to one, so a constant field resizes to the same
/// constant.
pub(crate) fn resize_bicubic(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    let mut dst = vec![0u8; dst_w * dst_h * 3];

    let clamp_x = |x: i64| -> usize { x.clamp(0, src_w as i64 - 1) as usize };
    let clamp_y = |y: i64| -> usize { y.clamp(0, src_h as i64 - 1) as usize };

    for dst_y in 0..dst_h {
        let src_yf = (dst_y as f64 + 0.5) * src_h as f64 / dst_h as f64 - 0.5;
        let base_y = src_yf.floor() as i64;
        let ty = src_yf - base_y as f64;
        let wy = [
            cubic_weight(ty + 1.0),
            cubic_weight(ty),
            cubic_weight(1.0 - ty),
            cubic_weight(2.0 - ty),
        ];

        for dst_x in 0..dst_w {
            let src_xf = (dst_x as f64 + 0.5) * src_w as f64 / dst_w as f64 - 0.5;
            let base_x = src_xf.floor() as i64;
            let tx = src_xf - base_x as f64;
            let wx = [
                cubic_weight(tx + 1.0),
                cubic_weight(tx),
                cubic_weight(1.0 - tx),
                cubic_weight(2.0 - tx),
            ];

            let di = (dst_y * dst_w + dst_x) * 3;
            for c in 0..3 {
                let mut acc = 0.0f64;
                for (j, &row_weight) in wy.iter().enumerate() {
                    let sy = clamp_y(base_y - 1 + j as i64);
                    for (i, &col_weight) in wx.iter().enumerate() {
                        let sx = clamp_x(base_x - 1 + i as i64);
                        acc += row_weight
                            * col_weight
                            * src[(sy * src_w + sx) * 3 + c] as f64;
                    }
                }
                dst[di + c] = acc.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    dst
}
