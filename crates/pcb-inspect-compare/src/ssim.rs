//! Mean structural similarity with a uniform window.
//!
//! Local statistics use a `win × win` box window with reflected borders and
//! sample-covariance normalisation (`N / (N - 1)`). The scalar score is the
//! mean of the local map after dropping a `win / 2` border, so it only
//! averages windows that lie fully inside the image.

use image::GrayImage;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsimParams {
    /// Odd window side length.
    pub window: u32,
    pub k1: f64,
    pub k2: f64,
    /// Dynamic range of the pixel values.
    pub data_range: f64,
}

impl Default for SsimParams {
    fn default() -> Self {
        Self {
            window: 7,
            k1: 0.01,
            k2: 0.03,
            data_range: 255.0,
        }
    }
}

/// Per-pixel local similarity.
#[derive(Clone, Debug, PartialEq)]
pub struct SsimMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl SsimMap {
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.width + x) as usize]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ssim {
    pub score: f64,
    pub map: SsimMap,
}

/// SSIM of two equally sized images.
///
/// Returns `None` when the sizes differ or either side is shorter than the
/// window (after forcing it odd and at least 3).
pub fn ssim(a: &GrayImage, b: &GrayImage, params: &SsimParams) -> Option<Ssim> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let (w, h) = a.dimensions();
    let win = params.window.max(3) | 1;
    if w < win || h < win {
        return None;
    }

    let pad = (win / 2) as usize;
    let (w, h) = (w as usize, h as usize);
    let n = (win * win) as f64;
    let cov_norm = n / (n - 1.0);
    let c1 = (params.k1 * params.data_range).powi(2);
    let c2 = (params.k2 * params.data_range).powi(2);

    let sums = WindowSums::new(a, b, pad);
    let mut values = Vec::with_capacity(w * h);
    let mut interior = 0.0_f64;

    for y in 0..h {
        for x in 0..w {
            let [sx, sy, sxx, syy, sxy] = sums.window(x, y, win as usize);
            let ux = sx / n;
            let uy = sy / n;
            let vx = cov_norm * (sxx / n - ux * ux);
            let vy = cov_norm * (syy / n - uy * uy);
            let vxy = cov_norm * (sxy / n - ux * uy);

            let s = ((2.0 * ux * uy + c1) * (2.0 * vxy + c2))
                / ((ux * ux + uy * uy + c1) * (vx + vy + c2));
            if (pad..w - pad).contains(&x) && (pad..h - pad).contains(&y) {
                interior += s;
            }
            values.push(s as f32);
        }
    }

    let count = ((w - 2 * pad) * (h - 2 * pad)) as f64;
    Some(Ssim {
        score: interior / count,
        map: SsimMap {
            width: w as u32,
            height: h as u32,
            values,
        },
    })
}

/// Summed-area tables of `x`, `y`, `x²`, `y²` and `xy` over the reflect-padded
/// inputs.
struct WindowSums {
    stride: usize,
    tables: [Vec<f64>; 5],
}

impl WindowSums {
    fn new(a: &GrayImage, b: &GrayImage, pad: usize) -> Self {
        let (w, h) = (a.width() as usize, a.height() as usize);
        let pw = w + 2 * pad;
        let ph = h + 2 * pad;
        let stride = pw + 1;
        let mut tables: [Vec<f64>; 5] = std::array::from_fn(|_| vec![0.0; stride * (ph + 1)]);

        for py in 0..ph {
            let sy = reflect(py as isize - pad as isize, h) as u32;
            let mut row = [0.0_f64; 5];
            for px in 0..pw {
                let sx = reflect(px as isize - pad as isize, w) as u32;
                let x = a.get_pixel(sx, sy)[0] as f64;
                let y = b.get_pixel(sx, sy)[0] as f64;
                for (acc, v) in row.iter_mut().zip([x, y, x * x, y * y, x * y]) {
                    *acc += v;
                }
                let at = (py + 1) * stride + px + 1;
                let above = py * stride + px + 1;
                for (t, r) in tables.iter_mut().zip(row) {
                    t[at] = t[above] + r;
                }
            }
        }
        Self { stride, tables }
    }

    /// Sums over the padded window whose top-left corner is `(x, y)`, which is
    /// the window centred on original pixel `(x, y)`.
    #[inline]
    fn window(&self, x: usize, y: usize, win: usize) -> [f64; 5] {
        let s = self.stride;
        let (x1, y1) = (x + win, y + win);
        std::array::from_fn(|k| {
            let t = &self.tables[k];
            t[y1 * s + x1] - t[y * s + x1] - t[y1 * s + x] + t[y * s + x]
        })
    }
}

/// Half-sample symmetric reflection: `d c b a | a b c d | d c b a`.
#[inline]
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let r = if i < 0 {
        -i - 1
    } else if i >= n {
        2 * n - i - 1
    } else {
        i
    };
    r.clamp(0, n - 1) as usize
}
