//! Pure image operations used by the drawing phase: partitioning a source
//! image into per-player patches, resizing a submission onto its reference,
//! and scoring shape similarity.
//!
//! Conversion to the single-channel representation is a separate explicit
//! step (`to_single_channel`). `similarity` never converts on its own and
//! rejects anything that is not 8-bit luma.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};

use crate::error::ImageError;

/// Hu moments below this magnitude are ignored when matching shapes
const HU_EPSILON: f64 = 1e-5;

/// Pixel rectangle of one patch inside the source image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Lay out `patches` regions over a `width` x `height` image.
///
/// The image is cut into `ceil(patches / 2)` vertical strips of
/// `width / strips` columns, each holding a top-half and a bottom-half cell.
/// The last strip absorbs the leftover columns. With an odd count the final
/// strip stays whole, so the last patch spans the full image height. The
/// regions tile the image exactly.
pub fn patch_regions(
    width: u32,
    height: u32,
    patches: usize,
) -> Result<Vec<Region>, ImageError> {
    if patches == 0 {
        return Err(ImageError::InvalidPatchCount(patches));
    }
    if patches == 1 {
        return Ok(vec![Region {
            x: 0,
            y: 0,
            width,
            height,
        }]);
    }

    let strips = patches.div_ceil(2);
    if (width as usize) < strips || height < 2 {
        return Err(ImageError::ImageTooSmall {
            patches,
            width,
            height,
        });
    }

    let odd = patches % 2 == 1;
    let half = height / 2;
    let column = width / strips as u32;
    let edge = |index: usize| {
        if index == strips {
            width
        } else {
            column * index as u32
        }
    };

    let regions = (0..patches)
        .map(|i| {
            let strip = i / 2;
            let (x0, x1) = (edge(strip), edge(strip + 1));
            let (y0, y1) = if odd && i + 1 == patches {
                (0, height)
            } else if i % 2 == 0 {
                (0, half)
            } else {
                (half, height)
            };
            Region {
                x: x0,
                y: y0,
                width: x1 - x0,
                height: y1 - y0,
            }
        })
        .collect();

    Ok(regions)
}

/// Split `image` into `patches` sub-images laid out by [`patch_regions`].
/// A single patch is the unchanged source.
pub fn split(image: &DynamicImage, patches: usize) -> Result<Vec<DynamicImage>, ImageError> {
    let (width, height) = image.dimensions();
    if patches == 1 {
        return Ok(vec![image.clone()]);
    }
    let regions = patch_regions(width, height, patches)?;
    Ok(regions
        .iter()
        .map(|r| image.crop_imm(r.x, r.y, r.width, r.height))
        .collect())
}

/// Return `reference` together with `target` scaled to the exact pixel
/// dimensions of `reference`. Neither input is modified.
pub fn resize_to_match(
    reference: &DynamicImage,
    target: &DynamicImage,
) -> (DynamicImage, DynamicImage) {
    let (width, height) = reference.dimensions();
    let resized = if target.dimensions() == (width, height) {
        target.clone()
    } else {
        target.resize_exact(width, height, FilterType::Nearest)
    };
    (reference.clone(), resized)
}

/// Convert any image to the 8-bit single-channel form `similarity` accepts
pub fn to_single_channel(image: &DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(_) => image.clone(),
        other => DynamicImage::ImageLuma8(other.to_luma8()),
    }
}

/// Shape distance between two single-channel images: Hu-moment contour
/// matching, summing `|1/m_a - 1/m_b|` over the log-scaled invariants.
/// Lower is more similar and identical inputs score 0.
///
/// A blank image has no usable invariants, so it scores 0 against anything.
pub fn similarity(a: &DynamicImage, b: &DynamicImage) -> Result<f64, ImageError> {
    let a = luma(a)?;
    let b = luma(b)?;
    Ok(match_shapes(&hu_moments(a), &hu_moments(b)))
}

fn luma(image: &DynamicImage) -> Result<&GrayImage, ImageError> {
    image
        .as_luma8()
        .ok_or_else(|| ImageError::UnsupportedImageFormat(format!("{:?}", image.color())))
}

/// The seven Hu invariants of an intensity image
fn hu_moments(image: &GrayImage) -> [f64; 7] {
    let (mut m00, mut m10, mut m01) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y, pixel) in image.enumerate_pixels() {
        let v = f64::from(pixel.0[0]);
        m00 += v;
        m10 += v * f64::from(x);
        m01 += v * f64::from(y);
    }
    if m00 == 0.0 {
        return [0.0; 7];
    }

    let (cx, cy) = (m10 / m00, m01 / m00);
    let (mut mu20, mut mu11, mut mu02) = (0.0, 0.0, 0.0);
    let (mut mu30, mut mu21, mut mu12, mut mu03) = (0.0, 0.0, 0.0, 0.0);
    for (x, y, pixel) in image.enumerate_pixels() {
        let v = f64::from(pixel.0[0]);
        if v == 0.0 {
            continue;
        }
        let dx = f64::from(x) - cx;
        let dy = f64::from(y) - cy;
        mu20 += v * dx * dx;
        mu11 += v * dx * dy;
        mu02 += v * dy * dy;
        mu30 += v * dx * dx * dx;
        mu21 += v * dx * dx * dy;
        mu12 += v * dx * dy * dy;
        mu03 += v * dy * dy * dy;
    }

    let s2 = m00 * m00;
    let s3 = s2 * m00.sqrt();
    let (n20, n11, n02) = (mu20 / s2, mu11 / s2, mu02 / s2);
    let (n30, n21, n12, n03) = (mu30 / s3, mu21 / s3, mu12 / s3, mu03 / s3);

    let t0 = n30 + n12;
    let t1 = n21 + n03;
    let q0 = n30 - 3.0 * n12;
    let q1 = 3.0 * n21 - n03;

    [
        n20 + n02,
        (n20 - n02).powi(2) + 4.0 * n11 * n11,
        q0 * q0 + q1 * q1,
        t0 * t0 + t1 * t1,
        q0 * t0 * (t0 * t0 - 3.0 * t1 * t1) + q1 * t1 * (3.0 * t0 * t0 - t1 * t1),
        (n20 - n02) * (t0 * t0 - t1 * t1) + 4.0 * n11 * t0 * t1,
        q1 * t0 * (t0 * t0 - 3.0 * t1 * t1) - q0 * t1 * (3.0 * t0 * t0 - t1 * t1),
    ]
}

fn match_shapes(a: &[f64; 7], b: &[f64; 7]) -> f64 {
    let distance: f64 = a
        .iter()
        .zip(b.iter())
        .filter(|(ha, hb)| ha.abs() > HU_EPSILON && hb.abs() > HU_EPSILON)
        .filter_map(|(ha, hb)| {
            let ma = ha.signum() * ha.abs().log10();
            let mb = hb.signum() * hb.abs().log10();
            // |h| == 1 has no finite reciprocal
            if ma == 0.0 || mb == 0.0 {
                None
            } else {
                Some((1.0 / ma - 1.0 / mb).abs())
            }
        })
        .sum();
    // an empty f64 sum is -0.0
    distance + 0.0
}
