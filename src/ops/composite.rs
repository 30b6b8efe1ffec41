// ============================================================================
// MASK COMPOSITOR: masks + images -> new derived images
// ============================================================================
//
// Every function here is pure: inputs are borrowed, a fresh DerivedImage is
// returned, and an error leaves nothing half-written. Alpha is only ever
// lowered by a mask, except where `overlay` deliberately draws an extracted
// addition on top of its base.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{
    DerivedImage, ImagePlacement, MARK_THRESHOLD, MAX_SCALE_SKEW, Mask, Operation, Resolution,
};
use crate::error::{MattingError, Result};

/// How a mask gates the alpha channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MaskPolicy {
    /// Keep marked pixels; unmarked pixels become transparent.
    #[default]
    Filter,
    /// Keep unmarked pixels; marked pixels become transparent.
    Preserve,
}

impl MaskPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter" | "keep" => Some(MaskPolicy::Filter),
            "preserve" | "cut" => Some(MaskPolicy::Preserve),
            _ => None,
        }
    }
}

/// Gate `image`'s alpha with `mask`. A mask at another resolution is mapped
/// on by nearest neighbour; RGB is left untouched.
pub fn apply_filter(image: &DerivedImage, mask: &Mask, policy: MaskPolicy) -> Result<DerivedImage> {
    let mask = mask.remap_to(image.resolution())?;
    let width = image.width() as usize;
    let mut out = image.pixels().clone();

    out.as_mut()
        .par_chunks_mut(width * 4)
        .zip(mask.as_raw().par_chunks(width))
        .for_each(|(row, mask_row)| {
            for (px, &m) in row.chunks_exact_mut(4).zip(mask_row) {
                let marked = m >= MARK_THRESHOLD;
                let clear = match policy {
                    MaskPolicy::Filter => !marked,
                    MaskPolicy::Preserve => marked,
                };
                if clear {
                    px[3] = 0;
                }
            }
        });

    let operation = match policy {
        MaskPolicy::Filter => Operation::Filter,
        MaskPolicy::Preserve => Operation::Preserve,
    };
    Ok(DerivedImage::derive(out, operation, mask.strokes().to_vec(), &[image]))
}

/// Make the pixels of `base` under a display-resolution `mask` transparent.
///
/// The mask covers the image as displayed by `placement`; each base pixel
/// centre is mapped through the placement's horizontal and vertical scale
/// to find the mask pixel above it.
pub fn apply_erase(
    base: &DerivedImage,
    mask: &Mask,
    placement: &ImagePlacement,
) -> Result<DerivedImage> {
    let base_res = base.resolution();
    let mismatch = || MattingError::ResolutionMismatch {
        from_width: mask.width(),
        from_height: mask.height(),
        to_width: base_res.width,
        to_height: base_res.height,
    };

    let (fx, fy) = match placement.display_size() {
        Ok((dw, dh)) => {
            let fits = |m: u32, d: f32| (m as f32 - d).abs() <= 1.0 + d * MAX_SCALE_SKEW;
            if !fits(mask.width(), dw) || !fits(mask.height(), dh) {
                return Err(mismatch());
            }
            (dw / base_res.width as f32, dh / base_res.height as f32)
        }
        Err(e) => {
            log::warn!("{}; mapping erase mask by raster size", e);
            (
                mask.width() as f32 / base_res.width as f32,
                mask.height() as f32 / base_res.height as f32,
            )
        }
    };

    let width = base_res.width as usize;
    let mut out = base.pixels().clone();
    out.as_mut()
        .par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let my = ((y as f32 + 0.5) * fy) as u32;
            if my >= mask.height() {
                return;
            }
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let mx = ((x as f32 + 0.5) * fx) as u32;
                if mx < mask.width() && mask.is_marked(mx, my) {
                    px[3] = 0;
                }
            }
        });

    Ok(DerivedImage::derive(out, Operation::Erase, mask.strokes().to_vec(), &[base]))
}

/// Extract `addition` through `mask` and draw it over `base`.
///
/// The output canvas is the component-wise larger of the two resolutions and
/// both layers are scaled up to it, never down. Base pixels stay as they were
/// (transparent ones included) except where the extracted addition covers
/// them.
pub fn overlay(base: &DerivedImage, addition: &DerivedImage, mask: &Mask) -> Result<DerivedImage> {
    let selection = apply_filter(addition, mask, MaskPolicy::Filter)?;
    let canvas = base.resolution().max(selection.resolution());

    let mut out = upscale(base.pixels(), canvas);
    let top = upscale(selection.pixels(), canvas);
    let row_bytes = canvas.width as usize * 4;

    out.as_mut()
        .par_chunks_mut(row_bytes)
        .zip(top.as_raw().par_chunks(row_bytes))
        .for_each(|(dst, src)| {
            for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                let blended = source_over(Rgba([d[0], d[1], d[2], d[3]]), Rgba([s[0], s[1], s[2], s[3]]));
                d.copy_from_slice(&blended.0);
            }
        });

    log::debug!(
        "overlay {} onto {} -> {}",
        addition.resolution(),
        base.resolution(),
        canvas
    );
    Ok(DerivedImage::derive(
        out,
        Operation::Overlay,
        mask.strokes().to_vec(),
        &[base, addition],
    ))
}

/// Composite `image` over an opaque background colour.
pub fn flatten_onto(image: &DerivedImage, background: Rgba<u8>) -> DerivedImage {
    let mut out = image.pixels().clone();
    out.as_mut().par_chunks_mut(4).for_each(|px| {
        let blended = source_over(background, Rgba([px[0], px[1], px[2], px[3]]));
        px.copy_from_slice(&blended.0);
    });
    DerivedImage::derive(out, Operation::Flatten, Vec::new(), &[image])
}

fn upscale(image: &RgbaImage, canvas: Resolution) -> RgbaImage {
    if Resolution::of(image) == canvas {
        image.clone()
    } else {
        imageops::resize(image, canvas.width, canvas.height, FilterType::Nearest)
    }
}

/// Straight-alpha "over" compositing.
fn source_over(base: Rgba<u8>, top: Rgba<u8>) -> Rgba<u8> {
    if top[3] == 0 {
        return base;
    }
    if top[3] == 255 || base[3] == 0 {
        return top;
    }

    let top_a = top[3] as f32 / 255.0;
    let base_a = base[3] as f32 / 255.0 * (1.0 - top_a);
    let out_a = top_a + base_a;
    let channel = |i: usize| {
        ((top[i] as f32 * top_a + base[i] as f32 * base_a) / out_a)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}
