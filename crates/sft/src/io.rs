//! Adapters between the `image` crate and the workspace's grayscale types,
//! plus depth-map export of reconstructed surfaces.

use image::Luma;
use sft_core::{GrayImage, GrayImageView};
use sft_isometric::SampledSurface;
use std::path::Path;

/// Borrow an `image::GrayImage` as a [`GrayImageView`].
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Decode any supported format and convert to 8-bit luma.
pub fn load_gray(path: impl AsRef<Path>) -> Result<::image::GrayImage, ::image::ImageError> {
    Ok(::image::ImageReader::open(path)?.decode()?.to_luma8())
}

/// One pixel per surface vertex, nearest depth brightest. A surface of
/// constant depth renders mid-gray.
pub fn depth_image(surface: &SampledSurface) -> GrayImage {
    let (nx, ny) = surface.shape();
    let (lo, hi) = surface.bounds();
    let span = hi.z - lo.z;
    GrayImage::from_fn(nx, ny, |i, j| {
        let z = surface.positions()[j * nx + i].z;
        if span > 0.0 && z.is_finite() {
            (255.0 * (hi.z - z) / span).round().clamp(0.0, 255.0) as u8
        } else {
            128
        }
    })
}

/// Write a [`GrayImage`]; the format follows the file extension.
pub fn save_gray(img: &GrayImage, path: impl AsRef<Path>) -> Result<(), ::image::ImageError> {
    let out = ::image::GrayImage::from_fn(img.width as u32, img.height as u32, |x, y| {
        Luma([img.get(x as usize, y as usize)])
    });
    out.save(path)
}
