//! Format probing and transcoding. Everything here is synchronous and
//! CPU-bound; callers run [`transcode`] on the blocking pool.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceKind {
    Raster(ImageFormat),
    Svg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Probe {
    pub kind: SourceKind,
    pub width: u32,
    pub height: u32,
}

impl Probe {
    /// GIF, JPEG and PNG within the width limit are archived untouched, and so is SVG.
    pub fn can_copy(&self, max_width: u32) -> bool {
        match self.kind {
            SourceKind::Svg => true,
            SourceKind::Raster(format) => {
                matches!(format, ImageFormat::Gif | ImageFormat::Jpeg | ImageFormat::Png)
                    && self.width <= max_width
            }
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self.kind {
            SourceKind::Svg => "image/svg+xml",
            SourceKind::Raster(format) => format.to_mime_type(),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self.kind {
            SourceKind::Svg => "svg",
            SourceKind::Raster(ImageFormat::Jpeg) => "jpg",
            SourceKind::Raster(format) => format.extensions_str().first().copied().unwrap_or("bin"),
        }
    }
}

/// Identifies the payload from its bytes; the declared content type is only
/// trusted for SVG, which has no magic number.
pub(crate) fn probe(bytes: &[u8], content_type: Option<&str>) -> Result<Probe, String> {
    if is_svg(bytes, content_type) {
        return Ok(Probe {
            kind: SourceKind::Svg,
            width: 0,
            height: 0,
        });
    }
    let format = image::guess_format(bytes).map_err(|err| err.to_string())?;
    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(|err| err.to_string())?;
    Ok(Probe {
        kind: SourceKind::Raster(format),
        width,
        height,
    })
}

fn is_svg(bytes: &[u8], content_type: Option<&str>) -> bool {
    if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("image/svg")) {
        return true;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
    let head = head.trim_start();
    head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Encoded {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Decodes, downscales to `max_width` and re-encodes: PNG for lossless or
/// transparent sources, JPEG otherwise.
pub(crate) fn transcode(
    bytes: &[u8],
    format: ImageFormat,
    max_width: u32,
    jpeg_quality: u8,
) -> Result<Encoded, String> {
    let image = ImageReader::with_format(Cursor::new(bytes), format)
        .decode()
        .map_err(|err| err.to_string())?;
    let image = fit_width(image, max_width);
    let (width, height) = (image.width(), image.height());

    let lossless = matches!(
        format,
        ImageFormat::Png | ImageFormat::Gif | ImageFormat::Bmp | ImageFormat::Tiff
    );
    let mut out = Vec::new();
    if lossless || image.color().has_alpha() {
        let pixels = if image.color().has_alpha() {
            DynamicImage::ImageRgba8(image.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(image.to_rgb8())
        };
        pixels
            .write_with_encoder(PngEncoder::new_with_quality(
                &mut out,
                CompressionType::Best,
                PngFilter::Adaptive,
            ))
            .map_err(|err| err.to_string())?;
        Ok(Encoded {
            bytes: out,
            content_type: "image/png",
            extension: "png",
            width,
            height,
        })
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut out, jpeg_quality))
            .map_err(|err| err.to_string())?;
        Ok(Encoded {
            bytes: out,
            content_type: "image/jpeg",
            extension: "jpg",
            width,
            height,
        })
    }
}

fn fit_width(image: DynamicImage, max_width: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if max_width == 0 || width <= max_width {
        return image;
    }
    image.resize_exact(
        max_width,
        scaled_height(width, height, max_width),
        FilterType::CatmullRom,
    )
}

/// Height after scaling `width x height` down to `max_width`.
pub(crate) fn scaled_height(width: u32, height: u32, max_width: u32) -> u32 {
    if width == 0 || width <= max_width {
        return height;
    }
    let (width, height, max_width) = (u64::from(width), u64::from(height), u64::from(max_width));
    ((height * max_width + width / 2) / width).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use pretty_assertions::assert_eq;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn header_dimensions_are_read_before_decoding() {
        let png = encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([1, 2, 3]))),
            ImageFormat::Png,
        );
        let probe = probe(&png, Some("application/octet-stream")).unwrap();
        assert_eq!(probe.kind, SourceKind::Raster(ImageFormat::Png));
        assert_eq!((probe.width, probe.height), (40, 30));
        assert!(probe.can_copy(1536));
        assert!(!probe.can_copy(32));
        assert_eq!(probe.extension(), "png");
    }

    #[test]
    fn svg_is_recognised_without_content_type() {
        let probe = probe(b"  <svg xmlns=\"http://www.w3.org/2000/svg\"></svg>", None).unwrap();
        assert_eq!(probe.kind, SourceKind::Svg);
        assert_eq!(probe.content_type(), "image/svg+xml");
    }

    #[test]
    fn wide_opaque_bmp_becomes_scaled_png_and_alpha_stays_png() {
        let bmp = encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 100, Rgb([200, 10, 10]))),
            ImageFormat::Bmp,
        );
        let out = transcode(&bmp, ImageFormat::Bmp, 150, 75).unwrap();
        assert_eq!((out.width, out.height), (150, 50));
        assert_eq!(out.content_type, "image/png");

        let rgba = encode(
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 10]))),
            ImageFormat::Png,
        );
        let out = transcode(&rgba, ImageFormat::Png, 150, 75).unwrap();
        assert_eq!(out.extension, "png");
        assert_eq!((out.width, out.height), (10, 10));
    }

    #[test]
    fn scaled_height_keeps_aspect_ratio() {
        assert_eq!(scaled_height(2000, 1000, 1536), 768);
        assert_eq!(scaled_height(800, 600, 1536), 600);
        assert_eq!(scaled_height(3000, 1, 1000), 1);
    }
}
