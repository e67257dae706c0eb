use std::io::Cursor;

use anyhow::{bail, Context, Result};
use image::{GrayImage, ImageFormat, Luma};
use studio_contracts::ImageBuffer;

/// A two-level mask ready to send with a replacement request.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask {
    pub image: ImageBuffer,
    pub width: u32,
    pub height: u32,
    /// Share of pixels marked for replacement, in `0.0..=1.0`.
    pub coverage: f64,
}

/// Flattens a painted mask onto black and turns every non-black pixel white.
///
/// Transparent pixels count as black. The result is an 8-bit grayscale PNG
/// holding only 0 and 255. A mask that marks nothing is rejected.
pub fn binarize_mask(source: &ImageBuffer) -> Result<BinaryMask> {
    let painted = image::load_from_memory(source.bytes())
        .context("mask image could not be decoded")?
        .to_rgba8();
    let (width, height) = painted.dimensions();
    if width == 0 || height == 0 {
        bail!("mask image has no pixels");
    }

    let mut marked: u64 = 0;
    let mask = GrayImage::from_fn(width, height, |x, y| {
        let [r, g, b, a] = painted.get_pixel(x, y).0;
        let over_black = |channel: u8| (channel as u16 * a as u16) / 255;
        if over_black(r) > 0 || over_black(g) > 0 || over_black(b) > 0 {
            marked += 1;
            Luma([255])
        } else {
            Luma([0])
        }
    });
    if marked == 0 {
        bail!("mask marks no area to replace");
    }

    let mut out = Cursor::new(Vec::new());
    mask.write_to(&mut out, ImageFormat::Png)
        .context("failed to encode mask PNG")?;
    Ok(BinaryMask {
        image: ImageBuffer::new(out.into_inner(), "image/png"),
        width,
        height,
        coverage: marked as f64 / (width as u64 * height as u64) as f64,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use anyhow::Result;
    use image::{ImageFormat, Rgba, RgbaImage};
    use studio_contracts::ImageBuffer;

    use super::binarize_mask;

    fn encode(canvas: &RgbaImage) -> Result<ImageBuffer> {
        let mut out = Cursor::new(Vec::new());
        canvas.write_to(&mut out, ImageFormat::Png)?;
        Ok(ImageBuffer::new(out.into_inner(), "image/png"))
    }

    #[test]
    fn painted_strokes_become_white_on_black() -> Result<()> {
        let mut canvas = RgbaImage::from_pixel(4, 2, Rgba([0, 0, 0, 255]));
        canvas.put_pixel(0, 0, Rgba([200, 0, 0, 255]));
        canvas.put_pixel(1, 0, Rgba([1, 0, 0, 255]));
        canvas.put_pixel(2, 0, Rgba([255, 0, 0, 0]));
        canvas.put_pixel(3, 1, Rgba([0, 0, 90, 128]));

        let mask = binarize_mask(&encode(&canvas)?)?;
        assert_eq!((mask.width, mask.height), (4, 2));
        assert_eq!(mask.image.mime_type(), "image/png");
        assert!((mask.coverage - 3.0 / 8.0).abs() < 1e-9);

        let decoded = image::load_from_memory(mask.image.bytes())?.to_luma8();
        let values: Vec<u8> = decoded.pixels().map(|pixel| pixel.0[0]).collect();
        assert_eq!(values, vec![255, 255, 0, 0, 0, 0, 0, 255]);
        Ok(())
    }

    #[test]
    fn blank_or_undecodable_masks_are_rejected() -> Result<()> {
        let blank = RgbaImage::from_pixel(3, 3, Rgba([0, 0, 0, 255]));
        let err = binarize_mask(&encode(&blank)?)
            .err()
            .ok_or_else(|| anyhow::anyhow!("blank mask should fail"))?;
        assert!(err.to_string().contains("marks no area"));

        assert!(binarize_mask(&ImageBuffer::new(vec![9, 9], "image/png")).is_err());
        Ok(())
    }
}
