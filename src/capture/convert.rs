//! Pixel conversions between the capture backend and the encoder.

use super::{PixelLayout, RawImage};
use crate::error::CaptureError;

/// Reorders a captured buffer into packed RGB24, dropping alpha.
///
/// The source order comes from `raw.layout`; nothing is assumed about it.
pub fn to_rgb24(raw: &RawImage) -> Result<Vec<u8>, CaptureError> {
    let pixels = raw.width as usize * raw.height as usize;
    let expected = pixels * raw.layout.bytes_per_pixel();
    if raw.data.len() != expected {
        return Err(CaptureError::BufferSize {
            expected,
            actual: raw.data.len(),
        });
    }

    // byte offsets of R, G, B within one source pixel
    let (r, g, b) = match raw.layout {
        PixelLayout::Bgra8 | PixelLayout::Bgrx8 => (2, 1, 0),
        PixelLayout::Rgba8 => (0, 1, 2),
    };

    let mut rgb = Vec::with_capacity(pixels * 3);
    for px in raw.data.chunks_exact(4) {
        rgb.extend_from_slice(&[px[r], px[g], px[b]]);
    }
    Ok(rgb)
}

/// Converts packed RGB24 to planar I420 (BT.601, limited range).
///
/// `width` and `height` must be even.
pub fn rgb24_to_i420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) * 3;
            let r = rgb[idx] as i32;
            let g = rgb[idx + 1] as i32;
            let b = rgb[idx + 2] as i32;

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

            // chroma from the top-left pixel of each 2x2 block
            if y % 2 == 0 && x % 2 == 0 {
                let uv_idx = (y / 2) * (w / 2) + (x / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}
