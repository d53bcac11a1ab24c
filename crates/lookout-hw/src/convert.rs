//! Raw camera buffer → packed RGB24 conversion.

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Convert packed YUYV (4:2:2) to RGB24.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V], sharing chroma.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(ConvertError::InvalidLength {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }

    let mut out = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344_136 * u - 0.714_136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

/// Replicate 8-bit grayscale into three RGB channels.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let pixels = width as usize * height as usize;
    if grey.len() < pixels {
        return Err(ConvertError::InvalidLength {
            format: "GREY",
            expected: pixels,
            actual: grey.len(),
        });
    }
    Ok(grey[..pixels].iter().flat_map(|&y| [y, y, y]).collect())
}

/// Copy a packed RGB24 buffer, dropping any driver padding.
pub fn rgb_passthrough(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let expected = width as usize * height as usize * 3;
    if rgb.len() < expected {
        return Err(ConvertError::InvalidLength {
            format: "RGB3",
            expected,
            actual: rgb.len(),
        });
    }
    Ok(rgb[..expected].to_vec())
}

fn clamp(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
