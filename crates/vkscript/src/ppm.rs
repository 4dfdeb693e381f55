//! PPM image output
//!
//! The final framebuffer can be dumped as a binary PPM (P6): 8-bit RGB,
//! one row per framebuffer row, channels converted through the format
//! metadata table.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::format::Format;

/// Write `pixels` (rows of `stride` bytes in `format`) as a PPM file
pub fn write_ppm(
    path: &Path,
    width: u32,
    height: u32,
    stride: usize,
    format: &Format,
    pixels: &[u8],
) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write!(writer, "P6\n{width} {height}\n255\n")?;

    let pixel_size = format.size();
    for y in 0..height as usize {
        for x in 0..width as usize {
            let offset = y * stride + x * pixel_size;
            let color = format.load_pixel(&pixels[offset..]);
            let rgb: [u8; 3] = [
                (color[0].clamp(0.0, 1.0) * 255.0).round() as u8,
                (color[1].clamp(0.0, 1.0) * 255.0).round() as u8,
                (color[2].clamp(0.0, 1.0) * 255.0).round() as u8,
            ];
            writer.write_all(&rgb)?;
        }
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ppm_header_and_payload() {
        let format = Format::lookup_by_name("B8G8R8A8_UNORM").unwrap();
        // one red and one green pixel, BGRA byte order
        let pixels = [0u8, 0, 255, 255, 0, 255, 0, 255];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ppm");
        write_ppm(&path, 2, 1, 8, format, &pixels).unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(&written[..9], b"P6\n2 1\n25");
        assert_eq!(&written[written.len() - 6..], &[255, 0, 0, 0, 255, 0]);
    }
}
