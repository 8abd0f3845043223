use std::{fs, path::Path};

use anyhow::{Context, Result};
use base64::Engine;
use image::{codecs::png::PngEncoder, ColorType, ImageEncoder};

/// Zero-valued border around and between the tiles of a grid.
pub const GRID_PADDING: usize = 2;

/// Map generator output from `[-1, 1]` to `[0, 1]`.
pub fn rescale_to_unit(values: &[f32]) -> Vec<f32> {
    values.iter().map(|value| value * 0.5 + 0.5).collect()
}

/// A single image made of many samples laid out row by row. Pixels are
/// interleaved (`HWC`) in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageGrid {
    width: u32,
    height: u32,
    channels: usize,
    pixels: Vec<f32>,
}

impl ImageGrid {
    /// Tile flattened channel-major samples of `channels × side × side` values,
    /// `columns` per row.
    pub fn tile(samples: &[f32], channels: usize, side: usize, columns: usize) -> Result<Self> {
        let sample_len = channels * side * side;
        if sample_len == 0 || columns == 0 {
            anyhow::bail!("grid needs positive channels, side and columns");
        }
        if samples.is_empty() || samples.len() % sample_len != 0 {
            anyhow::bail!(
                "pixel buffer length {} is not a positive multiple of {}x{}x{}",
                samples.len(),
                channels,
                side,
                side
            );
        }

        let count = samples.len() / sample_len;
        let columns = columns.min(count);
        let rows = count.div_ceil(columns);
        let cell = side + GRID_PADDING;
        let width = columns * cell + GRID_PADDING;
        let height = rows * cell + GRID_PADDING;
        let mut pixels = vec![0.0; width * height * channels];

        for (index, sample) in samples.chunks_exact(sample_len).enumerate() {
            let left = (index % columns) * cell + GRID_PADDING;
            let top = (index / columns) * cell + GRID_PADDING;
            for channel in 0..channels {
                let plane = &sample[channel * side * side..(channel + 1) * side * side];
                for (y, row) in plane.chunks_exact(side).enumerate() {
                    for (x, &value) in row.iter().enumerate() {
                        pixels[((top + y) * width + left + x) * channels + channel] = value;
                    }
                }
            }
        }

        Ok(Self {
            width: width as u32,
            height: height as u32,
            channels,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32, channel: usize) -> f32 {
        self.pixels[(y as usize * self.width as usize + x as usize) * self.channels + channel]
    }

    /// Encode the grid as PNG bytes (grayscale or RGB).
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let color = match self.channels {
            1 => ColorType::L8,
            3 => ColorType::Rgb8,
            other => anyhow::bail!("cannot encode a {other}-channel image as PNG"),
        };

        let encoded: Vec<u8> = self
            .pixels
            .iter()
            .map(|value| (value.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();

        let mut buffer = Vec::new();
        let encoder = PngEncoder::new(&mut buffer);
        encoder
            .write_image(&encoded, self.width, self.height, color)
            .context("failed to encode PNG data")?;

        Ok(buffer)
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        let bytes = self.encode_png()?;
        fs::write(path, bytes)
            .with_context(|| format!("failed to write image to {}", path.display()))
    }

    /// Encode the grid as a PNG data URL, for embedding in Markdown.
    pub fn png_data_url(&self) -> Result<String> {
        Ok(data_url(&self.encode_png()?))
    }
}

/// Data URL of a PNG already written to disk.
pub fn png_file_data_url(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    Ok(data_url(&bytes))
}

fn data_url(png: &[u8]) -> String {
    let base64 = base64::engine::general_purpose::STANDARD.encode(png);
    format!("data:image/png;base64,{base64}")
}
