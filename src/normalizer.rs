use crate::config::PixelScaling;
use image::imageops::FilterType;
use ndarray::{Array4, ArrayView4};
use thiserror::Error;

pub const DEFAULT_INPUT_SIZE: u32 = 224;
const CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Error decoding image: {0}")]
    Decode(String),
}

/// Batched NHWC input for the classifier, shape `[1, size, size, 3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor(Array4<f32>);

impl ImageTensor {
    pub fn zeros(size: u32) -> Self {
        let size = size as usize;
        Self(Array4::zeros((1, size, size, CHANNELS)))
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    size: u32,
    scaling: PixelScaling,
}

impl ImageNormalizer {
    pub fn new(size: u32, scaling: PixelScaling) -> Self {
        Self { size, scaling }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn scaling(&self) -> PixelScaling {
        self.scaling
    }

    pub fn normalize(&self, image_data: &[u8]) -> Result<ImageTensor, NormalizeError> {
        let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
            .with_guessed_format()
            .map_err(|e| NormalizeError::Decode(e.to_string()))?;

        let original_img = image_reader
            .decode()
            .map_err(|e| NormalizeError::Decode(e.to_string()))?;

        // Direct resize, aspect ratio is not preserved.
        let img = original_img
            .resize_exact(self.size, self.size, FilterType::CatmullRom)
            .to_rgb8();

        let size = self.size as usize;
        let mut input = Array4::zeros((1, size, size, CHANNELS));
        for (x, y, pixel) in img.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = pixel.0;
            input[[0, y, x, 0]] = self.scaling.apply(r);
            input[[0, y, x, 1]] = self.scaling.apply(g);
            input[[0, y, x, 2]] = self.scaling.apply(b);
        }

        Ok(ImageTensor(input))
    }
}
