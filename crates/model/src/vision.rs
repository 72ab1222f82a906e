//! Image preprocessing for the vision encoder.

use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;

use crate::config::VisionGrid;
use crate::errors::EngineError;

/// Turns a decoded image into the encoder's `pixel_values` input.
pub trait ImagePreprocessor: Send {
    fn preprocess(&self, image: &DynamicImage, device: &Device) -> Result<Tensor, EngineError>;
}

/// Resizes to a fixed resolution and scales RGB to `[0, 1]`, producing a
/// `[1, 3, height, width]` tensor.
#[derive(Debug, Clone)]
pub struct ResizePreprocessor {
    width: u32,
    height: u32,
    filter: FilterType,
    dtype: DType,
}

impl ResizePreprocessor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            filter: FilterType::Triangle,
            dtype: DType::F32,
        }
    }

    pub fn for_grid(grid: &VisionGrid) -> Self {
        let [height, width] = grid.input_image_size;
        Self::new(width, height)
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }
}

impl ImagePreprocessor for ResizePreprocessor {
    fn preprocess(&self, image: &DynamicImage, device: &Device) -> Result<Tensor, EngineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EngineError::Image("image has no pixels".to_string()));
        }
        let rgb = image
            .resize_exact(self.width, self.height, self.filter)
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for c in 0..3 {
            for y in 0..height {
                for x in 0..width {
                    data.push(rgb.get_pixel(x, y)[c] as f32 / 255.0);
                }
            }
        }
        let tensor = Tensor::from_vec(data, (1, 3, height as usize, width as usize), device)?;
        if tensor.dtype() == self.dtype {
            Ok(tensor)
        } else {
            Ok(tensor.to_dtype(self.dtype)?)
        }
    }
}
