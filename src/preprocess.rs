use image::imageops::FilterType;
use image::io::{Limits, Reader};
use ndarray::Array3;
use std::io::Cursor;
use thiserror::Error;

/// A decoded, resized image in `(height, width, 3)` layout with values in `[0, 1]`.
pub type ImageTensor = Array3<f32>;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("{0}")]
    Decode(#[from] image::ImageError),

    #[error("empty image payload")]
    Empty,

    #[error("image has no pixels ({width}x{height})")]
    ZeroSized { width: u32, height: u32 },

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Tensor shape `[height, width, channels]`.
    pub fn shape(&self) -> [usize; 3] {
        [self.height as usize, self.width as usize, 3]
    }
}

/// Bounds on what a single upload may decode into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_dimension: u32,
    pub max_alloc_bytes: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_dimension: 8192,
            max_alloc_bytes: 64 * 1024 * 1024,
        }
    }
}

impl DecodeLimits {
    fn to_image_limits(self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(self.max_alloc_bytes);
        limits
    }
}

/// Decodes `raw`, coerces it to RGB and stretches it to `size`.
///
/// Resizing uses a bilinear filter and never preserves aspect ratio, so the
/// output shape depends only on `size`.
pub fn decode_and_normalize(
    raw: &[u8],
    size: ImageSize,
    limits: DecodeLimits,
) -> Result<ImageTensor, PreprocessError> {
    if raw.is_empty() {
        return Err(PreprocessError::Empty);
    }

    let mut reader = Reader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    reader.limits(limits.to_image_limits());
    let img = reader.decode()?;
    if img.width() == 0 || img.height() == 0 {
        return Err(PreprocessError::ZeroSized {
            width: img.width(),
            height: img.height(),
        });
    }

    let rgb = img.to_rgb8();
    let resized = image::imageops::resize(&rgb, size.width, size.height, FilterType::Triangle);

    let data: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect();

    let shape = size.shape();
    Ok(Array3::from_shape_vec((shape[0], shape[1], shape[2]), data)?)
}
