use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, Rgba};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("tensor data has {actual} elements but shape {shape:?} needs {expected}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("cannot convert tensor of shape {0:?} to an image")]
    UnsupportedShape(Vec<usize>),
    #[error("unsupported channel count {0} (expected 1, 3 or 4)")]
    UnsupportedChannels(usize),
    #[error("image dimension {0} exceeds u32")]
    DimensionOverflow(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// Intensities in `[0, 1]`.
    F32(Vec<f32>),
    U8(Vec<u8>),
}

impl TensorData {
    fn len(&self) -> usize {
        match self {
            TensorData::F32(values) => values.len(),
            TensorData::U8(values) => values.len(),
        }
    }

    fn to_u8(&self) -> Vec<u8> {
        match self {
            // Scale, clamp, truncate.
            TensorData::F32(values) => values
                .iter()
                .map(|v| (v * 255.0).clamp(0.0, 255.0) as u8)
                .collect(),
            TensorData::U8(values) => values.clone(),
        }
    }
}

/// Dense row-major tensor handed over by a sample source.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl SampleTensor {
    pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self, ConversionError> {
        let expected = shape.iter().product::<usize>();
        if expected != data.len() {
            return Err(ConversionError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ConversionError> {
        Self::new(shape, TensorData::F32(data))
    }

    pub fn from_u8(shape: Vec<usize>, data: Vec<u8>) -> Result<Self, ConversionError> {
        Self::new(shape, TensorData::U8(data))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Drops every dimension of size one.
    pub fn squeeze(mut self) -> Self {
        self.shape.retain(|&dim| dim != 1);
        self
    }

    /// Squeezes, then interprets the tensor as `[H, W]` or `[C, H, W]`.
    pub fn to_image(&self) -> Result<DynamicImage, ConversionError> {
        let squeezed = self.clone().squeeze();
        let shape = squeezed.shape();

        match *shape {
            [height, width] => {
                let (w, h) = (dim(width)?, dim(height)?);
                let buffer = GrayImage::from_raw(w, h, squeezed.data.to_u8())
                    .ok_or_else(|| ConversionError::UnsupportedShape(shape.to_vec()))?;
                Ok(DynamicImage::ImageLuma8(buffer))
            }
            [channels, height, width] => {
                if !matches!(channels, 1 | 3 | 4) {
                    return Err(ConversionError::UnsupportedChannels(channels));
                }
                let (w, h) = (dim(width)?, dim(height)?);
                let interleaved = chw_to_hwc(&squeezed.data.to_u8(), channels, height * width);
                let image = match channels {
                    3 => ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, interleaved)
                        .map(DynamicImage::ImageRgb8),
                    4 => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, interleaved)
                        .map(DynamicImage::ImageRgba8),
                    _ => ImageBuffer::<Luma<u8>, _>::from_raw(w, h, interleaved)
                        .map(DynamicImage::ImageLuma8),
                };
                image.ok_or_else(|| ConversionError::UnsupportedShape(shape.to_vec()))
            }
            _ => Err(ConversionError::UnsupportedShape(shape.to_vec())),
        }
    }
}

fn dim(value: usize) -> Result<u32, ConversionError> {
    u32::try_from(value).map_err(|_| ConversionError::DimensionOverflow(value))
}

fn chw_to_hwc(planes: &[u8], channels: usize, plane_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(planes.len());
    for px in 0..plane_len {
        for c in 0..channels {
            out.push(planes[c * plane_len + px]);
        }
    }
    out
}
