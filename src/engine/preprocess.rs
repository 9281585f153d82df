//! Image preprocessing for the face quality model

use std::io::Cursor;

use image::DynamicImage;
use ndarray::{Array3, Array4, Axis};
use tracing::debug;

use crate::error::{Error, Result};
use crate::utils::image::{decode_base64, ImageSource};

/// Standard input size for the face quality model
pub const QUALITY_INPUT_SIZE: u32 = 112;

/// Resolves image references and turns images into model input
#[derive(Clone)]
pub struct ImageNormalizer {
    input_size: u32,
    http: reqwest::Client,
}

impl ImageNormalizer {
    pub fn new(input_size: u32) -> Result<Self> {
        // No timeout here: callers bound fetches themselves
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("failed to build image fetch client: {}", e)))?;

        Ok(Self { input_size, http })
    }

    /// Load and decode the image behind an `http`/`path`/`data` reference
    pub async fn resolve(&self, reference: &str) -> Result<DynamicImage> {
        let source = ImageSource::parse(reference)?;
        let bytes = self.fetch(&source).await?;
        debug!("Loaded {} bytes from {}", bytes.len(), source.describe());
        decode_image(&bytes)
    }

    async fn fetch(&self, source: &ImageSource) -> Result<Vec<u8>> {
        let load_error = |reason: String| Error::ImageLoad {
            location: source.describe(),
            reason,
        };

        match source {
            ImageSource::Url(url) => {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| load_error(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(load_error(format!("HTTP {}", response.status().as_u16())));
                }
                let body = response.bytes().await.map_err(|e| load_error(e.to_string()))?;
                Ok(body.to_vec())
            }
            ImageSource::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|e| load_error(e.to_string())),
            ImageSource::Base64(payload) => decode_base64(payload),
        }
    }

    /// Resize to `input_size` square, RGB, CHW, `(x - 127.5) / 128.0`
    pub fn normalize(&self, image: &DynamicImage) -> Array3<f32> {
        let size = self.input_size;
        let resized = image.resize_exact(size, size, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();

        let mut tensor = Array3::<f32>::zeros((3, size as usize, size as usize));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                tensor[[c, y as usize, x as usize]] = (pixel[c] as f32 - 127.5) / 128.0;
            }
        }

        tensor
    }

    /// Stack images into a `(B, 3, S, S)` batch
    pub fn normalize_batch(&self, images: &[DynamicImage]) -> Result<Array4<f32>> {
        if images.is_empty() {
            return Err(Error::invalid_input("no images to normalize"));
        }

        let size = self.input_size as usize;
        let mut batch = Array4::<f32>::zeros((images.len(), 3, size, size));
        for (i, image) in images.iter().enumerate() {
            batch.index_axis_mut(Axis(0), i).assign(&self.normalize(image));
        }

        Ok(batch)
    }
}

/// Decode image from bytes with EXIF orientation handling
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(data)?;
    Ok(apply_exif_orientation(data, image))
}

/// Apply EXIF orientation to correct image rotation
/// Phone cameras often store an orientation tag instead of rotating pixels
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    let orientation = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    };

    // See https://exiftool.org/TagNames/EXIF.html (Orientation)
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}
