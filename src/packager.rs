use std::{
    io::{Cursor, Write},
    sync::Arc,
    time::Duration,
};

use image::ImageFormat;
use thiserror::Error;
use tracing::debug;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{cache::TtlCache, model::GeneratedImage};

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("png encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// File name offered for a single downloaded image (1-based `index`).
pub fn image_file_name(model_id: &str, index: usize) -> String {
    format!("medigan_{model_id}_{index}.png")
}

/// File name offered for the archive of a whole batch.
pub fn archive_file_name(model_id: &str) -> String {
    format!("{model_id}_images.zip")
}

/// PNG encoding with a per-image cache, plus zip bundling.
pub struct ImagePackager {
    encoded: TtlCache<u64, Arc<Vec<u8>>>,
}

impl ImagePackager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            encoded: TtlCache::new(ttl),
        }
    }

    /// Lossless PNG bytes for `image`, cached per image identity.
    ///
    /// Encoding happens outside the cache lock, so concurrent misses on the
    /// same image may both encode; the output is deterministic either way.
    pub fn img_to_bytes(&self, image: &GeneratedImage) -> Result<Arc<Vec<u8>>, PackagingError> {
        if let Some(bytes) = self.encoded.get(&image.id()) {
            return Ok(bytes);
        }

        let mut buf = Cursor::new(Vec::new());
        image.image().write_to(&mut buf, ImageFormat::Png)?;
        debug!(image_id = image.id(), bytes = buf.get_ref().len(), "encoded png");

        let bytes = Arc::new(buf.into_inner());
        self.encoded.insert(image.id(), bytes.clone());
        Ok(bytes)
    }

    /// Bundles `images` into a zip with entries `{prefix}_1.png`, `{prefix}_2.png`, ...
    pub fn create_zip(
        &self,
        images: &[GeneratedImage],
        prefix: &str,
    ) -> Result<Vec<u8>, PackagingError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (idx, image) in images.iter().enumerate() {
            let bytes = self.img_to_bytes(image)?;
            writer.start_file(format!("{prefix}_{}.png", idx + 1), options)?;
            writer.write_all(&bytes)?;
        }

        let archive = writer.finish()?.into_inner();
        debug!(entries = images.len(), bytes = archive.len(), %prefix, "built zip archive");
        Ok(archive)
    }

    pub fn cached_images(&self) -> usize {
        self.encoded.len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use image::{DynamicImage, GrayImage, Luma};

    use super::*;

    const HOUR: Duration = Duration::from_secs(3_600);

    fn gradient(seed: u8) -> GeneratedImage {
        let buffer = GrayImage::from_fn(8, 8, |x, y| Luma([seed.wrapping_add((x * 8 + y) as u8)]));
        GeneratedImage::new(DynamicImage::ImageLuma8(buffer))
    }

    fn read_entries(archive: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        (0..zip.len())
            .map(|i| {
                let mut entry = zip.by_index(i).unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (entry.name().to_string(), data)
            })
            .collect()
    }

    #[test]
    fn img_to_bytes_is_idempotent_and_cached() {
        let packager = ImagePackager::new(HOUR);
        let image = gradient(3);

        let first = packager.img_to_bytes(&image).unwrap();
        let second = packager.img_to_bytes(&image).unwrap();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(packager.cached_images(), 1);
        assert_eq!(&first[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn encoding_is_lossless() {
        let packager = ImagePackager::new(HOUR);
        let image = gradient(40);
        let bytes = packager.img_to_bytes(&image).unwrap();

        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();
        assert_eq!(decoded.to_luma8(), image.image().to_luma8());
    }

    #[test]
    fn encoding_is_deterministic_without_cache() {
        let packager = ImagePackager::new(Duration::ZERO);
        let image = gradient(9);
        let first = packager.img_to_bytes(&image).unwrap();
        let second = packager.img_to_bytes(&image).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[test]
    fn create_zip_names_entries_by_prefix_and_position() {
        let packager = ImagePackager::new(HOUR);
        let img1 = gradient(1);
        let img2 = gradient(100);

        let archive = packager
            .create_zip(&[img1.clone(), img2.clone()], "demo")
            .unwrap();
        let entries = read_entries(archive);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "demo_1.png");
        assert_eq!(entries[1].0, "demo_2.png");
        assert_eq!(entries[0].1, *packager.img_to_bytes(&img1).unwrap());
        assert_eq!(entries[1].1, *packager.img_to_bytes(&img2).unwrap());
    }

    #[test]
    fn concurrent_encodes_share_one_packager() {
        let packager = ImagePackager::new(HOUR);
        let images: Vec<GeneratedImage> = (0..8).map(|i| gradient(i * 30)).collect();

        let encoded: Vec<Arc<Vec<u8>>> = std::thread::scope(|scope| {
            let packager = &packager;
            let handles: Vec<_> = images
                .iter()
                .map(|image| scope.spawn(move || packager.img_to_bytes(image).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(packager.cached_images(), images.len());
        for (image, bytes) in images.iter().zip(&encoded) {
            assert_eq!(*packager.img_to_bytes(image).unwrap(), **bytes);
        }
    }

    #[test]
    fn create_zip_of_nothing_is_a_valid_empty_archive() {
        let packager = ImagePackager::new(HOUR);
        let entries = read_entries(packager.create_zip(&[], "empty").unwrap());
        assert!(entries.is_empty());
    }

    #[test]
    fn download_names() {
        assert_eq!(
            image_file_name("00001_DCGAN_MMG_CALC_ROI", 3),
            "medigan_00001_DCGAN_MMG_CALC_ROI_3.png"
        );
        assert_eq!(archive_file_name("00001_DCGAN"), "00001_DCGAN_images.zip");
    }
}
