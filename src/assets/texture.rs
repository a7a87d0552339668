//! Decoded texture payloads
//!
//! CPU-side pixel data decoded from PNG/JPEG. This is the payload texture
//! caches hold; uploading it to the GPU is the renderer's business.

use super::source::{AssetError, AssetSource};

/// RGBA8 pixels decoded from an image file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Tightly packed RGBA8 rows
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Decode a texture from raw bytes (PNG, JPEG)
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be decoded as an image
    pub fn decode(bytes: &[u8]) -> Result<Self, AssetError> {
        let img =
            image::load_from_memory(bytes).map_err(|e| AssetError::DecodeError(e.to_string()))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    /// Read and decode the texture at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the asset cannot be read or decoded
    pub fn load(source: &dyn AssetSource, path: &str) -> Result<Self, AssetError> {
        let bytes = source.read(path)?;
        log::debug!("Decoding texture `{path}` ({} bytes)", bytes.len());
        Self::decode(&bytes)
    }

    /// Size of the pixel data in bytes
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssetSource;
    use std::io::Cursor;

    /// Encode a solid-colour PNG
    fn png_bytes(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(color));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let texture = TextureData::decode(&png_bytes(2, 3, [255, 0, 0, 255])).unwrap();

        assert_eq!(texture.width, 2);
        assert_eq!(texture.height, 3);
        assert_eq!(texture.byte_len(), 2 * 3 * 4);
        assert_eq!(&texture.pixels[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_decode_garbage() {
        let result = TextureData::decode(b"not an image");
        assert!(matches!(result, Err(AssetError::DecodeError(_))));
    }

    #[test]
    fn test_load_from_source() {
        let source = MemoryAssetSource::new().with_asset("brick.png", png_bytes(1, 1, [9, 9, 9, 255]));

        let texture = TextureData::load(&source, "brick.png").unwrap();
        assert_eq!(texture.pixels, vec![9, 9, 9, 255]);
        assert!(matches!(
            TextureData::load(&source, "tree.png"),
            Err(AssetError::NotFound(_))
        ));
    }
}
