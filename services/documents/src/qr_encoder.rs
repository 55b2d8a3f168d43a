use crate::config::QrConfig;
use image::{GrayImage, ImageFormat, Luma};
use qrcode::types::QrError;
use qrcode::{Color, EcLevel, QrCode};
use std::io::Cursor;
use thiserror::Error;

/// Content type of every generated code image
pub const CODE_IMAGE_CONTENT_TYPE: &str = "image/png";

/// Largest accepted module edge in pixels
pub const MAX_MODULE_SIZE: u32 = 40;
/// Largest accepted quiet zone in modules
pub const MAX_QUIET_ZONE: u32 = 16;

const DARK: Luma<u8> = Luma([0]);
const LIGHT: Luma<u8> = Luma([255]);

/// Errors raised while turning a URL into a code image
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("payload of {len} bytes exceeds QR capacity at error correction {level}")]
    DataTooLong { len: usize, level: char },

    #[error("payload cannot be encoded: {0}")]
    Unencodable(String),

    #[error("failed to render PNG: {0}")]
    Render(String),
}

/// Turns a public URL into a scannable raster image
pub trait CodeEncoder: Send + Sync {
    /// Encode `payload` into PNG bytes. Identical input yields identical bytes.
    fn encode(&self, payload: &str) -> Result<Vec<u8>, EncodingError>;
}

/// QR encoder with fixed error correction, module size and quiet zone
#[derive(Debug, Clone)]
pub struct QrEncoder {
    level: EcLevel,
    module_size: u32,
    quiet_zone: u32,
}

impl QrEncoder {
    pub fn new(level: EcLevel, module_size: u32, quiet_zone: u32) -> Self {
        Self {
            level,
            module_size: module_size.clamp(1, MAX_MODULE_SIZE),
            quiet_zone: quiet_zone.min(MAX_QUIET_ZONE),
        }
    }

    pub fn from_config(config: &QrConfig) -> Self {
        let level = match config.error_correction.to_ascii_uppercase().as_str() {
            "M" => EcLevel::M,
            "Q" => EcLevel::Q,
            "H" => EcLevel::H,
            _ => EcLevel::L,
        };
        Self::new(level, config.module_size, config.quiet_zone)
    }

    fn level_char(&self) -> char {
        match self.level {
            EcLevel::L => 'L',
            EcLevel::M => 'M',
            EcLevel::Q => 'Q',
            EcLevel::H => 'H',
        }
    }

    /// Render the module matrix as a black-on-white grayscale image
    fn rasterize(&self, code: &QrCode) -> GrayImage {
        let width = code.width() as u32;
        let colors = code.to_colors();
        let quiet = self.quiet_zone;
        let side = (width + 2 * quiet) * self.module_size;

        GrayImage::from_fn(side, side, |x, y| {
            let mx = x / self.module_size;
            let my = y / self.module_size;
            if mx < quiet || my < quiet || mx >= quiet + width || my >= quiet + width {
                return LIGHT;
            }
            match colors[((my - quiet) * width + (mx - quiet)) as usize] {
                Color::Dark => DARK,
                Color::Light => LIGHT,
            }
        })
    }
}

impl Default for QrEncoder {
    fn default() -> Self {
        Self::from_config(&QrConfig::default())
    }
}

impl CodeEncoder for QrEncoder {
    fn encode(&self, payload: &str) -> Result<Vec<u8>, EncodingError> {
        let code = QrCode::with_error_correction_level(payload.as_bytes(), self.level).map_err(
            |e| match e {
                QrError::DataTooLong => EncodingError::DataTooLong {
                    len: payload.len(),
                    level: self.level_char(),
                },
                other => EncodingError::Unencodable(other.to_string()),
            },
        )?;

        let image = self.rasterize(&code);

        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| EncodingError::Render(e.to_string()))?;

        Ok(bytes)
    }
}
