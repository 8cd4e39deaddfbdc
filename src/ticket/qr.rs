//! QR code PNG generation for ticket payloads.

use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use qrcode::{Color, EcLevel, QrCode};
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Modules of white border around the code, per the QR specification.
const QUIET_ZONE: u32 = 4;

/// Renders ticket payloads as PNG QR images under a fixed output directory.
pub struct QrGenerator {
    output_dir: PathBuf,
    /// Image size in pixels.
    size: u32,
}

impl QrGenerator {
    /// Create the generator, creating `output_dir` if absent.
    pub fn new(output_dir: impl Into<PathBuf>, size: u32) -> WorkerResult<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir, size })
    }

    /// Encode `data` with medium error correction and write
    /// `<output_dir>/<ticket_code>.png` at the configured pixel size.
    /// Returns the written path.
    pub fn generate(&self, ticket_code: &str, data: &str) -> WorkerResult<PathBuf> {
        let path = self.path_for(ticket_code);

        let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)
            .map_err(|e| WorkerError::Ticket(format!("qr encode: {e}")))?;
        let image = render_to_image(&code, self.size);
        image
            .save(&path)
            .map_err(|e| WorkerError::Ticket(format!("qr image write: {e}")))?;

        debug!(path = %path.display(), bytes = data.len(), "qr image written");
        Ok(path)
    }

    /// Path a QR image for this ticket code would live at.
    pub fn path_for(&self, ticket_code: &str) -> PathBuf {
        self.output_dir.join(format!("{ticket_code}.png"))
    }

    pub fn exists(&self, ticket_code: &str) -> bool {
        self.path_for(ticket_code).exists()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// Rasterize the module matrix into a square grayscale image of `size`
/// pixels, quiet zone included. Modules are scaled to whole pixels and the
/// remainder is spent on outer margin, keeping the code crisp.
fn render_to_image(code: &QrCode, size: u32) -> GrayImage {
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let total = modules + 2 * QUIET_ZONE;
    let scale = (size / total).max(1);
    let content = total * scale;
    let side = size.max(content);
    let margin = (side - content) / 2 + QUIET_ZONE * scale;

    let mut image = GrayImage::from_pixel(side, side, Luma([255u8]));
    for module_y in 0..modules {
        for module_x in 0..modules {
            if colors[(module_y * modules + module_x) as usize] != Color::Dark {
                continue;
            }
            let origin_x = margin + module_x * scale;
            let origin_y = margin + module_y * scale;
            for dy in 0..scale {
                for dx in 0..scale {
                    image.put_pixel(origin_x + dx, origin_y + dy, Luma([0u8]));
                }
            }
        }
    }
    image
}
