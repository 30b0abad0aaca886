use std::path::PathBuf;

use image::RgbImage;

use crate::error::OcrError;

/// Renders one page of a PDF to pixels.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, source: &[u8], page_index: usize, dpi: f32) -> Result<RgbImage, OcrError>;
}

/// Rasterizer backed by the pdfium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    /// Directory holding the pdfium library; the system library otherwise.
    pub library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        PdfiumRasterizer { library_path }
    }
}

#[cfg(feature = "pdfium")]
mod backend {
    use std::sync::Mutex;

    use image::RgbImage;
    use pdfium_render::prelude::*;
    use tracing::debug;

    use super::PdfiumRasterizer;
    use crate::error::OcrError;
    use crate::logging::OCR;

    /// pdfium is not re-entrant.
    static PDFIUM: Mutex<()> = Mutex::new(());

    impl super::PageRasterizer for PdfiumRasterizer {
        fn rasterize(&self, source: &[u8], page_index: usize, dpi: f32) -> Result<RgbImage, OcrError> {
            let _guard = PDFIUM
                .lock()
                .map_err(|_| OcrError::Raster("pdfium lock poisoned".to_string()))?;

            let bindings = match &self.library_path {
                Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
                None => Pdfium::bind_to_system_library(),
            }
            .map_err(|e| OcrError::Unavailable(format!("pdfium: {e}")))?;
            let pdfium = Pdfium::new(bindings);

            let document = pdfium
                .load_pdf_from_byte_slice(source, None)
                .map_err(|e| OcrError::Raster(e.to_string()))?;
            let index = u16::try_from(page_index)
                .map_err(|_| OcrError::Raster(format!("page {page_index} out of range")))?;
            let page = document
                .pages()
                .get(index)
                .map_err(|e| OcrError::Raster(e.to_string()))?;

            let scale = dpi / 72.0;
            let width = (page.width().value * scale).round() as i32;
            let height = (page.height().value * scale).round() as i32;
            let config = PdfRenderConfig::new()
                .set_target_width(width)
                .set_target_height(height)
                .render_form_data(true)
                .render_annotations(true);
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| OcrError::Raster(e.to_string()))?;

            debug!(target: OCR, page = page_index, width, height, "rasterized page");
            Ok(bitmap.as_image().to_rgb8())
        }
    }
}

#[cfg(not(feature = "pdfium"))]
impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(&self, _source: &[u8], _page_index: usize, _dpi: f32) -> Result<RgbImage, OcrError> {
        Err(OcrError::Unavailable(
            "built without the pdfium feature".to_string(),
        ))
    }
}
