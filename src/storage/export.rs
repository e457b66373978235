//! Export of scan output and the debug preview

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::vision::EncodedImage;

/// File format for exported output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExportFormat {
    /// One accepted entry per line
    #[default]
    Text,
    /// JSON document with the entries and export time
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Json => "json",
        }
    }
}

#[derive(Serialize)]
struct JsonExport<'a> {
    exported_at_unix: u64,
    entries: &'a [String],
}

/// Render entries in the given format
pub fn render(entries: &[String], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Text => Ok(entries.iter().map(|entry| format!("{}\n", entry)).collect()),
        ExportFormat::Json => {
            let exported_at_unix = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let doc = JsonExport {
                exported_at_unix,
                entries,
            };
            Ok(serde_json::to_string_pretty(&doc)?)
        }
    }
}

/// Write the output entries to `path`, creating parent directories
pub fn export_output(entries: &[String], format: ExportFormat, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    let content = render(entries, format)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
    info!(entries = entries.len(), "Exported output to {:?}", path);
    Ok(())
}

/// Timestamped export file under `dir`
pub fn default_export_path(dir: &Path, format: ExportFormat) -> PathBuf {
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("scan-{}.{}", stamp, format.extension()))
}

/// Write the preview PNG as-is
pub fn save_preview(preview: &EncodedImage, path: &Path) -> Result<()> {
    std::fs::write(path, &preview.bytes[..])
        .with_context(|| format!("Failed to write preview {:?}", path))?;
    info!(
        width = preview.width,
        height = preview.height,
        "Saved ROI preview to {:?}",
        path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::ocr_preprocess::encode_png;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    fn entries() -> Vec<String> {
        vec!["ABC123".to_string(), "DEF456".to_string()]
    }

    #[test]
    fn test_render_text() {
        assert_eq!(render(&entries(), ExportFormat::Text).unwrap(), "ABC123\nDEF456\n");
        assert_eq!(render(&[], ExportFormat::Text).unwrap(), "");
    }

    #[test]
    fn test_render_json() {
        let json = render(&entries(), ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["entries"][1], "DEF456");
        assert!(value["exported_at_unix"].is_u64());
    }

    #[test]
    fn test_export_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.txt");

        export_output(&entries(), ExportFormat::Text, &path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ABC123\nDEF456\n");
    }

    #[test]
    fn test_default_export_path_extension() {
        let dir = tempdir().unwrap();
        let path = default_export_path(dir.path(), ExportFormat::Json);
        assert_eq!(path.extension().unwrap(), "json");
        assert!(path.starts_with(dir.path()));
    }

    #[test]
    fn test_save_preview_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roi.png");
        let preview = encode_png(&RgbaImage::from_pixel(4, 3, Rgba([1, 2, 3, 255]))).unwrap();

        save_preview(&preview, &path).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }
}
