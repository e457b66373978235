//! Recognition engine backed by the `tesseract` command-line program
//!
//! Each recognition spawns one `tesseract stdin stdout -l <lang> tsv` process,
//! pipes the PNG in and parses the TSV word table that comes back.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, trace};

use super::ocr::{EngineFactory, RecognitionEngine, RecognitionResult};
use super::ocr_preprocess::EncodedImage;
use crate::error::{Result, ScanError};

/// TSV row level of an individual word
const WORD_LEVEL: u32 = 5;

/// Creates tesseract-backed engines
#[derive(Debug)]
pub struct TesseractFactory {
    binary: PathBuf,
    created: AtomicUsize,
}

impl TesseractFactory {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            created: AtomicUsize::new(0),
        }
    }

    /// Languages the installed tesseract reports
    pub async fn available_languages(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.binary)
            .arg("--list-langs")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ScanError::pool_init(format!("failed to run {:?}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(ScanError::pool_init(format!(
                "{:?} --list-langs exited with {}",
                self.binary, output.status
            )));
        }

        // Older releases print the list on stderr
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(parse_language_list(&text))
    }
}

#[async_trait]
impl EngineFactory for TesseractFactory {
    async fn create(&self, language: &str) -> Result<Arc<dyn RecognitionEngine>> {
        let available = self.available_languages().await?;

        for wanted in language.split('+') {
            if !available.iter().any(|l| l == wanted) {
                return Err(ScanError::pool_init(format!(
                    "tesseract has no data for language '{}'",
                    wanted
                )));
            }
        }

        let id = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        info!(worker = id, language, "Tesseract worker initialized");

        Ok(Arc::new(TesseractEngine {
            id,
            binary: self.binary.clone(),
            language: language.to_string(),
            terminated: AtomicBool::new(false),
        }))
    }
}

/// One tesseract worker
#[derive(Debug)]
pub struct TesseractEngine {
    id: usize,
    binary: PathBuf,
    language: String,
    terminated: AtomicBool,
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    async fn recognize(&self, image: &EncodedImage) -> Result<RecognitionResult> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(ScanError::recognition(format!("worker {} is terminated", self.id)));
        }

        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", self.language.as_str(), "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::recognition(format!("failed to start tesseract: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&image.bytes)
                .await
                .map_err(|e| ScanError::recognition(format!("failed to send image: {}", e)))?;
            // Dropping stdin closes the pipe so tesseract starts working
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ScanError::recognition(format!("tesseract did not finish: {}", e)))?;

        if !output.status.success() {
            return Err(ScanError::recognition(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let result = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        trace!(
            worker = self.id,
            confidence = result.confidence,
            "Recognized {} chars",
            result.text.len()
        );
        Ok(result)
    }

    async fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            debug!(worker = self.id, "Tesseract worker terminated");
        }
    }
}

fn parse_language_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of available languages"))
        .map(str::to_string)
        .collect()
}

/// Parse tesseract TSV output into text and mean word confidence.
///
/// Words are joined by spaces within a line and lines by newlines. Confidence
/// is 0 when no words were found.
pub fn parse_tsv(tsv: &str) -> RecognitionResult {
    let mut lines: Vec<String> = Vec::new();
    let mut current_key: Option<(u32, u32, u32, u32)> = None;
    let mut confidence_sum = 0.0f32;
    let mut word_count = 0usize;

    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let level: u32 = match fields[0].parse() {
            Ok(level) => level,
            Err(_) => continue,
        };
        if level != WORD_LEVEL {
            continue;
        }

        let conf: f32 = fields[10].parse().unwrap_or(-1.0);
        let word = fields[11].trim();
        if conf < 0.0 || word.is_empty() {
            continue;
        }

        let key = (
            fields[1].parse().unwrap_or(0),
            fields[2].parse().unwrap_or(0),
            fields[3].parse().unwrap_or(0),
            fields[4].parse().unwrap_or(0),
        );

        match lines.last_mut() {
            Some(line) if current_key == Some(key) => {
                line.push(' ');
                line.push_str(word);
            }
            _ => {
                lines.push(word.to_string());
                current_key = Some(key);
            }
        }

        confidence_sum += conf;
        word_count += 1;
    }

    let confidence = if word_count == 0 {
        0.0
    } else {
        confidence_sum / word_count as f32
    };

    RecognitionResult {
        text: lines.join("\n"),
        confidence,
    }
}
