use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{LineKey, OcrEngine, OcrRequest, OcrWord};
use crate::error::OcrError;
use crate::geo::Rect;
use crate::logging::OCR;

/// The `tesseract` command-line engine, fed a PNG on stdin and read back
/// as TSV.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    path: Option<PathBuf>,
}

impl TesseractCli {
    /// Uses `cmd` when given, otherwise looks `tesseract` up on `PATH`.
    pub fn new(cmd: Option<&Path>) -> Self {
        let path = match cmd {
            Some(p) => Some(p.to_path_buf()),
            None => which::which("tesseract").ok(),
        };
        TesseractCli { path }
    }

    fn executable(&self) -> Result<&Path, OcrError> {
        self.path
            .as_deref()
            .ok_or_else(|| OcrError::Unavailable("tesseract not found on PATH".to_string()))
    }
}

fn spawn_error(path: &Path, e: std::io::Error) -> OcrError {
    if e.kind() == std::io::ErrorKind::NotFound {
        OcrError::Unavailable(format!("{} not found", path.display()))
    } else {
        OcrError::Io(e)
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize(&self, image: &RgbImage, request: &OcrRequest) -> Result<Vec<OcrWord>, OcrError> {
        let path = self.executable()?;

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| OcrError::Raster(e.to_string()))?;

        let mut child = Command::new(path)
            .arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&request.languages)
            .arg("--psm")
            .arg(request.psm.to_string())
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(path, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&png).await?;
            stdin.shutdown().await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!("tesseract failed: {}", stderr.trim())));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let words = parse_tsv(&tsv);
        debug!(target: OCR, psm = request.psm, words = words.len(), "tesseract pass");
        Ok(words)
    }

    async fn version(&self) -> Result<String, OcrError> {
        let path = self.executable()?;
        let output = Command::new(path)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(path, e))?;
        // older releases print the banner on stderr
        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        text.lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| OcrError::Engine("empty version output".to_string()))
    }

    fn path(&self) -> Option<PathBuf> {
        self.path.clone()
    }
}

/// Word rows (level 5) of tesseract's TSV output. Rows with confidence -1
/// or blank text are dropped.
pub fn parse_tsv(tsv: &str) -> Vec<OcrWord> {
    let mut words = Vec::new();
    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let int = |i: usize| cols[i].trim().parse::<i64>().ok();
        let (Some(block), Some(par), Some(line)) = (int(2), int(3), int(4)) else {
            continue;
        };
        let (Some(left), Some(top), Some(width), Some(height)) = (int(6), int(7), int(8), int(9)) else {
            continue;
        };
        let Ok(confidence) = cols[10].trim().parse::<f32>() else {
            continue;
        };
        let text = cols[11..].join("\t");
        let text = text.trim();
        if confidence < 0.0 || text.is_empty() {
            continue;
        }
        trace!(target: OCR, %text, confidence, "ocr word");
        words.push(OcrWord {
            text: text.to_string(),
            rect: Rect::new(left as f32, top as f32, (left + width) as f32, (top + height) as f32),
            confidence,
            line: LineKey {
                block: block as u32,
                paragraph: par as u32,
                line: line as u32,
            },
        });
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t2000\t2800\t-1\t
4\t1\t1\t1\t1\t0\t100\t200\t400\t40\t-1\t
5\t1\t1\t1\t1\t1\t100\t200\t180\t40\t91.5\t{{ad_soyad
5\t1\t1\t1\t1\t2\t290\t200\t30\t40\t88\t}}
5\t1\t1\t1\t1\t3\t330\t200\t30\t40\t95\t \n";

    #[test]
    fn keeps_word_rows_only() {
        let words = parse_tsv(SAMPLE);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "{{ad_soyad");
        assert_eq!(words[0].rect, Rect::new(100.0, 200.0, 280.0, 240.0));
        assert_eq!(words[1].confidence, 88.0);
        assert_eq!(words[0].line, words[1].line);
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let engine = TesseractCli { path: None };
        let image = RgbImage::new(4, 4);
        let request = OcrRequest {
            languages: "eng".to_string(),
            psm: 6,
        };
        let err = engine.recognize(&image, &request).await.unwrap_err();
        assert!(err.is_outage());
    }
}
