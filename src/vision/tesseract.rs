//! Tesseract command-line backend
//!
//! Pipes a PNG-encoded variant to the `tesseract` executable. Word mode asks
//! for TSV output (one row per recognized word with its box and confidence);
//! paragraph mode asks for plain text.
//!
//! Every call is bounded by the configured deadline. A child that overruns it
//! is killed and reaped before the call returns.

use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use image::{GrayImage, ImageFormat};
use tracing::{trace, warn};
use wait_timeout::ChildExt;

use super::ocr::{OcrResult, TextRecognizer};
use crate::config::OcrSettings;
use crate::error::{PipelineError, Result};

/// Page segmentation mode: single text line
const PSM_SINGLE_LINE: &str = "7";
/// Page segmentation mode: uniform block of text
const PSM_BLOCK: &str = "6";
/// TSV row level for words
const WORD_LEVEL: &str = "5";

/// Recognizer backed by the `tesseract` CLI
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: PathBuf,
    language: String,
    /// `None` waits for the process indefinitely
    timeout: Option<Duration>,
}

impl TesseractCli {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
            timeout: None,
        }
    }

    /// Kill any call still running after `timeout`
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn from_settings(settings: &OcrSettings) -> Self {
        let cli = Self::new(&settings.tesseract_path, &settings.language);
        match settings.timeout_ms {
            0 => cli,
            ms => cli.with_deadline(Duration::from_millis(ms)),
        }
    }

    fn run(&self, image: &GrayImage, args: &[&str]) -> Result<String> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.language])
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Pipes are pumped off this thread so only the deadline can hold us
        let (status, stdout, stderr) = thread::scope(|scope| {
            let writer = scope.spawn(move || {
                if let Some(mut stdin) = stdin {
                    // A child that exits early closes the pipe; its status tells the story
                    let _ = stdin.write_all(&png);
                }
            });
            let out = scope.spawn(move || drain(stdout));
            let err = scope.spawn(move || drain(stderr));

            let status = self.wait(&mut child);
            let _ = writer.join();
            let stdout = out.join().unwrap_or_default();
            let stderr = err.join().unwrap_or_default();
            (status, stdout, stderr)
        });

        let status = status?;
        if !status.success() {
            return Err(PipelineError::Ocr(format!(
                "tesseract exited with {}: {}",
                status,
                String::from_utf8_lossy(&stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait()?);
        };

        match child.wait_timeout(timeout) {
            Ok(Some(status)) => Ok(status),
            Ok(None) => {
                warn!("tesseract exceeded {:?}, killing pid {}", timeout, child.id());
                reap(child);
                Err(PipelineError::Timeout(timeout))
            }
            Err(e) => {
                reap(child);
                Err(e.into())
            }
        }
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, image: &GrayImage, allowlist: &str) -> Result<Vec<OcrResult>> {
        let whitelist = format!("tessedit_char_whitelist={allowlist}");
        let tsv = self.run(image, &["--psm", PSM_SINGLE_LINE, "-c", &whitelist, "tsv"])?;
        let results = parse_tsv(&tsv);
        trace!("tesseract returned {} words", results.len());
        Ok(results)
    }

    fn recognize_paragraph(&self, image: &GrayImage) -> Result<Vec<String>> {
        let text = self.run(image, &["--psm", PSM_BLOCK])?;
        Ok(split_blocks(&text))
    }
}

/// Parse word rows out of tesseract TSV output
///
/// Columns: level, page, block, par, line, word, left, top, width, height,
/// conf, text. Confidence is reported in percent; -1 marks non-word rows.
pub fn parse_tsv(tsv: &str) -> Vec<OcrResult> {
    tsv.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 || cols[0] != WORD_LEVEL {
                return None;
            }
            let text = cols[11].trim();
            let conf: f32 = cols[10].trim().parse().ok()?;
            if text.is_empty() || conf < 0.0 {
                return None;
            }
            let left: f32 = cols[6].parse().ok()?;
            let top: f32 = cols[7].parse().ok()?;
            let width: f32 = cols[8].parse().ok()?;
            let height: f32 = cols[9].parse().ok()?;
            Some(OcrResult::from_bounds(
                text,
                (left, top, width, height),
                (conf / 100.0).clamp(0.0, 1.0),
            ))
        })
        .collect()
}

/// Split plain-text output into blank-line separated blocks
pub fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            if !current.is_empty() {
                blocks.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join(" "));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t200\t60\t-1\t\n\
4\t1\t1\t1\t1\t0\t10\t8\t180\t40\t-1\t\n\
5\t1\t1\t1\t1\t1\t10\t8\t80\t40\t91.5\tKA05\n\
5\t1\t1\t1\t1\t2\t100\t8\t90\t40\t64\tWB1234\n\
5\t1\t1\t1\t1\t3\t195\t8\t4\t40\t-1\t \n";

    #[test]
    fn test_parse_tsv_words() {
        let results = parse_tsv(SAMPLE_TSV);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "KA05");
        assert!((results[0].confidence - 0.915).abs() < 1e-4);
        assert_eq!(results[1].text, "WB1234");
        assert_eq!(results[1].center(), Some((145.0, 28.0)));
    }

    #[test]
    fn test_parse_tsv_ignores_garbage() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv("header\n5\t1\tbroken\n").is_empty());
    }

    #[test]
    fn test_split_blocks() {
        let text = "KA05\nWB1234\n\n  \nINDIA\n";
        assert_eq!(split_blocks(text), vec!["KA05 WB1234", "INDIA"]);
        assert!(split_blocks("\n\n").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_process_is_killed_at_deadline() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tesseract");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ocr = TesseractCli::new(&script, "eng").with_deadline(Duration::from_millis(200));
        let start = Instant::now();
        let result = ocr.recognize(&GrayImage::new(8, 8), "AB");

        assert!(matches!(result, Err(PipelineError::Timeout(_))), "got {:?}", result);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_deadline_from_settings() {
        let mut settings = OcrSettings::default();
        settings.timeout_ms = 0;
        assert_eq!(TesseractCli::from_settings(&settings).timeout, None);
        settings.timeout_ms = 1500;
        assert_eq!(
            TesseractCli::from_settings(&settings).timeout,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_missing_binary_is_an_error() {
        let ocr = TesseractCli::new("/nonexistent/tesseract-binary", "eng");
        let result = ocr.recognize(&GrayImage::new(8, 8), "AB");
        assert!(result.is_err());
    }
}
