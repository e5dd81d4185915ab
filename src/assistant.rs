//! Question answering over an uploaded PDF.
//!
//! upload → save → extract → generate → markdown. Any failure short-circuits
//! the remaining steps and is returned as an [`AssistantError`] for display.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use crate::extractor::{ExtractError, TextExtractor};
use crate::generator::{GenerateError, ResponseGenerator};
use crate::markdown;

/// A file received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A successful answer, ready to render.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("No file uploaded.")]
    NoFile,

    #[error("Invalid file name.")]
    InvalidFileName,

    #[error("Error saving upload: {0}")]
    Save(#[from] std::io::Error),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Generate(#[from] GenerateError),
}

pub struct Assistant {
    extractor: Arc<dyn TextExtractor>,
    generator: Arc<dyn ResponseGenerator>,
    uploads_dir: PathBuf,
}

impl Assistant {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        generator: Arc<dyn ResponseGenerator>,
        uploads_dir: PathBuf,
    ) -> Self {
        Self {
            extractor,
            generator,
            uploads_dir,
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Answer `prompt` from the uploaded PDF.
    pub async fn answer(&self, prompt: &str, upload: Option<Upload>) -> Result<Answer, AssistantError> {
        let upload = upload
            .filter(|u| !u.file_name.is_empty())
            .ok_or(AssistantError::NoFile)?;
        let t0 = Instant::now();

        let path = self.save(&upload).await?;
        info!("Saved upload {} ({} bytes)", path.display(), upload.bytes.len());

        let extractor = self.extractor.clone();
        let extract_path = path.clone();
        let document_text = tokio::task::spawn_blocking(move || extractor.extract(&extract_path))
            .await
            .map_err(|e| ExtractError::Task(e.to_string()))?
            .inspect_err(|e| warn!("{e}"))?;
        info!("Extracted {} chars from {}", document_text.len(), upload.file_name);

        let text = self
            .generator
            .generate(prompt, &document_text)
            .await
            .inspect_err(|e| warn!("{e}"))?;
        let html = markdown::to_html(&text);

        info!(
            "Answered prompt on {} in {:.0}ms",
            upload.file_name,
            t0.elapsed().as_secs_f64() * 1000.0
        );
        Ok(Answer { text, html })
    }

    /// Write the upload under its client-supplied name, replacing any earlier file.
    async fn save(&self, upload: &Upload) -> Result<PathBuf, AssistantError> {
        let file_name = stored_file_name(&upload.file_name).ok_or(AssistantError::InvalidFileName)?;
        let path = self.uploads_dir.join(file_name);
        tokio::fs::write(&path, &upload.bytes).await?;
        Ok(path)
    }
}

/// Last path component of a client-supplied name (browsers may send `C:\fakepath\x.pdf`).
fn stored_file_name(name: &str) -> Option<&str> {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    (!base.is_empty() && base != "." && base != ".." && !base.contains('\0')).then_some(base)
}


#[cfg(test)]
mod tests {
    use super::fakes::{FakeExtractor, FakeGenerator};
    use super::*;
    use crate::extractor::test_pdf::write_pdf;
    use crate::extractor::LopdfExtractor;

    fn upload(name: &str, bytes: &[u8]) -> Option<Upload> {
        Some(Upload {
            file_name: name.into(),
            bytes: bytes.to_vec(),
        })
    }

    struct Harness {
        _dir: tempfile::TempDir,
        extractor: Arc<FakeExtractor>,
        generator: Arc<FakeGenerator>,
        assistant: Assistant,
    }

    fn harness(extractor: FakeExtractor, generator: FakeGenerator) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Arc::new(extractor);
        let generator = Arc::new(generator);
        let assistant = Assistant::new(extractor.clone(), generator.clone(), dir.path().to_path_buf());
        Harness {
            _dir: dir,
            extractor,
            generator,
            assistant,
        }
    }

    #[tokio::test]
    async fn missing_or_unnamed_file_skips_all_work() {
        let h = harness(FakeExtractor::returning("text"), FakeGenerator::default());

        let err = h.assistant.answer("Q", None).await.unwrap_err();
        assert!(matches!(err, AssistantError::NoFile));
        assert_eq!(err.to_string(), "No file uploaded.");

        let err = h.assistant.answer("Q", upload("", b"%PDF")).await.unwrap_err();
        assert!(matches!(err, AssistantError::NoFile));

        assert_eq!(h.extractor.calls(), 0);
        assert_eq!(h.generator.calls(), 0);
        assert_eq!(std::fs::read_dir(h.assistant.uploads_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn extraction_failure_skips_generation() {
        let h = harness(FakeExtractor::failing(), FakeGenerator::default());

        let err = h.assistant.answer("Q", upload("bad.pdf", b"junk")).await.unwrap_err();

        assert!(matches!(err, AssistantError::Extract(_)));
        assert!(err.to_string().to_lowercase().contains("error"));
        assert_eq!(h.extractor.calls(), 1);
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn generation_failure_is_an_error_not_an_answer() {
        let h = harness(FakeExtractor::returning("text"), FakeGenerator::failing());

        let err = h.assistant.answer("Q", upload("a.pdf", b"%PDF")).await.unwrap_err();

        assert!(matches!(err, AssistantError::Generate(_)));
        assert!(err.to_string().starts_with("Error generating response:"));
    }

    #[tokio::test]
    async fn success_passes_prompt_and_text_and_renders_markdown() {
        let h = harness(FakeExtractor::returning("Doc body"), FakeGenerator::default());

        let answer = h.assistant.answer("Why?", upload("report.pdf", b"%PDF-1.5")).await.unwrap();

        assert_eq!(answer.text, "**Answer** to _Why?_");
        assert_eq!(answer.html, "<p><strong>Answer</strong> to <em>Why?</em></p>\n");
        assert_eq!(
            h.generator.last.lock().unwrap().clone(),
            Some(("Why?".to_string(), "Doc body".to_string()))
        );
        let saved = std::fs::read(h.assistant.uploads_dir().join("report.pdf")).unwrap();
        assert_eq!(saved, b"%PDF-1.5");
    }

    #[tokio::test]
    async fn same_file_name_overwrites_previous_upload() {
        let h = harness(FakeExtractor::returning("text"), FakeGenerator::default());

        h.assistant.answer("Q", upload("same.pdf", b"first")).await.unwrap();
        h.assistant.answer("Q", upload("same.pdf", b"second")).await.unwrap();

        let saved = std::fs::read(h.assistant.uploads_dir().join("same.pdf")).unwrap();
        assert_eq!(saved, b"second");
    }

    #[tokio::test]
    async fn path_like_names_keep_only_the_final_component() {
        let h = harness(FakeExtractor::returning("text"), FakeGenerator::default());

        for (name, stored) in [
            (r"C:\fakepath\scan.pdf", "scan.pdf"),
            ("../escape.pdf", "escape.pdf"),
            ("nested/file.pdf", "file.pdf"),
        ] {
            h.assistant.answer("Q", upload(name, name.as_bytes())).await.unwrap();
            let saved = std::fs::read(h.assistant.uploads_dir().join(stored)).unwrap();
            assert_eq!(saved, name.as_bytes(), "{name}");
        }
        assert_eq!(std::fs::read_dir(h.assistant.uploads_dir()).unwrap().count(), 3);
    }

    #[tokio::test]
    async fn names_without_a_usable_component_are_rejected_before_writing() {
        let h = harness(FakeExtractor::returning("text"), FakeGenerator::default());

        for name in ["..", "dir/", r"dir\..", "a\0b.pdf"] {
            let err = h.assistant.answer("Q", upload(name, b"x")).await.unwrap_err();
            assert!(matches!(err, AssistantError::InvalidFileName), "{name}");
        }
        assert_eq!(h.extractor.calls(), 0);
        assert_eq!(std::fs::read_dir(h.assistant.uploads_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn real_pdf_text_reaches_the_generator() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.pdf");
        write_pdf(&source, &[Some("Quarterly"), Some("Results")]);
        let bytes = std::fs::read(&source).unwrap();

        let uploads = dir.path().join("uploads");
        std::fs::create_dir(&uploads).unwrap();
        let generator = Arc::new(FakeGenerator::default());
        let assistant = Assistant::new(Arc::new(LopdfExtractor), generator.clone(), uploads);

        assistant.answer("Summarise", upload("q3.pdf", &bytes)).await.unwrap();

        let (prompt, text) = generator.last.lock().unwrap().clone().unwrap();
        assert_eq!(prompt, "Summarise");
        assert!(text.find("Quarterly").unwrap() < text.find("Results").unwrap());
    }
}
