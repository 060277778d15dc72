//! Minimal Office Open XML (`.docx`) writer.
//!
//! Output depends only on the [`DocumentModel`]: no timestamps are embedded
//! and every zip entry carries the same fixed modification time, so the
//! same input always produces the same bytes.

use super::{Block, DocumentModel};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#;

const DOCUMENT_CLOSE: &str = "<w:sectPr/></w:body></w:document>";

/// Font sizes in half-points.
const TITLE_SIZE: u32 = 48;
const HEADING_SIZE: u32 = 32;
const SUBHEADING_SIZE: u32 = 28;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Invalid document file name: {0:?}")]
    InvalidFilename(String),

    #[error("Failed to build document archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Failed to write document: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes [`DocumentModel`]s as `.docx` files under one directory.
#[derive(Debug, Clone)]
pub struct DocxRenderer {
    dir: PathBuf,
}

impl DocxRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Render `model` to `<dir>/<filename>`, replacing any existing file.
    pub fn render(&self, model: &DocumentModel, filename: &str) -> Result<PathBuf, RenderError> {
        if filename.is_empty()
            || filename.contains(|c: char| c == '/' || c == '\\')
            || filename.starts_with('.')
        {
            return Err(RenderError::InvalidFilename(filename.to_string()));
        }

        let bytes = build_archive(model)?;

        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        let tmp = self.dir.join(format!(".{filename}.{}.tmp", Uuid::new_v4().simple()));
        if let Err(e) = std::fs::write(&tmp, &bytes).and_then(|()| std::fs::rename(&tmp, &path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Document rendered");
        Ok(path)
    }
}

/// File name for a draft document.
///
/// Session drafts are keyed by session id so re-rendering overwrites the
/// same file. Drafts outside a session use a sanitised title.
pub fn document_filename(session_id: i64, title: &str) -> String {
    if session_id > 0 {
        return format!("session_{session_id}_requirements.docx");
    }

    let slug: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let slug = slug
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let slug: String = slug.chars().take(64).collect();

    if slug.is_empty() {
        "draft_requirements.docx".to_string()
    } else {
        format!("draft_{slug}.docx")
    }
}

/// Unique file name for a draft outside any session.
pub fn adhoc_filename(title: &str) -> String {
    let base = document_filename(0, title);
    let stem = base.trim_end_matches(".docx");
    let id = Uuid::new_v4().simple().to_string();
    format!("{stem}_{}.docx", &id[..8])
}

fn build_archive(model: &DocumentModel) -> Result<Vec<u8>, RenderError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    zip.start_file("[Content_Types].xml", options.clone())?;
    zip.write_all(CONTENT_TYPES.as_bytes())?;

    zip.start_file("_rels/.rels", options.clone())?;
    zip.write_all(ROOT_RELS.as_bytes())?;

    zip.start_file("word/document.xml", options)?;
    zip.write_all(document_xml(model).as_bytes())?;

    Ok(zip.finish()?.into_inner())
}

fn document_xml(model: &DocumentModel) -> String {
    let mut xml = String::from(DOCUMENT_OPEN);

    push_run(&mut xml, &model.title, Some(TITLE_SIZE));
    for section in &model.sections {
        let size = if section.level <= 1 {
            HEADING_SIZE
        } else {
            SUBHEADING_SIZE
        };
        push_run(&mut xml, &section.heading, Some(size));

        for block in &section.blocks {
            match block {
                Block::Paragraph(text) => {
                    for line in text.lines() {
                        push_run(&mut xml, line, None);
                    }
                }
                Block::Bullet(text) => push_run(&mut xml, &format!("\u{2022} {text}"), None),
            }
        }
        // spacer
        xml.push_str("<w:p/>");
    }

    xml.push_str(DOCUMENT_CLOSE);
    xml
}

/// One paragraph with a single run. `heading_size` makes it bold at that size.
fn push_run(xml: &mut String, text: &str, heading_size: Option<u32>) {
    xml.push_str("<w:p><w:r>");
    if let Some(size) = heading_size {
        xml.push_str(&format!("<w:rPr><w:b/><w:sz w:val=\"{size}\"/></w:rPr>"));
    }
    xml.push_str("<w:t xml:space=\"preserve\">");
    xml.push_str(&escape_xml(text));
    xml.push_str("</w:t></w:r></w:p>");
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(' '),
            // not representable in XML 1.0
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{AnalysisReport, IntoDocument, Scope};
    use std::io::Read;
    use tempfile::TempDir;

    fn report() -> AnalysisReport {
        AnalysisReport {
            goal: "Sell <shoes> & boots".into(),
            scope: Scope::Text("Web".into()),
            kpis: vec!["Conversion".into()],
            ..AnalysisReport::default()
        }
    }

    fn read_entry(path: &Path, name: &str) -> String {
        let file = std::fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut out = String::new();
        entry.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn render_writes_valid_package() {
        let dir = TempDir::new().unwrap();
        let renderer = DocxRenderer::new(dir.path().join("storage"));

        let path = renderer
            .render(&report().to_document(), "session_1_requirements.docx")
            .unwrap();
        assert_eq!(path, dir.path().join("storage/session_1_requirements.docx"));

        let xml = read_entry(&path, "word/document.xml");
        assert!(xml.contains("Business Analysis Report"));
        assert!(xml.contains("Sell &lt;shoes&gt; &amp; boots"));
        assert!(xml.contains("\u{2022} Conversion"));
        assert!(read_entry(&path, "[Content_Types].xml").contains("wordprocessingml"));
    }

    #[test]
    fn render_is_deterministic_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let renderer = DocxRenderer::new(dir.path());
        let model = report().to_document();

        let first = renderer.render(&model, "a.docx").unwrap();
        let first_bytes = std::fs::read(&first).unwrap();
        let second = renderer.render(&model, "a.docx").unwrap();
        assert_eq!(first, second);
        assert_eq!(first_bytes, std::fs::read(&second).unwrap());

        let mut changed = report();
        changed.goal = "Different".into();
        renderer.render(&changed.to_document(), "a.docx").unwrap();
        assert_ne!(first_bytes, std::fs::read(&second).unwrap());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn concurrent_renders_of_one_file_both_succeed() {
        let dir = TempDir::new().unwrap();
        let renderer = DocxRenderer::new(dir.path());
        let model = report().to_document();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| renderer.render(&model, "session_3_requirements.docx")))
                .collect();
            for handle in handles {
                assert!(handle.join().unwrap().is_ok());
            }
        });

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["session_3_requirements.docx".to_string()]);
    }

    #[test]
    fn render_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let renderer = DocxRenderer::new(dir.path());
        let model = report().to_document();

        for name in ["", "../x.docx", "a/b.docx", ".hidden"] {
            assert!(matches!(
                renderer.render(&model, name),
                Err(RenderError::InvalidFilename(_))
            ));
        }
    }

    #[test]
    fn filenames() {
        assert_eq!(document_filename(7, "ignored"), "session_7_requirements.docx");
        assert_eq!(document_filename(0, "My Shop: v2!"), "draft_my_shop_v2.docx");

        let a = adhoc_filename("My Shop");
        let b = adhoc_filename("My Shop");
        assert_ne!(a, b);
        assert!(a.starts_with("draft_my_shop_") && a.ends_with(".docx"));
        assert_eq!(document_filename(0, "???"), "draft_requirements.docx");
    }

    #[test]
    fn escape_drops_control_characters() {
        assert_eq!(escape_xml("a\u{1}b\tc"), "ab c");
        assert_eq!(escape_xml("\"q\" 'a'"), "&quot;q&quot; &apos;a&apos;");
    }
}
