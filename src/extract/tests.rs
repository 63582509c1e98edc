use super::*;
use crate::PipelineError;

#[test]
fn plain_text_passes_through_with_normalized_line_endings() {
    let text = PlainTextExtractor
        .extract(b"line one\r\nline two\n", "text/plain", "notes.txt")
        .expect("extraction succeeds");
    assert_eq!(text, "line one\nline two\n");
}

#[test]
fn invalid_utf8_is_a_typed_error() {
    let error = PlainTextExtractor
        .extract(&[0x66, 0xff, 0x66], "text/plain", "bad.txt")
        .expect_err("invalid bytes should fail");

    assert!(matches!(error, ExtractError::InvalidEncoding { .. }));
    assert_eq!(error.source_name(), "bad.txt");
    assert!(error.reason().contains("invalid encoding"));
}

#[test]
fn empty_input_extracts_to_empty_text() {
    let registry = ExtractorRegistry::with_defaults();
    let text = registry
        .extract(b"", "text/plain", "empty.txt")
        .expect("empty input is valid");
    assert_eq!(text, "");
}

#[test]
fn markdown_formatting_is_stripped() {
    let markdown = b"# Leave Policy\n\nEmployees accrue **two days** per [month](https://example.com).";
    let text = MarkdownExtractor
        .extract(markdown, "text/markdown", "policy.md")
        .expect("extraction succeeds");

    assert_eq!(
        text,
        "Leave Policy\n\nEmployees accrue two days per month."
    );
}

#[test]
fn markdown_keeps_paragraph_breaks() {
    let markdown = b"First paragraph.\n\nSecond paragraph.";
    let text = MarkdownExtractor
        .extract(markdown, "text/markdown", "doc.md")
        .expect("extraction succeeds");
    assert_eq!(text, "First paragraph.\n\nSecond paragraph.");
}

#[test]
fn markdown_lists_and_code_blocks_become_text() {
    let markdown = b"- one\n- two\n\n```\nfn main() {}\n```\n\nUse `cargo build` often.";
    let text = MarkdownExtractor
        .extract(markdown, "text/markdown", "doc.md")
        .expect("extraction succeeds");

    assert!(text.contains("- one\n- two"));
    assert!(text.contains("fn main() {}"));
    assert!(text.contains("Use cargo build often."));
    assert!(!text.contains("```"));
}

#[test]
fn registry_prefers_markdown_for_markdown_types() {
    let registry = ExtractorRegistry::with_defaults();
    let text = registry
        .extract(b"# Title", "text/markdown", "doc.md")
        .expect("extraction succeeds");
    assert_eq!(text, "Title");
}

#[test]
fn registry_resolves_type_from_extension() {
    let registry = ExtractorRegistry::with_defaults();

    let text = registry
        .extract(b"# Title", "", "notes.md")
        .expect("extension resolves to markdown");
    assert_eq!(text, "Title");

    let text = registry
        .extract(b"# Title", "application/octet-stream", "notes.txt")
        .expect("extension resolves to plain text");
    assert_eq!(text, "# Title");
}

#[test]
fn mime_parameters_are_ignored() {
    let registry = ExtractorRegistry::with_defaults();
    let text = registry
        .extract(b"hello", "text/plain; charset=utf-8", "notes.txt")
        .expect("parameterized mime type resolves");
    assert_eq!(text, "hello");
}

#[test]
fn unsupported_type_names_the_source() {
    let registry = ExtractorRegistry::with_defaults();
    let error = registry
        .extract(b"%PDF-1.4", "application/pdf", "report.pdf")
        .expect_err("pdf is unsupported");

    assert_eq!(error.source_name(), "report.pdf");
    assert!(error.reason().contains("application/pdf"));
}

#[test]
fn extraction_errors_convert_to_pipeline_errors() {
    let error = ExtractError::UnsupportedType {
        source: "report.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
    };

    let converted = PipelineError::from(error);
    let message = converted.to_string();
    assert!(message.contains("Extraction failed for 'report.pdf'"));
    assert!(message.contains("application/pdf"));
}
