/// Format-specific loaders turning one file into raw text.
///
/// Dispatch is keyed by lower-cased file extension. Loaders return raw text;
/// cleaning and chunking happen in the ingestor.
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use calamine::{Data, Reader, open_workbook_auto};
use docx_rs::{
    DocumentChild, Paragraph, ParagraphChild, RunChild, Table, TableCellContent, TableChild,
    TableRowChild,
};
use pulldown_cmark::{Event, Parser, TagEnd};
use regex::Regex;
use scraper::Html;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("DOCX error: {0}")]
    Docx(String),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Loader = fn(&Path) -> Result<String, LoaderError>;

/// Extensions with a loader, for reporting.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "pdf", "docx", "xlsx", "xlsm", "xls", "ods", "pptx", "json", "csv",
    "html", "htm",
];

/// Pick the loader for a (lower-cased) extension.
pub fn loader_for(extension: &str) -> Option<Loader> {
    let loader: Loader = match extension {
        "txt" => load_text,
        "md" | "markdown" => load_markdown,
        "pdf" => load_pdf,
        "docx" => load_docx,
        "xlsx" | "xlsm" | "xls" | "ods" => load_spreadsheet,
        "pptx" => load_pptx,
        "json" => load_json,
        "csv" => load_csv,
        "html" | "htm" => load_html,
        _ => return None,
    };
    Some(loader)
}

fn load_text(path: &Path) -> Result<String, LoaderError> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn load_markdown(path: &Path) -> Result<String, LoaderError> {
    let source = load_text(path)?;
    let mut out = String::with_capacity(source.len());

    for event in Parser::new(&source) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::TableRow
                | TagEnd::BlockQuote(_),
            ) => out.push_str("\n\n"),
            Event::End(TagEnd::TableCell) => out.push_str(" | "),
            _ => {}
        }
    }

    Ok(out)
}

fn load_pdf(path: &Path) -> Result<String, LoaderError> {
    let doc = lopdf::Document::load(path)?;
    let mut pages = Vec::new();

    for page_number in doc.get_pages().keys() {
        match doc.extract_text(&[*page_number]) {
            Ok(text) => pages.push(text),
            Err(e) => debug!("Skipping page {page_number} of {}: {e}", path.display()),
        }
    }

    Ok(pages.join("\n\n"))
}

fn load_docx(path: &Path) -> Result<String, LoaderError> {
    let bytes = fs::read(path)?;
    let docx = docx_rs::read_docx(&bytes).map_err(|e| LoaderError::Docx(e.to_string()))?;

    let mut blocks = Vec::new();
    for child in &docx.document.children {
        match child {
            DocumentChild::Paragraph(p) => blocks.push(paragraph_text(p)),
            DocumentChild::Table(t) => blocks.extend(table_rows(t)),
            _ => {}
        }
    }

    blocks.retain(|b| !b.trim().is_empty());
    Ok(blocks.join("\n\n"))
}

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut out = String::new();
    for child in &paragraph.children {
        if let ParagraphChild::Run(run) = child {
            for run_child in &run.children {
                match run_child {
                    RunChild::Text(t) => out.push_str(&t.text),
                    RunChild::Tab(_) => out.push('\t'),
                    RunChild::Break(_) => out.push('\n'),
                    _ => {}
                }
            }
        }
    }
    out
}

/// One line per table row, cells joined with ` | `.
fn table_rows(table: &Table) -> Vec<String> {
    let mut rows = Vec::new();
    for TableChild::TableRow(row) in &table.rows {
        let mut cells = Vec::new();
        for TableRowChild::TableCell(cell) in &row.cells {
            let text: Vec<String> = cell
                .children
                .iter()
                .filter_map(|c| match c {
                    TableCellContent::Paragraph(p) => Some(paragraph_text(p)),
                    _ => None,
                })
                .collect();
            cells.push(text.join(" "));
        }
        rows.push(cells.join(" | "));
    }
    rows
}

fn load_spreadsheet(path: &Path) -> Result<String, LoaderError> {
    let mut workbook = open_workbook_auto(path)?;
    let mut out = Vec::new();

    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name)?;
        out.push(format!("[{name}]"));
        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .filter(|c| !matches!(c, Data::Empty))
                .map(|c| c.to_string())
                .collect();
            if !cells.is_empty() {
                out.push(cells.join(" | "));
            }
        }
        out.push(String::new());
    }

    Ok(out.join("\n"))
}

static SLIDE_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<a:t(?:\s[^>]*)?>([^<]*)</a:t>").unwrap());

fn slide_number(entry: &str) -> Option<u32> {
    entry
        .strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

fn load_pptx(path: &Path) -> Result<String, LoaderError> {
    let mut archive = zip::ZipArchive::new(fs::File::open(path)?)?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| slide_number(name).map(|n| (n, name.to_string())))
        .collect();
    slides.sort();

    let mut out = Vec::new();
    for (_, name) in slides {
        let mut xml = String::new();
        archive.by_name(&name)?.read_to_string(&mut xml)?;
        let runs: Vec<String> = SLIDE_TEXT
            .captures_iter(&xml)
            .map(|c| decode_xml_entities(&c[1]))
            .filter(|t| !t.trim().is_empty())
            .collect();
        if !runs.is_empty() {
            out.push(runs.join(" "));
        }
    }

    Ok(out.join("\n\n"))
}

fn decode_xml_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn load_json(path: &Path) -> Result<String, LoaderError> {
    let data: Value = serde_json::from_slice(&fs::read(path)?)?;
    Ok(json_to_text(&data, 0))
}

/// Flatten JSON into indented `key: value` lines.
///
/// Nulls, empty strings and `success` flags carry nothing worth retrieving
/// and are dropped. Nested containers get a `key:` header and one more level
/// of indentation; list items are rendered as `- value` or `- [n]:`.
pub fn json_to_text(data: &Value, indent: usize) -> String {
    let prefix = "  ".repeat(indent);
    let mut parts = Vec::new();

    match data {
        Value::Object(map) => {
            for (key, value) in map {
                if key == "success" || value.is_null() || value.as_str() == Some("") {
                    continue;
                }
                if value.is_object() || value.is_array() {
                    parts.push(format!("{prefix}{key}:"));
                    push_nested(&mut parts, json_to_text(value, indent + 1));
                } else {
                    parts.push(format!("{prefix}{key}: {}", scalar_text(value)));
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if item.is_object() || item.is_array() {
                    parts.push(format!("{prefix}- [{}]:", i + 1));
                    push_nested(&mut parts, json_to_text(item, indent + 1));
                } else {
                    parts.push(format!("{prefix}- {}", scalar_text(item)));
                }
            }
        }
        scalar => return scalar_text(scalar),
    }

    parts.join("\n")
}

fn push_nested(parts: &mut Vec<String>, nested: String) {
    if !nested.is_empty() {
        parts.push(nested);
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn load_csv(path: &Path) -> Result<String, LoaderError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut lines = Vec::new();

    for record in reader.records() {
        let record = record?;
        let fields: Vec<String> = record
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(i, v)| match headers.get(i) {
                Some(h) if !h.is_empty() => format!("{h}: {v}"),
                _ => v.to_string(),
            })
            .collect();
        if !fields.is_empty() {
            lines.push(fields.join(", "));
        }
    }

    Ok(lines.join("\n"))
}

fn load_html(path: &Path) -> Result<String, LoaderError> {
    let source = load_text(path)?;
    let document = Html::parse_document(&source);
    let mut out = String::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .is_some_and(|name| matches!(name, "script" | "style" | "noscript"));
        if !hidden {
            out.push_str(text);
            out.push('\n');
        }
    }

    Ok(out)
}
