//! Reading uploaded files into polars frames.
//!
//! CSV files go through the polars reader with every column read as text;
//! spreadsheets are decoded with calamine from the first worksheet. Either
//! way the normalizer receives a frame of string columns named after the
//! file's header row.

use crate::error::{ProcessingError, Result};
use crate::normalizer::{CanonicalField, reconcile_headers};
use crate::utils::string_values;
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// An uploaded file held fully in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Read a file from disk, keeping only its file name.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { filename, bytes })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Accepted upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Spreadsheet,
}

impl FileFormat {
    /// Detect the format from the file extension.
    pub fn from_filename(filename: &str) -> Result<Self> {
        let extension = Path::new(filename)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => Ok(Self::Csv),
            "xlsx" | "xls" => Ok(Self::Spreadsheet),
            _ => Err(ProcessingError::UnsupportedFormat(filename.to_string())),
        }
    }
}

/// Check the upload against the size limit.
pub fn check_file_size(upload: &UploadedFile, limit: u64) -> Result<()> {
    if upload.size() > limit {
        return Err(ProcessingError::FileTooLarge {
            size: upload.size(),
            limit,
        });
    }
    Ok(())
}

/// Read an upload into a frame of string columns.
pub fn read_table(upload: &UploadedFile) -> Result<DataFrame> {
    let df = match FileFormat::from_filename(&upload.filename)? {
        FileFormat::Csv => read_csv(&upload.filename, &upload.bytes)?,
        FileFormat::Spreadsheet => read_spreadsheet(&upload.filename, &upload.bytes)?,
    };
    info!(
        "Read {} rows x {} columns from {}",
        df.height(),
        df.width(),
        upload.filename
    );
    Ok(df)
}

fn csv_options() -> CsvReadOptions {
    // Schema length 0 reads every column as String
    CsvReadOptions::default()
        .with_infer_schema_length(Some(0))
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_quote_char(Some(b'"')))
}

fn read_csv(filename: &str, bytes: &[u8]) -> Result<DataFrame> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    match csv_options()
        .into_reader_with_file_handle(Cursor::new(bytes.to_vec()))
        .finish()
    {
        Ok(df) => return Ok(df),
        Err(e) => debug!("Standard CSV loading failed: {}", e),
    }

    // Retry on cleaned content
    let content = String::from_utf8_lossy(bytes);
    let cleaned = clean_csv_content(&content);
    csv_options()
        .into_reader_with_file_handle(Cursor::new(cleaned.into_bytes()))
        .finish()
        .map_err(|e| ProcessingError::UnreadableFile {
            path: filename.to_string(),
            reason: e.to_string(),
        })
}

/// Collapse doubled quotes and drop blank lines.
fn clean_csv_content(content: &str) -> String {
    content
        .replace("\"\"\"", "\"")
        .replace("\"\"", "\"")
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn read_spreadsheet(filename: &str, bytes: &[u8]) -> Result<DataFrame> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ProcessingError::UnreadableFile {
            path: filename.to_string(),
            reason: "workbook has no worksheets".to_string(),
        })?;
    let range = workbook.worksheet_range(&sheet)?;

    let mut rows = range.rows();
    let header_row = rows.next().ok_or_else(|| ProcessingError::UnreadableFile {
        path: filename.to_string(),
        reason: format!("worksheet '{}' is empty", sheet),
    })?;
    let df = worksheet_frame(header_row, rows)?;
    debug!("Decoded worksheet '{}' from {}", sheet, filename);
    Ok(df)
}

/// Build a text frame from worksheet rows. Blank rows are kept so that row
/// numbers in later messages match the worksheet; normalization drops them.
fn worksheet_frame<'a>(
    header_row: &[Data],
    rows: impl Iterator<Item = &'a [Data]>,
) -> Result<DataFrame> {
    let headers = unique_headers(header_row.iter().map(cell_text).collect());

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for row in rows {
        for (idx, column) in columns.iter_mut().enumerate() {
            column.push(row.get(idx).and_then(cell_text));
        }
    }

    let series: Vec<Column> = headers
        .into_iter()
        .zip(columns)
        .map(|(name, values)| Series::new(name.into(), values).into_column())
        .collect();
    Ok(DataFrame::new(series)?)
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|naive| naive.format("%Y-%m-%d %H:%M:%S").to_string()),
        other => Some(other.to_string()),
    }
}

/// Name blank headers `column_{i}` and suffix repeated ones.
fn unique_headers(raw: Vec<Option<String>>) -> Vec<String> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    raw.into_iter()
        .enumerate()
        .map(|(idx, header)| {
            let base = header.unwrap_or_else(|| format!("column_{}", idx + 1));
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{}_{}", base, count)
            }
        })
        .collect()
}

/// Canonical field and the header it was matched to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnAssignment {
    pub field: CanonicalField,
    pub column: String,
}

/// What an upload looks like before it is ingested.
#[derive(Debug, Clone, Serialize)]
pub struct FilePreview {
    pub filename: String,
    pub format: FileFormat,
    pub columns: Vec<String>,
    /// Data rows in the whole file.
    pub row_count: usize,
    pub sample_rows: Vec<BTreeMap<String, Option<String>>>,
    pub column_mapping: Vec<ColumnAssignment>,
    pub missing_required: Vec<String>,
}

/// Read an upload and describe it without persisting anything.
pub fn preview_file(upload: &UploadedFile, max_rows: usize) -> Result<FilePreview> {
    let format = FileFormat::from_filename(&upload.filename)?;
    let df = read_table(upload)?;
    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let head = df.head(Some(max_rows));
    let mut sample_rows = vec![BTreeMap::new(); head.height()];
    for column in &columns {
        for (row, value) in sample_rows.iter_mut().zip(string_values(&head, column)?) {
            row.insert(column.clone(), value);
        }
    }

    let mapping = reconcile_headers(&columns);
    Ok(FilePreview {
        filename: upload.filename.clone(),
        format,
        row_count: df.height(),
        sample_rows,
        column_mapping: mapping
            .assignments
            .iter()
            .map(|(field, column)| ColumnAssignment {
                field: *field,
                column: column.clone(),
            })
            .collect(),
        missing_required: mapping.missing_names(),
        columns,
    })
}
