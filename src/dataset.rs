use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// A CSV file as read from disk: header names plus rows padded to the header
/// width.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Lines skipped because they could not be parsed or had extra fields.
    pub malformed: usize,
    pub encoding: Encoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Latin1,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Read a dataset, falling back to ISO-8859-1 when the bytes are not UTF-8.
pub fn read_csv(path: &Path) -> Result<RawTable> {
    let bytes = std::fs::read(path).map_err(|source| Error::Dataset {
        path: path.to_path_buf(),
        source,
    })?;
    let (text, encoding) = decode(bytes);
    if encoding == Encoding::Latin1 {
        debug!("{} is not valid UTF-8, decoded as ISO-8859-1", path.display());
    }

    let mut table = parse(&text).map_err(|source| Error::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    table.encoding = encoding;
    Ok(table)
}

fn decode(bytes: Vec<u8>) -> (String, Encoding) {
    match String::from_utf8(bytes) {
        Ok(text) => {
            let text = match text.strip_prefix('\u{feff}') {
                Some(rest) => rest.to_string(),
                None => text,
            };
            (text, Encoding::Utf8)
        }
        // Every byte maps to the code point of the same value.
        Err(e) => (
            e.into_bytes().into_iter().map(char::from).collect(),
            Encoding::Latin1,
        ),
    }
}

pub fn parse(text: &str) -> csv::Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut malformed = 0usize;

    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                debug!("skipping record {}: {}", line + 1, e);
                malformed += 1;
                continue;
            }
        };
        if record.len() > width {
            debug!(
                "skipping record {}: expected {} fields, saw {}",
                line + 1,
                width,
                record.len()
            );
            malformed += 1;
            continue;
        }
        let row = (0..width)
            .map(|i| record.get(i).unwrap_or_default().to_string())
            .collect();
        rows.push(row);
    }

    Ok(RawTable {
        columns,
        rows,
        malformed,
        encoding: Encoding::Utf8,
    })
}
