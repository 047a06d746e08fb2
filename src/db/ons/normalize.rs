use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use itertools::Itertools;
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;

use super::error::IngestError;

/// Columns of the plant availability dataset, in table order.
pub const EXPECTED_COLUMNS: [&str; 13] = [
    "ID_SUBSISTEMA",
    "NOM_SUBSISTEMA",
    "ID_ESTADO",
    "NOM_ESTADO",
    "NOM_USINA",
    "DIN_INSTANTE",
    "VAL_POTENCIAINSTALADA",
    "VAL_DISPOPERACIONAL",
    "VAL_DISPSINCRONIZADA",
    "NOM_TIPOCOMBUSTIVEL",
    "ID_TIPOUSINA",
    "ID_ONS",
    "CEG",
];

/// Delimiter of the cleaned file.
pub const OUTPUT_DELIMITER: u8 = b';';

const CANDIDATE_DELIMITERS: [u8; 4] = [b';', b',', b'\t', b'|'];
const SNIFF_BYTES: u64 = 64 * 1024;
const SNIFF_LINES: usize = 20;
const BOM: &str = "\u{feff}";

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref NOT_WORD: Regex = Regex::new(r"[^0-9a-zA-Z_]").unwrap();
}

#[derive(Debug)]
pub struct NormalizedFile {
    pub path: PathBuf,
    pub source_delimiter: u8,
    pub rows: usize,
    /// Expected columns the source didn't have, loaded as NULL
    pub missing_columns: Vec<String>,
    /// Source columns not in the expected schema
    pub dropped_columns: Vec<String>,
}

/// Make a column name safe for an unquoted SQL identifier, e.g.
/// "\u{feff} val potencia-instalada " -> "VAL_POTENCIAINSTALADA".
pub fn clean_column_name(name: &str) -> String {
    let name = name.trim_start_matches(BOM).trim();
    let name = WHITESPACE.replace_all(name, "_");
    NOT_WORD.replace_all(&name, "").to_ascii_uppercase()
}

/// Guess the field delimiter from the first lines of a file.  The candidate
/// that appears the same number of times on the most lines wins, ties go to
/// the one with more fields per line.  Falls back to a comma.
pub fn detect_delimiter(sample: &str) -> u8 {
    let lines: Vec<&str> = sample
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    let Some(header) = lines.first() else {
        return b',';
    };

    let mut best: Option<(u8, (usize, usize))> = None;
    for delimiter in CANDIDATE_DELIMITERS {
        let n = count_unquoted(header, delimiter);
        if n == 0 {
            continue;
        }
        let consistent = lines
            .iter()
            .filter(|line| count_unquoted(line, delimiter) == n)
            .count();
        let score = (consistent, n);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((delimiter, score));
        }
    }
    best.map(|(d, _)| d).unwrap_or(b',')
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// For each expected column, the position of the source column with the same
/// cleaned name.  With duplicated names the first one wins.
pub fn reindex(cleaned_headers: &[String]) -> Vec<Option<usize>> {
    EXPECTED_COLUMNS
        .iter()
        .map(|expected| cleaned_headers.iter().position(|h| h == expected))
        .collect()
}

/// Path of the cleaned file, next to the raw one.
pub fn cleaned_path(raw: &Path) -> PathBuf {
    let stem = raw
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    raw.with_file_name(format!("{}_cleaned.csv", stem))
}

fn read_sample(path: &Path) -> Result<String, IngestError> {
    let file = File::open(path).map_err(|e| IngestError::io(path, e))?;
    let mut buf = Vec::new();
    file.take(SNIFF_BYTES)
        .read_to_end(&mut buf)
        .map_err(|e| IngestError::io(path, e))?;
    // a multi-byte char may be cut at the end of the sample
    let sample = match String::from_utf8(buf) {
        Ok(s) => s,
        Err(e) => {
            let valid = e.utf8_error().valid_up_to();
            if e.utf8_error().error_len().is_some() {
                return Err(IngestError::Decode(path.to_path_buf()));
            }
            let mut bytes = e.into_bytes();
            bytes.truncate(valid);
            String::from_utf8(bytes).map_err(|_| IngestError::Decode(path.to_path_buf()))?
        }
    };
    Ok(sample.trim_start_matches(BOM).to_string())
}

fn csv_read_error(path: &Path, source: csv::Error) -> IngestError {
    if matches!(source.kind(), csv::ErrorKind::Utf8 { .. }) {
        return IngestError::Decode(path.to_path_buf());
    }
    IngestError::CsvRead {
        path: path.to_path_buf(),
        source,
    }
}

/// Read the downloaded file and write a cleaned copy with the expected columns
/// only, `;` separated, UTF-8 with a BOM.
pub fn normalize_file(raw: &Path) -> Result<NormalizedFile, IngestError> {
    if !raw.exists() {
        return Err(IngestError::MissingFile(raw.to_path_buf()));
    }
    let delimiter = detect_delimiter(&read_sample(raw)?);

    let file = File::open(raw).map_err(|e| IngestError::io(raw, e))?;
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_reader(BufReader::new(file));
    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| csv_read_error(raw, e))?
        .iter()
        .map(clean_column_name)
        .collect();
    let positions = reindex(&headers);

    let missing_columns: Vec<String> = EXPECTED_COLUMNS
        .iter()
        .zip(&positions)
        .filter(|(_, p)| p.is_none())
        .map(|(c, _)| c.to_string())
        .collect();
    let dropped_columns: Vec<String> = headers
        .iter()
        .filter(|h| !EXPECTED_COLUMNS.contains(&h.as_str()))
        .cloned()
        .collect();
    if !missing_columns.is_empty() {
        warn!("columns missing from {}: {}", raw.display(), missing_columns.iter().join(", "));
    }
    if !dropped_columns.is_empty() {
        info!("dropping columns {}", dropped_columns.iter().join(", "));
    }

    let path = cleaned_path(raw);
    let write_error = |source| IngestError::CsvWrite {
        path: path.clone(),
        source,
    };
    let mut out = BufWriter::new(File::create(&path).map_err(|e| IngestError::io(&path, e))?);
    out.write_all(BOM.as_bytes())
        .map_err(|e| IngestError::io(&path, e))?;
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(OUTPUT_DELIMITER)
        .from_writer(out);
    wtr.write_record(EXPECTED_COLUMNS).map_err(write_error)?;

    let mut rows = 0;
    let mut record = csv::StringRecord::new();
    while rdr
        .read_record(&mut record)
        .map_err(|e| csv_read_error(raw, e))?
    {
        let fields = positions
            .iter()
            .map(|p| p.and_then(|i| record.get(i)).unwrap_or(""));
        wtr.write_record(fields).map_err(write_error)?;
        rows += 1;
    }
    wtr.flush().map_err(|e| IngestError::io(&path, e))?;
    info!("wrote {} rows to {}", rows, path.display());

    Ok(NormalizedFile {
        path,
        source_delimiter: delimiter,
        rows,
        missing_columns,
        dropped_columns,
    })
}

/// The first `n` lines of a file, or all of them if the file is shorter.
pub fn head(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines: Vec<String> = reader.lines().take(n).collect::<io::Result<_>>()?;
    if let Some(first) = lines.first_mut() {
        *first = first.trim_start_matches(BOM).to_string();
    }
    Ok(lines)
}

/// Log the first lines of the cleaned file.  Never fails.
pub fn log_sample(path: &Path) {
    match head(path, 4) {
        Ok(lines) => {
            info!("cleaned csv sample lines:");
            for line in lines {
                info!("{}", line);
            }
        }
        Err(e) => warn!("Could not read sample of {}: {}", path.display(), e),
    }
}
