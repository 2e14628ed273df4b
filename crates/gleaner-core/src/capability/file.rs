//! Built-in `file:<path>` capability: JSON lines, or a single JSON array.
//!
//! Lines that are not valid JSON are passed through as bare identifiers so one
//! malformed line never fails the job.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;

use serde_json::Value;

use super::{Capability, CapabilityError, RawRecord, RecordStream, ScrapeContext};

#[derive(Debug, Clone)]
pub struct JsonLinesFile {
    path: PathBuf,
}

impl JsonLinesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn parse_line(line: &str) -> RawRecord {
    match serde_json::from_str::<Value>(line) {
        Ok(v) => RawRecord::from_json(v),
        Err(_) => RawRecord::Identifier(line.to_string()),
    }
}

/// True when the first non-whitespace byte is `[`.
fn starts_with_array(file: &mut File) -> std::io::Result<bool> {
    let mut buf = [0u8; 256];
    let n = file.read(&mut buf)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(buf[..n]
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map(|b| *b == b'[')
        .unwrap_or(false))
}

impl Capability for JsonLinesFile {
    fn scrape(&self, _ctx: &ScrapeContext) -> Result<RecordStream, CapabilityError> {
        let mut file = File::open(&self.path).map_err(|e| {
            CapabilityError::Unavailable(format!("open {}: {}", self.path.display(), e))
        })?;

        if starts_with_array(&mut file)? {
            let items: Vec<Value> = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                CapabilityError::Unavailable(format!("{} is not a JSON array: {}", self.path.display(), e))
            })?;
            return Ok(Box::new(items.into_iter().map(|v| Ok(RawRecord::from_json(v)))));
        }

        let lines = BufReader::new(file).lines().filter_map(|line| match line {
            Ok(l) if l.trim().is_empty() => None,
            Ok(l) => Some(Ok(parse_line(l.trim()))),
            Err(e) => Some(Err(CapabilityError::Io(e))),
        });
        Ok(Box::new(lines))
    }
}
