//! Catalog dump files: `catalog_YYYYMMDD.jsonl`, optionally gzipped.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use catalog_sync::{SourceError, Timestamp};
use chrono::NaiveDate;
use flate2::read::GzDecoder;

const PREFIX: &str = "catalog_";
const DATE_FORMAT: &str = "%Y%m%d";

type DumpReader = Box<dyn BufRead + Send + Sync>;

/// One dated dump file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFile {
    pub date: NaiveDate,
    pub path: PathBuf,
}

impl DumpFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The checkpoint recorded once this file is fully imported.
    pub fn checkpoint(&self) -> String {
        format_checkpoint(self.date)
    }

    /// Upstream modification time of every record in the file.
    pub fn modified_at(&self) -> Timestamp {
        self.date.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// Open the file for streaming, decompressing `.gz` files.
    pub fn open_lines(&self) -> Result<DumpLines, SourceError> {
        let file = File::open(&self.path).map_err(|e| io_error(&self.path, e))?;
        let reader: DumpReader = if self.path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        Ok(DumpLines {
            path: self.path.clone(),
            lines: reader.lines(),
        })
    }
}

/// Non-blank lines of an open dump file, read one at a time.
pub struct DumpLines {
    path: PathBuf,
    lines: Lines<DumpReader>,
}

impl Iterator for DumpLines {
    type Item = Result<String, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(Ok(line)),
                Err(e) => return Some(Err(io_error(&self.path, e))),
            }
        }
        None
    }
}

/// The date embedded in a dump file name, if it is one.
pub fn parse_dump_name(name: &str) -> Option<NaiveDate> {
    let stem = name
        .strip_suffix(".jsonl.gz")
        .or_else(|| name.strip_suffix(".jsonl"))?;
    let digits = stem.strip_prefix(PREFIX)?;
    if digits.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(digits, DATE_FORMAT).ok()
}

pub fn parse_checkpoint(checkpoint: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(checkpoint.trim(), DATE_FORMAT).ok()
}

pub fn format_checkpoint(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Dump files in `dir`, oldest first. Other files are ignored.
///
/// Two files of the same date are refused, as they would share a checkpoint.
pub fn list_dump_files(dir: &Path) -> Result<Vec<DumpFile>, SourceError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_error(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        let name = entry.file_name();
        let Some(date) = parse_dump_name(&name.to_string_lossy()) else {
            continue;
        };
        files.push(DumpFile {
            date,
            path: entry.path(),
        });
    }

    files.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.path.cmp(&b.path)));
    if let Some(pair) = files.windows(2).find(|pair| pair[0].date == pair[1].date) {
        return Err(SourceError::Other(format!(
            "{} and {} are both dumps of {}",
            pair[0].file_name(),
            pair[1].file_name(),
            pair[0].checkpoint()
        )));
    }
    Ok(files)
}

fn io_error(path: &Path, e: std::io::Error) -> SourceError {
    SourceError::Io(format!("{}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_gzipped_names() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5);
        assert_eq!(parse_dump_name("catalog_20240105.jsonl"), expected);
        assert_eq!(parse_dump_name("catalog_20240105.jsonl.gz"), expected);
    }

    #[test]
    fn rejects_other_names() {
        assert_eq!(parse_dump_name("catalog_2024015.jsonl"), None);
        assert_eq!(parse_dump_name("catalog_20241305.jsonl"), None);
        assert_eq!(parse_dump_name("stocks_20240105.jsonl"), None);
        assert_eq!(parse_dump_name("catalog_20240105.csv"), None);
    }

    #[test]
    fn checkpoint_is_the_compact_date() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(format_checkpoint(date), "20240105");
        assert_eq!(parse_checkpoint("20240105"), Some(date));
        assert_eq!(parse_checkpoint("yesterday"), None);
    }

    #[test]
    fn lines_are_streamed_without_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog_20240105.jsonl");
        std::fs::write(&path, "first\n\n   \nsecond\n").unwrap();
        let file = DumpFile {
            date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            path,
        };

        let mut lines = file.open_lines().unwrap();
        assert_eq!(lines.next().unwrap().unwrap(), "first");
        assert_eq!(lines.next().unwrap().unwrap(), "second");
        assert!(lines.next().is_none());
    }

    #[test]
    fn same_date_in_plain_and_gzipped_form_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("catalog_20240104.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("catalog_20240105.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("catalog_20240105.jsonl.gz"), "").unwrap();

        let err = list_dump_files(dir.path()).unwrap_err();
        assert!(matches!(&err, SourceError::Other(msg)
            if msg.contains("catalog_20240105.jsonl and catalog_20240105.jsonl.gz")));
    }

    #[test]
    fn distinct_dates_are_listed_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("catalog_20240105.jsonl.gz"), "").unwrap();
        std::fs::write(dir.path().join("catalog_20240104.jsonl"), "").unwrap();

        let names: Vec<String> = list_dump_files(dir.path())
            .unwrap()
            .iter()
            .map(DumpFile::file_name)
            .collect();
        assert_eq!(names, vec!["catalog_20240104.jsonl", "catalog_20240105.jsonl.gz"]);
    }
}
