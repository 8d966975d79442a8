use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use catalog_sync::{
    Entity, EntityKind, FillContext, FillError, LocalProvider, Product, ProvidableInfo, Pull,
    ResumeToken, SourceError, Timestamp,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::dump_files::{DumpFile, DumpLines, list_dump_files, parse_checkpoint};
use crate::price::to_cents;

pub const CATALOG_DUMP_CLASS: &str = "CatalogDump";

/// One line of a catalog dump.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogRecord {
    pub ean: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    /// Publisher price in euros.
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Imports the product catalog from dated dump files, one part per file.
///
/// Files already covered by the resume checkpoint are skipped. Cover images
/// are read from an optional thumbs directory: `<ean>.jpg` for the first
/// image, `<ean>_<n>.jpg` for the following ones, dated by file mtime.
pub struct CatalogDumpProvider {
    dump_dir: PathBuf,
    thumbs_dir: Option<PathBuf>,
    files: VecDeque<DumpFile>,
    part: Option<DumpFile>,
    lines: Option<DumpLines>,
    current: Option<CatalogRecord>,
}

impl CatalogDumpProvider {
    const MAX_THUMBS: usize = 8;

    pub fn new(dump_dir: impl Into<PathBuf>, thumbs_dir: Option<PathBuf>) -> Self {
        Self {
            dump_dir: dump_dir.into(),
            thumbs_dir,
            files: VecDeque::new(),
            part: None,
            lines: None,
            current: None,
        }
    }

    fn thumb_path(&self, ean: &str, index: usize) -> Option<PathBuf> {
        let dir = self.thumbs_dir.as_ref()?;
        let name = if index == 0 {
            format!("{ean}.jpg")
        } else {
            format!("{ean}_{index}.jpg")
        };
        Some(dir.join(name))
    }

    fn thumb_ean(entity: &Entity) -> Option<&str> {
        if entity.kind() != EntityKind::Product {
            return None;
        }
        entity.external_id.as_deref()
    }

    /// Parse the next line of the open part into an identity record.
    fn next_record(&mut self, part: &DumpFile) -> Result<Option<ProvidableInfo>, SourceError> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };

        for line in lines {
            let line = line?;
            let record: CatalogRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(file = %part.file_name(), error = %e, "skipping malformed catalog line");
                    continue;
                }
            };

            match ProvidableInfo::new(EntityKind::Product, &record.ean, Some(part.modified_at())) {
                Ok(info) => {
                    self.current = Some(record);
                    return Ok(Some(info));
                }
                Err(e) => {
                    warn!(file = %part.file_name(), error = %e, "skipping catalog record");
                }
            }
        }
        Ok(None)
    }
}

fn modified_time(path: &Path) -> Option<Timestamp> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[async_trait::async_trait]
impl LocalProvider for CatalogDumpProvider {
    fn name(&self) -> &str {
        CATALOG_DUMP_CLASS
    }

    async fn start(&mut self, resume: Option<&ResumeToken>) -> Result<(), SourceError> {
        let mut files = list_dump_files(&self.dump_dir)?;

        match resume.map(|token| (token, parse_checkpoint(token.as_str()))) {
            Some((_, Some(done_until))) => {
                files.retain(|file| file.date > done_until);
                info!(checkpoint = %done_until, remaining = files.len(), "resuming catalog import");
            }
            Some((token, None)) => {
                warn!(checkpoint = token.as_str(), "ignoring unreadable checkpoint");
            }
            None => {}
        }

        self.files = files.into();
        self.part = None;
        self.lines = None;
        self.current = None;
        Ok(())
    }

    async fn next(&mut self) -> Result<Pull, SourceError> {
        if let Some(part) = self.part.take() {
            if let Some(info) = self.next_record(&part)? {
                self.part = Some(part);
                return Ok(Pull::Batch(vec![info]));
            }
            self.lines = None;
            self.current = None;
            return Ok(Pull::PartEnd(part.checkpoint()));
        }

        let Some(file) = self.files.pop_front() else {
            return Ok(Pull::Exhausted);
        };

        self.lines = Some(file.open_lines()?);
        debug!(file = %file.file_name(), "opened catalog dump");
        let label = file.file_name();
        self.part = Some(file);
        Ok(Pull::PartStart(label))
    }

    fn fill_product(&self, product: &mut Product, ctx: &FillContext<'_>) -> Result<(), FillError> {
        let record = self
            .current
            .as_ref()
            .filter(|record| record.ean == ctx.external_id())
            .ok_or_else(|| FillError::MissingField(format!("record for {}", ctx.external_id())))?;

        product.name = record.title.trim().to_owned();
        product.ean = Some(record.ean.clone());
        product.author = record.author.clone();
        product.price_cents = record.price.map(to_cents).transpose()?;
        product.description = record.description.clone();
        Ok(())
    }

    fn thumb_dates(&self, entity: &Entity) -> Vec<Option<Timestamp>> {
        let Some(ean) = Self::thumb_ean(entity) else {
            return Vec::new();
        };

        let mut dates = Vec::new();
        for index in 0..Self::MAX_THUMBS {
            let Some(path) = self.thumb_path(ean, index) else {
                break;
            };
            if !path.is_file() {
                break;
            }
            dates.push(modified_time(&path));
        }
        dates
    }

    async fn thumb_bytes(
        &mut self,
        entity: &Entity,
        index: usize,
    ) -> Result<Option<Vec<u8>>, SourceError> {
        let Some(path) = Self::thumb_ean(entity).and_then(|ean| self.thumb_path(ean, index)) else {
            return Ok(None);
        };

        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SourceError::Io(format!("{}: {e}", path.display()))),
        }
    }
}
