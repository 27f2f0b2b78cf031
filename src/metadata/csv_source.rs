//! CSV metadata source
//!
//! Reads a CSV export of the title spreadsheet. The first record holds the
//! headings; short rows are allowed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;

use crate::metadata::{MetadataError, MetadataSource, SheetTable};

pub struct CsvMetadataSource {
    path: PathBuf,
}

impl CsvMetadataSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    /// Parse CSV text into a table.
    pub fn parse(data: &[u8]) -> Result<SheetTable, MetadataError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(data);

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        SheetTable::from_rows(rows)
    }
}

#[async_trait]
impl MetadataSource for CsvMetadataSource {
    async fn read_table(&self) -> Result<SheetTable, MetadataError> {
        let data = tokio::fs::read(&self.path).await?;
        debug!("Read {} bytes of metadata from {}", data.len(), self.path.display());
        Self::parse(&data)
    }

    fn source_name(&self) -> &'static str {
        "csv"
    }
}
