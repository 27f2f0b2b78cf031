//! Title Metadata Layer
//!
//! This module defines the per-title metadata record and an abstraction over
//! the tabular sources it is read from (a spreadsheet export, a test double),
//! so the catalog does not care where the rows come from.

pub mod csv_source;
pub mod mock_source;
pub mod row;
pub mod sort_title;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::{MetadataConfig, MetadataSourceKind};

/// One image attached to a title
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct Thumb {
    /// Kodi aspect: poster, banner, clearart, ...
    pub aspect: String,
    /// URL handed to clients
    pub url: String,
    /// Where the image really lives
    pub source_url: String,
    /// Object name under `/thumbs/` when this image is proxied by us
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_name: Option<String>,
}

/// A cast member with a stable display order
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct Actor {
    pub name: String,
    pub role: String,
    pub order: usize,
}

/// Everything known about one title, keyed in the catalog by its root name
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct MetadataRecord {
    pub title: String,
    pub sort_title: String,
    pub year: Option<u32>,
    pub thumbs: Vec<Thumb>,
    pub directors: Vec<String>,
    pub actors: Vec<Actor>,
    /// Minutes
    pub runtime: Option<u32>,
    pub trailer: String,
    pub outline: String,
    pub plot: String,
    pub tagline: String,
    pub genre: String,
    /// Grouping label; empty means top level
    pub subdir: String,
    pub imdb_id: String,
}

impl MetadataRecord {
    /// Record used for titles that have no row in the table
    pub fn untitled(root_name: &str) -> Self {
        Self {
            title: root_name.to_string(),
            sort_title: sort_title::sort_title(root_name),
            ..Default::default()
        }
    }

    /// Public IMDb page of the title, if its id is known
    pub fn imdb_url(&self) -> Option<String> {
        if self.imdb_id.is_empty() {
            None
        } else {
            Some(format!("https://www.imdb.com/title/{}", self.imdb_id))
        }
    }
}

/// Errors raised while reading a metadata table
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("I/O error reading metadata: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("got {0} row(s), want 2 or more")]
    TooFewRows(usize),

    #[error("metadata source unavailable: {0}")]
    Unavailable(String),
}

/// A raw table: lower-cased headings and rows of text cells.
///
/// Column 0 of every row holds the object name of the title.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetTable {
    pub headings: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    /// Split raw rows into headings and data, rejecting tables without data rows.
    pub fn from_rows(mut rows: Vec<Vec<String>>) -> Result<Self, MetadataError> {
        if rows.len() < 2 {
            return Err(MetadataError::TooFewRows(rows.len()));
        }
        let headings = rows
            .remove(0)
            .into_iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        Ok(Self { headings, rows })
    }

    /// Rows that describe a title: at least two cells and a non-empty name
    pub fn title_rows(&self) -> impl Iterator<Item = (usize, &[String])> + '_ {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.len() >= 2 && !row[0].trim().is_empty())
            .map(|(i, row)| (i + 1, row.as_slice()))
    }
}

/// Trait defining a source of title metadata rows
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Read the whole table
    async fn read_table(&self) -> Result<SheetTable, MetadataError>;

    /// Short name used in log lines
    fn source_name(&self) -> &'static str;
}

/// Create the configured metadata source; `None` when no source is configured.
pub fn create_source(config: &MetadataConfig) -> Result<Option<Arc<dyn MetadataSource>>, MetadataError> {
    match config.source {
        MetadataSourceKind::None => Ok(None),
        MetadataSourceKind::Csv => {
            let source = csv_source::CsvMetadataSource::new(&config.path);
            Ok(Some(Arc::new(source)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(row: &[&str]) -> Vec<String> {
        row.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_rows_lowercases_headings() {
        let table = SheetTable::from_rows(vec![
            strings(&["Name", "Title", " YEAR "]),
            strings(&["Alien.iso", "Alien", "1979"]),
        ])
        .unwrap();
        assert_eq!(table.headings, vec!["name", "title", "year"]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_from_rows_requires_data() {
        assert!(matches!(SheetTable::from_rows(vec![]), Err(MetadataError::TooFewRows(0))));
        assert!(matches!(
            SheetTable::from_rows(vec![strings(&["name", "title"])]),
            Err(MetadataError::TooFewRows(1))
        ));
    }

    #[test]
    fn test_title_rows_skips_short_and_unnamed() {
        let table = SheetTable::from_rows(vec![
            strings(&["name", "title"]),
            strings(&["Alien.iso"]),
            strings(&["", "Nameless"]),
            strings(&["Heat.mp4", "Heat"]),
        ])
        .unwrap();
        let rows: Vec<_> = table.title_rows().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, 3);
        assert_eq!(rows[0].1[0], "Heat.mp4");
    }

    #[test]
    fn test_untitled_record() {
        let record = MetadataRecord::untitled("The Thing");
        assert_eq!(record.title, "The Thing");
        assert_eq!(record.sort_title, "thing");
        assert!(record.imdb_url().is_none());
    }

    #[test]
    fn test_create_source() {
        let mut config = MetadataConfig::default();
        assert!(create_source(&config).unwrap().is_none());

        config.source = MetadataSourceKind::Csv;
        let source = create_source(&config).unwrap().unwrap();
        assert_eq!(source.source_name(), "csv");
    }
}
