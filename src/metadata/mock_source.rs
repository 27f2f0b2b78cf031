//! Mock implementation of MetadataSource for testing

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::metadata::{MetadataError, MetadataSource, SheetTable};

/// In-memory table that counts reads and can be told to fail them
pub struct MockMetadataSource {
    table: Mutex<SheetTable>,
    read_calls: AtomicUsize,
    fail_reads: AtomicBool,
}

impl MockMetadataSource {
    pub fn new(table: SheetTable) -> Self {
        Self {
            table: Mutex::new(table),
            read_calls: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Build a table from string literals; the first row is the headings.
    pub fn from_rows(rows: &[&[&str]]) -> Result<Self, MetadataError> {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect();
        Ok(Self::new(SheetTable::from_rows(rows)?))
    }

    /// Replace the table returned by later reads.
    pub fn set_table(&self, table: SheetTable) {
        *self.table.lock().unwrap_or_else(PoisonError::into_inner) = table;
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataSource for MockMetadataSource {
    async fn read_table(&self) -> Result<SheetTable, MetadataError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MetadataError::Unavailable("mock read failure".to_string()));
        }
        Ok(self.table.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn source_name(&self) -> &'static str {
        "mock"
    }
}
