//! Workbook sheet listing backed by calamine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use calamine::{open_workbook_auto, Reader};

use crate::collaborators::SubResourceLister;

/// Lists the sheets of a local spreadsheet file (xlsx, xls, ods).
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkbookSheetLister;

impl WorkbookSheetLister {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SubResourceLister for WorkbookSheetLister {
    async fn list(&self, locator: &str) -> Result<Vec<String>> {
        let path = locator.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let workbook = open_workbook_auto(&path)
                .with_context(|| format!("Failed to open workbook {}", path))?;
            Ok(workbook.sheet_names().to_vec())
        })
        .await
        .context("Sheet listing task panicked")?
    }
}
