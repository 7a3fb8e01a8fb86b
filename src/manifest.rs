use std::fmt::Write as _;

use serde::Serialize;

use crate::catalog::Catalog;
use crate::domain::{PackMode, Selection};
use crate::pipeline::{FetchResult, FetchStatus};

pub const MANIFEST_FILE_NAME: &str = "README.txt";
pub const STATUS_FILE_NAME: &str = "status.json";
const NO_DESCRIPTION: &str = "No description available";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub name: String,
    pub name_description: String,
    pub sub_name: String,
    pub description: String,
    pub files: Vec<String>,
    pub source_url: String,
    pub size: String,
    pub code: String,
}

/// Selected sub-datasets in catalog order. Fetch outcomes play no part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn build(catalog: &Catalog, selection: &Selection) -> Self {
        let entries = catalog
            .iter()
            .filter(|descriptor| selection.contains(&descriptor.token()))
            .map(|descriptor| ManifestEntry {
                name: descriptor.catalog_name.clone(),
                name_description: catalog
                    .describe(&descriptor.catalog_name)
                    .unwrap_or(NO_DESCRIPTION)
                    .to_string(),
                sub_name: descriptor.sub_name.clone(),
                description: descriptor.description.clone(),
                files: descriptor.files.clone(),
                source_url: descriptor.source_url.clone(),
                size: descriptor.size_hint.clone(),
                code: descriptor.code.clone(),
            })
            .collect();
        Self { entries }
    }

    pub fn render(&self) -> String {
        let mut text = String::new();
        for entry in &self.entries {
            let _ = writeln!(text, "Name: {}", entry.name);
            let _ = writeln!(text, "Name Description: {}", entry.name_description);
            let _ = writeln!(text, "Sub-dataset Name: {}", entry.sub_name);
            let _ = writeln!(text, "Description: {}", entry.description);
            let _ = writeln!(text, "Files: {}", entry.files.join(", "));
            let _ = writeln!(text, "Download URL: {}", entry.source_url);
            let _ = writeln!(text, "Size: {}", entry.size);
            let _ = writeln!(text, "Code: {}", entry.code);
            text.push_str("\n---\n\n");
        }
        text
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub mode: PackMode,
    pub generated_at: String,
    pub items: Vec<StatusItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusItem {
    pub token: String,
    pub folder: String,
    pub source_url: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusReport {
    pub fn new(mode: PackMode, results: &[FetchResult]) -> Self {
        let items = results
            .iter()
            .map(|result| StatusItem {
                token: result.descriptor.token().to_string(),
                folder: result.descriptor.output_folder_name.clone(),
                source_url: result.descriptor.source_url.clone(),
                status: match (&result.status, mode) {
                    (FetchStatus::Ok, PackMode::Execute) => "ok",
                    (FetchStatus::Ok, PackMode::Record) => "scripted",
                    (FetchStatus::Failed { .. }, _) => "failed",
                },
                reason: match &result.status {
                    FetchStatus::Failed { reason } => Some(reason.clone()),
                    FetchStatus::Ok => None,
                },
            })
            .collect();
        Self {
            mode,
            generated_at: chrono::Utc::now().to_rfc3339(),
            items,
        }
    }
}
