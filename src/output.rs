use std::io::{self, Write};

use serde::Serialize;

use crate::bundle::OutputBundle;
use crate::catalog::Catalog;
use crate::domain::PackMode;
use crate::ops::FetchPlan;
use crate::pipeline::{FetchResult, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Serialize)]
pub struct PackSummary {
    pub archive: String,
    pub file_name: String,
    pub content_type: &'static str,
    pub size: u64,
    pub file_count: usize,
    pub mode: PackMode,
    pub items: Vec<FetchResult>,
}

impl PackSummary {
    pub fn new(bundle: &OutputBundle, archive: String) -> Self {
        Self {
            archive,
            file_name: bundle.file_name().to_string(),
            content_type: bundle.content_type(),
            size: bundle.size(),
            file_count: bundle.file_count(),
            mode: bundle.mode(),
            items: bundle.results().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogListing {
    pub datasets: Vec<ListedDataset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedDataset {
    pub name: String,
    pub description: Option<String>,
    pub sub_datasets: Vec<ListedSubDataset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedSubDataset {
    pub token: String,
    pub sub_name: String,
    pub source_kind: String,
    pub size: String,
    pub description: String,
}

impl CatalogListing {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let datasets = catalog
            .groups()
            .iter()
            .map(|group| ListedDataset {
                name: group.name.clone(),
                description: catalog.describe(&group.name).map(str::to_string),
                sub_datasets: group
                    .sub_datasets
                    .iter()
                    .map(|sub| ListedSubDataset {
                        token: sub.token().to_string(),
                        sub_name: sub.sub_name.clone(),
                        source_kind: sub.source_kind.to_string(),
                        size: sub.size_hint.clone(),
                        description: sub.description.clone(),
                    })
                    .collect(),
            })
            .collect();
        Self { datasets }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_pack(summary: &PackSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_listing(listing: &CatalogListing) -> io::Result<()> {
        Self::print_json(listing)
    }

    pub fn print_plans(plans: &[FetchPlan]) -> io::Result<()> {
        Self::print_json(&plans)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Prints progress lines to stderr, keeping stdout for JSON.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}
