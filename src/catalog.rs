use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;
use serde::Deserialize;
use tracing::debug;

use crate::domain::{
    DatasetDescriptor, Filters, Selection, SelectionToken, SourceKind, SourceMarker,
    output_folder_name,
};
use crate::error::PackError;

const LIST_DELIMITER: &str = "; ";

#[derive(Debug, Deserialize)]
struct CatalogRow {
    name: String,
    #[serde(rename = "sub-dataset name")]
    sub_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    files: String,
    download_url: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    include_files: Option<String>,
    #[serde(default)]
    exclude_files: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    source_kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptionRow {
    name: String,
    #[serde(default)]
    name_description: String,
}

#[derive(Debug, Clone)]
pub struct DatasetGroup {
    pub name: String,
    pub sub_datasets: Vec<DatasetDescriptor>,
}

/// Sub-datasets grouped by catalog name, in file order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    groups: Vec<DatasetGroup>,
    index: HashMap<SelectionToken, (usize, usize)>,
    descriptions: HashMap<String, String>,
}

impl Catalog {
    pub fn load(
        datasets_path: &Path,
        descriptions_path: Option<&Path>,
        markers: &[SourceMarker],
    ) -> Result<Self, PackError> {
        let datasets = File::open(datasets_path)
            .map_err(|_| PackError::CatalogRead(datasets_path.to_path_buf()))?;
        let mut catalog = Self::from_reader(datasets, markers)?;

        if let Some(path) = descriptions_path {
            if path.exists() {
                let file =
                    File::open(path).map_err(|_| PackError::CatalogRead(path.to_path_buf()))?;
                catalog.descriptions = read_descriptions(file)?;
            } else {
                debug!(path = %path.display(), "no descriptions table");
            }
        }
        Ok(catalog)
    }

    pub fn from_reader<R: Read>(reader: R, markers: &[SourceMarker]) -> Result<Self, PackError> {
        let mut csv = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let mut catalog = Catalog::default();
        let mut group_positions = HashMap::<String, usize>::new();

        for (line, row) in csv.deserialize::<CatalogRow>().enumerate() {
            let row = row.map_err(|err| PackError::CatalogParse(err.to_string()))?;
            let descriptor = descriptor_from_row(row, markers)
                .map_err(|err| PackError::CatalogParse(format!("row {}: {err}", line + 1)))?;

            let group_idx = *group_positions
                .entry(descriptor.catalog_name.clone())
                .or_insert_with(|| {
                    catalog.groups.push(DatasetGroup {
                        name: descriptor.catalog_name.clone(),
                        sub_datasets: Vec::new(),
                    });
                    catalog.groups.len() - 1
                });

            let token = descriptor.token();
            let group = &mut catalog.groups[group_idx];
            if catalog.index.contains_key(&token) {
                return Err(PackError::CatalogParse(format!(
                    "duplicate selection token: {token}"
                )));
            }
            catalog
                .index
                .insert(token, (group_idx, group.sub_datasets.len()));
            group.sub_datasets.push(descriptor);
        }

        Ok(catalog)
    }

    pub fn with_descriptions(mut self, descriptions: HashMap<String, String>) -> Self {
        self.descriptions = descriptions;
        self
    }

    pub fn resolve(&self, token: &SelectionToken) -> Option<&DatasetDescriptor> {
        self.index
            .get(token)
            .map(|(group, item)| &self.groups[*group].sub_datasets[*item])
    }

    /// Resolves in selection order; unknown tokens are skipped.
    pub fn resolve_selection(&self, selection: &Selection) -> Vec<&DatasetDescriptor> {
        selection
            .tokens()
            .iter()
            .filter_map(|token| {
                let found = self.resolve(token);
                if found.is_none() {
                    debug!(
                        "{}",
                        PackError::CatalogLookupMiss(token.as_str().to_string())
                    );
                }
                found
            })
            .collect()
    }

    pub fn groups(&self) -> &[DatasetGroup] {
        &self.groups
    }

    /// All descriptors in catalog iteration order.
    pub fn iter(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.groups.iter().flat_map(|group| group.sub_datasets.iter())
    }

    pub fn describe(&self, name: &str) -> Option<&str> {
        self.descriptions.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn descriptor_from_row(
    row: CatalogRow,
    markers: &[SourceMarker],
) -> Result<DatasetDescriptor, PackError> {
    let name = row.name.trim().to_string();
    let sub_name = row.sub_name.trim().to_string();
    let source_url = row.download_url.trim().to_string();
    if name.is_empty() || sub_name.is_empty() {
        return Err(PackError::CatalogParse(
            "name and sub-dataset name are required".to_string(),
        ));
    }

    let source_kind = match row.source_kind.as_deref().map(str::trim) {
        Some(kind) if !kind.is_empty() => kind.parse()?,
        _ => SourceKind::classify(&source_url, markers).ok_or_else(|| {
            PackError::CatalogParse(format!("cannot infer source kind for {source_url}"))
        })?,
    };

    Ok(DatasetDescriptor {
        output_folder_name: output_folder_name(&name, &sub_name),
        files: split_list(&row.files).unwrap_or_default(),
        filters: Filters::from_lists(
            row.include_files.as_deref().and_then(split_list),
            row.exclude_files.as_deref().and_then(split_list),
        ),
        catalog_name: name,
        sub_name,
        source_kind,
        source_url,
        size_hint: row.size.trim().to_string(),
        description: row.description.trim().to_string(),
        code: row.code.unwrap_or_default().trim().to_string(),
    })
}

/// `"; "`-delimited cell; a blank cell means the list is absent.
fn split_list(cell: &str) -> Option<Vec<String>> {
    let items = cell
        .trim()
        .split(LIST_DELIMITER)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    (!items.is_empty()).then_some(items)
}

fn read_descriptions<R: Read>(reader: R) -> Result<HashMap<String, String>, PackError> {
    let mut csv = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut descriptions = HashMap::new();
    for row in csv.deserialize::<DescriptionRow>() {
        let row = row.map_err(|err| PackError::CatalogParse(err.to_string()))?;
        descriptions.insert(row.name.trim().to_string(), row.name_description);
    }
    Ok(descriptions)
}
