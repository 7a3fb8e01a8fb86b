use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::PackError;

/// How a request is packaged: fetch server-side, or emit an equivalent script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PackMode {
    Execute,
    Record,
}

impl fmt::Display for PackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackMode::Execute => write!(f, "execute"),
            PackMode::Record => write!(f, "record"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Archive,
    DirectFile,
    ExternalTool,
}

impl SourceKind {
    /// First marker contained in `url` wins.
    pub fn classify(url: &str, markers: &[SourceMarker]) -> Option<SourceKind> {
        markers
            .iter()
            .find(|marker| url.contains(marker.marker.as_str()))
            .map(|marker| marker.kind)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Archive => write!(f, "archive"),
            SourceKind::DirectFile => write!(f, "direct_file"),
            SourceKind::ExternalTool => write!(f, "external_tool"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = PackError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "archive" => Ok(SourceKind::Archive),
            "direct_file" | "file" => Ok(SourceKind::DirectFile),
            "external_tool" | "tool" => Ok(SourceKind::ExternalTool),
            _ => Err(PackError::CatalogParse(format!(
                "unknown source kind: {value}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMarker {
    pub marker: String,
    pub kind: SourceKind,
}

pub fn default_source_markers() -> Vec<SourceMarker> {
    vec![
        SourceMarker {
            marker: "figshare".to_string(),
            kind: SourceKind::Archive,
        },
        SourceMarker {
            marker: "osf".to_string(),
            kind: SourceKind::DirectFile,
        },
        SourceMarker {
            marker: "openneuro".to_string(),
            kind: SourceKind::ExternalTool,
        },
    ]
}

/// Replaces whitespace and characters that are unsafe in a path component.
pub fn sanitize(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_whitespace() => '_',
            ch => ch,
        })
        .collect()
}

pub fn output_folder_name(catalog_name: &str, sub_name: &str) -> String {
    format!("{}_{}", sanitize(catalog_name), sanitize(sub_name))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SelectionToken(String);

impl SelectionToken {
    pub fn for_dataset(catalog_name: &str, sub_name: &str) -> Self {
        Self(format!("{catalog_name}_{sub_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SelectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SelectionToken {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

/// File filter handed to the external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "patterns", rename_all = "lowercase")]
pub enum Filters {
    None,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Filters {
    /// Exclude takes precedence when a row carries both lists.
    pub fn from_lists(include: Option<Vec<String>>, exclude: Option<Vec<String>>) -> Self {
        match (include, exclude) {
            (_, Some(exclude)) if !exclude.is_empty() => Filters::Exclude(exclude),
            (Some(include), _) if !include.is_empty() => Filters::Include(include),
            _ => Filters::None,
        }
    }

    pub fn tool_arg(&self) -> Option<String> {
        match self {
            Filters::None => None,
            Filters::Include(patterns) => Some(format!("--include={}", patterns.join(","))),
            Filters::Exclude(patterns) => Some(format!("--exclude={}", patterns.join(","))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub catalog_name: String,
    pub sub_name: String,
    pub source_kind: SourceKind,
    pub source_url: String,
    pub output_folder_name: String,
    pub files: Vec<String>,
    pub filters: Filters,
    pub size_hint: String,
    pub description: String,
    pub code: String,
}

impl DatasetDescriptor {
    pub fn token(&self) -> SelectionToken {
        SelectionToken::for_dataset(&self.catalog_name, &self.sub_name)
    }
}

/// Ordered, deduplicated selection tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    tokens: Vec<SelectionToken>,
}

impl Selection {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let tokens = tokens
            .into_iter()
            .map(|token| SelectionToken::from(token.as_ref()))
            .filter(|token| !token.as_str().is_empty())
            .filter(|token| seen.insert(token.clone()))
            .collect();
        Self { tokens }
    }

    pub fn tokens(&self) -> &[SelectionToken] {
        &self.tokens
    }

    pub fn contains(&self, token: &SelectionToken) -> bool {
        self.tokens.contains(token)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
