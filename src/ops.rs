//! Fetch steps shared by the executor and the script renderer.
//!
//! A [`FetchPlan`] is built without touching disk or network; interpreting it
//! is left to [`crate::executor::Executor`] (do it now) or
//! [`crate::script::ScriptRenderer`] (print the equivalent shell).

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::SelectionToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", content = "path", rename_all = "snake_case")]
pub enum FetchTarget {
    /// Save the body at exactly this path.
    File(Utf8PathBuf),
    /// Save into this directory, named after the response.
    Directory(Utf8PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FetchOperation {
    CreateDir {
        path: Utf8PathBuf,
    },
    FetchUrl {
        url: String,
        target: FetchTarget,
    },
    /// Extract `archive` whose single top-level directory becomes
    /// `into/rename_to`. The archive is consumed.
    ExtractArchive {
        archive: Utf8PathBuf,
        into: Utf8PathBuf,
        rename_to: String,
    },
    /// Extract nested archives under `dir` in place until none are left.
    FlattenNested {
        dir: Utf8PathBuf,
    },
    InvokeExternal {
        program: String,
        args: Vec<String>,
        dest: Utf8PathBuf,
    },
}

impl FetchOperation {
    pub fn name(&self) -> &'static str {
        match self {
            FetchOperation::CreateDir { .. } => "create_dir",
            FetchOperation::FetchUrl { .. } => "fetch_url",
            FetchOperation::ExtractArchive { .. } => "extract_archive",
            FetchOperation::FlattenNested { .. } => "flatten_nested",
            FetchOperation::InvokeExternal { .. } => "invoke_external",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPlan {
    pub token: SelectionToken,
    pub source_url: String,
    pub output_folder: Utf8PathBuf,
    pub operations: Vec<FetchOperation>,
}

/// Where plans put downloads and the normalized tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    downloads: Utf8PathBuf,
    extracted: Utf8PathBuf,
}

impl Layout {
    pub fn new(downloads: Utf8PathBuf, extracted: Utf8PathBuf) -> Self {
        Self {
            downloads,
            extracted,
        }
    }

    /// Execute-mode layout under a scratch working directory.
    pub fn scratch(root: &Utf8Path) -> Self {
        Self::new(root.join("downloads"), root.join("extracted"))
    }

    /// Record-mode layout, relative to wherever the script runs.
    pub fn script(root: &str) -> Self {
        let root = Utf8PathBuf::from(root);
        Self::new(root.clone(), root)
    }

    pub fn downloads(&self) -> &Utf8Path {
        &self.downloads
    }

    pub fn extracted(&self) -> &Utf8Path {
        &self.extracted
    }

    pub fn output_folder(&self, folder_name: &str) -> Utf8PathBuf {
        self.extracted.join(folder_name)
    }
}
