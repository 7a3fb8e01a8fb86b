use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{SourceMarker, default_source_markers};
use crate::error::PackError;

pub const CONFIG_FILE_NAME: &str = "things-dl.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub datasets_csv: PathBuf,
    pub descriptions_csv: Option<PathBuf>,
    pub tool_program: String,
    pub source_markers: Vec<SourceMarker>,
    pub item_timeout_secs: u64,
    pub total_timeout_secs: u64,
    pub bundle_name: String,
    pub script_name: String,
    pub script_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            datasets_csv: PathBuf::from("static/datasets.csv"),
            descriptions_csv: Some(PathBuf::from("static/dataset_descriptions.csv")),
            tool_program: "openneuro-py".to_string(),
            source_markers: default_source_markers(),
            item_timeout_secs: 600,
            total_timeout_secs: 3600,
            bundle_name: "things-datasets.zip".to_string(),
            script_name: "things-download.sh".to_string(),
            script_root: "things-extracted".to_string(),
        }
    }
}

impl Config {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path, then `./things-dl.json`, then the user config dir.
    /// Without any file the defaults apply.
    pub fn resolve(path: Option<&Path>) -> Result<Config, PackError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Self::load(&local);
        }

        let user = BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("things-dl").join(CONFIG_FILE_NAME));
        match user {
            Some(user) if user.exists() => Self::load(&user),
            _ => Ok(Config::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Config, PackError> {
        let content =
            fs::read_to_string(path).map_err(|_| PackError::ConfigRead(path.to_path_buf()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, PackError> {
        serde_json::from_str(content).map_err(|err| PackError::ConfigParse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceKind;

    #[test]
    fn parse_config_partial() {
        let config = ConfigLoader::parse(r#"{"tool_program": "/opt/bin/openneuro-py"}"#).unwrap();
        assert_eq!(config.tool_program, "/opt/bin/openneuro-py");
        assert_eq!(config.bundle_name, "things-datasets.zip");
        assert_eq!(config.source_markers[0].kind, SourceKind::Archive);
    }
}
