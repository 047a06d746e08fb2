use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::IngestError;
use crate::interval::month::Month;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

fn default_timeout_secs() -> u64 {
    60
}

/// Everything one run of the plant availability job needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Months to load, each one independently
    pub periods: Vec<Month>,
    /// Source url, `{month}` is replaced with the month token, e.g. 2025_07
    pub url_template: String,
    /// Named warehouse connection, see [`crate::utils::lib_duckdb::resolve_connection`]
    pub connection_id: String,
    pub database: String,
    pub schema: String,
    pub table: String,
    /// Root directory of the table stages
    pub stage_root: PathBuf,
    /// Where the per-download temporary directories go, system temp dir if missing
    #[serde(default)]
    pub tmp_root: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl PipelineConfig {
    /// Read a json config file.
    pub fn from_path(path: &Path) -> Result<PipelineConfig, IngestError> {
        let file = File::open(path).map_err(|e| IngestError::io(path, e))?;
        let config: PipelineConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| IngestError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Schema and table names end up in SQL unquoted.
    pub fn validate(&self) -> Result<(), IngestError> {
        for (what, name) in [
            ("database", &self.database),
            ("schema", &self.schema),
            ("table", &self.table),
        ] {
            if !IDENTIFIER.is_match(name) {
                return Err(IngestError::Config(format!(
                    "Invalid {} name {:?}",
                    what, name
                )));
            }
        }
        if !self.url_template.contains("{month}") {
            return Err(IngestError::Config(format!(
                "Url template {} has no {{month}} placeholder",
                self.url_template
            )));
        }
        Ok(())
    }

    pub fn with_periods(mut self, periods: Vec<Month>) -> PipelineConfig {
        self.periods = periods;
        self
    }

    pub fn url(&self, month: &Month) -> String {
        self.url_template.replace("{month}", &month.token())
    }

    /// File name (without extension) of the download, unique for each month.
    pub fn basename(&self, month: &Month) -> String {
        format!("{}_{}", self.table, month.token())
    }

    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
