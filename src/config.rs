use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use ini::Ini;
use log::{info, warn};

use crate::error::ConfigError;
use crate::logging::LogContext;

/// Name of the reserved section describing the RRD file
pub const STORAGE_SECTION: &str = "rrd";

/// One data feed every 60 seconds
pub const DEFAULT_STEP_SECS: u32 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub file: PathBuf,
    pub step: u32,
}

/// Raw options of one channel section, keys lowercased
#[derive(Debug, Clone, PartialEq)]
pub struct SectionConfig {
    pub name: String,
    options: BTreeMap<String, String>,
}

impl SectionConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub storage: StorageConfig,
    pub sections: Vec<SectionConfig>,
}

impl SensorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut storage = None;
        let mut sections = Vec::new();
        let mut seen = HashSet::new();

        for (name, properties) in ini.iter() {
            // Options outside any section are not part of the format
            let Some(name) = name else {
                continue;
            };
            if !seen.insert(name.to_string()) {
                return Err(ConfigError::DuplicateSection(name.to_string()));
            }

            let options: BTreeMap<String, String> = properties
                .iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
                .collect();

            if name == STORAGE_SECTION {
                storage = Some(storage_config(options)?);
            } else {
                sections.push(SectionConfig {
                    name: name.to_string(),
                    options,
                });
            }
        }

        let storage = storage.ok_or(ConfigError::MissingStorage(STORAGE_SECTION))?;
        Ok(SensorConfig { storage, sections })
    }

    /// Log the loaded configuration for debugging purposes
    pub fn log_config(&self, log: LogContext) {
        info!(target: log.target(), "RRD file: {}", self.storage.file.display());
        info!(target: log.target(), "Step: {} seconds", self.storage.step);
        for section in &self.sections {
            info!(target: log.target(), "Section: {}", section.name);
        }
        if self.sections.is_empty() {
            warn!(target: log.target(), "No sensor sections found");
        }
    }
}

fn storage_config(options: BTreeMap<String, String>) -> Result<StorageConfig, ConfigError> {
    let file = options
        .get("file")
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ConfigError::MissingField {
            section: STORAGE_SECTION.to_string(),
            field: "file",
        })?;

    let step = match options.get("step") {
        Some(value) => value
            .parse::<u32>()
            .ok()
            .filter(|step| *step > 0)
            .ok_or_else(|| ConfigError::InvalidStep {
                section: STORAGE_SECTION.to_string(),
                value: value.clone(),
            })?,
        None => DEFAULT_STEP_SECS,
    };

    Ok(StorageConfig {
        file: PathBuf::from(file),
        step,
    })
}
