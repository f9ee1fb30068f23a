//! Import configuration.
//!
//! An [`ImportConfig`] is usually loaded from a JSON document with
//! kebab-case keys:
//!
//! ```json
//! {
//!   "domain": "product",
//!   "location": "/var/import/product",
//!   "max-size": 500,
//!   "skip-lines": 1,
//!   "mapping": {
//!     "item": { "0": "product.code", "1": "product.label", "2": "product.type" },
//!     "text": { "3": "text.type", "4": "text.content" }
//!   },
//!   "converters": { "1": "trim" },
//!   "backup": { "move": "done/%Y%m%d/{filename}" }
//! }
//! ```

use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        convert::Converters,
        item::DuplicateKeyPolicy,
        mapping::{ColumnMapping, ITEM_FACET},
    },
    error::BatchError,
    tasklet::backup::BackupPolicy,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[default]
    Csv,
    Xml,
}

impl SourceFormat {
    /// File extension of the format, without dot.
    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Xml => "xml",
        }
    }
}

fn default_max_size() -> usize {
    1000
}

fn default_delimiter() -> char {
    ','
}

fn default_workers() -> usize {
    4
}

fn default_item_depth() -> usize {
    1
}

fn default_key_attribute() -> String {
    "ref".to_string()
}

fn default_domains() -> Vec<String> {
    ["text", "media", "price", "attribute", "catalog", "supplier"]
        .iter()
        .map(|domain| domain.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImportConfig {
    pub domain: String,
    pub location: PathBuf,
    #[serde(default)]
    pub format: SourceFormat,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default)]
    pub skip_lines: usize,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// `facet -> position -> key`, in declaration order.
    #[serde(default)]
    pub mapping: IndexMap<String, BTreeMap<usize, String>>,
    /// `facet -> processor name`; a facet without entry uses its own name.
    #[serde(default)]
    pub processors: IndexMap<String, String>,
    #[serde(default)]
    pub converters: BTreeMap<usize, String>,
    #[serde(default = "default_domains")]
    pub domains: Vec<String>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub duplicates: DuplicateKeyPolicy,
    #[serde(default)]
    pub backup: BackupPolicy,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub item_tag: Option<String>,
    #[serde(default = "default_item_depth")]
    pub item_depth: usize,
    #[serde(default = "default_key_attribute")]
    pub key_attribute: String,
    #[serde(default)]
    pub sweep_children: bool,
    #[serde(default)]
    pub cleanup: bool,
}

impl ImportConfig {
    /// A configuration with all defaults for `domain`, reading from `location`.
    pub fn new<P: AsRef<Path>>(domain: &str, location: P) -> Self {
        Self {
            domain: domain.to_string(),
            location: location.as_ref().to_path_buf(),
            format: SourceFormat::default(),
            max_size: default_max_size(),
            skip_lines: 0,
            delimiter: default_delimiter(),
            mapping: IndexMap::new(),
            processors: IndexMap::new(),
            converters: BTreeMap::new(),
            domains: default_domains(),
            strict: false,
            duplicates: DuplicateKeyPolicy::default(),
            backup: BackupPolicy::default(),
            workers: default_workers(),
            item_tag: None,
            item_depth: default_item_depth(),
            key_attribute: default_key_attribute(),
            sweep_children: false,
            cleanup: false,
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        let file = File::open(path.as_ref()).map_err(|err| {
            BatchError::Configuration(format!(
                "unable to open {}: {}",
                path.as_ref().display(),
                err
            ))
        })?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|err| BatchError::Configuration(err.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, BatchError> {
        serde_json::from_str(json).map_err(|err| BatchError::Configuration(err.to_string()))
    }

    /// Checks the configuration once, before any file is opened.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.domain.trim().is_empty() {
            return Err(BatchError::Configuration("domain is required".to_string()));
        }
        if self.max_size == 0 {
            return Err(BatchError::Configuration(
                "max-size must be greater than zero".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(BatchError::Configuration(
                "workers must be greater than zero".to_string(),
            ));
        }
        if !self.delimiter.is_ascii() {
            return Err(BatchError::Configuration(format!(
                "delimiter '{}' is not a single byte",
                self.delimiter
            )));
        }

        if self.format == SourceFormat::Csv {
            self.column_mapping()?;
            self.code_position()?;
        }
        self.converters()?;
        self.backup.validate()
    }

    pub fn column_mapping(&self) -> Result<ColumnMapping, BatchError> {
        ColumnMapping::from_config(&self.mapping)
    }

    /// Column holding `<domain>.code`.
    pub fn code_position(&self) -> Result<usize, BatchError> {
        let key = format!("{}.code", self.domain);
        self.column_mapping()?.position_of(&key).ok_or_else(|| {
            BatchError::Configuration(format!("no column is mapped to \"{}\"", key))
        })
    }

    pub fn converters(&self) -> Result<Converters, BatchError> {
        let mut converters = Converters::new();
        for (position, spec) in &self.converters {
            converters.register(*position, Converters::parse(spec)?);
        }
        Ok(converters)
    }

    /// `(facet, processor name)` pairs: mapped facets in declaration order,
    /// then facets only named in `processors`.
    pub fn facets(&self) -> Vec<(String, String)> {
        let mut facets: Vec<(String, String)> = self
            .mapping
            .keys()
            .filter(|facet| *facet != ITEM_FACET)
            .map(|facet| {
                let processor = self.processors.get(facet).unwrap_or(facet);
                (facet.clone(), processor.clone())
            })
            .collect();

        for (facet, processor) in &self.processors {
            if !self.mapping.contains_key(facet) {
                facets.push((facet.clone(), processor.clone()));
            }
        }
        facets
    }

    pub fn item_tag(&self) -> String {
        self.item_tag
            .clone()
            .unwrap_or_else(|| format!("{}item", self.domain))
    }

    /// Tree domains get a hierarchy resolver.
    pub fn is_tree(&self) -> bool {
        self.domain == "catalog"
    }
}
