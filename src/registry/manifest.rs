//! Registry manifest parsing.
//!
//! ```yaml
//! modules:
//!   base:
//!     dialogue: { path: processors/dialogue }
//!   system:
//!     memory: { path: processors/memory, enabled: true }
//!   user:
//!     emotion: { path: processors/emotion, value: false }
//! ```
//!
//! `value` is accepted as an alias of `enabled`.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::{ConfigError, RegistryError};

/// Manifest tier. `base` entries always load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Base,
    System,
    User,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Base => "base",
            Tier::System => "system",
            Tier::User => "user",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorDescriptor {
    pub name: String,
    pub module_path: String,
    pub tier: Tier,
    pub enabled: bool,
}

impl ProcessorDescriptor {
    /// Whether the loader should instantiate this entry.
    pub fn should_load(&self) -> bool {
        self.tier == Tier::Base || self.enabled
    }
}

/// Parsed manifest. Entries that could not be parsed are kept aside so the
/// loader can report them without aborting.
#[derive(Debug, Default)]
pub struct Manifest {
    pub descriptors: Vec<ProcessorDescriptor>,
    pub rejected: Vec<RegistryError>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    modules: RawModules,
}

#[derive(Default, Deserialize)]
struct RawModules {
    #[serde(default)]
    base: Option<Mapping>,
    #[serde(default)]
    system: Option<Mapping>,
    #[serde(default)]
    user: Option<Mapping>,
}

#[derive(Deserialize)]
struct RawEntry {
    path: String,
    #[serde(default, alias = "value")]
    enabled: bool,
}

impl Manifest {
    /// Read a manifest file. A missing file is a startup error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingFile {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw, path)
    }

    pub fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let parsed: RawManifest = serde_yaml::from_str(raw).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut manifest = Manifest::default();
        let tiers = [
            (Tier::Base, parsed.modules.base),
            (Tier::System, parsed.modules.system),
            (Tier::User, parsed.modules.user),
        ];
        for (tier, entries) in tiers {
            for (key, value) in entries.unwrap_or_default() {
                match parse_entry(tier, key, value) {
                    Ok(descriptor) => manifest.descriptors.push(descriptor),
                    Err(e) => manifest.rejected.push(e),
                }
            }
        }
        Ok(manifest)
    }
}

fn parse_entry(tier: Tier, key: Value, value: Value) -> Result<ProcessorDescriptor, RegistryError> {
    let name = match key {
        Value::String(name) if !name.is_empty() => name,
        other => {
            return Err(RegistryError::MalformedEntry {
                tier: tier.to_string(),
                name: format!("{other:?}"),
                reason: "entry name must be a non-empty string".to_string(),
            });
        }
    };

    let entry: RawEntry = serde_yaml::from_value(value).map_err(|e| RegistryError::MalformedEntry {
        tier: tier.to_string(),
        name: name.clone(),
        reason: e.to_string(),
    })?;
    if entry.path.trim().is_empty() {
        return Err(RegistryError::MalformedEntry {
            tier: tier.to_string(),
            name,
            reason: "path is empty".to_string(),
        });
    }

    Ok(ProcessorDescriptor {
        name,
        module_path: entry.path,
        tier,
        enabled: tier == Tier::Base || entry.enabled,
    })
}
