//! Flag registry: the configuration-supplied table of valid column tags.
//!
//! Each flag maps a tag name to its canonical unit and a description. Tags that carry an
//! index (`Counts_3`) are matched against a generic entry in which the first digit run
//! has been replaced by the wildcard token (`Counts_#`).

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, ArchiveResult};
use crate::units::UnitSystem;

/// Default wildcard token standing in for an embedded index.
pub const DEFAULT_TAG_SUFFIX: &str = "#";

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDefinition {
    /// Tag name, possibly containing the wildcard token.
    pub name: String,
    /// Canonical unit values are stored in.
    pub unit: String,
    /// Human readable description.
    pub desc: String,
    /// Whether the column may hold more than one channel (e.g. bin counts).
    #[serde(default)]
    pub multichannel: bool,
}

impl FlagDefinition {
    /// Convenience constructor for single-channel flags.
    pub fn new(name: &str, unit: &str, desc: &str) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            desc: desc.to_string(),
            multichannel: false,
        }
    }

    /// Marks the flag as multi-channel.
    pub fn multichannel(mut self) -> Self {
        self.multichannel = true;
        self
    }
}

/// The table of valid tags, plus the units engine their canonical units live in.
#[derive(Debug, Clone)]
pub struct FlagRegistry {
    flags: Vec<FlagDefinition>,
    tag_suffix: String,
    index_pattern: Regex,
    units: UnitSystem,
}

impl FlagRegistry {
    /// Builds a registry, rejecting duplicate names and canonical units the
    /// units engine cannot parse.
    pub fn new(
        flags: Vec<FlagDefinition>,
        tag_suffix: &str,
        units: UnitSystem,
    ) -> ArchiveResult<Self> {
        let mut seen = HashSet::new();
        for flag in &flags {
            if !seen.insert(flag.name.as_str()) {
                return Err(ArchiveError::Configuration(format!(
                    "Duplicate flag name: {}",
                    flag.name
                )));
            }
            units.parse(&flag.unit).map_err(|e| {
                ArchiveError::Configuration(format!(
                    "Flag '{}' has an invalid canonical unit: {e}",
                    flag.name
                ))
            })?;
        }
        if tag_suffix.is_empty() {
            return Err(ArchiveError::Configuration(
                "tag_suffix must not be empty".to_string(),
            ));
        }
        let index_pattern = Regex::new(r"\d\w*")
            .map_err(|e| ArchiveError::Configuration(e.to_string()))?;
        Ok(Self {
            flags,
            tag_suffix: tag_suffix.to_string(),
            index_pattern,
            units,
        })
    }

    /// Registry with the default wildcard token and built-in units.
    pub fn with_flags(flags: Vec<FlagDefinition>) -> ArchiveResult<Self> {
        Self::new(flags, DEFAULT_TAG_SUFFIX, UnitSystem::new())
    }

    /// The wildcard token.
    pub fn tag_suffix(&self) -> &str {
        &self.tag_suffix
    }

    /// Units engine shared by every ingest against this registry.
    pub fn units(&self) -> &UnitSystem {
        &self.units
    }

    /// All entries in configuration order.
    pub fn flags(&self) -> &[FlagDefinition] {
        &self.flags
    }

    /// All entry names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(|f| f.name.as_str())
    }

    /// Replaces the first embedded index (a digit and the word characters
    /// following it) with the wildcard token: `Counts_12` -> `Counts_#`.
    pub fn generic_form(&self, tag: &str) -> String {
        match self.index_pattern.find(tag) {
            Some(m) => format!("{}{}{}", &tag[..m.start()], self.tag_suffix, &tag[m.end()..]),
            None => tag.to_string(),
        }
    }

    /// Looks a tag up, exact name first and then its generic form.
    pub fn lookup(&self, tag: &str) -> ArchiveResult<&FlagDefinition> {
        if let Some(flag) = self.unique(tag)? {
            return Ok(flag);
        }
        let generic = self.generic_form(tag);
        match self.unique(&generic)? {
            Some(flag) => Ok(flag),
            None => Err(ArchiveError::Lookup(format!(
                "{generic} Not found in valid tags"
            ))),
        }
    }

    fn unique(&self, name: &str) -> ArchiveResult<Option<&FlagDefinition>> {
        let mut matches = self.flags.iter().filter(|f| f.name == name);
        let first = matches.next();
        if first.is_some() && matches.next().is_some() {
            return Err(ArchiveError::Lookup(format!("{name} is ambiguous in valid tags")));
        }
        Ok(first)
    }

    /// Fails with a lookup error unless the tag is registered.
    pub fn check(&self, tag: &str) -> ArchiveResult<()> {
        self.lookup(tag).map(|_| ())
    }

    /// True when the tag is registered.
    pub fn contains(&self, tag: &str) -> bool {
        self.lookup(tag).is_ok()
    }

    /// Canonical unit for a tag.
    pub fn canonical_unit(&self, tag: &str) -> ArchiveResult<&str> {
        Ok(self.lookup(tag)?.unit.as_str())
    }

    /// Description for a tag.
    pub fn description(&self, tag: &str) -> ArchiveResult<&str> {
        Ok(self.lookup(tag)?.desc.as_str())
    }

    /// Whether a tag may hold several channels.
    pub fn is_multichannel(&self, tag: &str) -> ArchiveResult<bool> {
        Ok(self.lookup(tag)?.multichannel)
    }

    /// Expands a wildcard tag into the concrete tags among `candidates` that it
    /// covers. A tag without the wildcard expands to itself.
    pub fn expand_generic(&self, tag: &str, candidates: &[&str]) -> ArchiveResult<Vec<String>> {
        self.check(tag)?;
        if !tag.contains(self.tag_suffix.as_str()) {
            return Ok(vec![tag.to_string()]);
        }
        let prefix = tag.replace(self.tag_suffix.as_str(), "");
        Ok(candidates
            .iter()
            .filter(|c| {
                c.starts_with(prefix.as_str())
                    && c.len() > prefix.len()
                    && c[prefix.len()..].chars().all(|ch| ch.is_ascii_digit())
            })
            .map(|c| c.to_string())
            .collect())
    }
}
