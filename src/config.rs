/*
 * Copyright (c) 2023 Terence Wang.
 *
 * This file is part of hpa-subcell
 * (see https://github.com/exogeny/pods).
 *
 * License: MIT, see https://opensource.org/licenses/MIT
 */

//! The table of dataset configurations (one per cell line) and the
//! collection that groups them.

use crate::constants::{COLLECTION_VERSION, CONFIG_VERSION, MANIFEST_SUFFIX};
use crate::utils::BuildError;
use anyhow::Context;
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CellLine {
    U2OS,
    A431,
    HEK293,
    U251MG,
}

impl CellLine {
    pub const ALL: [CellLine; 4] = [Self::U2OS, Self::A431, Self::HEK293, Self::U251MG];

    /// The name used by the atlas, and for the manifest file.
    pub fn name(&self) -> &'static str {
        match self {
            Self::U2OS => "U2OS",
            Self::A431 => "A-431",
            Self::HEK293 => "HEK293",
            Self::U251MG => "U-251MG",
        }
    }

    pub fn manifest_path(&self, manifest_dir: &Path) -> PathBuf {
        manifest_dir.join(format!("{}{}", self.name(), MANIFEST_SUFFIX))
    }
}

impl fmt::Display for CellLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CellLine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown cell line `{}`", s))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitName {
    Train,
    Test,
}

impl SplitName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for SplitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Split {
    pub name: SplitName,
    pub cell_line: CellLine,
}

#[derive(Clone, Debug, Serialize)]
pub struct BuilderConfig {
    pub name: String,
    pub version: &'static str,
    pub description: String,
    pub splits: Vec<Split>,
}

impl BuilderConfig {
    /// A configuration with a train and a test split, both drawn from
    /// the images of `cell_line`.
    pub fn for_cell_line(cell_line: CellLine) -> Self {
        Self {
            name: cell_line.name().to_string(),
            version: CONFIG_VERSION,
            description: format!("Cell line {}", cell_line),
            splits: vec![
                Split {
                    name: SplitName::Train,
                    cell_line,
                },
                Split {
                    name: SplitName::Test,
                    cell_line,
                },
            ],
        }
    }

    /// The distinct cell lines this configuration draws from, in
    /// order of first use.
    pub fn cell_lines(&self) -> Vec<CellLine> {
        self.splits.iter().map(|s| s.cell_line).unique().collect()
    }
}

/// The configurations that the builder knows how to produce.
pub fn default_configs() -> Vec<BuilderConfig> {
    CellLine::ALL
        .iter()
        .map(|c| BuilderConfig::for_cell_line(*c))
        .collect()
}

/// Find the configuration called `name` in `configs`.
pub fn select_config<'a>(
    configs: &'a [BuilderConfig],
    name: &str,
) -> Result<&'a BuilderConfig, BuildError> {
    configs
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            BuildError::UnknownConfig(
                name.to_string(),
                configs.iter().map(|c| c.name.as_str()).join(", "),
            )
        })
}

/// Describes the collection of per cell line datasets.
#[derive(Debug, Serialize)]
pub struct CollectionInfo {
    pub description: &'static str,
    pub release_notes: BTreeMap<&'static str, &'static str>,
    /// version -> (dataset name -> description)
    pub datasets: BTreeMap<&'static str, BTreeMap<String, String>>,
}

/// Enumerate the cell lines for which a manifest exists in
/// `manifest_dir`, sorted by name.
pub fn discover_cell_lines(manifest_dir: &Path) -> anyhow::Result<Vec<String>> {
    let rd = std::fs::read_dir(manifest_dir)
        .with_context(|| format!("couldn't read manifest directory {}", manifest_dir.display()))?;
    let mut names = Vec::new();
    for entry in rd {
        let fname = entry?.file_name();
        if let Some(cl) = fname.to_string_lossy().strip_suffix(MANIFEST_SUFFIX) {
            if !cl.is_empty() {
                names.push(cl.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

pub fn collection_info(manifest_dir: &Path) -> anyhow::Result<CollectionInfo> {
    let datasets = discover_cell_lines(manifest_dir)?
        .into_iter()
        .map(|cl| {
            let desc = format!("Cell line {}", cl);
            (cl, desc)
        })
        .collect();
    Ok(CollectionInfo {
        description: "Human Protein Atlas subcellular datasets",
        release_notes: BTreeMap::from([(COLLECTION_VERSION, "Initial release.")]),
        datasets: BTreeMap::from([(COLLECTION_VERSION, datasets)]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let configs = default_configs();
        let names: Vec<&str> = configs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["U2OS", "A-431", "HEK293", "U-251MG"]);
        for c in &configs {
            assert_eq!(c.splits.len(), 2);
            assert_eq!(c.splits[0].name, SplitName::Train);
            assert_eq!(c.splits[1].name, SplitName::Test);
            assert_eq!(c.cell_lines().len(), 1);
            assert_eq!(c.version, CONFIG_VERSION);
        }
    }

    #[test]
    fn test_select_config() {
        let configs = default_configs();
        assert_eq!(select_config(&configs, "a-431").unwrap().splits[0].cell_line, CellLine::A431);
        assert!(matches!(
            select_config(&configs, "HeLa"),
            Err(BuildError::UnknownConfig(..))
        ));
    }

    #[test]
    fn test_cell_line_names() {
        for c in CellLine::ALL {
            assert_eq!(CellLine::from_str(c.name()).unwrap(), c);
        }
        assert_eq!(
            CellLine::U251MG.manifest_path(Path::new("cell_lines")),
            PathBuf::from("cell_lines/U-251MG_images.csv")
        );
    }

    #[test]
    fn test_collection_discovers_manifests() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["U2OS_images.csv", "HEK293_images.csv", "README.md"] {
            std::fs::write(dir.path().join(f), "").unwrap();
        }
        let info = collection_info(dir.path()).unwrap();
        let ds = &info.datasets[COLLECTION_VERSION];
        assert_eq!(ds.keys().collect::<Vec<_>>(), vec!["HEK293", "U2OS"]);
        assert_eq!(ds["U2OS"], "Cell line U2OS");
        assert_eq!(info.release_notes[COLLECTION_VERSION], "Initial release.");
    }
}
