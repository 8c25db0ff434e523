/*
 * Copyright (c) 2023 Terence Wang.
 *
 * This file is part of hpa-subcell
 * (see https://github.com/exogeny/pods).
 *
 * License: MIT, see https://opensource.org/licenses/MIT
 */

//! Loading of the HPA subcellular location table, and expansion of a
//! gene's annotated compartments into fixed-width label vectors.

use crate::constants::{LEVEL1_WIDTH, LEVEL2_WIDTH, LEVEL3_WIDTH};
use crate::utils::BuildError;
use anyhow::Context;
use num_format::{Locale, ToFormattedString};
use serde::Serialize;
use slog::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub type LocationMap = HashMap<String, LocationRecord, ahash::RandomState>;

/// The level-1 meta compartments.
pub const LEVEL1_NAMES: [&str; LEVEL1_WIDTH] = ["Nucleus", "Cytoplasm", "Secretory"];

/// The level-2 organelles, along with the meta compartment each belongs to.
pub const LEVEL2: [(&str, usize); LEVEL2_WIDTH] = [
    ("Nucleoplasm", 0),
    ("Nuclear membrane", 0),
    ("Nucleoli", 0),
    ("Actin filaments", 1),
    ("Intermediate filaments", 1),
    ("Centrosome", 1),
    ("Microtubules", 1),
    ("Cytosol", 1),
    ("Mitochondria", 1),
    ("Endoplasmic reticulum", 2),
    ("Golgi apparatus", 2),
    ("Vesicles", 2),
    ("Plasma membrane", 2),
];

/// The level-3 locations, i.e. the vocabulary used in the annotation
/// table, along with the organelle each belongs to.
pub const LEVEL3: [(&str, usize); LEVEL3_WIDTH] = [
    ("Nucleoplasm", 0),
    ("Nuclear speckles", 0),
    ("Nuclear bodies", 0),
    ("Kinetochore", 0),
    ("Mitotic chromosome", 0),
    ("Nuclear membrane", 1),
    ("Nucleoli", 2),
    ("Nucleoli fibrillar center", 2),
    ("Nucleoli rim", 2),
    ("Actin filaments", 3),
    ("Focal adhesion sites", 3),
    ("Cleavage furrow", 3),
    ("Intermediate filaments", 4),
    ("Centrosome", 5),
    ("Centriolar satellite", 5),
    ("Microtubules", 6),
    ("Mitotic spindle", 6),
    ("Cytokinetic bridge", 6),
    ("Midbody", 6),
    ("Midbody ring", 6),
    ("Cytosol", 7),
    ("Cytoplasmic bodies", 7),
    ("Rods & Rings", 7),
    ("Aggresome", 7),
    ("Mitochondria", 8),
    ("Endoplasmic reticulum", 9),
    ("Golgi apparatus", 10),
    ("Vesicles", 11),
    ("Endosomes", 11),
    ("Lysosomes", 11),
    ("Peroxisomes", 11),
    ("Lipid droplets", 11),
    ("Plasma membrane", 12),
    ("Cell Junctions", 12),
];

/// Returns the level-3 index of a raw location name, if it is
/// part of the ontology.
pub fn level3_index(name: &str) -> Option<usize> {
    let name = name.trim();
    LEVEL3
        .iter()
        .position(|(n, _)| n.eq_ignore_ascii_case(name))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Reliability {
    Enhanced,
    Supported,
    Approved,
    Uncertain,
    // no annotation available for the gene
    #[default]
    Unknown,
}

impl Reliability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enhanced => "Enhanced",
            Self::Supported => "Supported",
            Self::Approved => "Approved",
            Self::Uncertain => "Uncertain",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Reliability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enhanced" => Ok(Self::Enhanced),
            "supported" => Ok(Self::Supported),
            "approved" => Ok(Self::Approved),
            "uncertain" => Ok(Self::Uncertain),
            _ => Err(format!("unrecognized reliability `{}`", s)),
        }
    }
}

/// The raw annotation of a single gene, as found in the table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocationRecord {
    pub reliability: Reliability,
    pub main: Vec<String>,
    pub additional: Vec<String>,
    pub extracellular: Vec<String>,
}

/// Multi-hot vectors at the three levels of the ontology.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LevelIds {
    pub level1: Vec<i64>,
    pub level2: Vec<i64>,
    pub level3: Vec<i64>,
}

impl Default for LevelIds {
    fn default() -> Self {
        Self {
            level1: vec![0; LEVEL1_WIDTH],
            level2: vec![0; LEVEL2_WIDTH],
            level3: vec![0; LEVEL3_WIDTH],
        }
    }
}

impl LevelIds {
    /// Sets the entries for every name that the ontology knows about;
    /// the rest are ignored.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut ids = Self::default();
        for l3 in names.iter().filter_map(|n| level3_index(n.as_ref())) {
            let l2 = LEVEL3[l3].1;
            let l1 = LEVEL2[l2].1;
            ids.level3[l3] = 1;
            ids.level2[l2] = 1;
            ids.level1[l1] = 1;
        }
        ids
    }
}

/// The label block attached to every example.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LocationIds {
    pub main: LevelIds,
    pub additional: LevelIds,
    pub extracellular: LevelIds,
    pub reliability: Reliability,
}

/// Expands the record for a gene into its label vectors. A gene
/// without an annotation gets all-zero vectors and an `Unknown`
/// reliability.
pub fn get_location_ids(location: Option<&LocationRecord>) -> LocationIds {
    match location {
        Some(r) => LocationIds {
            main: LevelIds::from_names(&r.main),
            additional: LevelIds::from_names(&r.additional),
            extracellular: LevelIds::from_names(&r.extracellular),
            reliability: r.reliability,
        },
        None => LocationIds::default(),
    }
}

fn split_locations(field: Option<&str>) -> Vec<String> {
    field
        .map(|f| {
            f.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
}

/// Parse the tab separated HPA subcellular location file into a map
/// from the Ensembl gene id to the gene's annotation. Rows that can't be
/// interpreted are skipped; a missing file or a header lacking one of the
/// required columns is an error.
pub fn get_subcellular_locations(path: &Path, log: &slog::Logger) -> anyhow::Result<LocationMap> {
    if !path.is_file() {
        return Err(BuildError::MissingLocationFile(path.to_path_buf()).into());
    }

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .quoting(false)
        .from_path(path)
        .with_context(|| format!("couldn't open location file {}", path.display()))?;

    let headers = rdr.headers()?.clone();
    let col = |name: &'static str| {
        column_index(&headers, name).ok_or_else(|| BuildError::MissingColumn {
            path: path.to_path_buf(),
            column: name,
        })
    };
    let gene_col = col("Gene")?;
    let rel_col = col("Reliability")?;
    let main_col = col("Main location")?;
    let add_col = col("Additional location")?;
    let ext_col = col("Extracellular location")?;

    let s = ahash::RandomState::with_seeds(2u64, 7u64, 1u64, 8u64);
    let mut locations = LocationMap::with_hasher(s);
    let mut num_skipped = 0usize;

    for (line, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                debug!(log, "skipping unreadable location row {}: {}", line + 2, e);
                num_skipped += 1;
                continue;
            }
        };

        let gene = record.get(gene_col).map(str::trim).unwrap_or("");
        if gene.is_empty() {
            debug!(log, "skipping location row {} without a gene id", line + 2);
            num_skipped += 1;
            continue;
        }

        let reliability = match record.get(rel_col).map(Reliability::from_str) {
            Some(Ok(r)) => r,
            Some(Err(e)) => {
                debug!(log, "skipping location row {} ({}): {}", line + 2, gene, e);
                num_skipped += 1;
                continue;
            }
            None => {
                debug!(log, "skipping truncated location row {} ({})", line + 2, gene);
                num_skipped += 1;
                continue;
            }
        };

        locations.insert(
            gene.to_string(),
            LocationRecord {
                reliability,
                main: split_locations(record.get(main_col)),
                additional: split_locations(record.get(add_col)),
                extracellular: split_locations(record.get(ext_col)),
            },
        );
    }

    info!(
        log,
        "read subcellular locations for {} genes ({} rows skipped)",
        locations.len().to_formatted_string(&Locale::en),
        num_skipped.to_formatted_string(&Locale::en)
    );
    Ok(locations)
}
