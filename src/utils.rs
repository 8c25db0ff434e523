/*
 * Copyright (c) 2023 Terence Wang.
 *
 * This file is part of hpa-subcell
 * (see https://github.com/exogeny/pods).
 *
 * License: MIT, see https://opensource.org/licenses/MIT
 */
use anyhow::Context;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration problems that abort a build.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("no configuration named `{0}`; expected one of {1}")]
    UnknownConfig(String, String),
    #[error("the image manifest `{0}` does not exist")]
    MissingManifest(PathBuf),
    #[error("malformed row {line} in image manifest `{path}`: {reason}")]
    MalformedManifestRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("the subcellular location file `{0}` does not exist")]
    MissingLocationFile(PathBuf),
    #[error("the location file `{path}` has no `{column}` column")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("the download manager returned no path for `{0}`")]
    MissingDownload(String),
}

/// Write `value` as pretty-printed json to `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut f = std::fs::File::create(path)
        .with_context(|| format!("could not create metadata file {}.", path.display()))?;
    let s = serde_json::to_string_pretty(value).context("could not format json.")?;
    f.write_all(s.as_bytes())
        .with_context(|| format!("cannot write to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("meta.json");
        write_json(&p, &serde_json::json!({ "cmd": "build", "n": 3 })).unwrap();
        let v: serde_json::Value =
            serde_json::from_reader(std::fs::File::open(&p).unwrap()).unwrap();
        assert_eq!(v["n"], 3);
    }
}
