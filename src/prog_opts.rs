use crate::config::{BuilderConfig, SplitName};
use serde::Serialize;
use slog;
use std::path::PathBuf;
use typed_builder::TypedBuilder;

#[derive(TypedBuilder, Debug, Serialize)]
pub struct BuildOpts<'a, 'b, 'c, 'd> {
    pub config: &'a BuilderConfig,
    pub manifest_dir: PathBuf,
    pub data_dir: PathBuf,
    pub download_dir: PathBuf,
    // build only these splits; all of the configuration's splits if unset
    #[builder(default)]
    pub only_splits: Option<Vec<SplitName>>,
    pub cmdline: &'b str,
    pub version: &'c str,
    #[serde(skip_serializing)]
    pub log: &'d slog::Logger,
}

impl BuildOpts<'_, '_, '_, '_> {
    /// `{data_dir}/{config}/{config version}`
    pub fn output_dir(&self) -> PathBuf {
        self.data_dir
            .join(&self.config.name)
            .join(self.config.version)
    }

    pub fn wants_split(&self, split: SplitName) -> bool {
        match &self.only_splits {
            Some(s) => s.contains(&split),
            None => true,
        }
    }
}
