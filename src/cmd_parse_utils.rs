use crate::config::{BuilderConfig, SplitName};
use clap;
use std::path::PathBuf;

impl clap::ValueEnum for SplitName {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Train, Self::Test]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Train => Some(clap::builder::PossibleValue::new("train")),
            Self::Test => Some(clap::builder::PossibleValue::new("test")),
        }
    }
}

/// The names accepted by `--config`.
pub fn config_names(configs: &[BuilderConfig]) -> Vec<clap::builder::PossibleValue> {
    configs
        .iter()
        .map(|c| clap::builder::PossibleValue::new(c.name.clone()).help(c.description.clone()))
        .collect()
}

/// Value parser for `--manifest-dir`. The `<cell line>_images.csv` files are
/// looked up inside this directory, so it must already exist; the error
/// string is what clap reports to the user.
pub fn pathbuf_directory_exists_validator(v: &str) -> Result<PathBuf, String> {
    let p = PathBuf::from(v);
    if p.is_dir() {
        Ok(p)
    } else {
        Err(format!("{} is not a manifest directory.", v))
    }
}
