/*
 * Copyright (c) 2023 Terence Wang.
 *
 * This file is part of hpa-subcell
 * (see https://github.com/exogeny/pods).
 *
 * License: MIT, see https://opensource.org/licenses/MIT
 */

//! Destinations for generated examples.

use crate::config::SplitName;
use crate::example::{Example, ExampleRecord};
use anyhow::{anyhow, bail, Context};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Receives the examples of each split in generation order.
pub trait ExampleSink {
    /// Called once before the first example of `split`.
    fn begin_split(&mut self, _split: SplitName) -> anyhow::Result<()> {
        Ok(())
    }

    fn write_example(&mut self, split: SplitName, key: &str, example: &Example) -> anyhow::Result<()>;

    /// Called once after the last example of `split`.
    fn finish_split(&mut self, _split: SplitName) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes every example as a pair of PNG files under `{root}/{split}/`
/// plus one json line in `{root}/{split}.jsonl`.
pub struct DirectoryWriter {
    root: PathBuf,
    indexes: HashMap<SplitName, BufWriter<File>>,
}

impl DirectoryWriter {
    pub fn new(root: PathBuf) -> anyhow::Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("could not create output directory {}", root.display()))?;
        Ok(Self {
            root,
            indexes: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self, split: SplitName) -> PathBuf {
        self.root.join(format!("{}.jsonl", split))
    }

    pub fn split_dir(&self, split: SplitName) -> PathBuf {
        self.root.join(split.as_str())
    }
}

impl ExampleSink for DirectoryWriter {
    fn begin_split(&mut self, split: SplitName) -> anyhow::Result<()> {
        // examples are keyed randomly, so anything left from an earlier
        // run would never be overwritten
        let dir = self.split_dir(split);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("could not clear {}", dir.display()))?;
        }
        fs::create_dir_all(&dir).with_context(|| format!("could not create {}", dir.display()))?;

        let ipath = self.index_path(split);
        let f = File::create(&ipath).with_context(|| format!("could not create {}", ipath.display()))?;
        self.indexes.insert(split, BufWriter::new(f));
        Ok(())
    }

    fn write_example(&mut self, split: SplitName, key: &str, example: &Example) -> anyhow::Result<()> {
        if !self.indexes.contains_key(&split) {
            bail!("split {} was written before it was started", split);
        }
        let image_name = format!("{}/{}.png", split, key);
        let mask_name = format!("{}/{}_mask.png", split, key);
        example
            .image
            .save_with_format(self.root.join(&image_name), image::ImageFormat::Png)
            .with_context(|| format!("could not write {}", image_name))?;
        example
            .mask
            .save_with_format(self.root.join(&mask_name), image::ImageFormat::Png)
            .with_context(|| format!("could not write {}", mask_name))?;

        let record = ExampleRecord::new(key, example, image_name, mask_name);
        let index = self
            .indexes
            .get_mut(&split)
            .ok_or_else(|| anyhow!("no index open for split {}", split))?;
        serde_json::to_writer(&mut *index, &record).context("could not format json.")?;
        index.write_all(b"\n")?;
        Ok(())
    }

    fn finish_split(&mut self, split: SplitName) -> anyhow::Result<()> {
        if let Some(mut index) = self.indexes.remove(&split) {
            index
                .flush()
                .with_context(|| format!("could not flush the {} index", split))?;
        }
        Ok(())
    }
}
