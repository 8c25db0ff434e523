/*
 * Copyright (c) 2023 Terence Wang.
 *
 * This file is part of hpa-subcell
 * (see https://github.com/exogeny/pods).
 *
 * License: MIT, see https://opensource.org/licenses/MIT
 */

//! Fetching of remote assets into a local cache directory.

use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use num_format::{Locale, ToFormattedString};
use slog::{debug, info};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Resolves a map of `key -> url` to a map of `key -> local path`, and
/// unpacks archives. Implementations own caching and any retry policy;
/// callers treat every error as fatal.
pub trait DownloadManager {
    fn download(&self, urls: &BTreeMap<String, String>) -> anyhow::Result<BTreeMap<String, PathBuf>>;

    /// Unpack `archive` and return the directory holding its contents.
    fn extract(&self, archive: &Path) -> anyhow::Result<PathBuf>;
}

fn is_http_source(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// The name the cached copy of `url` gets inside the download directory.
/// The key keeps files from different images apart; the url's last
/// segment keeps the extension.
pub fn cache_file_name(key: &str, url: &str) -> String {
    let base = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|b| !b.is_empty())
        .unwrap_or("download");
    format!("{}_{}", key, base)
}

/// Downloads over blocking HTTP into `download_dir`, skipping files that
/// are already present. Sources that are not http(s) urls are read from
/// the local file system (`file://` prefix optional).
pub struct HttpDownloadManager {
    download_dir: PathBuf,
    client: reqwest::blocking::Client,
    log: slog::Logger,
}

impl HttpDownloadManager {
    pub fn new(download_dir: PathBuf, log: &slog::Logger) -> anyhow::Result<Self> {
        fs::create_dir_all(&download_dir).with_context(|| {
            format!(
                "could not create download directory {}",
                download_dir.display()
            )
        })?;
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("could not build http client")?;
        Ok(Self {
            download_dir,
            client,
            log: log.clone(),
        })
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn open_source(&self, source: &str) -> anyhow::Result<Box<dyn Read>> {
        if is_http_source(source) {
            let response = self
                .client
                .get(source)
                .send()
                .with_context(|| format!("could not fetch {}", source))?
                .error_for_status()
                .with_context(|| format!("could not fetch {}", source))?;
            return Ok(Box::new(response));
        }
        let path = source.strip_prefix("file://").unwrap_or(source);
        let f = File::open(path).with_context(|| format!("could not open source file {}", path))?;
        Ok(Box::new(f))
    }

    /// Copy `source` to `destination` through a `.part` file so that an
    /// interrupted transfer never leaves a file that looks complete. The
    /// `.part` file is removed again if any step after creating it fails.
    fn fetch_one(&self, source: &str, destination: &Path) -> anyhow::Result<()> {
        let mut tmp_os: OsString = destination.as_os_str().to_os_string();
        tmp_os.push(".part");
        let tmp_path = PathBuf::from(tmp_os);

        let mut reader = self.open_source(source)?;
        let file = File::create(&tmp_path)
            .with_context(|| format!("could not create {}", tmp_path.display()))?;
        let res = write_part(&mut reader, file, source, &tmp_path).and_then(|()| {
            fs::rename(&tmp_path, destination)
                .with_context(|| format!("could not finalize {}", destination.display()))
        });
        if res.is_err() {
            if let Err(e) = fs::remove_file(&tmp_path) {
                debug!(
                    self.log,
                    "could not remove partial download {}: {}",
                    tmp_path.display(),
                    e
                );
            }
        }
        res
    }
}

fn write_part(reader: &mut dyn Read, file: File, source: &str, tmp_path: &Path) -> anyhow::Result<()> {
    let mut writer = BufWriter::new(file);
    std::io::copy(reader, &mut writer).with_context(|| format!("could not copy {}", source))?;
    writer
        .flush()
        .with_context(|| format!("could not flush {}", tmp_path.display()))?;
    Ok(())
}

impl DownloadManager for HttpDownloadManager {
    fn download(&self, urls: &BTreeMap<String, String>) -> anyhow::Result<BTreeMap<String, PathBuf>> {
        let pbar = ProgressBar::with_draw_target(
            Some(urls.len() as u64),
            ProgressDrawTarget::stderr_with_hz(5u8),
        );
        pbar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} {msg}",
                )
                .context("ProgressStyle template was invalid.")?
                .progress_chars("╢▌▌░╟"),
        );

        let mut paths = BTreeMap::new();
        let mut num_cached = 0usize;
        for (key, url) in urls {
            let dest = self.download_dir.join(cache_file_name(key, url));
            if dest.is_file() {
                num_cached += 1;
            } else {
                debug!(self.log, "fetching {} -> {}", url, dest.display());
                self.fetch_one(url, &dest)?;
            }
            paths.insert(key.clone(), dest);
            pbar.inc(1);
        }
        pbar.finish_with_message("downloads complete");

        info!(
            self.log,
            "resolved {} downloads ({} already cached)",
            paths.len().to_formatted_string(&Locale::en),
            num_cached.to_formatted_string(&Locale::en)
        );
        Ok(paths)
    }

    fn extract(&self, archive: &Path) -> anyhow::Result<PathBuf> {
        let name = match archive.file_name() {
            Some(n) => n.to_os_string(),
            None => bail!("cannot extract {}: not a file", archive.display()),
        };
        let out_dir = self.download_dir.join("extracted").join(&name);
        if out_dir.is_dir() {
            debug!(self.log, "reusing extracted archive {}", out_dir.display());
            return Ok(out_dir);
        }

        let mut tmp_os: OsString = out_dir.as_os_str().to_os_string();
        tmp_os.push(".part");
        let tmp_dir = PathBuf::from(tmp_os);
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)
            .with_context(|| format!("could not create {}", tmp_dir.display()))?;

        let f = File::open(archive).with_context(|| format!("could not open {}", archive.display()))?;
        let mut zarch = zip::ZipArchive::new(BufReader::new(f))
            .with_context(|| format!("{} is not a valid zip archive", archive.display()))?;
        zarch
            .extract(&tmp_dir)
            .with_context(|| format!("could not extract {}", archive.display()))?;
        fs::rename(&tmp_dir, &out_dir)
            .with_context(|| format!("could not finalize {}", out_dir.display()))?;

        info!(
            self.log,
            "extracted {} entries from {}",
            zarch.len(),
            archive.display()
        );
        Ok(out_dir)
    }
}
