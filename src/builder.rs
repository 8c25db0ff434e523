/*
 * Copyright (c) 2023 Terence Wang.
 *
 * This file is part of hpa-subcell
 * (see https://github.com/exogeny/pods).
 *
 * License: MIT, see https://opensource.org/licenses/MIT
 */

//! Resolves a configuration into per-split example streams, and drives
//! them into an `ExampleSink`.

use crate::assemble::{generate_examples_from_image, read_hpa_image, CellCrops};
use crate::config::{BuilderConfig, SplitName};
use crate::constants::{
    BUILDER_VERSION, BUILD_META_FILE, DATASET_INFO_FILE, DOWNLOAD_SUBDIR, LOCATION_FILE_KEY,
    LOCATION_FILE_NAME,
};
use crate::download::{DownloadManager, HttpDownloadManager};
use crate::example::{features_schema, Example};
use crate::location::{get_location_ids, get_subcellular_locations, LocationIds, LocationMap};
use crate::manifest::{download_urls, read_manifest, ImageInfo};
use crate::prog_opts::BuildOpts;
use crate::utils::{self as hputils, BuildError};
use crate::writer::{DirectoryWriter, ExampleSink};
use anyhow::Context;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use num_format::{Locale, ToFormattedString};
use serde::Serialize;
use serde_json::json;
use slog::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use uuid::Uuid;

/// Everything needed to generate the examples of one split.
pub struct SplitGenerator {
    pub split: SplitName,
    pub image_infos: Vec<ImageInfo>,
    pub image_paths: Rc<BTreeMap<String, PathBuf>>,
    pub locations: Rc<LocationMap>,
}

impl SplitGenerator {
    fn path_for(&self, key: String) -> anyhow::Result<&Path> {
        match self.image_paths.get(&key) {
            Some(p) => Ok(p.as_path()),
            None => Err(BuildError::MissingDownload(key).into()),
        }
    }
}

pub struct HumanProteinAtlas<'a> {
    config: &'a BuilderConfig,
    manifest_dir: PathBuf,
    log: slog::Logger,
}

impl<'a> HumanProteinAtlas<'a> {
    pub fn new(config: &'a BuilderConfig, manifest_dir: &Path, log: &slog::Logger) -> Self {
        Self {
            config,
            manifest_dir: manifest_dir.to_path_buf(),
            log: log.new(slog::o!("config" => config.name.clone())),
        }
    }

    /// Read the manifests of every cell line used by the configuration,
    /// download all images along with the location archive in a single
    /// request, and load the location table.
    pub fn split_generators(&self, dl: &dyn DownloadManager) -> anyhow::Result<Vec<SplitGenerator>> {
        let mut image_infos: HashMap<_, Vec<ImageInfo>> = HashMap::new();

        for cell_line in self.config.cell_lines() {
            let infos = read_manifest(&cell_line.manifest_path(&self.manifest_dir))?;
            info!(
                self.log,
                "cell line {} lists {} images",
                cell_line,
                infos.len().to_formatted_string(&Locale::en)
            );
            image_infos.insert(cell_line, infos);
        }

        let downloaded = dl.download(&download_urls(image_infos.values().flatten()))?;
        let archive = downloaded
            .get(LOCATION_FILE_KEY)
            .ok_or_else(|| BuildError::MissingDownload(LOCATION_FILE_KEY.to_string()))?;
        let extracted = dl.extract(archive)?;
        let locations = Rc::new(get_subcellular_locations(
            &extracted.join(LOCATION_FILE_NAME),
            &self.log,
        )?);
        let image_paths = Rc::new(downloaded);

        Ok(self
            .config
            .splits
            .iter()
            .map(|s| SplitGenerator {
                split: s.name,
                image_infos: image_infos[&s.cell_line].clone(),
                image_paths: image_paths.clone(),
                locations: locations.clone(),
            })
            .collect())
    }

    pub fn generate_examples<'g>(&self, gen: &'g SplitGenerator) -> SplitExamples<'g> {
        SplitExamples {
            gen,
            next_image: 0,
            current: None,
            done: false,
            stats: GenerationStats::default(),
            log: self.log.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GenerationStats {
    pub images: usize,
    pub images_without_cells: usize,
    pub images_without_annotation: usize,
    pub examples: usize,
}

struct CurrentImage<'g> {
    info: &'g ImageInfo,
    location: LocationIds,
    crops: CellCrops,
}

/// The `(key, example)` pairs of one split, in manifest order. The
/// sequence ends after the last image, or right after the first error.
pub struct SplitExamples<'g> {
    gen: &'g SplitGenerator,
    next_image: usize,
    current: Option<CurrentImage<'g>>,
    done: bool,
    stats: GenerationStats,
    log: slog::Logger,
}

impl<'g> SplitExamples<'g> {
    pub fn stats(&self) -> GenerationStats {
        self.stats
    }

    /// The number of source images started so far.
    pub fn images_done(&self) -> usize {
        self.next_image
    }

    fn open_image(&mut self, info: &'g ImageInfo) -> anyhow::Result<CurrentImage<'g>> {
        let gen = self.gen;
        let image = read_hpa_image(
            gen.path_for(info.composite_key())?,
            gen.path_for(info.yellow_key())?,
        )
        .with_context(|| format!("could not assemble image {}", info.key()))?;

        let record = gen.locations.get(&info.gene_id);
        if record.is_none() {
            debug!(self.log, "no subcellular location for {}", info.gene_id);
            self.stats.images_without_annotation += 1;
        }
        let location = get_location_ids(record);

        let crops = generate_examples_from_image(
            image,
            gen.path_for(info.segmentation_key())?,
            gen.split,
        )
        .with_context(|| format!("could not read segmentation of {}", info.key()))?;
        if crops.num_regions() == 0 {
            debug!(self.log, "no cells in segmentation of {}", info.key());
            self.stats.images_without_cells += 1;
        }
        Ok(CurrentImage {
            info,
            location,
            crops,
        })
    }
}

impl<'g> Iterator for SplitExamples<'g> {
    type Item = anyhow::Result<(String, Example)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(cur) = self.current.as_mut() {
                if let Some(partial) = cur.crops.next() {
                    let key = format!("{}-{}", cur.info.key(), Uuid::new_v4());
                    let ex = Example::from_partial(
                        partial,
                        &cur.info.gene_id,
                        &cur.info.gene_name,
                        cur.location.clone(),
                    );
                    self.stats.examples += 1;
                    return Some(Ok((key, ex)));
                }
                self.current = None;
            }

            let gen = self.gen;
            let Some(info) = gen.image_infos.get(self.next_image) else {
                self.done = true;
                return None;
            };
            self.next_image += 1;
            self.stats.images += 1;
            match self.open_image(info) {
                Ok(cur) => self.current = Some(cur),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<'g> FusedIterator for SplitExamples<'g> {}

#[derive(Debug, Serialize)]
pub struct BuildSummary {
    pub splits: BTreeMap<String, GenerationStats>,
}

/// Generate every requested split of `opts.config`, handing the examples
/// to `sink`, and record the dataset description in `info_dir`.
pub fn build_with(
    opts: &BuildOpts,
    dl: &dyn DownloadManager,
    sink: &mut dyn ExampleSink,
    info_dir: &Path,
) -> anyhow::Result<BuildSummary> {
    let log = opts.log;
    let hpa = HumanProteinAtlas::new(opts.config, &opts.manifest_dir, log);
    let generators = hpa.split_generators(dl)?;

    let mut summary = BuildSummary {
        splits: BTreeMap::new(),
    };
    for gen in generators.iter().filter(|g| opts.wants_split(g.split)) {
        info!(
            log,
            "generating split {} from {} images",
            gen.split,
            gen.image_infos.len().to_formatted_string(&Locale::en)
        );
        let pbar = ProgressBar::with_draw_target(
            Some(gen.image_infos.len() as u64),
            ProgressDrawTarget::stderr_with_hz(5u8),
        );
        pbar.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
                .context("ProgressStyle template was invalid.")?
                .progress_chars("##-"),
        );

        sink.begin_split(gen.split)?;
        let mut examples = hpa.generate_examples(gen);
        while let Some(res) = examples.next() {
            let (key, ex) = res?;
            sink.write_example(gen.split, &key, &ex)?;
            pbar.set_position(examples.images_done() as u64);
        }
        sink.finish_split(gen.split)?;

        let stats = examples.stats();
        pbar.finish_with_message(format!(
            "finished split {}; {} examples\n",
            gen.split, stats.examples
        ));
        info!(
            log,
            "split {}: {} examples from {} images ({} without cells, {} without annotation)",
            gen.split,
            stats.examples.to_formatted_string(&Locale::en),
            stats.images.to_formatted_string(&Locale::en),
            stats.images_without_cells.to_formatted_string(&Locale::en),
            stats.images_without_annotation.to_formatted_string(&Locale::en)
        );
        if stats.examples == 0 {
            warn!(log, "split {} produced no examples; please check the input.", gen.split);
        }
        summary.splits.insert(gen.split.to_string(), stats);
    }

    let split_counts: BTreeMap<&String, usize> = summary
        .splits
        .iter()
        .map(|(k, v)| (k, v.examples))
        .collect();
    let dataset_info = json!({
        "name": "human_protein_atlas",
        "config": opts.config.name,
        "config_description": opts.config.description,
        "version": BUILDER_VERSION,
        "config_version": opts.config.version,
        "release_notes": BTreeMap::from([(BUILDER_VERSION, "Initial release.")]),
        "features": features_schema(),
        "splits": split_counts,
    });
    hputils::write_json(&info_dir.join(DATASET_INFO_FILE), &dataset_info)?;
    Ok(summary)
}

/// Build `opts.config` over HTTP into `{data_dir}/{config}/{version}`.
pub fn build(opts: &BuildOpts) -> anyhow::Result<BuildSummary> {
    let out_dir = opts.output_dir();
    let mut writer = DirectoryWriter::new(out_dir.clone())?;
    hputils::write_json(&out_dir.join(BUILD_META_FILE), opts)?;

    let dl = HttpDownloadManager::new(opts.download_dir.join(DOWNLOAD_SUBDIR), opts.log)?;
    info!(
        opts.log,
        "building {} into {} (downloads in {})",
        opts.config.name,
        out_dir.display(),
        dl.download_dir().display()
    );
    build_with(opts, &dl, &mut writer, &out_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_configs, select_config, CellLine};
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use std::cell::RefCell;
    use std::fs;

    fn test_log() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    /// Serves urls from fixture files; the location archive is served as
    /// an already extracted directory.
    struct FixtureDownloads {
        files: HashMap<String, PathBuf>,
        location_dir: PathBuf,
        requests: RefCell<Vec<BTreeMap<String, String>>>,
    }

    impl DownloadManager for FixtureDownloads {
        fn download(&self, urls: &BTreeMap<String, String>) -> anyhow::Result<BTreeMap<String, PathBuf>> {
            self.requests.borrow_mut().push(urls.clone());
            urls.iter()
                .map(|(k, u)| -> anyhow::Result<(String, PathBuf)> {
                    let p = if k == LOCATION_FILE_KEY {
                        self.location_dir.join("archive.zip")
                    } else {
                        self.files
                            .get(u)
                            .cloned()
                            .ok_or_else(|| anyhow::anyhow!("404 {}", u))?
                    };
                    Ok((k.clone(), p))
                })
                .collect()
        }

        fn extract(&self, _archive: &Path) -> anyhow::Result<PathBuf> {
            Ok(self.location_dir.clone())
        }
    }

    #[derive(Default)]
    struct CollectSink {
        begun: Vec<SplitName>,
        examples: Vec<(SplitName, String, Example)>,
    }

    impl ExampleSink for CollectSink {
        fn begin_split(&mut self, split: SplitName) -> anyhow::Result<()> {
            self.begun.push(split);
            Ok(())
        }

        fn write_example(&mut self, split: SplitName, key: &str, example: &Example) -> anyhow::Result<()> {
            self.examples.push((split, key.to_string(), example.clone()));
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        downloads: FixtureDownloads,
    }

    impl Fixture {
        fn manifest_dir(&self) -> PathBuf {
            self.dir.path().join("cell_lines")
        }
    }

    /// `rows` are (assay, image, gene, number of cells in the mask).
    fn fixture(cell_line: CellLine, rows: &[(&str, &str, &str, u8)], locations: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let manifest_dir = dir.path().join("cell_lines");
        let img_dir = dir.path().join("remote");
        let loc_dir = dir.path().join("locations");
        for d in [&manifest_dir, &img_dir, &loc_dir] {
            fs::create_dir_all(d).unwrap();
        }

        let mut manifest = String::from("assay_id,image_id,gene_id,gene_name\n");
        let mut files = HashMap::new();
        for (assay, image, gene, ncells) in rows {
            manifest.push_str(&format!("{},{},{},{}_name\n", assay, image, gene, gene));
            let info = ImageInfo {
                assay_id: assay.to_string(),
                image_id: image.to_string(),
                gene_id: gene.to_string(),
                gene_name: String::new(),
            };
            let base = img_dir.join(info.key());
            let cp = base.with_extension("c");
            let yp = base.with_extension("y");
            let sp = base.with_extension("s");
            RgbImage::from_pixel(16, 16, Rgb([50, 60, 70]))
                .save_with_format(&cp, image::ImageFormat::Png)
                .unwrap();
            GrayImage::from_pixel(16, 16, Luma([80]))
                .save_with_format(&yp, image::ImageFormat::Png)
                .unwrap();
            let mut mask = RgbImage::new(16, 16);
            for c in 0..*ncells {
                // one 2x2 cell per colour along the diagonal
                let o = 3 * c as u32;
                for (x, y) in [(o, o), (o + 1, o), (o, o + 1), (o + 1, o + 1)] {
                    mask.put_pixel(x, y, Rgb([c + 1, 0, 0]));
                }
            }
            mask.save_with_format(&sp, image::ImageFormat::Png).unwrap();
            files.insert(info.composite_url(), cp);
            files.insert(info.yellow_url(), yp);
            files.insert(info.segmentation_url(), sp);
        }
        fs::write(cell_line.manifest_path(&manifest_dir), manifest).unwrap();

        let mut table = String::from(
            "Gene\tGene name\tReliability\tMain location\tAdditional location\tExtracellular location\n",
        );
        table.push_str(locations);
        fs::write(loc_dir.join(LOCATION_FILE_NAME), table).unwrap();

        Fixture {
            downloads: FixtureDownloads {
                files,
                location_dir: loc_dir,
                requests: RefCell::new(Vec::new()),
            },
            dir,
        }
    }

    fn u2os() -> BuilderConfig {
        let configs = default_configs();
        select_config(&configs, "U2OS").unwrap().clone()
    }

    #[test]
    fn test_single_annotated_image() {
        let f = fixture(
            CellLine::U2OS,
            &[("A1", "I1", "G1", 1)],
            "G1\tG1_name\tEnhanced\tNucleoplasm\t\t\n",
        );
        let config = u2os();
        let hpa = HumanProteinAtlas::new(&config, &f.manifest_dir(), &test_log());
        let gens = hpa.split_generators(&f.downloads).unwrap();
        assert_eq!(gens.len(), 2);

        let examples: Vec<(String, Example)> = hpa
            .generate_examples(&gens[0])
            .collect::<anyhow::Result<_>>()
            .unwrap();
        assert_eq!(examples.len(), 1);
        let (key, ex) = &examples[0];
        let suffix = key.strip_prefix("A1-I1-").unwrap();
        let id = Uuid::parse_str(suffix).unwrap();
        assert_eq!(id.get_version_num(), 4);
        assert_eq!(suffix, id.hyphenated().to_string());
        assert_eq!(ex.location.main.level1, vec![1, 0, 0]);
        assert_eq!(ex.gene_id, "G1");
        assert_eq!(ex.gene_name, "G1_name");
        assert_eq!(ex.split, SplitName::Train);
        assert_eq!(ex.image.dimensions(), ex.mask.dimensions());
    }

    #[test]
    fn test_download_request_shape() {
        let f = fixture(
            CellLine::U2OS,
            &[("A1", "I1", "G1", 1), ("A1", "I2", "G2", 2), ("A2", "I1", "G3", 0)],
            "",
        );
        let config = u2os();
        let hpa = HumanProteinAtlas::new(&config, &f.manifest_dir(), &test_log());
        hpa.split_generators(&f.downloads).unwrap();

        // one request covering both splits
        let requests = f.downloads.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].len(), 3 * 3 + 1);
        assert!(requests[0].contains_key(LOCATION_FILE_KEY));
        assert_eq!(
            requests[0]["A1-I2-y"],
            "https://images.proteinatlas.org/A1/I2_yellow.jpg"
        );
    }

    #[test]
    fn test_unannotated_and_empty_images() {
        let f = fixture(
            CellLine::U2OS,
            &[("A1", "I1", "G9", 3), ("A1", "I2", "G1", 0)],
            "G1\tG1_name\tEnhanced\tNucleoplasm\t\t\n",
        );
        let config = u2os();
        let hpa = HumanProteinAtlas::new(&config, &f.manifest_dir(), &test_log());
        let gens = hpa.split_generators(&f.downloads).unwrap();

        let mut it = hpa.generate_examples(&gens[1]);
        let examples: Vec<_> = it.by_ref().map(|r| r.unwrap().1).collect();
        assert_eq!(examples.len(), 3);
        for ex in &examples {
            assert_eq!(ex.location, LocationIds::default());
            assert_eq!(ex.split, SplitName::Test);
            assert_eq!(ex.image.dimensions(), (2, 2));
            assert_eq!(ex.image.dimensions(), ex.mask.dimensions());
        }
        assert!(it.next().is_none());
        assert_eq!(
            it.stats(),
            GenerationStats {
                images: 2,
                images_without_cells: 1,
                images_without_annotation: 1,
                examples: 3,
            }
        );
    }

    #[test]
    fn test_missing_download_stops_the_split() {
        let f = fixture(CellLine::U2OS, &[("A1", "I1", "G1", 1), ("A1", "I2", "G1", 1)], "");
        let config = u2os();
        let hpa = HumanProteinAtlas::new(&config, &f.manifest_dir(), &test_log());
        let mut gens = hpa.split_generators(&f.downloads).unwrap();

        // drop the yellow channel of the second image
        let mut paths = (*gens[0].image_paths).clone();
        paths.remove("A1-I2-y");
        gens[0].image_paths = Rc::new(paths);

        let results: Vec<_> = hpa.generate_examples(&gens[0]).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingDownload(k)) if k == "A1-I2-y"
        ));
    }

    #[test]
    fn test_missing_manifest_is_fatal() {
        let f = fixture(CellLine::U2OS, &[("A1", "I1", "G1", 1)], "");
        let configs = default_configs();
        let hek = select_config(&configs, "HEK293").unwrap();
        let hpa = HumanProteinAtlas::new(hek, &f.manifest_dir(), &test_log());
        let err = hpa.split_generators(&f.downloads).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingManifest(_))
        ));
        assert!(f.downloads.requests.borrow().is_empty());
    }

    #[test]
    fn test_build_with_is_repeatable() {
        let f = fixture(
            CellLine::A431,
            &[("A1", "I1", "G1", 2), ("A1", "I2", "G2", 1)],
            "G1\tG1_name\tApproved\tCytosol\tNucleoli\t\n",
        );
        let config = BuilderConfig::for_cell_line(CellLine::A431);

        let log = test_log();
        let out = f.dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let opts = BuildOpts::builder()
            .config(&config)
            .manifest_dir(f.manifest_dir())
            .data_dir(out.clone())
            .download_dir(out.clone())
            .cmdline("test")
            .version("0.0.0")
            .log(&log)
            .build();

        let mut counts = Vec::new();
        for _ in 0..2 {
            let mut sink = CollectSink::default();
            let summary = build_with(&opts, &f.downloads, &mut sink, &out).unwrap();
            assert_eq!(sink.begun, vec![SplitName::Train, SplitName::Test]);
            counts.push((summary.splits["train"].examples, summary.splits["test"].examples));
            let keys: std::collections::HashSet<_> = sink.examples.iter().map(|e| &e.1).collect();
            assert_eq!(keys.len(), sink.examples.len());
        }
        assert_eq!(counts, vec![(3, 3), (3, 3)]);

        let info: serde_json::Value =
            serde_json::from_reader(fs::File::open(out.join(DATASET_INFO_FILE)).unwrap()).unwrap();
        assert_eq!(info["config"], "A-431");
        assert_eq!(info["splits"]["train"], 3);
        assert_eq!(info["features"]["location/main/level3"]["shape"][0], 34);
    }

    #[test]
    fn test_build_only_some_splits() {
        let f = fixture(CellLine::U2OS, &[("A1", "I1", "G1", 1)], "");
        let config = u2os();
        let log = test_log();
        let out = f.dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let opts = BuildOpts::builder()
            .config(&config)
            .manifest_dir(f.manifest_dir())
            .data_dir(out.clone())
            .download_dir(out.clone())
            .only_splits(Some(vec![SplitName::Test]))
            .cmdline("test")
            .version("0.0.0")
            .log(&log)
            .build();
        let mut sink = CollectSink::default();
        let summary = build_with(&opts, &f.downloads, &mut sink, &out).unwrap();
        assert_eq!(summary.splits.keys().collect::<Vec<_>>(), vec!["test"]);
        assert_eq!(sink.examples.len(), 1);
        assert_eq!(opts.output_dir(), out.join("U2OS").join("1.1.0"));
    }
}
