/*
 * Copyright (c) 2023 Terence Wang.
 *
 * This file is part of hpa-subcell
 * (see https://github.com/exogeny/pods).
 *
 * License: MIT, see https://opensource.org/licenses/MIT
 */

//! Per cell line image manifests, and the download urls derived from them.

use crate::constants::{
    COMPOSITE_SUFFIX, IMAGE_URL_BASE, LOCATION_ARCHIVE_URL, LOCATION_FILE_KEY,
    SEGMENTATION_SUFFIX, SEGMENTATION_URL_BASE, YELLOW_SUFFIX,
};
use crate::utils::BuildError;
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Identifies one image triple (composite, yellow channel, segmentation)
/// in the atlas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub assay_id: String,
    pub image_id: String,
    pub gene_id: String,
    pub gene_name: String,
}

impl ImageInfo {
    /// `{assay}-{image}`; prefix of every download key and example key
    /// for this image.
    pub fn key(&self) -> String {
        format!("{}-{}", self.assay_id, self.image_id)
    }

    pub fn segmentation_key(&self) -> String {
        format!("{}-{}", self.key(), SEGMENTATION_SUFFIX)
    }

    pub fn composite_key(&self) -> String {
        format!("{}-{}", self.key(), COMPOSITE_SUFFIX)
    }

    pub fn yellow_key(&self) -> String {
        format!("{}-{}", self.key(), YELLOW_SUFFIX)
    }

    pub fn segmentation_url(&self) -> String {
        format!(
            "{}/{}/{}_segmentation.png",
            SEGMENTATION_URL_BASE, self.assay_id, self.image_id
        )
    }

    pub fn composite_url(&self) -> String {
        format!(
            "{}/{}/{}_blue_red_green.jpg",
            IMAGE_URL_BASE, self.assay_id, self.image_id
        )
    }

    pub fn yellow_url(&self) -> String {
        format!(
            "{}/{}/{}_yellow.jpg",
            IMAGE_URL_BASE, self.assay_id, self.image_id
        )
    }
}

/// Reads a manifest csv with a header row followed by rows of
/// `assay_id,image_id,gene_id,gene_name`. A missing file or a row with
/// a different number of fields is an error.
pub fn read_manifest(path: &Path) -> anyhow::Result<Vec<ImageInfo>> {
    if !path.is_file() {
        return Err(BuildError::MissingManifest(path.to_path_buf()).into());
    }
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("couldn't open manifest {}", path.display()))?;

    let mut infos = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        // header is line 1
        let line = i + 2;
        let record = result.map_err(|e| BuildError::MalformedManifestRow {
            path: path.to_path_buf(),
            line,
            reason: e.to_string(),
        })?;
        if record.len() != 4 {
            return Err(BuildError::MalformedManifestRow {
                path: path.to_path_buf(),
                line,
                reason: format!("expected 4 fields, found {}", record.len()),
            }
            .into());
        }
        if record.iter().take(3).any(str::is_empty) {
            return Err(BuildError::MalformedManifestRow {
                path: path.to_path_buf(),
                line,
                reason: "assay, image and gene ids must not be empty".to_string(),
            }
            .into());
        }
        infos.push(ImageInfo {
            assay_id: record[0].to_string(),
            image_id: record[1].to_string(),
            gene_id: record[2].to_string(),
            gene_name: record[3].to_string(),
        });
    }
    Ok(infos)
}

/// The full download map for a set of images: the segmentation, composite
/// and yellow urls of each image, keyed by `{assay}-{image}-{s|c|y}`, plus
/// the shared location archive. Images listed more than once share keys.
pub fn download_urls<'a, I>(infos: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a ImageInfo>,
{
    let mut urls = BTreeMap::new();
    for info in infos {
        urls.insert(info.segmentation_key(), info.segmentation_url());
        urls.insert(info.composite_key(), info.composite_url());
        urls.insert(info.yellow_key(), info.yellow_url());
    }
    urls.insert(LOCATION_FILE_KEY.to_string(), LOCATION_ARCHIVE_URL.to_string());
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(assay: &str, image: &str) -> ImageInfo {
        ImageInfo {
            assay_id: assay.to_string(),
            image_id: image.to_string(),
            gene_id: "ENSG00000000003".to_string(),
            gene_name: "TSPAN6".to_string(),
        }
    }

    #[test]
    fn test_urls() {
        let i = info("1234", "56_C3_1");
        assert_eq!(
            i.segmentation_url(),
            "https://www.proteinatlas.org/images_cell_segmentation/1234/56_C3_1_segmentation.png"
        );
        assert_eq!(
            i.composite_url(),
            "https://images.proteinatlas.org/1234/56_C3_1_blue_red_green.jpg"
        );
        assert_eq!(
            i.yellow_url(),
            "https://images.proteinatlas.org/1234/56_C3_1_yellow.jpg"
        );
        assert_eq!(i.composite_key(), "1234-56_C3_1-c");
    }

    #[test]
    fn test_download_key_count() {
        let infos: Vec<ImageInfo> = (0..7)
            .map(|n| info(&format!("{}", 100 + n), &format!("1_A{}_1", n)))
            .collect();
        let urls = download_urls(&infos);
        assert_eq!(urls.len(), 3 * infos.len() + 1);
        assert_eq!(urls[LOCATION_FILE_KEY], LOCATION_ARCHIVE_URL);

        // a second cell line repeating one image adds only its new images
        let other = vec![info("100", "1_A0_1"), info("200", "9_H9_9")];
        let urls = download_urls(infos.iter().chain(other.iter()));
        assert_eq!(urls.len(), 3 * (infos.len() + 1) + 1);
        assert_eq!(
            urls["200-9_H9_9-s"],
            "https://www.proteinatlas.org/images_cell_segmentation/200/9_H9_9_segmentation.png"
        );
    }

    #[test]
    fn test_read_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("U2OS_images.csv");
        std::fs::write(
            &p,
            "assay_id,image_id,gene_id,gene_name\n10,1_A1_1,ENSG01,AAA\n11,2_B2_2,ENSG02,BBB\n",
        )
        .unwrap();
        let infos = read_manifest(&p).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[1].key(), "11-2_B2_2");
        assert_eq!(infos[1].gene_name, "BBB");
    }

    #[test]
    fn test_malformed_manifest_row() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("U2OS_images.csv");
        std::fs::write(
            &p,
            "assay_id,image_id,gene_id,gene_name\n10,1_A1_1,ENSG01,AAA\n11,2_B2_2\n",
        )
        .unwrap();
        let err = read_manifest(&p).unwrap_err();
        match err.downcast_ref::<BuildError>() {
            Some(BuildError::MalformedManifestRow { line, .. }) => assert_eq!(*line, 3),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_manifest(&dir.path().join("HEK293_images.csv")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingManifest(_))
        ));
    }
}
