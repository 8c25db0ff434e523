/*
 * Copyright (c) 2023 Terence Wang.
 *
 * This file is part of hpa-subcell
 * (see https://github.com/exogeny/pods).
 *
 * License: MIT, see https://opensource.org/licenses/MIT
 */

pub const SEGMENTATION_URL_BASE: &str = "https://www.proteinatlas.org/images_cell_segmentation";
pub const IMAGE_URL_BASE: &str = "https://images.proteinatlas.org";

pub const LOCATION_ARCHIVE_URL: &str =
    "https://v23.proteinatlas.org/download/subcellular_location.tsv.zip";
pub const LOCATION_FILE_KEY: &str = "location_file";
pub const LOCATION_FILE_NAME: &str = "subcellular_location.tsv";

// suffixes appended to `{assay}-{image}` in the download map
pub const SEGMENTATION_SUFFIX: &str = "s";
pub const COMPOSITE_SUFFIX: &str = "c";
pub const YELLOW_SUFFIX: &str = "y";

pub const MANIFEST_SUFFIX: &str = "_images.csv";
pub const DOWNLOAD_SUBDIR: &str = "protein_atlas";

pub const LEVEL1_WIDTH: usize = 3;
pub const LEVEL2_WIDTH: usize = 13;
pub const LEVEL3_WIDTH: usize = 34;

pub const COLLECTION_VERSION: &str = "1.0.0";
pub const BUILDER_VERSION: &str = "1.0.0";
pub const CONFIG_VERSION: &str = "1.1.0";

pub const DATASET_INFO_FILE: &str = "dataset_info.json";
pub const BUILD_META_FILE: &str = "build.json";
