/*
 * Copyright (c) 2023 Terence Wang.
 *
 * This file is part of hpa-subcell
 * (see https://github.com/exogeny/pods).
 *
 * License: MIT, see https://opensource.org/licenses/MIT
 */
use crate::assemble::PartialExample;
use crate::config::SplitName;
use crate::location::{LocationIds, LEVEL1_NAMES, LEVEL2, LEVEL3};
use image::{GrayImage, RgbaImage};
use serde::Serialize;
use serde_json::json;
use typed_builder::TypedBuilder;

/// One labelled cell.
#[derive(TypedBuilder, Clone, Debug)]
pub struct Example {
    #[builder(setter(into))]
    pub gene_id: String,
    #[builder(setter(into))]
    pub gene_name: String,
    pub image: RgbaImage,
    pub mask: GrayImage,
    pub location: LocationIds,
    pub split: SplitName,
}

impl Example {
    /// Finish a crop produced by the assembler with the labels of the
    /// image it was cut from.
    pub fn from_partial(
        partial: PartialExample,
        gene_id: &str,
        gene_name: &str,
        location: LocationIds,
    ) -> Self {
        Example::builder()
            .gene_id(gene_id)
            .gene_name(gene_name)
            .image(partial.image)
            .mask(partial.mask)
            .location(location)
            .split(partial.split)
            .build()
    }
}

/// The non-image fields of an example, as stored next to the PNG
/// files by the directory writer.
#[derive(Debug, Serialize)]
pub struct ExampleRecord<'a> {
    pub key: &'a str,
    #[serde(rename = "ensg/id")]
    pub gene_id: &'a str,
    #[serde(rename = "ensg/name")]
    pub gene_name: &'a str,
    pub image: String,
    #[serde(rename = "image/mask")]
    pub mask: String,
    #[serde(rename = "location/main/level1")]
    pub main_level1: &'a [i64],
    #[serde(rename = "location/main/level2")]
    pub main_level2: &'a [i64],
    #[serde(rename = "location/main/level3")]
    pub main_level3: &'a [i64],
    #[serde(rename = "location/additional/level1")]
    pub additional_level1: &'a [i64],
    #[serde(rename = "location/additional/level2")]
    pub additional_level2: &'a [i64],
    #[serde(rename = "location/additional/level3")]
    pub additional_level3: &'a [i64],
    #[serde(rename = "location/extracellular/level1")]
    pub extracellular_level1: &'a [i64],
    #[serde(rename = "location/extracellular/level2")]
    pub extracellular_level2: &'a [i64],
    #[serde(rename = "location/extracellular/level3")]
    pub extracellular_level3: &'a [i64],
    #[serde(rename = "location/reliability")]
    pub reliability: &'static str,
}

impl<'a> ExampleRecord<'a> {
    pub fn new(key: &'a str, ex: &'a Example, image: String, mask: String) -> Self {
        let loc = &ex.location;
        Self {
            key,
            gene_id: &ex.gene_id,
            gene_name: &ex.gene_name,
            image,
            mask,
            main_level1: &loc.main.level1,
            main_level2: &loc.main.level2,
            main_level3: &loc.main.level3,
            additional_level1: &loc.additional.level1,
            additional_level2: &loc.additional.level2,
            additional_level3: &loc.additional.level3,
            extracellular_level1: &loc.extracellular.level1,
            extracellular_level2: &loc.extracellular.level2,
            extracellular_level3: &loc.extracellular.level3,
            reliability: loc.reliability.as_str(),
        }
    }
}

/// Description of the emitted feature dictionary. Each location tensor
/// lists the class name of every position.
pub fn features_schema() -> serde_json::Value {
    let levels: [Vec<&str>; 3] = [
        LEVEL1_NAMES.to_vec(),
        LEVEL2.iter().map(|(n, _)| *n).collect(),
        LEVEL3.iter().map(|(n, _)| *n).collect(),
    ];
    let mut features = serde_json::Map::new();
    features.insert("ensg/id".into(), json!({ "type": "text" }));
    features.insert("ensg/name".into(), json!({ "type": "text" }));
    features.insert(
        "image".into(),
        json!({ "type": "image", "encoding_format": "png", "channels": 4 }),
    );
    features.insert(
        "image/mask".into(),
        json!({ "type": "image", "encoding_format": "png", "channels": 1 }),
    );
    for category in ["main", "additional", "extracellular"] {
        for (level, names) in levels.iter().enumerate() {
            features.insert(
                format!("location/{}/level{}", category, level + 1),
                json!({
                    "type": "tensor",
                    "shape": [names.len()],
                    "dtype": "int64",
                    "names": names,
                }),
            );
        }
    }
    features.insert("location/reliability".into(), json!({ "type": "text" }));
    serde_json::Value::Object(features)
}
