/*
 * Copyright (c) 2023 Terence Wang.
 *
 * This file is part of hpa-subcell
 * (see https://github.com/exogeny/pods).
 *
 * License: MIT, see https://opensource.org/licenses/MIT
 */

//! Channel merging and per-cell cropping of atlas images.

use crate::config::SplitName;
use anyhow::Context;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageReader, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use std::collections::HashMap;
use std::iter::FusedIterator;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("composite is {0}x{1} but the yellow channel is {2}x{3}")]
    ChannelSizeMismatch(u32, u32, u32, u32),
}

/// Decode the image at `path`; the format is taken from the content
/// rather than the extension.
pub fn open_image(path: &Path) -> anyhow::Result<DynamicImage> {
    let img = ImageReader::open(path)
        .with_context(|| format!("couldn't open image {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("couldn't read image {}", path.display()))?
        .decode()
        .with_context(|| format!("couldn't decode image {}", path.display()))?;
    Ok(img)
}

/// Stack the blue/red/green composite and the yellow channel into a single
/// RGBY image; yellow is carried in the fourth channel.
pub fn merge_channels(composite: &RgbImage, yellow: &GrayImage) -> Result<RgbaImage, AssembleError> {
    let (w, h) = composite.dimensions();
    let (yw, yh) = yellow.dimensions();
    if (w, h) != (yw, yh) {
        return Err(AssembleError::ChannelSizeMismatch(w, h, yw, yh));
    }
    Ok(RgbaImage::from_fn(w, h, |x, y| {
        let Rgb([r, g, b]) = *composite.get_pixel(x, y);
        let Luma([yl]) = *yellow.get_pixel(x, y);
        Rgba([r, g, b, yl])
    }))
}

/// The yellow stain intensity of a yellow channel image. The atlas stores
/// it coloured (red and green equal, no blue), so the intensity is the
/// larger of red and green; a grayscale file comes out unchanged.
pub fn yellow_intensity(yellow: &RgbImage) -> GrayImage {
    GrayImage::from_fn(yellow.width(), yellow.height(), |x, y| {
        let Rgb([r, g, _]) = *yellow.get_pixel(x, y);
        Luma([r.max(g)])
    })
}

pub fn read_hpa_image(composite_path: &Path, yellow_path: &Path) -> anyhow::Result<RgbaImage> {
    let composite = open_image(composite_path)?.to_rgb8();
    let yellow = yellow_intensity(&open_image(yellow_path)?.to_rgb8());
    Ok(merge_channels(&composite, &yellow)?)
}

/// An image and mask crop for one cell; the remaining fields of an
/// example are filled in by the caller.
#[derive(Clone, Debug)]
pub struct PartialExample {
    pub image: RgbaImage,
    pub mask: GrayImage,
    pub split: SplitName,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Region {
    colour: [u8; 3],
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl Region {
    fn new(colour: [u8; 3], x: u32, y: u32) -> Self {
        Self {
            colour,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    fn extend(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// Each distinct non-black colour of the mask is one cell. Regions are
/// returned in order of first appearance in row-major order.
fn find_regions(mask: &RgbImage) -> Vec<Region> {
    let mut index: HashMap<[u8; 3], usize, ahash::RandomState> = HashMap::default();
    let mut regions: Vec<Region> = Vec::new();
    for (x, y, p) in mask.enumerate_pixels() {
        let colour = p.0;
        if colour == [0, 0, 0] {
            continue;
        }
        match index.get(&colour) {
            Some(&i) => regions[i].extend(x, y),
            None => {
                index.insert(colour, regions.len());
                regions.push(Region::new(colour, x, y));
            }
        }
    }
    regions
}

/// A finite, non-restartable sequence of per-cell crops of one image.
/// Once exhausted it keeps returning `None`.
pub struct CellCrops {
    image: RgbaImage,
    mask: RgbImage,
    regions: Vec<Region>,
    next: usize,
    split: SplitName,
}

impl CellCrops {
    /// `mask` is resampled (nearest neighbour) to the size of `image` if
    /// the two differ.
    pub fn new(image: RgbaImage, mask: RgbImage, split: SplitName) -> Self {
        let mask = if mask.dimensions() != image.dimensions() {
            let (w, h) = image.dimensions();
            imageops::resize(&mask, w, h, FilterType::Nearest)
        } else {
            mask
        };
        let regions = find_regions(&mask);
        Self {
            image,
            mask,
            regions,
            next: 0,
            split,
        }
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }
}

impl Iterator for CellCrops {
    type Item = PartialExample;

    fn next(&mut self) -> Option<Self::Item> {
        let r = *self.regions.get(self.next)?;
        self.next += 1;

        let (w, h) = (r.width(), r.height());
        let image = imageops::crop_imm(&self.image, r.min_x, r.min_y, w, h).to_image();
        let mask = GrayImage::from_fn(w, h, |dx, dy| {
            if self.mask.get_pixel(r.min_x + dx, r.min_y + dy).0 == r.colour {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });
        Some(PartialExample {
            image,
            mask,
            split: self.split,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.regions.len().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for CellCrops {}
impl FusedIterator for CellCrops {}

/// Read the segmentation mask at `mask_path` and return the per-cell crops
/// of `image`. A mask without any cell yields nothing.
pub fn generate_examples_from_image(
    image: RgbaImage,
    mask_path: &Path,
    split: SplitName,
) -> anyhow::Result<CellCrops> {
    let mask = open_image(mask_path)?.to_rgb8();
    Ok(CellCrops::new(image, mask, split))
}
