/*
 * Copyright (c) 2023 Terence Wang.
 *
 * This file is part of hpa-subcell
 * (see https://github.com/exogeny/pods).
 *
 * License: MIT, see https://opensource.org/licenses/MIT
 */

pub mod assemble;
pub mod builder;
pub mod cmd_parse_utils;
pub mod config;
pub mod constants;
pub mod download;
pub mod example;
pub mod location;
pub mod manifest;
pub mod prog_opts;
pub mod utils;
pub mod writer;
