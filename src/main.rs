// Copyright 2023 Terence Wang. All rights reserved.
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file.

use anyhow::Context;
use clap::{arg, builder::PossibleValuesParser, crate_authors, crate_version, value_parser, Command};
use hpa_subcell::builder;
use hpa_subcell::cmd_parse_utils::{config_names, pathbuf_directory_exists_validator};
use hpa_subcell::config::{collection_info, default_configs, select_config, SplitName};
use hpa_subcell::prog_opts::BuildOpts;
use mimalloc::MiMalloc;
use num_format::{Locale, ToFormattedString};
use slog::{crit, info, o, warn, Drain};
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> anyhow::Result<()> {
    let version = crate_version!();
    let configs = default_configs();

    let info_app = Command::new("info")
        .about("Describe the dataset collection and its configurations")
        .version(version)
        .author(crate_authors!())
        .arg(
            arg!(-m --"manifest-dir" <MANIFESTDIR> "directory holding the <cell line>_images.csv manifests")
                .required(true)
                .value_parser(pathbuf_directory_exists_validator),
        );

    let build_app = Command::new("build")
        .about("Download, crop and label the images of one configuration")
        .version(version)
        .author(crate_authors!())
        .arg(
            arg!(-c --config <CONFIG> "the configuration (cell line) to build")
                .required(true)
                .value_parser(PossibleValuesParser::new(config_names(&configs))),
        )
        .arg(
            arg!(-m --"manifest-dir" <MANIFESTDIR> "directory holding the <cell line>_images.csv manifests")
                .required(true)
                .value_parser(pathbuf_directory_exists_validator),
        )
        .arg(
            arg!(-o --"data-dir" <DATADIR> "directory where the generated dataset is written")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(-d --"download-dir" <DOWNLOADDIR> "directory where downloads are cached; defaults to <DATADIR>/downloads")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(-s --split <SPLIT> "only build this split (may be repeated)")
                .action(clap::ArgAction::Append)
                .value_parser(value_parser!(SplitName)),
        );

    let opts = Command::new("hpa-subcell")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .version(version)
        .author(crate_authors!())
        .about("Build per-cell subcellular localization datasets from the Human Protein Atlas")
        .subcommand(info_app)
        .subcommand(build_app)
        .get_matches();

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator)
        .use_custom_timestamp(|out: &mut dyn std::io::Write| {
            write!(out, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
        })
        .build()
        .fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    let log = slog::Logger::root(drain, o!());

    // the full command line, recorded alongside the output
    let cmdline = std::env::args().collect::<Vec<String>>().join(" ");

    if let Some(t) = opts.subcommand_matches("info") {
        let manifest_dir: &PathBuf = t.get_one("manifest-dir").expect("no manifest directory specified");
        let collection = collection_info(manifest_dir)?;
        info!(log, "{}", collection.description);
        for (v, datasets) in &collection.datasets {
            info!(log, "version {}: {} datasets", v, datasets.len());
            for (name, desc) in datasets {
                info!(log, "  {} ({})", name, desc);
            }
        }
        for c in &configs {
            info!(
                log,
                "configuration {} v{}: splits [{}]",
                c.name,
                c.version,
                c.splits
                    .iter()
                    .map(|s| format!("{}:{}", s.name, s.cell_line))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&collection).context("could not format json.")?
        );
    }

    if let Some(t) = opts.subcommand_matches("build") {
        let config_name: &String = t.get_one("config").expect("no configuration specified");
        let config = match select_config(&configs, config_name) {
            Ok(c) => c,
            Err(e) => {
                crit!(log, "{}", e);
                std::process::exit(1);
            }
        };
        let manifest_dir: &PathBuf = t.get_one("manifest-dir").expect("no manifest directory specified");
        let data_dir: &PathBuf = t.get_one("data-dir").expect("no data directory specified");
        let download_dir = t
            .get_one::<PathBuf>("download-dir")
            .cloned()
            .unwrap_or_else(|| data_dir.join("downloads"));
        let only_splits: Option<Vec<SplitName>> = t
            .get_many::<SplitName>("split")
            .map(|v| v.copied().collect());

        let build_opts = BuildOpts::builder()
            .config(config)
            .manifest_dir(manifest_dir.clone())
            .data_dir(data_dir.clone())
            .download_dir(download_dir)
            .only_splits(only_splits)
            .cmdline(&cmdline)
            .version(version)
            .log(&log)
            .build();

        match builder::build(&build_opts) {
            Ok(summary) => {
                let total: usize = summary.splits.values().map(|s| s.examples).sum();
                if total == 0 {
                    warn!(log, "generated 0 examples; please check the input.");
                } else {
                    info!(
                        log,
                        "wrote {} examples to {}",
                        total.to_formatted_string(&Locale::en),
                        build_opts.output_dir().display()
                    );
                }
            }
            Err(e) => {
                crit!(log, "could not build {}: {:#}", config.name, e);
                return Err(e);
            }
        }
    }
    Ok(())
}
