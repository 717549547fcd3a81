//!  Parvaz Flight Crawler
//!
//!  Copyright (C) 2026  Mamy Ratsimbazafy
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! CLI validating every site-config document in a directory.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use parvaz_crawler::site_config::parse_site_config;

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "parvaz-validate-configs")]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Directory of site-config JSON documents
    #[arg(long, default_value = "configs")]
    dir: PathBuf,

    /// Verbose output
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let entries = match std::fs::read_dir(&args.dir) {
        Ok(entries) => entries,
        Err(error) => {
            eprintln!("error: cannot read {}: {error}", args.dir.display());
            return ExitCode::from(2);
        }
    };

    let mut checked = 0usize;
    let mut failures = 0usize;
    let mut seen_ids: Vec<String> = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        checked += 1;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) => {
                failures += 1;
                println!("❌ {}: unreadable: {error}", path.display());
                continue;
            }
        };
        match parse_site_config(&raw, &path.display().to_string()) {
            Ok(config) => {
                if seen_ids.contains(&config.site_id) {
                    failures += 1;
                    println!(
                        "❌ {}: duplicate site_id '{}'",
                        path.display(),
                        config.site_id
                    );
                    continue;
                }
                seen_ids.push(config.site_id.clone());
                println!(
                    "✅ {}: {} ({}, {}{})",
                    path.display(),
                    config.site_id,
                    config.crawler_type.as_str(),
                    config.host(),
                    if config.enabled { "" } else { ", disabled" }
                );
            }
            Err(error) => {
                failures += 1;
                println!("❌ {}", error);
            }
        }
    }

    println!(
        "\n{} documents checked, {} invalid",
        checked,
        failures
    );
    if failures > 0 || checked == 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
