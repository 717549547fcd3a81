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

//! One-off liveness probe for a single site: exercises the rate limiter and
//! breaker, issues a trivial request, and reports timings.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use parvaz_crawler::{ConfigStore, CoreRuntime};
use tokio_util::sync::CancellationToken;

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "parvaz-probe")]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Site id to probe
    #[arg(long)]
    site: String,

    /// Directory of site-config JSON documents
    #[arg(long, default_value = "configs")]
    config_dir: String,

    /// Verbose output
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("probe failed: {error:#}");
            if error.to_string().contains("config") {
                ExitCode::from(2)
            } else {
                ExitCode::from(4)
            }
        }
    }
}

async fn run(args: CliArgs) -> Result<()> {
    let configs =
        ConfigStore::load_dir(&args.config_dir).context("config load failed (config error)")?;
    let Some(site) = configs.get(&args.site) else {
        bail!("config error: site '{}' is not configured", args.site);
    };

    let runtime = Arc::new(CoreRuntime::with_defaults(configs));
    let cancel = CancellationToken::new();

    let gate = runtime.hosts.gate(
        &site.host(),
        site.rate_limit.to_rate_spec(),
        site.breaker.to_breaker_spec(),
    );

    println!("🔎 Probing {} ({})", site.site_id, site.host());

    // Token acquisition timing straight through the shared gate.
    let token_start = std::time::Instant::now();
    gate.acquire_token(&cancel)
        .await
        .context("token acquisition cancelled")?;
    println!("  token acquired in {:?}", token_start.elapsed());
    println!("  breaker state: {}", gate.breaker_state());

    // Trivial request against the search host.
    let lease = runtime
        .sessions
        .http_lease(&site, &cancel)
        .await
        .context("session acquisition failed")?;
    let request_start = std::time::Instant::now();
    let response = lease
        .client()
        .get(&site.search_url)
        .send()
        .await
        .context("probe request failed")?;
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let elapsed = request_start.elapsed();

    gate.record_success(elapsed);
    println!(
        "  HTTP {} in {:?} ({} KB)",
        status,
        elapsed,
        body.len() / 1024
    );

    let snapshot = gate.snapshot();
    println!(
        "  host state: rate {:.2} rps, {} requests, {} failures, mean latency {:?}",
        snapshot.current_rate,
        snapshot.requests,
        snapshot.failures,
        snapshot.mean_latency
    );

    if !(200..500).contains(&status) {
        bail!("host answered HTTP {status}");
    }
    Ok(())
}
