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

//! CLI for running one crawl across the configured sites.

use std::cmp::max;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use parvaz_crawler::{
    ConfigStore, CoreRuntime, CrawlOptions, CrawlResult, CrawlStatus, Flight, PassengerCounts,
    Scheduler, SearchQuery,
};
use tokio_util::sync::CancellationToken;

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "parvaz-crawl")]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Origin airport code (e.g., THR, IKA)
    #[arg(short, long)]
    origin: String,

    /// Destination airport code (e.g., IST, DXB)
    #[arg(short, long)]
    destination: String,

    /// Departure date (YYYY-MM-DD or YYYY/MM/DD)
    #[arg(long)]
    date: String,

    /// Return date for round trips (YYYY-MM-DD or YYYY/MM/DD)
    #[arg(short = 'R', long)]
    return_date: Option<String>,

    /// Cabin class: economy, premium_economy, business, first
    #[arg(short, long, default_value = "economy")]
    cabin: String,

    /// Number of adult passengers
    #[arg(short, long, default_value = "1")]
    passengers: u32,

    /// Only crawl these sites (comma-separated site ids)
    #[arg(long)]
    sites: Option<String>,

    /// Also search ±N days around the departure date
    #[arg(long)]
    date_range: Option<u32>,

    /// Directory of site-config JSON documents
    #[arg(long, default_value = "configs")]
    config_dir: String,

    /// Print the result as JSON instead of a table
    #[arg(long, default_value = "false")]
    json: bool,

    /// Verbose output
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

/// Configure logging based on verbosity level
fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

/// Parse date string to NaiveDate
fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
        .context(format!(
            "Invalid date format: {}. Use YYYY-MM-DD or YYYY/MM/DD",
            s
        ))
}

/// Get terminal width for responsive tables
fn get_terminal_width() -> usize {
    term_size::dimensions().map(|(w, _)| w).unwrap_or(100)
}

fn dash_bar() -> String {
    "-".repeat(get_terminal_width().min(100))
}

/// Format duration in hours/minutes.
fn fmt_duration(minutes: u32) -> String {
    let hrs = minutes / 60;
    let mins = minutes % 60;
    if mins == 0 {
        format!("{}h", hrs)
    } else if hrs == 0 {
        format!("{}m", mins)
    } else {
        format!("{}h {:02}m", hrs, mins)
    }
}

fn fmt_times(flight: &Flight) -> String {
    format!(
        "{} → {}",
        flight.departure.format("%H:%M"),
        flight.arrival.format("%H:%M")
    )
}

/// Calculate terminal-aware column widths
fn calc_column_widths(flights: &[Flight]) -> (usize, usize, usize, usize) {
    let mut max_airline = 7;
    let mut max_times = 14;
    let mut max_duration = 8;

    for flight in flights.iter().take(10) {
        max_airline = max(max_airline, flight.airline_name.len());
        max_times = max(max_times, fmt_times(flight).len());
        max_duration = max(max_duration, fmt_duration(flight.duration_minutes).len());
    }

    let terminal_width = get_terminal_width();
    let available = terminal_width.saturating_sub(30);
    let total = max_airline + max_times + max_duration;
    if total > available && available > 40 {
        let ratio = available as f64 / total as f64;
        max_airline = max((max_airline as f64 * ratio).floor() as usize, 6);
        max_times = max((max_times as f64 * ratio).floor() as usize, 10);
        max_duration = max((max_duration as f64 * ratio).floor() as usize, 5);
    }

    (5, max_airline, max_times, max_duration)
}

/// Render results to stdout
fn render_results(result: &CrawlResult, origin: &str, destination: &str, date: &str) {
    println!(
        "================================================================================\n  🛫  {} → {} on {}  [{}]\n================================================================================\n",
        origin,
        destination,
        date,
        status_label(result.status)
    );

    if let Some(best) = result.flights.first() {
        println!("💰 Best Price:  {} {}", best.price, best.currency);
    }
    println!("📊 Total Flights: {}", result.flights.len());
    println!(
        "🌐 Sites: {} total, {} with results",
        result.sites.len(),
        result
            .sites
            .iter()
            .filter(|outcome| matches!(
                outcome.state,
                parvaz_crawler::SiteState::Completed { .. }
            ))
            .count()
    );
    for warning in &result.warnings {
        println!("⚠️  {}", warning);
    }

    if result.flights.is_empty() {
        return;
    }

    let (rank_width, airline_width, times_width, duration_width) =
        calc_column_widths(&result.flights);

    println!("\n🏆 Top {} Results:", 10.min(result.flights.len()));
    println!("{}\n", dash_bar());
    println!(
        "  {:>rank_width$}  {:<airline_width$}  {:<times_width$}  {:<duration_width$}  FLIGHT      PRICE",
        "#", "AIRLINE", "DEP → ARR", "DURATION"
    );
    println!("{}\n", dash_bar());

    for (i, flight) in result.flights.iter().take(10).enumerate() {
        let source = if flight.is_aggregated {
            format!(
                " (via {})",
                flight.booking_source.as_deref().unwrap_or("aggregator")
            )
        } else {
            String::new()
        };
        println!(
            "  {:>rank_width$}  {:<airline_width$}  {:<times_width$}  {:<duration_width$}  {:<10}  {} {}{}",
            i + 1,
            flight.airline_name,
            fmt_times(flight),
            fmt_duration(flight.duration_minutes),
            flight.flight_number,
            flight.price,
            flight.currency,
            source
        );
    }

    println!("\n{}", dash_bar());
    for outcome in &result.sites {
        match &outcome.state {
            parvaz_crawler::SiteState::Completed { count, latency_ms, .. } => {
                println!(
                    "  ✅ {:<24} {} flights in {}ms ({} rejects)",
                    outcome.site_id, count, latency_ms, outcome.validation_rejects
                );
            }
            parvaz_crawler::SiteState::Failed { kind, message } => {
                println!("  ❌ {:<24} {}: {}", outcome.site_id, kind, message);
            }
            parvaz_crawler::SiteState::Skipped { reason } => {
                println!("  ⏭️  {:<24} skipped ({})", outcome.site_id, reason);
            }
            parvaz_crawler::SiteState::Cancelled => {
                println!("  🚫 {:<24} cancelled", outcome.site_id);
            }
        }
    }
}

fn status_label(status: CrawlStatus) -> &'static str {
    match status {
        CrawlStatus::Complete => "complete",
        CrawlStatus::Partial => "partial",
        CrawlStatus::Failed => "failed",
        CrawlStatus::Cancelled => "cancelled",
    }
}

fn exit_code(status: CrawlStatus) -> ExitCode {
    match status {
        CrawlStatus::Complete => ExitCode::SUCCESS,
        CrawlStatus::Partial => ExitCode::from(3),
        CrawlStatus::Failed => ExitCode::from(4),
        CrawlStatus::Cancelled => ExitCode::from(130),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    setup_logging(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!("{error:?}");
            eprintln!("error: {error:#}");
            // Anything failing before the crawl starts is configuration.
            ExitCode::from(2)
        }
    }
}

async fn run(args: CliArgs) -> Result<ExitCode> {
    let depart_date = parse_date(&args.date)?;
    let return_date = args.return_date.as_deref().map(parse_date).transpose()?;

    let mut builder = SearchQuery::builder(
        args.origin.to_uppercase(),
        args.destination.to_uppercase(),
        depart_date,
    )
    .cabin(
        parvaz_crawler::CabinClass::from_str_name(&args.cabin)
            .context("Invalid cabin class. Use: economy, premium_economy, business, first")?,
    )
    .passengers(PassengerCounts {
        adults: args.passengers,
        children: 0,
        infants: 0,
    });
    if let Some(return_date) = return_date {
        builder = builder.return_date(return_date);
    }
    let query = builder
        .build(chrono::Utc::now().date_naive())
        .context("Invalid search parameters")?;

    let configs = ConfigStore::load_dir(&args.config_dir)
        .context("Failed to load site configurations")?;
    let runtime = Arc::new(CoreRuntime::with_defaults(configs));
    let scheduler = Scheduler::new(Arc::clone(&runtime));

    let site_filter: Option<Vec<String>> = args.sites.as_ref().map(|csv| {
        csv.split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    });

    let options = CrawlOptions {
        date_range_days: args.date_range,
        ..Default::default()
    };

    // Ctrl-C cancels the crawl; workers get the shutdown window to wind down.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling crawl");
            signal_cancel.cancel();
        }
    });

    tracing::info!(
        "Starting crawl {} -> {} on {}",
        query.origin,
        query.destination,
        query.departure_date
    );

    let result = scheduler
        .crawl(query, site_filter.as_deref(), &options, cancel)
        .await
        .context("Crawl failed to start")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        render_results(&result, &args.origin, &args.destination, &args.date);
    }

    Ok(exit_code(result.status))
}
