mod analyzer;
mod cleaner;
mod config;
mod db;
mod error;
mod fetch;
mod models;
mod parser;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};

use analyzer::{AnalysisResult, Analyzer};
use cleaner::Cleaner;
use config::Config;
use error::PipelineError;
use fetch::Fetcher;
use models::{FetchResult, SvoTuple};
use parser::SvoParser;

#[derive(Parser)]
#[command(name = "orchidmine", about = "Orchid care statement miner")]
struct Cli {
    /// Config JSON path (falls back to ./config.json, then built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path
    #[arg(long, global = true, default_value = db::DEFAULT_DB_PATH)]
    db: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch configured URLs and log the outcomes
    Fetch {
        /// Max URLs to fetch (default: all configured)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Fetch, extract, clean and analyze in one pipeline
    Run {
        /// Max URLs to fetch
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Where to write the analysis report JSON
        #[arg(long, default_value = "data/analysis.json")]
        report: PathBuf,
    },
    /// Re-run the analysis over records already in the database
    Analyze {
        /// Where to write the analysis report JSON
        #[arg(long, default_value = "data/analysis.json")]
        report: PathBuf,
    },
    /// Show pipeline statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Fetch { limit } => {
            if config.total_urls() == 0 {
                return Err(PipelineError::NoUrls.into());
            }
            let urls = limited_urls(&config, limit);
            println!(
                "Fetching {} URLs across {} categories...",
                urls.values().map(|v| v.len()).sum::<usize>(),
                urls.len()
            );
            let fetcher = Fetcher::from_config(&config)?;
            let (results, progress) = fetcher.fetch_all(&urls).await?;

            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            db::save_fetch_log(&conn, &results)?;

            println!(
                "Done: {} fetched ({} ok, {} failed).",
                progress.completed, progress.ok, progress.failed
            );
            if !progress.errors.is_empty() {
                println!("Sample failures:");
                for line in &progress.errors {
                    println!("  {}", line);
                }
            }
            Ok(())
        }
        Commands::Run { limit, report } => {
            if config.total_urls() == 0 {
                return Err(PipelineError::NoUrls.into());
            }
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;

            // Phase 1: fetch
            let t_fetch = Instant::now();
            let urls = limited_urls(&config, limit);
            println!(
                "Pipeline: fetching {} URLs...",
                urls.values().map(|v| v.len()).sum::<usize>()
            );
            let fetcher = Fetcher::from_config(&config)?;
            let (results, progress) = fetcher.fetch_all(&urls).await?;
            db::save_fetch_log(&conn, &results)?;
            println!(
                "Fetched {} URLs ({} ok, {} failed) in {:.1}s",
                progress.completed,
                progress.ok,
                progress.failed,
                t_fetch.elapsed().as_secs_f64()
            );

            // Phase 2: extract
            let t_extract = Instant::now();
            let parser = SvoParser::from_config(&config);
            let candidates = extract_candidates(&parser, &results);
            println!(
                "Extracted {} candidate statements in {:.1}s",
                candidates.len(),
                t_extract.elapsed().as_secs_f64()
            );

            // Phase 3: clean
            let t_clean = Instant::now();
            let cleaner = Cleaner::from_config(&config);
            let outcome = cleaner.clean(candidates);
            let new_rows = db::save_records(&conn, &outcome.records)?;
            db::save_rejects(&conn, &outcome.invalid)?;
            println!(
                "Cleaned: {} candidates -> {} valid, {} rejected, {} unique ({} new in DB) in {:.1}s",
                outcome.stats.total_input,
                outcome.stats.valid,
                outcome.stats.invalid,
                outcome.stats.final_count,
                new_rows,
                t_clean.elapsed().as_secs_f64()
            );

            if outcome.records.is_empty() {
                println!("No statements survived cleaning; skipping analysis.");
                return Ok(());
            }

            // Phase 4: analyze
            let t_analyze = Instant::now();
            let analyzer = Analyzer::from_config(&config);
            let analysis = analyzer.analyze(&outcome.records)?;
            db::save_analysis(&conn, &analysis)?;
            write_report(&report, &analysis)?;
            println!(
                "Analysis finished in {:.1}s",
                t_analyze.elapsed().as_secs_f64()
            );
            print_analysis(&analysis);
            Ok(())
        }
        Commands::Analyze { report } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let records = db::load_records(&conn)?;
            println!("Analyzing {} stored records...", records.len());

            let analyzer = Analyzer::from_config(&config);
            let analysis = analyzer.analyze(&records)?;
            db::save_analysis(&conn, &analysis)?;
            write_report(&report, &analysis)?;
            print_analysis(&analysis);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Fetched:         {}", s.fetched);
            println!("Fetch errors:    {}", s.fetch_errors);
            println!("Records:         {}", s.records);
            println!("Rejects:         {}", s.rejects);
            println!("Analysis runs:   {}", s.analysis_runs);
            println!("Mean confidence: {:.2}", s.mean_confidence);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Flatten the category map, honoring an overall URL cap while keeping
/// category order.
fn limited_urls(config: &Config, limit: Option<usize>) -> BTreeMap<String, Vec<String>> {
    match limit {
        None => config.urls.clone(),
        Some(n) => {
            let mut remaining = n;
            let mut map = BTreeMap::new();
            for (category, urls) in &config.urls {
                if remaining == 0 {
                    break;
                }
                let take: Vec<String> = urls.iter().take(remaining).cloned().collect();
                remaining -= take.len();
                if !take.is_empty() {
                    map.insert(category.clone(), take);
                }
            }
            map
        }
    }
}

fn extract_candidates(parser: &SvoParser, results: &[FetchResult]) -> Vec<SvoTuple> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pages: Vec<&FetchResult> = results.iter().filter(|r| r.success()).collect();
    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut candidates = Vec::new();
    for chunk in pages.chunks(500) {
        let extracted: Vec<Vec<SvoTuple>> = chunk.par_iter().map(|page| parser.parse(page)).collect();
        for list in extracted {
            candidates.extend(list);
        }
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();
    candidates
}

fn write_report(path: &Path, result: &AnalysisResult) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(result)?)?;
    println!("Report written to {}", path.display());
    Ok(())
}

fn print_analysis(result: &AnalysisResult) {
    println!(
        "\nAnalyzed {} records (mean confidence {:.2}, {:.0}% of analyses completed)",
        result.meta.entries,
        result.meta.mean_confidence,
        result.meta.completeness * 100.0
    );

    if let Some(freq) = &result.frequency {
        println!("\n--- Top subjects ---");
        for t in freq.top_subjects.iter().take(5) {
            println!(
                "  {:<28} {:>4}  ({:.0}%)",
                truncate(&t.value, 28),
                t.count,
                t.share * 100.0
            );
        }
        println!("\n--- Top objects ---");
        for t in freq.top_objects.iter().take(5) {
            println!(
                "  {:<28} {:>4}  ({:.0}%)",
                truncate(&t.value, 28),
                t.count,
                t.share * 100.0
            );
        }
    }

    if let Some(cats) = &result.categories {
        println!("\n--- Care categories ---");
        for c in &cats.categories {
            println!(
                "  {:<16} {:>4} records ({:.0}%, confidence {:.2})",
                c.name,
                c.count,
                c.share * 100.0,
                c.mean_confidence
            );
        }
    }

    if let Some(cl) = &result.clustering {
        println!("\n--- Themes ---");
        println!("  {} clusters, silhouette {:.2}", cl.k, cl.silhouette);
        for c in &cl.clusters {
            println!(
                "  #{}: {} records, terms: {}",
                c.id,
                c.size,
                truncate(&c.top_terms.join(", "), 60)
            );
        }
    }

    if !result.insights.is_empty() {
        println!("\n--- Insights ---");
        for line in &result.insights {
            println!("  - {}", line);
        }
    }

    if !result.recommendations.is_empty() {
        println!("\n--- Recommendations ---");
        for line in &result.recommendations {
            println!("  - {}", line);
        }
    }

    if !result.errors.is_empty() {
        println!("\n--- Skipped ---");
        for (name, reason) in &result.errors {
            println!("  {}: {}", name, reason);
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_urls(per_category: &[(&str, usize)]) -> Config {
        let mut config = Config::default();
        for (category, count) in per_category {
            let urls = (0..*count)
                .map(|i| format!("https://{category}.example/page-{i}"))
                .collect();
            config.urls.insert(category.to_string(), urls);
        }
        config
    }

    #[test]
    fn url_limit_spans_categories_in_order() {
        let config = config_with_urls(&[("care", 3), ("species", 3)]);
        let limited = limited_urls(&config, Some(4));
        assert_eq!(limited["care"].len(), 3);
        assert_eq!(limited["species"].len(), 1);

        let unlimited = limited_urls(&config, None);
        assert_eq!(unlimited.values().map(|v| v.len()).sum::<usize>(), 6);
    }

    #[test]
    fn zero_limit_yields_an_empty_map() {
        let config = config_with_urls(&[("care", 2)]);
        assert!(limited_urls(&config, Some(0)).is_empty());
    }

    #[test]
    fn truncate_handles_multibyte_text() {
        assert_eq!(truncate("phalaenopsis", 6), "phalae...");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn durations_format_by_magnitude() {
        use std::time::Duration;
        assert_eq!(format_duration(Duration::from_secs(42)), "42.0s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3700)), "1h 1m 40s");
    }

    #[test]
    fn fixture_pages_flow_through_extract_clean_and_analyze() {
        use chrono::Utc;

        let config = Config::default();
        let parser = SvoParser::from_config(&config);
        let cleaner = Cleaner::from_config(&config);

        let results: Vec<FetchResult> = ["phalaenopsis", "cattleya"]
            .iter()
            .map(|name| FetchResult {
                url: format!("https://orchids.example/{name}"),
                source_category: "care_guides".to_string(),
                http_status: Some(200),
                content: std::fs::read_to_string(format!("tests/fixtures/{name}.html")).unwrap(),
                error: None,
                fetched_at: Utc::now(),
                elapsed_ms: 40,
                retry_count: 0,
            })
            .collect();

        let candidates = extract_candidates(&parser, &results);
        assert!(candidates.len() >= 8);

        let outcome = cleaner.clean(candidates);
        assert!(!outcome.records.is_empty());

        // the statement both pages share survives exactly once
        let shared = outcome
            .records
            .iter()
            .filter(|r| r.subject == "orchids" && r.verb == "need" && r.object == "fresh water")
            .count();
        assert_eq!(shared, 1);

        let mut keys: Vec<String> = outcome.records.iter().map(|r| r.triple_key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), outcome.records.len());

        let analysis = Analyzer::from_config(&config)
            .analyze(&outcome.records)
            .unwrap();
        assert_eq!(analysis.meta.entries, outcome.records.len());
        assert!(analysis.frequency.is_some());
        assert!(analysis.categories.is_some());
    }
}
