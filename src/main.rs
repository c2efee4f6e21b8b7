use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use realty_feed::db::{self, Marketplace};
use realty_feed::mapping::category;
use realty_feed::mapping::registry::{Registry, Section};
use realty_feed::mapping::urls::BaseUrl;
use realty_feed::mapping::{Entry, FeedBuilder, FeedResult};
use realty_feed::record::{self, Decoded};
use realty_feed::settings::Settings;

#[derive(Parser)]
#[command(name = "realty-feed", about = "Registry-driven real-estate listing feed builder")]
struct Cli {
    /// Registry YAML (default: settings, then the embedded registry)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Source {
    /// JSON file holding an array of listings
    #[arg(long, conflicts_with = "db")]
    input: Option<PathBuf>,
    /// SQLite database (default: settings db_path)
    #[arg(long)]
    db: Option<PathBuf>,
    /// Marketplace export flag used to select database rows
    #[arg(long, value_enum, default_value_t = Marketplace::Cian)]
    feed: Marketplace,
    /// Site root for relative photo references
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the XML feed
    Build {
        #[command(flatten)]
        source: Source,
        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List filled fields the feed does not carry
    Audit {
        #[command(flatten)]
        source: Source,
        /// Exit non-zero when any record has uncovered fields
        #[arg(long)]
        strict: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List records missing marketplace essentials
    Check {
        #[command(flatten)]
        source: Source,
    },
    /// Print every field -> path mapping by section
    Matrix,
    /// Resolve a category code
    Category {
        category: String,
        operation: String,
        subtype: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;

    let owned;
    let registry = match cli.registry.as_ref().or(settings.registry_path.as_ref()) {
        Some(path) => {
            owned = Registry::from_path(path)?;
            &owned
        }
        None => Registry::builtin()?,
    };

    let result = match cli.command {
        Commands::Build { source, out } => {
            let feed = build(registry, &settings, &source)?;
            let xml = feed.to_xml().context("serializing feed")?;
            match out {
                Some(path) => fs::write(&path, xml)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{xml}"),
            }
            info!(
                built = feed.built().count(),
                skipped = feed.skipped(),
                "feed written"
            );
            Ok(())
        }
        Commands::Audit {
            source,
            strict,
            json,
        } => {
            let feed = build(registry, &settings, &source)?;
            let uncovered: Vec<(&str, Vec<&str>)> = feed
                .built()
                .filter_map(|r| {
                    let fields = &r.uncovered;
                    (!fields.is_empty())
                        .then(|| (r.external_id.as_str(), fields.iter().map(|f| f.name()).collect()))
                })
                .collect();

            if json {
                let records: Vec<_> = uncovered
                    .iter()
                    .map(|(id, fields)| serde_json::json!({ "external_id": id, "uncovered": fields }))
                    .collect();
                let report = serde_json::json!({
                    "generated_at": chrono::Utc::now().to_rfc3339(),
                    "built": feed.built().count(),
                    "skipped": feed.skipped(),
                    "records": records,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for (id, fields) in &uncovered {
                    println!("{:<24} | {}", truncate(id, 24), fields.join(", "));
                }
                for entry in &feed.entries {
                    if let Entry::Skipped { external_id, error } = entry {
                        println!("{:<24} | skipped: {}", truncate(external_id, 24), error);
                    }
                }
                println!(
                    "\n{} of {} records have uncovered fields ({} skipped)",
                    uncovered.len(),
                    feed.built().count(),
                    feed.skipped()
                );
            }

            if strict && !uncovered.is_empty() {
                bail!("{} records have uncovered fields", uncovered.len());
            }
            Ok(())
        }
        Commands::Check { source } => {
            let feed = build(registry, &settings, &source)?;
            let mut incomplete = 0;
            for result in feed.built() {
                let missing = result.missing();
                if missing.is_empty() {
                    continue;
                }
                incomplete += 1;
                let labels: Vec<_> = missing.iter().map(|r| r.label()).collect();
                println!("{:<24} | {}", truncate(&result.external_id, 24), labels.join(", "));
            }
            println!(
                "\n{} of {} records are missing essentials",
                incomplete,
                feed.built().count()
            );
            Ok(())
        }
        Commands::Matrix => {
            print_section("common", registry.common());
            print_section("deal_terms", registry.deal_terms());
            for code in registry.category_codes() {
                if let Some(section) = registry.category(code) {
                    print_section(code, section);
                }
            }

            println!("--- Fallbacks ---");
            for (field, fallback) in registry.fallbacks() {
                println!("  {:<28} <- {}", field.name(), fallback.name());
            }
            println!("\n--- Defaults ---");
            for (field, value) in registry.defaults() {
                println!("  {:<28} = {}", field.name(), value.as_text());
            }
            println!("\n--- Conversions ---");
            for (field, conv) in registry.conversions() {
                println!(
                    "  {:<28} {} -> {} (/ 10^{}, unit in {})",
                    field.name(),
                    conv.from,
                    conv.to,
                    conv.power,
                    conv.unit_field.name()
                );
            }
            let stop: Vec<_> = registry.stop_fields().iter().map(|f| f.name()).collect();
            println!("\n--- Stop fields ---\n  {}", stop.join(", "));
            Ok(())
        }
        Commands::Category {
            category,
            operation,
            subtype,
        } => {
            let code = category::resolve(
                &category,
                &operation,
                subtype.as_deref().unwrap_or(""),
                registry.default_category(),
            );
            if registry.has_category(&code) {
                println!("{code}");
            } else {
                println!("{code} (no category table, records are excluded)");
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn load_records(source: &Source, settings: &Settings) -> anyhow::Result<Vec<Decoded>> {
    if let Some(path) = &source.input {
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        return record::decode_listings(&json)
            .with_context(|| format!("decoding listings in {}", path.display()));
    }

    let path = source.db.as_deref().unwrap_or(&settings.db_path);
    let conn = db::open(path).with_context(|| format!("opening {}", path.display()))?;
    let records = db::fetch_records(&conn, source.feed)?;
    info!(count = records.len(), marketplace = ?source.feed, "records loaded");
    Ok(records)
}

fn build(registry: &Registry, settings: &Settings, source: &Source) -> anyhow::Result<FeedResult> {
    let records = load_records(source, settings)?;
    let base = source
        .base_url
        .as_deref()
        .or(settings.public_base_url.as_deref());
    let resolver = BaseUrl::new(base);
    let builder = FeedBuilder::new(registry, &resolver).parallel_threshold(settings.parallel_threshold);

    let pb = ProgressBar::new(records.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut entries = Vec::with_capacity(records.len());
    for chunk in records.chunks(500) {
        entries.extend(builder.build_decoded(chunk));
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();

    let feed = FeedResult::from_entries(registry.feed_version(), entries);
    info!(
        records = records.len(),
        built = feed.built().count(),
        skipped = feed.skipped(),
        "feed assembled"
    );
    Ok(feed)
}

fn print_section(name: &str, section: &Section) {
    println!("[{name}]");
    for rule in &section.fields {
        for target in &rule.targets {
            match target.requires {
                Some(req) => println!(
                    "  {:<28} -> {} (requires {})",
                    rule.field.name(),
                    target.path,
                    req.name()
                ),
                None => println!("  {:<28} -> {}", rule.field.name(), target.path),
            }
        }
    }
    for flag in &section.flags {
        println!("  {:<28} -> {} (flag)", flag.field.name(), flag.tag);
    }
    println!();
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
