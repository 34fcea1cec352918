//! zombie-build: headless batch build of the enriched complaint table.
//!
//! Usage:
//!   zombie-build --data-dir ./build --db build_log.db
//!   zombie-build --data-dir ./build --rebuild-registry --rebuild-financials

use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::path::{Path, PathBuf};
use zombie_core::{
    config::BuildConfig,
    pipeline::{BuildPipeline, BuildSummary, RebuildFlags},
    store::BuildStore,
};

fn cli() -> Command {
    Command::new("zombie-build")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Links consumer complaints to institutions and their quarterly attributes")
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Root that relative input, cache and output paths resolve against")
                .default_value("./build"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Build config (default: <data-dir>/config/build_config.json, else built-in defaults)"),
        )
        .arg(
            Arg::new("db")
                .long("db")
                .value_name("FILE")
                .help("SQLite build log")
                .default_value(":memory:"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Enriched complaint CSV (overrides the config)"),
        )
        .arg(
            Arg::new("rebuild-registry")
                .long("rebuild-registry")
                .action(ArgAction::SetTrue)
                .help("Ignore the cached institution registry"),
        )
        .arg(
            Arg::new("rebuild-financials")
                .long("rebuild-financials")
                .action(ArgAction::SetTrue)
                .help("Ignore the cached financial reports"),
        )
        .arg(
            Arg::new("rebuild-all")
                .long("rebuild-all")
                .action(ArgAction::SetTrue)
                .help("Ignore every cache"),
        )
}

fn load_config(data_dir: &str, explicit: Option<&String>) -> Result<BuildConfig> {
    if let Some(path) = explicit {
        return BuildConfig::load_from(Path::new(path));
    }
    let default_path = Path::new(data_dir).join("config").join("build_config.json");
    if default_path.exists() {
        BuildConfig::load(data_dir)
    } else {
        log::warn!("no {} found, using built-in defaults", default_path.display());
        Ok(BuildConfig::default())
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let matches = cli().get_matches();
    let data_dir = matches
        .get_one::<String>("data-dir")
        .map(String::as_str)
        .unwrap_or("./build");
    let db = matches.get_one::<String>("db").map(String::as_str).unwrap_or(":memory:");

    let mut config = load_config(data_dir, matches.get_one::<String>("config"))?;
    if let Some(output) = matches.get_one::<String>("output") {
        config.output_file = PathBuf::from(output);
    }

    let rebuild = if matches.get_flag("rebuild-all") {
        RebuildFlags::all()
    } else {
        RebuildFlags {
            registry: matches.get_flag("rebuild-registry"),
            financials: matches.get_flag("rebuild-financials"),
        }
    };

    println!("zombie-build");
    println!("  data_dir:  {data_dir}");
    println!("  db:        {db}");
    println!("  quarters:  {}..{}", config.grid_start, config.grid_end);
    println!("  rebuild:   registry={} financials={}", rebuild.registry, rebuild.financials);
    println!();

    let store = BuildStore::open(db)?;
    let mut pipeline = BuildPipeline::new(config, data_dir, store)?;
    let summary = pipeline.run(rebuild)?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &BuildSummary) {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:             {}", summary.run_id);
    println!("  complaints in:      {}", summary.rows_in);
    println!("  complaints out:     {}", summary.rows_out);
    println!("  registry rows:      {}", summary.registry_rows);
    println!("  with total assets:  {}", summary.with_total_assets);
    println!("  with real assets:   {}", summary.with_real_assets);
    println!("  regulated:          {}", summary.regulated);
    println!("  reconciled parents: {}", summary.reconciled_parents);
    println!("  build events:       {}", summary.events);
    if let Some(output) = &summary.output {
        println!("  output:             {}", output.display());
    }

    println!();
    println!("=== FINANCIAL MATCHES ===");
    for (kind, stats) in &summary.match_stats {
        println!(
            "  {:<16} attempted {:>8} | by id {:>7} | by name {:>6} | with assets {:>7}",
            kind.as_str(),
            stats.attempted,
            stats.matched_by_id,
            stats.matched_by_name,
            stats.with_assets
        );
    }

    println!();
    println!("=== CATEGORIES ===");
    for (category, count) in &summary.categories {
        println!("  {category:<22} {count}");
    }
}
