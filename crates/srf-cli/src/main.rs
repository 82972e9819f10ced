//! Subresource Filter CLI
//!
//! CLI tool for indexing filter lists, inspecting indexed rulesets and
//! populating a versioned ruleset store.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use url::Url;

use srf_core::ruleset::{IndexedRuleset, SectionId};
use srf_core::{ActivationTypes, ElementTypes, FirstPartyOrigin, IndexedRulesetMatcher};
use srf_indexer::{optimize_rules, parse_filter_list, ParseStats, RulesetIndexer};
use srf_service::{JsonFilePrefs, RulesetService, RulesetServiceConfig, UnindexedRulesetInfo};

#[derive(Parser)]
#[command(name = "srf-cli")]
#[command(about = "Subresource filter ruleset indexer and tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index filter lists into an indexed ruleset
    Index {
        /// Input filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output ruleset file
        #[arg(short, long, default_value = "ruleset.dat")]
        output: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Verify an indexed ruleset
    Verify {
        /// Ruleset file to verify
        #[arg(short, long)]
        input: String,
    },

    /// Dump ruleset info
    Info {
        /// Ruleset file to inspect
        #[arg(short, long)]
        input: String,
    },

    /// Evaluate one subresource load against a ruleset
    Match {
        /// Ruleset file
        #[arg(short, long)]
        ruleset: String,

        /// Subresource URL
        #[arg(short, long)]
        url: String,

        /// Document URLs, the requesting document first and the main frame last
        #[arg(short, long, required = true)]
        document: Vec<String>,

        /// Element type name (script, image, stylesheet, ...)
        #[arg(short = 't', long = "type", default_value = "other")]
        element_type: String,

        /// Skip rules without a domain restriction
        #[arg(long)]
        disable_generic: bool,
    },

    /// Index a filter list into a versioned store and persist it
    Store {
        /// Root of the versioned store
        #[arg(long)]
        base_dir: PathBuf,

        /// Unindexed filter list
        #[arg(short, long)]
        input: PathBuf,

        /// Content version of the filter list
        #[arg(long)]
        content_version: String,

        /// License file stored next to the ruleset
        #[arg(long)]
        license: Option<PathBuf>,

        /// Preference file (defaults to <base-dir>/prefs.json)
        #[arg(long)]
        prefs: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Index {
            input,
            output,
            verbose,
        } => cmd_index(&input, &output, verbose),
        Commands::Verify { input } => cmd_verify(&input),
        Commands::Info { input } => cmd_info(&input),
        Commands::Match {
            ruleset,
            url,
            document,
            element_type,
            disable_generic,
        } => cmd_match(&ruleset, &url, &document, &element_type, disable_generic),
        Commands::Store {
            base_dir,
            input,
            content_version,
            license,
            prefs,
        } => cmd_store(base_dir, input, content_version, license, prefs).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_index(inputs: &[String], output: &str, verbose: bool) -> Result<(), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    let mut all_rules = Vec::new();
    let mut totals = ParseStats::default();

    for path in inputs {
        let content = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        let list = parse_filter_list(&content);

        if verbose {
            println!(
                "  {} - {} lines, {} rules, {} unsupported",
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                list.stats.lines,
                list.rules.len(),
                list.stats.unsupported
            );
        }

        totals.lines += list.stats.lines;
        totals.comments += list.stats.comments;
        totals.cosmetic += list.stats.cosmetic;
        totals.unsupported += list.stats.unsupported;
        all_rules.extend(list.rules);
    }
    let parse_time = start.elapsed();

    let opt_start = Instant::now();
    let (rules, opt_stats) = optimize_rules(all_rules);
    let opt_time = opt_start.elapsed();

    let build_start = Instant::now();
    let mut indexer = RulesetIndexer::new();
    let rejected = rules.iter().filter(|rule| !indexer.add_url_rule(rule)).count();
    indexer.finish();
    let build_time = build_start.elapsed();

    IndexedRuleset::verify(indexer.data()).map_err(|e| format!("Indexed ruleset failed verification: {}", e))?;

    fs::write(output, indexer.data()).map_err(|e| format!("Failed to write '{}': {}", output, e))?;

    let total_time = start.elapsed();
    let size = indexer.size();

    println!("Indexed {} filter lists to '{}'", inputs.len(), output);
    println!(
        "  Lines:    {} ({} comments, {} cosmetic, {} unsupported)",
        totals.lines, totals.comments, totals.cosmetic, totals.unsupported
    );
    println!(
        "  Rules:    {} -> {} (dedupe removed {}, badfilter removed {})",
        opt_stats.before,
        opt_stats.after,
        opt_stats.deduped,
        opt_stats.badfilter_rules + opt_stats.badfiltered_rules
    );
    println!("  Indexed:  {} ({} rejected)", indexer.rule_count(), rejected);
    println!("  Size:     {} bytes ({:.1} KB)", size, size as f64 / 1024.0);
    println!(
        "  Time:     {:.1}ms (parse: {:.1}ms, opt: {:.1}ms, index: {:.1}ms)",
        total_time.as_secs_f64() * 1000.0,
        parse_time.as_secs_f64() * 1000.0,
        opt_time.as_secs_f64() * 1000.0,
        build_time.as_secs_f64() * 1000.0,
    );

    Ok(())
}

fn read_verified(input: &str) -> Result<Vec<u8>, String> {
    let bytes = fs::read(input).map_err(|e| format!("Failed to read '{}': {}", input, e))?;
    IndexedRuleset::verify(&bytes).map_err(|e| format!("Invalid ruleset: {}", e))?;
    Ok(bytes)
}

fn cmd_verify(input: &str) -> Result<(), String> {
    let bytes = read_verified(input)?;
    let ruleset = IndexedRuleset::new(&bytes).map_err(|e| format!("Invalid ruleset: {}", e))?;

    println!("Ruleset '{}' is valid", input);
    println!("  Version:     {}", ruleset.version);
    println!("  Rules:       {}", ruleset.rule_count);
    println!("  Size:        {} bytes", bytes.len());

    Ok(())
}

fn cmd_info(input: &str) -> Result<(), String> {
    let bytes = read_verified(input)?;
    let ruleset = IndexedRuleset::new(&bytes).map_err(|e| format!("Invalid ruleset: {}", e))?;

    println!("Ruleset: {}", input);
    println!("  Magic:       SRF1");
    println!("  Version:     {}", ruleset.version);
    println!("  Sections:    {}", ruleset.section_count());
    println!("  Total size:  {} bytes ({:.1} KB)", bytes.len(), bytes.len() as f64 / 1024.0);
    println!();

    println!("Sections:");
    for id in SectionId::ALL {
        if let Some(info) = ruleset.get_section_info(id) {
            println!("  {:<16} {:>8} bytes at {}", format!("{:?}", id), info.length, info.offset);
        }
    }
    println!();

    println!("Rules:");
    println!("  Count:       {}", ruleset.rules().count());
    println!("  Domains:     {}", ruleset.domain_pool().count());
    println!();

    println!("Indexes:");
    for (name, index) in [("Blacklist", ruleset.blacklist_index()), ("Whitelist", ruleset.whitelist_index())] {
        println!(
            "  {:<10} {} rules, {} n-grams (capacity {}), {} fallback",
            name,
            index.rule_count(),
            index.entry_count(),
            index.capacity(),
            index.fallback_count()
        );
    }

    Ok(())
}

fn cmd_match(
    ruleset_path: &str,
    url: &str,
    documents: &[String],
    element_type: &str,
    disable_generic: bool,
) -> Result<(), String> {
    let bytes = read_verified(ruleset_path)?;
    let matcher = IndexedRulesetMatcher::new(&bytes).map_err(|e| format!("Invalid ruleset: {}", e))?;

    let url = Url::parse(url).map_err(|e| format!("Invalid URL '{}': {}", url, e))?;
    let documents = documents
        .iter()
        .map(|d| Url::parse(d).map_err(|e| format!("Invalid document URL '{}': {}", d, e)))
        .collect::<Result<Vec<_>, _>>()?;
    let element_type = ElementTypes::from_name_or_other(element_type);

    let mut document_whitelisted = false;
    let mut generic_disabled = disable_generic;
    let mut parent_origin: Option<url::Origin> = None;
    println!("Documents:");
    for document in documents.iter().rev() {
        let whitelisted =
            matcher.should_disable_filtering_for_document(document, parent_origin.as_ref(), ActivationTypes::DOCUMENT);
        let genericblock = matcher.should_disable_filtering_for_document(
            document,
            parent_origin.as_ref(),
            ActivationTypes::GENERICBLOCK,
        );
        println!("  {} document={} genericblock={}", document, whitelisted, genericblock);
        document_whitelisted |= whitelisted;
        generic_disabled |= genericblock;
        parent_origin = Some(document.origin());
    }

    if document_whitelisted {
        println!("Load: allowed (document whitelisted)");
        return Ok(());
    }

    let origin = documents.first().map(Url::origin).ok_or("No document URL given")?;
    let mut first_party = FirstPartyOrigin::new(origin);
    let third_party = first_party.is_third_party(&url);

    match matcher.find_blocking_rule(&url, &mut first_party, element_type, generic_disabled) {
        Some(rule_id) => {
            let pattern = matcher
                .ruleset()
                .rules()
                .get(rule_id)
                .and_then(|rule| rule.pattern())
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default();
            println!(
                "Load: disallowed by rule {} \"{}\" ({:?}, third-party={})",
                rule_id, pattern, element_type, third_party
            );
        }
        None => println!("Load: allowed ({:?}, third-party={})", element_type, third_party),
    }

    Ok(())
}

async fn cmd_store(
    base_dir: PathBuf,
    input: PathBuf,
    content_version: String,
    license: Option<PathBuf>,
    prefs: Option<PathBuf>,
) -> Result<(), String> {
    let prefs_path = prefs.unwrap_or_else(|| base_dir.join("prefs.json"));
    log::debug!("Using preferences at {}", prefs_path.display());
    let prefs =
        JsonFilePrefs::open(&prefs_path).map_err(|e| format!("Failed to open '{}': {}", prefs_path.display(), e))?;

    let mut info = UnindexedRulesetInfo::new(content_version, input);
    info.license_path = license;

    let start = Instant::now();
    let service = RulesetService::start(RulesetServiceConfig::new(&base_dir), Box::new(prefs));
    service.notify_startup_completed();
    service.index_and_store_and_publish_ruleset_if_needed(info);
    service.flush().await.map_err(|e| e.to_string())?;

    let stats = service.stats().await.map_err(|e| e.to_string())?;
    if let Some((error, _)) = stats.indexing_failed.iter().next() {
        return Err(format!("Indexing failed: {}", error));
    }
    let active = service
        .active_version()
        .await
        .map_err(|e| e.to_string())?
        .ok_or("No ruleset version is active")?;

    println!("Stored ruleset in '{}'", base_dir.display());
    println!(
        "{}",
        serde_json::to_string_pretty(&active).map_err(|e| format!("Failed to encode version: {}", e))?
    );
    println!(
        "  Indexed: {}, skipped: {}, obsolete removed: {}, time: {:.1}ms",
        stats.indexing_succeeded,
        stats.skipped_already_indexed,
        stats.obsolete_removed,
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(())
}
