//! CLI definition and command dispatch for `bpr`.
//!
//! ## Configuration Precedence
//!
//! 1. CLI flags (`--k`, `--oversample`, `--no-rerank`, `--concurrency`, `--empty-qrels`, `--event-key`)
//! 2. Environment variables (`BPR_CONFIG`, `BPR_VERBOSE`, `BPR_COLOR`)
//! 3. Config file (`~/.bpr/config.yaml` or the `--config` path)
//! 4. Built-in defaults
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | Runtime failure (I/O, dataset, retrieval, embedding) |
//! | 2 | Invalid configuration or arguments |
//! | 130 | Evaluation cancelled with Ctrl-C (the partial report is still written) |

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use clap::{Parser, Subcommand};
use tracing::warn;

use crate::ui::{format, table, ColorMode, MessageType, Progress, ProgressMode, Style};

use bpr_core::{
    build_qrels, parse_constraints, BprConfig, BprEngine, BprError, ConfigOverrides,
    write_metric_records, EmptyQrelPolicy, QueryReport, RunCheckpoint, DEFAULT_MIN_REL,
};

// ============================================================================
// CLI Definition
// ============================================================================

/// Version string including git commit hash
const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

/// Set by the Ctrl-C handler; running evaluations stop starting new queries.
static CANCEL_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Finished queries of the running evaluation, written if the user aborts.
static CHECKPOINT: RunCheckpoint = RunCheckpoint::new();

/// Bikepacking retrieval – rider search, reranking and retrieval evaluation
#[derive(Parser, Debug)]
#[command(name = "bpr")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, env = "BPR_VERBOSE")]
    pub verbose: bool,

    /// Suppress progress and informational messages
    #[arg(short, long, global = true, env = "BPR_QUIET")]
    pub quiet: bool,

    /// Path to configuration file (default: ~/.bpr/config.yaml)
    #[arg(long, global = true, env = "BPR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Color output mode: always, never, or auto
    #[arg(long, global = true, env = "BPR_COLOR", default_value = "auto")]
    pub color: String,

    /// Override retrieval.k
    #[arg(long, global = true)]
    pub k: Option<usize>,

    /// Override retrieval.oversampleFactor
    #[arg(long, global = true)]
    pub oversample: Option<usize>,

    /// Disable reranking (baseline dense ranking only)
    #[arg(long, global = true)]
    pub no_rerank: bool,

    /// Override eval.maxConcurrency
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Override eval.emptyQrelPolicy: exclude or count-as-zero
    #[arg(long, global = true, value_name = "POLICY")]
    pub empty_qrels: Option<String>,

    /// Restrict retrieval to one event key
    #[arg(long, global = true)]
    pub event_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest chunk rows into the configured index
    #[command(after_help = r#"EXAMPLES:
    # Each line: {"rider_id": "r-17", "chunk_index": 0, "text": "...", "event_key": "tdr-2024"}
    bpr index data/chunks.jsonl

    # Use a specific config (e.g. a Qdrant collection)
    bpr --config qdrant.yaml index data/chunks.jsonl
"#)]
    Index {
        /// Chunk JSONL file
        chunks: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Rank riders for a natural-language query
    #[command(after_help = r#"EXAMPLES:
    bpr search "mechanical shifting, rigid fork, 45-50mm tyres"

    # Top 3, plain dense ranking
    bpr --k 3 --no-rerank search "dynamo lights and a garmin"

    # Show which signals fired
    bpr search "tubeless for puncture protection" --debug
"#)]
    Search {
        /// Query text
        query: String,

        /// Show per-rider signal contributions
        #[arg(long)]
        debug: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Evaluate retrieval and reranking against relevance judgments
    #[command(after_help = r#"EXAMPLES:
    bpr eval --queries data/queries.jsonl --qrels data/qrels.jsonl

    # Baseline only, count empty judgments as zero
    bpr --no-rerank --empty-qrels count-as-zero eval --queries q.jsonl --qrels qrels.jsonl

    # Write the report elsewhere and print the summary as JSON
    bpr eval --queries q.jsonl --qrels qrels.jsonl --out-dir /tmp/reports --json

    # Also write one metric record per scored query
    bpr eval --queries q.jsonl --qrels qrels.jsonl --metrics metrics.jsonl
"#)]
    Eval {
        /// Query JSONL file
        #[arg(long)]
        queries: PathBuf,

        /// Qrels JSONL file; without it every query is unlabeled
        #[arg(long)]
        qrels: Option<PathBuf>,

        /// Report directory (default: eval.reportDir)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Also write per-query metric records (JSONL) to this file
        #[arg(long, value_name = "PATH")]
        metrics: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Convert graded labels into a qrels file
    #[command(name = "build-qrels", after_help = r#"EXAMPLES:
    # labels rows: {"qid": "q1", "relevants": [{"rider_id": "r-17", "rel": 2}]}
    bpr build-qrels data/labels.jsonl --out data/qrels.jsonl

    # Keep only strongly relevant riders
    bpr build-qrels data/labels.jsonl --out data/qrels_strict.jsonl --min-rel 2
"#)]
    BuildQrels {
        /// Labels file (JSONL, pretty-printed objects allowed)
        labels: PathBuf,

        /// Output qrels file
        #[arg(long)]
        out: PathBuf,

        /// Minimum grade counted as relevant
        #[arg(long, default_value_t = DEFAULT_MIN_REL)]
        min_rel: i64,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the constraints derived from a query
    Constraints {
        /// Query text
        query: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration and list warnings
    Check {
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration (file, defaults and flags)
    Show {
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// Entry point
// ============================================================================

/// Install the tracing subscriber on stderr.
///
/// `LOG_LEVEL` overrides the level chosen by `--verbose`.
fn init_tracing(verbose: bool) {
    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| if verbose { "debug" } else { "warn" }.to_string());
    let filter = format!("bpr_core={0},bpr_db={0},bpr_cli={0}", log_level);

    tracing_subscriber::fmt()
        .with_env_filter(&filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_status(err: &BprError) -> u8 {
    match err {
        BprError::InvalidConfiguration { .. } | BprError::InvalidArgument(_) => 2,
        BprError::Cancelled => 130,
        _ => 1,
    }
}

fn report_error(style: &Style, err: &BprError) {
    let text = match err {
        BprError::InvalidConfiguration { message, hint } => {
            style.error_with_context("Invalid configuration", Some(message.as_str()), Some(hint.as_str()))
        }
        other => style.message(MessageType::Err, &other.to_string()),
    };
    eprintln!("{}", text);
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let color_mode = ColorMode::parse(&cli.color).unwrap_or_default();
    let style = Style::new(color_mode);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            report_error(&style, &e);
            return ExitCode::from(exit_status(&e));
        }
    };

    let result = match cli.command {
        Command::Index { ref chunks, json } => handle_index(&style, &cli, config, chunks, json),
        Command::Search {
            ref query,
            debug,
            json,
        } => handle_search(&style, config, query, debug, json),
        Command::Eval {
            ref queries,
            ref qrels,
            ref out_dir,
            ref metrics,
            json,
        } => handle_eval(
            &style,
            &cli,
            config,
            EvalPaths {
                queries,
                qrels: qrels.as_deref(),
                out_dir: out_dir.as_deref(),
                metrics: metrics.as_deref(),
            },
            json,
        ),
        Command::BuildQrels {
            ref labels,
            ref out,
            min_rel,
            json,
        } => handle_build_qrels(&style, labels, out, min_rel, json),
        Command::Constraints { ref query, json } => handle_constraints(&style, query, json),
        Command::Config { ref action } => handle_config(&style, &cli, &config, action),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&style, &e);
            ExitCode::from(exit_status(&e))
        }
    }
}

/// Load the file configuration and apply flag overrides.
fn load_config(cli: &Cli) -> Result<BprConfig, BprError> {
    let mut config = match &cli.config {
        Some(path) => BprConfig::from_path(path)?,
        None => BprConfig::load_default()?,
    };

    let empty_qrel_policy = cli
        .empty_qrels
        .as_deref()
        .map(str::parse::<EmptyQrelPolicy>)
        .transpose()?;

    let overrides = ConfigOverrides {
        k: cli.k,
        oversample_factor: cli.oversample,
        no_rerank: cli.no_rerank,
        max_concurrency: cli.concurrency,
        empty_qrel_policy,
        event_key: cli.event_key.clone(),
    };

    for warning in config.apply_overrides(&overrides)? {
        warn!("Config warning: {}", warning);
    }
    Ok(config)
}

fn config_source(cli: &Cli) -> Option<PathBuf> {
    cli.config.clone().or_else(BprConfig::default_path)
}

// ============================================================================
// Command handlers
// ============================================================================

fn handle_index(
    style: &Style,
    cli: &Cli,
    config: BprConfig,
    chunks: &std::path::Path,
    json: bool,
) -> Result<(), BprError> {
    let mode = ProgressMode::detect(cli.quiet, json);
    let index_desc = format!("{} ({})", config.index.backend, config.index.path.display());
    let engine = BprEngine::open_for_ingest(config)?;

    let progress = Progress::spinner(&format!("Indexing {}", chunks.display()), mode);
    let summary = engine.ingest(chunks);
    progress.finish_clear();
    let summary = summary?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{}",
        style.message(
            MessageType::Ok,
            &format!(
                "Indexed {} chunks for {} riders",
                format::format_thousands(summary.upserted as u64),
                format::format_thousands(summary.riders as u64)
            )
        )
    );
    println!("{}", style.message_detail("Embedded", &summary.embedded.to_string()));
    println!("{}", style.message_detail("Index", &index_desc));
    println!(
        "{}",
        style.message_detail("Points", &format::format_thousands(summary.index_len as u64))
    );
    Ok(())
}

fn handle_search(
    style: &Style,
    config: BprConfig,
    query: &str,
    debug: bool,
    json: bool,
) -> Result<(), BprError> {
    let engine = BprEngine::open(config)?;
    let result = engine.search(query, None)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", style.section("QUERY"));
    println!();
    println!("  {}", style.key_value("Query", query));
    println!("  {}", style.key_value("Retriever", &result.retriever));
    println!(
        "  {}",
        style.key_value(
            "Candidates",
            &format!(
                "{} chunks -> {} riders (oversample x{})",
                result.info.dedupe_in, result.info.dedupe_out, result.info.oversample
            )
        )
    );
    println!("  {}", style.key_value("Rerank", &style.flag(result.info.applied_rerank)));
    println!(
        "  {}",
        style.key_value("Latency", &format::format_ms(result.retrieval_latency_ms))
    );

    let active = active_constraints(&serde_json::to_value(&result.constraints)?);
    if !active.is_empty() {
        println!("  {}", style.key_value("Constraints", &active.join(", ")));
    }
    println!();

    if result.hits.is_empty() {
        println!("{}", style.message(MessageType::Info, "No riders found."));
        if result.info.dedupe_in == 0 {
            println!(
                "{}",
                style.message(
                    MessageType::Hint,
                    "The index returned no chunks; check retrieval.eventKey or run `bpr index`"
                )
            );
        }
        return Ok(());
    }

    println!("{}", style.section("RESULTS"));
    println!();
    let text_width = crate::ui::color::terminal_width().saturating_sub(48).max(20);
    println!("{}", table::render_hits_table(&result.hits, text_width));

    if debug {
        if let Some(records) = &result.info.rerank_debug_topk {
            println!();
            println!("{}", style.section("SIGNALS"));
            println!();
            println!("{}", table::render_signals_table(records));
        }
    }
    Ok(())
}

/// `name=value` for every constraint that is set.
fn active_constraints(value: &serde_json::Value) -> Vec<String> {
    let Some(fields) = value.as_object() else {
        return Vec::new();
    };
    fields
        .iter()
        .filter_map(|(name, v)| match v {
            serde_json::Value::Bool(true) => Some(name.clone()),
            serde_json::Value::Bool(false) | serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(format!("{}={}", name, s)),
            other => Some(format!("{}={}", name, other)),
        })
        .collect()
}

fn install_cancel_handler(announce: bool) {
    let result = ctrlc::set_handler(move || {
        if CANCEL_REQUESTED.swap(true, Ordering::SeqCst) {
            match CHECKPOINT.write() {
                Ok(Some(path)) => eprintln!("\nAborted. Partial report: {}", path.display()),
                Ok(None) => eprintln!("\nAborted."),
                Err(e) => eprintln!("\nAborted. Could not save partial report: {}", e),
            }
            std::process::exit(130);
        }
        if announce {
            eprintln!("\nCancelling: running queries will finish (press Ctrl-C again to abort)");
        }
    });
    if let Err(e) = result {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }
}

/// File arguments of `bpr eval`.
struct EvalPaths<'a> {
    queries: &'a Path,
    qrels: Option<&'a Path>,
    out_dir: Option<&'a Path>,
    metrics: Option<&'a Path>,
}

fn handle_eval(
    style: &Style,
    cli: &Cli,
    config: BprConfig,
    paths: EvalPaths<'_>,
    json: bool,
) -> Result<(), BprError> {
    let mode = ProgressMode::detect(cli.quiet, json);
    let engine = BprEngine::open(config)?;
    install_cancel_handler(!json);

    let progress = Progress::spinner("Evaluating queries", mode);
    let done = AtomicUsize::new(0);
    let on_query = |report: &QueryReport| {
        let n = done.fetch_add(1, Ordering::SeqCst) + 1;
        progress.set_message(&format!("Evaluated {} queries (last: {})", n, report.qid));
    };

    let outcome = engine.evaluate_files(
        paths.queries,
        paths.qrels,
        paths.out_dir,
        &CANCEL_REQUESTED,
        Some(&on_query),
        Some(&CHECKPOINT),
    );
    progress.finish_clear();
    let outcome = outcome?;
    let report = &outcome.report;
    let summary = &report.summary;

    let metric_records = match paths.metrics {
        Some(path) => Some((write_metric_records(report, path)?, path)),
        None => None,
    };

    if json {
        let output = serde_json::json!({
            "reportPath": outcome.path,
            "runId": report.run_id,
            "retriever": report.retriever,
            "applyRerank": report.apply_rerank,
            "nQueries": report.n_queries,
            "nLabeled": report.n_labeled,
            "metricsPath": metric_records.map(|(_, path)| path),
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", style.section("SUMMARY"));
        println!();
        println!("  {}", style.key_value("Retriever", &report.retriever));
        println!("  {}", style.key_value("Embedding", &report.embedding_model));
        println!("  {}", style.key_value("Rerank", &style.flag(report.apply_rerank)));
        println!(
            "  {}",
            style.key_value(
                "Queries",
                &format!("{} ({} labeled)", report.n_queries, report.n_labeled)
            )
        );
        println!();

        let metrics = [
            ("hitrate@k", format::format_metric(Some(summary.hitrate_at_k))),
            ("recall@k", format::format_metric(Some(summary.set_recall_at_k))),
            ("precision@k", format::format_metric(Some(summary.precision_at_k))),
            ("mrr@k", format::format_metric(Some(summary.mrr_at_k))),
            ("retrieval latency", format::format_ms(summary.avg_latency_ms_retrieval)),
            ("rerank latency", format::format_ms(summary.avg_latency_ms_rerank)),
            ("total latency", format::format_ms(summary.avg_latency_ms_total)),
            ("fallbacks", summary.n_fallback.to_string()),
            ("rerank regressed", summary.n_rerank_regressed.to_string()),
            ("unscorable", summary.n_unscorable.to_string()),
            ("failed", summary.n_failed.to_string()),
        ];
        println!("{}", table::render_metrics_table(&metrics));

        if !summary.worst_queries_by_mrr.is_empty() {
            println!();
            println!("{}", style.section("WORST QUERIES"));
            println!();
            let width = crate::ui::color::terminal_width().saturating_sub(50).max(20);
            println!("{}", table::render_worst_table(&summary.worst_queries_by_mrr, width));
        }

        println!();
        if summary.n_failed > 0 {
            println!(
                "{}",
                style.message(
                    MessageType::Warn,
                    &format!("{} queries failed retrieval; see the report", summary.n_failed)
                )
            );
        }
        if let Some((count, path)) = metric_records {
            println!(
                "{}",
                style.message(
                    MessageType::Ok,
                    &format!("Saved {} metric records: {}", count, path.display())
                )
            );
        }
        println!(
            "{}",
            style.message(
                MessageType::Ok,
                &format!("Saved report: {}", outcome.path.display())
            )
        );
    }

    if summary.cancelled {
        if !json {
            println!(
                "{}",
                style.message(
                    MessageType::Warn,
                    &format!("Run cancelled; {} queries skipped", summary.n_skipped)
                )
            );
        }
        return Err(BprError::Cancelled);
    }
    Ok(())
}

fn handle_build_qrels(
    style: &Style,
    labels: &std::path::Path,
    out: &std::path::Path,
    min_rel: i64,
    json: bool,
) -> Result<(), BprError> {
    let summary = build_qrels(labels, out, min_rel)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{}",
        style.message(
            MessageType::Ok,
            &format!("Wrote {} qrels to {}", summary.rows, summary.out_path.display())
        )
    );
    println!("{}", style.message_detail("min_rel", &summary.min_rel.to_string()));
    if summary.empty_rows > 0 {
        println!(
            "{}",
            style.message(
                MessageType::Warn,
                &format!("{} queries have no relevant rider at this grade", summary.empty_rows)
            )
        );
    }
    Ok(())
}

fn handle_constraints(style: &Style, query: &str, json: bool) -> Result<(), BprError> {
    let constraints = parse_constraints(query);

    if json {
        println!("{}", serde_json::to_string_pretty(&constraints)?);
        return Ok(());
    }

    let active = active_constraints(&serde_json::to_value(&constraints)?);
    if active.is_empty() {
        println!("{}", style.message(MessageType::Info, "No constraints detected."));
    } else {
        for item in active {
            println!("  {}", item);
        }
    }
    Ok(())
}

fn handle_config(
    style: &Style,
    cli: &Cli,
    config: &BprConfig,
    action: &ConfigAction,
) -> Result<(), BprError> {
    match action {
        ConfigAction::Check { json } => handle_config_check(style, cli, config, *json),
        ConfigAction::Show { json } => handle_config_show(style, config, *json),
    }
}

/// Fatal problems already failed in `load_config`; only warnings remain here.
fn handle_config_check(
    style: &Style,
    cli: &Cli,
    config: &BprConfig,
    json: bool,
) -> Result<(), BprError> {
    let warnings = config.validate()?;
    let source = config_source(cli);
    let exists = source.as_ref().is_some_and(|p| p.exists());

    if json {
        let output = serde_json::json!({
            "path": source,
            "exists": exists,
            "valid": true,
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match (&source, exists) {
        (Some(path), true) => println!(
            "{}",
            style.message(MessageType::Info, &format!("Checked {}", path.display()))
        ),
        (Some(path), false) => println!(
            "{}",
            style.message(
                MessageType::Info,
                &format!("{} not found; using built-in defaults", path.display())
            )
        ),
        (None, _) => println!(
            "{}",
            style.message(MessageType::Info, "No config path; using built-in defaults")
        ),
    }

    if warnings.is_empty() {
        println!("{}", style.message(MessageType::Ok, "Configuration is valid"));
    } else {
        println!(
            "{}",
            style.message(MessageType::Warn, &format!("{} warning(s):", warnings.len()))
        );
        for warning in &warnings {
            println!("  • {}", warning);
        }
        println!(
            "{}",
            style.message(MessageType::Ok, "Configuration is valid with warnings")
        );
    }
    Ok(())
}

fn handle_config_show(style: &Style, config: &BprConfig, json: bool) -> Result<(), BprError> {
    let pretty = serde_json::to_string_pretty(config)?;
    if !json {
        println!("{}", style.message(MessageType::Info, "Effective configuration:"));
        println!();
    }
    println!("{}", pretty);
    Ok(())
}
