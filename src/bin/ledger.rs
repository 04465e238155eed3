//! Consequence Ledger CLI
//!
//! Thin shell over the core: records decisions, outcomes and responses,
//! finalizes decisions into the anchor chain, and surfaces warnings,
//! counterfactual precedents and integrity checks.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use consequence_ledger::{
    DecisionFilter, Ledger, LedgerConfig, ResponseAction, TimelineEvent,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file (flags below override its fields)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Anchor snapshot file (current chain tip)
    #[arg(long, value_name = "FILE")]
    anchor_file: Option<PathBuf>,

    /// Append-only anchor history log
    #[arg(long, value_name = "FILE")]
    anchor_history: Option<PathBuf>,

    /// Pattern significance threshold
    #[arg(long, value_name = "N")]
    threshold: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the ledger database
    Init,

    /// Propose a decision and review it against institutional memory
    Propose {
        /// Decision type (category), e.g. "Engagement Optimization"
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        decision_type: String,

        /// Free-text description of the proposed decision
        #[arg(short, long)]
        description: String,
    },

    /// Record an observed real-world outcome for a decision
    Outcome {
        /// Decision id the outcome belongs to
        decision_id: String,

        /// Harm category, e.g. "misinformation", "burnout", "financial"
        #[arg(long)]
        harm: String,

        /// Severity on a 1-5 scale
        #[arg(long)]
        severity: u8,

        /// Free-text narrative of what was observed
        #[arg(long, default_value = "")]
        narrative: String,

        /// When the harm was observed (RFC 3339); defaults to now
        #[arg(long, value_name = "TIMESTAMP")]
        observed_at: Option<String>,
    },

    /// Record a leadership response (APPROVE, REJECT or DEFER)
    Respond {
        decision_id: String,

        /// APPROVE, REJECT or DEFER
        action: String,

        /// Reason for the disposition
        #[arg(short, long)]
        justification: String,
    },

    /// Finalize a decision and seal it into the anchor chain
    Finalize { decision_id: String },

    /// Show a decision with its responses and outcomes
    Status { decision_id: String },

    /// Show warnings and counterfactual precedents for a decision type
    Warn {
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        decision_type: String,
    },

    /// Show all harm patterns for a decision type
    Patterns {
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        decision_type: String,
    },

    /// Harm tally per decision type across the whole ledger
    HarmReport,

    /// List decisions that never accrued a recorded outcome
    Drift,

    /// Full chronological history of one decision
    Timeline { decision_id: String },

    /// Verify hash-chain integrity and the anchor snapshot file
    Verify,
}

fn build_config(cli: &Cli) -> anyhow::Result<LedgerConfig> {
    let mut config = match &cli.config {
        Some(path) => LedgerConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => LedgerConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(anchor_file) = &cli.anchor_file {
        config.anchor_file = anchor_file.clone();
    }
    if let Some(anchor_history) = &cli.anchor_history {
        config.anchor_history = anchor_history.clone();
    }
    if let Some(threshold) = cli.threshold {
        config.pattern_threshold = threshold;
    }
    Ok(config)
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid RFC 3339 timestamp: {}", raw))?
        .with_timezone(&Utc))
}

fn print_review(ledger: &Ledger, decision_type: &str) -> anyhow::Result<()> {
    let warnings = ledger.warnings_for(decision_type)?;
    if warnings.is_empty() {
        println!("No significant harm patterns on record for type '{}'.", decision_type);
    } else {
        println!("WARNINGS for type '{}':", decision_type);
        for w in &warnings {
            println!("  - {}", w);
        }
    }

    let counterfactuals = ledger.counterfactuals_for(decision_type)?;
    if !counterfactuals.is_empty() {
        println!("Safer precedents on record:");
        for c in &counterfactuals {
            println!("  - {}", c);
        }
    }
    println!("This is institutional memory, not a prediction.");
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = build_config(&cli)?;
    let ledger = Ledger::open(&config)?;
    tracing::debug!(db = %config.db_path.display(), "ledger opened");

    match cli.command {
        Commands::Init => {
            println!("Initialized ledger at {}", config.db_path.display());
        }
        Commands::Propose {
            decision_type,
            description,
        } => {
            let decision = ledger.create_decision(&decision_type, &description)?;
            println!("Proposed decision {}", decision.id);
            print_review(&ledger, &decision.decision_type)?;
        }
        Commands::Outcome {
            decision_id,
            harm,
            severity,
            narrative,
            observed_at,
        } => {
            let observed_at = observed_at.as_deref().map(parse_timestamp).transpose()?;
            let outcome =
                ledger.add_outcome(&decision_id, &harm, severity, &narrative, observed_at)?;
            println!(
                "Recorded outcome {} (harm='{}', severity={})",
                outcome.id, outcome.harm_category, outcome.severity
            );
        }
        Commands::Respond {
            decision_id,
            action,
            justification,
        } => {
            let action: ResponseAction = action.parse()?;
            let response = ledger.record_response(&decision_id, action, &justification)?;
            println!(
                "Recorded response {} ({}) for {}",
                response.id, response.action, decision_id
            );
        }
        Commands::Finalize { decision_id } => {
            let anchor = ledger.finalize(&decision_id)?;
            println!(
                "Finalized {}: anchor sequence={} content_hash={}",
                decision_id, anchor.sequence, anchor.content_hash
            );
        }
        Commands::Status { decision_id } => {
            let decision = ledger.get_decision(&decision_id)?;
            println!("{} [{}]", decision.id, decision.status);
            println!("  type:        {}", decision.decision_type);
            println!("  description: {}", decision.description);
            println!("  proposed_at: {}", decision.proposed_at.to_rfc3339());

            let responses = ledger.list_responses(&decision_id)?;
            if responses.is_empty() {
                println!("  responses:   (none)");
            } else {
                println!("  responses:");
                for r in &responses {
                    let marker = if r.superseded { "superseded" } else { "active" };
                    println!(
                        "    - {} {} ({}) \"{}\"",
                        r.responded_at.to_rfc3339(),
                        r.action,
                        marker,
                        r.justification
                    );
                }
            }

            let outcomes = ledger.list_outcomes(&decision_id)?;
            if outcomes.is_empty() {
                println!("  outcomes:    (none)");
            } else {
                println!("  outcomes:");
                for o in &outcomes {
                    println!(
                        "    - {} harm='{}' severity={} \"{}\"",
                        o.observed_at.to_rfc3339(),
                        o.harm_category,
                        o.severity,
                        o.narrative
                    );
                }
            }
        }
        Commands::Warn { decision_type } => {
            let known = ledger.list_decisions(&DecisionFilter::by_type(&decision_type))?;
            println!(
                "{} past decision(s) of type '{}' on record.",
                known.len(),
                decision_type
            );
            print_review(&ledger, &decision_type)?;
        }
        Commands::Patterns { decision_type } => {
            let patterns = ledger.detect_patterns(&decision_type)?;
            if patterns.is_empty() {
                println!("No harm patterns on record for type '{}'.", decision_type);
            }
            for p in &patterns {
                println!(
                    "- {}: {} occurrence(s), decisions: {}",
                    p.harm_category,
                    p.occurrences,
                    p.decision_ids.join(", ")
                );
            }
        }
        Commands::HarmReport => {
            for (decision_type, patterns) in ledger.harm_report()? {
                println!("{}:", decision_type);
                if patterns.is_empty() {
                    println!("  (no recorded harms)");
                }
                for p in &patterns {
                    println!("  - {}: {}", p.harm_category, p.occurrences);
                }
            }
        }
        Commands::Drift => {
            let drifting = ledger.decisions_without_outcomes()?;
            if drifting.is_empty() {
                println!("Every recorded decision has at least one outcome.");
            }
            for d in &drifting {
                println!("- {} [{}] {}", d.id, d.decision_type, d.description);
            }
        }
        Commands::Timeline { decision_id } => {
            for event in ledger.decision_timeline(&decision_id)? {
                match event {
                    TimelineEvent::Proposed { at, decision } => {
                        println!("{} proposed: {}", at.to_rfc3339(), decision.description)
                    }
                    TimelineEvent::ResponseRecorded { at, response } => println!(
                        "{} response: {} \"{}\"{}",
                        at.to_rfc3339(),
                        response.action,
                        response.justification,
                        if response.superseded { " (superseded)" } else { "" }
                    ),
                    TimelineEvent::OutcomeRecorded { at, outcome } => println!(
                        "{} outcome: harm='{}' severity={} \"{}\"",
                        at.to_rfc3339(),
                        outcome.harm_category,
                        outcome.severity,
                        outcome.narrative
                    ),
                    TimelineEvent::Finalized { at, anchor } => println!(
                        "{} finalized: anchor sequence={} content_hash={}",
                        at.to_rfc3339(),
                        anchor.sequence,
                        anchor.content_hash
                    ),
                }
            }
        }
        Commands::Verify => {
            let verification = ledger.verify_chain()?;
            if verification.valid {
                println!("Chain OK ({} anchor record(s)).", verification.records);
                if let Some(tip) = &verification.tip {
                    println!("Tip hash: {}", tip);
                }
                ledger.verify_anchor()?;
                println!("Anchor file matches the database tip.");
            } else {
                anyhow::bail!(
                    "chain BROKEN at sequence {} ({} record(s) total)",
                    verification
                        .first_broken
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    verification.records
                );
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // The subscriber's default `tracing-log` feature installs the bridge for
    // the library's `log` records; installing it a second time would panic.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(false)
        .init();

    run(Cli::parse())
}
