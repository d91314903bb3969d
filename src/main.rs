use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use tokensieve::config::Config;
use tokensieve::db::models::TokenType;
use tokensieve::db::DatasetStore;
use tokensieve::output::terminal;
use tokensieve::pipeline::ingest;
use tokensieve::rules::engine::RecomputeReport;
use tokensieve::rules::{
    io as rules_io, Comparator, CountMetric, Direction, FilterRule, RuleAction, Selector,
    TfidfBand,
};
use tokensieve::tokenize::simple::SimpleTokenizer;
use tokensieve::views::{self, WordList};
use tokensieve::EngineError;

/// tokensieve: filter tokenized text corpora for topic modeling.
///
/// Stores tokens per dataset, computes tf-idf once, and replays an ordered
/// list of filter rules to decide which tokens reach the topic model.
#[derive(Parser)]
#[command(name = "tokensieve", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty dataset in the workspace
    Init {
        dataset: String,

        /// Active token variant (default: TOKENSIEVE_TOKEN_TYPE or raw)
        #[arg(long, value_enum)]
        token_type: Option<TokenTypeArg>,
    },

    /// Tokenize a raw-text corpus JSON file and add it to a dataset
    Ingest {
        dataset: String,
        file: PathBuf,

        /// Drop existing tokens first (re-tokenization pass)
        #[arg(long)]
        replace: bool,
    },

    /// Add a pre-tokenized corpus JSON file to a dataset
    IngestTokens {
        dataset: String,
        file: PathBuf,

        /// Drop existing tokens first (re-tokenization pass)
        #[arg(long)]
        replace: bool,
    },

    /// Switch the variant used for rule matching and word lists
    TokenType {
        dataset: String,
        #[arg(value_enum)]
        token_type: TokenTypeArg,
    },

    /// Manage a dataset's filter rules
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },

    /// Apply pending filter rules (incremental when possible)
    Apply {
        dataset: String,

        /// Reset all tokens and replay every rule
        #[arg(long)]
        full: bool,
    },

    /// Show the included (or removed) word list
    Words {
        dataset: String,

        #[arg(long)]
        removed: bool,

        /// Rows to print (default: 50)
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Show or export each document's included tokens
    Documents {
        dataset: String,

        /// Write {document_key: [token, ...]} JSON to this file instead
        #[arg(long)]
        output: Option<PathBuf>,

        /// Documents to print (default: 20)
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show workspace or dataset status
    Status { dataset: Option<String> },
}

#[derive(Subcommand)]
enum RulesCommand {
    /// List rules in pipeline order
    List { dataset: String },

    /// Append a rule
    Add {
        dataset: String,

        /// Field key to match (default: any)
        #[arg(long)]
        field: Option<String>,

        /// Token value to match in the active variant (default: any)
        #[arg(long)]
        word: Option<String>,

        /// Part-of-speech tag to match (default: any)
        #[arg(long)]
        pos: Option<String>,

        /// Apply the new rule right away
        #[arg(long)]
        apply: bool,

        #[command(subcommand)]
        action: ActionCommand,
    },

    /// Remove the rule at INDEX
    Remove { dataset: String, index: usize },

    /// Move the rule at FROM to position TO
    Move {
        dataset: String,
        from: usize,
        to: usize,
    },

    /// Remove every rule
    Clear { dataset: String },

    /// Replace the rules with those in a JSON rule file
    Import { dataset: String, file: PathBuf },

    /// Write the rules to a JSON rule file
    Export { dataset: String, file: PathBuf },
}

#[derive(Subcommand)]
enum ActionCommand {
    /// Exclude matching tokens
    Remove,
    /// Re-include matching tokens
    Include,
    /// Exclude matching tokens flagged as stopwords
    RemoveStopwords,
    /// Act on (word, pos) groups whose count passes a comparison
    Count {
        #[arg(long, value_enum)]
        direction: DirectionArg,
        #[arg(long, value_enum)]
        metric: MetricArg,
        /// One of >, >=, =, <=, <
        #[arg(long)]
        comparator: String,
        #[arg(long, allow_negative_numbers = true)]
        threshold: f64,
    },
    /// Act on tokens inside a tf-idf percentile band
    Tfidf {
        #[arg(long, value_enum)]
        direction: DirectionArg,
        #[arg(long, value_enum)]
        band: BandArg,
        /// 0 to 100
        #[arg(long)]
        percentile: f64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TokenTypeArg {
    Raw,
    Stem,
    Lemma,
}

impl From<TokenTypeArg> for TokenType {
    fn from(arg: TokenTypeArg) -> Self {
        match arg {
            TokenTypeArg::Raw => TokenType::Raw,
            TokenTypeArg::Stem => TokenType::Stem,
            TokenTypeArg::Lemma => TokenType::Lemma,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Remove,
    Include,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Remove => Direction::Remove,
            DirectionArg::Include => Direction::Include,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    NumWords,
    PercentWords,
    NumDocs,
    PercentDocs,
}

impl From<MetricArg> for CountMetric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::NumWords => CountMetric::NumWords,
            MetricArg::PercentWords => CountMetric::PercentWords,
            MetricArg::NumDocs => CountMetric::NumDocs,
            MetricArg::PercentDocs => CountMetric::PercentDocs,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BandArg {
    Lower,
    Upper,
}

impl From<BandArg> for TfidfBand {
    fn from(arg: BandArg) -> Self {
        match arg {
            BandArg::Lower => TfidfBand::Lower,
            BandArg::Upper => TfidfBand::Upper,
        }
    }
}

impl ActionCommand {
    fn into_action(self) -> Result<RuleAction> {
        Ok(match self {
            ActionCommand::Remove => RuleAction::Remove,
            ActionCommand::Include => RuleAction::Include,
            ActionCommand::RemoveStopwords => RuleAction::RemoveStopwords,
            ActionCommand::Count {
                direction,
                metric,
                comparator,
                threshold,
            } => RuleAction::Count {
                direction: direction.into(),
                metric: metric.into(),
                comparator: Comparator::parse(&comparator)?,
                threshold,
            },
            ActionCommand::Tfidf {
                direction,
                band,
                percentile,
            } => RuleAction::Tfidf {
                direction: direction.into(),
                band: band.into(),
                percentile,
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tokensieve=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init {
            dataset,
            token_type,
        } => {
            let path = config.dataset_path(&dataset)?;
            if path.exists() {
                anyhow::bail!("Dataset '{dataset}' already exists at {}", path.display());
            }
            let token_type = token_type
                .map(TokenType::from)
                .unwrap_or(config.default_token_type);
            DatasetStore::create(&path, &dataset, token_type)?;
            println!("Dataset '{dataset}' created at: {}", path.display());
            println!("  Token type: {token_type}");
            println!("\nNext step: tokensieve ingest {dataset} <corpus.json>");
        }

        Commands::Ingest {
            dataset,
            file,
            replace,
        } => {
            let raw = ingest::read_raw_corpus(&file)
                .with_context(|| format!("Failed to read corpus {}", file.display()))?;
            println!("Tokenizing {} documents...", raw.documents.len());
            let corpus = ingest::tokenize_corpus(&SimpleTokenizer::new(), &raw);
            run_ingest(&config, &dataset, corpus, replace).await?;
        }

        Commands::IngestTokens {
            dataset,
            file,
            replace,
        } => {
            let corpus = ingest::read_tokenized_corpus(&file)
                .with_context(|| format!("Failed to read tokens {}", file.display()))?;
            run_ingest(&config, &dataset, corpus, replace).await?;
        }

        Commands::TokenType {
            dataset,
            token_type,
        } => {
            let store = open_store(&config, &dataset)?;
            let token_type = TokenType::from(token_type);
            if store.set_token_type(token_type)? {
                println!("Token type set to {token_type}. Replaying rules...");
                let report = recompute(&config, &dataset, true).await?;
                terminal::display_recompute(&report);
            } else {
                println!("Token type is already {token_type}.");
            }
        }

        Commands::Rules { command } => run_rules(&config, command).await?,

        Commands::Apply { dataset, full } => {
            let report = recompute(&config, &dataset, full).await?;
            terminal::display_recompute(&report);
        }

        Commands::Words {
            dataset,
            removed,
            limit,
        } => {
            let store = open_store(&config, &dataset)?;
            let list = if removed {
                WordList::Removed
            } else {
                WordList::Included
            };
            let words = store.word_summary(list)?;
            let counts = store.with_conn(|c| views::word_counts(c, list))?;
            terminal::display_word_summary(list, &words, &counts, limit);
        }

        Commands::Documents {
            dataset,
            output,
            limit,
        } => {
            let store = open_store(&config, &dataset)?;
            if let Some(path) = output {
                let documents = store.documents_tokens()?;
                let json = serde_json::to_string_pretty(&documents)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!(
                    "Wrote {} documents to {}",
                    documents.len(),
                    path.display()
                );
            } else {
                let mut shown = 0;
                store.for_each_document(|key, tokens| {
                    if shown < limit {
                        println!("{} {}", format!("{key}:").bold(), tokens.join(" "));
                    }
                    shown += 1;
                    Ok(())
                })?;
                if shown > limit {
                    println!("{}", format!("... {} more documents", shown - limit).dimmed());
                }
            }
        }

        Commands::Status { dataset } => {
            tokensieve::status::show(&config, dataset.as_deref())?;
        }
    }

    Ok(())
}

async fn run_rules(config: &Config, command: RulesCommand) -> Result<()> {
    match command {
        RulesCommand::List { dataset } => {
            let store = open_store(config, &dataset)?;
            let ds = store.dataset()?;
            terminal::display_rules(&store.rules()?, ds.applied_rules, ds.needs_full);
        }

        RulesCommand::Add {
            dataset,
            field,
            word,
            pos,
            apply,
            action,
        } => {
            let rule = FilterRule::new(
                Selector::from(field),
                Selector::from(word),
                Selector::from(pos),
                action.into_action()?,
            );
            rule.validate()?;

            let store = open_store(config, &dataset)?;
            if apply {
                match store.incremental_recompute(std::slice::from_ref(&rule)) {
                    Ok(report) => {
                        println!("Added rule: {rule}");
                        terminal::display_recompute(&report);
                    }
                    Err(EngineError::IncrementalInvalid(_)) => {
                        store.append_rules(std::slice::from_ref(&rule))?;
                        println!("Added rule: {rule}");
                        println!("Earlier rule changes are pending; replaying all rules...");
                        let report = recompute(config, &dataset, true).await?;
                        terminal::display_recompute(&report);
                    }
                    Err(e) => return Err(e.into()),
                }
            } else {
                let count = store.append_rules(std::slice::from_ref(&rule))?;
                println!("Added rule #{}: {rule}", count - 1);
                print_apply_hint(&store)?;
            }
        }

        RulesCommand::Remove { dataset, index } => {
            let store = open_store(config, &dataset)?;
            let removed = store.remove_rule(index)?;
            println!("Removed rule #{index}: {removed}");
            print_apply_hint(&store)?;
        }

        RulesCommand::Move { dataset, from, to } => {
            let store = open_store(config, &dataset)?;
            store.move_rule(from, to)?;
            println!("Moved rule #{from} to #{to}.");
            print_apply_hint(&store)?;
        }

        RulesCommand::Clear { dataset } => {
            let store = open_store(config, &dataset)?;
            store.replace_rules(&[])?;
            println!("All rules removed. Run `tokensieve apply` to restore every token.");
        }

        RulesCommand::Import { dataset, file } => {
            let store = open_store(config, &dataset)?;
            let count = store.with_conn(|c| rules_io::import_rules(c, &file))?;
            println!("Imported {count} rules from {}", file.display());
            print_apply_hint(&store)?;
        }

        RulesCommand::Export { dataset, file } => {
            let store = open_store(config, &dataset)?;
            let count = store.with_conn(|c| rules_io::export_rules(c, &file))?;
            println!("Exported {count} rules to {}", file.display());
        }
    }
    Ok(())
}

/// Remind the user when rule edits have not reached the included flags yet.
fn print_apply_hint(store: &DatasetStore) -> Result<()> {
    if store.status()?.apply_pending() {
        println!(
            "{}",
            "Run `tokensieve apply` to update the included tokens.".dimmed()
        );
    }
    Ok(())
}

fn open_store(config: &Config, dataset: &str) -> Result<DatasetStore> {
    let path = config.dataset_path(dataset)?;
    DatasetStore::open(&path).with_context(|| {
        format!("Dataset '{dataset}' not found. Run `tokensieve init {dataset}` first.")
    })
}

/// Ingest on a blocking worker so the runtime thread stays free.
async fn run_ingest(
    config: &Config,
    dataset: &str,
    corpus: ingest::TokenizedCorpus,
    replace: bool,
) -> Result<()> {
    let store = open_store(config, dataset)?;
    println!("Storing tokens for {} fields...", corpus.tokens.len());

    let report = tokio::task::spawn_blocking(move || ingest::ingest(&store, &corpus, replace))
        .await
        .context("Ingestion worker panicked")??;

    println!("\n{}", "Ingestion complete.".bold());
    println!("  Fields: {}", report.fields);
    println!("  New documents: {}", report.new_documents);
    println!("  Tokens stored: {}", report.tokens);
    println!("  Distinct values (all variants): {}", report.distinct_values);
    terminal::display_recompute(&report.recompute);
    Ok(())
}

/// Replay the dataset's rules on a blocking worker with a progress bar.
async fn recompute(config: &Config, dataset: &str, full: bool) -> Result<RecomputeReport> {
    let store = open_store(config, dataset)?;
    info!(dataset, full, "Recomputing included tokens");

    let report = tokio::task::spawn_blocking(move || -> Result<RecomputeReport> {
        let total = store.rules()?.len();
        let pb = ProgressBar::new(total as u64);
        pb.set_style(ProgressStyle::default_bar().template("  Applying [{bar:30}] {pos}/{len} {msg}")?);

        let report = store.recompute_with(full, |progress| {
            pb.set_position((progress.index + 1) as u64);
            pb.set_message(format!("({} rows)", progress.rows));
        })?;
        pb.finish_and_clear();
        Ok(report)
    })
    .await
    .context("Recompute worker panicked")??;

    Ok(report)
}
