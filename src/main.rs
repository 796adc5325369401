use std::path::PathBuf;

use clap::{Args, Parser};
use diesel::connection::set_default_instrumentation;
use tracing_subscriber::fmt::format::FmtSpan;

use taxbridge::database;
use taxbridge::errors::Error;
use taxbridge::events::{IngestEvent, MapRequest};
use taxbridge::ingest::{self, IngestRequest};
use taxbridge::mapping::{self, seed::Rules};
use taxbridge::readers;
use taxbridge::translate::translate;
use taxbridge::vocabulary::VocabularyCache;

/// The taxonomy integration pipeline
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Ingest a taxonomy load described by an invocation event
    Ingest(IngestArgs),

    /// Run the mapping engine for a finished load
    Map {
        /// Path to the mapping request JSON
        request: PathBuf,
    },

    /// Print the matcher vocabulary extracted from a Master taxonomy
    Vocabulary {
        /// The customer id owning the taxonomy
        customer_id: String,
        /// The taxonomy id to extract from
        taxonomy_id: String,
    },

    /// Answer "what is this code in another taxonomy" through Gold
    Translate(TranslateArgs),

    /// Import mapping rules and assignments from a CSV file
    ImportRules { path: PathBuf },
}

#[derive(Args)]
pub struct IngestArgs {
    /// Path to the invocation event JSON ("s3" or "api" shaped)
    event: PathBuf,

    /// Rows delivered by the file parsers, as CSV or a JSON array.
    /// Required for s3 events, overrides the payload rows for api events
    #[arg(long)]
    rows: Option<PathBuf>,

    /// The taxonomy name, normally read from the spreadsheet
    #[arg(long)]
    taxonomy_name: Option<String>,
}

#[derive(Args)]
pub struct TranslateArgs {
    /// The customer id owning the source taxonomy
    customer_id: String,
    /// The source taxonomy id
    taxonomy_id: String,
    /// The code to translate
    code: String,

    /// Target customer id to translate into
    #[arg(long, requires = "target_taxonomy")]
    target_customer: Option<String>,
    /// Target taxonomy id to translate into
    #[arg(long, requires = "target_customer")]
    target_taxonomy: Option<String>,
}

fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_level(false)
        .init();

    set_default_instrumentation(database::simple_logger).expect("Failed to setup database instrumentation");

    let cli = Cli::parse();

    match &cli.command {
        Commands::Ingest(args) => {
            let event: IngestEvent = serde_json::from_str(&std::fs::read_to_string(&args.event)?)?;

            let rows = match &args.rows {
                Some(path) => Some(readers::read_rows(path)?),
                None => None,
            };

            let request = IngestRequest::from_event(event, rows, args.taxonomy_name.clone())?;
            let pool = database::get_pool()?;
            let response = ingest::run(&pool, &request)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Map { request } => {
            let request: MapRequest = serde_json::from_str(&std::fs::read_to_string(request)?)?;
            let pool = database::get_pool()?;
            let response = mapping::run(&pool, &request)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Vocabulary { customer_id, taxonomy_id } => {
            let pool = database::get_pool()?;
            let mut conn = pool.get()?;
            let mut cache = VocabularyCache::new();
            let vocabulary = cache.extract(&mut conn, customer_id, taxonomy_id)?;
            println!("{}", serde_json::to_string_pretty(&vocabulary)?);
        }

        Commands::Translate(args) => {
            let pool = database::get_pool()?;
            let mut conn = pool.get()?;

            let target = match (&args.target_customer, &args.target_taxonomy) {
                (Some(customer), Some(taxonomy)) => Some((customer.as_str(), taxonomy.as_str())),
                _ => None,
            };

            let translation =
                translate(&mut conn, &args.customer_id, &args.taxonomy_id, &args.code, target)?;
            println!("{}", serde_json::to_string_pretty(&translation)?);
        }

        Commands::ImportRules { path } => {
            let rules = Rules { path: path.clone() };
            let pool = database::get_pool()?;
            rules.import(&pool)?;
        }
    }

    Ok(())
}
