use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use shelfdb_core::value_utils::timestamp_value;
use shelfdb_core::{
    BulkLoader, Collection, Database, DatabaseConfig, FindOptions, LoadOutcome, LogLevel,
    Projection,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "shelfdb")]
#[command(about = "ShelfDB CLI - query a JSON product catalog with an embedded document store")]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); overrides config and SHELFDB_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Database configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Collection the data file is loaded into
    #[arg(long, global = true, default_value = "products")]
    collection: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a JSON array of documents and report the branch taken
    Load {
        /// JSON data file
        file: PathBuf,
    },
    /// Query documents
    Find {
        /// JSON data file
        file: PathBuf,
        /// Filter document
        #[arg(long, default_value = "{}")]
        filter: String,
        /// Projection document
        #[arg(long)]
        projection: Option<String>,
        /// Sort document, e.g. '{"price": -1}'
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        skip: Option<usize>,
    },
    /// Run an aggregation pipeline
    Aggregate {
        /// JSON data file
        file: PathBuf,
        /// Pipeline as a JSON array of stages
        #[arg(long)]
        pipeline: String,
    },
    /// Update the first matching document
    Update {
        /// JSON data file
        file: PathBuf,
        #[arg(long)]
        filter: String,
        /// Update document, e.g. '{"$set": {"stock": 0}}'
        #[arg(long)]
        update: String,
        /// Write the updated collection here
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run the standard catalog report
    CatalogReport {
        /// JSON data file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let db = open_database(cli.config.as_deref(), cli.log_level)?;

    match cli.command {
        Commands::Load { file } => {
            let (collection, outcome) = load_collection(&db, &cli.collection, &file)?;
            match outcome {
                LoadOutcome::Inserted { count } => {
                    println!("Loaded {} documents into '{}'", count, collection.name())
                }
                LoadOutcome::Skipped { existing } => println!(
                    "Data already exists ({} documents), skipping insertion",
                    existing
                ),
            }
            Ok(())
        }
        Commands::Find {
            file,
            filter,
            projection,
            sort,
            limit,
            skip,
        } => {
            let (collection, _) = load_collection(&db, &cli.collection, &file)?;
            let filter = parse_json_arg("--filter", &filter)?;
            let mut options = FindOptions::new();
            if let Some(raw) = projection {
                options.projection = Projection::from_json(&parse_json_arg("--projection", &raw)?)
                    .context("Invalid projection")?;
            }
            if let Some(raw) = sort {
                options.sort = shelfdb_core::find_options::parse_sort_spec(&parse_json_arg(
                    "--sort", &raw,
                )?)
                .context("Invalid sort")?;
            }
            options.limit = limit;
            options.skip = skip;

            let docs = collection
                .find_with_options(&filter, &options)
                .context("Find failed")?;
            print_documents(&docs)
        }
        Commands::Aggregate { file, pipeline } => {
            let (collection, _) = load_collection(&db, &cli.collection, &file)?;
            let pipeline = parse_json_arg("--pipeline", &pipeline)?;
            let docs = collection.aggregate(&pipeline).context("Aggregation failed")?;
            print_documents(&docs)
        }
        Commands::Update {
            file,
            filter,
            update,
            out,
        } => {
            let (collection, _) = load_collection(&db, &cli.collection, &file)?;
            let filter = parse_json_arg("--filter", &filter)?;
            let update = parse_json_arg("--update", &update)?;
            let matched = collection
                .update_one(&filter, &update)
                .context("Update failed")?;
            println!("Matched: {}", if matched { 1 } else { 0 });

            if let Some(out) = out {
                export_collection(&collection, &out)?;
            }
            Ok(())
        }
        Commands::CatalogReport { file } => catalog_report(&db, &cli.collection, &file),
    }
}

/// Config file if given, else environment; `--log-level` wins over both
fn open_database(config_path: Option<&Path>, log_level: Option<LogLevel>) -> Result<Database> {
    let mut config = match config_path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str::<DatabaseConfig>(&content)
                .with_context(|| format!("Invalid config in: {}", path.display()))?
        }
        None => DatabaseConfig::from_env(),
    };
    if let Some(level) = log_level {
        config = config.with_log_level(level);
    }
    Ok(Database::with_config(config))
}

fn load_collection(
    db: &Database,
    name: &str,
    file: &Path,
) -> Result<(Arc<Collection>, LoadOutcome)> {
    let collection = db.collection(name);
    let outcome = BulkLoader::new(&collection)
        .load_path(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    Ok((collection, outcome))
}

fn parse_json_arg(flag: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{} is not valid JSON: {}", flag, raw))
}

fn print_documents(docs: &[Value]) -> Result<()> {
    for doc in docs {
        println!(
            "{}",
            serde_json::to_string_pretty(doc).context("Failed to serialize document")?
        );
    }
    println!("({} documents)", docs.len());
    Ok(())
}

fn export_collection(collection: &Collection, file: &Path) -> Result<()> {
    let docs: Vec<Value> = collection
        .find(&Value::Null, &Value::Null)
        .context("Failed to scan collection")?
        .collect();
    let json = serde_json::to_string_pretty(&docs).context("Failed to serialize to JSON")?;
    fs::write(file, json).with_context(|| format!("Failed to write to file: {}", file.display()))?;
    println!("Exported {} documents to {}", docs.len(), file.display());
    Ok(())
}

/// Load guard, cheap electronics, well-rated products, a new review for
/// ELEC001, then average price per category
fn catalog_report(db: &Database, name: &str, file: &Path) -> Result<()> {
    let (products, outcome) = load_collection(db, name, file)?;
    match outcome {
        LoadOutcome::Inserted { .. } => println!("Product data loaded successfully"),
        LoadOutcome::Skipped { .. } => println!("Data already exists, skipping insertion"),
    }

    println!("\nElectronics under 50000:");
    let cheap: Vec<Value> = products
        .find(
            &json!({"category": "Electronics", "price": {"$lt": 50000}}),
            &json!({"_id": 0, "name": 1, "price": 1, "stock": 1}),
        )
        .context("Find failed")?
        .collect();
    print_documents(&cheap)?;

    println!("\nProducts with average rating >= 4.0:");
    let rated = products
        .aggregate(&json!([
            {"$unwind": "$reviews"},
            {"$group": {
                "_id": "$product_id",
                "name": {"$first": "$name"},
                "avg_rating": {"$avg": "$reviews.rating"}
            }},
            {"$match": {"avg_rating": {"$gte": 4.0}}}
        ]))
        .context("Rating aggregation failed")?;
    print_documents(&rated)?;

    let review = json!({
        "user": "U999",
        "rating": 4,
        "comment": "Good value",
        "date": timestamp_value(Utc::now())
    });
    let matched = products
        .update_one(
            &json!({"product_id": "ELEC001"}),
            &json!({"$push": {"reviews": review}}),
        )
        .context("Adding review failed")?;
    println!("\nReview added to ELEC001: {}", matched);

    println!("\nAverage price by category:");
    let by_category = products
        .aggregate(&json!([
            {"$group": {
                "_id": "$category",
                "avg_price": {"$avg": "$price"},
                "product_count": {"$sum": 1}
            }},
            {"$project": {"_id": 0, "category": "$_id", "avg_price": 1, "product_count": 1}},
            {"$sort": {"avg_price": -1}}
        ]))
        .context("Category aggregation failed")?;
    print_documents(&by_category)
}
