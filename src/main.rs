//! Tabula CLI

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tabula::csv::{FieldMapping, ImportTarget};
use tabula::{Config, Engine, FieldFilters, ListQuery, PageRequest};

#[derive(Parser)]
#[command(name = "tabula")]
#[command(about = "User-defined tables over schema-less entries", long_about = None)]
struct Cli {
    /// Data root (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// User recorded as owner / last editor
    #[arg(short, long, default_value = "admin")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a data root
    Init,

    /// List databases, or create one
    Databases {
        /// Create a database with this name
        #[arg(long)]
        create: Option<String>,
    },

    /// List the tables of a database
    Tables {
        /// Database name
        database: String,
    },

    /// List the entries of a table
    Entries {
        /// Table slug
        table: String,

        /// Field filters such as `age__gte=18` or `status=a,b`
        #[arg(short, long)]
        filter: Vec<String>,

        /// TQL predicate
        #[arg(short, long)]
        q: Option<String>,

        /// Comma-separated fields to show
        #[arg(long)]
        fields: Option<String>,

        /// Ordering such as `-age,name`
        #[arg(long)]
        order: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Import a CSV file into a table, creating it when missing
    Import {
        file: PathBuf,

        /// Database name
        #[arg(long)]
        database: String,

        /// Table name
        #[arg(long)]
        table: String,

        #[arg(long, default_value_t = ';')]
        delimiter: char,
    },

    /// Export a table as CSV
    Export {
        /// Table slug
        table: String,

        #[arg(short, long)]
        filter: Vec<String>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compute the data of a saved chart
    Chart {
        id: u64,

        #[arg(short, long)]
        filter: Vec<String>,

        /// Aggregate only the first entries
        #[arg(long)]
        preview: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init_root(&cli.root).await,
        Commands::Databases { create } => databases(&cli.root, create).await,
        Commands::Tables { database } => tables(&cli.root, &database).await,
        Commands::Entries {
            table,
            filter,
            q,
            fields,
            order,
            page,
            page_size,
        } => {
            let query = ListQuery {
                filters: parse_filters(&filter)?,
                q,
                fields: fields.map(|f| f.split(',').map(|s| s.trim().to_string()).collect()),
                ordering: order,
                page: PageRequest { page, page_size },
            };
            entries(&cli.root, &table, &query).await
        }
        Commands::Import {
            file,
            database,
            table,
            delimiter,
        } => import(&cli.root, &cli.user, &file, &database, &table, delimiter).await,
        Commands::Export { table, filter, output } => export(&cli.root, &table, &filter, output.as_deref()).await,
        Commands::Chart { id, filter, preview } => chart(&cli.root, id, &filter, preview).await,
    }
}

fn parse_filters(args: &[String]) -> anyhow::Result<FieldFilters> {
    FieldFilters::parse_args(args).context("filters must look like key=value")
}

async fn init_root(path: &Path) -> anyhow::Result<()> {
    println!("Initializing tabula data root at {:?}...", path);
    let engine = Engine::open(path).await?;
    if !path.join(tabula::config::CONFIG_FILE).exists() {
        Config::default().save(path)?;
    }
    drop(engine);

    println!("Data root initialized.");
    println!();
    println!("Layout:");
    println!("  tabula.yaml          - Engine configuration");
    println!("  .tabula/catalog/     - Databases, tables, filters and charts");
    println!("  tables/<id>/         - One JSON document per entry");
    println!();
    println!("Get started:");
    println!("  tabula databases --create Shop");
    println!("  tabula import clients.csv --database Shop --table Clients");
    println!("  tabula entries clients --filter 'city=Cluj'");
    Ok(())
}

async fn databases(path: &Path, create: Option<String>) -> anyhow::Result<()> {
    let engine = Engine::open(path).await?;
    if let Some(name) = create {
        let database = engine.create_database(&name).await?;
        println!("Database '{}' created (id {}).", database.name, database.id);
        return Ok(());
    }

    let databases = engine.list_databases().await;
    if databases.is_empty() {
        println!("No databases found.");
        return Ok(());
    }
    println!("Databases:");
    for database in databases {
        let listing = engine.list_tables(database.id).await?;
        println!(
            "  {} ({} active tables, {} archived)",
            database.name,
            listing.active.len(),
            listing.archived.len()
        );
    }
    Ok(())
}

async fn tables(path: &Path, database: &str) -> anyhow::Result<()> {
    let engine = Engine::open(path).await?;
    let database = engine.database_by_name(database).await?;
    let listing = engine.list_tables(database.id).await?;

    for (title, tables) in [("Active", &listing.active), ("Archived", &listing.archived)] {
        if tables.is_empty() {
            continue;
        }
        println!("{}:", title);
        for table in tables {
            let count = engine.entries_count(table.id).await?;
            println!("  {} [{}] ({} entries)", table.name, table.slug, count);
            for column in &table.columns {
                let mut flags = Vec::new();
                if column.required {
                    flags.push("required");
                }
                if column.unique {
                    flags.push("unique");
                }
                println!("    {}: {} {}", column.name, column.field_type, flags.join(" "));
            }
        }
    }
    Ok(())
}

async fn entries(path: &Path, table: &str, query: &ListQuery) -> anyhow::Result<()> {
    let engine = Engine::open(path).await?;
    let table = engine.table_by_slug(table).await?;
    let page = engine.list_entries(table.id, query).await?;

    if page.results.is_empty() {
        println!("(0 rows)");
        return Ok(());
    }
    for entry in &page.results {
        println!("{}", serde_json::to_string(entry)?);
    }
    println!(
        "(page {} of {} row(s), {} per page)",
        page.page, page.count, page.page_size
    );
    Ok(())
}

async fn import(
    path: &Path,
    user: &str,
    file: &Path,
    database: &str,
    table: &str,
    delimiter: char,
) -> anyhow::Result<()> {
    let engine = Engine::open(path).await?;
    let database = engine.database_by_name(database).await?;
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let prepared = engine.prepare_csv_import(&file_name, content, delimiter, user).await?;
    if prepared.detected_fields.is_empty() {
        bail!("no fields detected in {}", file.display());
    }
    println!("Detected fields:");
    for field in &prepared.detected_fields {
        println!("  {} -> {} ({})", field.original_name, field.name, field.field_type);
    }

    let listing = engine.list_tables(database.id).await?;
    let existing = listing
        .active
        .iter()
        .chain(&listing.archived)
        .find(|t| t.name == table)
        .map(|t| t.id);
    let mut mapping: Vec<FieldMapping> = prepared.detected_fields.iter().map(FieldMapping::from).collect();
    let target = match existing {
        Some(id) => {
            for m in &mut mapping {
                m.field_type = None;
            }
            ImportTarget::Existing(id)
        }
        None => ImportTarget::New {
            database: database.id,
            name: table.to_string(),
        },
    };

    let report = engine.run_csv_import(prepared.import_id, target, mapping, user).await?;
    println!("Imported {} row(s), {} error(s).", report.imports_count, report.errors_count);
    for error in &report.errors {
        println!("  {}", serde_json::to_string(&error.errors)?);
    }
    Ok(())
}

async fn export(path: &Path, table: &str, filter: &[String], output: Option<&Path>) -> anyhow::Result<()> {
    let engine = Engine::open(path).await?;
    let table = engine.table_by_slug(table).await?;
    let filters = parse_filters(filter)?;

    let rows = match output {
        Some(file) => {
            let out = std::fs::File::create(file).with_context(|| format!("creating {}", file.display()))?;
            engine.write_csv(table.id, &filters, std::io::BufWriter::new(out)).await?
        }
        None => engine.write_csv(table.id, &filters, std::io::stdout().lock()).await?,
    };
    eprintln!("Exported {} row(s).", rows);
    Ok(())
}

async fn chart(path: &Path, id: u64, filter: &[String], preview: bool) -> anyhow::Result<()> {
    let engine = Engine::open(path).await?;
    let filters = parse_filters(filter)?;
    let data = engine.compute_chart_data(id, &filters, preview).await?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}
