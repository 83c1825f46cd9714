//! StreamBase CLI
//!
//! Usage:
//!   streambase --schema users.fbs --map USER=users --load stream.bin --query "SELECT * FROM users"

use clap::Parser;
use std::path::PathBuf;

use streambase::{Database, StreamError};

#[derive(Parser, Debug)]
#[command(name = "streambase")]
#[command(about = "SQL queries over streaming record logs")]
#[command(version)]
struct Args {
    /// Schema file (IDL or JSON Schema)
    #[arg(short, long)]
    schema: PathBuf,

    /// File-id to table binding, e.g. USER=users (repeatable)
    #[arg(short, long = "map", value_name = "ID=TABLE")]
    map: Vec<String>,

    /// Load a previously exported stream before running queries
    #[arg(short, long)]
    load: Option<PathBuf>,

    /// SQL query to execute
    #[arg(short, long)]
    query: Option<String>,

    /// Write the raw stream to a file
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Print per-table statistics
    #[arg(long)]
    stats: bool,
}

fn run(args: &Args) -> streambase::Result<()> {
    let schema_source = std::fs::read_to_string(&args.schema)?;
    let mut db = Database::from_schema(&schema_source, "main")?;

    for mapping in &args.map {
        let (file_id, table) = mapping.split_once('=').ok_or_else(|| {
            StreamError::SchemaParseError(format!("invalid --map value: {}", mapping))
        })?;
        db.register_file_id(file_id, table)?;
    }

    if let Some(path) = &args.load {
        let bytes = std::fs::read(path)?;
        db.load_and_rebuild(&bytes);
        log::info!("loaded {} bytes from {}", bytes.len(), path.display());
    }

    if let Some(sql) = &args.query {
        let result = db.query(sql)?;
        println!("{}", result.columns.join(" | "));
        for row in &result.rows {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            println!("{}", cells.join(" | "));
        }
        println!("({} rows)", result.row_count());
    }

    if let Some(path) = &args.export {
        let bytes = db.export();
        std::fs::write(path, &bytes)?;
        log::info!("exported {} bytes to {}", bytes.len(), path.display());
    }

    if args.stats {
        for s in db.stats() {
            println!(
                "{}: file_id={} records={} indexes=[{}]",
                s.table_name,
                s.file_id,
                s.record_count,
                s.indexes.join(", ")
            );
        }
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
