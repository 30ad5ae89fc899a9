//! slotdb - command line front end for the table store

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::debug;
use thiserror::Error;

use slotdb::{
    Attr, BPlusTree, BPlusTreeError, Column, ColumnType, ConfigError, RecordError,
    FIELD_SIZE, StorageConfig, Value, comparator_for,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory (overrides the configuration)
    #[arg(short = 'D', long)]
    data_dir: Option<PathBuf>,

    /// Buffer pool frames (overrides the configuration)
    #[arg(short, long)]
    pool_capacity: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a table, e.g. `create users id:int name:char(20) --key id`
    Create {
        table: String,
        /// Columns as `name:type`, type one of int, float, char(n)
        #[arg(required = true)]
        columns: Vec<String>,
        /// Key column (defaults to the first one)
        #[arg(short, long)]
        key: Option<String>,
        /// Entries per tree node
        #[arg(short, long)]
        node_capacity: Option<usize>,
    },
    /// Delete a table and its files
    Drop { table: String },
    /// Insert one record, values in column order
    Insert {
        table: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Look up a record by key
    Get { table: String, key: String },
    /// Replace the record with the same key
    Update {
        table: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Remove a record by key
    Remove { table: String, key: String },
    /// Print records in key order, optionally limited to a key range
    Scan {
        table: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Print the schema of a table as JSON
    Describe { table: String },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Tree(#[from] BPlusTreeError),

    #[error("{0}")]
    Record(#[from] RecordError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

type CliResult<T> = Result<T, CliError>;

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> CliResult<()> {
    let mut config = match &args.config {
        Some(path) => StorageConfig::load(path)?,
        None => StorageConfig::default(),
    };
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(capacity) = args.pool_capacity {
        config.pool_capacity = capacity;
    }
    config.validate()?;
    debug!("using {:?}", config);

    let mut tree = BPlusTree::from_config(&config)?;

    match args.command {
        Command::Create {
            table,
            columns,
            key,
            node_capacity,
        } => {
            let columns = columns
                .iter()
                .map(|spec| parse_column(spec))
                .collect::<CliResult<Vec<_>>>()?;
            let index = match key {
                Some(name) => columns
                    .iter()
                    .position(|c| c.name == name)
                    .ok_or_else(|| CliError::Usage(format!("no column named '{}'", name)))?,
                None => 0,
            };
            let mut attr = Attr::new(columns, index)?;
            attr.node_capacity = node_capacity.unwrap_or(0);
            tree.create_form(&table, &attr)?;
            println!("created table '{}'", table);
        }
        Command::Drop { table } => {
            tree.delete_form(&table)?;
            println!("dropped table '{}'", table);
        }
        Command::Insert { table, values } => {
            let attr = tree.fetch_attr(&table)?;
            let record = parse_record(&attr, &values)?;
            tree.insert_data(&table, &record, key_comparator(&attr))?;
        }
        Command::Get { table, key } => {
            let attr = tree.fetch_attr(&table)?;
            let key = encode_key(&attr, &key)?;
            let record = tree.search_data_by_index(&table, &key, key_comparator(&attr))?;
            print_record(&attr, &record)?;
        }
        Command::Update { table, values } => {
            let attr = tree.fetch_attr(&table)?;
            let record = parse_record(&attr, &values)?;
            let key = record[attr.key_range()].to_vec();
            tree.update_data_by_index(&table, &key, &record, key_comparator(&attr))?;
        }
        Command::Remove { table, key } => {
            let attr = tree.fetch_attr(&table)?;
            let key = encode_key(&attr, &key)?;
            tree.remove_data_by_index(&table, &key, key_comparator(&attr))?;
        }
        Command::Scan { table, from, to } => {
            let attr = tree.fetch_attr(&table)?;
            let records = match (from, to) {
                (None, None) => tree.scan_data(&table)?,
                (from, to) => {
                    let lower = match from {
                        Some(k) => encode_key(&attr, &k)?,
                        None => encode_bound(&attr, false)?,
                    };
                    let upper = match to {
                        Some(k) => encode_key(&attr, &k)?,
                        None => encode_bound(&attr, true)?,
                    };
                    tree.range_data(&table, &lower, &upper, key_comparator(&attr))?
                }
            };
            for record in &records {
                print_record(&attr, record)?;
            }
            println!("({} rows)", records.len());
        }
        Command::Describe { table } => {
            let attr = tree.fetch_attr(&table)?;
            println!("{}", serde_json::to_string_pretty(&attr)?);
            println!("rows: {}", tree.count_data(&table)?);
        }
    }

    tree.flush()?;
    Ok(())
}

/// Parse `name:type` where type is `int`, `float` or `char(n)`
fn parse_column(spec: &str) -> CliResult<Column> {
    let (name, ty) = spec
        .split_once(':')
        .ok_or_else(|| CliError::Usage(format!("column '{}' is not name:type", spec)))?;

    let ty = ty.trim().to_ascii_lowercase();
    let column_type = match ty.as_str() {
        "int" => ColumnType::Int,
        "float" => ColumnType::Float,
        _ => ty
            .strip_prefix("char(")
            .and_then(|rest| rest.strip_suffix(')'))
            .and_then(|n| n.parse::<u8>().ok())
            .map(ColumnType::Char)
            .ok_or_else(|| CliError::Usage(format!("unknown column type '{}'", ty)))?,
    };
    Ok(Column::new(name.trim(), column_type))
}

fn parse_record(attr: &Attr, values: &[String]) -> CliResult<Vec<u8>> {
    if values.len() != attr.count() {
        return Err(CliError::Usage(format!(
            "expected {} values, got {}",
            attr.count(),
            values.len()
        )));
    }

    let values = values
        .iter()
        .zip(&attr.columns)
        .map(|(text, column)| Value::parse(text, column.column_type))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(attr.encode_record(&values)?)
}

fn encode_key(attr: &Attr, text: &str) -> CliResult<Vec<u8>> {
    let value = Value::parse(text, attr.key_column().column_type)?;
    Ok(attr.encode_key(&value)?.to_vec())
}

/// Smallest or largest key of the key column's type
fn encode_bound(attr: &Attr, upper: bool) -> CliResult<Vec<u8>> {
    let value = match attr.key_column().column_type {
        ColumnType::Int => Value::Int(if upper { i32::MAX } else { i32::MIN }),
        ColumnType::Float => Value::Float(if upper { f64::INFINITY } else { f64::NEG_INFINITY }),
        ColumnType::Char(n) => {
            let mut field = vec![0u8; FIELD_SIZE];
            if upper {
                field[..n as usize].fill(u8::MAX);
            }
            return Ok(field);
        }
    };
    Ok(attr.encode_key(&value)?.to_vec())
}

fn key_comparator(attr: &Attr) -> fn(&[u8], &[u8], usize) -> std::cmp::Ordering {
    comparator_for(attr.key_column().column_type)
}

fn print_record(attr: &Attr, record: &[u8]) -> CliResult<()> {
    let values = attr.decode_record(record)?;
    let line = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\t");
    println!("{}", line);
    Ok(())
}
