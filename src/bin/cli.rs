//! tabletdb CLI Client
//!
//! Command-line interface for interacting with a tablet server.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tabletdb::{
    AsyncClientInitializer, BackoffPolicy, Client, ClientBuilder, DataType, Mutation, Schema, Table,
    TabletError, Value,
};

/// tabletdb CLI
#[derive(Parser, Debug)]
#[command(name = "tabletdb-cli")]
#[command(about = "CLI for the tabletdb tablet server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7051")]
    server: String,

    /// Give up connecting after this many seconds
    #[arg(long, default_value = "10")]
    connect_timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the server
    Ping,

    /// Create a table
    CreateTable {
        name: String,

        /// Comma-separated `name:type[:key|:null]`, key columns first,
        /// e.g. `id:int64:key,name:string:null`
        #[arg(short, long)]
        columns: String,
    },

    /// Insert a row: `col=value ...`
    Insert { table: String, cells: Vec<String> },

    /// Update a row: key columns plus the columns to change
    Update { table: String, cells: Vec<String> },

    /// Delete a row by key: `key_col=value ...`
    Delete { table: String, cells: Vec<String> },

    /// Print every row of a table
    Scan {
        table: String,

        #[arg(short, long)]
        batch_rows: Option<usize>,
    },
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> tabletdb::Result<()> {
    let builder = ClientBuilder::new()
        .add_server_addr(&args.server)
        .default_timeout_ms(args.connect_timeout_secs * 1000);
    let backoff = BackoffPolicy {
        initial_ms: 100,
        max_ms: 1_000,
        multiplier: 2.0,
        max_attempts: Some(5),
    };
    let initializer = AsyncClientInitializer::start(builder, backoff);
    let client = match initializer
        .get_future()
        .wait_timeout(Duration::from_secs(args.connect_timeout_secs))
    {
        Some(result) => result?,
        None => {
            initializer.shutdown();
            return Err(TabletError::TimedOut(format!("could not connect to {}", args.server)));
        }
    };

    match args.command {
        Commands::Ping => {
            client.ping()?;
            println!("PONG");
        }
        Commands::CreateTable { name, columns } => {
            let table = client.create_table(&name, parse_schema(&columns)?)?;
            println!("created table '{}' ({} columns)", table.name(), table.schema().num_columns());
        }
        Commands::Insert { table, cells } => {
            let table = client.open_table(&table)?;
            apply_one(&client, fill(table.new_insert(), &table, &cells)?)?;
            println!("OK");
        }
        Commands::Update { table, cells } => {
            let table = client.open_table(&table)?;
            apply_one(&client, fill(table.new_update(), &table, &cells)?)?;
            println!("OK");
        }
        Commands::Delete { table, cells } => {
            let table = client.open_table(&table)?;
            apply_one(&client, fill(table.new_delete(), &table, &cells)?)?;
            println!("OK");
        }
        Commands::Scan { table, batch_rows } => {
            let table = client.open_table(&table)?;
            let mut scanner = client.new_scanner(&table);
            if let Some(n) = batch_rows {
                scanner.set_batch_rows(n);
            }
            scanner.open()?;
            let mut total = 0usize;
            while scanner.has_more() {
                for row in scanner.next_batch()? {
                    let cells: Vec<String> = table
                        .schema()
                        .columns()
                        .iter()
                        .zip(row.values())
                        .map(|(c, v)| format!("{}={}", c.name, v))
                        .collect();
                    println!("{}", cells.join(" "));
                    total += 1;
                }
            }
            println!("({} rows)", total);
        }
    }
    Ok(())
}

fn apply_one(client: &Client, mutation: Mutation) -> tabletdb::Result<()> {
    let mut session = client.new_session();
    session.apply(mutation)?;
    let flushed = session.close();
    if let Some(row_error) = session.pending_errors().into_iter().next() {
        return Err(row_error.error);
    }
    flushed
}

fn fill(mut mutation: Mutation, table: &Table, cells: &[String]) -> tabletdb::Result<Mutation> {
    for cell in cells {
        let (column, raw) = cell
            .split_once('=')
            .ok_or_else(|| TabletError::Config(format!("expected col=value, got '{}'", cell)))?;
        let idx = table
            .schema()
            .find_column(column)
            .ok_or_else(|| TabletError::SchemaMismatch(format!("unknown column '{}'", column)))?;
        let data_type = table.schema().columns()[idx].data_type;
        mutation.mutable_row().set_idx(idx, parse_value(data_type, raw)?)?;
    }
    Ok(mutation)
}

fn parse_value(data_type: DataType, raw: &str) -> tabletdb::Result<Value> {
    if raw.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    let bad = || TabletError::SchemaMismatch(format!("'{}' is not a valid {}", raw, data_type));
    Ok(match data_type {
        DataType::Bool => Value::Bool(raw.parse().map_err(|_| bad())?),
        DataType::Int32 => Value::Int32(raw.parse().map_err(|_| bad())?),
        DataType::Int64 => Value::Int64(raw.parse().map_err(|_| bad())?),
        DataType::String => Value::String(raw.to_string()),
        DataType::Binary => Value::Binary(raw.as_bytes().to_vec()),
    })
}

fn parse_schema(columns_arg: &str) -> tabletdb::Result<Schema> {
    let mut builder = Schema::builder();
    for column in columns_arg.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let parts: Vec<&str> = column.split(':').collect();
        let (name, ty) = match parts.as_slice() {
            [name, ty, ..] => (*name, *ty),
            _ => {
                return Err(TabletError::Config(format!(
                    "expected name:type, got '{}'",
                    column
                )))
            }
        };
        let data_type = match ty.to_ascii_lowercase().as_str() {
            "bool" => DataType::Bool,
            "int32" => DataType::Int32,
            "int64" => DataType::Int64,
            "string" => DataType::String,
            "binary" => DataType::Binary,
            other => return Err(TabletError::Config(format!("unknown type '{}'", other))),
        };
        builder = match parts.get(2).copied() {
            Some("key") => builder.key_column(name, data_type),
            Some("null") => builder.column(name, data_type, true),
            _ => builder.column(name, data_type, false),
        };
    }
    builder.build()
}
