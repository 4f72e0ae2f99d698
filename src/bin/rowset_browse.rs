use std::collections::BTreeSet;
use std::sync::Arc;

use rowset::{CancelToken, RowSet, SqliteProvider};
use tracing_subscriber::EnvFilter;

const USAGE: &str =
    "usage: rowset-browse <db-path> <select-command> [--fetch-size N] [--pk NAME] [--rows a,b,c]";

struct Args {
    db_path: String,
    command: String,
    fetch_size: Option<usize>,
    pk: Option<String>,
    rows: Vec<i64>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);
    let mut positional = Vec::new();
    let mut fetch_size = None;
    let mut pk = None;
    let mut rows = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fetch-size" => {
                let value = args.next().ok_or("--fetch-size needs a value")?;
                let parsed = value
                    .parse::<usize>()
                    .map_err(|_| format!("invalid fetch size: {}", value))?;
                fetch_size = Some(parsed);
            }
            "--pk" => {
                pk = Some(args.next().ok_or("--pk needs a value")?);
            }
            "--rows" => {
                let value = args.next().ok_or("--rows needs a value")?;
                for part in value.split(',').filter(|p| !p.trim().is_empty()) {
                    let row = part
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| format!("invalid row: {}", part))?;
                    rows.push(row);
                }
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    match (positional.next(), positional.next(), positional.next()) {
        (Some(db_path), Some(command), None) => Ok(Args {
            db_path,
            command,
            fetch_size,
            pk,
            rows,
        }),
        _ => Err(USAGE.to_string()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rowset=info,warn")),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };

    let provider = Arc::new(SqliteProvider::open(&args.db_path)?);
    let rows = RowSet::new(provider);
    rows.set_command(&args.command)?;
    if let Some(pk) = &args.pk {
        rows.set_primary_key_name(Some(pk))?;
    }
    if let Some(fetch_size) = args.fetch_size {
        rows.set_fetch_size(fetch_size)?;
    }
    rows.execute(&CancelToken::new())?;

    let row_count = rows.row_count()?;
    let columns = rows.column_names()?;
    println!("{} rows, key: {}", row_count, rows.primary_key_name().as_deref().unwrap_or("<position>"));
    println!("row\t{}", columns.join("\t"));

    let requested: BTreeSet<i64> = if args.rows.is_empty() {
        // First and last row of every batch boundary the jump crosses.
        let fetch_size = rows.fetch_size() as i64;
        let last = row_count as i64;
        [1, fetch_size, fetch_size + 1, last]
            .into_iter()
            .filter(|r| *r >= 1 && *r <= last)
            .collect()
    } else {
        args.rows.into_iter().collect()
    };

    for row in requested {
        if !rows.absolute(row)? {
            println!("{}\t<no such row>", row);
            continue;
        }
        let mut cells = Vec::with_capacity(columns.len());
        for column in 1..=columns.len() {
            cells.push(rows.get_cell(column)?.to_string());
        }
        println!("{}\t{}", rows.row(), cells.join("\t"));
    }
    rows.close();
    Ok(())
}
