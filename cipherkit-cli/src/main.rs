//! `cipherkit` developer CLI.
//!
//! Opens a database (keyed when `--key` is given), then either runs a SQL
//! script, pages a query's results through a fixed-size result window, or
//! checks the database.
//!
//! Usage:
//!     cipherkit --db app.sqlite exec "CREATE TABLE t (a INTEGER)"
//!     cipherkit --db app.sqlite query "SELECT * FROM t WHERE a > ?1" --arg 3
//!     CIPHERKIT_KEY=<64 hex chars> cipherkit --db secret.sqlite check

use std::path::PathBuf;
use std::sync::Arc;

use cipherkit_db::cipher::{self, cipher_version, integrity_check};
use cipherkit_db::{Database, DatabaseConfig, FillOutcome, Query, QueryArgs, ResultWindow};
use clap::{Parser, Subcommand};
use eyre::{bail, eyre, Result, WrapErr};
use secrecy::SecretBox;

#[derive(Parser, Debug)]
#[command(name = "cipherkit")]
#[command(about = "Page query results out of an (optionally encrypted) SQLite database")]
#[command(version)]
struct Cli {
    /// Database file.
    #[arg(long, env = "CIPHERKIT_DB")]
    db: PathBuf,

    /// 32-byte raw encryption key, hex encoded.
    #[arg(long, env = "CIPHERKIT_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Open the database read-only.
    #[arg(long)]
    read_only: bool,

    /// Include SQL text in debug logs.
    #[arg(long)]
    log_sql: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one or more statements without result rows.
    Exec {
        /// SQL script.
        sql: String,
    },
    /// Page the rows of a query through a result window.
    Query {
        /// SQL text. Placeholders are bound from `--arg` in order.
        sql: String,
        /// Bind argument (repeatable). Use `--null` positions for NULL.
        #[arg(short, long = "arg")]
        args: Vec<String>,
        /// 1-based argument positions to bind as NULL instead.
        #[arg(long = "null")]
        nulls: Vec<usize>,
        /// Index of an OFFSET placeholder the engine pages with.
        #[arg(long)]
        offset_param: Option<usize>,
        /// Window capacity in bytes.
        #[arg(long, default_value_t = 64 * 1024)]
        window_bytes: usize,
        /// Rows read by the first fill.
        #[arg(long, default_value_t = 100)]
        first_page_rows: usize,
    },
    /// Run an integrity check and report the cipher version.
    Check,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let db = open(&cli)?;

    match cli.command {
        Command::Exec { sql } => {
            db.execute_batch(&sql).wrap_err("executing script")?;
            println!("ok ({} rows changed)", db.changes());
        }
        Command::Query {
            sql,
            args,
            nulls,
            offset_param,
            window_bytes,
            first_page_rows,
        } => {
            let args = args
                .into_iter()
                .enumerate()
                .map(|(i, arg)| (!nulls.contains(&(i + 1))).then_some(arg))
                .collect();
            let query = Query::new(&db, &sql, offset_param, QueryArgs::Text(args))
                .wrap_err_with(|| format!("compiling `{sql}`"))?;
            let rows = page(&db, &query, window_bytes, first_page_rows)?;
            println!("({rows} rows)");
        }
        Command::Check => {
            let healthy = integrity_check(&db).wrap_err("integrity check")?;
            let version = cipher_version(&db)?;
            println!("integrity: {}", if healthy { "ok" } else { "FAILED" });
            println!("cipher: {}", version.as_deref().unwrap_or("none"));
            if !healthy {
                bail!("database failed its integrity check");
            }
        }
    }
    Ok(())
}

fn open(cli: &Cli) -> Result<Arc<Database>> {
    let config = DatabaseConfig::default()
        .with_read_only(cli.read_only)
        .with_sql_logging(cli.log_sql);
    match &cli.key {
        Some(key_hex) => {
            let key = parse_key(key_hex)?;
            cipher::open_encrypted(&cli.db, &key, config)
                .wrap_err_with(|| format!("opening encrypted {}", cli.db.display()))
        }
        None => Database::open(&cli.db, config)
            .wrap_err_with(|| format!("opening {}", cli.db.display())),
    }
}

fn parse_key(key_hex: &str) -> Result<SecretBox<[u8; 32]>> {
    let mut key = Box::new([0_u8; 32]);
    hex::decode_to_slice(key_hex.trim(), key.as_mut_slice())
        .map_err(|e| eyre!("key must be 64 hex characters: {e}"))?;
    Ok(SecretBox::new(key))
}

/// Prints every row, refilling the window as the read position moves past
/// it. Returns the number of rows printed.
fn page(db: &Database, query: &Query, window_bytes: usize, first_page_rows: usize) -> Result<usize> {
    {
        let guard = db.lock();
        let columns = query.column_count_locked(&guard)?;
        let names = (0..columns)
            .map(|i| query.column_name_locked(&guard, i))
            .collect::<Result<Vec<_>, _>>()?;
        println!("{}", names.join("\t"));
    }

    let window = ResultWindow::new(window_bytes);
    let mut position = 0;
    loop {
        window.set_start_position(position)?;
        window.set_required_position(position)?;
        match query.fill_window(&window, first_page_rows, 0)? {
            FillOutcome::Filled { rows } => {
                tracing::debug!(position, rows, "window filled");
            }
            FillOutcome::Raced(kind) => bail!("query was closed while paging ({kind:?})"),
        }

        let held = window.row_count()?;
        if held == 0 {
            break;
        }
        for row in position..position + held {
            let fields = window
                .row(row)?
                .ok_or_else(|| eyre!("row {row} missing from window"))?;
            let line = fields
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\t");
            println!("{line}");
        }
        position += held;
    }
    window.close();
    Ok(position)
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_parse_key() {
        let key = parse_key(&"ab".repeat(32)).expect("valid key");
        assert_eq!(key.expose_secret(), &[0xAB_u8; 32]);
        assert!(parse_key("abcd").is_err());
        assert!(parse_key(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_cli_parses_query_arguments() {
        let cli = Cli::try_parse_from([
            "cipherkit", "--db", "x.sqlite", "query", "SELECT ?1, ?2", "-a", "1", "-a", "2",
            "--null", "2",
        ])
        .expect("parse");
        match cli.command {
            Command::Query { args, nulls, window_bytes, .. } => {
                assert_eq!(args, vec!["1", "2"]);
                assert_eq!(nulls, vec![2]);
                assert_eq!(window_bytes, 64 * 1024);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
