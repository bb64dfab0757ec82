//! rating-cli: headless operator tool for the rating engine.
//!
//! Usage:
//!   rating-cli create-table --file table.json --db rates.db
//!   rating-cli list --product disability_ltd --db rates.db
//!   rating-cli activate --table 3 --db rates.db
//!   rating-cli deactivate --table 3 --db rates.db
//!   rating-cli preview --table 3 --resource entries --file entries.csv
//!   rating-cli import --table 3 --resource factors --file factors.csv [--delimiter ';'] --db rates.db
//!   rating-cli clone --table 3 --db rates.db
//!   rating-cli delete --table 3 --db rates.db
//!   rating-cli rate --request request.json [--as-of 2026-01-01] [--user u-17]
//!   rating-cli runs --scenario scn-42
//!   rating-cli --ipc-mode --db rates.db
//!
//! Commands that write rate tables require --db. Without it the others run
//! against a throwaway in-memory database.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rating_core::{
    clone::clone_table,
    config::RatingConfig,
    import::{RawRows, ResourceKind, TableImporter},
    model::NewRateTable,
    request::RatingRequest,
    service::RatingService,
    store::RateStore,
    types::TableId,
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Rate {
        request:        RatingRequest,
        #[serde(default)]
        acting_user_id: Option<String>,
    },
    GetRun {
        run_id: String,
    },
    ScenarioRuns {
        scenario_id: String,
    },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let command = if ipc_mode { None } else { args.get(1).map(String::as_str) };
    let db = database(&args, command)?;
    let data_dir = flag(&args, "--data-dir").unwrap_or("./data");

    let config = match RatingConfig::load(data_dir) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("{e}; using built-in defaults");
            RatingConfig::default()
        }
    };

    // In-memory runs use a named shared-memory database so the audit
    // recorder's connection sees the same tables as the store.
    let mut service = match db {
        Some(path) => RatingService::open(path, config)?,
        None => {
            let store = RateStore::shared_memory(&format!("rating_{}", std::process::id()))?;
            RatingService::from_store(store, config)?
        }
    };

    if ipc_mode {
        return run_ipc_loop(&service);
    }

    let Some(command) = command else {
        bail!("missing command; see the usage notes at the top of tools/src/main.rs");
    };

    match command {
        "create-table" => {
            let path = required(&args, "--file")?;
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            let new: NewRateTable =
                serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;
            let table = service.store_mut().create_table(&new)?;
            print_json(&table)?;
        }
        "list" => {
            let product = required(&args, "--product")?;
            for t in service.store().list_tables(product)? {
                println!(
                    "  {:>4}  {:<16} {:<24} active={:<5} carrier={} rev={}",
                    t.id,
                    t.version,
                    t.name,
                    t.is_active,
                    t.carrier_id.as_deref().unwrap_or("-"),
                    t.revision
                );
            }
        }
        "activate" | "deactivate" => {
            let table_id = table_arg(&args)?;
            let table = service
                .store_mut()
                .set_active(table_id, command == "activate")?;
            print_json(&table)?;
        }
        "preview" => {
            let table_id = table_arg(&args)?;
            let (kind, rows) = import_args(&args)?;
            let importer = TableImporter::new(service.config());
            let preview = importer.preview(service.store(), table_id, &rows, kind)?;
            print_json(&preview)?;
        }
        "import" => {
            let table_id = table_arg(&args)?;
            let (kind, rows) = import_args(&args)?;
            let importer = TableImporter::new(service.config());
            let summary = importer.import(service.store_mut(), table_id, &rows, kind, None)?;
            print_json(&summary)?;
        }
        "clone" => {
            let table_id = table_arg(&args)?;
            let copy = clone_table(service.store_mut(), table_id)?;
            print_json(&copy)?;
        }
        "delete" => {
            let table_id = table_arg(&args)?;
            service.store_mut().delete_table(table_id)?;
            println!("deleted rate table {table_id}");
        }
        "rate" => {
            let path = required(&args, "--request")?;
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            let mut request: RatingRequest =
                serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;
            if let Some(as_of) = flag(&args, "--as-of") {
                request.as_of = Some(
                    NaiveDate::parse_from_str(as_of, "%Y-%m-%d")
                        .with_context(|| format!("--as-of {as_of}"))?,
                );
            }
            let quote = service.rate(&request, flag(&args, "--user"))?;
            print_json(&quote.outcome)?;
            eprintln!("recorded run {} ({})", quote.run.run_id, quote.run.status);
        }
        "runs" => {
            let scenario = required(&args, "--scenario")?;
            print_json(&service.recorder().runs_for_scenario(scenario)?)?;
        }
        other => bail!("unknown command '{other}'"),
    }

    Ok(())
}

fn run_ipc_loop(service: &RatingService) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Rate { request, acting_user_id } => {
                match service.rate(&request, acting_user_id.as_deref()) {
                    Ok(quote) => serde_json::json!({
                        "run_id": quote.run.run_id,
                        "result": quote.outcome,
                    }),
                    Err(e) => error_reply(&e),
                }
            }
            IpcCommand::GetRun { run_id } => match service.recorder().get(&run_id) {
                Ok(run) => serde_json::json!({ "run": run }),
                Err(e) => error_reply(&e),
            },
            IpcCommand::ScenarioRuns { scenario_id } => {
                match service.recorder().runs_for_scenario(&scenario_id) {
                    Ok(runs) => serde_json::json!({ "runs": runs }),
                    Err(e) => error_reply(&e),
                }
            }
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

/// Commands whose effect would vanish with an in-memory database.
const PERSISTENT_COMMANDS: &[&str] =
    &["create-table", "activate", "deactivate", "import", "clone", "delete"];

/// The `--db` path, or `None` for an in-memory database.
fn database<'a>(args: &'a [String], command: Option<&str>) -> Result<Option<&'a str>> {
    let db = flag(args, "--db").filter(|p| *p != ":memory:");
    match (db, command) {
        (Some(path), _) => Ok(Some(path)),
        (None, Some(cmd)) if PERSISTENT_COMMANDS.contains(&cmd) => {
            bail!("{cmd} writes rate tables and needs --db <path>; an in-memory database would discard them")
        }
        (None, _) => {
            log::warn!("no --db given; using an in-memory database that is discarded on exit");
            Ok(None)
        }
    }
}

fn error_reply(e: &rating_core::error::RatingError) -> serde_json::Value {
    serde_json::json!({
        "error": e.to_string(),
        "user_facing": e.is_user_facing(),
    })
}

fn import_args(args: &[String]) -> Result<(ResourceKind, RawRows)> {
    let kind: ResourceKind = required(args, "--resource")?.parse()?;
    let path = required(args, "--file")?;
    let delimiter = match flag(args, "--delimiter") {
        Some(d) if d.len() == 1 => d.as_bytes()[0],
        Some(d) => bail!("--delimiter must be a single byte, got '{d}'"),
        None => b',',
    };
    let rows = RawRows::from_path(path, delimiter).with_context(|| format!("reading {path}"))?;
    Ok((kind, rows))
}

fn table_arg(args: &[String]) -> Result<TableId> {
    let raw = required(args, "--table")?;
    raw.parse()
        .with_context(|| format!("--table expects a numeric id, got '{raw}'"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == name)
        .map(|w| w[1].as_str())
}

fn required<'a>(args: &'a [String], name: &str) -> Result<&'a str> {
    flag(args, name).with_context(|| format!("missing {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn table_writes_require_a_database_path() {
        for &cmd in PERSISTENT_COMMANDS {
            let args = argv(&["rating-cli", cmd, "--table", "3"]);
            let err = database(&args, Some(cmd)).unwrap_err();
            assert!(err.to_string().contains("--db"), "{cmd}: {err}");

            let args = argv(&["rating-cli", cmd, "--table", "3", "--db", ":memory:"]);
            assert!(database(&args, Some(cmd)).is_err(), "{cmd} accepted :memory:");
        }
    }

    #[test]
    fn read_commands_fall_back_to_memory() {
        let args = argv(&["rating-cli", "rate", "--request", "r.json"]);
        assert_eq!(database(&args, Some("rate")).unwrap(), None);
        let args = argv(&["rating-cli", "--ipc-mode"]);
        assert_eq!(database(&args, None).unwrap(), None);
    }

    #[test]
    fn explicit_path_is_used_for_any_command() {
        let args = argv(&["rating-cli", "clone", "--table", "3", "--db", "rates.db"]);
        assert_eq!(database(&args, Some("clone")).unwrap(), Some("rates.db"));
    }
}
