//! CLI for exercising the table B-tree directly.
//!
//! Usage:
//!   btree_cli <db_path> put <rowid> <value>
//!   btree_cli <db_path> get <rowid>
//!   btree_cli <db_path> delete <rowid>
//!   btree_cli <db_path> scan [start] [end]
//!   btree_cli <db_path> stats
//!   btree_cli <db_path> bulk_insert <count>

use btree_core::{Config, Db};
use std::env;
use std::process::exit;

fn parse_rowid(s: &str, usage: &str) -> u64 {
    match s.parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("ERROR: rowid must be a u64");
            eprintln!("{}", usage);
            exit(1);
        }
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: btree_cli <db_path> <command> [args...]");
        eprintln!("Commands:");
        eprintln!("  put <rowid> <value>   - Insert or update a row");
        eprintln!("  get <rowid>           - Get the value for a rowid");
        eprintln!("  delete <rowid>        - Delete a row");
        eprintln!("  scan [start] [end]    - Scan rows in rowid range");
        eprintln!("  stats                 - Show database statistics");
        eprintln!("  bulk_insert <count>   - Insert count test rows");
        exit(1);
    }

    let db_path = &args[1];
    let command = &args[2];

    let config = Config::new(db_path);
    let db = match Db::open(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: Failed to open database: {}", e);
            exit(1);
        }
    };

    match command.as_str() {
        "put" => {
            if args.len() < 5 {
                eprintln!("Usage: btree_cli <db_path> put <rowid> <value>");
                exit(1);
            }
            let rowid = parse_rowid(&args[3], "Usage: btree_cli <db_path> put <rowid> <value>");
            let value = &args[4];

            match db.put(rowid, value.as_bytes()) {
                Ok(()) => println!("OK"),
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            }
        }

        "get" => {
            if args.len() < 4 {
                eprintln!("Usage: btree_cli <db_path> get <rowid>");
                exit(1);
            }
            let rowid = parse_rowid(&args[3], "Usage: btree_cli <db_path> get <rowid>");

            match db.get(rowid) {
                Ok(Some(value)) => match String::from_utf8(value) {
                    Ok(s) => println!("{}", s),
                    Err(_) => println!("<binary data>"),
                },
                Ok(None) => println!("NOT_FOUND"),
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            }
        }

        "delete" => {
            if args.len() < 4 {
                eprintln!("Usage: btree_cli <db_path> delete <rowid>");
                exit(1);
            }
            let rowid = parse_rowid(&args[3], "Usage: btree_cli <db_path> delete <rowid>");

            match db.delete(rowid) {
                Ok(true) => println!("DELETED"),
                Ok(false) => println!("NOT_FOUND"),
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            }
        }

        "scan" => {
            let start = args.get(3).map(|s| parse_rowid(s, "Usage: btree_cli <db_path> scan [start] [end]"));
            let end = args.get(4).map(|s| parse_rowid(s, "Usage: btree_cli <db_path> scan [start] [end]"));

            match db.range(start, end) {
                Ok(results) => {
                    println!("COUNT: {}", results.len());
                    for (rowid, value) in results {
                        let value_str = String::from_utf8_lossy(&value);
                        println!("{} -> {}", rowid, value_str);
                    }
                }
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            }
        }

        "stats" => {
            let stats = db.stats();
            println!("page_count: {}", stats.page_count);
            println!("buffer_pool_size: {}", stats.buffer_pool_size);
            println!("tree_height: {}", stats.tree_height);
        }

        "bulk_insert" => {
            if args.len() < 4 {
                eprintln!("Usage: btree_cli <db_path> bulk_insert <count>");
                exit(1);
            }
            let count: u64 = match args[3].parse() {
                Ok(n) => n,
                Err(_) => {
                    eprintln!("ERROR: Invalid count");
                    exit(1);
                }
            };

            let start = std::time::Instant::now();
            for i in 0..count {
                let value = format!("value_{}", i);
                if let Err(e) = db.put(i, value.as_bytes()) {
                    eprintln!("ERROR at {}: {}", i, e);
                    exit(1);
                }
            }
            let elapsed = start.elapsed();

            if let Err(e) = db.flush() {
                eprintln!("ERROR flushing: {}", e);
                exit(1);
            }

            let ops_per_sec = count as f64 / elapsed.as_secs_f64();
            println!("INSERTED: {}", count);
            println!("TIME_MS: {}", elapsed.as_millis());
            println!("OPS_PER_SEC: {:.0}", ops_per_sec);
        }

        _ => {
            eprintln!("Unknown command: {}", command);
            exit(1);
        }
    }

    if let Err(e) = db.flush() {
        eprintln!("Warning: Failed to flush: {}", e);
    }
}
