//!
//! keystock admin bootstrap
//! ------------------------
//! Inserts an admin account directly into the account store, bypassing the
//! directory. Intended for first-run provisioning on a fresh data root or for
//! recovering access when the directory is unavailable.

use anyhow::Result;
use std::env;

use keystock::accounts::AccountStore;

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn parse_value_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag
            && i + 1 < args.len() {
                return Some(args[i + 1].clone());
            }
        i += 1;
    }
    None
}

fn usage() {
    println!("keystock admin bootstrap\n\nUSAGE:\n  keystock_add_user [--data-root PATH] USERNAME [PASSWORD]\n\nARGS:\n  USERNAME            Account to create with the admin role\n  PASSWORD            Local verifier password (default: admin123)\n\nOPTIONS:\n  --data-root PATH    Data root folder (env: KEYSTOCK_DATA_ROOT, default data)\n");
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        usage();
        return Ok(());
    }

    let data_root = parse_value_arg(&args, "--data-root")
        .or_else(|| env::var("KEYSTOCK_DATA_ROOT").ok())
        .unwrap_or_else(|| "data".to_string());

    // Positional arguments: everything that is not a flag or a flag's value
    let mut positional: Vec<&String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--data-root" { i += 2; continue; }
        positional.push(&args[i]);
        i += 1;
    }
    let Some(username) = positional.first().map(|s| s.as_str()) else {
        usage();
        anyhow::bail!("missing USERNAME argument");
    };
    let password = positional.get(1).map(|s| s.as_str()).unwrap_or("admin123");

    let store = AccountStore::open(&data_root);
    if store.insert_admin(username, password)? {
        println!("Admin '{}' added under '{}'", username, data_root);
        if password == "admin123" {
            println!("NOTE: default password in effect; change it in the directory before exposing the service");
        }
    } else {
        println!("User already exists: {}", username);
    }
    Ok(())
}
