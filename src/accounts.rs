//! Account records and provisioning.
//! --------------------------------
//! Accounts live in a single Parquet file under the data root. The store is a
//! shared handle over a mutex; every operation is a whole read-modify-write of
//! the file under that lock, which is also what makes `ensure_account`'s
//! find/count/insert a single critical section: the first account ever created
//! gets `admin` exactly once, and a username cannot be inserted twice.

use anyhow::{anyhow, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use parking_lot::Mutex;
use password_hash::{PasswordHash, SaltString};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::roles::Role;

/// A provisioned account. The stored Argon2 verifier is deliberately not part
/// of this view; verification goes through [`AccountStore::verify_local`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub role: Role,
    pub created: String,
}

pub struct AccountsInner {
    path: PathBuf,
}

/// Shared handle to the account store. Clones share one mutex.
#[derive(Clone)]
pub struct AccountStore(pub Arc<Mutex<AccountsInner>>);

fn mk_accounts_df() -> DataFrame {
    let usernames: Series = Series::new("username".into(), Vec::<String>::new());
    let roles: Series = Series::new("role".into(), Vec::<String>::new());
    let hashes: Series = Series::new("password_hash".into(), Vec::<String>::new());
    let created: Series = Series::new("created".into(), Vec::<String>::new());
    DataFrame::new(vec![usernames.into(), roles.into(), hashes.into(), created.into()]).unwrap()
}

fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

fn verify_phc(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

fn read_accounts(path: &Path) -> Result<DataFrame> {
    if !path.exists() { return Ok(mk_accounts_df()); }
    let file = std::fs::File::open(path)?;
    let df = ParquetReader::new(file).finish()?;
    Ok(df)
}

fn write_accounts(path: &Path, mut df: DataFrame) -> Result<()> {
    if let Some(dir) = path.parent() { std::fs::create_dir_all(dir).ok(); }
    let mut f = std::fs::File::create(path)?;
    ParquetWriter::new(&mut f).finish(&mut df)?;
    Ok(())
}

fn str_at(df: &DataFrame, col: &str, i: usize) -> Result<String> {
    match df.column(col)?.get(i)? {
        AnyValue::String(s) => Ok(s.to_string()),
        AnyValue::StringOwned(s) => Ok(s.to_string()),
        other => Err(anyhow!("unexpected value in column '{}': {:?}", col, other)),
    }
}

fn account_at(df: &DataFrame, i: usize) -> Result<Account> {
    // An unknown stored role maps to guest, which no role set accepts
    let role = Role::parse(&str_at(df, "role", i)?).unwrap_or(Role::Guest);
    Ok(Account {
        username: str_at(df, "username", i)?,
        role,
        created: str_at(df, "created", i)?,
    })
}

fn find_row(df: &DataFrame, username: &str) -> Result<Option<usize>> {
    for i in 0..df.height() {
        let uname = df.column("username")?.get(i)?;
        let matches = match uname {
            AnyValue::String(s) => s == username,
            AnyValue::StringOwned(ref s) => s.as_str() == username,
            _ => false,
        };
        if matches { return Ok(Some(i)); }
    }
    Ok(None)
}

fn append_row(path: &Path, df: DataFrame, username: &str, role: Role, phc: String) -> Result<Account> {
    let created = Utc::now().to_rfc3339();
    let new = DataFrame::new(vec![
        Series::new("username".into(), vec![username.to_string()]).into(),
        Series::new("role".into(), vec![role.as_str().to_string()]).into(),
        Series::new("password_hash".into(), vec![phc]).into(),
        Series::new("created".into(), vec![created.clone()]).into(),
    ])?;
    if df.height() == 0 { write_accounts(path, new)?; } else { let stacked = df.vstack(&new)?; write_accounts(path, stacked)?; }
    Ok(Account { username: username.to_string(), role, created })
}

impl AccountStore {
    pub fn open(data_root: &str) -> AccountStore {
        let path = Path::new(data_root).join("accounts.parquet");
        AccountStore(Arc::new(Mutex::new(AccountsInner { path })))
    }

    pub fn find(&self, username: &str) -> Result<Option<Account>> {
        let inner = self.0.lock();
        let df = read_accounts(&inner.path)?;
        match find_row(&df, username)? {
            Some(i) => Ok(Some(account_at(&df, i)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self) -> Result<usize> {
        let inner = self.0.lock();
        let df = read_accounts(&inner.path)?;
        Ok(df.height())
    }

    /// Idempotent provisioning after a successful directory verification.
    /// The very first account ever created is admin; everyone after is user.
    /// Find, count and insert all happen under the store lock so concurrent
    /// first logins cannot both become admin or duplicate a username.
    pub fn ensure_account(&self, username: &str, password: &str) -> Result<Account> {
        let inner = self.0.lock();
        let df = read_accounts(&inner.path)?;
        if let Some(i) = find_row(&df, username)? {
            return account_at(&df, i);
        }
        let role = if df.height() == 0 { Role::Admin } else { Role::User };
        let phc = hash_password(password)?;
        append_row(&inner.path, df, username, role, phc)
    }

    /// Bootstrap-only insert of an admin account. Returns false (and changes
    /// nothing) when the username already exists.
    pub fn insert_admin(&self, username: &str, password: &str) -> Result<bool> {
        let inner = self.0.lock();
        let df = read_accounts(&inner.path)?;
        if find_row(&df, username)?.is_some() { return Ok(false); }
        let phc = hash_password(password)?;
        append_row(&inner.path, df, username, Role::Admin, phc)?;
        Ok(true)
    }

    /// Check a password against the locally stored verifier. The directory is
    /// the authority at login time; this exists for offline tooling and tests.
    pub fn verify_local(&self, username: &str, password: &str) -> Result<bool> {
        let inner = self.0.lock();
        let df = read_accounts(&inner.path)?;
        let Some(i) = find_row(&df, username)? else { return Ok(false); };
        let phc = str_at(&df, "password_hash", i)?;
        Ok(verify_phc(&phc, password))
    }
}
