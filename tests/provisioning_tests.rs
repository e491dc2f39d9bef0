//! Account provisioning integration tests: the first-admin rule and the races
//! it must win. The store serializes find/count/insert under one lock, so
//! concurrent first logins cannot mint two admins or duplicate a username.

use anyhow::Result;
use std::sync::{Arc, Barrier};
use tempfile::tempdir;

use keystock::accounts::AccountStore;
use keystock::roles::Role;

#[test]
fn first_login_is_admin_rest_are_users() -> Result<()> {
    let tmp = tempdir()?;
    let store = AccountStore::open(tmp.path().to_str().unwrap());

    let first = store.ensure_account("alice", "pw-a")?;
    assert_eq!(first.role, Role::Admin, "very first account must be admin");
    for name in ["bob", "carol", "dave"] {
        let acct = store.ensure_account(name, "pw")?;
        assert_eq!(acct.role, Role::User, "later account '{}' must be user", name);
    }
    assert_eq!(store.count()?, 4);
    Ok(())
}

#[test]
fn concurrent_first_logins_mint_at_most_one_admin() -> Result<()> {
    let tmp = tempdir()?;
    let store = AccountStore::open(tmp.path().to_str().unwrap());

    let n = 8;
    let barrier = Arc::new(Barrier::new(n));
    let mut handles = Vec::new();
    for i in 0..n {
        let store = store.clone();
        let barrier = barrier.clone();
        handles.push(std::thread::spawn(move || -> Result<()> {
            let username = format!("user{}", i);
            barrier.wait();
            store.ensure_account(&username, "pw")?;
            Ok(())
        }));
    }
    for h in handles {
        h.join().expect("provisioning thread panicked")?;
    }

    assert_eq!(store.count()?, n);
    let mut admins = 0;
    for i in 0..n {
        let acct = store.find(&format!("user{}", i))?.expect("account must exist");
        if acct.role == Role::Admin { admins += 1; }
    }
    assert_eq!(admins, 1, "exactly one of the concurrent first logins may become admin");
    Ok(())
}

#[test]
fn concurrent_logins_for_one_username_insert_once() -> Result<()> {
    let tmp = tempdir()?;
    let store = AccountStore::open(tmp.path().to_str().unwrap());

    let n = 8;
    let barrier = Arc::new(Barrier::new(n));
    let mut handles = Vec::new();
    for _ in 0..n {
        let store = store.clone();
        let barrier = barrier.clone();
        handles.push(std::thread::spawn(move || -> Result<Role> {
            barrier.wait();
            Ok(store.ensure_account("alice", "pw")?.role)
        }));
    }
    let mut roles = Vec::new();
    for h in handles {
        roles.push(h.join().expect("provisioning thread panicked")?);
    }

    assert_eq!(store.count()?, 1, "one username must produce one record");
    assert!(roles.iter().all(|r| *r == Role::Admin), "every caller sees the single stored record");
    Ok(())
}

#[test]
fn accounts_survive_reopen() -> Result<()> {
    let tmp = tempdir()?;
    {
        let store = AccountStore::open(tmp.path().to_str().unwrap());
        store.ensure_account("alice", "pw-a")?;
        store.ensure_account("bob", "pw-b")?;
    }
    let reopened = AccountStore::open(tmp.path().to_str().unwrap());
    assert_eq!(reopened.count()?, 2);
    assert_eq!(reopened.find("alice")?.expect("alice persisted").role, Role::Admin);
    assert_eq!(reopened.find("bob")?.expect("bob persisted").role, Role::User);
    // A login after restart is still not a first login
    assert_eq!(reopened.ensure_account("erin", "pw-e")?.role, Role::User);
    Ok(())
}
