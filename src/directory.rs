//! Directory-backed credential verification.
//! -----------------------------------------
//! Login passwords are never checked locally; they go to the external LDAP
//! directory. The flow is two binds on two short-lived connections: a service
//! bind that searches the user subtree for exactly one entry matching the
//! username attribute, then a fresh connection bound as that entry's DN with
//! the supplied password. Every failure branch logs its own reason but the
//! interface collapses to verified/rejected, so callers cannot leak which
//! step failed.

use async_trait::async_trait;
use ldap3::{ldap_escape, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DirectoryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    Rejected,
}

/// Seam between the login route and the directory, so tests can substitute a
/// canned verifier and never need a live LDAP server.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> VerifyOutcome;
}

pub struct LdapVerifier {
    cfg: DirectoryConfig,
}

fn drive_conn(conn: LdapConnAsync) {
    tokio::spawn(async move {
        if let Err(e) = conn.drive().await {
            warn!(target: "keystock", "directory connection terminated: {}", e);
        }
    });
}

impl LdapVerifier {
    pub fn new(cfg: DirectoryConfig) -> LdapVerifier {
        LdapVerifier { cfg }
    }

    fn settings(&self) -> LdapConnSettings {
        LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(self.cfg.timeout_secs))
            .set_no_tls_verify(!self.cfg.tls_validate)
    }

    async fn verify_inner(&self, username: &str, password: &str) -> anyhow::Result<bool> {
        let cfg = &self.cfg;
        if !cfg.tls_validate {
            // Trust downgrade for self-signed deployments; keep it loud
            warn!(target: "keystock", "directory: TLS certificate validation is disabled");
        }

        let (conn, mut ldap) = LdapConnAsync::with_settings(self.settings(), &cfg.server_uri).await?;
        drive_conn(conn);
        if let Err(e) = ldap.simple_bind(&cfg.bind_dn, &cfg.bind_password).await.and_then(|r| r.success()) {
            warn!(target: "keystock", "directory: service bind as '{}' failed: {}", cfg.bind_dn, e);
            let _ = ldap.unbind().await;
            return Ok(false);
        }

        let filter = format!("({}={})", cfg.username_attr, ldap_escape(username));
        debug!(target: "keystock", "directory: searching '{}' with filter {}", cfg.user_base_dn, filter);
        let search = ldap
            .search(&cfg.user_base_dn, Scope::Subtree, &filter, vec!["cn", cfg.username_attr.as_str()])
            .await
            .and_then(|r| r.success());
        let entries = match search {
            Ok((entries, _)) => entries,
            Err(e) => {
                warn!(target: "keystock", "directory: search failed: {}", e);
                let _ = ldap.unbind().await;
                return Ok(false);
            }
        };
        if entries.is_empty() {
            debug!(target: "keystock", "directory: no entry for '{}' under '{}'", username, cfg.user_base_dn);
            let _ = ldap.unbind().await;
            return Ok(false);
        }
        if entries.len() > 1 {
            warn!(target: "keystock", "directory: {} entries match '{}'; refusing ambiguous login", entries.len(), username);
            let _ = ldap.unbind().await;
            return Ok(false);
        }
        let Some(entry) = entries.into_iter().next() else {
            let _ = ldap.unbind().await;
            return Ok(false);
        };
        let user_dn = SearchEntry::construct(entry).dn;
        let _ = ldap.unbind().await;

        // Second connection: bind as the discovered entry with the supplied
        // password. Success here is the verification result.
        let (user_conn, mut user_ldap) = LdapConnAsync::with_settings(self.settings(), &cfg.server_uri).await?;
        drive_conn(user_conn);
        let bound = user_ldap.simple_bind(&user_dn, password).await.and_then(|r| r.success());
        let _ = user_ldap.unbind().await;
        match bound {
            Ok(_) => {
                debug!(target: "keystock", "directory: verified '{}' as '{}'", username, user_dn);
                Ok(true)
            }
            Err(e) => {
                debug!(target: "keystock", "directory: password bind for '{}' failed: {}", username, e);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl CredentialVerifier for LdapVerifier {
    async fn verify(&self, username: &str, password: &str) -> VerifyOutcome {
        // An empty password would turn the user bind into an anonymous bind
        if username.is_empty() || password.is_empty() {
            debug!(target: "keystock", "directory: rejecting empty username or password");
            return VerifyOutcome::Rejected;
        }
        match self.verify_inner(username, password).await {
            Ok(true) => VerifyOutcome::Verified,
            Ok(false) => VerifyOutcome::Rejected,
            Err(e) => {
                warn!(target: "keystock", "directory: verification attempt for '{}' errored: {}", username, e);
                VerifyOutcome::Rejected
            }
        }
    }
}

/// In-memory verifier used by tests and offline development.
pub struct FixedVerifier {
    users: HashMap<String, String>,
}

impl FixedVerifier {
    pub fn new<I, S>(pairs: I) -> FixedVerifier
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let users = pairs.into_iter().map(|(u, p)| (u.into(), p.into())).collect();
        FixedVerifier { users }
    }
}

#[async_trait]
impl CredentialVerifier for FixedVerifier {
    async fn verify(&self, username: &str, password: &str) -> VerifyOutcome {
        if username.is_empty() || password.is_empty() {
            return VerifyOutcome::Rejected;
        }
        match self.users.get(username) {
            Some(expected) if expected == password => VerifyOutcome::Verified,
            _ => VerifyOutcome::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_verifier_checks_exact_pairs() {
        let v = FixedVerifier::new([("alice", "pw-a"), ("bob", "pw-b")]);
        assert_eq!(v.verify("alice", "pw-a").await, VerifyOutcome::Verified);
        assert_eq!(v.verify("alice", "pw-b").await, VerifyOutcome::Rejected);
        assert_eq!(v.verify("mallory", "pw-a").await, VerifyOutcome::Rejected);
        assert_eq!(v.verify("", "").await, VerifyOutcome::Rejected);
        assert_eq!(v.verify("alice", "").await, VerifyOutcome::Rejected);
    }

    #[tokio::test]
    async fn ldap_verifier_rejects_empty_credentials_without_connecting() {
        // Points at a closed port; must reject before any network activity
        let v = LdapVerifier::new(DirectoryConfig {
            server_uri: "ldap://127.0.0.1:1".into(),
            tls_validate: true,
            timeout_secs: 1,
            bind_dn: "cn=admin,dc=example,dc=com".into(),
            bind_password: "unused".into(),
            user_base_dn: "ou=people,dc=example,dc=com".into(),
            username_attr: "uid".into(),
        });
        assert_eq!(v.verify("alice", "").await, VerifyOutcome::Rejected);
        assert_eq!(v.verify("", "pw").await, VerifyOutcome::Rejected);
    }

    #[tokio::test]
    async fn ldap_verifier_fails_closed_when_unreachable() {
        let v = LdapVerifier::new(DirectoryConfig {
            server_uri: "ldap://127.0.0.1:1".into(),
            tls_validate: true,
            timeout_secs: 1,
            bind_dn: "cn=admin,dc=example,dc=com".into(),
            bind_password: "unused".into(),
            user_base_dn: "ou=people,dc=example,dc=com".into(),
            username_attr: "uid".into(),
        });
        assert_eq!(v.verify("alice", "pw").await, VerifyOutcome::Rejected);
    }
}
