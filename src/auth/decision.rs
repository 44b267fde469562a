//! Admission decision for the admin panel.
//!
//! A caller is admitted when any of three independent signals says so. The signals are
//! read in a fixed order and reading stops at the first positive one; the outcome is a
//! pure function of what was read.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::identity::{Credential, IdentityProvider};
use crate::models::UserRole;
use crate::repository::{UsersRepo, WhitelistResolver};

/// One source of admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSignal {
    /// Active record in the team directory
    DirectoryWhitelist,
    /// `users/{uid}.role == "admin"`
    ProfileRole,
    /// `admin` or `wl` claim on the refreshed credential
    Claims,
}

impl AuthSignal {
    pub const ORDER: [AuthSignal; 3] = [
        AuthSignal::DirectoryWhitelist,
        AuthSignal::ProfileRole,
        AuthSignal::Claims,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Not every signal has been read yet
    Pending,
    Granted,
    Denied,
}

/// Fold signal readings into a decision.
///
/// Without a credential the answer is always `Denied`. With one, any positive reading
/// grants; all signals read negative denies; anything short of that is still pending.
pub fn reduce(credential_present: bool, readings: &[(AuthSignal, bool)]) -> Decision {
    if !credential_present {
        return Decision::Denied;
    }
    if readings.iter().any(|(_, granted)| *granted) {
        return Decision::Granted;
    }
    let all_read = AuthSignal::ORDER
        .iter()
        .all(|signal| readings.iter().any(|(read, _)| read == signal));
    if all_read {
        Decision::Denied
    } else {
        Decision::Pending
    }
}

/// Reads the signals for a credential.
#[derive(Clone)]
pub struct Gatekeeper {
    whitelist: WhitelistResolver,
    users: UsersRepo,
    identity: Arc<dyn IdentityProvider>,
    claims_retries: u32,
    claims_backoff: Duration,
}

impl Gatekeeper {
    pub fn new(
        whitelist: WhitelistResolver,
        users: UsersRepo,
        identity: Arc<dyn IdentityProvider>,
        claims_retries: u32,
        claims_backoff: Duration,
    ) -> Self {
        Self {
            whitelist,
            users,
            identity,
            claims_retries,
            claims_backoff,
        }
    }

    pub async fn evaluate(&self, credential: Option<&Credential>) -> Decision {
        let Some(credential) = credential else {
            return reduce(false, &[]);
        };

        let mut readings = Vec::with_capacity(AuthSignal::ORDER.len());
        for signal in AuthSignal::ORDER {
            let granted = self.read(signal, credential).await;
            readings.push((signal, granted));
            if granted {
                tracing::debug!(uid = %credential.uid, ?signal, "Admission granted");
                break;
            }
        }

        let decision = reduce(true, &readings);
        if decision == Decision::Denied {
            tracing::info!(uid = %credential.uid, "Admission denied, no signal granted access");
        }
        decision
    }

    async fn read(&self, signal: AuthSignal, credential: &Credential) -> bool {
        match signal {
            AuthSignal::DirectoryWhitelist => match &credential.email {
                Some(email) => self
                    .whitelist
                    .resolve(email)
                    .await
                    .is_some_and(|member| member.active),
                None => false,
            },
            AuthSignal::ProfileRole => match self.users.get_role(&credential.uid).await {
                Ok(role) => role == Some(UserRole::Admin),
                Err(e) => {
                    tracing::warn!(uid = %credential.uid, error = %e, "Profile role read failed");
                    false
                }
            },
            AuthSignal::Claims => self.read_claims(credential).await,
        }
    }

    /// Claims propagate with a delay after being set, so a negative read is retried.
    async fn read_claims(&self, credential: &Credential) -> bool {
        for attempt in 0..=self.claims_retries {
            match self.identity.refresh_claims(credential).await {
                Ok(claims) if claims.grants_access() => return true,
                Ok(_) => {}
                Err(e) => tracing::warn!(uid = %credential.uid, attempt, error = %e, "Claims refresh failed"),
            }
            if attempt < self.claims_retries {
                tokio::time::sleep(self.claims_backoff).await;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::{CredentialClaims, JwtIdentityProvider};
    use crate::db::test_support::{fields, open_store};
    use crate::db::{collections, DocumentStore, StoreError};
    use crate::errors::AppError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Claims that turn positive only after a number of reads.
    struct LateClaims {
        reads: AtomicU32,
        positive_after: u32,
    }

    #[async_trait]
    impl IdentityProvider for LateClaims {
        async fn verify(&self, _token: &str) -> Result<Credential, AppError> {
            Err(AppError::Unauthorized("unused".into()))
        }

        async fn refresh_claims(&self, _credential: &Credential) -> Result<CredentialClaims, StoreError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CredentialClaims {
                admin: false,
                wl: n > self.positive_after,
            })
        }

        async fn sign_out(&self, _credential: &Credential) {}
    }

    fn credential(uid: &str, email: Option<&str>) -> Credential {
        Credential {
            uid: uid.to_string(),
            email: email.map(str::to_string),
            token_id: "jti".to_string(),
            expires_at: i64::MAX,
        }
    }

    async fn gatekeeper(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Gatekeeper {
        Gatekeeper::new(
            WhitelistResolver::new(store.clone()),
            UsersRepo::new(store),
            identity,
            3,
            Duration::from_millis(1),
        )
    }

    #[test]
    fn test_reduce() {
        use AuthSignal::*;
        assert_eq!(reduce(false, &[(DirectoryWhitelist, true)]), Decision::Denied);
        assert_eq!(reduce(true, &[(DirectoryWhitelist, true)]), Decision::Granted);
        assert_eq!(reduce(true, &[(DirectoryWhitelist, false)]), Decision::Pending);
        assert_eq!(
            reduce(true, &[(DirectoryWhitelist, false), (ProfileRole, false), (Claims, false)]),
            Decision::Denied
        );
        assert_eq!(
            reduce(true, &[(Claims, false), (ProfileRole, true), (DirectoryWhitelist, false)]),
            Decision::Granted
        );
    }

    #[tokio::test]
    async fn test_profile_role_grants() {
        let (_dir, store) = open_store().await;
        store
            .set(collections::USERS, "u1", fields(json!({ "role": "admin" })), false)
            .await
            .unwrap();
        let identity = Arc::new(JwtIdentityProvider::new(store.clone(), "s", "i", 60));
        let gate = gatekeeper(store, identity).await;

        assert_eq!(gate.evaluate(Some(&credential("u1", None))).await, Decision::Granted);
        assert_eq!(gate.evaluate(Some(&credential("u2", None))).await, Decision::Denied);
        assert_eq!(gate.evaluate(None).await, Decision::Denied);
    }

    #[tokio::test]
    async fn test_claims_retried_before_denial() {
        let (_dir, store) = open_store().await;
        let late = Arc::new(LateClaims {
            reads: AtomicU32::new(0),
            positive_after: 2,
        });
        let gate = gatekeeper(store.clone(), late.clone()).await;
        assert_eq!(gate.evaluate(Some(&credential("u1", None))).await, Decision::Granted);
        assert_eq!(late.reads.load(Ordering::SeqCst), 3);

        let never = Arc::new(LateClaims {
            reads: AtomicU32::new(0),
            positive_after: u32::MAX,
        });
        let gate = gatekeeper(store, never.clone()).await;
        assert_eq!(gate.evaluate(Some(&credential("u1", None))).await, Decision::Denied);
        assert_eq!(never.reads.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_repeated_evaluation_is_stable() {
        let (_dir, store) = open_store().await;
        store
            .set(
                collections::TEAM_MEMBERS,
                "a@b.com",
                fields(json!({ "email": "a@b.com", "emailLower": "a@b.com", "active": true })),
                false,
            )
            .await
            .unwrap();
        let identity = Arc::new(JwtIdentityProvider::new(store.clone(), "s", "i", 60));
        let gate = gatekeeper(store, identity).await;

        let cred = credential("u1", Some("A@b.com"));
        for _ in 0..3 {
            assert_eq!(gate.evaluate(Some(&cred)).await, Decision::Granted);
        }
    }
}
