//! Identity provider: credential verification, claims and sign-out.
//!
//! Accounts live in the `auth_claims` collection as `{email, emailLower, admin, wl}`.
//! Credentials are HS256 tokens; a sign-out revokes the token id until the process exits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::db::{collections, timestamp_now, DocumentStore, Filter, Query, StoreError};
use crate::errors::AppError;
use crate::models::TeamMember;
use crate::repository::{normalize_email, object};

const AUTH_CLAIMS: &str = collections::AUTH_CLAIMS;

/// A verified bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub uid: String,
    pub email: Option<String>,
    /// Token id, the unit of revocation
    pub token_id: String,
    /// Expiry, seconds since the epoch
    pub expires_at: i64,
}

/// Custom claims attached to an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialClaims {
    #[serde(default)]
    pub admin: bool,
    /// Whitelisted through the team directory
    #[serde(default)]
    pub wl: bool,
}

impl CredentialClaims {
    pub fn grants_access(&self) -> bool {
        self.admin || self.wl
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a bearer token.
    async fn verify(&self, token: &str) -> Result<Credential, AppError>;

    /// Read the credential's current claims, bypassing anything cached in the token.
    async fn refresh_claims(&self, credential: &Credential) -> Result<CredentialClaims, StoreError>;

    /// Revoke the credential.
    async fn sign_out(&self, credential: &Credential);
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    jti: String,
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub uid: String,
    pub expires_at: String,
}

/// Outcome of syncing claims from the team directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClaimsSyncReport {
    pub members: usize,
    pub accounts_created: usize,
    pub whitelisted: usize,
    pub admins: usize,
}

pub struct JwtIdentityProvider {
    store: Arc<dyn DocumentStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl_secs: u64,
    /// Revoked token ids with their expiry; entries go once the token would be rejected anyway
    revoked: RwLock<HashMap<String, i64>>,
}

impl JwtIdentityProvider {
    pub fn new(store: Arc<dyn DocumentStore>, secret: &str, issuer: &str, ttl_secs: u64) -> Self {
        Self {
            store,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            ttl_secs,
            revoked: RwLock::new(HashMap::new()),
        }
    }

    pub fn issue_token(&self, uid: &str, email: Option<&str>) -> Result<IssuedToken, AppError> {
        let now = Utc::now();
        let expires = now + Duration::seconds(self.ttl_secs as i64);
        let claims = TokenClaims {
            sub: uid.to_string(),
            email: email.map(str::to_string),
            jti: uuid::Uuid::new_v4().simple().to_string(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
            iss: self.issuer.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))?;

        Ok(IssuedToken {
            token,
            uid: uid.to_string(),
            expires_at: expires.to_rfc3339(),
        })
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<String>, StoreError> {
        let query = Query::collection(AUTH_CLAIMS)
            .filter(Filter::eq("emailLower", normalize_email(email)))
            .limit(1);
        Ok(self.store.query(&query).await?.into_iter().next().map(|doc| doc.id))
    }

    /// Look up the account for `email`, creating one without claims if absent.
    pub async fn ensure_account(&self, email: &str) -> Result<(String, bool), AppError> {
        if let Some(uid) = self.find_by_email(email).await? {
            return Ok((uid, false));
        }
        let uid = uuid::Uuid::new_v4().simple().to_string();
        let data = object(json!({
            "email": email.trim(),
            "emailLower": normalize_email(email),
            "admin": false,
            "wl": false,
            "updatedAt": timestamp_now(),
        }));
        self.store.create(AUTH_CLAIMS, &uid, data).await?;
        tracing::info!(%uid, "Account created");
        Ok((uid, true))
    }

    pub async fn set_claims(&self, uid: &str, claims: CredentialClaims) -> Result<(), AppError> {
        let data = object(json!({
            "admin": claims.admin,
            "wl": claims.wl,
            "updatedAt": timestamp_now(),
        }));
        self.store.set(AUTH_CLAIMS, uid, data, true).await?;
        tracing::info!(%uid, admin = claims.admin, wl = claims.wl, "Claims updated");
        Ok(())
    }

    /// Give every directory member an account whose claims mirror the record:
    /// `wl` follows `active`, `admin` needs both `active` and the admin role.
    pub async fn sync_from_directory(&self, members: &[TeamMember]) -> Result<ClaimsSyncReport, AppError> {
        let mut report = ClaimsSyncReport {
            members: members.len(),
            ..Default::default()
        };
        for member in members {
            if !member.email_lower.contains('@') {
                continue;
            }
            let (uid, created) = self.ensure_account(&member.email_lower).await?;
            let claims = CredentialClaims {
                admin: member.active && member.is_admin(),
                wl: member.active,
            };
            self.set_claims(&uid, claims).await?;

            report.accounts_created += created as usize;
            report.whitelisted += claims.wl as usize;
            report.admins += claims.admin as usize;
        }
        Ok(report)
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, token: &str) -> Result<Credential, AppError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AppError::Unauthorized("Credential expired".to_string()),
                _ => AppError::Unauthorized(format!("Invalid credential: {}", e)),
            }
        })?;
        let claims = data.claims;

        if self.revoked.read().await.contains_key(&claims.jti) {
            return Err(AppError::Unauthorized("Credential revoked".to_string()));
        }

        Ok(Credential {
            uid: claims.sub,
            email: claims.email,
            token_id: claims.jti,
            expires_at: claims.exp,
        })
    }

    async fn refresh_claims(&self, credential: &Credential) -> Result<CredentialClaims, StoreError> {
        match self.store.get(AUTH_CLAIMS, &credential.uid).await? {
            Some(doc) => doc.decode(),
            None => Ok(CredentialClaims::default()),
        }
    }

    async fn sign_out(&self, credential: &Credential) {
        let now = Utc::now().timestamp();
        let mut revoked = self.revoked.write().await;
        revoked.retain(|_, expires_at| *expires_at > now);
        revoked.insert(credential.token_id.clone(), credential.expires_at);
        tracing::info!(uid = %credential.uid, revoked = revoked.len(), "Credential revoked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::open_store;
    use crate::models::Role;

    async fn provider() -> (tempfile::TempDir, JwtIdentityProvider) {
        let (dir, store) = open_store().await;
        (dir, JwtIdentityProvider::new(store, "test-secret", "beraber-test", 60))
    }

    #[tokio::test]
    async fn test_issue_verify_and_revoke() {
        let (_dir, identity) = provider().await;
        let issued = identity.issue_token("u1", Some("a@b.com")).unwrap();

        let credential = identity.verify(&issued.token).await.unwrap();
        assert_eq!(credential.uid, "u1");
        assert_eq!(credential.email.as_deref(), Some("a@b.com"));

        identity.sign_out(&credential).await;
        assert!(matches!(
            identity.verify(&issued.token).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(identity.verify("garbage").await.is_err());
    }

    #[tokio::test]
    async fn test_expired_revocations_are_pruned() {
        let (_dir, identity) = provider().await;
        let stale = Credential {
            uid: "u1".into(),
            email: None,
            token_id: "old".into(),
            expires_at: Utc::now().timestamp() - 10,
        };
        identity.sign_out(&stale).await;

        let issued = identity.issue_token("u1", None).unwrap();
        let live = identity.verify(&issued.token).await.unwrap();
        identity.sign_out(&live).await;

        let revoked = identity.revoked.read().await;
        assert_eq!(revoked.len(), 1);
        assert!(revoked.contains_key(&live.token_id));
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let (_dir, store) = open_store().await;
        let other = JwtIdentityProvider::new(store.clone(), "test-secret", "someone-else", 60);
        let identity = JwtIdentityProvider::new(store, "test-secret", "beraber-test", 60);

        let issued = other.issue_token("u1", None).unwrap();
        assert!(identity.verify(&issued.token).await.is_err());
    }

    #[tokio::test]
    async fn test_sync_from_directory() {
        let (_dir, identity) = provider().await;
        let member = |email: &str, roles: Vec<Role>, active: bool| TeamMember {
            id: email.to_string(),
            email: email.to_string(),
            email_lower: email.to_string(),
            name: None,
            phone: None,
            roles,
            active,
            created_at: None,
            updated_at: None,
            created_by: None,
        };
        let members = vec![
            member("boss@b.com", vec![Role::Admin], true),
            member("ed@b.com", vec![Role::Editor], true),
            member("gone@b.com", vec![Role::Admin], false),
        ];

        let report = identity.sync_from_directory(&members).await.unwrap();
        assert_eq!(report.accounts_created, 3);
        assert_eq!(report.whitelisted, 2);
        assert_eq!(report.admins, 1);

        let uid = identity.find_by_email("GONE@b.com").await.unwrap().unwrap();
        let credential = Credential {
            uid,
            email: None,
            token_id: "t".into(),
            expires_at: 0,
        };
        let claims = identity.refresh_claims(&credential).await.unwrap();
        assert!(!claims.grants_access());

        let again = identity.sync_from_directory(&members).await.unwrap();
        assert_eq!(again.accounts_created, 0);
    }
}
