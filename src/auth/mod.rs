//! Token issuing, authentication and authorization.
//!
//! [`TokenAuthority`] checks a caller in two stages:
//!
//! 1. **Cryptographic**: the bearer token's signature is verified with the
//!    public key named by the `kid` in its header.
//! 2. **Declarative**: the verified claims are handed to a
//!    [`PolicyEvaluator`], which decides whether the token is still valid
//!    (issuer, expiry, roles) and, later, whether the caller may use a route.
//!
//! Every policy answer other than a boolean `true` is a denial.

pub mod policy;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::context::{Context, ContextError};
use crate::keystore::{KeyLookup, KeyStoreError};

pub use policy::{
    Bindings, PolicyError, PolicyEvaluator, PolicyQuery, RULE_ADMIN_ONLY, RULE_ADMIN_OR_SUBJECT,
    RULE_ANY, RULE_USER_ONLY, RulePolicy,
};

const BEARER: &str = "Bearer ";

// ── Roles ─────────────────────────────────────────────────────────────────────

/// The closed set of roles a token may carry.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid role: {0:?}")]
pub struct InvalidRole(pub String);

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::User => "USER",
        }
    }

    /// Case-sensitive: `"ADMIN"` parses, `"admin"` does not.
    pub fn parse(value: &str) -> Result<Self, InvalidRole> {
        match value {
            "ADMIN" => Ok(Self::Admin),
            "USER" => Ok(Self::User),
            other => Err(InvalidRole(other.to_owned())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn parse_roles<S: AsRef<str>>(labels: &[S]) -> Result<Vec<Role>, InvalidRole> {
    labels.iter().map(|l| Role::parse(l.as_ref())).collect()
}

pub fn encode_roles(roles: &[Role]) -> Vec<String> {
    roles.iter().map(|r| r.as_str().to_owned()).collect()
}

// ── Claims ────────────────────────────────────────────────────────────────────

/// Payload of an issued token.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Claims {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(rename = "iss", default)]
    pub issuer: String,
    /// Seconds since the Unix epoch.
    #[serde(rename = "exp")]
    pub expires_at: i64,
    /// Seconds since the Unix epoch.
    #[serde(rename = "iat", default)]
    pub issued_at: i64,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Claims {
    /// Claims issued now and expiring after `ttl`. The issuer is filled in by
    /// [`TokenAuthority::generate_token`].
    pub fn new<R>(subject: impl Into<String>, roles: R, ttl: Duration) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
    {
        let now = now_unix();
        Self {
            subject: subject.into(),
            issuer: String::new(),
            expires_at: now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
            issued_at: now,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.iter().any(|r| r == role.as_str())
    }
}

fn now_unix() -> i64 {
    i64::try_from(jsonwebtoken::get_current_timestamp()).unwrap_or(i64::MAX)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why authentication or authorization failed. Only ever logged: callers of
/// the HTTP surface see one generic `401` whatever the variant.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("expected authorization header format: Bearer <token>")]
    MissingBearer,
    #[error("key id not found in the token header")]
    MissingKeyId,
    #[error("key lookup: {0}")]
    Key(#[from] KeyStoreError),
    #[error("token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("policy evaluation interrupted: {0}")]
    Interrupted(#[from] ContextError),
    #[error("no policy decision")]
    NoDecision,
    #[error("access denied by policy")]
    Denied,
}

// ── TokenAuthority ────────────────────────────────────────────────────────────

/// Issues and validates tokens. Shared behind an `Arc` by the security
/// middleware.
pub struct TokenAuthority {
    keys: Arc<dyn KeyLookup>,
    policy: Arc<dyn PolicyEvaluator>,
    algorithm: Algorithm,
    issuer: String,
    active_kid: String,
}

impl TokenAuthority {
    pub fn new(
        keys: Arc<dyn KeyLookup>,
        policy: Arc<dyn PolicyEvaluator>,
        algorithm: Algorithm,
        issuer: impl Into<String>,
        active_kid: impl Into<String>,
    ) -> Self {
        Self { keys, policy, algorithm, issuer: issuer.into(), active_kid: active_kid.into() }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    /// Signs `claims` with the active key. The issuer is always overwritten
    /// with this authority's.
    pub fn generate_token(&self, mut claims: Claims) -> Result<String, AuthError> {
        claims.issuer = self.issuer.clone();

        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.active_kid.clone());

        let key = self.keys.private_key(&self.active_kid)?;
        Ok(encode(&header, &claims, key)?)
    }

    /// Verifies a `Bearer <token>` header value and asks the policy whether
    /// the token is valid now.
    pub async fn authenticate(&self, ctx: &Context, bearer: &str) -> Result<Claims, AuthError> {
        let token = bearer.strip_prefix(BEARER).ok_or(AuthError::MissingBearer)?;

        let header = decode_header(token)?;
        let kid = header.kid.ok_or(AuthError::MissingKeyId)?;
        let key = self.keys.public_key(&kid)?;

        // Expiry is judged by the policy, not the decoder.
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, key, &validation)?.claims;

        let input = json!({
            "token": {
                "iss": claims.issuer,
                "exp": claims.expires_at,
                "roles": claims.roles,
            },
            "now": now_unix(),
        });
        self.decide(ctx, PolicyQuery::new(policy::TOKEN_VALIDATION, policy::RULE_VALID), &input)
            .await?;

        debug!(kid = %kid, subject = %claims.subject, "token authenticated");
        Ok(claims)
    }

    /// Asks the policy whether `claims` may act on a resource owned by
    /// `resource_owner` under `rule`.
    pub async fn authorize(
        &self,
        ctx: &Context,
        claims: &Claims,
        resource_owner: &str,
        rule: &str,
    ) -> Result<(), AuthError> {
        let input = json!({
            "roles": claims.roles,
            "subject": claims.subject,
            "user_id": resource_owner,
        });
        self.decide(ctx, PolicyQuery::new(policy::AUTHORIZATION, rule), &input).await
    }

    async fn decide(
        &self,
        ctx: &Context,
        query: PolicyQuery<'_>,
        input: &Value,
    ) -> Result<(), AuthError> {
        let results = ctx.run(self.policy.evaluate(&query, input)).await??;
        decision(&results)
    }
}

impl fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("active_kid", &self.active_kid)
            .finish_non_exhaustive()
    }
}

/// `Ok` only for a first result set binding [`policy::DECISION`] to `true`.
fn decision(results: &[Bindings]) -> Result<(), AuthError> {
    match results.first().and_then(|b| b.get(policy::DECISION)) {
        Some(Value::Bool(true)) => Ok(()),
        Some(_) => Err(AuthError::Denied),
        None => Err(AuthError::NoDecision),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::keystore::{DirSource, KeyStore};

    const ISSUER: &str = "auth-service";

    fn keystore() -> (Arc<KeyStore>, String) {
        let mut ks = KeyStore::new();
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/keys");
        let active = ks.load(&DirSource::new(dir)).unwrap();
        (Arc::new(ks), active)
    }

    fn authority_with(policy: Arc<dyn PolicyEvaluator>) -> TokenAuthority {
        let (ks, active) = keystore();
        TokenAuthority::new(ks, policy, Algorithm::RS256, ISSUER, active)
    }

    fn authority() -> TokenAuthority {
        authority_with(Arc::new(RulePolicy::new(ISSUER)))
    }

    /// Answers every query with a fixed list of result sets.
    struct Fixed(Vec<Bindings>);

    #[async_trait]
    impl PolicyEvaluator for Fixed {
        async fn evaluate(
            &self,
            _: &PolicyQuery<'_>,
            _: &Value,
        ) -> Result<Vec<Bindings>, PolicyError> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl PolicyEvaluator for Failing {
        async fn evaluate(
            &self,
            _: &PolicyQuery<'_>,
            _: &Value,
        ) -> Result<Vec<Bindings>, PolicyError> {
            Err(PolicyError::Eval("boom".into()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl PolicyEvaluator for Hanging {
        async fn evaluate(
            &self,
            _: &PolicyQuery<'_>,
            _: &Value,
        ) -> Result<Vec<Bindings>, PolicyError> {
            std::future::pending::<Result<Vec<Bindings>, PolicyError>>().await
        }
    }

    const MINUTE: Duration = Duration::from_secs(60);

    fn bearer(token: &str) -> String {
        format!("Bearer {token}")
    }

    fn binding(value: Value) -> Vec<Bindings> {
        let mut b = Bindings::new();
        b.insert(policy::DECISION.to_owned(), value);
        vec![b]
    }

    #[tokio::test]
    async fn round_trip_overwrites_issuer() {
        let auth = authority();
        let subject = Uuid::new_v4().to_string();
        let mut claims = Claims::new(&subject, ["ADMIN"], Duration::from_secs(120));
        claims.issuer = "forged".into();

        let token = auth.generate_token(claims.clone()).unwrap();
        let parsed = auth.authenticate(&Context::new(), &bearer(&token)).await.unwrap();

        assert_eq!(parsed.subject, subject);
        assert_eq!(parsed.issuer, ISSUER);
        assert_eq!(parsed.roles, claims.roles);
        assert_eq!(parsed.expires_at, claims.expires_at);
        assert_eq!(parsed.issued_at, claims.issued_at);
    }

    #[tokio::test]
    async fn token_header_carries_active_kid() {
        let auth = authority();
        let token = auth.generate_token(Claims::new("s", ["USER"], MINUTE)).unwrap();
        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some(auth.active_kid()));
        assert_eq!(header.alg, Algorithm::RS256);
    }

    #[tokio::test]
    async fn bearer_prefix_is_required() {
        let auth = authority();
        let token = auth.generate_token(Claims::new("s", ["USER"], MINUTE)).unwrap();

        let err = auth.authenticate(&Context::new(), &token).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingBearer));
        let err = auth.authenticate(&Context::new(), &format!("bearer {token}")).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingBearer));
    }

    #[tokio::test]
    async fn token_without_kid_is_rejected() {
        let (ks, active) = keystore();
        let claims = Claims::new("s", ["USER"], MINUTE);
        let key = ks.private_key(&active).unwrap();
        let token = encode(&Header::new(Algorithm::RS256), &claims, key).unwrap();

        let err = authority().authenticate(&Context::new(), &bearer(&token)).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingKeyId));
    }

    /// Header `{"alg":"RS256","kid":123}`, a valid payload, junk signature.
    const NUMERIC_KID: &str = "eyJhbGciOiJSUzI1NiIsImtpZCI6MTIzfQ.\
        eyJzdWIiOiJzIiwiZXhwIjo0MTAyNDQ0ODAwfQ.c2ln";

    #[tokio::test]
    async fn non_string_kid_is_rejected() {
        let err = authority()
            .authenticate(&Context::new(), &bearer(NUMERIC_KID))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Token(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unknown_kid_is_rejected() {
        let (ks, active) = keystore();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("retired".into());
        let claims = Claims::new("s", ["USER"], MINUTE);
        let token = encode(&header, &claims, ks.private_key(&active).unwrap()).unwrap();

        let err = authority().authenticate(&Context::new(), &bearer(&token)).await.unwrap_err();
        assert!(matches!(err, AuthError::Key(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn signature_from_another_key_is_rejected() {
        let (ks, active) = keystore();
        let spare = "0f4c8e6a-3d2b-4f8e-9c71-2a5d6b8e9f10";
        assert_ne!(active, spare);

        // Signed with the spare key but claiming to be the active one.
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(active);
        let claims = Claims::new("s", ["USER"], MINUTE);
        let token = encode(&header, &claims, ks.private_key(spare).unwrap()).unwrap();

        let err = authority().authenticate(&Context::new(), &bearer(&token)).await.unwrap_err();
        assert!(matches!(err, AuthError::Token(_)));
    }

    #[tokio::test]
    async fn expired_token_is_denied_by_policy() {
        let auth = authority();
        let mut claims = Claims::new("s", ["USER"], MINUTE);
        claims.expires_at = claims.issued_at - 10;
        let token = auth.generate_token(claims).unwrap();

        let err = auth.authenticate(&Context::new(), &bearer(&token)).await.unwrap_err();
        assert!(matches!(err, AuthError::Denied));
    }

    async fn denial(policy: Arc<dyn PolicyEvaluator>) -> AuthError {
        let token = authority().generate_token(Claims::new("s", ["USER"], MINUTE)).unwrap();
        authority_with(policy).authenticate(&Context::new(), &bearer(&token)).await.unwrap_err()
    }

    #[tokio::test]
    async fn anything_but_true_is_a_denial() {
        let fixed = |results: Vec<Bindings>| Arc::new(Fixed(results));
        assert!(matches!(denial(fixed(vec![])).await, AuthError::NoDecision));
        assert!(matches!(denial(fixed(vec![Bindings::new()])).await, AuthError::NoDecision));
        assert!(matches!(denial(fixed(binding(Value::Bool(false)))).await, AuthError::Denied));
        assert!(matches!(denial(fixed(binding(json!("true")))).await, AuthError::Denied));
        assert!(matches!(denial(fixed(binding(json!(1)))).await, AuthError::Denied));
        assert!(matches!(denial(Arc::new(Failing)).await, AuthError::Policy(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_policy_degrades_to_deny() {
        let auth = authority_with(Arc::new(Hanging));
        let claims = Claims::new("s", ["ADMIN"], MINUTE);
        let ctx = Context::new().with_timeout(Duration::from_secs(5));

        let err = auth.authorize(&ctx, &claims, "s", RULE_ADMIN_ONLY).await.unwrap_err();
        assert!(matches!(err, AuthError::Interrupted(ContextError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn authorize_by_role() {
        let auth = authority();
        let ctx = Context::new();
        let admin = Claims::new(Uuid::new_v4().to_string(), ["ADMIN"], MINUTE);
        let user = Claims::new(Uuid::new_v4().to_string(), ["USER"], MINUTE);
        let other = Uuid::new_v4().to_string();

        assert!(auth.authorize(&ctx, &admin, &other, RULE_ADMIN_ONLY).await.is_ok());
        assert!(auth.authorize(&ctx, &user, &other, RULE_USER_ONLY).await.is_ok());
        assert!(auth.authorize(&ctx, &user, &other, RULE_ADMIN_ONLY).await.is_err());
        assert!(auth.authorize(&ctx, &admin, &other, RULE_USER_ONLY).await.is_err());
    }

    #[tokio::test]
    async fn authorize_admin_or_resource_owner() {
        let auth = authority();
        let ctx = Context::new();
        let admin = Claims::new(Uuid::new_v4().to_string(), ["ADMIN"], MINUTE);
        let user = Claims::new(Uuid::new_v4().to_string(), ["USER"], MINUTE);
        let nobody = Claims::new(Uuid::new_v4().to_string(), Vec::<String>::new(), MINUTE);
        let other = Uuid::new_v4().to_string();

        assert!(auth.authorize(&ctx, &admin, &other, RULE_ADMIN_OR_SUBJECT).await.is_ok());
        assert!(auth.authorize(&ctx, &user, &user.subject, RULE_ADMIN_OR_SUBJECT).await.is_ok());
        assert!(auth.authorize(&ctx, &user, &other, RULE_ADMIN_OR_SUBJECT).await.is_err());
        let denied = auth.authorize(&ctx, &nobody, &nobody.subject, RULE_ADMIN_OR_SUBJECT).await;
        assert!(denied.is_err());
    }

    #[test]
    fn roles_parse_against_the_known_table() {
        assert_eq!(parse_roles(&["ADMIN", "USER"]).unwrap(), vec![Role::Admin, Role::User]);
        assert!(parse_roles(&["admin"]).is_err());
        assert_eq!(encode_roles(&[Role::User]), vec!["USER".to_owned()]);
        assert!(Claims::new("s", ["ADMIN"], Duration::ZERO).has_role(Role::Admin));
    }
}
