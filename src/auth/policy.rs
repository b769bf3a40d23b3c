//! The policy-evaluation seam and the built-in rule set.
//!
//! [`TokenAuthority`](super::TokenAuthority) never decides anything itself.
//! It builds a JSON input document, names a rule inside a policy module, and
//! asks a [`PolicyEvaluator`] for the decision bound to [`DECISION`]. Any
//! engine that can answer such a query plugs in here; [`RulePolicy`] is the
//! in-process implementation the service ships with.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::Role;

/// Variable every query binds its decision to.
pub const DECISION: &str = "x";

/// Module holding the token validity rule.
pub const TOKEN_VALIDATION: &str = "token_validation";
/// Rule deciding whether a verified token may be used at all.
pub const RULE_VALID: &str = "valid";

/// Module holding the route authorization rules.
pub const AUTHORIZATION: &str = "authorization";
pub const RULE_ADMIN_ONLY: &str = "rule_admin_only";
pub const RULE_USER_ONLY: &str = "rule_user_only";
pub const RULE_ADMIN_OR_SUBJECT: &str = "rule_admin_or_subject";
pub const RULE_ANY: &str = "rule_any";

/// Names one rule inside one policy module.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PolicyQuery<'a> {
    pub module: &'a str,
    pub rule: &'a str,
}

impl<'a> PolicyQuery<'a> {
    pub fn new(module: &'a str, rule: &'a str) -> Self {
        Self { module, rule }
    }
}

/// `x = data.<module>.<rule>`
impl std::fmt::Display for PolicyQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{DECISION} = data.{}.{}", self.module, self.rule)
    }
}

/// Variable bindings of one result set.
pub type Bindings = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("preparing query {0}: unknown rule")]
    UnknownRule(String),
    #[error("evaluating query: {0}")]
    Eval(String),
}

/// A declarative rule engine.
///
/// Returns every result set produced by the query. An empty list means the
/// rule was undefined for this input.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(&self, query: &PolicyQuery<'_>, input: &Value)
        -> Result<Vec<Bindings>, PolicyError>;
}

// ── Built-in rules ────────────────────────────────────────────────────────────

/// Native implementation of the service's rules.
///
/// | Query | Decision |
/// |---|---|
/// | `token_validation.valid` | issuer matches, `exp > now`, roles non-empty and all known |
/// | `authorization.rule_admin_only` | roles contain `ADMIN` |
/// | `authorization.rule_user_only` | roles contain `USER` |
/// | `authorization.rule_admin_or_subject` | `ADMIN`, or `USER` and `subject == user_id` |
/// | `authorization.rule_any` | `ADMIN` or `USER` |
///
/// A rule whose input lacks the fields it reads is undefined: it produces no
/// result set rather than `false`.
#[derive(Clone, Debug)]
pub struct RulePolicy {
    issuer: String,
}

impl RulePolicy {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self { issuer: issuer.into() }
    }

    fn token_valid(&self, input: &Value) -> Option<bool> {
        let token = input.get("token")?;
        let iss = token.get("iss")?.as_str()?;
        let exp = token.get("exp")?.as_i64()?;
        let now = input.get("now")?.as_i64()?;
        let roles = roles(token)?;

        let known = !roles.is_empty() && roles.iter().all(|r| Role::parse(r).is_ok());
        Some(iss == self.issuer && exp > now && known)
    }

    fn authorized(rule: &str, input: &Value) -> Option<bool> {
        let roles = roles(input)?;
        let has = |role: Role| roles.iter().any(|r| *r == role.as_str());

        match rule {
            RULE_ADMIN_ONLY => Some(has(Role::Admin)),
            RULE_USER_ONLY => Some(has(Role::User)),
            RULE_ANY => Some(has(Role::Admin) || has(Role::User)),
            RULE_ADMIN_OR_SUBJECT => {
                if has(Role::Admin) {
                    return Some(true);
                }
                let subject = input.get("subject")?.as_str()?;
                let owner = input.get("user_id")?.as_str()?;
                Some(has(Role::User) && subject == owner)
            }
            _ => None,
        }
    }
}

fn roles(doc: &Value) -> Option<Vec<&str>> {
    doc.get("roles")?.as_array()?.iter().map(Value::as_str).collect()
}

#[async_trait]
impl PolicyEvaluator for RulePolicy {
    async fn evaluate(
        &self,
        query: &PolicyQuery<'_>,
        input: &Value,
    ) -> Result<Vec<Bindings>, PolicyError> {
        let decision = match (query.module, query.rule) {
            (TOKEN_VALIDATION, RULE_VALID) => self.token_valid(input),
            (
                AUTHORIZATION,
                rule @ (RULE_ADMIN_ONLY | RULE_USER_ONLY | RULE_ADMIN_OR_SUBJECT | RULE_ANY),
            ) => Self::authorized(rule, input),
            _ => return Err(PolicyError::UnknownRule(query.to_string())),
        };

        Ok(decision
            .map(|allowed| {
                let mut bindings = Bindings::new();
                bindings.insert(DECISION.to_owned(), Value::Bool(allowed));
                vec![bindings]
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn decide(policy: &RulePolicy, module: &str, rule: &str, input: Value) -> Option<bool> {
        let results = policy.evaluate(&PolicyQuery::new(module, rule), &input).await.unwrap();
        results.first().and_then(|b| b.get(DECISION)).and_then(Value::as_bool)
    }

    #[test]
    fn query_renders_like_a_rego_query() {
        let q = PolicyQuery::new(AUTHORIZATION, RULE_ADMIN_ONLY);
        assert_eq!(q.to_string(), "x = data.authorization.rule_admin_only");
    }

    #[tokio::test]
    async fn token_validity() {
        let p = RulePolicy::new("auth-service");
        let valid = |iss: &str, exp: i64, roles: Value| {
            let token = json!({ "iss": iss, "exp": exp, "roles": roles });
            let input = json!({ "token": token, "now": 1_000 });
            decide(&p, TOKEN_VALIDATION, RULE_VALID, input)
        };

        assert_eq!(valid("auth-service", 1_001, json!(["USER"])).await, Some(true));
        assert_eq!(valid("someone-else", 1_001, json!(["USER"])).await, Some(false));
        assert_eq!(valid("auth-service", 1_000, json!(["USER"])).await, Some(false));
        assert_eq!(valid("auth-service", 1_001, json!(["ROOT"])).await, Some(false));
        assert_eq!(valid("auth-service", 1_001, json!([])).await, Some(false));
    }

    #[tokio::test]
    async fn missing_input_is_undefined_not_false() {
        let p = RulePolicy::new("auth-service");
        assert_eq!(decide(&p, TOKEN_VALIDATION, RULE_VALID, json!({})).await, None);
        let not_a_list = json!({ "roles": "ADMIN" });
        assert_eq!(decide(&p, AUTHORIZATION, RULE_ADMIN_ONLY, not_a_list).await, None);
    }

    #[tokio::test]
    async fn admin_or_subject() {
        let p = RulePolicy::new("auth-service");
        let allowed = |roles: Value, subject: &str, owner: &str| {
            let input = json!({ "roles": roles, "subject": subject, "user_id": owner });
            decide(&p, AUTHORIZATION, RULE_ADMIN_OR_SUBJECT, input)
        };

        assert_eq!(allowed(json!(["ADMIN"]), "a", "b").await, Some(true));
        assert_eq!(allowed(json!(["USER"]), "a", "a").await, Some(true));
        assert_eq!(allowed(json!(["USER"]), "a", "b").await, Some(false));
        assert_eq!(allowed(json!([]), "a", "a").await, Some(false));
    }

    #[tokio::test]
    async fn role_rules() {
        let p = RulePolicy::new("auth-service");
        let admin = json!({ "roles": ["ADMIN"] });
        let user = json!({ "roles": ["USER"] });

        assert_eq!(decide(&p, AUTHORIZATION, RULE_ADMIN_ONLY, admin.clone()).await, Some(true));
        assert_eq!(decide(&p, AUTHORIZATION, RULE_ADMIN_ONLY, user.clone()).await, Some(false));
        assert_eq!(decide(&p, AUTHORIZATION, RULE_USER_ONLY, admin.clone()).await, Some(false));
        assert_eq!(decide(&p, AUTHORIZATION, RULE_USER_ONLY, user.clone()).await, Some(true));
        assert_eq!(decide(&p, AUTHORIZATION, RULE_ANY, admin).await, Some(true));
        assert_eq!(decide(&p, AUTHORIZATION, RULE_ANY, user).await, Some(true));
    }

    #[tokio::test]
    async fn unknown_rule_is_an_error() {
        let p = RulePolicy::new("auth-service");
        let err = p
            .evaluate(&PolicyQuery::new(AUTHORIZATION, "rule_everyone"), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::UnknownRule(_)));
    }
}
