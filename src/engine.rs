/* keygate/src/engine.rs

API key authentication state machine.

Outcomes for one request:
- NoResult: header absent, without values, or with an empty first value.
  The engine has no opinion; another mechanism may still authenticate.
- Success: the first header value matched a stored key. The ticket carries a
  principal with a Name claim (consumer) and one Role claim per granted role.
- Fail: a credential was presented but rejected (unknown key, unreadable
  header bytes, or a repository error).

Challenge (401) and forbidden (403) responses are rendered through the
ResponseNegotiator so the body follows the caller's Accept header.

*/

use crate::config::ApiKeyOptions;
use crate::negotiate::ResponseNegotiator;
use crate::record::ApiKeyRecord;
use crate::store::ApiKeyRepository;
use actix_web::http::{header, StatusCode};
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub const NOT_AUTHORIZED_DETAIL: &str = "You are not authorized to view this resource";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    Name,
    Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: ClaimType, value: impl Into<String>) -> Self {
        Self {
            claim_type,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimsIdentity {
    pub authentication_type: String,
    pub claims: Vec<Claim>,
}

impl ClaimsIdentity {
    /// An identity without an authentication type is anonymous.
    pub fn is_authenticated(&self) -> bool {
        !self.authentication_type.is_empty()
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimsPrincipal {
    pub identity: ClaimsIdentity,
}

impl ClaimsPrincipal {
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_authenticated()
    }

    /// Value of the first Name claim.
    pub fn name(&self) -> Option<&str> {
        self.claims_of(ClaimType::Name).next()
    }

    /// Role claims in the order they were granted.
    pub fn roles(&self) -> Vec<&str> {
        self.claims_of(ClaimType::Role).collect()
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.claims_of(ClaimType::Role).any(|r| r == role)
    }

    fn claims_of(&self, claim_type: ClaimType) -> impl Iterator<Item = &str> {
        self.identity
            .claims
            .iter()
            .filter(move |c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationTicket {
    pub principal: ClaimsPrincipal,
    pub scheme: String,
}

impl AuthenticationTicket {
    /// Build a ticket for a resolved record.
    pub fn from_record<E>(rec: &ApiKeyRecord<E>, scheme: &str, auth_type: &str) -> Self {
        let claims = std::iter::once(Claim::new(ClaimType::Name, rec.consumer()))
            .chain(
                rec.roles()
                    .iter()
                    .map(|role| Claim::new(ClaimType::Role, role.as_str())),
            )
            .collect();
        Self {
            principal: ClaimsPrincipal {
                identity: ClaimsIdentity {
                    authentication_type: auth_type.to_string(),
                    claims,
                },
            },
            scheme: scheme.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationFailure {
    #[error("Unauthorized access.")]
    KeyNotFound,
    #[error("Malformed API key header.")]
    InvalidHeaderValue,
    #[error("API key lookup failed: {0}")]
    Store(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticateResult {
    NoResult,
    Success(AuthenticationTicket),
    Fail(AuthenticationFailure),
}

impl AuthenticateResult {
    pub fn succeeded(&self) -> bool {
        matches!(self, AuthenticateResult::Success(_))
    }

    pub fn principal(&self) -> Option<&ClaimsPrincipal> {
        match self {
            AuthenticateResult::Success(ticket) => Some(&ticket.principal),
            _ => None,
        }
    }
}

pub struct AuthenticationEngine<E> {
    repository: Arc<dyn ApiKeyRepository<E>>,
    options: ApiKeyOptions,
    negotiator: ResponseNegotiator,
}

impl<E> AuthenticationEngine<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(
        repository: Arc<dyn ApiKeyRepository<E>>,
        options: ApiKeyOptions,
        negotiator: ResponseNegotiator,
    ) -> Self {
        Self {
            repository,
            options,
            negotiator,
        }
    }

    pub fn options(&self) -> &ApiKeyOptions {
        &self.options
    }

    pub fn negotiator(&self) -> &ResponseNegotiator {
        &self.negotiator
    }

    /// Authenticate a request by its API key header.
    pub async fn authenticate(&self, req: &HttpRequest) -> AuthenticateResult {
        let first = req
            .headers()
            .get_all(self.options.header_name.as_str())
            .next();
        let Some(value) = first else {
            debug!(header = %self.options.header_name, "No matching API key headers found");
            return AuthenticateResult::NoResult;
        };
        match value.to_str() {
            Ok(key) => self.authenticate_key(key).await,
            Err(_) => {
                warn!(header = %self.options.header_name, "API key header is not visible ASCII");
                AuthenticateResult::Fail(AuthenticationFailure::InvalidHeaderValue)
            }
        }
    }

    /// Resolve an already extracted header value.
    pub async fn authenticate_key(&self, key: &str) -> AuthenticateResult {
        if key.is_empty() {
            warn!(header = %self.options.header_name, "API key is empty");
            return AuthenticateResult::NoResult;
        }

        match self.repository.get_by_key(key).await {
            Ok(Some(rec)) if !rec.is_empty() => {
                debug!(id = %rec.id(), consumer = rec.consumer(), "API key authenticated");
                AuthenticateResult::Success(AuthenticationTicket::from_record(
                    &rec,
                    &self.options.scheme,
                    &self.options.authentication_type,
                ))
            }
            Ok(_) => {
                warn!(key_len = key.len(), "API key not found");
                AuthenticateResult::Fail(AuthenticationFailure::KeyNotFound)
            }
            Err(e) => {
                warn!("API key store lookup failed: {}", e);
                AuthenticateResult::Fail(AuthenticationFailure::Store(e.to_string()))
            }
        }
    }

    /// 401 response for a caller that is not authenticated.
    pub fn challenge(&self, req: &HttpRequest) -> HttpResponse {
        self.problem_response(
            req,
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            NOT_AUTHORIZED_DETAIL,
        )
    }

    /// 403 response for an authenticated caller lacking a required role.
    pub fn forbid(&self, req: &HttpRequest) -> HttpResponse {
        self.problem_response(
            req,
            StatusCode::FORBIDDEN,
            "Forbidden",
            NOT_AUTHORIZED_DETAIL,
        )
    }

    /// Negotiated problem response with the request path as instance.
    pub fn problem_response(
        &self,
        req: &HttpRequest,
        status: StatusCode,
        title: &str,
        detail: &str,
    ) -> HttpResponse {
        let accept = req
            .headers()
            .get_all(header::ACCEPT)
            .filter_map(|v| v.to_str().ok());
        let representation = self.negotiator.select_representation(accept);
        let body = self.negotiator.build_problem_body(
            status.as_u16(),
            title,
            detail,
            req.path(),
            representation,
        );
        HttpResponse::build(status)
            .content_type(representation.content_type())
            .body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiate::{ProblemSettings, PROBLEM_JSON, PROBLEM_XML};
    use crate::store::{InMemoryApiKeyStore, Result as StoreResult};
    use actix_web::body::to_bytes;
    use actix_web::test::TestRequest;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    const CHARLIE_KEY: &str = "B47900BB1C704100B60063D1B84B287F";

    fn charlie() -> ApiKeyRecord<Uuid> {
        ApiKeyRecord::new(
            Uuid::parse_str("D0944969-D442-4183-8F7B-05DFA6915E4B").unwrap(),
            "charlie-app",
            CHARLIE_KEY,
            Uuid::parse_str("FF15FCE1-1512-44C0-894B-5A5980F35185").unwrap(),
            Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap(),
            ["read", "write"],
        )
    }

    fn engine() -> AuthenticationEngine<Uuid> {
        let store = InMemoryApiKeyStore::with_records(vec![charlie()]).unwrap();
        AuthenticationEngine::new(
            Arc::new(store),
            ApiKeyOptions::default(),
            ResponseNegotiator::new(ProblemSettings::default()),
        )
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl ApiKeyRepository<Uuid> for FailingStore {
        async fn create(&self, _: &str, _: Uuid, _: Vec<String>) -> StoreResult<(Uuid, String)> {
            Err(crate::store::StoreError::Storage("down".into()))
        }
        async fn get_by_id(&self, _: Uuid) -> StoreResult<Option<ApiKeyRecord<Uuid>>> {
            Err(crate::store::StoreError::Storage("down".into()))
        }
        async fn get_by_key(&self, _: &str) -> StoreResult<Option<ApiKeyRecord<Uuid>>> {
            Err(crate::store::StoreError::Storage("down".into()))
        }
        async fn remove_by_id(&self, _: Uuid) -> StoreResult<()> {
            Ok(())
        }
        async fn remove_by_key(&self, _: &str) -> StoreResult<()> {
            Ok(())
        }
        async fn remove_all_for_consumer(&self, _: &str) -> StoreResult<usize> {
            Ok(0)
        }
        async fn update_external_id(&self, _: Uuid, _: Uuid) -> StoreResult<bool> {
            Ok(false)
        }
        async fn list(&self) -> StoreResult<Vec<ApiKeyRecord<Uuid>>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn matching_key_yields_principal_with_roles() {
        let req = TestRequest::default()
            .insert_header(("X-Api-Key", CHARLIE_KEY))
            .to_http_request();

        match engine().authenticate(&req).await {
            AuthenticateResult::Success(ticket) => {
                assert_eq!(ticket.scheme, "ApiKey");
                let p = &ticket.principal;
                assert!(p.is_authenticated());
                assert_eq!(p.name(), Some("charlie-app"));
                assert_eq!(p.roles(), vec!["read", "write"]);
                assert!(p.is_in_role("write"));
                assert!(!p.is_in_role("manage"));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive_but_key_is_not() {
        let e = engine();
        let req = TestRequest::default()
            .insert_header(("x-api-key", CHARLIE_KEY))
            .to_http_request();
        assert!(e.authenticate(&req).await.succeeded());

        let req = TestRequest::default()
            .insert_header(("X-Api-Key", CHARLIE_KEY.to_ascii_lowercase()))
            .to_http_request();
        assert_eq!(
            e.authenticate(&req).await,
            AuthenticateResult::Fail(AuthenticationFailure::KeyNotFound)
        );
    }

    #[tokio::test]
    async fn missing_or_empty_header_is_no_result() {
        let e = engine();
        let req = TestRequest::default().to_http_request();
        assert_eq!(e.authenticate(&req).await, AuthenticateResult::NoResult);

        let req = TestRequest::default()
            .insert_header(("X-Api-Key", ""))
            .to_http_request();
        assert_eq!(e.authenticate(&req).await, AuthenticateResult::NoResult);
    }

    #[tokio::test]
    async fn unknown_key_fails() {
        let req = TestRequest::default()
            .insert_header(("X-Api-Key", "0000"))
            .to_http_request();
        let outcome = engine().authenticate(&req).await;
        assert_eq!(
            outcome,
            AuthenticateResult::Fail(AuthenticationFailure::KeyNotFound)
        );
        assert!(outcome.principal().is_none());
    }

    #[tokio::test]
    async fn custom_header_name_is_honoured() {
        let store = InMemoryApiKeyStore::with_records(vec![charlie()]).unwrap();
        let options = ApiKeyOptions {
            header_name: "X-Client-Key".into(),
            scheme: "ClientKey".into(),
            authentication_type: "client-key".into(),
        };
        let e = AuthenticationEngine::new(Arc::new(store), options, ResponseNegotiator::default());

        let req = TestRequest::default()
            .insert_header(("X-Api-Key", CHARLIE_KEY))
            .to_http_request();
        assert_eq!(e.authenticate(&req).await, AuthenticateResult::NoResult);

        let req = TestRequest::default()
            .insert_header(("X-Client-Key", CHARLIE_KEY))
            .to_http_request();
        match e.authenticate(&req).await {
            AuthenticateResult::Success(ticket) => {
                assert_eq!(ticket.scheme, "ClientKey");
                assert_eq!(ticket.principal.identity.authentication_type, "client-key");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn store_errors_are_failures() {
        let e = AuthenticationEngine::new(
            Arc::new(FailingStore),
            ApiKeyOptions::default(),
            ResponseNegotiator::default(),
        );
        match e.authenticate_key(CHARLIE_KEY).await {
            AuthenticateResult::Fail(AuthenticationFailure::Store(msg)) => {
                assert!(msg.contains("down"));
            }
            other => panic!("expected store failure, got {:?}", other),
        }
    }

    #[test]
    fn failures_are_std_errors() {
        let err: Box<dyn std::error::Error> = Box::new(AuthenticationFailure::Store("down".into()));
        assert_eq!(err.to_string(), "API key lookup failed: down");
        assert_eq!(
            AuthenticationFailure::KeyNotFound.to_string(),
            "Unauthorized access."
        );
    }

    #[tokio::test]
    async fn challenge_renders_negotiated_problem() {
        let e = engine();
        let req = TestRequest::with_uri("/keys")
            .insert_header(("Accept", "application/json"))
            .to_http_request();
        let resp = e.challenge(&req);
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            PROBLEM_JSON
        );
        let body = to_bytes(resp.into_body()).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["status"], 401);
        assert_eq!(v["title"], "Unauthorized");
        assert_eq!(v["instance"], "/keys");

        let req = TestRequest::with_uri("/keys")
            .insert_header(("Accept", "application/xml"))
            .to_http_request();
        let resp = e.forbid(&req);
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            PROBLEM_XML
        );
        let body = to_bytes(resp.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("<status>403</status>"));
    }
}
