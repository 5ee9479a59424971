use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ApiKeyOptions;
use crate::engine::{AuthenticateResult, AuthenticationEngine, ClaimsPrincipal};
use crate::negotiate::ResponseNegotiator;
use crate::record::ApiKeyInfo;
use crate::store::{ApiKeyRepository, StoreError};

/// Role required for every key-management route.
pub const ROLE_MANAGE: &str = "manage";
/// Additional role required to issue keys.
pub const ROLE_CREATE: &str = "create";

const MAX_CONSUMER_LEN: usize = 32;

/// Shared state for the HTTP service. The external id of issued keys is a UUID.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn ApiKeyRepository<Uuid>>,
    pub engine: Arc<AuthenticationEngine<Uuid>>,
}

impl AppState {
    pub fn new(
        repository: Arc<dyn ApiKeyRepository<Uuid>>,
        options: ApiKeyOptions,
        negotiator: ResponseNegotiator,
    ) -> Self {
        let engine = AuthenticationEngine::new(repository.clone(), options, negotiator);
        Self {
            repository,
            engine: Arc::new(engine),
        }
    }
}

/// Configure Actix-web routes with AppState.
pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("")
            .route("/status", web::get().to(status))
            .route("/whoami", web::get().to(whoami))
            .route("/keys", web::get().to(list_keys))
            .route("/keys", web::post().to(create_key))
            .route("/keys/{id}", web::get().to(get_key))
            .route("/keys/{id}", web::delete().to(remove_key))
            .route("/keys/{id}/external_id", web::put().to(update_external_id))
            .route(
                "/consumers/{consumer}/keys",
                web::delete().to(remove_consumer_keys),
            ),
    );
}

/// Authenticate the request and check that every role in `roles` was granted.
///
/// Unauthenticated callers get a 401 challenge, authenticated callers missing a
/// role get a 403.
pub async fn require_roles(
    state: &AppState,
    req: &HttpRequest,
    roles: &[&str],
) -> Result<ClaimsPrincipal, HttpResponse> {
    match state.engine.authenticate(req).await {
        AuthenticateResult::Success(ticket) => {
            let principal = ticket.principal;
            match roles.iter().find(|r| !principal.is_in_role(r)) {
                None => Ok(principal),
                Some(missing) => {
                    warn!(
                        consumer = principal.name().unwrap_or(""),
                        role = *missing,
                        path = req.path(),
                        "Forbidden: missing role"
                    );
                    Err(state.engine.forbid(req))
                }
            }
        }
        AuthenticateResult::Fail(failure) => {
            debug!(
                path = req.path(),
                "Challenge after failed authentication: {}",
                failure
            );
            Err(state.engine.challenge(req))
        }
        AuthenticateResult::NoResult => Err(state.engine.challenge(req)),
    }
}

fn problem(state: &AppState, req: &HttpRequest, status: StatusCode, detail: &str) -> HttpResponse {
    let title = status.canonical_reason().unwrap_or("Error");
    state.engine.problem_response(req, status, title, detail)
}

fn store_failure(state: &AppState, req: &HttpRequest, op: &str, err: StoreError) -> HttpResponse {
    warn!(operation = op, "API key store failure: {}", err);
    problem(
        state,
        req,
        StatusCode::INTERNAL_SERVER_ERROR,
        &format!("failed to {}: {}", op, err),
    )
}

fn parse_id(state: &AppState, req: &HttpRequest, raw: &str) -> Result<Uuid, HttpResponse> {
    match Uuid::parse_str(raw.trim()) {
        Ok(id) if !id.is_nil() => Ok(id),
        _ => Err(problem(
            state,
            req,
            StatusCode::BAD_REQUEST,
            "key id must be a non-nil UUID",
        )),
    }
}

/// Decode a JSON request body. Call only after the caller has been authorized.
fn decode_body<T: DeserializeOwned>(
    state: &AppState,
    req: &HttpRequest,
    body: &[u8],
) -> Result<T, HttpResponse> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(path = req.path(), "Rejected request body: {}", e);
        problem(
            state,
            req,
            StatusCode::BAD_REQUEST,
            &format!("invalid request body: {}", e),
        )
    })
}

/// Service status: public, no key required.
async fn status(state: web::Data<AppState>) -> impl Responder {
    let opts = state.engine.options();
    web::Json(serde_json::json!({
        "name": "keygate",
        "version": env!("CARGO_PKG_VERSION"),
        "header_name": opts.header_name,
        "scheme": opts.scheme,
        "routes": [
            "/status",
            "/whoami",
            "/keys",
            "/keys/{id}",
            "/keys/{id}/external_id",
            "/consumers/{consumer}/keys",
        ],
    }))
}

#[derive(Debug, Serialize)]
struct WhoAmI<'a> {
    name: Option<&'a str>,
    roles: Vec<&'a str>,
    authentication_type: &'a str,
    scheme: &'a str,
}

async fn whoami(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let principal = match require_roles(&state, &req, &[]).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    HttpResponse::Ok().json(WhoAmI {
        name: principal.name(),
        roles: principal.roles(),
        authentication_type: &principal.identity.authentication_type,
        scheme: &state.engine.options().scheme,
    })
}

async fn list_keys(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if let Err(resp) = require_roles(&state, &req, &[ROLE_MANAGE]).await {
        return resp;
    }
    match state.repository.list().await {
        Ok(mut records) => {
            records.sort_by_key(|r| r.created());
            let items: Vec<ApiKeyInfo<Uuid>> = records.into_iter().map(ApiKeyInfo::from).collect();
            HttpResponse::Ok().json(items)
        }
        Err(e) => store_failure(&state, &req, "list keys", e),
    }
}

async fn get_key(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(resp) = require_roles(&state, &req, &[ROLE_MANAGE]).await {
        return resp;
    }
    let id = match parse_id(&state, &req, &path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.repository.get_by_id(id).await {
        Ok(Some(rec)) => HttpResponse::Ok().json(ApiKeyInfo::from(rec)),
        Ok(None) => problem(
            &state,
            &req,
            StatusCode::NOT_FOUND,
            "no API key with this id",
        ),
        Err(e) => store_failure(&state, &req, "get key", e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub consumer: String,
    pub external_id: Uuid,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl CreateKeyRequest {
    /// Normalized (consumer, roles), or a reason the request is unusable.
    fn validate(self) -> Result<(String, Uuid, Vec<String>), &'static str> {
        let consumer = self.consumer.trim().to_string();
        if consumer.is_empty() {
            return Err("consumer must not be blank");
        }
        if consumer.chars().count() > MAX_CONSUMER_LEN {
            return Err("consumer must be at most 32 characters");
        }
        let roles: Vec<String> = self
            .roles
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if roles.is_empty() {
            return Err("at least one role is required");
        }
        Ok((consumer, self.external_id, roles))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedKey {
    pub id: Uuid,
    pub key: String,
}

async fn create_key(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let caller = match require_roles(&state, &req, &[ROLE_MANAGE, ROLE_CREATE]).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let request: CreateKeyRequest = match decode_body(&state, &req, &body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let (consumer, external_id, roles) = match request.validate() {
        Ok(v) => v,
        Err(reason) => return problem(&state, &req, StatusCode::BAD_REQUEST, reason),
    };

    match state.repository.create(&consumer, external_id, roles).await {
        Ok((id, key)) => {
            info!(
                %id,
                consumer = consumer.as_str(),
                issued_by = caller.name().unwrap_or(""),
                "API key issued"
            );
            HttpResponse::Created()
                .insert_header((header::LOCATION, format!("/keys/{}", id)))
                .json(CreatedKey { id, key })
        }
        Err(e) => store_failure(&state, &req, "create key", e),
    }
}

#[derive(Debug, Deserialize)]
struct UpdateExternalIdRequest {
    external_id: Uuid,
}

async fn update_external_id(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = require_roles(&state, &req, &[ROLE_MANAGE]).await {
        return resp;
    }
    let id = match parse_id(&state, &req, &path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let external_id = match decode_body::<UpdateExternalIdRequest>(&state, &req, &body) {
        Ok(r) => r.external_id,
        Err(resp) => return resp,
    };
    match state.repository.update_external_id(id, external_id).await {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({
            "updated": true,
            "id": id,
            "external_id": external_id,
        })),
        Ok(false) => problem(
            &state,
            &req,
            StatusCode::NOT_FOUND,
            "no API key with this id",
        ),
        Err(e) => store_failure(&state, &req, "update external id", e),
    }
}

async fn remove_key(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(resp) = require_roles(&state, &req, &[ROLE_MANAGE]).await {
        return resp;
    }
    let id = match parse_id(&state, &req, &path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.repository.remove_by_id(id).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => store_failure(&state, &req, "remove key", e),
    }
}

async fn remove_consumer_keys(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(resp) = require_roles(&state, &req, &[ROLE_MANAGE]).await {
        return resp;
    }
    let consumer = path.into_inner();
    match state.repository.remove_all_for_consumer(&consumer).await {
        Ok(removed) => HttpResponse::Ok().json(serde_json::json!({
            "consumer": consumer,
            "removed": removed,
        })),
        Err(e) => store_failure(&state, &req, "remove consumer keys", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(consumer: &str, roles: &[&str]) -> CreateKeyRequest {
        CreateKeyRequest {
            consumer: consumer.into(),
            external_id: Uuid::new_v4(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn create_request_trims_and_drops_blank_roles() {
        let (consumer, _, roles) = request("  delta-app ", &["user", " ", " read "])
            .validate()
            .unwrap();
        assert_eq!(consumer, "delta-app");
        assert_eq!(roles, vec!["user", "read"]);
    }

    #[test]
    fn create_request_rejects_blank_consumer_and_missing_roles() {
        assert!(request("   ", &["read"]).validate().is_err());
        assert!(request("delta-app", &[]).validate().is_err());
        assert!(request("delta-app", &["  "]).validate().is_err());
        assert!(request(&"x".repeat(33), &["read"]).validate().is_err());
        assert!(request(&"x".repeat(32), &["read"]).validate().is_ok());
    }
}
