//! 管理パネル JSON API (axum)

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::content::{InterlinkRule, Persona};
use crate::error::{Error, Result};
use crate::manager::{Campaign, CategoryRef, PbnManager, ScheduleRequest};
use crate::store::{StoreError, StoredSite};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PbnManager>,
}

/// サイト（パスワードは返さない）
#[derive(Debug, Serialize)]
pub struct SiteView {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredSite> for SiteView {
    fn from(site: StoredSite) -> Self {
        Self {
            id: site.id,
            name: site.name,
            url: site.url,
            username: site.username,
            created_at: site.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddSiteBody {
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub site: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
    pub publish_at: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub site: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub start: Option<NaiveDateTime>,
    #[serde(default)]
    pub interval_hours: Option<u32>,
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
    #[serde(default)]
    pub featured_image: bool,
}

/// Router with every panel endpoint
pub fn create_router(manager: Arc<PbnManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/sites", get(list_sites).post(add_site))
        .route("/sites/{id}", delete(remove_site))
        .route("/schedule", post(schedule))
        .route("/generate", post(generate))
        .route("/links", get(list_links).put(replace_links))
        .route("/personas", get(list_personas).put(upsert_persona))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { manager })
}

/// Start the panel on `addr`
pub async fn serve(manager: Arc<PbnManager>, addr: SocketAddr) -> Result<()> {
    info!("Starting PBN panel on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, create_router(manager)).await?;
    Ok(())
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::SiteNotFound(_) => StatusCode::NOT_FOUND,
            Error::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Store(StoreError::Duplicate(_)) => StatusCode::CONFLICT,
            err if err.is_client_error() => StatusCode::BAD_REQUEST,
            Error::WordPress(_) | Error::Llm(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            Error::SiteNotFound(_) => json!({"error": "site not registered"}),
            other => json!({"error": other.to_string()}),
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), "request failed: {}", self);
        }
        (status, Json(body)).into_response()
    }
}

/// 不正なJSONは400に揃える
fn payload<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| Error::InvalidInput(rejection.body_text()))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "generation": state.manager.has_generator(),
    }))
}

async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.manager.aggregate_stats().await?))
}

async fn list_sites(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let sites: Vec<SiteView> = state
        .manager
        .sites()
        .await?
        .into_iter()
        .map(SiteView::from)
        .collect();
    Ok(Json(sites))
}

async fn add_site(
    State(state): State<AppState>,
    body: std::result::Result<Json<AddSiteBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let body = payload(body)?;
    let site = state
        .manager
        .add_site(
            body.name.as_deref(),
            &body.url,
            &body.username,
            SecretString::from(body.password),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(SiteView::from(site))))
}

async fn remove_site(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode> {
    state.manager.remove_site(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn schedule(
    State(state): State<AppState>,
    body: std::result::Result<Json<ScheduleBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let body = payload(body)?;
    let request = ScheduleRequest {
        title: body.title,
        content: body.content,
        categories: body.categories,
        publish_at: body.publish_at,
    };
    let post = state.manager.schedule_post(&body.site, request).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn generate(
    State(state): State<AppState>,
    body: std::result::Result<Json<GenerateBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let body = payload(body)?;
    let campaign = Campaign {
        topics: body.topics,
        sites: vec![body.site],
        persona: body.persona,
        start: body.start,
        interval_hours: body.interval_hours,
        categories: body.categories,
        featured_image: body.featured_image,
    };
    let report = state.manager.run_campaign(campaign).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn list_links(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.manager.links().await?))
}

async fn replace_links(
    State(state): State<AppState>,
    body: std::result::Result<Json<Vec<InterlinkRule>>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let rules = payload(body)?;
    Ok(Json(state.manager.replace_links(rules).await?))
}

async fn list_personas(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.manager.personas().await?))
}

async fn upsert_persona(
    State(state): State<AppState>,
    body: std::result::Result<Json<Persona>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let persona = payload(body)?;
    Ok(Json(state.manager.upsert_persona(persona).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PbnConfig;
    use crate::security::{CredentialCipher, MasterKey};
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        let cipher = CredentialCipher::new(MasterKey::new(SecretString::from("server key")).unwrap());
        let manager = PbnManager::new(Arc::new(MemoryStore::new()), cipher, &PbnConfig::default());
        create_router(Arc::new(manager))
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "ok", "generation": false})
        );
    }

    #[tokio::test]
    async fn test_add_site_hides_password_and_rejects_duplicates() {
        let app = app();
        let body = json!({
            "url": "https://blog.example.com/",
            "username": "admin",
            "password": "xxxx yyyy"
        });

        let response = app
            .clone()
            .oneshot(json_request("POST", "/sites", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let site = body_json(response).await;
        assert_eq!(site["url"], "https://blog.example.com");
        assert!(site.get("password").is_none());

        let response = app
            .oneshot(json_request("POST", "/sites", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_delete_missing_site_is_404() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/sites/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_schedule_unknown_site() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/schedule",
                json!({
                    "site": "https://example.com",
                    "title": "My post",
                    "content": "<p>Body</p>",
                    "categories": [1, 2],
                    "publish_at": "2025-01-01T10:00:00"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({"error": "site not registered"})
        );
    }

    #[tokio::test]
    async fn test_schedule_malformed_body() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/schedule",
                json!({"site": "https://example.com", "publish_at": "tomorrow"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_links_roundtrip() {
        let app = app();
        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/links",
                json!([{"keyword": "green tea", "url": "https://tea.example/green"}]),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/links").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let links = body_json(response).await;
        assert_eq!(links[0]["keyword"], "green tea");
    }

    #[tokio::test]
    async fn test_generate_with_unrepresentable_schedule_is_400() {
        let app = app();
        app.clone()
            .oneshot(json_request(
                "POST",
                "/sites",
                json!({"url": "https://a.example", "username": "u", "password": "p"}),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(
                "POST",
                "/generate",
                json!({
                    "site": "https://a.example",
                    "topics": ["a", "b"],
                    "interval_hours": 4000000000u32
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_site_url_is_400() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/sites",
                json!({"url": "not a url", "username": "u", "password": "p"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generate_without_llm_is_unavailable() {
        let app = app();
        app.clone()
            .oneshot(json_request(
                "POST",
                "/sites",
                json!({"url": "https://a.example", "username": "u", "password": "p"}),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(
                "POST",
                "/generate",
                json!({"site": "https://a.example", "topics": ["tea"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
