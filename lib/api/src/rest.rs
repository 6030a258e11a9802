use actix_cors::Cors;
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer, ResponseError};
use serde::Serialize;
use serde_json::Value;
use staysearch_core::{BatchReport, CompositeIndex, Error, Record, SkippedRecord};
use staysearch_query::{Params, SearchExecutor};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<SearchExecutor>,
}

impl AppState {
    pub fn new(executor: Arc<SearchExecutor>) -> Self {
        Self { executor }
    }

    fn index(&self) -> &Arc<CompositeIndex> {
        self.executor.index()
    }
}

/// Library error rendered as `{"error": message}` with a mapped status
#[derive(Debug)]
pub struct ApiError(pub Error);

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::QueryNotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            e if e.is_upstream_error() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.0.to_string()
        }))
    }
}

type ApiResult = Result<HttpResponse, ApiError>;

#[derive(Serialize)]
struct SpaceInfo {
    name: String,
    attribute: String,
    kind: staysearch_core::SpaceKind,
    dimension: usize,
}

#[derive(Serialize)]
struct IndexInfo {
    name: String,
    schema: String,
    backend: &'static str,
    dimension: usize,
    count: usize,
    spaces: Vec<SpaceInfo>,
    queries: Vec<String>,
}

pub struct RestApi;

impl RestApi {
    pub async fn start(state: AppState, host: String, port: u16) -> std::io::Result<()> {
        info!("REST API listening on {}:{}", host, port);
        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new()
                .wrap(cors)
                .app_data(web::Data::new(state.clone()))
                .app_data(web::JsonConfig::default().limit(16 * 1024 * 1024))
                .configure(configure)
        })
        .bind((host.as_str(), port))?
        .run()
        .await
    }
}

/// Route table, shared by the server and tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/api/v1/search/{query_name}", web::post().to(search))
        .route("/api/v1/ingest/{schema_name}", web::post().to(ingest))
        .route("/api/v1/listings/{id}", web::get().to(get_listing))
        .route("/api/v1/listings/{id}", web::delete().to(delete_listing))
        .route("/api/v1/index", web::get().to(index_info));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

async fn search(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<Value>>,
) -> ApiResult {
    let name = path.into_inner();
    let params: Params = match body.map(web::Json::into_inner) {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => Params::new(),
        Some(other) => {
            return Err(Error::InvalidParameter(format!(
                "search parameters must be a JSON object, got {}",
                other
            ))
            .into())
        }
    };
    let response = state.executor.run(&name, &params).await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn ingest(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<Value>,
) -> ApiResult {
    let schema_name = path.into_inner();
    let index = state.index();
    if index.schema().name != schema_name {
        return Ok(HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Schema '{}' not found", schema_name)
        })));
    }

    match body.into_inner() {
        Value::Array(items) => {
            let mut records = Vec::with_capacity(items.len());
            let mut rejected = Vec::new();
            for (pos, item) in items.iter().enumerate() {
                match Record::from_json(index.schema(), item) {
                    Ok(record) => records.push(record),
                    Err(e) => rejected.push(SkippedRecord {
                        id: raw_id(index, item).unwrap_or_else(|| format!("#{}", pos)),
                        reason: e.to_string(),
                    }),
                }
            }
            let mut report = index.index_batch(records).await?;
            report.skipped.extend(rejected);
            Ok(HttpResponse::Ok().json(report))
        }
        item @ Value::Object(_) => {
            let record = Record::from_json(index.schema(), &item)?;
            index.index(record).await?;
            Ok(HttpResponse::Ok().json(BatchReport {
                indexed: 1,
                skipped: Vec::new(),
            }))
        }
        other => Err(Error::InvalidRecord(format!(
            "expected a record object or an array of records, got {}",
            other
        ))
        .into()),
    }
}

fn raw_id(index: &CompositeIndex, item: &Value) -> Option<String> {
    match item.get(&index.schema().id_field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

async fn get_listing(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let id = path.into_inner();
    match state.index().get(&id).await? {
        Some(record) => Ok(HttpResponse::Ok().json(record.to_json())),
        None => Ok(HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Listing '{}' not found", id)
        }))),
    }
}

async fn delete_listing(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let id = path.into_inner();
    if state.index().delete(&id).await? {
        Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": id })))
    } else {
        Ok(HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Listing '{}' not found", id)
        })))
    }
}

async fn index_info(state: web::Data<AppState>) -> ApiResult {
    let index = state.index();
    let info = IndexInfo {
        name: index.name().to_string(),
        schema: index.schema().name.clone(),
        backend: index.backend(),
        dimension: index.dimension(),
        count: index.count().await?,
        spaces: index
            .spaces()
            .iter()
            .map(|s| SpaceInfo {
                name: s.name().to_string(),
                attribute: s.attribute().to_string(),
                kind: s.kind(),
                dimension: s.dimension(),
            })
            .collect(),
        queries: state.executor.query_names(),
    };
    Ok(HttpResponse::Ok().json(info))
}
