pub mod auth;
pub mod config;
pub mod err;
pub mod models;
pub mod store;
pub mod upload;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Multipart, Path};
use axum::handler::Handler;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::auth::{AuthContext, RequireAuth, TokenKeys};
use crate::config::Config;
use crate::err::{Error, Outcome};
use crate::models::{PageRequest, PagedWorks, ProjectRecord, WorkSubmission};
use crate::store::DataStore;
use crate::upload::{UploadStage, UPLOAD_GRACE};

/// Every gated response carries the auth annotation and (possibly refreshed)
/// token alongside its data.
#[derive(Debug, Clone, Serialize)]
pub struct Authed<T> {
    #[serde(rename = "isAuthenticated")]
    pub is_authenticated: bool,
    pub token: Option<String>,
    pub data: T,
}

pub type Payload<T> = axum::response::Result<Json<Authed<T>>, Error>;

pub fn proceeds<T>(gate: AuthContext, data: T) -> Payload<T>
where
    T: Serialize,
{
    Ok(Json(Authed {
        is_authenticated: gate.is_authenticated,
        token: gate.token,
        data,
    }))
}

const RECENT_WINDOW: i64 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env()?;

    log::info!("Connecting to the document store...");
    let store = DataStore::connect(&config.store_uri).await?;
    let uploads = UploadStage::prepare(config.upload_dir.clone(), UPLOAD_GRACE).await?;
    let keys = Arc::new(TokenKeys::new(&config.token_secret));
    let port = config.http_port;

    let app = Router::new()
        .route("/", get(index))
        .route("/works/recentworks", get(recent_works))
        .route("/works/pagedWorks", post(paged_works))
        .route("/works/distinctYears", get(distinct_years))
        .route("/work/save", post(save_work))
        .route("/work/remove", post(remove_work))
        .route("/work/getFile/:id", get(work_file))
        .route("/work/:id", get(work_by_id))
        .route("/registerUser", post(auth::register))
        .route("/login", post(auth::login))
        .layer(Extension(store))
        .layer(Extension(uploads))
        .layer(Extension(keys))
        .layer(Extension(Arc::new(config)))
        .layer(CorsLayer::permissive())
        .fallback(err::handler404.into_service());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("Starting portfolio HTTP server on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

async fn index() -> &'static str {
    "Hello world"
}

async fn recent_works(
    gate: AuthContext,
    Extension(store): Extension<DataStore>,
) -> Payload<Vec<ProjectRecord>> {
    let works = store.recent_works(RECENT_WINDOW).await?;
    proceeds(gate, works)
}

async fn paged_works(
    gate: AuthContext,
    Extension(store): Extension<DataStore>,
    Json(request): Json<PageRequest>,
) -> Payload<PagedWorks> {
    let page = store.paged_works(&request).await?;
    proceeds(gate, page)
}

async fn distinct_years(
    gate: AuthContext,
    Extension(store): Extension<DataStore>,
) -> Payload<Vec<i32>> {
    let years = store.distinct_years().await?;
    proceeds(gate, years)
}

async fn work_by_id(
    gate: AuthContext,
    Path(id): Path<String>,
    Extension(store): Extension<DataStore>,
) -> Payload<ProjectRecord> {
    let id = ObjectId::parse_str(&id)?;
    let work = store.work_by_id(id).await?;
    proceeds(gate, work)
}

async fn work_file(
    gate: AuthContext,
    Path(id): Path<String>,
    Extension(store): Extension<DataStore>,
) -> Payload<ProjectRecord> {
    let id = ObjectId::parse_str(&id)?;
    let work = store.file_by_id(id).await?;
    proceeds(gate, work)
}

struct InboundFile {
    name: String,
    bytes: Vec<u8>,
}

fn bad_payload<E: std::fmt::Display>(err: E) -> Error {
    Error::InvalidPayload {
        message: err.to_string(),
    }
}

/// The save form carries a `work` field with the submission JSON and an
/// optional `file` field with the upload.
async fn read_submission(
    mut multipart: Multipart,
) -> Result<(WorkSubmission, Option<InboundFile>), Error> {
    let mut submission = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_payload)? {
        let field_name = field.name().map(str::to_owned).unwrap_or_default();
        match field_name.as_str() {
            "work" => {
                let raw = field.text().await.map_err(bad_payload)?;
                submission = Some(serde_json::from_str::<WorkSubmission>(&raw).map_err(bad_payload)?);
            }
            "file" => {
                let name = field
                    .file_name()
                    .map(str::to_owned)
                    .unwrap_or_else(|| "upload.bin".to_string());
                let bytes = field.bytes().await.map_err(bad_payload)?.to_vec();
                file = Some(InboundFile { name, bytes });
            }
            _ => {}
        }
    }

    let submission = submission.ok_or_else(|| Error::InvalidPayload {
        message: "missing multipart field `work`".to_string(),
    })?;
    Ok((submission, file))
}

async fn save_work(
    RequireAuth(gate): RequireAuth,
    Extension(store): Extension<DataStore>,
    Extension(uploads): Extension<UploadStage>,
    multipart: Multipart,
) -> Payload<Outcome> {
    let (submission, inbound) = read_submission(multipart).await?;
    let target = submission.identity()?;

    // files only attach to new records; the payload is immutable afterwards
    let staged = match inbound {
        Some(file) if target.is_none() => {
            Some(uploads.materialize(&file.name, &file.bytes).await?)
        }
        _ => None,
    };

    match store.save_work(&submission, staged).await {
        Ok(()) => proceeds(gate, Outcome::ok()),
        Err(Error::NotFound { message }) => proceeds(gate, Outcome::failed(message)),
        Err(other) => Err(other),
    }
}

#[derive(Debug, Deserialize)]
struct RemoveRequest {
    #[serde(rename = "_id")]
    id: String,
}

async fn remove_work(
    RequireAuth(gate): RequireAuth,
    Extension(store): Extension<DataStore>,
    Json(request): Json<RemoveRequest>,
) -> Payload<Outcome> {
    let id = ObjectId::parse_str(&request.id)?;
    store.remove_work(id).await?;
    proceeds(gate, Outcome::ok())
}
