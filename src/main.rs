//! Roster Importer - spreadsheet import pipeline server for club rosters.
//!
//! Upload an Excel/CSV file of unknown shape; the pipeline infers which
//! domain table it represents, maps multilingual headers to canonical
//! fields, resolves free-text trainer/hall/class references against
//! existing records, and drives a dependency-ordered import into the
//! backing store.

mod analyzer;
mod error;
mod importer;
mod mapper;
mod phone;
mod resolver;
mod schema;
mod sink;
mod transform;
mod workbook;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use analyzer::{analyze_sheet, SmartAnalysisResult};
use error::ImportError;
use importer::{run_import, ImportResult, DEFAULT_BATCH_SIZE};
use schema::{TableSchema, TargetTable, REGISTRY};
use sink::{ReferenceProvider, SupabaseStore};
use workbook::parse_workbook;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    analyses: Arc<RwLock<HashMap<String, SmartAnalysisResult>>>,
    store: Arc<SupabaseStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roster_importer=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = SupabaseStore::from_env()?;
    info!("Backing store client initialized");

    let state = AppState {
        analyses: Arc::new(RwLock::new(HashMap::new())),
        store: Arc::new(store),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/schemas", get(list_schemas))
        .route("/import/analyze", post(analyze_upload))
        .route("/import/analyses/:id", get(get_analysis))
        .route("/import/analyses/:id/execute", post(execute_import))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    info!("Server listening on http://0.0.0.0:3000");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Expose the target-table schemas so a wizard UI can render field lists
/// and required flags.
async fn list_schemas() -> Json<Vec<TableSchema>> {
    Json(REGISTRY.clone())
}

#[derive(serde::Deserialize)]
struct AnalyzeQuery {
    /// Sheet index within the workbook; defaults to the first sheet.
    sheet: Option<usize>,
    /// Force the primary table instead of the score-based choice.
    table: Option<String>,
}

/// Upload a spreadsheet and analyze one sheet against the target tables.
async fn analyze_upload(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
    mut multipart: Multipart,
) -> Result<Json<SmartAnalysisResult>, (StatusCode, String)> {
    let forced = query
        .table
        .as_deref()
        .map(TargetTable::from_name)
        .transpose()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    // Read the uploaded file
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("upload").to_string();
            file_data = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }

    info!("Received file: {} ({} bytes)", filename, file_data.len());

    let workbook = parse_workbook(&filename, &file_data).map_err(import_error_response)?;

    let sheet_index = query.sheet.unwrap_or(0);
    let sheet = workbook.sheets.get(sheet_index).ok_or_else(|| {
        import_error_response(ImportError::SheetOutOfRange(
            sheet_index,
            workbook.sheets.len(),
        ))
    })?;

    let refdata = state.store.reference_data().await.map_err(|e| {
        error!("Failed to fetch reference data: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to fetch reference data: {}", e),
        )
    })?;

    let analysis = analyze_sheet(&workbook.file_name, sheet, &refdata, forced);

    {
        let mut analyses = state.analyses.write().unwrap();
        analyses.insert(analysis.id.clone(), analysis.clone());
    }

    info!("Analysis stored: {}", analysis.id);
    Ok(Json(analysis))
}

/// Fetch a stored analysis by id.
async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SmartAnalysisResult>, StatusCode> {
    let analyses = state.analyses.read().unwrap();
    analyses
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Run the three-phase import for a stored analysis.
async fn execute_import(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ImportResult>, StatusCode> {
    let analysis = {
        let analyses = state.analyses.read().unwrap();
        analyses.get(&id).cloned()
    }
    .ok_or(StatusCode::NOT_FOUND)?;

    let result = run_import(
        &analysis,
        state.store.as_ref(),
        state.store.as_ref(),
        DEFAULT_BATCH_SIZE,
    )
    .await;

    Ok(Json(result))
}

// ============================================================================
// Helpers
// ============================================================================

/// Map pipeline errors onto response codes: bad requests for caller
/// mistakes, 422 for files we cannot decode.
fn import_error_response(e: ImportError) -> (StatusCode, String) {
    let status = match e {
        ImportError::UnsupportedFormat(_)
        | ImportError::SheetOutOfRange(_, _)
        | ImportError::UnknownTable(_) => StatusCode::BAD_REQUEST,
        ImportError::Decode(_) | ImportError::EmptyWorkbook => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, e.to_string())
}
