use std::sync::Arc;

use actix_web::http::header;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::ApiError;
use crate::models::*;
use crate::notify::ReportMailer;
use crate::render::{pdf_filename, ReportRenderer};
use crate::repo::ReportRepo;
use crate::storage::{ObjectStore, OBJECTS_ROUTE};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config());
    cfg.service(
        web::scope("/api")
            .service(
                web::resource("/reports")
                    .route(web::get().to(list_reports))
                    .route(web::post().to(create_report)),
            )
            // registered before /reports/{id} so "stats" is not taken for an id
            .service(web::resource("/reports/stats").route(web::get().to(report_stats)))
            .service(web::resource("/reports/reference/{ref_number}").route(web::get().to(get_report_by_reference)))
            .service(web::resource("/reports/{id}").route(web::get().to(get_report)))
            .service(web::resource("/reports/{id}/pdf").route(web::get().to(report_pdf)))
            .service(web::resource("/reports/{id}/html").route(web::get().to(report_html)))
            .service(web::resource("/reports/{id}/email").route(web::post().to(email_report)))
            .service(web::resource("/reports/{id}/status").route(web::patch().to(update_status)))
            .service(web::resource("/photos/upload").route(web::post().to(photo_upload_url)))
            .service(web::resource("/photos/process").route(web::post().to(process_photo))),
    );
    // no /api prefix so <img src="/objects/..."> works
    cfg.route("/objects/{path:.*}", web::get().to(get_object));
    cfg.route("/health", web::get().to(health));
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::BadRequest(format!("Invalid request body: {err}")).into()
    })
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn ReportRepo>,
    pub object_store: Arc<dyn ObjectStore>,
    pub renderer: ReportRenderer,
    pub mailer: ReportMailer,
}

async fn find_report(data: &AppState, id: &str) -> Result<Report, ApiError> {
    data.repo.get_report(id).await?.ok_or(ApiError::NotFound)
}

#[utoipa::path(
    post,
    path = "/api/reports",
    tag = "reports",
    request_body = NewReport,
    responses(
        (status = 201, description = "Report submitted", body = Report),
        (status = 400, description = "Validation failed", body = ApiErrorBody)
    )
)]
pub async fn create_report(
    data: web::Data<AppState>,
    payload: web::Json<NewReport>,
) -> Result<HttpResponse, ApiError> {
    let draft = payload.into_inner();
    draft.validate()?;
    let report = data.repo.create_report(draft).await?;
    tracing::info!(id = %report.id, reference = %report.reference_number, photos = report.photo_urls.len(), "report submitted");
    Ok(HttpResponse::Created().json(report))
}

#[utoipa::path(
    get,
    path = "/api/reports",
    tag = "reports",
    params(
        ("search" = Option<String>, Query, description = "Substring over reference, plate, reporter name/email, make, model"),
        ("status" = Option<String>, Query, description = "Only reports with this status")
    ),
    responses(
        (status = 200, description = "Reports, newest first", body = [Report])
    )
)]
pub async fn list_reports(
    data: web::Data<AppState>,
    query: web::Query<ReportQuery>,
) -> Result<HttpResponse, ApiError> {
    let ReportQuery { search, status } = query.into_inner();
    let mut reports = match search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(q) => data.repo.search_reports(q).await?,
        None => data.repo.list_reports().await?,
    };
    if let Some(status) = status.as_deref().filter(|s| !s.is_empty() && *s != "all") {
        reports.retain(|r| r.status == status);
    }
    Ok(HttpResponse::Ok().json(reports))
}

#[utoipa::path(
    get,
    path = "/api/reports/stats",
    tag = "reports",
    responses((status = 200, description = "Report counts by status", body = ReportStats))
)]
pub async fn report_stats(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.report_stats().await?))
}

#[utoipa::path(
    get,
    path = "/api/reports/{id}",
    tag = "reports",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report", body = Report),
        (status = 404, description = "Report not found", body = ApiErrorBody)
    )
)]
pub async fn get_report(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let report = find_report(&data, &path).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    get,
    path = "/api/reports/reference/{ref_number}",
    tag = "reports",
    params(("ref_number" = String, Path, description = "Reference number, e.g. VCR-2024-004821")),
    responses(
        (status = 200, description = "Report", body = Report),
        (status = 404, description = "Report not found", body = ApiErrorBody)
    )
)]
pub async fn get_report_by_reference(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let report = data
        .repo
        .get_report_by_reference(path.trim())
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    get,
    path = "/api/reports/{id}/pdf",
    tag = "documents",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "PDF download", content_type = "application/pdf"),
        (status = 404, description = "Report not found", body = ApiErrorBody)
    )
)]
pub async fn report_pdf(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let report = find_report(&data, &path).await?;
    let filename = pdf_filename(&report);
    let renderer = data.renderer.clone();
    let pdf = web::block(move || renderer.render_pdf(&report, Utc::now()))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "pdf render task failed");
            ApiError::Internal("Failed to generate report")
        })??;
    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header((header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")))
        .body(pdf))
}

#[utoipa::path(
    get,
    path = "/api/reports/{id}/html",
    tag = "documents",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "Printable HTML report", content_type = "text/html"),
        (status = 404, description = "Report not found", body = ApiErrorBody)
    )
)]
pub async fn report_html(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let report = find_report(&data, &path).await?;
    let html = data.renderer.render_html(&report, Utc::now())?;
    Ok(HttpResponse::Ok().content_type("text/html; charset=utf-8").body(html))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[utoipa::path(
    post,
    path = "/api/reports/{id}/email",
    tag = "documents",
    request_body = EmailReportRequest,
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report dispatched", body = MessageResponse),
        (status = 400, description = "Missing or malformed email", body = ApiErrorBody),
        (status = 404, description = "Report not found", body = ApiErrorBody),
        (status = 500, description = "Mail transport failure", body = ApiErrorBody)
    )
)]
pub async fn email_report(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<EmailReportRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let email = req
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Email address is required".into()))?;
    let report = find_report(&data, &path).await?;
    data.mailer.send_report(&report, &email, req.include_attachment).await?;
    Ok(HttpResponse::Ok().json(MessageResponse { message: "Report sent successfully".into() }))
}

#[utoipa::path(
    patch,
    path = "/api/reports/{id}/status",
    tag = "reports",
    request_body = StatusUpdate,
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "Status updated", body = Report),
        (status = 400, description = "Status missing", body = ApiErrorBody),
        (status = 404, description = "Report not found", body = ApiErrorBody)
    )
)]
pub async fn update_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<StatusUpdate>,
) -> Result<HttpResponse, ApiError> {
    let status = payload
        .into_inner()
        .status
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Status is required".into()))?;
    let report = data.repo.update_status(&path, &status).await?.ok_or(ApiError::NotFound)?;
    tracing::info!(id = %report.id, status = %report.status, "report status changed");
    Ok(HttpResponse::Ok().json(report))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadUrlResponse {
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
}

#[utoipa::path(
    post,
    path = "/api/photos/upload",
    tag = "photos",
    responses(
        (status = 200, description = "Presigned upload URL", body = UploadUrlResponse),
        (status = 500, description = "Object storage failure", body = ApiErrorBody)
    )
)]
pub async fn photo_upload_url(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let upload_url = data.object_store.upload_url().await?;
    Ok(HttpResponse::Ok().json(UploadUrlResponse { upload_url }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProcessPhotoRequest {
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPhotoResponse {
    pub object_path: String,
}

#[utoipa::path(
    post,
    path = "/api/photos/process",
    tag = "photos",
    request_body = ProcessPhotoRequest,
    responses(
        (status = 200, description = "Canonical object path", body = ProcessPhotoResponse),
        (status = 400, description = "photoURL missing", body = ApiErrorBody)
    )
)]
pub async fn process_photo(
    data: web::Data<AppState>,
    payload: web::Json<ProcessPhotoRequest>,
) -> Result<HttpResponse, ApiError> {
    let raw = payload
        .into_inner()
        .photo_url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("photoURL is required".into()))?;
    let object_path = data.object_store.normalize_path(&raw);
    Ok(HttpResponse::Ok().json(ProcessPhotoResponse { object_path }))
}

/// Serves an uploaded photo by its canonical path.
pub async fn get_object(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let object_path = format!("{OBJECTS_ROUTE}{}", path.into_inner());
    let (bytes, mime) = data.object_store.load(&object_path).await?;
    Ok(HttpResponse::Ok()
        .content_type(mime)
        .insert_header((header::CACHE_CONTROL, "private, max-age=3600"))
        .body(bytes))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}
