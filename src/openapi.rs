use crate::error::ApiErrorBody;
use crate::models::{EmailReportRequest, NewReport, Report, ReportStats, StatusUpdate};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::create_report,
        crate::routes::list_reports,
        crate::routes::report_stats,
        crate::routes::get_report,
        crate::routes::get_report_by_reference,
        crate::routes::report_pdf,
        crate::routes::report_html,
        crate::routes::email_report,
        crate::routes::update_status,
        crate::routes::photo_upload_url,
        crate::routes::process_photo,
    ),
    components(schemas(
        Report, NewReport, StatusUpdate, EmailReportRequest, ReportStats, ApiErrorBody,
        crate::routes::MessageResponse, crate::routes::UploadUrlResponse,
        crate::routes::ProcessPhotoRequest, crate::routes::ProcessPhotoResponse
    )),
    tags(
        (name = "reports", description = "Damage report intake and review"),
        (name = "documents", description = "PDF/HTML rendering and email dispatch"),
        (name = "photos", description = "Photo upload URLs and path normalization"),
    )
)]
pub struct ApiDoc;
