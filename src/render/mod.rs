//! Report documents.
//!
//! Both output formats are built from the same [`ReportDocument`], so the HTML
//! view and the PDF download always carry the same sections and values. Output
//! depends only on the report, the render timestamp and the photo base URL.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::Report;

mod html;
mod pdf;

pub const DOCUMENT_TITLE: &str = "Vehicle Damage Report";
pub const NOT_PROVIDED: &str = "Not provided";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template: {0}")]
    Template(String),
    #[error("pdf: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub label: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub title: &'static str,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Photo {
    pub label: String,
    pub url: String,
}

/// Format-independent layout of one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDocument {
    pub title: &'static str,
    pub reference_number: String,
    pub status: String,
    pub submitted_at: String,
    pub generated_at: String,
    pub sections: Vec<Section>,
    pub photos: Vec<Photo>,
}

fn field(label: &'static str, value: &str) -> Field {
    Field { label, value: value.to_string() }
}

fn optional(label: &'static str, value: Option<&str>) -> Field {
    let value = value.filter(|v| !v.trim().is_empty()).unwrap_or(NOT_PROVIDED);
    field(label, value)
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%B %-d, %Y %H:%M UTC").to_string()
}

impl ReportDocument {
    pub fn from_report(report: &Report, generated_at: DateTime<Utc>, photo_base: Option<&str>) -> Self {
        let sections = vec![
            Section {
                title: "Vehicle Information",
                fields: vec![
                    field("License Plate", &report.license_plate),
                    optional("VIN", report.vin.as_deref()),
                    field("Make", &report.make),
                    field("Model", &report.model),
                    field("Year", &report.year),
                    optional("Color", report.color.as_deref()),
                ],
            },
            Section {
                title: "Incident Details",
                fields: vec![
                    field("Date", &report.incident_date),
                    optional("Time", report.incident_time.as_deref()),
                    optional("Location", report.location.as_deref()),
                    field("Description", &report.description),
                ],
            },
            Section {
                title: "Reporter Information",
                fields: vec![
                    field("Name", &report.reporter_name),
                    field("Phone", &report.reporter_phone),
                    field("Email", &report.reporter_email),
                ],
            },
        ];
        let photos = report
            .photo_urls
            .iter()
            .enumerate()
            .map(|(i, url)| Photo {
                label: format!("Photo {}", i + 1),
                url: resolve_photo_url(url, photo_base),
            })
            .collect();
        Self {
            title: DOCUMENT_TITLE,
            reference_number: report.reference_number.clone(),
            status: report.status.clone(),
            submitted_at: format_timestamp(report.created_at),
            generated_at: format_timestamp(generated_at),
            sections,
            photos,
        }
    }
}

/// Site-relative photo paths are made absolute when a public base is known,
/// so the links keep working inside an email client.
pub fn resolve_photo_url(url: &str, base: Option<&str>) -> String {
    match base {
        Some(base) if url.starts_with('/') => format!("{}{}", base.trim_end_matches('/'), url),
        _ => url.to_string(),
    }
}

pub fn pdf_filename(report: &Report) -> String {
    format!("vehicle-damage-report-{}.pdf", report.reference_number)
}

/// Renders reports into HTML and PDF.
#[derive(Debug, Clone, Default)]
pub struct ReportRenderer {
    photo_base: Option<String>,
}

impl ReportRenderer {
    pub fn new(photo_base: Option<String>) -> Self {
        Self { photo_base }
    }

    pub fn document(&self, report: &Report, generated_at: DateTime<Utc>) -> ReportDocument {
        ReportDocument::from_report(report, generated_at, self.photo_base.as_deref())
    }

    pub fn render_html(&self, report: &Report, generated_at: DateTime<Utc>) -> Result<String, RenderError> {
        html::render(&self.document(report, generated_at))
    }

    pub fn render_pdf(&self, report: &Report, generated_at: DateTime<Utc>) -> Result<Vec<u8>, RenderError> {
        pdf::render(&self.document(report, generated_at), generated_at)
    }
}
