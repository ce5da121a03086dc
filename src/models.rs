use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;
use validator::Validate;

pub type Id = String;

pub const STATUS_SUBMITTED: &str = "submitted";
pub const STATUS_UNDER_REVIEW: &str = "under review";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_REJECTED: &str = "rejected";

/// A submitted damage claim. Everything except `status` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[schema(value_type = String)]
    pub id: Id,
    pub reference_number: String,

    // vehicle
    pub license_plate: String,
    pub vin: Option<String>,
    pub make: String,
    pub model: String,
    pub year: String,
    pub color: Option<String>,

    // incident
    pub incident_date: String,
    pub incident_time: Option<String>,
    pub location: Option<String>,
    pub description: String,

    // reporter
    pub reporter_name: String,
    pub reporter_phone: String,
    pub reporter_email: String,

    pub photo_urls: Vec<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// Assemble a stored record from a validated draft.
    pub fn from_draft(
        id: Id,
        reference_number: String,
        created_at: DateTime<Utc>,
        draft: NewReport,
    ) -> Self {
        Self {
            id,
            reference_number,
            license_plate: draft.license_plate,
            vin: draft.vin,
            make: draft.make,
            model: draft.model,
            year: draft.year,
            color: draft.color,
            incident_date: draft.incident_date,
            incident_time: draft.incident_time,
            location: draft.location,
            description: draft.description,
            reporter_name: draft.reporter_name,
            reporter_phone: draft.reporter_phone,
            reporter_email: draft.reporter_email,
            photo_urls: draft.photo_urls,
            status: STATUS_SUBMITTED.to_string(),
            created_at,
        }
    }

    /// True when any of the dashboard search fields contains `needle`.
    /// `needle` must already be lowercase.
    pub fn matches_search(&self, needle: &str) -> bool {
        [
            &self.reference_number,
            &self.license_plate,
            &self.reporter_name,
            &self.reporter_email,
            &self.make,
            &self.model,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
    }
}

/// Claim payload as posted by the submission form.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    #[serde(default)]
    #[validate(length(min = 1, message = "License plate is required"))]
    pub license_plate: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub vin: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, message = "Make is required"))]
    pub make: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Model is required"))]
    pub model: String,
    #[serde(default)]
    #[validate(length(equal = 4, message = "Year must be 4 digits"))]
    pub year: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub color: Option<String>,

    #[serde(default)]
    #[validate(length(min = 1, message = "Incident date is required"))]
    pub incident_date: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub incident_time: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub location: Option<String>,
    #[serde(default)]
    #[validate(length(min = 10, message = "Description must be at least 10 characters"))]
    pub description: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "Reporter name is required"))]
    pub reporter_name: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Contact number is required"))]
    pub reporter_phone: String,
    #[serde(default)]
    #[validate(email(message = "Valid email address is required"))]
    pub reporter_email: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 10, message = "Between 1 and 10 photos are required"))]
    pub photo_urls: Vec<String>,
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusUpdate {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailReportRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_include_attachment")]
    pub include_attachment: bool,
}

fn default_include_attachment() -> bool {
    true
}

/// Dashboard counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

impl ReportStats {
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a Report>) -> Self {
        let mut stats = Self::default();
        for report in reports {
            stats.total += 1;
            *stats.by_status.entry(report.status.clone()).or_default() += 1;
        }
        stats
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    pub search: Option<String>,
    pub status: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::draft;
    use super::*;

    #[test]
    fn valid_draft_passes() {
        assert!(draft().validate().is_ok());
    }

    #[test]
    fn photo_bounds_enforced() {
        let mut d = draft();
        d.photo_urls.clear();
        let errs = d.validate().unwrap_err();
        assert!(errs.field_errors().contains_key("photo_urls"));

        d.photo_urls = (0..11).map(|i| format!("/objects/uploads/{i}")).collect();
        assert!(d.validate().is_err());

        d.photo_urls.truncate(10);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn short_description_and_bad_email_rejected() {
        let mut d = draft();
        d.description = "dent".into();
        d.reporter_email = "not-an-email".into();
        let errs = d.validate().unwrap_err();
        let fields = errs.field_errors();
        assert!(fields.contains_key("description"));
        assert!(fields.contains_key("reporter_email"));
    }

    #[test]
    fn blank_optionals_deserialize_as_none() {
        let body = serde_json::json!({
            "licensePlate": "X1", "vin": "", "make": "Ford", "model": "Focus",
            "year": "2020", "color": "   ", "incidentDate": "2024-01-01",
            "description": "Side mirror knocked off", "reporterName": "Sam",
            "reporterPhone": "123", "reporterEmail": "sam@example.com",
            "photoUrls": ["/objects/a"]
        });
        let d: NewReport = serde_json::from_value(body).unwrap();
        assert_eq!(d.vin, None);
        assert_eq!(d.color, None);
        assert_eq!(d.location, None);
    }

    #[test]
    fn missing_required_keys_fail_validation_not_parsing() {
        let d: NewReport = serde_json::from_str("{}").unwrap();
        let errs = d.validate().unwrap_err();
        let fields = errs.field_errors();
        for key in [
            "license_plate", "make", "model", "year", "incident_date", "description",
            "reporter_name", "reporter_phone", "reporter_email", "photo_urls",
        ] {
            assert!(fields.contains_key(key), "no error for {key}");
        }
    }

    #[test]
    fn email_request_defaults_to_attachment() {
        let req: EmailReportRequest = serde_json::from_str(r#"{"email":"a@b.co"}"#).unwrap();
        assert!(req.include_attachment);
    }
}
