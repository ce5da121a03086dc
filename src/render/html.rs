use minijinja::{context, Environment};
use once_cell::sync::Lazy;

use super::{RenderError, ReportDocument};

const TEMPLATE_NAME: &str = "report.html";

// `.html` name turns on HTML autoescaping for every interpolated value.
static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    if let Err(e) = env.add_template(TEMPLATE_NAME, include_str!("../../templates/report.html")) {
        tracing::error!(error = %e, "report template failed to parse");
    }
    env
});

pub(super) fn render(doc: &ReportDocument) -> Result<String, RenderError> {
    let template = TEMPLATES
        .get_template(TEMPLATE_NAME)
        .map_err(|e| RenderError::Template(e.to_string()))?;
    template
        .render(context! { doc => doc })
        .map_err(|e| RenderError::Template(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{render_time, sample_report};
    use super::super::ReportRenderer;

    #[test]
    fn html_contains_report_data() {
        let report = sample_report();
        let html = ReportRenderer::default().render_html(&report, render_time()).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        for needle in [
            "VCR-2024-004821",
            "ABC-1234",
            "Toyota",
            "Corolla",
            "Jordan Blake",
            "jordan@example.com",
            "submitted",
            "Vehicle Information",
            "Incident Details",
            "Reporter Information",
            "Generated March 16, 2024 12:00 UTC",
            "<img src=",
            "0b1e",
        ] {
            assert!(html.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn user_text_is_escaped() {
        let mut report = sample_report();
        report.description = "<script>alert('x')</script> & more".into();
        let html = ReportRenderer::default().render_html(&report, render_time()).unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn rendering_is_repeatable() {
        let report = sample_report();
        let r = ReportRenderer::new(Some("https://claims.example.com".into()));
        let a = r.render_html(&report, render_time()).unwrap();
        let b = r.render_html(&report, render_time()).unwrap();
        assert_eq!(a, b);
        // autoescape encodes '/' but the host survives verbatim
        assert!(a.contains("claims.example.com"));
    }
}
