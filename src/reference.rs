use chrono::{Datelike, Utc};
use rand::Rng;

pub const REFERENCE_PREFIX: &str = "VCR";

/// Upper bound (inclusive) for the numeric part of a reference.
const MAX_SERIAL: u32 = 999_999;

/// Human-facing claim reference, e.g. `VCR-2024-004821`.
///
/// Uniqueness is not guaranteed here; callers that store references
/// must check for collisions themselves.
pub fn generate_reference_number() -> String {
    generate_reference_number_at(Utc::now().year(), &mut rand::thread_rng())
}

pub fn generate_reference_number_at<R: Rng + ?Sized>(year: i32, rng: &mut R) -> String {
    let serial = rng.gen_range(0..=MAX_SERIAL);
    format!("{REFERENCE_PREFIX}-{year}-{serial:06}")
}

/// Checks the `VCR-YYYY-NNNNNN` shape.
pub fn is_reference_number(candidate: &str) -> bool {
    let mut parts = candidate.split('-');
    let (Some(prefix), Some(year), Some(serial), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    prefix == REFERENCE_PREFIX
        && year.len() == 4
        && year.bytes().all(|b| b.is_ascii_digit())
        && serial.len() == 6
        && serial.bytes().all(|b| b.is_ascii_digit())
}
