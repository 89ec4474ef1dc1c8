//! Concatenation order.
//!
//! Clients such as n8n name their parts `audio_0`, `audio_1`, ... and the
//! merge must follow those numbers, not the order the parts arrived in and
//! not the lexicographic order of the names (`audio_10` comes after
//! `audio_2`).

use super::upload::Upload;

/// Numeric ordering key of a form-field name.
///
/// Every non-digit character is dropped and the remaining digits are read
/// as one number, so `audio_12` and `a1b2` both give 12. A name without any
/// digits gives 0. Keys too long for `u64` saturate instead of failing.
pub fn order_key(field_name: &str) -> u64 {
    field_name
        .chars()
        .filter_map(|c| c.to_digit(10))
        .fold(0u64, |acc, digit| {
            acc.saturating_mul(10).saturating_add(u64::from(digit))
        })
}

/// Sort uploads ascending by [`order_key`].
///
/// The sort is stable: uploads sharing a key keep their arrival order.
pub fn sort_uploads(uploads: &mut [Upload]) {
    uploads.sort_by_key(|upload| order_key(&upload.field_name));
}
