//! `application/x-www-form-urlencoded` codec.
//!
//! A body is split on `&` into segments and each segment on its first `=`;
//! keys and values are then `+`-to-space converted and percent-decoded.
//! Every segment must carry a separator and every decoded component must be
//! valid UTF-8, otherwise the whole body is rejected.

use indexmap::IndexMap;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::str::Utf8Error;

/// One decoded form body, in field order.
///
/// Repeated keys keep their first position and the last value.
pub type Submission = IndexMap<String, String>;

/// Characters left unescaped when encoding, matching the WHATWG form serializer.
const FORM_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'*')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_');

/// The body could not be read as a submission.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed submission: segment {segment:?} has no '=' separator")]
    MissingSeparator { segment: String },

    #[error("malformed submission: not valid UTF-8 ({0})")]
    InvalidUtf8(#[from] Utf8Error),
}

pub fn decode(body: &[u8]) -> Result<Submission, DecodeError> {
    let text = std::str::from_utf8(body)?;
    let mut submission = Submission::new();

    for segment in text.split('&') {
        let (key, value) =
            segment
                .split_once('=')
                .ok_or_else(|| DecodeError::MissingSeparator {
                    segment: segment.to_owned(),
                })?;
        submission.insert(unescape(key)?, unescape(value)?);
    }

    Ok(submission)
}

pub fn encode(submission: &Submission) -> String {
    submission
        .iter()
        .map(|(key, value)| format!("{}={}", escape(key), escape(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn unescape(component: &str) -> Result<String, Utf8Error> {
    let spaced = component.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
}

fn escape(component: &str) -> String {
    utf8_percent_encode(component, FORM_COMPONENT)
        .to_string()
        .replace("%20", "+")
}
