//! Uniform result records for write operations.

use crate::codec::ByteValued;
use crate::controls::{merge_response, parse_responses};
use crate::transport::OperationReply;
use dirmap_core::entry::Entry;
use dirmap_core::error::Error;
use dirmap_core::{ResultCode, Result};
use serde::Serialize;

/// Result of an add, modify, modify-DN, or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Outcome {
    /// Numeric result code.
    pub code: ResultCode,
    /// Canonical name of the code.
    pub name: &'static str,
    /// Entry state before the operation, when a pre-read was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_read: Option<Entry>,
    /// Entry state after the operation, when a post-read was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_read: Option<Entry>,
}

impl Outcome {
    /// Creates an outcome without read entries.
    #[must_use]
    pub fn new(code: ResultCode) -> Self {
        Self {
            code,
            name: code.name(),
            pre_read: None,
            post_read: None,
        }
    }
}

/// Maps a raw operation reply to an [`Outcome`].
///
/// # Errors
///
/// Returns [`Error::Protocol`] for non-success codes and [`Error::Decode`] for malformed
/// pre/post-read controls.
pub fn map_outcome(reply: OperationReply, byte_valued: &ByteValued) -> Result<Outcome> {
    if !reply.code.is_success() {
        return Err(Error::protocol(reply.code, reply.message));
    }

    let mut outcome = Outcome::new(reply.code);
    merge_response(&mut outcome, parse_responses(&reply.controls, byte_valued)?);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::ResponseControl;

    #[test]
    fn success_maps_code_and_name() {
        let outcome = map_outcome(OperationReply::success(), &ByteValued::new()).unwrap();
        assert_eq!(outcome.code, ResultCode::SUCCESS);
        assert_eq!(outcome.name, "success");
        assert!(outcome.pre_read.is_none());
    }

    #[test]
    fn failures_become_protocol_errors() {
        let reply = OperationReply::new(ResultCode::NO_SUCH_OBJECT, "no entry cn=ghost");
        let err = map_outcome(reply, &ByteValued::new()).unwrap_err();

        assert_eq!(err.result_code(), Some(ResultCode::NO_SUCH_OBJECT));
        assert_eq!(err.result_code().map(ResultCode::name), Some("no such object"));
    }

    #[test]
    fn read_controls_are_merged() {
        let before = Entry::new().with("description", "before");
        let after = Entry::new().with("description", "after");
        let reply = OperationReply::success().with_controls(vec![
            ResponseControl::PreRead(before.clone()).to_wire(),
            ResponseControl::PostRead(after.clone()).to_wire(),
        ]);

        let outcome = map_outcome(reply, &ByteValued::new()).unwrap();
        assert_eq!(outcome.pre_read, Some(before));
        assert_eq!(outcome.post_read, Some(after));
    }

    #[test]
    fn serializes_with_kebab_case_keys() {
        let mut outcome = Outcome::new(ResultCode::SUCCESS);
        outcome.post_read = Some(Entry::new().with("cn", "x"));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["post-read"]["cn"], "x");
        assert!(json.get("pre-read").is_none());
    }
}
