//! Streaming search: one connection, one entry at a time.

use crate::codec;
use crate::controls::{parse_responses, ResponseControl};
use crate::criteria::SearchCriteria;
use crate::operations::ensure_search_code;
use crate::transport::{check_in, ConnectionPool, DirectorySession, StreamFault};
use dirmap_core::entry::Entry;
use dirmap_core::{ResultCode, Result};
use std::ops::ControlFlow;
use tracing::{debug, warn};

/// What a streamed search did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Entries handed to the callback.
    pub entries: usize,
    /// Unreadable entries that were skipped.
    pub skipped_faults: usize,
    /// The callback stopped the search early.
    pub cancelled: bool,
    /// Final result code; absent when cancelled.
    pub code: Option<ResultCode>,
    /// Response controls returned with the final result.
    pub controls: Vec<ResponseControl>,
}

/// Streams the results of `criteria` into `on_entry`.
///
/// The connection is checked out for the whole search. Response controls known when the search
/// starts are passed to the criteria's response callback once, before the first entry. Returning
/// [`ControlFlow::Break`] from `on_entry` cancels the search and discards the connection, which
/// may still have results in flight. Continuable faults are skipped; a fatal fault discards the
/// connection and is returned.
///
/// # Errors
///
/// Returns checkout and transport failures, fatal stream faults, malformed response controls,
/// and [`dirmap_core::Error::Protocol`] for final codes other than success and
/// size-limit-exceeded.
pub async fn stream_search<P, F>(
    pool: &P,
    criteria: &SearchCriteria,
    mut on_entry: F,
) -> Result<StreamSummary>
where
    P: ConnectionPool + ?Sized,
    F: FnMut(Entry) -> ControlFlow<()> + Send,
{
    let mut session = pool.acquire().await?;

    let initial = match session.begin_stream(&criteria.to_request()).await {
        Ok(controls) => controls,
        Err(err) => {
            check_in(pool, session, &err).await;
            return Err(err);
        }
    };

    if criteria.response_callback.is_some() {
        match parse_responses(&initial, &criteria.byte_valued) {
            Ok(controls) => criteria.notify(&controls),
            Err(err) => {
                pool.invalidate(session).await;
                return Err(err);
            }
        }
    }

    let mut summary = StreamSummary::default();
    loop {
        match session.next_entry().await {
            Ok(Some(wire)) => {
                let entry = codec::decode(&wire, &criteria.byte_valued, true);
                if entry.is_empty() {
                    continue;
                }
                summary.entries += 1;
                if on_entry(entry).is_break() {
                    debug!(entries = summary.entries, "streaming search cancelled");
                    summary.cancelled = true;
                    pool.invalidate(session).await;
                    return Ok(summary);
                }
            }
            Ok(None) => break,
            Err(StreamFault::Continuable(reason)) => {
                warn!("skipping unreadable search entry: {reason}");
                summary.skipped_faults += 1;
            }
            Err(StreamFault::Fatal(err)) => {
                warn!("streaming search aborted: {err}");
                pool.invalidate(session).await;
                return Err(err);
            }
        }
    }

    let done = match session.end_stream().await {
        Ok(reply) => reply,
        Err(err) => {
            check_in(pool, session, &err).await;
            return Err(err);
        }
    };
    pool.release(session).await;

    ensure_search_code(done.code, &done.message)?;

    summary.code = Some(done.code);
    summary.controls = parse_responses(&done.controls, &criteria.byte_valued)?;
    debug!(
        entries = summary.entries,
        skipped = summary.skipped_faults,
        "streaming search complete"
    );
    Ok(summary)
}
