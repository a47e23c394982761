//! Cookie-driven paged search (RFC 2696).

use crate::codec;
use crate::controls::{paged_results_control, paging_cookie, parse_responses};
use crate::criteria::SearchCriteria;
use crate::operations::ensure_search_code;
use crate::transport::DirectorySession;
use dirmap_core::entry::Entry;
use dirmap_core::Result;
use tracing::debug;

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Retrieves every entry of a search page by page.
///
/// Paging cookies are only valid on the connection that issued them, so a whole run uses one
/// session. Entries without attributes are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchPaginator {
    page_size: u32,
}

impl Default for SearchPaginator {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl SearchPaginator {
    /// Creates a paginator; a zero page size falls back to [`DEFAULT_PAGE_SIZE`].
    #[must_use]
    pub const fn new(page_size: u32) -> Self {
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        Self { page_size }
    }

    /// Configured page size.
    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Runs the search until the server returns an absent or empty cookie.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::Protocol`] for result codes other than success and
    /// size-limit-exceeded, and propagates transport and control decoding failures.
    pub async fn run<S>(&self, session: &mut S, criteria: &SearchCriteria) -> Result<Vec<Entry>>
    where
        S: DirectorySession + ?Sized,
    {
        let mut entries = Vec::new();
        let mut cookie = Vec::new();
        let mut pages = 0_usize;

        loop {
            let mut request = criteria.to_request();
            request
                .controls
                .push(paged_results_control(self.page_size, &cookie));

            let reply = session.search(&request).await?;
            ensure_search_code(reply.code, &reply.message)?;
            pages += 1;

            let controls = parse_responses(&reply.controls, &criteria.byte_valued)?;
            criteria.notify(&controls);

            entries.extend(
                reply
                    .entries
                    .iter()
                    .map(|wire| codec::decode(wire, &criteria.byte_valued, true))
                    .filter(|entry| !entry.is_empty()),
            );
            debug!(page = pages, total = entries.len(), "paged search page received");

            match paging_cookie(&controls) {
                Some(next) if !next.is_empty() => cookie = next.to_vec(),
                _ => break,
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireEntry;
    use crate::controls::{ResponseControl, WireControl, PAGED_RESULTS_OID, SORT_RESPONSE_OID};
    use crate::criteria::{resolve, SearchOptions};
    use crate::transport::{MockDirectorySession, SearchReply, SearchRequest};
    use dirmap_core::error::Error;
    use dirmap_core::ResultCode;
    use ldap3::controls::{PagedResults, RawControl};
    use std::sync::{Arc, Mutex};

    fn requested_page(request: &SearchRequest) -> (i64, Vec<u8>) {
        let control = request
            .controls
            .iter()
            .find(|control| control.oid == PAGED_RESULTS_OID)
            .expect("paged results control");
        let page = RawControl::from(control.clone()).parse::<PagedResults>();
        (i64::from(page.size), page.cookie)
    }

    fn page(uids: &[&str], cookie: Option<&[u8]>) -> SearchReply {
        let entries = uids
            .iter()
            .map(|uid| WireEntry::new(format!("uid={uid},dc=example,dc=com")).with_attribute("uid", [*uid]))
            .collect();
        let controls = cookie
            .map(|cookie| {
                vec![ResponseControl::PagedResults {
                    size: 0,
                    cookie: cookie.to_vec(),
                }
                .to_wire()]
            })
            .unwrap_or_default();
        SearchReply::success(entries).with_controls(controls)
    }

    fn criteria() -> SearchCriteria {
        resolve("dc=example,dc=com", &SearchOptions::new()).unwrap()
    }

    #[tokio::test]
    async fn single_page_without_cookie() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .times(1)
            .withf(|request| requested_page(request) == (500, Vec::new()))
            .returning(|_| Ok(page(&["a", "b"], None)));

        let entries = SearchPaginator::default()
            .run(&mut session, &criteria())
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn follows_cookies_until_empty() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let mut replies = vec![
            page(&["a"], Some(b"c1".as_slice())),
            page(&["b"], Some(b"c2".as_slice())),
            page(&["c"], Some(b"".as_slice())),
        ]
        .into_iter();

        let mut session = MockDirectorySession::new();
        session.expect_search().times(3).returning(move |request| {
            recorded.lock().unwrap().push(requested_page(request));
            Ok(replies.next().unwrap())
        });

        let entries = SearchPaginator::new(2)
            .run(&mut session, &criteria())
            .await
            .unwrap();

        let uids: Vec<_> = entries.iter().filter_map(|e| e.dn()).collect();
        assert_eq!(
            uids,
            vec!["uid=a,dc=example,dc=com", "uid=b,dc=example,dc=com", "uid=c,dc=example,dc=com"]
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(2, Vec::new()), (2, b"c1".to_vec()), (2, b"c2".to_vec())]
        );
    }

    #[tokio::test]
    async fn drops_entries_without_attributes() {
        let mut session = MockDirectorySession::new();
        session.expect_search().returning(|_| {
            Ok(SearchReply::success(vec![
                WireEntry::new("cn=empty,dc=example,dc=com"),
                WireEntry::new("cn=full,dc=example,dc=com").with_attribute("cn", ["full"]),
            ]))
        });

        let entries = SearchPaginator::default()
            .run(&mut session, &criteria())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dn(), Some("cn=full,dc=example,dc=com"));
    }

    #[tokio::test]
    async fn protocol_failures_abort() {
        let mut session = MockDirectorySession::new();
        session.expect_search().returning(|_| {
            Ok(SearchReply::success(Vec::new()).with_code(ResultCode::UNWILLING_TO_PERFORM, "no paging"))
        });

        let err = SearchPaginator::default()
            .run(&mut session, &criteria())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn malformed_sort_result_keeps_collected_pages() {
        let mut replies = vec![
            page(&["a"], Some(b"c1".as_slice())),
            page(&["b"], None).with_controls(vec![WireControl::new(SORT_RESPONSE_OID, false, None)]),
        ]
        .into_iter();

        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .times(2)
            .returning(move |_| Ok(replies.next().unwrap()));

        let entries = SearchPaginator::default()
            .run(&mut session, &criteria())
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn zero_page_size_uses_default() {
        assert_eq!(SearchPaginator::new(0).page_size(), DEFAULT_PAGE_SIZE);
    }
}
