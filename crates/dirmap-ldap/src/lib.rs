//! Directory mapping layer over LDAP.
//!
//! This crate turns plain [`dirmap_core::Entry`] values and change-sets into LDAP requests,
//! attaches request controls from high-level options, and maps replies, response controls, and
//! search results back into plain data. Searches can run one-shot, paged over a single
//! connection, or streamed entry by entry.
//!
//! Everything above the [`DirectorySession`] and [`ConnectionPool`] traits is transport
//! independent; [`LdapPool`] provides them on top of `ldap3`.

#![deny(missing_docs)]

mod asn1;
mod client;
mod codec;
mod config;
mod controls;
mod criteria;
mod extended;
mod modification;
mod operations;
mod outcome;
mod paginator;
mod pool;
mod streaming;
mod transport;

pub use client::{Connection, DirectoryClient};
pub use codec::{
    decode, decode_attributes, encode, ByteValued, Representation, WireAttribute, WireEntry,
};
pub use config::{
    ConnectionConfig, PoolConfig, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_RESPONSE_TIMEOUT_SECS,
};
pub use controls::{
    attach, build_sort_control, merge_response, parse_response, parse_responses,
    to_wire_controls, AuthzId, Control, OperationKind, OperationOptions, ResponseControl,
    SortDirection, SortKey, SortSpec, WireControl, PAGED_RESULTS_OID, POST_READ_OID, PRE_READ_OID,
    PROXIED_AUTHORIZATION_OID, SORT_REQUEST_OID, SORT_RESPONSE_OID, SUBTREE_DELETE_OID,
};
pub use criteria::{
    resolve, AttributeSelection, ResponseCallback, Scope, SearchCriteria, SearchOptions,
    ALL_USER_ATTRIBUTES, DEFAULT_FILTER,
};
pub use extended::{PasswordModify, PASSWORD_MODIFY_OID, WHO_AM_I_OID};
pub use modification::{ChangeSet, Changes, ModKind, ModPayload, ModValue, Modification};
pub use outcome::{map_outcome, Outcome};
pub use paginator::{SearchPaginator, DEFAULT_PAGE_SIZE};
pub use pool::{LdapPool, LdapSession};
pub use streaming::{stream_search, StreamSummary};
pub use transport::{
    ConnectionPool, DirectorySession, ExtendedReply, ExtendedRequest, ModifyDnRequest,
    OperationReply, SearchReply, SearchRequest, StreamFault,
};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = dirmap_core::Result<T>;
