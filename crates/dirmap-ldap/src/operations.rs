//! Single round-trip operations expressed over one session.

use crate::codec::{self, ByteValued};
use crate::controls::{
    attach, parse_responses, to_wire_controls, OperationKind, OperationOptions, WireControl,
};
use crate::criteria::{resolve, Scope, SearchCriteria, SearchOptions};
use crate::extended::{self, PasswordModify};
use crate::modification::Changes;
use crate::outcome::{map_outcome, Outcome};
use crate::transport::{DirectorySession, ModifyDnRequest, SearchReply};
use dirmap_core::entry::{Entry, Value};
use dirmap_core::error::Error;
use dirmap_core::{ResultCode, Result};
use secrecy::SecretString;

fn request_controls(kind: OperationKind, options: &OperationOptions) -> Vec<WireControl> {
    to_wire_controls(&attach(kind, options))
}

pub(crate) async fn add<S>(
    session: &mut S,
    dn: &str,
    entry: &Entry,
    options: &OperationOptions,
) -> Result<Outcome>
where
    S: DirectorySession + ?Sized,
{
    let controls = request_controls(OperationKind::Add, options);
    let reply = session.add(dn, &codec::encode(entry), &controls).await?;
    map_outcome(reply, &options.byte_valued)
}

pub(crate) async fn modify<S>(
    session: &mut S,
    dn: &str,
    changes: Changes,
    options: &OperationOptions,
) -> Result<Outcome>
where
    S: DirectorySession + ?Sized,
{
    let modifications = changes.into_modifications()?;
    let controls = request_controls(OperationKind::Modify, options);
    let reply = session.modify(dn, &modifications, &controls).await?;
    map_outcome(reply, &options.byte_valued)
}

pub(crate) async fn modify_rdn<S>(
    session: &mut S,
    dn: &str,
    new_rdn: &str,
    delete_old_rdn: bool,
    new_superior: Option<&str>,
    options: &OperationOptions,
) -> Result<Outcome>
where
    S: DirectorySession + ?Sized,
{
    let request = ModifyDnRequest {
        dn: dn.to_string(),
        new_rdn: new_rdn.to_string(),
        delete_old_rdn,
        new_superior: new_superior.map(str::to_string),
        controls: request_controls(OperationKind::ModifyDn, options),
    };
    let reply = session.modify_dn(&request).await?;
    map_outcome(reply, &options.byte_valued)
}

pub(crate) async fn delete<S>(
    session: &mut S,
    dn: &str,
    options: &OperationOptions,
) -> Result<Outcome>
where
    S: DirectorySession + ?Sized,
{
    let controls = request_controls(OperationKind::Delete, options);
    let reply = session.delete(dn, &controls).await?;
    map_outcome(reply, &options.byte_valued)
}

/// Compare true/false map to a boolean; every other code is a protocol error.
pub(crate) async fn compare<S>(
    session: &mut S,
    dn: &str,
    attribute: &str,
    value: &Value,
    options: &OperationOptions,
) -> Result<bool>
where
    S: DirectorySession + ?Sized,
{
    let controls = request_controls(OperationKind::Compare, options);
    let reply = session
        .compare(dn, attribute, value.as_bytes(), &controls)
        .await?;
    match reply.code {
        ResultCode::COMPARE_TRUE => Ok(true),
        ResultCode::COMPARE_FALSE => Ok(false),
        code => Err(Error::protocol(code, reply.message)),
    }
}

/// Reads one entry; a missing entry is `None` rather than an error.
pub(crate) async fn get<S>(
    session: &mut S,
    dn: &str,
    options: &SearchOptions,
) -> Result<Option<Entry>>
where
    S: DirectorySession + ?Sized,
{
    let criteria = resolve(dn, &options.clone().with_scope(Scope::Base))?;
    match search(session, &criteria).await {
        Ok(entries) => Ok(entries.into_iter().next()),
        Err(err) if err.result_code() == Some(ResultCode::NO_SUCH_OBJECT) => Ok(None),
        Err(err) => Err(err),
    }
}

/// One-shot search. Size-limit-exceeded returns the partial entries.
pub(crate) async fn search<S>(session: &mut S, criteria: &SearchCriteria) -> Result<Vec<Entry>>
where
    S: DirectorySession + ?Sized,
{
    let reply = session.search(&criteria.to_request()).await?;
    decode_search_reply(reply, criteria)
}

fn decode_search_reply(reply: SearchReply, criteria: &SearchCriteria) -> Result<Vec<Entry>> {
    ensure_search_code(reply.code, &reply.message)?;
    if criteria.response_callback.is_some() {
        criteria.notify(&parse_responses(&reply.controls, &criteria.byte_valued)?);
    }
    Ok(decode_entries(&reply, &criteria.byte_valued))
}

/// Searches tolerate size-limit-exceeded; partial results are still results.
pub(crate) fn ensure_search_code(code: ResultCode, message: &str) -> Result<()> {
    match code {
        ResultCode::SUCCESS | ResultCode::SIZE_LIMIT_EXCEEDED => Ok(()),
        code => Err(Error::protocol(code, message)),
    }
}

fn decode_entries(reply: &SearchReply, byte_valued: &ByteValued) -> Vec<Entry> {
    reply
        .entries
        .iter()
        .map(|wire| codec::decode(wire, byte_valued, true))
        .collect()
}

pub(crate) async fn bind<S>(session: &mut S, dn: &str, password: &SecretString) -> Result<()>
where
    S: DirectorySession + ?Sized,
{
    let reply = session.bind(dn, password).await?;
    if reply.code.is_success() {
        Ok(())
    } else {
        Err(Error::protocol(reply.code, reply.message))
    }
}

pub(crate) async fn who_am_i<S>(session: &mut S, options: &OperationOptions) -> Result<String>
where
    S: DirectorySession + ?Sized,
{
    let request = extended::who_am_i_request(request_controls(OperationKind::Extended, options));
    let reply = session.extended(&request).await?;
    if !reply.code.is_success() {
        return Err(Error::protocol(reply.code, reply.message));
    }
    Ok(extended::parse_who_am_i(&reply))
}

pub(crate) async fn password_modify<S>(
    session: &mut S,
    request: &PasswordModify,
    options: &OperationOptions,
) -> Result<Option<SecretString>>
where
    S: DirectorySession + ?Sized,
{
    let request = request.to_request(request_controls(OperationKind::Extended, options));
    let reply = session.extended(&request).await?;
    if !reply.code.is_success() {
        return Err(Error::protocol(reply.code, reply.message));
    }
    extended::parse_generated_password(&reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireEntry;
    use crate::controls::{ResponseControl, PRE_READ_OID, SUBTREE_DELETE_OID};
    use crate::modification::{ChangeSet, ModKind};
    use crate::transport::{ExtendedReply, MockDirectorySession, OperationReply};

    #[tokio::test]
    async fn add_encodes_entry_and_maps_success() {
        let mut session = MockDirectorySession::new();
        session
            .expect_add()
            .withf(|dn, attributes, controls| {
                dn == "uid=jdoe,dc=example,dc=com"
                    && attributes.iter().any(|a| a.name == "uid" && a.values == vec![b"jdoe".to_vec()])
                    && controls.is_empty()
            })
            .returning(|_, _, _| Ok(OperationReply::success()));

        let entry = Entry::new().with("uid", "jdoe").with("objectClass", "account");
        let outcome = add(&mut session, "uid=jdoe,dc=example,dc=com", &entry, &OperationOptions::new())
            .await
            .unwrap();
        assert_eq!(outcome.name, "success");
    }

    #[tokio::test]
    async fn modify_returns_pre_and_post_read_entries() {
        let mut session = MockDirectorySession::new();
        session
            .expect_modify()
            .withf(|_, mods, controls| {
                mods.len() == 1
                    && mods[0].kind == ModKind::Replace
                    && controls.iter().any(|c| c.oid == PRE_READ_OID)
            })
            .returning(|_, _, _| {
                Ok(OperationReply::success().with_controls(vec![
                    ResponseControl::PreRead(Entry::new().with("description", "old")).to_wire(),
                    ResponseControl::PostRead(Entry::new().with("description", "new")).to_wire(),
                ]))
            });

        let options = OperationOptions::new()
            .with_pre_read(["description"])
            .with_post_read(["description"]);
        let outcome = modify(
            &mut session,
            "cn=x",
            ChangeSet::new().replace("description", "new").into(),
            &options,
        )
        .await
        .unwrap();

        assert_eq!(outcome.pre_read, Some(Entry::new().with("description", "old")));
        assert_eq!(outcome.post_read, Some(Entry::new().with("description", "new")));
    }

    #[tokio::test]
    async fn modify_rejects_invalid_change_sets_before_sending() {
        let mut session = MockDirectorySession::new();
        session.expect_modify().never();

        let err = modify(
            &mut session,
            "cn=x",
            ChangeSet::new().increment("uidNumber", vec!["1", "2"]).into(),
            &OperationOptions::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn delete_of_missing_entry_reports_no_such_object() {
        let mut session = MockDirectorySession::new();
        session
            .expect_delete()
            .withf(|dn, _| dn == "cn=ghost,dc=example,dc=com")
            .returning(|_, _| Ok(OperationReply::new(ResultCode::NO_SUCH_OBJECT, "")));

        let err = delete(&mut session, "cn=ghost,dc=example,dc=com", &OperationOptions::new())
            .await
            .unwrap_err();
        let code = err.result_code().unwrap();
        assert_eq!(code.name(), "no such object");
    }

    #[tokio::test]
    async fn delete_subtree_sends_control() {
        let mut session = MockDirectorySession::new();
        session
            .expect_delete()
            .withf(|_, controls| controls.len() == 1 && controls[0].oid == SUBTREE_DELETE_OID)
            .returning(|_, _| Ok(OperationReply::success()));

        delete(&mut session, "ou=old,dc=example,dc=com", &OperationOptions::new().with_delete_subtree())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn modify_rdn_builds_request() {
        let mut session = MockDirectorySession::new();
        session
            .expect_modify_dn()
            .withf(|request| {
                request.new_rdn == "uid=jane"
                    && request.delete_old_rdn
                    && request.new_superior.as_deref() == Some("ou=Staff,dc=example,dc=com")
            })
            .returning(|_| Ok(OperationReply::success()));

        modify_rdn(
            &mut session,
            "uid=jdoe,ou=People,dc=example,dc=com",
            "uid=jane",
            true,
            Some("ou=Staff,dc=example,dc=com"),
            &OperationOptions::new(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn compare_maps_true_false_and_faults() {
        let mut session = MockDirectorySession::new();
        let mut codes = vec![
            ResultCode::COMPARE_TRUE,
            ResultCode::COMPARE_FALSE,
            ResultCode::NO_SUCH_OBJECT,
        ]
        .into_iter();
        session
            .expect_compare()
            .times(3)
            .returning(move |_, _, _, _| {
                Ok(OperationReply::new(codes.next().unwrap_or(ResultCode::OTHER), ""))
            });

        let value = Value::from("jdoe");
        let options = OperationOptions::new();
        assert!(compare(&mut session, "cn=x", "uid", &value, &options).await.unwrap());
        assert!(!compare(&mut session, "cn=x", "uid", &value, &options).await.unwrap());
        assert!(matches!(
            compare(&mut session, "cn=x", "uid", &value, &options).await,
            Err(Error::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn get_treats_missing_entry_as_none() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .withf(|request| request.scope == Scope::Base)
            .returning(|_| {
                Ok(SearchReply::success(Vec::new()).with_code(ResultCode::NO_SUCH_OBJECT, ""))
            });

        let found = get(&mut session, "cn=ghost", &SearchOptions::new()).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn search_tolerates_size_limit() {
        let mut session = MockDirectorySession::new();
        session.expect_search().returning(|_| {
            Ok(SearchReply::success(vec![
                WireEntry::new("uid=a,dc=example,dc=com").with_attribute("uid", ["a"]),
            ])
            .with_code(ResultCode::SIZE_LIMIT_EXCEEDED, "size limit"))
        });

        let criteria = resolve("dc=example,dc=com", &SearchOptions::new().with_size_limit(1)).unwrap();
        let entries = search(&mut session, &criteria).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dn(), Some("uid=a,dc=example,dc=com"));
    }

    #[tokio::test]
    async fn bind_failure_is_a_protocol_error() {
        let mut session = MockDirectorySession::new();
        session
            .expect_bind()
            .returning(|_, _| Ok(OperationReply::new(ResultCode::INVALID_CREDENTIALS, "")));

        let err = bind(&mut session, "cn=admin", &SecretString::from("wrong".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.result_code(), Some(ResultCode::INVALID_CREDENTIALS));
    }

    #[tokio::test]
    async fn who_am_i_reads_identity() {
        let mut session = MockDirectorySession::new();
        session
            .expect_extended()
            .withf(|request| request.oid == extended::WHO_AM_I_OID)
            .returning(|_| {
                Ok(ExtendedReply {
                    code: ResultCode::SUCCESS,
                    message: String::new(),
                    oid: None,
                    value: Some(b"u:jdoe".to_vec()),
                })
            });

        assert_eq!(
            who_am_i(&mut session, &OperationOptions::new()).await.unwrap(),
            "u:jdoe"
        );
    }
}
