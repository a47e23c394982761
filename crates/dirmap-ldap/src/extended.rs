//! Values of the "who am I" (RFC 4532) and password modify (RFC 3062) extended operations.

use crate::asn1;
use crate::controls::WireControl;
use crate::transport::{ExtendedReply, ExtendedRequest};
use dirmap_core::Result;
use ldap3::asn1::StructureTag;
use ldap3::exop::{Exop, PasswordModify as PasswordModifyExop, WhoAmI};
use secrecy::{ExposeSecret, SecretString};

/// "Who am I" extended operation.
pub const WHO_AM_I_OID: &str = "1.3.6.1.4.1.4203.1.11.3";
/// Password modify extended operation.
pub const PASSWORD_MODIFY_OID: &str = "1.3.6.1.4.1.4203.1.11.1";

fn extended_request(exop: Exop, controls: Vec<WireControl>) -> ExtendedRequest {
    ExtendedRequest {
        oid: exop.name.unwrap_or_default(),
        value: exop.val,
        controls,
    }
}

pub(crate) fn who_am_i_request(controls: Vec<WireControl>) -> ExtendedRequest {
    extended_request(WhoAmI.into(), controls)
}

/// The authorization identity in the reply; empty for anonymous sessions.
pub(crate) fn parse_who_am_i(reply: &ExtendedReply) -> String {
    reply
        .value
        .as_deref()
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .unwrap_or_default()
}

/// Password change request.
///
/// Without a user the bound identity's password is changed; without a new password the server
/// generates one and returns it.
#[derive(Debug, Default)]
pub struct PasswordModify {
    user: Option<String>,
    old_password: Option<SecretString>,
    new_password: Option<SecretString>,
}

impl PasswordModify {
    /// Changes the password of the bound identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets another user, by DN or authorization identity.
    #[must_use]
    pub fn for_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Targeted user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Supplies the current password.
    #[must_use]
    pub fn with_old_password(mut self, password: SecretString) -> Self {
        self.old_password = Some(password);
        self
    }

    /// Supplies the new password.
    #[must_use]
    pub fn with_new_password(mut self, password: SecretString) -> Self {
        self.new_password = Some(password);
        self
    }

    pub(crate) fn to_request(&self, controls: Vec<WireControl>) -> ExtendedRequest {
        let exop = PasswordModifyExop {
            user_id: self.user.as_deref(),
            old_pass: self.old_password.as_ref().map(|password| password.expose_secret()),
            new_pass: self.new_password.as_ref().map(|password| password.expose_secret()),
        };
        extended_request(exop.into(), controls)
    }
}

/// The server-generated password, if the reply carries one.
pub(crate) fn parse_generated_password(reply: &ExtendedReply) -> Result<Option<SecretString>> {
    let Some(value) = reply.value.as_deref() else {
        return Ok(None);
    };

    let value = asn1::parse(value, "password modify response")?;
    Ok(asn1::sequence(value, "password modify response")?
        .into_iter()
        .next()
        .and_then(|tag| asn1::context(tag, 0))
        .and_then(StructureTag::expect_primitive)
        .map(|raw| SecretString::from(String::from_utf8_lossy(&raw).into_owned())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirmap_core::error::Error;
    use dirmap_core::ResultCode;
    use ldap3::asn1::{OctetString, Tag, TagClass};

    fn reply(value: Option<Vec<u8>>) -> ExtendedReply {
        ExtendedReply {
            code: ResultCode::SUCCESS,
            message: String::new(),
            oid: None,
            value,
        }
    }

    #[test]
    fn who_am_i_returns_raw_identity() {
        assert_eq!(
            parse_who_am_i(&reply(Some(b"dn:cn=admin,dc=example,dc=com".to_vec()))),
            "dn:cn=admin,dc=example,dc=com"
        );
        assert_eq!(parse_who_am_i(&reply(None)), "");
        let request = who_am_i_request(Vec::new());
        assert_eq!(request.oid, WHO_AM_I_OID);
        assert!(request.value.is_none());
    }

    #[test]
    fn password_modify_encodes_present_fields_only() {
        let request = PasswordModify::new()
            .for_user("u:jdoe")
            .with_new_password(SecretString::from("s3cret".to_string()))
            .to_request(Vec::new());

        assert_eq!(request.oid, PASSWORD_MODIFY_OID);
        let mut expected = vec![0x30, 0x10, 0x80, 0x06];
        expected.extend_from_slice(b"u:jdoe");
        expected.extend_from_slice(&[0x82, 0x06]);
        expected.extend_from_slice(b"s3cret");
        assert_eq!(request.value, Some(expected));

        let own_password = PasswordModify::new().to_request(Vec::new());
        assert_eq!(own_password.oid, PASSWORD_MODIFY_OID);
        assert!(own_password.value.is_none());
    }

    #[test]
    fn generated_password_is_decoded() {
        let value = asn1::encode(asn1::sequence_of(vec![Tag::OctetString(OctetString {
            id: 0,
            class: TagClass::Context,
            inner: b"Xy9-pq".to_vec(),
        })]));
        let generated = parse_generated_password(&reply(Some(value))).unwrap().unwrap();
        assert_eq!(generated.expose_secret(), "Xy9-pq");

        assert!(parse_generated_password(&reply(None)).unwrap().is_none());
        assert!(matches!(
            parse_generated_password(&reply(Some(vec![0x04, 0x00]))),
            Err(Error::Decode(_))
        ));
    }
}
