//! Built-in shapes shared by every class.

use chrono::{DateTime, Utc};

use crate::types::Acl;
use parselayer_macros::{Fields, Record};

/// The fields every server object carries. Embed it with `#[parse(flatten)]`.
#[derive(Debug, Clone, Default, PartialEq, Fields)]
pub struct Base {
    pub object_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[parse(rename = "ACL", omit_empty)]
    pub acl: Option<Acl>,
}

/// A user of the application, stored in the `_User` class.
#[derive(Debug, Clone, Default, PartialEq, Record)]
#[parse(class = "_User")]
pub struct User {
    #[parse(flatten)]
    pub base: Base,
    pub username: String,
    #[parse(omit_empty)]
    pub email: String,
    #[parse(skip)]
    pub email_verified: bool,
}

/// A named group of users, stored in the `_Role` class.
#[derive(Debug, Clone, Default, PartialEq, Record)]
#[parse(class = "_Role")]
pub struct Role {
    #[parse(flatten)]
    pub base: Base,
    pub name: String,
}
