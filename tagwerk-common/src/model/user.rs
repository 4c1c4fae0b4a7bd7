use crate::{
    model::{Id, tag::TagMarker},
    util::bounded_text,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const USER_HANDLE_MAX_LEN: usize = 50;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub handle: UserHandle,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CreateUser {
    pub handle: UserHandle,
}

/// The tags a user declared as relevant to them. Always replaced as a whole.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct UserInterests {
    pub user_id: Id<UserMarker>,
    pub tag_ids: BTreeSet<Id<TagMarker>>,
}

bounded_text!(UserHandle, InvalidUserHandleError, USER_HANDLE_MAX_LEN);
