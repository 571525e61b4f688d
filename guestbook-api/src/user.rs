use uuid::Uuid;

use crate::STUB_UUID;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub signed_in: bool,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

impl Session {
    pub fn anonymous() -> Session {
        Session::default()
    }

    pub fn user(id: UserId) -> Session {
        Session {
            signed_in: true,
            role: Role::User,
            user_id: Some(id),
        }
    }

    pub fn admin(id: UserId) -> Session {
        Session {
            signed_in: true,
            role: Role::Admin,
            user_id: Some(id),
        }
    }

    /// A role claim without a live sign-in grants nothing
    pub fn is_admin(&self) -> bool {
        self.signed_in && self.role == Role::Admin
    }
}
