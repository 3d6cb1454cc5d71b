//! Group names and who may join them.

use common::protocol::Role;
use uuid::Uuid;

pub const PARTNERS: &str = "partners";
pub const ADMINS: &str = "admins";

/// Personal group of one account.
pub fn user_group(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

/// Groups a connection joins as soon as it is accepted.
pub fn default_groups(user_id: Uuid, role: Role) -> Vec<String> {
    let mut groups = vec![user_group(user_id)];
    match role {
        Role::Partner => groups.push(PARTNERS.to_owned()),
        Role::Admin => groups.push(ADMINS.to_owned()),
        Role::Customer => {}
    }
    groups
}

/// Whether `user_id` with `role` may join `group` on request.
pub fn can_join(user_id: Uuid, role: Role, group: &str) -> bool {
    if group == user_group(user_id) {
        return true;
    }
    match group {
        PARTNERS => matches!(role, Role::Partner | Role::Admin),
        ADMINS => role == Role::Admin,
        _ => false,
    }
}
