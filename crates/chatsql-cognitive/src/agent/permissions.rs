//! Tool Permission Manager (spec §4.4).
//!
//! A pure function from `UserGroup` to an allowed-tool set, grounded on the
//! teacher's `UserRole::has_permission` (`brain-api::auth`): a `match` over
//! the caller's role rather than a database-backed ACL, since the set of
//! tools is small and fixed at compile time.

use chatsql_types::model::UserGroup;

pub const RUN_SQL: &str = "run_sql";
pub const VISUALIZE_DATA: &str = "visualize_data";

/// Checks whether `group` may invoke `tool`, consulted before every tool
/// dispatch in the agent loop.
pub struct ToolPermissionManager;

impl ToolPermissionManager {
    pub fn is_allowed(group: UserGroup, tool: &str) -> bool {
        match group {
            UserGroup::Admin => true,
            UserGroup::Expert | UserGroup::User | UserGroup::Guest => {
                matches!(tool, RUN_SQL | VISUALIZE_DATA)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_may_use_any_tool() {
        assert!(ToolPermissionManager::is_allowed(UserGroup::Admin, "run_sql"));
        assert!(ToolPermissionManager::is_allowed(UserGroup::Admin, "anything_else"));
    }

    #[test]
    fn guest_is_limited_to_the_default_tool_set() {
        assert!(ToolPermissionManager::is_allowed(UserGroup::Guest, RUN_SQL));
        assert!(ToolPermissionManager::is_allowed(UserGroup::Guest, VISUALIZE_DATA));
        assert!(!ToolPermissionManager::is_allowed(UserGroup::Guest, "drop_table"));
    }
}
