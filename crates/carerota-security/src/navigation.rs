//! ---
//! rota_section: "06-security-access-control"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Identity contracts, RBAC tables, and navigation policy."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
//! Per-role navigation trees and menu filtering.
//!
//! Configurations are rebuilt on every call; nothing here is cached or stored.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::rbac::{Permission, Role};

/// Single entry in the console menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavItem {
    /// Label shown to the user.
    pub name: String,
    /// Target route.
    pub href: String,
    /// Icon identifier understood by the rendering layer.
    pub icon: String,
    /// Roles allowed to see the item; empty means every role.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_role: Vec<Role>,
    /// Permission gate; see [`filter_menu_items`] for how it is evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_permission: Option<Permission>,
}

impl NavItem {
    fn new(name: &str, href: &str, icon: &str) -> Self {
        Self {
            name: name.to_owned(),
            href: href.to_owned(),
            icon: icon.to_owned(),
            required_role: Vec::new(),
            required_permission: None,
        }
    }

    fn roles(mut self, roles: &[Role]) -> Self {
        self.required_role = roles.to_vec();
        self
    }

    fn permission(mut self, permission: Permission) -> Self {
        self.required_permission = Some(permission);
        self
    }
}

/// Titled group of menu items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavSection {
    /// Section heading.
    pub title: String,
    /// Items in display order.
    pub items: Vec<NavItem>,
}

impl NavSection {
    fn new(title: &str, items: Vec<NavItem>) -> Self {
        Self {
            title: title.to_owned(),
            items,
        }
    }
}

/// Full menu tree for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Console title for the role.
    pub title: String,
    /// Role-specific sections.
    pub sections: Vec<NavSection>,
    /// Items appended for every role.
    pub common_items: Vec<NavItem>,
}

impl NavigationConfig {
    /// Apply [`filter_menu_items`] to every section and the common items,
    /// dropping sections left empty.
    pub fn filtered(&self, role: Role) -> NavigationConfig {
        NavigationConfig {
            title: self.title.clone(),
            sections: self
                .sections
                .iter()
                .map(|section| NavSection {
                    title: section.title.clone(),
                    items: filter_menu_items(&section.items, role),
                })
                .filter(|section| !section.items.is_empty())
                .collect(),
            common_items: filter_menu_items(&self.common_items, role),
        }
    }

    /// Every item in the tree, sections first.
    pub fn items(&self) -> impl Iterator<Item = &NavItem> {
        self.sections
            .iter()
            .flat_map(|section| section.items.iter())
            .chain(self.common_items.iter())
    }
}

/// Landing route for a role.
pub fn dashboard_for(role: Role) -> &'static str {
    match role {
        Role::SystemAdmin => "/admin/dashboard",
        Role::FacilityAdmin => "/facility/dashboard",
        Role::User => "/user/dashboard",
    }
}

/// Landing route for an untyped role value, falling back to the
/// lowest-privilege dashboard.
pub fn dashboard_for_role_name(role: &str) -> &'static str {
    dashboard_for(Role::from_str(role).unwrap_or(Role::lowest()))
}

/// Navigation tree for a role.
pub fn navigation_for(role: Role) -> NavigationConfig {
    match role {
        Role::SystemAdmin => system_admin_navigation(),
        Role::FacilityAdmin => facility_admin_navigation(),
        Role::User => user_navigation(),
    }
}

/// Navigation tree for an untyped role value. Unrecognized values receive the
/// lowest-privilege tree.
pub fn navigation_for_role_name(role: &str) -> NavigationConfig {
    navigation_for(Role::from_str(role).unwrap_or(Role::lowest()))
}

/// Filter menu items for `role`.
///
/// `system_admin` sees every item. Other roles see an item when its
/// `required_role` list is empty or names the role, and it carries no
/// `required_permission`: the permission branch is not wired to the
/// permission tables and denies any non-`system_admin` role outright.
pub fn filter_menu_items(items: &[NavItem], role: Role) -> Vec<NavItem> {
    if role == Role::SystemAdmin {
        return items.to_vec();
    }
    items
        .iter()
        .filter(|item| item.required_role.is_empty() || item.required_role.contains(&role))
        .filter(|item| item.required_permission.is_none())
        .cloned()
        .collect()
}

fn common_items() -> Vec<NavItem> {
    vec![
        NavItem::new("Profile", "/profile", "user-circle"),
        NavItem::new("Facility Settings", "/settings/facility", "cog")
            .roles(&[Role::FacilityAdmin, Role::SystemAdmin]),
        NavItem::new("Help", "/help", "life-buoy"),
    ]
}

fn system_admin_navigation() -> NavigationConfig {
    NavigationConfig {
        title: "System Administration".into(),
        sections: vec![
            NavSection::new(
                "Overview",
                vec![NavItem::new("Dashboard", "/admin/dashboard", "home")],
            ),
            NavSection::new(
                "Organisation",
                vec![
                    NavItem::new("Facilities", "/admin/facilities", "building")
                        .permission(Permission::FacilityRead),
                    NavItem::new("Accounts", "/admin/users", "users")
                        .permission(Permission::UserRead),
                ],
            ),
            NavSection::new(
                "Operations",
                vec![
                    NavItem::new("Reports", "/admin/reports", "chart-bar")
                        .permission(Permission::ReportRead),
                    NavItem::new("Exports", "/admin/exports", "download")
                        .permission(Permission::ExportCreate),
                    NavItem::new("Audit Log", "/admin/audit", "shield-check")
                        .roles(&[Role::SystemAdmin])
                        .permission(Permission::AuditRead),
                ],
            ),
        ],
        common_items: common_items(),
    }
}

fn facility_admin_navigation() -> NavigationConfig {
    NavigationConfig {
        title: "Facility Management".into(),
        sections: vec![
            NavSection::new(
                "Overview",
                vec![NavItem::new("Dashboard", "/facility/dashboard", "home")],
            ),
            NavSection::new(
                "Scheduling",
                vec![
                    NavItem::new("Shifts", "/facility/shifts", "calendar"),
                    NavItem::new("Shift Requests", "/facility/shift-requests", "inbox"),
                    NavItem::new("Staff", "/facility/staff", "users")
                        .roles(&[Role::FacilityAdmin]),
                ],
            ),
            NavSection::new(
                "Attendance",
                vec![
                    NavItem::new("Attendance", "/facility/attendance", "clock"),
                    NavItem::new("Exports", "/facility/exports", "download")
                        .roles(&[Role::FacilityAdmin]),
                ],
            ),
        ],
        common_items: common_items(),
    }
}

fn user_navigation() -> NavigationConfig {
    NavigationConfig {
        title: "My Workplace".into(),
        sections: vec![
            NavSection::new(
                "Overview",
                vec![NavItem::new("Dashboard", "/user/dashboard", "home")],
            ),
            NavSection::new(
                "My Work",
                vec![
                    NavItem::new("My Shifts", "/user/shifts", "calendar"),
                    NavItem::new("Shift Requests", "/user/shift-requests", "inbox"),
                    NavItem::new("Clock In / Out", "/user/attendance", "clock"),
                ],
            ),
        ],
        common_items: common_items(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::all_permissions;
    use strum::IntoEnumIterator;

    #[test]
    fn unknown_role_gets_lowest_privilege_tree() {
        assert_eq!(navigation_for_role_name("unknown_role"), user_navigation());
        assert_eq!(navigation_for_role_name(""), navigation_for(Role::User));
        assert_eq!(dashboard_for_role_name("root"), "/user/dashboard");
    }

    #[test]
    fn three_distinct_trees() {
        let admin = navigation_for(Role::SystemAdmin);
        let facility = navigation_for(Role::FacilityAdmin);
        let user = navigation_for(Role::User);
        assert_ne!(admin, facility);
        assert_ne!(facility, user);
        assert_eq!(navigation_for_role_name("facility_admin"), facility);
    }

    #[test]
    fn system_admin_passes_every_item() {
        let items = navigation_for(Role::SystemAdmin).sections[2].items.clone();
        assert_eq!(filter_menu_items(&items, Role::SystemAdmin), items);
    }

    #[test]
    fn required_role_filters_common_items() {
        let common = common_items();
        let user_items = filter_menu_items(&common, Role::User);
        assert!(user_items.iter().all(|item| item.name != "Facility Settings"));
        let facility_items = filter_menu_items(&common, Role::FacilityAdmin);
        assert!(facility_items.iter().any(|item| item.name == "Facility Settings"));
    }

    #[test]
    fn permission_branch_denies_non_system_admin() {
        let item = NavItem::new("Shifts", "/facility/shifts", "calendar")
            .permission(Permission::ShiftRead);
        // facility_admin holds shift:read in its table, yet the item is hidden.
        assert!(filter_menu_items(&[item.clone()], Role::FacilityAdmin).is_empty());
        assert_eq!(filter_menu_items(&[item.clone()], Role::SystemAdmin), vec![item]);
    }

    #[test]
    fn filtered_tree_drops_empty_sections() {
        let tree = navigation_for(Role::SystemAdmin).filtered(Role::FacilityAdmin);
        assert!(tree.sections.iter().all(|section| !section.items.is_empty()));
        assert!(tree.sections.iter().all(|section| section.title != "Organisation"));
    }

    #[test]
    fn every_referenced_permission_is_granted() {
        let granted = all_permissions();
        for role in Role::iter() {
            for item in navigation_for(role).items() {
                if let Some(permission) = item.required_permission {
                    assert!(granted.contains(&permission), "{permission} is dead");
                }
            }
        }
    }

    #[test]
    fn dashboards_match_tree_entries() {
        for role in Role::iter() {
            let tree = navigation_for(role);
            assert!(tree.items().any(|item| item.href == dashboard_for(role)));
        }
    }
}
