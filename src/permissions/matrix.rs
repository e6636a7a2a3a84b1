use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

pub const ROUTE_DASHBOARD: &str = "/dashboard";
pub const ROUTE_KPI_CATALOG: &str = "/kpi-catalog";
pub const ROUTE_CASCADE: &str = "/cascade";
pub const ROUTE_SUBMISSIONS: &str = "/submissions";
pub const ROUTE_APPROVALS: &str = "/approvals";
pub const ROUTE_PORTFOLIO: &str = "/portfolio";
pub const ROUTE_IMPORT: &str = "/import";
pub const ROUTE_ORG: &str = "/org";
pub const ROUTE_PERMISSIONS: &str = "/permissions";
pub const ROUTE_INSIGHTS: &str = "/insights";

pub const MENU_ROUTES: [&str; 10] = [
    ROUTE_DASHBOARD,
    ROUTE_KPI_CATALOG,
    ROUTE_CASCADE,
    ROUTE_SUBMISSIONS,
    ROUTE_APPROVALS,
    ROUTE_PORTFOLIO,
    ROUTE_IMPORT,
    ROUTE_ORG,
    ROUTE_PERMISSIONS,
    ROUTE_INSIGHTS,
];

pub type MenuAccess = BTreeMap<String, bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    #[serde(rename = "VP")]
    Vp,
    #[serde(rename = "AVP")]
    Avp,
    Manager,
    Employee,
}

impl Role {
    pub const ALL: [Role; 5] = [Self::Admin, Self::Vp, Self::Avp, Self::Manager, Self::Employee];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Vp => "VP",
            Self::Avp => "AVP",
            Self::Manager => "Manager",
            Self::Employee => "Employee",
        }
    }

    /// Routes this role sees by default.
    fn granted_routes(&self) -> &'static [&'static str] {
        match self {
            Self::Admin => &MENU_ROUTES,
            Self::Vp | Self::Avp => &[
                ROUTE_DASHBOARD,
                ROUTE_KPI_CATALOG,
                ROUTE_CASCADE,
                ROUTE_SUBMISSIONS,
                ROUTE_APPROVALS,
                ROUTE_PORTFOLIO,
                ROUTE_ORG,
                ROUTE_INSIGHTS,
            ],
            Self::Manager => &[
                ROUTE_DASHBOARD,
                ROUTE_KPI_CATALOG,
                ROUTE_CASCADE,
                ROUTE_SUBMISSIONS,
                ROUTE_APPROVALS,
                ROUTE_PORTFOLIO,
                ROUTE_INSIGHTS,
            ],
            Self::Employee => &[
                ROUTE_DASHBOARD,
                ROUTE_KPI_CATALOG,
                ROUTE_CASCADE,
                ROUTE_SUBMISSIONS,
                ROUTE_PORTFOLIO,
            ],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown role: {s}"))
    }
}

pub fn default_menu_access(role: Role) -> MenuAccess {
    let granted = role.granted_routes();
    MENU_ROUTES
        .iter()
        .map(|route| (route.to_string(), granted.contains(route)))
        .collect()
}

pub fn default_matrix() -> BTreeMap<String, MenuAccess> {
    Role::ALL
        .iter()
        .map(|role| (role.as_str().to_string(), default_menu_access(*role)))
        .collect()
}

/// Permission record stored in the `users` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUser {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub menu_access: MenuAccess,
    /// Set when an Admin provisions the record ahead of the login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl AppUser {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            menu_access: default_menu_access(role),
            email: None,
            updated_at: None,
        }
    }

    /// Switches role and discards every manual override.
    pub fn change_role(&mut self, role: Role) {
        self.role = role;
        self.menu_access = default_menu_access(role);
    }

    /// Per-cell override. Not validated against the role.
    pub fn set_access(&mut self, route: &str, allowed: bool) {
        self.menu_access.insert(route.to_string(), allowed);
    }

    pub fn can_access(&self, route: &str) -> bool {
        self.menu_access.get(route).copied().unwrap_or(false)
    }

    pub fn has_role(&self, allowed: &[Role]) -> bool {
        allowed.contains(&self.role)
    }
}

/// Exact-id lookup; anyone without a record is an Employee with Employee defaults.
pub fn effective_user(employee_id: &str, users: &HashMap<String, AppUser>) -> AppUser {
    users
        .get(employee_id)
        .cloned()
        .unwrap_or_else(|| AppUser::new(employee_id, Role::Employee))
}
