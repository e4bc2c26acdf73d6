//! Router Module Index
//!
//! Page routes and API routes, segregated by the access they need. Page navigations
//! are checked by the navigation guard against the static route table below; API
//! routes are checked by the `AuthUser` extractor.

use crate::models::{RouteEntry, Role};

/// Routes accessible to everyone: login page, health check, route table.
pub mod public;

/// The home page and the JSON API used by a signed-in session.
pub mod authenticated;

/// Administration pages, restricted to superadmins.
pub mod admin;

/// Name of the login route, the target of unauthenticated redirects.
pub const LOGIN: &str = "Login";
/// Name of the home route, the target of unauthorized redirects.
pub const HOME: &str = "Home";
/// Name of the admin dashboard, parent of the management pages.
pub const ADMIN: &str = "Admin";
pub const USER_MANAGEMENT: &str = "UserManagement";
pub const CENTER_MANAGEMENT: &str = "CenterManagement";

/// RouteMeta
///
/// Static access requirements of a page route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMeta {
    pub requires_auth: bool,
    pub requires_role: Option<Role>,
}

/// RouteDef
///
/// A page route. Child paths are relative to their parent.
#[derive(Debug)]
pub struct RouteDef {
    pub path: &'static str,
    pub name: &'static str,
    pub meta: RouteMeta,
    pub children: &'static [RouteDef],
}

static ADMIN_CHILDREN: [RouteDef; 2] = [
    RouteDef {
        path: "users",
        name: USER_MANAGEMENT,
        meta: RouteMeta {
            requires_auth: true,
            requires_role: Some(Role::Superadmin),
        },
        children: &[],
    },
    RouteDef {
        path: "centers",
        name: CENTER_MANAGEMENT,
        meta: RouteMeta {
            requires_auth: true,
            requires_role: Some(Role::Superadmin),
        },
        children: &[],
    },
];

/// The page route table. Paths and names are a stable contract for bookmarks and
/// deep links.
pub static ROUTES: [RouteDef; 3] = [
    RouteDef {
        path: "/login",
        name: LOGIN,
        meta: RouteMeta {
            requires_auth: false,
            requires_role: None,
        },
        children: &[],
    },
    RouteDef {
        path: "/",
        name: HOME,
        meta: RouteMeta {
            requires_auth: true,
            requires_role: None,
        },
        children: &[],
    },
    RouteDef {
        path: "/admin",
        name: ADMIN,
        meta: RouteMeta {
            requires_auth: true,
            requires_role: Some(Role::Superadmin),
        },
        children: &ADMIN_CHILDREN,
    },
];

fn join(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}

/// Every route with its full path and the name of its parent, depth first.
fn walk() -> Vec<(String, &'static RouteDef, Option<&'static str>)> {
    let mut out = Vec::new();
    for route in ROUTES.iter() {
        out.push((route.path.to_string(), route, None));
        for child in route.children {
            out.push((join(route.path, child.path), child, Some(route.name)));
        }
    }
    out
}

/// find_route
///
/// Resolves a request path to its page route. A trailing slash is ignored.
pub fn find_route(path: &str) -> Option<&'static RouteDef> {
    let normalized = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    walk()
        .into_iter()
        .find(|(full, _, _)| full == normalized)
        .map(|(_, route, _)| route)
}

/// Full path of the named route.
pub fn path_of(name: &str) -> Option<String> {
    walk()
        .into_iter()
        .find(|(_, route, _)| route.name == name)
        .map(|(full, _, _)| full)
}

/// The flattened table served at `GET /api/routes`.
pub fn route_entries() -> Vec<RouteEntry> {
    walk()
        .into_iter()
        .map(|(path, route, parent)| RouteEntry {
            path,
            name: route.name.to_string(),
            parent: parent.map(str::to_string),
            requires_auth: route.meta.requires_auth,
            requires_role: route.meta.requires_role.as_ref().map(|role| role.to_string()),
        })
        .collect()
}
