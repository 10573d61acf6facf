//! Session id and route extraction.
//!
//! A session id looks like `<opaque>.<route>`; the route names the member
//! that created the session. Ids come from the `;jsessionid=` path
//! parameter first, then from `JSESSIONID` cookies, in order.

use crate::http::RequestDescriptor;
use crate::routing::matcher::SESSION_PATH_PARAM;

/// Session cookie name.
pub const JSESSIONID: &str = "JSESSIONID";

/// Every session id carried by the request, path parameter first.
pub fn session_ids(req: &RequestDescriptor) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(id) = path_session_id(&req.uri) {
        ids.push(id.to_string());
    }
    for header in req.header_values("cookie") {
        for pair in header.split([';', ',']) {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            if !name.trim().eq_ignore_ascii_case(JSESSIONID) {
                continue;
            }
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                ids.push(value.to_string());
            }
        }
    }
    ids
}

/// The route part of a session id: everything after the first `.`.
pub fn session_route(id: &str) -> Option<&str> {
    id.split_once('.')
        .map(|(_, route)| route)
        .filter(|route| !route.is_empty())
}

/// Routes of every session id carried by the request, in order.
pub fn session_routes(req: &RequestDescriptor) -> Vec<String> {
    session_ids(req)
        .iter()
        .filter_map(|id| session_route(id))
        .map(str::to_string)
        .collect()
}

fn path_session_id(uri: &str) -> Option<&str> {
    let start = uri.find(SESSION_PATH_PARAM)? + SESSION_PATH_PARAM.len();
    let value = uri[start..].strip_prefix('=')?;
    let end = value.find([';', '/', '?', '#']).unwrap_or(value.len());
    Some(&value[..end]).filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_from_path_parameter() {
        let req = RequestDescriptor::new("GET", "/app/page.jsp;jsessionid=ABC123.node2");
        assert_eq!(session_ids(&req), vec!["ABC123.node2"]);
        assert_eq!(session_routes(&req), vec!["node2"]);
    }

    #[test]
    fn test_path_parameter_ends_at_delimiter() {
        let req = RequestDescriptor::new("GET", "/app;jsessionid=X.b/page.jsp");
        assert_eq!(session_routes(&req), vec!["b"]);
    }

    #[test]
    fn test_routes_from_cookies_in_order() {
        let req = RequestDescriptor::new("GET", "/app/;jsessionid=P.a")
            .with_header("Cookie", "theme=dark; JSESSIONID=\"C1.b\"")
            .with_header("Cookie", "jsessionid=C2.c");
        assert_eq!(session_routes(&req), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_id_without_route() {
        assert_eq!(session_route("ABC"), None);
        assert_eq!(session_route("ABC."), None);
        assert_eq!(session_route("ABC.node1.x"), Some("node1.x"));

        let req = RequestDescriptor::new("GET", "/app/").with_header("Cookie", "JSESSIONID=ABC");
        assert_eq!(session_ids(&req), vec!["ABC"]);
        assert!(session_routes(&req).is_empty());
    }
}
