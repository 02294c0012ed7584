use warden_common::model::EndpointId;

/// External prefix of an environment's Kubernetes API route
///
/// ```
/// use warden_common::model::EndpointId;
/// use warden_proxy::routing::endpoint_prefix;
///
/// assert_eq!(endpoint_prefix(EndpointId(3)), "/api/endpoints/3/kubernetes");
/// ```
pub fn endpoint_prefix(endpoint_id: EndpointId) -> String {
    format!("/api/endpoints/{}/kubernetes", endpoint_id)
}

/// Strip the environment prefix to get the Kubernetes API path
///
/// Returns `None` when the path does not belong to the environment. The
/// prefix alone maps to `/`.
pub fn strip_endpoint_prefix(full_path: &str, endpoint_id: EndpointId) -> Option<&str> {
    let rest = full_path.strip_prefix(&endpoint_prefix(endpoint_id))?;
    match rest {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

/// Whether a Kubernetes API path is already in canonical form
///
/// Dot segments (plain or percent-encoded), encoded separators, backslashes
/// and empty segments other than a trailing slash are rejected. The HTTP
/// client would resolve them, so the path checked by the guards would differ
/// from the one the environment receives.
pub fn is_canonical_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;

    segments.iter().enumerate().all(|(i, segment)| {
        if segment.is_empty() {
            return i == last;
        }
        let lower = segment.to_ascii_lowercase();
        let decoded = lower.replace("%2e", ".");
        !(decoded == "."
            || decoded == ".."
            || lower.contains("%2f")
            || lower.contains("%5c")
            || segment.contains('\\'))
    })
}

/// Restore the external prefix on a `Location` returned by the API server
///
/// The API server answers some collection paths with a 301 to the same path
/// with a trailing slash, expressed against its own root. Absolute URLs are
/// reduced to their path so the caller stays on the gateway.
pub fn rewrite_location(location: &str, endpoint_id: EndpointId) -> String {
    let prefix = endpoint_prefix(endpoint_id);

    let path = match location.parse::<http::Uri>() {
        Ok(uri) if uri.scheme().is_some() => uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        _ => location.to_string(),
    };

    if path.starts_with(&prefix) || !path.starts_with('/') {
        path
    } else {
        format!("{}{}", prefix, path)
    }
}

/// WebSocket form of an http(s) URL
pub fn websocket_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_paths() {
        assert!(is_canonical_path("/"));
        assert!(is_canonical_path("/api/v1/namespaces/team-a/secrets"));
        assert!(is_canonical_path("/apis/apps/v1/"));
        assert!(is_canonical_path("/api/v1/namespaces/a.b/configmaps/app.conf"));
    }

    #[test]
    fn test_dot_segments_are_not_canonical() {
        assert!(!is_canonical_path("/api/v1/namespaces/team-b/x/../secrets"));
        assert!(!is_canonical_path("/api/v1/namespaces/team-b/x/%2e%2E/secrets"));
        assert!(!is_canonical_path("/api/v1/namespaces/team-b/x/.%2e/secrets"));
        assert!(!is_canonical_path("/api/v1/./namespaces"));
        assert!(!is_canonical_path("/api/v1/namespaces/team-b%2Fsecrets"));
        assert!(!is_canonical_path("/api/v1/namespaces/team-b/x\\..\\secrets"));
        assert!(!is_canonical_path("/api//v1/namespaces"));
        assert!(!is_canonical_path("api/v1"));
    }

    #[test]
    fn test_strip_endpoint_prefix() {
        assert_eq!(
            strip_endpoint_prefix("/api/endpoints/1/kubernetes/api/v1/pods", EndpointId(1)),
            Some("/api/v1/pods")
        );
        assert_eq!(
            strip_endpoint_prefix("/api/endpoints/1/kubernetes", EndpointId(1)),
            Some("/")
        );
    }

    #[test]
    fn test_strip_endpoint_prefix_rejects_other_environments() {
        assert_eq!(
            strip_endpoint_prefix("/api/endpoints/12/kubernetes/api", EndpointId(1)),
            None
        );
        assert_eq!(
            strip_endpoint_prefix("/api/endpoints/1/kubernetesx/api", EndpointId(1)),
            None
        );
    }

    #[test]
    fn test_rewrite_relative_location() {
        assert_eq!(
            rewrite_location("/api/v1/namespaces/", EndpointId(2)),
            "/api/endpoints/2/kubernetes/api/v1/namespaces/"
        );
    }

    #[test]
    fn test_rewrite_absolute_location() {
        assert_eq!(
            rewrite_location("https://10.0.0.1:6443/apis/apps/v1/?watch=1", EndpointId(2)),
            "/api/endpoints/2/kubernetes/apis/apps/v1/?watch=1"
        );
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let once = rewrite_location("/api/", EndpointId(2));
        assert_eq!(rewrite_location(&once, EndpointId(2)), once);
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(websocket_url("https://k8s:6443/api"), "wss://k8s:6443/api");
        assert_eq!(websocket_url("http://127.0.0.1:8000"), "ws://127.0.0.1:8000");
    }
}
