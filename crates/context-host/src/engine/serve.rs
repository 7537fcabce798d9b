//! Request dispatch for the embedded engine
//!
//! Every request runs through the host valves first, then is routed to the
//! context with the longest matching mount path and served from that
//! context's document base. `conf/` and `lib/` under a document base are
//! never served.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use percent_encoding::percent_decode_str;
use tower::ServiceExt;
use tower_http::{services::ServeDir, trace::TraceLayer};

use context_host_sdk::{RequestInfo, ValveDecision};

use super::EngineShared;

/// Directories under a document base that are never served
const PRIVATE_DIRS: [&str; 2] = ["conf", "lib"];

pub(crate) fn router(shared: Arc<EngineShared>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

async fn dispatch(State(shared): State<Arc<EngineShared>>, mut request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();

    let mut info = RequestInfo::new(request.method().as_str(), path.clone());
    if let Some(ConnectInfo(remote)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        info = info.with_remote_addr(remote.to_string());
    }

    for valve in shared.valves() {
        if let ValveDecision::Deny(reason) = valve.invoke(&info) {
            tracing::debug!(valve = valve.name(), path = %path, "Request denied: {}", reason);
            return (StatusCode::FORBIDDEN, reason).into_response();
        }
    }

    let Some(context) = shared.route(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !context.is_running() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Context is not running").into_response();
    }

    let Some(rest) = context.mount_path().strip(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if is_private(rest) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let rewritten = match request.uri().query() {
        Some(query) => format!("{}?{}", rest, query),
        None => rest.to_string(),
    };
    match rewritten.parse::<Uri>() {
        Ok(uri) => *request.uri_mut() = uri,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    }

    let doc_base = context.doc_base().to_path_buf();
    drop(context);

    match ServeDir::new(doc_base).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

/// Checked on the decoded path, the same form `ServeDir` resolves on disk
fn is_private(path: &str) -> bool {
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    decoded
        .split(['/', '\\'])
        .find(|segment| !segment.is_empty() && *segment != ".")
        .map(|first| PRIVATE_DIRS.iter().any(|dir| first.eq_ignore_ascii_case(dir)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EmbeddedRuntime, HostRuntime};
    use axum::body::to_bytes;
    use context_host_sdk::{MountPath, Valve};

    struct DenyAll;

    impl Valve for DenyAll {
        fn name(&self) -> &str {
            "deny-all"
        }

        fn invoke(&self, _request: &RequestInfo) -> ValveDecision {
            ValveDecision::Deny("closed".to_string())
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_private_dirs() {
        assert!(is_private("/conf/unit-a.yaml"));
        assert!(is_private("/LIB/libx.so"));
        assert!(!is_private("/confidential.html"));
        assert!(!is_private("/"));
    }

    #[test]
    fn test_private_dirs_survive_encoding() {
        assert!(is_private("/%63onf/unit-a.yaml"));
        assert!(is_private("/%6C%69%62/libx.so"));
        assert!(is_private("/conf%2Funit-a.yaml"));
        assert!(is_private("//./conf/unit-a.yaml"));
        assert!(!is_private("/%63onfidential.html"));
    }

    #[tokio::test]
    async fn test_serves_from_longest_mount() {
        let dir = tempfile::tempdir().unwrap();
        let root_base = dir.path().join("ROOT");
        let app_base = dir.path().join("app");
        std::fs::create_dir_all(root_base.join("conf")).unwrap();
        std::fs::create_dir_all(&app_base).unwrap();
        std::fs::write(root_base.join("hello.txt"), "from root").unwrap();
        std::fs::write(root_base.join("conf/unit-a.yaml"), "components: {}").unwrap();
        std::fs::write(app_base.join("hello.txt"), "from app").unwrap();

        let runtime = EmbeddedRuntime::new("e", "h");
        runtime.init().unwrap();
        let root = runtime.create_context(&MountPath::root(), &root_base);
        let app = runtime.create_context(&MountPath::parse("/app").unwrap(), &app_base);
        runtime.add_child(&root).unwrap();
        runtime.add_child(&app).unwrap();
        runtime.start().unwrap();

        let router = router(Arc::clone(&runtime.shared));

        let response = router.clone().oneshot(get("/app/hello.txt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "from app");

        let response = router.clone().oneshot(get("/hello.txt")).await.unwrap();
        assert_eq!(body_text(response).await, "from root");

        let response = router.clone().oneshot(get("/conf/unit-a.yaml")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router.clone().oneshot(get("/%63onf/unit-a.yaml")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router.clone().oneshot(get("/conf%2Funit-a.yaml")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.stop().unwrap();
        let response = router.oneshot(get("/app/hello.txt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unrouted_and_denied_requests() {
        let runtime = EmbeddedRuntime::new("e", "h");
        runtime.init().unwrap();
        let router = router(Arc::clone(&runtime.shared));

        let response = router.clone().oneshot(get("/nothing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        runtime.add_valve(Arc::new(DenyAll));
        assert_eq!(runtime.valve_names(), vec!["deny-all"]);
        let response = router.oneshot(get("/nothing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await, "closed");
    }
}
