//! Builds the gateway's axum router from configuration.
//!
//! Each configured service gets its own pipeline and cache; each of its
//! routes is mounted at the configured gateway path and relayed to the
//! service URL joined with the route target.

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, OriginalUri, Path};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get};
use axum::{Json, Router};
use hermes_core::config::{RouteConfig, RouteMethod};
use hermes_core::envelope::{CLIENT_VERSION_HEADER, header_text};
use hermes_core::{HermesConfig, HermesError, IdentityResolver, PayloadKind, ResponseEnvelope};
use hermes_observability::{LogSink, ProxyMetrics};
use hermes_proxy::{DownstreamCaller, ProxyPipeline, RequestContext};
use hermes_store::ResponseCache;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared collaborators handed to every pipeline.
#[derive(Clone)]
pub struct GatewayDeps {
    pub downstream: Arc<dyn DownstreamCaller>,
    pub sink: Arc<dyn LogSink>,
    pub identity: Arc<IdentityResolver>,
    pub metrics: Arc<ProxyMetrics>,
}

/// A mounted route: where it relays and how.
struct RouteBinding {
    pipeline: Arc<ProxyPipeline>,
    target_url: String,
    cacheable: bool,
    payload_kind: PayloadKind,
}

type PathParams = Option<Path<Vec<(String, String)>>>;

impl RouteBinding {
    async fn relay_get(
        &self,
        remote: SocketAddr,
        uri: OriginalUri,
        headers: &HeaderMap,
        params: PathParams,
    ) -> Response {
        let ctx = request_context(remote, &uri, headers);
        let vars = positional(params);
        let envelope = self
            .pipeline
            .get(&ctx, self.cacheable, &self.target_url, &self.payload_kind, &vars)
            .await;
        envelope_response(envelope)
    }

    async fn relay_post(
        &self,
        remote: SocketAddr,
        uri: OriginalUri,
        headers: &HeaderMap,
        params: PathParams,
        body: Bytes,
    ) -> Response {
        let payload: Option<Value> = if body.is_empty() {
            None
        } else {
            match serde_json::from_slice(&body) {
                Ok(v) => Some(v),
                Err(e) => {
                    debug!(error = %e, "Rejected non-JSON request body");
                    return (StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")).into_response();
                }
            }
        };
        let ctx = request_context(remote, &uri, headers);
        let vars = positional(params);
        let envelope = self
            .pipeline
            .post(&ctx, &self.target_url, payload.as_ref(), &self.payload_kind, &vars)
            .await;
        envelope_response(envelope)
    }
}

/// Build the full gateway router. Fails on routes that axum would reject or
/// that collide with each other or with the built-in paths.
pub fn build_router(config: &HermesConfig, deps: GatewayDeps) -> Result<Router, HermesError> {
    for path in [&config.server.alive_path, &config.metrics.path] {
        if !path.starts_with('/') {
            return Err(HermesError::ConfigError(format!("path {path} must start with '/'")));
        }
    }

    let mut reserved: HashSet<String> = HashSet::new();
    reserved.insert(config.server.alive_path.clone());
    if config.metrics.enabled {
        reserved.insert(config.metrics.path.clone());
    }

    let mut mounted: HashSet<(String, RouteMethod)> = HashSet::new();
    let mut method_routers: BTreeMap<String, MethodRouter> = BTreeMap::new();

    for (service_id, service) in &config.services {
        if !service.url.starts_with("http://") && !service.url.starts_with("https://") {
            return Err(HermesError::ConfigError(format!(
                "service {service_id}: url must start with http:// or https://, got {}",
                service.url
            )));
        }

        let cache = ResponseCache::from_config(service_id.as_str(), &service.effective_cache(&config.cache));
        let mut pipeline = ProxyPipeline::new(
            cache,
            Arc::clone(&deps.downstream),
            Arc::clone(&deps.sink),
            Arc::clone(&deps.identity),
            config.client.version.clone(),
        );
        if deps.metrics.is_enabled() {
            pipeline = pipeline.with_metrics(Arc::clone(&deps.metrics));
        }
        let pipeline = Arc::new(pipeline);

        for route in &service.routes {
            validate_route(route, &reserved)?;
            if !mounted.insert((route.path.clone(), route.method)) {
                return Err(HermesError::InvalidRoute {
                    path: route.path.clone(),
                    reason: format!("{:?} already mounted", route.method),
                });
            }

            let binding = Arc::new(RouteBinding {
                pipeline: Arc::clone(&pipeline),
                target_url: format!("{}{}", service.url.trim_end_matches('/'), route.target),
                cacheable: route.cacheable,
                payload_kind: PayloadKind::new(route.payload.as_str()),
            });
            info!(
                service = %service_id,
                path = %route.path,
                target = %binding.target_url,
                method = ?route.method,
                cacheable = route.cacheable,
                "Route mounted"
            );

            let method_router = method_routers.remove(&route.path).unwrap_or_default();
            let method_router = match route.method {
                RouteMethod::Get => method_router.get(
                    move |ConnectInfo(remote): ConnectInfo<SocketAddr>,
                          uri: OriginalUri,
                          headers: HeaderMap,
                          params: PathParams| async move {
                        binding.relay_get(remote, uri, &headers, params).await
                    },
                ),
                RouteMethod::Post => method_router.post(
                    move |ConnectInfo(remote): ConnectInfo<SocketAddr>,
                          uri: OriginalUri,
                          headers: HeaderMap,
                          params: PathParams,
                          body: Bytes| async move {
                        binding.relay_post(remote, uri, &headers, params, body).await
                    },
                ),
            };
            method_routers.insert(route.path.clone(), method_router);
        }
    }

    let mut router = Router::new().route(&config.server.alive_path, get(alive));
    for (path, method_router) in method_routers {
        router = router.route(&path, method_router);
    }
    if config.metrics.enabled {
        let metrics = Arc::clone(&deps.metrics);
        router = router.route(
            &config.metrics.path,
            get(move || async move { metrics.render() }),
        );
    }
    Ok(router)
}

async fn alive() -> StatusCode {
    StatusCode::OK
}

fn validate_route(route: &RouteConfig, reserved: &HashSet<String>) -> Result<(), HermesError> {
    let invalid = |reason: &str| HermesError::InvalidRoute {
        path: route.path.clone(),
        reason: reason.to_string(),
    };
    if !route.path.starts_with('/') {
        return Err(invalid("path must start with '/'"));
    }
    if reserved.contains(&route.path) {
        return Err(invalid("path is reserved by the gateway"));
    }
    if route.path.split('/').any(|seg| seg.starts_with(':') || seg.starts_with('*')) {
        return Err(invalid("use {name} placeholders"));
    }
    if route.path.matches('{').count() != route.path.matches('}').count() {
        return Err(invalid("unbalanced placeholder braces"));
    }
    if !route.target.is_empty() && !route.target.starts_with('/') {
        return Err(invalid("target must be empty or start with '/'"));
    }
    Ok(())
}

fn request_context(remote: SocketAddr, uri: &OriginalUri, headers: &HeaderMap) -> RequestContext {
    RequestContext {
        remote_host: remote.ip().to_string(),
        path: uri.0.path().to_string(),
        client_version: headers
            .get(CLIENT_VERSION_HEADER)
            .map(|v| header_text(v).into_owned()),
    }
}

fn positional(params: PathParams) -> Vec<String> {
    params
        .map(|Path(pairs)| pairs.into_iter().map(|(_, value)| value).collect())
        .unwrap_or_default()
}

/// Status, headers and JSON payload map 1:1 onto the HTTP response.
fn envelope_response(envelope: ResponseEnvelope) -> Response {
    let ResponseEnvelope { status, payload, headers } = envelope;
    let mut response = match payload {
        Some(value) => Json(value).into_response(),
        None => Response::new(Body::empty()),
    };
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::envelope::ERROR_MESSAGE_HEADER;
    use axum::http::HeaderValue;

    fn route(path: &str, target: &str) -> RouteConfig {
        RouteConfig {
            path: path.into(),
            target: target.into(),
            method: RouteMethod::Get,
            cacheable: false,
            payload: "json".into(),
        }
    }

    #[test]
    fn validate_rejects_bad_paths() {
        let reserved: HashSet<String> = ["/hermes/alive".to_string()].into();
        assert!(validate_route(&route("/a/{id}", "/b/{id}"), &reserved).is_ok());
        assert!(validate_route(&route("a", "/b"), &reserved).is_err());
        assert!(validate_route(&route("/a/:id", "/b"), &reserved).is_err());
        assert!(validate_route(&route("/a/{id", "/b"), &reserved).is_err());
        assert!(validate_route(&route("/hermes/alive", "/b"), &reserved).is_err());
        assert!(validate_route(&route("/a", "b"), &reserved).is_err());
    }

    #[test]
    fn envelope_without_payload_has_empty_body_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ERROR_MESSAGE_HEADER, HeaderValue::from_static("boom"));
        let resp = envelope_response(ResponseEnvelope::new(StatusCode::BAD_GATEWAY, None, headers));
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(resp.headers().get(ERROR_MESSAGE_HEADER).unwrap(), "boom");
        assert!(resp.headers().get("content-type").is_none());
    }

    #[test]
    fn positional_keeps_declaration_order() {
        let params = Some(Path(vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]));
        assert_eq!(positional(params), vec!["2", "1"]);
        assert!(positional(None).is_empty());
    }
}
