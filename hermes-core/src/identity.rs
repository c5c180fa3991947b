use crate::config::ServiceConfig;
use std::collections::{BTreeMap, HashMap};
use std::net::ToSocketAddrs;
use tracing::debug;

const LOCALHOST: &str = "localhost";

/// Maps caller hosts to the application names declared in configuration.
///
/// Built once at startup and shared by reference with every pipeline.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    applications: HashMap<String, String>,
}

impl IdentityResolver {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the table from every service that declares a `name`.
    ///
    /// Each service host is registered as written and under every address it
    /// resolves to, so callers seen by IP still map to their name. Hosts that
    /// do not resolve are kept under their literal name only.
    pub fn from_services(services: &BTreeMap<String, ServiceConfig>) -> Self {
        let mut resolver = Self::empty();
        for (id, svc) in services {
            let Some(name) = svc.name.as_deref() else {
                continue;
            };
            let Some(host) = host_of(&svc.url) else {
                debug!(service = %id, url = %svc.url, "Service URL has no host, skipped");
                continue;
            };
            match (host.as_str(), 0).to_socket_addrs() {
                Ok(addrs) => {
                    for addr in addrs {
                        resolver.applications.insert(addr.ip().to_string(), name.to_string());
                    }
                }
                Err(e) => debug!(host = %host, error = %e, "Service host did not resolve"),
            }
            resolver.applications.insert(host, name.to_string());
        }
        resolver
    }

    /// Register a single host → application mapping.
    pub fn with_application(mut self, host: impl Into<String>, name: impl Into<String>) -> Self {
        self.applications.insert(host.into(), name.into());
        self
    }

    /// Application name for `remote_host`, if known. Loopback addresses are
    /// looked up as `localhost` first.
    pub fn resolve(&self, remote_host: &str) -> Option<&str> {
        if is_loopback(remote_host)
            && let Some(name) = self.applications.get(LOCALHOST)
        {
            return Some(name);
        }
        self.applications.get(remote_host).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

fn host_of(url: &str) -> Option<String> {
    let uri: http::Uri = url.parse().ok()?;
    uri.host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
}

fn is_loopback(host: &str) -> bool {
    host.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(url: &str, name: Option<&str>) -> ServiceConfig {
        ServiceConfig {
            url: url.into(),
            name: name.map(str::to_string),
            cache: None,
            routes: vec![],
        }
    }

    #[test]
    fn resolves_named_services_by_host() {
        let mut services = BTreeMap::new();
        services.insert("billing".to_string(), service("http://10.1.2.3:8081", Some("Billing")));
        services.insert("anon".to_string(), service("http://10.9.9.9:8081", None));
        let resolver = IdentityResolver::from_services(&services);

        assert_eq!(resolver.resolve("10.1.2.3"), Some("Billing"));
        assert_eq!(resolver.resolve("10.9.9.9"), None);
        assert_eq!(resolver.resolve("192.168.0.1"), None);
    }

    #[test]
    fn loopback_callers_resolve_through_localhost() {
        let resolver = IdentityResolver::empty().with_application("localhost", "LocalApp");
        assert_eq!(resolver.resolve("127.0.0.1"), Some("LocalApp"));
        assert_eq!(resolver.resolve("::1"), Some("LocalApp"));
        assert_eq!(resolver.resolve("localhost"), Some("LocalApp"));
    }

    #[test]
    fn url_without_host_is_skipped() {
        let mut services = BTreeMap::new();
        services.insert("broken".to_string(), service("not a url", Some("Broken")));
        let resolver = IdentityResolver::from_services(&services);
        assert!(resolver.is_empty());
    }

    #[test]
    fn empty_resolver_knows_nobody() {
        let resolver = IdentityResolver::empty();
        assert_eq!(resolver.len(), 0);
        assert!(resolver.resolve("127.0.0.1").is_none());
    }
}
