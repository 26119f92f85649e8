//! Reverse proxy (Traefik) configuration documents

use crate::config::{Paths, ProxySettings};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Middleware name attached to plain-HTTP routers
pub const REDIRECT_MIDDLEWARE: &str = "redirect-to-https";

/// Certificate resolver name
pub const CERT_RESOLVER: &str = "letsencrypt";

/// Static entrypoint configuration (`traefik.yml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticConfig {
    pub global: GlobalConfig,
    pub providers: Providers,
    pub api: ApiConfig,
    pub entry_points: BTreeMap<String, EntryPoint>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub certificates_resolvers: BTreeMap<String, CertResolver>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    pub send_anonymous_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Providers {
    pub docker: DockerProvider,
    pub file: FileProvider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerProvider {
    pub exposed_by_default: bool,
    pub watch: bool,
    pub network: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProvider {
    pub directory: String,
    pub watch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub insecure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPoint {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub http3: Option<Http3>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub http: Option<EntryPointHttp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Http3 {
    pub advertised_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPointHttp {
    pub tls: RouterTls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertResolver {
    pub acme: Acme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acme {
    pub email: String,
    pub storage: String,
    pub http_challenge: HttpChallenge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpChallenge {
    pub entry_point: String,
}

/// Dynamic configuration file (`dynamic/*.yml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicConfig {
    pub http: HttpSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpSection {
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub routers: BTreeMap<String, Router>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub services: BTreeMap<String, LoadBalancedService>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub middlewares: BTreeMap<String, Middleware>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    pub rule: String,
    pub service: String,
    pub entry_points: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub middlewares: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tls: Option<RouterTls>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterTls {
    pub cert_resolver: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancedService {
    pub load_balancer: LoadBalancer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    pub servers: Vec<UpstreamUrl>,
    pub pass_host_header: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Middleware {
    pub redirect_scheme: RedirectScheme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectScheme {
    pub scheme: String,
    pub permanent: bool,
}

/// Build the static configuration. `container_paths` is the layout as seen
/// from inside the proxy container, which always mounts the remote layout.
pub fn static_config(proxy: &ProxySettings, network: &str, container_paths: &Paths) -> StaticConfig {
    let mut entry_points = BTreeMap::new();
    entry_points.insert(
        "web".to_string(),
        EntryPoint {
            address: format!(":{}", proxy.http_port),
            http3: None,
            http: None,
        },
    );
    entry_points.insert(
        "websecure".to_string(),
        EntryPoint {
            address: format!(":{}", proxy.https_port),
            http3: Some(Http3 {
                advertised_port: proxy.http3_port,
            }),
            http: proxy.acme_email.as_ref().map(|_| EntryPointHttp {
                tls: RouterTls {
                    cert_resolver: CERT_RESOLVER.to_string(),
                },
            }),
        },
    );

    let mut certificates_resolvers = BTreeMap::new();
    if let Some(email) = &proxy.acme_email {
        certificates_resolvers.insert(
            CERT_RESOLVER.to_string(),
            CertResolver {
                acme: Acme {
                    email: email.clone(),
                    storage: container_paths.acme_store().display().to_string(),
                    http_challenge: HttpChallenge {
                        entry_point: "web".to_string(),
                    },
                },
            },
        );
    }

    StaticConfig {
        global: GlobalConfig {
            send_anonymous_usage: false,
        },
        providers: Providers {
            docker: DockerProvider {
                exposed_by_default: false,
                watch: true,
                network: network.to_string(),
            },
            file: FileProvider {
                directory: container_paths.traefik_dynamic.display().to_string(),
                watch: true,
            },
        },
        api: ApiConfig { insecure: true },
        entry_points,
        certificates_resolvers,
    }
}

/// Shared middleware definitions
pub fn default_middlewares() -> DynamicConfig {
    let mut config = DynamicConfig::default();
    config.http.middlewares.insert(
        REDIRECT_MIDDLEWARE.to_string(),
        Middleware {
            redirect_scheme: RedirectScheme {
                scheme: "https".to_string(),
                permanent: true,
            },
        },
    );
    config
}

/// Routing rules sending a domain to an upstream
#[derive(Debug, Clone)]
pub struct ServerRouting {
    /// Prefix for router and service names, also the file stem
    pub name: String,
    pub domain: String,
    pub upstream: String,
    pub https: bool,
}

impl ServerRouting {
    pub fn file_name(&self) -> String {
        format!("{}.yml", self.name)
    }

    pub fn to_dynamic(&self) -> DynamicConfig {
        let router = format!("{}-router", self.name);
        let service = format!("{}-service", self.name);
        let rule = format!("Host(`{}`)", self.domain);

        let mut config = DynamicConfig::default();
        config.http.routers.insert(
            router.clone(),
            Router {
                rule: rule.clone(),
                service: service.clone(),
                entry_points: vec!["web".to_string()],
                middlewares: if self.https {
                    vec![REDIRECT_MIDDLEWARE.to_string()]
                } else {
                    Vec::new()
                },
                tls: None,
            },
        );
        if self.https {
            config.http.routers.insert(
                format!("{}-secure", router),
                Router {
                    rule,
                    service: service.clone(),
                    entry_points: vec!["websecure".to_string()],
                    middlewares: Vec::new(),
                    tls: Some(RouterTls {
                        cert_resolver: CERT_RESOLVER.to_string(),
                    }),
                },
            );
        }
        config.http.services.insert(
            service,
            LoadBalancedService {
                load_balancer: LoadBalancer {
                    servers: vec![UpstreamUrl {
                        url: self.upstream.clone(),
                    }],
                    pass_host_header: true,
                },
            },
        );
        config
    }
}

/// Render any configuration document as YAML
pub fn to_yaml<T: Serialize>(document: &T) -> Result<String> {
    Ok(serde_yaml::to_string(document)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_config_yaml() {
        let paths = Paths::under("/etc/guildserver");
        let mut proxy = ProxySettings::default();
        proxy.acme_email = Some("ops@example.com".to_string());

        let yaml = to_yaml(&static_config(&proxy, "guildserver-network", &paths)).unwrap();
        assert!(yaml.contains("entryPoints:"));
        assert!(yaml.contains("address: :80") || yaml.contains("address: ':80'"));
        assert!(yaml.contains("directory: /etc/guildserver/traefik/dynamic"));
        assert!(yaml.contains("storage: /etc/guildserver/traefik/dynamic/acme.json"));
        assert!(yaml.contains("network: guildserver-network"));
    }

    #[test]
    fn test_no_resolver_without_email() {
        let paths = Paths::under("/etc/guildserver");
        let config = static_config(&ProxySettings::default(), "net", &paths);
        assert!(config.certificates_resolvers.is_empty());
    }

    #[test]
    fn test_middlewares() {
        let yaml = to_yaml(&default_middlewares()).unwrap();
        assert!(yaml.contains("redirect-to-https"));
        assert!(yaml.contains("scheme: https"));
        assert!(!yaml.contains("routers"));
    }

    #[test]
    fn test_server_routing() {
        let routing = ServerRouting {
            name: "guildserver".to_string(),
            domain: "panel.example.com".to_string(),
            upstream: "http://guildserver:3000".to_string(),
            https: true,
        };
        let config = routing.to_dynamic();
        assert_eq!(config.http.routers.len(), 2);
        assert!(config.http.routers.contains_key("guildserver-router-secure"));
        assert_eq!(routing.file_name(), "guildserver.yml");
    }
}
