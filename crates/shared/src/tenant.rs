use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{RwLock, RwLockReadGuard};

use thiserror::Error;

const PATH_PREFIX: &str = "/r/";
const MAX_SLUG_LEN: usize = 63;

/// Subdomain and slug of one active restaurant, as listed by the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRecord {
    pub slug: String,
    pub subdomain: String,
}

#[derive(Debug, Clone, Default)]
pub struct TenantDirectory {
    slug_by_subdomain: HashMap<String, String>,
}

impl TenantDirectory {
    pub fn from_records(records: &[TenantRecord]) -> Self {
        let slug_by_subdomain = records
            .iter()
            .filter(|record| !record.subdomain.trim().is_empty())
            .map(|record| {
                (
                    record.subdomain.trim().to_ascii_lowercase(),
                    record.slug.trim().to_ascii_lowercase(),
                )
            })
            .collect();
        Self { slug_by_subdomain }
    }

    pub fn len(&self) -> usize {
        self.slug_by_subdomain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slug_by_subdomain.is_empty()
    }

    fn slug_for_subdomain(&self, subdomain: &str) -> Option<&str> {
        self.slug_by_subdomain.get(subdomain).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantMatch {
    Subdomain,
    PathPrefix,
    Hint,
    Default,
}

impl TenantMatch {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subdomain => "subdomain",
            Self::PathPrefix => "path_prefix",
            Self::Hint => "hint",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTenant {
    pub slug: String,
    pub matched_by: TenantMatch,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TenantError {
    #[error("no restaurant matches host '{host}' and path '{path}'")]
    TenantNotFound { host: String, path: String },
}

/// Maps an inbound host and path to a restaurant slug. Resolution order is
/// subdomain, then `/r/{slug}` path prefix, then an explicit hint, then the
/// configured default tenant.
pub struct TenantResolver {
    directory: RwLock<TenantDirectory>,
    reserved_subdomains: HashSet<String>,
    default_slug: Option<String>,
}

impl TenantResolver {
    pub fn new(
        directory: TenantDirectory,
        reserved_subdomains: impl IntoIterator<Item = String>,
        default_slug: Option<String>,
    ) -> Self {
        Self {
            directory: RwLock::new(directory),
            reserved_subdomains: reserved_subdomains
                .into_iter()
                .map(|label| label.to_ascii_lowercase())
                .collect(),
            default_slug: default_slug
                .map(|slug| slug.trim().to_ascii_lowercase())
                .filter(|slug| is_valid_slug(slug)),
        }
    }

    pub fn replace_directory(&self, directory: TenantDirectory) {
        let mut guard = match self.directory.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = directory;
    }

    pub fn known_subdomains(&self) -> usize {
        self.read_directory().len()
    }

    pub fn resolve(&self, host: &str, path: &str) -> Result<String, TenantError> {
        self.resolve_with_hint(host, path, None)
            .map(|resolved| resolved.slug)
    }

    pub fn resolve_with_hint(
        &self,
        host: &str,
        path: &str,
        hint: Option<&str>,
    ) -> Result<ResolvedTenant, TenantError> {
        if let Some(slug) = self.match_subdomain(host) {
            return Ok(ResolvedTenant {
                slug,
                matched_by: TenantMatch::Subdomain,
            });
        }

        if let Some(slug) = slug_from_path(path) {
            return Ok(ResolvedTenant {
                slug,
                matched_by: TenantMatch::PathPrefix,
            });
        }

        if let Some(slug) = hint
            .map(|raw| raw.trim().to_ascii_lowercase())
            .filter(|slug| is_valid_slug(slug))
        {
            return Ok(ResolvedTenant {
                slug,
                matched_by: TenantMatch::Hint,
            });
        }

        if let Some(slug) = self.default_slug.clone() {
            return Ok(ResolvedTenant {
                slug,
                matched_by: TenantMatch::Default,
            });
        }

        Err(TenantError::TenantNotFound {
            host: host.to_string(),
            path: path.to_string(),
        })
    }

    fn match_subdomain(&self, host: &str) -> Option<String> {
        let label = leading_host_label(host)?;
        if self.reserved_subdomains.contains(&label) {
            return None;
        }

        self.read_directory()
            .slug_for_subdomain(&label)
            .map(ToString::to_string)
    }

    fn read_directory(&self) -> RwLockReadGuard<'_, TenantDirectory> {
        match self.directory.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub fn is_valid_slug(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.len() <= MAX_SLUG_LEN
        && candidate
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_'))
}

fn leading_host_label(host: &str) -> Option<String> {
    let host = host.trim().to_ascii_lowercase();
    if host.starts_with('[') {
        return None;
    }

    let without_port = match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|byte| byte.is_ascii_digit()) => name,
        _ => host.as_str(),
    };
    let without_port = without_port.trim_end_matches('.');
    if without_port.parse::<IpAddr>().is_ok() {
        return None;
    }

    let (label, rest) = without_port.split_once('.')?;
    if label.is_empty() || rest.is_empty() {
        return None;
    }
    Some(label.to_string())
}

fn slug_from_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix(PATH_PREFIX)?;
    let segment = rest.split('/').next()?.to_ascii_lowercase();
    is_valid_slug(&segment).then_some(segment)
}

#[cfg(test)]
mod tests {
    use super::{
        TenantDirectory, TenantError, TenantMatch, TenantRecord, TenantResolver,
        leading_host_label, slug_from_path,
    };

    fn resolver(default_slug: Option<&str>) -> TenantResolver {
        TenantResolver::new(
            TenantDirectory::from_records(&[
                TenantRecord {
                    slug: "luigi".to_string(),
                    subdomain: "luigis".to_string(),
                },
                TenantRecord {
                    slug: "sakura".to_string(),
                    subdomain: "sakura".to_string(),
                },
            ]),
            ["www".to_string(), "app".to_string(), "api".to_string()],
            default_slug.map(ToString::to_string),
        )
    }

    #[test]
    fn resolves_known_subdomain_before_path_prefix() {
        let resolved = resolver(None)
            .resolve_with_hint("Luigis.Restaurant-AI.com:8443", "/r/sakura", None)
            .expect("subdomain should resolve");
        assert_eq!(resolved.slug, "luigi");
        assert_eq!(resolved.matched_by, TenantMatch::Subdomain);
    }

    #[test]
    fn falls_through_to_path_prefix_for_unknown_or_reserved_subdomains() {
        let resolver = resolver(None);
        assert_eq!(
            resolver.resolve("www.restaurant-ai.com", "/r/sakura/api/chat"),
            Ok("sakura".to_string())
        );
        assert_eq!(
            resolver.resolve("unknown.restaurant-ai.com", "/r/Luigi"),
            Ok("luigi".to_string())
        );
    }

    #[test]
    fn uses_hint_then_default_when_nothing_else_matches() {
        let resolver = resolver(Some("luigi"));
        let hinted = resolver
            .resolve_with_hint("restaurant-ai.com", "/api/chat", Some(" Sakura "))
            .expect("hint should resolve");
        assert_eq!(hinted.slug, "sakura");
        assert_eq!(hinted.matched_by, TenantMatch::Hint);

        let defaulted = resolver
            .resolve_with_hint("localhost:8080", "/", None)
            .expect("default should resolve");
        assert_eq!(defaulted.slug, "luigi");
        assert_eq!(defaulted.matched_by, TenantMatch::Default);
    }

    #[test]
    fn fails_with_tenant_not_found_without_default() {
        let err = resolver(None)
            .resolve("localhost:8080", "/api/menu")
            .expect_err("nothing should match");
        assert!(matches!(err, TenantError::TenantNotFound { .. }));
    }

    #[test]
    fn resolution_is_stable_across_calls() {
        let resolver = resolver(None);
        let first = resolver.resolve("sakura.example.com", "/").expect("resolves");
        for _ in 0..10 {
            assert_eq!(
                resolver.resolve("sakura.example.com", "/").expect("resolves"),
                first
            );
        }
    }

    #[test]
    fn replacing_the_directory_drops_deactivated_subdomains() {
        let resolver = resolver(None);
        resolver.replace_directory(TenantDirectory::from_records(&[TenantRecord {
            slug: "sakura".to_string(),
            subdomain: "sakura".to_string(),
        }]));
        assert_eq!(resolver.known_subdomains(), 1);
        assert!(resolver.resolve("luigis.example.com", "/").is_err());
    }

    #[test]
    fn host_label_ignores_ip_addresses_and_bare_hosts() {
        assert_eq!(leading_host_label("127.0.0.1:8080"), None);
        assert_eq!(leading_host_label("[::1]:8080"), None);
        assert_eq!(leading_host_label("localhost"), None);
        assert_eq!(
            leading_host_label("luigi.example.com."),
            Some("luigi".to_string())
        );
    }

    #[test]
    fn path_prefix_requires_a_valid_slug_segment() {
        assert_eq!(slug_from_path("/r/"), None);
        assert_eq!(slug_from_path("/r/bad slug"), None);
        assert_eq!(slug_from_path("/menu/luigi"), None);
        assert_eq!(slug_from_path("/r/luigi"), Some("luigi".to_string()));
    }
}
