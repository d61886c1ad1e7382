// THEORY:
// A "view" is a named camera position, and every view owns one set of danger
// zones. Which view a source looks at is configuration, not code: the `ViewMap`
// is a pure lookup from a source URI to a `ViewId`, built from declarative rules.
// Keeping it pure means the stream worker never has to know how cameras are
// named or addressed.
//
// Matching rules, evaluated view by view in declaration order:
// 1.  **Network URIs** (`rtsp://` and friends) match on the host. A rule matches
//     either the full host or, for IPv4 hosts, the last octet ("102").
// 2.  **Everything else** is treated as a path and matches when its file name
//     contains one of the view's keywords.
// The first matching view wins; with no match the default view is used.

use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use url::{Host, Url};

/// Index of a view in the configured view list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize)]
#[serde(transparent)]
pub struct ViewId(pub usize);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declarative description of one view.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ViewSpec {
    pub name: String,
    /// Region annotation file, relative to the configured regions directory.
    pub annotation: PathBuf,
    /// Substrings matched against a file source's file name.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Hosts (or IPv4 last octets) matched against a network source's host.
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl ViewSpec {
    pub fn new(name: impl Into<String>, annotation: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            annotation: annotation.into(),
            keywords: Vec::new(),
            hosts: Vec::new(),
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_hosts(mut self, hosts: &[&str]) -> Self {
        self.hosts = hosts.iter().map(|h| h.to_string()).collect();
        self
    }
}

/// Resolves source URIs to views.
#[derive(Debug, Clone, Default)]
pub struct ViewMap {
    views: Vec<ViewSpec>,
    default_view: ViewId,
}

impl ViewMap {
    pub fn new(views: Vec<ViewSpec>, default_view: ViewId) -> Self {
        Self { views, default_view }
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn default_view(&self) -> ViewId {
        self.default_view
    }

    /// The view a source URI belongs to.
    pub fn view_for(&self, uri: &str) -> ViewId {
        let matched = match network_host(uri) {
            Some(host) => self
                .views
                .iter()
                .position(|view| view.hosts.iter().any(|rule| host.matches(rule))),
            None => {
                let name = file_name(uri);
                self.views
                    .iter()
                    .position(|view| view.keywords.iter().any(|k| name.contains(k.as_str())))
            }
        };
        matched.map(ViewId).unwrap_or(self.default_view)
    }

    pub fn view_name(&self, id: ViewId) -> &str {
        self.views
            .get(id.0)
            .map(|v| v.name.as_str())
            .unwrap_or("unknown view")
    }
}

/// The host of a network source, as host rules see it.
#[derive(Debug, PartialEq, Eq)]
struct NetworkHost {
    /// Without brackets for IPv6.
    name: String,
    last_octet: Option<u8>,
}

impl NetworkHost {
    fn matches(&self, rule: &str) -> bool {
        let rule = rule.trim().trim_start_matches('[').trim_end_matches(']');
        rule.eq_ignore_ascii_case(&self.name)
            || (self.last_octet.is_some() && rule.parse::<u8>().ok() == self.last_octet)
    }
}

/// The host of a network URI. Paths, `file:` URLs and drive letters yield `None`.
fn network_host(uri: &str) -> Option<NetworkHost> {
    let url = Url::parse(uri.trim()).ok()?;
    // `C:\...` parses as a one-letter scheme.
    if url.scheme().len() < 2 || url.scheme() == "file" {
        return None;
    }
    let host = match url.host()? {
        Host::Ipv4(addr) => NetworkHost {
            name: addr.to_string(),
            last_octet: Some(addr.octets()[3]),
        },
        Host::Ipv6(addr) => NetworkHost {
            name: addr.to_string(),
            last_octet: None,
        },
        // Non-special schemes such as rtsp keep IPv4 hosts as opaque text.
        Host::Domain(domain) => NetworkHost {
            last_octet: domain.parse::<Ipv4Addr>().ok().map(|a| a.octets()[3]),
            name: domain.to_string(),
        },
    };
    Some(host)
}

/// The final path component, accepting both separator styles.
fn file_name(uri: &str) -> &str {
    uri.rsplit(['/', '\\']).next().unwrap_or(uri)
}
