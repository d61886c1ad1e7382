// THEORY:
// The runner's source catalog is a TOML file with one `[[sources]]` table per
// camera or recording. `kind` may be omitted, in which case it is inferred
// from the URI the same way the library does for `Source::new`.

use anyhow::{Context, Result, bail};
use handguard::source::{Source, SourceId, SourceKind};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<SourceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceEntry {
    id: u64,
    name: String,
    uri: String,
    kind: Option<SourceKind>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    recipients: Vec<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl From<SourceEntry> for Source {
    fn from(entry: SourceEntry) -> Self {
        let mut source = Source::new(entry.id, entry.name, entry.uri).with_recipients(entry.recipients);
        if let Some(kind) = entry.kind {
            source = source.with_kind(kind);
        }
        if !entry.enabled {
            source = source.disabled();
        }
        source
    }
}

pub fn load(path: &Path) -> Result<Vec<Source>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading sources file {}", path.display()))?;
    parse(&text).with_context(|| format!("parsing sources file {}", path.display()))
}

pub fn parse(text: &str) -> Result<Vec<Source>> {
    let file: SourcesFile = toml::from_str(text)?;
    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(file.sources.len());
    for entry in file.sources {
        if !seen.insert(SourceId(entry.id)) {
            bail!("source id {} appears more than once", entry.id);
        }
        sources.push(Source::from(entry));
    }
    Ok(sources)
}
