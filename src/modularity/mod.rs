// src/modularity/mod.rs

//! Modular RPM stream metadata
//!
//! Reads and writes modulemd documents (one YAML stream holding one or more
//! module streams), adds built RPM artifacts to module definitions, computes
//! dependency contexts, and renders merged documents back for publication.
//!
//! Streams keep their parsed document tree intact; accessors and mutators
//! touch only the fields this engine owns, so everything else round-trips
//! verbatim.

use crate::error::{Error, Result};
use crate::nevra::Nevra;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Length of the rendered context identifier
const CONTEXT_LEN: usize = 8;

/// Name-Stream-Version-Context-Architecture module identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nsvca {
    pub name: String,
    pub stream: String,
    pub version: u64,
    pub context: String,
    pub arch: String,
}

impl fmt::Display for Nsvca {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.name, self.stream, self.version, self.context, self.arch
        )
    }
}

/// One module stream backed by its full modulemd document
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleStream {
    doc: Value,
}

impl ModuleStream {
    fn data(&self) -> Option<&Value> {
        self.doc.get("data")
    }

    fn data_mut(&mut self) -> Option<&mut Value> {
        self.doc.get_mut("data")
    }

    fn str_field(&self, field: &str) -> String {
        self.data()
            .and_then(|d| d.get(field))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub fn name(&self) -> String {
        self.str_field("name")
    }

    pub fn stream(&self) -> String {
        self.str_field("stream")
    }

    pub fn version(&self) -> u64 {
        self.data()
            .and_then(|d| d.get("version"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn context(&self) -> String {
        self.str_field("context")
    }

    pub fn arch(&self) -> String {
        self.str_field("arch")
    }

    pub fn nsvca(&self) -> Nsvca {
        Nsvca {
            name: self.name(),
            stream: self.stream(),
            version: self.version(),
            context: self.context(),
            arch: self.arch(),
        }
    }

    fn set_field(&mut self, field: &str, value: Value) {
        if let Some(Value::Mapping(data)) = self.data_mut() {
            data.insert(Value::String(field.to_string()), value);
        }
    }

    pub fn set_version(&mut self, version: u64) {
        self.set_field("version", Value::Number(version.into()));
    }

    pub fn set_context(&mut self, context: &str) {
        self.set_field("context", Value::String(context.to_string()));
    }

    pub fn set_arch(&mut self, arch: &str) {
        self.set_field("arch", Value::String(arch.to_string()));
    }

    /// Advertised RPM artifacts of this stream
    pub fn artifacts(&self) -> Vec<String> {
        self.data()
            .and_then(|d| d.get("artifacts"))
            .and_then(|a| a.get("rpms"))
            .and_then(Value::as_sequence)
            .map(|seq| {
                seq.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append a built RPM artifact to the stream's advertised content
    ///
    /// Packages whose name starts with one of the filter prefixes are
    /// silently excluded; re-adding an already listed artifact is a no-op.
    pub fn add_rpm_artifact(&mut self, nevra: &Nevra, filter_prefixes: &[String]) {
        if filter_prefixes.iter().any(|p| nevra.name.starts_with(p)) {
            return;
        }
        let entry = nevra.to_string();
        if self.artifacts().contains(&entry) {
            return;
        }

        let Some(Value::Mapping(data)) = self.data_mut() else {
            return;
        };
        let artifacts = data
            .entry(Value::String("artifacts".to_string()))
            .or_insert_with(|| Value::Mapping(Default::default()));
        if let Value::Mapping(artifacts) = artifacts {
            let rpms = artifacts
                .entry(Value::String("rpms".to_string()))
                .or_insert_with(|| Value::Sequence(Vec::new()));
            if let Value::Sequence(rpms) = rpms {
                rpms.push(Value::String(entry));
            }
        }
    }

    fn dependency_map(&self, kind: &str) -> BTreeMap<String, Vec<String>> {
        let mut deps = BTreeMap::new();
        let Some(entries) = self
            .data()
            .and_then(|d| d.get("dependencies"))
            .and_then(Value::as_sequence)
        else {
            return deps;
        };
        for entry in entries {
            let Some(Value::Mapping(map)) = entry.get(kind).cloned() else {
                continue;
            };
            for (module, streams) in &map {
                let Some(module) = module.as_str() else {
                    continue;
                };
                let mut streams: Vec<String> = streams
                    .as_sequence()
                    .map(|seq| {
                        seq.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                streams.sort();
                deps.insert(module.to_string(), streams);
            }
        }
        deps
    }

    /// Build-time module dependencies (module name → streams)
    pub fn build_deps(&self) -> BTreeMap<String, Vec<String>> {
        self.dependency_map("buildrequires")
    }

    /// Run-time module dependencies (module name → streams)
    pub fn runtime_deps(&self) -> BTreeMap<String, Vec<String>> {
        self.dependency_map("requires")
    }

    /// Deterministic hash of the build-time dependency set
    pub fn compute_build_context(&self) -> String {
        hash_dependency_map(&self.build_deps())
    }

    /// Deterministic hash of the run-time dependency set
    pub fn compute_runtime_context(&self) -> String {
        hash_dependency_map(&self.runtime_deps())
    }

    /// Derive and store the stream context from its dependency hashes
    pub fn update_context(&mut self) {
        let build = self.compute_build_context();
        let runtime = self.compute_runtime_context();
        let digest = hex::encode(Sha256::digest(format!("{build}{runtime}").as_bytes()));
        let context = digest[..CONTEXT_LEN].to_string();
        self.set_context(&context);
    }

    /// Components sorted by declared build order, declaration order on ties
    pub fn components_in_build_order(&self) -> Vec<(String, i64)> {
        let Some(Value::Mapping(rpms)) = self
            .data()
            .and_then(|d| d.get("components"))
            .and_then(|c| c.get("rpms"))
            .cloned()
        else {
            return Vec::new();
        };

        let mut components: Vec<(String, i64)> = rpms
            .iter()
            .filter_map(|(name, spec)| {
                let name = name.as_str()?.to_string();
                let order = spec
                    .get("buildorder")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                Some((name, order))
            })
            .collect();
        components.sort_by_key(|(_, order)| *order);
        components
    }

    /// Render this stream as a standalone modulemd document
    pub fn render(&self) -> Result<String> {
        let body = serde_yaml::to_string(&self.doc)
            .map_err(|e| Error::MalformedModuleDocument(e.to_string()))?;
        Ok(format!("---\n{body}"))
    }
}

/// Hash a sorted dependency map: JSON-serialize, sha256, hex
fn hash_dependency_map(deps: &BTreeMap<String, Vec<String>>) -> String {
    // BTreeMap keys are already sorted; serde_json keeps that order
    let serialized = serde_json::to_string(deps).unwrap_or_default();
    hex::encode(Sha256::digest(serialized.as_bytes()))
}

/// A parsed module metadata document: zero or more module streams
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleIndex {
    streams: Vec<ModuleStream>,
}

impl ModuleIndex {
    /// Parse a modulemd document stream
    ///
    /// Fails with `MalformedModuleDocument` when nothing in the text parses
    /// as YAML, and `NoModuleStreamFound` when the text parses but holds no
    /// module stream. Use [`ModuleIndex::parse_with_override`] when an
    /// explicit stream identity makes an empty result acceptable.
    pub fn parse(text: &str) -> Result<Self> {
        let index = Self::parse_lenient(text)?;
        if index.streams.is_empty() {
            return Err(Error::NoModuleStreamFound);
        }
        Ok(index)
    }

    /// Parse, filtered to a known (name, stream) identity
    ///
    /// A document with zero matching streams yields an empty index rather
    /// than an error.
    pub fn parse_with_override(text: &str, name: &str, stream: &str) -> Result<Self> {
        let mut index = Self::parse_lenient(text)?;
        index
            .streams
            .retain(|s| s.name() == name && s.stream() == stream);
        Ok(index)
    }

    fn parse_lenient(text: &str) -> Result<Self> {
        let mut streams = Vec::new();
        let mut parse_failures = Vec::new();
        let mut documents = 0usize;

        for doc in serde_yaml::Deserializer::from_str(text) {
            documents += 1;
            match Value::deserialize(doc) {
                Ok(value) => {
                    if value.is_null() {
                        continue;
                    }
                    let kind = value
                        .get("document")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    // modulemd-defaults and other document kinds pass through
                    // unmodified; only module streams are indexed
                    if kind == "modulemd" {
                        streams.push(ModuleStream { doc: value });
                    }
                }
                Err(e) => parse_failures.push(e.to_string()),
            }
        }

        if documents > 0 && parse_failures.len() == documents {
            return Err(Error::MalformedModuleDocument(
                parse_failures.join("; "),
            ));
        }
        Ok(Self { streams })
    }

    pub fn streams(&self) -> &[ModuleStream] {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut [ModuleStream] {
        &mut self.streams
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn add_stream(&mut self, stream: ModuleStream) {
        self.streams.push(stream);
    }

    /// Whether an NSVCA-equal stream is already present
    pub fn has_module(&self, nsvca: &Nsvca) -> bool {
        self.streams.iter().any(|s| &s.nsvca() == nsvca)
    }

    /// Render all streams back into one multi-document text
    pub fn render(&self) -> Result<String> {
        let mut out = String::new();
        for stream in &self.streams {
            out.push_str(&stream.render()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"---
document: modulemd
version: 2
data:
  name: nodejs
  stream: "16"
  version: 8060020220201
  context: 9edba152
  arch: x86_64
  summary: Javascript runtime
  license:
    module:
      - MIT
  dependencies:
    - buildrequires:
        platform: [el8]
      requires:
        platform: [el8]
  components:
    rpms:
      nodejs:
        rationale: Main package
        buildorder: 10
      npm:
        rationale: Package manager
      nodejs-packaging:
        rationale: Tooling
        buildorder: -1
  artifacts:
    rpms:
      - nodejs-1:16.13.1-3.module_el8.x86_64
"#;

    #[test]
    fn test_parse_single_stream() {
        let index = ModuleIndex::parse(TEMPLATE).unwrap();
        assert_eq!(index.streams().len(), 1);
        let s = &index.streams()[0];
        assert_eq!(s.name(), "nodejs");
        assert_eq!(s.stream(), "16");
        assert_eq!(s.version(), 8060020220201);
        assert_eq!(s.context(), "9edba152");
        assert_eq!(s.arch(), "x86_64");
    }

    #[test]
    fn test_parse_garbage_fails() {
        let err = ModuleIndex::parse("{{{не yaml").unwrap_err();
        assert!(matches!(err, Error::MalformedModuleDocument(_)));
    }

    #[test]
    fn test_parse_no_streams_fails_without_override() {
        let text = "---\ndocument: modulemd-defaults\nversion: 1\ndata:\n  module: nodejs\n";
        assert!(matches!(
            ModuleIndex::parse(text),
            Err(Error::NoModuleStreamFound)
        ));
        let index = ModuleIndex::parse_with_override(text, "nodejs", "16").unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_round_trip_preserves_identity_and_artifacts() {
        let index = ModuleIndex::parse(TEMPLATE).unwrap();
        let rendered = index.render().unwrap();
        let reparsed = ModuleIndex::parse(&rendered).unwrap();
        let a = &index.streams()[0];
        let b = &reparsed.streams()[0];
        assert_eq!(a.nsvca(), b.nsvca());
        let mut first = a.artifacts();
        let mut second = b.artifacts();
        first.sort();
        second.sort();
        assert_eq!(first, second);
        // Fields the engine does not touch survive too
        assert!(rendered.contains("summary: Javascript runtime"));
    }

    #[test]
    fn test_add_artifact_and_filtering() {
        let mut index = ModuleIndex::parse(TEMPLATE).unwrap();
        let stream = &mut index.streams_mut()[0];
        let filters = vec!["nodejs-devel".to_string()];

        let npm = Nevra::new("npm", "1", "8.1.2", "3.module_el8", "x86_64");
        stream.add_rpm_artifact(&npm, &filters);
        assert!(stream
            .artifacts()
            .contains(&"npm-1:8.1.2-3.module_el8.x86_64".to_string()));

        // Filtered prefix is silently excluded
        let devel = Nevra::new("nodejs-devel", "1", "16.13.1", "3.module_el8", "x86_64");
        stream.add_rpm_artifact(&devel, &filters);
        assert!(!stream
            .artifacts()
            .iter()
            .any(|a| a.starts_with("nodejs-devel")));

        // Idempotent add
        let before = stream.artifacts().len();
        stream.add_rpm_artifact(&npm, &filters);
        assert_eq!(stream.artifacts().len(), before);
    }

    #[test]
    fn test_dependency_contexts_are_stable() {
        let index = ModuleIndex::parse(TEMPLATE).unwrap();
        let stream = &index.streams()[0];
        assert_eq!(
            stream.build_deps(),
            BTreeMap::from([("platform".to_string(), vec!["el8".to_string()])])
        );
        let first = stream.compute_build_context();
        let second = stream.compute_build_context();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_update_context_length() {
        let mut index = ModuleIndex::parse(TEMPLATE).unwrap();
        let stream = &mut index.streams_mut()[0];
        stream.update_context();
        assert_eq!(stream.context().len(), CONTEXT_LEN);
    }

    #[test]
    fn test_components_in_build_order() {
        let index = ModuleIndex::parse(TEMPLATE).unwrap();
        let components = index.streams()[0].components_in_build_order();
        let names: Vec<&str> = components.iter().map(|(n, _)| n.as_str()).collect();
        // buildorder -1 first, unordered (0) second, 10 last
        assert_eq!(names, vec!["nodejs-packaging", "npm", "nodejs"]);
    }

    #[test]
    fn test_has_module() {
        let index = ModuleIndex::parse(TEMPLATE).unwrap();
        let nsvca = index.streams()[0].nsvca();
        assert!(index.has_module(&nsvca));
        let mut other = nsvca.clone();
        other.context = "deadbeef".to_string();
        assert!(!index.has_module(&other));
    }
}
