//! Source Map v3 documents for outputs whose transformer does not produce
//! position mappings itself (HTML and the concatenated stylesheet).
//!
//! These maps carry the original sources and their contents, which is what
//! browser devtools need to show the author's files, with an empty
//! `mappings` field.

use camino::{Utf8Component, Utf8Path};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SourceMap {
    version: u8,
    file: String,
    sources: Vec<String>,
    sources_content: Vec<String>,
    names: Vec<String>,
    mappings: String,
}

impl SourceMap {
    pub(crate) fn new(file: impl Into<String>) -> Self {
        Self {
            version: 3,
            file: file.into(),
            sources: Vec::new(),
            sources_content: Vec::new(),
            names: Vec::new(),
            mappings: String::new(),
        }
    }

    /// Registers a source, `url` being relative to the directory of the map.
    pub(crate) fn source(mut self, url: impl Into<String>, content: impl Into<String>) -> Self {
        self.sources.push(url.into());
        self.sources_content.push(content.into());
        self
    }

    pub(crate) fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Relative URL from directory `from` to file `to`; both must be relative to
/// the same root.
pub(crate) fn relative_url(from: &Utf8Path, to: &Utf8Path) -> String {
    fn normal(path: &Utf8Path) -> Vec<Utf8Component<'_>> {
        path.components()
            .filter(|c| *c != Utf8Component::CurDir)
            .collect()
    }

    let from = normal(from);
    let to = normal(to);

    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend(to[common..].iter().map(|c| c.as_str()));

    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_url() {
        assert_eq!(
            relative_url(
                Utf8Path::new("public/styles"),
                Utf8Path::new("src/styles/main.scss")
            ),
            "../../src/styles/main.scss"
        );
        assert_eq!(
            relative_url(Utf8Path::new("public"), Utf8Path::new("public/index.html")),
            "index.html"
        );
        assert_eq!(
            relative_url(Utf8Path::new("./public"), Utf8Path::new("src/views/index.html")),
            "../src/views/index.html"
        );
    }

    #[test]
    fn test_map_shape() {
        let json = SourceMap::new("index.html")
            .source("../src/views/index.html", "<p>hi</p>")
            .to_json()
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 3);
        assert_eq!(value["file"], "index.html");
        assert_eq!(value["sources"][0], "../src/views/index.html");
        assert_eq!(value["sourcesContent"][0], "<p>hi</p>");
        assert_eq!(value["mappings"], "");
    }
}
