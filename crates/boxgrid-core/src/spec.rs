//! Container description parser.
//!
//! The input is a simple indented `key: value` document:
//!
//! ```text
//! name: web
//! image: ubuntu:20.04
//! cpu_limit: 2
//! memory_limit: 512
//! privileged: false
//! ```
//!
//! Lookup semantics are deliberately loose: a key is matched anywhere in the
//! document, nested or not, and the first occurrence in document order wins.
//! A key that introduces a nested mapping (`network:` followed by indented
//! children) carries an empty scalar value; for the optional blob fields an
//! empty value is treated as absent. Nested values themselves are not
//! assembled into structured data.

use thiserror::Error;

use crate::types::ContainerSpec;

/// Parse failures for container descriptions.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("container description has no name")]
    MissingName,
}

/// One `key: value` line with its indentation depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub indent: usize,
    pub key: String,
    pub value: String,
}

/// A parsed description document: entries in document order.
#[derive(Debug, Default)]
pub struct Document {
    entries: Vec<Entry>,
}

impl Document {
    /// Parse a document from text. Blank lines and `#` comments are skipped;
    /// lines without a colon are ignored.
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for line in text.lines() {
            if let Some(entry) = parse_line(line) {
                entries.push(entry);
            }
        }
        Self { entries }
    }

    /// First value for `key` in document order, at any nesting depth.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Like [`Document::get`] but mapping an empty value to `None`.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_line(line: &str) -> Option<Entry> {
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let indent = line.len() - line.trim_start_matches([' ', '\t']).len();
    let body = &line[indent..];
    let colon = body.find(':')?;

    let key = body[..colon].trim_end().to_string();
    let value = body[colon + 1..]
        .trim_start_matches([' ', '\t'])
        .trim_end_matches(['\n', '\r'])
        .to_string();

    Some(Entry { indent, key, value })
}

/// Extract a [`ContainerSpec`] from description text.
///
/// Integer fields fall back to 0 when missing or non-numeric; `privileged`
/// is true only for the literal `"true"`. The optional blob fields
/// (`environment`, `mounts`, `network`) become `None` when missing or empty.
pub fn parse_container_spec(text: &str) -> Result<ContainerSpec, SpecError> {
    let doc = Document::parse(text);

    let name = doc.get("name").unwrap_or_default().to_string();
    if name.is_empty() {
        return Err(SpecError::MissingName);
    }

    Ok(ContainerSpec {
        name,
        image: doc.get("image").unwrap_or_default().to_string(),
        config_file: doc.get("config").unwrap_or_default().to_string(),
        cpu_limit: doc
            .get("cpu_limit")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0),
        memory_limit: doc
            .get("memory_limit")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0),
        privileged: doc.get("privileged") == Some("true"),
        environment: doc.get_non_empty("environment").map(str::to_string),
        mounts: doc.get_non_empty("mounts").map(str::to_string),
        network: doc.get_non_empty("network").map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = "\
name: web
image: ubuntu:20.04
cpu_limit: 2
memory_limit: 512
privileged: false
";

    #[test]
    fn parses_scalar_fields() {
        let spec = parse_container_spec(BASIC).unwrap();
        assert_eq!(spec.name, "web");
        assert_eq!(spec.image, "ubuntu:20.04");
        assert_eq!(spec.cpu_limit, 2);
        assert_eq!(spec.memory_limit, 512);
        assert!(!spec.privileged);
        assert!(spec.environment.is_none());
    }

    #[test]
    fn privileged_requires_literal_true() {
        let spec = parse_container_spec("name: a\nprivileged: true\n").unwrap();
        assert!(spec.privileged);
        let spec = parse_container_spec("name: a\nprivileged: yes\n").unwrap();
        assert!(!spec.privileged);
    }

    #[test]
    fn missing_name_is_rejected() {
        assert!(matches!(
            parse_container_spec("image: ubuntu:20.04\n"),
            Err(SpecError::MissingName)
        ));
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let spec = parse_container_spec("# header\n\nname: a\n").unwrap();
        assert_eq!(spec.name, "a");
    }

    #[test]
    fn nested_mapping_value_is_empty_and_field_absent() {
        // A nested mapping leaves the parent key with an empty scalar value;
        // the extracted optional field is then treated as absent.
        let text = "\
name: web
network:
  type: veth
  link: lxcbr0
";
        let doc = Document::parse(text);
        assert_eq!(doc.get("network"), Some(""));

        let spec = parse_container_spec(text).unwrap();
        assert!(spec.network.is_none());
    }

    #[test]
    fn first_occurrence_wins_at_any_depth() {
        let text = "\
environment: PATH=/usr/bin
extra:
  environment: SHADOWED=1
";
        let doc = Document::parse(text);
        assert_eq!(doc.get("environment"), Some("PATH=/usr/bin"));
    }

    #[test]
    fn nested_key_found_when_no_top_level_match() {
        // Lookup descends into nested entries; document order decides.
        let text = "\
name: web
meta:
  mounts: /data:/data
";
        let spec = parse_container_spec(text).unwrap();
        assert_eq!(spec.mounts.as_deref(), Some("/data:/data"));
    }

    #[test]
    fn non_numeric_limits_fall_back_to_zero() {
        let spec = parse_container_spec("name: a\ncpu_limit: lots\n").unwrap();
        assert_eq!(spec.cpu_limit, 0);
    }

    #[test]
    fn keys_with_trailing_space_are_trimmed() {
        let doc = Document::parse("name : web\n");
        assert_eq!(doc.get("name"), Some("web"));
    }
}
