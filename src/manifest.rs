//! Dependency manifest with churn tiers
//!
//! The manifest is a requirements file. Each requirement belongs to one of two tiers:
//! light (web framework, server, validation, config, HTTP client, progress utility) and
//! heavy (generative-AI client, embedding runtime, model-hub client, vector-database
//! client). Light installs first so that bumping a heavy package only invalidates the
//! layers from the heavy install onward.
//!
//! Tiers are assigned either by explicit section markers:
//!
//! ```text
//! # tier: light
//! fastapi==0.115.0
//! # tier: heavy
//! sentence-transformers>=3.0
//! ```
//!
//! or, when the file has no markers, by matching package names against the profile's
//! heavy-package list.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line}: cannot parse requirement '{content}'")]
    InvalidLine { line: usize, content: String },

    #[error("Line {line}: installer option '{content}' is not supported in a tiered manifest")]
    Unsupported { line: usize, content: String },

    #[error("Line {line}: unknown tier '{value}' (expected light or heavy)")]
    UnknownTier { line: usize, value: String },

    #[error("Line {line}: duplicate requirement '{name}'")]
    Duplicate { line: usize, name: String },

    #[error("Manifest contains no requirements")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Light,
    Heavy,
}

impl Tier {
    /// Installation order: least churn first
    pub const INSTALL_ORDER: [Tier; 2] = [Tier::Light, Tier::Heavy];
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Light => write!(f, "light"),
            Tier::Heavy => write!(f, "heavy"),
        }
    }
}

/// One `name[extras]<constraint>; marker` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    pub tier: Tier,
    /// The requirement text as written, minus comments
    pub raw: String,
}

impl Requirement {
    /// Name compared case- and separator-insensitively
    pub fn normalized_name(&self) -> String {
        normalize(&self.name)
    }

    /// Shell-quoted installer argument
    pub fn install_arg(&self) -> String {
        format!("'{}'", self.raw.replace('\'', "'\\''"))
    }
}

fn normalize(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[(?P<extras>[A-Za-z0-9._,\s-]*)\])?\s*(?P<constraint>(?:===|==|!=|~=|>=|<=|>|<)\s*[^;\s][^;]*?)?\s*(?:;\s*(?P<marker>.+))?$",
        )
        .expect("valid regex")
    })
}

fn tier_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^#\s*tier\s*:\s*(\S+)\s*$").expect("valid regex"))
}

/// Parsed, tiered requirements in manifest order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyManifest {
    requirements: Vec<Requirement>,
    explicit_tiers: bool,
}

impl DependencyManifest {
    pub fn load(path: &Path, heavy_packages: &[String]) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, heavy_packages)
    }

    /// Parses requirements text
    ///
    /// # Errors
    ///
    /// Malformed lines, installer options, duplicates and empty manifests are rejected
    /// with the offending line number.
    pub fn parse(content: &str, heavy_packages: &[String]) -> Result<Self, ManifestError> {
        let heavy: HashSet<String> = heavy_packages.iter().map(|n| normalize(n)).collect();
        let explicit_tiers = content
            .lines()
            .any(|l| tier_marker_re().is_match(l.trim()));

        let mut requirements = Vec::new();
        let mut seen = HashSet::new();
        let mut current_tier = Tier::Light;

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = line.trim();

            if let Some(cap) = tier_marker_re().captures(trimmed) {
                current_tier = match cap[1].to_lowercase().as_str() {
                    "light" => Tier::Light,
                    "heavy" => Tier::Heavy,
                    other => {
                        return Err(ManifestError::UnknownTier {
                            line: line_no,
                            value: other.to_string(),
                        })
                    }
                };
                continue;
            }

            let text = match trimmed.find(" #") {
                Some(pos) => trimmed[..pos].trim_end(),
                None if trimmed.starts_with('#') => "",
                None => trimmed,
            };
            if text.is_empty() {
                continue;
            }
            if text.starts_with('-') {
                return Err(ManifestError::Unsupported {
                    line: line_no,
                    content: text.to_string(),
                });
            }

            let cap = requirement_re()
                .captures(text)
                .ok_or_else(|| ManifestError::InvalidLine {
                    line: line_no,
                    content: text.to_string(),
                })?;

            let name = cap["name"].to_string();
            if !seen.insert(normalize(&name)) {
                return Err(ManifestError::Duplicate {
                    line: line_no,
                    name,
                });
            }

            let tier = if explicit_tiers {
                current_tier
            } else if heavy.contains(&normalize(&name)) {
                Tier::Heavy
            } else {
                Tier::Light
            };

            let extras = cap
                .name("extras")
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(|e| e.trim().to_string())
                        .filter(|e| !e.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            requirements.push(Requirement {
                name,
                extras,
                constraint: cap
                    .name("constraint")
                    .map(|m| m.as_str().split_whitespace().collect::<String>()),
                marker: cap.name("marker").map(|m| m.as_str().trim().to_string()),
                tier,
                raw: text.to_string(),
            });
        }

        if requirements.is_empty() {
            return Err(ManifestError::Empty);
        }

        Ok(Self {
            requirements,
            explicit_tiers,
        })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Whether tiers came from `# tier:` markers rather than the heavy-package list
    pub fn has_explicit_tiers(&self) -> bool {
        self.explicit_tiers
    }

    /// Requirements of one tier, in manifest order
    pub fn tier(&self, tier: Tier) -> Vec<&Requirement> {
        self.requirements.iter().filter(|r| r.tier == tier).collect()
    }

    /// Non-empty tiers in installation order
    pub fn install_order(&self) -> Vec<(Tier, Vec<&Requirement>)> {
        Tier::INSTALL_ORDER
            .iter()
            .map(|&t| (t, self.tier(t)))
            .filter(|(_, reqs)| !reqs.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heavy() -> Vec<String> {
        ["google-genai", "sentence-transformers", "huggingface_hub", "weaviate-client"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    const REQUIREMENTS: &str = r#"
fastapi==0.115.0
uvicorn[standard]==0.30.6
pydantic>=2.7
python-dotenv==1.0.1  # config loader
httpx>=0.27
tqdm
google-genai>=0.3.0
sentence-transformers==3.0.1
huggingface-hub>=0.23
weaviate-client>=4.7
"#;

    #[test]
    fn test_classification_by_heavy_list() {
        let manifest = DependencyManifest::parse(REQUIREMENTS, &heavy()).unwrap();
        assert!(!manifest.has_explicit_tiers());

        let light: Vec<_> = manifest.tier(Tier::Light).iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            light,
            vec!["fastapi", "uvicorn", "pydantic", "python-dotenv", "httpx", "tqdm"]
        );

        let heavy: Vec<_> = manifest.tier(Tier::Heavy).iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            heavy,
            vec!["google-genai", "sentence-transformers", "huggingface-hub", "weaviate-client"]
        );
    }

    #[test]
    fn test_install_order_light_first() {
        let manifest = DependencyManifest::parse(REQUIREMENTS, &heavy()).unwrap();
        let order: Vec<Tier> = manifest.install_order().iter().map(|(t, _)| *t).collect();
        assert_eq!(order, vec![Tier::Light, Tier::Heavy]);
    }

    #[test]
    fn test_explicit_markers_override_list() {
        let content = "# tier: heavy\nfastapi==0.115.0\n# tier: light\ntorch==2.3.0\n";
        let manifest = DependencyManifest::parse(content, &heavy()).unwrap();
        assert!(manifest.has_explicit_tiers());
        assert_eq!(manifest.tier(Tier::Heavy)[0].name, "fastapi");
        assert_eq!(manifest.tier(Tier::Light)[0].name, "torch");
    }

    #[test]
    fn test_lines_before_first_marker_are_light() {
        let content = "uvicorn\n# tier: heavy\nweaviate-client\n";
        let manifest = DependencyManifest::parse(content, &[]).unwrap();
        assert_eq!(manifest.tier(Tier::Light)[0].name, "uvicorn");
        assert_eq!(manifest.tier(Tier::Heavy)[0].name, "weaviate-client");
    }

    #[test]
    fn test_requirement_fields() {
        let manifest =
            DependencyManifest::parse("uvicorn[standard] == 0.30.6 ; python_version >= \"3.9\"", &[])
                .unwrap();
        let req = &manifest.requirements()[0];
        assert_eq!(req.name, "uvicorn");
        assert_eq!(req.extras, vec!["standard".to_string()]);
        assert_eq!(req.constraint.as_deref(), Some("==0.30.6"));
        assert_eq!(req.marker.as_deref(), Some("python_version >= \"3.9\""));
    }

    #[test]
    fn test_install_arg_is_quoted() {
        let manifest = DependencyManifest::parse("pydantic>=2.7", &[]).unwrap();
        assert_eq!(manifest.requirements()[0].install_arg(), "'pydantic>=2.7'");
    }

    #[test]
    fn test_duplicate_rejected() {
        let result = DependencyManifest::parse("fastapi\nFastAPI==0.1\n", &[]);
        assert!(matches!(
            result,
            Err(ManifestError::Duplicate { line: 2, .. })
        ));
    }

    #[test]
    fn test_options_rejected() {
        let result = DependencyManifest::parse("--index-url https://example.org\nfastapi\n", &[]);
        assert!(matches!(
            result,
            Err(ManifestError::Unsupported { line: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_line() {
        let result = DependencyManifest::parse("fastapi\n@@@\n", &[]);
        assert!(matches!(
            result,
            Err(ManifestError::InvalidLine { line: 2, .. })
        ));
    }

    #[test]
    fn test_unknown_tier() {
        let result = DependencyManifest::parse("# tier: medium\nfastapi\n", &[]);
        assert!(matches!(result, Err(ManifestError::UnknownTier { .. })));
    }

    #[test]
    fn test_empty_manifest() {
        let result = DependencyManifest::parse("# nothing here\n\n", &[]);
        assert!(matches!(result, Err(ManifestError::Empty)));
    }

    #[test]
    fn test_normalized_names() {
        let manifest = DependencyManifest::parse("Huggingface_Hub>=0.23", &heavy()).unwrap();
        assert_eq!(manifest.requirements()[0].normalized_name(), "huggingface-hub");
        assert_eq!(manifest.requirements()[0].tier, Tier::Heavy);
    }
}
