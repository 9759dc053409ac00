//! Language registry for sandboxed execution

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Execution profile of a supported programming language
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageProfile {
    /// Registry key (e.g., "python")
    pub id: String,
    /// Human readable name (e.g., "Python")
    pub display_name: String,
    /// Name of the source file inside the workspace (e.g., "main.py")
    pub entry_filename: String,
    /// Argument vector run inside the sandbox
    pub run_command: Vec<String>,
    /// Sandbox image reference
    pub image_ref: String,
    /// Directory holding the image build instructions (None means pull)
    pub build_source: Option<PathBuf>,
    /// Wall-clock deadline override for this language
    pub timeout: Option<Duration>,
}

impl LanguageProfile {
    /// Deadline for one execution, falling back to the system default
    pub fn deadline(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageProfile {
    name: String,
    source_file: String,
    run_command: Vec<String>,
    image: String,
    build_context: Option<String>,
    timeout_secs: Option<u64>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Immutable mapping from language identifier to profile.
///
/// Loaded once at startup and shared behind an `Arc`; lookups are pure.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    profiles: HashMap<String, LanguageProfile>,
}

impl LanguageRegistry {
    /// Registry built from the table shipped with the crate.
    ///
    /// Build contexts resolve against the crate root.
    pub fn builtin() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml_str(content, Path::new(env!("CARGO_MANIFEST_DIR")))
    }

    /// Load a registry from a TOML file on disk.
    ///
    /// Relative build contexts resolve against the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read language config {}", path.display()))?;
        let path = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve language config {}", path.display()))?;
        let base_dir = path.parent().unwrap_or(Path::new("/"));
        Self::from_toml_str(&content, base_dir)
    }

    /// Parse a registry from TOML text, resolving relative build contexts
    /// against `base_dir`
    pub fn from_toml_str(content: &str, base_dir: &Path) -> anyhow::Result<Self> {
        let raw_profiles: HashMap<String, RawLanguageProfile> =
            toml::from_str(content).context("Invalid language config")?;

        let mut profiles = HashMap::new();

        for (name, raw) in raw_profiles {
            if raw.run_command.is_empty() {
                anyhow::bail!("Empty run_command for language {}", name);
            }
            if raw.source_file.contains('/') || raw.source_file.contains("..") {
                anyhow::bail!("Invalid source_file for {}: {}", name, raw.source_file);
            }

            let id = normalize(&name);
            let profile = LanguageProfile {
                id: id.clone(),
                display_name: raw.name,
                entry_filename: raw.source_file,
                run_command: raw.run_command,
                image_ref: raw.image,
                build_source: raw.build_context.map(|dir| base_dir.join(dir)),
                timeout: raw.timeout_secs.map(Duration::from_secs),
            };

            for alias in raw.aliases {
                profiles.insert(normalize(&alias), profile.clone());
            }
            profiles.insert(id, profile);
        }

        Ok(Self { profiles })
    }

    /// Get a profile by language name (case-insensitive, trimmed)
    pub fn get(&self, language: &str) -> Option<&LanguageProfile> {
        self.profiles.get(&normalize(language))
    }

    pub fn contains(&self, language: &str) -> bool {
        self.get(language).is_some()
    }

    /// Canonical language ids, sorted, without aliases
    pub fn supported_languages(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .profiles
            .iter()
            .filter(|(key, profile)| **key == profile.id)
            .map(|(key, _)| key.clone())
            .collect();
        ids.sort();
        ids
    }
}

fn normalize(language: &str) -> String {
    language.trim().to_lowercase()
}
