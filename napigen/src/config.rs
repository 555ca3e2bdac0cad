//! Configuration types for `napigen.toml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::text;

/// Root configuration. Relative paths resolve against the directory that
/// holds the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Plugin source folder (headers, manifest, C ABI output).
    #[serde(default = "default_src_folder")]
    pub src_folder: PathBuf,
    /// JSON array of library sources, relative to `src_folder`.
    #[serde(default = "default_sources_manifest")]
    pub sources_manifest: PathBuf,
    /// Global preprocessor defines of the build. `NAME=VALUE` entries are
    /// ignored by the header scanner.
    #[serde(default)]
    pub defines: Vec<String>,
    /// Prefix of the `// <prefix>_API_FUNCTIONS` style template marks.
    #[serde(default = "default_marker_prefix")]
    pub marker_prefix: String,
    /// Prefix of the loader and guard names in the generated wrappers.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Engine classes to include, e.g. `font` for
    /// `<godot_cpp/classes/font.hpp>`.
    #[serde(default)]
    pub godot_includes: Vec<String>,
    /// Header default-argument expression → expression used in generated
    /// code.
    #[serde(default)]
    pub default_values: HashMap<String, String>,
    pub output: OutputConfig,
    pub c_api: CApiConfig,
    pub cpp: CppConfig,
    /// The C# target is skipped when this table is absent.
    #[serde(default)]
    pub csharp: Option<CSharpConfig>,
}

/// Where `api.json` goes.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CApiConfig {
    pub template: PathBuf,
    /// Output folder for the generated C ABI source, relative to
    /// `src_folder`.
    #[serde(default = "default_gen_dir")]
    pub gen_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CppConfig {
    pub template: PathBuf,
    pub output_dir: PathBuf,
    /// Headers copied verbatim next to the generated header.
    #[serde(default)]
    pub shared_headers: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CSharpConfig {
    pub template: PathBuf,
    pub output_dir: PathBuf,
}

fn default_src_folder() -> PathBuf {
    PathBuf::from("src")
}

fn default_sources_manifest() -> PathBuf {
    PathBuf::from("default_sources.json")
}

fn default_marker_prefix() -> String {
    "GENERATOR_DD3D".to_string()
}

fn default_api_prefix() -> String {
    "DD3D".to_string()
}

fn default_gen_dir() -> PathBuf {
    PathBuf::from("gen")
}

impl Config {
    /// Whether `name` is among the plain-identifier defines.
    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.iter().any(|d| d == name)
    }
}

/// Load a TOML configuration file. A UTF-8 BOM is accepted.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = text::read_all_text(path)?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
