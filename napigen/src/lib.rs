//! napigen — annotated GDExtension headers → native API wrappers.
//!
//! Scans the `NAPI_*` markers of a Godot plugin's C++ headers into one
//! [`model::Api`], then emits a flat C ABI shim, a C++ wrapper header, an
//! optional C# wrapper and `api.json` (the model plus a SHA-1 content hash).
//!
//! # Quick start
//!
//! Run the whole pipeline from a config (suitable for a build script):
//!
//! ```no_run
//! use std::path::Path;
//!
//! let mut sources = Vec::new();
//! let code = napigen::run(Path::new("napigen.toml"), &[], false, &mut sources);
//! assert_eq!(code, 0);
//! // `sources` now holds the generated C ABI file, relative to `src_folder`.
//! ```
//!
//! Or drive the stages yourself:
//!
//! ```no_run
//! use std::path::PathBuf;
//! use napigen::extract::{ExtractOptions, extract_api};
//!
//! let api = extract_api(&[PathBuf::from("src/3d/debug_draw_3d.h")], &ExtractOptions::default())
//!     .unwrap();
//! println!("{}", napigen::emit::api_json(&api).unwrap());
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info};

pub mod classify;
pub mod config;
pub mod defines;
pub mod emit;
pub mod extract;
pub mod model;
pub mod text;

use config::Config;
use emit::c_api::{CApiOptions, generate_c_api};
use emit::cpp::{CppOptions, generate_cpp_api};
use emit::csharp::{CSharpOptions, generate_cs_api};

/// A failed generation run, tagged with the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    #[error("configuration: {0:#}")]
    Config(anyhow::Error),
    #[error("API extraction: {0:#}")]
    Extraction(anyhow::Error),
    #[error("C API generation: {0:#}")]
    CApi(anyhow::Error),
    #[error("C++ API generation: {0:#}")]
    Cpp(anyhow::Error),
    #[error("C# API generation: {0:#}")]
    CSharp(anyhow::Error),
}

impl GenError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            GenError::Config(_) => 1,
            GenError::Extraction(_) => 110,
            GenError::CApi(_) => 111,
            GenError::Cpp(_) => 112,
            GenError::CSharp(_) => 113,
        }
    }
}

/// Paths written by a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    /// Generated C ABI source, relative to `src_folder`.
    pub c_api_source: PathBuf,
    pub api_json: PathBuf,
    pub cpp_header: PathBuf,
    pub csharp_source: Option<PathBuf>,
    /// Content hash stored in `api.json`.
    pub hash: String,
}

/// Load `config_path`, add `extra_defines`, and generate every target.
///
/// Returns the process exit code (0 on success) and appends the generated
/// C ABI source to `src_out`.
pub fn run(
    config_path: &Path,
    extra_defines: &[String],
    skip_csharp: bool,
    src_out: &mut Vec<PathBuf>,
) -> i32 {
    let mut cfg = match config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))
    {
        Ok(cfg) => cfg,
        Err(e) => {
            let e = GenError::Config(e);
            error!("{e}");
            return e.exit_code();
        }
    };
    cfg.defines.extend(extra_defines.iter().cloned());
    if skip_csharp {
        cfg.csharp = None;
    }

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    gen_apis(&cfg, base_dir, src_out)
}

/// Generate every target of an already-loaded [`Config`].
///
/// Returns the process exit code and appends the generated C ABI source
/// (relative to `src_folder`) to `src_out` on success.
pub fn gen_apis(cfg: &Config, base_dir: &Path, src_out: &mut Vec<PathBuf>) -> i32 {
    match generate_from_config(cfg, base_dir) {
        Ok(generated) => {
            src_out.push(generated.c_api_source);
            0
        }
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    }
}

/// Generate every target of `cfg`. Paths in `cfg` resolve against
/// `base_dir` (typically the parent directory of the TOML file).
///
/// Extraction runs once; each emitter gets its own copy of the model and
/// its artifact is fully rendered before anything is written for it.
pub fn generate_from_config(cfg: &Config, base_dir: &Path) -> Result<Generated, GenError> {
    let src = base_dir.join(&cfg.src_folder);

    let headers = collect_headers(&src, &cfg.sources_manifest).map_err(GenError::Extraction)?;
    info!(src = %src.display(), headers = headers.len(), "loaded source manifest");

    let api = extract::extract_api(
        &headers,
        &extract::ExtractOptions {
            defines: cfg.defines.clone(),
            default_values: cfg.default_values.clone(),
        },
    )
    .map_err(GenError::Extraction)?;
    info!(classes = api.classes.len(), "extracted API");

    let (c_api_source, api_json, hash) =
        write_c_api(cfg, base_dir, &src, &headers, &api).map_err(GenError::CApi)?;
    let cpp_header = write_cpp_api(cfg, base_dir, api.clone()).map_err(GenError::Cpp)?;
    let csharp_source = match &cfg.csharp {
        Some(cs) => Some(
            write_cs_api(cfg, cs, base_dir, api.clone()).map_err(GenError::CSharp)?,
        ),
        None => None,
    };

    Ok(Generated {
        c_api_source,
        api_json,
        cpp_header,
        csharp_source,
        hash,
    })
}

fn collect_headers(src: &Path, manifest: &Path) -> Result<Vec<PathBuf>> {
    let manifest = src.join(manifest);
    let content = text::read_all_text(&manifest)?;
    let sources: Vec<String> = serde_json::from_str(&content)
        .with_context(|| format!("parsing source manifest {}", manifest.display()))?;
    Ok(extract::headers_from_manifest(src, &sources))
}

/// `c_api.cpp` → `c_api.gen.cpp`.
fn gen_file_name(template: &Path) -> Result<String> {
    let stem = template
        .file_stem()
        .with_context(|| format!("template path {} has no file name", template.display()))?
        .to_string_lossy();
    Ok(match template.extension() {
        Some(ext) => format!("{stem}.gen.{}", ext.to_string_lossy()),
        None => format!("{stem}.gen"),
    })
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .with_context(|| format!("path {} has no file name", path.display()))
}

fn write_c_api(
    cfg: &Config,
    base_dir: &Path,
    src: &Path,
    headers: &[PathBuf],
    api: &model::Api,
) -> Result<(PathBuf, PathBuf, String)> {
    let template_path = base_dir.join(&cfg.c_api.template);
    let template = text::read_all_text(&template_path)?;
    let rel_headers: Vec<String> = headers
        .iter()
        .filter_map(|h| h.strip_prefix(src).ok())
        .map(|h| h.to_string_lossy().into_owned())
        .collect();

    let source = generate_c_api(
        &api.clone(),
        &CApiOptions {
            template: &template,
            marker_prefix: &cfg.marker_prefix,
            headers: &rel_headers,
            godot_includes: &cfg.godot_includes,
        },
    )?;
    let hash = emit::api_hash(api)?;
    let json = emit::api_json(api)?;

    let rel = cfg.c_api.gen_dir.join(gen_file_name(&template_path)?);
    let out = src.join(&rel);
    text::write_all_text(&out, &source)?;
    info!(path = %out.display(), "wrote C API");

    let json_path = base_dir.join(&cfg.output.dir).join("api.json");
    text::write_all_text(&json_path, &json)?;
    info!(path = %json_path.display(), hash = %hash, "wrote api.json");

    Ok((rel, json_path, hash))
}

fn write_cpp_api(cfg: &Config, base_dir: &Path, api: model::Api) -> Result<PathBuf> {
    let template_path = base_dir.join(&cfg.cpp.template);
    let template = text::read_all_text(&template_path)?;
    let header = generate_cpp_api(
        api,
        &CppOptions {
            template: &template,
            marker_prefix: &cfg.marker_prefix,
            api_prefix: &cfg.api_prefix,
            godot_includes: &cfg.godot_includes,
        },
    )?;

    let out_dir = base_dir.join(&cfg.cpp.output_dir);
    let out = out_dir.join(file_name(&template_path)?);
    text::write_all_text(&out, &header)?;
    info!(path = %out.display(), "wrote C++ API");

    for shared in &cfg.cpp.shared_headers {
        let from = base_dir.join(shared);
        let to = out_dir.join(file_name(&from)?);
        std::fs::copy(&from, &to)
            .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
        info!(path = %to.display(), "copied shared header");
    }
    Ok(out)
}

fn write_cs_api(
    cfg: &Config,
    cs: &config::CSharpConfig,
    base_dir: &Path,
    api: model::Api,
) -> Result<PathBuf> {
    let template_path = base_dir.join(&cs.template);
    let template = text::read_all_text(&template_path)?;
    let source = generate_cs_api(
        api,
        &CSharpOptions {
            template: &template,
            marker_prefix: &cfg.marker_prefix,
            api_prefix: &cfg.api_prefix,
            real_t_is_double: cfg.is_defined("REAL_T_IS_DOUBLE"),
        },
    )?;

    let out = base_dir.join(&cs.output_dir).join(file_name(&template_path)?);
    text::write_all_text(&out, &source)?;
    info!(path = %out.display(), "wrote C# API");
    Ok(out)
}
