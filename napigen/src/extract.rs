//! Extraction: annotated header text → [`Api`] model.
//!
//! Headers are scanned line by line under a [`DefineContext`]. A live line
//! is classified by its leading marker (`NAPI_CLASS_REF`, `NAPI_CLASS_SINGLETON`,
//! `NAPI_CLASS`, `NAPI_ENUM`, `NAPI`); enum bodies and function declarations
//! may continue over the following physical lines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{debug, info, trace, warn};

use crate::classify;
use crate::defines::DefineContext;
use crate::model::*;
use crate::text;

/// Inputs of the extractor that come from the build configuration.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Global preprocessor defines of the build.
    pub defines: Vec<String>,
    /// Default-argument rewrites, header expression → generated expression.
    pub default_values: HashMap<String, String>,
}

/// Read and scan every header, then resolve the model.
pub fn extract_api(headers: &[PathBuf], opts: &ExtractOptions) -> Result<Api> {
    let mut extractor = Extractor::new(opts.clone());
    for header in headers {
        let source = text::read_all_text(header)?;
        extractor.scan_header(&header.display().to_string(), &source)?;
    }
    extractor.finish()
}

/// Marker recognized at the start of a live line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    ClassOpen(ClassKind),
    EnumOpen,
    FunctionDecl,
    Plain,
}

/// Markers in match priority order. Longer markers come first so that
/// `NAPI_CLASS_REF` is never mistaken for `NAPI_CLASS` or `NAPI`.
const MARKERS: &[(&str, LineKind)] = &[
    ("NAPI_CLASS_REF", LineKind::ClassOpen(ClassKind::Refcounted)),
    ("NAPI_CLASS_SINGLETON", LineKind::ClassOpen(ClassKind::Singleton)),
    ("NAPI_CLASS", LineKind::ClassOpen(ClassKind::Regular)),
    ("NAPI_ENUM", LineKind::EnumOpen),
    ("NAPI", LineKind::FunctionDecl),
];

/// Classify a trimmed line. Returns the kind and the text after the marker.
pub fn classify_line(line: &str) -> (LineKind, &str) {
    for (marker, kind) in MARKERS {
        if let Some(rest) = line.strip_prefix(marker)
            && rest.starts_with(char::is_whitespace)
        {
            return (*kind, rest.trim_start());
        }
    }
    (LineKind::Plain, line)
}

// ---------------------------------------------------------------------------
// Header scanner
// ---------------------------------------------------------------------------

pub struct Extractor {
    opts: ExtractOptions,
    defines: DefineContext,
    api: Api,
}

impl Extractor {
    pub fn new(opts: ExtractOptions) -> Self {
        let defines = DefineContext::new(&opts.defines);
        Self {
            opts,
            defines,
            api: Api::default(),
        }
    }

    /// Scan one header. `name` is only used for logging and error context.
    pub fn scan_header(&mut self, name: &str, source: &str) -> Result<()> {
        info!(header = name, "parsing header");
        let lines = text::trimmed_lines(source);
        self.defines.reset();

        let mut current: Option<ClassDef> = None;

        for (idx, line) in lines.iter().enumerate() {
            if !self.defines.parse_line(line) {
                trace!(line = idx + 1, text = %line, "skipping");
                continue;
            }

            let (kind, rest) = classify_line(line);
            let at = || format!("{name}:{}", idx + 1);
            match kind {
                LineKind::Plain => {
                    if let Some(class) = current.as_mut()
                        && let Some(decl) = plain_decl_name(line)
                        && let Docs::Block(docs) = docs_before(&lines, idx)
                    {
                        trace!(class = %class.name, decl, "documented declaration");
                        class.declared_docs.entry(decl.to_string()).or_insert(docs);
                    }
                }
                LineKind::ClassOpen(class_kind) => {
                    let Some(class_name) = class_name(rest) else {
                        warn!(at = %at(), text = %line, "class marker without `class <Name>`, skipping");
                        continue;
                    };
                    if let Some(done) = current.take() {
                        self.api.upsert_class(done);
                    }
                    let mut class = ClassDef::new(class_name, class_kind);
                    if let Docs::Block(docs) = docs_before(&lines, idx) {
                        class.docs = docs;
                    }
                    info!(class = %class.name, kind = ?class.kind, "found class");
                    current = Some(class);
                }
                LineKind::EnumOpen => {
                    let Some(class) = current.as_mut() else {
                        warn!(at = %at(), "enum marker outside of a class, skipping");
                        continue;
                    };
                    let decl = join_until(&lines, idx, |t| t.contains('}'))
                        .with_context(|| format!("{}: unterminated enum", at()))?;
                    let def = parse_enum(rest_of(&decl))
                        .with_context(|| format!("{}: in class `{}`", at(), class.name))?;
                    debug!(class = %class.name, name = %def.name, underlying = %def.underlying_type, values = def.values.len(), "found enum");
                    class.enums.push(def);
                }
                LineKind::FunctionDecl => {
                    let Some(class) = current.as_mut() else {
                        warn!(at = %at(), text = %line, "function marker outside of a class, skipping");
                        continue;
                    };
                    let decl = join_until(&lines, idx, args_closed)
                        .with_context(|| format!("{}: unbalanced parentheses in declaration", at()))?;
                    let mut func = parse_function(rest_of(&decl), class, &self.opts.default_values)
                        .with_context(|| format!("{}: in class `{}`", at(), class.name))?;
                    match docs_before(&lines, idx) {
                        Docs::Block(docs) => func.docs = docs,
                        Docs::From(other) => func.docs_from = Some(other),
                        Docs::None => {}
                    }
                    debug!(class = %class.name, function = %func.name, args = func.args.len(), self_return = func.self_return, "found method");
                    class.functions.push(func);
                }
            }
        }

        if let Some(done) = current.take() {
            self.api.upsert_class(done);
        }
        Ok(())
    }

    /// Resolve cross references once every header has been scanned.
    pub fn finish(self) -> Result<Api> {
        let mut api = self.api;
        classify::resolve_api(&mut api)?;
        Ok(api)
    }
}

fn class_name(rest: &str) -> Option<String> {
    let rest = rest
        .strip_prefix("class ")
        .or_else(|| rest.strip_prefix("struct "))?;
    IDENT_RE.find(rest).map(|m| m.as_str().to_string())
}

/// Drop the marker token from a joined declaration.
fn rest_of(decl: &str) -> &str {
    classify_line(decl).1
}

/// Join line `start` with the following lines until `done` accepts the
/// accumulated text. Line comments are removed from every joined line.
fn join_until(lines: &[String], start: usize, done: impl Fn(&str) -> bool) -> Result<String> {
    let mut acc = String::new();
    for line in &lines[start..] {
        if !acc.is_empty() {
            acc.push(' ');
        }
        acc.push_str(strip_line_comment(line));
        if done(&acc) {
            return Ok(acc);
        }
    }
    bail!("reached the end of the header")
}

/// Cut a trailing `//` comment. `//` inside string and character literals
/// (`"http://..."`) is kept.
fn strip_line_comment(line: &str) -> &str {
    let mut quote = None;
    let mut escaped = false;
    let mut prev = '\0';
    for (i, c) in line.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '/' if prev == '/' => return line[..i - 1].trim_end(),
                _ => {}
            },
        }
        prev = c;
    }
    line
}

/// Name of a plain (un-annotated) method declaration, `void f(...)` → `f`.
fn plain_decl_name(line: &str) -> Option<&str> {
    if ["//", "/*", "*", "#"].iter().any(|p| line.starts_with(p)) {
        return None;
    }
    FUNC_NAME_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// True once the first parenthesis of the declaration has been closed.
fn args_closed(decl: &str) -> bool {
    decl.find('(')
        .is_some_and(|open| matching_paren(decl, open).is_some())
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Docs
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Docs {
    None,
    Block(Vec<String>),
    /// `// #docs_func <other>`: borrow the docs of another method.
    From(String),
}

static IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[.*\]\(.*\)").expect("image regex"));

fn docs_before(lines: &[String], idx: usize) -> Docs {
    let Some(prev) = idx.checked_sub(1).map(|i| lines[i].as_str()) else {
        return Docs::None;
    };

    if let Some(target) = prev.strip_prefix("// #docs_func ") {
        return Docs::From(target.trim().to_string());
    }
    if prev != "*/" {
        return Docs::None;
    }

    let close = idx - 1;
    let Some(open) = lines[..close].iter().rposition(|l| l == "/**") else {
        warn!(line = idx + 1, "`*/` without a matching `/**`, ignoring docs");
        return Docs::None;
    };
    let docs = lines[open + 1..close]
        .iter()
        .map(|l| match l.strip_prefix('*') {
            Some(stripped) => stripped.trim(),
            None => l.as_str(),
        })
        .map(|l| IMAGE_RE.replace_all(l, "[THERE WAS AN IMAGE]").into_owned())
        .collect();
    Docs::Block(docs)
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

pub const ENUM_UNDERLYING_TYPES: &[&str] = &[
    "int8_t", "uint8_t", "int16_t", "uint16_t", "int32_t", "uint32_t", "int64_t", "uint64_t",
    "int",
];

static BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment regex"));
static INT_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-)?\s*(0[xX][0-9a-fA-F]+|[0-9]+)[uUlL]*$").expect("integer literal regex")
});

/// Parse `enum Name : type { A, B = 5, C }` (the marker already removed).
pub fn parse_enum(decl: &str) -> Result<EnumDef> {
    let decl = BLOCK_COMMENT_RE.replace_all(decl, "");
    let Some(rest) = decl.trim().strip_prefix("enum ") else {
        bail!("malformed enum `{decl}`: expected `enum <Name> : <type> {{ ... }}`");
    };
    let rest = rest.trim_start();
    let rest = rest.strip_prefix("class ").unwrap_or(rest);

    let (Some(open), Some(close)) = (rest.find('{'), rest.rfind('}')) else {
        bail!("malformed enum `{decl}`: missing braces");
    };
    if close < open {
        bail!("malformed enum `{decl}`: `}}` before `{{`");
    }
    let Some((name, underlying)) = rest[..open].split_once(':') else {
        bail!("malformed enum `{decl}`: the underlying type is required");
    };
    let (name, underlying) = (name.trim(), underlying.trim());
    if !ENUM_UNDERLYING_TYPES.contains(&underlying) {
        bail!(
            "enum `{name}` uses unsupported underlying type `{underlying}`, expected one of: {}",
            ENUM_UNDERLYING_TYPES.join(", ")
        );
    }

    let mut values = Vec::new();
    let mut counter: i128 = -1;
    for item in rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let (key, value) = match item.split_once('=') {
            Some((key, explicit)) => {
                let explicit = explicit.trim();
                if let Some(n) = parse_int_literal(explicit) {
                    counter = n;
                }
                (key.trim(), explicit.to_string())
            }
            None => {
                counter += 1;
                (item, counter.to_string())
            }
        };
        values.push(EnumValue {
            name: key.to_string(),
            value,
        });
    }

    Ok(EnumDef {
        name: name.to_string(),
        underlying_type: underlying.to_string(),
        values,
    })
}

fn parse_int_literal(s: &str) -> Option<i128> {
    let caps = INT_LITERAL_RE.captures(s)?;
    let digits = &caps[2];
    let n = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if caps.get(1).is_some() { -n } else { n })
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("identifier regex"));
static FUNC_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\w+)\s*\(").expect("function name regex"));
static ARG_WITH_DEFAULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\w+)\s*=").expect("default arg regex"));
static ARG_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\w+)$").expect("arg name regex"));
static DISALLOWED_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(std::vector|std::array|std::string|TypedArray|Packed\w*Array|Array|StringName|String)\b")
        .expect("disallowed type regex")
});

const STORAGE_QUALIFIERS: &[&str] = &["static", "virtual", "inline"];

/// Self-return marker type of chained setters.
const SELF_RETURN_MARKER: &str = "NSELF_RETURN";

/// Parse `<ret> <name>(<args>) ...` (the marker already removed) declared
/// inside `class`.
pub fn parse_function(
    decl: &str,
    class: &ClassDef,
    default_values: &HashMap<String, String>,
) -> Result<FunctionDef> {
    let Some(caps) = FUNC_NAME_RE.captures(decl) else {
        bail!("cannot find a function name in `{decl}`");
    };
    let name_match = caps.get(1).context("function name capture")?;
    let name = name_match.as_str().to_string();
    let open = caps.get(0).context("function name match")?.end() - 1;
    let close = matching_paren(decl, open)
        .with_context(|| format!("unbalanced parentheses in `{decl}`"))?;

    let mut ret_type = decl[..name_match.start()]
        .split_whitespace()
        .filter(|t| !STORAGE_QUALIFIERS.contains(t))
        .collect::<Vec<_>>()
        .join(" ");
    if ret_type.is_empty() {
        bail!("function `{name}` has no return type");
    }

    let mut self_return = false;
    if ret_type == SELF_RETURN_MARKER {
        if class.is_singleton() {
            bail!("function `{name}` returns {SELF_RETURN_MARKER}, which is not allowed in singleton `{}`", class.name);
        }
        self_return = true;
    } else if class.kind == ClassKind::Refcounted
        && (ret_type == format!("Ref<{}>", class.name)
            || (ret_type == "void" && name.ends_with("_selfreturn")))
    {
        self_return = true;
    }
    if self_return {
        ret_type = "void".to_string();
    }

    if let Some(m) = DISALLOWED_TYPE_RE.find(&ret_type) {
        bail!(
            "function `{name}` has unsupported return type `{ret_type}`: `{}` cannot cross the native API",
            m.as_str()
        );
    }

    let mut args = Vec::new();
    if !class.is_singleton() {
        args.push(ArgDef::instance());
    }
    for raw in split_args(&decl[open + 1..close])? {
        let arg = parse_arg(&raw, args.len(), default_values);
        check_arg_type(&name, &arg)?;
        args.push(arg);
    }

    let array_groups = classify::fold_array_groups(&name, &args)?;

    Ok(FunctionDef {
        c_name: format!("{}_{name}", class.name),
        name,
        docs: Vec::new(),
        args,
        ret: ReturnDef {
            c_type: strip_reference(&ret_type),
            ty: ret_type,
            class: TypeClass::Plain,
        },
        self_return,
        is_private: false,
        array_groups,
        docs_from: None,
    })
}

/// Split an argument list on top-level commas. Brackets of every kind
/// (`()[]{}<>`) nest.
pub fn split_args(args: &str) -> Result<Vec<String>> {
    let args = args.trim();
    if args.is_empty() || args == "void" {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    let mut depth: i32 = 0;
    let mut start = 0;
    for (i, c) in args.char_indices() {
        match c {
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => {
                depth -= 1;
                if depth < 0 {
                    bail!("there are more closing brackets than opening ones:\n{args}");
                }
            }
            ',' if depth == 0 => {
                out.push(args[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth > 0 {
        bail!("there are more opening brackets than closing ones:\n{args}");
    }
    out.push(args[start..].trim().to_string());
    Ok(out)
}

fn parse_arg(raw: &str, index: usize, default_values: &HashMap<String, String>) -> ArgDef {
    let (name, ty, default) = if let Some(caps) = ARG_WITH_DEFAULT_RE.captures(raw)
        && let Some(m) = caps.get(1)
    {
        let default = raw[m.end()..]
            .trim_start()
            .trim_start_matches('=')
            .trim()
            .to_string();
        let default = default_values.get(&default).cloned().unwrap_or(default);
        (m.as_str().to_string(), raw[..m.start()].trim().to_string(), Some(default))
    } else if let Some(m) = ARG_NAME_RE.find(raw)
        && !raw[..m.start()].trim().is_empty()
    {
        (m.as_str().to_string(), raw[..m.start()].trim().to_string(), None)
    } else {
        (format!("arg{index}"), raw.trim().to_string(), None)
    };

    ArgDef {
        c_type: strip_reference(&ty),
        name,
        ty,
        default,
        is_instance: false,
        class: TypeClass::Plain,
    }
}

fn check_arg_type(function: &str, arg: &ArgDef) -> Result<()> {
    if let Some(m) = DISALLOWED_TYPE_RE.find(&arg.ty) {
        let hint = if m.as_str().contains("String") {
            format!("pass a `const char *{}_string` instead", arg.name)
        } else {
            format!(
                "pass a `const T *{0}_data` pointer followed by `uint64_t {0}_size` instead",
                arg.name
            )
        };
        bail!(
            "parameter `{}` of `{function}` has type `{}`: `{}` cannot cross the native API, {hint} and name the function `*_c`",
            arg.name,
            arg.ty,
            m.as_str()
        );
    }
    Ok(())
}

fn strip_reference(ty: &str) -> String {
    ty.replace('&', "").trim().to_string()
}

/// Headers listed in a source manifest: `.cpp` entries become `.h`, and
/// headers that do not exist are dropped.
pub fn headers_from_manifest(src_folder: &Path, sources: &[String]) -> Vec<PathBuf> {
    sources
        .iter()
        .map(|s| {
            let path = Path::new(s);
            let path = if path.extension().is_some_and(|e| e == "cpp") {
                path.with_extension("h")
            } else {
                path.to_path_buf()
            };
            src_folder.join(path)
        })
        .filter(|h| {
            let exists = h.exists();
            if !exists {
                trace!(header = %h.display(), "no header for source");
            }
            exists
        })
        .collect()
}
