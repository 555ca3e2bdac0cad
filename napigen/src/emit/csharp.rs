//! C# wrapper source: one static class per singleton, one `IDisposable`
//! class per instantiable class, each method calling a lazily loaded
//! unmanaged delegate.

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use heck::ToPascalCase;
use regex::Regex;
use tracing::debug;

use super::docs::to_xml_doc;
use super::{add_lifecycle_functions, indent_all, is_disableable, splice_template};
use crate::model::*;

#[derive(Debug, Clone, Copy)]
pub struct CSharpOptions<'a> {
    pub template: &'a str,
    pub marker_prefix: &'a str,
    /// Prefix of the loader utilities and the `#if` guard symbols.
    pub api_prefix: &'a str,
    /// `real_t` is `double` in the target build (`REAL_T_IS_DOUBLE`).
    pub real_t_is_double: bool,
}

const INDENT: &str = "    ";

pub fn generate_cs_api(mut api: Api, opts: &CSharpOptions<'_>) -> Result<String> {
    add_lifecycle_functions(&mut api);

    let mut ctx = Ctx::new(&api, opts);
    let mut body = vec![String::new()];
    for class in &api.classes {
        debug!(class = %class.name, "generating C# API");
        let lines = ctx
            .emit_class(class)
            .with_context(|| format!("generating C# class `{}`", class.name))?;
        body.extend(lines);
        body.push(String::new());
    }

    let template = if opts.real_t_is_double {
        opts.template
            .replace("using real_t = float;", "using real_t = double;")
    } else {
        opts.template.to_string()
    };
    let defaults = indent_all(INDENT, &ctx.defaults);

    splice_template(
        &template,
        opts.marker_prefix,
        vec![("_API_DEFAULT_VALUES", defaults), ("_API_FUNCTIONS", body)],
    )
    .context("filling the C# API template")
}

// ---------------------------------------------------------------------------
// Names and types
// ---------------------------------------------------------------------------

/// `draw_line_3d` → `DrawLine3D`.
pub fn pascal(name: &str) -> String {
    name.to_pascal_case().replace("2d", "2D").replace("3d", "3D")
}

/// C# spelling of a C++ scalar or engine value type.
pub fn cs_type(ty: &str) -> String {
    let bare = crate::classify::bare_type(ty);
    if bare.ends_with('*') {
        return "IntPtr".to_string();
    }
    let bare = bare.strip_prefix("godot::").unwrap_or(bare);
    match bare {
        "int8_t" => "sbyte",
        "uint8_t" => "byte",
        "int16_t" => "short",
        "uint16_t" => "ushort",
        "int32_t" | "int" => "int",
        "uint32_t" | "unsigned int" => "uint",
        "int64_t" => "long",
        "uint64_t" => "ulong",
        "AABB" => "Aabb",
        "Vector2i" => "Vector2I",
        "Vector3i" => "Vector3I",
        "Vector4i" => "Vector4I",
        "Rect2i" => "Rect2I",
        "Object" => "GodotObject",
        other => other,
    }
    .to_string()
}

fn cs_object(class: &str) -> String {
    cs_type(class)
}

fn cs_enum_path(owner: &str, name: &str) -> String {
    format!("{owner}.{name}")
}

/// Type in the unmanaged delegate signature.
fn abi_type(ty: &str, class: &TypeClass) -> String {
    match class {
        TypeClass::RefCounted { .. } => "IntPtr".to_string(),
        TypeClass::Object { .. } => "ulong".to_string(),
        TypeClass::Enum {
            underlying_type, ..
        } => cs_type(underlying_type),
        TypeClass::Plain | TypeClass::BasicValue { .. } => cs_type(ty),
    }
}

/// Type in the public wrapper signature.
fn public_type(ty: &str, class: &TypeClass) -> String {
    match class {
        TypeClass::RefCounted { class } => class.clone(),
        TypeClass::Object { class, .. } => cs_object(class),
        TypeClass::Enum { owner, name, .. } => cs_enum_path(owner, name),
        TypeClass::Plain | TypeClass::BasicValue { .. } => cs_type(ty),
    }
}

/// Common `PREFIX_` of all enum constants, empty when stripping it would
/// leave an empty or digit-leading name.
fn common_enum_prefix<'a>(names: &[&'a str]) -> &'a str {
    let [first, rest @ ..] = names else {
        return "";
    };
    if rest.is_empty() {
        return "";
    }
    let mut len = first.len();
    for n in rest {
        len = first
            .bytes()
            .zip(n.bytes())
            .take(len)
            .take_while(|(a, b)| a == b)
            .count();
    }
    let Some(cut) = first[..len].rfind('_').map(|i| i + 1) else {
        return "";
    };
    let ok = names.iter().all(|n| {
        n[cut..]
            .chars()
            .next()
            .is_some_and(|c| !c.is_ascii_digit())
    });
    if ok { &first[..cut] } else { "" }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?(0[xX][0-9a-fA-F]+|[0-9]+\.?[0-9]*|\.[0-9]+)([eE][-+]?[0-9]+)?[fFuUlL]*$")
        .expect("number regex")
});
static RENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(AABB|Vector2i|Vector3i|Vector4i|Rect2i)\b").expect("rename regex")
});
static CAPS_MEMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.([A-Z][A-Z0-9_]*)\b").expect("caps member regex"));
static CTOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^.\w])([A-Z]\w*)\(").expect("constructor regex"));
static INT_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(0[xX][0-9a-fA-F]+|[0-9]+)[uUlL]+\b").expect("integer suffix regex")
});
static CONSTANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z_]\w*\b").expect("identifier regex"));

#[derive(Debug, PartialEq)]
enum CsDefault {
    /// Usable as a C# optional parameter value.
    Const(String),
    /// Needs a `static readonly` field; the parameter becomes nullable.
    Hoisted { ty: String, expr: String },
}

/// Rewrite a C++ expression into C#: `godot::Color(1, 0, 0)` →
/// `new Color(1, 0, 0)`, `godot::Vector3::ZERO` → `Vector3.Zero`.
fn cs_expression(expr: &str) -> String {
    let expr = expr.replace("godot::", "").replace("::", ".");
    let expr = RENAME_RE.replace_all(&expr, |c: &regex::Captures| cs_type(&c[1]));
    let expr = CAPS_MEMBER_RE.replace_all(&expr, |c: &regex::Captures| format!(".{}", pascal(&c[1].to_lowercase())));
    CTOR_RE
        .replace_all(&expr, |c: &regex::Captures| format!("{}new {}(", &c[1], &c[2]))
        .into_owned()
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

struct EnumNames {
    path: String,
    /// C++ constant → C# constant.
    constants: HashMap<String, String>,
}

struct Ctx<'a> {
    opts: &'a CSharpOptions<'a>,
    utils: String,
    loading_result: String,
    enums: HashMap<String, EnumNames>,
    defaults: Vec<String>,
}

/// One parameter of a public wrapper method.
struct CsParam {
    decl: String,
    name: String,
}

impl<'a> Ctx<'a> {
    fn new(api: &Api, opts: &'a CSharpOptions<'a>) -> Self {
        let mut enums = HashMap::new();
        for class in &api.classes {
            for e in &class.enums {
                let names: Vec<&str> = e.values.iter().map(|v| v.name.as_str()).collect();
                let prefix = common_enum_prefix(&names);
                let constants = e
                    .values
                    .iter()
                    .map(|v| {
                        let short = v.name.strip_prefix(prefix).unwrap_or(&v.name);
                        (v.name.clone(), pascal(&short.to_lowercase()))
                    })
                    .collect();
                enums.insert(
                    format!("{}::{}", class.name, e.name),
                    EnumNames {
                        path: cs_enum_path(&class.name, &e.name),
                        constants,
                    },
                );
            }
        }
        Self {
            opts,
            utils: format!("Internal{}ApiLoaderUtils_", opts.api_prefix),
            loading_result: format!("{}FuncLoadingResult", opts.api_prefix),
            enums,
            defaults: Vec::new(),
        }
    }

    fn emit_class(&mut self, class: &ClassDef) -> Result<Vec<String>> {
        let name = &class.name;
        let is_static = class.is_singleton();
        let i1 = INDENT;

        let mut lines = doc_lines("", &to_xml_doc(&class.docs, &[])?);
        if is_static {
            lines.push(format!("public static class {name}"));
        } else {
            lines.push(format!("public class {name} : IDisposable"));
        }
        lines.push("{".to_string());

        for e in &class.enums {
            lines.extend(self.emit_enum(name, e));
            lines.push(String::new());
        }

        if !is_static {
            lines.extend(
                [
                    "IntPtr inst_ptr;".to_string(),
                    String::new(),
                    "internal IntPtr InstPtr => inst_ptr;".to_string(),
                    String::new(),
                    format!("public {name}(IntPtr inst_ptr)"),
                    "{".to_string(),
                    format!("{i1}this.inst_ptr = inst_ptr;"),
                    "}".to_string(),
                    String::new(),
                    format!("public {name}(bool instantiate = true)"),
                    "{".to_string(),
                    format!("{i1}inst_ptr = instantiate ? Create() : CreateNullptr();"),
                    "}".to_string(),
                    String::new(),
                    format!("~{name}() => Dispose();"),
                    String::new(),
                    "public void Dispose()".to_string(),
                    "{".to_string(),
                    format!("{i1}if (inst_ptr != IntPtr.Zero)"),
                    format!("{i1}{{"),
                    format!("{i1}{i1}Destroy(inst_ptr);"),
                    format!("{i1}{i1}inst_ptr = IntPtr.Zero;"),
                    format!("{i1}}}"),
                    format!("{i1}GC.SuppressFinalize(this);"),
                    "}".to_string(),
                    String::new(),
                ]
                .iter()
                .map(|l| indent(1, l)),
            );
        }

        for prop in &class.properties {
            lines.extend(self.emit_property(class, prop).iter().map(|l| indent(1, l)));
            lines.push(String::new());
        }

        for func in &class.functions {
            let method = self
                .emit_method(class, func)
                .with_context(|| format!("in `{}`", func.name))?;
            lines.extend(method.iter().map(|l| indent(1, l)));
            lines.push(String::new());
        }

        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.push("}".to_string());
        Ok(lines)
    }

    fn emit_enum(&self, owner: &str, e: &EnumDef) -> Vec<String> {
        let names = &self.enums[&format!("{owner}::{}", e.name)];
        let mut lines = vec![
            indent(1, &format!("public enum {} : {}", e.name, cs_type(&e.underlying_type))),
            indent(1, "{"),
        ];
        for v in &e.values {
            let value = INT_SUFFIX_RE.replace_all(&v.value, "$1");
            let value = CONSTANT_RE.replace_all(&value, |c: &regex::Captures| {
                names
                    .constants
                    .get(&c[0])
                    .cloned()
                    .unwrap_or_else(|| c[0].to_string())
            });
            lines.push(indent(2, &format!("{} = {value},", names.constants[&v.name])));
        }
        lines.push(indent(1, "}"));
        lines
    }

    fn emit_property(&self, class: &ClassDef, prop: &PropertyDef) -> Vec<String> {
        let modifier = if class.is_singleton() { "public static" } else { "public" };
        let getter = class.function(&prop.getter).map(|g| g.public_name()).unwrap_or(&prop.getter);
        let setter = class.function(&prop.setter).map(|s| s.public_name()).unwrap_or(&prop.setter);
        vec![
            format!(
                "{modifier} {} {}",
                public_type(&prop.value_type.ty, &prop.value_type.class),
                pascal(&prop.name)
            ),
            "{".to_string(),
            format!("{INDENT}get => {}();", pascal(getter)),
            format!("{INDENT}set => {}(value);", pascal(setter)),
            "}".to_string(),
        ]
    }

    fn default_for(&self, arg: &ArgDef, value: &str) -> CsDefault {
        let ty = public_type(&arg.ty, &arg.class);
        let value = value.trim();

        if value == "nullptr" || value == "NULL" {
            let v = if ty == "IntPtr" { "default" } else { "null" };
            return CsDefault::Const(v.to_string());
        }
        if value == "true" || value == "false" {
            return CsDefault::Const(value.to_string());
        }
        if NUMBER_RE.is_match(value) {
            let digits = value.trim_end_matches(['f', 'F', 'u', 'U', 'l', 'L']);
            let is_hex = digits.contains(['x', 'X']);
            let n = if is_hex { value.trim_end_matches(['u', 'U', 'l', 'L']) } else { digits };
            return CsDefault::Const(match ty.as_str() {
                "float" | "real_t" if !is_hex => format!("{n}f"),
                _ => n.to_string(),
            });
        }
        if let TypeClass::Enum { owner, name, .. } = &arg.class
            && let Some(names) = self.enums.get(&format!("{owner}::{name}"))
        {
            let constant = value.rsplit("::").next().unwrap_or(value);
            if let Some(cs) = names.constants.get(constant) {
                return CsDefault::Const(format!("{}.{cs}", names.path));
            }
        }
        CsDefault::Hoisted {
            ty,
            expr: cs_expression(value),
        }
    }

    fn emit_method(&mut self, class: &ClassDef, func: &FunctionDef) -> Result<Vec<String>> {
        let utils = self.utils.clone();
        let c = &func.c_name;
        let is_member = !class.is_singleton() && !func.is_private;

        // Public signature and the ABI call arguments.
        let mut params: Vec<CsParam> = Vec::new();
        let mut abi_args: Vec<String> = Vec::new();
        let mut pins: Vec<String> = Vec::new();
        let mut frees: Vec<String> = Vec::new();

        let sig_args: Vec<&ArgDef> = if is_member {
            func.value_args().collect()
        } else {
            func.args.iter().collect()
        };
        if is_member {
            abi_args.push("inst_ptr".to_string());
        }
        for arg in sig_args {
            if let Some(group) = func.group_of(&arg.name) {
                let g = group.name();
                match group {
                    ArrayGroup::Data {
                        data_arg,
                        element_type,
                        ..
                    } => {
                        if *data_arg == arg.name {
                            params.push(CsParam {
                                decl: format!("{}[] {g}", cs_type(element_type)),
                                name: g.to_string(),
                            });
                            pins.push(format!(
                                "GCHandle {g}_handle = GCHandle.Alloc({g}, GCHandleType.Pinned);"
                            ));
                            frees.push(format!("{g}_handle.Free();"));
                            abi_args.push(format!("{g}_handle.AddrOfPinnedObject()"));
                        } else {
                            abi_args.push(format!("(ulong){g}.Length"));
                        }
                    }
                    ArrayGroup::String { .. } => {
                        params.push(CsParam {
                            decl: format!("string {g}"),
                            name: g.to_string(),
                        });
                        pins.push(format!("IntPtr {g}_ptr = Marshal.StringToCoTaskMemUTF8({g});"));
                        frees.push(format!("Marshal.FreeCoTaskMem({g}_ptr);"));
                        abi_args.push(format!("{g}_ptr"));
                    }
                }
                continue;
            }

            let ty = if arg.is_instance {
                "IntPtr".to_string()
            } else {
                public_type(&arg.ty, &arg.class)
            };
            let name = &arg.name;
            let mut value = name.clone();
            let decl = match arg.default.as_deref().map(|d| self.default_for(arg, d)) {
                None => format!("{ty} {name}"),
                Some(CsDefault::Const(v)) => format!("{ty} {name} = {v}"),
                Some(CsDefault::Hoisted { ty, expr }) => {
                    let field = format!("{c}_{name}");
                    self.defaults
                        .push(format!("public static readonly {ty} {field} = {expr};"));
                    value = format!("({name} ?? {utils}.{field})");
                    format!("{ty}? {name} = null")
                }
            };
            let call = match &arg.class {
                _ if arg.is_instance => value,
                TypeClass::RefCounted { .. } => format!("{value}?.InstPtr ?? IntPtr.Zero"),
                TypeClass::Object { .. } => format!("{value}?.GetInstanceId() ?? 0"),
                TypeClass::Enum {
                    underlying_type, ..
                } => format!("({}){value}", cs_type(underlying_type)),
                TypeClass::Plain | TypeClass::BasicValue { .. } => value,
            };
            params.push(CsParam {
                decl,
                name: name.clone(),
            });
            abi_args.push(call);
        }

        let doc_params: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        let mut lines = doc_lines("", &to_xml_doc(&func.docs, &doc_params)?);

        let method_name = pascal(func.wrapper_name().unwrap_or(func.public_name()));
        let ret_ty = if func.self_return {
            class.name.clone()
        } else {
            public_type(&func.ret.ty, &func.ret.class)
        };
        let modifiers = if func.is_private {
            "private static"
        } else if class.is_singleton() {
            "public static"
        } else {
            "public"
        };
        lines.push(format!(
            "{modifiers} {ret_ty} {method_name}({})",
            params.iter().map(|p| p.decl.as_str()).collect::<Vec<_>>().join(", ")
        ));
        lines.push("{".to_string());

        let invoke = format!("func_{c}({})", abi_args.join(", "));
        let call = if func.self_return || func.returns_void() {
            format!("{invoke};")
        } else {
            let converted = match &func.ret.class {
                TypeClass::RefCounted { class } => format!("new {class}({invoke})"),
                TypeClass::Object { class, .. } => {
                    format!("({})GodotObject.InstanceFromId({invoke})", cs_object(class))
                }
                TypeClass::Enum { owner, name, .. } => {
                    format!("({}){invoke}", cs_enum_path(owner, name))
                }
                TypeClass::Plain | TypeClass::BasicValue { .. } => invoke,
            };
            format!("return {converted};")
        };
        let fallback = if func.self_return {
            Some("return this;")
        } else if func.returns_void() {
            None
        } else {
            Some("return default;")
        };

        let mut loaded = Vec::new();
        if pins.is_empty() {
            loaded.push(call);
        } else {
            loaded.extend(pins);
            loaded.push("try".to_string());
            loaded.push("{".to_string());
            loaded.push(indent(1, &call));
            loaded.push("}".to_string());
            loaded.push("finally".to_string());
            loaded.push("{".to_string());
            loaded.extend(frees.iter().map(|f| indent(1, f)));
            loaded.push("}".to_string());
        }

        let load = format!(
            "if ({utils}.LoadFunction(\"{c}\", ref func_{c}, ref func_{c}_result))"
        );
        let disableable = is_disableable(class, func);
        let p = self.opts.api_prefix;
        if disableable {
            lines.push(format!("#if _{p}_RUNTIME_CHECK_ENABLED"));
            lines.push(indent(
                1,
                &format!(
                    "if (!{utils}.IsCallEnabled) {}",
                    fallback.unwrap_or("return;")
                ),
            ));
            lines.push("#endif".to_string());
            lines.push(format!("#if _{p}_COMPILETIME_CHECK_ENABLED"));
        }
        lines.push(indent(1, &load));
        lines.push(indent(1, "{"));
        lines.extend(loaded.iter().map(|l| indent(2, l)));
        lines.push(indent(1, "}"));
        if disableable {
            lines.push("#endif".to_string());
        }
        if let Some(fallback) = fallback {
            lines.push(indent(1, fallback));
        }
        lines.push("}".to_string());
        lines.push(String::new());

        // Delegate and its cache.
        let abi_ret = if func.self_return {
            "void".to_string()
        } else {
            abi_type(&func.ret.c_type, &func.ret.class)
        };
        let abi_params = func
            .args
            .iter()
            .map(|a| {
                let ty = if a.is_instance {
                    "IntPtr".to_string()
                } else {
                    abi_type(&a.c_type, &a.class)
                };
                if ty == "bool" {
                    format!("[MarshalAs(UnmanagedType.I1)] bool {}", a.name)
                } else {
                    format!("{ty} {}", a.name)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        lines.push("[UnmanagedFunctionPointer(CallingConvention.Cdecl)]".to_string());
        if abi_ret == "bool" {
            lines.push("[return: MarshalAs(UnmanagedType.I1)]".to_string());
        }
        lines.push(format!("private delegate {abi_ret} dlgt_{c}({abi_params});"));
        lines.push(format!("private static dlgt_{c} func_{c};"));
        lines.push(format!(
            "private static {} func_{c}_result;",
            self.loading_result
        ));
        Ok(lines)
    }
}

fn indent(level: usize, line: &str) -> String {
    if line.is_empty() || line.starts_with('#') {
        line.to_string()
    } else {
        format!("{}{line}", INDENT.repeat(level))
    }
}

fn doc_lines(prefix: &str, xml: &[String]) -> Vec<String> {
    xml.iter().map(|l| format!("{prefix}/// {l}")).collect()
}
