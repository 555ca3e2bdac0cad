//! C++ wrapper header: classes and namespaces whose methods lazily load the
//! C ABI function pointers and convert between ergonomic and ABI types.

use anyhow::{Context, Result};
use tracing::debug;

use super::c_api::join_decl;
use super::{WrapperParam, add_lifecycle_functions, is_disableable, splice_template, wrapper_params};
use crate::model::*;

#[derive(Debug, Clone, Copy)]
pub struct CppOptions<'a> {
    pub template: &'a str,
    pub marker_prefix: &'a str,
    /// Prefix of the `_<P>_Loader_` class and compile-time guard macro.
    pub api_prefix: &'a str,
    pub godot_includes: &'a [String],
}

/// Element types that have a `godot::Packed*Array` counterpart.
const PACKED_ARRAYS: &[(&str, &str)] = &[
    ("Vector2", "PackedVector2Array"),
    ("Vector3", "PackedVector3Array"),
    ("Vector4", "PackedVector4Array"),
    ("Color", "PackedColorArray"),
    ("float", "PackedFloat32Array"),
    ("double", "PackedFloat64Array"),
    ("int32_t", "PackedInt32Array"),
    ("int64_t", "PackedInt64Array"),
    ("uint8_t", "PackedByteArray"),
];

pub fn generate_cpp_api(mut api: Api, opts: &CppOptions<'_>) -> Result<String> {
    add_lifecycle_functions(&mut api);

    let forward_decls = api
        .classes
        .iter()
        .filter(|c| !c.is_singleton())
        .map(|c| format!("class {};", c.name))
        .collect();

    let mut body = vec![String::new()];
    for class in &api.classes {
        debug!(class = %class.name, "generating C++ API");
        body.extend(emit_class(class, opts));
        body.push(String::new());
    }

    splice_template(
        opts.template,
        opts.marker_prefix,
        vec![
            (
                "_API_INCLUDES",
                opts.godot_includes
                    .iter()
                    .map(|i| format!("#include <godot_cpp/classes/{i}.hpp>"))
                    .collect(),
            ),
            ("_API_FORWARD_DECLARATIONS", forward_decls),
            ("_API_FUNCTIONS", body),
        ],
    )
    .context("filling the C++ API template")
}

fn doc_block(indent: &str, docs: &[String]) -> Vec<String> {
    if docs.is_empty() {
        return Vec::new();
    }
    let mut out = vec![format!("{indent}/**")];
    out.extend(docs.iter().map(|l| {
        if l.is_empty() {
            format!("{indent} *")
        } else {
            format!("{indent} * {l}")
        }
    }));
    out.push(format!("{indent} */"));
    out
}

fn emit_class(class: &ClassDef, opts: &CppOptions<'_>) -> Vec<String> {
    let is_class = !class.is_singleton();
    let indent = if is_class { "\t" } else { "" };
    let name = &class.name;

    let mut lines = doc_block("", &class.docs);
    if is_class {
        if class.has_self_return() {
            lines.push(format!(
                "class {name} : public std::enable_shared_from_this<{name}> {{"
            ));
        } else {
            lines.push(format!("class {name} {{"));
        }
    } else {
        lines.push(format!("namespace {name} {{"));
    }

    for e in &class.enums {
        if is_class {
            lines.push("public:".to_string());
        }
        lines.push(format!("{indent}enum {} : {} {{", e.name, e.underlying_type));
        for v in &e.values {
            lines.push(format!("{indent}\t{} = {},", v.name, v.value));
        }
        lines.push(format!("{indent}}};"));
        lines.push(String::new());
    }

    if is_class {
        lines.push("private:".to_string());
        lines.push(format!("{indent}void *inst_ptr;"));
        lines.push(String::new());
        lines.push("public:".to_string());
        lines.push(format!("{indent}{name}(void *inst_ptr) :"));
        lines.push(format!("{indent}\t\tinst_ptr(inst_ptr) {{}}"));
        lines.push(String::new());
        lines.push(format!("{indent}{name}(bool instantiate = true) :"));
        lines.push(format!(
            "{indent}\t\tinst_ptr(instantiate ? create() : create_nullptr()) {{}}"
        ));
        lines.push(String::new());
        lines.push(format!("{indent}~{name}() {{ destroy(inst_ptr); }}"));
        lines.push(String::new());
        lines.push(format!("{indent}operator void *() const {{ return inst_ptr; }}"));
        lines.push(String::new());
    }

    let mut in_private = false;
    for func in &class.functions {
        if is_class && func.is_private != in_private {
            in_private = func.is_private;
            lines.push(if in_private { "private:" } else { "public:" }.to_string());
        }
        lines.extend(doc_block(indent, &func.docs));
        lines.extend(emit_method(class, func, opts));
        lines.push(String::new());

        if let Some(wrapper) = func.wrapper_name() {
            lines.extend(doc_block(indent, &func.docs));
            lines.extend(emit_array_wrapper(class, func, wrapper));
            lines.push(String::new());
        }
    }

    if is_class {
        lines.push(format!("}}; // class {name}"));
    } else {
        lines.push(format!("}} // namespace {name}"));
    }
    lines
}

/// Ergonomic return type of a method.
fn native_return(class: &ClassDef, func: &FunctionDef) -> String {
    if func.self_return {
        return format!("std::shared_ptr<{}>", class.name);
    }
    match &func.ret.class {
        TypeClass::RefCounted { class } => format!("std::shared_ptr<{class}>"),
        TypeClass::Object {
            class,
            is_ref: true,
        } => format!("godot::Ref<{class}>"),
        TypeClass::Object {
            class,
            is_ref: false,
        } => format!("{class} *"),
        TypeClass::Enum { owner, name, .. } => format!("{owner}::{name}"),
        TypeClass::Plain | TypeClass::BasicValue { .. } => func.ret.c_type.clone(),
    }
}

/// Ergonomic parameter declaration, default included.
fn param_decl(arg: &ArgDef) -> String {
    let name = &arg.name;
    let mut decl = match &arg.class {
        TypeClass::RefCounted { class } => format!("const std::shared_ptr<{class}> &{name}"),
        TypeClass::Object {
            class,
            is_ref: true,
        } => format!("const godot::Ref<{class}> &{name}"),
        TypeClass::Object {
            class,
            is_ref: false,
        } => format!("const {class} *{name}"),
        TypeClass::Enum { owner, name: e, .. } => format!("{owner}::{e} {name}"),
        TypeClass::Plain | TypeClass::BasicValue { .. } if arg.c_type.ends_with('*') => {
            join_decl(&arg.c_type, name)
        }
        TypeClass::Plain | TypeClass::BasicValue { .. } => {
            let bare = arg.c_type.strip_prefix("const ").unwrap_or(&arg.c_type);
            format!("const {bare} &{name}")
        }
    };
    if let Some(default) = &arg.default {
        decl.push_str(" = ");
        decl.push_str(default);
    }
    decl
}

/// ABI type in the function pointer declaration.
fn pointer_param(arg: &ArgDef) -> String {
    match &arg.class {
        TypeClass::Object { class, .. } => format!("{} /*{class}*/", arg.c_type),
        _ => arg.c_type.clone(),
    }
}

fn call_arg(arg: &ArgDef) -> String {
    let name = &arg.name;
    match &arg.class {
        TypeClass::RefCounted { .. } => format!("{name} ? (void *)*{name} : nullptr"),
        TypeClass::Object { is_ref: true, .. } => {
            format!("{name}.is_valid() ? {name}->get_instance_id() : 0")
        }
        TypeClass::Object { is_ref: false, .. } => {
            format!("{name} ? {name}->get_instance_id() : 0")
        }
        TypeClass::Enum {
            underlying_type, ..
        } => format!("static_cast<{underlying_type}>({name})"),
        TypeClass::Plain | TypeClass::BasicValue { .. } => name.clone(),
    }
}

fn default_return(native: &str, func: &FunctionDef) -> &'static str {
    let pointer_like = native.ends_with('*')
        || matches!(
            func.ret.class,
            TypeClass::RefCounted { .. } | TypeClass::Object { .. }
        );
    if pointer_like { "nullptr" } else { "{}" }
}

fn emit_method(class: &ClassDef, func: &FunctionDef, opts: &CppOptions<'_>) -> Vec<String> {
    let is_member = !class.is_singleton() && !func.is_private;
    let indent = if class.is_singleton() { "" } else { "\t" };
    let native = native_return(class, func);

    let params: Vec<String> = if is_member {
        func.value_args().map(param_decl).collect()
    } else {
        func.args.iter().map(param_decl).collect()
    };
    let decl = join_decl(&native, &format!("{}({})", func.public_name(), params.join(", ")));
    let mut lines = vec![if is_member {
        format!("{indent}{decl} {{")
    } else {
        format!("{indent}static {decl} {{")
    }];

    let ptr_ret = if func.self_return {
        "void".to_string()
    } else {
        func.ret.c_type.clone()
    };
    let ptr_params = func
        .args
        .iter()
        .map(pointer_param)
        .collect::<Vec<_>>()
        .join(", ");
    lines.push(format!(
        "{indent}\tstatic {}(*{})({ptr_params}) = nullptr;",
        join_decl(&ptr_ret, ""),
        func.c_name
    ));

    let args = func.args.iter().map(call_arg).collect::<Vec<_>>().join(", ");
    let with_args = |head: String| {
        if args.is_empty() {
            head
        } else {
            format!("{head}, {args}")
        }
    };
    let def = default_return(&native, func);
    let c = &func.c_name;

    let mut call = Vec::new();
    if func.self_return {
        call.push(format!("LOAD_AND_CALL_FUNC_POINTER_SELFRET({});", with_args(c.clone())));
        call.push("return shared_from_this();".to_string());
    } else if func.returns_void() {
        call.push(format!("LOAD_AND_CALL_FUNC_POINTER({});", with_args(c.clone())));
    } else {
        call.push(match &func.ret.class {
            TypeClass::RefCounted { class } => format!(
                "LOAD_AND_CALL_FUNC_POINTER_RET_REF_TO_SHARED({});",
                with_args(format!("{c}, {class}, {def}"))
            ),
            TypeClass::Object {
                class,
                is_ref: true,
            } => format!(
                "LOAD_AND_CALL_FUNC_POINTER_RET_GODOT_REF({});",
                with_args(format!("{c}, {class}, {def}"))
            ),
            TypeClass::Object {
                class,
                is_ref: false,
            } => format!(
                "LOAD_AND_CALL_FUNC_POINTER_RET_GODOT_OBJECT({});",
                with_args(format!("{c}, {class}, {def}"))
            ),
            TypeClass::Enum { owner, name, .. } => format!(
                "LOAD_AND_CALL_FUNC_POINTER_RET_CAST({});",
                with_args(format!("{c}, {owner}::{name}, {def}"))
            ),
            TypeClass::Plain | TypeClass::BasicValue { .. } => format!(
                "LOAD_AND_CALL_FUNC_POINTER_RET({});",
                with_args(format!("{c}, {def}"))
            ),
        });
    }

    if is_disableable(class, func) {
        let p = opts.api_prefix;
        let ret = if func.returns_void() {
            "return;".to_string()
        } else {
            format!("return {def};")
        };
        // Only the early return is conditional; the call itself is always compiled.
        lines.push(format!("#ifdef _{p}_COMPILETIME_CHECK_ENABLED"));
        lines.push(format!("{indent}\tif (!_{p}_Loader_::is_call_enabled())"));
        lines.push(format!("{indent}\t\t{ret}"));
        lines.push("#endif".to_string());
    }
    lines.extend(call.iter().map(|l| format!("{indent}\t{l}")));

    lines.push(format!("{indent}}}"));
    lines
}

/// Overload of a `*_c` method taking engine containers instead of raw
/// pointer/size pairs and UTF-8 pointers.
fn emit_array_wrapper(class: &ClassDef, func: &FunctionDef, wrapper: &str) -> Vec<String> {
    let is_member = !class.is_singleton();
    let indent = if is_member { "\t" } else { "" };
    let native = native_return(class, func);

    let mut params = Vec::new();
    let mut forwarded = Vec::new();
    for p in wrapper_params(func) {
        match p {
            WrapperParam::Arg(arg) => {
                params.push(param_decl(arg));
                forwarded.push(arg.name.clone());
            }
            WrapperParam::Group(ArrayGroup::Data {
                name, element_type, ..
            }) => {
                let element = element_type
                    .strip_prefix("const ")
                    .unwrap_or(element_type)
                    .trim();
                let short = element.strip_prefix("godot::").unwrap_or(element);
                match PACKED_ARRAYS.iter().find(|(t, _)| *t == short) {
                    Some((_, packed)) => {
                        params.push(format!("const godot::{packed} &{name}"));
                        forwarded.push(format!("{name}.ptr(), {name}.size()"));
                    }
                    None => {
                        params.push(format!("const std::vector<{element}> &{name}"));
                        forwarded.push(format!("{name}.data(), {name}.size()"));
                    }
                }
            }
            WrapperParam::Group(ArrayGroup::String { name, .. }) => {
                params.push(format!("const godot::String &{name}"));
                forwarded.push(format!("{name}.utf8().get_data()"));
            }
        }
    }

    let decl = join_decl(&native, &format!("{wrapper}({})", params.join(", ")));
    let head = if is_member {
        format!("{indent}{decl} {{")
    } else {
        format!("{indent}static {decl} {{")
    };
    let ret = if func.returns_void() && !func.self_return {
        ""
    } else {
        "return "
    };
    vec![
        head,
        format!(
            "{indent}\t{ret}{}({});",
            func.public_name(),
            forwarded.join(", ")
        ),
        format!("{indent}}}"),
    ]
}
