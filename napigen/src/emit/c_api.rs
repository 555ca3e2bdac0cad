//! C ABI shim: one `extern "C"` function per exposed method plus wrapper
//! lifetime tracking for instantiable classes.

use anyhow::{Context, Result};
use tracing::debug;

use super::splice_template;
use crate::model::*;

/// Everything the C ABI emitter needs besides the model.
#[derive(Debug, Clone, Copy)]
pub struct CApiOptions<'a> {
    pub template: &'a str,
    pub marker_prefix: &'a str,
    /// Plugin headers, relative to the source folder.
    pub headers: &'a [String],
    /// Engine classes to include (`<godot_cpp/classes/<name>.hpp>`).
    pub godot_includes: &'a [String],
}

#[derive(Default)]
struct Output {
    functions: Vec<String>,
    registrations: Vec<String>,
    refs_clear: Vec<String>,
}

pub fn generate_c_api(api: &Api, opts: &CApiOptions<'_>) -> Result<String> {
    let mut out = Output::default();

    for class in api.classes.iter().filter(|c| !c.is_singleton()) {
        debug!(class = %class.name, "generating C API wrapper");
        emit_wrapper(&mut out, class);
    }
    for class in &api.classes {
        debug!(class = %class.name, functions = class.functions.len(), "generating C API");
        for func in &class.functions {
            emit_function(&mut out, class, func);
        }
    }

    splice_template(
        opts.template,
        opts.marker_prefix,
        vec![
            (
                "_API_INCLUDES",
                opts.headers
                    .iter()
                    .map(|h| format!("#include \"{}\"", h.replace('\\', "/")))
                    .collect(),
            ),
            (
                "_GODOT_API_INCLUDES",
                opts.godot_includes
                    .iter()
                    .map(|i| format!("#include <godot_cpp/classes/{i}.hpp>"))
                    .collect(),
            ),
            ("_FUNCTIONS", out.functions),
            ("_REGISTRATIONS", out.registrations),
            ("_REFS_CLEAR", out.refs_clear),
        ],
    )
    .context("filling the C API template")
}

fn emit_wrapper(out: &mut Output, class: &ClassDef) {
    let c = &class.name;
    let w = format!("{c}_NAPIWrapper");
    let storage = format!("{w}_storage");
    let lines = &mut out.functions;

    lines.push(format!("struct {w} {{"));
    match class.kind {
        ClassKind::Refcounted => lines.push(format!("\tRef<{c}> ref;")),
        _ => {
            lines.push(format!("\t{c} *ptr = nullptr;"));
            lines.push(String::new());
            lines.push(format!("\t~{w}() {{"));
            lines.push("\t\tif (ptr) {".to_string());
            lines.push("\t\t\tmemdelete(ptr);".to_string());
            lines.push("\t\t}".to_string());
            lines.push("\t}".to_string());
        }
    }
    lines.push("};".to_string());
    lines.push(String::new());
    lines.push(format!("static std::unordered_set<{w} *> {storage};"));
    lines.push(String::new());

    let new_instance = match class.kind {
        ClassKind::Refcounted => format!("new {w}{{ Ref<{c}>(memnew({c})) }}"),
        _ => format!("new {w}{{ memnew({c}) }}"),
    };
    let mut constructor = |signature: String, new_expr: &str| {
        lines.push(format!("{signature} {{"));
        lines.push("\tZoneScoped;".to_string());
        lines.push(format!("\tauto *inst_ptr = {new_expr};"));
        lines.push(format!("\t{storage}.insert(inst_ptr);"));
        lines.push("\treturn inst_ptr;".to_string());
        lines.push("}".to_string());
        lines.push(String::new());
    };
    constructor(format!("extern \"C\" static void *{c}_create()"), &new_instance);
    constructor(
        format!("extern \"C\" static void *{c}_create_nullptr()"),
        &format!("new {w}{{}}"),
    );
    if class.kind == ClassKind::Refcounted {
        constructor(
            format!("static void *{c}_create_from_ref(Ref<{c}> ref)"),
            &format!("new {w}{{ ref }}"),
        );
    }

    lines.push(format!("extern \"C\" static void {c}_destroy(void *inst_ptr) {{"));
    lines.push("\tZoneScoped;".to_string());
    lines.push(format!(
        "\tif (const auto it = {storage}.find(static_cast<{w} *>(inst_ptr)); it != {storage}.end()) {{"
    ));
    lines.push(format!("\t\t{w} *wrapper = *it;"));
    lines.push(format!("\t\t{storage}.erase(it);"));
    lines.push("\t\tdelete wrapper;".to_string());
    lines.push("\t}".to_string());
    lines.push("}".to_string());
    lines.push(String::new());

    for f in ["create", "create_nullptr", "destroy"] {
        out.registrations.push(format!("\t\tADD_FUNC({c}_{f});"));
    }
    out.registrations.push(format!("\t\tADD_CLASS({w});"));
    out.refs_clear.push(format!("\tCLEAR_REFS({c}, {storage});"));
}

fn emit_function(out: &mut Output, class: &ClassDef, func: &FunctionDef) {
    let params = func
        .args
        .iter()
        .map(param_decl)
        .collect::<Vec<_>>()
        .join(", ");
    out.functions.push(format!(
        "extern \"C\" static {}({params}) {{",
        join_decl(&func.ret.c_type, &func.c_name)
    ));
    out.functions.push("\tZoneScoped;".to_string());

    let call_args = func
        .value_args()
        .map(call_arg)
        .collect::<Vec<_>>()
        .join(", ");
    let receiver = match class.kind {
        ClassKind::Singleton => format!("{}::get_singleton()", class.name),
        ClassKind::Refcounted => format!("static_cast<{}_NAPIWrapper *>(inst_ptr)->ref", class.name),
        ClassKind::Regular => format!("static_cast<{}_NAPIWrapper *>(inst_ptr)->ptr", class.name),
    };
    let call = format!("{receiver}->{}({call_args})", func.name);

    match &func.ret.class {
        _ if func.returns_void() => out.functions.push(format!("\t{call};")),
        TypeClass::RefCounted { class } => out
            .functions
            .push(format!("\treturn {class}_create_from_ref({call});")),
        TypeClass::Object { is_ref, .. } => {
            let valid = if *is_ref { "res.is_valid()" } else { "res" };
            out.functions.push(format!("\tconst auto res = {call};"));
            out.functions.push(format!(
                "\treturn {valid} ? static_cast<uint64_t>(res->get_instance_id()) : 0;"
            ));
        }
        TypeClass::Enum {
            underlying_type, ..
        } => out
            .functions
            .push(format!("\treturn static_cast<{underlying_type}>({call});")),
        TypeClass::Plain | TypeClass::BasicValue { .. } => {
            out.functions.push(format!("\treturn {call};"))
        }
    }
    out.functions.push("}".to_string());
    out.functions.push(String::new());

    out.registrations
        .push(format!("\t\tADD_FUNC({});", func.c_name));
}

/// `type name`, keeping `T *name` pointer spelling.
pub(crate) fn join_decl(ty: &str, name: &str) -> String {
    let ty = ty.trim();
    if ty.ends_with('*') {
        format!("{ty}{name}")
    } else {
        format!("{ty} {name}")
    }
}

fn param_decl(arg: &ArgDef) -> String {
    match &arg.class {
        TypeClass::Object { class, .. } => format!("{} /*{class}*/ {}", arg.c_type, arg.name),
        _ => join_decl(&arg.c_type, &arg.name),
    }
}

fn call_arg(arg: &ArgDef) -> String {
    let name = &arg.name;
    match &arg.class {
        TypeClass::RefCounted { class } => format!(
            "({name} ? static_cast<{class}_NAPIWrapper *>({name})->ref : Ref<{class}>())"
        ),
        TypeClass::Object {
            class,
            is_ref: true,
        } => format!(
            "godot::Ref<{class}>(godot::Object::cast_to<{class}>(godot::ObjectDB::get_instance({name})))"
        ),
        TypeClass::Object {
            class,
            is_ref: false,
        } => format!("godot::Object::cast_to<{class}>(godot::ObjectDB::get_instance({name}))"),
        TypeClass::Enum { owner, name: e, .. } => format!("static_cast<{owner}::{e}>({name})"),
        TypeClass::Plain | TypeClass::BasicValue { .. } => name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractOptions, Extractor};

    const TEMPLATE: &str = "// P_API_INCLUDES\n// P_GODOT_API_INCLUDES\nnamespace NATIVE_API {\n// P_FUNCTIONS\nvoid reg() {\n\t\t// P_REGISTRATIONS\n}\nvoid clear() {\n\t// P_REFS_CLEAR\n}\n}";

    fn generate(source: &str) -> String {
        let mut ex = Extractor::new(ExtractOptions::default());
        ex.scan_header("t.h", source).unwrap();
        let api = ex.finish().unwrap();
        generate_c_api(
            &api,
            &CApiOptions {
                template: TEMPLATE,
                marker_prefix: "P",
                headers: &["3d/t.h".to_string()],
                godot_includes: &["font".to_string()],
            },
        )
        .unwrap()
    }

    #[test]
    fn refcounted_wrapper_tracks_instances() {
        let out = generate("NAPI_CLASS_REF class Scope : public RefCounted {\nNAPI void set_thickness_selfreturn(real_t value);\n};");
        assert!(out.contains("#include \"3d/t.h\""));
        assert!(out.contains("#include <godot_cpp/classes/font.hpp>"));
        assert!(out.contains("struct Scope_NAPIWrapper {\n\tRef<Scope> ref;\n};"));
        assert!(out.contains("static std::unordered_set<Scope_NAPIWrapper *> Scope_NAPIWrapper_storage;"));
        assert!(out.contains("extern \"C\" static void *Scope_create() {"));
        assert!(out.contains("static void *Scope_create_from_ref(Ref<Scope> ref) {"));
        assert!(out.contains("\t\tScope_NAPIWrapper_storage.erase(it);\n\t\tdelete wrapper;"));
        assert!(out.contains("\t\tADD_FUNC(Scope_destroy);"));
        assert!(out.contains("\t\tADD_CLASS(Scope_NAPIWrapper);"));
        assert!(out.contains("\tCLEAR_REFS(Scope, Scope_NAPIWrapper_storage);"));
        assert!(out.contains(
            "extern \"C\" static void Scope_set_thickness_selfreturn(void *inst_ptr, real_t value) {\n\tZoneScoped;\n\tstatic_cast<Scope_NAPIWrapper *>(inst_ptr)->ref->set_thickness_selfreturn(value);\n}"
        ));
    }

    #[test]
    fn regular_wrapper_owns_pointer() {
        let out = generate("NAPI_CLASS class Stats {\nNAPI int64_t get_total() const;\n};");
        assert!(out.contains("\tStats *ptr = nullptr;"));
        assert!(out.contains("memdelete(ptr);"));
        assert!(!out.contains("Stats_create_from_ref"));
        assert!(out.contains("\treturn static_cast<Stats_NAPIWrapper *>(inst_ptr)->ptr->get_total();"));
    }

    #[test]
    fn singleton_conversions() {
        let out = generate(
            "NAPI_CLASS_REF class Scope {\n};\n\
             NAPI_CLASS_SINGLETON class DD {\n\
             NAPI_ENUM enum Mode : uint8_t { MODE_A, MODE_B };\n\
             NAPI Ref<Scope> new_scope() const;\n\
             NAPI void set_font(Ref<godot::Font> font, godot::Viewport *vp, DD::Mode mode);\n\
             NAPI Ref<godot::Font> get_font();\n\
             NAPI DD::Mode get_mode();\n\
             };",
        );
        assert!(out.contains("extern \"C\" static void *DD_new_scope() {"));
        assert!(out.contains("\treturn Scope_create_from_ref(DD::get_singleton()->new_scope());"));
        assert!(out.contains(
            "DD_set_font(const uint64_t /*godot::Font*/ font, const uint64_t /*godot::Viewport*/ vp, const uint8_t mode)"
        ));
        assert!(out.contains("godot::Ref<godot::Font>(godot::Object::cast_to<godot::Font>(godot::ObjectDB::get_instance(font)))"));
        assert!(out.contains("godot::Object::cast_to<godot::Viewport>(godot::ObjectDB::get_instance(vp))"));
        assert!(out.contains("static_cast<DD::Mode>(mode)"));
        assert!(out.contains("\treturn res.is_valid() ? static_cast<uint64_t>(res->get_instance_id()) : 0;"));
        assert!(out.contains("extern \"C\" static uint8_t DD_get_mode() {"));
        assert!(out.contains("\treturn static_cast<uint8_t>(DD::get_singleton()->get_mode());"));
        assert!(!out.contains("DD_create"));
    }

    #[test]
    fn refcounted_argument_unwraps() {
        let out = generate(
            "NAPI_CLASS_REF class Cfg {\n};\n\
             NAPI_CLASS_SINGLETON class DD {\n\
             NAPI void set_config(Ref<Cfg> cfg);\n\
             };",
        );
        assert!(out.contains("DD_set_config(void *cfg)"));
        assert!(out.contains("(cfg ? static_cast<Cfg_NAPIWrapper *>(cfg)->ref : Ref<Cfg>())"));
    }
}
