//! Type classification and the post-scan pass over the whole model.
//!
//! Classification needs the final set of plugin classes and enums, so it
//! runs once after every header has been scanned ([`resolve_api`]). Array
//! group folding is local to one declaration and runs during extraction.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;
use tracing::{debug, error, warn};

use crate::model::*;

/// Engine value types passed by value across the ABI.
pub const BASIC_VALUE_TYPES: &[&str] = &[
    "bool",
    "int8_t",
    "uint8_t",
    "int16_t",
    "uint16_t",
    "int32_t",
    "uint32_t",
    "int64_t",
    "uint64_t",
    "int",
    "real_t",
    "float",
    "double",
    "Vector2",
    "Vector2i",
    "Vector3",
    "Vector3i",
    "Vector4",
    "Vector4i",
    "Quaternion",
    "Color",
    "Transform2D",
    "Transform3D",
    "Basis",
    "Plane",
    "AABB",
    "Rect2",
    "Rect2i",
    "Projection",
];

static REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:godot::)?Ref\s*<\s*([\w:]+)\s*>$").expect("Ref<T> regex"));

/// Strip `const`, `&` and surrounding whitespace.
pub fn bare_type(ty: &str) -> &str {
    let ty = ty.trim().trim_end_matches('&').trim_end();
    ty.strip_prefix("const ").unwrap_or(ty).trim()
}

/// Classify a declared type. `plugin_classes` holds every class of the
/// model. Enums are attached later, once the enum index exists.
pub fn classify_type(ty: &str, plugin_classes: &HashSet<&str>) -> TypeClass {
    let bare = bare_type(ty);

    if let Some(caps) = REF_RE.captures(bare) {
        let inner = &caps[1];
        if inner.starts_with("godot::") {
            return TypeClass::Object {
                class: inner.to_string(),
                is_ref: true,
            };
        }
        if plugin_classes.contains(inner) {
            return TypeClass::RefCounted {
                class: inner.to_string(),
            };
        }
        warn!(ty, "Ref<{inner}> is neither a plugin class nor a godot:: class, passing it as is");
        return TypeClass::Plain;
    }

    if let Some(pointee) = bare.strip_suffix('*') {
        let pointee = pointee.trim();
        let pointee = pointee.strip_prefix("class ").unwrap_or(pointee);
        if pointee.contains("::") {
            return TypeClass::Object {
                class: pointee.to_string(),
                is_ref: false,
            };
        }
        return TypeClass::Plain;
    }

    let name = bare.strip_prefix("godot::").unwrap_or(bare);
    if BASIC_VALUE_TYPES.contains(&name) {
        return TypeClass::BasicValue {
            ty: name.to_string(),
        };
    }
    TypeClass::Plain
}

/// ABI type of an argument (`is_return == false`) or a return value.
pub fn c_type_for(ty: &str, class: &TypeClass, is_return: bool) -> String {
    match class {
        TypeClass::RefCounted { .. } => "void *".to_string(),
        TypeClass::Object { .. } => "const uint64_t".to_string(),
        TypeClass::Enum {
            underlying_type, ..
        } if is_return => underlying_type.clone(),
        TypeClass::Enum {
            underlying_type, ..
        } => format!("const {underlying_type}"),
        TypeClass::Plain | TypeClass::BasicValue { .. } => ty.replace('&', "").trim().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Array groups
// ---------------------------------------------------------------------------

/// Fold `X_data`/`X_size` pairs and `X_string` arguments of `function`.
///
/// The naming convention is strict: functions taking folded arguments must
/// be named `*_c`, and `*_c` functions must take at least one.
pub fn fold_array_groups(function: &str, args: &[ArgDef]) -> Result<Vec<ArrayGroup>> {
    let mut groups = Vec::new();

    for (i, arg) in args.iter().enumerate() {
        if arg.is_instance {
            continue;
        }
        if let Some(base) = arg.name.strip_suffix("_data") {
            let Some(pointee) = bare_type(&arg.ty).strip_suffix('*') else {
                bail!(
                    "`{}` of `{function}` must be a pointer, found `{}`",
                    arg.name,
                    arg.ty
                );
            };
            let size_name = format!("{base}_size");
            let Some(size) = args.get(i + 1).filter(|a| a.name == size_name) else {
                bail!("`{}` of `{function}` must be followed by `uint64_t {size_name}`", arg.name);
            };
            if bare_type(&size.ty) != "uint64_t" {
                bail!(
                    "`{size_name}` of `{function}` must be `uint64_t`, found `{}`",
                    size.ty
                );
            }
            groups.push(ArrayGroup::Data {
                name: base.to_string(),
                data_arg: arg.name.clone(),
                size_arg: size.name.clone(),
                element_type: pointee.trim().to_string(),
            });
        } else if let Some(base) = arg.name.strip_suffix("_size") {
            let data_name = format!("{base}_data");
            if i == 0 || args[i - 1].name != data_name {
                bail!("`{}` of `{function}` must directly follow `{data_name}`", arg.name);
            }
        } else if let Some(base) = arg.name.strip_suffix("_string") {
            if arg.ty.replace(' ', "") != "constchar*" {
                bail!(
                    "`{}` of `{function}` must be `const char *`, found `{}`",
                    arg.name,
                    arg.ty
                );
            }
            groups.push(ArrayGroup::String {
                name: base.to_string(),
                arg: arg.name.clone(),
            });
        }
    }

    match (groups.is_empty(), function.ends_with("_c")) {
        (false, false) => bail!(
            "`{function}` takes `_data`/`_size` or `_string` arguments and must be named `{function}_c`"
        ),
        (true, true) => bail!(
            "`{function}` ends with `_c` but takes no `_data`/`_size` or `_string` arguments"
        ),
        _ => Ok(groups),
    }
}

// ---------------------------------------------------------------------------
// Post-scan pass
// ---------------------------------------------------------------------------

/// Resolve everything that needs the complete model: `#docs_func`
/// references, type classes, enum references and properties.
pub fn resolve_api(api: &mut Api) -> Result<()> {
    resolve_docs_references(api);
    classify_all(api);
    let enums = build_enum_index(api)?;
    attach_enums(api, &enums);
    for class in &mut api.classes {
        class.properties = synthesize_properties(class);
        debug!(class = %class.name, properties = class.properties.len(), "resolved class");
    }
    Ok(())
}

fn resolve_docs_references(api: &mut Api) {
    for class in &mut api.classes {
        for i in 0..class.functions.len() {
            let Some(target) = class.functions[i].docs_from.clone() else {
                continue;
            };
            let docs = class
                .function(&target)
                .map(|src| src.docs.clone())
                .or_else(|| class.declared_docs.get(&target).cloned());
            match docs {
                Some(docs) => class.functions[i].docs = docs,
                None => warn!(
                    class = %class.name,
                    function = %class.functions[i].name,
                    target,
                    "#docs_func target not found"
                ),
            }
        }
    }
}

fn classify_all(api: &mut Api) {
    let names: Vec<String> = api.classes.iter().map(|c| c.name.clone()).collect();
    let plugin_classes: HashSet<&str> = names.iter().map(String::as_str).collect();

    for func in api.classes.iter_mut().flat_map(|c| c.functions.iter_mut()) {
        for i in 0..func.args.len() {
            let arg = &func.args[i];
            if arg.is_instance || func.group_of(&arg.name).is_some() {
                continue;
            }
            let class = classify_type(&arg.ty, &plugin_classes);
            let c_type = c_type_for(&arg.ty, &class, false);
            let arg = &mut func.args[i];
            arg.class = class;
            arg.c_type = c_type;
        }
        if !func.self_return {
            func.ret.class = classify_type(&func.ret.ty, &plugin_classes);
            func.ret.c_type = c_type_for(&func.ret.ty, &func.ret.class, true);
        }
    }
}

/// Canonical `Owner::Enum` → type class, after rejecting duplicate constants.
/// Sorted, so an ambiguous type always resolves to the same enum.
fn build_enum_index(api: &Api) -> Result<BTreeMap<String, TypeClass>> {
    let mut constants: HashMap<&str, String> = HashMap::new();
    let mut index = BTreeMap::new();

    for class in &api.classes {
        for e in &class.enums {
            let canonical = format!("{}::{}", class.name, e.name);
            for v in &e.values {
                if let Some(prev) = constants.insert(&v.name, canonical.clone()) {
                    bail!(
                        "enum constant `{}` is declared in both `{prev}` and `{canonical}`",
                        v.name
                    );
                }
            }
            index.insert(
                canonical,
                TypeClass::Enum {
                    owner: class.name.clone(),
                    name: e.name.clone(),
                    underlying_type: e.underlying_type.clone(),
                },
            );
        }
    }
    Ok(index)
}

fn attach_enums(api: &mut Api, enums: &BTreeMap<String, TypeClass>) {
    if enums.is_empty() {
        return;
    }
    let bare_names: HashSet<&str> = enums
        .values()
        .filter_map(|tc| match tc {
            TypeClass::Enum { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();

    let lookup = |ty: &str, context: &str| -> Option<TypeClass> {
        let bare = bare_type(ty);
        if let Some(tc) = enums
            .iter()
            .find(|(canonical, _)| word_match(bare, canonical))
            .map(|(_, tc)| tc.clone())
        {
            return Some(tc);
        }
        let last = bare.rsplit("::").next().unwrap_or(bare);
        if bare_names.contains(last) {
            error!(
                context,
                ty, "enum type must be written as `<Class>::{last}`, it will be passed as `{ty}`"
            );
        }
        None
    };

    for class in &mut api.classes {
        for func in &mut class.functions {
            let context = func.c_name.clone();
            for arg in func.args.iter_mut().filter(|a| a.class == TypeClass::Plain && !a.is_instance) {
                if let Some(tc) = lookup(&arg.ty, &context) {
                    arg.c_type = c_type_for(&arg.ty, &tc, false);
                    arg.class = tc;
                }
            }
            if func.ret.class == TypeClass::Plain
                && let Some(tc) = lookup(&func.ret.ty, &context)
            {
                func.ret.c_type = c_type_for(&func.ret.ty, &tc, true);
                func.ret.class = tc;
            }
        }
    }
}

/// `haystack` contains `needle` delimited by non-identifier characters.
fn word_match(haystack: &str, needle: &str) -> bool {
    let is_word = |c: char| c == '_' || c.is_ascii_alphanumeric();
    haystack.match_indices(needle).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + needle.len()..].chars().next();
        !before.is_some_and(|c| is_word(c) || c == ':') && !after.is_some_and(is_word)
    })
}

/// Pair `set_X` with `get_X`/`is_X`, in setter declaration order.
pub fn synthesize_properties(class: &ClassDef) -> Vec<PropertyDef> {
    let eligible = |f: &&FunctionDef| !f.is_private && !f.name.ends_with("_c");

    class
        .functions
        .iter()
        .filter(eligible)
        .filter_map(|setter| {
            let base = setter.public_name().strip_prefix("set_")?;
            if setter.value_args().count() != 1 {
                return None;
            }
            let getter = class.functions.iter().filter(eligible).find(|g| {
                (g.name == format!("get_{base}") || g.name == format!("is_{base}"))
                    && g.value_args().count() == 0
                    && !g.returns_void()
            })?;
            debug!(class = %class.name, property = base, "found property");
            Some(PropertyDef {
                name: base.to_string(),
                getter: getter.name.clone(),
                setter: setter.name.clone(),
                value_type: getter.ret.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(name: &str, ty: &str) -> ArgDef {
        ArgDef {
            name: name.into(),
            ty: ty.into(),
            c_type: ty.replace('&', "").trim().into(),
            default: None,
            is_instance: false,
            class: TypeClass::Plain,
        }
    }

    fn func(name: &str, ret: &str, args: Vec<ArgDef>) -> FunctionDef {
        FunctionDef {
            name: name.into(),
            c_name: format!("C_{name}"),
            docs: vec![],
            args,
            ret: ReturnDef {
                ty: ret.into(),
                c_type: ret.into(),
                class: TypeClass::Plain,
            },
            self_return: false,
            is_private: false,
            array_groups: vec![],
            docs_from: None,
        }
    }

    #[test]
    fn classify_priority() {
        let classes: HashSet<&str> = ["DebugDraw3DScopeConfig"].into_iter().collect();
        assert_eq!(
            classify_type("Ref<DebugDraw3DScopeConfig>", &classes),
            TypeClass::RefCounted {
                class: "DebugDraw3DScopeConfig".into()
            }
        );
        assert_eq!(
            classify_type("const Ref<godot::Font> &", &classes),
            TypeClass::Object {
                class: "godot::Font".into(),
                is_ref: true
            }
        );
        assert_eq!(
            classify_type("godot::Viewport *", &classes),
            TypeClass::Object {
                class: "godot::Viewport".into(),
                is_ref: false
            }
        );
        assert_eq!(
            classify_type("const godot::Vector3 &", &classes),
            TypeClass::BasicValue { ty: "Vector3".into() }
        );
        assert_eq!(classify_type("Ref<Unknown>", &classes), TypeClass::Plain);
        assert_eq!(classify_type("void *", &classes), TypeClass::Plain);
        assert_eq!(classify_type("const char *", &classes), TypeClass::Plain);
    }

    #[test]
    fn fold_data_and_string_groups() {
        let args = vec![
            ArgDef::instance(),
            arg("lines_data", "const godot::Vector3 *"),
            arg("lines_size", "const uint64_t"),
            arg("text_string", "const char *"),
            arg("color", "const godot::Color &"),
        ];
        let groups = fold_array_groups("draw_lines_c", &args).unwrap();
        assert_eq!(
            groups,
            vec![
                ArrayGroup::Data {
                    name: "lines".into(),
                    data_arg: "lines_data".into(),
                    size_arg: "lines_size".into(),
                    element_type: "godot::Vector3".into()
                },
                ArrayGroup::String {
                    name: "text".into(),
                    arg: "text_string".into()
                }
            ]
        );
    }

    #[test]
    fn fold_requires_c_suffix() {
        let args = vec![arg("lines_data", "const godot::Vector3 *"), arg("lines_size", "uint64_t")];
        let err = fold_array_groups("draw_lines", &args).unwrap_err();
        assert!(err.to_string().contains("draw_lines_c"), "{err}");

        let err = fold_array_groups("draw_box_c", &[arg("size", "real_t")]).unwrap_err();
        assert!(err.to_string().contains("ends with `_c`"), "{err}");
    }

    #[test]
    fn fold_rejects_bad_pairs() {
        let err = fold_array_groups("f_c", &[arg("a_data", "const int *"), arg("b_size", "uint64_t")])
            .unwrap_err();
        assert!(err.to_string().contains("a_size"), "{err}");

        let err = fold_array_groups("f_c", &[arg("a_data", "const int *"), arg("a_size", "int")])
            .unwrap_err();
        assert!(err.to_string().contains("uint64_t"), "{err}");

        let err = fold_array_groups("f_c", &[arg("a_size", "uint64_t")]).unwrap_err();
        assert!(err.to_string().contains("a_data"), "{err}");

        let err = fold_array_groups("f_c", &[arg("a_data", "int")]).unwrap_err();
        assert!(err.to_string().contains("pointer"), "{err}");

        let err = fold_array_groups("f_c", &[arg("name_string", "const godot::String &")]).unwrap_err();
        assert!(err.to_string().contains("const char *"), "{err}");
    }

    #[test]
    fn enums_attach_by_canonical_name() {
        let mut class = ClassDef::new("DebugDraw3D", ClassKind::Singleton);
        class.enums.push(EnumDef {
            name: "PointType".into(),
            underlying_type: "uint32_t".into(),
            values: vec![EnumValue {
                name: "POINT_TYPE_SQUARE".into(),
                value: "0".into(),
            }],
        });
        class.functions.push(func(
            "draw_points",
            "void",
            vec![
                arg("qualified", "DebugDraw3D::PointType"),
                arg("bare", "PointType"),
            ],
        ));
        class
            .functions
            .push(func("get_type", "DebugDraw3D::PointType", vec![]));
        let mut api = Api {
            classes: vec![class],
        };
        resolve_api(&mut api).unwrap();

        let f = &api.classes[0].functions[0];
        assert!(matches!(f.args[0].class, TypeClass::Enum { .. }));
        assert_eq!(f.args[0].c_type, "const uint32_t");
        assert_eq!(f.args[1].class, TypeClass::Plain);
        let g = &api.classes[0].functions[1];
        assert_eq!(g.ret.c_type, "uint32_t");
    }

    #[test]
    fn ambiguous_enum_type_resolves_the_same_way() {
        let enum_def = |name: &str, constant: &str| EnumDef {
            name: name.into(),
            underlying_type: "int".into(),
            values: vec![EnumValue {
                name: constant.into(),
                value: "0".into(),
            }],
        };
        let resolve = |reversed: bool| {
            let mut config = ClassDef::new("Config", ClassKind::Singleton);
            config.enums.push(enum_def("Scope", "SCOPE_LOCAL"));
            config.functions.push(func(
                "set_pair",
                "void",
                vec![arg("pair", "Pair<Scope::Mode, Config::Scope>")],
            ));
            let mut scope = ClassDef::new("Scope", ClassKind::Singleton);
            scope.enums.push(enum_def("Mode", "MODE_FAST"));
            let mut classes = vec![config, scope];
            if reversed {
                classes.reverse();
            }
            let mut api = Api { classes };
            resolve_api(&mut api).unwrap();
            api.class("Config").unwrap().functions[0].args[0].class.clone()
        };
        let first = resolve(false);
        assert_eq!(
            first,
            TypeClass::Enum {
                owner: "Config".into(),
                name: "Scope".into(),
                underlying_type: "int".into(),
            }
        );
        for _ in 0..8 {
            assert_eq!(resolve(true), first);
            assert_eq!(resolve(false), first);
        }
    }

    #[test]
    fn duplicate_enum_constants_fail() {
        let e = |name: &str| EnumDef {
            name: name.into(),
            underlying_type: "int".into(),
            values: vec![EnumValue {
                name: "NONE".into(),
                value: "0".into(),
            }],
        };
        let mut a = ClassDef::new("A", ClassKind::Singleton);
        a.enums.push(e("First"));
        let mut b = ClassDef::new("B", ClassKind::Singleton);
        b.enums.push(e("Second"));
        let err = resolve_api(&mut Api {
            classes: vec![a, b],
        })
        .unwrap_err();
        assert!(err.to_string().contains("A::First"), "{err}");
    }

    #[test]
    fn properties_from_getter_setter_pairs() {
        let mut class = ClassDef::new("Config", ClassKind::Regular);
        let inst = ArgDef::instance;
        class.functions = vec![
            func("set_thickness", "void", vec![inst(), arg("value", "real_t")]),
            func("get_thickness", "real_t", vec![inst()]),
            func("set_visible", "void", vec![inst(), arg("value", "bool")]),
            func("is_visible", "bool", vec![inst()]),
            func("set_pair", "void", vec![inst(), arg("a", "int"), arg("b", "int")]),
            func("get_pair", "int", vec![inst()]),
            func("set_orphan", "void", vec![inst(), arg("v", "int")]),
        ];
        let props = synthesize_properties(&class);
        let names: Vec<_> = props.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["thickness", "visible"]);
        assert_eq!(props[1].getter, "is_visible");
        assert_eq!(props[0].value_type.ty, "real_t");
    }

    #[test]
    fn selfreturn_setter_becomes_property() {
        let mut class = ClassDef::new("Scope", ClassKind::Refcounted);
        let mut setter = func(
            "set_thickness_selfreturn",
            "void",
            vec![ArgDef::instance(), arg("value", "real_t")],
        );
        setter.self_return = true;
        class.functions = vec![setter, func("get_thickness", "real_t", vec![ArgDef::instance()])];
        let props = synthesize_properties(&class);
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].setter, "set_thickness_selfreturn");
    }

    #[test]
    fn word_boundaries() {
        assert!(word_match("DebugDraw3D::PointType", "DebugDraw3D::PointType"));
        assert!(!word_match("DebugDraw3D::PointTypeEx", "DebugDraw3D::PointType"));
        assert!(!word_match("MyDebugDraw3D::PointType", "DebugDraw3D::PointType"));
    }
}
