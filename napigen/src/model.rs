//! API model: the bridge between header extraction and the three emitters.
//!
//! Everything here is plain data. The model is serialized as-is into
//! `api.json`, so field names are part of the output format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The whole exposed API, in header declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Api {
    pub classes: Vec<ClassDef>,
}

impl Api {
    /// Insert `class`, replacing a previously declared class of the same
    /// name in place. Redeclaring a class overwrites it; nothing is merged.
    pub fn upsert_class(&mut self, class: ClassDef) {
        match self.classes.iter_mut().find(|c| c.name == class.name) {
            Some(existing) => {
                tracing::warn!(class = %class.name, "class declared twice, keeping the last one");
                *existing = class;
            }
            None => self.classes.push(class),
        }
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    /// Plain class owned by its wrapper (`NAPI_CLASS`).
    Regular,
    /// Global singleton reached through `get_singleton()` (`NAPI_CLASS_SINGLETON`).
    Singleton,
    /// Reference-counted plugin class held through `Ref<T>` (`NAPI_CLASS_REF`).
    Refcounted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub kind: ClassKind,
    pub docs: Vec<String>,
    pub enums: Vec<EnumDef>,
    pub functions: Vec<FunctionDef>,
    pub properties: Vec<PropertyDef>,
    /// Docs of un-annotated methods in the class body, by name. Only used as
    /// `#docs_func` targets.
    #[serde(skip)]
    pub declared_docs: BTreeMap<String, Vec<String>>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            kind,
            docs: Vec::new(),
            enums: Vec::new(),
            functions: Vec::new(),
            properties: Vec::new(),
            declared_docs: BTreeMap::new(),
        }
    }

    pub fn is_singleton(&self) -> bool {
        self.kind == ClassKind::Singleton
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn has_self_return(&self) -> bool {
        self.functions.iter().any(|f| f.self_return)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub underlying_type: String,
    pub values: Vec<EnumValue>,
}

/// One enum constant. `value` keeps the text used in generated code: the
/// literal as written for explicit values, the computed number otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    /// Flat exported symbol, `<Class>_<name>`.
    pub c_name: String,
    pub docs: Vec<String>,
    pub args: Vec<ArgDef>,
    #[serde(rename = "return")]
    pub ret: ReturnDef,
    /// The method returns the receiver; wrappers return `this`/`self`.
    pub self_return: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_private: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub array_groups: Vec<ArrayGroup>,
    /// Target of a `// #docs_func <name>` reference, resolved after scanning.
    #[serde(skip)]
    pub docs_from: Option<String>,
}

impl FunctionDef {
    /// Arguments excluding the leading instance handle.
    pub fn value_args(&self) -> impl Iterator<Item = &ArgDef> {
        self.args.iter().filter(|a| !a.is_instance)
    }

    pub fn returns_void(&self) -> bool {
        self.ret.ty == "void"
    }

    /// Name with the `_selfreturn` marker suffix removed.
    pub fn public_name(&self) -> &str {
        self.name.strip_suffix("_selfreturn").unwrap_or(&self.name)
    }

    /// Name of the wrapper overload that folds array groups, `foo_c` → `foo`.
    pub fn wrapper_name(&self) -> Option<&str> {
        if self.array_groups.is_empty() {
            return None;
        }
        self.name.strip_suffix("_c")
    }

    /// Array group that owns argument `arg`, if any.
    pub fn group_of(&self, arg: &str) -> Option<&ArrayGroup> {
        self.array_groups.iter().find(|g| g.owns(arg))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub c_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_instance: bool,
    #[serde(default)]
    pub class: TypeClass,
}

impl ArgDef {
    /// The leading `void *inst_ptr` of every non-singleton method.
    pub fn instance() -> Self {
        Self {
            name: "inst_ptr".to_string(),
            ty: "void *".to_string(),
            c_type: "void *".to_string(),
            default: None,
            is_instance: true,
            class: TypeClass::Plain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnDef {
    #[serde(rename = "type")]
    pub ty: String,
    pub c_type: String,
    #[serde(default)]
    pub class: TypeClass,
}

impl ReturnDef {
    pub fn void() -> Self {
        Self {
            ty: "void".to_string(),
            c_type: "void".to_string(),
            class: TypeClass::Plain,
        }
    }
}

/// How a declared type crosses the ABI. Exactly one case applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeClass {
    /// Passed through unchanged.
    #[default]
    Plain,
    /// `Ref<C>` of a plugin class, crosses as an opaque wrapper pointer.
    RefCounted { class: String },
    /// Engine object, crosses as its 64-bit instance id.
    Object { class: String, is_ref: bool },
    /// Plugin enum, crosses as its underlying integer.
    Enum {
        owner: String,
        name: String,
        underlying_type: String,
    },
    /// Whitelisted engine value type, crosses by value.
    BasicValue { ty: String },
}

/// Arguments folded into one container parameter of the wrapper overload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArrayGroup {
    /// `X_data` pointer followed by its `X_size` element count.
    Data {
        name: String,
        data_arg: String,
        size_arg: String,
        element_type: String,
    },
    /// `X_string` UTF-8 pointer.
    String { name: String, arg: String },
}

impl ArrayGroup {
    pub fn name(&self) -> &str {
        match self {
            ArrayGroup::Data { name, .. } | ArrayGroup::String { name, .. } => name,
        }
    }

    /// Whether `arg` is one of the raw arguments folded into this group.
    pub fn owns(&self, arg: &str) -> bool {
        match self {
            ArrayGroup::Data {
                data_arg, size_arg, ..
            } => arg == data_arg || arg == size_arg,
            ArrayGroup::String { arg: a, .. } => arg == a,
        }
    }

    /// The argument the group parameter takes the place of.
    pub fn first_arg(&self) -> &str {
        match self {
            ArrayGroup::Data { data_arg, .. } => data_arg,
            ArrayGroup::String { arg, .. } => arg,
        }
    }
}

/// Getter/setter pair exposed as a property by the C# wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub getter: String,
    pub setter: String,
    pub value_type: ReturnDef,
}
