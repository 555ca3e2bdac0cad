//! Emitters: [`Api`] model → generated source text.
//!
//! Every emitter returns the complete text of its artifact and never touches
//! the filesystem. The C++ and C# emitters take the model by value because
//! they add lifecycle pseudo-functions to their own copy.

use std::io;

use anyhow::{Context, Result};
use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::model::*;
use crate::text;

pub mod c_api;
pub mod cpp;
pub mod csharp;
mod docs;

/// Lowercase hex SHA-1 of the class list serialized with sorted keys.
///
/// The hashed text is what Python's `json.dumps(classes, sort_keys=True)`
/// produces: `", "`/`": "` separators and `\uXXXX` escapes for non-ASCII.
pub fn api_hash(api: &Api) -> Result<String> {
    // `serde_json::Value` objects are BTreeMaps, so keys come out sorted.
    let value = serde_json::to_value(&api.classes).context("serializing the API model")?;
    let mut text = Vec::new();
    value
        .serialize(&mut serde_json::Serializer::with_formatter(&mut text, HashFormatter))
        .context("serializing the API model for hashing")?;
    let digest = Sha1::digest(&text);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

struct HashFormatter;

impl serde_json::ser::Formatter for HashFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, w: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            w.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, w: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            w.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, w: &mut W) -> io::Result<()> {
        w.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        w: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        for c in fragment.chars() {
            if c.is_ascii() {
                w.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut [0; 2]).iter() {
                    write!(w, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

/// Pretty-printed `api.json`: `{"hash": ..., "classes": [...]}`.
pub fn api_json(api: &Api) -> Result<String> {
    let doc = serde_json::json!({
        "hash": api_hash(api)?,
        "classes": serde_json::to_value(&api.classes).context("serializing the API model")?,
    });
    serde_json::to_string_pretty(&doc).context("rendering api.json")
}

/// Splice generated blocks into a template. Marks are written as
/// `// <prefix><suffix>` comment lines.
pub(crate) fn splice_template(
    template: &str,
    marker_prefix: &str,
    blocks: Vec<(&str, Vec<String>)>,
) -> Result<String> {
    let mut lines = text::split_lines(template);
    for (suffix, block) in blocks {
        text::insert_lines_at_mark(&mut lines, &format!("// {marker_prefix}{suffix}"), block)?;
    }
    Ok(lines.join("\n"))
}

/// Add the private `create`, `create_nullptr` and `destroy` pseudo-functions
/// to every non-singleton class. Wrapper emitters call them from their
/// constructors and destructors.
pub(crate) fn add_lifecycle_functions(api: &mut Api) {
    for class in api.classes.iter_mut().filter(|c| !c.is_singleton()) {
        let private = |name: &str, args: Vec<ArgDef>, ret: ReturnDef| FunctionDef {
            name: name.to_string(),
            c_name: format!("{}_{name}", class.name),
            docs: Vec::new(),
            args,
            ret,
            self_return: false,
            is_private: true,
            array_groups: Vec::new(),
            docs_from: None,
        };
        let handle = || ReturnDef {
            ty: "void *".to_string(),
            c_type: "void *".to_string(),
            class: TypeClass::Plain,
        };
        let lifecycle = [
            private("create", Vec::new(), handle()),
            private("create_nullptr", Vec::new(), handle()),
            private("destroy", vec![ArgDef::instance()], ReturnDef::void()),
        ];
        class.functions.extend(lifecycle);
    }
}

/// Whether a wrapper may skip the native call when calls are disabled.
///
/// Calls that hand out plugin or engine objects, chain on `self`, back a
/// property or manage the instance lifetime always go through.
pub(crate) fn is_disableable(class: &ClassDef, func: &FunctionDef) -> bool {
    !func.is_private
        && !func.self_return
        && !matches!(
            func.ret.class,
            TypeClass::RefCounted { .. } | TypeClass::Object { .. }
        )
        && !class
            .properties
            .iter()
            .any(|p| p.getter == func.name || p.setter == func.name)
}

/// Non-instance arguments as they appear in a wrapper signature: every
/// array group replaces its raw arguments at the position of the first one.
pub(crate) enum WrapperParam<'a> {
    Arg(&'a ArgDef),
    Group(&'a ArrayGroup),
}

pub(crate) fn wrapper_params(func: &FunctionDef) -> Vec<WrapperParam<'_>> {
    func.value_args()
        .filter_map(|arg| match func.group_of(&arg.name) {
            Some(group) if group.first_arg() == arg.name => Some(WrapperParam::Group(group)),
            Some(_) => None,
            None => Some(WrapperParam::Arg(arg)),
        })
        .collect()
}

/// Prefix every non-empty line.
pub(crate) fn indent_all(prefix: &str, lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|l| {
            if l.is_empty() {
                String::new()
            } else {
                format!("{prefix}{l}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let mut api = Api::default();
        api.upsert_class(ClassDef::new("A", ClassKind::Singleton));
        let h1 = api_hash(&api).unwrap();
        assert_eq!(h1.len(), 40);
        assert_eq!(h1, api_hash(&api.clone()).unwrap());

        api.classes[0].docs.push("changed".into());
        assert_ne!(h1, api_hash(&api).unwrap());
    }

    #[test]
    fn hash_matches_python_json_dumps() {
        // sha1(json.dumps(classes, sort_keys=True)) of the same class list.
        let mut class = ClassDef::new("A", ClassKind::Singleton);
        class.docs.push("Größe \u{1F600}".into());
        let api = Api {
            classes: vec![class],
        };
        assert_eq!(api_hash(&api).unwrap(), "3260b5be42a7ef356f3220accd313f506a182570");
    }

    #[test]
    fn api_json_shape() {
        let mut api = Api::default();
        api.upsert_class(ClassDef::new("A", ClassKind::Refcounted));
        let json: serde_json::Value = serde_json::from_str(&api_json(&api).unwrap()).unwrap();
        assert_eq!(json["hash"], api_hash(&api).unwrap());
        assert_eq!(json["classes"][0]["kind"], "refcounted");
    }

    #[test]
    fn lifecycle_only_for_instances() {
        let mut api = Api {
            classes: vec![
                ClassDef::new("S", ClassKind::Singleton),
                ClassDef::new("R", ClassKind::Refcounted),
            ],
        };
        add_lifecycle_functions(&mut api);
        assert!(api.classes[0].functions.is_empty());
        let names: Vec<_> = api.classes[1].functions.iter().map(|f| f.c_name.as_str()).collect();
        assert_eq!(names, vec!["R_create", "R_create_nullptr", "R_destroy"]);
        assert!(api.classes[1].functions.iter().all(|f| f.is_private));
    }

    #[test]
    fn splice_reports_missing_mark() {
        let err = splice_template("a\n// P_FUNCS\nb", "P", vec![("_OTHER", vec![])]).unwrap_err();
        assert!(err.to_string().contains("// P_OTHER"), "{err}");
        let out = splice_template("a\n// P_FUNCS\nb", "P", vec![("_FUNCS", vec!["x".into()])]).unwrap();
        assert_eq!(out, "a\nx\nb");
    }
}
