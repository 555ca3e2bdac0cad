//! Doxygen-style header docs → C# XML documentation.
//!
//! Supported: free text and `@brief` (summary), `@note`, `@warning`,
//! `@deprecated` (labelled paragraphs), fenced code blocks and `@param`.
//! Params must come last; anything summary-like after them is rejected.

use anyhow::{Result, bail};

#[derive(Debug)]
enum Block {
    Text(Vec<String>),
    Para { label: &'static str, lines: Vec<String> },
    Code(Vec<String>),
}

/// Convert raw doc lines into XML doc lines (without the `/// ` prefix).
/// `params` are the parameter names `@param` may refer to.
pub(crate) fn to_xml_doc(docs: &[String], params: &[&str]) -> Result<Vec<String>> {
    if docs.iter().all(|l| l.trim().is_empty()) {
        return Ok(Vec::new());
    }

    let mut blocks: Vec<Block> = vec![Block::Text(Vec::new())];
    let mut params_out: Vec<(String, Vec<String>)> = Vec::new();
    let mut lines = docs.iter().map(|l| l.trim());

    while let Some(line) = lines.next() {
        if line.starts_with("```") {
            if !params_out.is_empty() {
                bail!("code block after `@param` in docs");
            }
            let mut code = Vec::new();
            for inner in lines.by_ref() {
                if inner.starts_with("```") {
                    break;
                }
                code.push(inner.to_string());
            }
            blocks.push(Block::Code(code));
            blocks.push(Block::Text(Vec::new()));
            continue;
        }

        let (tag, rest) = match line.strip_prefix('@') {
            Some(tagged) => match tagged.split_once(char::is_whitespace) {
                Some((tag, rest)) => (Some(tag), rest.trim()),
                None => (Some(tagged), ""),
            },
            None => (None, line),
        };

        match tag {
            Some("param") => {
                let (name, text) = rest
                    .split_once(char::is_whitespace)
                    .map(|(n, t)| (n, t.trim()))
                    .unwrap_or((rest, ""));
                if !params.contains(&name) {
                    bail!(
                        "`@param {name}` does not name a parameter, expected one of: {}",
                        params.join(", ")
                    );
                }
                let text = if text.is_empty() { Vec::new() } else { vec![text.to_string()] };
                params_out.push((name.to_string(), text));
            }
            Some(summary_tag @ ("brief" | "note" | "warning" | "deprecated")) => {
                if !params_out.is_empty() {
                    bail!("`@{summary_tag}` after `@param` in docs");
                }
                let first = (!rest.is_empty()).then(|| rest.to_string()).into_iter().collect();
                blocks.push(match summary_tag {
                    "brief" => Block::Text(first),
                    "note" => Block::Para { label: "Note", lines: first },
                    "warning" => Block::Para { label: "Warning", lines: first },
                    _ => Block::Para { label: "Deprecated", lines: first },
                });
            }
            Some("private") => {}
            _ => {
                if let Some((_, text)) = params_out.last_mut() {
                    if !line.is_empty() {
                        text.push(line.to_string());
                    }
                    continue;
                }
                match blocks.last_mut() {
                    Some(Block::Text(text)) | Some(Block::Para { lines: text, .. }) => {
                        text.push(line.to_string())
                    }
                    _ => blocks.push(Block::Text(vec![line.to_string()])),
                }
            }
        }
    }

    let mut out = vec!["<summary>".to_string()];
    for block in blocks {
        match block {
            Block::Text(text) => out.extend(trim_blank(&text).iter().map(|l| escape(l))),
            Block::Para { label, lines } => {
                let lines = trim_blank(&lines);
                match lines.split_first() {
                    None => out.push(format!("<para>{label}</para>")),
                    Some((first, more)) => {
                        out.push(format!("<para>{label}: {}", escape(first)));
                        out.extend(more.iter().map(|l| escape(l)));
                        if let Some(last) = out.last_mut() {
                            last.push_str("</para>");
                        }
                    }
                }
            }
            Block::Code(code) => {
                out.push("<code>".to_string());
                out.extend(code.iter().map(|l| escape(l)));
                out.push("</code>".to_string());
            }
        }
    }
    out.push("</summary>".to_string());
    for (name, text) in params_out {
        out.push(format!("<param name=\"{name}\">{}</param>", escape(&text.join(" "))));
    }
    Ok(out)
}

fn trim_blank(lines: &[String]) -> &[String] {
    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.is_empty()).map_or(start, |i| i + 1);
    &lines[start..end]
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn summary_paras_code_and_params() {
        let out = to_xml_doc(
            &docs(&[
                "@brief",
                "Draw a sphere",
                "",
                "@warning",
                "Slow for a <large> count",
                "```cs",
                "DebugDraw3D.DrawSphere(pos);",
                "```",
                "@param position Center",
                "of the sphere",
                "@param radius Radius",
            ]),
            &["position", "radius", "color"],
        )
        .unwrap();
        assert_eq!(
            out,
            vec![
                "<summary>",
                "Draw a sphere",
                "<para>Warning: Slow for a &lt;large&gt; count</para>",
                "<code>",
                "DebugDraw3D.DrawSphere(pos);",
                "</code>",
                "</summary>",
                "<param name=\"position\">Center of the sphere</param>",
                "<param name=\"radius\">Radius</param>",
            ]
        );
    }

    #[test]
    fn inline_note() {
        let out = to_xml_doc(&docs(&["Text", "@note Keep it short"]), &[]).unwrap();
        assert_eq!(
            out,
            vec!["<summary>", "Text", "<para>Note: Keep it short</para>", "</summary>"]
        );
    }

    #[test]
    fn unknown_param_fails() {
        let err = to_xml_doc(&docs(&["@param nope text"]), &["value"]).unwrap_err();
        assert!(err.to_string().contains("nope"), "{err}");
    }

    #[test]
    fn summary_after_param_fails() {
        let err = to_xml_doc(&docs(&["@param value v", "@note late"]), &["value"]).unwrap_err();
        assert!(err.to_string().contains("@note"), "{err}");
        let err = to_xml_doc(&docs(&["@param value v", "```", "x", "```"]), &["value"]).unwrap_err();
        assert!(err.to_string().contains("code block"), "{err}");
    }

    #[test]
    fn empty_docs() {
        assert!(to_xml_doc(&[], &[]).unwrap().is_empty());
    }
}
