//! Minimal single-pass preprocessor condition tracker.
//!
//! This is not a preprocessor. It understands value-less `#define`,
//! `#ifdef`, `#ifndef`, `#else` and `#endif`; a bare `#if EXPR` is never
//! evaluated and its block is always treated as live. Only the top of the
//! condition stack decides whether a line is live, so an `#ifdef` nested in
//! an inactive block is judged on its own.

use std::collections::HashSet;

use tracing::{debug, warn};

/// One entry of the condition stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    Active(bool),
    /// `#if EXPR`: not evaluated, always live, not flipped by `#else`.
    Ignored,
}

#[derive(Debug)]
pub struct DefineContext {
    default_defines: HashSet<String>,
    active_defines: HashSet<String>,
    if_blocks: Vec<Condition>,
}

impl DefineContext {
    /// Build a context from the global define list. Entries that are not
    /// plain identifiers (`NAME=VALUE`, macros) are ignored.
    pub fn new<S: AsRef<str>>(defines: &[S]) -> Self {
        let default_defines: HashSet<String> = defines
            .iter()
            .map(|d| d.as_ref().trim())
            .filter(|d| is_identifier(d))
            .map(str::to_string)
            .collect();
        debug!(defines = ?default_defines, "global defines");
        Self {
            active_defines: default_defines.clone(),
            default_defines,
            if_blocks: Vec::new(),
        }
    }

    /// Restore the global defines and clear the condition stack. Called at
    /// the start of every header.
    pub fn reset(&mut self) {
        self.active_defines = self.default_defines.clone();
        self.if_blocks.clear();
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.active_defines.contains(name)
    }

    /// Feed one line and return whether it is live. Directive lines are
    /// never live.
    pub fn parse_line(&mut self, line: &str) -> bool {
        let line = line.trim();

        if let Some(def_line) = line.strip_prefix("#define ") {
            let def_line = def_line.trim();
            if is_identifier(def_line) {
                debug!(name = def_line, "found define");
                self.active_defines.insert(def_line.to_string());
            }
            return false;
        }

        let ifdef = line
            .strip_prefix("#ifdef ")
            .map(|n| (n, false))
            .or_else(|| line.strip_prefix("#ifndef ").map(|n| (n, true)));
        if let Some((name, inverted)) = ifdef {
            let name = name.trim();
            let defined = self.is_defined(name);
            let live = defined != inverted;
            debug!(name, defined, live, "found {}", if inverted { "#ifndef" } else { "#ifdef" });
            self.if_blocks.push(Condition::Active(live));
            return false;
        }

        if line.starts_with("#if ") || line.starts_with("#if(") {
            debug!("found #if, its block is always parsed");
            self.if_blocks.push(Condition::Ignored);
            return false;
        }

        if line.starts_with("#else") {
            match self.if_blocks.last_mut() {
                Some(Condition::Active(live)) => {
                    *live = !*live;
                    debug!(live = *live, "found #else");
                }
                Some(Condition::Ignored) => {}
                None => warn!("#else without a matching #if"),
            }
            return false;
        }

        if line.starts_with("#endif") {
            if self.if_blocks.pop().is_none() {
                warn!("#endif without a matching #if");
            }
            return false;
        }

        match self.if_blocks.last() {
            Some(Condition::Active(live)) => *live,
            Some(Condition::Ignored) | None => true,
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_lines(ctx: &mut DefineContext, src: &str) -> Vec<String> {
        src.lines()
            .map(str::trim)
            .filter(|l| ctx.parse_line(l))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn ifdef_and_else() {
        let mut ctx = DefineContext::new(&["TOOLS_ENABLED", "LEVEL=2"]);
        let src = "a\n#ifdef TOOLS_ENABLED\nb\n#else\nc\n#endif\n#ifdef LEVEL\nd\n#endif\ne";
        assert_eq!(live_lines(&mut ctx, src), vec!["a", "b", "e"]);
    }

    #[test]
    fn ifndef_and_local_define() {
        let mut ctx = DefineContext::new::<&str>(&[]);
        let src = "#ifndef FOO\na\n#endif\n#define FOO\n#ifndef FOO\nb\n#else\nc\n#endif";
        assert_eq!(live_lines(&mut ctx, src), vec!["a", "c"]);
        assert!(ctx.is_defined("FOO"));

        ctx.reset();
        assert!(!ctx.is_defined("FOO"));
    }

    #[test]
    fn define_with_value_is_not_added() {
        let mut ctx = DefineContext::new::<&str>(&[]);
        assert!(!ctx.parse_line("#define VERSION 3"));
        assert!(!ctx.is_defined("VERSION"));
    }

    #[test]
    fn plain_if_is_always_live() {
        let mut ctx = DefineContext::new::<&str>(&[]);
        let src = "#if DEBUG && FOO\na\n#else\nb\n#endif";
        assert_eq!(live_lines(&mut ctx, src), vec!["a", "b"]);
    }

    #[test]
    fn only_top_of_stack_decides() {
        let mut ctx = DefineContext::new(&["INNER"]);
        let src = "#ifdef OUTER\na\n#ifdef INNER\nb\n#endif\nc\n#endif";
        assert_eq!(live_lines(&mut ctx, src), vec!["b"]);
    }

    #[test]
    fn unbalanced_directives_do_not_panic() {
        let mut ctx = DefineContext::new::<&str>(&[]);
        assert!(!ctx.parse_line("#endif"));
        assert!(!ctx.parse_line("#else"));
        assert!(ctx.parse_line("x"));
    }
}
