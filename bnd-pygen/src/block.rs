//! Per-call-site code generation state.
//!
//! A [`CallSite`] owns everything the parameter and return handlers of one
//! wrapper contribute to: local declarations, three code blocks that run in
//! order (`before_parse`, `before_call`, `after_call`), the parse spec for
//! incoming values, the build spec for outgoing values and the argument list
//! of the native call.
//!
//! Each block keeps a stack of cleanup actions. An error exit from a block
//! runs that block's cleanups in reverse registration order, then those of
//! every earlier block, then the block's error return.

use std::collections::HashMap;

use crate::codesink::{CodeSink, MemorySink};
use crate::ctype::join_ctype_and_name;
use crate::error::{CodegenError, CodegenResult};

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// Local variable declarations with unique names.
///
/// Asking for `foo` twice yields `foo` and then `foo2`.
#[derive(Debug, Default)]
pub struct DeclarationsScope {
    sink: MemorySink,
    used: HashMap<String, usize>,
}

impl DeclarationsScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_name(&mut self, name: &str) -> String {
        let n = self.used.entry(name.to_string()).or_insert(0);
        *n += 1;
        if *n == 1 {
            name.to_string()
        } else {
            format!("{name}{n}")
        }
    }

    /// Declare a local and return the name actually used.
    pub fn declare_variable(
        &mut self,
        ctype: &str,
        name: &str,
        initializer: Option<&str>,
        array: Option<&str>,
    ) -> String {
        let varname = self.next_name(name);
        let mut decl = join_ctype_and_name(ctype, &varname);
        if let Some(array) = array {
            decl.push_str(array);
        }
        if let Some(init) = initializer {
            decl.push_str(" = ");
            decl.push_str(init);
        }
        decl.push(';');
        self.sink.writeln(&decl);
        varname
    }

    /// Claim a name without declaring it, so later declarations avoid it.
    pub fn reserve_variable(&mut self, name: &str) -> String {
        self.next_name(name)
    }

    pub fn sink(&mut self) -> &mut MemorySink {
        &mut self.sink
    }
}

// ---------------------------------------------------------------------------
// Code blocks and cleanups
// ---------------------------------------------------------------------------

/// Which block of a call site a piece of code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    BeforeParse = 0,
    BeforeCall = 1,
    AfterCall = 2,
}

/// Identifies one registered cleanup action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupHandle {
    stage: Stage,
    id: usize,
}

#[derive(Debug)]
struct Cleanup {
    id: usize,
    code: String,
}

/// A sequence of generated statements with its own cleanup stack.
#[derive(Debug)]
pub struct CodeBlock {
    stage: Stage,
    sink: MemorySink,
    cleanups: Vec<Cleanup>,
    next_id: usize,
    error_return: String,
}

impl CodeBlock {
    fn new(stage: Stage, error_return: &str) -> Self {
        Self {
            stage,
            sink: MemorySink::new(),
            cleanups: Vec::new(),
            next_id: 0,
            error_return: error_return.to_string(),
        }
    }

    pub fn sink(&mut self) -> &mut MemorySink {
        &mut self.sink
    }

    pub fn error_return(&self) -> &str {
        &self.error_return
    }

    fn pending_cleanups(&self) -> impl Iterator<Item = &str> {
        self.cleanups.iter().rev().map(|c| c.code.as_str())
    }
}

/// Write access to one block of a call site, with read access to the blocks
/// that precede it.
pub struct BlockWriter<'a> {
    block: &'a mut CodeBlock,
    /// Earlier blocks, nearest first.
    predecessors: Vec<&'a CodeBlock>,
}

impl BlockWriter<'_> {
    pub fn write_code(&mut self, code: &str) {
        self.block.sink.writeln(code);
    }

    pub fn indent(&mut self) {
        self.block.sink.indent();
    }

    pub fn unindent(&mut self) {
        self.block.sink.unindent();
    }

    /// Push a cleanup action; the returned handle can cancel it.
    pub fn add_cleanup(&mut self, code: impl Into<String>) -> CleanupHandle {
        self.block.next_id += 1;
        let id = self.block.next_id;
        self.block.cleanups.push(Cleanup {
            id,
            code: code.into(),
        });
        CleanupHandle {
            stage: self.block.stage,
            id,
        }
    }

    /// Every cleanup that must run on exit from this block, in execution
    /// order.
    pub fn cleanup_code(&self) -> Vec<String> {
        let mut out: Vec<String> = self.block.pending_cleanups().map(str::to_string).collect();
        for pred in &self.predecessors {
            out.extend(pred.pending_cleanups().map(str::to_string));
        }
        out
    }

    /// Write every pending cleanup.
    pub fn write_cleanup(&mut self) {
        for code in self.cleanup_code() {
            self.block.sink.writeln(&code);
        }
    }

    /// Write every pending cleanup followed by the error return.
    pub fn write_error_return(&mut self) {
        self.write_cleanup();
        let ret = self.block.error_return.clone();
        self.block.sink.writeln(&ret);
    }

    /// Write `if (expr) { ... }` that runs `failure_cleanup`, then the
    /// pending cleanups, then returns the error.
    pub fn write_error_check(&mut self, failure_expression: &str, failure_cleanup: Option<&str>) {
        self.block.sink.writeln(&format!("if ({failure_expression}) {{"));
        self.block.sink.indent();
        if let Some(cleanup) = failure_cleanup {
            self.block.sink.writeln(cleanup);
        }
        self.write_error_return();
        self.block.sink.unindent();
        self.block.sink.writeln("}");
    }
}

// ---------------------------------------------------------------------------
// Parse and build specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ParseItem {
    template: String,
    values: Vec<String>,
    name: Option<String>,
    optional: bool,
}

/// Ordered `PyArg_ParseTuple` items: (format tag, lvalues, keyword, optional).
#[derive(Debug, Default, Clone)]
pub struct ParseSpec {
    items: Vec<ParseItem>,
}

impl ParseSpec {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_item(template: &str, values: &[String], name: Option<&str>, optional: bool) -> ParseItem {
        ParseItem {
            template: template.to_string(),
            values: values.to_vec(),
            name: name.map(str::to_string),
            optional,
        }
    }

    /// Append an item. A required item after an optional one is rejected.
    pub fn add(
        &mut self,
        template: &str,
        values: &[String],
        name: Option<&str>,
        optional: bool,
    ) -> CodegenResult<usize> {
        if !optional && self.items.last().is_some_and(|i| i.optional) {
            return Err(CodegenError::config(format!(
                "required parameter {} follows an optional one",
                name.unwrap_or(template)
            )));
        }
        self.items.push(Self::make_item(template, values, name, optional));
        Ok(self.items.len())
    }

    /// Insert an item at the front. An optional item ahead of required ones
    /// is rejected.
    pub fn prepend(
        &mut self,
        template: &str,
        values: &[String],
        name: Option<&str>,
        optional: bool,
    ) -> CodegenResult<usize> {
        if optional && self.items.first().is_some_and(|i| !i.optional) {
            return Err(CodegenError::config(format!(
                "optional parameter {} precedes a required one",
                name.unwrap_or(template)
            )));
        }
        self.items.insert(0, Self::make_item(template, values, name, optional));
        Ok(self.items.len())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The quoted format string followed by every lvalue, e.g.
    /// `["\"i|s\"", "&foo", "&bar"]`.
    pub fn render(&self) -> CodegenResult<Vec<String>> {
        let mut template = String::from("\"");
        let mut in_optional = false;
        for item in &self.items {
            if in_optional && !item.optional {
                return Err(CodegenError::config(format!(
                    "optional parameter followed by a required one ({})",
                    item.name.as_deref().unwrap_or(&item.template)
                )));
            }
            if item.optional && !in_optional {
                template.push('|');
                in_optional = true;
            }
            template.push_str(&item.template);
        }
        template.push('"');
        let mut out = vec![template];
        for item in &self.items {
            out.extend(item.values.iter().cloned());
        }
        Ok(out)
    }

    /// `None` if no item carries a keyword, all keywords if every item does.
    pub fn keywords(&self) -> CodegenResult<Option<Vec<String>>> {
        let names: Vec<String> = self.items.iter().filter_map(|i| i.name.clone()).collect();
        if names.is_empty() {
            Ok(None)
        } else if names.len() != self.items.len() {
            Err(CodegenError::config(
                "mixing parameters with and without keywords",
            ))
        } else {
            Ok(Some(names))
        }
    }
}

#[derive(Debug, Clone)]
struct BuildItem {
    template: String,
    values: Vec<String>,
    cancels_cleanup: Option<CleanupHandle>,
}

/// Ordered `Py_BuildValue` items: (format tag, expressions, cleanup that the
/// item consumes).
#[derive(Debug, Default, Clone)]
pub struct BuildSpec {
    items: Vec<BuildItem>,
}

impl BuildSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, template: &str, values: &[String], cancels_cleanup: Option<CleanupHandle>) {
        self.items.push(BuildItem {
            template: template.to_string(),
            values: values.to_vec(),
            cancels_cleanup,
        });
    }

    pub fn prepend(
        &mut self,
        template: &str,
        values: &[String],
        cancels_cleanup: Option<CleanupHandle>,
    ) {
        self.items.insert(
            0,
            BuildItem {
                template: template.to_string(),
                values: values.to_vec(),
                cancels_cleanup,
            },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The quoted format string followed by every expression. With
    /// `force_tuple` the format is wrapped in `(...)`.
    pub fn render(&self, force_tuple: bool) -> Vec<String> {
        let mut template = String::from("\"");
        if force_tuple {
            template.push('(');
        }
        for item in &self.items {
            template.push_str(&item.template);
        }
        if force_tuple {
            template.push(')');
        }
        template.push('"');
        let mut out = vec![template];
        for item in &self.items {
            out.extend(item.values.iter().cloned());
        }
        out
    }

    /// Cleanups consumed by `N` items once the value has been built.
    pub fn consumed_cleanups(&self) -> Vec<CleanupHandle> {
        self.items.iter().filter_map(|i| i.cancels_cleanup).collect()
    }
}

// ---------------------------------------------------------------------------
// Call site
// ---------------------------------------------------------------------------

fn block_writer(blocks: &mut [CodeBlock; 3], stage: Stage) -> BlockWriter<'_> {
    let [before_parse, before_call, after_call] = blocks;
    match stage {
        Stage::BeforeParse => BlockWriter {
            block: before_parse,
            predecessors: Vec::new(),
        },
        Stage::BeforeCall => BlockWriter {
            block: before_call,
            predecessors: vec![&*before_parse],
        },
        Stage::AfterCall => BlockWriter {
            block: after_call,
            predecessors: vec![&*before_call, &*before_parse],
        },
    }
}

/// All generation state for one wrapper body.
#[derive(Debug)]
pub struct CallSite {
    pub declarations: DeclarationsScope,
    blocks: [CodeBlock; 3],
    pub parse_params: ParseSpec,
    pub build_params: BuildSpec,
    /// Arguments of the native call, in order.
    pub call_params: Vec<String>,
}

impl CallSite {
    /// `parse_error_return` applies to the two blocks before the native call,
    /// `error_return` to the block after it.
    pub fn new(parse_error_return: &str, error_return: &str) -> Self {
        Self {
            declarations: DeclarationsScope::new(),
            blocks: [
                CodeBlock::new(Stage::BeforeParse, parse_error_return),
                CodeBlock::new(Stage::BeforeCall, parse_error_return),
                CodeBlock::new(Stage::AfterCall, error_return),
            ],
            parse_params: ParseSpec::new(),
            build_params: BuildSpec::new(),
            call_params: Vec::new(),
        }
    }

    pub fn block(&mut self, stage: Stage) -> BlockWriter<'_> {
        block_writer(&mut self.blocks, stage)
    }

    /// The declarations scope and one block, borrowed together.
    pub fn scope_and_block(&mut self, stage: Stage) -> (&mut DeclarationsScope, BlockWriter<'_>) {
        (&mut self.declarations, block_writer(&mut self.blocks, stage))
    }

    pub fn before_parse(&mut self) -> BlockWriter<'_> {
        self.block(Stage::BeforeParse)
    }

    pub fn before_call(&mut self) -> BlockWriter<'_> {
        self.block(Stage::BeforeCall)
    }

    pub fn after_call(&mut self) -> BlockWriter<'_> {
        self.block(Stage::AfterCall)
    }

    /// Remove the cleanup registered under `handle`, if still pending.
    pub fn cancel(&mut self, handle: CleanupHandle) {
        let block = &mut self.blocks[handle.stage as usize];
        if let Some(pos) = block.cleanups.iter().rposition(|c| c.id == handle.id) {
            block.cleanups.remove(pos);
        }
    }

    /// Write declarations, a blank line and the three blocks into `sink`.
    pub fn flush_to(&mut self, sink: &mut dyn CodeSink) {
        self.declarations.sink().flush_to(sink);
        sink.blank();
        for block in &mut self.blocks {
            block.sink.flush_to(sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Vec<String> {
        vec![s.to_string()]
    }

    #[test]
    fn declarations_get_unique_names() {
        let mut scope = DeclarationsScope::new();
        assert_eq!(scope.declare_variable("int", "foo", None, None), "foo");
        assert_eq!(scope.declare_variable("char*", "bar", None, None), "bar");
        assert_eq!(scope.declare_variable("int", "foo", None, None), "foo2");
        assert_eq!(scope.declare_variable("int", "foo", Some("1"), None), "foo3");
        assert_eq!(scope.reserve_variable("args"), "args");
        assert_eq!(scope.declare_variable("PyObject*", "args", None, None), "args2");
        assert_eq!(
            scope.declare_variable("const char *", "kwargs", Some("{\"hello\", NULL}"), Some("[]")),
            "kwargs"
        );
        assert_eq!(
            scope.sink().flush(),
            "int foo;\nchar *bar;\nint foo2;\nint foo3 = 1;\nPyObject *args2;\n\
             const char *kwargs[] = {\"hello\", NULL};\n"
        );
    }

    #[test]
    fn error_check_runs_cleanups_in_reverse() {
        let mut site = CallSite::new("return NULL;", "return NULL;");
        let mut block = site.before_call();
        block.write_code("foo();");
        block.add_cleanup("clean1();");
        let second = block.add_cleanup("clean2();");
        block.add_cleanup("clean3();");
        site.cancel(second);
        let mut block = site.before_call();
        block.write_error_check("error()", Some("error_clean();"));
        block.write_code("bar();");
        block.write_cleanup();
        let mut sink = MemorySink::new();
        site.block(Stage::BeforeCall).block.sink.flush_to(&mut sink);
        assert_eq!(
            sink.flush(),
            "foo();\nif (error()) {\n    error_clean();\n    clean3();\n    clean1();\n    \
             return NULL;\n}\nbar();\nclean3();\nclean1();\n"
        );
    }

    #[test]
    fn predecessor_cleanups_follow_own() {
        let mut site = CallSite::new("return -1;", "return NULL;");
        site.before_parse().add_cleanup("A();");
        site.before_call().add_cleanup("B();");
        site.after_call().add_cleanup("C();");
        assert_eq!(site.after_call().cleanup_code(), ["C();", "B();", "A();"]);
        assert_eq!(site.before_call().cleanup_code(), ["B();", "A();"]);
        assert_eq!(site.after_call().block.error_return(), "return NULL;");
        assert_eq!(site.before_call().block.error_return(), "return -1;");
    }

    #[test]
    fn call_site_error_exit_unwinds_every_block() {
        let mut site = CallSite::new("return NULL;", "return NULL;");
        site.before_parse().add_cleanup("A();");
        site.before_call().add_cleanup("B();");
        site.before_call().write_code("call();");
        let mut after = site.after_call();
        after.add_cleanup("C();");
        after.write_error_check("py_retval == NULL", None);
        after.write_code("return py_retval;");
        let mut sink = MemorySink::new();
        site.flush_to(&mut sink);
        let out = sink.flush();
        assert_eq!(
            out,
            "\ncall();\nif (py_retval == NULL) {\n    C();\n    B();\n    A();\n    \
             return NULL;\n}\nreturn py_retval;\n"
        );
        assert_eq!(out.matches("return NULL;").count(), 1);
    }

    #[test]
    fn cancelled_cleanup_is_left_out_of_error_exit() {
        let mut site = CallSite::new("return -1;", "return NULL;");
        site.before_parse().add_cleanup("A();");
        let transferred = site.before_call().add_cleanup("B();");
        site.after_call().add_cleanup("C();");
        site.cancel(transferred);
        // Cancelling twice is harmless.
        site.cancel(transferred);
        site.after_call().write_error_check("failed()", Some("undo();"));
        let mut sink = MemorySink::new();
        site.flush_to(&mut sink);
        let out = sink.flush();
        assert_eq!(
            out,
            "\nif (failed()) {\n    undo();\n    C();\n    A();\n    return NULL;\n}\n"
        );
        assert!(!out.contains("B();"));
    }

    #[test]
    fn parse_spec_marks_first_optional() {
        let mut spec = ParseSpec::new();
        spec.add("i", &v("&foo"), Some("foo"), false).unwrap();
        spec.add("s", &v("&bar"), Some("bar"), true).unwrap();
        assert_eq!(spec.render().unwrap(), ["\"i|s\"", "&foo", "&bar"]);
        assert_eq!(spec.keywords().unwrap(), Some(vec!["foo".into(), "bar".into()]));
    }

    #[test]
    fn parse_spec_prepend() {
        let mut spec = ParseSpec::new();
        spec.add("i", &v("&foo"), Some("foo"), false).unwrap();
        spec.prepend("s", &v("&bar"), Some("bar"), false).unwrap();
        assert_eq!(spec.render().unwrap(), ["\"si\"", "&bar", "&foo"]);
        assert_eq!(spec.keywords().unwrap(), Some(vec!["bar".into(), "foo".into()]));
    }

    #[test]
    fn parse_spec_keywords_absent_or_mixed() {
        let mut spec = ParseSpec::new();
        spec.add("i", &v("&foo"), None, false).unwrap();
        assert_eq!(spec.keywords().unwrap(), None);
        spec.add("i", &v("&bar"), Some("bar"), false).unwrap();
        assert!(matches!(spec.keywords(), Err(CodegenError::TypeConfiguration(_))));
    }

    #[test]
    fn parse_spec_rejects_required_after_optional() {
        let mut spec = ParseSpec::new();
        spec.add("i", &v("&a"), Some("a"), false).unwrap();
        spec.add("i", &v("&b"), Some("b"), true).unwrap();
        let err = spec.add("i", &v("&c"), Some("c"), false).unwrap_err();
        assert!(matches!(err, CodegenError::TypeConfiguration(_)));
        assert_eq!(spec.len(), 2);
    }

    #[test]
    fn build_spec_forced_tuple() {
        let mut spec = BuildSpec::new();
        spec.add("i", &v("123"), None);
        spec.prepend("s", &v("hello"), None);
        assert_eq!(spec.render(false), ["\"si\"", "hello", "123"]);
        assert_eq!(BuildSpec::new().render(true), ["\"()\""]);
    }
}
