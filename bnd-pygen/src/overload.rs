//! Overload groups: several native callables behind one Python name.
//!
//! A group with one ordinary candidate is emitted as that candidate's
//! wrapper. Otherwise each candidate becomes a delegate that reports parse
//! errors through an extra `PyObject **return_exception` argument instead
//! of raising, and an aggregator tries the delegates in registration order.
//! The first delegate that parses its arguments wins. When all of them
//! fail, the aggregator raises one `TypeError` listing every delegate's
//! error.

use tracing::debug;

use crate::codesink::{CodeSink, MemorySink};
use crate::context::TypeContext;
use crate::ctype::join_ctype_and_name;
use crate::diagnostics::{Warning, WarningCategory, WarningSink};
use crate::error::{CodegenError, CodegenResult, Skip, SkipReason};
use crate::wrapper::{ForceParse, ForwardWrapper, MethodFlags, WrapperKind, error_return, wrapper_name};

const RETURN_EXCEPTION_PARAM: &str = "PyObject **return_exception";

/// A hand-written wrapper taking part in an overload group.
///
/// Its C definition must already accept the trailing
/// `PyObject **return_exception` argument and store parse errors there.
#[derive(Debug, Clone)]
pub struct CustomWrapper {
    pub wrapper_name: String,
    /// Full C definition, or `None` when it is defined elsewhere.
    pub body: Option<String>,
    pub flags: MethodFlags,
}

impl CustomWrapper {
    pub fn new(wrapper_name: impl Into<String>, body: Option<String>) -> Self {
        Self {
            wrapper_name: wrapper_name.into(),
            body,
            flags: MethodFlags::VARARGS | MethodFlags::KEYWORDS,
        }
    }

    fn generate(&self, sink: &mut dyn CodeSink) {
        if let Some(body) = &self.body {
            sink.writeln(body.trim_end());
        }
    }
}

#[derive(Debug, Clone)]
pub enum Candidate {
    Wrapper(ForwardWrapper),
    Custom(CustomWrapper),
}

impl Candidate {
    /// Custom wrappers only speak the delegate calling convention.
    pub fn needs_overloading_interface(&self) -> bool {
        matches!(self, Candidate::Custom(_))
    }

    fn describe(&self) -> String {
        match self {
            Candidate::Wrapper(w) => w.signature.call_name(),
            Candidate::Custom(c) => c.wrapper_name.clone(),
        }
    }

    fn method_flags(&self, ctx: &TypeContext) -> CodegenResult<MethodFlags> {
        match self {
            Candidate::Wrapper(w) => w.method_flags(ctx),
            Candidate::Custom(c) => Ok(c.flags),
        }
    }
}

impl From<ForwardWrapper> for Candidate {
    fn from(wrapper: ForwardWrapper) -> Self {
        Candidate::Wrapper(wrapper)
    }
}

impl From<CustomWrapper> for Candidate {
    fn from(wrapper: CustomWrapper) -> Self {
        Candidate::Custom(wrapper)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Empty,
    Collecting,
    /// Flags normalized and the surviving candidates known.
    Finalized,
    Emitted,
}

/// How a finalized group is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Direct,
    Aggregated,
}

/// Same-named candidates collapsed into one Python entry point.
#[derive(Debug, Clone)]
pub struct OverloadGroup {
    pub kind: WrapperKind,
    pub python_name: String,
    wrapper_name: String,
    candidates: Vec<Candidate>,
    /// Candidates surviving flag normalization, in registration order.
    active: Vec<Candidate>,
    flags: Option<MethodFlags>,
    state: GroupState,
}

impl OverloadGroup {
    pub fn new(kind: WrapperKind, python_name: impl Into<String>, ctx: &TypeContext) -> Self {
        let python_name = python_name.into();
        Self {
            kind,
            wrapper_name: wrapper_name(kind, &python_name, ctx),
            python_name,
            candidates: Vec::new(),
            active: Vec::new(),
            flags: None,
            state: GroupState::Empty,
        }
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    /// The C name of the entry point.
    pub fn wrapper_name(&self) -> &str {
        &self.wrapper_name
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Candidates that survived normalization.
    pub fn active(&self) -> &[Candidate] {
        &self.active
    }

    pub fn add(&mut self, candidate: impl Into<Candidate>) -> CodegenResult<()> {
        match self.state {
            GroupState::Empty | GroupState::Collecting => {
                self.candidates.push(candidate.into());
                self.state = GroupState::Collecting;
                Ok(())
            }
            GroupState::Finalized | GroupState::Emitted => Err(CodegenError::codegen(format!(
                "overload group {} is already finalized",
                self.python_name
            ))),
        }
    }

    /// Back to collecting, keeping every registered candidate.
    pub fn reset(&mut self) {
        self.active.clear();
        self.flags = None;
        self.state = if self.candidates.is_empty() {
            GroupState::Empty
        } else {
            GroupState::Collecting
        };
    }

    fn location(&self) -> String {
        self.python_name.clone()
    }

    /// Bring every candidate to the same calling convention, dropping the
    /// ones that fail to generate or disagree with the first survivor.
    pub fn normalize_flags(&mut self, ctx: &TypeContext, warnings: &mut dyn WarningSink) {
        if matches!(self.state, GroupState::Finalized | GroupState::Emitted) {
            return;
        }
        let mut candidates = self.candidates.clone();
        if candidates.len() > 1 {
            for candidate in &mut candidates {
                if let Candidate::Wrapper(w) = candidate {
                    w.force_parse = Some(ForceParse::TupleAndKeywords);
                }
            }
        }

        let mut flags: Option<MethodFlags> = None;
        for candidate in candidates {
            match candidate.method_flags(ctx) {
                Err(err) => {
                    warnings.warn(
                        Warning::new(
                            WarningCategory::DroppedCandidate,
                            format!("dropping {}: {err}", candidate.describe()),
                        )
                        .at(self.location()),
                    );
                }
                Ok(found) => match flags {
                    Some(expected) if expected != found => {
                        let reason = SkipReason::FlagMismatch {
                            expected: expected.to_string(),
                            found: found.to_string(),
                        };
                        warnings.warn(
                            Warning::new(
                                WarningCategory::DroppedCandidate,
                                format!("dropping {}: {reason}", candidate.describe()),
                            )
                            .at(self.location()),
                        );
                    }
                    _ => {
                        flags = Some(found);
                        self.active.push(candidate);
                    }
                },
            }
        }
        self.flags = flags;
        self.state = GroupState::Finalized;
    }

    fn layout(&self) -> Layout {
        match self.active.as_slice() {
            [single] if !single.needs_overloading_interface() => Layout::Direct,
            _ => Layout::Aggregated,
        }
    }

    fn self_param(&self, ctx: &TypeContext) -> String {
        match self.kind {
            WrapperKind::Function => "PyObject *self".to_string(),
            WrapperKind::Method { class } | WrapperKind::Constructor { class } => {
                format!("{} *self", ctx.class(class).pystruct)
            }
        }
    }

    fn return_type(&self) -> &'static str {
        match self.kind {
            WrapperKind::Constructor { .. } => "int",
            _ => "PyObject *",
        }
    }

    /// Return type as spelled in the entry point's header and prototype.
    /// `tp_init` slots stay file-local.
    fn entry_type(&self) -> &'static str {
        match self.kind {
            WrapperKind::Constructor { .. } => "static int",
            _ => "PyObject *",
        }
    }

    fn aggregator_args(&self, ctx: &TypeContext, flags: MethodFlags) -> Vec<String> {
        let mut args = vec![self.self_param(ctx)];
        if flags.contains(MethodFlags::VARARGS) {
            args.push("PyObject *args".to_string());
            if flags.contains(MethodFlags::KEYWORDS) {
                args.push("PyObject *kwargs".to_string());
            }
        }
        args
    }

    /// Parse errors of a delegate go to its caller instead of being raised.
    fn delegate_parse_error_return(&self) -> String {
        format!(
            "{{\n    PyObject *exc_type, *traceback;\n    \
             PyErr_Fetch(&exc_type, return_exception, &traceback);\n    \
             Py_XDECREF(exc_type);\n    Py_XDECREF(traceback);\n}}\n{}",
            error_return(self.kind)
        )
    }

    /// Emit the group into `sink` and return its method flags.
    ///
    /// A group with no usable candidate is skipped; nothing is written.
    pub fn generate(
        &mut self,
        sink: &mut dyn CodeSink,
        ctx: &TypeContext,
        warnings: &mut dyn WarningSink,
    ) -> Result<MethodFlags, Skip> {
        if self.state == GroupState::Emitted {
            return Err(Skip::new(
                &self.python_name,
                CodegenError::codegen("overload group emitted twice"),
            ));
        }
        self.normalize_flags(ctx, warnings);
        let Some(flags) = self.flags else {
            return Err(Skip::new(&self.python_name, SkipReason::NoCandidates));
        };

        match self.layout() {
            Layout::Direct => {
                let Candidate::Wrapper(wrapper) = &self.active[0] else {
                    return Err(Skip::new(&self.python_name, SkipReason::NoCandidates));
                };
                let mut out = MemorySink::new();
                wrapper
                    .generate(&mut out, ctx, &self.wrapper_name, &[])
                    .map_err(|e| Skip::new(&self.python_name, e))?;
                out.flush_to(sink);
            }
            Layout::Aggregated => {
                let delegates = self.generate_delegates(sink, ctx, warnings);
                if delegates.is_empty() {
                    return Err(Skip::new(&self.python_name, SkipReason::NoCandidates));
                }
                self.write_aggregator(sink, ctx, flags, &delegates);
            }
        }
        debug!(
            group = %self.python_name,
            candidates = self.active.len(),
            flags = %flags,
            "generated overload group"
        );
        self.state = GroupState::Emitted;
        Ok(flags)
    }

    /// Write one delegate per candidate, returning the names of those that
    /// generated.
    fn generate_delegates(
        &self,
        sink: &mut dyn CodeSink,
        ctx: &TypeContext,
        warnings: &mut dyn WarningSink,
    ) -> Vec<String> {
        let extra = [RETURN_EXCEPTION_PARAM.to_string()];
        let parse_error_return = self.delegate_parse_error_return();
        let mut delegates = Vec::new();
        for (number, candidate) in self.active.iter().enumerate() {
            let mut out = MemorySink::new();
            let result = match candidate {
                Candidate::Wrapper(wrapper) => {
                    let mut wrapper = wrapper.clone();
                    wrapper.force_parse = Some(ForceParse::TupleAndKeywords);
                    wrapper.set_parse_error_return(parse_error_return.clone());
                    let name = format!("{}__{number}", self.wrapper_name);
                    wrapper.generate(&mut out, ctx, &name, &extra).map(|_| name)
                }
                Candidate::Custom(custom) if custom.wrapper_name == self.wrapper_name => {
                    Err(CodegenError::config(format!(
                        "custom wrapper {} clashes with the overload entry point",
                        custom.wrapper_name
                    )))
                }
                Candidate::Custom(custom) => {
                    custom.generate(&mut out);
                    Ok(custom.wrapper_name.clone())
                }
            };
            match result {
                Ok(name) => {
                    sink.blank();
                    out.flush_to(sink);
                    delegates.push(name);
                }
                Err(err) => warnings.warn(
                    Warning::new(
                        WarningCategory::DroppedCandidate,
                        format!("dropping {}: {err}", candidate.describe()),
                    )
                    .at(self.location()),
                ),
            }
        }
        delegates
    }

    fn write_aggregator(&self, sink: &mut dyn CodeSink, ctx: &TypeContext, flags: MethodFlags, delegates: &[String]) {
        let count = delegates.len();
        sink.blank();
        sink.writeln(self.entry_type());
        sink.writeln(&format!(
            "{}({})",
            self.wrapper_name,
            self.aggregator_args(ctx, flags).join(", ")
        ));
        sink.writeln("{");
        sink.indent();
        sink.writeln(&format!("{};", join_ctype_and_name(self.return_type(), "retval")));
        sink.writeln("PyObject *error_list;");
        sink.writeln(&format!("PyObject *exceptions[{count}] = {{0,}};"));
        let mut call_args = vec!["self".to_string()];
        if flags.contains(MethodFlags::VARARGS) {
            call_args.push("args".to_string());
            if flags.contains(MethodFlags::KEYWORDS) {
                call_args.push("kwargs".to_string());
            }
        }
        for (number, delegate) in delegates.iter().enumerate() {
            let mut args = call_args.clone();
            args.push(format!("&exceptions[{number}]"));
            sink.writeln(&format!("retval = {delegate}({});", args.join(", ")));
            sink.writeln(&format!("if (!exceptions[{number}]) {{"));
            sink.indent();
            for earlier in 0..number {
                sink.writeln(&format!("Py_DECREF(exceptions[{earlier}]);"));
            }
            sink.writeln("return retval;");
            sink.unindent();
            sink.writeln("}");
        }
        sink.writeln(&format!("error_list = PyList_New({count});"));
        for i in 0..count {
            sink.writeln(&format!("PyList_SET_ITEM(error_list, {i}, PyObject_Str(exceptions[{i}]));"));
            sink.writeln(&format!("Py_DECREF(exceptions[{i}]);"));
        }
        sink.writeln("PyErr_SetObject(PyExc_TypeError, error_list);");
        sink.writeln("Py_DECREF(error_list);");
        sink.writeln(error_return(self.kind));
        sink.unindent();
        sink.writeln("}");
    }

    /// The `PyMethodDef` entry of an emitted group.
    pub fn method_def(&self) -> Option<String> {
        if self.state != GroupState::Emitted {
            return None;
        }
        let flags = self.flags?;
        Some(format!(
            "{{(char *) \"{}\", (PyCFunction) {}, {flags}, NULL }},",
            self.python_name, self.wrapper_name
        ))
    }

    /// Prototype of the entry point, once the group is finalized.
    pub fn declaration(&self, ctx: &TypeContext) -> Option<String> {
        if !matches!(self.state, GroupState::Finalized | GroupState::Emitted) {
            return None;
        }
        let flags = self.flags?;
        let args = match (self.layout(), self.active.first()) {
            (Layout::Direct, Some(Candidate::Wrapper(wrapper))) => wrapper.wrapper_args(ctx, flags, &[]),
            _ => self.aggregator_args(ctx, flags),
        };
        let prototype = format!("{}({})", self.wrapper_name, args.join(", "));
        Some(format!("{};", join_ctype_and_name(self.entry_type(), &prototype)))
    }
}
