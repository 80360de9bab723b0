//! Wrappers called from Python: module functions, methods and constructors.
//!
//! A [`ForwardWrapper`] owns one [`CallSignature`] and regenerates its body
//! from scratch on every call to [`ForwardWrapper::generate`]. The same
//! wrapper is generated several times: once into a [`NullSink`] to learn
//! its method flags, then for real, possibly under a different name when it
//! becomes an overload delegate.

use std::fmt;

use bitflags::bitflags;

use crate::block::{BlockWriter, CallSite, Stage};
use crate::codesink::{CodeSink, MemorySink, NullSink};
use crate::context::{ClassId, ClassInfo, ExceptionId, TypeContext};
use crate::ctype::mangle_name;
use crate::error::{CodegenError, CodegenResult, ConvertError};
use crate::handlers::{Parameter, ReturnValue};
use crate::model::{CallSignature, Visibility};
use crate::registry::HandlerKind;

bitflags! {
    /// `PyMethodDef.ml_flags` of a wrapper.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodFlags: u8 {
        const VARARGS = 1 << 0;
        const KEYWORDS = 1 << 1;
        const NOARGS = 1 << 2;
        const STATIC = 1 << 3;
    }
}

impl fmt::Display for MethodFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (MethodFlags::VARARGS, "METH_VARARGS"),
            (MethodFlags::KEYWORDS, "METH_KEYWORDS"),
            (MethodFlags::NOARGS, "METH_NOARGS"),
            (MethodFlags::STATIC, "METH_STATIC"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        write!(f, "{}", names.join("|"))
    }
}

/// Force argument parsing even when there is nothing to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceParse {
    /// `PyArg_ParseTuple`, rejecting any argument.
    Tuple,
    /// `PyArg_ParseTupleAndKeywords`, accepting keyword arguments.
    TupleAndKeywords,
}

/// What a wrapper calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    Function,
    Method { class: ClassId },
    Constructor { class: ClassId },
}

/// `_wrap_add`, `_wrap_PyFoo_bar` or `_wrap_PyFoo__tp_init`.
pub fn wrapper_name(kind: WrapperKind, name: &str, ctx: &TypeContext) -> String {
    match kind {
        WrapperKind::Function => format!("_wrap_{}", mangle_name(name)),
        WrapperKind::Method { class } => format!("_wrap_{}_{}", ctx.class(class).pystruct, mangle_name(name)),
        WrapperKind::Constructor { class } => format!("_wrap_{}__tp_init", ctx.class(class).pystruct),
    }
}

pub fn error_return(kind: WrapperKind) -> &'static str {
    match kind {
        WrapperKind::Constructor { .. } => "return -1;",
        _ => "return NULL;",
    }
}

/// Quote a message for use inside a C string literal.
pub(crate) fn c_string_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

pub(crate) fn convert_error(what: &str, err: ConvertError) -> CodegenError {
    match err {
        ConvertError::Unimplemented => CodegenError::codegen(format!("{what} not implemented")),
        ConvertError::Codegen(e) => e,
    }
}

// ---------------------------------------------------------------------------
// Custodians and wards
// ---------------------------------------------------------------------------

/// A (custodian, ward) pair: the ward is kept alive as long as the
/// custodian. `-1` is the return value, `0` is `self`, `n` the n-th
/// parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Custody {
    pub custodian: i32,
    pub ward: i32,
}

impl Custody {
    /// Involves the return value, so can only be set up after the call.
    pub fn is_postcall(self) -> bool {
        self.custodian == -1 || self.ward == -1
    }
}

pub fn custodians_and_wards(params: &[Parameter], ret: Option<&ReturnValue>) -> Vec<Custody> {
    let mut out: Vec<Custody> = params
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            p.custodian.map(|custodian| Custody {
                custodian,
                ward: i as i32 + 1,
            })
        })
        .collect();
    if let Some(ret) = ret {
        if let Some(custodian) = ret.custodian {
            out.push(Custody { custodian, ward: -1 });
        }
        if ret.return_internal_reference {
            out.push(Custody { custodian: -1, ward: 0 });
        }
    }
    out
}

fn custody_object(
    num: i32,
    params: &[Parameter],
    ret: Option<&ReturnValue>,
    has_self: bool,
) -> CodegenResult<String> {
    let py_name = match num {
        -1 => ret.and_then(|r| r.py_name.clone()).ok_or_else(|| {
            CodegenError::config("custodian/ward -1 needs a wrapped class return value")
        })?,
        0 if has_self => "self".to_string(),
        0 => return Err(CodegenError::config("custodian/ward 0 used without a self object")),
        n if n > 0 => params
            .get(n as usize - 1)
            .and_then(|p| p.py_name.clone())
            .ok_or_else(|| {
                CodegenError::config(format!("custodian/ward {n} does not name a wrapped class parameter"))
            })?,
        n => return Err(CodegenError::config(format!("invalid custodian/ward index {n}"))),
    };
    Ok(format!("((PyObject *) {py_name})"))
}

/// Write the `__wards__` bookkeeping for every pair that belongs to
/// `stage`.
fn write_custodians(
    site: &mut CallSite,
    stage: Stage,
    params: &[Parameter],
    ret: Option<&ReturnValue>,
    has_self: bool,
) -> CodegenResult<()> {
    let postcall = stage == Stage::AfterCall;
    for custody in custodians_and_wards(params, ret) {
        if custody.is_postcall() != postcall {
            continue;
        }
        let custodian = custody_object(custody.custodian, params, ret, has_self)?;
        let ward = custody_object(custody.ward, params, ret, has_self)?;
        let (declarations, mut block) = site.scope_and_block(stage);
        let wards = declarations.declare_variable("PyObject*", "wards", None, None);
        block.write_code(&format!(
            "{wards} = PyObject_GetAttrString({custodian}, (char *) \"__wards__\");"
        ));
        block.write_code(&format!(
            "if ({wards} == NULL) {{\n    PyErr_Clear();\n    {wards} = PyList_New(0);\n    \
             PyObject_SetAttrString({custodian}, (char *) \"__wards__\", {wards});\n}}"
        ));
        block.write_code(&format!(
            "if ({ward} && !PySequence_Contains({wards}, {ward}))\n    PyList_Append({wards}, {ward});"
        ));
        block.add_cleanup(format!("Py_DECREF({wards});"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Forward wrapper
// ---------------------------------------------------------------------------

/// A Python-callable wrapper around one native callable.
#[derive(Debug, Clone)]
pub struct ForwardWrapper {
    pub kind: WrapperKind,
    pub signature: CallSignature,
    pub force_parse: Option<ForceParse>,
    pub unblock_threads: bool,
    /// Replaces the error return of the blocks before the native call.
    parse_error_return: Option<String>,
}

impl ForwardWrapper {
    /// Check that every type of `signature` resolves, then build the
    /// wrapper.
    pub fn new(kind: WrapperKind, signature: CallSignature, ctx: &TypeContext) -> CodegenResult<Self> {
        for param in &signature.params {
            Parameter::new(param, ctx)?;
        }
        if !matches!(kind, WrapperKind::Constructor { .. }) {
            ReturnValue::new(&signature, ctx)?;
        }
        resolve_exceptions(&signature, ctx)?;
        let force_parse = match kind {
            WrapperKind::Constructor { .. } => Some(ForceParse::TupleAndKeywords),
            _ => None,
        };
        let unblock_threads = signature
            .unblock_threads
            .unwrap_or(ctx.settings.unblock_threads);
        Ok(Self {
            kind,
            signature,
            force_parse,
            unblock_threads,
            parse_error_return: None,
        })
    }

    pub fn python_name(&self) -> &str {
        self.signature.python_name()
    }

    pub fn is_constructor(&self) -> bool {
        matches!(self.kind, WrapperKind::Constructor { .. })
    }

    /// The wrapper function name when it is not renamed by an overload
    /// group.
    pub fn base_name(&self, ctx: &TypeContext) -> String {
        wrapper_name(self.kind, &self.signature.call_name(), ctx)
    }

    pub fn error_return(&self) -> &'static str {
        error_return(self.kind)
    }

    pub fn set_parse_error_return(&mut self, code: impl Into<String>) {
        self.parse_error_return = Some(code.into());
    }

    fn is_static(&self) -> bool {
        matches!(self.kind, WrapperKind::Method { .. }) && self.signature.is_static
    }

    /// Write the complete wrapper function named `wrapper_name` into `sink`
    /// and return its method flags.
    pub fn generate(
        &self,
        sink: &mut dyn CodeSink,
        ctx: &TypeContext,
        wrapper_name: &str,
        extra_params: &[String],
    ) -> CodegenResult<MethodFlags> {
        let error_return = self.error_return();
        let parse_error_return = self.parse_error_return.as_deref().unwrap_or(error_return);
        let mut site = CallSite::new(parse_error_return, error_return);

        let mut body = MemorySink::new();
        let flags = self.generate_body(&mut site, &mut body, ctx)?;

        let header = if self.is_constructor() { "static int" } else { "PyObject *" };
        sink.writeln(header);
        sink.writeln(&format!(
            "{wrapper_name}({})",
            self.wrapper_args(ctx, flags, extra_params).join(", ")
        ));
        sink.writeln("{");
        sink.indent();
        body.flush_to(sink);
        if self.is_constructor() {
            sink.writeln("return 0;");
        }
        sink.unindent();
        sink.writeln("}");
        Ok(flags)
    }

    /// Method flags, found by generating into a throwaway sink.
    pub fn method_flags(&self, ctx: &TypeContext) -> CodegenResult<MethodFlags> {
        let mut site = CallSite::new(self.error_return(), self.error_return());
        self.generate_body(&mut site, &mut NullSink, ctx)
    }

    pub(crate) fn wrapper_args(&self, ctx: &TypeContext, flags: MethodFlags, extra_params: &[String]) -> Vec<String> {
        let self_param = match self.kind {
            WrapperKind::Method { class } if self.is_static() => {
                format!("{} *PYBINDGEN_UNUSED(dummy)", ctx.class(class).pystruct)
            }
            WrapperKind::Method { class } | WrapperKind::Constructor { class } => {
                format!("{} *self", ctx.class(class).pystruct)
            }
            _ => "PyObject * PYBINDGEN_UNUSED(dummy)".to_string(),
        };
        let mut args = vec![self_param];
        if flags.contains(MethodFlags::VARARGS) {
            args.push("PyObject *args".to_string());
            if flags.contains(MethodFlags::KEYWORDS) {
                args.push("PyObject *kwargs".to_string());
            }
        }
        args.extend(extra_params.iter().cloned());
        args
    }

    fn generate_body(
        &self,
        site: &mut CallSite,
        sink: &mut dyn CodeSink,
        ctx: &TypeContext,
    ) -> CodegenResult<MethodFlags> {
        let mut params = self
            .signature
            .params
            .iter()
            .map(|decl| Parameter::new(decl, ctx))
            .collect::<CodegenResult<Vec<_>>>()?;
        let mut ret = if self.is_constructor() {
            None
        } else {
            Some(ReturnValue::new(&self.signature, ctx)?)
        };

        site.declarations.reserve_variable("args");
        site.declarations.reserve_variable("kwargs");
        if let Some(ret) = ret.as_mut() {
            site.declarations
                .declare_variable("PyObject *", "py_retval", None, None);
            let catches = !self.signature.throw.is_empty();
            if ret.requires_assignment_constructor() && !catches {
                ret.value = site.declarations.reserve_variable("retval");
            } else if matches!(ret.kind, HandlerKind::ClassByRef(_)) {
                // A reference cannot be declared ahead of the try block.
                return Err(CodegenError::unsupported(format!(
                    "catching exceptions of {} returning {}",
                    self.signature.name, self.signature.return_type
                )));
            } else if !ret.is_void() {
                ret.value = site
                    .declarations
                    .declare_variable(&ret.ctype(ctx), "retval", None, None);
            }
        }

        let thread_state = if self.unblock_threads {
            let ts = site
                .declarations
                .declare_variable("PyThreadState *", "py_thread_state", Some("NULL"), None);
            site.after_call()
                .write_code(&format!("if ({ts})\n    PyEval_RestoreThread({ts});"));
            Some(ts)
        } else {
            None
        };

        for param in &mut params {
            param
                .python_to_c(site, ctx)
                .map_err(|e| convert_error(&format!("python_to_c of parameter {}", param.name), e))?;
        }

        if let Some(message) = &self.signature.deprecated {
            site.before_call().write_error_check(
                &format!(
                    "PyErr_WarnEx(PyExc_DeprecationWarning, (char *) \"{}\", 1)",
                    c_string_escape(message)
                ),
                None,
            );
        }

        let has_self = !matches!(self.kind, WrapperKind::Function) && !self.is_static();
        write_custodians(site, Stage::BeforeCall, &params, ret.as_ref(), has_self)?;

        if let Some(ts) = &thread_state {
            site.before_call()
                .write_code(&format!("if (PyEval_ThreadsInitialized ())\n    {ts} = PyEval_SaveThread();"));
        }

        self.generate_call(site, ctx, ret.as_ref(), thread_state.as_deref())?;

        let mut flags = self.write_parse(site)?;
        if self.is_static() {
            flags |= MethodFlags::STATIC;
        }

        match ret.as_mut() {
            None => {
                write_custodians(site, Stage::AfterCall, &params, None, has_self)?;
                site.after_call().write_cleanup();
            }
            Some(ret) => {
                ret.c_to_python(site, ctx)
                    .map_err(|e| convert_error("c_to_python of the return value", e))?;
                write_custodians(site, Stage::AfterCall, &params, Some(ret), has_self)?;
                write_build_return(site);
            }
        }

        site.flush_to(sink);
        Ok(flags)
    }

    /// Write the argument parsing check and return the calling convention
    /// it implies.
    fn write_parse(&self, site: &mut CallSite) -> CodegenResult<MethodFlags> {
        if site.parse_params.is_empty() && self.force_parse.is_none() {
            return Ok(MethodFlags::NOARGS);
        }
        let mut rendered = site.parse_params.render()?;
        rendered[0] = format!("(char *) {}", rendered[0]);
        let keywords = site.parse_params.keywords()?;

        if keywords.is_none() && self.force_parse != Some(ForceParse::TupleAndKeywords) {
            site.before_parse().write_error_check(
                &format!("!PyArg_ParseTuple(args, {})", rendered.join(", ")),
                None,
            );
            return Ok(MethodFlags::VARARGS);
        }

        let mut quoted: Vec<String> = keywords
            .unwrap_or_default()
            .iter()
            .map(|k| format!("\"{k}\""))
            .collect();
        quoted.push("NULL".to_string());
        let keywords_var = site.declarations.declare_variable(
            "const char *",
            "keywords",
            Some(&format!("{{{}}}", quoted.join(", "))),
            Some("[]"),
        );
        let mut args = vec![
            "args".to_string(),
            "kwargs".to_string(),
            rendered[0].clone(),
            format!("(char **) {keywords_var}"),
        ];
        args.extend(rendered[1..].iter().cloned());
        site.before_parse().write_error_check(
            &format!("!PyArg_ParseTupleAndKeywords({})", args.join(", ")),
            None,
        );
        Ok(MethodFlags::VARARGS | MethodFlags::KEYWORDS)
    }

    fn retval_assign(&self, ret: Option<&ReturnValue>, ctx: &TypeContext) -> String {
        match ret {
            Some(ret) if ret.is_void() => String::new(),
            Some(ret) if ret.requires_assignment_constructor() && self.signature.throw.is_empty() => {
                format!("{} {} = ", ret.ctype(ctx), ret.value)
            }
            Some(ret) => format!("{} = ", ret.value),
            None => String::new(),
        }
    }

    /// Write the native call into `before_call`, inside `try` when the
    /// signature declares exceptions.
    fn generate_call(
        &self,
        site: &mut CallSite,
        ctx: &TypeContext,
        ret: Option<&ReturnValue>,
        thread_state: Option<&str>,
    ) -> CodegenResult<()> {
        let exceptions = resolve_exceptions(&self.signature, ctx)?;
        if !exceptions.is_empty() {
            let mut block = site.before_call();
            block.write_code("try\n{");
            block.indent();
        }
        self.write_native_call(site, ctx, ret)?;
        if !exceptions.is_empty() {
            let mut block = site.before_call();
            for id in exceptions {
                let exc = ctx.exception(id);
                block.unindent();
                block.write_code(&format!("}} catch ({} const &exc) {{", exc.full_name));
                block.indent();
                if let Some(ts) = thread_state {
                    block.write_code(&format!("if ({ts})\n    PyEval_RestoreThread({ts});"));
                }
                block.write_cleanup();
                block.write_code(&exc.raise_code());
                block.write_code(self.error_return());
            }
            block.unindent();
            block.write_code("}");
        }
        Ok(())
    }

    fn write_native_call(&self, site: &mut CallSite, ctx: &TypeContext, ret: Option<&ReturnValue>) -> CodegenResult<()> {
        let args = site.call_params.join(", ");
        let assign = self.retval_assign(ret, ctx);
        let name = self.signature.call_name();
        match self.kind {
            WrapperKind::Function => {
                site.before_call().write_code(&format!("{assign}{name}({args});"));
            }
            WrapperKind::Method { class } => {
                let class = ctx.class(class);
                if self.signature.is_static {
                    site.before_call()
                        .write_code(&format!("{assign}{}::{name}({args});", class.full_name));
                } else if let (Some(helper), true) = (
                    &class.helper_class,
                    self.signature.is_virtual && !self.signature.is_pure_virtual,
                ) {
                    // A Python subclass overriding this method must not be
                    // re-entered through the helper's proxy.
                    let helper_var = site.declarations.declare_variable(
                        &format!("{helper} *"),
                        "helper_class",
                        Some(&format!("dynamic_cast<{helper}*> (self->obj)")),
                        None,
                    );
                    site.before_call().write_code(&format!(
                        "{assign}({helper_var} == NULL)? (self->obj->{name}({args})) : \
                         (self->obj->{}::{name}({args}));",
                        class.full_name
                    ));
                } else {
                    site.before_call()
                        .write_code(&format!("{assign}self->obj->{name}({args});"));
                }
            }
            WrapperKind::Constructor { class } => {
                let class = ctx.class(class);
                let mut block = site.before_call();
                match &class.helper_class {
                    None => {
                        write_construct(&mut block, class, &args, None)?;
                    }
                    Some(helper) => {
                        block.write_code(&format!("if (Py_TYPE(self) != &{})\n{{", class.pytypestruct));
                        block.indent();
                        write_construct(&mut block, class, &args, Some(helper))?;
                        block.unindent();
                        block.write_code("} else {");
                        block.indent();
                        let public = self.signature.visibility == Visibility::Public;
                        if public && class.construct_name().is_ok() {
                            write_construct(&mut block, class, &args, None)?;
                        } else {
                            block.write_code(&format!(
                                "PyErr_SetString(PyExc_TypeError, \"class '{}' cannot be constructed\");",
                                class.python_name
                            ));
                            block.write_error_return();
                        }
                        block.unindent();
                        block.write_code("}");
                    }
                }
            }
        }
        Ok(())
    }
}

/// Build `py_retval` from the build spec, then run the cleanups and return
/// it. Objects passed with `N` belong to `py_retval` from then on.
pub(crate) fn write_build_return(site: &mut CallSite) {
    let built = site.build_params.render(false);
    let consumed = site.build_params.consumed_cleanups();
    let mut after = site.after_call();
    if built == ["\"\""] {
        after.write_code("Py_INCREF(Py_None);");
        after.write_code("py_retval = Py_None;");
    } else {
        after.write_code(&format!("py_retval = Py_BuildValue((char *) {});", built.join(", ")));
    }
    for handle in consumed {
        site.cancel(handle);
    }
    let mut after = site.after_call();
    after.write_cleanup();
    after.write_code("return py_retval;");
}

/// The declared exceptions of `signature`, in catch order.
fn resolve_exceptions(signature: &CallSignature, ctx: &TypeContext) -> CodegenResult<Vec<ExceptionId>> {
    signature
        .throw
        .iter()
        .map(|name| {
            ctx.find_exception(name)
                .ok_or_else(|| CodegenError::config(format!("exception {name} is not declared")))
        })
        .collect()
}

/// `self->obj = new T(args);` plus the bookkeeping of a fresh wrapper.
fn write_construct(
    block: &mut BlockWriter<'_>,
    class: &ClassInfo,
    args: &str,
    helper: Option<&str>,
) -> CodegenResult<()> {
    match helper {
        Some(helper) => {
            block.write_code(&format!("self->obj = new {helper}({args});"));
            block.write_code("self->flags = PYBINDGEN_WRAPPER_FLAG_NONE;");
            block.write_code(&format!("(({helper}*) self->obj)->set_pyobj((PyObject *)self);"));
        }
        None => {
            block.write_code(&class.create_instance_code("self->obj", args)?);
            block.write_code("self->flags = PYBINDGEN_WRAPPER_FLAG_NONE;");
        }
    }
    class.registry.write_register_new_wrapper(block, "self", "self->obj");
    Ok(())
}

/// `tp_init` of a class that cannot be instantiated from Python.
pub fn write_no_constructor(sink: &mut dyn CodeSink, pystruct: &str, python_name: &str, reason: Option<&str>) {
    let message = match reason {
        Some(reason) => format!("class '{python_name}' cannot be constructed ({})", c_string_escape(reason)),
        None => format!("class '{python_name}' cannot be constructed"),
    };
    sink.writeln("static int");
    sink.writeln(&format!("_wrap_{pystruct}__tp_init(void)"));
    sink.writeln("{");
    sink.indent();
    sink.writeln(&format!("PyErr_SetString(PyExc_TypeError, \"{message}\");"));
    sink.writeln("return -1;");
    sink.unindent();
    sink.writeln("}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ExceptionInfo, Settings};
    use crate::model::ParamDecl;

    fn ctx_with_class(helper: bool) -> (TypeContext, ClassId) {
        let settings = Settings::default();
        let mut ctx = TypeContext::with_builtins(settings.clone());
        let mut info = ClassInfo::new("Foo", None, &settings);
        if helper {
            info.allow_subclassing = true;
            info.helper_class = Some("PyFoo__PythonHelper".to_string());
        }
        let id = ctx.add_class(info);
        (ctx, id)
    }

    fn generate(wrapper: &ForwardWrapper, ctx: &TypeContext) -> (String, MethodFlags) {
        let mut sink = MemorySink::new();
        let name = wrapper.base_name(ctx);
        let flags = wrapper.generate(&mut sink, ctx, &name, &[]).unwrap();
        (sink.flush(), flags)
    }

    #[test]
    fn flags_render_as_meth_constants() {
        assert_eq!(
            (MethodFlags::VARARGS | MethodFlags::KEYWORDS).to_string(),
            "METH_VARARGS|METH_KEYWORDS"
        );
        assert_eq!((MethodFlags::NOARGS | MethodFlags::STATIC).to_string(), "METH_NOARGS|METH_STATIC");
    }

    #[test]
    fn function_with_keywords() {
        let ctx = TypeContext::with_builtins(Settings::default());
        let sig = CallSignature::new(
            "add",
            "int",
            vec![ParamDecl::new("int", "a"), ParamDecl::new("int", "b")],
        );
        let wrapper = ForwardWrapper::new(WrapperKind::Function, sig, &ctx).unwrap();
        let (text, flags) = generate(&wrapper, &ctx);
        assert_eq!(flags, MethodFlags::VARARGS | MethodFlags::KEYWORDS);
        assert_eq!(
            text,
            "PyObject *
_wrap_add(PyObject * PYBINDGEN_UNUSED(dummy), PyObject *args, PyObject *kwargs)
{
    PyObject *py_retval;
    int retval;
    int a;
    int b;
    const char *keywords[] = {\"a\", \"b\", NULL};

    if (!PyArg_ParseTupleAndKeywords(args, kwargs, (char *) \"ii\", (char **) keywords, &a, &b)) {
        return NULL;
    }
    retval = add(a, b);
    py_retval = Py_BuildValue((char *) \"i\", retval);
    return py_retval;
}
"
        );
    }

    #[test]
    fn void_function_without_arguments() {
        let ctx = TypeContext::with_builtins(Settings::default());
        let wrapper =
            ForwardWrapper::new(WrapperKind::Function, CallSignature::new("reset", "void", vec![]), &ctx).unwrap();
        let (text, flags) = generate(&wrapper, &ctx);
        assert_eq!(flags, MethodFlags::NOARGS);
        assert!(text.contains("_wrap_reset(PyObject * PYBINDGEN_UNUSED(dummy))\n"), "{text}");
        assert!(text.contains("    reset();\n    Py_INCREF(Py_None);\n    py_retval = Py_None;\n"), "{text}");
    }

    #[test]
    fn static_method_calls_through_class() {
        let (ctx, foo) = ctx_with_class(false);
        let mut sig = CallSignature::new("create", "int", vec![]);
        sig.is_static = true;
        let wrapper = ForwardWrapper::new(WrapperKind::Method { class: foo }, sig, &ctx).unwrap();
        let (text, flags) = generate(&wrapper, &ctx);
        assert_eq!(flags, MethodFlags::NOARGS | MethodFlags::STATIC);
        assert!(text.contains("retval = Foo::create();"), "{text}");
        assert_eq!(wrapper.base_name(&ctx), "_wrap_PyFoo_create");
    }

    #[test]
    fn virtual_method_bypasses_helper_proxy() {
        let (ctx, foo) = ctx_with_class(true);
        let mut sig = CallSignature::new("area", "double", vec![]);
        sig.is_virtual = true;
        let wrapper = ForwardWrapper::new(WrapperKind::Method { class: foo }, sig, &ctx).unwrap();
        let (text, _) = generate(&wrapper, &ctx);
        assert!(
            text.contains("PyFoo__PythonHelper *helper_class = dynamic_cast<PyFoo__PythonHelper*> (self->obj);"),
            "{text}"
        );
        assert!(
            text.contains("retval = (helper_class == NULL)? (self->obj->area()) : (self->obj->Foo::area());"),
            "{text}"
        );
    }

    #[test]
    fn constructor_forces_keywords() {
        let (ctx, foo) = ctx_with_class(false);
        let wrapper =
            ForwardWrapper::new(WrapperKind::Constructor { class: foo }, CallSignature::new("", "void", vec![]), &ctx)
                .unwrap();
        let (text, flags) = generate(&wrapper, &ctx);
        assert_eq!(flags, MethodFlags::VARARGS | MethodFlags::KEYWORDS);
        assert_eq!(
            text,
            "static int
_wrap_PyFoo__tp_init(PyFoo *self, PyObject *args, PyObject *kwargs)
{
    const char *keywords[] = {NULL};

    if (!PyArg_ParseTupleAndKeywords(args, kwargs, (char *) \"\", (char **) keywords)) {
        return -1;
    }
    self->obj = new Foo();
    self->flags = PYBINDGEN_WRAPPER_FLAG_NONE;
    return 0;
}
"
        );
    }

    #[test]
    fn constructor_with_helper_checks_python_type() {
        let (ctx, foo) = ctx_with_class(true);
        let sig = CallSignature::new("", "void", vec![ParamDecl::new("int", "x")]);
        let wrapper = ForwardWrapper::new(WrapperKind::Constructor { class: foo }, sig, &ctx).unwrap();
        let (text, _) = generate(&wrapper, &ctx);
        assert!(text.contains("    if (Py_TYPE(self) != &PyFoo_Type)\n    {\n        self->obj = new PyFoo__PythonHelper(x);"), "{text}");
        assert!(text.contains("((PyFoo__PythonHelper*) self->obj)->set_pyobj((PyObject *)self);"), "{text}");
        assert!(text.contains("    } else {\n        self->obj = new Foo(x);"), "{text}");
    }

    #[test]
    fn abstract_class_constructor_raises_for_exact_type() {
        let (mut ctx, foo) = ctx_with_class(true);
        ctx.class_mut(foo).has_pure_virtual_methods = true;
        let wrapper =
            ForwardWrapper::new(WrapperKind::Constructor { class: foo }, CallSignature::new("", "void", vec![]), &ctx)
                .unwrap();
        let (text, _) = generate(&wrapper, &ctx);
        assert!(
            text.contains("PyErr_SetString(PyExc_TypeError, \"class 'Foo' cannot be constructed\");\n        return -1;"),
            "{text}"
        );
    }

    #[test]
    fn custodian_parameter_keeps_ward_alive() {
        let (ctx, foo) = ctx_with_class(false);
        let mut decl = ParamDecl::new("Foo *", "child");
        decl.transfer_ownership = Some(false);
        decl.custodian = Some(0);
        let sig = CallSignature::new("adopt", "void", vec![decl]);
        let wrapper = ForwardWrapper::new(WrapperKind::Method { class: foo }, sig, &ctx).unwrap();
        let (text, _) = generate(&wrapper, &ctx);
        assert!(
            text.contains("wards = PyObject_GetAttrString(((PyObject *) self), (char *) \"__wards__\");"),
            "{text}"
        );
        assert!(
            text.contains("if (((PyObject *) child) && !PySequence_Contains(wards, ((PyObject *) child)))"),
            "{text}"
        );
        let call = text.find("self->obj->adopt(child_ptr);").unwrap();
        let decref = text.rfind("Py_DECREF(wards);").unwrap();
        assert!(decref > call);
    }

    #[test]
    fn custodian_on_function_self_is_rejected() {
        let (ctx, _) = ctx_with_class(false);
        let mut decl = ParamDecl::new("Foo *", "child");
        decl.transfer_ownership = Some(false);
        decl.custodian = Some(0);
        let wrapper =
            ForwardWrapper::new(WrapperKind::Function, CallSignature::new("adopt", "void", vec![decl]), &ctx).unwrap();
        let mut sink = MemorySink::new();
        let err = wrapper.generate(&mut sink, &ctx, "_wrap_adopt", &[]).unwrap_err();
        assert!(matches!(err, CodegenError::TypeConfiguration(_)));
    }

    #[test]
    fn deprecated_and_unblocked() {
        let ctx = TypeContext::with_builtins(Settings::default());
        let mut sig = CallSignature::new("slow", "void", vec![]);
        sig.deprecated = Some("use \"fast\"".to_string());
        sig.unblock_threads = Some(true);
        let wrapper = ForwardWrapper::new(WrapperKind::Function, sig, &ctx).unwrap();
        let (text, _) = generate(&wrapper, &ctx);
        assert!(
            text.contains("if (PyErr_WarnEx(PyExc_DeprecationWarning, (char *) \"use \\\"fast\\\"\", 1)) {"),
            "{text}"
        );
        let save = text.find("py_thread_state = PyEval_SaveThread();").unwrap();
        let call = text.find("    slow();").unwrap();
        let restore = text.find("PyEval_RestoreThread(py_thread_state);").unwrap();
        assert!(save < call && call < restore);
    }

    fn add_exception(ctx: &mut TypeContext, name: &str, namespace: Option<&str>, message: Option<&str>) {
        let mut info = ExceptionInfo::new(name, namespace, &ctx.settings);
        info.message_rvalue = message.map(str::to_string);
        ctx.add_exception(info);
    }

    fn ward(name: &str) -> ParamDecl {
        let mut decl = ParamDecl::new("Foo *", name);
        decl.transfer_ownership = Some(false);
        decl.custodian = Some(0);
        decl
    }

    #[test]
    fn catch_arm_unwinds_cleanups_before_raising() {
        let (mut ctx, foo) = ctx_with_class(false);
        add_exception(&mut ctx, "exception", Some("std"), Some("exc.what()"));
        add_exception(&mut ctx, "Timeout", None, None);
        let mut sig = CallSignature::new("attach", "int", vec![ward("a"), ward("b")]);
        sig.throw = vec!["std::exception".to_string(), "Timeout".to_string()];
        let wrapper = ForwardWrapper::new(WrapperKind::Method { class: foo }, sig, &ctx).unwrap();
        let (text, _) = generate(&wrapper, &ctx);
        assert!(
            text.contains(
                "    try
    {
        retval = self->obj->attach(a_ptr, b_ptr);
    } catch (std::exception const &exc) {
        Py_DECREF(wards2);
        Py_DECREF(wards);
        PyErr_SetString((PyObject *) Pystd_exception_Type, exc.what());
        return NULL;
    } catch (Timeout const &exc) {
        Py_DECREF(wards2);
        Py_DECREF(wards);
        PyErr_SetNone((PyObject *) PyTimeout_Type);
        return NULL;
    }
    py_retval = Py_BuildValue((char *) \"i\", retval);
"
            ),
            "{text}"
        );
        // Normal exit still runs the cleanups once, after the conversion.
        let tail = &text[text.find("py_retval = Py_BuildValue").unwrap()..];
        assert!(tail.contains("Py_DECREF(wards2);\n    Py_DECREF(wards);\n    return py_retval;"), "{tail}");
    }

    #[test]
    fn catch_arm_reacquires_gil_and_uses_constructor_error_return() {
        let (mut ctx, foo) = ctx_with_class(false);
        add_exception(&mut ctx, "BadInput", None, Some("exc.message()"));
        let mut sig = CallSignature::new("", "void", vec![ParamDecl::new("int", "x")]);
        sig.throw = vec!["BadInput".to_string()];
        sig.unblock_threads = Some(true);
        let wrapper = ForwardWrapper::new(WrapperKind::Constructor { class: foo }, sig, &ctx).unwrap();
        let (text, _) = generate(&wrapper, &ctx);
        assert!(
            text.contains(
                "    } catch (BadInput const &exc) {
        if (py_thread_state)
            PyEval_RestoreThread(py_thread_state);
        PyErr_SetString((PyObject *) PyBadInput_Type, exc.message());
        return -1;
    }
"
            ),
            "{text}"
        );
        let create = text.find("        self->obj = new Foo(x);").unwrap();
        assert!(text.find("    try\n    {\n").unwrap() < create);
    }

    #[test]
    fn class_value_return_is_declared_ahead_of_try() {
        let (mut ctx, foo) = ctx_with_class(false);
        add_exception(&mut ctx, "Oops", None, None);
        let mut sig = CallSignature::new("make", "Foo", vec![]);
        sig.throw = vec!["Oops".to_string()];
        let wrapper = ForwardWrapper::new(WrapperKind::Function, sig, &ctx).unwrap();
        let (text, _) = generate(&wrapper, &ctx);
        assert!(text.contains("    Foo retval;\n"), "{text}");
        assert!(text.contains("        retval = make();\n"), "{text}");

        let mut by_ref = CallSignature::new("peek", "Foo &", vec![]);
        by_ref.throw = vec!["Oops".to_string()];
        by_ref.reference_existing_object = true;
        let wrapper = ForwardWrapper::new(WrapperKind::Function, by_ref, &ctx).unwrap();
        let mut sink = MemorySink::new();
        let err = wrapper.generate(&mut sink, &ctx, "_wrap_peek", &[]).unwrap_err();
        assert!(matches!(err, CodegenError::NotSupported(_)), "{err}");
    }

    #[test]
    fn undeclared_exception_is_rejected() {
        let ctx = TypeContext::with_builtins(Settings::default());
        let mut sig = CallSignature::new("f", "void", vec![]);
        sig.throw = vec!["Missing".to_string()];
        let err = ForwardWrapper::new(WrapperKind::Function, sig, &ctx).unwrap_err();
        assert_eq!(err, CodegenError::config("exception Missing is not declared"));
    }

    #[test]
    fn unknown_type_fails_construction() {
        let ctx = TypeContext::with_builtins(Settings::default());
        let sig = CallSignature::new("f", "void", vec![ParamDecl::new("Mystery", "m")]);
        assert!(matches!(
            ForwardWrapper::new(WrapperKind::Function, sig, &ctx),
            Err(CodegenError::TypeLookup { .. })
        ));
    }

    #[test]
    fn no_constructor_init_reports_reason() {
        let mut sink = MemorySink::new();
        write_no_constructor(&mut sink, "PyFoo", "Foo", Some("private destructor"));
        assert_eq!(
            sink.flush(),
            "static int\n_wrap_PyFoo__tp_init(void)\n{\n    \
             PyErr_SetString(PyExc_TypeError, \"class 'Foo' cannot be constructed (private destructor)\");\n    \
             return -1;\n}\n"
        );
    }
}
