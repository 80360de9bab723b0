//! Virtual method proxies: native code calling into Python.
//!
//! A class that allows subclassing gets a C++ helper subclass. Every
//! virtual method of the class is overridden there by a proxy that looks
//! for a Python override on the wrapper object and calls it, falling back
//! to the C++ implementation when there is none.

use crate::block::CallSite;
use crate::codesink::{CodeSink, MemorySink, NullSink};
use crate::context::{ClassId, TypeContext};
use crate::ctype::{join_ctype_and_name, normalize_type_string};
use crate::error::{CodegenError, CodegenResult};
use crate::handlers::{Parameter, ReturnValue};
use crate::model::{CallSignature, Visibility};
use crate::wrapper::{c_string_escape, convert_error};

const FATAL_ERROR_RETURN: &str = concat!(
    "PyErr_Print();\n",
    "Py_FatalError(\"Error detected, but parent virtual is pure virtual or private virtual, ",
    "and return is a class without trivial constructor\");"
);

/// Override of one virtual method inside the helper class.
#[derive(Debug, Clone)]
pub struct VirtualProxy {
    pub class: ClassId,
    pub signature: CallSignature,
}

impl VirtualProxy {
    pub fn new(class: ClassId, signature: CallSignature, ctx: &TypeContext) -> CodegenResult<Self> {
        if !signature.is_virtual {
            return Err(CodegenError::config(format!(
                "{} is not virtual and cannot be overridden",
                signature.name
            )));
        }
        for param in &signature.params {
            Parameter::new(param, ctx)?;
        }
        ReturnValue::new(&signature, ctx)?;
        Ok(Self { class, signature })
    }

    fn params(&self, ctx: &TypeContext) -> CodegenResult<Vec<Parameter>> {
        self.signature
            .params
            .iter()
            .map(|decl| Parameter::new(decl, ctx))
            .collect()
    }

    fn prototype_params(params: &[Parameter]) -> String {
        params
            .iter()
            .map(|p| join_ctype_and_name(&p.ctype(), &p.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn const_suffix(&self) -> &'static str {
        if self.signature.is_const { " const" } else { "" }
    }

    /// `virtual int area() const;`, for the helper class body.
    pub fn write_declaration(&self, sink: &mut dyn CodeSink, ctx: &TypeContext) -> CodegenResult<()> {
        let params = self.params(ctx)?;
        let ret = ReturnValue::new(&self.signature, ctx)?;
        sink.writeln(&format!(
            "virtual {} {}({}){};",
            ret.requested.ctype(),
            self.signature.name,
            Self::prototype_params(&params),
            self.const_suffix()
        ));
        Ok(())
    }

    /// What the proxy returns when it cannot use the Python override.
    fn error_return(&self, ret: &ReturnValue, ctx: &TypeContext, call_args: &str) -> String {
        let unreachable_base = self.signature.is_pure_virtual || self.signature.visibility == Visibility::Private;
        if ret.is_void() {
            "return;".to_string()
        } else if unreachable_base {
            ret.error_return(ctx)
                .unwrap_or_else(|_| FATAL_ERROR_RETURN.to_string())
        } else {
            format!(
                "return {}::{}({call_args});",
                ctx.class(self.class).full_name,
                self.signature.name
            )
        }
    }

    /// Write the out-of-line definition `Helper::method(...) { ... }`.
    pub fn generate(&self, sink: &mut dyn CodeSink, ctx: &TypeContext, helper_name: &str) -> CodegenResult<()> {
        let class = ctx.class(self.class);
        let sig = &self.signature;
        let mut params = self.params(ctx)?;
        let mut ret = ReturnValue::new(sig, ctx)?;
        let call_args = params.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ");
        let error_return = self.error_return(&ret, ctx, &call_args);
        let mut site = CallSite::new(&error_return, &error_return);

        for p in &params {
            site.declarations.reserve_variable(&p.name);
        }
        site.declarations.reserve_variable("m_pyself");

        let gil = site
            .declarations
            .declare_variable("PyGILState_STATE", "__py_gil_state", None, None);
        let mut block = site.before_call();
        block.write_code(&format!(
            "{gil} = (PyEval_ThreadsInitialized() ? PyGILState_Ensure() : (PyGILState_STATE) 0);"
        ));
        block.add_cleanup(format!("if (PyEval_ThreadsInitialized())\n    PyGILState_Release({gil});"));

        site.declarations
            .declare_variable("PyObject *", "py_retval", None, None);
        if ret.requires_assignment_constructor() {
            ret.value = site.declarations.reserve_variable("retval");
        } else if !ret.is_void() {
            ret.value = site
                .declarations
                .declare_variable(&ret.ctype(ctx), "retval", None, None);
        }

        let python_name = c_string_escape(sig.python_name());
        let py_method = site
            .declarations
            .declare_variable("PyObject *", "py_method", None, None);
        let mut block = site.before_call();
        block.write_code(&format!(
            "{py_method} = PyObject_GetAttrString(m_pyself, (char *) \"{python_name}\"); PyErr_Clear();"
        ));
        block.add_cleanup(format!("Py_XDECREF({py_method});"));

        // No Python override: the attribute is missing or is our own
        // builtin method wrapper.
        block.write_code(&format!(
            "if ({py_method} == NULL || Py_TYPE({py_method}) == &PyCFunction_Type) {{"
        ));
        block.indent();
        if ret.is_void() {
            if !(sig.is_pure_virtual || sig.visibility == Visibility::Private) {
                block.write_code(&format!("{}::{}({call_args});", class.full_name, sig.name));
            }
            block.write_cleanup();
            block.write_code("return;");
        } else {
            block.write_error_return();
        }
        block.unindent();
        block.write_code("}");

        let self_obj_before = site.declarations.declare_variable(
            &format!("{} *", class.full_name),
            "self_obj_before",
            None,
            None,
        );
        let this_expression = if sig.is_const {
            format!("const_cast< {0}* >((const {0}*) this)", class.full_name)
        } else {
            format!("({}*) this", class.full_name)
        };
        let mut block = site.before_call();
        block.write_code(&format!(
            "{self_obj_before} = reinterpret_cast< {}* >(m_pyself)->obj;",
            class.pystruct
        ));
        block.write_code(&format!(
            "reinterpret_cast< {}* >(m_pyself)->obj = {this_expression};",
            class.pystruct
        ));
        block.add_cleanup(format!(
            "reinterpret_cast< {}* >(m_pyself)->obj = {self_obj_before};",
            class.pystruct
        ));

        for param in &mut params {
            param
                .c_to_python(&mut site, ctx)
                .map_err(|e| convert_error(&format!("c_to_python of parameter {}", param.name), e))?;
        }

        let mut call_params = vec!["m_pyself".to_string(), format!("(char *) \"{python_name}\"")];
        let mut built = site.build_params.render(false);
        built[0] = format!("(char *) {}", built[0]);
        call_params.extend(built);
        // Objects built with `N` belong to the argument tuple from here on.
        for handle in site.build_params.consumed_cleanups() {
            site.cancel(handle);
        }
        let mut block = site.before_call();
        block.write_code(&format!("py_retval = PyObject_CallMethod({});", call_params.join(", ")));
        block.write_error_check("py_retval == NULL", Some("PyErr_Print();"));
        block.add_cleanup("Py_DECREF(py_retval);");

        ret.python_to_c(&mut site, ctx)
            .map_err(|e| convert_error("python_to_c of the return value", e))?;

        if site.parse_params.is_empty() {
            site.before_call().write_error_check(
                "py_retval != Py_None",
                Some("PyErr_SetString(PyExc_TypeError, \"function/method should return None\");"),
            );
        } else {
            let mut parsed = site.parse_params.render()?;
            parsed[0] = format!("(char *) {}", parsed[0]);
            let mut block = site.before_call();
            block.write_code("py_retval = Py_BuildValue((char*) \"(N)\", py_retval);");
            block.write_error_check(
                &format!("!PyArg_ParseTuple(py_retval, {})", parsed.join(", ")),
                Some("PyErr_Print();"),
            );
        }

        let mut block = site.after_call();
        block.write_cleanup();
        if ret.is_void() {
            block.write_code("return;");
        } else {
            block.write_code(&format!("return {};", ret.value));
        }

        sink.writeln(&ret.requested.ctype());
        sink.writeln(&format!(
            "{helper_name}::{}({}){}",
            sig.name,
            Self::prototype_params(&params),
            self.const_suffix()
        ));
        sink.writeln("{");
        sink.indent();
        site.flush_to(sink);
        sink.unindent();
        sink.writeln("}");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helper class
// ---------------------------------------------------------------------------

/// The C++ subclass through which Python subclasses override virtual
/// methods.
#[derive(Debug, Clone)]
pub struct HelperClass {
    pub class: ClassId,
    pub name: String,
    constructors: Vec<CallSignature>,
    proxies: Vec<VirtualProxy>,
}

impl HelperClass {
    pub fn new(class: ClassId, name: impl Into<String>) -> Self {
        Self {
            class,
            name: name.into(),
            constructors: Vec::new(),
            proxies: Vec::new(),
        }
    }

    /// Replicate a constructor of the wrapped class.
    pub fn add_constructor(&mut self, signature: CallSignature) {
        self.constructors.push(signature);
    }

    /// Add a proxy after checking that it generates.
    pub fn add_virtual_method(&mut self, proxy: VirtualProxy, ctx: &TypeContext) -> CodegenResult<()> {
        proxy.generate(&mut NullSink, ctx, &self.name)?;
        self.proxies.push(proxy);
        Ok(())
    }

    pub fn proxies(&self) -> &[VirtualProxy] {
        &self.proxies
    }

    fn write_constructor(&self, sink: &mut dyn CodeSink, full_name: &str, signature: Option<&CallSignature>) {
        let params: Vec<(String, String)> = signature
            .map(|sig| {
                sig.params
                    .iter()
                    .map(|p| (normalize_type_string(&p.ctype), p.name.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let prototype = params
            .iter()
            .map(|(ctype, name)| join_ctype_and_name(ctype, name))
            .collect::<Vec<_>>()
            .join(", ");
        let args = params.iter().map(|(_, name)| name.as_str()).collect::<Vec<_>>().join(", ");
        sink.writeln(&format!("{}({prototype})", self.name));
        sink.writeln(&format!("    : {full_name}({args}), m_pyself(NULL)"));
        sink.writeln("    {}");
        sink.blank();
    }

    /// The class definition, with proxies declared but not defined.
    pub fn write_declaration(&self, sink: &mut dyn CodeSink, ctx: &TypeContext) -> CodegenResult<()> {
        let class = ctx.class(self.class);
        sink.writeln(&format!("class {} : public {}", self.name, class.full_name));
        sink.writeln("{");
        sink.writeln("public:");
        sink.indent();
        sink.writeln("PyObject *m_pyself;");
        if self.constructors.is_empty() {
            self.write_constructor(sink, &class.full_name, None);
        }
        for ctor in self.constructors.iter().filter(|c| c.visibility != Visibility::Private) {
            self.write_constructor(sink, &class.full_name, Some(ctor));
        }
        sink.writeln("void set_pyobj(PyObject *pyobj)");
        sink.writeln("{");
        sink.writeln("    Py_XDECREF(m_pyself);");
        sink.writeln("    Py_INCREF(pyobj);");
        sink.writeln("    m_pyself = pyobj;");
        sink.writeln("}");
        sink.blank();
        sink.writeln(&format!("virtual ~{}()", self.name));
        sink.writeln("{");
        sink.writeln("    Py_CLEAR(m_pyself);");
        sink.writeln("}");
        if !self.proxies.is_empty() {
            sink.blank();
        }
        for proxy in &self.proxies {
            proxy.write_declaration(sink, ctx)?;
        }
        sink.unindent();
        sink.writeln("};");
        Ok(())
    }

    /// Out-of-line definitions of every proxy.
    pub fn write_definitions(&self, sink: &mut dyn CodeSink, ctx: &TypeContext) -> CodegenResult<()> {
        for proxy in &self.proxies {
            let mut body = MemorySink::new();
            proxy.generate(&mut body, ctx, &self.name)?;
            body.flush_to(sink);
            sink.blank();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ClassInfo, Settings};
    use crate::model::ParamDecl;

    fn ctx_with_foo() -> (TypeContext, ClassId) {
        let settings = Settings::default();
        let mut ctx = TypeContext::with_builtins(settings.clone());
        let mut info = ClassInfo::new("Foo", None, &settings);
        info.allow_subclassing = true;
        info.helper_class = Some("PyFoo__PythonHelper".to_string());
        let id = ctx.add_class(info);
        (ctx, id)
    }

    fn virtual_sig(name: &str, ret: &str, params: Vec<ParamDecl>) -> CallSignature {
        let mut sig = CallSignature::new(name, ret, params);
        sig.is_virtual = true;
        sig
    }

    fn generate(proxy: &VirtualProxy, ctx: &TypeContext) -> String {
        let mut sink = MemorySink::new();
        proxy.generate(&mut sink, ctx, "PyFoo__PythonHelper").unwrap();
        sink.flush()
    }

    #[test]
    fn void_proxy_falls_back_to_base() {
        let (ctx, foo) = ctx_with_foo();
        let proxy = VirtualProxy::new(foo, virtual_sig("reset", "void", vec![]), &ctx).unwrap();
        assert_eq!(
            generate(&proxy, &ctx),
            "void
PyFoo__PythonHelper::reset()
{
    PyGILState_STATE __py_gil_state;
    PyObject *py_retval;
    PyObject *py_method;
    Foo *self_obj_before;

    __py_gil_state = (PyEval_ThreadsInitialized() ? PyGILState_Ensure() : (PyGILState_STATE) 0);
    py_method = PyObject_GetAttrString(m_pyself, (char *) \"reset\"); PyErr_Clear();
    if (py_method == NULL || Py_TYPE(py_method) == &PyCFunction_Type) {
        Foo::reset();
        Py_XDECREF(py_method);
        if (PyEval_ThreadsInitialized())
            PyGILState_Release(__py_gil_state);
        return;
    }
    self_obj_before = reinterpret_cast< PyFoo* >(m_pyself)->obj;
    reinterpret_cast< PyFoo* >(m_pyself)->obj = (Foo*) this;
    py_retval = PyObject_CallMethod(m_pyself, (char *) \"reset\", (char *) \"\");
    if (py_retval == NULL) {
        PyErr_Print();
        reinterpret_cast< PyFoo* >(m_pyself)->obj = self_obj_before;
        Py_XDECREF(py_method);
        if (PyEval_ThreadsInitialized())
            PyGILState_Release(__py_gil_state);
        return;
    }
    if (py_retval != Py_None) {
        PyErr_SetString(PyExc_TypeError, \"function/method should return None\");
        Py_DECREF(py_retval);
        reinterpret_cast< PyFoo* >(m_pyself)->obj = self_obj_before;
        Py_XDECREF(py_method);
        if (PyEval_ThreadsInitialized())
            PyGILState_Release(__py_gil_state);
        return;
    }
    Py_DECREF(py_retval);
    reinterpret_cast< PyFoo* >(m_pyself)->obj = self_obj_before;
    Py_XDECREF(py_method);
    if (PyEval_ThreadsInitialized())
        PyGILState_Release(__py_gil_state);
    return;
}
"
        );
    }

    #[test]
    fn const_proxy_parses_result() {
        let (ctx, foo) = ctx_with_foo();
        let mut sig = virtual_sig("scale", "double", vec![ParamDecl::new("int", "factor")]);
        sig.is_const = true;
        let proxy = VirtualProxy::new(foo, sig, &ctx).unwrap();
        let text = generate(&proxy, &ctx);
        assert!(text.starts_with("double\nPyFoo__PythonHelper::scale(int factor) const\n{\n"), "{text}");
        assert!(text.contains("        return Foo::scale(factor);\n"), "{text}");
        assert!(text.contains("= const_cast< Foo* >((const Foo*) this);"), "{text}");
        assert!(
            text.contains("py_retval = PyObject_CallMethod(m_pyself, (char *) \"scale\", (char *) \"i\", factor);"),
            "{text}"
        );
        assert!(text.contains("py_retval = Py_BuildValue((char*) \"(N)\", py_retval);"), "{text}");
        assert!(
            text.contains("if (!PyArg_ParseTuple(py_retval, (char *) \"d\", &retval)) {\n        PyErr_Print();"),
            "{text}"
        );
        assert!(text.ends_with("    return retval;\n}\n"), "{text}");
    }

    #[test]
    fn pure_virtual_returns_error_value() {
        let (ctx, foo) = ctx_with_foo();
        let mut sig = virtual_sig("area", "int", vec![]);
        sig.is_pure_virtual = true;
        let proxy = VirtualProxy::new(foo, sig, &ctx).unwrap();
        let text = generate(&proxy, &ctx);
        assert!(!text.contains("Foo::area()"), "{text}");
        assert!(text.contains("        return INT_MIN;\n    }"), "{text}");
    }

    #[test]
    fn pure_virtual_returning_abstract_class_is_fatal() {
        let (mut ctx, foo) = ctx_with_foo();
        let bar = ctx.add_class(ClassInfo::new("Bar", None, &Settings::default()));
        ctx.class_mut(bar).has_pure_virtual_methods = true;
        let mut sig = virtual_sig("make", "Bar", vec![]);
        sig.is_pure_virtual = true;
        let proxy = VirtualProxy::new(foo, sig, &ctx).unwrap();
        let text = generate(&proxy, &ctx);
        assert!(text.contains("Py_FatalError(\"Error detected"), "{text}");
    }

    #[test]
    fn non_virtual_method_is_rejected() {
        let (ctx, foo) = ctx_with_foo();
        let err = VirtualProxy::new(foo, CallSignature::new("f", "void", vec![]), &ctx).unwrap_err();
        assert!(matches!(err, CodegenError::TypeConfiguration(_)));
    }

    #[test]
    fn helper_class_declaration() {
        let (ctx, foo) = ctx_with_foo();
        let mut helper = HelperClass::new(foo, "PyFoo__PythonHelper");
        helper.add_constructor(CallSignature::new("Foo", "void", vec![ParamDecl::new("int", "x")]));
        let mut sig = virtual_sig("area", "double", vec![]);
        sig.is_const = true;
        helper
            .add_virtual_method(VirtualProxy::new(foo, sig, &ctx).unwrap(), &ctx)
            .unwrap();
        let mut sink = MemorySink::new();
        helper.write_declaration(&mut sink, &ctx).unwrap();
        assert_eq!(
            sink.flush(),
            "class PyFoo__PythonHelper : public Foo
{
public:
    PyObject *m_pyself;
    PyFoo__PythonHelper(int x)
        : Foo(x), m_pyself(NULL)
        {}

    void set_pyobj(PyObject *pyobj)
    {
        Py_XDECREF(m_pyself);
        Py_INCREF(pyobj);
        m_pyself = pyobj;
    }

    virtual ~PyFoo__PythonHelper()
    {
        Py_CLEAR(m_pyself);
    }

    virtual double area() const;
};
"
        );
    }

    #[test]
    fn helper_rejects_proxy_that_cannot_generate() {
        let (ctx, foo) = ctx_with_foo();
        let mut helper = HelperClass::new(foo, "PyFoo__PythonHelper");
        let proxy = VirtualProxy::new(foo, virtual_sig("self_ref", "Foo &", vec![]), &ctx).unwrap();
        let err = helper.add_virtual_method(proxy, &ctx).unwrap_err();
        assert!(matches!(err, CodegenError::NotSupported(_)));
        assert!(helper.proxies().is_empty());
    }
}
