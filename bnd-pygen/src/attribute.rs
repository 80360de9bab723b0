//! Class attributes: a getter and an optional setter per data member,
//! listed in a `PyGetSetDef` table.
//!
//! A getter builds its result with the return value handlers, as a wrapper
//! returning the member would. A setter parses the assigned object with the
//! same handlers in the other direction, the way a virtual proxy parses
//! what a Python override returned. Instance attributes go in the class's
//! `tp_getset`; static ones in the getset table of a metaclass, so they are
//! reached through the class object.

use crate::block::CallSite;
use crate::codesink::CodeSink;
use crate::context::{ClassId, ClassInfo, TypeContext};
use crate::error::{CodegenError, CodegenResult};
use crate::handlers::ReturnValue;
use crate::model::{AttributeDecl, CallSignature};
use crate::wrapper::{c_string_escape, convert_error, write_build_return};

/// One row of a getset table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSetEntry {
    pub name: String,
    pub getter: String,
    /// `None` makes the attribute read-only.
    pub setter: Option<String>,
}

/// A wrapped data member of a class.
#[derive(Debug, Clone)]
pub struct AttributeWrapper {
    pub class: ClassId,
    pub decl: AttributeDecl,
}

impl AttributeWrapper {
    /// Check the declaration and that its type resolves.
    pub fn new(class: ClassId, decl: AttributeDecl, ctx: &TypeContext) -> CodegenResult<Self> {
        if decl.is_static && (decl.getter.is_some() || decl.setter.is_some()) {
            return Err(CodegenError::config(format!(
                "static attribute {} cannot use accessor methods",
                decl.name
            )));
        }
        if decl.read_only && decl.setter.is_some() {
            return Err(CodegenError::config(format!(
                "read-only attribute {} has a setter",
                decl.name
            )));
        }
        let wrapper = Self { class, decl };
        if wrapper.value_type(ctx)?.is_void() {
            return Err(CodegenError::config(format!(
                "attribute {} has type void",
                wrapper.decl.name
            )));
        }
        Ok(wrapper)
    }

    pub fn python_name(&self) -> &str {
        self.decl.python_name()
    }

    pub fn is_static(&self) -> bool {
        self.decl.is_static
    }

    pub fn is_read_only(&self) -> bool {
        self.decl.read_only
    }

    /// The member as seen by the return value handlers. It stays owned by
    /// the object holding it, so pointers to classes are copied.
    fn value_type(&self, ctx: &TypeContext) -> CodegenResult<ReturnValue> {
        let mut sig = CallSignature::new(&self.decl.name, &self.decl.ctype, Vec::new());
        sig.caller_owns_return = Some(false);
        ReturnValue::new(&sig, ctx)
    }

    fn member(&self, class: &ClassInfo) -> String {
        if self.decl.is_static {
            format!("{}::{}", class.full_name, self.decl.name)
        } else {
            format!("self->obj->{}", self.decl.name)
        }
    }

    fn self_param(&self, class: &ClassInfo) -> String {
        if self.decl.is_static {
            "PyObject * PYBINDGEN_UNUSED(obj)".to_string()
        } else {
            format!("{} *self", class.pystruct)
        }
    }

    pub fn getter_name(&self, ctx: &TypeContext) -> String {
        format!("_wrap_{}__get_{}", ctx.class(self.class).pystruct, self.decl.name)
    }

    pub fn setter_name(&self, ctx: &TypeContext) -> String {
        format!("_wrap_{}__set_{}", ctx.class(self.class).pystruct, self.decl.name)
    }

    /// Write the getter and return its name.
    pub fn generate_getter(&self, sink: &mut dyn CodeSink, ctx: &TypeContext) -> CodegenResult<String> {
        let class = ctx.class(self.class);
        let mut ret = self.value_type(ctx)?;
        ret.value = match &self.decl.getter {
            Some(getter) => format!("self->obj->{getter}()"),
            None => self.member(class),
        };

        let mut site = CallSite::new("return NULL;", "return NULL;");
        site.declarations
            .declare_variable("PyObject *", "py_retval", None, None);
        ret.c_to_python(&mut site, ctx)
            .map_err(|e| convert_error(&format!("c_to_python of attribute {}", self.decl.name), e))?;
        write_build_return(&mut site);

        let name = self.getter_name(ctx);
        sink.writeln("static PyObject *");
        sink.writeln(&format!(
            "{name}({}, void * PYBINDGEN_UNUSED(closure))",
            self.self_param(class)
        ));
        sink.writeln("{");
        sink.indent();
        site.flush_to(sink);
        sink.unindent();
        sink.writeln("}");
        Ok(name)
    }

    /// Write the setter and return its name; `None` for read-only
    /// attributes.
    pub fn generate_setter(&self, sink: &mut dyn CodeSink, ctx: &TypeContext) -> CodegenResult<Option<String>> {
        if self.decl.read_only {
            return Ok(None);
        }
        let class = ctx.class(self.class);
        let mut ret = self.value_type(ctx)?;

        let mut site = CallSite::new("return -1;", "return -1;");
        let py_args = site
            .declarations
            .declare_variable("PyObject *", "py_args", None, None);
        // Parsed into a local first: handlers name helper locals after it.
        ret.value = if ret.requires_assignment_constructor() {
            site.declarations.reserve_variable("tmp_value")
        } else {
            site.declarations
                .declare_variable(&ret.ctype(ctx), "tmp_value", None, None)
        };

        {
            let mut block = site.before_call();
            block.write_error_check(
                "value == NULL",
                Some(&format!(
                    "PyErr_SetString(PyExc_AttributeError, \"cannot delete attribute '{}'\");",
                    c_string_escape(self.python_name())
                )),
            );
            block.write_code(&format!("{py_args} = Py_BuildValue((char *) \"(O)\", value);"));
            block.add_cleanup(format!("Py_DECREF({py_args});"));
        }

        ret.python_to_c(&mut site, ctx)
            .map_err(|e| convert_error(&format!("python_to_c of attribute {}", self.decl.name), e))?;
        let mut parsed = site.parse_params.render()?;
        parsed[0] = format!("(char *) {}", parsed[0]);
        site.before_call().write_error_check(
            &format!("!PyArg_ParseTuple({py_args}, {})", parsed.join(", ")),
            None,
        );

        let store = match &self.decl.setter {
            Some(setter) => format!("self->obj->{setter}({});", ret.value),
            None => format!("{} = {};", self.member(class), ret.value),
        };
        let mut after = site.after_call();
        after.write_code(&store);
        after.write_cleanup();
        after.write_code("return 0;");

        let name = self.setter_name(ctx);
        sink.writeln("static int");
        sink.writeln(&format!(
            "{name}({}, PyObject *value, void * PYBINDGEN_UNUSED(closure))",
            self.self_param(class)
        ));
        sink.writeln("{");
        sink.indent();
        site.flush_to(sink);
        sink.unindent();
        sink.writeln("}");
        Ok(Some(name))
    }
}

/// `static PyGetSetDef <cname>[] = { ... };`
pub fn write_getset_table(sink: &mut dyn CodeSink, cname: &str, entries: &[GetSetEntry]) {
    sink.writeln(&format!("static PyGetSetDef {cname}[] = {{"));
    sink.indent();
    for entry in entries {
        sink.writeln("{");
        sink.indent();
        sink.writeln(&format!("(char*) \"{}\", /* attribute name */", entry.name));
        sink.writeln(&format!("(getter) {}, /* C function to get the attribute */", entry.getter));
        sink.writeln(&format!(
            "(setter) {}, /* C function to set the attribute */",
            entry.setter.as_deref().unwrap_or("NULL")
        ));
        sink.writeln("NULL, /* optional doc string */");
        sink.writeln("NULL /* optional additional data for getter and setter */");
        sink.unindent();
        sink.writeln("},");
    }
    sink.writeln("{ NULL, NULL, NULL, NULL, NULL }");
    sink.unindent();
    sink.writeln("};");
}
