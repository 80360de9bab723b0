//! Emitter: extracted module → CPython extension module source text.
//!
//! Layout of the generated file: preamble, forward declarations of every
//! wrapper struct, helper classes, module functions, one section per class,
//! and finally the module definition with its init function.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::attribute::{write_getset_table, GetSetEntry};
use crate::block::{CallSite, DeclarationsScope};
use crate::codesink::{CodeSink, MemorySink};
use crate::context::{ClassInfo, ContainerInfo, TypeContext};
use crate::ctype::join_ctype_and_name;
use crate::diagnostics::{Warning, WarningCategory, WarningSink};
use crate::error::Skip;
use crate::extract::{ClassDef, ModuleDef};
use crate::overload::{GroupState, OverloadGroup};
use crate::wrapper::write_no_constructor;
use crate::wrapper_registry::WrapperRegistryKind;

/// Emit the whole module. Groups that fail are reported to `warnings` and
/// left out of the output.
pub fn emit_module(module: &mut ModuleDef, warnings: &mut dyn WarningSink) -> Result<String> {
    let ModuleDef {
        name,
        includes,
        ctx,
        functions,
        classes,
    } = module;
    let ctx = &*ctx;
    let mut out = MemorySink::new();

    emit_preamble(&mut out, includes, ctx);
    emit_forward_declarations(&mut out, ctx);

    for class in classes.iter() {
        if let Some(helper) = &class.helper {
            out.blank();
            helper
                .write_declaration(&mut out, ctx)
                .and_then(|()| {
                    out.blank();
                    helper.write_definitions(&mut out, ctx)
                })
                .with_context(|| format!("emitting helper class {}", helper.name))?;
            debug!(helper = %helper.name, proxies = helper.proxies().len(), "emitted helper class");
        }
    }

    out.blank();
    out.writeln("/* --- module functions --- */");
    let function_defs = emit_groups(&mut out, functions, ctx, "", warnings);
    out.blank();
    write_method_table(&mut out, &format!("{name}_functions"), &function_defs);

    if !classes.is_empty() {
        out.blank();
        out.writeln("/* --- classes --- */");
    }
    for class in classes.iter_mut() {
        emit_class(&mut out, name, class, ctx, warnings);
    }

    out.blank();
    emit_module_init(&mut out, name, ctx);

    info!(
        module = %name,
        functions = function_defs.len(),
        classes = classes.len(),
        "emitted module"
    );
    Ok(out.flush())
}

// ---------------------------------------------------------------------------
// Preamble and forward declarations
// ---------------------------------------------------------------------------

const WRAPPER_FLAGS: &str = "\
typedef enum _PyBindGenWrapperFlags {
   PYBINDGEN_WRAPPER_FLAG_NONE = 0,
   PYBINDGEN_WRAPPER_FLAG_OBJECT_NOT_OWNED = (1<<0),
} PyBindGenWrapperFlags;";

const UNUSED_MACRO: &str = "\
#if defined(__GNUC__) && __GNUC__ > 2
# define PYBINDGEN_UNUSED(param) param __attribute__((__unused__))
#else
# define PYBINDGEN_UNUSED(param) param
#endif";

fn emit_preamble(sink: &mut dyn CodeSink, includes: &[String], ctx: &TypeContext) {
    sink.writeln("/* This file was generated by bnd-pygen. */");
    sink.blank();
    sink.writeln("#define PY_SSIZE_T_CLEAN");
    sink.writeln("#include <Python.h>");
    sink.writeln("#include <stddef.h>");
    sink.writeln("#include <climits>");
    sink.writeln("#include <string>");
    sink.writeln("#include <typeinfo>");
    if ctx.settings.wrapper_registry == WrapperRegistryKind::StdMap {
        sink.writeln("#include <map>");
    }
    for include in includes {
        sink.writeln(&format!("#include {include}"));
    }
    sink.blank();
    sink.writeln(UNUSED_MACRO);
    sink.blank();
    sink.writeln(WRAPPER_FLAGS);
}

fn emit_forward_declarations(sink: &mut dyn CodeSink, ctx: &TypeContext) {
    sink.blank();
    sink.writeln("/* --- forward declarations --- */");
    for (_, class) in ctx.classes() {
        sink.blank();
        write_class_struct(sink, class);
        sink.blank();
        sink.writeln(&format!("extern PyTypeObject {};", class.pytypestruct));
        class.registry.write_definition(sink);
    }
    for (_, container) in ctx.containers() {
        sink.blank();
        write_container_struct(sink, container);
    }
    if ctx.exceptions().next().is_some() {
        sink.blank();
    }
    for (_, exc) in ctx.exceptions() {
        sink.writeln(&format!("PyTypeObject *{};", exc.pytypestruct));
    }
}

fn write_class_struct(sink: &mut dyn CodeSink, class: &ClassInfo) {
    sink.writeln("typedef struct {");
    sink.indent();
    sink.writeln("PyObject_HEAD");
    sink.writeln(&format!("{};", join_ctype_and_name(&format!("{} *", class.full_name), "obj")));
    if class.allow_subclassing {
        sink.writeln("PyObject *inst_dict;");
    }
    sink.writeln("PyBindGenWrapperFlags flags:8;");
    sink.unindent();
    sink.writeln(&format!("}} {};", class.pystruct));
}

/// Container wrappers are only declared here. Their type object and `O&`
/// converter come from the including code.
fn write_container_struct(sink: &mut dyn CodeSink, container: &ContainerInfo) {
    let pointer = format!("{} *", container.full_name);
    sink.writeln("typedef struct {");
    sink.indent();
    sink.writeln("PyObject_HEAD");
    sink.writeln(&format!("{};", join_ctype_and_name(&pointer, "obj")));
    sink.unindent();
    sink.writeln(&format!("}} {};", container.pystruct));
    sink.blank();
    sink.writeln(&format!("extern PyTypeObject {};", container.pytypestruct));
    sink.writeln(&format!(
        "int {}(PyObject *value, {});",
        container.python_to_c_converter,
        join_ctype_and_name(&pointer, "address")
    ));
}

// ---------------------------------------------------------------------------
// Overload groups
// ---------------------------------------------------------------------------

/// Emit every group, prototypes first, and return the method table entries
/// of those that generated.
fn emit_groups(
    sink: &mut dyn CodeSink,
    groups: &mut [OverloadGroup],
    ctx: &TypeContext,
    scope: &str,
    warnings: &mut dyn WarningSink,
) -> Vec<String> {
    let mut prototypes = Vec::new();
    let mut defs = Vec::new();
    let mut body = MemorySink::new();
    for group in groups.iter_mut() {
        let mut out = MemorySink::new();
        match group.generate(&mut out, ctx, warnings) {
            Ok(_) => {
                prototypes.extend(group.declaration(ctx));
                defs.extend(group.method_def());
                body.blank();
                out.flush_to(&mut body);
            }
            Err(skip) => skipped_group(warnings, scope, skip),
        }
    }
    if !prototypes.is_empty() {
        sink.blank();
    }
    for prototype in &prototypes {
        sink.writeln(prototype);
    }
    body.flush_to(sink);
    defs
}

fn skipped_group(warnings: &mut dyn WarningSink, scope: &str, skip: Skip) {
    let location = if scope.is_empty() {
        skip.name
    } else {
        format!("{scope}.{}", skip.name)
    };
    warnings.warn(Warning::new(WarningCategory::SkippedGroup, skip.reason.to_string()).at(location));
}

fn write_method_table(sink: &mut dyn CodeSink, table: &str, defs: &[String]) {
    sink.writeln(&format!("static PyMethodDef {table}[] = {{"));
    sink.indent();
    for def in defs {
        sink.writeln(def);
    }
    sink.writeln("{NULL, NULL, 0, NULL}");
    sink.unindent();
    sink.writeln("};");
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

fn emit_class(
    sink: &mut dyn CodeSink,
    module_name: &str,
    class_def: &mut ClassDef,
    ctx: &TypeContext,
    warnings: &mut dyn WarningSink,
) {
    let class = ctx.class(class_def.id);
    sink.blank();

    let mut has_init = false;
    if class_def.constructors.state() != GroupState::Empty {
        let mut out = MemorySink::new();
        match class_def.constructors.generate(&mut out, ctx, warnings) {
            Ok(_) => {
                out.flush_to(sink);
                has_init = true;
            }
            Err(skip) => skipped_group(warnings, &class.python_name, skip),
        }
    }
    if !has_init {
        write_no_constructor(
            sink,
            &class.pystruct,
            &class.python_name,
            class.cannot_be_constructed.as_deref(),
        );
    }

    let defs = emit_groups(sink, &mut class_def.methods, ctx, &class.python_name, warnings);
    let methods_table = format!("{}_methods", class.pystruct);
    sink.blank();
    write_method_table(sink, &methods_table, &defs);

    let getsets = emit_attributes(sink, class_def, ctx, false, warnings);
    if let Some(metaclass) = &class.metaclass {
        let meta = class.metaclass_struct();
        let static_getsets = emit_attributes(sink, class_def, ctx, true, warnings);
        sink.blank();
        TypeObject {
            typestruct: metaclass,
            tp_name: format!("{module_name}.{}Meta", class.python_name),
            tp_getset: static_getsets.unwrap_or_else(|| format!("{meta}__getsets")),
            ..TypeObject::metaclass()
        }
        .write(sink);
    }

    if class.allow_subclassing {
        sink.blank();
        write_gc_slots(sink, class, class_def.helper.as_ref().map(|h| h.name.as_str()));
    }
    sink.blank();
    write_dealloc(sink, class);

    let mut flags = "Py_TPFLAGS_DEFAULT".to_string();
    let (traverse, clear, dictoffset) = if class.allow_subclassing {
        flags.push_str("|Py_TPFLAGS_HAVE_GC|Py_TPFLAGS_BASETYPE");
        (
            format!("{}__tp_traverse", class.pystruct),
            format!("{}__tp_clear", class.pystruct),
            format!("offsetof({}, inst_dict)", class.pystruct),
        )
    } else {
        ("NULL".to_string(), "NULL".to_string(), "0".to_string())
    };
    sink.blank();
    TypeObject {
        ob_type: match &class.metaclass {
            Some(metaclass) => format!("&{metaclass}"),
            None => "NULL".to_string(),
        },
        typestruct: &class.pytypestruct,
        tp_name: format!("{module_name}.{}", class.python_name),
        tp_basicsize: format!("sizeof({})", class.pystruct),
        tp_dealloc: format!("_wrap_{}__tp_dealloc", class.pystruct),
        tp_flags: flags,
        tp_traverse: traverse,
        tp_clear: clear,
        tp_methods: methods_table,
        tp_getset: getsets.unwrap_or_else(|| "0".to_string()),
        tp_dictoffset: dictoffset,
        tp_init: format!("_wrap_{}__tp_init", class.pystruct),
        tp_alloc: "PyType_GenericAlloc".to_string(),
        tp_new: "PyType_GenericNew".to_string(),
    }
    .write(sink);

    debug!(
        class = %class.full_name,
        methods = defs.len(),
        attributes = class_def.attributes.len(),
        constructible = has_init,
        "emitted class"
    );
}

/// Emit the accessors of either the instance or the static attributes,
/// then their getset table. Returns the table name; `None` when there is no
/// instance attribute, or the class has no metaclass for static ones.
///
/// An attribute whose getter fails is left out. One whose setter fails is
/// kept read-only.
fn emit_attributes(
    sink: &mut dyn CodeSink,
    class_def: &ClassDef,
    ctx: &TypeContext,
    statics: bool,
    warnings: &mut dyn WarningSink,
) -> Option<String> {
    let class = ctx.class(class_def.id);
    let table = if statics {
        class.metaclass.as_ref()?;
        format!("{}__getsets", class.metaclass_struct())
    } else {
        format!("{}__getsets", class.pystruct)
    };

    let mut entries = Vec::new();
    for attribute in class_def.attributes.iter().filter(|a| a.is_static() == statics) {
        let location = format!("{}.{}", class.python_name, attribute.python_name());
        let mut getter_out = MemorySink::new();
        let getter = match attribute.generate_getter(&mut getter_out, ctx) {
            Ok(getter) => getter,
            Err(e) => {
                warnings.warn(Warning::new(WarningCategory::SkippedDeclaration, e.to_string()).at(location));
                continue;
            }
        };
        let mut setter_out = MemorySink::new();
        let setter = match attribute.generate_setter(&mut setter_out, ctx) {
            Ok(setter) => setter,
            Err(e) => {
                let message = format!("setter left out: {e}");
                warnings.warn(Warning::new(WarningCategory::SkippedDeclaration, message).at(location));
                None
            }
        };
        sink.blank();
        getter_out.flush_to(sink);
        if setter.is_some() {
            sink.blank();
            setter_out.flush_to(sink);
        }
        entries.push(GetSetEntry {
            name: attribute.python_name().to_string(),
            getter,
            setter,
        });
    }
    if entries.is_empty() && !statics {
        return None;
    }
    sink.blank();
    write_getset_table(sink, &table, &entries);
    Some(table)
}

/// Release the native object unless the wrapper does not own it.
fn write_release_object(sink: &mut dyn CodeSink, class: &ClassInfo) {
    let pointer = format!("{} *", class.full_name);
    sink.writeln(&format!("{} = self->obj;", join_ctype_and_name(&pointer, "tmp")));
    sink.writeln("self->obj = NULL;");
    sink.writeln("if (!(self->flags&PYBINDGEN_WRAPPER_FLAG_OBJECT_NOT_OWNED)) {");
    sink.indent();
    sink.writeln(&class.memory_policy.free_code("tmp"));
    sink.unindent();
    sink.writeln("}");
}

fn write_gc_slots(sink: &mut dyn CodeSink, class: &ClassInfo, helper: Option<&str>) {
    let pystruct = &class.pystruct;
    sink.writeln("static int");
    sink.writeln(&format!("{pystruct}__tp_clear({pystruct} *self)"));
    sink.writeln("{");
    sink.indent();
    sink.writeln("Py_CLEAR(self->inst_dict);");
    write_release_object(sink, class);
    sink.writeln("return 0;");
    sink.unindent();
    sink.writeln("}");
    sink.blank();
    sink.writeln("static int");
    sink.writeln(&format!("{pystruct}__tp_traverse({pystruct} *self, visitproc visit, void *arg)"));
    sink.writeln("{");
    sink.indent();
    sink.writeln("Py_VISIT(self->inst_dict);");
    if let Some(helper) = helper {
        sink.writeln(&format!(
            "if (self->obj && typeid(*self->obj).name() == typeid({helper}).name()) {{"
        ));
        sink.writeln(&format!("    Py_VISIT((({helper} *) self->obj)->m_pyself);"));
        sink.writeln("}");
    }
    sink.writeln("return 0;");
    sink.unindent();
    sink.writeln("}");
}

fn write_dealloc(sink: &mut dyn CodeSink, class: &ClassInfo) {
    let pystruct = &class.pystruct;
    let mut declarations = DeclarationsScope::new();
    let unregister = class.registry.unregister_code(&mut declarations, "self");

    sink.writeln("static void");
    sink.writeln(&format!("_wrap_{pystruct}__tp_dealloc({pystruct} *self)"));
    sink.writeln("{");
    sink.indent();
    declarations.sink().flush_to(sink);
    if let Some(unregister) = unregister {
        sink.writeln(&unregister);
    }
    if class.allow_subclassing {
        sink.writeln("PyObject_GC_UnTrack(self);");
        sink.writeln(&format!("{pystruct}__tp_clear(self);"));
    } else {
        write_release_object(sink, class);
    }
    sink.writeln("Py_TYPE(self)->tp_free((PyObject*)self);");
    sink.unindent();
    sink.writeln("}");
}

/// The slots of a `PyTypeObject` that wrapped classes fill in; every other
/// slot keeps its default.
struct TypeObject<'a> {
    /// Metaclass, `NULL` for `type`.
    ob_type: String,
    typestruct: &'a str,
    tp_name: String,
    tp_basicsize: String,
    tp_dealloc: String,
    tp_flags: String,
    tp_traverse: String,
    tp_clear: String,
    tp_methods: String,
    tp_getset: String,
    tp_dictoffset: String,
    tp_init: String,
    tp_alloc: String,
    tp_new: String,
}

impl TypeObject<'_> {
    /// Slots of a metaclass deriving from `type`. Everything left `NULL` is
    /// inherited in `PyType_Ready`; the base is set at module init.
    fn metaclass() -> Self {
        Self {
            ob_type: "NULL".to_string(),
            typestruct: "",
            tp_name: String::new(),
            tp_basicsize: "0".to_string(),
            tp_dealloc: "NULL".to_string(),
            tp_flags: "Py_TPFLAGS_DEFAULT|Py_TPFLAGS_BASETYPE".to_string(),
            tp_traverse: "NULL".to_string(),
            tp_clear: "NULL".to_string(),
            tp_methods: "NULL".to_string(),
            tp_getset: "0".to_string(),
            tp_dictoffset: "0".to_string(),
            tp_init: "NULL".to_string(),
            tp_alloc: "NULL".to_string(),
            tp_new: "NULL".to_string(),
        }
    }

    fn write(&self, sink: &mut dyn CodeSink) {
        let slots = [
            (format!("(char *) \"{}\"", self.tp_name), "tp_name"),
            (self.tp_basicsize.clone(), "tp_basicsize"),
            ("0".into(), "tp_itemsize"),
            (format!("(destructor){}", self.tp_dealloc), "tp_dealloc"),
            ("0".into(), "tp_vectorcall_offset"),
            ("(getattrfunc)NULL".into(), "tp_getattr"),
            ("(setattrfunc)NULL".into(), "tp_setattr"),
            ("NULL".into(), "tp_as_async"),
            ("(reprfunc)NULL".into(), "tp_repr"),
            ("(PyNumberMethods*)NULL".into(), "tp_as_number"),
            ("(PySequenceMethods*)NULL".into(), "tp_as_sequence"),
            ("(PyMappingMethods*)NULL".into(), "tp_as_mapping"),
            ("(hashfunc)NULL".into(), "tp_hash"),
            ("(ternaryfunc)NULL".into(), "tp_call"),
            ("(reprfunc)NULL".into(), "tp_str"),
            ("(getattrofunc)NULL".into(), "tp_getattro"),
            ("(setattrofunc)NULL".into(), "tp_setattro"),
            ("(PyBufferProcs*)NULL".into(), "tp_as_buffer"),
            (self.tp_flags.clone(), "tp_flags"),
            ("NULL".into(), "tp_doc"),
            (format!("(traverseproc){}", self.tp_traverse), "tp_traverse"),
            (format!("(inquiry){}", self.tp_clear), "tp_clear"),
            ("(richcmpfunc)NULL".into(), "tp_richcompare"),
            ("0".into(), "tp_weaklistoffset"),
            ("(getiterfunc)NULL".into(), "tp_iter"),
            ("(iternextfunc)NULL".into(), "tp_iternext"),
            (format!("(struct PyMethodDef*){}", self.tp_methods), "tp_methods"),
            ("(struct PyMemberDef*)0".into(), "tp_members"),
            (format!("(struct PyGetSetDef*){}", self.tp_getset), "tp_getset"),
            ("NULL".into(), "tp_base"),
            ("NULL".into(), "tp_dict"),
            ("(descrgetfunc)NULL".into(), "tp_descr_get"),
            ("(descrsetfunc)NULL".into(), "tp_descr_set"),
            (self.tp_dictoffset.clone(), "tp_dictoffset"),
            (format!("(initproc){}", self.tp_init), "tp_init"),
            (format!("(allocfunc){}", self.tp_alloc), "tp_alloc"),
            (format!("(newfunc){}", self.tp_new), "tp_new"),
            ("(freefunc)0".into(), "tp_free"),
            ("(inquiry)NULL".into(), "tp_is_gc"),
        ];
        sink.writeln(&format!("PyTypeObject {} = {{", self.typestruct));
        sink.indent();
        sink.writeln(&format!("PyVarObject_HEAD_INIT({}, 0)", self.ob_type));
        for (value, slot) in &slots {
            sink.writeln(&format!("{value}, /* {slot} */"));
        }
        sink.unindent();
        sink.writeln("};");
    }
}

// ---------------------------------------------------------------------------
// Module init
// ---------------------------------------------------------------------------

fn emit_module_init(sink: &mut dyn CodeSink, name: &str, ctx: &TypeContext) {
    sink.writeln(&format!("static struct PyModuleDef {name}_moduledef = {{"));
    sink.indent();
    sink.writeln("PyModuleDef_HEAD_INIT,");
    sink.writeln(&format!("\"{name}\","));
    sink.writeln("NULL,");
    sink.writeln("-1,");
    sink.writeln(&format!("{name}_functions,"));
    sink.unindent();
    sink.writeln("};");
    sink.blank();

    let mut site = CallSite::new("return NULL;", "return NULL;");
    let m = site.declarations.declare_variable("PyObject *", "m", None, None);
    {
        let mut before = site.before_call();
        before.write_code(&format!("{m} = PyModule_Create(&{name}_moduledef);"));
        before.write_error_check(&format!("{m} == NULL"), None);
        before.add_cleanup(format!("Py_DECREF({m});"));
    }
    {
        let mut after = site.after_call();
        for (_, exc) in ctx.exceptions() {
            let base = match exc.base {
                Some(id) => format!("(PyObject*) {}", ctx.exception(id).pytypestruct),
                None => "NULL".to_string(),
            };
            after.write_code(&format!("/* Register the '{}' exception */", exc.full_name));
            after.write_error_check(
                &format!(
                    "({ts} = (PyTypeObject*) PyErr_NewException((char*)\"{name}.{py}\", {base}, NULL)) == NULL",
                    ts = exc.pytypestruct,
                    py = exc.python_name
                ),
                None,
            );
            after.write_code(&format!("Py_INCREF((PyObject *) {});", exc.pytypestruct));
            after.write_code(&format!(
                "PyModule_AddObject({m}, (char *) \"{}\", (PyObject *) {});",
                exc.python_name, exc.pytypestruct
            ));
        }
        for (_, class) in ctx.classes() {
            after.write_code(&format!("/* Register the '{}' class */", class.full_name));
            if let Some(metaclass) = &class.metaclass {
                after.write_code(&format!("{metaclass}.tp_base = &PyType_Type;"));
                after.write_code(&format!("{metaclass}.tp_setattro = PyObject_GenericSetAttr;"));
                after.write_error_check(&format!("PyType_Ready(&{metaclass})"), None);
            }
            after.write_error_check(&format!("PyType_Ready(&{})", class.pytypestruct), None);
            after.write_code(&format!(
                "PyModule_AddObject({m}, (char *) \"{}\", (PyObject *) &{});",
                class.python_name, class.pytypestruct
            ));
        }
        for (_, container) in ctx.containers() {
            after.write_code(&format!("/* Register the '{}' container */", container.full_name));
            after.write_error_check(&format!("PyType_Ready(&{})", container.pytypestruct), None);
            after.write_code(&format!(
                "PyModule_AddObject({m}, (char *) \"{}\", (PyObject *) &{});",
                container.name, container.pytypestruct
            ));
        }
        for (_, e) in ctx.enums() {
            let scope = match e.full_name.rsplit_once("::") {
                Some((scope, _)) => format!("{scope}::"),
                None => String::new(),
            };
            for value in &e.values {
                after.write_error_check(
                    &format!("PyModule_AddIntConstant({m}, (char *) \"{value}\", {scope}{value}) < 0"),
                    None,
                );
            }
        }
    }

    sink.writeln("PyMODINIT_FUNC");
    sink.writeln("#if defined(__GNUC__) && __GNUC__ >= 4");
    sink.writeln("__attribute__ ((visibility(\"default\")))");
    sink.writeln("#endif");
    sink.writeln(&format!("PyInit_{name}(void)"));
    sink.writeln("{");
    sink.indent();
    site.flush_to(sink);
    sink.writeln(&format!("return {m};"));
    sink.unindent();
    sink.writeln("}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::diagnostics::Diagnostics;
    use crate::extract::extract_module;

    fn generate(toml: &str) -> (String, Diagnostics) {
        let cfg = parse_config(toml).unwrap();
        let mut diags = Diagnostics::new();
        let mut module = extract_module(&cfg, &mut diags);
        let text = emit_module(&mut module, &mut diags).unwrap();
        (text, diags)
    }

    #[test]
    fn empty_module_has_init_and_table() {
        let (text, diags) = generate("[output]\nmodule = \"empty\"\n");
        assert!(diags.is_empty());
        assert!(text.starts_with("/* This file was generated by bnd-pygen. */\n"));
        assert!(text.contains("typedef enum _PyBindGenWrapperFlags {"));
        assert!(!text.contains("#include <map>"));
        assert!(text.contains(
            "static PyMethodDef empty_functions[] = {\n    {NULL, NULL, 0, NULL}\n};"
        ));
        assert!(text.contains(
            "PyInit_empty(void)\n{\n    PyObject *m;\n\n    m = PyModule_Create(&empty_moduledef);\n    \
             if (m == NULL) {\n        return NULL;\n    }\n    return m;\n}"
        ), "{text}");
    }

    #[test]
    fn functions_get_prototypes_and_table_entries() {
        let (text, diags) = generate(
            r#"
[output]
module = "m"
includes = ['"shapes.h"']

[[function]]
name = "area"
return = "double"
params = [{ type = "double", name = "r" }]

[[function]]
name = "reset"
"#,
        );
        assert!(diags.is_empty(), "{:?}", diags.warnings());
        assert!(text.contains("#include \"shapes.h\"\n"));
        assert!(text.contains("PyObject *_wrap_reset(PyObject * PYBINDGEN_UNUSED(dummy));\n"), "{text}");
        assert!(text.contains(
            "    {(char *) \"area\", (PyCFunction) _wrap_area, METH_VARARGS|METH_KEYWORDS, NULL },\n    \
             {(char *) \"reset\", (PyCFunction) _wrap_reset, METH_NOARGS, NULL },\n    {NULL, NULL, 0, NULL}"
        ), "{text}");
        let prototype = text.find("_wrap_area(PyObject * PYBINDGEN_UNUSED(dummy), PyObject *args, PyObject *kwargs);").unwrap();
        let definition = text.find("_wrap_area(PyObject * PYBINDGEN_UNUSED(dummy), PyObject *args, PyObject *kwargs)\n{").unwrap();
        assert!(prototype < definition);
    }

    #[test]
    fn class_gets_struct_type_object_and_registration() {
        let (text, diags) = generate(
            r#"
[output]
module = "geo"

[[class]]
name = "Point"
namespace = "geo"
memory_policy = { kind = "free-function", free_function = "point_free" }

[[class.constructor]]
params = [{ type = "int", name = "x" }]

[[class.method]]
name = "x"
return = "int"
const = true
"#,
        );
        assert!(diags.is_empty(), "{:?}", diags.warnings());
        assert!(text.contains(
            "typedef struct {\n    PyObject_HEAD\n    geo::Point *obj;\n    PyBindGenWrapperFlags flags:8;\n} PyGeoPoint;"
        ), "{text}");
        assert!(text.contains("extern PyTypeObject PyGeoPoint_Type;"));
        assert!(text.contains("static int\n_wrap_PyGeoPoint__tp_init(PyGeoPoint *self, PyObject *args, PyObject *kwargs)\n{"));
        assert!(text.contains(
            "static PyMethodDef PyGeoPoint_methods[] = {\n    \
             {(char *) \"x\", (PyCFunction) _wrap_PyGeoPoint_x, METH_NOARGS, NULL },\n    {NULL, NULL, 0, NULL}\n};"
        ), "{text}");
        assert!(text.contains(
            "    geo::Point *tmp = self->obj;\n    self->obj = NULL;\n    \
             if (!(self->flags&PYBINDGEN_WRAPPER_FLAG_OBJECT_NOT_OWNED)) {\n        point_free(tmp);\n    }\n    \
             Py_TYPE(self)->tp_free((PyObject*)self);"
        ), "{text}");
        assert!(text.contains("    (char *) \"geo.Point\", /* tp_name */\n    sizeof(PyGeoPoint), /* tp_basicsize */"));
        assert!(text.contains("    Py_TPFLAGS_DEFAULT, /* tp_flags */"));
        assert!(text.contains("PyTypeObject PyGeoPoint_Type = {\n    PyVarObject_HEAD_INIT(NULL, 0)\n"));
        assert!(text.contains("    (struct PyGetSetDef*)0, /* tp_getset */"));
        assert!(text.contains("    (initproc)_wrap_PyGeoPoint__tp_init, /* tp_init */"));
        assert!(text.contains(
            "    /* Register the 'geo::Point' class */\n    if (PyType_Ready(&PyGeoPoint_Type)) {\n        \
             Py_DECREF(m);\n        return NULL;\n    }\n    \
             PyModule_AddObject(m, (char *) \"Point\", (PyObject *) &PyGeoPoint_Type);"
        ), "{text}");
    }

    #[test]
    fn attributes_fill_getset_tables() {
        let (text, diags) = generate(
            r#"
[output]
module = "geo"

[[class]]
name = "Point"
namespace = "geo"

[[class.attribute]]
name = "id"
type = "int"
read_only = true

[[class.attribute]]
name = "x"
type = "double"

[[class.attribute]]
name = "origin"
type = "Point &"

[[class.attribute]]
name = "count"
type = "unsigned int"
static = true
"#,
        );
        // the reference-typed member cannot be assigned from Python
        assert_eq!(diags.warnings().len(), 1, "{:?}", diags.warnings());
        assert_eq!(diags.warnings()[0].location.as_deref(), Some("Point.origin"));
        assert!(diags.warnings()[0].message.starts_with("setter left out"));

        assert!(text.contains("static PyObject *\n_wrap_PyGeoPoint__get_id(PyGeoPoint *self, void * PYBINDGEN_UNUSED(closure))"));
        assert!(!text.contains("_wrap_PyGeoPoint__set_id"));
        assert!(!text.contains("_wrap_PyGeoPoint__set_origin"));
        assert!(text.contains("static int\n_wrap_PyGeoPoint__set_x(PyGeoPoint *self, PyObject *value, void * PYBINDGEN_UNUSED(closure))"));
        assert!(text.contains(
            "static PyGetSetDef PyGeoPoint__getsets[] = {\n    {\n        \
             (char*) \"id\", /* attribute name */\n        \
             (getter) _wrap_PyGeoPoint__get_id, /* C function to get the attribute */\n        \
             (setter) NULL, /* C function to set the attribute */\n"
        ), "{text}");
        assert!(text.contains("(setter) _wrap_PyGeoPoint__set_x, /* C function to set the attribute */"));
        assert!(text.contains("    (struct PyGetSetDef*)PyGeoPoint__getsets, /* tp_getset */"));

        // static attributes live on the metaclass, defined ahead of the class
        let meta = text.find("PyTypeObject PyGeoPointMeta_Type = {").unwrap();
        let class = text.find("PyTypeObject PyGeoPoint_Type = {").unwrap();
        assert!(meta < class);
        assert!(text.contains("    (char *) \"geo.PointMeta\", /* tp_name */\n    0, /* tp_basicsize */"));
        assert!(text.contains("    (struct PyGetSetDef*)PyGeoPointMeta__getsets, /* tp_getset */"));
        assert!(text.contains("PyTypeObject PyGeoPoint_Type = {\n    PyVarObject_HEAD_INIT(&PyGeoPointMeta_Type, 0)\n"));
        assert!(text.contains("    geo::Point::count = tmp_value;\n"), "{text}");
        assert!(text.contains(
            "    /* Register the 'geo::Point' class */\n    \
             PyGeoPointMeta_Type.tp_base = &PyType_Type;\n    \
             PyGeoPointMeta_Type.tp_setattro = PyObject_GenericSetAttr;\n    \
             if (PyType_Ready(&PyGeoPointMeta_Type)) {\n        Py_DECREF(m);\n        return NULL;\n    }\n    \
             if (PyType_Ready(&PyGeoPoint_Type)) {"
        ), "{text}");
    }

    #[test]
    fn class_without_constructor_raises() {
        let (text, diags) = generate(
            r#"
[output]
module = "m"

[[class]]
name = "Handle"
cannot_be_constructed = "use open()"

[[class.constructor]]
"#,
        );
        assert!(diags.is_empty(), "{:?}", diags.warnings());
        assert!(text.contains(
            "_wrap_PyHandle__tp_init(void)\n{\n    \
             PyErr_SetString(PyExc_TypeError, \"class 'Handle' cannot be constructed (use open())\");\n    return -1;\n}"
        ), "{text}");
    }

    #[test]
    fn subclassable_class_is_garbage_collected() {
        let (text, diags) = generate(
            r#"
[output]
module = "m"

[settings]
allow_subclassing = true
wrapper_registry = "std-map"

[[class]]
name = "Shape"

[[class.constructor]]

[[class.method]]
name = "area"
return = "double"
virtual = true
"#,
        );
        assert!(diags.is_empty(), "{:?}", diags.warnings());
        assert!(text.contains("#include <map>"));
        assert!(text.contains("    PyObject *inst_dict;\n"));
        assert!(text.contains("std::map<void*, PyObject*> PyShape_wrapper_registry;"));
        assert!(text.contains("class PyShape__PythonHelper : public Shape\n{"));
        assert!(text.contains("    Py_TPFLAGS_DEFAULT|Py_TPFLAGS_HAVE_GC|Py_TPFLAGS_BASETYPE, /* tp_flags */"));
        assert!(text.contains("    (traverseproc)PyShape__tp_traverse, /* tp_traverse */"));
        assert!(text.contains("    offsetof(PyShape, inst_dict), /* tp_dictoffset */"));
        assert!(text.contains("    PyObject_GC_UnTrack(self);\n    PyShape__tp_clear(self);\n"));
        assert!(text.contains("typeid(PyShape__PythonHelper).name()"));
        // the helper is declared before any wrapper that casts to it
        let helper = text.find("class PyShape__PythonHelper").unwrap();
        let init = text.find("_wrap_PyShape__tp_init(PyShape *self").unwrap();
        assert!(helper < init);
    }

    #[test]
    fn failing_group_is_reported_and_left_out() {
        let (text, diags) = generate(
            r#"
[output]
module = "m"

[[class]]
name = "Foo"
cannot_be_constructed = "factory only"

[[class.method]]
name = "dup"
return = "Foo"
"#,
        );
        assert_eq!(diags.count(WarningCategory::SkippedGroup), 1);
        let warning = diags
            .warnings()
            .iter()
            .find(|w| w.category == WarningCategory::SkippedGroup)
            .unwrap();
        assert_eq!(warning.location.as_deref(), Some("Foo.dup"));
        assert!(!text.contains("\"dup\""));
        assert!(text.contains("static PyMethodDef PyFoo_methods[] = {\n    {NULL, NULL, 0, NULL}\n};"));
    }

    #[test]
    fn exceptions_are_created_and_translated() {
        let (text, diags) = generate(
            r#"
[output]
module = "g2p"

[[exception]]
name = "exception"
namespace = "std"
message = "exc.what()"

[[exception]]
name = "ModelError"
base = "exception"

[[class]]
name = "Script"

[[class.constructor]]
params = [{ type = "std::string", name = "model" }]
throw = ["std::exception"]
"#,
        );
        assert!(diags.is_empty(), "{:?}", diags.warnings());
        assert!(text.contains("PyTypeObject *Pystd_exception_Type;\nPyTypeObject *PyModelError_Type;\n"), "{text}");
        assert!(text.contains(
            "    /* Register the 'std::exception' exception */\n    \
             if ((Pystd_exception_Type = (PyTypeObject*) PyErr_NewException((char*)\"g2p.exception\", NULL, NULL)) == NULL) {\n        \
             Py_DECREF(m);\n        return NULL;\n    }\n    \
             Py_INCREF((PyObject *) Pystd_exception_Type);\n    \
             PyModule_AddObject(m, (char *) \"exception\", (PyObject *) Pystd_exception_Type);\n"
        ), "{text}");
        assert!(text.contains(
            "PyErr_NewException((char*)\"g2p.ModelError\", (PyObject*) Pystd_exception_Type, NULL)"
        ), "{text}");
        assert!(text.contains(
            "    } catch (std::exception const &exc) {\n        \
             PyErr_SetString((PyObject *) Pystd_exception_Type, exc.what());\n        return -1;\n    }"
        ), "{text}");
        // the exception object exists before any class that could raise it is ready
        let created = text.find("PyErr_NewException((char*)\"g2p.exception\"").unwrap();
        let ready = text.find("PyType_Ready(&PyScript_Type)").unwrap();
        assert!(created < ready);
    }

    #[test]
    fn enums_and_containers_are_registered() {
        let (text, _) = generate(
            r#"
[output]
module = "m"

[[enum]]
name = "Color"
namespace = "gfx"
values = ["RED", "GREEN"]

[[container]]
name = "Names"
full_name = "std::vector<std::string>"
"#,
        );
        assert!(text.contains(
            "    if (PyModule_AddIntConstant(m, (char *) \"RED\", gfx::RED) < 0) {\n        Py_DECREF(m);\n        return NULL;\n    }"
        ), "{text}");
        assert!(text.contains("(char *) \"GREEN\", gfx::GREEN)"));
        assert!(text.contains("typedef struct {\n    PyObject_HEAD\n    std::vector< std::string > *obj;\n} PyNames;"));
        assert!(text.contains("int _wrap_convert_py2c__"));
        assert!(text.contains("PyModule_AddObject(m, (char *) \"Names\", (PyObject *) &PyNames_Type);"));
    }
}
