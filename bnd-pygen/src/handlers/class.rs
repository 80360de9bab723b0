//! Wrapped C++ classes, by value, by reference and by pointer.
//!
//! Every Python wrapper is a `{ PyObject_HEAD; T *obj; flags }` struct. The
//! interesting part is who owns `obj`: a copy made by the wrapper, an object
//! whose ownership was transferred, or an object borrowed from native code.

use std::rc::Rc;

use crate::block::{BlockWriter, CallSite, DeclarationsScope, Stage};
use crate::context::{ClassInfo, TypeContext};
use crate::ctype::TypeDescriptor;
use crate::error::{CodegenError, ConvertError};
use crate::model::Direction;
use crate::registry::TypeTransformation;

use super::{Parameter, ReturnValue};

/// What the new wrapper's `obj` points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adopt {
    /// Ownership moves to the wrapper.
    Transfer,
    /// The wrapper points at an object owned elsewhere.
    Borrow,
    /// The wrapper owns a fresh copy.
    Copy,
}

fn transform(t: &Option<Rc<dyn TypeTransformation>>, requested: &TypeDescriptor, value: &str) -> String {
    match t {
        Some(t) => t.transform(requested, value),
        None => value.to_string(),
    }
}

fn untransform(t: &Option<Rc<dyn TypeTransformation>>, requested: &TypeDescriptor, value: &str) -> String {
    match t {
        Some(t) => t.untransform(requested, value),
        None => value.to_string(),
    }
}

/// `obj` is never const; cast away a const target.
fn as_mutable(class: &ClassInfo, ptr: &str, target_is_const: bool) -> String {
    if target_is_const {
        format!("({}*) ({ptr})", class.full_name)
    } else {
        ptr.to_string()
    }
}

fn declare_wrapper(declarations: &mut DeclarationsScope, class: &ClassInfo, name: &str) -> String {
    declarations.declare_variable(&format!("{} *", class.pystruct), name, None, None)
}

/// Allocate an empty wrapper object into `py`.
fn write_new_wrapper(block: &mut BlockWriter<'_>, class: &ClassInfo, py: &str) {
    if class.allow_subclassing {
        block.write_code(&format!(
            "{py} = PyObject_GC_New({}, &{});",
            class.pystruct, class.pytypestruct
        ));
        block.write_code(&format!("{py}->inst_dict = NULL;"));
    } else {
        block.write_code(&format!(
            "{py} = PyObject_New({}, &{});",
            class.pystruct, class.pytypestruct
        ));
    }
    block.write_code(&format!("{py}->flags = PYBINDGEN_WRAPPER_FLAG_NONE;"));
}

/// Set `py` to a wrapper of the native object at `ptr`.
///
/// Unless a copy is requested, an existing wrapper is reused: first from
/// the wrapper registry, then from the Python side of a helper-class
/// instance.
#[allow(clippy::too_many_arguments)]
fn write_wrap_native(
    declarations: &mut DeclarationsScope,
    block: &mut BlockWriter<'_>,
    class: &ClassInfo,
    py: &str,
    ptr: &str,
    copy_source: &str,
    target_is_const: bool,
    adopt: Adopt,
) -> Result<(), ConvertError> {
    let mut closes = 0;
    if adopt != Adopt::Copy {
        match class
            .registry
            .write_lookup_wrapper(declarations, block, &class.pystruct, py, ptr)
        {
            Ok(()) => {
                block.write_code(&format!("if ({py} == NULL) {{"));
                block.indent();
                closes += 1;
            }
            Err(CodegenError::NotSupported(_)) => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(helper) = &class.helper_class {
            block.write_code(&format!(
                "if (typeid(*({ptr})).name() == typeid({helper}).name())\n{{"
            ));
            block.indent();
            block.write_code(&format!(
                "{py} = reinterpret_cast< {} * >(reinterpret_cast< {helper} * >({})->m_pyself);",
                class.pystruct,
                as_mutable(class, ptr, target_is_const)
            ));
            block.write_code(&format!("{py}->obj = {};", as_mutable(class, ptr, target_is_const)));
            block.write_code(&format!("Py_INCREF({py});"));
            block.unindent();
            block.write_code("} else {");
            block.indent();
            closes += 1;
        }
    }

    write_new_wrapper(block, class, py);
    match adopt {
        Adopt::Transfer => {
            block.write_code(&format!("{py}->obj = {};", as_mutable(class, ptr, target_is_const)));
        }
        Adopt::Borrow => {
            if let Some(incref) = class.memory_policy.incref_code(ptr) {
                block.write_code(&incref);
            } else {
                block.write_code(&format!("{py}->flags = PYBINDGEN_WRAPPER_FLAG_OBJECT_NOT_OWNED;"));
            }
            block.write_code(&format!("{py}->obj = {};", as_mutable(class, ptr, target_is_const)));
        }
        Adopt::Copy => {
            block.write_code(&class.create_instance_code(&format!("{py}->obj"), copy_source)?);
        }
    }
    class
        .registry
        .write_register_new_wrapper(block, py, &format!("{py}->obj"));

    for _ in 0..closes {
        block.unindent();
        block.write_code("}");
    }
    Ok(())
}

/// `PyObject_IsInstance` cascade over the class and every class that
/// converts to it, assigning the matched object to `tmp`.
fn write_implicit_conversion(
    block: &mut BlockWriter<'_>,
    class: &ClassInfo,
    ctx: &TypeContext,
    py: &str,
    tmp: &str,
    default: Option<&str>,
) {
    let mut candidates = vec![class];
    candidates.extend(class.implicit_conversion_sources.iter().map(|id| ctx.class(*id)));

    let mut keyword = "if";
    if let Some(default) = default {
        block.write_code(&format!("if ({py} == NULL) {{\n    {tmp} = {default};"));
        keyword = "} else if";
    }
    for candidate in &candidates {
        block.write_code(&format!(
            "{keyword} (PyObject_IsInstance({py}, (PyObject*) &{})) {{\n    {tmp} = *(({} *) {py})->obj;",
            candidate.pytypestruct, candidate.pystruct
        ));
        keyword = "} else if";
    }
    let names: Vec<&str> = candidates.iter().map(|c| c.python_name.as_str()).collect();
    block.write_code("} else {");
    block.indent();
    block.write_code(&format!(
        "PyErr_Format(PyExc_TypeError, \"parameter must be an instance of one of the types ({}), not %s\", \
         Py_TYPE({py})->tp_name);",
        names.join(", ")
    ));
    block.write_error_return();
    block.unindent();
    block.write_code("}");
}

/// Parse a class instance accepting implicit conversions; the call gets a
/// native temporary.
fn python_to_c_with_conversions(
    p: &mut Parameter,
    class: &ClassInfo,
    ctx: &TypeContext,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let optional = p.default_value.is_some();
    let py = site.declarations.declare_variable(
        "PyObject*",
        &p.name,
        optional.then_some("NULL"),
        None,
    );
    let tmp = site
        .declarations
        .declare_variable(&class.full_name, &p.name, None, None);
    site.parse_params
        .add("O", &[format!("&{py}")], Some(&p.name), optional)?;
    write_implicit_conversion(
        &mut site.before_call(),
        class,
        ctx,
        &py,
        &tmp,
        p.default_value.as_deref(),
    );
    site.call_params.push(tmp);
    p.py_name = Some(py);
    Ok(())
}

/// Parse an instance of exactly this class (`O!`), calling with the object
/// itself or the default.
fn python_to_c_exact(p: &mut Parameter, class: &ClassInfo, site: &mut CallSite) -> Result<(), ConvertError> {
    let optional = p.default_value.is_some();
    let name = site.declarations.declare_variable(
        &format!("{} *", class.pystruct),
        &p.name,
        optional.then_some("NULL"),
        None,
    );
    site.parse_params.add(
        "O!",
        &[format!("&{}", class.pytypestruct), format!("&{name}")],
        Some(&p.name),
        optional,
    )?;
    let object = format!("*(({} *) {name})->obj", class.pystruct);
    site.call_params.push(match &p.default_value {
        Some(default) => format!("({name} ? ({object}) : {default})"),
        None => object,
    });
    p.py_name = Some(name);
    Ok(())
}

// ---------------------------------------------------------------------------
// Parameters, Python to C
// ---------------------------------------------------------------------------

pub(super) fn value_param_python_to_c(
    p: &mut Parameter,
    class: &ClassInfo,
    ctx: &TypeContext,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    if !class.implicit_conversion_sources.is_empty() {
        return python_to_c_with_conversions(p, class, ctx, site);
    }
    if p.default_value.is_some() {
        class.construct_name()?;
    }
    python_to_c_exact(p, class, site)
}

pub(super) fn ref_param_python_to_c(
    p: &mut Parameter,
    class: &ClassInfo,
    ctx: &TypeContext,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    match p.direction {
        Direction::In => {
            if !class.implicit_conversion_sources.is_empty() && p.descriptor.target_is_const() {
                python_to_c_with_conversions(p, class, ctx, site)
            } else {
                python_to_c_exact(p, class, site)
            }
        }
        Direction::Out => {
            let name = declare_wrapper(&mut site.declarations, class, &p.name);
            let mut block = site.before_call();
            write_new_wrapper(&mut block, class, &name);
            block.write_code(&class.create_instance_code(&format!("{name}->obj"), "")?);
            class
                .registry
                .write_register_new_wrapper(&mut block, &name, &format!("{name}->obj"));
            site.build_params.add("N", &[name.clone()], None);
            site.call_params.push(format!("*{name}->obj"));
            p.py_name = Some(name);
            Ok(())
        }
        Direction::InOut => {
            let name = declare_wrapper(&mut site.declarations, class, &p.name);
            site.parse_params.add(
                "O!",
                &[format!("&{}", class.pytypestruct), format!("&{name}")],
                Some(&p.name),
                false,
            )?;
            site.build_params.add("O", &[format!("(PyObject *) {name}")], None);
            site.call_params.push(format!("*{name}->obj"));
            p.py_name = Some(name);
            Ok(())
        }
    }
}

pub(super) fn ptr_param_python_to_c(
    p: &mut Parameter,
    class: &ClassInfo,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let optional = p.default_value.is_some();
    let name = site.declarations.declare_variable(
        &format!("{} *", class.pystruct),
        &p.name,
        optional.then_some("NULL"),
        None,
    );
    let ptr_type = if p.descriptor.target_is_const() {
        format!("{} const *", class.full_name)
    } else {
        format!("{} *", class.full_name)
    };
    let ptr = site
        .declarations
        .declare_variable(&ptr_type, &format!("{}_ptr", p.name), None, None);

    if p.null_ok {
        let num = site
            .parse_params
            .add("O", &[format!("&{name}")], Some(&p.name), optional)?;
        let failure = format!(
            "PyErr_SetString(PyExc_TypeError, \"Parameter {num} must be of type {}\");",
            class.python_name
        );
        let mut block = site.before_call();
        block.write_error_check(
            &format!(
                "{name} && ((PyObject *) {name} != Py_None) && \
                 !PyObject_IsInstance((PyObject *) {name}, (PyObject *) &{})",
                class.pytypestruct
            ),
            Some(failure.as_str()),
        );
        block.write_code(&format!(
            "if ({name}) {{\n    if ((PyObject *) {name} == Py_None)\n        {ptr} = NULL;\n    \
             else\n        {ptr} = {name}->obj;\n}} else {{\n    {ptr} = NULL;\n}}"
        ));
    } else {
        site.parse_params.add(
            "O!",
            &[format!("&{}", class.pytypestruct), format!("&{name}")],
            Some(&p.name),
            optional,
        )?;
        site.before_call()
            .write_code(&format!("{ptr} = ({name} ? {name}->obj : NULL);"));
    }

    site.call_params
        .push(transform(&p.transformation, &p.requested, &ptr));

    if p.transfer_ownership {
        let present = if p.null_ok {
            format!("{name} && (PyObject *) {name} != Py_None")
        } else {
            name.clone()
        };
        match class.memory_policy.incref_code(&format!("{name}->obj")) {
            Some(incref) => {
                site.before_call()
                    .write_code(&format!("if ({present}) {{\n    {incref}\n}}"));
            }
            None => {
                let (declarations, mut block) = site.scope_and_block(Stage::AfterCall);
                let mut code = format!("if ({present}) {{\n");
                if let Some(unregister) = class.registry.unregister_code(declarations, &name) {
                    for line in unregister.lines() {
                        code.push_str("    ");
                        code.push_str(line);
                        code.push('\n');
                    }
                }
                code.push_str(&format!("    {name}->obj = NULL;\n}}"));
                block.add_cleanup(code);
            }
        }
    }
    p.py_name = Some(name);
    Ok(())
}

// ---------------------------------------------------------------------------
// Parameters, C to Python
// ---------------------------------------------------------------------------

pub(super) fn value_param_c_to_python(
    p: &mut Parameter,
    class: &ClassInfo,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let value = p.value();
    let py = declare_wrapper(&mut site.declarations, class, &format!("py_{}", class.python_name));
    let mut block = site.before_call();
    write_new_wrapper(&mut block, class, &py);
    block.write_code(&class.create_instance_code(&format!("{py}->obj"), &value)?);
    class
        .registry
        .write_register_new_wrapper(&mut block, &py, &format!("{py}->obj"));
    site.build_params.add("N", &[py.clone()], None);
    p.py_name = Some(py);
    Ok(())
}

pub(super) fn ref_param_c_to_python(
    p: &mut Parameter,
    class: &ClassInfo,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    if p.direction == Direction::In {
        return value_param_c_to_python(p, class, site);
    }

    // The Python side works on the caller's object for the duration of the
    // call; a wrapper that outlives the call gets its own copy.
    let value = p.value();
    let py = declare_wrapper(&mut site.declarations, class, &format!("py_{}", class.python_name));
    let mut block = site.before_call();
    write_new_wrapper(&mut block, class, &py);
    block.write_code(&format!(
        "{py}->obj = {};",
        as_mutable(class, &format!("&({value})"), p.descriptor.target_is_const())
    ));
    block.add_cleanup(format!("Py_DECREF({py});"));
    site.build_params.add("O", &[py.clone()], None);

    let mut after = site.after_call();
    if class.copyable {
        after.write_code(&format!("if ({py}->ob_refcnt == 1)\n    {py}->obj = NULL;\nelse {{"));
        after.indent();
        after.write_code(&class.create_instance_code(&format!("{py}->obj"), &value)?);
        class
            .registry
            .write_register_new_wrapper(&mut after, &py, &format!("{py}->obj"));
        after.unindent();
        after.write_code("}");
    } else {
        after.write_code(&format!("{py}->obj = NULL;"));
    }
    p.py_name = Some(py);
    Ok(())
}

pub(super) fn ptr_param_c_to_python(
    p: &mut Parameter,
    class: &ClassInfo,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let value = p.value();
    let adopt = if p.transfer_ownership {
        Adopt::Transfer
    } else if class.memory_policy.is_reference_counting() {
        Adopt::Borrow
    } else {
        Adopt::Copy
    };
    let (declarations, mut block) = site.scope_and_block(Stage::BeforeCall);
    let py = declare_wrapper(declarations, class, &format!("py_{}", class.python_name));
    write_wrap_native(
        declarations,
        &mut block,
        class,
        &py,
        &value,
        &format!("*{value}"),
        p.descriptor.target_is_const(),
        adopt,
    )?;
    site.build_params.add("N", &[py.clone()], None);
    p.py_name = Some(py);
    Ok(())
}

// ---------------------------------------------------------------------------
// Return values
// ---------------------------------------------------------------------------

pub(super) fn value_return_c_to_python(
    r: &mut ReturnValue,
    class: &ClassInfo,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let py = declare_wrapper(&mut site.declarations, class, &format!("py_{}", class.python_name));
    let mut block = site.after_call();
    write_new_wrapper(&mut block, class, &py);
    block.write_code(&class.create_instance_code(&format!("{py}->obj"), &r.value)?);
    class
        .registry
        .write_register_new_wrapper(&mut block, &py, &format!("{py}->obj"));
    site.build_params.prepend("N", &[py.clone()], None);
    r.py_name = Some(py);
    Ok(())
}

fn return_adopt(r: &ReturnValue) -> Adopt {
    if r.caller_owns_return {
        Adopt::Transfer
    } else if r.reference_existing_object {
        Adopt::Borrow
    } else {
        Adopt::Copy
    }
}

pub(super) fn ref_return_c_to_python(
    r: &mut ReturnValue,
    class: &ClassInfo,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let (declarations, mut block) = site.scope_and_block(Stage::AfterCall);
    let py = declare_wrapper(declarations, class, &format!("py_{}", class.python_name));
    write_wrap_native(
        declarations,
        &mut block,
        class,
        &py,
        &format!("&({})", r.value),
        &r.value,
        r.descriptor.target_is_const(),
        return_adopt(r),
    )?;
    site.build_params.prepend("N", &[py.clone()], None);
    r.py_name = Some(py);
    Ok(())
}

pub(super) fn ptr_return_c_to_python(
    r: &mut ReturnValue,
    class: &ClassInfo,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let value = untransform(&r.transformation, &r.requested, &r.value);
    let (declarations, mut block) = site.scope_and_block(Stage::AfterCall);
    block.write_code(&format!("if (!({value})) {{"));
    block.indent();
    block.write_cleanup();
    block.write_code("Py_INCREF(Py_None);");
    block.write_code("return Py_None;");
    block.unindent();
    block.write_code("}");

    let py = declare_wrapper(declarations, class, &format!("py_{}", class.python_name));
    write_wrap_native(
        declarations,
        &mut block,
        class,
        &py,
        &value,
        &format!("*{value}"),
        r.descriptor.target_is_const(),
        return_adopt(r),
    )?;
    site.build_params.prepend("N", &[py.clone()], None);
    r.py_name = Some(py);
    Ok(())
}

pub(super) fn value_return_python_to_c(
    r: &mut ReturnValue,
    class: &ClassInfo,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let tmp = declare_wrapper(&mut site.declarations, class, &format!("tmp_{}", class.python_name));
    site.parse_params.prepend(
        "O!",
        &[format!("&{}", class.pytypestruct), format!("&{tmp}")],
        None,
        false,
    )?;
    site.after_call()
        .write_code(&format!("{} {} = *{tmp}->obj;", class.full_name, r.value));
    Ok(())
}

pub(super) fn ptr_return_python_to_c(
    r: &mut ReturnValue,
    class: &ClassInfo,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let tmp = declare_wrapper(&mut site.declarations, class, &format!("tmp_{}", class.python_name));
    site.parse_params.prepend(
        "O!",
        &[format!("&{}", class.pytypestruct), format!("&{tmp}")],
        None,
        false,
    )?;
    let value = format!("{tmp}->obj");
    let mut block = site.after_call();
    if r.caller_owns_return {
        if let Some(incref) = class.memory_policy.incref_code(&value) {
            block.write_code(&incref);
            block.write_code(&format!(
                "{} = {};",
                r.value,
                transform(&r.transformation, &r.requested, &value)
            ));
        } else if class.copyable && class.construct_name().is_ok() {
            let copy = format!("new {}(*{value})", class.full_name);
            block.write_code(&format!(
                "{} = {};",
                r.value,
                transform(&r.transformation, &r.requested, &copy)
            ));
        } else {
            // Steal the object from its Python wrapper.
            block.write_code(&format!(
                "{} = {};",
                r.value,
                transform(&r.transformation, &r.requested, &value)
            ));
            block.write_code(&format!("{value} = NULL;"));
        }
    } else {
        block.write_code(&format!(
            "{} = {};",
            r.value,
            transform(&r.transformation, &r.requested, &value)
        ));
    }
    Ok(())
}
