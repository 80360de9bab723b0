//! Arithmetic types, `bool` and enums.
//!
//! Numbers map directly onto a `PyArg_ParseTuple` format unit. `bool` has
//! none, so it travels as a `PyObject*` tested with `PyObject_IsTrue`.

use crate::block::{CallSite, Stage};
use crate::error::ConvertError;
use crate::registry::{ScalarKind, Shape};

use super::{Parameter, ReturnValue};

/// How a numeric type crosses the boundary.
#[derive(Debug, Clone, Copy)]
pub(super) struct Numeric {
    format: &'static str,
    is_bool: bool,
}

impl Numeric {
    /// Enums travel as `int`.
    pub(super) const ENUM: Numeric = Numeric {
        format: "i",
        is_bool: false,
    };

    pub(super) fn scalar(kind: ScalarKind) -> Self {
        Self {
            format: kind.format_unit(),
            is_bool: kind == ScalarKind::Bool,
        }
    }
}

fn from_bool(value: &str) -> Vec<String> {
    vec![format!("PyBool_FromLong({value})")]
}

pub(super) fn param_python_to_c(
    p: &mut Parameter,
    num: Numeric,
    shape: Shape,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let optional = p.default_value.is_some();
    if shape == Shape::Value {
        if num.is_bool {
            let py_name = site.declarations.declare_variable(
                "PyObject *",
                &format!("py_{}", p.name),
                optional.then_some("NULL"),
                None,
            );
            let name = site.declarations.declare_variable("bool", &p.name, None, None);
            site.parse_params
                .add("O", &[format!("&{py_name}")], Some(&p.name), optional)?;
            let code = match &p.default_value {
                Some(default) => format!("{name} = {py_name} ? (bool) PyObject_IsTrue({py_name}) : {default};"),
                None => format!("{name} = (bool) PyObject_IsTrue({py_name});"),
            };
            site.before_call().write_code(&code);
            site.call_params.push(name);
        } else {
            let name = site.declarations.declare_variable(
                &p.descriptor.ctype_no_const(),
                &p.name,
                p.default_value.as_deref(),
                None,
            );
            site.parse_params
                .add(num.format, &[format!("&{name}")], Some(&p.name), optional)?;
            site.call_params.push(name);
        }
        return Ok(());
    }

    // Pointer or reference: the native side sees a local we own.
    let target = p
        .descriptor
        .target_ctype()
        .unwrap_or_else(|| p.descriptor.ctype_no_modifiers());
    let name = site
        .declarations
        .declare_variable(&target, &p.name, p.default_value.as_deref(), None);

    if p.direction.has_in() {
        if num.is_bool {
            let py_name = site.declarations.declare_variable(
                "PyObject *",
                &format!("py_{}", p.name),
                optional.then_some("NULL"),
                None,
            );
            site.parse_params
                .add("O", &[format!("&{py_name}")], Some(&p.name), optional)?;
            site.before_call()
                .write_code(&format!("if ({py_name})\n    {name} = (bool) PyObject_IsTrue({py_name});"));
        } else {
            site.parse_params
                .add(num.format, &[format!("&{name}")], Some(&p.name), optional)?;
        }
    }
    if p.direction.has_out() {
        if num.is_bool {
            site.build_params.add("N", &from_bool(&name), None);
        } else {
            site.build_params.add(num.format, &[name.clone()], None);
        }
    }
    site.call_params.push(match shape {
        Shape::Pointer => format!("&{name}"),
        _ => name,
    });
    Ok(())
}

pub(super) fn param_c_to_python(
    p: &mut Parameter,
    num: Numeric,
    shape: Shape,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let value = p.value();
    if shape == Shape::Value {
        if num.is_bool {
            site.build_params.add("N", &from_bool(&value), None);
        } else {
            site.build_params.add(num.format, &[value], None);
        }
        return Ok(());
    }

    let deref = match shape {
        Shape::Pointer => format!("*{value}"),
        _ => value.clone(),
    };
    if p.direction.has_in() {
        if num.is_bool {
            site.build_params.add("N", &from_bool(&deref), None);
        } else {
            site.build_params.add(num.format, &[deref.clone()], None);
        }
    }
    if p.direction.has_out() {
        if num.is_bool {
            let py_name = site
                .declarations
                .declare_variable("PyObject *", &format!("py_{}", p.name), None, None);
            site.parse_params.add("O", &[format!("&{py_name}")], None, false)?;
            site.after_call()
                .write_code(&format!("{deref} = (bool) PyObject_IsTrue({py_name});"));
        } else {
            let lvalue = match shape {
                Shape::Pointer => value,
                _ => format!("&{value}"),
            };
            site.parse_params.add(num.format, &[lvalue], None, false)?;
        }
    }
    Ok(())
}

pub(super) fn return_c_to_python(r: &mut ReturnValue, num: Numeric, site: &mut CallSite) -> Result<(), ConvertError> {
    if num.is_bool {
        site.build_params.prepend("N", &from_bool(&r.value), None);
    } else {
        site.build_params.prepend(num.format, &[r.value.clone()], None);
    }
    Ok(())
}

pub(super) fn return_python_to_c(r: &mut ReturnValue, num: Numeric, site: &mut CallSite) -> Result<(), ConvertError> {
    if num.is_bool {
        let py_name = site
            .declarations
            .declare_variable("PyObject *", "py_boolretval", None, None);
        site.parse_params.prepend("O", &[format!("&{py_name}")], None, false)?;
        site.block(Stage::AfterCall)
            .write_code(&format!("{} = PyObject_IsTrue({py_name});", r.value));
    } else {
        site.parse_params
            .prepend(num.format, &[format!("&{}", r.value)], None, false)?;
    }
    Ok(())
}
