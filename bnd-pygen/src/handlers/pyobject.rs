//! `PyObject *`, handed through untouched. Only the reference count needs
//! care.

use crate::block::CallSite;
use crate::error::ConvertError;

use super::{Parameter, ReturnValue};

pub(super) fn param_python_to_c(p: &mut Parameter, site: &mut CallSite) -> Result<(), ConvertError> {
    let name = site.declarations.declare_variable(
        "PyObject *",
        &p.name,
        p.default_value.as_deref(),
        None,
    );
    site.parse_params.add(
        "O",
        &[format!("&{name}")],
        Some(&p.name),
        p.default_value.is_some(),
    )?;
    if p.transfer_ownership {
        site.before_call()
            .write_code(&format!("Py_INCREF((PyObject*) {name});"));
    }
    site.call_params.push(name);
    Ok(())
}

pub(super) fn param_c_to_python(p: &mut Parameter, site: &mut CallSite) -> Result<(), ConvertError> {
    let format = if p.transfer_ownership { "N" } else { "O" };
    site.build_params.add(format, &[p.value()], None);
    Ok(())
}

pub(super) fn return_c_to_python(r: &mut ReturnValue, site: &mut CallSite) -> Result<(), ConvertError> {
    let format = if r.caller_owns_return { "N" } else { "O" };
    site.build_params.prepend(format, &[r.value.clone()], None);
    Ok(())
}

pub(super) fn return_python_to_c(r: &mut ReturnValue, site: &mut CallSite) -> Result<(), ConvertError> {
    site.parse_params
        .prepend("O", &[format!("&{}", r.value)], None, false)?;
    if r.caller_owns_return {
        site.after_call()
            .write_code(&format!("Py_INCREF((PyObject*) {});", r.value));
    }
    Ok(())
}
