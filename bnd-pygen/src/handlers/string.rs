//! `char *` and `std::string`.

use crate::block::CallSite;
use crate::error::ConvertError;
use crate::registry::{Shape, StringKind};

use super::{Parameter, ReturnValue};

fn std_string_build(value: &str) -> Vec<String> {
    vec![format!("({value}).c_str()"), format!("({value}).size()")]
}

/// Declare the `const char *` / length pair an `s#` item parses into.
fn declare_buffer(site: &mut CallSite, name: &str, nullable: bool) -> (String, String) {
    let ptr = site
        .declarations
        .declare_variable("const char *", name, nullable.then_some("NULL"), None);
    let len = site
        .declarations
        .declare_variable("Py_ssize_t", &format!("{name}_len"), None, None);
    (ptr, len)
}

pub(super) fn param_python_to_c(
    p: &mut Parameter,
    kind: StringKind,
    shape: Shape,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let optional = p.default_value.is_some();
    match (kind, shape) {
        (StringKind::CString, _) => {
            let name = site.declarations.declare_variable(
                &p.descriptor.ctype_no_const(),
                &p.name,
                p.default_value.as_deref(),
                None,
            );
            site.parse_params
                .add("s", &[format!("&{name}")], Some(&p.name), optional)?;
            site.call_params.push(name);
        }
        (StringKind::StdString, Shape::Value) => {
            let (ptr, len) = declare_buffer(site, &p.name, optional);
            site.parse_params
                .add("s#", &[format!("&{ptr}"), format!("&{len}")], Some(&p.name), optional)?;
            site.call_params.push(match &p.default_value {
                Some(default) => format!("({ptr} ? std::string({ptr}, {len}) : {default})"),
                None => format!("std::string({ptr}, {len})"),
            });
        }
        (StringKind::StdString, _) => {
            let (ptr, len) = declare_buffer(site, &p.name, optional);
            let std = site
                .declarations
                .declare_variable("std::string", &format!("{}_std", p.name), None, None);
            if p.direction.has_in() {
                site.parse_params
                    .add("s#", &[format!("&{ptr}"), format!("&{len}")], Some(&p.name), optional)?;
                let code = match &p.default_value {
                    Some(default) => format!("{std} = {ptr} ? std::string({ptr}, {len}) : {default};"),
                    None => format!("{std} = std::string({ptr}, {len});"),
                };
                site.before_call().write_code(&code);
            }
            if p.direction.has_out() {
                site.build_params.add("s#", &std_string_build(&std), None);
            }
            site.call_params.push(match shape {
                Shape::Pointer => format!("&{std}"),
                _ => std,
            });
        }
    }
    Ok(())
}

pub(super) fn param_c_to_python(
    p: &mut Parameter,
    kind: StringKind,
    shape: Shape,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let value = p.value();
    match (kind, shape) {
        (StringKind::CString, _) => site.build_params.add("s", &[value], None),
        (StringKind::StdString, Shape::Value) => site.build_params.add("s#", &std_string_build(&value), None),
        (StringKind::StdString, _) => {
            let target = match shape {
                Shape::Pointer => format!("(*{value})"),
                _ => value,
            };
            if p.direction.has_in() {
                site.build_params.add("s#", &std_string_build(&target), None);
            }
            if p.direction.has_out() {
                let (ptr, len) = declare_buffer(site, &format!("py_{}", p.name), false);
                site.parse_params
                    .add("s#", &[format!("&{ptr}"), format!("&{len}")], None, false)?;
                site.after_call()
                    .write_code(&format!("{target} = std::string({ptr}, {len});"));
            }
        }
    }
    Ok(())
}

pub(super) fn return_c_to_python(r: &mut ReturnValue, kind: StringKind, site: &mut CallSite) -> Result<(), ConvertError> {
    match kind {
        StringKind::CString => site.build_params.prepend("s", &[r.value.clone()], None),
        StringKind::StdString => site.build_params.prepend("s#", &std_string_build(&r.value), None),
    }
    Ok(())
}

pub(super) fn return_python_to_c(r: &mut ReturnValue, kind: StringKind, site: &mut CallSite) -> Result<(), ConvertError> {
    match kind {
        StringKind::CString => {
            site.parse_params
                .prepend("s", &[format!("&{}", r.value)], None, false)?;
        }
        StringKind::StdString => {
            let (ptr, len) = declare_buffer(site, &format!("{}_ptr", r.value), false);
            site.parse_params
                .prepend("s#", &[format!("&{ptr}"), format!("&{len}")], None, false)?;
            site.after_call()
                .write_code(&format!("{} = std::string({ptr}, {len});", r.value));
        }
    }
    Ok(())
}
