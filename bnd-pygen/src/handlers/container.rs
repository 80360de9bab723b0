//! STL-style containers.
//!
//! Incoming values go through the container's `O&` converter into a native
//! copy. Outgoing values are copied into a fresh wrapper object.

use crate::block::{BlockWriter, CallSite, Stage};
use crate::context::ContainerInfo;
use crate::error::{CodegenError, CodegenResult, ConvertError};
use crate::model::{Direction, ParamDecl};
use crate::registry::Shape;

use super::{Parameter, ReturnValue};

/// Ownership rule for container pointers: an output is always handed to
/// the wrapper; an input must say.
pub(super) fn pointer_transfer(decl: &ParamDecl, direction: Direction) -> CodegenResult<bool> {
    match (direction, decl.transfer_ownership) {
        (Direction::Out, None | Some(true)) => Ok(true),
        (Direction::Out, Some(false)) => Err(CodegenError::config(format!(
            "output container pointer {} must transfer ownership",
            decl.name
        ))),
        (_, Some(transfer)) => Ok(transfer),
        (_, None) => Err(CodegenError::config(format!(
            "missing transfer_ownership option for container pointer {}",
            decl.name
        ))),
    }
}

pub(super) fn check_parameter(shape: Shape, direction: Direction, decl: &ParamDecl) -> CodegenResult<()> {
    if shape == Shape::Value && decl.default.is_some() {
        return Err(CodegenError::unsupported(format!(
            "default value for container parameter {}",
            decl.name
        )));
    }
    if shape == Shape::Pointer && direction == Direction::InOut {
        return Err(CodegenError::unsupported(format!(
            "inout container pointer {}",
            decl.name
        )));
    }
    Ok(())
}

fn declare_wrapper(site: &mut CallSite, container: &ContainerInfo) -> String {
    site.declarations.declare_variable(
        &format!("{} *", container.pystruct),
        &format!("py_{}", container.name),
        None,
        None,
    )
}

fn write_new_wrapper(block: &mut BlockWriter<'_>, container: &ContainerInfo, py: &str, value: Option<&str>) {
    block.write_code(&format!(
        "{py} = PyObject_New({}, &{});",
        container.pystruct, container.pytypestruct
    ));
    match value {
        Some(value) => block.write_code(&format!("{py}->obj = new {}({value});", container.full_name)),
        None => block.write_code(&format!("{py}->obj = new {};", container.full_name)),
    }
}

pub(super) fn param_python_to_c(
    p: &mut Parameter,
    container: &ContainerInfo,
    shape: Shape,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let converter = container.python_to_c_converter.clone();
    let optional = p.default_value.is_some();
    match shape {
        Shape::Value => {
            let tmp = site.declarations.declare_variable(
                &container.full_name,
                &format!("{}_value", p.name),
                None,
                None,
            );
            site.parse_params
                .add("O&", &[converter, format!("&{tmp}")], Some(&p.name), false)?;
            site.call_params.push(tmp);
        }
        Shape::Reference => {
            let tmp = site.declarations.declare_variable(
                &container.full_name,
                &format!("{}_value", p.name),
                p.default_value.as_deref(),
                None,
            );
            if p.direction.has_in() {
                site.parse_params
                    .add("O&", &[converter, format!("&{tmp}")], Some(&p.name), optional)?;
            }
            if p.direction.has_out() {
                let py = declare_wrapper(site, container);
                write_new_wrapper(&mut site.block(Stage::AfterCall), container, &py, Some(&tmp));
                site.build_params.add("N", &[py], None);
            }
            site.call_params.push(tmp);
        }
        Shape::Pointer => {
            if p.direction == Direction::Out {
                let tmp = site.declarations.declare_variable(
                    &format!("{} *", container.full_name),
                    &format!("{}_value", p.name),
                    Some(&format!("new {}", container.full_name)),
                    None,
                );
                let py = declare_wrapper(site, container);
                let mut after = site.after_call();
                after.write_code(&format!(
                    "{py} = PyObject_New({}, &{});",
                    container.pystruct, container.pytypestruct
                ));
                after.write_code(&format!("{py}->obj = {tmp};"));
                site.build_params.add("N", &[py], None);
                site.call_params.push(tmp);
            } else {
                let tmp = site.declarations.declare_variable(
                    &container.full_name,
                    &format!("{}_value", p.name),
                    None,
                    None,
                );
                site.parse_params
                    .add("O&", &[converter, format!("&{tmp}")], Some(&p.name), optional)?;
                site.call_params.push(if p.transfer_ownership {
                    format!("new {}({tmp})", container.full_name)
                } else {
                    format!("&{tmp}")
                });
            }
        }
    }
    Ok(())
}

pub(super) fn param_c_to_python(
    p: &mut Parameter,
    container: &ContainerInfo,
    shape: Shape,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let value = p.value();
    match shape {
        Shape::Value => {
            let py = declare_wrapper(site, container);
            write_new_wrapper(&mut site.before_call(), container, &py, Some(&value));
            site.build_params.add("N", &[py], None);
        }
        Shape::Reference => {
            let py = declare_wrapper(site, container);
            let initial = p.direction.has_in().then_some(value.as_str());
            write_new_wrapper(&mut site.before_call(), container, &py, initial);
            site.build_params.add("N", &[py], None);
            if p.direction.has_out() {
                site.parse_params.add(
                    "O&",
                    &[container.python_to_c_converter.clone(), format!("&{value}")],
                    None,
                    false,
                )?;
            }
        }
        Shape::Pointer => {
            return Err(CodegenError::unsupported(format!(
                "passing container pointer {} to a Python override",
                p.name
            ))
            .into());
        }
    }
    Ok(())
}

pub(super) fn return_c_to_python(
    r: &mut ReturnValue,
    container: &ContainerInfo,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    let py = declare_wrapper(site, container);
    let value = r.value.clone();
    write_new_wrapper(&mut site.after_call(), container, &py, Some(&value));
    site.build_params.prepend("N", &[py], None);
    Ok(())
}

pub(super) fn return_python_to_c(
    r: &mut ReturnValue,
    container: &ContainerInfo,
    site: &mut CallSite,
) -> Result<(), ConvertError> {
    site.parse_params.prepend(
        "O&",
        &[container.python_to_c_converter.clone(), format!("&{}", r.value)],
        None,
        false,
    )?;
    Ok(())
}
