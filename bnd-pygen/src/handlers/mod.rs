//! Parameter and return value handlers.
//!
//! A handler moves one value across the boundary. Both crossing directions
//! are implemented per [`HandlerKind`]:
//!
//! * `python_to_c`: a parameter of a wrapper called from Python (parse the
//!   incoming argument into a native local), or the return value of a
//!   virtual proxy (parse what the Python override returned);
//! * `c_to_python`: a parameter of a virtual proxy (build a Python
//!   argument from a native value), or the return value of a wrapper
//!   called from Python (build the Python result).
//!
//! Handlers are created fresh for every generation of a call site, so the
//! names they pick for locals never leak from one attempt to the next.

use std::rc::Rc;

use crate::block::CallSite;
use crate::context::TypeContext;
use crate::ctype::TypeDescriptor;
use crate::error::{CodegenError, CodegenResult, ConvertError};
use crate::model::{CallSignature, Direction, ParamDecl};
use crate::registry::{HandlerKind, Shape, TypeTransformation};

mod class;
mod container;
mod pyobject;
mod scalar;
mod string;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// One parameter of a call site, resolved against the parameter registry.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub kind: HandlerKind,
    /// The type as declared.
    pub requested: TypeDescriptor,
    /// The type the handler works on.
    pub descriptor: TypeDescriptor,
    pub transformation: Option<Rc<dyn TypeTransformation>>,
    pub direction: Direction,
    pub default_value: Option<String>,
    pub transfer_ownership: bool,
    pub null_ok: bool,
    pub custodian: Option<i32>,
    /// The Python wrapper local of a class parameter, once converted.
    pub py_name: Option<String>,
}

impl Parameter {
    pub fn new(decl: &ParamDecl, ctx: &TypeContext) -> CodegenResult<Self> {
        let found = ctx.params.lookup(&decl.ctype)?;
        let kind = found.kind;
        let descriptor = found.descriptor;

        if found.transformation.is_some() && !matches!(kind, HandlerKind::ClassByPointer(_)) {
            return Err(CodegenError::unsupported(format!(
                "type transformation of parameter {} ({})",
                decl.name, decl.ctype
            )));
        }

        let direction = match decl.direction {
            Some(direction) => {
                if !kind.supports(direction) {
                    return Err(CodegenError::config(format!(
                        "parameter {} of type {} does not support direction {direction:?}",
                        decl.name,
                        found.requested.ctype()
                    )));
                }
                direction
            }
            None => default_direction(kind, &descriptor, &decl.name)?,
        };

        let transfer_ownership = match kind {
            HandlerKind::ClassByPointer(_) => match decl.transfer_ownership {
                Some(transfer) => transfer,
                None if descriptor.target_is_const() => false,
                None => {
                    return Err(CodegenError::config(format!(
                        "missing transfer_ownership option for parameter {}",
                        decl.name
                    )));
                }
            },
            HandlerKind::RawPassthrough => decl.transfer_ownership.ok_or_else(|| {
                CodegenError::config(format!(
                    "missing transfer_ownership option for PyObject* parameter {}",
                    decl.name
                ))
            })?,
            HandlerKind::Container {
                shape: Shape::Pointer,
                ..
            } => container::pointer_transfer(decl, direction)?,
            HandlerKind::Scalar {
                shape: Shape::Pointer,
                ..
            }
            | HandlerKind::Enum {
                shape: Shape::Pointer,
                ..
            }
            | HandlerKind::String {
                shape: Shape::Pointer,
                ..
            } => {
                if decl.transfer_ownership == Some(true) {
                    return Err(CodegenError::unsupported(format!(
                        "transfer_ownership on pointer to {}",
                        descriptor.target_ctype().unwrap_or_default()
                    )));
                }
                false
            }
            _ => false,
        };

        if decl.null_ok && !matches!(kind, HandlerKind::ClassByPointer(_)) {
            return Err(CodegenError::config(format!(
                "null_ok is only valid for class pointers (parameter {})",
                decl.name
            )));
        }
        if decl.custodian.is_some() && !matches!(kind, HandlerKind::ClassByPointer(_)) {
            return Err(CodegenError::config(format!(
                "custodian is only valid for class pointers (parameter {})",
                decl.name
            )));
        }
        if let HandlerKind::Container { shape, .. } = kind {
            container::check_parameter(shape, direction, decl)?;
        }

        Ok(Self {
            name: decl.name.clone(),
            kind,
            requested: found.requested,
            descriptor,
            transformation: found.transformation,
            direction,
            default_value: decl.default.clone(),
            transfer_ownership,
            null_ok: decl.null_ok,
            custodian: decl.custodian,
            py_name: None,
        })
    }

    /// Declared spelling, for prototypes.
    pub fn ctype(&self) -> String {
        self.requested.ctype()
    }

    /// The native value of this parameter inside a virtual proxy.
    pub(crate) fn value(&self) -> String {
        match &self.transformation {
            Some(t) => t.untransform(&self.requested, &self.name),
            None => self.name.clone(),
        }
    }

    /// Parse the Python argument and push the native call argument.
    pub fn python_to_c(&mut self, site: &mut CallSite, ctx: &TypeContext) -> Result<(), ConvertError> {
        match self.kind {
            HandlerKind::Void => Err(ConvertError::Unimplemented),
            HandlerKind::Scalar { kind, shape } => {
                scalar::param_python_to_c(self, scalar::Numeric::scalar(kind), shape, site)
            }
            HandlerKind::Enum { shape, .. } => scalar::param_python_to_c(self, scalar::Numeric::ENUM, shape, site),
            HandlerKind::String { kind, shape } => string::param_python_to_c(self, kind, shape, site),
            HandlerKind::ClassByValue(id) => class::value_param_python_to_c(self, ctx.class(id), ctx, site),
            HandlerKind::ClassByRef(id) => class::ref_param_python_to_c(self, ctx.class(id), ctx, site),
            HandlerKind::ClassByPointer(id) => class::ptr_param_python_to_c(self, ctx.class(id), site),
            HandlerKind::Container { id, shape } => {
                container::param_python_to_c(self, ctx.container(id), shape, site)
            }
            HandlerKind::RawPassthrough => pyobject::param_python_to_c(self, site),
        }
    }

    /// Build a Python argument from the native parameter value.
    pub fn c_to_python(&mut self, site: &mut CallSite, ctx: &TypeContext) -> Result<(), ConvertError> {
        match self.kind {
            HandlerKind::Void => Err(ConvertError::Unimplemented),
            HandlerKind::Scalar { kind, shape } => {
                scalar::param_c_to_python(self, scalar::Numeric::scalar(kind), shape, site)
            }
            HandlerKind::Enum { shape, .. } => scalar::param_c_to_python(self, scalar::Numeric::ENUM, shape, site),
            HandlerKind::String { kind, shape } => string::param_c_to_python(self, kind, shape, site),
            HandlerKind::ClassByValue(id) => class::value_param_c_to_python(self, ctx.class(id), site),
            HandlerKind::ClassByRef(id) => class::ref_param_c_to_python(self, ctx.class(id), site),
            HandlerKind::ClassByPointer(id) => class::ptr_param_c_to_python(self, ctx.class(id), site),
            HandlerKind::Container { id, shape } => {
                container::param_c_to_python(self, ctx.container(id), shape, site)
            }
            HandlerKind::RawPassthrough => pyobject::param_c_to_python(self, site),
        }
    }
}

/// Direction used when a parameter does not name one.
///
/// Pointers to mutable data could be outputs, so they must say; everything
/// else is an input.
fn default_direction(kind: HandlerKind, descriptor: &TypeDescriptor, name: &str) -> CodegenResult<Direction> {
    let needs_explicit = match kind {
        HandlerKind::Scalar { shape, .. }
        | HandlerKind::Enum { shape, .. }
        | HandlerKind::String { shape, .. }
        | HandlerKind::Container { shape, .. } => shape == Shape::Pointer,
        _ => false,
    };
    if needs_explicit && !descriptor.target_is_const() {
        return Err(CodegenError::config(format!(
            "direction not given for non-const pointer parameter {name}"
        )));
    }
    Ok(Direction::In)
}

// ---------------------------------------------------------------------------
// Return values
// ---------------------------------------------------------------------------

/// The return value of a call site, resolved against the return registry.
#[derive(Debug, Clone)]
pub struct ReturnValue {
    pub kind: HandlerKind,
    pub requested: TypeDescriptor,
    pub descriptor: TypeDescriptor,
    pub transformation: Option<Rc<dyn TypeTransformation>>,
    pub caller_owns_return: bool,
    pub reference_existing_object: bool,
    pub return_internal_reference: bool,
    pub custodian: Option<i32>,
    /// Name of the native local holding the value.
    pub value: String,
    /// The Python wrapper local of a class return value, once converted.
    pub py_name: Option<String>,
}

impl ReturnValue {
    pub fn new(sig: &CallSignature, ctx: &TypeContext) -> CodegenResult<Self> {
        let found = ctx.returns.lookup(&sig.return_type)?;
        let kind = found.kind;

        if found.transformation.is_some() && !matches!(kind, HandlerKind::ClassByPointer(_)) {
            return Err(CodegenError::unsupported(format!(
                "type transformation of return type {}",
                sig.return_type
            )));
        }

        let is_class_ref = matches!(kind, HandlerKind::ClassByPointer(_) | HandlerKind::ClassByRef(_));
        if (sig.return_custodian.is_some() || sig.return_internal_reference) && !is_class_ref {
            return Err(CodegenError::config(format!(
                "custodian annotations need a class pointer or reference return, not {}",
                sig.return_type
            )));
        }

        let reference_existing_object = sig.reference_existing_object || sig.return_internal_reference;
        let caller_owns_return = match kind {
            HandlerKind::ClassByPointer(_) => match sig.caller_owns_return {
                Some(owns) => owns,
                None if found.descriptor.target_is_const() || reference_existing_object => false,
                None => {
                    return Err(CodegenError::config(format!(
                        "either caller_owns_return or reference_existing_object must be given \
                         for return type {}",
                        sig.return_type
                    )));
                }
            },
            HandlerKind::RawPassthrough => sig.caller_owns_return.ok_or_else(|| {
                CodegenError::config("missing caller_owns_return option for PyObject* return")
            })?,
            _ => sig.caller_owns_return.unwrap_or(false),
        };

        Ok(Self {
            kind,
            requested: found.requested,
            descriptor: found.descriptor,
            transformation: found.transformation,
            caller_owns_return,
            reference_existing_object,
            return_internal_reference: sig.return_internal_reference,
            custodian: sig.return_custodian,
            value: "retval".to_string(),
            py_name: None,
        })
    }

    pub fn is_void(&self) -> bool {
        self.kind == HandlerKind::Void
    }

    /// The native call result must initialize `retval` in its declaration
    /// (`Foo retval = call();`) instead of being assigned to it.
    pub fn requires_assignment_constructor(&self) -> bool {
        matches!(self.kind, HandlerKind::ClassByValue(_) | HandlerKind::ClassByRef(_))
    }

    /// Type of the `retval` local, with classes spelled by their qualified
    /// name.
    pub fn ctype(&self, ctx: &TypeContext) -> String {
        let qualified = |full: &str, suffix: &str| {
            if self.descriptor.target_is_const() {
                format!("{full} const {suffix}")
            } else {
                format!("{full} {suffix}")
            }
        };
        match self.kind {
            HandlerKind::ClassByValue(id) => ctx.class(id).full_name.clone(),
            HandlerKind::ClassByRef(id) => qualified(&ctx.class(id).full_name, "&"),
            HandlerKind::ClassByPointer(id) if self.transformation.is_none() => {
                qualified(&ctx.class(id).full_name, "*")
            }
            HandlerKind::Enum { id, .. } => ctx.enum_info(id).full_name.clone(),
            HandlerKind::Container { id, .. } => ctx.container(id).full_name.clone(),
            _ => self.requested.ctype_no_const(),
        }
    }

    /// Statement a native function of this return type uses to bail out.
    pub fn error_return(&self, ctx: &TypeContext) -> CodegenResult<String> {
        match self.kind {
            HandlerKind::Void => Ok("return;".to_string()),
            HandlerKind::Scalar { kind, .. } => Ok(kind.error_return().to_string()),
            HandlerKind::Enum { id, .. } => Ok(format!("return ({}) 0;", ctx.enum_info(id).full_name)),
            HandlerKind::String { .. } | HandlerKind::ClassByPointer(_) | HandlerKind::RawPassthrough => {
                Ok("return NULL;".to_string())
            }
            HandlerKind::ClassByValue(id) => Ok(format!("return {}();", ctx.class(id).construct_name()?)),
            HandlerKind::ClassByRef(_) => Err(CodegenError::unsupported(
                "error return of a function returning a class reference",
            )),
            HandlerKind::Container { id, .. } => Ok(format!("return {}();", ctx.container(id).full_name)),
        }
    }

    /// Build the Python result from `retval`.
    pub fn c_to_python(&mut self, site: &mut CallSite, ctx: &TypeContext) -> Result<(), ConvertError> {
        match self.kind {
            HandlerKind::Void => Ok(()),
            HandlerKind::Scalar { kind, .. } => {
                scalar::return_c_to_python(self, scalar::Numeric::scalar(kind), site)
            }
            HandlerKind::Enum { .. } => scalar::return_c_to_python(self, scalar::Numeric::ENUM, site),
            HandlerKind::String { kind, .. } => string::return_c_to_python(self, kind, site),
            HandlerKind::ClassByValue(id) => class::value_return_c_to_python(self, ctx.class(id), site),
            HandlerKind::ClassByRef(id) => class::ref_return_c_to_python(self, ctx.class(id), site),
            HandlerKind::ClassByPointer(id) => class::ptr_return_c_to_python(self, ctx.class(id), site),
            HandlerKind::Container { id, .. } => container::return_c_to_python(self, ctx.container(id), site),
            HandlerKind::RawPassthrough => pyobject::return_c_to_python(self, site),
        }
    }

    /// Parse the value a Python override returned into `retval`.
    pub fn python_to_c(&mut self, site: &mut CallSite, ctx: &TypeContext) -> Result<(), ConvertError> {
        match self.kind {
            HandlerKind::Void => Ok(()),
            HandlerKind::Scalar { kind, .. } => {
                scalar::return_python_to_c(self, scalar::Numeric::scalar(kind), site)
            }
            HandlerKind::Enum { .. } => scalar::return_python_to_c(self, scalar::Numeric::ENUM, site),
            HandlerKind::String { kind, .. } => string::return_python_to_c(self, kind, site),
            HandlerKind::ClassByValue(id) => class::value_return_python_to_c(self, ctx.class(id), site),
            HandlerKind::ClassByRef(_) => Err(CodegenError::unsupported(
                "returning a class reference from a Python override",
            )
            .into()),
            HandlerKind::ClassByPointer(id) => class::ptr_return_python_to_c(self, ctx.class(id), site),
            HandlerKind::Container { id, .. } => container::return_python_to_c(self, ctx.container(id), site),
            HandlerKind::RawPassthrough => pyobject::return_python_to_c(self, site),
        }
    }
}
