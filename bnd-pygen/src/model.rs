//! Declaration model: the bridge between the TOML configuration and wrapper
//! generation.
//!
//! These types carry no generation state. The scan layer in
//! [`extract`](crate::extract) resolves them against a
//! [`TypeContext`](crate::context::TypeContext) into handlers and wrappers.

use serde::Deserialize;

/// Which way a parameter value crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    /// The value flows from the caller into the callee.
    pub fn has_in(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    /// The value flows back out of the callee.
    pub fn has_out(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// C++ member access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

/// One parameter of a callable.
#[derive(Debug, Clone, Deserialize)]
pub struct ParamDecl {
    /// C++ type spelling, e.g. `const std::string &`.
    #[serde(rename = "type")]
    pub ctype: String,
    pub name: String,
    /// `None` means the handler picks its default.
    #[serde(default)]
    pub direction: Option<Direction>,
    /// Default value literal, making the parameter optional.
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub transfer_ownership: Option<bool>,
    /// Accept `None` for a pointer-to-class parameter.
    #[serde(default)]
    pub null_ok: bool,
    /// Keep the object named here alive as long as this parameter's wrapper:
    /// `-1` return value, `0` self, `n` the n-th parameter.
    #[serde(default)]
    pub custodian: Option<i32>,
}

/// One concrete overload candidate.
///
/// Used for functions, methods and constructors; fields that make no sense
/// for a kind of callable are ignored by it.
#[derive(Debug, Clone, Deserialize)]
pub struct CallSignature {
    /// C++ name. Unused for constructors.
    #[serde(default)]
    pub name: String,
    /// Name exposed to Python. Defaults to `name`.
    #[serde(default)]
    pub python_name: Option<String>,
    #[serde(rename = "return", default = "default_return")]
    pub return_type: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    #[serde(rename = "pure_virtual", default)]
    pub is_pure_virtual: bool,
    #[serde(rename = "const", default)]
    pub is_const: bool,
    #[serde(rename = "static", default)]
    pub is_static: bool,
    #[serde(default)]
    pub template_parameters: Vec<String>,

    // Return value annotations.
    #[serde(default)]
    pub caller_owns_return: Option<bool>,
    #[serde(default)]
    pub reference_existing_object: bool,
    #[serde(default)]
    pub return_internal_reference: bool,
    #[serde(default)]
    pub return_custodian: Option<i32>,

    /// Emit a `DeprecationWarning` with this message on every call.
    #[serde(default)]
    pub deprecated: Option<String>,
    /// Release the GIL around the native call. Overrides the module setting.
    #[serde(default)]
    pub unblock_threads: Option<bool>,
    /// Declared exceptions the native call may throw, caught in this order.
    #[serde(default)]
    pub throw: Vec<String>,
}

/// A data member exposed as a Python attribute.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeDecl {
    /// C++ member name.
    pub name: String,
    #[serde(rename = "type")]
    pub ctype: String,
    /// Name exposed to Python. Defaults to `name`.
    #[serde(default)]
    pub python_name: Option<String>,
    /// A class member, reached through the class object rather than
    /// instances.
    #[serde(rename = "static", default)]
    pub is_static: bool,
    /// No setter: assigning raises `AttributeError`.
    #[serde(default)]
    pub read_only: bool,
    /// Member function returning the value, used instead of the data member.
    #[serde(default)]
    pub getter: Option<String>,
    /// Member function taking the new value, used instead of assignment.
    #[serde(default)]
    pub setter: Option<String>,
}

impl AttributeDecl {
    pub fn new(name: &str, ctype: &str) -> Self {
        Self {
            name: name.to_string(),
            ctype: ctype.to_string(),
            python_name: None,
            is_static: false,
            read_only: false,
            getter: None,
            setter: None,
        }
    }

    pub fn python_name(&self) -> &str {
        self.python_name.as_deref().unwrap_or(&self.name)
    }
}

fn default_return() -> String {
    "void".to_string()
}

impl CallSignature {
    /// A public, non-virtual callable with no annotations.
    pub fn new(name: &str, return_type: &str, params: Vec<ParamDecl>) -> Self {
        Self {
            name: name.to_string(),
            python_name: None,
            return_type: return_type.to_string(),
            params,
            visibility: Visibility::Public,
            is_virtual: false,
            is_pure_virtual: false,
            is_const: false,
            is_static: false,
            template_parameters: Vec::new(),
            caller_owns_return: None,
            reference_existing_object: false,
            return_internal_reference: false,
            return_custodian: None,
            deprecated: None,
            unblock_threads: None,
            throw: Vec::new(),
        }
    }

    pub fn python_name(&self) -> &str {
        self.python_name.as_deref().unwrap_or(&self.name)
    }

    /// The name used in the native call, including template arguments.
    pub fn call_name(&self) -> String {
        if self.template_parameters.is_empty() {
            self.name.clone()
        } else {
            format!("{}< {} >", self.name, self.template_parameters.join(", "))
        }
    }
}

impl ParamDecl {
    /// An input parameter with no annotations.
    pub fn new(ctype: &str, name: &str) -> Self {
        Self {
            ctype: ctype.to_string(),
            name: name.to_string(),
            direction: None,
            default: None,
            transfer_ownership: None,
            null_ok: false,
            custodian: None,
        }
    }
}
