//! Configuration types for `bnd-pygen.toml`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::context::{MemoryPolicy, Settings};
use crate::model::{AttributeDecl, CallSignature};

/// Root configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub output: OutputConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, rename = "alias")]
    pub aliases: Vec<AliasConfig>,
    #[serde(default, rename = "smart_pointer")]
    pub smart_pointers: Vec<SmartPointerConfig>,
    #[serde(default, rename = "enum")]
    pub enums: Vec<EnumConfig>,
    #[serde(default, rename = "container")]
    pub containers: Vec<ContainerConfig>,
    #[serde(default, rename = "exception")]
    pub exceptions: Vec<ExceptionConfig>,
    #[serde(default, rename = "class")]
    pub classes: Vec<ClassConfig>,
    #[serde(default, rename = "function")]
    pub functions: Vec<CallSignature>,
    #[serde(default, rename = "custom_function")]
    pub custom_functions: Vec<CustomConfig>,
}

/// Output file settings.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Python module name, also used for `PyInit_<module>`.
    pub module: String,
    /// Output file path. Defaults to `<module>module.cc`.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Extra `#include` targets, written verbatim: `"foo.h"` or `<foo>`.
    #[serde(default)]
    pub includes: Vec<String>,
}

impl OutputConfig {
    pub fn file(&self) -> PathBuf {
        match &self.file {
            Some(file) => file.clone(),
            None => PathBuf::from(format!("{}module.cc", self.module)),
        }
    }
}

/// A typedef-like alias: `from` is looked up as `to`.
#[derive(Debug, Deserialize)]
pub struct AliasConfig {
    pub from: String,
    pub to: String,
}

/// A smart pointer template crossing the boundary as its pointee.
///
/// ```toml
/// [[smart_pointer]]
/// template = "Ptr"
/// getter = "get"
/// ```
#[derive(Debug, Deserialize)]
pub struct SmartPointerConfig {
    pub template: String,
    #[serde(default = "default_getter")]
    pub getter: String,
}

fn default_getter() -> String {
    "get".to_string()
}

#[derive(Debug, Deserialize)]
pub struct EnumConfig {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContainerConfig {
    /// Short name, used for the Python type.
    pub name: String,
    /// The C++ type, e.g. `std::vector<std::string>`.
    pub full_name: String,
}

/// A C++ exception type raised in Python as an exception class of its own.
///
/// ```toml
/// [[exception]]
/// name = "exception"
/// namespace = "std"
/// message = "exc.what()"
/// ```
#[derive(Debug, Deserialize)]
pub struct ExceptionConfig {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub python_name: Option<String>,
    /// Parent exception; must be declared earlier.
    #[serde(default)]
    pub base: Option<String>,
    /// `char const *` expression over the caught exception, bound to `exc`.
    /// Without it the Python exception carries no message.
    #[serde(default)]
    pub message: Option<String>,
}

impl ExceptionConfig {
    pub fn full_name(&self) -> String {
        qualified_name(self.namespace.as_deref(), &self.name)
    }
}

/// A wrapped C++ class and its members.
#[derive(Debug, Deserialize)]
pub struct ClassConfig {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub python_name: Option<String>,
    #[serde(default = "default_true")]
    pub copyable: bool,
    /// Reason reported when Python code tries to instantiate the class.
    #[serde(default)]
    pub cannot_be_constructed: Option<String>,
    #[serde(default)]
    pub memory_policy: MemoryPolicy,
    /// Classes that accept this one wherever they are expected.
    #[serde(default)]
    pub implicitly_converts_to: Vec<String>,
    /// Overrides `settings.allow_subclassing` for this class.
    #[serde(default)]
    pub allow_subclassing: Option<bool>,
    #[serde(default, rename = "constructor")]
    pub constructors: Vec<CallSignature>,
    #[serde(default, rename = "method")]
    pub methods: Vec<CallSignature>,
    #[serde(default, rename = "custom_method")]
    pub custom_methods: Vec<CustomConfig>,
    #[serde(default, rename = "attribute")]
    pub attributes: Vec<AttributeDecl>,
}

impl ClassConfig {
    pub fn full_name(&self) -> String {
        qualified_name(self.namespace.as_deref(), &self.name)
    }
}

fn qualified_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}::{name}", ns.trim_start_matches("::")),
        _ => name.to_string(),
    }
}

fn default_true() -> bool {
    true
}

/// A hand-written wrapper entering an overload group.
///
/// The body must follow the delegate calling convention: it receives the
/// usual arguments plus `PyObject **return_exception`.
#[derive(Debug, Deserialize)]
pub struct CustomConfig {
    pub python_name: String,
    pub wrapper_name: String,
    /// Full C definition. Omit when the wrapper is defined elsewhere.
    #[serde(default)]
    pub body: Option<String>,
}

/// Load and parse a `bnd-pygen.toml` configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path.display(), e))?;
    parse_config(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path.display(), e))
}

/// Parse configuration text.
pub fn parse_config(content: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, Visibility};
    use crate::wrapper_registry::WrapperRegistryKind;

    #[test]
    fn parses_full_config() {
        let cfg = parse_config(
            r#"
[output]
module = "g2p"
includes = ['"g2p.h"']

[settings]
name_prefix = "g2p"
wrapper_registry = "std-map"

[[alias]]
from = "Real"
to = "double"

[[smart_pointer]]
template = "Ptr"

[[enum]]
name = "Color"
namespace = "ns"
values = ["RED", "GREEN"]

[[class]]
name = "Foo"
namespace = "ns"
cannot_be_constructed = "use the factory"
memory_policy = { kind = "reference-counting", incref = "Ref", decref = "Unref" }
implicitly_converts_to = ["Bar"]

[[class.method]]
name = "get"
return = "int"
const = true
virtual = true

[[class.method]]
name = "set"
visibility = "protected"
params = [{ type = "int", name = "x", direction = "inout" }]
throw = ["Oops"]

[[class.attribute]]
name = "size"
type = "int"
read_only = true

[[class.attribute]]
name = "count"
type = "unsigned int"
static = true

[[exception]]
name = "Oops"
namespace = "ns"
base = "Error"
message = "exc.what()"

[[function]]
name = "make"
return = "ns::Foo *"
caller_owns_return = true

[[custom_function]]
python_name = "make"
wrapper_name = "_wrap_custom_make"
"#,
        )
        .unwrap();

        assert_eq!(cfg.output.file(), PathBuf::from("g2pmodule.cc"));
        assert_eq!(cfg.output.includes, ["\"g2p.h\""]);
        assert_eq!(cfg.settings.wrapper_registry, WrapperRegistryKind::StdMap);
        assert!(!cfg.settings.allow_subclassing);
        assert_eq!(cfg.aliases[0].to, "double");
        assert_eq!(cfg.smart_pointers[0].getter, "get");
        assert_eq!(cfg.enums[0].values, ["RED", "GREEN"]);

        let foo = &cfg.classes[0];
        assert_eq!(foo.full_name(), "ns::Foo");
        assert!(foo.copyable);
        assert_eq!(foo.cannot_be_constructed.as_deref(), Some("use the factory"));
        assert!(foo.memory_policy.is_reference_counting());
        assert_eq!(foo.allow_subclassing, None);
        assert!(foo.methods[0].is_const && foo.methods[0].is_virtual);
        assert_eq!(foo.methods[1].visibility, Visibility::Protected);
        assert_eq!(foo.methods[1].params[0].direction, Some(Direction::InOut));
        assert_eq!(foo.methods[1].throw, ["Oops"]);
        assert!(foo.methods[0].throw.is_empty());
        assert!(foo.attributes[0].read_only && !foo.attributes[0].is_static);
        assert_eq!(foo.attributes[1].ctype, "unsigned int");
        assert!(foo.attributes[1].is_static && !foo.attributes[1].read_only);

        let oops = &cfg.exceptions[0];
        assert_eq!(oops.full_name(), "ns::Oops");
        assert_eq!(oops.base.as_deref(), Some("Error"));
        assert_eq!(oops.message.as_deref(), Some("exc.what()"));

        assert_eq!(cfg.functions[0].caller_owns_return, Some(true));
        assert_eq!(cfg.custom_functions[0].body, None);
    }

    #[test]
    fn explicit_output_file_wins() {
        let cfg = parse_config("[output]\nmodule = \"m\"\nfile = \"out/m.cpp\"\n").unwrap();
        assert_eq!(cfg.output.file(), PathBuf::from("out/m.cpp"));
        assert!(cfg.classes.is_empty());
    }

    #[test]
    fn missing_output_is_an_error() {
        assert!(parse_config("[settings]\n").is_err());
    }
}
