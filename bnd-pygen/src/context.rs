//! Generation context: the two type registries plus everything known about
//! wrapped classes, enums and containers, and the module-wide settings.
//!
//! The scan phase mutates a [`TypeContext`]; generation only reads it.

use std::rc::Rc;

use serde::Deserialize;

use crate::ctype::{mangle_name, normalize_type_string};
use crate::error::{CodegenError, CodegenResult};
use crate::registry::{HandlerKind, Position, Shape, TypeRegistry, TypeTransformation, register_builtin_handlers};
use crate::wrapper_registry::{WrapperRegistry, WrapperRegistryKind};

/// Module-wide generation settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Inserted, capitalized, into every generated struct name.
    pub name_prefix: String,
    /// Default for classes that do not say otherwise.
    pub allow_subclassing: bool,
    /// Release the GIL around every native call.
    pub unblock_threads: bool,
    pub wrapper_registry: WrapperRegistryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionId(pub usize);

/// How the native object behind a wrapper is released.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MemoryPolicy {
    /// `delete obj;`
    #[default]
    Delete,
    /// Intrusive reference counting through two member functions.
    ReferenceCounting { incref: String, decref: String },
    /// `free_function(obj);`
    FreeFunction { free_function: String },
}

impl MemoryPolicy {
    pub fn is_reference_counting(&self) -> bool {
        matches!(self, MemoryPolicy::ReferenceCounting { .. })
    }

    /// Statement taking a new reference to `obj`, if the policy counts
    /// references.
    pub fn incref_code(&self, obj: &str) -> Option<String> {
        match self {
            MemoryPolicy::ReferenceCounting { incref, .. } => Some(format!("{obj}->{incref}();")),
            _ => None,
        }
    }

    pub fn decref_code(&self, obj: &str) -> Option<String> {
        match self {
            MemoryPolicy::ReferenceCounting { decref, .. } => Some(format!("{obj}->{decref}();")),
            _ => None,
        }
    }

    /// Statement releasing the native object owned by a wrapper.
    pub fn free_code(&self, obj: &str) -> String {
        match self {
            MemoryPolicy::Delete => format!("delete {obj};"),
            MemoryPolicy::ReferenceCounting { decref, .. } => format!("{obj}->{decref}();"),
            MemoryPolicy::FreeFunction { free_function } => format!("{free_function}({obj});"),
        }
    }
}

/// A wrapped C++ class.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// Name as written inside its namespace.
    pub name: String,
    /// Fully qualified name.
    pub full_name: String,
    /// Python-visible name.
    pub python_name: String,
    /// C struct of the Python wrapper object.
    pub pystruct: String,
    /// The `PyTypeObject` of the wrapper.
    pub pytypestruct: String,
    pub memory_policy: MemoryPolicy,
    /// Classes whose instances are accepted where this class is expected,
    /// in declaration order.
    pub implicit_conversion_sources: Vec<ClassId>,
    pub allow_subclassing: bool,
    /// Has an accessible copy constructor.
    pub copyable: bool,
    /// C++ subclass forwarding virtual calls to Python overrides.
    pub helper_class: Option<String>,
    /// Why instances cannot be created by the wrapper, if they cannot.
    pub cannot_be_constructed: Option<String>,
    pub has_pure_virtual_methods: bool,
    pub registry: WrapperRegistry,
    /// The `PyTypeObject` of the metaclass holding static attributes.
    pub metaclass: Option<String>,
}

/// Capitalize the first letter of each `::` segment and join them:
/// `ns::fooBar` becomes `NsFooBar`.
pub fn flatten_name(name: &str) -> String {
    name.split("::")
        .map(|segment| {
            let mangled = mangle_name(segment);
            let mut chars = mangled.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

impl ClassInfo {
    /// Derive the generated names of a class from its name and namespace.
    pub fn new(name: &str, namespace: Option<&str>, settings: &Settings) -> Self {
        let full_name = match namespace {
            Some(ns) if !ns.is_empty() => format!("{}::{name}", ns.trim_start_matches("::")),
            _ => name.to_string(),
        };
        let prefix = capitalize(&settings.name_prefix);
        let mangled = flatten_name(&full_name);
        let pystruct = format!("Py{prefix}{mangled}");
        Self {
            name: name.to_string(),
            python_name: if name.contains('<') { mangle_name(name) } else { name.to_string() },
            pytypestruct: format!("{pystruct}_Type"),
            memory_policy: MemoryPolicy::default(),
            implicit_conversion_sources: Vec::new(),
            allow_subclassing: settings.allow_subclassing,
            copyable: true,
            helper_class: None,
            cannot_be_constructed: None,
            has_pure_virtual_methods: false,
            registry: WrapperRegistry::new(settings.wrapper_registry, &pystruct),
            metaclass: None,
            pystruct,
            full_name,
        }
    }

    /// Struct name of the metaclass, `Py...Meta`.
    pub fn metaclass_struct(&self) -> String {
        format!("{}Meta", self.pystruct)
    }

    /// The type name usable in `new`, or why there is none.
    pub fn construct_name(&self) -> CodegenResult<&str> {
        if let Some(reason) = &self.cannot_be_constructed {
            return Err(CodegenError::codegen(format!(
                "{} cannot be constructed ({reason})",
                self.full_name
            )));
        }
        if self.has_pure_virtual_methods {
            return Err(CodegenError::codegen(format!(
                "{} cannot be constructed (class has pure virtual methods)",
                self.full_name
            )));
        }
        Ok(&self.full_name)
    }

    /// `lvalue = new Class(args);`
    pub fn create_instance_code(&self, lvalue: &str, args: &str) -> CodegenResult<String> {
        Ok(format!("{lvalue} = new {}({args});", self.construct_name()?))
    }
}

/// A wrapped C++ enum. Values cross the boundary as `int`.
#[derive(Debug, Clone)]
pub struct EnumInfo {
    pub name: String,
    pub full_name: String,
    pub values: Vec<String>,
}

/// A wrapped STL-style container.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub name: String,
    pub full_name: String,
    pub pystruct: String,
    pub pytypestruct: String,
    /// `int converter(PyObject *, Container *)` used with the `O&` format.
    pub python_to_c_converter: String,
}

impl ContainerInfo {
    pub fn new(name: &str, full_name: &str, settings: &Settings) -> Self {
        let full_name = normalize_type_string(full_name);
        let prefix = capitalize(&settings.name_prefix);
        let mangled = mangle_name(&full_name);
        let pystruct = format!("Py{prefix}{}", flatten_name(name));
        Self {
            name: name.to_string(),
            pytypestruct: format!("{pystruct}_Type"),
            pystruct,
            python_to_c_converter: format!("_wrap_convert_py2c__{mangled}"),
            full_name,
        }
    }
}

/// A C++ exception type translated into a Python exception class.
#[derive(Debug, Clone)]
pub struct ExceptionInfo {
    pub name: String,
    pub full_name: String,
    pub python_name: String,
    /// `PyTypeObject *` variable holding the Python exception class,
    /// created at module init.
    pub pytypestruct: String,
    pub base: Option<ExceptionId>,
    /// `char const *` rvalue over the caught exception `exc`.
    pub message_rvalue: Option<String>,
}

impl ExceptionInfo {
    pub fn new(name: &str, namespace: Option<&str>, settings: &Settings) -> Self {
        let full_name = match namespace {
            Some(ns) if !ns.is_empty() => format!("{}::{name}", ns.trim_start_matches("::")),
            _ => name.to_string(),
        };
        let prefix = capitalize(&settings.name_prefix);
        Self {
            name: name.to_string(),
            python_name: name.to_string(),
            pytypestruct: format!("Py{prefix}{}_Type", mangle_name(&full_name)),
            base: None,
            message_rvalue: None,
            full_name,
        }
    }

    /// Statement setting the Python error for a caught `exc`.
    pub fn raise_code(&self) -> String {
        match &self.message_rvalue {
            Some(message) => format!("PyErr_SetString((PyObject *) {}, {message});", self.pytypestruct),
            None => format!("PyErr_SetNone((PyObject *) {});", self.pytypestruct),
        }
    }
}

/// Registries, wrapped types and settings for one generation pass.
#[derive(Debug)]
pub struct TypeContext {
    pub params: TypeRegistry,
    pub returns: TypeRegistry,
    pub settings: Settings,
    classes: Vec<ClassInfo>,
    enums: Vec<EnumInfo>,
    containers: Vec<ContainerInfo>,
    exceptions: Vec<ExceptionInfo>,
}

impl TypeContext {
    /// An empty context: no handler is registered, not even the builtins.
    pub fn new(settings: Settings) -> Self {
        Self {
            params: TypeRegistry::new(Position::Parameter),
            returns: TypeRegistry::new(Position::Return),
            settings,
            classes: Vec::new(),
            enums: Vec::new(),
            containers: Vec::new(),
            exceptions: Vec::new(),
        }
    }

    /// A context with the builtin handlers registered.
    pub fn with_builtins(settings: Settings) -> Self {
        let mut ctx = Self::new(settings);
        register_builtin_handlers(&mut ctx);
        ctx
    }

    pub fn registry(&self, position: Position) -> &TypeRegistry {
        match position {
            Position::Parameter => &self.params,
            Position::Return => &self.returns,
        }
    }

    /// Alias two spellings in both registries.
    pub fn add_alias(&mut self, from: &str, to: &str) {
        self.params.add_alias(from, to);
        self.returns.add_alias(from, to);
    }

    pub fn add_transformation(&mut self, transformation: Rc<dyn TypeTransformation>) {
        self.params.add_transformation(Rc::clone(&transformation));
        self.returns.add_transformation(transformation);
    }

    /// Register a class under its short and qualified names, by value,
    /// by reference and by pointer.
    pub fn add_class(&mut self, info: ClassInfo) -> ClassId {
        let id = ClassId(self.classes.len());
        let names = [info.name.clone(), info.full_name.clone()];
        for name in &names {
            self.params.register(name, HandlerKind::ClassByValue(id));
            self.params.register(&format!("{name} &"), HandlerKind::ClassByRef(id));
            self.params.register(&format!("{name} *"), HandlerKind::ClassByPointer(id));
            self.returns.register(name, HandlerKind::ClassByValue(id));
            self.returns.register(&format!("{name} &"), HandlerKind::ClassByRef(id));
            self.returns.register(&format!("{name} *"), HandlerKind::ClassByPointer(id));
        }
        self.classes.push(info);
        id
    }

    pub fn add_enum(&mut self, info: EnumInfo) -> EnumId {
        let id = EnumId(self.enums.len());
        let names = [info.name.clone(), info.full_name.clone()];
        for name in &names {
            for (suffix, shape) in [("", Shape::Value), (" *", Shape::Pointer), (" &", Shape::Reference)] {
                self.params.register(&format!("{name}{suffix}"), HandlerKind::Enum { id, shape });
            }
            self.returns.register(name, HandlerKind::Enum { id, shape: Shape::Value });
        }
        self.enums.push(info);
        id
    }

    pub fn add_container(&mut self, info: ContainerInfo) -> ContainerId {
        let id = ContainerId(self.containers.len());
        let names = [info.name.clone(), info.full_name.clone()];
        for name in &names {
            for (suffix, shape) in [("", Shape::Value), (" *", Shape::Pointer), (" &", Shape::Reference)] {
                self.params.register(&format!("{name}{suffix}"), HandlerKind::Container { id, shape });
            }
            self.returns.register(name, HandlerKind::Container { id, shape: Shape::Value });
        }
        self.containers.push(info);
        id
    }

    /// Exceptions are not types of parameters or return values, so they stay
    /// out of the registries.
    pub fn add_exception(&mut self, info: ExceptionInfo) -> ExceptionId {
        let id = ExceptionId(self.exceptions.len());
        self.exceptions.push(info);
        id
    }

    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassInfo {
        &mut self.classes[id.0]
    }

    pub fn enum_info(&self, id: EnumId) -> &EnumInfo {
        &self.enums[id.0]
    }

    pub fn container(&self, id: ContainerId) -> &ContainerInfo {
        &self.containers[id.0]
    }

    pub fn exception(&self, id: ExceptionId) -> &ExceptionInfo {
        &self.exceptions[id.0]
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &ClassInfo)> {
        self.classes.iter().enumerate().map(|(i, c)| (ClassId(i), c))
    }

    pub fn containers(&self) -> impl Iterator<Item = (ContainerId, &ContainerInfo)> {
        self.containers.iter().enumerate().map(|(i, c)| (ContainerId(i), c))
    }

    pub fn enums(&self) -> impl Iterator<Item = (EnumId, &EnumInfo)> {
        self.enums.iter().enumerate().map(|(i, e)| (EnumId(i), e))
    }

    pub fn exceptions(&self) -> impl Iterator<Item = (ExceptionId, &ExceptionInfo)> {
        self.exceptions.iter().enumerate().map(|(i, e)| (ExceptionId(i), e))
    }

    /// Find an exception by short or qualified name.
    pub fn find_exception(&self, name: &str) -> Option<ExceptionId> {
        let name = normalize_type_string(name);
        self.exceptions
            .iter()
            .position(|e| e.name == name || e.full_name == name)
            .map(ExceptionId)
    }

    /// Find a class by short or qualified name.
    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        let name = normalize_type_string(name);
        self.classes
            .iter()
            .position(|c| c.name == name || c.full_name == name)
            .map(ClassId)
    }
}
