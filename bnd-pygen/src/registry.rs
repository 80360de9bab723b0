//! Type registry: resolves C++ type spellings to conversion handlers.
//!
//! Two registries exist, one for parameter positions and one for return
//! positions. A lookup normalizes the requested spelling, strips top-level
//! modifiers and then tries, in order:
//!
//! 1. the spelling itself,
//! 2. every alias reachable from it (aliases are symmetric),
//! 3. the reduced spelling of each registered [`TypeTransformation`], again
//!    with alias support.
//!
//! Every name tried along the way is reported if nothing matches.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::context::{ClassId, ContainerId, EnumId, TypeContext};
use crate::ctype::{CType, TypeDescriptor, normalize_type_string};
use crate::error::{CodegenError, CodegenResult};
use crate::model::Direction;

// ---------------------------------------------------------------------------
// Handler kinds
// ---------------------------------------------------------------------------

/// Which of the two registries a lookup goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Parameter,
    Return,
}

/// How a builtin type is spelled at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Value,
    Pointer,
    Reference,
}

/// Builtin arithmetic types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Char,
    Int8,
    UInt8,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    SizeT,
    Float,
    Double,
}

impl ScalarKind {
    /// `PyArg_ParseTuple`/`Py_BuildValue` format unit. `bool` has none of
    /// its own and goes through a `PyObject*`.
    pub fn format_unit(self) -> &'static str {
        match self {
            ScalarKind::Bool => "O",
            ScalarKind::Char => "c",
            ScalarKind::Int8 => "b",
            ScalarKind::UInt8 => "B",
            ScalarKind::Short => "h",
            ScalarKind::UShort => "H",
            ScalarKind::Int => "i",
            ScalarKind::UInt => "I",
            ScalarKind::Long => "l",
            ScalarKind::ULong => "k",
            ScalarKind::LongLong => "L",
            ScalarKind::ULongLong => "K",
            ScalarKind::SizeT => "n",
            ScalarKind::Float => "f",
            ScalarKind::Double => "d",
        }
    }

    /// Statement returning a failure value from a native function of this
    /// type.
    pub fn error_return(self) -> &'static str {
        match self {
            ScalarKind::Int => "return INT_MIN;",
            ScalarKind::Bool => "return false;",
            ScalarKind::Char => "return '\\0';",
            _ => "return 0;",
        }
    }
}

/// Builtin string types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringKind {
    /// `char *`, NUL-terminated.
    CString,
    StdString,
}

/// The closed set of conversion handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Void,
    Scalar { kind: ScalarKind, shape: Shape },
    String { kind: StringKind, shape: Shape },
    Enum { id: EnumId, shape: Shape },
    ClassByValue(ClassId),
    ClassByRef(ClassId),
    ClassByPointer(ClassId),
    Container { id: ContainerId, shape: Shape },
    /// `PyObject *`, passed through untouched.
    RawPassthrough,
}

const IN_ONLY: &[Direction] = &[Direction::In];
const ALL_DIRECTIONS: &[Direction] = &[Direction::In, Direction::Out, Direction::InOut];

impl HandlerKind {
    /// Directions a parameter of this kind may be declared with.
    pub fn directions(self) -> &'static [Direction] {
        match self {
            HandlerKind::Void => &[],
            HandlerKind::String {
                kind: StringKind::CString,
                ..
            } => IN_ONLY,
            HandlerKind::Scalar {
                shape: Shape::Value, ..
            }
            | HandlerKind::String {
                shape: Shape::Value, ..
            }
            | HandlerKind::Enum {
                shape: Shape::Value, ..
            }
            | HandlerKind::Container {
                shape: Shape::Value, ..
            }
            | HandlerKind::ClassByValue(_)
            | HandlerKind::ClassByPointer(_)
            | HandlerKind::RawPassthrough => IN_ONLY,
            HandlerKind::Scalar { .. }
            | HandlerKind::String { .. }
            | HandlerKind::Enum { .. }
            | HandlerKind::Container { .. }
            | HandlerKind::ClassByRef(_) => ALL_DIRECTIONS,
        }
    }

    pub fn supports(self, direction: Direction) -> bool {
        self.directions().contains(&direction)
    }

    /// The class behind a class handler.
    pub fn class_id(self) -> Option<ClassId> {
        match self {
            HandlerKind::ClassByValue(id) | HandlerKind::ClassByRef(id) | HandlerKind::ClassByPointer(id) => Some(id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transformations
// ---------------------------------------------------------------------------

/// A rule mapping a wrapped type spelling onto an already handled one, plus
/// the code that converts values between the two.
pub trait TypeTransformation: fmt::Debug {
    /// The spelling of the underlying type, or `None` if this
    /// transformation does not apply to `type_string`.
    fn untransformed_name(&self, type_string: &str) -> Option<String>;

    /// Wrap an untransformed value into the transformed type.
    fn transform(&self, transformed: &TypeDescriptor, value: &str) -> String;

    /// Extract the untransformed value from a transformed one.
    fn untransform(&self, transformed: &TypeDescriptor, value: &str) -> String;
}

/// `Ptr< Foo >` handled as `Foo *`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartPointerTransformation {
    /// Template name, e.g. `Ptr` or `std::shared_ptr`.
    pub template: String,
    /// Member function returning the raw pointer, e.g. `get`.
    pub getter: String,
}

impl SmartPointerTransformation {
    pub fn new(template: &str, getter: &str) -> Self {
        Self {
            template: normalize_type_string(template),
            getter: getter.to_string(),
        }
    }
}

impl TypeTransformation for SmartPointerTransformation {
    fn untransformed_name(&self, type_string: &str) -> Option<String> {
        let stripped = CType::parse(&TypeDescriptor::new(type_string).ctype_no_modifiers());
        match stripped.split_template() {
            Some((name, arg)) if name == self.template => Some(format!("{arg} *")),
            _ => None,
        }
    }

    fn transform(&self, transformed: &TypeDescriptor, value: &str) -> String {
        format!("{} ({value})", transformed.ctype_no_modifiers())
    }

    fn untransform(&self, _transformed: &TypeDescriptor, value: &str) -> String {
        format!("({value}).{}()", self.getter)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub kind: HandlerKind,
    /// Set when the match went through a transformation; values must then
    /// be converted with it on the way in and out.
    pub transformation: Option<Rc<dyn TypeTransformation>>,
    /// The type as requested.
    pub requested: TypeDescriptor,
    /// The type the handler works on. Differs from `requested` only after
    /// a transformation.
    pub descriptor: TypeDescriptor,
}

/// Maps normalized type strings to handlers.
#[derive(Debug)]
pub struct TypeRegistry {
    position: Position,
    handlers: HashMap<String, HandlerKind>,
    /// Symmetric: every alias is stored under both of its names.
    aliases: HashMap<String, Vec<String>>,
    transformations: Vec<Rc<dyn TypeTransformation>>,
}

impl TypeRegistry {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            handlers: HashMap::new(),
            aliases: HashMap::new(),
            transformations: Vec::new(),
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Claim a type string. Returns `false`, leaving the existing claim in
    /// place, if the normalized string is already claimed.
    pub fn register(&mut self, type_string: &str, kind: HandlerKind) -> bool {
        let name = normalize_type_string(type_string);
        if self.handlers.contains_key(&name) {
            debug!(position = ?self.position, name, "type already registered, keeping first handler");
            return false;
        }
        self.handlers.insert(name, kind);
        true
    }

    pub fn contains(&self, type_string: &str) -> bool {
        self.handlers.contains_key(&normalize_type_string(type_string))
    }

    /// Record that `from` and `to` name the same type. The pointer and
    /// reference spellings are recorded as well.
    pub fn add_alias(&mut self, from: &str, to: &str) {
        for suffix in ["", " *", " &"] {
            let a = normalize_type_string(&format!("{from}{suffix}"));
            let b = normalize_type_string(&format!("{to}{suffix}"));
            if a == b {
                continue;
            }
            self.link(&a, &b);
            self.link(&b, &a);
        }
    }

    fn link(&mut self, from: &str, to: &str) {
        let targets = self.aliases.entry(from.to_string()).or_default();
        if !targets.iter().any(|t| t == to) {
            targets.push(to.to_string());
        }
    }

    pub fn add_transformation(&mut self, transformation: Rc<dyn TypeTransformation>) {
        self.transformations.push(transformation);
    }

    /// Breadth-first search through the alias graph, starting at `name`.
    /// Every name that had no handler is appended to `tried`.
    fn lookup_with_aliases(&self, name: &str, tried: &mut Vec<String>) -> Option<HandlerKind> {
        let mut seen = HashSet::from([name.to_string()]);
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            if let Some(kind) = self.handlers.get(&current) {
                if current != name {
                    debug!(requested = name, alias = current, "resolved through alias");
                }
                return Some(*kind);
            }
            for alias in self.aliases.get(&current).into_iter().flatten() {
                if seen.insert(alias.clone()) {
                    queue.push_back(alias.clone());
                }
            }
            tried.push(current);
        }
        None
    }

    /// Resolve a type spelling to its handler.
    pub fn lookup(&self, type_string: &str) -> CodegenResult<Lookup> {
        let requested = TypeDescriptor::new(type_string);
        let name = requested.ctype_no_modifiers();
        let mut tried = Vec::new();

        if let Some(kind) = self.lookup_with_aliases(&name, &mut tried) {
            return Ok(Lookup {
                kind,
                transformation: None,
                descriptor: requested.clone(),
                requested,
            });
        }

        for transformation in &self.transformations {
            let Some(untransformed) = transformation.untransformed_name(type_string) else {
                continue;
            };
            let descriptor = TypeDescriptor::new(&untransformed);
            let reduced = descriptor.ctype_no_modifiers();
            if let Some(kind) = self.lookup_with_aliases(&reduced, &mut tried) {
                debug!(requested = name, reduced, "resolved through transformation");
                return Ok(Lookup {
                    kind,
                    transformation: Some(Rc::clone(transformation)),
                    requested,
                    descriptor,
                });
            }
        }

        Err(CodegenError::TypeLookup {
            requested: requested.ctype(),
            tried,
        })
    }
}

// ---------------------------------------------------------------------------
// Builtin handlers
// ---------------------------------------------------------------------------

/// Every spelling of each builtin scalar.
const SCALARS: &[(ScalarKind, &[&str])] = &[
    (ScalarKind::Bool, &["bool"]),
    (ScalarKind::Char, &["char"]),
    (ScalarKind::Int8, &["int8_t", "signed char"]),
    (ScalarKind::UInt8, &["uint8_t", "unsigned char"]),
    (ScalarKind::Short, &["short", "short int", "int16_t"]),
    (ScalarKind::UShort, &["unsigned short", "unsigned short int", "uint16_t"]),
    (ScalarKind::Int, &["int", "signed int", "int32_t"]),
    (ScalarKind::UInt, &["unsigned int", "unsigned", "uint32_t"]),
    (ScalarKind::Long, &["long", "long int"]),
    (ScalarKind::ULong, &["unsigned long", "unsigned long int"]),
    (ScalarKind::LongLong, &["long long", "long long int", "int64_t"]),
    (ScalarKind::ULongLong, &["unsigned long long", "unsigned long long int", "uint64_t"]),
    (ScalarKind::SizeT, &["size_t", "std::size_t"]),
    (ScalarKind::Float, &["float"]),
    (ScalarKind::Double, &["double"]),
];

/// Non-scalar builtins: (spelling, parameter handler, return handler).
const OTHERS: &[(&str, Option<HandlerKind>, Option<HandlerKind>)] = &[
    ("void", None, Some(HandlerKind::Void)),
    (
        "char *",
        Some(HandlerKind::String {
            kind: StringKind::CString,
            shape: Shape::Value,
        }),
        Some(HandlerKind::String {
            kind: StringKind::CString,
            shape: Shape::Value,
        }),
    ),
    (
        "std::string",
        Some(HandlerKind::String {
            kind: StringKind::StdString,
            shape: Shape::Value,
        }),
        Some(HandlerKind::String {
            kind: StringKind::StdString,
            shape: Shape::Value,
        }),
    ),
    (
        "std::string &",
        Some(HandlerKind::String {
            kind: StringKind::StdString,
            shape: Shape::Reference,
        }),
        None,
    ),
    (
        "std::string *",
        Some(HandlerKind::String {
            kind: StringKind::StdString,
            shape: Shape::Pointer,
        }),
        None,
    ),
    ("PyObject *", Some(HandlerKind::RawPassthrough), Some(HandlerKind::RawPassthrough)),
];

/// Populate both registries of `ctx` with the builtin handlers.
pub fn register_builtin_handlers(ctx: &mut TypeContext) {
    for (kind, spellings) in SCALARS {
        for spelling in *spellings {
            for (suffix, shape) in [("", Shape::Value), (" *", Shape::Pointer), (" &", Shape::Reference)] {
                ctx.params.register(
                    &format!("{spelling}{suffix}"),
                    HandlerKind::Scalar { kind: *kind, shape },
                );
            }
            ctx.returns.register(
                spelling,
                HandlerKind::Scalar {
                    kind: *kind,
                    shape: Shape::Value,
                },
            );
        }
    }
    for (spelling, param, ret) in OTHERS {
        if let Some(kind) = param {
            ctx.params.register(spelling, *kind);
        }
        if let Some(kind) = ret {
            ctx.returns.register(spelling, *kind);
        }
    }
}
