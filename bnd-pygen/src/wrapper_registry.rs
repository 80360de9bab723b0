//! Tracking of live Python wrappers per native object.
//!
//! A registry maps a native pointer back to the Python object wrapping it,
//! so returning the same object twice yields the same wrapper.

use serde::Deserialize;

use crate::block::{BlockWriter, DeclarationsScope};
use crate::codesink::CodeSink;
use crate::error::{CodegenError, CodegenResult};

/// Which registry implementation the generated code uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WrapperRegistryKind {
    /// No registry; every return creates a fresh wrapper.
    #[default]
    Null,
    /// A `std::map<void*, PyObject*>` per class.
    StdMap,
}

/// The registry of one wrapped class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperRegistry {
    kind: WrapperRegistryKind,
    map_name: String,
}

impl WrapperRegistry {
    pub fn new(kind: WrapperRegistryKind, base_name: &str) -> Self {
        Self {
            kind,
            map_name: format!("{base_name}_wrapper_registry"),
        }
    }

    pub fn kind(&self) -> WrapperRegistryKind {
        self.kind
    }

    /// Module-level definition of the registry storage.
    pub fn write_definition(&self, sink: &mut dyn CodeSink) {
        if self.kind == WrapperRegistryKind::StdMap {
            sink.writeln(&format!("std::map<void*, PyObject*> {};", self.map_name));
        }
    }

    pub fn write_register_new_wrapper(&self, block: &mut BlockWriter<'_>, wrapper: &str, object: &str) {
        if self.kind == WrapperRegistryKind::StdMap {
            block.write_code(&format!(
                "{}[(void *) {object}] = (PyObject *) {wrapper};",
                self.map_name
            ));
        }
    }

    /// Set `wrapper` to the existing wrapper of `object` (new reference) or
    /// `NULL`. The null registry cannot look anything up.
    pub fn write_lookup_wrapper(
        &self,
        declarations: &mut DeclarationsScope,
        block: &mut BlockWriter<'_>,
        wrapper_type: &str,
        wrapper: &str,
        object: &str,
    ) -> CodegenResult<()> {
        match self.kind {
            WrapperRegistryKind::Null => Err(CodegenError::unsupported("wrapper lookup without a registry")),
            WrapperRegistryKind::StdMap => {
                let iter = declarations.declare_variable(
                    "std::map<void*, PyObject*>::const_iterator",
                    "wrapper_lookup_iter",
                    None,
                    None,
                );
                let map = &self.map_name;
                block.write_code(&format!("{iter} = {map}.find((void *) {object});"));
                block.write_code(&format!(
                    "if ({iter} == {map}.end()) {{\n    {wrapper} = NULL;\n}} else {{\n    \
                     {wrapper} = ({wrapper_type} *) {iter}->second;\n    Py_INCREF({wrapper});\n}}"
                ));
                Ok(())
            }
        }
    }

    /// Code removing `wrapper` from the registry, for use as a cleanup
    /// action. `None` when there is nothing to undo.
    pub fn unregister_code(&self, declarations: &mut DeclarationsScope, wrapper: &str) -> Option<String> {
        match self.kind {
            WrapperRegistryKind::Null => None,
            WrapperRegistryKind::StdMap => {
                let iter = declarations.declare_variable(
                    "std::map<void*, PyObject*>::iterator",
                    "wrapper_lookup_iter",
                    None,
                    None,
                );
                let map = &self.map_name;
                Some(format!(
                    "{iter} = {map}.find((void *) {wrapper}->obj);\n\
                     if ({iter} != {map}.end()) {{\n    {map}.erase({iter});\n}}"
                ))
            }
        }
    }
}
