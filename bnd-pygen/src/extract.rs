//! Extraction: configuration → type context, helper classes and overload
//! groups.
//!
//! Every declaration is checked against the registries here. Whatever does
//! not resolve is reported as a warning and left out; nothing in this phase
//! is fatal.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info};

use crate::attribute::AttributeWrapper;
use crate::callback::{HelperClass, VirtualProxy};
use crate::config::{ClassConfig, Config, CustomConfig, ExceptionConfig};
use crate::context::{ClassId, ClassInfo, ContainerInfo, EnumInfo, ExceptionInfo, TypeContext};
use crate::diagnostics::{Warning, WarningCategory, WarningSink};
use crate::error::{Skip, SkipReason};
use crate::model::Visibility;
use crate::overload::{Candidate, CustomWrapper, OverloadGroup};
use crate::registry::SmartPointerTransformation;
use crate::wrapper::{ForwardWrapper, WrapperKind};

/// Everything needed to emit one extension module.
#[derive(Debug)]
pub struct ModuleDef {
    pub name: String,
    pub includes: Vec<String>,
    pub ctx: TypeContext,
    pub functions: Vec<OverloadGroup>,
    pub classes: Vec<ClassDef>,
}

/// A wrapped class: its constructor group, method groups, attributes and
/// helper.
#[derive(Debug)]
pub struct ClassDef {
    pub id: ClassId,
    pub constructors: OverloadGroup,
    pub methods: Vec<OverloadGroup>,
    pub attributes: Vec<AttributeWrapper>,
    pub helper: Option<HelperClass>,
}

/// Scan a loaded configuration into a [`ModuleDef`].
pub fn extract_module(cfg: &Config, warnings: &mut dyn WarningSink) -> ModuleDef {
    let mut ctx = TypeContext::with_builtins(cfg.settings.clone());

    for alias in &cfg.aliases {
        ctx.add_alias(&alias.from, &alias.to);
        debug!(from = %alias.from, to = %alias.to, "registered alias");
    }
    for sp in &cfg.smart_pointers {
        ctx.add_transformation(Rc::new(SmartPointerTransformation::new(&sp.template, &sp.getter)));
        debug!(template = %sp.template, getter = %sp.getter, "registered smart pointer");
    }
    for e in &cfg.enums {
        let full_name = match e.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => format!("{}::{}", ns.trim_start_matches("::"), e.name),
            _ => e.name.clone(),
        };
        ctx.add_enum(EnumInfo {
            name: e.name.clone(),
            full_name,
            values: e.values.clone(),
        });
        debug!(name = %e.name, values = e.values.len(), "registered enum");
    }
    for c in &cfg.containers {
        let info = ContainerInfo::new(&c.name, &c.full_name, &ctx.settings);
        debug!(name = %c.name, full_name = %info.full_name, "registered container");
        ctx.add_container(info);
    }

    register_exceptions(&mut ctx, &cfg.exceptions, warnings);
    let ids = register_classes(&mut ctx, &cfg.classes, warnings);
    apply_implicit_conversions(&mut ctx, &cfg.classes, &ids, warnings);

    let mut classes = Vec::new();
    for (class_cfg, id) in cfg.classes.iter().zip(&ids) {
        if let Some(id) = *id {
            classes.push(extract_class(&mut ctx, class_cfg, id, warnings));
        }
    }

    let mut functions = Groups::default();
    for sig in &cfg.functions {
        let location = sig.python_name().to_string();
        match ForwardWrapper::new(WrapperKind::Function, sig.clone(), &ctx) {
            Ok(wrapper) => {
                debug!(name = %sig.name, params = sig.params.len(), "extracted function");
                functions.add(WrapperKind::Function, sig.python_name(), wrapper.into(), &ctx, warnings);
            }
            Err(e) => skipped(warnings, &location, e),
        }
    }
    for custom in &cfg.custom_functions {
        functions.add(
            WrapperKind::Function,
            &custom.python_name,
            custom_candidate(custom),
            &ctx,
            warnings,
        );
    }

    info!(
        module = %cfg.output.module,
        functions = functions.groups.len(),
        classes = classes.len(),
        "module extraction complete"
    );

    ModuleDef {
        name: cfg.output.module.clone(),
        includes: cfg.output.includes.clone(),
        ctx,
        functions: functions.groups,
        classes,
    }
}

// ---------------------------------------------------------------------------
// Exceptions
// ---------------------------------------------------------------------------

/// Register exceptions in declaration order; a base must come first.
fn register_exceptions(ctx: &mut TypeContext, exceptions: &[ExceptionConfig], warnings: &mut dyn WarningSink) {
    for e in exceptions {
        let full_name = e.full_name();
        if ctx.find_exception(&full_name).is_some() {
            skipped(warnings, &full_name, SkipReason::NotWrapped("exception declared twice".to_string()));
            continue;
        }
        let mut info = ExceptionInfo::new(&e.name, e.namespace.as_deref(), &ctx.settings);
        if let Some(python_name) = &e.python_name {
            info.python_name = python_name.clone();
        }
        if let Some(base) = &e.base {
            match ctx.find_exception(base) {
                Some(id) => info.base = Some(id),
                None => {
                    let reason = format!("base exception {base} is not declared before it");
                    skipped(warnings, &full_name, SkipReason::NotWrapped(reason));
                    continue;
                }
            }
        }
        info.message_rvalue = e.message.clone();
        debug!(name = %info.full_name, pytypestruct = %info.pytypestruct, "registered exception");
        ctx.add_exception(info);
    }
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

/// Register every class so members can refer to classes declared later.
/// Duplicates map to `None`.
fn register_classes(
    ctx: &mut TypeContext,
    classes: &[ClassConfig],
    warnings: &mut dyn WarningSink,
) -> Vec<Option<ClassId>> {
    let mut ids = Vec::with_capacity(classes.len());
    for c in classes {
        let full_name = c.full_name();
        if ctx.find_class(&full_name).is_some() {
            skipped(warnings, &full_name, SkipReason::NotWrapped("class declared twice".to_string()));
            ids.push(None);
            continue;
        }
        let mut info = ClassInfo::new(&c.name, c.namespace.as_deref(), &ctx.settings);
        if let Some(python_name) = &c.python_name {
            info.python_name = python_name.clone();
        }
        if let Some(allow) = c.allow_subclassing {
            info.allow_subclassing = allow;
        }
        info.copyable = c.copyable;
        info.cannot_be_constructed = c.cannot_be_constructed.clone();
        info.memory_policy = c.memory_policy.clone();
        info.has_pure_virtual_methods = c.methods.iter().any(|m| m.is_pure_virtual);
        if info.allow_subclassing && c.methods.iter().any(|m| m.is_virtual) {
            info.helper_class = Some(format!("{}__PythonHelper", info.pystruct));
        }
        debug!(
            name = %info.full_name,
            pystruct = %info.pystruct,
            helper = info.helper_class.is_some(),
            "registered class"
        );
        ids.push(Some(ctx.add_class(info)));
    }
    ids
}

/// `A.implicitly_converts_to = [B]` makes `A` a conversion source of `B`.
fn apply_implicit_conversions(
    ctx: &mut TypeContext,
    classes: &[ClassConfig],
    ids: &[Option<ClassId>],
    warnings: &mut dyn WarningSink,
) {
    for (c, id) in classes.iter().zip(ids) {
        let Some(source) = *id else { continue };
        for target in &c.implicitly_converts_to {
            match ctx.find_class(target) {
                Some(target_id) if target_id == source => {}
                Some(target_id) => ctx.class_mut(target_id).implicit_conversion_sources.push(source),
                None => warnings.warn(
                    Warning::new(
                        WarningCategory::ImplicitConversion,
                        format!("conversion target {target} is not a wrapped class"),
                    )
                    .at(c.full_name()),
                ),
            }
        }
    }
}

fn extract_class(
    ctx: &mut TypeContext,
    c: &ClassConfig,
    id: ClassId,
    warnings: &mut dyn WarningSink,
) -> ClassDef {
    let full_name = ctx.class(id).full_name.clone();
    let helper = build_helper(ctx, c, id, warnings);
    let has_helper = helper.is_some();

    let mut constructors = OverloadGroup::new(WrapperKind::Constructor { class: id }, "__init__", ctx);
    let constructible = {
        let class = ctx.class(id);
        class.cannot_be_constructed.is_none() && (has_helper || !class.has_pure_virtual_methods)
    };
    if constructible {
        for sig in &c.constructors {
            let location = format!("{full_name}::{}", c.name);
            match sig.visibility {
                Visibility::Private => {
                    skipped(warnings, &location, SkipReason::NotWrapped("private constructor".to_string()));
                    continue;
                }
                Visibility::Protected if !has_helper => {
                    skipped(warnings, &location, SkipReason::NotWrapped("protected constructor".to_string()));
                    continue;
                }
                _ => {}
            }
            match ForwardWrapper::new(WrapperKind::Constructor { class: id }, sig.clone(), ctx) {
                Ok(wrapper) => {
                    if let Err(e) = constructors.add(wrapper) {
                        skipped(warnings, &location, e);
                    }
                }
                Err(e) => skipped(warnings, &location, e),
            }
        }
    } else {
        debug!(class = %full_name, "class cannot be constructed, constructors left out");
    }

    let mut methods = Groups::default();
    let kind = WrapperKind::Method { class: id };
    for sig in &c.methods {
        let location = format!("{full_name}::{}", sig.name);
        if sig.visibility != Visibility::Public {
            if sig.is_virtual && has_helper {
                debug!(method = %location, "non-public virtual method is only proxied");
            } else {
                let reason = format!("{} method", visibility_name(sig.visibility));
                skipped(warnings, &location, SkipReason::NotWrapped(reason));
            }
            continue;
        }
        match ForwardWrapper::new(kind, sig.clone(), ctx) {
            Ok(wrapper) => {
                debug!(method = %location, params = sig.params.len(), "extracted method");
                methods.add(kind, sig.python_name(), wrapper.into(), ctx, warnings);
            }
            Err(e) => skipped(warnings, &location, e),
        }
    }
    for custom in &c.custom_methods {
        methods.add(kind, &custom.python_name, custom_candidate(custom), ctx, warnings);
    }

    let mut attributes = Vec::new();
    for decl in &c.attributes {
        let location = format!("{full_name}::{}", decl.name);
        match AttributeWrapper::new(id, decl.clone(), ctx) {
            Ok(attribute) => attributes.push(attribute),
            Err(e) => skipped(warnings, &location, e),
        }
    }
    if attributes.iter().any(AttributeWrapper::is_static) {
        let class = ctx.class_mut(id);
        class.metaclass = Some(format!("{}_Type", class.metaclass_struct()));
    }

    ClassDef {
        id,
        constructors,
        methods: methods.groups,
        attributes,
        helper,
    }
}

/// Build the helper subclass of a class that has one.
///
/// A pure virtual method without a working proxy leaves the helper
/// uninstantiable, so the class loses its helper altogether.
fn build_helper(
    ctx: &mut TypeContext,
    c: &ClassConfig,
    id: ClassId,
    warnings: &mut dyn WarningSink,
) -> Option<HelperClass> {
    let name = ctx.class(id).helper_class.clone()?;
    let full_name = ctx.class(id).full_name.clone();
    let mut helper = HelperClass::new(id, name);
    for sig in c.constructors.iter().filter(|s| s.visibility != Visibility::Private) {
        helper.add_constructor(sig.clone());
    }

    let mut broken = false;
    for sig in c.methods.iter().filter(|m| m.is_virtual) {
        let location = format!("{full_name}::{}", sig.name);
        let result = match VirtualProxy::new(id, sig.clone(), ctx) {
            Ok(proxy) => helper.add_virtual_method(proxy, ctx),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(method = %location, "extracted virtual proxy"),
            Err(e) => {
                skipped(warnings, &location, e);
                broken |= sig.is_pure_virtual;
            }
        }
    }

    if broken {
        skipped(
            warnings,
            &full_name,
            SkipReason::NotWrapped("helper class dropped: a pure virtual method has no proxy".to_string()),
        );
        ctx.class_mut(id).helper_class = None;
        return None;
    }
    Some(helper)
}

fn visibility_name(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Public => "public",
        Visibility::Protected => "protected",
        Visibility::Private => "private",
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Overload groups keyed by Python name, in first-seen order.
#[derive(Default)]
struct Groups {
    groups: Vec<OverloadGroup>,
    index: HashMap<String, usize>,
}

impl Groups {
    fn add(
        &mut self,
        kind: WrapperKind,
        python_name: &str,
        candidate: Candidate,
        ctx: &TypeContext,
        warnings: &mut dyn WarningSink,
    ) {
        let pos = *self.index.entry(python_name.to_string()).or_insert_with(|| {
            self.groups.push(OverloadGroup::new(kind, python_name, ctx));
            self.groups.len() - 1
        });
        if let Err(e) = self.groups[pos].add(candidate) {
            skipped(warnings, python_name, e);
        }
    }
}

fn custom_candidate(custom: &CustomConfig) -> Candidate {
    CustomWrapper::new(&custom.wrapper_name, custom.body.clone()).into()
}

fn skipped(warnings: &mut dyn WarningSink, location: &str, reason: impl Into<SkipReason>) {
    let skip = Skip::new(location, reason);
    warnings.warn(Warning::new(WarningCategory::SkippedDeclaration, skip.reason.to_string()).at(skip.name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::diagnostics::Diagnostics;
    use crate::overload::GroupState;

    fn extract(toml: &str) -> (ModuleDef, Diagnostics) {
        let cfg = parse_config(toml).unwrap();
        let mut diags = Diagnostics::new();
        let module = extract_module(&cfg, &mut diags);
        (module, diags)
    }

    #[test]
    fn functions_group_by_python_name_in_order() {
        let (module, diags) = extract(
            r#"
[output]
module = "m"

[[function]]
name = "area"
return = "double"
params = [{ type = "double", name = "r" }]

[[function]]
name = "count"
return = "int"

[[function]]
name = "area"
return = "double"
params = [{ type = "double", name = "w" }, { type = "double", name = "h" }]
"#,
        );
        assert!(diags.is_empty(), "{:?}", diags.warnings());
        let names: Vec<_> = module.functions.iter().map(|g| g.python_name.as_str()).collect();
        assert_eq!(names, ["area", "count"]);
        assert_eq!(module.functions[0].candidates().len(), 2);
        assert_eq!(module.functions[0].state(), GroupState::Collecting);
    }

    #[test]
    fn unresolvable_function_is_skipped() {
        let (module, diags) = extract(
            r#"
[output]
module = "m"

[[function]]
name = "load"
params = [{ type = "Widget *", name = "w" }]
"#,
        );
        assert!(module.functions.is_empty());
        assert_eq!(diags.count(WarningCategory::SkippedDeclaration), 1);
        assert_eq!(diags.warnings()[0].location.as_deref(), Some("load"));
    }

    #[test]
    fn aliases_and_enums_resolve() {
        let (module, diags) = extract(
            r#"
[output]
module = "m"

[[alias]]
from = "Real"
to = "double"

[[enum]]
name = "Color"
namespace = "gfx"
values = ["RED"]

[[function]]
name = "paint"
params = [{ type = "Real", name = "x" }, { type = "gfx::Color", name = "c" }]
"#,
        );
        assert!(diags.is_empty(), "{:?}", diags.warnings());
        assert_eq!(module.functions.len(), 1);
        let (_, color) = module.ctx.enums().next().unwrap();
        assert_eq!(color.full_name, "gfx::Color");
    }

    #[test]
    fn implicit_conversion_sources_and_unknown_target() {
        let (module, diags) = extract(
            r#"
[output]
module = "m"

[[class]]
name = "Bar"
implicitly_converts_to = ["Foo", "Missing"]

[[class]]
name = "Foo"
"#,
        );
        let foo = module.ctx.find_class("Foo").unwrap();
        let bar = module.ctx.find_class("Bar").unwrap();
        assert_eq!(module.ctx.class(foo).implicit_conversion_sources, [bar]);
        assert_eq!(diags.count(WarningCategory::ImplicitConversion), 1);
        assert_eq!(diags.warnings()[0].location.as_deref(), Some("Bar"));
    }

    #[test]
    fn private_and_protected_members_are_not_wrapped() {
        let (module, diags) = extract(
            r#"
[output]
module = "m"

[[class]]
name = "Foo"

[[class.constructor]]
visibility = "protected"

[[class.constructor]]
params = [{ type = "int", name = "x" }]

[[class.method]]
name = "secret"
visibility = "private"

[[class.method]]
name = "visible"
return = "int"
"#,
        );
        let foo = &module.classes[0];
        assert_eq!(foo.constructors.candidates().len(), 1);
        assert_eq!(foo.methods.len(), 1);
        assert_eq!(foo.methods[0].python_name, "visible");
        assert!(foo.helper.is_none());
        assert_eq!(diags.count(WarningCategory::SkippedDeclaration), 2);
        assert_eq!(diags.warnings()[1].message, "private method");
    }

    #[test]
    fn subclassable_class_gets_helper_with_proxies() {
        let (module, diags) = extract(
            r#"
[output]
module = "m"

[[class]]
name = "Shape"
allow_subclassing = true

[[class.constructor]]
visibility = "protected"

[[class.method]]
name = "area"
return = "double"
const = true
virtual = true
pure_virtual = true

[[class.method]]
name = "hook"
virtual = true
visibility = "private"
"#,
        );
        assert!(diags.is_empty(), "{:?}", diags.warnings());
        let shape = &module.classes[0];
        let helper = shape.helper.as_ref().unwrap();
        assert_eq!(helper.name, "PyShape__PythonHelper");
        assert_eq!(helper.proxies().len(), 2);
        assert_eq!(shape.constructors.candidates().len(), 1);
        assert_eq!(shape.methods.len(), 1);
        assert_eq!(
            module.ctx.class(shape.id).helper_class.as_deref(),
            Some("PyShape__PythonHelper")
        );
    }

    #[test]
    fn broken_pure_virtual_proxy_drops_helper() {
        let (module, diags) = extract(
            r#"
[output]
module = "m"

[[class]]
name = "Shape"
allow_subclassing = true

[[class.constructor]]

[[class.method]]
name = "load"
virtual = true
pure_virtual = true
params = [{ type = "Widget *", name = "w" }]
"#,
        );
        let shape = &module.classes[0];
        assert!(shape.helper.is_none());
        assert_eq!(module.ctx.class(shape.id).helper_class, None);
        // abstract without a helper: no constructor is wrapped
        assert_eq!(shape.constructors.state(), GroupState::Empty);
        // the proxy, the dropped helper and the method wrapper itself
        assert_eq!(diags.count(WarningCategory::SkippedDeclaration), 3);
    }

    #[test]
    fn custom_methods_join_their_group() {
        let (module, _) = extract(
            r#"
[output]
module = "m"

[[class]]
name = "Foo"

[[class.method]]
name = "get"
return = "int"

[[class.custom_method]]
python_name = "get"
wrapper_name = "_wrap_custom_get"
"#,
        );
        let group = &module.classes[0].methods[0];
        assert_eq!(group.candidates().len(), 2);
        assert!(group.candidates()[1].needs_overloading_interface());
    }

    #[test]
    fn exceptions_resolve_for_throwing_members() {
        let (module, diags) = extract(
            r#"
[output]
module = "m"

[[exception]]
name = "exception"
namespace = "std"
message = "exc.what()"

[[exception]]
name = "ParseError"
python_name = "Error"
base = "std::exception"

[[exception]]
name = "Orphan"
base = "Missing"

[[class]]
name = "Parser"

[[class.constructor]]
params = [{ type = "std::string", name = "path" }]
throw = ["std::exception"]

[[class.method]]
name = "parse"
return = "int"
throw = ["ParseError", "exception"]

[[function]]
name = "risky"
throw = ["Orphan"]
"#,
        );
        let names: Vec<_> = module.ctx.exceptions().map(|(_, e)| e.full_name.as_str()).collect();
        assert_eq!(names, ["std::exception", "ParseError"]);
        let parse_error = module.ctx.exception(module.ctx.find_exception("ParseError").unwrap());
        assert_eq!(parse_error.python_name, "Error");
        assert_eq!(parse_error.base, module.ctx.find_exception("std::exception"));

        let parser = &module.classes[0];
        assert_eq!(parser.constructors.candidates().len(), 1);
        assert_eq!(parser.methods.len(), 1);
        // the orphan itself, then the function throwing it
        assert!(module.functions.is_empty());
        assert_eq!(diags.count(WarningCategory::SkippedDeclaration), 2);
        assert_eq!(diags.warnings()[0].location.as_deref(), Some("Orphan"));
        assert_eq!(diags.warnings()[1].location.as_deref(), Some("risky"));
        assert!(diags.warnings()[1].message.contains("exception Orphan is not declared"));
    }

    #[test]
    fn attributes_resolve_and_static_ones_need_a_metaclass() {
        let (module, diags) = extract(
            r#"
[output]
module = "m"

[[class]]
name = "Counter"
namespace = "ns"

[[class.attribute]]
name = "value"
type = "int"
read_only = true

[[class.attribute]]
name = "label"
type = "std::string"

[[class.attribute]]
name = "instances"
type = "unsigned int"
static = true

[[class.attribute]]
name = "widget"
type = "Widget"
"#,
        );
        let counter = &module.classes[0];
        let names: Vec<_> = counter.attributes.iter().map(|a| a.python_name()).collect();
        assert_eq!(names, ["value", "label", "instances"]);
        assert_eq!(
            module.ctx.class(counter.id).metaclass.as_deref(),
            Some("PyNsCounterMeta_Type")
        );
        assert_eq!(diags.count(WarningCategory::SkippedDeclaration), 1);
        assert_eq!(diags.warnings()[0].location.as_deref(), Some("ns::Counter::widget"));
    }

    #[test]
    fn instance_attributes_alone_keep_the_default_metaclass() {
        let (module, _) = extract(
            r#"
[output]
module = "m"

[[class]]
name = "Point"

[[class.attribute]]
name = "x"
type = "double"
"#,
        );
        assert_eq!(module.classes[0].attributes.len(), 1);
        assert_eq!(module.ctx.class(module.classes[0].id).metaclass, None);
    }

    #[test]
    fn duplicate_class_is_skipped() {
        let (module, diags) = extract(
            r#"
[output]
module = "m"

[[class]]
name = "Foo"

[[class]]
name = "Foo"
"#,
        );
        assert_eq!(module.classes.len(), 1);
        assert_eq!(diags.count(WarningCategory::SkippedDeclaration), 1);
    }
}
