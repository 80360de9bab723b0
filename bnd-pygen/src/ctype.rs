//! C/C++ type strings: tokenizing, canonical normalization and
//! [`TypeDescriptor`].
//!
//! A type string is parsed into a flat list of items where template and
//! function-pointer argument lists nest as sub-types. Normalization moves
//! `const`/`volatile` rightward until the next `*` or `&`, strips leading
//! `::` from names and re-joins everything with canonical spacing, so two
//! spellings of the same type compare equal as strings:
//!
//! ```
//! use bnd_pygen::ctype::normalize_type_string;
//!
//! assert_eq!(normalize_type_string("const char*const"), "char const * const");
//! assert_eq!(
//!     normalize_type_string("const foo::bar<const char*, zbr&>*"),
//!     "foo::bar< char const *, zbr & > const *"
//! );
//! ```

use std::fmt;

const MODIFIERS: [&str; 2] = ["const", "volatile"];

/// One element of a parsed type.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    /// Identifier, keyword, qualified name or numeric literal.
    Word(String),
    /// One of `* & < > , ( ) [ ]`.
    Punct(char),
    /// A template or function-pointer argument.
    Nested(CType),
}

impl Item {
    fn is_word(&self, w: &str) -> bool {
        matches!(self, Item::Word(s) if s == w)
    }

    fn is_ptr_or_ref(&self) -> bool {
        matches!(self, Item::Punct('*') | Item::Punct('&'))
    }
}

/// A parsed C/C++ type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CType {
    items: Vec<Item>,
}

fn is_punct(c: char) -> bool {
    matches!(c, '*' | '&' | '<' | '>' | ',' | '(' | ')' | '[' | ']')
}

fn tokenize(s: &str) -> Vec<Item> {
    let mut out = Vec::new();
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut Vec<Item>| {
        if !word.is_empty() {
            let w = word.trim_start_matches("::").to_string();
            if !w.is_empty() {
                out.push(Item::Word(w));
            }
            word.clear();
        }
    };
    for c in s.chars() {
        if c.is_whitespace() {
            flush(&mut word, &mut out);
        } else if is_punct(c) {
            flush(&mut word, &mut out);
            out.push(Item::Punct(c));
        } else {
            word.push(c);
        }
    }
    flush(&mut word, &mut out);
    out
}

/// Parse items until a closing `,`, `>` or `)` at this nesting level.
///
/// At depth 0 closers have nothing to close and are kept as plain
/// punctuation, so malformed input still normalizes deterministically.
fn parse_items(tokens: &mut std::vec::IntoIter<Item>, depth: usize) -> (CType, Option<char>) {
    let mut ctype = CType::default();
    while let Some(tok) = tokens.next() {
        match tok {
            Item::Punct(c @ (',' | '>' | ')')) if depth > 0 => {
                ctype.reorder_modifiers();
                return (ctype, Some(c));
            }
            Item::Punct(open @ ('<' | '(')) => {
                ctype.items.push(Item::Punct(open));
                loop {
                    let (nested, last) = parse_items(tokens, depth + 1);
                    ctype.items.push(Item::Nested(nested));
                    match last {
                        Some(',') => {
                            ctype.items.push(Item::Punct(','));
                        }
                        Some(close) => {
                            ctype.items.push(Item::Punct(close));
                            break;
                        }
                        // Unterminated argument list.
                        None => break,
                    }
                }
            }
            other => ctype.items.push(other),
        }
    }
    ctype.reorder_modifiers();
    (ctype, None)
}

impl CType {
    /// Parse a C type expression.
    pub fn parse(type_string: &str) -> Self {
        let mut tokens = tokenize(type_string).into_iter();
        let (ctype, _) = parse_items(&mut tokens, 0);
        ctype
    }

    /// Move each modifier as far right as it can go without crossing a `*`
    /// or `&`.
    fn reorder_modifiers(&mut self) {
        for modifier in MODIFIERS {
            let mut pending = 0usize;
            let mut out = Vec::with_capacity(self.items.len());
            for item in self.items.drain(..) {
                if item.is_word(modifier) {
                    pending += 1;
                    continue;
                }
                if item.is_ptr_or_ref() {
                    for _ in 0..pending {
                        out.push(Item::Word(modifier.to_string()));
                    }
                    pending = 0;
                }
                out.push(item);
            }
            for _ in 0..pending {
                out.push(Item::Word(modifier.to_string()));
            }
            self.items = out;
        }
    }

    /// Remove every top-level modifier. Template arguments keep theirs.
    fn remove_modifiers(&mut self) {
        self.items
            .retain(|item| !MODIFIERS.iter().any(|m| item.is_word(m)));
    }

    /// Remove the rightmost top-level occurrence of `modifier`.
    fn remove_outer_modifier(&mut self, modifier: &str) -> bool {
        match self.items.iter().rposition(|item| item.is_word(modifier)) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Insert `const` before the outermost `*` or `&`.
    fn insert_target_const(&mut self) {
        if let Some(pos) = self.items.iter().rposition(Item::is_ptr_or_ref) {
            self.items.insert(pos, Item::Word("const".to_string()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Split a single-argument template spelling `Name< Arg >` into its
    /// name and argument.
    pub fn split_template(&self) -> Option<(&str, &CType)> {
        match self.items.as_slice() {
            [Item::Word(name), Item::Punct('<'), Item::Nested(arg), Item::Punct('>')] => {
                Some((name.as_str(), arg))
            }
            _ => None,
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            match item {
                Item::Punct(c @ ('<' | ',')) => write!(f, "{c}")?,
                Item::Nested(n) if n.is_empty() => {}
                other => {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    match other {
                        Item::Word(w) => f.write_str(w)?,
                        Item::Punct(c) => write!(f, "{c}")?,
                        Item::Nested(n) => write!(f, "{n}")?,
                    }
                }
            }
        }
        Ok(())
    }
}

/// Return a type string in canonical format.
pub fn normalize_type_string(type_string: &str) -> String {
    CType::parse(type_string).to_string()
}

/// Join a C type and a variable name into a declaration fragment.
///
/// `("char *", "foo")` and `("char*", "foo")` both give `"char *foo"`.
pub fn join_ctype_and_name(ctype: &str, name: &str) -> String {
    if ctype.ends_with('*') {
        let stars = ctype.len() - ctype.trim_end_matches('*').len();
        let base = ctype[..ctype.len() - stars].trim_end();
        format!("{base} {}{name}", &ctype[ctype.len() - stars..])
    } else {
        format!("{ctype} {name}")
    }
}

/// Turn a C++ name into something usable inside a C identifier.
///
/// `std::vector< int >` becomes `std_vector__lt__int__gt__`.
pub fn mangle_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                out.push('_');
            }
            '<' => out.push_str("__lt__"),
            '>' => out.push_str("__gt__"),
            ',' => out.push_str("__"),
            '*' => out.push_str("_star_"),
            '&' => out.push_str("_amp_"),
            c if c.is_whitespace() => {}
            c => out.push(c),
        }
    }
    out
}

/// The pointed-to or referenced type of a pointer/reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// The target with its modifiers removed.
    pub ctype: CType,
    pub is_const: bool,
}

/// A parsed type plus the properties handlers care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    ctype: CType,
    no_modifiers: CType,
    no_const: CType,
    pub is_const: bool,
    pub is_pointer: bool,
    pub is_reference: bool,
    pub target: Option<Target>,
}

impl TypeDescriptor {
    pub fn new(type_string: &str) -> Self {
        let ctype = CType::parse(type_string);
        let mut no_modifiers = ctype.clone();
        no_modifiers.remove_modifiers();
        let mut no_const = ctype.clone();

        let mut is_const = false;
        let mut is_pointer = false;
        let mut is_reference = false;
        let mut target_is_const = false;
        let mut target_pos = None;
        let mut level = 0usize;

        let len = ctype.items.len();
        for (pos, item) in ctype.items.iter().rev().enumerate() {
            match item {
                Item::Word(w) if w == "const" => {
                    if level == 0 {
                        is_const = true;
                        no_const.remove_outer_modifier("const");
                    } else if level == 1 {
                        target_is_const = true;
                    }
                }
                Item::Punct('*') => {
                    if level == 0 {
                        is_pointer = true;
                        target_pos = Some(pos + 1);
                    }
                    level += 1;
                }
                Item::Punct('&') => {
                    if level == 0 {
                        is_reference = true;
                        target_pos = Some(pos + 1);
                    }
                    level += 1;
                }
                _ => {}
            }
        }

        let target = target_pos.map(|pos| {
            // `pos` counts from the right; keep everything left of it.
            let mut t = CType {
                items: ctype.items[..len - pos].to_vec(),
            };
            t.remove_modifiers();
            Target {
                ctype: t,
                is_const: target_is_const,
            }
        });

        Self {
            ctype,
            no_modifiers,
            no_const,
            is_const,
            is_pointer,
            is_reference,
            target,
        }
    }

    /// Canonical spelling of the full type.
    pub fn ctype(&self) -> String {
        self.ctype.to_string()
    }

    /// The type with top-level `const`/`volatile` removed.
    pub fn ctype_no_modifiers(&self) -> String {
        self.no_modifiers.to_string()
    }

    /// The type with only its outermost `const` removed.
    pub fn ctype_no_const(&self) -> String {
        self.no_const.to_string()
    }

    pub fn target_is_const(&self) -> bool {
        self.target.as_ref().is_some_and(|t| t.is_const)
    }

    /// Canonical spelling of the target type, if any.
    pub fn target_ctype(&self) -> Option<String> {
        self.target.as_ref().map(|t| t.ctype.to_string())
    }

    /// Add a top-level `const`. No effect if already const.
    pub fn make_const(&mut self) {
        if self.is_const {
            return;
        }
        self.is_const = true;
        self.ctype.items.push(Item::Word("const".to_string()));
    }

    /// Add `const` to the pointed-to/referenced type. No effect if already
    /// const or if the type is neither pointer nor reference.
    pub fn make_target_const(&mut self) {
        let Some(target) = self.target.as_mut() else {
            return;
        };
        if target.is_const {
            return;
        }
        target.is_const = true;
        self.ctype.insert_target_const();
        self.no_const.insert_target_const();
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ctype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_modifiers_and_spacing() {
        assert_eq!(normalize_type_string("char *"), "char *");
        assert_eq!(normalize_type_string("const ::bar*"), "bar const *");
        assert_eq!(
            normalize_type_string("const char*const*const"),
            "char const * const * const"
        );
        assert_eq!(
            normalize_type_string("const std::map<std::string, void (*) (int, std::vector<zbr>) >"),
            "std::map< std::string, void ( * ) ( int, std::vector< zbr > ) > const"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        for s in [
            "const int",
            "unsigned   long long",
            "const foo::bar<const char*, zbr&>*",
            "volatile const int * const &",
            "std::map<std::string, void (*) (int, std::vector<zbr>) >",
            "foo<int",
            "a > b",
            "",
        ] {
            let once = normalize_type_string(s);
            assert_eq!(normalize_type_string(&once), once, "input: {s:?}");
        }
    }

    #[test]
    fn descriptor_plain_type() {
        let t = TypeDescriptor::new("int");
        assert_eq!(t.ctype(), "int");
        assert_eq!(t.ctype_no_modifiers(), "int");
        assert!(!t.is_const && !t.is_pointer && !t.is_reference);
        assert!(t.target.is_none());
    }

    #[test]
    fn descriptor_const_pointer_to_const() {
        let t = TypeDescriptor::new("const int * const");
        assert_eq!(t.ctype(), "int const * const");
        assert_eq!(t.ctype_no_modifiers(), "int *");
        assert_eq!(t.ctype_no_const(), "int const *");
        assert!(t.is_const);
        assert!(t.is_pointer);
        assert_eq!(t.target_ctype().as_deref(), Some("int"));
        assert!(t.target_is_const());
    }

    #[test]
    fn descriptor_const_pointer_to_mutable() {
        let t = TypeDescriptor::new("int * const");
        assert_eq!(t.ctype_no_const(), "int *");
        assert!(t.is_const);
        assert!(!t.target_is_const());
    }

    #[test]
    fn descriptor_pointer_to_const_char() {
        let t = TypeDescriptor::new("const char *");
        assert_eq!(t.ctype(), "char const *");
        assert_eq!(t.ctype_no_modifiers(), "char *");
        assert!(!t.is_const);
        assert!(t.target_is_const());
    }

    #[test]
    fn const_mutators() {
        let mut t = TypeDescriptor::new("char *");
        t.make_const();
        assert_eq!(t.ctype(), "char * const");
        t.make_target_const();
        assert_eq!(t.ctype(), "char const * const");
        t.make_target_const();
        assert_eq!(t.ctype(), "char const * const");
    }

    #[test]
    fn splits_single_argument_templates() {
        let t = CType::parse("Ptr<const Foo>");
        let (name, arg) = t.split_template().unwrap();
        assert_eq!(name, "Ptr");
        assert_eq!(arg.to_string(), "Foo const");
        assert!(CType::parse("std::map<int, int>").split_template().is_none());
        assert!(CType::parse("Ptr<Foo> *").split_template().is_none());
    }

    #[test]
    fn mangles_names() {
        assert_eq!(mangle_name("std::vector< int >"), "std_vector__lt__int__gt__");
        assert_eq!(mangle_name("ns::Foo"), "ns_Foo");
        assert_eq!(mangle_name("map< a, b * >"), "map__lt__a__b_star___gt__");
    }

    #[test]
    fn joins_declarations() {
        assert_eq!(join_ctype_and_name("void*", "foo"), "void *foo");
        assert_eq!(join_ctype_and_name("void *", "foo"), "void *foo");
        assert_eq!(join_ctype_and_name("void**", "foo"), "void **foo");
        assert_eq!(join_ctype_and_name("C*", "foo"), "C *foo");
        assert_eq!(join_ctype_and_name("int", "foo"), "int foo");
    }
}
