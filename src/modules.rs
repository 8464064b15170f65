//! The module map: how `import("name")` resolves a name to
//! something compilable, before any bytecode exists.
//!
//! Reading raw module source from disk and parsing it is the front end's
//! job, so `ModuleMap`
//! holds already-parsed [`crate::compiler::ast::Program`]s for source
//! modules rather than bytes or paths -- the embedder is expected to
//! parse eagerly (or lazily, via `ExtImporter`) and register the result
//! here before calling [`crate::compiler::compile`].

use hashbrown::HashMap;
use std::rc::Rc;

use crate::compiler::ast::Program;
use crate::value::Value;

#[derive(Clone)]
pub enum ModuleKind {
    /// A module whose value is produced directly, with no call (e.g. a
    /// `Map` of host functions exposed as a package, the way `math`/`os`
    /// style stdlib modules are typically implemented).
    Builtin(Value),
    /// A module compiled from source, run exactly once on first import and
    /// cached by the resulting value.
    Source(Rc<Program>),
}

/// Resolves an `import("name")` expression to a [`ModuleKind`] at compile
/// time. Registration order does not matter; lookups are by name only.
#[derive(Default)]
pub struct ModuleMap {
    entries: HashMap<String, ModuleKind>,
    importer: Option<Rc<dyn ExtImporter>>,
}

/// An escape hatch for resolving modules the embedder did not register up
/// front -- e.g. reading from a filesystem or a bundle lazily, the way an
/// embedding CLI or language server would wire up its own module loader
/// above this crate. Not consulted unless `AddExtImporter` set one and a
/// plain `get` misses.
pub trait ExtImporter {
    fn import(&self, name: &str) -> Option<Program>;
}

impl ModuleMap {
    pub fn new() -> ModuleMap {
        ModuleMap { entries: HashMap::new(), importer: None }
    }

    /// `AddBuiltinModule(name, value)`.
    pub fn add_builtin_module(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), ModuleKind::Builtin(value));
    }

    /// `AddSourceModule(name, program)`.
    pub fn add_source_module(&mut self, name: impl Into<String>, program: Program) {
        self.entries.insert(name.into(), ModuleKind::Source(Rc::new(program)));
    }

    /// `SetExtImporter(importer)`.
    pub fn set_ext_importer(&mut self, importer: Rc<dyn ExtImporter>) {
        self.importer = Some(importer);
    }

    pub fn get(&self, name: &str) -> Option<ModuleKind> {
        if let Some(found) = self.entries.get(name) {
            return Some(found.clone());
        }
        let program = self.importer.as_ref()?.import(name)?;
        Some(ModuleKind::Source(Rc::new(program)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_module_round_trips() {
        let mut modules = ModuleMap::new();
        modules.add_builtin_module("math", Value::Int(1));
        assert!(matches!(modules.get("math"), Some(ModuleKind::Builtin(Value::Int(1)))));
        assert!(modules.get("missing").is_none());
    }

    struct StaticImporter;
    impl ExtImporter for StaticImporter {
        fn import(&self, name: &str) -> Option<Program> {
            if name == "lazy" {
                Some(Program { body: vec![] })
            } else {
                None
            }
        }
    }

    #[test]
    fn ext_importer_is_consulted_on_miss() {
        let mut modules = ModuleMap::new();
        modules.set_ext_importer(Rc::new(StaticImporter));
        assert!(matches!(modules.get("lazy"), Some(ModuleKind::Source(_))));
        assert!(modules.get("nope").is_none());
    }
}
