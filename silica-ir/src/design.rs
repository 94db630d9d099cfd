//! Collections of modules forming an instantiable hierarchy.

use crate::module::Module;

/// Index of a module within a [`Design`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
    /// Slot as a plain index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An arena of built modules. Instances reference children by [`ModuleId`],
/// so a child must be added before any module that instantiates it.
///
/// The design is plain data; it carries no simulation state and can be
/// shared freely once construction is complete.
#[derive(Debug, Clone, Default)]
pub struct Design {
    modules: Vec<Module>,
}

impl Design {
    /// Empty design.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a built module, returning its id for instantiation sites.
    pub fn add_module(&mut self, module: Module) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(module);
        id
    }

    /// Look up a module.
    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id.index())
    }

    /// All modules in insertion order.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }
}
