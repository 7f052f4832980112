//! Scoped symbol tables.
//!
//! Symbols live in a process-wide arena and are referred to by `SymId`.
//! Name resolution goes through a `Namespace`, a stack of scopes mapping
//! names to symbol ids; two namespaces exist, one for ordinary identifiers
//! and one for struct/union/enum tags. Lookup walks from the innermost
//! scope outwards.

use crate::error::{CompileResult, Location};
use crate::fx::FxHashMap;
use crate::types::{TypeId, TypePool};

/// An opaque reference to a symbol in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SymId(u32);

impl SymId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What kind of entity a symbol denotes, ordered such that a later
/// declaration may upgrade an earlier one (declaration, then tentative,
/// then definition) but never the other way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SymKind {
    Declaration,
    Tentative,
    Definition,
    Typedef,
    EnumValue,
    StringValue,
    Label,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    None,
    Intern,
    Extern,
}

/// A declared name. The payload fields are populated depending on the
/// kind: enum constants carry `enum_value`, string literals carry
/// `string_value`, and code generation fills in `stack_offset` for
/// locals and parameters.
#[derive(Debug)]
pub struct Symbol {
    pub name: String,
    pub ty: TypeId,
    pub kind: SymKind,
    pub linkage: Linkage,
    /// Scope depth at the point of declaration; 0 is file scope.
    pub depth: usize,
    pub enum_value: i64,
    pub string_value: Option<String>,
    /// Offset of this symbol's storage relative to the frame pointer,
    /// assigned during lowering. Negative for locals.
    pub stack_offset: i32,
}

/// Arena of all symbols in the translation unit.
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    labels: u32,
    temporaries: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: Vec::new(),
            labels: 0,
            temporaries: 0,
        }
    }

    pub fn get(&self, id: SymId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn get_mut(&mut self, id: SymId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, sym)| (SymId(i as u32), sym))
    }

    fn push(&mut self, sym: Symbol) -> SymId {
        let id = SymId(self.symbols.len() as u32);
        self.symbols.push(sym);
        id
    }

    /// Add a symbol to the given namespace, enforcing the redeclaration
    /// contract: a name may be declared again in the same scope only with a
    /// compatible type, and a definition is never overwritten.
    pub fn declare(
        &mut self,
        ns: &mut Namespace,
        pool: &TypePool,
        loc: Location,
        name: &str,
        ty: TypeId,
        kind: SymKind,
        linkage: Linkage,
    ) -> CompileResult<SymId> {
        if let Some(existing) = ns.lookup_current_scope(name) {
            let sym = self.get(existing);
            if !pool.is_compatible(sym.ty, ty) {
                return err!(
                    loc,
                    "redeclaration of '{}' with incompatible type '{}', was '{}'",
                    name,
                    pool.display(ty),
                    pool.display(sym.ty)
                );
            }
            if sym.kind == SymKind::Definition && kind == SymKind::Definition {
                return err!(loc, "redefinition of '{}'", name);
            }
            let upgradable = |k: SymKind| {
                matches!(
                    k,
                    SymKind::Declaration | SymKind::Tentative | SymKind::Definition
                )
            };
            if upgradable(kind) && upgradable(sym.kind) && kind > sym.kind {
                self.get_mut(existing).kind = kind;
            }
            return Ok(existing);
        }

        let id = self.push(Symbol {
            name: name.to_string(),
            ty,
            kind,
            linkage,
            depth: ns.current_depth(),
            enum_value: 0,
            string_value: None,
            stack_offset: 0,
        });
        ns.bind(name, id);
        Ok(id)
    }

    /// Create a synthetic label symbol (`.L0`, `.L1`, ...); used as block
    /// labels and never entered in a namespace.
    pub fn create_label(&mut self, pool: &TypePool) -> SymId {
        let name = format!(".L{}", self.labels);
        self.labels += 1;
        self.push(Symbol {
            name,
            ty: pool.void_,
            kind: SymKind::Label,
            linkage: Linkage::Intern,
            depth: 0,
            enum_value: 0,
            string_value: None,
            stack_offset: 0,
        })
    }

    /// Create a synthetic temporary (`.t0`, `.t1`, ...). The caller adds it
    /// to the locals of the current function.
    pub fn create_temporary(&mut self, ty: TypeId) -> SymId {
        let name = format!(".t{}", self.temporaries);
        self.temporaries += 1;
        self.push(Symbol {
            name,
            ty,
            kind: SymKind::Definition,
            linkage: Linkage::None,
            depth: 1,
            enum_value: 0,
            string_value: None,
            stack_offset: 0,
        })
    }

    /// Create a string literal symbol backed by `.rodata`.
    pub fn create_string(&mut self, pool: &mut TypePool, value: &str) -> SymId {
        let ty = pool.array_of(pool.char_, value.len() as u32 + 1);
        let name = format!(".S{}", self.symbols.len());
        self.push(Symbol {
            name,
            ty,
            kind: SymKind::StringValue,
            linkage: Linkage::Intern,
            depth: 0,
            enum_value: 0,
            string_value: Some(value.to_string()),
            stack_offset: 0,
        })
    }
}

/// A stack of scopes mapping names to symbols. Depth 0 is file scope, 1 is
/// function prototype/body scope, deeper values are nested blocks.
pub struct Namespace {
    scopes: Vec<FxHashMap<String, SymId>>,
}

impl Namespace {
    pub fn new() -> Self {
        Namespace {
            scopes: vec![FxHashMap::default()],
        }
    }

    pub fn current_depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    /// Exit the current scope, dropping every binding made inside it.
    /// Every `push_scope` is paired with exactly one `pop_scope`.
    pub fn pop_scope(&mut self) {
        assert!(self.scopes.len() > 1);
        self.scopes.pop();
    }

    fn bind(&mut self, name: &str, id: SymId) {
        self.scopes
            .last_mut()
            .unwrap()
            .insert(name.to_string(), id);
    }

    /// Search from the innermost scope outwards.
    pub fn lookup(&self, name: &str) -> Option<SymId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    pub fn lookup_current_scope(&self, name: &str) -> Option<SymId> {
        self.scopes.last().unwrap().get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_lookup_shadows_and_unwinds() {
        let pool = TypePool::new();
        let mut table = SymbolTable::new();
        let mut ns = Namespace::new();
        let loc = Location::default();

        let outer = table
            .declare(&mut ns, &pool, loc, "x", pool.int_, SymKind::Tentative, Linkage::Extern)
            .unwrap();
        ns.push_scope();
        let inner = table
            .declare(&mut ns, &pool, loc, "x", pool.char_, SymKind::Definition, Linkage::None)
            .unwrap();
        assert_ne!(outer, inner);
        assert_eq!(ns.lookup("x"), Some(inner));
        ns.pop_scope();
        assert_eq!(ns.lookup("x"), Some(outer));
    }

    #[test]
    fn tentative_promotes_to_definition() {
        let pool = TypePool::new();
        let mut table = SymbolTable::new();
        let mut ns = Namespace::new();
        let loc = Location::default();

        let a = table
            .declare(&mut ns, &pool, loc, "a", pool.int_, SymKind::Tentative, Linkage::Extern)
            .unwrap();
        let b = table
            .declare(&mut ns, &pool, loc, "a", pool.int_, SymKind::Definition, Linkage::Extern)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(table.get(a).kind, SymKind::Definition);

        // A second definition is an error.
        assert!(table
            .declare(&mut ns, &pool, loc, "a", pool.int_, SymKind::Definition, Linkage::Extern)
            .is_err());
        // So is an incompatible redeclaration.
        assert!(table
            .declare(&mut ns, &pool, loc, "a", pool.long_, SymKind::Declaration, Linkage::Extern)
            .is_err());
    }

    #[test]
    fn synthetic_names() {
        let mut pool = TypePool::new();
        let mut table = SymbolTable::new();
        let l0 = table.create_label(&pool);
        let l1 = table.create_label(&pool);
        assert_eq!(table.get(l0).name, ".L0");
        assert_eq!(table.get(l1).name, ".L1");

        let t0 = table.create_temporary(pool.int_);
        assert_eq!(table.get(t0).name, ".t0");
        assert_eq!(table.get(t0).kind, SymKind::Definition);

        let s = table.create_string(&mut pool, "hi");
        assert_eq!(pool.size_of(table.get(s).ty), 3);
    }
}
