//! Tablas de símbolos jerárquicas.
//!
//! Cada subrutina abre un ámbito propio, encadenado al ámbito global.
//! Los ámbitos se almacenan en una arena indexada por [`ScopeId`] en
//! vez de referencias anidadas, lo cual evita el encadenamiento de
//! préstamos mutables al resolver nombres durante el parseo.
//!
//! Las variables globales reciben direcciones absolutas ascendentes a
//! partir de 0, mientras que los parámetros de subrutina reciben
//! desplazamientos positivos relativos al frame pointer a partir de 1.

use crate::parse::Type;
use std::collections::HashMap;

/// Índice de un ámbito dentro de la arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScopeId(usize);

/// Ubicación de almacenamiento de un símbolo.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Dirección absoluta en memoria de datos.
    Global(u16),

    /// Desplazamiento positivo relativo al frame pointer.
    Param(u16),
}

/// Información asociada a un nombre declarado.
#[derive(Debug, Clone)]
pub struct Symbol {
    ty: Type,
    slot: Slot,
    rank: u8,
    uses: u32,
}

impl Symbol {
    /// Obtiene el tipo declarado.
    pub fn ty(&self) -> Type {
        self.ty
    }

    /// Obtiene la ubicación de almacenamiento.
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Obtiene la cantidad de dimensiones (0 para escalares).
    pub fn rank(&self) -> u8 {
        self.rank
    }

    /// Obtiene la cantidad de lecturas registradas por el análisis.
    pub fn uses(&self) -> u32 {
        self.uses
    }
}

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    entries: HashMap<String, Symbol>,
    next_param: u16,
}

/// Arena de ámbitos con resolución hacia el ámbito padre.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    next_global: u16,
}

impl SymbolTable {
    /// Construye una tabla con únicamente el ámbito global.
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope {
                parent: None,
                entries: HashMap::new(),
                next_param: 1,
            }],
            next_global: 0,
        }
    }

    /// Obtiene el ámbito global.
    pub fn global_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Abre un ámbito hijo.
    pub fn open_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            parent: Some(parent),
            entries: HashMap::new(),
            next_param: 1,
        });

        id
    }

    /// Declara una variable global con la siguiente dirección libre.
    ///
    /// Falla si el nombre ya fue declarado en el mismo ámbito.
    pub fn declare_global(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: Type,
        rank: u8,
    ) -> Result<&Symbol, ()> {
        let slot = Slot::Global(self.next_global);
        self.next_global += 1;

        self.declare(scope, name, ty, rank, slot)
    }

    /// Declara un parámetro con el siguiente desplazamiento del ámbito.
    pub fn declare_param(&mut self, scope: ScopeId, name: &str, ty: Type) -> Result<&Symbol, ()> {
        let slot = Slot::Param(self.scopes[scope.0].next_param);
        self.scopes[scope.0].next_param += 1;

        self.declare(scope, name, ty, 0, slot)
    }

    fn declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: Type,
        rank: u8,
        slot: Slot,
    ) -> Result<&Symbol, ()> {
        let entries = &mut self.scopes[scope.0].entries;
        if entries.contains_key(name) {
            return Err(());
        }

        entries.insert(
            name.to_owned(),
            Symbol {
                ty,
                slot,
                rank,
                uses: 0,
            },
        );

        Ok(&entries[name])
    }

    /// Resuelve un nombre subiendo por la cadena de ámbitos.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<(ScopeId, &Symbol)> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if let Some(symbol) = scope.entries.get(name) {
                return Some((id, symbol));
            }

            current = scope.parent;
        }

        None
    }

    /// Registra una lectura del símbolo. El símbolo debe existir en el
    /// ámbito exacto indicado.
    pub fn mark_use(&mut self, scope: ScopeId, name: &str) {
        if let Some(symbol) = self.scopes[scope.0].entries.get_mut(name) {
            symbol.uses += 1;
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globals_are_numbered_from_zero() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();

        table.declare_global(global, "a", Type::Int, 0).unwrap();
        table.declare_global(global, "b", Type::Float, 0).unwrap();

        let (_, a) = table.lookup(global, "a").unwrap();
        let (_, b) = table.lookup(global, "b").unwrap();
        assert_eq!(a.slot(), Slot::Global(0));
        assert_eq!(b.slot(), Slot::Global(1));
    }

    #[test]
    fn params_are_numbered_from_one_per_scope() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();
        let inner = table.open_scope(global);

        table.declare_param(inner, "x", Type::Int).unwrap();
        table.declare_param(inner, "y", Type::Int).unwrap();

        let (_, x) = table.lookup(inner, "x").unwrap();
        let (_, y) = table.lookup(inner, "y").unwrap();
        assert_eq!(x.slot(), Slot::Param(1));
        assert_eq!(y.slot(), Slot::Param(2));
    }

    #[test]
    fn lookup_walks_to_the_parent_scope() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();
        let inner = table.open_scope(global);

        table.declare_global(global, "g", Type::Int, 0).unwrap();

        let (found_in, _) = table.lookup(inner, "g").unwrap();
        assert_eq!(found_in, global);
        assert!(table.lookup(inner, "missing").is_none());
    }

    #[test]
    fn duplicates_in_the_same_scope_fail() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();

        table.declare_global(global, "a", Type::Int, 0).unwrap();
        assert!(table.declare_global(global, "a", Type::Int, 0).is_err());
    }

    #[test]
    fn use_counts_accumulate() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();

        table.declare_global(global, "n", Type::Int, 0).unwrap();
        table.mark_use(global, "n");
        table.mark_use(global, "n");

        let (_, n) = table.lookup(global, "n").unwrap();
        assert_eq!(n.uses(), 2);
    }
}
