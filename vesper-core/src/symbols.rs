use std::collections::HashMap;

use crate::span::SourceLocation;
use crate::types::DataType;

/// A named entity visible in some scope: a variable, constant, or
/// function. Function symbols carry their signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub ty: DataType,
    pub is_function: bool,
    pub is_constant: bool,
    pub location: SourceLocation,
    pub parameter_types: Vec<DataType>,
    pub return_type: DataType,
}

impl Symbol {
    pub fn variable(name: impl Into<String>, ty: DataType, location: SourceLocation) -> Symbol {
        Symbol {
            name: name.into(),
            ty,
            is_function: false,
            is_constant: false,
            location,
            parameter_types: Vec::new(),
            return_type: DataType::Void,
        }
    }

    pub fn constant(name: impl Into<String>, ty: DataType, location: SourceLocation) -> Symbol {
        Symbol {
            is_constant: true,
            ..Symbol::variable(name, ty, location)
        }
    }

    pub fn function(
        name: impl Into<String>,
        parameter_types: Vec<DataType>,
        return_type: DataType,
        location: SourceLocation,
    ) -> Symbol {
        Symbol {
            name: name.into(),
            ty: DataType::Function,
            is_function: true,
            is_constant: false,
            location,
            parameter_types,
            return_type,
        }
    }
}

/// A stack of lexical scopes, each mapping names to symbols.
///
/// The bottom scope is the global scope and is never popped; it comes
/// pre-populated with the built-in functions. Lookup walks the stack
/// from the innermost scope outward, so shadowing across scopes works
/// while redeclaration within one scope is rejected by [`insert`].
///
/// [`insert`]: SymbolTable::insert
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        let mut table = SymbolTable { scopes: Vec::new() };
        table.enter_scope();
        register_builtins(&mut table);
        table
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Number of scopes currently on the stack (at least 1).
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Insert into the innermost scope. Returns false if the name is
    /// already declared there.
    pub fn insert(&mut self, symbol: Symbol) -> bool {
        let scope = self
            .scopes
            .last_mut()
            .expect("symbol table always has a global scope");
        if scope.contains_key(&symbol.name) {
            return false;
        }
        scope.insert(symbol.name.clone(), symbol);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
    }

    pub fn lookup_current_scope(&self, name: &str) -> Option<&Symbol> {
        self.scopes
            .last()
            .expect("symbol table always has a global scope")
            .get(name)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

fn register_builtins(table: &mut SymbolTable) {
    let location = SourceLocation::start();
    table.insert(Symbol::function(
        "print",
        vec![DataType::String],
        DataType::Void,
        location,
    ));
    table.insert(Symbol::function(
        "input",
        Vec::new(),
        DataType::String,
        location,
    ));
    table.insert(Symbol::function(
        "sqrt",
        vec![DataType::Float],
        DataType::Float,
        location,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_builtins_in_the_global_scope() {
        let table = SymbolTable::new();
        let print = table.lookup("print").expect("print should be predefined");
        assert!(print.is_function);
        assert_eq!(print.parameter_types, vec![DataType::String]);
        assert_eq!(print.return_type, DataType::Void);
        assert_eq!(table.lookup("input").map(|s| s.return_type), Some(DataType::String));
        assert_eq!(table.lookup("sqrt").map(|s| s.return_type), Some(DataType::Float));
    }

    #[test]
    fn rejects_redeclaration_in_the_same_scope() {
        let mut table = SymbolTable::new();
        let location = SourceLocation::start();
        assert!(table.insert(Symbol::variable("x", DataType::Int, location)));
        assert!(!table.insert(Symbol::variable("x", DataType::Float, location)));
    }

    #[test]
    fn inner_scopes_shadow_outer_ones() {
        let mut table = SymbolTable::new();
        let location = SourceLocation::start();
        table.insert(Symbol::variable("x", DataType::Int, location));

        table.enter_scope();
        assert!(table.insert(Symbol::variable("x", DataType::Float, location)));
        assert_eq!(table.lookup("x").map(|s| s.ty), Some(DataType::Float));
        table.exit_scope();

        assert_eq!(table.lookup("x").map(|s| s.ty), Some(DataType::Int));
    }

    #[test]
    fn balanced_scope_traffic_restores_the_visible_set() {
        let mut table = SymbolTable::new();
        let location = SourceLocation::start();
        table.insert(Symbol::variable("outer", DataType::Int, location));
        let initial_depth = table.depth();

        for _ in 0..3 {
            table.enter_scope();
            table.insert(Symbol::variable("inner", DataType::Bool, location));
            table.enter_scope();
            table.insert(Symbol::variable("innermost", DataType::Float, location));
            table.exit_scope();
            table.exit_scope();
        }

        assert_eq!(table.depth(), initial_depth);
        assert!(table.lookup("outer").is_some());
        assert!(table.lookup("print").is_some());
        assert!(table.lookup("inner").is_none());
        assert!(table.lookup("innermost").is_none());
    }

    #[test]
    fn global_scope_is_never_popped() {
        let mut table = SymbolTable::new();
        table.exit_scope();
        table.exit_scope();
        assert_eq!(table.depth(), 1);
        assert!(table.lookup("sqrt").is_some());
    }
}
