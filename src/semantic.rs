//! Validación de referencias y conteo de usos.
//!
//! El parseo ya resuelve cada nombre contra un ámbito visible; esta
//! pasada revalida cada referencia contra la tabla y registra cuántas
//! veces se lee cada símbolo. El conteo alimenta la poda de
//! declaraciones muertas del optimizador. El lado izquierdo de una
//! asignación simple no cuenta como lectura, pero el de una asignación
//! compuesta sí, dado que el valor previo participa en la operación.

use crate::{
    error::{DiagnosticKind, Stage},
    parse::{Expr, ExprKind, Program, Stmt, SymbolRef, Target},
    source::Located,
    symbols::SymbolTable,
};

use thiserror::Error;

/// Error del análisis semántico.
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("`{0}` is not defined")]
    Undefined(String),
}

impl Stage for SemanticError {
    fn kind(&self) -> DiagnosticKind {
        match self {
            SemanticError::Undefined(_) => DiagnosticKind::SymbolError,
        }
    }
}

/// Recorre el programa registrando cada lectura de símbolo.
pub fn analyze(program: &mut Program) -> Result<(), Located<SemanticError>> {
    let mut statements = program.body.iter().collect::<Vec<_>>();
    let mut index = 0;

    // Recorrido descendente sin recursión sobre `program.symbols`
    while index < statements.len() {
        let statement = statements[index];
        index += 1;

        match statement {
            Stmt::Declare(declaration) => {
                visit_expr(&mut program.symbols, &declaration.init)?;
            }

            Stmt::Assign { target, op, value } => {
                match target {
                    Target::Element(element) => visit_expr(&mut program.symbols, element)?,

                    // Una asignación compuesta lee el valor previo
                    Target::Name(name) => {
                        if op.as_binop().is_some() {
                            resolve(&mut program.symbols, name)?;
                        }
                    }
                }

                visit_expr(&mut program.symbols, value)?;
            }

            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                statements.push(init.as_ref());
                visit_expr(&mut program.symbols, cond)?;
                statements.push(step.as_ref());
                statements.extend(body.iter());
            }

            Stmt::While { cond, body } => {
                visit_expr(&mut program.symbols, cond)?;
                statements.extend(body.iter());
            }

            Stmt::If { cases, otherwise } => {
                for (cond, body) in cases {
                    visit_expr(&mut program.symbols, cond)?;
                    statements.extend(body.iter());
                }

                if let Some(body) = otherwise {
                    statements.extend(body.iter());
                }
            }

            Stmt::Sub(subroutine) => statements.extend(subroutine.body.iter()),

            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    visit_expr(&mut program.symbols, value)?;
                }
            }

            Stmt::Expr(expr) => visit_expr(&mut program.symbols, expr)?,
        }
    }

    Ok(())
}

fn resolve(
    symbols: &mut SymbolTable,
    name: &Located<SymbolRef>,
) -> Result<(), Located<SemanticError>> {
    let symbol = name.val();
    match symbols.lookup(symbol.scope, &symbol.name) {
        Some((scope, _)) => {
            symbols.mark_use(scope, &symbol.name);
            Ok(())
        }

        None => Err(Located::at(
            SemanticError::Undefined(symbol.name.clone()),
            name.location().clone(),
        )),
    }
}

fn visit_expr(symbols: &mut SymbolTable, expr: &Expr) -> Result<(), Located<SemanticError>> {
    match &expr.kind {
        ExprKind::Int(_) | ExprKind::Float(_) => Ok(()),

        ExprKind::Var(symbol) => match symbols.lookup(symbol.scope, &symbol.name) {
            Some((scope, _)) => {
                symbols.mark_use(scope, &symbol.name);
                Ok(())
            }

            None => Err(Located::at(
                SemanticError::Undefined(symbol.name.clone()),
                expr.location.clone(),
            )),
        },

        ExprKind::Array(elements) => {
            for element in elements {
                visit_expr(symbols, element)?;
            }
            Ok(())
        }

        ExprKind::Binary { left, right, .. } => {
            visit_expr(symbols, left)?;
            visit_expr(symbols, right)
        }

        ExprKind::Unary { operand, .. }
        | ExprKind::Increment(operand)
        | ExprKind::Decrement(operand) => visit_expr(symbols, operand),

        ExprKind::Index { base, index } => {
            visit_expr(symbols, base)?;
            visit_expr(symbols, index)
        }

        ExprKind::Call { args, .. } => {
            for arg in args {
                visit_expr(symbols, arg)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::lex, parse::parse, source::Source};

    fn analyzed(text: &str) -> Program {
        let source = Source::new("<test>", text);
        let mut program = parse(&lex(&source).unwrap()).unwrap();
        analyze(&mut program).unwrap();
        program
    }

    #[test]
    fn reads_increment_use_counts() {
        let program = analyzed("var x: int = 1\nvar y: int = x + x");
        let global = program.symbols.global_scope();
        let (_, x) = program.symbols.lookup(global, "x").unwrap();

        assert_eq!(x.uses(), 2);
    }

    #[test]
    fn plain_assignment_target_is_not_a_read() {
        let program = analyzed("var x: int = 1\nx = 2");
        let global = program.symbols.global_scope();
        let (_, x) = program.symbols.lookup(global, "x").unwrap();

        assert_eq!(x.uses(), 0);
    }

    #[test]
    fn compound_assignment_target_is_a_read() {
        let program = analyzed("var x: int = 1\nx += 2");
        let global = program.symbols.global_scope();
        let (_, x) = program.symbols.lookup(global, "x").unwrap();

        assert_eq!(x.uses(), 1);
    }

    #[test]
    fn loop_bodies_are_visited() {
        let program = analyzed("var n: int = 0\nwhile (n < 10) { n += 1 }");
        let global = program.symbols.global_scope();
        let (_, n) = program.symbols.lookup(global, "n").unwrap();

        // una lectura en la condición y otra en `n += 1`
        assert_eq!(n.uses(), 2);
    }
}
