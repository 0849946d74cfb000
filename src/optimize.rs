//! Optimizador a nivel del árbol de sintaxis.
//!
//! En un solo recorrido post-orden se pliegan los nodos con operandos
//! literales, se aplican identidades algebraicas y, por bloque, se
//! eliminan almacenamientos muertos adyacentes y declaraciones sin
//! usos. Cada reescritura emite un [`Advisory`] informativo; los
//! avisos nunca abortan la compilación.
//!
//! La división entre cero literal es un error duro en todos los
//! caminos de plegado, incluyendo el de identidades algebraicas.
//!
//! Las comparaciones se pliegan a la convención booleana del ISA:
//! `-1` para verdadero y `0` para falso, nunca `1`.

use crate::{
    error::{DiagnosticKind, Stage},
    parse::{
        AssignOp, BinOp, Declaration, Expr, ExprKind, Program, Stmt, SymbolRef, Target, Type, UnOp,
    },
    source::{Located, Location},
    symbols::SymbolTable,
};
use std::fmt::{self, Display};

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Selección de pasadas del optimizador.
    pub struct OptFlags: u8 {
        /// Plegado de constantes.
        const FOLD = 1 << 0;

        /// Identidades algebraicas.
        const IDENTITIES = 1 << 1;

        /// Eliminación de almacenamientos muertos adyacentes.
        const DEAD_STORE = 1 << 2;

        /// Poda de declaraciones sin usos.
        const PRUNE = 1 << 3;

        /// Reescritura de mirilla sobre las instrucciones emitidas.
        const PEEPHOLE = 1 << 4;
    }
}

impl Default for OptFlags {
    fn default() -> Self {
        OptFlags::all()
    }
}

/// Severidad de un aviso.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

impl Display for Severity {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => fmt.write_str("info"),
            Severity::Warning => fmt.write_str("warning"),
        }
    }
}

/// Registro no fatal de una decisión de optimización.
#[derive(Debug, Clone)]
pub struct Advisory {
    pub severity: Severity,
    pub subsystem: &'static str,
    pub message: String,
    pub location: Location,
}

impl Display for Advisory {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "{}[{}]: {} ({})",
            self.severity, self.subsystem, self.message, self.location
        )
    }
}

/// Error del optimizador.
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("literal division by zero")]
    DivisionByZero,
}

impl Stage for OptimizerError {
    fn kind(&self) -> DiagnosticKind {
        match self {
            OptimizerError::DivisionByZero => DiagnosticKind::CompilationError,
        }
    }
}

/// Optimiza el programa en el lugar, devolviendo los avisos emitidos.
pub fn optimize(
    program: &mut Program,
    flags: OptFlags,
) -> Result<Vec<Advisory>, Located<OptimizerError>> {
    let Program {
        ref mut body,
        ref symbols,
    } = *program;

    let mut optimizer = Optimizer {
        symbols,
        flags,
        advisories: Vec::new(),
    };

    optimizer.block(body)?;
    Ok(optimizer.advisories)
}

struct Optimizer<'a> {
    symbols: &'a SymbolTable,
    flags: OptFlags,
    advisories: Vec<Advisory>,
}

impl<'a> Optimizer<'a> {
    fn block(&mut self, body: &mut Vec<Stmt>) -> Result<(), Located<OptimizerError>> {
        for statement in body.iter_mut() {
            self.statement(statement)?;
        }

        if self.flags.contains(OptFlags::DEAD_STORE) {
            self.dead_stores(body);
        }

        if self.flags.contains(OptFlags::PRUNE) {
            self.prune(body);
        }

        Ok(())
    }

    fn statement(&mut self, statement: &mut Stmt) -> Result<(), Located<OptimizerError>> {
        match statement {
            Stmt::Declare(declaration) => self.expr(&mut declaration.init),

            Stmt::Assign { target, value, .. } => {
                if let Target::Element(element) = target {
                    self.expr(element)?;
                }

                self.expr(value)
            }

            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.statement(init)?;
                self.expr(cond)?;
                self.statement(step)?;
                self.block(body)
            }

            Stmt::While { cond, body } => {
                self.expr(cond)?;
                self.block(body)
            }

            Stmt::If { cases, otherwise } => {
                for (cond, body) in cases.iter_mut() {
                    self.expr(cond)?;
                    self.block(body)?;
                }

                match otherwise {
                    Some(body) => self.block(body),
                    None => Ok(()),
                }
            }

            Stmt::Sub(subroutine) => self.block(&mut subroutine.body),

            Stmt::Return { value, .. } => match value {
                Some(value) => self.expr(value),
                None => Ok(()),
            },

            Stmt::Expr(expr) => self.expr(expr),
        }
    }

    /// Recorrido post-orden: primero los hijos, luego el nodo.
    fn expr(&mut self, expr: &mut Expr) -> Result<(), Located<OptimizerError>> {
        match &mut expr.kind {
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Var(_) => return Ok(()),

            ExprKind::Array(elements) => {
                for element in elements {
                    self.expr(element)?;
                }

                return Ok(());
            }

            ExprKind::Binary { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)?;
            }

            ExprKind::Unary { operand, .. }
            | ExprKind::Increment(operand)
            | ExprKind::Decrement(operand) => {
                self.expr(operand)?;
            }

            ExprKind::Index { base, index } => {
                self.expr(base)?;
                self.expr(index)?;
                return Ok(());
            }

            ExprKind::Call { args, .. } => {
                for arg in args {
                    self.expr(arg)?;
                }

                return Ok(());
            }
        }

        if self.flags.contains(OptFlags::FOLD) {
            self.fold(expr)?;
        }

        if self.flags.contains(OptFlags::IDENTITIES) {
            self.identities(expr);
        }

        Ok(())
    }

    /// Pliega un nodo binario o unario con operandos literales.
    fn fold(&mut self, expr: &mut Expr) -> Result<(), Located<OptimizerError>> {
        let folded = match &expr.kind {
            ExprKind::Binary { left, op, right } => {
                match (literal(left), literal(right)) {
                    (Some(a), Some(b)) => Some(eval_binary(*op, a, b).map_err(|error| {
                        Located::at(error, expr.location.clone())
                    })?),

                    _ => None,
                }
            }

            ExprKind::Unary { op, operand } => literal(operand).map(|value| match op {
                UnOp::Plus => value,
                UnOp::Minus => match value {
                    Value::Int(v) => Value::Int(-v),
                    Value::Float(v) => Value::Float(-v),
                },
            }),

            _ => None,
        };

        if let Some(value) = folded {
            self.advise(
                Severity::Info,
                "fold",
                String::from("expression folds to a constant"),
                &expr.location,
            );

            match value {
                Value::Int(v) => {
                    let ty = if matches!(&expr.kind, ExprKind::Binary { op, .. } if op.is_comparison())
                    {
                        Type::Bool
                    } else {
                        Type::Int
                    };

                    expr.kind = ExprKind::Int(v);
                    expr.ty = ty;
                }

                Value::Float(v) => {
                    expr.kind = ExprKind::Float(v);
                    expr.ty = Type::Float;
                }
            }
        }

        Ok(())
    }

    /// Identidades algebraicas sobre un operando literal, incluyendo
    /// las formas con los operandos invertidos.
    fn identities(&mut self, expr: &mut Expr) {
        let rewritten = match &expr.kind {
            ExprKind::Binary { left, op, right } => {
                let left_lit = literal(left);
                let right_lit = literal(right);

                match op {
                    BinOp::Add => {
                        if right_lit == Some(Value::Int(0)) {
                            Some(Rewrite::Keep(Side::Left))
                        } else if left_lit == Some(Value::Int(0)) {
                            Some(Rewrite::Keep(Side::Right))
                        } else if right_lit == Some(Value::Int(1)) {
                            Some(Rewrite::Increment(Side::Left))
                        } else if left_lit == Some(Value::Int(1)) {
                            Some(Rewrite::Increment(Side::Right))
                        } else {
                            None
                        }
                    }

                    // La resta no es conmutativa: solo `x - 0` y `x - 1`
                    BinOp::Sub => {
                        if right_lit == Some(Value::Int(0)) {
                            Some(Rewrite::Keep(Side::Left))
                        } else if right_lit == Some(Value::Int(1)) {
                            Some(Rewrite::Decrement(Side::Left))
                        } else {
                            None
                        }
                    }

                    BinOp::Mul => {
                        let other = if right_lit == Some(Value::Int(0)) {
                            Some(left)
                        } else if left_lit == Some(Value::Int(0)) {
                            Some(right)
                        } else {
                            None
                        };

                        if let Some(other) = other {
                            if contains_call(other) {
                                // La llamada del otro operando sobrevive
                                self.advise(
                                    Severity::Info,
                                    "identities",
                                    String::from(
                                        "multiplication by zero kept: \
                                         the other operand calls a subroutine",
                                    ),
                                    &expr.location,
                                );

                                None
                            } else {
                                Some(Rewrite::Zero)
                            }
                        } else if right_lit == Some(Value::Int(1)) {
                            Some(Rewrite::Keep(Side::Left))
                        } else if left_lit == Some(Value::Int(1)) {
                            Some(Rewrite::Keep(Side::Right))
                        } else {
                            None
                        }
                    }

                    _ => None,
                }
            }

            _ => None,
        };

        let rewrite = match rewritten {
            Some(rewrite) => rewrite,
            None => return,
        };

        self.advise(
            Severity::Info,
            "identities",
            String::from("algebraic identity simplifies this expression"),
            &expr.location,
        );

        let location = expr.location.clone();
        let kind = std::mem::replace(&mut expr.kind, ExprKind::Int(0));

        if let ExprKind::Binary { left, right, .. } = kind {
            let side = |which: Side| match which {
                Side::Left => left,
                Side::Right => right,
            };

            match rewrite {
                Rewrite::Zero => {
                    expr.kind = ExprKind::Int(0);
                    expr.ty = Type::Int;
                }

                Rewrite::Keep(which) => {
                    let kept = side(which);
                    expr.ty = kept.ty;
                    expr.kind = kept.kind;
                }

                Rewrite::Increment(which) => {
                    let kept = side(which);
                    expr.ty = kept.ty;
                    expr.kind = ExprKind::Increment(kept);
                }

                Rewrite::Decrement(which) => {
                    let kept = side(which);
                    expr.ty = kept.ty;
                    expr.kind = ExprKind::Decrement(kept);
                }
            }
        }

        expr.location = location;
    }

    /// Elimina un almacenamiento inmediatamente sobreescrito por la
    /// sentencia siguiente. Solo pares adyacentes; la eliminación se
    /// omite si el primer valor contiene una llamada o si el segundo
    /// valor lee el nombre sobreescrito.
    fn dead_stores(&mut self, body: &mut Vec<Stmt>) {
        let mut index = 0;

        while index + 1 < body.len() {
            let eliminated = match (&body[index], &body[index + 1]) {
                (
                    Stmt::Declare(declaration),
                    Stmt::Assign {
                        target: Target::Name(name),
                        op: AssignOp::Set,
                        value,
                    },
                ) if name.val().name == declaration.name
                    && name.val().scope == declaration.scope
                    && !contains_call(&declaration.init)
                    && !reads_name(value, name.val()) =>
                {
                    Some((
                        true,
                        declaration.name.clone(),
                        declaration.init.location.clone(),
                    ))
                }

                (
                    Stmt::Assign {
                        target: Target::Name(first),
                        op: AssignOp::Set,
                        value: overwritten,
                    },
                    Stmt::Assign {
                        target: Target::Name(second),
                        op: AssignOp::Set,
                        value,
                    },
                ) if first.val() == second.val()
                    && !contains_call(overwritten)
                    && !reads_name(value, first.val()) =>
                {
                    Some((false, first.val().name.clone(), first.location().clone()))
                }

                _ => None,
            };

            let (merge, name, location) = match eliminated {
                Some(found) => found,
                None => {
                    index += 1;
                    continue;
                }
            };

            self.advise(
                Severity::Warning,
                "dead-store",
                format!("value assigned to `{}` is immediately overwritten", name),
                &location,
            );

            if merge {
                // La declaración sobrevive con el valor definitivo
                if let Stmt::Assign { value, .. } = body.remove(index + 1) {
                    if let Stmt::Declare(declaration) = &mut body[index] {
                        declaration.init = value;
                    }
                }
            } else {
                body.remove(index);
            }
        }
    }

    /// Poda declaraciones cuyo conteo de usos quedó en cero.
    fn prune(&mut self, body: &mut Vec<Stmt>) {
        let mut index = 0;

        while index < body.len() {
            let pruned = match &body[index] {
                Stmt::Declare(declaration) => {
                    !contains_call(&declaration.init) && self.is_unused(declaration)
                }

                _ => false,
            };

            if pruned {
                if let Stmt::Declare(declaration) = &body[index] {
                    let location = declaration.location.clone();
                    let message = format!("`{}` is never used", declaration.name);
                    self.advise(Severity::Warning, "prune", message, &location);
                }

                body.remove(index);
            } else {
                index += 1;
            }
        }
    }

    fn is_unused(&self, declaration: &Declaration) -> bool {
        self.symbols
            .lookup(declaration.scope, &declaration.name)
            .map(|(_, symbol)| symbol.uses() == 0)
            .unwrap_or(false)
    }

    fn advise(
        &mut self,
        severity: Severity,
        subsystem: &'static str,
        message: String,
        location: &Location,
    ) {
        self.advisories.push(Advisory {
            severity,
            subsystem,
            message,
            location: location.clone(),
        });
    }
}

enum Side {
    Left,
    Right,
}

enum Rewrite {
    Zero,
    Keep(Side),
    Increment(Side),
    Decrement(Side),
}

/// Valor numérico de un literal.
#[derive(Copy, Clone, Debug, PartialEq)]
enum Value {
    Int(i64),
    Float(f64),
}

fn literal(expr: &Expr) -> Option<Value> {
    match expr.kind {
        ExprKind::Int(v) => Some(Value::Int(v)),
        ExprKind::Float(v) => Some(Value::Float(v)),
        _ => None,
    }
}

fn eval_binary(op: BinOp, a: Value, b: Value) -> Result<Value, OptimizerError> {
    use BinOp::*;

    if op.is_comparison() {
        let (a, b) = promote(a, b);
        let truth = match (a, b) {
            (Value::Int(a), Value::Int(b)) => match op {
                Equal => a == b,
                NotEqual => a != b,
                Less => a < b,
                LessEqual => a <= b,
                Greater => a > b,
                GreaterEqual => a >= b,
                _ => unreachable!(),
            },

            (Value::Float(a), Value::Float(b)) => match op {
                Equal => a == b,
                NotEqual => a != b,
                Less => a < b,
                LessEqual => a <= b,
                Greater => a > b,
                GreaterEqual => a >= b,
                _ => unreachable!(),
            },

            _ => unreachable!(),
        };

        // Convención booleana del ISA: -1 verdadero, 0 falso
        return Ok(Value::Int(if truth { -1 } else { 0 }));
    }

    match promote(a, b) {
        (Value::Int(a), Value::Int(b)) => match op {
            Add => Ok(Value::Int(a.wrapping_add(b))),
            Sub => Ok(Value::Int(a.wrapping_sub(b))),
            Mul => Ok(Value::Int(a.wrapping_mul(b))),

            Div if b == 0 => Err(OptimizerError::DivisionByZero),
            Div => Ok(Value::Int(a.wrapping_div(b))),

            Mod if b == 0 => Err(OptimizerError::DivisionByZero),
            Mod => Ok(Value::Int(a.wrapping_rem(b))),

            // Exponente negativo sobre enteros produce un flotante
            Pow if b < 0 => Ok(Value::Float((a as f64).powf(b as f64))),
            Pow => Ok(Value::Int(a.wrapping_pow(b.min(u32::MAX as i64) as u32))),

            _ => unreachable!(),
        },

        (Value::Float(a), Value::Float(b)) => match op {
            Add => Ok(Value::Float(a + b)),
            Sub => Ok(Value::Float(a - b)),
            Mul => Ok(Value::Float(a * b)),

            Div if b == 0.0 => Err(OptimizerError::DivisionByZero),
            Div => Ok(Value::Float(a / b)),

            Mod if b == 0.0 => Err(OptimizerError::DivisionByZero),
            Mod => Ok(Value::Float(a % b)),

            Pow => Ok(Value::Float(a.powf(b))),
            _ => unreachable!(),
        },

        _ => unreachable!(),
    }
}

/// Promueve ambos operandos a flotante si alguno lo es.
fn promote(a: Value, b: Value) -> (Value, Value) {
    match (a, b) {
        (Value::Int(a), Value::Float(b)) => (Value::Float(a as f64), Value::Float(b)),
        (Value::Float(a), Value::Int(b)) => (Value::Float(a), Value::Float(b as f64)),
        pair => pair,
    }
}

fn contains_call(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Call { .. } => true,
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Var(_) => false,
        ExprKind::Array(elements) => elements.iter().any(contains_call),
        ExprKind::Binary { left, right, .. } => contains_call(left) || contains_call(right),
        ExprKind::Unary { operand, .. }
        | ExprKind::Increment(operand)
        | ExprKind::Decrement(operand) => contains_call(operand),
        ExprKind::Index { base, index } => contains_call(base) || contains_call(index),
    }
}

fn reads_name(expr: &Expr, name: &SymbolRef) -> bool {
    match &expr.kind {
        ExprKind::Var(symbol) => symbol == name,
        ExprKind::Int(_) | ExprKind::Float(_) => false,
        ExprKind::Array(elements) => elements.iter().any(|e| reads_name(e, name)),
        ExprKind::Binary { left, right, .. } => reads_name(left, name) || reads_name(right, name),
        ExprKind::Unary { operand, .. }
        | ExprKind::Increment(operand)
        | ExprKind::Decrement(operand) => reads_name(operand, name),
        ExprKind::Index { base, index } => reads_name(base, name) || reads_name(index, name),
        ExprKind::Call { args, .. } => args.iter().any(|a| reads_name(a, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::lex, parse::parse, semantic::analyze, source::Source};

    fn optimized(text: &str) -> (Program, Vec<Advisory>) {
        let source = Source::new("<test>", text);
        let mut program = parse(&lex(&source).unwrap()).unwrap();
        analyze(&mut program).unwrap();
        let advisories = optimize(&mut program, OptFlags::default()).unwrap();

        (program, advisories)
    }

    fn folded_int(text: &str) -> i64 {
        let (program, _) = optimized(text);
        match &program.body[0] {
            Stmt::Expr(Expr {
                kind: ExprKind::Int(v),
                ..
            }) => *v,
            other => panic!("did not fold to an integer: {:?}", other),
        }
    }

    #[test]
    fn folds_literal_arithmetic() {
        assert_eq!(folded_int("1 + 2 * 3"), 7);
        assert_eq!(folded_int("7 / 2"), 3);
        assert_eq!(folded_int("7 % 4"), 3);
        assert_eq!(folded_int("2 ** 10"), 1024);
    }

    #[test]
    fn comparisons_fold_to_minus_one_or_zero() {
        assert_eq!(folded_int("3 < 4"), -1);
        assert_eq!(folded_int("4 < 3"), 0);
        assert_eq!(folded_int("5 == 5"), -1);
        assert_eq!(folded_int("5 != 5"), 0);
        assert_eq!(folded_int("4 >= 4"), -1);
    }

    #[test]
    fn division_by_zero_is_a_hard_error() {
        let source = Source::new("<test>", "1 / 0");
        let mut program = parse(&lex(&source).unwrap()).unwrap();
        analyze(&mut program).unwrap();

        let error = optimize(&mut program, OptFlags::default()).unwrap_err();
        assert!(matches!(error.val(), OptimizerError::DivisionByZero));
        assert_eq!(error.val().kind(), DiagnosticKind::CompilationError);
    }

    #[test]
    fn adding_one_becomes_an_increment() {
        let (program, _) = optimized("var x: int = 9\nvar y: int = x + 1\ny");
        match &program.body[1] {
            Stmt::Declare(declaration) => {
                assert!(matches!(declaration.init.kind, ExprKind::Increment(_)));
            }

            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn multiplying_a_call_by_zero_survives_with_a_note() {
        let (program, advisories) =
            optimized("sub f(a) { return a }\nvar x: int = f(1) * 0\nx");

        // el producto no se reescribe porque la llamada debe ejecutarse
        match &program.body[1] {
            Stmt::Declare(declaration) => {
                assert!(matches!(declaration.init.kind, ExprKind::Binary { .. }));
            }

            other => panic!("unexpected statement: {:?}", other),
        }

        assert!(advisories.iter().any(|advisory| {
            advisory.subsystem == "identities"
                && advisory.message.contains("multiplication by zero")
        }));
    }

    #[test]
    fn dead_store_pair_is_eliminated() {
        let (program, advisories) = optimized("var x: int = 1\nx = 2\nx + 3");

        // la declaración sobrevive con el valor definitivo; el
        // almacenamiento intermedio nunca se materializa
        match &program.body[0] {
            Stmt::Declare(declaration) => {
                assert!(matches!(declaration.init.kind, ExprKind::Int(2)));
            }

            other => panic!("unexpected statement: {:?}", other),
        }

        assert!(!matches!(&program.body[1], Stmt::Assign { .. }));
        assert!(advisories
            .iter()
            .any(|advisory| advisory.subsystem == "dead-store"));
    }

    #[test]
    fn intervening_read_keeps_the_first_store() {
        let (program, advisories) =
            optimized("var x: int = 1\nvar y: int = x\nx = 2\nx + y");

        match &program.body[0] {
            Stmt::Declare(declaration) => {
                assert!(matches!(declaration.init.kind, ExprKind::Int(1)));
            }

            other => panic!("unexpected statement: {:?}", other),
        }

        assert!(!advisories
            .iter()
            .any(|advisory| advisory.subsystem == "dead-store"));
    }

    #[test]
    fn unused_declarations_are_pruned() {
        let (program, advisories) = optimized("var x: int = 1\nvar y: int = 2\ny + 3");

        assert_eq!(program.body.len(), 2);
        assert!(advisories
            .iter()
            .any(|advisory| advisory.subsystem == "prune" && advisory.message.contains("`x`")));
    }

    #[test]
    fn optimization_is_idempotent() {
        let source = Source::new("<test>", "var x: int = 2\nvar y: int = x * 1 + (3 - 2)\ny");
        let mut program = parse(&lex(&source).unwrap()).unwrap();
        analyze(&mut program).unwrap();

        optimize(&mut program, OptFlags::default()).unwrap();
        let first = format!("{:?}", program.body);

        let advisories = optimize(&mut program, OptFlags::default()).unwrap();
        let second = format!("{:?}", program.body);

        assert_eq!(first, second);
        assert!(advisories.is_empty());
    }
}
