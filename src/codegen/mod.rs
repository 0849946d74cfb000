//! Generación de código sobre el árbol de sintaxis.
//!
//! Un único generador recorre el programa y emite instrucciones
//! estructurales ([`Inst`]), parametrizado por el descriptor de
//! backend para el enmascaramiento de enteros, la codificación de
//! flotantes y la base del montículo. El registro de destino de las
//! expresiones es un valor de configuración explícito del llamador.
//!
//! Convenciones de bajada:
//! - Operación binaria: se evalúa el lado izquierdo, se empuja, se
//!   evalúa el derecho y se extrae el izquierdo a un registro
//!   auxiliar; si los lados difieren en modo entero/flotante se emite
//!   una conversión antes de operar.
//! - Las comparaciones fijan banderas y se materializan con un salto
//!   condicional a la convención booleana `-1`/`0` del ISA.
//! - Las cadenas `if`/`elseif`/`else` bajan como cadena de prioridad:
//!   salto de caída en falso hacia el siguiente caso y salto tomado a
//!   una etiqueta final compartida.
//! - Los literales de arreglo se asignan sobre un puntero de montículo
//!   en tiempo de generación: una palabra de longitud y luego cada
//!   elemento.
//! - Tras las sentencias de primer nivel se emite un alto; los cuerpos
//!   de subrutina van después del alto, con prólogo y epílogo sobre
//!   `FP`/`SP`.
//!
//! Una caché de contenidos conocidos por registro elude recargar un
//! inmediato ya residente; cualquier unión de flujo de control la
//! invalida de manera conservadora.

use crate::{
    arch::Backend,
    error::{DiagnosticKind, Stage},
    inst::{AluOp, Cond, Inst, Label, Reg},
    parse::{
        AssignOp, BinOp, Expr, ExprKind, Program, Stmt, Subroutine, Target, Type, UnOp,
    },
    source::{Located, Location},
    symbols::{ScopeId, Slot, SymbolTable},
};
use std::collections::HashMap;

use thiserror::Error;

/// Error del generador.
#[derive(Error, Debug)]
pub enum CodegenError {
    /// El parseo resolvió un nombre que la tabla ya no contiene.
    #[error("`{0}` vanished from the symbol table")]
    LostSymbol(String),

    /// Llamada a una subrutina cuya etiqueta no fue registrada.
    #[error("subroutine `{0}` has no address")]
    LostSub(String),
}

impl Stage for CodegenError {
    fn kind(&self) -> DiagnosticKind {
        match self {
            CodegenError::LostSymbol(_) | CodegenError::LostSub(_) => {
                DiagnosticKind::CompilationError
            }
        }
    }
}

/// Baja el programa completo a una lista de instrucciones.
pub fn generate(
    program: &Program,
    backend: &'static Backend,
    dest: Reg,
) -> Result<Vec<Inst>, Located<CodegenError>> {
    let mut generator = Generator {
        backend,
        symbols: &program.symbols,
        dest,
        insts: Vec::new(),
        labels: 0,
        float_mode: false,
        cache: HashMap::new(),
        heap: backend.heap_base,
        subs: HashMap::new(),
        deferred: Vec::new(),
    };

    generator.run(&program.body)
}

struct Generator<'a> {
    backend: &'static Backend,
    symbols: &'a SymbolTable,
    dest: Reg,
    insts: Vec<Inst>,
    labels: u32,
    float_mode: bool,
    cache: HashMap<Reg, u32>,
    heap: u32,
    subs: HashMap<String, Label>,
    deferred: Vec<&'a Subroutine>,
}

impl<'a> Generator<'a> {
    fn run(mut self, body: &'a [Stmt]) -> Result<Vec<Inst>, Located<CodegenError>> {
        for statement in body {
            self.statement(statement)?;
        }

        self.emit(Inst::Halt);

        // Los cuerpos de subrutina quedan tras el alto
        while let Some(subroutine) = self.deferred.pop() {
            self.subroutine(subroutine)?;
        }

        Ok(self.insts)
    }

    fn statement(&mut self, statement: &'a Stmt) -> Result<(), Located<CodegenError>> {
        match statement {
            Stmt::Declare(declaration) => {
                self.eval(&declaration.init)?;

                let slot = self.slot(
                    declaration.scope,
                    &declaration.name,
                    &declaration.location,
                )?;
                self.store(slot);

                Ok(())
            }

            Stmt::Assign { target, op, value } => self.assign(target, *op, value),

            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.statement(init)?;

                let top = self.label();
                let end = self.label();
                self.place(top);

                self.condition(cond, end)?;
                self.block(body)?;

                // El paso se emite después del cuerpo, antes del salto
                // de retorno
                self.statement(step)?;
                self.emit(Inst::Jump(Cond::Al, top));
                self.place(end);

                Ok(())
            }

            Stmt::While { cond, body } => {
                let top = self.label();
                let end = self.label();
                self.place(top);

                self.condition(cond, end)?;
                self.block(body)?;

                self.emit(Inst::Jump(Cond::Al, top));
                self.place(end);

                Ok(())
            }

            Stmt::If { cases, otherwise } => {
                let end = self.label();

                for (cond, body) in cases {
                    let next = self.label();
                    self.condition(cond, next)?;
                    self.block(body)?;
                    self.emit(Inst::Jump(Cond::Al, end));
                    self.place(next);
                }

                if let Some(body) = otherwise {
                    self.block(body)?;
                }

                self.place(end);
                Ok(())
            }

            Stmt::Sub(subroutine) => {
                let label = self.label();
                self.subs.insert(subroutine.name.clone(), label);
                self.deferred.push(subroutine);

                Ok(())
            }

            Stmt::Return { value, .. } => {
                match value {
                    Some(value) => {
                        self.eval(value)?;
                        self.emit(Inst::PushReg(self.dest));
                    }

                    None => self.push_imm(0),
                }

                self.epilogue();
                Ok(())
            }

            Stmt::Expr(expr) => self.eval(expr),
        }
    }

    fn block(&mut self, body: &'a [Stmt]) -> Result<(), Located<CodegenError>> {
        for statement in body {
            self.statement(statement)?;
        }

        Ok(())
    }

    fn subroutine(&mut self, subroutine: &'a Subroutine) -> Result<(), Located<CodegenError>> {
        let label = match self.subs.get(&subroutine.name) {
            Some(label) => *label,
            None => {
                return Err(Located::at(
                    CodegenError::LostSub(subroutine.name.clone()),
                    subroutine.location.clone(),
                ))
            }
        };

        self.place(label);
        self.emit(Inst::PushReg(Reg::Fp));
        self.emit(Inst::Move(Reg::Fp, Reg::Sp));

        self.block(&subroutine.body)?;

        // Toda subrutina deja exactamente un valor a su llamador
        if !matches!(subroutine.body.last(), Some(Stmt::Return { .. })) {
            self.push_imm(0);
            self.epilogue();
        }

        Ok(())
    }

    fn epilogue(&mut self) {
        self.emit(Inst::Move(Reg::Sp, Reg::Fp));
        self.pop(Reg::Fp);
        self.emit(Inst::Return);
    }

    fn assign(
        &mut self,
        target: &'a Target,
        op: AssignOp,
        value: &'a Expr,
    ) -> Result<(), Located<CodegenError>> {
        match target {
            Target::Name(name) => {
                let slot = self.slot(name.val().scope, &name.val().name, name.location())?;

                if let Some(binop) = op.as_binop() {
                    // Valor previo a la izquierda de la operación
                    self.load(slot);
                    self.emit(Inst::PushReg(self.dest));
                    self.eval(value)?;

                    let scratch = self.scratch();
                    self.pop(scratch);
                    self.alu(binop, scratch);
                } else {
                    self.eval(value)?;
                }

                self.store(slot);
                Ok(())
            }

            Target::Element(element) => {
                let (base, index) = match &element.kind {
                    ExprKind::Index { base, index } => (base.as_ref(), index.as_ref()),
                    _ => return self.eval(element),
                };

                let addr = self.addr();
                self.element_addr(base, index, addr)?;

                // La dirección se preserva en la pila mientras se
                // evalúa el valor
                self.emit(Inst::PushReg(addr));
                self.eval(value)?;
                self.pop(addr);

                if let Some(binop) = op.as_binop() {
                    let scratch = self.scratch();
                    self.emit(Inst::PushInd(addr));
                    self.pop(scratch);
                    self.alu(binop, scratch);
                }

                self.emit(Inst::Store(self.dest, addr));
                Ok(())
            }
        }
    }

    fn eval(&mut self, expr: &'a Expr) -> Result<(), Located<CodegenError>> {
        match &expr.kind {
            ExprKind::Int(value) => {
                self.set_mode(false);
                let masked = self.backend.mask(*value);
                self.load_imm(self.dest, masked);
                Ok(())
            }

            ExprKind::Float(value) => {
                self.set_mode(true);
                let bits = self.backend.float_bits(*value);
                self.load_imm(self.dest, bits);
                Ok(())
            }

            ExprKind::Var(symbol) => {
                let slot = self.slot(symbol.scope, &symbol.name, &expr.location)?;
                self.load(slot);
                Ok(())
            }

            ExprKind::Array(elements) => self.array(elements),

            ExprKind::Binary { left, op, right } => {
                self.operands(left, right)?;
                let scratch = self.scratch();

                match Cond::of(*op) {
                    Some(cond) => {
                        self.emit(Inst::Compare(scratch, self.dest));
                        self.materialize(cond);
                    }

                    None => self.alu(*op, scratch),
                }

                Ok(())
            }

            ExprKind::Unary { op, operand } => {
                self.eval(operand)?;

                if let UnOp::Minus = op {
                    let scratch = self.scratch();
                    self.load_imm(scratch, 0);
                    self.emit(Inst::Alu(AluOp::Sub, scratch, self.dest, self.dest));
                    self.cache.remove(&self.dest);
                }

                Ok(())
            }

            ExprKind::Increment(operand) => {
                self.eval(operand)?;
                self.emit(Inst::IncReg(self.dest));
                self.cache.remove(&self.dest);
                Ok(())
            }

            ExprKind::Decrement(operand) => {
                self.eval(operand)?;
                self.emit(Inst::DecReg(self.dest));
                self.cache.remove(&self.dest);
                Ok(())
            }

            ExprKind::Index { base, index } => {
                let addr = self.addr();
                self.element_addr(base, index, addr)?;
                self.emit(Inst::PushInd(addr));
                self.pop(self.dest);
                Ok(())
            }

            ExprKind::Call { name, args } => {
                for arg in args {
                    self.eval(arg)?;
                    self.emit(Inst::PushReg(self.dest));
                }

                let label = match self.subs.get(name) {
                    Some(label) => *label,
                    None => {
                        return Err(Located::at(
                            CodegenError::LostSub(name.clone()),
                            expr.location.clone(),
                        ))
                    }
                };

                let addr = self.addr();
                self.emit(Inst::LoadLabel(addr, label));
                self.emit(Inst::CallInd(addr));

                // La subrutina puede haber tocado cualquier registro
                self.cache.clear();
                self.pop(self.dest);
                Ok(())
            }
        }
    }

    /// Evalúa ambos operandos dejando el izquierdo en el registro
    /// auxiliar y el derecho en el destino, con la conversión de modo
    /// que corresponda.
    fn operands(&mut self, left: &'a Expr, right: &'a Expr) -> Result<(), Located<CodegenError>> {
        self.eval(left)?;
        self.emit(Inst::PushReg(self.dest));
        self.eval(right)?;

        let scratch = self.scratch();
        self.pop(scratch);

        let left_float = left.ty == Type::Float;
        let right_float = right.ty == Type::Float;

        if left_float != right_float {
            let casted = if left_float { self.dest } else { scratch };
            self.emit(Inst::Cast(casted));
            self.cache.remove(&casted);
        }

        Ok(())
    }

    fn alu(&mut self, op: BinOp, scratch: Reg) {
        let alu = match op {
            BinOp::Add => AluOp::Add,
            BinOp::Sub => AluOp::Sub,
            BinOp::Mul => AluOp::Mul,
            BinOp::Div => AluOp::Div,
            BinOp::Mod => AluOp::Mod,
            BinOp::Pow => AluOp::Pow,
            _ => return,
        };

        self.emit(Inst::Alu(alu, scratch, self.dest, self.dest));
        self.cache.remove(&self.dest);
    }

    /// Materializa unas banderas recién fijadas como `-1`/`0`.
    fn materialize(&mut self, cond: Cond) {
        let truthy = self.label();
        let done = self.label();

        self.emit(Inst::Jump(cond, truthy));
        self.emit(Inst::LoadImm(self.dest, 0));
        self.emit(Inst::Jump(Cond::Al, done));
        self.place(truthy);
        self.emit(Inst::LoadImm(self.dest, self.backend.mask(-1)));
        self.place(done);
    }

    /// Baja una condición con salto de caída en falso hacia `on_false`.
    fn condition(
        &mut self,
        cond: &'a Expr,
        on_false: Label,
    ) -> Result<(), Located<CodegenError>> {
        if let ExprKind::Binary { left, op, right } = &cond.kind {
            if let Some(jump) = Cond::of(*op) {
                self.operands(left, right)?;
                let scratch = self.scratch();
                self.emit(Inst::Compare(scratch, self.dest));
                self.emit(Inst::Jump(jump.negated(), on_false));
                return Ok(());
            }
        }

        // Condición aritmética: cero es falso
        self.eval(cond)?;
        let scratch = self.scratch();
        self.load_imm(scratch, 0);
        self.emit(Inst::Compare(self.dest, scratch));
        self.emit(Inst::Jump(Cond::Eq, on_false));

        Ok(())
    }

    /// Asigna un literal de arreglo en el montículo: una palabra de
    /// longitud seguida de los elementos, y deja el puntero base en el
    /// registro de destino.
    fn array(&mut self, elements: &'a [Expr]) -> Result<(), Located<CodegenError>> {
        let base = self.heap;
        self.heap += 1 + elements.len() as u32;

        let addr = self.addr();
        self.set_mode(false);
        self.load_imm(self.dest, self.backend.mask(elements.len() as i64));
        self.load_imm(addr, base);
        self.emit(Inst::Store(self.dest, addr));

        for (offset, element) in elements.iter().enumerate() {
            self.eval(element)?;
            self.load_imm(addr, base + 1 + offset as u32);
            self.emit(Inst::Store(self.dest, addr));
        }

        self.load_imm(self.dest, base);
        Ok(())
    }

    /// Computa la dirección de `base[index]` en `addr`, saltando la
    /// palabra de longitud.
    fn element_addr(
        &mut self,
        base: &'a Expr,
        index: &'a Expr,
        addr: Reg,
    ) -> Result<(), Located<CodegenError>> {
        self.eval(base)?;
        self.emit(Inst::PushReg(self.dest));
        self.eval(index)?;
        self.emit(Inst::IncReg(self.dest));
        self.cache.remove(&self.dest);

        self.pop(addr);
        self.emit(Inst::Alu(AluOp::Add, addr, self.dest, addr));
        self.cache.remove(&addr);

        Ok(())
    }

    fn load(&mut self, slot: Slot) {
        match slot {
            Slot::Global(address) => {
                let addr = self.addr();
                self.load_imm(addr, u32::from(address));
                self.emit(Inst::PushInd(addr));
            }

            Slot::Param(offset) => self.emit(Inst::PushFrame(offset)),
        }

        self.pop(self.dest);
    }

    fn store(&mut self, slot: Slot) {
        match slot {
            Slot::Global(address) => {
                let addr = self.addr();
                self.load_imm(addr, u32::from(address));
                self.emit(Inst::Store(self.dest, addr));
            }

            Slot::Param(offset) => self.emit(Inst::StoreFrame(self.dest, offset)),
        }
    }

    fn slot(
        &self,
        scope: ScopeId,
        name: &str,
        location: &Location,
    ) -> Result<Slot, Located<CodegenError>> {
        match self.symbols.lookup(scope, name) {
            Some((_, symbol)) => Ok(symbol.slot()),
            None => Err(Located::at(
                CodegenError::LostSymbol(name.to_owned()),
                location.clone(),
            )),
        }
    }

    /// Registro auxiliar del operando izquierdo.
    fn scratch(&self) -> Reg {
        if self.dest == Reg::Dx {
            Reg::Cx
        } else {
            Reg::Dx
        }
    }

    /// Registro de direccionamiento indirecto.
    fn addr(&self) -> Reg {
        if self.dest == Reg::Bx {
            Reg::Cx
        } else {
            Reg::Bx
        }
    }

    fn set_mode(&mut self, float: bool) {
        if self.float_mode != float {
            self.emit(Inst::Mode(float));
            self.float_mode = float;
        }
    }

    fn push_imm(&mut self, value: u32) {
        self.emit(Inst::PushImm(value));
    }

    fn load_imm(&mut self, reg: Reg, value: u32) {
        if self.cache.get(&reg) == Some(&value) {
            return;
        }

        self.emit(Inst::LoadImm(reg, value));
        self.cache.insert(reg, value);
    }

    fn pop(&mut self, reg: Reg) {
        self.emit(Inst::Pop(reg));
        self.cache.remove(&reg);
    }

    fn label(&mut self) -> Label {
        let label = Label(self.labels);
        self.labels += 1;

        label
    }

    /// Define una etiqueta e invalida la caché: es una unión de flujo.
    fn place(&mut self, label: Label) {
        self.emit(Inst::Label(label));
        self.cache.clear();
    }

    fn emit(&mut self, instruction: Inst) {
        self.insts.push(instruction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arch::XENON, lex::lex, parse::parse, semantic::analyze, source::Source};

    fn lowered(text: &str) -> Vec<Inst> {
        let source = Source::new("<test>", text);
        let mut program = parse(&lex(&source).unwrap()).unwrap();
        analyze(&mut program).unwrap();

        generate(&program, &XENON, Reg::Ax).unwrap()
    }

    #[test]
    fn declarations_store_to_ascending_addresses() {
        let insts = lowered("var x: int = 7\nvar y: int = 9");

        assert!(insts.contains(&Inst::LoadImm(Reg::Ax, 7)));
        assert!(insts.contains(&Inst::Store(Reg::Ax, Reg::Bx)));
        assert!(insts.contains(&Inst::LoadImm(Reg::Bx, 0)));
        assert!(insts.contains(&Inst::LoadImm(Reg::Bx, 1)));
    }

    #[test]
    fn resident_immediates_are_not_reloaded() {
        let insts = lowered("1 + 1");
        let loads = insts
            .iter()
            .filter(|i| matches!(i, Inst::LoadImm(Reg::Ax, 1)))
            .count();

        assert_eq!(loads, 1);
    }

    #[test]
    fn folded_negatives_are_masked_to_the_word() {
        use crate::optimize::{optimize, OptFlags};

        let source = Source::new("<test>", "var x: int = 0 - 1\nx");
        let mut program = parse(&lex(&source).unwrap()).unwrap();
        analyze(&mut program).unwrap();
        optimize(&mut program, OptFlags::default()).unwrap();

        let insts = generate(&program, &XENON, Reg::Ax).unwrap();
        assert!(insts.contains(&Inst::LoadImm(Reg::Ax, 0xFFFF)));
    }

    #[test]
    fn float_literals_switch_the_mode_once() {
        let insts = lowered("1.0 + 2.0");
        let switches = insts
            .iter()
            .filter(|i| matches!(i, Inst::Mode(true)))
            .count();

        assert_eq!(switches, 1);
        assert!(insts.contains(&Inst::LoadImm(Reg::Ax, 0x3C00)));
    }

    #[test]
    fn comparisons_materialize_minus_one() {
        let insts = lowered("var x: int = 1\nx == 1");
        assert!(insts.contains(&Inst::LoadImm(Reg::Ax, 0xFFFF)));
        assert!(insts.contains(&Inst::LoadImm(Reg::Ax, 0)));
    }

    #[test]
    fn conditions_jump_on_the_negated_comparison() {
        let insts = lowered("var x: int = 1\nif (x < 2) { x = 3 }");
        assert!(insts
            .iter()
            .any(|i| matches!(i, Inst::Jump(Cond::Ge, _))));
    }

    #[test]
    fn halt_precedes_subroutine_bodies() {
        let insts = lowered("sub f(a) { return a }\nf(1)");

        let halt = insts.iter().position(|i| *i == Inst::Halt).unwrap();
        let prologue = insts
            .iter()
            .position(|i| *i == Inst::PushReg(Reg::Fp))
            .unwrap();

        assert!(halt < prologue);
    }

    #[test]
    fn subroutine_prologue_and_epilogue_use_the_frame_pointer() {
        let insts = lowered("sub f(a) { return a }\nf(1)");

        let prologue = insts
            .iter()
            .position(|i| *i == Inst::PushReg(Reg::Fp))
            .unwrap();
        assert_eq!(insts[prologue + 1], Inst::Move(Reg::Fp, Reg::Sp));

        let ret = insts.iter().rposition(|i| *i == Inst::Return).unwrap();
        assert_eq!(insts[ret - 2], Inst::Move(Reg::Sp, Reg::Fp));
        assert_eq!(insts[ret - 1], Inst::Pop(Reg::Fp));
    }

    #[test]
    fn missing_trailing_return_pushes_an_implicit_zero() {
        let insts = lowered("sub f(a) { a + 1 }\nf(1)");

        let halt = insts.iter().position(|i| *i == Inst::Halt).unwrap();
        assert!(insts[halt..].contains(&Inst::PushImm(0)));
    }

    #[test]
    fn parameters_load_from_frame_slots() {
        let insts = lowered("sub f(a, b) { return b }\nf(1, 2)");
        assert!(insts.contains(&Inst::PushFrame(2)));
    }

    #[test]
    fn array_literals_store_a_length_word() {
        let insts = lowered("var v: int = [4, 5]\nv[0]");

        // longitud en la base del montículo
        assert!(insts.contains(&Inst::LoadImm(Reg::Ax, 2)));
        assert!(insts.contains(&Inst::LoadImm(Reg::Bx, XENON.heap_base)));

        // la lectura del elemento salta la palabra de longitud
        assert!(insts.contains(&Inst::IncReg(Reg::Ax)));
        assert!(insts
            .iter()
            .any(|i| matches!(i, Inst::Alu(AluOp::Add, Reg::Bx, Reg::Ax, Reg::Bx))));
    }
}
