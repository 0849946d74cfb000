//! Ruta heredada: notación polaca inversa por patio de maniobras.
//!
//! El parser heredado no construye un árbol: aplana cada expresión a
//! una secuencia postfija de ítems con una pila explícita de
//! operadores, y baja el control de flujo a etiquetas y saltos dentro
//! de la misma secuencia. El generador posterior recorre los ítems con
//! una pila de operandos de tiempo de compilación; un desbalance de
//! operandos es un error duro.
//!
//! A diferencia de la ruta principal, las variables se asignan de
//! manera implícita en su primer almacenamiento, los parámetros de
//! subrutina se extraen en orden inverso hacia almacenamiento común, y
//! los cuerpos de subrutina quedan en línea tras un salto que los
//! esquiva.
//!
//! El objetivo de una asignación es un ítem propio construido a partir
//! del identificador, nunca una reetiquetación del token original.

use crate::{
    arch::Backend,
    error::{DiagnosticKind, Stage},
    inst::{AluOp, Cond, Inst, Label, Reg},
    lex::{Keyword, Token},
    parse::{AssignOp, BinOp, UnOp},
    source::{Located, Location},
};
use std::collections::HashMap;

use thiserror::Error;

/// Error de la ruta heredada, en cualquiera de sus dos etapas.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RpnError {
    #[error("unexpected {0}")]
    Unexpected(Token),

    #[error("mismatched parenthesis")]
    MismatchedParen,

    #[error("this expression cannot be assigned to")]
    BadAssignTarget,

    #[error("operator has too few operands")]
    OperandMismatch,

    #[error("cannot assign to constant `{0}`")]
    AssignToConst(String),

    #[error("`{0}` is not defined")]
    Undefined(String),

    #[error("call to undeclared subroutine `{0}`")]
    UnknownSub(String),
}

impl Stage for RpnError {
    fn kind(&self) -> DiagnosticKind {
        use RpnError::*;

        match self {
            Unexpected(_) | MismatchedParen | BadAssignTarget => DiagnosticKind::InvalidSyntax,
            OperandMismatch | AssignToConst(_) => DiagnosticKind::CompilationError,
            Undefined(_) | UnknownSub(_) => DiagnosticKind::SymbolError,
        }
    }
}

/// Un ítem de la secuencia postfija.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Int(i64),
    Float(f64),

    /// Lectura de variable.
    Var(String),

    /// Almacenamiento hacia una variable; consume el tope de la pila.
    Store { name: String, op: AssignOp },

    /// Como `Store`, pero deja la variable como de solo lectura.
    StoreConst(String),

    /// Extracción directa hacia una variable (parámetros de subrutina).
    PopVar(String),

    Binary(BinOp),
    Unary(UnOp),

    /// Definición de etiqueta numerada.
    Label(u32),

    /// Salto incondicional.
    Jump(u32),

    /// Salto si el tope de la pila es cero; lo consume.
    JumpIfFalse(u32),

    /// Empuje de un literal sintetizado.
    PushLit(i64),

    /// Retorno de subrutina.
    Return,

    /// Llamada: consume `argc` operandos y produce uno.
    Call { name: String, argc: usize },

    /// Fin de sentencia: vacía la pila de operandos.
    End,
}

/// Secuencia postfija completa más las etiquetas de entrada de las
/// subrutinas definidas.
#[derive(Debug)]
pub struct RpnProgram {
    pub items: Vec<Located<Item>>,
    pub subs: HashMap<String, u32>,

    /// Siguiente número de etiqueta libre; el generador continúa la
    /// numeración para las materializaciones de comparaciones.
    pub labels: u32,
}

/// Aplana la secuencia de tokens al programa postfijo.
pub fn parse(tokens: &[Located<Token>]) -> Result<RpnProgram, Located<RpnError>> {
    let mut parser = RpnParser {
        tokens,
        pos: 0,
        labels: 0,
        subs: HashMap::new(),
        items: Vec::new(),
    };

    parser.run()?;
    Ok(RpnProgram {
        items: parser.items,
        subs: parser.subs,
        labels: parser.labels,
    })
}

struct RpnParser<'a> {
    tokens: &'a [Located<Token>],
    pos: usize,
    labels: u32,
    subs: HashMap<String, u32>,
    items: Vec<Located<Item>>,
}

enum StackEntry {
    Bin(BinOp, u8, bool),
    Un(UnOp),
    Paren(Location),
}

impl<'a> RpnParser<'a> {
    fn run(&mut self) -> Result<(), Located<RpnError>> {
        self.skip_separators();

        while *self.peek().val() != Token::Eof {
            self.statement(false)?;
            self.skip_separators();
        }

        Ok(())
    }

    fn statement(&mut self, nested: bool) -> Result<(), Located<RpnError>> {
        match self.peek().val() {
            Token::Keyword(Keyword::Var) => self.declaration(false),
            Token::Keyword(Keyword::Const) => self.declaration(true),
            Token::Keyword(Keyword::For) => self.for_loop(),
            Token::Keyword(Keyword::While) => self.while_loop(),
            Token::Keyword(Keyword::Sub) if !nested => self.subroutine(),

            // Las subrutinas no se anidan en la ruta heredada
            Token::Keyword(Keyword::Sub) => Err(self.unexpected()),

            Token::Keyword(Keyword::Return) => self.return_stmt(),
            _ => self.assignment_or_expr(),
        }
    }

    fn declaration(&mut self, constant: bool) -> Result<(), Located<RpnError>> {
        self.bump();
        let (name, location) = self.identifier()?;
        self.expect(Token::Colon)?;

        match self.peek().val() {
            Token::Keyword(Keyword::Int) | Token::Keyword(Keyword::Float) => self.bump(),
            _ => return Err(self.unexpected()),
        }

        self.expect(Token::Assign)?;
        self.expression(false)?;

        let store = if constant {
            Item::StoreConst(name)
        } else {
            Item::Store {
                name,
                op: AssignOp::Set,
            }
        };

        self.push_item(store, location.clone());
        self.push_item(Item::End, location);

        Ok(())
    }

    fn for_loop(&mut self) -> Result<(), Located<RpnError>> {
        let location = self.peek().location().clone();
        self.bump();
        self.expect(Token::OpenParen)?;

        self.statement(true)?;
        self.expect(Token::Semicolon)?;

        let top = self.label();
        let end = self.label();
        self.push_item(Item::Label(top), location.clone());

        self.expression(false)?;
        self.push_item(Item::JumpIfFalse(end), location.clone());
        self.expect(Token::Semicolon)?;

        // El paso se aplana a un lado y se emite tras el cuerpo
        let mark = self.items.len();
        self.statement(true)?;
        let step = self.items.split_off(mark);
        self.expect(Token::CloseParen)?;

        self.body()?;
        self.items.extend(step);
        self.push_item(Item::Jump(top), location.clone());
        self.push_item(Item::Label(end), location);

        Ok(())
    }

    fn while_loop(&mut self) -> Result<(), Located<RpnError>> {
        let location = self.peek().location().clone();
        self.bump();

        let top = self.label();
        let end = self.label();
        self.push_item(Item::Label(top), location.clone());

        self.expect(Token::OpenParen)?;
        self.expression(false)?;
        self.expect(Token::CloseParen)?;
        self.push_item(Item::JumpIfFalse(end), location.clone());

        self.body()?;
        self.push_item(Item::Jump(top), location.clone());
        self.push_item(Item::Label(end), location);

        Ok(())
    }

    fn subroutine(&mut self) -> Result<(), Located<RpnError>> {
        let location = self.peek().location().clone();
        self.bump();
        let (name, _) = self.identifier()?;

        self.expect(Token::OpenParen)?;
        let mut params = Vec::new();

        if *self.peek().val() != Token::CloseParen {
            loop {
                let (param, _) = self.identifier()?;
                params.push(param);

                if *self.peek().val() == Token::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }

        self.expect(Token::CloseParen)?;

        let entry = self.label();
        let skip = self.label();
        self.subs.insert(name, entry);

        // El flujo principal esquiva el cuerpo en línea
        self.push_item(Item::Jump(skip), location.clone());
        self.push_item(Item::Label(entry), location.clone());

        // Los argumentos se extraen en orden inverso al de empuje
        for param in params.into_iter().rev() {
            self.push_item(Item::PopVar(param), location.clone());
        }

        self.body()?;

        // Toda subrutina deja exactamente un valor
        self.push_item(Item::PushLit(0), location.clone());
        self.push_item(Item::Return, location.clone());
        self.push_item(Item::Label(skip), location);

        Ok(())
    }

    fn return_stmt(&mut self) -> Result<(), Located<RpnError>> {
        let location = self.peek().location().clone();
        self.bump();

        match self.peek().val() {
            Token::Newline | Token::Semicolon | Token::CloseCurly | Token::Eof => {
                self.push_item(Item::PushLit(0), location.clone());
            }

            _ => self.expression(false)?,
        }

        self.push_item(Item::Return, location);
        Ok(())
    }

    fn assignment_or_expr(&mut self) -> Result<(), Located<RpnError>> {
        let location = self.peek().location().clone();
        let mark = self.items.len();
        self.expression(false)?;

        // Una sentencia vacía delata un token que ninguna regla acepta
        if self.items.len() == mark {
            return Err(self.unexpected());
        }

        let op = match self.peek().val() {
            Token::Assign => Some(AssignOp::Set),
            Token::PlusAssign => Some(AssignOp::Add),
            Token::MinusAssign => Some(AssignOp::Sub),
            Token::TimesAssign => Some(AssignOp::Mul),
            Token::SlashAssign => Some(AssignOp::Div),
            Token::PercentAssign => Some(AssignOp::Mod),
            Token::PowAssign => Some(AssignOp::Pow),
            _ => None,
        };

        if let Some(op) = op {
            self.bump();

            // El lado izquierdo debe haber quedado como una única
            // lectura de variable; se reconstruye como ítem de
            // almacenamiento en vez de reetiquetarla
            let name = match self.items.split_off(mark).as_slice() {
                [only] => match only.val() {
                    Item::Var(name) => name.clone(),
                    _ => return Err(Located::at(RpnError::BadAssignTarget, location)),
                },

                _ => return Err(Located::at(RpnError::BadAssignTarget, location)),
            };

            self.expression(false)?;
            self.push_item(Item::Store { name, op }, location.clone());
        }

        self.push_item(Item::End, location);
        Ok(())
    }

    fn body(&mut self) -> Result<(), Located<RpnError>> {
        self.expect(Token::OpenCurly)?;
        self.skip_separators();

        while *self.peek().val() != Token::CloseCurly {
            if *self.peek().val() == Token::Eof {
                return Err(self.unexpected());
            }

            self.statement(true)?;
            self.skip_separators();
        }

        self.bump();
        Ok(())
    }

    /// Patio de maniobras: se vierte hacia la salida mientras el tope
    /// de la pila tenga precedencia estrictamente mayor, o igual con
    /// asociatividad izquierda; los paréntesis empujan un marcador que
    /// ningún operador puede cruzar.
    fn expression(&mut self, in_args: bool) -> Result<(), Located<RpnError>> {
        let mut stack: Vec<Located<StackEntry>> = Vec::new();

        // Máquina de dos estados operando/operador: en posición de
        // operando, `+` y `-` son signos y no operadores binarios
        let mut expect_operand = true;

        loop {
            let current = self.peek();
            let location = current.location().clone();

            match current.val().clone() {
                Token::IntLiteral(value) => {
                    self.bump();
                    self.push_item(Item::Int(value), location);
                    expect_operand = false;
                }

                Token::FloatLiteral(value) => {
                    self.bump();
                    self.push_item(Item::Float(value), location);
                    expect_operand = false;
                }

                Token::Id(name) => {
                    self.bump();

                    if *self.peek().val() == Token::OpenParen {
                        self.call(name, location)?;
                    } else {
                        self.push_item(Item::Var(name), location);
                    }

                    expect_operand = false;
                }

                // El signo se distingue del operador binario por la
                // categoría del token inmediatamente anterior
                Token::Plus if expect_operand => {
                    self.bump();
                    stack.push(Located::at(StackEntry::Un(UnOp::Plus), location));
                }

                Token::Minus if expect_operand => {
                    self.bump();
                    stack.push(Located::at(StackEntry::Un(UnOp::Minus), location));
                }

                Token::OpenParen => {
                    self.bump();
                    stack.push(Located::at(StackEntry::Paren(location.clone()), location));
                    expect_operand = true;
                }

                Token::CloseParen => {
                    let mut closed = false;
                    while let Some(entry) = stack.pop() {
                        let (entry_location, entry) = entry.split();
                        match entry {
                            StackEntry::Paren(_) => {
                                closed = true;
                                break;
                            }

                            entry => self.flush(entry, entry_location),
                        }
                    }

                    if !closed {
                        // Un `)` sin pareja termina la expresión del
                        // llamador
                        break;
                    }

                    self.bump();
                    expect_operand = false;
                }

                Token::Comma if in_args => break,

                token => {
                    let binop = binop_of(&token);
                    match binop {
                        Some((op, prec, right_assoc)) if !expect_operand => {
                            self.bump();

                            while let Some(top) = stack.last() {
                                let pour = match top.val() {
                                    StackEntry::Un(_) => true,
                                    StackEntry::Bin(_, top_prec, _) => {
                                        *top_prec > prec || (*top_prec == prec && !right_assoc)
                                    }
                                    StackEntry::Paren(_) => false,
                                };

                                if !pour {
                                    break;
                                }

                                if let Some(entry) = stack.pop() {
                                    let (entry_location, entry) = entry.split();
                                    self.flush(entry, entry_location);
                                }
                            }

                            stack.push(Located::at(
                                StackEntry::Bin(op, prec, right_assoc),
                                location,
                            ));
                            expect_operand = true;
                        }

                        _ => break,
                    }
                }
            }
        }

        // Vaciado final; un marcador restante delata el `(` sin cerrar
        while let Some(entry) = stack.pop() {
            let (entry_location, entry) = entry.split();
            match entry {
                StackEntry::Paren(open) => {
                    return Err(Located::at(RpnError::MismatchedParen, open));
                }

                entry => self.flush(entry, entry_location),
            }
        }

        Ok(())
    }

    fn call(&mut self, name: String, location: Location) -> Result<(), Located<RpnError>> {
        self.expect(Token::OpenParen)?;

        let mut argc = 0;
        if *self.peek().val() != Token::CloseParen {
            loop {
                self.expression(true)?;
                argc += 1;

                if *self.peek().val() == Token::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }

        self.expect(Token::CloseParen)?;

        if !self.subs.contains_key(&name) {
            return Err(Located::at(RpnError::UnknownSub(name), location));
        }

        self.push_item(Item::Call { name, argc }, location);
        Ok(())
    }

    fn flush(&mut self, entry: StackEntry, location: Location) {
        match entry {
            StackEntry::Bin(op, ..) => self.push_item(Item::Binary(op), location),
            StackEntry::Un(op) => self.push_item(Item::Unary(op), location),
            StackEntry::Paren(_) => {}
        }
    }

    fn push_item(&mut self, item: Item, location: Location) {
        self.items.push(Located::at(item, location));
    }

    fn label(&mut self) -> u32 {
        let label = self.labels;
        self.labels += 1;

        label
    }

    fn identifier(&mut self) -> Result<(String, Location), Located<RpnError>> {
        match self.peek().val().clone() {
            Token::Id(name) => {
                let location = self.peek().location().clone();
                self.bump();
                Ok((name, location))
            }

            _ => Err(self.unexpected()),
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), Located<RpnError>> {
        if *self.peek().val() == token {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> Located<RpnError> {
        let current = self.peek();
        Located::at(
            RpnError::Unexpected(current.val().clone()),
            current.location().clone(),
        )
    }

    fn peek(&self) -> &Located<Token> {
        &self.tokens[self.pos]
    }

    fn bump(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek().val(), Token::Newline | Token::Semicolon) {
            self.bump();
        }
    }
}

fn binop_of(token: &Token) -> Option<(BinOp, u8, bool)> {
    let entry = match token {
        Token::Pow => (BinOp::Pow, 4, true),
        Token::Times => (BinOp::Mul, 3, false),
        Token::Slash => (BinOp::Div, 3, false),
        Token::Percent => (BinOp::Mod, 3, false),
        Token::Plus => (BinOp::Add, 2, false),
        Token::Minus => (BinOp::Sub, 2, false),
        Token::Equal => (BinOp::Equal, 1, false),
        Token::NotEqual => (BinOp::NotEqual, 1, false),
        Token::Less => (BinOp::Less, 1, false),
        Token::LessEqual => (BinOp::LessEqual, 1, false),
        Token::Greater => (BinOp::Greater, 1, false),
        Token::GreaterEqual => (BinOp::GreaterEqual, 1, false),
        _ => return None,
    };

    Some(entry)
}

/// Genera instrucciones a partir del programa postfijo, validando el
/// balance de operandos en tiempo de compilación.
pub fn generate(
    program: &RpnProgram,
    backend: &'static Backend,
    dest: Reg,
) -> Result<Vec<Inst>, Located<RpnError>> {
    let mut generator = RpnGenerator {
        backend,
        dest,
        insts: Vec::new(),
        depth: 0,
        float_mode: false,
        labels: program.labels,
        vars: HashMap::new(),
        subs: &program.subs,
    };

    for item in &program.items {
        generator.item(item)?;
    }

    if generator.depth > 0 {
        generator.insts.push(Inst::Pop(dest));
    }

    generator.insts.push(Inst::Halt);
    Ok(generator.insts)
}

struct RpnGenerator<'a> {
    backend: &'static Backend,
    dest: Reg,
    insts: Vec<Inst>,
    depth: usize,
    float_mode: bool,
    labels: u32,

    /// Dirección asignada y bandera de solo lectura por variable.
    vars: HashMap<String, (u16, bool)>,
    subs: &'a HashMap<String, u32>,
}

impl<'a> RpnGenerator<'a> {
    fn item(&mut self, item: &Located<Item>) -> Result<(), Located<RpnError>> {
        let location = item.location();

        match item.val() {
            Item::Int(value) => {
                self.set_mode(false);
                self.push_value(self.backend.mask(*value));
            }

            Item::Float(value) => {
                self.set_mode(true);
                self.push_value(self.backend.float_bits(*value));
            }

            Item::Var(name) => {
                let address = match self.vars.get(name) {
                    Some((address, _)) => *address,
                    None => {
                        return Err(Located::at(
                            RpnError::Undefined(name.clone()),
                            location.clone(),
                        ))
                    }
                };

                let addr = self.addr();
                self.insts.push(Inst::LoadImm(addr, u32::from(address)));
                self.insts.push(Inst::PushInd(addr));
                self.depth += 1;
            }

            Item::Store { name, op } => {
                self.need(1, location)?;
                self.insts.push(Inst::Pop(self.dest));
                self.depth -= 1;

                if let Some((_, true)) = self.vars.get(name) {
                    return Err(Located::at(
                        RpnError::AssignToConst(name.clone()),
                        location.clone(),
                    ));
                }

                let known = self.vars.contains_key(name);
                if !known && op.as_binop().is_none() {
                    // Primer almacenamiento: asignación implícita
                    let address = self.vars.len() as u16;
                    self.vars.insert(name.clone(), (address, false));
                } else if !known {
                    return Err(Located::at(
                        RpnError::Undefined(name.clone()),
                        location.clone(),
                    ));
                }

                let address = self.vars[name].0;
                let addr = self.addr();
                self.insts.push(Inst::LoadImm(addr, u32::from(address)));

                if let Some(binop) = op.as_binop() {
                    let scratch = self.scratch();
                    self.insts.push(Inst::PushInd(addr));
                    self.insts.push(Inst::Pop(scratch));
                    self.alu(binop);
                }

                self.insts.push(Inst::Store(self.dest, addr));
            }

            Item::StoreConst(name) => {
                self.need(1, location)?;
                self.insts.push(Inst::Pop(self.dest));
                self.depth -= 1;

                if let Some((_, true)) = self.vars.get(name) {
                    return Err(Located::at(
                        RpnError::AssignToConst(name.clone()),
                        location.clone(),
                    ));
                }

                let address = match self.vars.get(name) {
                    Some((address, _)) => *address,
                    None => self.vars.len() as u16,
                };
                self.vars.insert(name.clone(), (address, true));

                let addr = self.addr();
                self.insts.push(Inst::LoadImm(addr, u32::from(address)));
                self.insts.push(Inst::Store(self.dest, addr));
            }

            Item::PopVar(name) => {
                let address = match self.vars.get(name) {
                    Some((address, _)) => *address,
                    None => {
                        let address = self.vars.len() as u16;
                        self.vars.insert(name.clone(), (address, false));
                        address
                    }
                };

                self.insts.push(Inst::Pop(self.dest));
                self.depth = self.depth.saturating_sub(1);

                let addr = self.addr();
                self.insts.push(Inst::LoadImm(addr, u32::from(address)));
                self.insts.push(Inst::Store(self.dest, addr));
            }

            Item::Binary(op) => {
                self.need(2, location)?;

                let scratch = self.scratch();
                self.insts.push(Inst::Pop(self.dest));
                self.insts.push(Inst::Pop(scratch));
                self.depth -= 2;

                match Cond::of(*op) {
                    Some(cond) => {
                        self.insts.push(Inst::Compare(scratch, self.dest));
                        self.materialize(cond);
                    }

                    None => self.alu(*op),
                }

                self.insts.push(Inst::PushReg(self.dest));
                self.depth += 1;
            }

            Item::Unary(op) => {
                self.need(1, location)?;

                if let UnOp::Minus = op {
                    let scratch = self.scratch();
                    self.insts.push(Inst::Pop(self.dest));
                    self.insts.push(Inst::LoadImm(scratch, 0));
                    self.insts
                        .push(Inst::Alu(AluOp::Sub, scratch, self.dest, self.dest));
                    self.insts.push(Inst::PushReg(self.dest));
                }
            }

            Item::Label(label) => {
                self.insts.push(Inst::Label(Label(*label)));
                self.depth = 0;
            }

            Item::Jump(label) => self.insts.push(Inst::Jump(Cond::Al, Label(*label))),

            Item::JumpIfFalse(label) => {
                self.need(1, location)?;

                let scratch = self.scratch();
                self.insts.push(Inst::Pop(self.dest));
                self.depth -= 1;
                self.insts.push(Inst::LoadImm(scratch, 0));
                self.insts.push(Inst::Compare(self.dest, scratch));
                self.insts.push(Inst::Jump(Cond::Eq, Label(*label)));
            }

            Item::PushLit(value) => {
                self.push_value(self.backend.mask(*value));
            }

            Item::Return => {
                self.insts.push(Inst::Return);
                self.depth = 0;
            }

            Item::Call { name, argc } => {
                self.need(*argc, location)?;

                let entry = match self.subs.get(name) {
                    Some(entry) => *entry,
                    None => {
                        return Err(Located::at(
                            RpnError::UnknownSub(name.clone()),
                            location.clone(),
                        ))
                    }
                };

                let addr = self.addr();
                self.insts.push(Inst::LoadLabel(addr, Label(entry)));
                self.insts.push(Inst::CallInd(addr));

                // La llamada consume los argumentos y deja un resultado
                self.depth -= argc;
                self.depth += 1;
            }

            Item::End => {
                while self.depth > 0 {
                    self.insts.push(Inst::Pop(self.dest));
                    self.depth -= 1;
                }
            }
        }

        Ok(())
    }

    fn push_value(&mut self, value: u32) {
        if value <= self.backend.push_imm_max {
            self.insts.push(Inst::PushImm(value));
        } else {
            // Los inmediatos grandes pasan por el registro de destino
            self.insts.push(Inst::LoadImm(self.dest, value));
            self.insts.push(Inst::PushReg(self.dest));
        }

        self.depth += 1;
    }

    fn alu(&mut self, op: BinOp) {
        let scratch = self.scratch();
        let alu = match op {
            BinOp::Add => AluOp::Add,
            BinOp::Sub => AluOp::Sub,
            BinOp::Mul => AluOp::Mul,
            BinOp::Div => AluOp::Div,
            BinOp::Mod => AluOp::Mod,
            BinOp::Pow => AluOp::Pow,
            _ => return,
        };

        self.insts.push(Inst::Alu(alu, scratch, self.dest, self.dest));
    }

    fn materialize(&mut self, cond: Cond) {
        // La numeración continúa donde el parser la dejó
        let truthy = Label(self.labels);
        let done = Label(self.labels + 1);
        self.labels += 2;

        self.insts.push(Inst::Jump(cond, truthy));
        self.insts.push(Inst::LoadImm(self.dest, 0));
        self.insts.push(Inst::Jump(Cond::Al, done));
        self.insts.push(Inst::Label(truthy));
        self.insts
            .push(Inst::LoadImm(self.dest, self.backend.mask(-1)));
        self.insts.push(Inst::Label(done));
    }

    fn set_mode(&mut self, float: bool) {
        if self.float_mode != float {
            self.insts.push(Inst::Mode(float));
            self.float_mode = float;
        }
    }

    fn need(&self, count: usize, location: &Location) -> Result<(), Located<RpnError>> {
        if self.depth < count {
            Err(Located::at(RpnError::OperandMismatch, location.clone()))
        } else {
            Ok(())
        }
    }

    fn scratch(&self) -> Reg {
        if self.dest == Reg::Dx {
            Reg::Cx
        } else {
            Reg::Dx
        }
    }

    fn addr(&self) -> Reg {
        if self.dest == Reg::Bx {
            Reg::Cx
        } else {
            Reg::Bx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arch::XENON, lex::lex, source::{Position, Source}};

    fn items_of(text: &str) -> Vec<Item> {
        let source = Source::new("<test>", text);
        parse(&lex(&source).unwrap())
            .expect("legacy parsing failed")
            .items
            .into_iter()
            .map(Located::into_inner)
            .collect()
    }

    #[test]
    fn output_is_postfix() {
        use Item::*;

        assert_eq!(
            items_of("1 + 2 * 3"),
            vec![
                Int(1),
                Int(2),
                Int(3),
                Binary(BinOp::Mul),
                Binary(BinOp::Add),
                End
            ]
        );
    }

    #[test]
    fn equal_precedence_pours_left_to_right() {
        use Item::*;

        assert_eq!(
            items_of("4 - 2 - 1"),
            vec![
                Int(4),
                Int(2),
                Binary(BinOp::Sub),
                Int(1),
                Binary(BinOp::Sub),
                End
            ]
        );
    }

    #[test]
    fn pow_does_not_pour_onto_itself() {
        use Item::*;

        assert_eq!(
            items_of("2 ** 3 ** 2"),
            vec![
                Int(2),
                Int(3),
                Int(2),
                Binary(BinOp::Pow),
                Binary(BinOp::Pow),
                End
            ]
        );
    }

    #[test]
    fn leading_minus_is_unary() {
        use Item::*;

        assert_eq!(
            items_of("-1 + 2"),
            vec![
                Int(1),
                Unary(UnOp::Minus),
                Int(2),
                Binary(BinOp::Add),
                End
            ]
        );

        assert_eq!(
            items_of("2 * -3"),
            vec![
                Int(2),
                Int(3),
                Unary(UnOp::Minus),
                Binary(BinOp::Mul),
                End
            ]
        );
    }

    #[test]
    fn unclosed_paren_reports_at_the_paren() {
        let source = Source::new("<test>", "(1 + 2");
        let error = parse(&lex(&source).unwrap()).unwrap_err();

        assert!(matches!(error.val(), RpnError::MismatchedParen));
        assert_eq!(error.location().start().column(), 1);
    }

    #[test]
    fn assignment_becomes_a_store_item() {
        use Item::*;

        assert_eq!(
            items_of("x = 1"),
            vec![
                Int(1),
                Store {
                    name: String::from("x"),
                    op: AssignOp::Set
                },
                End
            ]
        );
    }

    #[test]
    fn subroutines_pop_parameters_in_reverse() {
        let items = items_of("sub f(a, b) { return a }\nf(1, 2)");

        let skip = items
            .iter()
            .position(|i| matches!(i, Item::Jump(_)))
            .unwrap();
        let entry = items
            .iter()
            .position(|i| matches!(i, Item::Label(_)))
            .unwrap();
        assert!(skip < entry);

        let pops = items
            .iter()
            .filter_map(|i| match i {
                Item::PopVar(name) => Some(name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(pops, vec!["b", "a"]);

        assert!(items.contains(&Item::PushLit(0)));
        assert!(items.contains(&Item::Return));
        assert!(items.contains(&Item::Call {
            name: String::from("f"),
            argc: 2
        }));
    }

    #[test]
    fn calls_require_prior_declaration() {
        let source = Source::new("<test>", "g(1)");
        let error = parse(&lex(&source).unwrap()).unwrap_err();

        assert!(matches!(error.val(), RpnError::UnknownSub(name) if name == "g"));
    }

    #[test]
    fn stores_declare_implicitly_but_reads_do_not() {
        let source = Source::new("<test>", "x = 5\nx + 1");
        let program = parse(&lex(&source).unwrap()).unwrap();
        let insts = generate(&program, &XENON, Reg::Ax).unwrap();

        assert!(insts.contains(&Inst::Store(Reg::Ax, Reg::Bx)));

        let source = Source::new("<test>", "y + 1");
        let program = parse(&lex(&source).unwrap()).unwrap();
        let error = generate(&program, &XENON, Reg::Ax).unwrap_err();

        assert!(matches!(error.val(), RpnError::Undefined(name) if name == "y"));
    }

    #[test]
    fn const_reassignment_is_rejected() {
        let source = Source::new("<test>", "const x: int = 1\nx = 2");
        let program = parse(&lex(&source).unwrap()).unwrap();
        let error = generate(&program, &XENON, Reg::Ax).unwrap_err();

        assert!(matches!(error.val(), RpnError::AssignToConst(name) if name == "x"));
        assert_eq!(error.val().kind(), DiagnosticKind::CompilationError);

        let source = Source::new("<test>", "const x: int = 1\nx += 2");
        let program = parse(&lex(&source).unwrap()).unwrap();
        let error = generate(&program, &XENON, Reg::Ax).unwrap_err();

        assert!(matches!(error.val(), RpnError::AssignToConst(name) if name == "x"));
    }

    #[test]
    fn const_declarations_store_and_read_normally() {
        let source = Source::new("<test>", "const x: int = 3\nx + 1");
        let program = parse(&lex(&source).unwrap()).unwrap();
        let insts = generate(&program, &XENON, Reg::Ax).unwrap();

        assert!(insts.contains(&Inst::Store(Reg::Ax, Reg::Bx)));
        assert!(insts.contains(&Inst::PushInd(Reg::Bx)));
    }

    #[test]
    fn operand_mismatch_is_a_hard_error() {
        let source = Source::new("<test>", "");
        let location = Location::single(source, Position::default());

        let program = RpnProgram {
            items: vec![
                Located::at(Item::Int(1), location.clone()),
                Located::at(Item::Binary(BinOp::Add), location),
            ],
            subs: HashMap::new(),
            labels: 0,
        };

        let error = generate(&program, &XENON, Reg::Ax).unwrap_err();
        assert!(matches!(error.val(), RpnError::OperandMismatch));
        assert_eq!(error.val().kind(), DiagnosticKind::CompilationError);
    }

    #[test]
    fn large_immediates_push_through_the_destination_register() {
        let source = Source::new("<test>", "x = 2000");
        let program = parse(&lex(&source).unwrap()).unwrap();
        let insts = generate(&program, &XENON, Reg::Ax).unwrap();

        assert!(insts.contains(&Inst::LoadImm(Reg::Ax, 2000)));
        assert!(!insts.contains(&Inst::PushImm(2000)));
    }

    #[test]
    fn while_loops_jump_back_and_test_forward() {
        let items = items_of("x = 0\nwhile (x < 3) { x += 1 }");

        assert!(items
            .iter()
            .any(|i| matches!(i, Item::JumpIfFalse(_))));
        assert!(items.iter().any(|i| matches!(i, Item::Jump(_))));
        assert!(items.contains(&Item::Store {
            name: String::from("x"),
            op: AssignOp::Add
        }));
    }
}
