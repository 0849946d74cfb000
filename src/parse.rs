//! Análisis sintáctico y árbol de sintaxis abstracta.
//!
//! El parser es de descenso recursivo para sentencias y de escalada de
//! precedencia para expresiones, con la tabla (de mayor a menor):
//! signo unario (5), `**` (4, asociativo a la derecha), `* / %` (3),
//! `+ -` (2), comparaciones (1) y la familia de asignación (0, tratada
//! a nivel de sentencia). La indexación `a[i]` liga más fuerte que todo
//! operador binario y encadena de izquierda a derecha.
//!
//! La resolución de nombres ocurre durante el parseo mismo: toda
//! referencia debe encontrarse ya declarada en un ámbito visible, y las
//! subrutinas deben declararse textualmente antes de su primera
//! llamada. Los tipos se infieren al construir cada nodo, por lo que
//! ninguna fase posterior observa nodos sin tipo.

use crate::{
    error::{DiagnosticKind, Stage},
    lex::{Keyword, Token},
    source::{Located, Location},
    symbols::{ScopeId, SymbolTable},
};
use std::{
    collections::HashMap,
    fmt::{self, Display},
};

use thiserror::Error;

/// Error de sintaxis, símbolos o tipos detectado durante el parseo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("expected {expected}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: Token,
    },

    #[error("this parenthesis is never closed")]
    UnclosedParen,

    #[error("`{0}` is not defined")]
    Undefined(String),

    #[error("`{0}` is already defined in this scope")]
    Redefined(String),

    #[error("call to undeclared subroutine `{0}`")]
    UnknownSub(String),

    #[error("`{name}` takes {expected} arguments, but {found} were given")]
    BadArgCount {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("expected a value of type {expected}, found {found}")]
    TypeMismatch { expected: Type, found: Type },

    #[error("a value of type {0} cannot be indexed")]
    NotAnArray(Type),

    #[error("this expression cannot be assigned to")]
    BadAssignTarget,
}

impl Stage for ParserError {
    fn kind(&self) -> DiagnosticKind {
        use ParserError::*;

        match self {
            UnexpectedToken { .. } | UnclosedParen | BadAssignTarget => {
                DiagnosticKind::InvalidSyntax
            }
            Undefined(_) | Redefined(_) | UnknownSub(_) => DiagnosticKind::SymbolError,
            BadArgCount { .. } => DiagnosticKind::CompilationError,
            TypeMismatch { .. } | NotAnArray(_) => DiagnosticKind::TypeError,
        }
    }
}

/// Tipo inferido de una expresión.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Int,
    Float,
    Bool,
    Ptr,
    Any,
}

impl Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Int => "int",
            Type::Float => "float",
            Type::Bool => "bool",
            Type::Ptr => "ptr",
            Type::Any => "any",
        };

        fmt.write_str(name)
    }
}

/// Operador binario.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl BinOp {
    /// Determina si el operador es una de las 6 comparaciones.
    pub fn is_comparison(self) -> bool {
        use BinOp::*;
        matches!(
            self,
            Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual
        )
    }
}

impl Display for BinOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinOp::*;
        let symbol = match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            Pow => "**",
            Equal => "==",
            NotEqual => "!=",
            Less => "<",
            LessEqual => "<=",
            Greater => ">",
            GreaterEqual => ">=",
        };

        fmt.write_str(symbol)
    }
}

/// Operador unario de signo.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Minus,
}

/// Operador de una sentencia de asignación.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl AssignOp {
    /// Operación binaria subyacente de una asignación compuesta.
    pub fn as_binop(self) -> Option<BinOp> {
        match self {
            AssignOp::Set => None,
            AssignOp::Add => Some(BinOp::Add),
            AssignOp::Sub => Some(BinOp::Sub),
            AssignOp::Mul => Some(BinOp::Mul),
            AssignOp::Div => Some(BinOp::Div),
            AssignOp::Mod => Some(BinOp::Mod),
            AssignOp::Pow => Some(BinOp::Pow),
        }
    }
}

/// Referencia resuelta a un símbolo: el ámbito donde fue encontrado y
/// su nombre dentro del mismo.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRef {
    pub scope: ScopeId,
    pub name: String,
}

/// Una expresión con su ubicación y tipo inferido.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: Location,
    pub ty: Type,
}

/// Variantes de expresión.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Array(Vec<Expr>),
    Var(SymbolRef),

    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },

    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },

    /// Sintetizada por el optimizador a partir de `x + 1`.
    Increment(Box<Expr>),

    /// Sintetizada por el optimizador a partir de `x - 1`.
    Decrement(Box<Expr>),

    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },

    Call {
        name: String,
        args: Vec<Expr>,
    },
}

/// Lado izquierdo de una asignación.
#[derive(Debug, Clone)]
pub enum Target {
    /// Una variable simple.
    Name(Located<SymbolRef>),

    /// Un elemento de arreglo; el `Expr` es siempre un `ExprKind::Index`.
    Element(Expr),
}

impl Target {
    /// Obtiene la ubicación del lado izquierdo.
    pub fn location(&self) -> &Location {
        match self {
            Target::Name(name) => name.location(),
            Target::Element(expr) => &expr.location,
        }
    }
}

/// Una declaración `var nombre: tipo = valor`.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub scope: ScopeId,
    pub ty: Type,
    pub rank: u8,
    pub init: Expr,
    pub location: Location,
}

/// Una definición `sub nombre(params) { cuerpo }`.
#[derive(Debug, Clone)]
pub struct Subroutine {
    pub name: String,
    pub params: Vec<String>,
    pub scope: ScopeId,
    pub body: Vec<Stmt>,
    pub location: Location,
}

/// Una sentencia.
#[derive(Debug, Clone)]
pub enum Stmt {
    Declare(Declaration),

    Assign {
        target: Target,
        op: AssignOp,
        value: Expr,
    },

    For {
        init: Box<Stmt>,
        cond: Expr,
        step: Box<Stmt>,
        body: Vec<Stmt>,
    },

    While {
        cond: Expr,
        body: Vec<Stmt>,
    },

    If {
        cases: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },

    Sub(Subroutine),

    Return {
        value: Option<Expr>,
        location: Location,
    },

    Expr(Expr),
}

/// Programa completo: sentencias de primer nivel y la tabla de símbolos
/// que el parseo dejó poblada.
#[derive(Debug)]
pub struct Program {
    pub body: Vec<Stmt>,
    pub symbols: SymbolTable,
}

/// Parsea una secuencia completa de tokens hasta su `Eof`.
pub fn parse(tokens: &[Located<Token>]) -> Result<Program, Located<ParserError>> {
    let symbols = SymbolTable::new();
    let scope = symbols.global_scope();

    let parser = Parser {
        tokens,
        pos: 0,
        symbols,
        scope,
        subs: HashMap::new(),
    };

    parser.run()
}

struct SubInfo {
    n_params: usize,
}

struct Parser<'a> {
    tokens: &'a [Located<Token>],
    pos: usize,
    symbols: SymbolTable,
    scope: ScopeId,
    subs: HashMap<String, SubInfo>,
}

impl<'a> Parser<'a> {
    fn run(mut self) -> Result<Program, Located<ParserError>> {
        let body = self.block_body()?;

        if *self.peek().val() != Token::Eof {
            return Err(self.unexpected("end of input"));
        }

        Ok(Program {
            body,
            symbols: self.symbols,
        })
    }

    /// Sentencias separadas por salto de línea o `;` hasta un `}` o el
    /// fin de la entrada. Tras la primera sentencia, un fallo de parseo
    /// tentativo rebobina y termina el bloque en silencio; el error
    /// real lo reporta la expectativa de cierre del llamador.
    fn block_body(&mut self) -> Result<Vec<Stmt>, Located<ParserError>> {
        let mut body = Vec::new();
        self.skip_separators();

        while !matches!(self.peek().val(), Token::CloseCurly | Token::Eof) {
            if body.is_empty() {
                body.push(self.statement()?);
            } else {
                let saved = self.pos;
                match self.statement() {
                    Ok(statement) => body.push(statement),
                    Err(_) => {
                        self.pos = saved;
                        break;
                    }
                }
            }

            // La última sentencia puede omitir su separador
            match self.peek().val() {
                Token::Newline | Token::Semicolon => self.skip_separators(),
                _ => break,
            }
        }

        Ok(body)
    }

    fn statement(&mut self) -> Result<Stmt, Located<ParserError>> {
        match self.peek().val() {
            Token::Keyword(Keyword::Var) => self.declaration(),
            Token::Keyword(Keyword::For) => self.for_loop(),
            Token::Keyword(Keyword::While) => self.while_loop(),
            Token::Keyword(Keyword::If) => self.if_chain(),
            Token::Keyword(Keyword::Sub) => self.subroutine(),
            Token::Keyword(Keyword::Return) => self.return_stmt(),
            _ => self.assignment_or_expr(),
        }
    }

    /// Sentencia admisible en las ranuras de inicialización y paso de
    /// un `for`: declaración, asignación o expresión suelta.
    fn simple_statement(&mut self) -> Result<Stmt, Located<ParserError>> {
        match self.peek().val() {
            Token::Keyword(Keyword::Var) => self.declaration(),
            _ => self.assignment_or_expr(),
        }
    }

    fn declaration(&mut self) -> Result<Stmt, Located<ParserError>> {
        let start = self.expect(Token::Keyword(Keyword::Var), "`var`")?;
        let (name, name_location) = self.identifier()?;
        self.expect(Token::Colon, "`:`")?;
        let ty = self.type_name()?;
        self.expect(Token::Assign, "`=`")?;

        let init = self.expression()?;
        let rank = rank_of(&init);

        let found = scalar_ty(&init);
        if found != ty && found != Type::Any {
            return Err(Located::at(
                ParserError::TypeMismatch {
                    expected: ty,
                    found,
                },
                init.location.clone(),
            ));
        }

        if self
            .symbols
            .declare_global(self.scope, &name, ty, rank)
            .is_err()
        {
            return Err(Located::at(ParserError::Redefined(name), name_location));
        }

        let location = Location::span(start, &init.location);
        Ok(Stmt::Declare(Declaration {
            name,
            scope: self.scope,
            ty,
            rank,
            init,
            location,
        }))
    }

    fn for_loop(&mut self) -> Result<Stmt, Located<ParserError>> {
        self.expect(Token::Keyword(Keyword::For), "`for`")?;
        self.expect(Token::OpenParen, "`(`")?;

        let init = self.simple_statement()?;
        self.expect(Token::Semicolon, "`;`")?;
        let cond = self.expression()?;
        self.expect(Token::Semicolon, "`;`")?;
        let step = self.simple_statement()?;
        self.expect(Token::CloseParen, "`)`")?;

        let body = self.block()?;
        Ok(Stmt::For {
            init: Box::new(init),
            cond,
            step: Box::new(step),
            body,
        })
    }

    fn while_loop(&mut self) -> Result<Stmt, Located<ParserError>> {
        self.expect(Token::Keyword(Keyword::While), "`while`")?;
        self.expect(Token::OpenParen, "`(`")?;
        let cond = self.expression()?;
        self.expect(Token::CloseParen, "`)`")?;

        let body = self.block()?;
        Ok(Stmt::While { cond, body })
    }

    fn if_chain(&mut self) -> Result<Stmt, Located<ParserError>> {
        self.expect(Token::Keyword(Keyword::If), "`if`")?;

        let mut cases = Vec::new();
        let mut otherwise = None;

        loop {
            self.expect(Token::OpenParen, "`(`")?;
            let cond = self.expression()?;
            self.expect(Token::CloseParen, "`)`")?;
            cases.push((cond, self.block()?));

            // `elseif`/`else` pueden seguir en la línea siguiente
            let saved = self.pos;
            self.skip_separators();

            match self.peek().val() {
                Token::Keyword(Keyword::Elseif) => {
                    self.bump();
                }

                Token::Keyword(Keyword::Else) => {
                    self.bump();
                    otherwise = Some(self.block()?);
                    break;
                }

                _ => {
                    self.pos = saved;
                    break;
                }
            }
        }

        Ok(Stmt::If { cases, otherwise })
    }

    fn subroutine(&mut self) -> Result<Stmt, Located<ParserError>> {
        let start = self.expect(Token::Keyword(Keyword::Sub), "`sub`")?;
        let (name, name_location) = self.identifier()?;
        self.expect(Token::OpenParen, "`(`")?;

        let scope = self.symbols.open_scope(self.scope);
        let mut params = Vec::new();

        if *self.peek().val() != Token::CloseParen {
            loop {
                let (param, param_location) = self.identifier()?;
                if self.symbols.declare_param(scope, &param, Type::Any).is_err() {
                    return Err(Located::at(ParserError::Redefined(param), param_location));
                }

                params.push(param);
                if *self.peek().val() == Token::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }

        self.expect(Token::CloseParen, "`)`")?;

        // Se registra antes del cuerpo para permitir recursión directa
        if self.subs.contains_key(&name) {
            return Err(Located::at(ParserError::Redefined(name), name_location));
        }

        self.subs.insert(
            name.clone(),
            SubInfo {
                n_params: params.len(),
            },
        );

        let outer = self.scope;
        self.scope = scope;
        let body = self.block();
        self.scope = outer;

        Ok(Stmt::Sub(Subroutine {
            name,
            params,
            scope,
            body: body?,
            location: Location::span(start, &name_location),
        }))
    }

    fn return_stmt(&mut self) -> Result<Stmt, Located<ParserError>> {
        let location = self.expect(Token::Keyword(Keyword::Return), "`return`")?;

        let value = match self.peek().val() {
            Token::Newline | Token::Semicolon | Token::CloseCurly | Token::Eof => None,
            _ => Some(self.expression()?),
        };

        Ok(Stmt::Return { value, location })
    }

    /// Una sentencia que inicia con una expresión de nivel comparación.
    /// Si le sigue un operador de asignación, el lado izquierdo debe
    /// ser una variable o un elemento de arreglo; el valor asignado es
    /// otra expresión de nivel comparación (no hay encadenamiento).
    fn assignment_or_expr(&mut self) -> Result<Stmt, Located<ParserError>> {
        let left = self.expression()?;

        let op = match self.peek().val() {
            Token::Assign => AssignOp::Set,
            Token::PlusAssign => AssignOp::Add,
            Token::MinusAssign => AssignOp::Sub,
            Token::TimesAssign => AssignOp::Mul,
            Token::SlashAssign => AssignOp::Div,
            Token::PercentAssign => AssignOp::Mod,
            Token::PowAssign => AssignOp::Pow,
            _ => return Ok(Stmt::Expr(left)),
        };

        self.bump();

        let target = match left.kind {
            ExprKind::Var(symbol) => Target::Name(Located::at(symbol, left.location)),

            kind @ ExprKind::Index { .. } => Target::Element(Expr {
                kind,
                location: left.location,
                ty: left.ty,
            }),

            _ => {
                return Err(Located::at(ParserError::BadAssignTarget, left.location));
            }
        };

        let value = self.expression()?;

        let expected = match &target {
            Target::Name(name) => {
                let (_, symbol) = self
                    .symbols
                    .lookup(name.val().scope, &name.val().name)
                    .ok_or_else(|| {
                        Located::at(
                            ParserError::Undefined(name.val().name.clone()),
                            name.location().clone(),
                        )
                    })?;

                if symbol.rank() > 0 {
                    Type::Ptr
                } else {
                    symbol.ty()
                }
            }

            Target::Element(expr) => expr.ty,
        };

        if value.ty != expected && value.ty != Type::Any && expected != Type::Any {
            return Err(Located::at(
                ParserError::TypeMismatch {
                    expected,
                    found: value.ty,
                },
                value.location.clone(),
            ));
        }

        Ok(Stmt::Assign { target, op, value })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, Located<ParserError>> {
        self.expect(Token::OpenCurly, "`{`")?;
        let body = self.block_body()?;
        self.expect(Token::CloseCurly, "`}`")?;

        Ok(body)
    }

    /// Nivel superior de las expresiones: comparaciones hacia abajo.
    fn expression(&mut self) -> Result<Expr, Located<ParserError>> {
        self.binary(1)
    }

    /// Escalada de precedencia sobre los operadores binarios.
    fn binary(&mut self, min: u8) -> Result<Expr, Located<ParserError>> {
        let mut left = self.unary()?;

        while let Some((op, prec, right_assoc)) = binop_of(self.peek().val()) {
            if prec < min {
                break;
            }

            self.bump();
            let next_min = if right_assoc { prec } else { prec + 1 };
            let right = self.binary(next_min)?;

            let ty = if op.is_comparison() {
                Type::Bool
            } else if left.ty == Type::Float || right.ty == Type::Float {
                Type::Float
            } else {
                left.ty
            };

            let location = Location::span(left.location.clone(), &right.location);
            left = Expr {
                kind: ExprKind::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                location,
                ty,
            };
        }

        Ok(left)
    }

    /// El signo unario liga más fuerte que `**`: `-2 ** 2 == (-2) ** 2`.
    fn unary(&mut self) -> Result<Expr, Located<ParserError>> {
        let op = match self.peek().val() {
            Token::Plus => UnOp::Plus,
            Token::Minus => UnOp::Minus,
            _ => return self.postfix(),
        };

        let start = self.peek().location().clone();
        self.bump();

        let operand = self.unary()?;
        let location = Location::span(start, &operand.location);
        let ty = operand.ty;

        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            location,
            ty,
        })
    }

    /// Cadenas de indexación sobre un primario.
    fn postfix(&mut self) -> Result<Expr, Located<ParserError>> {
        let mut expr = self.primary()?;

        // Tipo de elemento y dimensiones restantes de la base
        let (elem_ty, mut remaining) = match &expr.kind {
            ExprKind::Var(symbol) => {
                let (_, entry) = self
                    .symbols
                    .lookup(symbol.scope, &symbol.name)
                    .ok_or_else(|| {
                        Located::at(
                            ParserError::Undefined(symbol.name.clone()),
                            expr.location.clone(),
                        )
                    })?;
                (entry.ty(), entry.rank())
            }

            ExprKind::Array(_) => (scalar_ty(&expr), rank_of(&expr)),
            _ => (expr.ty, 0),
        };

        while *self.peek().val() == Token::OpenSquare {
            if remaining == 0 {
                return Err(Located::at(
                    ParserError::NotAnArray(expr.ty),
                    expr.location.clone(),
                ));
            }

            self.bump();
            let index = self.expression()?;
            let end = self.expect(Token::CloseSquare, "`]`")?;

            remaining -= 1;
            let ty = if remaining > 0 { Type::Ptr } else { elem_ty };
            let location = Location::span(expr.location.clone(), &end);

            expr = Expr {
                kind: ExprKind::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                },
                location,
                ty,
            };
        }

        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, Located<ParserError>> {
        let current = self.peek();
        let location = current.location().clone();

        match current.val().clone() {
            Token::IntLiteral(value) => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Int(value),
                    location,
                    ty: Type::Int,
                })
            }

            Token::FloatLiteral(value) => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Float(value),
                    location,
                    ty: Type::Float,
                })
            }

            Token::OpenParen => {
                self.bump();
                let inner = self.expression()?;

                // El error de paréntesis sin cerrar se reporta en el
                // `(`, no al final de la entrada
                if *self.peek().val() != Token::CloseParen {
                    return Err(Located::at(ParserError::UnclosedParen, location));
                }

                self.bump();
                Ok(inner)
            }

            Token::OpenSquare => self.array_literal(location),

            Token::Id(name) => {
                self.bump();

                if *self.peek().val() == Token::OpenParen {
                    return self.call(name, location);
                }

                match self.symbols.lookup(self.scope, &name) {
                    Some((scope, symbol)) => {
                        let ty = if symbol.rank() > 0 {
                            Type::Ptr
                        } else {
                            symbol.ty()
                        };

                        Ok(Expr {
                            kind: ExprKind::Var(SymbolRef { scope, name }),
                            location,
                            ty,
                        })
                    }

                    None => Err(Located::at(ParserError::Undefined(name), location)),
                }
            }

            _ => Err(self.unexpected("an expression")),
        }
    }

    fn array_literal(&mut self, start: Location) -> Result<Expr, Located<ParserError>> {
        self.expect(Token::OpenSquare, "`[`")?;

        let mut elements = Vec::new();
        if *self.peek().val() != Token::CloseSquare {
            loop {
                elements.push(self.expression()?);
                if *self.peek().val() == Token::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }

        let end = self.expect(Token::CloseSquare, "`]`")?;

        let ty = if elements.iter().any(|e| e.ty == Type::Float) {
            Type::Float
        } else if elements
            .iter()
            .any(|e| matches!(e.kind, ExprKind::Array(_)))
        {
            Type::Ptr
        } else {
            Type::Int
        };

        Ok(Expr {
            kind: ExprKind::Array(elements),
            location: Location::span(start, &end),
            ty,
        })
    }

    fn call(&mut self, name: String, start: Location) -> Result<Expr, Located<ParserError>> {
        let expected = match self.subs.get(&name) {
            Some(info) => info.n_params,
            None => return Err(Located::at(ParserError::UnknownSub(name), start)),
        };

        self.expect(Token::OpenParen, "`(`")?;

        let mut args = Vec::new();
        if *self.peek().val() != Token::CloseParen {
            loop {
                args.push(self.expression()?);
                if *self.peek().val() == Token::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }

        let end = self.expect(Token::CloseParen, "`)`")?;
        if args.len() != expected {
            return Err(Located::at(
                ParserError::BadArgCount {
                    name,
                    expected,
                    found: args.len(),
                },
                Location::span(start, &end),
            ));
        }

        Ok(Expr {
            kind: ExprKind::Call { name, args },
            location: Location::span(start, &end),
            ty: Type::Any,
        })
    }

    fn type_name(&mut self) -> Result<Type, Located<ParserError>> {
        let ty = match self.peek().val() {
            Token::Keyword(Keyword::Int) => Type::Int,
            Token::Keyword(Keyword::Float) => Type::Float,
            _ => return Err(self.unexpected("a type name")),
        };

        self.bump();
        Ok(ty)
    }

    fn identifier(&mut self) -> Result<(String, Location), Located<ParserError>> {
        match self.peek().val().clone() {
            Token::Id(name) => {
                let location = self.peek().location().clone();
                self.bump();
                Ok((name, location))
            }

            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn expect(
        &mut self,
        token: Token,
        expected: &'static str,
    ) -> Result<Location, Located<ParserError>> {
        if *self.peek().val() == token {
            let location = self.peek().location().clone();
            self.bump();
            Ok(location)
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &'static str) -> Located<ParserError> {
        let current = self.peek();
        Located::at(
            ParserError::UnexpectedToken {
                expected,
                found: current.val().clone(),
            },
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

/// Cantidad de dimensiones de un literal de arreglo, contando anidación.
pub fn rank_of(expr: &Expr) -> u8 {
    match &expr.kind {
        ExprKind::Array(elements) => 1 + elements.first().map(rank_of).unwrap_or(0),
        _ => 0,
    }
}

/// Tipo escalar base de una expresión, descendiendo por los arreglos.
fn scalar_ty(expr: &Expr) -> Type {
    match &expr.kind {
        ExprKind::Array(elements) => match elements.first() {
            Some(first) => scalar_ty(first),
            None => Type::Int,
        },
        _ => expr.ty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::lex, source::Source};

    fn parse_text(text: &str) -> Result<Program, Located<ParserError>> {
        let source = Source::new("<test>", text);
        parse(&lex(&source).expect("lexing failed"))
    }

    #[test]
    fn declaration_resolves_type_and_slot() {
        let program = parse_text("var x: int = 41").unwrap();
        assert_eq!(program.body.len(), 1);

        match &program.body[0] {
            Stmt::Declare(declaration) => {
                assert_eq!(declaration.name, "x");
                assert_eq!(declaration.ty, Type::Int);
                assert_eq!(declaration.rank, 0);
            }

            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let program = parse_text("1 + 2 * 3").unwrap();
        match &program.body[0] {
            Stmt::Expr(Expr {
                kind: ExprKind::Binary { op, right, .. },
                ..
            }) => {
                assert_eq!(*op, BinOp::Add);
                assert!(matches!(
                    right.kind,
                    ExprKind::Binary { op: BinOp::Mul, .. }
                ));
            }

            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn pow_is_right_associative() {
        let program = parse_text("2 ** 3 ** 2").unwrap();
        match &program.body[0] {
            Stmt::Expr(Expr {
                kind: ExprKind::Binary { op, right, .. },
                ..
            }) => {
                assert_eq!(*op, BinOp::Pow);
                assert!(matches!(
                    right.kind,
                    ExprKind::Binary { op: BinOp::Pow, .. }
                ));
            }

            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn unary_minus_binds_tighter_than_pow() {
        let program = parse_text("-2 ** 2").unwrap();
        match &program.body[0] {
            Stmt::Expr(Expr {
                kind: ExprKind::Binary { op, left, .. },
                ..
            }) => {
                assert_eq!(*op, BinOp::Pow);
                assert!(matches!(left.kind, ExprKind::Unary { .. }));
            }

            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn assignment_to_undeclared_name_is_a_symbol_error() {
        let error = parse_text("x = 5;").unwrap_err();
        assert!(matches!(error.val(), ParserError::Undefined(name) if name == "x"));
        assert_eq!(error.val().kind(), DiagnosticKind::SymbolError);
    }

    #[test]
    fn use_before_declaration_is_a_symbol_error() {
        let error = parse_text("var y: int = x\nvar x: int = 1").unwrap_err();
        assert!(matches!(error.val(), ParserError::Undefined(name) if name == "x"));
    }

    #[test]
    fn unclosed_paren_reports_at_the_paren() {
        let error = parse_text("(1 + 2").unwrap_err();
        assert!(matches!(error.val(), ParserError::UnclosedParen));
        assert_eq!(error.location().start().column(), 1);
    }

    #[test]
    fn declared_and_initializer_types_must_match() {
        let error = parse_text("var x: int = 1.5").unwrap_err();
        assert!(matches!(error.val(), ParserError::TypeMismatch { .. }));
        assert_eq!(error.val().kind(), DiagnosticKind::TypeError);
    }

    #[test]
    fn calls_require_prior_declaration() {
        let error = parse_text("f(1)").unwrap_err();
        assert!(matches!(error.val(), ParserError::UnknownSub(name) if name == "f"));
    }

    #[test]
    fn call_argument_count_is_checked() {
        // La recursión directa es legal, pero no con aridad incorrecta
        let error = parse_text("sub f(a, b) { return f(1) }").unwrap_err();
        assert!(matches!(
            error.val(),
            ParserError::BadArgCount {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn comparison_infers_bool() {
        let program = parse_text("1 < 2").unwrap();
        match &program.body[0] {
            Stmt::Expr(expr) => assert_eq!(expr.ty, Type::Bool),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn indexing_requires_an_array() {
        let error = parse_text("sub f(a) { return a[0] }").unwrap_err();
        assert!(matches!(error.val(), ParserError::NotAnArray(_)));
    }

    #[test]
    fn a_failed_statement_after_the_first_ends_the_block() {
        let error = parse_text("var x: int = 1\nx[0]").unwrap_err();
        assert!(matches!(
            error.val(),
            ParserError::UnexpectedToken {
                expected: "end of input",
                ..
            }
        ));
    }

    #[test]
    fn array_declaration_records_rank() {
        let program = parse_text("var v: int = [1, 2, 3]").unwrap();
        match &program.body[0] {
            Stmt::Declare(declaration) => assert_eq!(declaration.rank, 1),
            other => panic!("unexpected statement: {:?}", other),
        }
    }
}
