//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone el texto fuente
//! en unidades léxicas denominadas tokens. Los espacios en blanco y los
//! comentarios `//` se descartan durante esta operación; los saltos de
//! línea sí se emiten, ya que la gramática los utiliza como separadores
//! de sentencias. Cada token emitido está asociado a una ubicación en
//! el código fuente original, lo cual permite rastrear errores tanto en
//! los mismos como en constructos más elevados de fases posteriores.
//!
//! # Reglas importantes del lenguaje
//! - Los identificadores inician con letra o `'_'` y continúan con
//!   caracteres alfanuméricos o `'_'`.
//! - Los operadores de varios caracteres (`==`, `<=`, `**=`, ...) se
//!   resuelven con un carácter de lookahead.
//! - Una constante numérica admite a lo sumo un `'.'`; un segundo punto
//!   termina la constante y el punto restante se vuelve a escanear.

use crate::{
    error::{DiagnosticKind, Stage},
    source::{Located, Location, Position, Source},
};
use std::{
    fmt::{self, Display},
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("'{0}'")]
    BadChar(char),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow")]
    IntOverflow,
}

impl Stage for LexerError {
    fn kind(&self) -> DiagnosticKind {
        match self {
            LexerError::BadChar(_) => DiagnosticKind::UnknownChar,
            LexerError::IntOverflow => DiagnosticKind::InvalidSyntax,
        }
    }
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir completamente
/// a una entidad léxica en el programa fuente.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identificador.
    Id(String),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero.
    IntLiteral(i64),

    /// Literal de punto flotante.
    FloatLiteral(f64),

    /// `=`
    Assign,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `/`
    Slash,

    /// `%`
    Percent,

    /// `**`
    Pow,

    /// `+=`
    PlusAssign,

    /// `-=`
    MinusAssign,

    /// `*=`
    TimesAssign,

    /// `/=`
    SlashAssign,

    /// `%=`
    PercentAssign,

    /// `**=`
    PowAssign,

    /// `==`
    Equal,

    /// `!=`
    NotEqual,

    /// `<`
    Less,

    /// `<=`
    LessEqual,

    /// `>`
    Greater,

    /// `>=`
    GreaterEqual,

    /// `,`
    Comma,

    /// `:`
    Colon,

    /// `;`
    Semicolon,

    /// Salto de línea, separador de sentencias.
    Newline,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// `[`
    OpenSquare,

    /// `]`
    CloseSquare,

    /// Fin de la entrada.
    Eof,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            IntLiteral(integer) => write!(fmt, "literal `{}`", integer),
            FloatLiteral(float) => write!(fmt, "literal `{}`", float),
            Assign => fmt.write_str("`=`"),
            Plus => fmt.write_str("`+`"),
            Minus => fmt.write_str("`-`"),
            Times => fmt.write_str("`*`"),
            Slash => fmt.write_str("`/`"),
            Percent => fmt.write_str("`%`"),
            Pow => fmt.write_str("`**`"),
            PlusAssign => fmt.write_str("`+=`"),
            MinusAssign => fmt.write_str("`-=`"),
            TimesAssign => fmt.write_str("`*=`"),
            SlashAssign => fmt.write_str("`/=`"),
            PercentAssign => fmt.write_str("`%=`"),
            PowAssign => fmt.write_str("`**=`"),
            Equal => fmt.write_str("`==`"),
            NotEqual => fmt.write_str("`!=`"),
            Less => fmt.write_str("`<`"),
            LessEqual => fmt.write_str("`<=`"),
            Greater => fmt.write_str("`>`"),
            GreaterEqual => fmt.write_str("`>=`"),
            Comma => fmt.write_str("`,`"),
            Colon => fmt.write_str("`:`"),
            Semicolon => fmt.write_str("`;`"),
            Newline => fmt.write_str("end of line"),
            OpenParen => fmt.write_str("`(`"),
            CloseParen => fmt.write_str("`)`"),
            OpenCurly => fmt.write_str("`{`"),
            CloseCurly => fmt.write_str("`}`"),
            OpenSquare => fmt.write_str("`[`"),
            CloseSquare => fmt.write_str("`]`"),
            Eof => fmt.write_str("end of input"),
        }
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Const,
    For,
    While,
    If,
    Elseif,
    Else,
    Sub,
    Return,
    Int,
    Float,
}

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Keyword::*;
        let string = match self {
            Var => "var",
            Const => "const",
            For => "for",
            While => "while",
            If => "if",
            Elseif => "elseif",
            Else => "else",
            Sub => "sub",
            Return => "return",
            Int => "int",
            Float => "float",
        };

        fmt.write_str(string)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        use Keyword::*;

        const KEYWORDS: &[(&str, Keyword)] = &[
            ("var", Var),
            ("const", Const),
            ("for", For),
            ("while", While),
            ("if", If),
            ("elseif", Elseif),
            ("else", Else),
            ("sub", Sub),
            ("return", Return),
            ("int", Int),
            ("float", Float),
        ];

        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Reduce un programa fuente a una secuencia finita de tokens que
/// termina en [`Token::Eof`], o falla en el primer carácter inválido.
pub fn lex(source: &Rc<Source>) -> Result<Vec<Located<Token>>, Located<LexerError>> {
    let mut lexer = Lexer {
        source: Rc::clone(source),
        chars: source.text().chars().collect(),
        index: 0,
        position: Position::default(),
    };

    lexer.run()
}

/// Estado de avance sobre el flujo de caracteres.
struct Lexer {
    source: Rc<Source>,
    chars: Vec<char>,
    index: usize,
    position: Position,
}

impl Lexer {
    fn run(&mut self) -> Result<Vec<Located<Token>>, Located<LexerError>> {
        let mut tokens = Vec::new();

        while let Some(c) = self.current() {
            let start = self.position;

            match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }

                '\n' => {
                    self.bump();
                    tokens.push(self.locate(Token::Newline, start));
                }

                ';' => {
                    self.bump();
                    tokens.push(self.locate(Token::Semicolon, start));
                }

                ',' => tokens.push(self.single(Token::Comma)),
                ':' => tokens.push(self.single(Token::Colon)),
                '(' => tokens.push(self.single(Token::OpenParen)),
                ')' => tokens.push(self.single(Token::CloseParen)),
                '{' => tokens.push(self.single(Token::OpenCurly)),
                '}' => tokens.push(self.single(Token::CloseCurly)),
                '[' => tokens.push(self.single(Token::OpenSquare)),
                ']' => tokens.push(self.single(Token::CloseSquare)),

                '+' => {
                    self.bump();
                    let token = self.follow('=', Token::PlusAssign, Token::Plus);
                    tokens.push(self.locate(token, start));
                }

                '-' => {
                    self.bump();
                    let token = self.follow('=', Token::MinusAssign, Token::Minus);
                    tokens.push(self.locate(token, start));
                }

                '%' => {
                    self.bump();
                    let token = self.follow('=', Token::PercentAssign, Token::Percent);
                    tokens.push(self.locate(token, start));
                }

                '=' => {
                    self.bump();
                    let token = self.follow('=', Token::Equal, Token::Assign);
                    tokens.push(self.locate(token, start));
                }

                '<' => {
                    self.bump();
                    let token = self.follow('=', Token::LessEqual, Token::Less);
                    tokens.push(self.locate(token, start));
                }

                '>' => {
                    self.bump();
                    let token = self.follow('=', Token::GreaterEqual, Token::Greater);
                    tokens.push(self.locate(token, start));
                }

                '!' => {
                    self.bump();
                    if self.current() == Some('=') {
                        self.bump();
                        tokens.push(self.locate(Token::NotEqual, start));
                    } else {
                        return Err(Located::at(
                            LexerError::BadChar('!'),
                            Location::single(Rc::clone(&self.source), start),
                        ));
                    }
                }

                '*' => {
                    self.bump();
                    let token = match self.current() {
                        Some('*') => {
                            self.bump();
                            self.follow('=', Token::PowAssign, Token::Pow)
                        }

                        Some('=') => {
                            self.bump();
                            Token::TimesAssign
                        }

                        _ => Token::Times,
                    };
                    tokens.push(self.locate(token, start));
                }

                '/' => {
                    self.bump();
                    match self.current() {
                        // El comentario descarta el resto de la línea;
                        // el '\n' queda pendiente como separador
                        Some('/') => {
                            while !matches!(self.current(), None | Some('\n')) {
                                self.bump();
                            }
                        }

                        Some('=') => {
                            self.bump();
                            tokens.push(self.locate(Token::SlashAssign, start));
                        }

                        _ => tokens.push(self.locate(Token::Slash, start)),
                    }
                }

                c if c.is_ascii_digit() => {
                    let token = self.number(start)?;
                    tokens.push(token);
                }

                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut word = String::new();
                    while let Some(c) = self.current() {
                        if c.is_ascii_alphanumeric() || c == '_' {
                            word.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }

                    let token = match Keyword::from_str(&word) {
                        Ok(keyword) => Token::Keyword(keyword),
                        Err(()) => Token::Id(word),
                    };

                    tokens.push(self.locate(token, start));
                }

                c => {
                    return Err(Located::at(
                        LexerError::BadChar(c),
                        Location::single(Rc::clone(&self.source), start),
                    ))
                }
            }
        }

        tokens.push(self.locate(Token::Eof, self.position));
        Ok(tokens)
    }

    /// Acumula dígitos y a lo sumo un punto decimal. Un segundo punto
    /// termina la constante sin ser consumido, por lo cual se vuelve a
    /// escanear como carácter independiente.
    fn number(&mut self, start: Position) -> Result<Located<Token>, Located<LexerError>> {
        let mut dots = 0;
        let mut literal = String::new();

        while let Some(c) = self.current() {
            if c == '.' {
                if dots == 1 {
                    break;
                }
                dots += 1;
            } else if !c.is_ascii_digit() {
                break;
            }

            literal.push(c);
            self.bump();
        }

        let token = if dots > 0 {
            match f64::from_str(&literal) {
                Ok(float) => Token::FloatLiteral(float),
                Err(_) => {
                    return Err(Located::at(
                        LexerError::IntOverflow,
                        Location::single(Rc::clone(&self.source), start),
                    ))
                }
            }
        } else {
            match i64::from_str(&literal) {
                Ok(integer) => Token::IntLiteral(integer),
                Err(_) => {
                    return Err(Located::at(
                        LexerError::IntOverflow,
                        Location::single(Rc::clone(&self.source), start),
                    ))
                }
            }
        };

        Ok(self.locate(token, start))
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn bump(&mut self) {
        if let Some(c) = self.current() {
            self.position = self.position.advance(c);
            self.index += 1;
        }
    }

    /// Consume el carácter actual y emite un token de un solo carácter.
    fn single(&mut self, token: Token) -> Located<Token> {
        let start = self.position;
        self.bump();
        self.locate(token, start)
    }

    /// Lookahead de un carácter para operadores compuestos.
    fn follow(&mut self, expected: char, then: Token, otherwise: Token) -> Token {
        if self.current() == Some(expected) {
            self.bump();
            then
        } else {
            otherwise
        }
    }

    /// Ubica un token desde `start` hasta la última posición aceptada.
    fn locate(&self, token: Token, start: Position) -> Located<Token> {
        let from = Location::single(Rc::clone(&self.source), start);
        let to = Location::single(Rc::clone(&self.source), self.position);
        Located::at(token, Location::span(from, &to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens_of(text: &str) -> Vec<Token> {
        let source = Source::new("<test>", text);
        lex(&source)
            .expect("lexing failed")
            .into_iter()
            .map(Located::into_inner)
            .collect()
    }

    #[test]
    fn scans_declaration() {
        use Token::*;

        assert_eq!(
            tokens_of("var x: int = 41"),
            vec![
                Keyword(super::Keyword::Var),
                Id(String::from("x")),
                Colon,
                Keyword(super::Keyword::Int),
                Assign,
                IntLiteral(41),
                Eof,
            ]
        );
    }

    #[test]
    fn scans_compound_operators() {
        use Token::*;

        assert_eq!(
            tokens_of("** **= <= >= == != +="),
            vec![
                Pow,
                PowAssign,
                LessEqual,
                GreaterEqual,
                Equal,
                NotEqual,
                PlusAssign,
                Eof
            ]
        );
    }

    #[test]
    fn second_dot_ends_the_literal() {
        // "1.2.3" produce el flotante 1.2 y el punto restante se
        // reescanea, fallando como carácter suelto
        let source = Source::new("<test>", "1.2.3");
        let error = lex(&source).unwrap_err();
        assert!(matches!(error.val(), LexerError::BadChar('.')));
    }

    #[test]
    fn discards_comments_but_keeps_newlines() {
        use Token::*;

        assert_eq!(
            tokens_of("1 // un comentario\n2"),
            vec![IntLiteral(1), Newline, IntLiteral(2), Eof]
        );
    }

    #[test]
    fn rejects_unknown_characters() {
        let source = Source::new("<test>", "var $ = 1");
        let error = lex(&source).unwrap_err();

        assert!(matches!(error.val(), LexerError::BadChar('$')));
        assert_eq!(error.location().start().column(), 5);
    }

    #[test]
    fn keywords_are_classified() {
        assert_eq!(
            tokens_of("elseif cosa"),
            vec![
                Token::Keyword(Keyword::Elseif),
                Token::Id(String::from("cosa")),
                Token::Eof
            ]
        );
    }
}
