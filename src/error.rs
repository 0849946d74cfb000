//! Canal uniforme de diagnósticos.
//!
//! Toda fase del compilador reporta fallos por medio de un único
//! [`Diagnostic`] que lleva una categoría, un rango de posiciones
//! en el código fuente y un mensaje. El primer error detectado
//! aborta la compilación; no hay acumulación de múltiples errores.

use crate::source::{Located, Location};
use std::{
    error::Error,
    fmt::{self, Display},
};

/// Categorías de error que el compilador puede reportar.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Carácter no reconocido por el lexer.
    UnknownChar,

    /// Violación de la gramática.
    InvalidSyntax,

    /// Fallo durante generación de código o plegado de constantes.
    CompilationError,

    /// Referencia indefinida o declaración duplicada.
    SymbolError,

    /// Discrepancia de tipos.
    TypeError,

    /// Fallo al expandir directivas `include`.
    ProcessingError,
}

impl Display for DiagnosticKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::UnknownChar => "Unknown Character",
            DiagnosticKind::InvalidSyntax => "Invalid Syntax",
            DiagnosticKind::CompilationError => "Compilation Error",
            DiagnosticKind::SymbolError => "Symbol Error",
            DiagnosticKind::TypeError => "Type Error",
            DiagnosticKind::ProcessingError => "Processing Error",
        };

        fmt.write_str(name)
    }
}

/// Un error con categoría, ubicación y mensaje.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    kind: DiagnosticKind,
    location: Location,
    message: String,
}

impl Diagnostic {
    /// Construye un diagnóstico a partir de sus tres componentes.
    pub fn new<M: Into<String>>(kind: DiagnosticKind, location: Location, message: M) -> Self {
        Diagnostic {
            kind,
            location,
            message: message.into(),
        }
    }

    /// Eleva el error específico de una fase, preservando su ubicación.
    pub fn lift<E: Error + Stage>(error: Located<E>) -> Self {
        let (location, error) = error.split();
        Diagnostic::new(error.kind(), location, error.to_string())
    }

    /// Obtiene la categoría.
    pub fn kind(&self) -> DiagnosticKind {
        self.kind
    }

    /// Obtiene la ubicación.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Obtiene el mensaje.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Asociación de los errores de cada fase con su categoría de diagnóstico.
pub trait Stage {
    /// Categoría bajo la cual se reporta este error.
    fn kind(&self) -> DiagnosticKind;
}

impl Display for Diagnostic {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = &self.location;
        writeln!(fmt, "{}: {}", self.kind, self.message)?;
        writeln!(fmt, " --> {}", location)?;

        let digits = location.end().line().to_string().chars().count();
        writeln!(fmt, "{:digits$} |", "", digits = digits)?;

        let source = location.source();
        for line_number in location.start().line()..=location.end().line() {
            if let Some(line) = source.line(line_number) {
                writeln!(fmt, "{:>digits$} | {}", line_number, line, digits = digits)?;
            }
        }

        // El subrayado cubre desde la columna inicial hasta la final,
        // con un mínimo de un caret
        let (from, to) = (location.start().column(), location.end().column());
        let min = from.min(to);
        let max = from.max(to);

        let skip = (min - 1) as usize;
        let highlight = (max - min + 1) as usize;

        writeln!(
            fmt,
            "{:digits$} | {:skip$}{:^<highlight$}",
            "",
            "",
            "",
            digits = digits,
            skip = skip,
            highlight = highlight
        )
    }
}

impl Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Position, Source};
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("something failed")]
    struct Dummy;

    impl Stage for Dummy {
        fn kind(&self) -> DiagnosticKind {
            DiagnosticKind::CompilationError
        }
    }

    #[test]
    fn lift_preserves_kind_and_location() {
        let source = Source::new("<code>", "var x: int = 1");
        let location = Location::single(source, Position::default());
        let diagnostic = Diagnostic::lift(Located::at(Dummy, location));

        assert_eq!(diagnostic.kind(), DiagnosticKind::CompilationError);
        assert_eq!(diagnostic.message(), "something failed");
    }

    #[test]
    fn display_renders_caret_context() {
        let source = Source::new("demo.xs", "x = 5;");
        let location = Location::single(source, Position::default());
        let rendered = Diagnostic::new(DiagnosticKind::SymbolError, location, "`x` is undefined")
            .to_string();

        assert!(rendered.contains("Symbol Error: `x` is undefined"));
        assert!(rendered.contains(" --> demo.xs:1:1"));
        assert!(rendered.contains("x = 5;"));
        assert!(rendered.contains('^'));
    }
}
