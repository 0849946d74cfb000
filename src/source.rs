//! Rastreo de ubicaciones originales en código fuente.
//!
//! Los distintos objetos internos que el compilador construye
//! deben llevar cuenta de posiciones o rangos de ubicaciones en
//! el código fuente original, lo cual permite determinar un punto
//! exacto o aproximado en donde ocurre un error de abstracción
//! arbitraria. El texto completo del archivo se preserva en
//! [`Source`] para poder subrayar la línea ofensiva al momento
//! de reportar un diagnóstico.

use std::{
    fmt::{self, Debug, Display, Formatter},
    rc::Rc,
};

/// Un objeto cualquiera con una posición original asociada.
#[derive(Debug, Clone)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Obtiene la ubicación.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Descarta la ubicación y toma ownership del valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Descompone y toma ownership de las dos partes.
    pub fn split(self) -> (Location, T) {
        (self.location, self.value)
    }

    /// Construye a partir de un valor y una ubicación.
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }

    /// Transforma el valor con la misma ubicación.
    pub fn map<U, F>(self, map: F) -> Located<U>
    where
        F: FnOnce(T) -> U,
    {
        Located {
            value: map(self.value),
            location: self.location,
        }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Una ubicación está conformada por un origen y un rango de posiciones.
#[derive(Clone)]
pub struct Location {
    from: Rc<Source>,
    start: Position,
    end: Position,
}

impl Location {
    /// Construye una ubicación puntual.
    pub fn single(from: Rc<Source>, at: Position) -> Self {
        Location {
            from,
            start: at,
            end: at,
        }
    }

    /// Unifica un rango de ubicaciones. Se asume el mismo origen.
    pub fn span(from: Location, to: &Location) -> Self {
        Location {
            from: from.from,
            start: from.start,
            end: to.end,
        }
    }

    /// Obtiene la posición de inicio.
    pub fn start(&self) -> Position {
        self.start
    }

    /// Obtiene la posición de fin.
    pub fn end(&self) -> Position {
        self.end
    }

    /// Obtiene el origen.
    pub fn source(&self) -> &Rc<Source> {
        &self.from
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:", self.from.name())?;

        if self.start == self.end {
            write!(formatter, "{}", self.start)
        } else {
            write!(formatter, "[{}-{}]", self.start, self.end)
        }
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

/// Una posición línea-columna-índice en un archivo.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Position {
    line: u32,
    column: u32,
    offset: u32,
}

impl Position {
    /// Obtiene el número de línea.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Obtiene el número de columna.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Obtiene el índice absoluto en el texto.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Avanza la posición sobre un carácter.
    pub fn advance(self, over: char) -> Position {
        if over == '\n' {
            Position {
                line: self.line + 1,
                column: 1,
                offset: self.offset + 1,
            }
        } else {
            Position {
                line: self.line,
                column: self.column + 1,
                offset: self.offset + 1,
            }
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

/// Nombre de origen y texto completo del programa fuente.
pub struct Source {
    name: String,
    text: String,
}

impl Source {
    /// Construye un origen compartible.
    pub fn new<N: Into<String>, T: Into<String>>(name: N, text: T) -> Rc<Self> {
        Rc::new(Source {
            name: name.into(),
            text: text.into(),
        })
    }

    /// Obtiene el nombre de origen.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Obtiene el texto completo.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Obtiene una línea específica, si existe. Las líneas inician en 1.
    pub fn line(&self, number: u32) -> Option<&str> {
        self.text.lines().nth(number.saturating_sub(1) as usize)
    }
}

impl Debug for Source {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "Source({:?})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_tracks_lines_and_offsets() {
        let mut position = Position::default();
        for c in "ab\nc".chars() {
            position = position.advance(c);
        }

        assert_eq!(position.line(), 2);
        assert_eq!(position.column(), 2);
        assert_eq!(position.offset(), 4);
    }

    #[test]
    fn source_exposes_lines() {
        let source = Source::new("<code>", "primera\nsegunda");
        assert_eq!(source.line(1), Some("primera"));
        assert_eq!(source.line(2), Some("segunda"));
        assert_eq!(source.line(3), None);
    }
}
