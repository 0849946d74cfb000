//! Expansión de directivas de inclusión de la ruta heredada.
//!
//! Antes de tokenizar, el texto fuente se recorre en busca de líneas
//! `include <módulo>` y cada una se reemplaza por el contenido completo
//! del módulo nombrado, de manera recursiva. No hay espacios de
//! nombres: la expansión es un empalme textual y los símbolos del
//! módulo incluido quedan al mismo nivel que los del archivo que lo
//! incluye.
//!
//! Los módulos disponibles llegan en un mapa nombre a contenido; el
//! llamador decide de dónde salen (en la herramienta de línea de
//! comandos, de los archivos hermanos del archivo de entrada).

use crate::{
    error::{DiagnosticKind, Stage},
    source::{Located, Location, Position, Source},
};
use regex::Regex;
use std::collections::HashMap;

use thiserror::Error;

/// Error durante la expansión de inclusiones.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ExpandError {
    #[error("cannot include `{0}`: no such module")]
    Missing(String),

    #[error("circular inclusion of `{0}`")]
    Circular(String),
}

impl Stage for ExpandError {
    fn kind(&self) -> DiagnosticKind {
        DiagnosticKind::ProcessingError
    }
}

/// Expande recursivamente las directivas de inclusión de `text`,
/// resolviendo los nombres de módulo contra `modules`.
pub fn expand(
    name: &str,
    text: &str,
    modules: &HashMap<String, String>,
) -> Result<String, Located<ExpandError>> {
    let directive =
        Regex::new(r"(?m)^[ \t]*include[ \t]+<([^>\n]+)>[ \t]*$").expect("valid regex");

    let mut trail = vec![name.to_owned()];
    splice(&directive, name, text, modules, &mut trail)
}

fn splice(
    directive: &Regex,
    name: &str,
    text: &str,
    modules: &HashMap<String, String>,
    trail: &mut Vec<String>,
) -> Result<String, Located<ExpandError>> {
    let source = Source::new(name, text);
    let mut output = String::with_capacity(text.len());
    let mut consumed = 0;

    for captures in directive.captures_iter(text) {
        let (whole, module) = match (captures.get(0), captures.get(1)) {
            (Some(whole), Some(module)) => (whole, module.as_str()),
            _ => continue,
        };

        output.push_str(&text[consumed..whole.start()]);
        consumed = whole.end();

        let position = text[..whole.start()]
            .chars()
            .fold(Position::default(), Position::advance);
        let location = Location::single(source.clone(), position);

        if trail.iter().any(|entry| entry == module) {
            return Err(Located::at(
                ExpandError::Circular(module.to_owned()),
                location,
            ));
        }

        let body = match modules.get(module) {
            Some(body) => body,
            None => {
                return Err(Located::at(
                    ExpandError::Missing(module.to_owned()),
                    location,
                ))
            }
        };

        trail.push(module.to_owned());
        output.push_str(&splice(directive, module, body, modules, trail)?);
        trail.pop();
    }

    output.push_str(&text[consumed..]);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, text)| (String::from(*name), String::from(*text)))
            .collect()
    }

    #[test]
    fn directives_splice_module_contents() {
        let modules = modules(&[("util", "sub f(x) { return x }\n")]);
        let expanded = expand("main", "include <util>\nf(1)\n", &modules).unwrap();

        assert_eq!(expanded, "sub f(x) { return x }\n\nf(1)\n");
    }

    #[test]
    fn inclusion_is_recursive() {
        let modules = modules(&[("a", "include <b>\nx = 1\n"), ("b", "y = 2\n")]);
        let expanded = expand("main", "include <a>\n", &modules).unwrap();

        assert!(expanded.contains("y = 2"));
        assert!(expanded.contains("x = 1"));
    }

    #[test]
    fn missing_modules_are_an_error() {
        let error = expand("main", "include <nowhere>\n", &HashMap::new()).unwrap_err();

        assert!(matches!(error.val(), ExpandError::Missing(name) if name == "nowhere"));
        assert_eq!(error.location().start().line(), 1);
    }

    #[test]
    fn circular_chains_are_detected() {
        let modules = modules(&[("a", "include <b>\n"), ("b", "include <a>\n")]);
        let error = expand("main", "include <a>\n", &modules).unwrap_err();

        assert!(matches!(error.val(), ExpandError::Circular(name) if name == "a"));
    }

    #[test]
    fn the_same_module_may_appear_on_separate_branches() {
        let modules = modules(&[
            ("a", "include <c>\n"),
            ("b", "include <c>\n"),
            ("c", "z = 3\n"),
        ]);

        let expanded = expand("main", "include <a>\ninclude <b>\n", &modules).unwrap();
        assert_eq!(expanded.matches("z = 3").count(), 2);
    }

    #[test]
    fn indented_directives_still_expand() {
        let modules = modules(&[("m", "w = 0\n")]);
        let expanded = expand("main", "  include <m>\n", &modules).unwrap();

        assert!(expanded.contains("w = 0"));
    }
}
