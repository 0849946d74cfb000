//! Compilador para el lenguaje de guiones XS.
//!
//! # Front end
//! Cada programa deriva de un único archivo de código fuente. El
//! archivo se somete primero a análisis léxico en [`lex`], de lo cual
//! se obtiene un flujo de tokens. El flujo de tokens se dispone en un
//! AST por medio de análisis sintáctico en [`parse`], que además
//! resuelve símbolos contra la tabla jerárquica de [`symbols`]. El
//! árbol pasa por el análisis de usos de [`semantic`] y por las
//! reescrituras de [`optimize`], que pueden dejar avisos dirigidos al
//! usuario sin detener la compilación.
//!
//! # Back end
//! La emisión ocurre en [`codegen`] sobre la representación de
//! instrucciones de [`inst`], parametrizada por un descriptor de
//! perfil de [`arch`]: el mismo generador produce código para el
//! perfil de 16 bits y el de 8. Una pasada de mirilla en [`peephole`]
//! limpia el flujo emitido antes de darle formato textual.
//!
//! # Ruta heredada
//! El compilador conserva una ruta alterna anterior al AST: [`expand`]
//! empalma inclusiones textuales y [`rpn`] aplana el programa a
//! notación postfija por patio de maniobras y lo baja directamente a
//! instrucciones. Ambas rutas comparten tokens, instrucciones, mirilla
//! y formato de salida.
//!
//! Todo error de cualquier fase se reporta como un [`error::Diagnostic`]
//! uniforme con posición en el archivo fuente.

pub mod arch;
pub mod codegen;
pub mod error;
pub mod expand;
pub mod inst;
pub mod lex;
pub mod optimize;
pub mod parse;
pub mod peephole;
pub mod rpn;
pub mod semantic;
pub mod source;
pub mod symbols;

use crate::{
    arch::Arch,
    error::Diagnostic,
    inst::Reg,
    optimize::{Advisory, OptFlags},
    source::Source,
};
use std::collections::HashMap;

/// Parámetros de una corrida completa del compilador.
#[derive(Clone)]
pub struct Options {
    /// Perfil de ISA objetivo.
    pub arch: Arch,

    /// Registro de destino para resultados de expresión.
    pub dest: Reg,

    /// Pasadas de optimización habilitadas.
    pub flags: OptFlags,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            arch: Arch::Xenon,
            dest: Reg::Ax,
            flags: OptFlags::default(),
        }
    }
}

/// Resultado de una compilación exitosa.
#[derive(Debug)]
pub struct Output {
    /// Instrucciones en su forma textual final, una por línea.
    pub instructions: Vec<String>,

    /// Avisos de las pasadas de optimización.
    pub advisories: Vec<Advisory>,
}

/// Compila un programa por la ruta principal del AST.
pub fn compile(name: &str, text: &str, options: &Options) -> Result<Output, Diagnostic> {
    let source = Source::new(name, text);
    let backend = options.arch.backend();

    let tokens = lex::lex(&source).map_err(Diagnostic::lift)?;
    let mut program = parse::parse(&tokens).map_err(Diagnostic::lift)?;
    semantic::analyze(&mut program).map_err(Diagnostic::lift)?;

    let advisories = optimize::optimize(&mut program, options.flags).map_err(Diagnostic::lift)?;

    let mut instructions =
        codegen::generate(&program, backend, options.dest).map_err(Diagnostic::lift)?;
    if options.flags.contains(OptFlags::PEEPHOLE) {
        peephole::optimize(&mut instructions);
    }

    Ok(Output {
        instructions: inst::render(&instructions, backend),
        advisories,
    })
}

/// Compila un programa por la ruta heredada de notación postfija.
///
/// `modules` resuelve los nombres de las directivas de inclusión. La
/// ruta heredada no produce avisos.
pub fn compile_legacy(
    name: &str,
    text: &str,
    modules: &HashMap<String, String>,
    options: &Options,
) -> Result<Output, Diagnostic> {
    let backend = options.arch.backend();

    let expanded = expand::expand(name, text, modules).map_err(Diagnostic::lift)?;
    let source = Source::new(name, &expanded);

    let tokens = lex::lex(&source).map_err(Diagnostic::lift)?;
    let program = rpn::parse(&tokens).map_err(Diagnostic::lift)?;

    let mut instructions =
        rpn::generate(&program, backend, options.dest).map_err(Diagnostic::lift)?;
    if options.flags.contains(OptFlags::PEEPHOLE) {
        peephole::optimize(&mut instructions);
    }

    Ok(Output {
        instructions: inst::render(&instructions, backend),
        advisories: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emerald() -> Options {
        Options {
            arch: Arch::Emerald,
            ..Options::default()
        }
    }

    #[test]
    fn the_smallest_program_compiles_on_both_profiles() {
        let output = compile("<test>", "var x: int = 1\nx", &Options::default()).unwrap();
        assert_eq!(output.instructions.last().map(String::as_str), Some("HALT"));

        let output = compile("<test>", "var x: int = 1\nx", &emerald()).unwrap();
        assert_eq!(output.instructions.last().map(String::as_str), Some("HLT"));
    }

    #[test]
    fn float_literals_reach_the_output_encoded() {
        let output = compile("<test>", "var x: float = 1.0\nx", &Options::default()).unwrap();

        assert!(output
            .instructions
            .iter()
            .any(|line| line.contains("#3C00")));

        let output = compile("<test>", "var x: float = 1.0\nx", &emerald()).unwrap();
        assert!(output.instructions.iter().any(|line| line.contains("#38")));
    }

    #[test]
    fn dead_stores_leave_an_advisory() {
        let output = compile(
            "<test>",
            "var x: int = 1\nx = 2\nx",
            &Options::default(),
        )
        .unwrap();

        assert!(output
            .advisories
            .iter()
            .any(|advisory| advisory.subsystem == "dead-store"));
    }

    #[test]
    fn diagnostics_carry_the_failing_position() {
        let error = compile("bad.xs", "var x: int = $", &Options::default()).unwrap_err();
        let rendered = error.to_string();

        assert!(rendered.contains("Unknown Character"));
        assert!(rendered.contains("bad.xs"));
    }

    #[test]
    fn disabling_the_peephole_keeps_push_pop_pairs() {
        let options = Options {
            flags: OptFlags::all() - OptFlags::PEEPHOLE,
            ..Options::default()
        };

        let clean = compile("<test>", "var x: int = 1 + 2\nx", &Options::default()).unwrap();
        let raw = compile("<test>", "var x: int = 1 + 2\nx", &options).unwrap();

        assert!(raw.instructions.len() >= clean.instructions.len());
    }

    #[test]
    fn the_legacy_route_shares_the_output_format() {
        let output = compile_legacy(
            "<test>",
            "x = 1\nx + 1",
            &HashMap::new(),
            &Options::default(),
        )
        .unwrap();

        assert_eq!(output.instructions.last().map(String::as_str), Some("HALT"));
        assert!(output.advisories.is_empty());
    }

    #[test]
    fn legacy_inclusions_splice_before_lexing() {
        let mut modules = HashMap::new();
        modules.insert(String::from("lib"), String::from("sub f(x) { return x }\n"));

        let output = compile_legacy(
            "<test>",
            "include <lib>\nf(1)",
            &modules,
            &Options::default(),
        )
        .unwrap();

        assert!(output
            .instructions
            .iter()
            .any(|line| line.starts_with("CALL")));
    }

    #[test]
    fn comparisons_materialize_minus_one() {
        let output = compile("<test>", "var a: int = 2\na < 3", &Options::default()).unwrap();

        assert!(output
            .instructions
            .iter()
            .any(|line| line.contains("#FFFF")));
    }
}
