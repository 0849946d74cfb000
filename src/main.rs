//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI. Los avisos del optimizador van a
//! stderr; el listado de instrucciones va al archivo de salida o a
//! stdout.

use anyhow::{bail, Context};
use clap::{crate_version, Arg, Command};
use std::{
    collections::HashMap,
    ffi::OsStr,
    fs::{self, File},
    io::Write,
    path::Path,
    str::FromStr,
};
use xsc::{arch::Arch, inst::Reg, Options};

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("XS compiler")
        .version(crate_version!())
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("FILE")
                .help("Source file"),
        )
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .value_name("PROFILE")
                .takes_value(true)
                .default_value("xenon")
                .possible_values(["xenon", "emerald"])
                .help("Target ISA profile"),
        )
        .arg(
            Arg::new("register")
                .short('r')
                .long("register")
                .value_name("REG")
                .takes_value(true)
                .default_value("AX")
                .help("Destination register for expression results"),
        )
        .arg(
            Arg::new("legacy")
                .long("legacy")
                .help("Use the legacy postfix route"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .takes_value(true)
                .default_value("-")
                .value_name("FILE")
                .help("Output file ('-' for stdout)"),
        )
        .get_matches();

    // Se extraen argumentos necesarios
    let input = args.value_of("input").unwrap_or_default();
    let arch = args.value_of("target").unwrap_or_default();
    let register = args.value_of("register").unwrap_or_default();
    let output = args.value_of("output").unwrap_or_default();

    let options = Options {
        arch: match Arch::from_str(arch) {
            Ok(arch) => arch,
            Err(()) => bail!("No such target profile: {}", arch),
        },
        dest: match Reg::from_str(register) {
            Ok(register) => register,
            Err(()) => bail!("No such register: {}", register),
        },
        ..Options::default()
    };

    let path = Path::new(input);
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read: {}", input))?;

    let result = if args.is_present("legacy") {
        let modules = sibling_modules(path)?;
        xsc::compile_legacy(input, &text, &modules, &options)
    } else {
        xsc::compile(input, &text, &options)
    };

    let compiled = match result {
        Ok(compiled) => compiled,

        Err(diagnostic) => {
            eprintln!("{}", diagnostic);
            std::process::exit(1);
        }
    };

    for advisory in &compiled.advisories {
        eprintln!("{}", advisory);
    }

    let listing = compiled.instructions.join("\n");
    match output {
        "-" => println!("{}", listing),

        path => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to open for writing: {}", path))?;

            writeln!(file, "{}", listing)
                .with_context(|| format!("Failed to write to file: {}", path))?;
        }
    }

    Ok(())
}

/// Recolecta los archivos `.xs` hermanos del archivo de entrada como
/// módulos incluibles, indexados por nombre sin extensión.
fn sibling_modules(input: &Path) -> anyhow::Result<HashMap<String, String>> {
    let directory = match input.parent() {
        Some(parent) if parent != Path::new("") => parent.to_owned(),
        _ => Path::new(".").to_owned(),
    };

    let mut modules = HashMap::new();
    let entries = fs::read_dir(&directory)
        .with_context(|| format!("Failed to scan directory: {}", directory.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.file_name() == input.file_name() || path.extension() != Some(OsStr::new("xs")) {
            continue;
        }

        if let Some(stem) = path.file_stem().and_then(OsStr::to_str) {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read module: {}", path.display()))?;

            modules.insert(stem.to_owned(), text);
        }
    }

    Ok(modules)
}
