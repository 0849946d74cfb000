//! Descriptores de los perfiles de ISA soportados.
//!
//! Un [`Backend`] captura todo lo que diferencia a los dos perfiles:
//! ancho de palabra, codificación de flotantes, relleno de inmediatos,
//! límite del empuje inmediato, base del montículo y la tabla de
//! mnemónicos. El generador y la mirilla son únicos y se parametrizan
//! por este descriptor.

use std::{fmt, str::FromStr};

mod emerald;
mod xenon;

pub use emerald::EMERALD;
pub use xenon::XENON;

/// Perfil de ISA seleccionable por el llamador.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arch {
    /// 16 bits, fp16 con sesgo 15.
    Xenon,

    /// 8 bits, miniflotante 1-4-3 con sesgo 7.
    Emerald,
}

impl Arch {
    /// Obtiene el descriptor del perfil.
    pub fn backend(self) -> &'static Backend {
        match self {
            Arch::Xenon => &XENON,
            Arch::Emerald => &EMERALD,
        }
    }
}

impl FromStr for Arch {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "xenon" => Ok(Arch::Xenon),
            "emerald" => Ok(Arch::Emerald),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Xenon => fmt.write_str("xenon"),
            Arch::Emerald => fmt.write_str("emerald"),
        }
    }
}

/// Tabla de mnemónicos de un perfil.
pub struct Mnemonics {
    pub push_imm: &'static str,
    pub push: &'static str,
    pub pop: &'static str,
    pub load: &'static str,
    pub load_label: &'static str,
    pub store: &'static str,
    pub store_frame: &'static str,
    pub mov: &'static str,
    pub cast: &'static str,
    pub mode: &'static str,
    pub add: &'static str,
    pub sub: &'static str,
    pub mul: &'static str,
    pub div: &'static str,
    pub rem: &'static str,
    pub pow: &'static str,
    pub inc: &'static str,
    pub dec: &'static str,
    pub cmp: &'static str,
    pub jump: &'static str,
    pub call: &'static str,
    pub ret: &'static str,
    pub halt: &'static str,
}

/// Parámetros que distinguen un perfil de ISA del otro.
pub struct Backend {
    pub name: &'static str,
    pub word_bits: u32,
    pub push_imm_max: u32,
    pub heap_base: u32,
    pub imm_digits: u8,
    pub push_imm_digits: u8,
    pub encode_float: fn(f32) -> u32,
    pub ops: Mnemonics,
}

impl Backend {
    /// Trunca un entero al ancho de palabra del perfil.
    pub fn mask(&self, value: i64) -> u32 {
        (value as u64 & ((1u64 << self.word_bits) - 1)) as u32
    }

    /// Codifica un flotante al formato del perfil.
    pub fn float_bits(&self, value: f64) -> u32 {
        (self.encode_float)(value as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_truncates_to_the_word_width() {
        assert_eq!(XENON.mask(-1), 0xFFFF);
        assert_eq!(XENON.mask(0x12345), 0x2345);
        assert_eq!(EMERALD.mask(-1), 0xFF);
        assert_eq!(EMERALD.mask(300), 44);
    }

    #[test]
    fn arch_names_round_trip() {
        assert_eq!("xenon".parse(), Ok(Arch::Xenon));
        assert_eq!("emerald".parse(), Ok(Arch::Emerald));
        assert!("mips".parse::<Arch>().is_err());
    }
}
