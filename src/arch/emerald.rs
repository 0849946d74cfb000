//! Perfil Emerald: palabras de 8 bits y miniflotante 1-4-3 con sesgo 7.

use super::{Backend, Mnemonics};

/// Descriptor del perfil de 8 bits.
pub static EMERALD: Backend = Backend {
    name: "emerald",
    word_bits: 8,
    push_imm_max: 0xFF,
    heap_base: 0x40,
    imm_digits: 2,
    push_imm_digits: 2,
    encode_float: fp8_bits,
    ops: Mnemonics {
        push_imm: "PSH",
        push: "PSH",
        pop: "POP",
        load: "LDI",
        load_label: "LDI",
        store: "STR",
        store_frame: "STR",
        mov: "MOV",
        cast: "CST",
        mode: "AMD",
        add: "ADD",
        sub: "SUB",
        mul: "MUL",
        div: "DIV",
        rem: "MOD",
        pow: "POW",
        inc: "INC",
        dec: "DEC",
        cmp: "CMP",
        jump: "JMP",
        call: "CAL",
        ret: "RTN",
        halt: "HLT",
    },
};

/// Empaqueta un `f32` en el formato 1-4-3 con sesgo 7. Además de la
/// saturación de exponente, las magnitudes por encima de 448 se fijan
/// al máximo patrón finito `0x7F`.
fn fp8_bits(value: f32) -> u32 {
    let bits = value.to_bits();
    let sign = (bits >> 31) & 1;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x7F_FFFF;

    if value == 0.0 {
        return sign << 7;
    }

    if value.abs() > 448.0 {
        return (sign << 7) | 0x7F;
    }

    let rebiased = exponent - 127 + 7;
    if rebiased >= 15 {
        (sign << 7) | 0x7F
    } else if rebiased <= 0 {
        sign << 7
    } else {
        (sign << 7) | ((rebiased as u32) << 3) | (mantissa >> 20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_encodes_as_38() {
        assert_eq!(fp8_bits(1.0), 0x38);
    }

    #[test]
    fn zero_keeps_only_the_sign() {
        assert_eq!(fp8_bits(0.0), 0x00);
        assert_eq!(fp8_bits(-0.0), 0x80);
    }

    #[test]
    fn large_magnitudes_clamp_to_the_maximum_finite_pattern() {
        assert_eq!(fp8_bits(1000.0), 0x7F);
        assert_eq!(fp8_bits(-1000.0), 0xFF);
    }

    #[test]
    fn small_values_pack_sign_exponent_mantissa() {
        // 2.0 = 1.0 × 2^1: exponente 8, mantisa 0
        assert_eq!(fp8_bits(2.0), 0x40);
        assert_eq!(fp8_bits(-2.0), 0xC0);
    }
}
