//! Perfil Xenon: palabras de 16 bits y fp16 con sesgo 15.

use super::{Backend, Mnemonics};

/// Descriptor del perfil de 16 bits.
pub static XENON: Backend = Backend {
    name: "xenon",
    word_bits: 16,
    push_imm_max: 0x3FF,
    heap_base: 0x0100,
    imm_digits: 4,
    push_imm_digits: 3,
    encode_float: fp16_bits,
    ops: Mnemonics {
        push_imm: "PSHI",
        push: "PUSH",
        pop: "POP",
        load: "LDIA",
        load_label: "LDIB",
        store: "STR",
        store_frame: "STRE",
        mov: "MOVE",
        cast: "CAST",
        mode: "CMOD",
        add: "ADD",
        sub: "SUB",
        mul: "MUL",
        div: "DIV",
        rem: "MOD",
        pow: "POW",
        inc: "INCR",
        dec: "DECR",
        cmp: "COMP",
        jump: "JUMP",
        call: "CALL",
        ret: "RETN",
        halt: "HALT",
    },
};

/// Empaqueta un `f32` en el formato 1-5-10 con sesgo 15: se extraen
/// signo, exponente y mantisa del patrón de precisión simple, se
/// vuelve a sesgar el exponente y se trunca la mantisa. Exponentes
/// fuera de rango saturan al patrón de infinito.
fn fp16_bits(value: f32) -> u32 {
    let bits = value.to_bits();
    let sign = (bits >> 31) & 1;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x7F_FFFF;

    if exponent == 0xFF {
        // Infinito o NaN
        return (sign << 15) | 0x7C00 | u32::from(mantissa != 0);
    }

    if exponent == 0 {
        // Los subnormales colapsan a cero con signo
        return sign << 15;
    }

    let rebiased = exponent - 127 + 15;
    if rebiased >= 31 {
        (sign << 15) | 0x7C00
    } else if rebiased <= 0 {
        sign << 15
    } else {
        (sign << 15) | ((rebiased as u32) << 10) | (mantissa >> 13)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_encodes_as_3c00() {
        assert_eq!(fp16_bits(1.0), 0x3C00);
    }

    #[test]
    fn zero_encodes_as_0000() {
        assert_eq!(fp16_bits(0.0), 0x0000);
    }

    #[test]
    fn sign_and_exponent_pack_correctly() {
        assert_eq!(fp16_bits(-5.0), 0xC500);
        assert_eq!(fp16_bits(0.5), 0x3800);
    }

    #[test]
    fn out_of_range_exponents_saturate_to_infinity() {
        assert_eq!(fp16_bits(1.0e9), 0x7C00);
        assert_eq!(fp16_bits(-1.0e9), 0xFC00);
    }
}
