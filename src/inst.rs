//! Modelo de instrucciones independiente del backend.
//!
//! El generador produce valores de [`Inst`] en vez de texto; el
//! renderizado final a mnemónicos, inmediatos con relleno hexadecimal
//! y etiquetas ocurre en [`render`] a través de la tabla del
//! descriptor de backend. La mirilla reescribe esta representación
//! estructural, por lo cual una sola implementación sirve para ambos
//! perfiles de ISA.

use crate::arch::Backend;
use std::fmt::{self, Display};

/// Un registro de la máquina virtual.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Reg {
    Ax,
    Bx,
    Cx,
    Dx,
    Sp,
    Fp,
}

impl Reg {
    fn name(self) -> &'static str {
        match self {
            Reg::Ax => "AX",
            Reg::Bx => "BX",
            Reg::Cx => "CX",
            Reg::Dx => "DX",
            Reg::Sp => "SP",
            Reg::Fp => "FP",
        }
    }
}

impl Display for Reg {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.name())
    }
}

impl std::str::FromStr for Reg {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string.to_ascii_uppercase().as_str() {
            "AX" => Ok(Reg::Ax),
            "BX" => Ok(Reg::Bx),
            "CX" => Ok(Reg::Cx),
            "DX" => Ok(Reg::Dx),
            "SP" => Ok(Reg::Sp),
            "FP" => Ok(Reg::Fp),
            _ => Err(()),
        }
    }
}

/// Etiqueta numerada dentro de un mismo compilado.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Label(pub u32);

impl Display for Label {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "L{}", self.0)
    }
}

/// Operación de la unidad aritmética. El mnemónico es compartido; el
/// modo entero/flotante vigente decide la semántica en la máquina.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

/// Condición de salto.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cond {
    /// Incondicional.
    Al,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    /// Condición de salto que materializa una comparación del lenguaje.
    pub fn of(op: crate::parse::BinOp) -> Option<Cond> {
        use crate::parse::BinOp;

        match op {
            BinOp::Equal => Some(Cond::Eq),
            BinOp::NotEqual => Some(Cond::Ne),
            BinOp::Less => Some(Cond::Lt),
            BinOp::LessEqual => Some(Cond::Le),
            BinOp::Greater => Some(Cond::Gt),
            BinOp::GreaterEqual => Some(Cond::Ge),
            _ => None,
        }
    }

    /// Condición opuesta, para saltos de caída en falso.
    pub fn negated(self) -> Cond {
        match self {
            Cond::Al => Cond::Al,
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Cond::Al => "AL",
            Cond::Eq => "EQ",
            Cond::Ne => "NE",
            Cond::Lt => "LT",
            Cond::Le => "LE",
            Cond::Gt => "GT",
            Cond::Ge => "GE",
        }
    }
}

/// Una instrucción del flujo emitido.
#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    /// Definición de etiqueta, renderizada como línea `Ln:`.
    Label(Label),

    /// Empuje de un inmediato pequeño.
    PushImm(u32),

    /// Empuje del contenido de un registro.
    PushReg(Reg),

    /// Empuje indirecto: `[reg]`.
    PushInd(Reg),

    /// Empuje de una ranura de frame: `[FP+n]`.
    PushFrame(u16),

    /// Extracción de la pila hacia un registro.
    Pop(Reg),

    /// Carga de inmediato a registro.
    LoadImm(Reg, u32),

    /// Carga de la dirección de una etiqueta.
    LoadLabel(Reg, Label),

    /// Almacenamiento indirecto: `reg -> [addr]`.
    Store(Reg, Reg),

    /// Almacenamiento a una ranura de frame: `reg -> [FP+n]`.
    StoreFrame(Reg, u16),

    /// Copia entre registros.
    Move(Reg, Reg),

    /// Conversión int/flotante del registro.
    Cast(Reg),

    /// Marcador de modo aritmético: `true` es flotante.
    Mode(bool),

    /// Operación de tres direcciones: `op a, b -> dest`.
    Alu(AluOp, Reg, Reg, Reg),

    /// Incremento de registro.
    IncReg(Reg),

    /// Decremento de registro.
    DecReg(Reg),

    /// Comparación que fija las banderas.
    Compare(Reg, Reg),

    /// Salto condicional o incondicional a una etiqueta.
    Jump(Cond, Label),

    /// Llamada indirecta a la dirección contenida en un registro.
    CallInd(Reg),

    /// Retorno de subrutina.
    Return,

    /// Alto de la máquina.
    Halt,
}

/// Convierte la lista estructural en líneas de texto por medio de la
/// tabla de mnemónicos del backend.
pub fn render(instructions: &[Inst], backend: &Backend) -> Vec<String> {
    instructions
        .iter()
        .map(|instruction| line(instruction, backend))
        .collect()
}

fn line(instruction: &Inst, backend: &Backend) -> String {
    let ops = &backend.ops;

    match instruction {
        Inst::Label(label) => format!("{}:", label),

        Inst::PushImm(value) => format!(
            "{} #{:0width$X}",
            ops.push_imm,
            value,
            width = backend.push_imm_digits as usize
        ),

        Inst::PushReg(reg) => format!("{} {}", ops.push, reg),
        Inst::PushInd(reg) => format!("{} [{}]", ops.push, reg),
        Inst::PushFrame(offset) => format!("{} [FP+{}]", ops.push, offset),
        Inst::Pop(reg) => format!("{} {}", ops.pop, reg),

        Inst::LoadImm(reg, value) => format!(
            "{} {}, #{:0width$X}",
            ops.load,
            reg,
            value,
            width = backend.imm_digits as usize
        ),

        Inst::LoadLabel(reg, label) => format!("{} {}, .{}", ops.load_label, reg, label),

        Inst::Store(reg, addr) => format!("{} {}, [{}]", ops.store, reg, addr),
        Inst::StoreFrame(reg, offset) => format!("{} {}, [FP+{}]", ops.store_frame, reg, offset),

        Inst::Move(to, from) => format!("{} {}, {}", ops.mov, to, from),
        Inst::Cast(reg) => format!("{} {}", ops.cast, reg),
        Inst::Mode(float) => format!("{} {}", ops.mode, if *float { 1 } else { 0 }),

        Inst::Alu(op, a, b, dest) => {
            let mnemonic = match op {
                AluOp::Add => ops.add,
                AluOp::Sub => ops.sub,
                AluOp::Mul => ops.mul,
                AluOp::Div => ops.div,
                AluOp::Mod => ops.rem,
                AluOp::Pow => ops.pow,
            };

            format!("{} {}, {}, {}", mnemonic, a, b, dest)
        }

        Inst::IncReg(reg) => format!("{} {}", ops.inc, reg),
        Inst::DecReg(reg) => format!("{} {}", ops.dec, reg),
        Inst::Compare(a, b) => format!("{} {}, {}", ops.cmp, a, b),
        Inst::Jump(cond, label) => format!("{} {}, .{}", ops.jump, cond.name(), label),
        Inst::CallInd(reg) => format!("{} AL, {}", ops.call, reg),
        Inst::Return => ops.ret.to_owned(),
        Inst::Halt => ops.halt.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{EMERALD, XENON};

    #[test]
    fn xenon_immediates_are_padded_to_four_digits() {
        let lines = render(&[Inst::LoadImm(Reg::Ax, 0x2A)], &XENON);
        assert_eq!(lines, vec![String::from("LDIA AX, #002A")]);
    }

    #[test]
    fn emerald_immediates_are_padded_to_two_digits() {
        let lines = render(&[Inst::LoadImm(Reg::Ax, 0x2A)], &EMERALD);
        assert_eq!(lines, vec![String::from("LDI AX, #2A")]);
    }

    #[test]
    fn labels_render_as_bare_lines() {
        let lines = render(
            &[Inst::Label(Label(3)), Inst::Jump(Cond::Al, Label(3))],
            &XENON,
        );

        assert_eq!(lines[0], "L3:");
        assert_eq!(lines[1], "JUMP AL, .L3");
    }

    #[test]
    fn frame_slots_spell_the_frame_pointer() {
        let lines = render(
            &[Inst::PushFrame(1), Inst::StoreFrame(Reg::Ax, 2)],
            &XENON,
        );

        assert_eq!(lines[0], "PUSH [FP+1]");
        assert_eq!(lines[1], "STRE AX, [FP+2]");
    }

    #[test]
    fn negated_conditions_invert_orderings() {
        assert_eq!(Cond::Lt.negated(), Cond::Ge);
        assert_eq!(Cond::Eq.negated(), Cond::Ne);
        assert_eq!(Cond::Al.negated(), Cond::Al);
    }
}
