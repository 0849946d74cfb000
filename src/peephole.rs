//! Mirilla sobre el flujo de instrucciones emitido.
//!
//! La pasada recorre la lista completa y reescribe ventanas de dos
//! instrucciones adyacentes, repitiendo hasta el punto fijo (una
//! pasada sin cambio alguno). Al operar sobre la representación
//! estructural, la misma implementación sirve para ambos perfiles de
//! ISA.

use crate::inst::Inst;

/// Reescribe la lista hasta el punto fijo.
pub fn optimize(instructions: &mut Vec<Inst>) {
    while pass(instructions) {}
}

enum Rule {
    /// Elimina ambas instrucciones de la ventana.
    DropBoth,

    /// Elimina solo la primera.
    DropFirst,

    /// Reemplaza la ventana completa por una instrucción.
    Fuse(Inst),
}

fn pass(instructions: &mut Vec<Inst>) -> bool {
    let mut changed = false;
    let mut index = 0;

    while index + 1 < instructions.len() {
        let rule = match (&instructions[index], &instructions[index + 1]) {
            // Empuje y extracción del mismo registro se cancelan, en
            // cualquiera de los dos órdenes
            (Inst::PushReg(a), Inst::Pop(b)) if a == b => Rule::DropBoth,
            (Inst::Pop(a), Inst::PushReg(b)) if a == b => Rule::DropBoth,

            // Empujar un inmediato y extraerlo es una carga directa
            (Inst::PushImm(value), Inst::Pop(reg)) => Rule::Fuse(Inst::LoadImm(*reg, *value)),

            // De dos marcadores de modo consecutivos sobrevive el último
            (Inst::Mode(_), Inst::Mode(_)) => Rule::DropFirst,

            // Un empuje sin consumidor antes de un alto es inalcanzable
            (Inst::PushImm(_) | Inst::PushReg(_), Inst::Halt) => Rule::DropFirst,

            _ => {
                index += 1;
                continue;
            }
        };

        match rule {
            Rule::DropBoth => {
                instructions.drain(index..index + 2);
            }

            Rule::DropFirst => {
                instructions.remove(index);
            }

            Rule::Fuse(fused) => {
                instructions[index] = fused;
                instructions.remove(index + 1);
            }
        }

        changed = true;
        if index > 0 {
            // La ventana anterior pudo volverse reescribible
            index -= 1;
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::Reg;

    #[test]
    fn push_pop_pairs_cancel() {
        let mut insts = vec![
            Inst::LoadImm(Reg::Ax, 1),
            Inst::PushReg(Reg::Ax),
            Inst::Pop(Reg::Ax),
            Inst::Halt,
        ];

        optimize(&mut insts);
        assert_eq!(insts, vec![Inst::LoadImm(Reg::Ax, 1), Inst::Halt]);
    }

    #[test]
    fn pop_push_pairs_cancel() {
        let mut insts = vec![Inst::Pop(Reg::Dx), Inst::PushReg(Reg::Dx), Inst::Halt];

        optimize(&mut insts);
        assert_eq!(insts, vec![Inst::Halt]);
    }

    #[test]
    fn mismatched_registers_survive() {
        let mut insts = vec![Inst::PushReg(Reg::Ax), Inst::Pop(Reg::Dx), Inst::Return];

        optimize(&mut insts);
        assert_eq!(
            insts,
            vec![Inst::PushReg(Reg::Ax), Inst::Pop(Reg::Dx), Inst::Return]
        );
    }

    #[test]
    fn immediate_push_pop_fuses_into_a_load() {
        let mut insts = vec![Inst::PushImm(5), Inst::Pop(Reg::Ax), Inst::Halt];

        optimize(&mut insts);
        assert_eq!(insts, vec![Inst::LoadImm(Reg::Ax, 5), Inst::Halt]);
    }

    #[test]
    fn adjacent_mode_markers_keep_the_last() {
        let mut insts = vec![Inst::Mode(true), Inst::Mode(false), Inst::Halt];

        optimize(&mut insts);
        assert_eq!(insts, vec![Inst::Mode(false), Inst::Halt]);
    }

    #[test]
    fn unconsumed_push_before_halt_is_dropped() {
        let mut insts = vec![Inst::PushReg(Reg::Ax), Inst::Halt];

        optimize(&mut insts);
        assert_eq!(insts, vec![Inst::Halt]);
    }

    #[test]
    fn rewrites_cascade_to_a_fixpoint() {
        // La cancelación interior habilita la cancelación exterior
        let mut insts = vec![
            Inst::PushReg(Reg::Ax),
            Inst::PushReg(Reg::Dx),
            Inst::Pop(Reg::Dx),
            Inst::Pop(Reg::Ax),
            Inst::Halt,
        ];

        optimize(&mut insts);
        assert_eq!(insts, vec![Inst::Halt]);
    }

    #[test]
    fn optimization_is_idempotent() {
        let mut insts = vec![
            Inst::PushImm(5),
            Inst::Pop(Reg::Ax),
            Inst::PushReg(Reg::Ax),
            Inst::Pop(Reg::Dx),
            Inst::Halt,
        ];

        optimize(&mut insts);
        let first = insts.clone();

        optimize(&mut insts);
        assert_eq!(insts, first);
    }
}
