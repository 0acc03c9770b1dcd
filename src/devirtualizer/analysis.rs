use crate::devirtualizer::error::DevirtError;
use crate::ir::{Instruction, MethodId, Program, Reg};

/// Whether the body of an instance method reads its receiver register.
pub(crate) fn uses_this(program: &Program, id: MethodId) -> Result<bool, DevirtError> {
    let method = program.method(id);
    let code = match &method.code {
        Some(code) if !method.is_static() => code,
        _ => {
            return Err(DevirtError::NotAnalyzable {
                method: program.show_method(id),
            });
        }
    };
    let this_reg = match code.instructions.first() {
        Some(Instruction::LoadParam { object: true, dest }) => *dest,
        _ => {
            return Err(DevirtError::MissingReceiverBinding {
                method: program.show_method(id),
            });
        }
    };
    Ok(code
        .instructions
        .iter()
        .any(|insn| reads_register(insn, this_reg)))
}

fn reads_register(insn: &Instruction, reg: Reg) -> bool {
    if let Some((base, count)) = insn.range() {
        let (reg, base) = (u64::from(reg), u64::from(base));
        if reg >= base && reg < base + u64::from(count) {
            return true;
        }
    }
    insn.srcs().contains(&reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::testing::*;
    use crate::ir::{DispatchKind, InvokeKind};

    fn analyze(code: crate::ir::Code) -> Result<bool, DevirtError> {
        let mut builder = ProgramBuilder::new();
        let class = builder.class("C", None);
        let method = builder.method(class, "m", DispatchKind::Virtual, &["I"], Some(code));
        let program = builder.finish();
        uses_this(&program, method)
    }

    #[test]
    fn unused_receiver_is_reported() {
        let result = analyze(body(vec![
            load_this(6),
            load_param(7),
            op("add-int", Some(0), &[7, 7]),
            return_void(),
        ]));

        assert_eq!(Ok(false), result);
    }

    #[test]
    fn explicit_source_counts_as_use() {
        let result = analyze(body(vec![
            load_this(6),
            load_param(7),
            op("iget", Some(0), &[6]),
            return_void(),
        ]));

        assert_eq!(Ok(true), result);
    }

    #[test]
    fn range_window_covering_receiver_counts_as_use() {
        let mut builder = ProgramBuilder::new();
        let class = builder.class("C", None);
        let callee = builder.method(class, "callee", DispatchKind::Direct, &["I", "I"], None);
        let method = builder.method(
            class,
            "m",
            DispatchKind::Virtual,
            &[],
            Some(body(vec![
                load_this(5),
                invoke_range(InvokeKind::Direct, callee, 4, 3),
                return_void(),
            ])),
        );
        let program = builder.finish();

        assert_eq!(Ok(true), uses_this(&program, method));
    }

    #[test]
    fn range_window_ending_before_receiver_is_not_a_use() {
        let mut builder = ProgramBuilder::new();
        let class = builder.class("C", None);
        let callee = builder.method(class, "callee", DispatchKind::Direct, &["I"], None);
        let method = builder.method(
            class,
            "m",
            DispatchKind::Virtual,
            &[],
            Some(body(vec![
                load_this(5),
                invoke_range(InvokeKind::Direct, callee, 3, 2),
                return_void(),
            ])),
        );
        let program = builder.finish();

        assert_eq!(Ok(false), uses_this(&program, method));
    }

    #[test]
    fn missing_receiver_binding_is_an_invariant_violation() {
        let result = analyze(body(vec![load_param(7), return_void()]));

        assert!(matches!(
            result,
            Err(DevirtError::MissingReceiverBinding { .. })
        ));
    }

    #[test]
    fn abstract_method_cannot_be_analyzed() {
        let mut builder = ProgramBuilder::new();
        let class = builder.class("C", None);
        let method = builder.method(class, "m", DispatchKind::Virtual, &[], None);
        let program = builder.finish();

        assert!(matches!(
            uses_this(&program, method),
            Err(DevirtError::NotAnalyzable { .. })
        ));
    }
}
