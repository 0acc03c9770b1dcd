use std::collections::BTreeSet;

use tracing::trace;

use crate::devirtualizer::DevirtualizerMetrics;
use crate::devirtualizer::error::DevirtError;
use crate::ir::{CallTarget, Instruction, InvokeKind, MethodId, Operands, Program};
use crate::resolver::{MethodSearch, resolve_target};
use crate::walk::{walk_code, walk_opcodes};

/// Rewrite calls to methods that are about to lose their receiver parameter.
///
/// Each body is scanned first and the rewritten instructions are written back
/// once the scan is over.
pub(crate) fn fix_call_sites_and_drop_this_arg(
    program: &mut Program,
    statics: &BTreeSet<MethodId>,
    metrics: &mut DevirtualizerMetrics,
) -> Result<(), DevirtError> {
    walk_code(
        program,
        |_, _| true,
        |program, caller, code| {
            let mut replacements = Vec::new();
            for (index, insn) in code.instructions.iter().enumerate() {
                let Instruction::Invoke {
                    kind,
                    target,
                    operands,
                } = insn
                else {
                    continue;
                };
                let Some(callee) = resolve_target(program, target, MethodSearch::Any) else {
                    continue;
                };
                if !statics.contains(&callee) {
                    continue;
                }
                check_arity(program, caller, callee, operands)?;

                let mut kind = *kind;
                let mut target = target.clone();
                patch_call_site(program, caller, callee, &mut kind, &mut target, metrics)?;
                replacements.push((
                    index,
                    Instruction::Invoke {
                        kind,
                        target,
                        operands: drop_this_arg(operands),
                    },
                ));
            }
            for (index, insn) in replacements {
                code.instructions[index] = insn;
            }
            Ok(())
        },
    )
}

/// Rewrite calls to methods that keep their receiver as a first parameter.
/// Operands are left as they are.
pub(crate) fn fix_call_sites(
    program: &mut Program,
    target_methods: &BTreeSet<MethodId>,
    metrics: &mut DevirtualizerMetrics,
) -> Result<(), DevirtError> {
    walk_opcodes(
        program,
        |_, _| true,
        |program, caller, insn| {
            let Instruction::Invoke {
                kind,
                target,
                operands,
            } = insn
            else {
                return Ok(());
            };
            let Some(callee) = resolve_target(program, target, MethodSearch::Virtual) else {
                return Ok(());
            };
            if !target_methods.contains(&callee) {
                return Ok(());
            }
            if *kind == InvokeKind::Static {
                return Err(DevirtError::AlreadyStatic {
                    caller: program.show_method(caller),
                    callee: program.show_method(callee),
                });
            }
            check_arity(program, caller, callee, operands)?;
            patch_call_site(program, caller, callee, kind, target, metrics)
        },
    )
}

/// Turn an instance call into a static call to `callee` and count it by its
/// original kind.
fn patch_call_site(
    program: &Program,
    caller: MethodId,
    callee: MethodId,
    kind: &mut InvokeKind,
    target: &mut CallTarget,
    metrics: &mut DevirtualizerMetrics,
) -> Result<(), DevirtError> {
    match kind {
        InvokeKind::Virtual => metrics.num_virtual_calls += 1,
        InvokeKind::Super => metrics.num_super_calls += 1,
        InvokeKind::Direct => metrics.num_direct_calls += 1,
        InvokeKind::Static | InvokeKind::Interface => {
            return Err(DevirtError::UnexpectedInvoke {
                caller: program.show_method(caller),
                callee: program.show_method(callee),
                mnemonic: kind.mnemonic(),
            });
        }
    }
    trace!(
        caller = %program.show_method(caller),
        callee = %program.show_method(callee),
        from = kind.mnemonic(),
        "patched call site"
    );
    *kind = InvokeKind::Static;
    *target = CallTarget::Def(callee);
    Ok(())
}

/// The receiver is always the first argument: the lowest register of a range
/// window or the first explicit source.
fn drop_this_arg(operands: &Operands) -> Operands {
    match operands {
        // A range cannot be empty, so a lone receiver becomes a compact call.
        Operands::Range { count: 1, .. } => Operands::Compact(Vec::new()),
        Operands::Range { base, count } => Operands::Range {
            base: base + 1,
            count: count - 1,
        },
        Operands::Compact(regs) => Operands::Compact(regs[1..].to_vec()),
    }
}

fn check_arity(
    program: &Program,
    caller: MethodId,
    callee: MethodId,
    operands: &Operands,
) -> Result<(), DevirtError> {
    let expected = program.method(callee).arity();
    let found = operands.len();
    if expected != found {
        return Err(DevirtError::ArityMismatch {
            caller: program.show_method(caller),
            callee: program.show_method(callee),
            expected,
            found,
        });
    }
    Ok(())
}
