use crate::ir::{Code, Instruction, MethodId, Program};

/// Visit every method body accepted by `filter`, in method order.
///
/// The body is detached from the program while `visit` runs, so the callback
/// can read the rest of the program and edit the body freely. It is put back
/// even when the callback fails.
pub(crate) fn walk_code<P, F, E>(program: &mut Program, filter: P, mut visit: F) -> Result<(), E>
where
    P: Fn(&Program, MethodId) -> bool,
    F: FnMut(&Program, MethodId, &mut Code) -> Result<(), E>,
{
    let ids: Vec<MethodId> = program.method_ids().collect();
    for id in ids {
        if !filter(program, id) {
            continue;
        }
        let Some(mut code) = program.take_code(id) else {
            continue;
        };
        let result = visit(program, id, &mut code);
        program.restore_code(id, code);
        result?;
    }
    Ok(())
}

/// Visit every instruction of every body accepted by `filter`.
pub(crate) fn walk_opcodes<P, F, E>(program: &mut Program, filter: P, mut visit: F) -> Result<(), E>
where
    P: Fn(&Program, MethodId) -> bool,
    F: FnMut(&Program, MethodId, &mut Instruction) -> Result<(), E>,
{
    walk_code(program, filter, |program, id, code| {
        for insn in &mut code.instructions {
            visit(program, id, insn)?;
        }
        Ok(())
    })
}
