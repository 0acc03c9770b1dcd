use std::collections::BTreeSet;

use tracing::debug;

use crate::devirtualizer::error::DevirtError;
use crate::ir::{DispatchKind, Instruction, MethodId, Program};

/// Whether a staticized method keeps its former receiver as a parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum KeepThis {
    Yes,
    No,
}

/// Change a method into a static method.
///
/// With [`KeepThis::No`] the receiver parameter and the instruction binding it
/// are removed. With [`KeepThis::Yes`] both stay and the receiver becomes an
/// ordinary first parameter.
pub(crate) fn make_static(
    program: &mut Program,
    id: MethodId,
    keep_this: KeepThis,
) -> Result<(), DevirtError> {
    if keep_this == KeepThis::No {
        let binds_receiver = match &program.method(id).code {
            Some(code) => matches!(
                code.instructions.first(),
                Some(Instruction::LoadParam { object: true, .. })
            ),
            None => true,
        };
        if !binds_receiver || program.method(id).params.is_empty() {
            return Err(DevirtError::MissingReceiverBinding {
                method: program.show_method(id),
            });
        }
    }
    if let Some(existing) = colliding_method(program, id, keep_this) {
        return Err(DevirtError::SignatureCollision {
            method: program.show_method(id),
            existing: program.show_method(existing),
        });
    }

    let method = program.method_mut(id);
    method.kind = DispatchKind::Static;
    if keep_this == KeepThis::No {
        method.params.remove(0);
        if let Some(code) = method.code.as_mut() {
            code.instructions.remove(0);
        }
    }
    Ok(())
}

/// Another method of the same class whose signature equals the static form of
/// `id`.
fn colliding_method(program: &Program, id: MethodId, keep_this: KeepThis) -> Option<MethodId> {
    let method = program.method(id);
    let params = match keep_this {
        KeepThis::Yes => &method.params[..],
        KeepThis::No => method.params.get(1..).unwrap_or_default(),
    };
    program
        .class(method.class)
        .methods
        .iter()
        .copied()
        .find(|other_id| {
            let other = program.method(*other_id);
            *other_id != id
                && other.name == method.name
                && other.return_type == method.return_type
                && other.explicit_params() == params
        })
}

pub(crate) fn make_methods_static(
    program: &mut Program,
    methods: &BTreeSet<MethodId>,
    keep_this: KeepThis,
) -> Result<(), DevirtError> {
    for id in methods {
        debug!(
            method = %program.show_method(*id),
            keep_this = keep_this == KeepThis::Yes,
            "staticized method"
        );
        make_static(program, *id, keep_this)?;
    }
    Ok(())
}
