use crate::ir::{CallTarget, DispatchKind, MethodId, MethodRef, Program};

/// Which definitions a method reference may resolve to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MethodSearch {
    Any,
    Virtual,
}

/// Resolve a reference by walking the owner and its superclass chain.
///
/// Returns `None` when the owner is unknown or no definition matches; callers
/// treat that as "not a call to any method we care about".
pub(crate) fn resolve_method(
    program: &Program,
    method_ref: &MethodRef,
    search: MethodSearch,
) -> Option<MethodId> {
    let mut class_id = program.class_by_name(&method_ref.owner);
    // Guard against malformed inputs with a superclass cycle.
    let mut remaining = program.class_count();
    while let Some(id) = class_id {
        if remaining == 0 {
            return None;
        }
        remaining -= 1;
        let class = program.class(id);
        let found = class.methods.iter().copied().find(|candidate| {
            let method = program.method(*candidate);
            method.matches(method_ref) && accepts(search, method.kind)
        });
        if found.is_some() {
            return found;
        }
        class_id = class
            .super_name
            .as_deref()
            .and_then(|name| program.class_by_name(name));
    }
    None
}

/// Concrete targets pass through unchanged; references are resolved.
pub(crate) fn resolve_target(
    program: &Program,
    target: &CallTarget,
    search: MethodSearch,
) -> Option<MethodId> {
    match target {
        CallTarget::Def(id) => Some(*id),
        CallTarget::Ref(method_ref) => resolve_method(program, method_ref, search),
    }
}

fn accepts(search: MethodSearch, kind: DispatchKind) -> bool {
    match search {
        MethodSearch::Any => true,
        MethodSearch::Virtual => kind == DispatchKind::Virtual,
    }
}
