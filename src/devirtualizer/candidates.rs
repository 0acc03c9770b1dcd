use std::collections::BTreeSet;

use crate::devirtualizer::analysis::uses_this;
use crate::devirtualizer::error::DevirtError;
use crate::hierarchy::DispatchAnalysis;
use crate::ir::{ClassId, DispatchKind, MethodId, Program};
use crate::keep::KeepPolicy;

/// Virtual methods without polymorphic overrides, owned by a target class.
pub(crate) fn devirtualizable_vmethods(
    program: &Program,
    targets: &BTreeSet<ClassId>,
    analysis: &dyn DispatchAnalysis,
) -> Vec<MethodId> {
    analysis
        .devirtualizable(program)
        .into_iter()
        .filter(|id| targets.contains(&program.method(*id).class))
        .collect()
}

/// Direct instance methods of target classes. Constructors and statics are
/// never candidates.
pub(crate) fn devirtualizable_dmethods(
    program: &Program,
    targets: &BTreeSet<ClassId>,
) -> Vec<MethodId> {
    let mut found = Vec::new();
    for class_id in program.class_ids() {
        if !targets.contains(&class_id) {
            continue;
        }
        for id in &program.class(class_id).methods {
            match program.method(*id).kind {
                DispatchKind::Direct => found.push(*id),
                DispatchKind::Virtual | DispatchKind::Static | DispatchKind::Constructor => {}
            }
        }
    }
    found
}

/// Drop candidates that are protected, external or have no body.
pub(crate) fn devirtualizable_methods(
    program: &Program,
    candidates: &[MethodId],
    policy: &dyn KeepPolicy,
) -> BTreeSet<MethodId> {
    candidates
        .iter()
        .copied()
        .filter(|id| {
            let access = program.method(*id).access;
            !(policy.is_protected(program, *id) || access.is_external || access.is_abstract)
        })
        .collect()
}

pub(crate) fn devirtualizable_methods_not_using_this(
    program: &Program,
    candidates: &[MethodId],
    policy: &dyn KeepPolicy,
) -> Result<BTreeSet<MethodId>, DevirtError> {
    let mut found = BTreeSet::new();
    for id in devirtualizable_methods(program, candidates, policy) {
        if !uses_this(program, id)? {
            found.insert(id);
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::ClassHierarchyAnalysis;
    use crate::ir::testing::*;
    use crate::keep::KeepRules;

    struct Fixture {
        program: Program,
        targets: BTreeSet<ClassId>,
        pure_virtual: MethodId,
        reading_virtual: MethodId,
        pure_direct: MethodId,
        kept_direct: MethodId,
        outside_target: MethodId,
    }

    fn fixture() -> Fixture {
        let mut builder = ProgramBuilder::new();
        let target = builder.class("Target", None);
        let other = builder.class("Other", None);
        let pure = || Some(body(vec![load_this(0), return_void()]));
        let reading = || Some(body(vec![load_this(0), op("iget", Some(1), &[0]), return_void()]));

        let pure_virtual = builder.method(target, "pure", DispatchKind::Virtual, &[], pure());
        let reading_virtual =
            builder.method(target, "reading", DispatchKind::Virtual, &[], reading());
        builder.method(target, "abstractOne", DispatchKind::Virtual, &[], None);
        let pure_direct = builder.method(target, "helper", DispatchKind::Direct, &[], pure());
        let kept_direct = builder.method(target, "kept", DispatchKind::Direct, &[], pure());
        builder.method(target, "<init>", DispatchKind::Constructor, &[], pure());
        builder.method(
            target,
            "util",
            DispatchKind::Static,
            &[],
            Some(body(vec![return_void()])),
        );
        let outside_target = builder.method(other, "pure", DispatchKind::Virtual, &[], pure());
        builder.keep(kept_direct);

        Fixture {
            program: builder.finish(),
            targets: BTreeSet::from([target]),
            pure_virtual,
            reading_virtual,
            pure_direct,
            kept_direct,
            outside_target,
        }
    }

    #[test]
    fn vmethods_are_restricted_to_targets() {
        let fixture = fixture();

        let candidates =
            devirtualizable_vmethods(&fixture.program, &fixture.targets, &ClassHierarchyAnalysis);

        assert!(candidates.contains(&fixture.pure_virtual));
        assert!(candidates.contains(&fixture.reading_virtual));
        assert!(!candidates.contains(&fixture.outside_target));
    }

    #[test]
    fn dmethods_exclude_constructors_and_statics() {
        let fixture = fixture();

        let candidates = devirtualizable_dmethods(&fixture.program, &fixture.targets);

        assert_eq!(vec![fixture.pure_direct, fixture.kept_direct], candidates);
    }

    #[test]
    fn filter_drops_protected_and_abstract_methods() {
        let fixture = fixture();
        let policy = KeepRules::default();
        let vmethods =
            devirtualizable_vmethods(&fixture.program, &fixture.targets, &ClassHierarchyAnalysis);
        let dmethods = devirtualizable_dmethods(&fixture.program, &fixture.targets);

        let using = devirtualizable_methods(&fixture.program, &vmethods, &policy);
        let not_using =
            devirtualizable_methods_not_using_this(&fixture.program, &vmethods, &policy)
                .expect("filter");
        let direct = devirtualizable_methods(&fixture.program, &dmethods, &policy);

        assert_eq!(
            BTreeSet::from([fixture.pure_virtual, fixture.reading_virtual]),
            using
        );
        assert_eq!(BTreeSet::from([fixture.pure_virtual]), not_using);
        assert_eq!(BTreeSet::from([fixture.pure_direct]), direct);
    }

    #[test]
    fn discovery_is_repeatable() {
        let fixture = fixture();

        let first =
            devirtualizable_vmethods(&fixture.program, &fixture.targets, &ClassHierarchyAnalysis);
        let second =
            devirtualizable_vmethods(&fixture.program, &fixture.targets, &ClassHierarchyAnalysis);

        assert_eq!(first, second);
    }
}
