use std::collections::BTreeSet;

use crate::ir::{MethodId, Program};

/// Policy deciding which methods must not be rewritten.
pub(crate) trait KeepPolicy {
    fn is_protected(&self, program: &Program, method: MethodId) -> bool;
}

/// Keep rules from the command line plus the per-method `keep` flag.
///
/// A pattern without a dot protects every method of that class; `Class.name`
/// protects all overloads of `name` in `Class`.
#[derive(Clone, Debug, Default)]
pub(crate) struct KeepRules {
    classes: BTreeSet<String>,
    methods: BTreeSet<(String, String)>,
}

impl KeepRules {
    pub(crate) fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            // Class names use '/' separators, so the last '.' splits off a member.
            match pattern.rsplit_once('.') {
                Some((class, method)) => {
                    rules
                        .methods
                        .insert((class.to_string(), method.to_string()));
                }
                None => {
                    rules.classes.insert(pattern.to_string());
                }
            }
        }
        rules
    }
}

impl KeepPolicy for KeepRules {
    fn is_protected(&self, program: &Program, method: MethodId) -> bool {
        let method = program.method(method);
        if method.access.keep {
            return true;
        }
        let owner = &program.class(method.class).name;
        self.classes.contains(owner)
            || self
                .methods
                .contains(&(owner.to_string(), method.name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DispatchKind;
    use crate::ir::testing::*;

    #[test]
    fn keep_flag_and_patterns_protect_methods() {
        let mut builder = ProgramBuilder::new();
        let app = builder.class("com/example/App", None);
        let util = builder.class("com/example/Util", None);
        let flagged = builder.method(app, "flagged", DispatchKind::Virtual, &[], None);
        let named = builder.method(app, "named", DispatchKind::Virtual, &[], None);
        let free = builder.method(app, "free", DispatchKind::Virtual, &[], None);
        let in_class = builder.method(util, "any", DispatchKind::Direct, &[], None);
        builder.keep(flagged);
        let program = builder.finish();

        let rules = KeepRules::from_patterns(["com/example/App.named", "com/example/Util", " "]);

        assert!(rules.is_protected(&program, flagged));
        assert!(rules.is_protected(&program, named));
        assert!(rules.is_protected(&program, in_class));
        assert!(!rules.is_protected(&program, free));
    }
}
