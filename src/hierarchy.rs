use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::ir::{ClassId, DispatchKind, Method, MethodId, Program};

/// Source of virtual methods that never take part in polymorphic dispatch.
pub(crate) trait DispatchAnalysis {
    fn devirtualizable(&self, program: &Program) -> Vec<MethodId>;
}

/// Class hierarchy analysis over the loaded program.
pub(crate) struct ClassHierarchyAnalysis;

impl DispatchAnalysis for ClassHierarchyAnalysis {
    fn devirtualizable(&self, program: &Program) -> Vec<MethodId> {
        devirtualize(program)
    }
}

type Signature = (String, String);

/// Find virtual methods of non-external classes whose signature is defined by
/// no ancestor, no descendant and no interface reachable from either side.
///
/// A class is skipped when it, a relative or a reachable interface names a
/// supertype that is not loaded, since an unloaded type may declare any
/// method. Library classes belong on the classpath.
pub(crate) fn devirtualize(program: &Program) -> Vec<MethodId> {
    let hierarchy = Hierarchy::new(program);
    let mut found = Vec::new();

    for class_id in program.class_ids() {
        let class = program.class(class_id);
        if class.is_external || class.is_interface {
            continue;
        }
        let mut related = hierarchy.ancestors(class_id);
        related.extend(hierarchy.descendants(class_id));
        let mut interfaces = BTreeSet::new();
        hierarchy.collect_interfaces(class_id, &mut interfaces);
        for other in &related {
            hierarchy.collect_interfaces(*other, &mut interfaces);
        }
        let unloaded = std::iter::once(class_id)
            .chain(related.iter().copied())
            .chain(interfaces.iter().copied())
            .any(|id| hierarchy.names_unloaded_type(id));
        if unloaded {
            debug!(class = %class.name, "skipping class with unloaded supertypes");
            continue;
        }

        for method_id in &class.methods {
            let method = program.method(*method_id);
            if method.kind != DispatchKind::Virtual {
                continue;
            }
            let wanted = signature(method);
            let overridden = related
                .iter()
                .chain(interfaces.iter())
                .any(|other| hierarchy.defines_virtual(*other, &wanted));
            if !overridden {
                found.push(*method_id);
            }
        }
    }

    found.sort();
    debug!(count = found.len(), "devirtualizable virtual methods");
    found
}

struct Hierarchy<'a> {
    program: &'a Program,
    children: HashMap<ClassId, Vec<ClassId>>,
}

impl<'a> Hierarchy<'a> {
    fn new(program: &'a Program) -> Self {
        let mut children: HashMap<ClassId, Vec<ClassId>> = HashMap::new();
        for class_id in program.class_ids() {
            if let Some(parent) = superclass(program, class_id) {
                children.entry(parent).or_default().push(class_id);
            }
        }
        Self { program, children }
    }

    fn ancestors(&self, class_id: ClassId) -> Vec<ClassId> {
        let mut ancestors = Vec::new();
        let mut current = superclass(self.program, class_id);
        while let Some(id) = current {
            if id == class_id || ancestors.contains(&id) {
                break;
            }
            ancestors.push(id);
            current = superclass(self.program, id);
        }
        ancestors
    }

    fn descendants(&self, class_id: ClassId) -> Vec<ClassId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![class_id];
        while let Some(id) = stack.pop() {
            for child in self.children.get(&id).into_iter().flatten() {
                if *child != class_id && seen.insert(*child) {
                    stack.push(*child);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Interfaces implemented by `class_id`, including super-interfaces.
    fn collect_interfaces(&self, class_id: ClassId, out: &mut BTreeSet<ClassId>) {
        let mut stack: Vec<ClassId> = self.interface_ids(class_id).collect();
        while let Some(id) = stack.pop() {
            if out.insert(id) {
                stack.extend(self.interface_ids(id));
            }
        }
    }

    fn interface_ids(&self, class_id: ClassId) -> impl Iterator<Item = ClassId> + '_ {
        self.program
            .class(class_id)
            .interfaces
            .iter()
            .filter_map(|name| self.program.class_by_name(name))
    }

    fn names_unloaded_type(&self, class_id: ClassId) -> bool {
        let class = self.program.class(class_id);
        class
            .super_name
            .iter()
            .chain(class.interfaces.iter())
            .any(|name| self.program.class_by_name(name).is_none())
    }

    fn defines_virtual(&self, class_id: ClassId, wanted: &Signature) -> bool {
        self.program.class(class_id).methods.iter().any(|id| {
            let method = self.program.method(*id);
            method.kind == DispatchKind::Virtual && signature(method) == *wanted
        })
    }
}

fn superclass(program: &Program, class_id: ClassId) -> Option<ClassId> {
    program
        .class(class_id)
        .super_name
        .as_deref()
        .and_then(|name| program.class_by_name(name))
}

fn signature(method: &Method) -> Signature {
    (method.name.clone(), method.descriptor())
}
