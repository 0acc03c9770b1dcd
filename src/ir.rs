use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Virtual register number inside a method body.
pub(crate) type Reg = u32;

/// Handle of a class inside a [`Program`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct ClassId(pub(crate) u32);

/// Handle of a method inside a [`Program`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct MethodId(pub(crate) u32);

impl ClassId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl MethodId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Whole-program view over every loaded class and method.
///
/// Classes and methods live in flat arenas and refer to each other through
/// [`ClassId`] and [`MethodId`] handles, so passes can hold sets of handles
/// while mutating the arena.
#[derive(Clone, Debug, Default)]
pub(crate) struct Program {
    classes: Vec<Class>,
    methods: Vec<Method>,
    class_index: HashMap<String, ClassId>,
}

/// Intermediate representation for a class.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) is_interface: bool,
    pub(crate) is_external: bool,
    pub(crate) methods: Vec<MethodId>,
}

/// Intermediate representation for a method and its register code.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) class: ClassId,
    pub(crate) name: String,
    pub(crate) kind: DispatchKind,
    /// Parameter types as field descriptors. For non-static methods the first
    /// entry is the receiver.
    pub(crate) params: Vec<String>,
    pub(crate) return_type: String,
    pub(crate) access: MethodAccess,
    pub(crate) code: Option<Code>,
}

/// Method flags consulted by eligibility filtering.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct MethodAccess {
    pub(crate) is_abstract: bool,
    pub(crate) is_external: bool,
    pub(crate) keep: bool,
}

/// How a method is entered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum DispatchKind {
    Virtual,
    Direct,
    Static,
    Constructor,
}

/// Method body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Code {
    pub(crate) registers: u32,
    pub(crate) instructions: Vec<Instruction>,
}

/// Register-based instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Instruction {
    /// Pseudo-instruction binding an incoming parameter to a register.
    LoadParam { object: bool, dest: Reg },
    Invoke {
        kind: InvokeKind,
        target: CallTarget,
        operands: Operands,
    },
    FilledNewArray {
        element: String,
        dest: Reg,
        operands: Operands,
    },
    /// Any other opcode; only its register usage matters here.
    Op {
        mnemonic: String,
        dest: Option<Reg>,
        srcs: Vec<Reg>,
    },
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum InvokeKind {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
}

/// Argument registers of an instruction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Operands {
    /// One explicit source register per argument.
    Compact(Vec<Reg>),
    /// Arguments occupy `[base, base + count)`.
    Range { base: Reg, count: u32 },
}

/// Method a call instruction points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CallTarget {
    Def(MethodId),
    Ref(MethodRef),
}

/// Symbolic method reference. `params` never includes the receiver.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct MethodRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) params: Vec<String>,
    #[serde(rename = "return")]
    pub(crate) return_type: String,
}

impl Program {
    pub(crate) fn add_class(&mut self, class: Class) -> Result<ClassId> {
        if self.class_index.contains_key(&class.name) {
            anyhow::bail!("duplicate class definition: {}", class.name);
        }
        let id = ClassId(self.classes.len() as u32);
        self.class_index.insert(class.name.clone(), id);
        self.classes.push(class);
        Ok(id)
    }

    pub(crate) fn add_method(&mut self, class: ClassId, mut method: Method) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        method.class = class;
        self.methods.push(method);
        self.classes[class.index()].methods.push(id);
        id
    }

    pub(crate) fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    pub(crate) fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.index()]
    }

    pub(crate) fn method_mut(&mut self, id: MethodId) -> &mut Method {
        &mut self.methods[id.index()]
    }

    pub(crate) fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.class_index.get(name).copied()
    }

    pub(crate) fn class_ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        (0..self.classes.len() as u32).map(ClassId)
    }

    pub(crate) fn method_ids(&self) -> impl Iterator<Item = MethodId> + '_ {
        (0..self.methods.len() as u32).map(MethodId)
    }

    pub(crate) fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Symbolic reference matching the method's current signature.
    pub(crate) fn method_ref(&self, id: MethodId) -> MethodRef {
        let method = self.method(id);
        MethodRef {
            owner: self.class(method.class).name.clone(),
            name: method.name.clone(),
            params: method.explicit_params().to_vec(),
            return_type: method.return_type.clone(),
        }
    }

    pub(crate) fn show_method(&self, id: MethodId) -> String {
        self.method_ref(id).to_string()
    }

    /// Detach a method body so it can be edited while the rest of the
    /// program stays readable.
    pub(crate) fn take_code(&mut self, id: MethodId) -> Option<Code> {
        self.methods[id.index()].code.take()
    }

    pub(crate) fn restore_code(&mut self, id: MethodId, code: Code) {
        self.methods[id.index()].code = Some(code);
    }
}

impl Method {
    pub(crate) fn is_static(&self) -> bool {
        self.kind == DispatchKind::Static
    }

    /// Number of argument registers a call to this method supplies.
    pub(crate) fn arity(&self) -> usize {
        self.params.len()
    }

    /// Parameters as written in a method reference.
    pub(crate) fn explicit_params(&self) -> &[String] {
        if self.is_static() || self.params.is_empty() {
            &self.params
        } else {
            &self.params[1..]
        }
    }

    pub(crate) fn descriptor(&self) -> String {
        descriptor(self.explicit_params(), &self.return_type)
    }

    pub(crate) fn matches(&self, method_ref: &MethodRef) -> bool {
        self.name == method_ref.name
            && self.explicit_params() == method_ref.params.as_slice()
            && self.return_type == method_ref.return_type
    }
}

impl Instruction {
    /// Explicit source registers. Range operands are reported by [`Self::range`].
    pub(crate) fn srcs(&self) -> &[Reg] {
        match self {
            Instruction::Invoke { operands, .. } | Instruction::FilledNewArray { operands, .. } => {
                match operands {
                    Operands::Compact(regs) => regs,
                    Operands::Range { .. } => &[],
                }
            }
            Instruction::Op { srcs, .. } => srcs,
            Instruction::LoadParam { .. } => &[],
        }
    }

    pub(crate) fn range(&self) -> Option<(Reg, u32)> {
        match self {
            Instruction::Invoke { operands, .. } | Instruction::FilledNewArray { operands, .. } => {
                match operands {
                    Operands::Range { base, count } => Some((*base, *count)),
                    Operands::Compact(_) => None,
                }
            }
            _ => None,
        }
    }
}

impl Operands {
    pub(crate) fn len(&self) -> usize {
        match self {
            Operands::Compact(regs) => regs.len(),
            Operands::Range { count, .. } => *count as usize,
        }
    }
}

impl InvokeKind {
    pub(crate) fn mnemonic(self) -> &'static str {
        match self {
            InvokeKind::Virtual => "invoke-virtual",
            InvokeKind::Super => "invoke-super",
            InvokeKind::Direct => "invoke-direct",
            InvokeKind::Static => "invoke-static",
            InvokeKind::Interface => "invoke-interface",
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}:{}",
            self.owner,
            self.name,
            descriptor(&self.params, &self.return_type)
        )
    }
}

fn descriptor(params: &[String], return_type: &str) -> String {
    format!("({}){}", params.concat(), return_type)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn method_ref_excludes_receiver() {
        let mut builder = ProgramBuilder::new();
        let class = builder.class("com/example/Foo", None);
        let method = builder.method(class, "bar", DispatchKind::Virtual, &["I"], None);
        let program = builder.finish();

        assert_eq!(2, program.method(method).arity());
        assert_eq!("com/example/Foo.bar:(I)V", program.show_method(method));
        assert!(program.method(method).matches(&program.method_ref(method)));
    }

    #[test]
    fn add_class_rejects_duplicates() {
        let mut program = Program::default();
        let class = Class {
            name: "A".to_string(),
            super_name: None,
            interfaces: Vec::new(),
            is_interface: false,
            is_external: false,
            methods: Vec::new(),
        };
        program.add_class(class.clone()).expect("first class");

        assert!(program.add_class(class).is_err());
    }

    #[test]
    fn range_operands_are_not_reported_as_srcs() {
        let insn = Instruction::FilledNewArray {
            element: "I".to_string(),
            dest: 0,
            operands: Operands::Range { base: 2, count: 3 },
        };

        assert!(insn.srcs().is_empty());
        assert_eq!(Some((2, 3)), insn.range());
    }
}
