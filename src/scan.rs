use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ir::{
    CallTarget, Class, Code, DispatchKind, Instruction, InvokeKind, Method, MethodAccess,
    MethodId, MethodRef, Operands, Program, Reg,
};

/// One JSON document holding a list of classes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreFile {
    pub(crate) classes: Vec<ClassEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ClassEntry {
    pub(crate) name: String,
    #[serde(rename = "super", default, skip_serializing_if = "Option::is_none")]
    pub(crate) super_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) interfaces: Vec<String>,
    #[serde(rename = "interface", default, skip_serializing_if = "is_false")]
    pub(crate) is_interface: bool,
    #[serde(default)]
    pub(crate) methods: Vec<MethodEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct MethodEntry {
    pub(crate) name: String,
    pub(crate) kind: DispatchKind,
    /// Parameter descriptors, receiver excluded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) params: Vec<String>,
    #[serde(rename = "return")]
    pub(crate) return_type: String,
    #[serde(rename = "abstract", default, skip_serializing_if = "is_false")]
    pub(crate) is_abstract: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub(crate) keep: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) code: Option<CodeEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct CodeEntry {
    pub(crate) registers: u32,
    pub(crate) instructions: Vec<InstructionEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub(crate) enum InstructionEntry {
    LoadParamObject {
        dest: Reg,
    },
    LoadParam {
        dest: Reg,
    },
    Invoke {
        kind: InvokeKind,
        method: MethodRef,
        args: Operands,
    },
    FilledNewArray {
        element: String,
        dest: Reg,
        args: Operands,
    },
    Other {
        mnemonic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dest: Option<Reg>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        srcs: Vec<Reg>,
    },
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Parsed stores, in load order.
pub(crate) struct ScanOutput {
    pub(crate) stores: Vec<Store>,
    pub(crate) class_count: usize,
}

/// Classes read from one file.
pub(crate) struct Store {
    pub(crate) path: PathBuf,
    /// Classpath stores describe code outside the rewritable program.
    pub(crate) is_external: bool,
    pub(crate) classes: Vec<ClassEntry>,
}

pub(crate) fn scan_inputs(input: &Path, classpath: &[PathBuf]) -> Result<ScanOutput> {
    let mut stores = Vec::new();

    scan_path(input, false, true, &mut stores)?;

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in classpath_entries {
        scan_path(&entry, true, true, &mut stores)?;
    }

    let class_count = stores.iter().map(|store| store.classes.len()).sum();
    Ok(ScanOutput {
        stores,
        class_count,
    })
}

fn scan_path(path: &Path, is_external: bool, strict: bool, stores: &mut Vec<Store>) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, is_external, stores);
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "json" => scan_store_file(path, is_external, stores),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn scan_dir(path: &Path, is_external: bool, stores: &mut Vec<Store>) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, is_external, stores)?;
        } else {
            scan_path(&entry, is_external, false, stores)?;
        }
    }

    Ok(())
}

fn scan_store_file(path: &Path, is_external: bool, stores: &mut Vec<Store>) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file: StoreFile = serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    stores.push(Store {
        path: path.to_path_buf(),
        is_external,
        classes: file.classes,
    });
    Ok(())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Flatten stores into one program and bind call targets.
///
/// A reference naming a method defined in exactly the named owner becomes a
/// concrete target; anything else stays symbolic and is resolved by passes.
/// Methods without a body are treated as abstract.
pub(crate) fn build_class_scope(stores: Vec<Store>) -> Result<Program> {
    let mut program = Program::default();
    let mut bodies = Vec::new();

    for store in stores {
        for entry in store.classes {
            let class_id = program
                .add_class(Class {
                    name: entry.name.clone(),
                    super_name: entry.super_name,
                    interfaces: entry.interfaces,
                    is_interface: entry.is_interface,
                    is_external: store.is_external,
                    methods: Vec::new(),
                })
                .with_context(|| format!("in {}", store.path.display()))?;
            for method in entry.methods {
                let mut params = Vec::with_capacity(method.params.len() + 1);
                if method.kind != DispatchKind::Static {
                    params.push(format!("L{};", entry.name));
                }
                params.extend(method.params);
                let code = if store.is_external { None } else { method.code };
                let id = program.add_method(
                    class_id,
                    Method {
                        class: class_id,
                        name: method.name,
                        kind: method.kind,
                        params,
                        return_type: method.return_type,
                        access: MethodAccess {
                            is_abstract: !store.is_external
                                && (method.is_abstract || code.is_none()),
                            is_external: store.is_external,
                            keep: method.keep,
                        },
                        code: None,
                    },
                );
                if let Some(code) = code {
                    bodies.push((id, code));
                }
            }
        }
    }

    for (id, entry) in bodies {
        let code = import_code(&program, id, entry)?;
        program.restore_code(id, code);
    }
    Ok(program)
}

fn import_code(program: &Program, id: MethodId, entry: CodeEntry) -> Result<Code> {
    let mut instructions = Vec::with_capacity(entry.instructions.len());
    for insn in entry.instructions {
        let insn = match insn {
            InstructionEntry::LoadParamObject { dest } => {
                Instruction::LoadParam { object: true, dest }
            }
            InstructionEntry::LoadParam { dest } => Instruction::LoadParam {
                object: false,
                dest,
            },
            InstructionEntry::Invoke { kind, method, args } => Instruction::Invoke {
                kind,
                target: bind_target(program, method),
                operands: check_operands(program, id, args)?,
            },
            InstructionEntry::FilledNewArray {
                element,
                dest,
                args,
            } => Instruction::FilledNewArray {
                element,
                dest,
                operands: check_operands(program, id, args)?,
            },
            InstructionEntry::Other {
                mnemonic,
                dest,
                srcs,
            } => Instruction::Op {
                mnemonic,
                dest,
                srcs,
            },
        };
        instructions.push(insn);
    }
    Ok(Code {
        registers: entry.registers,
        instructions,
    })
}

fn bind_target(program: &Program, method_ref: MethodRef) -> CallTarget {
    let found = program.class_by_name(&method_ref.owner).and_then(|class_id| {
        program
            .class(class_id)
            .methods
            .iter()
            .copied()
            .find(|id| program.method(*id).matches(&method_ref))
    });
    match found {
        Some(id) => CallTarget::Def(id),
        None => CallTarget::Ref(method_ref),
    }
}

fn check_operands(program: &Program, id: MethodId, operands: Operands) -> Result<Operands> {
    if let Operands::Range { count: 0, .. } = operands {
        anyhow::bail!(
            "{}: range operands must cover at least one register",
            program.show_method(id)
        );
    }
    Ok(operands)
}

/// Serialize every class of the rewritable program back into store form.
pub(crate) fn export_program(program: &Program) -> StoreFile {
    let classes = program
        .class_ids()
        .map(|class_id| program.class(class_id))
        .filter(|class| !class.is_external)
        .map(|class| ClassEntry {
            name: class.name.clone(),
            super_name: class.super_name.clone(),
            interfaces: class.interfaces.clone(),
            is_interface: class.is_interface,
            methods: class
                .methods
                .iter()
                .map(|id| export_method(program, *id))
                .collect(),
        })
        .collect();
    StoreFile { classes }
}

fn export_method(program: &Program, id: MethodId) -> MethodEntry {
    let method = program.method(id);
    MethodEntry {
        name: method.name.clone(),
        kind: method.kind,
        params: method.explicit_params().to_vec(),
        return_type: method.return_type.clone(),
        is_abstract: method.access.is_abstract,
        keep: method.access.keep,
        code: method.code.as_ref().map(|code| CodeEntry {
            registers: code.registers,
            instructions: code
                .instructions
                .iter()
                .map(|insn| export_instruction(program, insn))
                .collect(),
        }),
    }
}

fn export_instruction(program: &Program, insn: &Instruction) -> InstructionEntry {
    match insn {
        Instruction::LoadParam { object: true, dest } => {
            InstructionEntry::LoadParamObject { dest: *dest }
        }
        Instruction::LoadParam {
            object: false,
            dest,
        } => InstructionEntry::LoadParam { dest: *dest },
        Instruction::Invoke {
            kind,
            target,
            operands,
        } => InstructionEntry::Invoke {
            kind: *kind,
            method: match target {
                CallTarget::Def(id) => program.method_ref(*id),
                CallTarget::Ref(method_ref) => method_ref.clone(),
            },
            args: operands.clone(),
        },
        Instruction::FilledNewArray {
            element,
            dest,
            operands,
        } => InstructionEntry::FilledNewArray {
            element: element.clone(),
            dest: *dest,
            args: operands.clone(),
        },
        Instruction::Op {
            mnemonic,
            dest,
            srcs,
        } => InstructionEntry::Other {
            mnemonic: mnemonic.clone(),
            dest: *dest,
            srcs: srcs.clone(),
        },
    }
}
