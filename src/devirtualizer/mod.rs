//! Turns instance methods that never need dynamic dispatch into static methods.
//!
//! Four independent pools are handled: virtual and direct methods, each split
//! by whether the body reads its receiver. Methods that ignore the receiver
//! lose it entirely; the others keep it as an explicit first parameter. For
//! every pool the call sites are rewritten before the methods themselves are
//! changed, since the rewriters check operand counts against the old
//! signature.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::hierarchy::DispatchAnalysis;
use crate::ir::{ClassId, MethodId, Program};
use crate::keep::KeepPolicy;

pub(crate) mod analysis;
pub(crate) mod call_sites;
pub(crate) mod candidates;
pub(crate) mod error;
pub(crate) mod mutators;

use self::call_sites::{fix_call_sites, fix_call_sites_and_drop_this_arg};
use self::candidates::{
    devirtualizable_dmethods, devirtualizable_methods, devirtualizable_methods_not_using_this,
    devirtualizable_vmethods,
};
pub(crate) use self::error::DevirtError;
use self::mutators::{KeepThis, make_methods_static};

/// Which pools to staticize.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct DevirtualizerConfig {
    pub(crate) vmethods_not_using_this: bool,
    pub(crate) dmethods_not_using_this: bool,
    pub(crate) vmethods_using_this: bool,
    pub(crate) dmethods_using_this: bool,
}

impl Default for DevirtualizerConfig {
    fn default() -> Self {
        Self {
            vmethods_not_using_this: true,
            dmethods_not_using_this: true,
            vmethods_using_this: false,
            dmethods_using_this: false,
        }
    }
}

/// Counters reported by one run of the pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct DevirtualizerMetrics {
    pub(crate) num_virtual_calls: usize,
    pub(crate) num_super_calls: usize,
    pub(crate) num_direct_calls: usize,
    pub(crate) num_methods_not_using_this: usize,
    pub(crate) num_methods_using_this: usize,
}

pub(crate) struct MethodDevirtualizer<'a> {
    config: DevirtualizerConfig,
    analysis: &'a dyn DispatchAnalysis,
    policy: &'a dyn KeepPolicy,
}

impl<'a> MethodDevirtualizer<'a> {
    pub(crate) fn new(
        config: DevirtualizerConfig,
        analysis: &'a dyn DispatchAnalysis,
        policy: &'a dyn KeepPolicy,
    ) -> Self {
        Self {
            config,
            analysis,
            policy,
        }
    }

    /// Run every enabled pool over `program`, restricting candidates to
    /// methods of `targets` (all classes when `None`).
    ///
    /// An error leaves the program partially rewritten and must not be
    /// recovered from.
    pub(crate) fn devirtualize_methods(
        &self,
        program: &mut Program,
        targets: Option<&[ClassId]>,
    ) -> Result<DevirtualizerMetrics, DevirtError> {
        let targets: BTreeSet<ClassId> = match targets {
            Some(targets) => targets.iter().copied().collect(),
            None => program.class_ids().collect(),
        };
        let mut metrics = DevirtualizerMetrics::default();

        if self.config.vmethods_not_using_this {
            let candidates = devirtualizable_vmethods(program, &targets, self.analysis);
            let vmethods =
                devirtualizable_methods_not_using_this(program, &candidates, self.policy)?;
            staticize_methods_not_using_this(program, &vmethods, &mut metrics)?;
        }

        if self.config.dmethods_not_using_this {
            let candidates = devirtualizable_dmethods(program, &targets);
            let dmethods =
                devirtualizable_methods_not_using_this(program, &candidates, self.policy)?;
            staticize_methods_not_using_this(program, &dmethods, &mut metrics)?;
        }

        if self.config.vmethods_using_this {
            let candidates = devirtualizable_vmethods(program, &targets, self.analysis);
            let vmethods = devirtualizable_methods(program, &candidates, self.policy);
            staticize_methods_using_this(program, &vmethods, &mut metrics)?;
        }

        if self.config.dmethods_using_this {
            let candidates = devirtualizable_dmethods(program, &targets);
            let dmethods = devirtualizable_methods(program, &candidates, self.policy);
            staticize_methods_using_this(program, &dmethods, &mut metrics)?;
        }

        Ok(metrics)
    }
}

fn staticize_methods_not_using_this(
    program: &mut Program,
    methods: &BTreeSet<MethodId>,
    metrics: &mut DevirtualizerMetrics,
) -> Result<(), DevirtError> {
    fix_call_sites_and_drop_this_arg(program, methods, metrics)?;
    make_methods_static(program, methods, KeepThis::No)?;
    info!(count = methods.len(), "staticized methods not using this");
    metrics.num_methods_not_using_this += methods.len();
    Ok(())
}

fn staticize_methods_using_this(
    program: &mut Program,
    methods: &BTreeSet<MethodId>,
    metrics: &mut DevirtualizerMetrics,
) -> Result<(), DevirtError> {
    fix_call_sites(program, methods, metrics)?;
    make_methods_static(program, methods, KeepThis::Yes)?;
    info!(count = methods.len(), "staticized methods using this");
    metrics.num_methods_using_this += methods.len();
    Ok(())
}
