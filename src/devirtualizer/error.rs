use thiserror::Error;

/// Internal invariant violations. Any of these aborts the pass; the program
/// may be partially rewritten when one is returned.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub(crate) enum DevirtError {
    #[error("{method}: receiver analysis needs a concrete instance method")]
    NotAnalyzable { method: String },

    #[error("{method}: first instruction does not bind the receiver")]
    MissingReceiverBinding { method: String },

    #[error("{caller}: {mnemonic} call to {callee} cannot be made static")]
    UnexpectedInvoke {
        caller: String,
        callee: String,
        mnemonic: &'static str,
    },

    #[error("{caller}: call to {callee} is already static")]
    AlreadyStatic { caller: String, callee: String },

    #[error("{caller}: call to {callee} passes {found} arguments, expected {expected}")]
    ArityMismatch {
        caller: String,
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("{method}: static form clashes with existing {existing}")]
    SignatureCollision { method: String, existing: String },
}
