//! One module per pipeline stage (distilled spec §7): PLAN, RETRIEVE,
//! CODE_FIX, VALIDATE, CREATE_PR, NOTIFY. Each exposes a single async
//! `run` matching [`crate::stage::dispatch`]'s signature.

pub mod code_fix;
pub mod create_pr;
pub mod notify;
pub mod plan;
pub mod retrieve;
pub mod validate;
