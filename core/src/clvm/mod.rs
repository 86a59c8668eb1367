pub mod conditions;
pub mod ops;
pub mod program;
pub mod run_program;
pub mod serialize;
pub mod sexp;
