//! The core of the CellAtom cellular-automaton language.
//!
//! A CellAtom program describes how the next value of every cell in a
//! two-dimensional grid of 16-bit signed integers is derived from the cell's
//! current value, its (up to eight) neighbours, ten per-cell scratch
//! registers `a0..a9` and ten per-step global registers `g0..g9`.
//!
//! This crate owns the language's data model ([`ast`]), the text front-end
//! ([`parser`]) and the reference tree-walking evaluator ([`interp`]). The
//! JIT back-end lives in the `cellatom-cranelift` crate and is required to be
//! observationally equivalent to the interpreter here.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod ast;
pub mod interp;
pub mod parser;

pub use ast::{BinaryOp, Node, NodeId, Operand, Program, RangeEntry, RangeTable, Reg, RegClass};
pub use interp::run_one_step;
pub use parser::{parse, ParseError};
