//! The Cranelift back-end: compiles a CellAtom program into native code.
//!
//! The program's statements are lowered into a per-cell function
//!
//! ```text
//! cell(old: *const i16, new: *mut i16, w: i16, h: i16,
//!      x: i16, y: i16, v: i16, g: *mut i16) -> i16
//! ```
//!
//! in Cranelift IR, together with an outer `automaton(old, new, w, h)`
//! driver synthesised in the same module that zeroes the global registers,
//! walks the grid and stores each cell's result. Optimisation and SSA
//! construction are Cranelift's: the frontend promotes the mutable locals
//! `a0..a9` and `v` to SSA values (inserting block parameters at joins), and
//! the `speed` pipeline provides GVN, instruction combining, CFG
//! simplification and dead-code elimination.
//!
//! The interpreter in the `cellatom` crate is the reference semantics; the
//! compiled automaton must produce identical grids for identical inputs,
//! modulo traps on undefined arithmetic.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

mod compiler;

use cellatom::{BinaryOp, Program};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::CodegenError;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, ModuleError};
use log::debug;
use thiserror::Error;

/// An error raised while building the JIT module.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The optimisation level is outside `0..=3`.
    #[error("unsupported optimisation level {0} (expected 0..=3)")]
    OptLevel(u8),
    /// Cranelift has no back-end for the host machine.
    #[error("host machine is not supported: {0}")]
    HostUnsupported(&'static str),
    /// A compiler flag was rejected.
    #[error("invalid compiler setting: {0}")]
    Setting(String),
    /// The target ISA could not be constructed.
    #[error("failed to construct the target ISA: {0}")]
    Isa(#[from] CodegenError),
    /// Declaring, defining or finalizing a function failed.
    #[error("jit module error: {0}")]
    Module(#[from] ModuleError),
    /// A binary statement whose destination cannot be stored to; the
    /// interpreter skips such stores, the compiler rejects the program.
    #[error("destination of `{0}` is not a register")]
    InvalidDestination(BinaryOp),
}

/// The machine signature of the compiled outer driver.
type AutomatonFn = unsafe extern "C" fn(*const i16, *mut i16, i16, i16);

/// A compiled automaton: one call runs one full step.
///
/// Owns the executable memory the entry point lives in; dropping the
/// `Automaton` frees it.
pub struct Automaton {
    module: Option<JITModule>,
    entry: AutomatonFn,
}

impl Automaton {
    /// Produce one successor grid, like
    /// [`run_one_step`](cellatom::run_one_step) does for the interpreter.
    /// Both slices must hold `width * height` cells.
    pub fn run(&self, old: &[i16], new: &mut [i16], width: i16, height: i16) {
        assert!(width >= 0 && height >= 0, "negative grid dimensions");
        let cells = width as usize * height as usize;
        assert_eq!(old.len(), cells, "old grid is not {width}x{height}");
        assert_eq!(new.len(), cells, "new grid is not {width}x{height}");
        // The grids are disjoint and correctly sized, which is all the
        // generated code assumes.
        unsafe { (self.entry)(old.as_ptr(), new.as_mut_ptr(), width, height) }
    }
}

impl Drop for Automaton {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // `entry` points into the module's code memory and is
            // unreachable once drop has begun.
            unsafe { module.free_memory() };
        }
    }
}

/// Compile `program` for the host machine at the given optimisation level.
///
/// Levels map onto Cranelift's two effective tiers: `0` compiles with
/// `opt_level=none`, `1..=3` with `opt_level=speed`.
pub fn compile(program: &Program, opt_level: u8) -> Result<Automaton, CompileError> {
    let opt = match opt_level {
        0 => "none",
        1..=3 => "speed",
        n => return Err(CompileError::OptLevel(n)),
    };

    let mut flags = settings::builder();
    for (name, value) in [
        ("use_colocated_libcalls", "false"),
        ("is_pic", "false"),
        ("opt_level", opt),
    ] {
        flags
            .set(name, value)
            .map_err(|e| CompileError::Setting(e.to_string()))?;
    }
    let isa = cranelift_native::builder()
        .map_err(CompileError::HostUnsupported)?
        .finish(settings::Flags::new(flags))?;

    let mut module = JITModule::new(JITBuilder::with_isa(isa, default_libcall_names()));
    let automaton_id = compiler::define_functions(&mut module, program)?;
    module.finalize_definitions()?;
    let code = module.get_finalized_function(automaton_id);
    debug!("compiled automaton at opt level {opt_level} ({opt})");

    // The pointer stays valid until `free_memory`, which `Drop` runs.
    let entry = unsafe { std::mem::transmute::<*const u8, AutomatonFn>(code) };
    Ok(Automaton {
        module: Some(module),
        entry,
    })
}
