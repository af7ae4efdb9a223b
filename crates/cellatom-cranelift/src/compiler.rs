//! AST to Cranelift IR lowering.
//!
//! The shared grid linearisation is `index(x, y) = x*height + y`; address
//! arithmetic is widened to pointer width before the multiply so a large
//! grid cannot wrap the 16-bit cell domain.

use cellatom::{BinaryOp, Node, NodeId, Operand, Program, RangeTable, Reg, RegClass};
use cranelift_codegen::entity::EntityRef;
use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{
    types, AbiParam, FuncRef, InstBuilder, MemFlags, StackSlotData, StackSlotKind, Type, Value,
};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Linkage, Module};
use log::debug;

use crate::CompileError;

/// Define the per-cell function and the outer driver in `module`, returning
/// the driver's id.
pub(crate) fn define_functions(
    module: &mut JITModule,
    program: &Program,
) -> Result<FuncId, CompileError> {
    let ptr_type = module.target_config().pointer_type();

    // cell(old, new, w, h, x, y, v, g) -> i16
    let mut cell_sig = module.make_signature();
    cell_sig.params.push(AbiParam::new(ptr_type));
    cell_sig.params.push(AbiParam::new(ptr_type));
    for _ in 0..5 {
        cell_sig.params.push(AbiParam::new(types::I16));
    }
    cell_sig.params.push(AbiParam::new(ptr_type));
    cell_sig.returns.push(AbiParam::new(types::I16));

    // automaton(old, new, w, h)
    let mut automaton_sig = module.make_signature();
    automaton_sig.params.push(AbiParam::new(ptr_type));
    automaton_sig.params.push(AbiParam::new(ptr_type));
    automaton_sig.params.push(AbiParam::new(types::I16));
    automaton_sig.params.push(AbiParam::new(types::I16));

    // The per-cell function is local to the module; only the driver is
    // reachable from outside.
    let cell_id = module.declare_function("cell", Linkage::Local, &cell_sig)?;
    let automaton_id = module.declare_function("automaton", Linkage::Export, &automaton_sig)?;

    let mut fn_ctx = FunctionBuilderContext::new();
    let mut ctx = module.make_context();

    ctx.func.signature = cell_sig;
    define_cell(
        FunctionBuilder::new(&mut ctx.func, &mut fn_ctx),
        program,
        ptr_type,
    )?;
    debug!("lowered cell function:\n{}", ctx.func.display());
    module.define_function(cell_id, &mut ctx)?;
    module.clear_context(&mut ctx);

    ctx.func.signature = automaton_sig;
    let cell_ref = module.declare_func_in_func(cell_id, &mut ctx.func);
    define_automaton(
        FunctionBuilder::new(&mut ctx.func, &mut fn_ctx),
        cell_ref,
        ptr_type,
    );
    debug!("synthesised driver:\n{}", ctx.func.display());
    module.define_function(automaton_id, &mut ctx)?;
    module.clear_context(&mut ctx);

    Ok(automaton_id)
}

/// Lower every top-level statement into the body of `cell` and return `v`.
fn define_cell(
    mut builder: FunctionBuilder,
    program: &Program,
    ptr_type: Type,
) -> Result<(), CompileError> {
    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    let params = builder.block_params(entry).to_vec();

    // The mutable locals a0..a9 and v become frontend variables; SSA
    // construction turns them into block parameters at the joins the
    // range-map and neighbours lowerings create.
    let locals: [Variable; 10] = std::array::from_fn(Variable::new);
    let value = Variable::new(10);
    for local in locals {
        builder.declare_var(local, types::I16);
    }
    builder.declare_var(value, types::I16);
    let zero = builder.ins().iconst(types::I16, 0);
    for local in locals {
        builder.def_var(local, zero);
    }
    builder.def_var(value, params[6]);

    let mut lowerer = Lowerer {
        builder: &mut builder,
        program,
        ptr_type,
        old_grid: params[0],
        width: params[2],
        height: params[3],
        x: params[4],
        y: params[5],
        globals: params[7],
        locals,
        value,
    };
    for stmt in program.statements() {
        lowerer.lower_node(*stmt)?;
    }

    let result = builder.use_var(value);
    builder.ins().return_(&[result]);
    builder.seal_all_blocks();
    builder.finalize();
    Ok(())
}

struct Lowerer<'a, 'b> {
    builder: &'a mut FunctionBuilder<'b>,
    program: &'a Program,
    ptr_type: Type,
    old_grid: Value,
    width: Value,
    height: Value,
    x: Value,
    y: Value,
    /// Pointer to the ten global registers, provided by the driver.
    globals: Value,
    locals: [Variable; 10],
    value: Variable,
}

impl Lowerer<'_, '_> {
    fn read_reg(&mut self, reg: Reg) -> Value {
        match reg.class() {
            RegClass::Local(n) => self.builder.use_var(self.locals[n as usize]),
            RegClass::Global(n) => self.builder.ins().load(
                types::I16,
                MemFlags::trusted(),
                self.globals,
                i32::from(n) * 2,
            ),
            RegClass::Cell => self.builder.use_var(self.value),
            // Undefined indices read as -1, mirroring the interpreter.
            RegClass::Undefined => self.builder.ins().iconst(types::I16, i64::from(-1i16 as u16)),
        }
    }

    fn write_reg(&mut self, reg: Reg, value: Value) {
        match reg.class() {
            RegClass::Local(n) => self.builder.def_var(self.locals[n as usize], value),
            RegClass::Global(n) => {
                self.builder
                    .ins()
                    .store(MemFlags::trusted(), value, self.globals, i32::from(n) * 2);
            }
            RegClass::Cell => self.builder.def_var(self.value, value),
            // Writes to undefined indices are dropped.
            RegClass::Undefined => {}
        }
    }

    fn lower_operand(&mut self, operand: Operand) -> Result<Value, CompileError> {
        match operand {
            Operand::Literal(n) => Ok(self.builder.ins().iconst(types::I16, i64::from(n))),
            Operand::Register(reg) => Ok(self.read_reg(reg)),
            Operand::Node(id) => self.lower_node(id),
        }
    }

    fn lower_node(&mut self, id: NodeId) -> Result<Value, CompileError> {
        let program = self.program;
        match program.node(id) {
            Node::Binary { op, dst, src } => self.lower_binary(*op, *dst, *src),
            Node::RangeMap(table) => self.lower_range_map(table),
            Node::Neighbours { body } => self.lower_neighbours(body),
        }
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        dst: Operand,
        src: Operand,
    ) -> Result<Value, CompileError> {
        let Operand::Register(reg) = dst else {
            return Err(CompileError::InvalidDestination(op));
        };
        // Destination first, then the r-value.
        let lhs = self.read_reg(reg);
        let rhs = self.lower_operand(src)?;
        let result = match op {
            BinaryOp::Add => self.builder.ins().iadd(lhs, rhs),
            BinaryOp::Sub => self.builder.ins().isub(lhs, rhs),
            BinaryOp::Mul => self.builder.ins().imul(lhs, rhs),
            BinaryOp::Div => self.builder.ins().sdiv(lhs, rhs),
            // The destination load is dead here; DCE drops it.
            BinaryOp::Assign => rhs,
            BinaryOp::Min => {
                let greater = self.builder.ins().icmp(IntCC::SignedGreaterThan, rhs, lhs);
                self.builder.ins().select(greater, lhs, rhs)
            }
            BinaryOp::Max => {
                let greater = self.builder.ins().icmp(IntCC::SignedGreaterThan, rhs, lhs);
                self.builder.ins().select(greater, rhs, lhs)
            }
        };
        self.write_reg(reg, result);
        Ok(result)
    }

    fn lower_range_map(&mut self, table: &RangeTable) -> Result<Value, CompileError> {
        // The key is evaluated exactly once, ahead of the compare chain.
        let key = self.lower_operand(table.key)?;
        let merge = self.builder.create_block();
        let result = self.builder.append_block_param(merge, types::I16);

        for entry in &table.entries {
            let matched = if entry.min == entry.max {
                let bound = self.builder.ins().iconst(types::I16, i64::from(entry.min));
                self.builder.ins().icmp(IntCC::Equal, key, bound)
            } else {
                let lo = self.builder.ins().iconst(types::I16, i64::from(entry.min));
                let hi = self.builder.ins().iconst(types::I16, i64::from(entry.max));
                let ge = self
                    .builder
                    .ins()
                    .icmp(IntCC::SignedGreaterThanOrEqual, key, lo);
                let le = self
                    .builder
                    .ins()
                    .icmp(IntCC::SignedLessThanOrEqual, key, hi);
                self.builder.ins().band(ge, le)
            };
            let hit = self.builder.create_block();
            let miss = self.builder.create_block();
            self.builder.ins().brif(matched, hit, &[], miss, &[]);

            // The result operand is lowered inside the matched block so its
            // side effects happen only when this entry is selected.
            self.builder.switch_to_block(hit);
            let value = self.lower_operand(entry.result)?;
            self.builder.ins().jump(merge, &[value]);

            self.builder.switch_to_block(miss);
        }

        // Falling off the end of the table produces 0.
        let zero = self.builder.ins().iconst(types::I16, 0);
        self.builder.ins().jump(merge, &[zero]);
        self.builder.switch_to_block(merge);
        Ok(result)
    }

    fn lower_neighbours(&mut self, body: &[NodeId]) -> Result<Value, CompileError> {
        let zero = self.builder.ins().iconst(types::I16, 0);
        let one = self.builder.ins().iconst(types::I16, 1);

        // Clamp the neighbourhood to the grid: x-1..=x+1 within [0, W),
        // y-1..=y+1 within [0, H).
        let x_lo_raw = self.builder.ins().isub(self.x, one);
        let below = self.builder.ins().icmp(IntCC::SignedLessThan, x_lo_raw, zero);
        let x_lo = self.builder.ins().select(below, zero, x_lo_raw);
        let x_hi_raw = self.builder.ins().iadd(self.x, one);
        let x_last = self.builder.ins().isub(self.width, one);
        let above = self
            .builder
            .ins()
            .icmp(IntCC::SignedGreaterThan, x_hi_raw, x_last);
        let x_hi = self.builder.ins().select(above, x_last, x_hi_raw);

        let y_lo_raw = self.builder.ins().isub(self.y, one);
        let below = self.builder.ins().icmp(IntCC::SignedLessThan, y_lo_raw, zero);
        let y_lo = self.builder.ins().select(below, zero, y_lo_raw);
        let y_hi_raw = self.builder.ins().iadd(self.y, one);
        let y_last = self.builder.ins().isub(self.height, one);
        let above = self
            .builder
            .ins()
            .icmp(IntCC::SignedGreaterThan, y_hi_raw, y_last);
        let y_hi = self.builder.ins().select(above, y_last, y_hi_raw);

        let x_head = self.builder.create_block();
        let cx = self.builder.append_block_param(x_head, types::I16);
        let y_head = self.builder.create_block();
        let cy = self.builder.append_block_param(y_head, types::I16);
        let check = self.builder.create_block();
        let body_block = self.builder.create_block();
        let y_latch = self.builder.create_block();
        let x_latch = self.builder.create_block();
        let exit = self.builder.create_block();

        self.builder.ins().jump(x_head, &[x_lo]);

        // Both loops run to their clamped bound inclusively.
        self.builder.switch_to_block(x_head);
        let x_done = self.builder.ins().icmp(IntCC::SignedGreaterThan, cx, x_hi);
        self.builder.ins().brif(x_done, exit, &[], y_head, &[y_lo]);

        self.builder.switch_to_block(y_head);
        let y_done = self.builder.ins().icmp(IntCC::SignedGreaterThan, cy, y_hi);
        self.builder.ins().brif(y_done, x_latch, &[], check, &[]);

        // The cell itself is not one of its neighbours.
        self.builder.switch_to_block(check);
        let same_x = self.builder.ins().icmp(IntCC::Equal, cx, self.x);
        let same_y = self.builder.ins().icmp(IntCC::Equal, cy, self.y);
        let own_cell = self.builder.ins().band(same_x, same_y);
        self.builder.ins().brif(own_cell, y_latch, &[], body_block, &[]);

        self.builder.switch_to_block(body_block);
        let addr = grid_address(self.builder, self.ptr_type, self.old_grid, self.height, cx, cy);
        let neighbour = self.builder.ins().load(types::I16, MemFlags::trusted(), addr, 0);
        self.builder.def_var(self.locals[0], neighbour);
        for stmt in body {
            self.lower_node(*stmt)?;
        }
        self.builder.ins().jump(y_latch, &[]);

        self.builder.switch_to_block(y_latch);
        let cy_next = self.builder.ins().iadd(cy, one);
        self.builder.ins().jump(y_head, &[cy_next]);

        self.builder.switch_to_block(x_latch);
        let cx_next = self.builder.ins().iadd(cx, one);
        self.builder.ins().jump(x_head, &[cx_next]);

        self.builder.switch_to_block(exit);
        Ok(zero)
    }
}

/// The address of `grid[x*height + y]`, computed at pointer width.
fn grid_address(
    builder: &mut FunctionBuilder,
    ptr_type: Type,
    grid: Value,
    height: Value,
    x: Value,
    y: Value,
) -> Value {
    let x_wide = builder.ins().sextend(ptr_type, x);
    let y_wide = builder.ins().sextend(ptr_type, y);
    let height_wide = builder.ins().sextend(ptr_type, height);
    let row = builder.ins().imul(x_wide, height_wide);
    let index = builder.ins().iadd(row, y_wide);
    let offset = builder.ins().ishl_imm(index, 1);
    builder.ins().iadd(grid, offset)
}

/// Synthesise the outer driver: zero the globals, walk the grid with `x`
/// outer and `y` inner, and store each cell's result into the new grid.
fn define_automaton(mut builder: FunctionBuilder, cell: FuncRef, ptr_type: Type) {
    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    let params = builder.block_params(entry).to_vec();
    let (old_grid, new_grid, width, height) = (params[0], params[1], params[2], params[3]);

    // The ten global registers live in a stack slot for the duration of the
    // step, zeroed before the first cell.
    let g_slot =
        builder.create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, 20));
    let zero = builder.ins().iconst(types::I16, 0);
    for i in 0..10 {
        builder.ins().stack_store(zero, g_slot, i * 2);
    }
    let g_ptr = builder.ins().stack_addr(ptr_type, g_slot, 0);
    let one = builder.ins().iconst(types::I16, 1);

    let x_head = builder.create_block();
    let cx = builder.append_block_param(x_head, types::I16);
    let y_head = builder.create_block();
    let cy = builder.append_block_param(y_head, types::I16);
    let body = builder.create_block();
    let y_latch = builder.create_block();
    let x_latch = builder.create_block();
    let exit = builder.create_block();

    builder.ins().jump(x_head, &[zero]);

    builder.switch_to_block(x_head);
    let x_done = builder
        .ins()
        .icmp(IntCC::SignedGreaterThanOrEqual, cx, width);
    builder.ins().brif(x_done, exit, &[], y_head, &[zero]);

    builder.switch_to_block(y_head);
    let y_done = builder
        .ins()
        .icmp(IntCC::SignedGreaterThanOrEqual, cy, height);
    builder.ins().brif(y_done, x_latch, &[], body, &[]);

    builder.switch_to_block(body);
    let old_addr = grid_address(&mut builder, ptr_type, old_grid, height, cx, cy);
    let old_value = builder.ins().load(types::I16, MemFlags::trusted(), old_addr, 0);
    let call = builder.ins().call(
        cell,
        &[old_grid, new_grid, width, height, cx, cy, old_value, g_ptr],
    );
    let new_value = builder.inst_results(call)[0];
    let new_addr = grid_address(&mut builder, ptr_type, new_grid, height, cx, cy);
    builder
        .ins()
        .store(MemFlags::trusted(), new_value, new_addr, 0);
    builder.ins().jump(y_latch, &[]);

    builder.switch_to_block(y_latch);
    let cy_next = builder.ins().iadd(cy, one);
    builder.ins().jump(y_head, &[cy_next]);

    builder.switch_to_block(x_latch);
    let cx_next = builder.ins().iadd(cx, one);
    builder.ins().jump(x_head, &[cx_next]);

    builder.switch_to_block(exit);
    builder.ins().return_(&[]);
    builder.seal_all_blocks();
    builder.finalize();
}
