//! Structured control flow and the entry function body.
//!
//! Every IR block gets a preallocated label. `if` nodes become a header block
//! with `OpSelectionMerge`; loops become header, body, continue and merge
//! blocks with `OpLoopMerge`. A block that falls through into the next label
//! gets an explicit branch when the next block starts.

use log::trace;
use rspirv::spirv::{FunctionControl, LoopControl, SelectionControl, Word};

use super::context::Ctx;
use crate::error::Result;
use crate::ir::{Block, CfNode, Def, IfNode, Inst, InstKind, Intrinsic, JumpKind, LoopNode, RegisterId, Stage};

fn dest(inst: &Inst) -> &Def {
    match &inst.dest {
        Some(def) => def,
        None => panic!("BUG: {:?} without a destination", inst.kind),
    }
}

/// Label of the first block in `nodes`, if the list is non-empty.
fn first_block(nodes: &[CfNode]) -> Option<&Block> {
    match nodes.first() {
        Some(CfNode::Block(block)) => Some(block),
        Some(_) => panic!("BUG: control-flow list does not start with a block"),
        None => None,
    }
}

impl Ctx<'_> {
    fn label(&self, block: &Block) -> Word {
        self.labels[block.id.index()]
    }

    fn reg_var(&self, reg: RegisterId) -> Word {
        self.regs
            .get(reg.index())
            .copied()
            .unwrap_or_else(|| panic!("BUG: register {} was never declared", reg))
    }

    /// Start `label`, branching into it if the previous block fell through.
    fn start_block(&mut self, label: Word) -> Result<()> {
        if self.block_open {
            self.builder.branch(label)?;
        }
        self.builder.begin_block(Some(label))?;
        self.block_open = true;
        Ok(())
    }

    fn branch(&mut self, label: Word) -> Result<()> {
        assert!(self.block_open, "BUG: branch from a terminated block");
        self.builder.branch(label)?;
        self.block_open = false;
        Ok(())
    }

    fn emit_jump(&mut self, kind: JumpKind) -> Result<()> {
        let target = match kind {
            JumpKind::Break => self.loop_break,
            JumpKind::Continue => self.loop_cont,
        };
        let Some(target) = target else {
            panic!("BUG: {:?} outside of a loop", kind);
        };
        self.branch(target)
    }

    fn emit_inst(&mut self, inst: &Inst) -> Result<()> {
        match &inst.kind {
            InstKind::LoadConst(literals) => self.emit_load_const(dest(inst), literals),
            InstKind::Undef => self.emit_undef(dest(inst)),
            InstKind::Alu(alu) => self.emit_alu(dest(inst), alu)?,
            InstKind::Intrinsic(intr) => self.emit_intrinsic(inst.dest.as_ref(), intr)?,
            InstKind::Tex(tex) => self.emit_tex(dest(inst), tex)?,
            InstKind::Deref(deref) => self.emit_deref(dest(inst), deref)?,
            InstKind::LoadReg(reg) => {
                let def = dest(inst);
                let ty = self.value_type(def.bit_size, def.components);
                let result = self.load(ty, self.reg_var(*reg))?;
                self.write_value(def, result);
            }
            InstKind::StoreReg { reg, value } => {
                let src = self.src(*value);
                self.store(self.reg_var(*reg), src)?;
            }
            InstKind::Jump(kind) => self.emit_jump(*kind)?,
        }
        Ok(())
    }

    fn emit_block(&mut self, block: &Block) -> Result<()> {
        let label = self.label(block);
        self.start_block(label)?;
        trace!("{} -> %{} ({} insts)", block.id, label, block.insts.len());
        for inst in &block.insts {
            assert!(self.block_open, "BUG: instruction after a jump in {}", block.id);
            self.emit_inst(inst)?;
        }
        Ok(())
    }

    fn emit_if(&mut self, node: &IfNode) -> Result<()> {
        let cond = self.src(node.condition);
        let header = self.builder.id();
        self.start_block(header)?;

        let endif = self.builder.id();
        let then_label = first_block(&node.then_body).map_or(endif, |b| self.label(b));
        let else_label = first_block(&node.else_body).map_or(endif, |b| self.label(b));

        self.builder.selection_merge(endif, SelectionControl::NONE)?;
        self.builder.branch_conditional(cond, then_label, else_label, [])?;
        self.block_open = false;

        self.emit_cf_list(&node.then_body)?;
        if !node.else_body.is_empty() {
            if self.block_open {
                self.branch(endif)?;
            }
            self.emit_cf_list(&node.else_body)?;
        }

        self.start_block(endif)
    }

    fn emit_loop(&mut self, node: &LoopNode) -> Result<()> {
        let header = self.builder.id();
        self.start_block(header)?;

        let break_label = self.builder.id();
        let cont_label = self.builder.id();
        let Some(body) = first_block(&node.body) else {
            panic!("BUG: empty loop body");
        };
        let body_label = self.label(body);

        self.builder
            .loop_merge(break_label, cont_label, LoopControl::NONE, [])?;
        self.branch(body_label)?;

        let saved_break = self.loop_break.replace(break_label);
        let saved_cont = self.loop_cont.replace(cont_label);
        self.emit_cf_list(&node.body)?;
        self.loop_break = saved_break;
        self.loop_cont = saved_cont;

        // The continue construct only jumps back to the header.
        self.start_block(cont_label)?;
        self.branch(header)?;

        self.start_block(break_label)
    }

    pub fn emit_cf_list(&mut self, nodes: &[CfNode]) -> Result<()> {
        for node in nodes {
            match node {
                CfNode::Block(block) => self.emit_block(block)?,
                CfNode::If(if_node) => self.emit_if(if_node)?,
                CfNode::Loop(loop_node) => self.emit_loop(loop_node)?,
            }
        }
        Ok(())
    }

    /// A void function whose only block is `OpKill`. Fragment shaders call
    /// it for `discard` so the caller's blocks keep structured terminators.
    pub fn emit_discard_function(&mut self) -> Result<()> {
        let void = self.void_type();
        let fn_type = self.builder.type_function(void, []);
        let func = self.builder.begin_function(void, None, FunctionControl::NONE, fn_type)?;
        self.name(func, "discard");
        self.builder.begin_block(None)?;
        self.builder.kill()?;
        self.builder.end_function()?;
        self.discard_fn = Some(func);
        Ok(())
    }

    /// Emit `main` and return its id.
    pub fn emit_main(&mut self) -> Result<Word> {
        let shader = self.shader;
        if shader.any_inst(|inst| matches!(inst.kind, InstKind::Intrinsic(Intrinsic::Discard))) {
            self.emit_discard_function()?;
        }

        let void = self.void_type();
        let fn_type = self.builder.type_function(void, []);
        let main = self.builder.begin_function(void, None, FunctionControl::NONE, fn_type)?;
        self.name(main, "main");

        // Registers and temporaries live in the first block.
        self.builder.begin_block(None)?;
        self.block_open = true;
        self.emit_locals();

        self.labels = (0..shader.num_blocks).map(|_| self.builder.id()).collect();
        self.emit_cf_list(&shader.body)?;

        if self.block_open {
            // Geometry shaders copy transform feedback outputs at each vertex instead.
            if matches!(self.stage, Stage::Vertex | Stage::TessEval) {
                self.emit_stream_output_copies()?;
            }
            self.builder.ret()?;
            self.block_open = false;
        }
        self.builder.end_function()?;
        Ok(main)
    }
}
