//! Shader builder.
//!
//! Provides a safe API for constructing structured shaders, ensuring:
//! - Every control-flow list starts with a block
//! - Nothing follows a jump in the same block
//! - Jumps only appear inside loops
//! - Every `if` and `loop` is closed before finishing
//!
//! # Example
//!
//! ```ignore
//! let mut b = ShaderBuilder::new(StageInfo::compute([1, 1, 1]));
//! let out = b.add_variable(Variable::new("out", VariableMode::ShaderOut, Type::uint(32)));
//! let c = b.imm_u32(42)?;
//! let ptr = b.deref_var(out)?;
//! b.store_deref(ptr, c, 0x1)?;
//! let shader = b.finish()?;
//! ```

use std::collections::HashMap;

use thiserror::Error;

use super::{
    AluInst, AluOp, AluSrc, BaseType, Block, BlockId, CfNode, Def, Deref, DerefKind, IfNode, Inst, InstKind, Intrinsic,
    JumpKind, LoopNode, RegisterDecl, RegisterId, Shader, StageInfo, StreamOutput, SystemValue, TexInst, Type,
    ValueId, Variable, VariableId,
};

/// Error during shader building.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("Instruction added after a jump in block {0}")]
    InstAfterJump(BlockId),
    #[error("Jump outside of any loop")]
    JumpOutsideLoop,
    #[error("No open if to add an else branch to or to close")]
    NotInIf,
    #[error("If already has an else branch")]
    DuplicateElse,
    #[error("No open loop to close")]
    NotInLoop,
    #[error("{0} control-flow construct(s) left open")]
    UnclosedConstructs(usize),
    #[error("Unknown register {0}")]
    UnknownRegister(RegisterId),
    #[error("Unknown variable {0}")]
    UnknownVariable(VariableId),
    #[error("{0} is not a deref")]
    NotADeref(ValueId),
    #[error("Invalid deref of {value}: {reason}")]
    InvalidDeref { value: ValueId, reason: String },
    #[error("Constant without components")]
    EmptyConstant,
}

type Result<T> = std::result::Result<T, BuilderError>;

/// One level of the open control-flow stack.
enum Frame {
    Root(Vec<CfNode>),
    Then {
        condition: ValueId,
        nodes: Vec<CfNode>,
    },
    Else {
        condition: ValueId,
        then_body: Vec<CfNode>,
        nodes: Vec<CfNode>,
    },
    Loop(Vec<CfNode>),
}

impl Frame {
    fn nodes_mut(&mut self) -> &mut Vec<CfNode> {
        match self {
            Frame::Root(nodes) | Frame::Loop(nodes) => nodes,
            Frame::Then { nodes, .. } | Frame::Else { nodes, .. } => nodes,
        }
    }
}

pub struct ShaderBuilder {
    name: Option<String>,
    info: StageInfo,
    variables: Vec<Variable>,
    registers: Vec<RegisterDecl>,
    scratch_size: u32,
    streamout: Vec<StreamOutput>,
    next_value: u32,
    next_block: u32,
    /// Pointee type of every deref value built so far.
    deref_types: HashMap<ValueId, (VariableId, Type)>,
    stack: Vec<Frame>,
}

impl ShaderBuilder {
    /// Create a builder with an empty entry block.
    pub fn new(info: StageInfo) -> Self {
        ShaderBuilder {
            name: None,
            info,
            variables: Vec::new(),
            registers: Vec::new(),
            scratch_size: 0,
            streamout: Vec::new(),
            next_value: 0,
            next_block: 1,
            deref_types: HashMap::new(),
            stack: vec![Frame::Root(vec![CfNode::Block(Block {
                id: BlockId(0),
                insts: Vec::new(),
            })])],
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    pub fn set_scratch_size(&mut self, bytes: u32) {
        self.scratch_size = bytes;
    }

    pub fn add_variable(&mut self, var: Variable) -> VariableId {
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(var);
        id
    }

    pub fn add_stream_output(&mut self, output: StreamOutput) -> Result<()> {
        if self.variables.get(output.source.index()).is_none() {
            return Err(BuilderError::UnknownVariable(output.source));
        }
        self.streamout.push(output);
        Ok(())
    }

    pub fn variable_mut(&mut self, id: VariableId) -> Option<&mut Variable> {
        self.variables.get_mut(id.index())
    }

    pub fn add_register(&mut self, bit_size: u8, components: u8) -> RegisterId {
        let id = RegisterId(self.registers.len() as u32);
        self.registers.push(RegisterDecl { bit_size, components });
        id
    }

    /// Allocate a value that is defined by a later instruction, such as a
    /// residency code.
    pub fn alloc_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    fn alloc_block(&mut self) -> Block {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        Block { id, insts: Vec::new() }
    }

    fn top(&mut self) -> &mut Frame {
        match self.stack.last_mut() {
            Some(frame) => frame,
            None => panic!("BUG: shader builder lost its root frame"),
        }
    }

    /// The block new instructions go to, started on demand after an `if` or `loop`.
    fn current_block(&mut self) -> Result<&mut Block> {
        let needs_block = !matches!(self.top().nodes_mut().last(), Some(CfNode::Block(_)));
        if needs_block {
            let block = self.alloc_block();
            self.top().nodes_mut().push(CfNode::Block(block));
        }
        match self.top().nodes_mut().last_mut() {
            Some(CfNode::Block(block)) => {
                if block.insts.last().is_some_and(Inst::is_jump) {
                    return Err(BuilderError::InstAfterJump(block.id));
                }
                Ok(block)
            }
            _ => panic!("BUG: current block was just pushed"),
        }
    }

    fn push(&mut self, kind: InstKind, dest: Option<Def>) -> Result<()> {
        self.current_block()?.insts.push(Inst { dest, kind });
        Ok(())
    }

    fn push_value(&mut self, kind: InstKind, bit_size: u8, components: u8) -> Result<ValueId> {
        // Validate before allocating so a failed push leaves no gap.
        self.current_block()?;
        let value = self.alloc_value();
        self.push(
            kind,
            Some(Def {
                value,
                bit_size,
                components,
            }),
        )?;
        Ok(value)
    }

    // -------------------------------------------------------------------------
    // Constants and ALU
    // -------------------------------------------------------------------------

    pub fn load_const(&mut self, bit_size: u8, components: &[u64]) -> Result<ValueId> {
        if components.is_empty() {
            return Err(BuilderError::EmptyConstant);
        }
        self.push_value(InstKind::LoadConst(components.to_vec()), bit_size, components.len() as u8)
    }

    pub fn imm_u32(&mut self, value: u32) -> Result<ValueId> {
        self.load_const(32, &[value as u64])
    }

    pub fn imm_f32(&mut self, value: f32) -> Result<ValueId> {
        self.load_const(32, &[value.to_bits() as u64])
    }

    pub fn imm_bool(&mut self, value: bool) -> Result<ValueId> {
        self.load_const(1, &[value as u64])
    }

    pub fn undef(&mut self, bit_size: u8, components: u8) -> Result<ValueId> {
        self.push_value(InstKind::Undef, bit_size, components)
    }

    pub fn alu(&mut self, op: AluOp, srcs: Vec<AluSrc>, bit_size: u8, components: u8) -> Result<ValueId> {
        self.push_value(InstKind::Alu(AluInst { op, srcs, exact: false }), bit_size, components)
    }

    /// Shorthand for an ALU op over whole source values.
    pub fn alu_values(&mut self, op: AluOp, srcs: &[ValueId], bit_size: u8, components: u8) -> Result<ValueId> {
        self.alu(op, srcs.iter().copied().map(AluSrc::new).collect(), bit_size, components)
    }

    pub fn alu_exact(&mut self, op: AluOp, srcs: Vec<AluSrc>, bit_size: u8, components: u8) -> Result<ValueId> {
        self.push_value(InstKind::Alu(AluInst { op, srcs, exact: true }), bit_size, components)
    }

    // -------------------------------------------------------------------------
    // Derefs
    // -------------------------------------------------------------------------

    pub fn deref_var(&mut self, var: VariableId) -> Result<ValueId> {
        let ty = self
            .variables
            .get(var.index())
            .and_then(|v| v.ty.clone())
            .ok_or(BuilderError::UnknownVariable(var))?;
        let value = self.push_value(
            InstKind::Deref(Deref {
                var,
                ty: ty.clone(),
                kind: DerefKind::Var,
            }),
            32,
            1,
        )?;
        self.deref_types.insert(value, (var, ty));
        Ok(value)
    }

    pub fn deref_array(&mut self, parent: ValueId, index: ValueId) -> Result<ValueId> {
        let (var, parent_ty) = self.deref_types.get(&parent).cloned().ok_or(BuilderError::NotADeref(parent))?;
        let ty = match parent_ty {
            Type::Array { element, .. } => *element,
            Type::Vector { base, bits, .. } => Type::scalar(base, bits),
            Type::Matrix { bits, rows, .. } => Type::vector(BaseType::Float, bits, rows),
            other => {
                return Err(BuilderError::InvalidDeref {
                    value: parent,
                    reason: format!("cannot index {:?}", other),
                });
            }
        };
        let value = self.push_value(
            InstKind::Deref(Deref {
                var,
                ty: ty.clone(),
                kind: DerefKind::Array { parent, index },
            }),
            32,
            1,
        )?;
        self.deref_types.insert(value, (var, ty));
        Ok(value)
    }

    pub fn deref_struct(&mut self, parent: ValueId, field: u32) -> Result<ValueId> {
        let (var, parent_ty) = self.deref_types.get(&parent).cloned().ok_or(BuilderError::NotADeref(parent))?;
        let ty = match parent_ty {
            Type::Struct { fields, .. } => match fields.get(field as usize) {
                Some(f) => f.ty.clone(),
                None => {
                    return Err(BuilderError::InvalidDeref {
                        value: parent,
                        reason: format!("no field {}", field),
                    });
                }
            },
            other => {
                return Err(BuilderError::InvalidDeref {
                    value: parent,
                    reason: format!("{:?} is not a struct", other),
                });
            }
        };
        let value = self.push_value(
            InstKind::Deref(Deref {
                var,
                ty: ty.clone(),
                kind: DerefKind::Struct { parent, field },
            }),
            32,
            1,
        )?;
        self.deref_types.insert(value, (var, ty));
        Ok(value)
    }

    // -------------------------------------------------------------------------
    // Registers
    // -------------------------------------------------------------------------

    pub fn load_reg(&mut self, reg: RegisterId) -> Result<ValueId> {
        let decl = *self.registers.get(reg.index()).ok_or(BuilderError::UnknownRegister(reg))?;
        self.push_value(InstKind::LoadReg(reg), decl.bit_size, decl.components)
    }

    pub fn store_reg(&mut self, reg: RegisterId, value: ValueId) -> Result<()> {
        if reg.index() >= self.registers.len() {
            return Err(BuilderError::UnknownRegister(reg));
        }
        self.push(InstKind::StoreReg { reg, value }, None)
    }

    // -------------------------------------------------------------------------
    // Intrinsics and textures
    // -------------------------------------------------------------------------

    pub fn intrinsic(&mut self, intrinsic: Intrinsic, bit_size: u8, components: u8) -> Result<ValueId> {
        self.push_value(InstKind::Intrinsic(intrinsic), bit_size, components)
    }

    pub fn intrinsic_void(&mut self, intrinsic: Intrinsic) -> Result<()> {
        self.push(InstKind::Intrinsic(intrinsic), None)
    }

    pub fn load_deref(&mut self, deref: ValueId, bit_size: u8, components: u8) -> Result<ValueId> {
        self.intrinsic(
            Intrinsic::LoadDeref {
                deref,
                access: Default::default(),
            },
            bit_size,
            components,
        )
    }

    pub fn store_deref(&mut self, deref: ValueId, value: ValueId, write_mask: u8) -> Result<()> {
        self.intrinsic_void(Intrinsic::StoreDeref {
            deref,
            value,
            write_mask,
            access: Default::default(),
        })
    }

    pub fn load_system_value(&mut self, value: SystemValue, bit_size: u8, components: u8) -> Result<ValueId> {
        self.intrinsic(Intrinsic::LoadSystemValue { value }, bit_size, components)
    }

    pub fn tex(&mut self, tex: TexInst, bit_size: u8, components: u8) -> Result<ValueId> {
        self.push_value(InstKind::Tex(Box::new(tex)), bit_size, components)
    }

    // -------------------------------------------------------------------------
    // Control flow
    // -------------------------------------------------------------------------

    pub fn jump(&mut self, kind: JumpKind) -> Result<()> {
        if !self.stack.iter().any(|f| matches!(f, Frame::Loop(_))) {
            return Err(BuilderError::JumpOutsideLoop);
        }
        self.push(InstKind::Jump(kind), None)
    }

    pub fn begin_if(&mut self, condition: ValueId) -> Result<()> {
        self.current_block()?;
        let block = self.alloc_block();
        self.stack.push(Frame::Then {
            condition,
            nodes: vec![CfNode::Block(block)],
        });
        Ok(())
    }

    pub fn begin_else(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(Frame::Then { condition, nodes }) => {
                let block = self.alloc_block();
                self.stack.push(Frame::Else {
                    condition,
                    then_body: nodes,
                    nodes: vec![CfNode::Block(block)],
                });
                Ok(())
            }
            Some(frame @ Frame::Else { .. }) => {
                self.stack.push(frame);
                Err(BuilderError::DuplicateElse)
            }
            Some(frame) => {
                self.stack.push(frame);
                Err(BuilderError::NotInIf)
            }
            None => Err(BuilderError::NotInIf),
        }
    }

    pub fn end_if(&mut self) -> Result<()> {
        let node = match self.stack.pop() {
            Some(Frame::Then { condition, nodes }) => IfNode {
                condition,
                then_body: nodes,
                else_body: Vec::new(),
            },
            Some(Frame::Else {
                condition,
                then_body,
                nodes,
            }) => IfNode {
                condition,
                then_body,
                else_body: nodes,
            },
            Some(frame) => {
                self.stack.push(frame);
                return Err(BuilderError::NotInIf);
            }
            None => return Err(BuilderError::NotInIf),
        };
        self.close_construct(CfNode::If(node));
        Ok(())
    }

    pub fn begin_loop(&mut self) -> Result<()> {
        self.current_block()?;
        let block = self.alloc_block();
        self.stack.push(Frame::Loop(vec![CfNode::Block(block)]));
        Ok(())
    }

    pub fn end_loop(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(Frame::Loop(body)) => {
                self.close_construct(CfNode::Loop(LoopNode { body }));
                Ok(())
            }
            Some(frame) => {
                self.stack.push(frame);
                Err(BuilderError::NotInLoop)
            }
            None => Err(BuilderError::NotInLoop),
        }
    }

    /// Append a finished construct to its parent and open the block following it.
    fn close_construct(&mut self, node: CfNode) {
        let block = self.alloc_block();
        let nodes = self.top().nodes_mut();
        nodes.push(node);
        nodes.push(CfNode::Block(block));
    }

    pub fn finish(mut self) -> Result<Shader> {
        if self.stack.len() > 1 {
            return Err(BuilderError::UnclosedConstructs(self.stack.len() - 1));
        }
        let body = match self.stack.pop() {
            Some(Frame::Root(nodes)) => nodes,
            _ => panic!("BUG: shader builder lost its root frame"),
        };
        Ok(Shader {
            name: self.name,
            info: self.info,
            variables: self.variables,
            registers: self.registers,
            body,
            num_values: self.next_value,
            num_blocks: self.next_block,
            scratch_size: self.scratch_size,
            streamout: self.streamout,
        })
    }
}
