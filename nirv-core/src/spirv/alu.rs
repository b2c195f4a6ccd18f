//! ALU instructions, constants and undefs.
//!
//! Sources are stored as unsigned integers (or booleans) and reinterpreted
//! per operation: each source is bitcast to the numeric type the op reads,
//! and the result is bitcast back to unsigned before it is recorded.

use rspirv::dr::{self, InsertPoint, Operand};
use rspirv::spirv::{Capability, Decoration, FPRoundingMode, GLOp, Op, Word};

use super::context::Ctx;
use crate::error::Result;
use crate::ir::{AluInst, AluOp, AluSrc, BaseType, Def};

/// One lowered source: `raw` is the stored representation, `typed` the
/// bitcast the operation reads.
#[derive(Debug, Clone, Copy)]
struct Src {
    raw: Word,
    typed: Word,
    bit_size: u8,
    components: u8,
}

fn unop_op(op: AluOp) -> Option<Op> {
    use AluOp::*;
    Some(match op {
        Ineg => Op::SNegate,
        Fneg => Op::FNegate,
        Fddx => Op::DPdx,
        FddxCoarse => Op::DPdxCoarse,
        FddxFine => Op::DPdxFine,
        Fddy => Op::DPdy,
        FddyCoarse => Op::DPdyCoarse,
        FddyFine => Op::DPdyFine,
        F2i => Op::ConvertFToS,
        F2u => Op::ConvertFToU,
        I2f => Op::ConvertSToF,
        U2f => Op::ConvertUToF,
        I2i => Op::SConvert,
        U2u => Op::UConvert,
        F2f => Op::FConvert,
        BitfieldReverse => Op::BitReverse,
        BitCount => Op::BitCount,
        _ => return None,
    })
}

fn builtin_unop(op: AluOp) -> Option<GLOp> {
    use AluOp::*;
    Some(match op {
        Iabs => GLOp::SAbs,
        Fabs => GLOp::FAbs,
        Fsqrt => GLOp::Sqrt,
        Frsq => GLOp::InverseSqrt,
        Flog2 => GLOp::Log2,
        Fexp2 => GLOp::Exp2,
        Ffract => GLOp::Fract,
        Ffloor => GLOp::Floor,
        Fceil => GLOp::Ceil,
        Ftrunc => GLOp::Trunc,
        FroundEven => GLOp::RoundEven,
        Fsign => GLOp::FSign,
        Isign => GLOp::SSign,
        Fsin => GLOp::Sin,
        Fcos => GLOp::Cos,
        UfindMsb => GLOp::FindUMsb,
        FindLsb => GLOp::FindILsb,
        IfindMsb => GLOp::FindSMsb,
        _ => return None,
    })
}

fn binop_op(op: AluOp) -> Option<Op> {
    use AluOp::*;
    Some(match op {
        Iadd => Op::IAdd,
        Isub => Op::ISub,
        Imul => Op::IMul,
        Idiv => Op::SDiv,
        Udiv => Op::UDiv,
        Umod => Op::UMod,
        Imod => Op::SMod,
        Irem => Op::SRem,
        Fadd => Op::FAdd,
        Fsub => Op::FSub,
        Fmul => Op::FMul,
        Fdiv => Op::FDiv,
        Fmod => Op::FMod,
        Frem => Op::FRem,
        Ilt => Op::SLessThan,
        Ige => Op::SGreaterThanEqual,
        Ult => Op::ULessThan,
        Uge => Op::UGreaterThanEqual,
        Flt => Op::FOrdLessThan,
        Fge => Op::FOrdGreaterThanEqual,
        Fdot => Op::Dot,
        _ => return None,
    })
}

/// Integer op and its boolean counterpart.
fn logical_binop(op: AluOp) -> Option<(Op, Op)> {
    use AluOp::*;
    Some(match op {
        Iand => (Op::BitwiseAnd, Op::LogicalAnd),
        Ior => (Op::BitwiseOr, Op::LogicalOr),
        Ieq => (Op::IEqual, Op::LogicalEqual),
        Ine => (Op::INotEqual, Op::LogicalNotEqual),
        Ixor => (Op::BitwiseXor, Op::LogicalNotEqual),
        _ => return None,
    })
}

fn builtin_binop(op: AluOp) -> Option<GLOp> {
    use AluOp::*;
    Some(match op {
        Fmin => GLOp::FMin,
        Fmax => GLOp::FMax,
        Imin => GLOp::SMin,
        Imax => GLOp::SMax,
        Umin => GLOp::UMin,
        Umax => GLOp::UMax,
        _ => return None,
    })
}

fn shift_op(op: AluOp) -> Option<Op> {
    match op {
        AluOp::Ishl => Some(Op::ShiftLeftLogical),
        AluOp::Ishr => Some(Op::ShiftRightArithmetic),
        AluOp::Ushr => Some(Op::ShiftRightLogical),
        _ => None,
    }
}

impl Ctx<'_> {
    /// Apply a source swizzle to the stored value.
    fn alu_src_raw(&mut self, src: &AluSrc) -> Result<(Word, u8, u8)> {
        let value = self.value(src.value);
        let Some(swizzle) = &src.swizzle else {
            return Ok((value.id, value.bit_size, value.components));
        };
        assert!(!swizzle.is_empty(), "BUG: empty swizzle on {}", src.value);

        let used = swizzle.len() as u8;
        let identity = used == value.components && swizzle.iter().enumerate().all(|(i, &c)| c as usize == i);
        if identity {
            return Ok((value.id, value.bit_size, value.components));
        }

        let id = if used == 1 {
            let ty = self.value_type(value.bit_size, 1);
            self.extract(ty, value.id, swizzle[0] as u32)?
        } else if value.components == 1 {
            let ty = self.value_type(value.bit_size, used);
            self.construct(ty, &vec![value.id; used as usize])?
        } else {
            let ty = self.value_type(value.bit_size, used);
            let mut operands = vec![Operand::IdRef(value.id), Operand::IdRef(value.id)];
            operands.extend(swizzle.iter().map(|&c| Operand::LiteralBit32(c as u32)));
            self.emit(Op::VectorShuffle, ty, operands)?
        };
        Ok((id, value.bit_size, used))
    }

    fn alu_src(&mut self, op: AluOp, index: usize, src: &AluSrc) -> Result<Src> {
        let (raw, bit_size, components) = self.alu_src_raw(src)?;
        let typed = if bit_size == 1 {
            raw
        } else {
            match op.input_type(index) {
                BaseType::Bool => panic!("BUG: {:?} reads a {}-bit value as a boolean", op, bit_size),
                BaseType::Int => self.bitcast_to_ivec(raw, bit_size, components)?,
                BaseType::Uint => raw,
                BaseType::Float => self.bitcast_to_fvec(raw, bit_size, components)?,
            }
        };
        Ok(Src {
            raw,
            typed,
            bit_size,
            components,
        })
    }

    fn alu_dest_type(&mut self, base: BaseType, def: &Def) -> Word {
        if def.bit_size == 1 {
            self.bvec_type(def.components)
        } else {
            self.alu_type(base, def.bit_size, def.components)
        }
    }

    pub fn emit_alu(&mut self, def: &Def, alu: &AluInst) -> Result<()> {
        let op = alu.op;
        let srcs = alu
            .srcs
            .iter()
            .enumerate()
            .map(|(i, s)| self.alu_src(op, i, s))
            .collect::<Result<Vec<_>>>()?;
        let src = |i: usize| match srcs.get(i) {
            Some(s) => s.typed,
            None => panic!("BUG: {:?} is missing source {}", op, i),
        };

        let mut out_base = op.output_type();
        let dest_type = self.alu_dest_type(out_base, def);
        let bits = def.bit_size;
        let comps = def.components;

        if matches!(
            op,
            AluOp::FddxCoarse | AluOp::FddxFine | AluOp::FddyCoarse | AluOp::FddyFine
        ) {
            self.cap(Capability::DerivativeControl);
        }

        let result = if op == AluOp::Mov {
            src(0)
        } else if let Some(spv) = unop_op(op) {
            self.unop(spv, dest_type, src(0))?
        } else if let Some(glop) = builtin_unop(op) {
            self.builtin(glop, dest_type, &[src(0)])?
        } else if let Some(spv) = binop_op(op) {
            self.binop(spv, dest_type, src(0), src(1))?
        } else if let Some((int_op, bool_op)) = logical_binop(op) {
            let spv = if srcs[0].bit_size == 1 { bool_op } else { int_op };
            self.binop(spv, dest_type, src(0), src(1))?
        } else if let Some(glop) = builtin_binop(op) {
            self.builtin(glop, dest_type, &[src(0), src(1)])?
        } else if let Some(spv) = shift_op(op) {
            // Shift counts wrap at the operand width.
            let count = srcs[1];
            let shift_base = op.input_type(1);
            let shift_type = self.alu_type(shift_base, count.bit_size, comps);
            let mask = match shift_base {
                BaseType::Int => self.ivec_const(count.bit_size, comps, bits as i64 - 1),
                _ => self.uvec_const(count.bit_size, comps, bits as u64 - 1),
            };
            let count = self.binop(Op::BitwiseAnd, shift_type, count.typed, mask)?;
            self.binop(spv, dest_type, src(0), count)?
        } else {
            match op {
                AluOp::F2f16Rtz => {
                    let id = self.unop(Op::FConvert, dest_type, src(0))?;
                    self.builder.decorate(
                        id,
                        Decoration::FPRoundingMode,
                        [Operand::FPRoundingMode(FPRoundingMode::RTZ)],
                    );
                    id
                }
                AluOp::Inot if bits == 1 => self.unop(Op::LogicalNot, dest_type, src(0))?,
                AluOp::Inot => self.unop(Op::Not, dest_type, src(0))?,
                AluOp::B2i => {
                    let one = self.ivec_const(bits, comps, 1);
                    let zero = self.ivec_const(bits, comps, 0);
                    self.select(dest_type, src(0), one, zero)?
                }
                AluOp::B2f => {
                    let one = self.fvec_const(bits, comps, 1.0);
                    let zero = self.fvec_const(bits, comps, 0.0);
                    self.select(dest_type, src(0), one, zero)?
                }
                AluOp::PackHalf2x16 => {
                    let ty = self.uvec_type(bits, comps);
                    self.builtin(GLOp::PackHalf2x16, ty, &[src(0)])?
                }
                AluOp::Unpack64_2x32 => {
                    let ty = self.uvec_type(bits, comps);
                    self.builtin(GLOp::UnpackDouble2x32, ty, &[src(0)])?
                }
                AluOp::UnpackHalf2x16 | AluOp::Pack64_2x32 => {
                    let glop = if op == AluOp::UnpackHalf2x16 {
                        GLOp::UnpackHalf2x16
                    } else {
                        GLOp::PackDouble2x32
                    };
                    out_base = BaseType::Float;
                    let ty = self.fvec_type(bits, comps);
                    self.builtin(glop, ty, &[src(0)])?
                }
                AluOp::Frcp => {
                    let one = self.fvec_const(bits, comps, 1.0);
                    self.binop(Op::FDiv, dest_type, one, src(0))?
                }
                AluOp::F2b1 => {
                    let zero = self.fvec_const(srcs[0].bit_size, comps, 0.0);
                    self.binop(Op::FOrdNotEqual, dest_type, src(0), zero)?
                }
                AluOp::I2b1 => {
                    let zero = self.ivec_const(srcs[0].bit_size, comps, 0);
                    self.binop(Op::INotEqual, dest_type, src(0), zero)?
                }
                // x != x and x == x reduce to NaN checks.
                AluOp::Fneu if srcs[0].raw == srcs[1].raw => self.unop(Op::IsNan, dest_type, src(0))?,
                AluOp::Fneu => self.binop(Op::FUnordNotEqual, dest_type, src(0), src(1))?,
                AluOp::Feq if srcs[0].raw == srcs[1].raw => {
                    let nan = self.unop(Op::IsNan, dest_type, src(0))?;
                    self.unop(Op::LogicalNot, dest_type, nan)?
                }
                AluOp::Feq => self.binop(Op::FOrdEqual, dest_type, src(0), src(1))?,
                AluOp::Flrp => self.builtin(GLOp::FMix, dest_type, &[src(0), src(1), src(2)])?,
                AluOp::Bcsel => self.select(dest_type, src(0), src(1), src(2))?,
                AluOp::PackHalf2x16Split => {
                    let ty = self.fvec_type(32, 2);
                    let fvec = self.construct(ty, &[src(0), src(1)])?;
                    self.builtin(GLOp::PackHalf2x16, dest_type, &[fvec])?
                }
                AluOp::Vec => {
                    let parts = srcs.iter().map(|s| s.typed).collect::<Vec<_>>();
                    assert!(
                        (2..=4).contains(&parts.len()),
                        "BUG: vec with {} sources",
                        parts.len()
                    );
                    self.construct(dest_type, &parts)?
                }
                AluOp::UbitfieldExtract => {
                    self.triop(Op::BitFieldUExtract, dest_type, src(0), src(1), src(2))?
                }
                AluOp::IbitfieldExtract => {
                    self.triop(Op::BitFieldSExtract, dest_type, src(0), src(1), src(2))?
                }
                AluOp::BitfieldInsert => self.emit(
                    Op::BitFieldInsert,
                    dest_type,
                    vec![
                        Operand::IdRef(src(0)),
                        Operand::IdRef(src(1)),
                        Operand::IdRef(src(2)),
                        Operand::IdRef(src(3)),
                    ],
                )?,
                AluOp::Pack32_2x16Split | AluOp::Pack64_2x32Split => {
                    self.emit_pack_split(op, def, dest_type, srcs[0], srcs[1])?
                }
                AluOp::Unpack32_2x16SplitX
                | AluOp::Unpack64_2x32SplitX
                | AluOp::Unpack32_2x16SplitY
                | AluOp::Unpack64_2x32SplitY => self.emit_unpack_split(op, def, dest_type, srcs[0])?,
                AluOp::Fdph | AluOp::Seq | AluOp::Sne | AluOp::Slt | AluOp::Sge => {
                    panic!("BUG: {:?} must be lowered before reaching the backend", op)
                }
                _ => panic!("BUG: unsupported ALU op {:?}", op),
            }
        };

        if alu.exact {
            self.decorate(result, Decoration::NoContraction);
        }
        self.store_dest(def, result, out_base)?;
        Ok(())
    }

    /// Join two narrow halves into one wide value per component.
    fn emit_pack_split(&mut self, op: AluOp, def: &Def, dest_type: Word, lo: Src, hi: Src) -> Result<Word> {
        let base = op.input_type(0);
        if def.components <= 2 {
            let vec_type = self.alu_type(base, lo.bit_size, def.components * 2);
            let joined = if def.components == 1 {
                self.construct(vec_type, &[lo.typed, hi.typed])?
            } else {
                let mut parts = Vec::with_capacity(4);
                for i in 0..def.components as u32 {
                    let scalar = self.alu_type(base, lo.bit_size, 1);
                    parts.push(self.extract(scalar, lo.typed, i)?);
                    parts.push(self.extract(scalar, hi.typed, i)?);
                }
                self.construct(vec_type, &parts)?
            };
            return self.bitcast(dest_type, joined);
        }

        let scalar_type = self.alu_type(base, lo.bit_size, 1);
        let pair_type = self.alu_type(base, lo.bit_size, 2);
        let dest_scalar = self.alu_type(op.output_type(), def.bit_size, 1);
        let mut parts = Vec::with_capacity(lo.components as usize);
        for i in 0..lo.components as u32 {
            let a = self.extract(scalar_type, lo.typed, i)?;
            let b = self.extract(scalar_type, hi.typed, i)?;
            let pair = self.construct(pair_type, &[a, b])?;
            parts.push(self.bitcast(dest_scalar, pair)?);
        }
        self.construct(dest_type, &parts)
    }

    /// Take the low (`x`) or high (`y`) half of each wide component.
    fn emit_unpack_split(&mut self, op: AluOp, def: &Def, dest_type: Word, src: Src) -> Result<Word> {
        let base = op.input_type(0);
        let half = matches!(op, AluOp::Unpack32_2x16SplitY | AluOp::Unpack64_2x32SplitY) as u32;
        let pair_type = self.alu_type(base, def.bit_size, 2);
        if def.components == 1 {
            let pair = self.bitcast(pair_type, src.typed)?;
            return self.extract(dest_type, pair, half);
        }

        let wide_scalar = self.alu_type(base, src.bit_size, 1);
        let narrow_scalar = self.alu_type(base, def.bit_size, 1);
        let mut parts = Vec::with_capacity(src.components as usize);
        for i in 0..src.components as u32 {
            let wide = self.extract(wide_scalar, src.typed, i)?;
            let pair = self.bitcast(pair_type, wide)?;
            parts.push(self.extract(narrow_scalar, pair, half)?);
        }
        self.construct(dest_type, &parts)
    }

    pub fn emit_load_const(&mut self, def: &Def, literals: &[u64]) {
        assert_eq!(
            literals.len(),
            def.components as usize,
            "BUG: constant {} has {} literals for {} components",
            def.value,
            literals.len(),
            def.components
        );
        let id = self.value_const(def.bit_size, literals);
        self.write_value(def, id);
        self.mark_const(def.value);
    }

    pub fn emit_undef(&mut self, def: &Def) {
        let ty = self.value_type(def.bit_size, def.components);
        let id = self.builder.id();
        let inst = dr::Instruction::new(Op::Undef, Some(ty), Some(id), vec![]);
        self.builder.insert_types_global_values(InsertPoint::End, inst);
        self.write_value(def, id);
    }
}
