//! Texture instructions: sampling, fetches, gathers and queries.

use rspirv::dr::Operand;
use rspirv::spirv::{Capability, Decoration, ImageOperands, Op, StorageClass, Word};

use super::context::{Ctx, SamplerBinding};
use crate::error::Result;
use crate::ir::{BaseType, Def, ImageDim, Stage, TexInst, TexOffset, TexOp, ValueId};

/// Image operands in the order SPIR-V requires (ascending mask bit).
#[derive(Debug, Default)]
struct TexOperands {
    bias: Option<Word>,
    lod: Option<Word>,
    grad: Option<(Word, Word)>,
    const_offset: Option<Word>,
    offset: Option<Word>,
    sample: Option<Word>,
    min_lod: Option<Word>,
}

impl TexOperands {
    fn encode(&self) -> Vec<Operand> {
        let mut mask = ImageOperands::NONE;
        let mut ids = Vec::new();
        if let Some(bias) = self.bias {
            mask |= ImageOperands::BIAS;
            ids.push(bias);
        }
        if let Some(lod) = self.lod {
            mask |= ImageOperands::LOD;
            ids.push(lod);
        }
        if let Some((dx, dy)) = self.grad {
            mask |= ImageOperands::GRAD;
            ids.extend([dx, dy]);
        }
        if let Some(offset) = self.const_offset {
            mask |= ImageOperands::CONST_OFFSET;
            ids.push(offset);
        }
        if let Some(offset) = self.offset {
            mask |= ImageOperands::OFFSET;
            ids.push(offset);
        }
        if let Some(sample) = self.sample {
            mask |= ImageOperands::SAMPLE;
            ids.push(sample);
        }
        if let Some(min_lod) = self.min_lod {
            mask |= ImageOperands::MIN_LOD;
            ids.push(min_lod);
        }
        if mask.is_empty() {
            return Vec::new();
        }
        let mut operands = vec![Operand::ImageOperands(mask)];
        operands.extend(ids.into_iter().map(Operand::IdRef));
        operands
    }

    fn explicit_lod(&self) -> bool {
        self.lod.is_some() || self.grad.is_some()
    }
}

fn sample_op(explicit: bool, dref: bool, proj: bool, sparse: bool) -> Op {
    match (sparse, proj, dref, explicit) {
        (false, false, false, false) => Op::ImageSampleImplicitLod,
        (false, false, false, true) => Op::ImageSampleExplicitLod,
        (false, false, true, false) => Op::ImageSampleDrefImplicitLod,
        (false, false, true, true) => Op::ImageSampleDrefExplicitLod,
        (false, true, false, false) => Op::ImageSampleProjImplicitLod,
        (false, true, false, true) => Op::ImageSampleProjExplicitLod,
        (false, true, true, false) => Op::ImageSampleProjDrefImplicitLod,
        (false, true, true, true) => Op::ImageSampleProjDrefExplicitLod,
        (true, false, false, false) => Op::ImageSparseSampleImplicitLod,
        (true, false, false, true) => Op::ImageSparseSampleExplicitLod,
        (true, false, true, false) => Op::ImageSparseSampleDrefImplicitLod,
        (true, false, true, true) => Op::ImageSparseSampleDrefExplicitLod,
        (true, true, false, false) => Op::ImageSparseSampleProjImplicitLod,
        (true, true, false, true) => Op::ImageSparseSampleProjExplicitLod,
        (true, true, true, false) => Op::ImageSparseSampleProjDrefImplicitLod,
        (true, true, true, true) => Op::ImageSparseSampleProjDrefExplicitLod,
    }
}

/// Dims that accept a lod operand. Rect images are declared 2D.
fn lod_allowed(dim: ImageDim) -> bool {
    matches!(
        dim,
        ImageDim::D1 | ImageDim::D2 | ImageDim::D3 | ImageDim::Cube | ImageDim::Rect
    )
}

impl Ctx<'_> {
    /// The sampler binding covering `texture_index`, and the array element
    /// selected within it (if the binding is an array).
    fn sampler_for(&mut self, tex: &TexInst) -> (SamplerBinding, Option<Word>) {
        let Some((&base, &binding)) = self.samplers.range(..=tex.texture_index).next_back() else {
            panic!("BUG: no sampler bound at or below index {}", tex.texture_index);
        };
        let dynamic = tex.texture_offset.map(|offset| self.src(offset));
        let element = if base == tex.texture_index {
            match dynamic {
                Some(offset) => Some(offset),
                None if binding.array_len > 0 => Some(self.const_uint(32, 0)),
                None => None,
            }
        } else {
            let index = tex.texture_index - base;
            assert!(
                index < binding.array_len.max(1) && binding.array_len > 0,
                "BUG: texture index {} is outside the sampler at {}",
                tex.texture_index,
                base
            );
            Some(dynamic.unwrap_or_else(|| self.const_uint(32, index as u64)))
        };
        (binding, element)
    }

    fn tex_float(&mut self, value: ValueId) -> Result<Word> {
        let v = self.value(value);
        self.bitcast_to_fvec(v.id, v.bit_size, v.components)
    }

    fn tex_int(&mut self, value: ValueId) -> Result<Word> {
        let v = self.value(value);
        self.bitcast_to_ivec(v.id, v.bit_size, v.components)
    }

    pub fn emit_tex(&mut self, def: &Def, tex: &TexInst) -> Result<()> {
        let (binding, element) = self.sampler_for(tex);
        let image = binding.image;
        let fetch = tex.op.is_fetch();

        let coord = match tex.coord {
            Some(coord) if fetch => Some(self.tex_int(coord)?),
            Some(coord) => Some(self.tex_float(coord)?),
            None => None,
        };
        let coord_components = tex.coord.map_or(0, |c| self.value(c).components);
        let proj = tex.projector.map(|p| self.tex_float(p)).transpose()?;
        let bias = tex.bias.map(|b| self.tex_float(b)).transpose()?;
        let mut min_lod = tex.min_lod.map(|m| self.tex_float(m)).transpose()?;
        let mut lod = match tex.lod {
            Some(lod) if fetch || tex.op == TexOp::Txs => Some(self.tex_int(lod)?),
            Some(lod) => Some(self.tex_float(lod)?),
            None => None,
        };
        let sample = tex.ms_index.map(|s| self.tex_int(s)).transpose()?;
        let dref = tex.comparator.map(|c| self.tex_float(c)).transpose()?;
        let dx = tex.ddx.map(|d| self.tex_float(d)).transpose()?;
        let dy = tex.ddy.map(|d| self.tex_float(d)).transpose()?;
        let (const_offset, offset) = match &tex.offset {
            Some(TexOffset::Const(parts)) => {
                let ids = parts.iter().map(|&p| self.const_int(32, p as i64)).collect::<Vec<_>>();
                let id = if ids.len() > 1 {
                    let ty = self.ivec_type(32, ids.len() as u8);
                    self.builder.constant_composite(ty, ids)
                } else {
                    ids[0]
                };
                (Some(id), None)
            }
            Some(TexOffset::Dynamic(value)) => (None, Some(self.tex_int(*value)?)),
            None => (None, None),
        };

        let mut sampler = binding.var;
        if let Some(element) = element {
            let ptr_type = self.pointer_type(StorageClass::UniformConstant, binding.sampled_type);
            sampler = self.access_chain(ptr_type, sampler, &[element])?;
        }
        let load = self.load(binding.sampled_type, sampler)?;

        let dest_type = self.alu_type(tex.dest_base, def.bit_size, def.components);
        if tex.op.is_query() {
            self.cap(Capability::ImageQuery);
        }

        if !lod_allowed(image.dim) {
            lod = None;
        } else if self.stage != Stage::Fragment && tex.op == TexOp::Tex && self.options.explicit_lod && lod.is_none() {
            lod = Some(self.const_float(32, 0.0));
        }

        match tex.op {
            TexOp::Txs => {
                let img = self.unop(Op::Image, binding.image_type, load)?;
                let result = if lod_allowed(image.dim) {
                    let lod = match lod {
                        Some(lod) => lod,
                        None => self.const_uint(32, 0),
                    };
                    self.binop(Op::ImageQuerySizeLod, dest_type, img, lod)?
                } else {
                    self.unop(Op::ImageQuerySize, dest_type, img)?
                };
                self.store_dest(def, result, tex.dest_base)?;
                return Ok(());
            }
            TexOp::QueryLevels | TexOp::TextureSamples => {
                let img = self.unop(Op::Image, binding.image_type, load)?;
                let op = if tex.op == TexOp::QueryLevels {
                    Op::ImageQueryLevels
                } else {
                    Op::ImageQuerySamples
                };
                let result = self.unop(op, dest_type, img)?;
                self.store_dest(def, result, tex.dest_base)?;
                return Ok(());
            }
            _ => {}
        }

        let Some(mut coord) = coord else {
            panic!("BUG: {:?} without coordinates", tex.op);
        };
        if let Some(proj) = proj {
            let float_type = self.float_type(32);
            let mut parts = Vec::with_capacity(coord_components as usize + 1);
            if coord_components == 1 {
                parts.push(coord);
            } else {
                for i in 0..coord_components as u32 {
                    parts.push(self.extract(float_type, coord, i)?);
                }
            }
            parts.push(proj);
            let ty = self.fvec_type(32, parts.len() as u8);
            coord = self.construct(ty, &parts)?;
        }

        if tex.op == TexOp::Lod {
            let result = self.binop(Op::ImageQueryLod, dest_type, load, coord)?;
            self.store_dest(def, result, tex.dest_base)?;
            return Ok(());
        }

        let sparse = tex.is_sparse();
        if sparse {
            self.require_sparse();
        }
        let shadow_sample = dref.is_some() && tex.op != TexOp::Tg4;
        let actual_type = if shadow_sample {
            self.float_type(32)
        } else {
            self.alu_type(tex.dest_base, 32, def.components)
        };
        let result_type = if sparse {
            let u32_type = self.uint_type(32);
            self.struct_type(&[u32_type, actual_type])
        } else {
            actual_type
        };

        if offset.is_some() {
            self.cap(Capability::ImageGatherExtended);
        }
        if min_lod.is_some() {
            self.cap(Capability::MinLod);
        }

        let result = match tex.op {
            TexOp::Txf | TexOp::TxfMs => {
                let img = self.unop(Op::Image, binding.image_type, load)?;
                let operands = TexOperands {
                    lod,
                    const_offset,
                    offset,
                    sample,
                    ..Default::default()
                };
                let op = if sparse { Op::ImageSparseFetch } else { Op::ImageFetch };
                let mut args = vec![Operand::IdRef(img), Operand::IdRef(coord)];
                args.extend(operands.encode());
                self.emit(op, result_type, args)?
            }
            TexOp::Tg4 => {
                if const_offset.is_some() {
                    self.cap(Capability::ImageGatherExtended);
                }
                let operands = TexOperands {
                    lod,
                    const_offset,
                    offset,
                    sample,
                    ..Default::default()
                };
                let mut args = vec![Operand::IdRef(load), Operand::IdRef(coord)];
                let op = match dref {
                    Some(dref) => {
                        args.push(Operand::IdRef(dref));
                        if sparse { Op::ImageSparseDrefGather } else { Op::ImageDrefGather }
                    }
                    None => {
                        let component = self.const_uint(32, tex.component as u64);
                        args.push(Operand::IdRef(component));
                        if sparse { Op::ImageSparseGather } else { Op::ImageGather }
                    }
                };
                args.extend(operands.encode());
                self.emit(op, result_type, args)?
            }
            _ => {
                if tex.op == TexOp::Txl {
                    min_lod = None;
                }
                let grad = match (dx, dy) {
                    (Some(dx), Some(dy)) => Some((dx, dy)),
                    (None, None) => None,
                    _ => panic!("BUG: texture gradient with only one derivative"),
                };
                let operands = TexOperands {
                    bias,
                    lod,
                    grad,
                    const_offset,
                    offset,
                    min_lod,
                    ..Default::default()
                };
                let op = sample_op(operands.explicit_lod(), dref.is_some(), proj.is_some(), sparse);
                let mut args = vec![Operand::IdRef(load), Operand::IdRef(coord)];
                if let Some(dref) = dref {
                    args.push(Operand::IdRef(dref));
                }
                args.extend(operands.encode());
                self.emit(op, result_type, args)?
            }
        };

        if binding.mediump {
            self.decorate(result, Decoration::RelaxedPrecision);
        }

        let mut result = match tex.residency {
            Some(residency) => {
                let u32_type = self.uint_type(32);
                let code = self.extract(u32_type, result, 0)?;
                self.write_raw(residency, 32, 1, code);
                self.extract(actual_type, result, 1)?
            }
            None => result,
        };
        if shadow_sample && def.components > 1 {
            let ty = self.fvec_type(32, def.components);
            result = self.construct(ty, &vec![result; def.components as usize])?;
        }
        if def.bit_size != 32 {
            result = self.unop(Op::FConvert, dest_type, result)?;
        }
        let base = if shadow_sample { BaseType::Float } else { tex.dest_base };
        self.store_dest(def, result, base)?;
        Ok(())
    }
}
