//! Cranelift backend: lowers the IR module to native code and emits a
//! relocatable object, or JIT-compiles it to run `main` in process.

#[cfg(feature = "cranelift-backend")]
use std::collections::HashMap;

#[cfg(feature = "cranelift-backend")]
use cranelift::codegen::isa::OwnedTargetIsa;
#[cfg(feature = "cranelift-backend")]
use cranelift::prelude::{
    settings, types, AbiParam, Block, Configurable, FunctionBuilder, FunctionBuilderContext,
    InstBuilder, IntCC, StackSlotData, StackSlotKind, TrapCode, Type as ClifType,
    Value as ClifValue,
};
#[cfg(feature = "cranelift-backend")]
use cranelift::codegen::ir::StackSlot;
#[cfg(feature = "cranelift-backend")]
use cranelift_jit::{JITBuilder, JITModule};
#[cfg(feature = "cranelift-backend")]
use cranelift_module::{FuncId, Linkage, Module as ClifModule};
#[cfg(feature = "cranelift-backend")]
use cranelift_object::{ObjectBuilder, ObjectModule};

use crate::backend::Backend;
use crate::ir::{BinOp, Function as IrFunction, Instruction, Module, Terminator, Type, Value};
use crate::CompileError;

/// Cranelift code generator for the host machine.
pub struct CraneliftBackend {
    target: String,
    optimize: bool,
}

impl CraneliftBackend {
    pub fn new() -> Result<Self, CompileError> {
        Ok(Self {
            target: std::env::consts::ARCH.to_string(),
            optimize: false,
        })
    }

    /// Raises Cranelift's own optimization level alongside the IR passes.
    pub fn with_optimization(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    #[cfg(feature = "cranelift-backend")]
    fn compile_module(&self, module: &Module) -> Result<Vec<u8>, CompileError> {
        let isa = build_native_isa(self.optimize)?;
        let builder = ObjectBuilder::new(
            isa,
            module.name.clone(),
            cranelift_module::default_libcall_names(),
        )
        .map_err(module_error)?;
        let mut object_module = ObjectModule::new(builder);

        compile_into_module(&mut object_module, module)?;
        let product = object_module.finish();
        product.emit().map_err(|err| {
            CompileError::Backend(format!("failed to emit object bytes: {}", err))
        })
    }

    /// JIT-compile the module and call `main`, returning its exit value.
    #[cfg(feature = "cranelift-backend")]
    pub fn run_main(&self, module: &Module) -> Result<i64, CompileError> {
        let jit_builder =
            JITBuilder::new(cranelift_module::default_libcall_names()).map_err(module_error)?;
        let mut jit_module = JITModule::new(jit_builder);
        let compiled = compile_into_module(&mut jit_module, module)?;
        jit_module.finalize_definitions().map_err(module_error)?;

        let main = module
            .functions
            .iter()
            .find(|function| function.name == "main")
            .ok_or_else(|| CompileError::InvalidIr("module has no `main` function".to_string()))?;
        if !main.params.is_empty() {
            return Err(CompileError::InvalidIr(
                "`main` must not take parameters to be run".to_string(),
            ));
        }

        let main_id = compiled.functions["main"];
        let code = jit_module.get_finalized_function(main_id);

        // SAFETY: `main` was defined in this module with the matching
        // zero-argument signature for its return type.
        let exit_code = unsafe {
            match main.return_type {
                Type::Void => {
                    let main_fn: extern "C" fn() = std::mem::transmute(code);
                    main_fn();
                    0
                }
                Type::I32 => {
                    let main_fn: extern "C" fn() -> i32 = std::mem::transmute(code);
                    i64::from(main_fn())
                }
                Type::I64 => {
                    let main_fn: extern "C" fn() -> i64 = std::mem::transmute(code);
                    main_fn()
                }
                other => {
                    return Err(CompileError::Backend(format!(
                        "`main` returning {} cannot be run",
                        other
                    )))
                }
            }
        };
        Ok(exit_code)
    }
}

impl Backend for CraneliftBackend {
    fn generate(&self, module: &Module) -> Result<Vec<u8>, CompileError> {
        #[cfg(feature = "cranelift-backend")]
        {
            self.compile_module(module)
        }

        #[cfg(not(feature = "cranelift-backend"))]
        {
            let _ = module;
            Err(CompileError::Backend(
                "Cranelift backend not enabled; compile with --features cranelift-backend"
                    .to_string(),
            ))
        }
    }

    fn name(&self) -> &'static str {
        "cranelift"
    }

    fn supported_targets(&self) -> &[&str] {
        &["x86_64", "aarch64"]
    }
}

#[cfg(feature = "cranelift-backend")]
struct CompiledFunctions {
    functions: HashMap<String, FuncId>,
}

#[cfg(feature = "cranelift-backend")]
fn compile_into_module<M: ClifModule>(
    module: &mut M,
    ir_module: &Module,
) -> Result<CompiledFunctions, CompileError> {
    let mut functions = HashMap::new();
    for function in &ir_module.functions {
        let signature = make_signature(module, function)?;
        let func_id = module
            .declare_function(&function.name, Linkage::Export, &signature)
            .map_err(module_error)?;
        functions.insert(function.name.clone(), func_id);
    }

    for function in &ir_module.functions {
        let func_id = functions[&function.name];

        let mut context = module.make_context();
        context.func.signature = make_signature(module, function)?;

        {
            let mut builder_context = FunctionBuilderContext::new();
            let mut builder = FunctionBuilder::new(&mut context.func, &mut builder_context);
            lower_function(module, ir_module, function, &functions, &mut builder)?;
            builder.seal_all_blocks();
            builder.finalize();
        }

        module
            .define_function(func_id, &mut context)
            .map_err(module_error)?;
    }

    Ok(CompiledFunctions { functions })
}

#[cfg(feature = "cranelift-backend")]
struct FunctionState {
    temps: HashMap<String, ClifValue>,
    slots: HashMap<String, (StackSlot, ClifType)>,
    arg_values: Vec<ClifValue>,
}

#[cfg(feature = "cranelift-backend")]
fn lower_function<M: ClifModule>(
    module: &mut M,
    ir_module: &Module,
    ir_function: &IrFunction,
    function_ids: &HashMap<String, FuncId>,
    builder: &mut FunctionBuilder,
) -> Result<(), CompileError> {
    if ir_function.blocks.is_empty() {
        return Err(CompileError::InvalidIr(format!(
            "function '{}' has no basic blocks",
            ir_function.name
        )));
    }

    let mut block_ids: HashMap<String, Block> = HashMap::new();
    for block in &ir_function.blocks {
        let id = builder.create_block();
        block_ids.insert(block.label.clone(), id);
    }

    let entry = block_ids[&ir_function.blocks[0].label];
    builder.append_block_params_for_function_params(entry);

    let mut function_refs = HashMap::new();
    for (name, id) in function_ids {
        let func_ref = module.declare_func_in_func(*id, builder.func);
        function_refs.insert(name.clone(), func_ref);
    }

    let mut state = FunctionState {
        temps: HashMap::new(),
        slots: HashMap::new(),
        arg_values: builder.block_params(entry).to_vec(),
    };

    for block in &ir_function.blocks {
        let clif_block = block_ids[&block.label];
        builder.switch_to_block(clif_block);

        for instruction in &block.instructions {
            lower_instruction(
                instruction,
                ir_module,
                &mut state,
                &function_refs,
                builder,
            )?;
        }

        lower_terminator(
            &block.terminator,
            ir_function,
            &mut state,
            &block_ids,
            builder,
        )?;
    }

    Ok(())
}

#[cfg(feature = "cranelift-backend")]
fn lower_instruction(
    instruction: &Instruction,
    ir_module: &Module,
    state: &mut FunctionState,
    function_refs: &HashMap<String, cranelift::codegen::ir::FuncRef>,
    builder: &mut FunctionBuilder,
) -> Result<(), CompileError> {
    match instruction {
        Instruction::Alloca { slot, ty } => {
            let clif_ty = map_type_to_clif(*ty)?;
            let align_shift = clif_ty.bytes().trailing_zeros() as u8;
            let stack_slot = builder.create_sized_stack_slot(StackSlotData::new(
                StackSlotKind::ExplicitSlot,
                clif_ty.bytes(),
                align_shift,
            ));
            state.slots.insert(slot.clone(), (stack_slot, clif_ty));
            Ok(())
        }
        Instruction::Store { slot, value } => {
            let (stack_slot, clif_ty) = lookup_slot(state, slot)?;
            let lowered = lower_value(value, clif_ty, state, builder)?;
            builder.ins().stack_store(lowered, stack_slot, 0);
            Ok(())
        }
        Instruction::Load { dest, slot, .. } => {
            let (stack_slot, clif_ty) = lookup_slot(state, slot)?;
            let loaded = builder.ins().stack_load(clif_ty, stack_slot, 0);
            state.temps.insert(dest.clone(), loaded);
            Ok(())
        }
        Instruction::Assign { dest, value, ty } => {
            let clif_ty = map_type_to_clif(*ty)?;
            let lowered = lower_value(value, clif_ty, state, builder)?;
            state.temps.insert(dest.clone(), lowered);
            Ok(())
        }
        Instruction::BinOp {
            dest,
            op,
            ty,
            left,
            right,
        } => {
            let clif_ty = map_type_to_clif(*ty)?;
            let lhs = lower_value(left, clif_ty, state, builder)?;
            let rhs = lower_value(right, clif_ty, state, builder)?;
            let result = match op {
                BinOp::Add => builder.ins().iadd(lhs, rhs),
                BinOp::Sub => builder.ins().isub(lhs, rhs),
                BinOp::Mul => builder.ins().imul(lhs, rhs),
                BinOp::Div => builder.ins().sdiv(lhs, rhs),
                BinOp::Eq => builder.ins().icmp(IntCC::Equal, lhs, rhs),
                BinOp::And => builder.ins().band(lhs, rhs),
                BinOp::Or => builder.ins().bor(lhs, rhs),
            };
            state.temps.insert(dest.clone(), result);
            Ok(())
        }
        Instruction::Call { dest, func, args } => {
            let func_ref = function_refs.get(func).copied().ok_or_else(|| {
                CompileError::InvalidIr(format!("unknown call target '{}'", func))
            })?;
            let callee = ir_module
                .functions
                .iter()
                .find(|function| &function.name == func)
                .ok_or_else(|| {
                    CompileError::InvalidIr(format!("missing IR for function '{}'", func))
                })?;

            let mut lowered_args = Vec::with_capacity(args.len());
            for (arg, param) in args.iter().zip(&callee.params) {
                let clif_ty = map_type_to_clif(param.ty)?;
                lowered_args.push(lower_value(arg, clif_ty, state, builder)?);
            }

            let call = builder.ins().call(func_ref, &lowered_args);
            if let Some(dest) = dest {
                let results = builder.inst_results(call);
                let Some(first) = results.first().copied() else {
                    return Err(CompileError::InvalidIr(format!(
                        "call to '{}' expected a result",
                        func
                    )));
                };
                state.temps.insert(dest.clone(), first);
            }
            Ok(())
        }
    }
}

#[cfg(feature = "cranelift-backend")]
fn lower_terminator(
    terminator: &Terminator,
    ir_function: &IrFunction,
    state: &mut FunctionState,
    block_ids: &HashMap<String, Block>,
    builder: &mut FunctionBuilder,
) -> Result<(), CompileError> {
    match terminator {
        Terminator::Return(Some(value)) => {
            let clif_ty = map_type_to_clif(ir_function.return_type)?;
            let lowered = lower_value(value, clif_ty, state, builder)?;
            builder.ins().return_(&[lowered]);
            Ok(())
        }
        Terminator::Return(None) => {
            builder.ins().return_(&[]);
            Ok(())
        }
        Terminator::Branch { target } => {
            let target = lookup_block(block_ids, target)?;
            builder.ins().jump(target, &[]);
            Ok(())
        }
        Terminator::CondBranch {
            cond,
            then_block,
            else_block,
        } => {
            let then_block = lookup_block(block_ids, then_block)?;
            let else_block = lookup_block(block_ids, else_block)?;
            let cond = lower_value(cond, types::I8, state, builder)?;
            builder.ins().brif(cond, then_block, &[], else_block, &[]);
            Ok(())
        }
        Terminator::Unreachable => {
            builder.ins().trap(TrapCode::unwrap_user(1));
            Ok(())
        }
    }
}

#[cfg(feature = "cranelift-backend")]
fn lower_value(
    value: &Value,
    expected: ClifType,
    state: &FunctionState,
    builder: &mut FunctionBuilder,
) -> Result<ClifValue, CompileError> {
    match value {
        Value::Temp(name) => state.temps.get(name).copied().ok_or_else(|| {
            CompileError::InvalidIr(format!("unknown temporary '{}' referenced in backend", name))
        }),
        Value::Arg(index) => state.arg_values.get(*index).copied().ok_or_else(|| {
            CompileError::InvalidIr(format!("function has no argument {}", index))
        }),
        Value::Int(value) => Ok(builder.ins().iconst(expected, *value)),
        Value::Bool(value) => Ok(builder.ins().iconst(types::I8, i64::from(*value))),
    }
}

#[cfg(feature = "cranelift-backend")]
fn lookup_slot(state: &FunctionState, slot: &str) -> Result<(StackSlot, ClifType), CompileError> {
    state.slots.get(slot).copied().ok_or_else(|| {
        CompileError::InvalidIr(format!("unknown stack slot '{}' referenced in backend", slot))
    })
}

#[cfg(feature = "cranelift-backend")]
fn lookup_block(block_ids: &HashMap<String, Block>, label: &str) -> Result<Block, CompileError> {
    block_ids.get(label).copied().ok_or_else(|| {
        CompileError::InvalidIr(format!("unknown branch target '{}'", label))
    })
}

#[cfg(feature = "cranelift-backend")]
fn make_signature<M: ClifModule>(
    module: &M,
    function: &IrFunction,
) -> Result<cranelift::prelude::Signature, CompileError> {
    let mut signature = module.make_signature();

    for param in &function.params {
        let ty = map_type_to_clif(param.ty)?;
        signature.params.push(AbiParam::new(ty));
    }

    if function.return_type != Type::Void {
        let return_type = map_type_to_clif(function.return_type)?;
        signature.returns.push(AbiParam::new(return_type));
    }

    Ok(signature)
}

/// Cranelift has no 1-bit value type; `bool` travels as `i8`, which is also
/// what its integer comparisons produce.
#[cfg(feature = "cranelift-backend")]
fn map_type_to_clif(ty: Type) -> Result<ClifType, CompileError> {
    match ty {
        Type::Bool | Type::I8 => Ok(types::I8),
        Type::I16 => Ok(types::I16),
        Type::I32 => Ok(types::I32),
        Type::I64 => Ok(types::I64),
        Type::F32 => Ok(types::F32),
        Type::F64 => Ok(types::F64),
        Type::Void => Err(CompileError::InvalidIr(
            "void cannot be used as a concrete value type".to_string(),
        )),
    }
}

#[cfg(feature = "cranelift-backend")]
fn build_native_isa(optimize: bool) -> Result<OwnedTargetIsa, CompileError> {
    let mut flags = settings::builder();
    flags
        .set("is_pic", "true")
        .map_err(|err| CompileError::Backend(format!("failed to set Cranelift flag: {}", err)))?;
    if optimize {
        flags.set("opt_level", "speed").map_err(|err| {
            CompileError::Backend(format!("failed to set Cranelift flag: {}", err))
        })?;
    }

    let isa_builder = cranelift_native::builder().map_err(|msg| {
        CompileError::Backend(format!("host machine is not supported by Cranelift: {}", msg))
    })?;

    isa_builder
        .finish(settings::Flags::new(flags))
        .map_err(module_error)
}

#[cfg(feature = "cranelift-backend")]
fn module_error(err: impl std::fmt::Display) -> CompileError {
    CompileError::Backend(err.to_string())
}
