//! IR optimization passes, run between lowering and the backend when the
//! driver asks for optimization. Passes must be observationally equivalent
//! to the unoptimized IR.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::ir::{BasicBlock, BinOp, Function, Instruction, Module, Terminator, Value};
use crate::CompileError;

pub trait Pass {
    fn run(&self, module: &mut Module) -> Result<(), CompileError>;

    fn name(&self) -> &'static str;
}

/// Runs passes in registration order.
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// The default pipeline: fold constants, then simplify the CFG.
    pub fn standard() -> Self {
        let mut manager = Self::new();
        manager.add_pass(Box::new(ConstantFolding));
        manager.add_pass(Box::new(SimplifyCfg));
        manager
    }

    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    pub fn run(&self, module: &mut Module) -> Result<(), CompileError> {
        for pass in &self.passes {
            pass.run(module)?;
        }
        Ok(())
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Propagates constants within each block and folds operations whose
/// operands are known. Folded instructions become plain assignments so
/// cross-block uses of the temporary keep working.
pub struct ConstantFolding;

impl Pass for ConstantFolding {
    fn run(&self, module: &mut Module) -> Result<(), CompileError> {
        for function in &mut module.functions {
            for block in &mut function.blocks {
                fold_block(block);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "constant-folding"
    }
}

fn fold_block(block: &mut BasicBlock) {
    let mut known: HashMap<String, Value> = HashMap::new();

    for instruction in &mut block.instructions {
        match instruction {
            Instruction::Assign { dest, value, .. } => {
                substitute(value, &known);
                if is_constant(value) {
                    known.insert(dest.clone(), value.clone());
                }
            }
            Instruction::Store { value, .. } => substitute(value, &known),
            Instruction::BinOp {
                dest,
                op,
                ty,
                left,
                right,
            } => {
                substitute(left, &known);
                substitute(right, &known);
                if let Some(folded) = fold_binop(*op, left, right) {
                    let result_ty = match op {
                        BinOp::Eq => crate::ir::Type::Bool,
                        _ => *ty,
                    };
                    known.insert(dest.clone(), folded.clone());
                    let replacement = Instruction::Assign {
                        dest: dest.clone(),
                        value: folded,
                        ty: result_ty,
                    };
                    *instruction = replacement;
                }
            }
            Instruction::Call { args, .. } => {
                for arg in args {
                    substitute(arg, &known);
                }
            }
            Instruction::Alloca { .. } | Instruction::Load { .. } => {}
        }
    }

    match &mut block.terminator {
        Terminator::Return(Some(value)) => substitute(value, &known),
        Terminator::CondBranch { cond, .. } => substitute(cond, &known),
        _ => {}
    }
}

fn substitute(value: &mut Value, known: &HashMap<String, Value>) {
    if let Value::Temp(name) = value {
        if let Some(constant) = known.get(name) {
            *value = constant.clone();
        }
    }
}

fn is_constant(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Bool(_))
}

fn fold_binop(op: BinOp, left: &Value, right: &Value) -> Option<Value> {
    match (op, left, right) {
        (BinOp::Add, Value::Int(a), Value::Int(b)) => Some(Value::Int(a.wrapping_add(*b))),
        (BinOp::Sub, Value::Int(a), Value::Int(b)) => Some(Value::Int(a.wrapping_sub(*b))),
        (BinOp::Mul, Value::Int(a), Value::Int(b)) => Some(Value::Int(a.wrapping_mul(*b))),
        (BinOp::Div, Value::Int(a), Value::Int(b)) => a.checked_div(*b).map(Value::Int),
        (BinOp::Eq, Value::Int(a), Value::Int(b)) => Some(Value::Bool(a == b)),
        (BinOp::Eq, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(a == b)),
        (BinOp::And, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(*a && *b)),
        (BinOp::Or, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(*a || *b)),
        _ => None,
    }
}

/// Rewrites conditional branches on constants into plain branches and drops
/// blocks no path from the entry can reach.
pub struct SimplifyCfg;

impl Pass for SimplifyCfg {
    fn run(&self, module: &mut Module) -> Result<(), CompileError> {
        for function in &mut module.functions {
            simplify_branches(function);
            remove_unreachable_blocks(function);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simplify-cfg"
    }
}

fn simplify_branches(function: &mut Function) {
    for block in &mut function.blocks {
        if let Terminator::CondBranch {
            cond: Value::Bool(taken),
            then_block,
            else_block,
        } = &block.terminator
        {
            let target = if *taken {
                then_block.clone()
            } else {
                else_block.clone()
            };
            block.terminator = Terminator::Branch { target };
        }
    }
}

fn remove_unreachable_blocks(function: &mut Function) {
    let reachable = {
        let Some(entry) = function.blocks.first() else {
            return;
        };

        let by_label: HashMap<&str, &BasicBlock> = function
            .blocks
            .iter()
            .map(|block| (block.label.as_str(), block))
            .collect();

        let mut reachable: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        reachable.insert(entry.label.clone());
        queue.push_back(entry.label.as_str());

        while let Some(label) = queue.pop_front() {
            let Some(block) = by_label.get(label) else {
                continue;
            };
            let successors: Vec<&String> = match &block.terminator {
                Terminator::Branch { target } => vec![target],
                Terminator::CondBranch {
                    then_block,
                    else_block,
                    ..
                } => vec![then_block, else_block],
                Terminator::Return(_) | Terminator::Unreachable => Vec::new(),
            };
            for successor in successors {
                if reachable.insert(successor.clone()) {
                    queue.push_back(successor);
                }
            }
        }

        reachable
    };

    function
        .blocks
        .retain(|block| reachable.contains(&block.label));
}
