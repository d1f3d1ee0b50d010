//! Builder for constructing IR functions block by block.

use super::{BasicBlock, Function, Instruction, Parameter, Terminator, Type};

/// Tracks an insertion point inside a function under construction. The first
/// terminator set on a block wins; later instructions and terminators aimed
/// at a terminated block are dropped, so a join branch after `return` cannot
/// corrupt the block.
pub struct FunctionBuilder {
    function: Function,
    current_block: Option<usize>,
}

impl FunctionBuilder {
    pub fn new(name: String, params: Vec<Parameter>, return_type: Type) -> Self {
        Self {
            function: Function::new(name, params, return_type),
            current_block: None,
        }
    }

    /// Appends a fresh block and returns its index.
    pub fn create_block(&mut self, label: String) -> usize {
        self.function.blocks.push(BasicBlock::new(label));
        self.function.blocks.len() - 1
    }

    pub fn block_label(&self, block_id: usize) -> &str {
        &self.function.blocks[block_id].label
    }

    pub fn switch_to_block(&mut self, block_id: usize) {
        self.current_block = Some(block_id);
    }

    pub fn add_instruction(&mut self, instruction: Instruction) {
        if let Some(block) = self.current() {
            if !block.is_terminated() {
                block.instructions.push(instruction);
            }
        }
    }

    pub fn set_terminator(&mut self, terminator: Terminator) {
        if let Some(block) = self.current() {
            if !block.is_terminated() {
                block.terminator = terminator;
            }
        }
    }

    /// True when the insertion block already ends in a branch or return.
    pub fn is_terminated(&self) -> bool {
        match self.current_block {
            Some(block_id) => self.function.blocks[block_id].is_terminated(),
            None => false,
        }
    }

    pub fn return_type(&self) -> Type {
        self.function.return_type
    }

    pub fn build(self) -> Function {
        self.function
    }

    fn current(&mut self) -> Option<&mut BasicBlock> {
        self.current_block
            .map(move |block_id| &mut self.function.blocks[block_id])
    }
}
