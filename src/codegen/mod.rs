//! AST to IR lowering. Traversal is a match per node family; control-flow
//! statements build their block structure through the IR builder, and
//! variables live in stack slots tracked by a scope stack.

use std::collections::HashMap;

use crate::ir::builder::FunctionBuilder;
use crate::ir::{self, Instruction, Terminator, Value};
use crate::parser::ast::{
    BinaryOp, BlockStatement, CallExpression, Declaration, DeclarationSequence, Expression,
    FunctionDeclaration, IfStatement, Statement, StatementList, Type, VariableDeclaration,
};
use crate::CompileError;

#[derive(Clone)]
struct Signature {
    params: Vec<ir::Type>,
    return_type: ir::Type,
}

#[derive(Clone)]
struct Slot {
    name: String,
    ty: ir::Type,
}

/// Lowers a declaration sequence to an IR module.
pub struct Lowering {
    next_temp: usize,
    next_slot: usize,
    next_block: usize,
    scopes: Vec<HashMap<String, Slot>>,
    signatures: HashMap<String, Signature>,
    current_function: String,
}

impl Lowering {
    pub fn new() -> Self {
        Self {
            next_temp: 0,
            next_slot: 0,
            next_block: 0,
            scopes: Vec::new(),
            signatures: HashMap::new(),
            current_function: String::new(),
        }
    }

    /// Lowers the whole sequence. Function signatures are collected up front
    /// so calls resolve independent of definition order; top-level variable
    /// declarations are not lowered.
    pub fn lower_sequence(
        &mut self,
        sequence: &DeclarationSequence,
        module_name: &str,
    ) -> Result<ir::Module, CompileError> {
        let mut module = ir::Module::new(module_name.to_string());

        for declaration in &sequence.declarations {
            if let Declaration::Function(function) = declaration {
                let name = &function.name.name;
                if self.signatures.contains_key(name) {
                    return Err(CompileError::Codegen(format!(
                        "duplicate definition of function `{}`",
                        name
                    )));
                }
                let mut params = Vec::with_capacity(function.parameters.parameters.len());
                for parameter in &function.parameters.parameters {
                    params.push(self.resolve_type(&parameter.ty)?);
                }
                let return_type = self.resolve_type(&function.return_type)?;
                self.signatures.insert(
                    name.clone(),
                    Signature {
                        params,
                        return_type,
                    },
                );
            }
        }

        for declaration in &sequence.declarations {
            if let Declaration::Function(function) = declaration {
                module.functions.push(self.lower_function(function)?);
            }
        }

        Ok(module)
    }

    fn lower_function(
        &mut self,
        function: &FunctionDeclaration,
    ) -> Result<ir::Function, CompileError> {
        self.next_temp = 0;
        self.next_slot = 0;
        self.next_block = 0;
        self.current_function = function.name.name.clone();

        let signature = self.signatures[&function.name.name].clone();
        let mut params = Vec::with_capacity(signature.params.len());
        for (parameter, ty) in function.parameters.parameters.iter().zip(&signature.params) {
            params.push(ir::Parameter {
                name: parameter.name.name.clone(),
                ty: *ty,
            });
        }

        let mut builder = FunctionBuilder::new(
            function.name.name.clone(),
            params,
            signature.return_type,
        );
        let entry = builder.create_block("entry".to_string());
        builder.switch_to_block(entry);

        // Prologue: one slot per parameter, initialized from the incoming
        // argument, so parameters and locals share the load/store model.
        self.push_scope();
        for (index, parameter) in function.parameters.parameters.iter().enumerate() {
            let ty = signature.params[index];
            let slot = self.new_slot(&parameter.name.name);
            builder.add_instruction(Instruction::Alloca {
                slot: slot.clone(),
                ty,
            });
            builder.add_instruction(Instruction::Store {
                slot: slot.clone(),
                value: Value::Arg(index),
            });
            self.bind(&parameter.name.name, Slot { name: slot, ty });
        }

        if let Some(statements) = &function.body.statements {
            self.lower_statement_list(&mut builder, statements)?;
        }
        self.pop_scope();

        // A void function may fall off the end; a non-void one that does so
        // keeps the unreachable terminator and traps at runtime.
        if !builder.is_terminated() && signature.return_type == ir::Type::Void {
            builder.set_terminator(Terminator::Return(None));
        }

        Ok(builder.build())
    }

    fn lower_statement_list(
        &mut self,
        builder: &mut FunctionBuilder,
        list: &StatementList,
    ) -> Result<(), CompileError> {
        for statement in &list.statements {
            if builder.is_terminated() {
                break;
            }
            self.lower_statement(builder, statement)?;
        }
        Ok(())
    }

    fn lower_statement(
        &mut self,
        builder: &mut FunctionBuilder,
        statement: &Statement,
    ) -> Result<(), CompileError> {
        match statement {
            Statement::Block(block) => self.lower_block(builder, block),
            Statement::If(if_statement) => self.lower_if(builder, if_statement),
            Statement::While(while_statement) => {
                let head_label = self.new_label("head");
                let body_label = self.new_label("body");
                let after_label = self.new_label("after");
                let head = builder.create_block(head_label.clone());
                let body = builder.create_block(body_label.clone());
                let after = builder.create_block(after_label.clone());

                builder.set_terminator(Terminator::Branch {
                    target: head_label.clone(),
                });
                builder.switch_to_block(head);
                let cond = self.lower_condition(builder, &while_statement.condition)?;
                builder.set_terminator(Terminator::CondBranch {
                    cond,
                    then_block: body_label,
                    else_block: after_label,
                });

                builder.switch_to_block(body);
                self.lower_block(builder, &while_statement.block)?;
                if !builder.is_terminated() {
                    builder.set_terminator(Terminator::Branch { target: head_label });
                }

                builder.switch_to_block(after);
                Ok(())
            }
            Statement::DoWhile(do_while) => {
                let body_label = self.new_label("body");
                let after_label = self.new_label("after");
                let body = builder.create_block(body_label.clone());
                let after = builder.create_block(after_label.clone());

                builder.set_terminator(Terminator::Branch {
                    target: body_label.clone(),
                });
                builder.switch_to_block(body);
                self.lower_block(builder, &do_while.block)?;
                if !builder.is_terminated() {
                    let cond = self.lower_condition(builder, &do_while.condition)?;
                    builder.set_terminator(Terminator::CondBranch {
                        cond,
                        then_block: body_label,
                        else_block: after_label,
                    });
                }

                builder.switch_to_block(after);
                Ok(())
            }
            Statement::Return(return_statement) => {
                let return_type = builder.return_type();
                match &return_statement.expression {
                    Some(expression) => {
                        if return_type == ir::Type::Void {
                            return Err(CompileError::Codegen(format!(
                                "function `{}` returns void but `return` has a value",
                                self.current_function
                            )));
                        }
                        let (value, ty) =
                            self.lower_expression(builder, expression, Some(return_type))?;
                        if ty != return_type {
                            return Err(CompileError::Codegen(format!(
                                "function `{}` returns {} but `return` value has type {}",
                                self.current_function, return_type, ty
                            )));
                        }
                        builder.set_terminator(Terminator::Return(Some(value)));
                    }
                    None => {
                        if return_type != ir::Type::Void {
                            return Err(CompileError::Codegen(format!(
                                "function `{}` returns {} but `return` has no value",
                                self.current_function, return_type
                            )));
                        }
                        builder.set_terminator(Terminator::Return(None));
                    }
                }
                Ok(())
            }
            Statement::Declaration(declaration) => {
                self.lower_variable_declaration(builder, &declaration.declaration)
            }
            Statement::Expression(statement) => match &statement.expression {
                Expression::Call(call) => {
                    self.lower_call(builder, call)?;
                    Ok(())
                }
                other => {
                    self.lower_expression(builder, other, None)?;
                    Ok(())
                }
            },
        }
    }

    fn lower_block(
        &mut self,
        builder: &mut FunctionBuilder,
        block: &BlockStatement,
    ) -> Result<(), CompileError> {
        self.push_scope();
        let result = self.lower_statement_list(builder, &block.statements);
        self.pop_scope();
        result
    }

    /// `then`/`else`/`merge` construction. The false edge goes to `merge`
    /// for a plain `if`, to the else block otherwise; an `else if` chain is
    /// lowered recursively inside the else block. Join branches are emitted
    /// only into branch bodies that did not already terminate.
    fn lower_if(
        &mut self,
        builder: &mut FunctionBuilder,
        if_statement: &IfStatement,
    ) -> Result<(), CompileError> {
        let cond = self.lower_condition(builder, &if_statement.condition)?;

        let then_label = self.new_label("then");
        let then = builder.create_block(then_label.clone());
        let has_else = if_statement.else_block.is_some() || if_statement.else_if.is_some();
        let else_branch = has_else.then(|| {
            let label = self.new_label("else");
            (builder.create_block(label.clone()), label)
        });
        let merge_label = self.new_label("merge");
        let merge = builder.create_block(merge_label.clone());

        let false_label = else_branch
            .as_ref()
            .map(|(_, label)| label.clone())
            .unwrap_or_else(|| merge_label.clone());
        builder.set_terminator(Terminator::CondBranch {
            cond,
            then_block: then_label,
            else_block: false_label,
        });

        builder.switch_to_block(then);
        self.lower_block(builder, &if_statement.block)?;
        if !builder.is_terminated() {
            builder.set_terminator(Terminator::Branch {
                target: merge_label.clone(),
            });
        }

        if let Some((else_id, _)) = else_branch {
            builder.switch_to_block(else_id);
            if let Some(else_block) = &if_statement.else_block {
                self.lower_block(builder, else_block)?;
            } else if let Some(else_if) = &if_statement.else_if {
                self.lower_if(builder, else_if)?;
            }
            if !builder.is_terminated() {
                builder.set_terminator(Terminator::Branch {
                    target: merge_label,
                });
            }
        }

        builder.switch_to_block(merge);
        Ok(())
    }

    fn lower_variable_declaration(
        &mut self,
        builder: &mut FunctionBuilder,
        declaration: &VariableDeclaration,
    ) -> Result<(), CompileError> {
        let ty = self.resolve_type(&declaration.ty)?;
        if ty == ir::Type::Void {
            return Err(CompileError::Codegen(format!(
                "variable `{}` cannot have type void",
                declaration.name.name
            )));
        }

        let slot = self.new_slot(&declaration.name.name);
        builder.add_instruction(Instruction::Alloca {
            slot: slot.clone(),
            ty,
        });

        if let Some(initializer) = &declaration.initializer {
            let (value, value_ty) = self.lower_expression(builder, initializer, Some(ty))?;
            if value_ty != ty {
                return Err(CompileError::Codegen(format!(
                    "variable `{}` has type {} but its initializer has type {}",
                    declaration.name.name, ty, value_ty
                )));
            }
            builder.add_instruction(Instruction::Store {
                slot: slot.clone(),
                value,
            });
        }

        self.bind(&declaration.name.name, Slot { name: slot, ty });
        Ok(())
    }

    fn lower_condition(
        &mut self,
        builder: &mut FunctionBuilder,
        condition: &Expression,
    ) -> Result<Value, CompileError> {
        let (value, ty) = self.lower_expression(builder, condition, Some(ir::Type::Bool))?;
        if ty != ir::Type::Bool {
            return Err(CompileError::Codegen(format!(
                "condition has type {}, expected bool",
                ty
            )));
        }
        Ok(value)
    }

    /// Operands lower strictly left before right. `expected` threads the
    /// type an integer literal should adopt; absent a context, literals are
    /// i32.
    fn lower_expression(
        &mut self,
        builder: &mut FunctionBuilder,
        expression: &Expression,
        expected: Option<ir::Type>,
    ) -> Result<(Value, ir::Type), CompileError> {
        match expression {
            Expression::IntLiteral(literal) => {
                let value: i64 = literal.text.parse().map_err(|_| {
                    CompileError::Codegen(format!(
                        "integer literal `{}` is out of range",
                        literal.text
                    ))
                })?;
                let ty = expected
                    .filter(|ty| ty.is_integer())
                    .unwrap_or(ir::Type::I32);
                Ok((Value::Int(value), ty))
            }
            Expression::FloatLiteral(literal) => Err(CompileError::Codegen(format!(
                "floating-point literal `{}` cannot be lowered",
                literal.text
            ))),
            Expression::BoolLiteral(literal) => Ok((Value::Bool(literal.value), ir::Type::Bool)),
            Expression::Identifier(identifier) => {
                let name = &identifier.id.name;
                let Some(slot) = self.lookup(name) else {
                    return Err(CompileError::Codegen(format!(
                        "undefined variable `{}`",
                        name
                    )));
                };
                let dest = self.new_temp();
                builder.add_instruction(Instruction::Load {
                    dest: dest.clone(),
                    slot: slot.name,
                    ty: slot.ty,
                });
                Ok((Value::Temp(dest), slot.ty))
            }
            Expression::Binary(binary) => self.lower_binary(builder, binary, expected),
            Expression::Call(call) => self.lower_call(builder, call),
        }
    }

    fn lower_binary(
        &mut self,
        builder: &mut FunctionBuilder,
        binary: &crate::parser::ast::BinaryExpression,
        expected: Option<ir::Type>,
    ) -> Result<(Value, ir::Type), CompileError> {
        match binary.op {
            BinaryOp::And | BinaryOp::Or => {
                let (left, left_ty) =
                    self.lower_expression(builder, &binary.lhs, Some(ir::Type::Bool))?;
                let (right, right_ty) =
                    self.lower_expression(builder, &binary.rhs, Some(ir::Type::Bool))?;
                if left_ty != ir::Type::Bool || right_ty != ir::Type::Bool {
                    return Err(CompileError::Codegen(format!(
                        "logical operator requires bool operands, got {} and {}",
                        left_ty, right_ty
                    )));
                }
                let dest = self.new_temp();
                builder.add_instruction(Instruction::BinOp {
                    dest: dest.clone(),
                    op: map_binary_op(binary.op),
                    ty: ir::Type::Bool,
                    left,
                    right,
                });
                Ok((Value::Temp(dest), ir::Type::Bool))
            }
            BinaryOp::Eq => {
                let (left, left_ty) = self.lower_expression(builder, &binary.lhs, None)?;
                let (right, right_ty) =
                    self.lower_expression(builder, &binary.rhs, Some(left_ty))?;
                if left_ty != right_ty || left_ty == ir::Type::Void {
                    return Err(CompileError::Codegen(format!(
                        "cannot compare {} with {}",
                        left_ty, right_ty
                    )));
                }
                let dest = self.new_temp();
                builder.add_instruction(Instruction::BinOp {
                    dest: dest.clone(),
                    op: ir::BinOp::Eq,
                    ty: left_ty,
                    left,
                    right,
                });
                Ok((Value::Temp(dest), ir::Type::Bool))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                let operand_expected = expected.filter(|ty| ty.is_integer());
                let (left, left_ty) =
                    self.lower_expression(builder, &binary.lhs, operand_expected)?;
                let (right, right_ty) =
                    self.lower_expression(builder, &binary.rhs, Some(left_ty))?;
                if !left_ty.is_integer() || right_ty != left_ty {
                    return Err(CompileError::Codegen(format!(
                        "arithmetic requires matching integer operands, got {} and {}",
                        left_ty, right_ty
                    )));
                }
                let dest = self.new_temp();
                builder.add_instruction(Instruction::BinOp {
                    dest: dest.clone(),
                    op: map_binary_op(binary.op),
                    ty: left_ty,
                    left,
                    right,
                });
                Ok((Value::Temp(dest), left_ty))
            }
        }
    }

    /// Resolves the callee against the module's function table and lowers
    /// arguments left to right against the parameter types.
    fn lower_call(
        &mut self,
        builder: &mut FunctionBuilder,
        call: &CallExpression,
    ) -> Result<(Value, ir::Type), CompileError> {
        let name = &call.callee.name;
        let Some(signature) = self.signatures.get(name).cloned() else {
            return Err(CompileError::Codegen(format!(
                "undefined function `{}`",
                name
            )));
        };

        if call.args.arguments.len() != signature.params.len() {
            return Err(CompileError::Codegen(format!(
                "function `{}` expects {} arguments, got {}",
                name,
                signature.params.len(),
                call.args.arguments.len()
            )));
        }

        let mut args = Vec::with_capacity(call.args.arguments.len());
        for (argument, param_ty) in call.args.arguments.iter().zip(&signature.params) {
            let (value, ty) = self.lower_expression(builder, argument, Some(*param_ty))?;
            if ty != *param_ty {
                return Err(CompileError::Codegen(format!(
                    "argument of type {} passed to `{}` where {} is expected",
                    ty, name, param_ty
                )));
            }
            args.push(value);
        }

        let dest = (signature.return_type != ir::Type::Void).then(|| self.new_temp());
        builder.add_instruction(Instruction::Call {
            dest: dest.clone(),
            func: name.clone(),
            args,
        });
        let value = dest.map(Value::Temp).unwrap_or(Value::Int(0));
        Ok((value, signature.return_type))
    }

    fn resolve_type(&self, ty: &Type) -> Result<ir::Type, CompileError> {
        match ty {
            Type::Qualified(qualified) => builtin_type(&qualified.name).ok_or_else(|| {
                CompileError::Codegen(format!("unknown type name `{}`", qualified.name))
            }),
            Type::Template(template) => Err(CompileError::Codegen(format!(
                "template type `{}` cannot be lowered",
                template.head.name
            ))),
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: &str, slot: Slot) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), slot);
        }
    }

    fn lookup(&self, name: &str) -> Option<Slot> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    fn new_temp(&mut self) -> String {
        let temp = format!("t{}", self.next_temp);
        self.next_temp += 1;
        temp
    }

    fn new_slot(&mut self, name: &str) -> String {
        let slot = format!("{}.{}", name, self.next_slot);
        self.next_slot += 1;
        slot
    }

    fn new_label(&mut self, kind: &str) -> String {
        let label = format!("{}{}", kind, self.next_block);
        self.next_block += 1;
        label
    }
}

impl Default for Lowering {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed mapping from source type names to machine types. Signedness is not
/// part of the type: the unsigned and character names share the integer type
/// of their width, and the operator decides.
pub fn builtin_type(name: &str) -> Option<ir::Type> {
    let ty = match name {
        "void" => ir::Type::Void,
        "bool" => ir::Type::Bool,
        "i8" | "u8" | "c8" => ir::Type::I8,
        "i16" | "u16" | "c16" => ir::Type::I16,
        "i32" | "u32" | "c32" => ir::Type::I32,
        "i64" | "u64" => ir::Type::I64,
        "f32" => ir::Type::F32,
        "f64" => ir::Type::F64,
        _ => return None,
    };
    Some(ty)
}

fn map_binary_op(op: BinaryOp) -> ir::BinOp {
    match op {
        BinaryOp::Or => ir::BinOp::Or,
        BinaryOp::And => ir::BinOp::And,
        BinaryOp::Eq => ir::BinOp::Eq,
        BinaryOp::Add => ir::BinOp::Add,
        BinaryOp::Sub => ir::BinOp::Sub,
        BinaryOp::Mul => ir::BinOp::Mul,
        BinaryOp::Div => ir::BinOp::Div,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn lower(source: &str) -> ir::Module {
        let mut parser = Parser::new(source);
        let sequence = parser.parse_program().expect("parse should succeed");
        Lowering::new()
            .lower_sequence(&sequence, "test")
            .expect("lowering should succeed")
    }

    fn lower_error(source: &str) -> String {
        let mut parser = Parser::new(source);
        let sequence = parser.parse_program().expect("parse should succeed");
        match Lowering::new().lower_sequence(&sequence, "test") {
            Ok(_) => panic!("lowering should fail"),
            Err(error) => error.to_string(),
        }
    }

    #[test]
    fn literal_adopts_expected_type() {
        // Without the return-type context the literal would be i32 and the
        // return would be rejected as mismatched.
        let module = lower("fn f() -> i64 { return 0; }");
        let function = &module.functions[0];
        assert_eq!(function.return_type, ir::Type::I64);
        assert!(matches!(
            function.blocks[0].terminator,
            Terminator::Return(Some(Value::Int(0)))
        ));
    }

    #[test]
    fn scope_depth_is_preserved_across_statements() {
        let source = "fn f(a: i32) -> i32 { { var x: i32 = a; } if a == 0 { var y: i32 = 1; } return a; }";
        let mut parser = Parser::new(source);
        let sequence = parser.parse_program().expect("parse should succeed");
        let mut lowering = Lowering::new();
        lowering
            .lower_sequence(&sequence, "test")
            .expect("lowering should succeed");
        assert!(lowering.scopes.is_empty());
    }

    #[test]
    fn shadowed_name_resolves_to_inner_slot() {
        let module = lower(
            "fn f() -> i32 { var x: i32 = 1; { var x: i32 = 2; return x; } }",
        );
        let function = &module.functions[0];
        let returned = function
            .blocks
            .iter()
            .find_map(|block| match &block.terminator {
                Terminator::Return(Some(Value::Temp(name))) => Some(name.clone()),
                _ => None,
            })
            .expect("function should return a temp");
        let loaded_from = function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .find_map(|inst| match inst {
                Instruction::Load { dest, slot, .. } if *dest == returned => Some(slot.clone()),
                _ => None,
            })
            .expect("returned temp should come from a load");
        assert_eq!(loaded_from, "x.1");
    }

    #[test]
    fn undefined_variable_is_reported() {
        let error = lower_error("fn f() -> i32 { return missing; }");
        assert!(error.contains("undefined variable `missing`"));
    }

    #[test]
    fn template_type_cannot_be_lowered() {
        let error = lower_error("fn f(x: List<i32>) -> void {}");
        assert!(error.contains("template type `List`"));
    }

    #[test]
    fn float_literal_cannot_be_lowered() {
        let error = lower_error("fn f() -> i32 { return 1.5; }");
        assert!(error.contains("floating-point literal"));
    }

    #[test]
    fn void_function_gets_implicit_return() {
        let module = lower("fn f() -> void {}");
        let entry = &module.functions[0].blocks[0];
        assert!(matches!(entry.terminator, Terminator::Return(None)));
    }
}
