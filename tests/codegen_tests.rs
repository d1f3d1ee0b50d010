use sable::ir::{self, BinOp, Instruction, Terminator, Value};
use sable::{CompileError, Compiler};

fn compile(source: &str) -> ir::Module {
    Compiler::new()
        .compile_source(source, "test")
        .expect("source should lower to IR")
}

fn compile_error(source: &str) -> String {
    match Compiler::new().compile_source(source, "test") {
        Ok(_) => panic!("lowering should fail"),
        Err(error) => error.to_string(),
    }
}

fn assert_all_blocks_terminated(function: &ir::Function) {
    for block in &function.blocks {
        assert!(
            block.is_terminated(),
            "block {} in {} has no terminator",
            block.label,
            function.name
        );
    }
}

#[test]
fn minimal_function_returns_constant() {
    let module = compile("fn main() -> i32 { return 0; }");
    assert_eq!(module.functions.len(), 1);

    let main = &module.functions[0];
    assert_eq!(main.name, "main");
    assert_eq!(main.return_type, ir::Type::I32);
    assert_eq!(main.blocks.len(), 1);
    assert!(matches!(
        main.blocks[0].terminator,
        Terminator::Return(Some(Value::Int(0)))
    ));
}

#[test]
fn parameters_are_spilled_to_slots_in_the_entry_block() {
    let module = compile("fn add(a: i32, b: i32) -> i32 { return a + b; }");
    let add = &module.functions[0];
    let entry = &add.blocks[0];

    let allocas = entry
        .instructions
        .iter()
        .filter(|inst| matches!(inst, Instruction::Alloca { .. }))
        .count();
    assert_eq!(allocas, 2);
    assert!(matches!(
        entry.instructions[1],
        Instruction::Store {
            value: Value::Arg(0),
            ..
        }
    ));

    let binop = entry
        .instructions
        .iter()
        .find_map(|inst| match inst {
            Instruction::BinOp { op, ty, .. } => Some((*op, *ty)),
            _ => None,
        })
        .expect("body should contain an addition");
    assert_eq!(binop, (BinOp::Add, ir::Type::I32));
}

#[test]
fn call_arguments_lower_left_to_right() {
    let module = compile(
        "fn add(a: i32, b: i32) -> i32 { return a + b; }\n\
         fn main() -> i32 { return add(1, 2); }",
    );
    let main = &module.functions[1];
    let call = main
        .blocks
        .iter()
        .flat_map(|block| &block.instructions)
        .find_map(|inst| match inst {
            Instruction::Call { func, args, dest } => Some((func.clone(), args.clone(), dest.clone())),
            _ => None,
        })
        .expect("main should call add");
    assert_eq!(call.0, "add");
    assert_eq!(call.1, vec![Value::Int(1), Value::Int(2)]);
    assert!(call.2.is_some());
}

#[test]
fn forward_calls_resolve() {
    let module = compile(
        "fn main() -> i32 { return later(); }\n\
         fn later() -> i32 { return 7; }",
    );
    assert_eq!(module.functions.len(), 2);
}

#[test]
fn if_without_else_falls_through_to_merge() {
    let module = compile(
        "fn f(flag: bool) -> i32 { if flag { var x: i32 = 1; } return 2; }",
    );
    let function = &module.functions[0];
    assert_all_blocks_terminated(function);

    let entry = &function.blocks[0];
    let Terminator::CondBranch {
        then_block,
        else_block,
        ..
    } = &entry.terminator
    else {
        panic!("entry should end in a conditional branch");
    };
    assert!(then_block.starts_with("then"));
    assert!(else_block.starts_with("merge"));

    let then = function
        .blocks
        .iter()
        .find(|block| &block.label == then_block)
        .expect("then block should exist");
    assert!(matches!(&then.terminator, Terminator::Branch { target } if target == else_block));
}

#[test]
fn terminated_branch_gets_no_join_branch() {
    let module = compile(
        "fn f(flag: bool) -> i32 { if flag { return 1; } else { return 2; } }",
    );
    let function = &module.functions[0];
    for block in &function.blocks {
        if block.label.starts_with("then") || block.label.starts_with("else") {
            assert!(matches!(block.terminator, Terminator::Return(_)));
        }
    }
}

#[test]
fn else_if_chain_lowers_recursively() {
    let module = compile(
        "fn f(a: bool, b: bool) -> i32 {\n\
           if a { return 1; } else if b { return 2; } else { return 3; }\n\
         }",
    );
    let function = &module.functions[0];
    let cond_branches = function
        .blocks
        .iter()
        .filter(|block| matches!(block.terminator, Terminator::CondBranch { .. }))
        .count();
    assert_eq!(cond_branches, 2);
}

#[test]
fn while_loop_builds_head_body_after() {
    let module = compile(
        "fn f(flag: bool) -> void { while flag { var x: i32 = 1; } }",
    );
    let function = &module.functions[0];
    assert_all_blocks_terminated(function);

    let entry = &function.blocks[0];
    let Terminator::Branch { target: head_label } = &entry.terminator else {
        panic!("entry should branch to the loop head");
    };
    let head = function
        .blocks
        .iter()
        .find(|block| &block.label == head_label)
        .expect("head block should exist");
    let Terminator::CondBranch {
        then_block: body_label,
        ..
    } = &head.terminator
    else {
        panic!("head should end in a conditional branch");
    };
    let body = function
        .blocks
        .iter()
        .find(|block| &block.label == body_label)
        .expect("body block should exist");
    assert!(matches!(&body.terminator, Terminator::Branch { target } if target == head_label));
}

#[test]
fn do_while_checks_condition_at_the_end_of_the_body() {
    let module = compile("fn f() -> void { do { var x: i32 = 1; } while false; }");
    let function = &module.functions[0];

    let entry = &function.blocks[0];
    let Terminator::Branch { target: body_label } = &entry.terminator else {
        panic!("entry should branch straight into the body");
    };
    let body = function
        .blocks
        .iter()
        .find(|block| &block.label == body_label)
        .expect("body block should exist");
    assert!(matches!(
        &body.terminator,
        Terminator::CondBranch { then_block, .. } if then_block == body_label
    ));
}

#[test]
fn division_is_signed() {
    let module = compile("fn f(a: u32, b: u32) -> u32 { return a / b; }");
    let printed = module.to_string();
    assert!(printed.contains("sdiv"));
}

#[test]
fn statements_after_a_return_are_dropped() {
    let module = compile("fn f() -> i32 { return 1; return 2; }");
    let entry = &module.functions[0].blocks[0];
    assert!(matches!(
        entry.terminator,
        Terminator::Return(Some(Value::Int(1)))
    ));
}

#[test]
fn non_void_fall_through_keeps_unreachable_terminator() {
    let module = compile("fn f(flag: bool) -> i32 { if flag { return 1; } }");
    let function = &module.functions[0];
    let merge = function
        .blocks
        .iter()
        .find(|block| block.label.starts_with("merge"))
        .expect("merge block should exist");
    assert!(matches!(merge.terminator, Terminator::Unreachable));
}

#[test]
fn undefined_callee_is_a_compile_error() {
    let error = compile_error("fn main() -> i32 { return missing(); }");
    assert!(error.contains("undefined function `missing`"));
}

#[test]
fn arity_mismatch_is_a_compile_error() {
    let error = compile_error(
        "fn add(a: i32, b: i32) -> i32 { return a + b; }\n\
         fn main() -> i32 { return add(1); }",
    );
    assert!(error.contains("expects 2 arguments"));
}

#[test]
fn unknown_type_name_is_a_compile_error() {
    let error = compile_error("fn f(x: quux) -> void {}");
    assert!(error.contains("unknown type name `quux`"));
}

#[test]
fn bool_condition_is_required() {
    let error = compile_error("fn f(n: i32) -> void { while n { } }");
    assert!(error.contains("expected bool"));
}

#[test]
fn parse_errors_surface_through_the_compiler() {
    let result = Compiler::new().compile_source("fn main() -> i32 { return }", "test");
    match result {
        Err(CompileError::Parse(error)) => {
            assert_eq!(error.line, 1);
            assert!(error.file_offset > 0);
        }
        other => panic!("expected a parse error, got {:?}", other.map(|m| m.name)),
    }
}
