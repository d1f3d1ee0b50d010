use sable::parser::ast::{
    BinaryOp, Declaration, DeclarationSequence, Expression, Statement, Type,
};
use sable::parser::{printer, ParseError, Parser};

fn parse(source: &str) -> DeclarationSequence {
    let mut parser = Parser::new(source);
    parser.parse_program().expect("parse should succeed")
}

fn parse_error(source: &str) -> ParseError {
    let mut parser = Parser::new(source);
    match parser.parse_program() {
        Ok(_) => panic!("parse should fail"),
        Err(error) => error,
    }
}

fn function_body(sequence: &DeclarationSequence, index: usize) -> &[Statement] {
    match &sequence.declarations[index] {
        Declaration::Function(function) => function
            .body
            .statements
            .as_ref()
            .map(|list| list.statements.as_slice())
            .unwrap_or(&[]),
        _ => panic!("expected function declaration"),
    }
}

#[test]
fn empty_input_is_an_empty_sequence() {
    let sequence = parse("");
    assert!(sequence.is_empty());
}

#[test]
fn parses_minimal_function() {
    let sequence = parse("fn main() -> i32 { return 0; }");
    assert_eq!(sequence.len(), 1);

    let Declaration::Function(function) = &sequence.declarations[0] else {
        panic!("expected function declaration");
    };
    assert_eq!(function.name.name, "main");
    assert!(function.parameters.parameters.is_empty());
    match &function.return_type {
        Type::Qualified(qualified) => assert_eq!(qualified.name, "i32"),
        _ => panic!("expected qualified return type"),
    }

    let body = function_body(&sequence, 0);
    assert_eq!(body.len(), 1);
    match &body[0] {
        Statement::Return(ret) => match ret.expression.as_ref() {
            Some(Expression::IntLiteral(literal)) => assert_eq!(literal.text, "0"),
            other => panic!("expected integer literal, got {:?}", other),
        },
        other => panic!("expected return statement, got {:?}", other),
    }
}

#[test]
fn empty_function_body_has_no_statement_list() {
    let sequence = parse("fn noop() -> void {}");
    let Declaration::Function(function) = &sequence.declarations[0] else {
        panic!("expected function declaration");
    };
    assert!(function.body.statements.is_none());
}

#[test]
fn parses_add_and_call() {
    let source = "fn add(a: i32, b: i32) -> i32 { return a + b; }\n\
                  fn main() -> i32 { return add(1, 2); }";
    let sequence = parse(source);
    assert_eq!(sequence.len(), 2);

    match &function_body(&sequence, 0)[0] {
        Statement::Return(ret) => match ret.expression.as_ref() {
            Some(Expression::Binary(binary)) => {
                assert_eq!(binary.op, BinaryOp::Add);
                assert!(matches!(binary.lhs.as_ref(), Expression::Identifier(id) if id.id.name == "a"));
                assert!(matches!(binary.rhs.as_ref(), Expression::Identifier(id) if id.id.name == "b"));
            }
            other => panic!("expected binary expression, got {:?}", other),
        },
        other => panic!("expected return statement, got {:?}", other),
    }

    match &function_body(&sequence, 1)[0] {
        Statement::Return(ret) => match ret.expression.as_ref() {
            Some(Expression::Call(call)) => {
                assert_eq!(call.callee.name, "add");
                assert_eq!(call.args.arguments.len(), 2);
                assert!(matches!(
                    &call.args.arguments[0],
                    Expression::IntLiteral(literal) if literal.text == "1"
                ));
                assert!(matches!(
                    &call.args.arguments[1],
                    Expression::IntLiteral(literal) if literal.text == "2"
                ));
            }
            other => panic!("expected call expression, got {:?}", other),
        },
        other => panic!("expected return statement, got {:?}", other),
    }
}

#[test]
fn addition_is_right_associative() {
    let sequence = parse("fn f() -> i32 { return 1 + 2 + 3; }");
    match &function_body(&sequence, 0)[0] {
        Statement::Return(ret) => match ret.expression.as_ref() {
            Some(Expression::Binary(outer)) => {
                assert_eq!(outer.op, BinaryOp::Add);
                assert!(matches!(
                    outer.lhs.as_ref(),
                    Expression::IntLiteral(literal) if literal.text == "1"
                ));
                match outer.rhs.as_ref() {
                    Expression::Binary(inner) => {
                        assert_eq!(inner.op, BinaryOp::Add);
                        assert!(matches!(
                            inner.lhs.as_ref(),
                            Expression::IntLiteral(literal) if literal.text == "2"
                        ));
                        assert!(matches!(
                            inner.rhs.as_ref(),
                            Expression::IntLiteral(literal) if literal.text == "3"
                        ));
                    }
                    other => panic!("expected nested addition, got {:?}", other),
                }
            }
            other => panic!("expected binary expression, got {:?}", other),
        },
        other => panic!("expected return statement, got {:?}", other),
    }
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let sequence = parse("fn f() -> i32 { return 1 + 2 * 3; }");
    match &function_body(&sequence, 0)[0] {
        Statement::Return(ret) => match ret.expression.as_ref() {
            Some(Expression::Binary(outer)) => {
                assert_eq!(outer.op, BinaryOp::Add);
                assert!(matches!(
                    outer.rhs.as_ref(),
                    Expression::Binary(inner) if inner.op == BinaryOp::Mul
                ));
            }
            other => panic!("expected binary expression, got {:?}", other),
        },
        other => panic!("expected return statement, got {:?}", other),
    }
}

#[test]
fn consecutive_ifs_with_trailing_else() {
    let sequence = parse(
        "fn f(a: bool, b: bool) -> void { if a {} if b {} else {} }",
    );
    let body = function_body(&sequence, 0);
    assert_eq!(body.len(), 2);

    match &body[0] {
        Statement::If(first) => {
            assert!(first.else_block.is_none());
            assert!(first.else_if.is_none());
        }
        other => panic!("expected if statement, got {:?}", other),
    }
    match &body[1] {
        Statement::If(second) => {
            assert!(second.else_block.is_some());
            assert!(second.else_if.is_none());
        }
        other => panic!("expected if statement, got {:?}", other),
    }
}

#[test]
fn else_if_chains_are_mutually_exclusive() {
    let sequence = parse(
        "fn f(a: bool, b: bool) -> void { if a {} else if b {} else {} }",
    );
    match &function_body(&sequence, 0)[0] {
        Statement::If(outer) => {
            assert!(outer.else_block.is_none());
            let chained = outer.else_if.as_ref().expect("expected else-if chain");
            assert!(chained.else_block.is_some());
            assert!(chained.else_if.is_none());
        }
        other => panic!("expected if statement, got {:?}", other),
    }
}

#[test]
fn parses_loops_and_nested_blocks() {
    let sequence = parse(
        "fn f(n: i32) -> i32 {\n\
           var total: i32 = 0;\n\
           while n == 0 { { var inner: i32 = 1; } }\n\
           do { total; } while false;\n\
           return total;\n\
         }",
    );
    let body = function_body(&sequence, 0);
    assert!(matches!(body[0], Statement::Declaration(_)));
    assert!(matches!(body[1], Statement::While(_)));
    assert!(matches!(body[2], Statement::DoWhile(_)));
    assert!(matches!(body[3], Statement::Return(_)));
}

#[test]
fn parses_template_types() {
    let sequence = parse("var table: Map<i32, List<i64>>;");
    let Declaration::Variable(variable) = &sequence.declarations[0] else {
        panic!("expected variable declaration");
    };
    let Type::Template(template) = &variable.ty else {
        panic!("expected template type");
    };
    assert_eq!(template.head.name, "Map");
    assert_eq!(template.args.len(), 2);
    assert!(matches!(
        &template.args[1],
        Type::Template(inner) if inner.head.name == "List" && inner.args.len() == 1
    ));
}

#[test]
fn empty_template_argument_list_is_rejected() {
    parse_error("var t: List<>;");
}

#[test]
fn keyword_cannot_be_a_variable_name() {
    parse_error("var while: i32;");
}

#[test]
fn deepest_error_points_at_the_furthest_token() {
    let source = "fn main() -> i32 { return }";
    let error = parse_error(source);
    assert_eq!(error.line, 1);
    assert_eq!(error.file_offset, source.rfind('}').unwrap());
    assert_eq!(error.column as usize, error.file_offset + 1);
    assert!(error.message.contains("expected"));
}

#[test]
fn error_is_reported_past_valid_prefix() {
    let source = "fn ok() -> void {}\nfn bad() -> i32 { var x: i32 = ; }";
    let error = parse_error(source);
    assert_eq!(error.line, 2);
    assert!(error.file_offset > source.find('\n').unwrap());
    assert_eq!(error.message, "expected expression");
}

#[test]
fn unterminated_block_comment_fails_at_end_of_input() {
    let source = "/* unterminated";
    let error = parse_error(source);
    assert_eq!(error.file_offset, source.len());
}

#[test]
fn source_info_carries_the_file_id() {
    use sable::parser::ast::SourceId;

    let mut parser = Parser::with_file("fn main() -> i32 { return 0; }", SourceId(3));
    let sequence = parser.parse_program().expect("parse should succeed");
    let Declaration::Function(function) = &sequence.declarations[0] else {
        panic!("expected function declaration");
    };
    assert_eq!(function.info.file, SourceId(3));
    assert_eq!(function.info.line, 1);
    assert_eq!(function.info.column, 1);
    assert_eq!(function.name.info.column, 4);
}

#[test]
fn printed_ast_reparses_to_the_same_form() {
    let source = "\
fn add(a: i32, b: i32) -> i32 { return a + b * 2; }
fn choose(flag: bool) -> i32 {
  if flag { return add(1, 2); } else if false { return 0; } else { var x: i32 = 3 == 3 && true || false; }
  while flag { do { return 4; } while flag; }
  return 0 - add(5, 6);
}
var limit: i64 = 99;
fn noop() -> void {}
";
    let first = printer::print_declaration_sequence(&parse(source));
    let second = printer::print_declaration_sequence(&parse(&first));
    assert_eq!(first, second);
}
