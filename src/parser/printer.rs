//! Renders an AST back to parseable source text. Binary sub-expressions are
//! parenthesized so the printed form re-parses to the same tree shape, which
//! is the property the round-trip tests lean on.

use super::ast::{
    BinaryOp, BlockStatement, Declaration, DeclarationSequence, Expression, FunctionDeclaration,
    IfStatement, Statement, StatementList, Type, VariableDeclaration,
};

pub fn print_declaration_sequence(sequence: &DeclarationSequence) -> String {
    let mut out = String::new();
    for declaration in &sequence.declarations {
        out.push_str(&format_declaration(declaration));
        out.push('\n');
    }
    out
}

fn format_declaration(declaration: &Declaration) -> String {
    match declaration {
        Declaration::Variable(variable) => format_variable_declaration(variable, 0),
        Declaration::Function(function) => format_function_declaration(function),
    }
}

fn format_variable_declaration(variable: &VariableDeclaration, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    let mut out = format!(
        "{}var {}: {}",
        pad,
        variable.name.name,
        format_type(&variable.ty)
    );
    if let Some(initializer) = &variable.initializer {
        out.push_str(" = ");
        out.push_str(&format_expression(initializer));
    }
    out.push(';');
    out
}

fn format_function_declaration(function: &FunctionDeclaration) -> String {
    let parameters = function
        .parameters
        .parameters
        .iter()
        .map(|parameter| format!("{}: {}", parameter.name.name, format_type(&parameter.ty)))
        .collect::<Vec<_>>()
        .join(", ");

    let header = format!(
        "fn {}({}) -> {}",
        function.name.name,
        parameters,
        format_type(&function.return_type)
    );

    match &function.body.statements {
        None => format!("{} {{}}", header),
        Some(statements) => {
            let mut out = format!("{} {{\n", header);
            push_statement_list(&mut out, statements, 1);
            out.push('}');
            out
        }
    }
}

fn push_statement_list(out: &mut String, list: &StatementList, indent: usize) {
    for statement in &list.statements {
        out.push_str(&format_statement(statement, indent));
        out.push('\n');
    }
}

fn format_statement(statement: &Statement, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    match statement {
        Statement::Block(block) => format_block(block, indent),
        Statement::If(if_statement) => format_if(if_statement, indent),
        Statement::While(while_statement) => {
            let mut out = format!(
                "{}while {} ",
                pad,
                format_expression(&while_statement.condition)
            );
            out.push_str(format_block(&while_statement.block, indent).trim_start());
            out
        }
        Statement::DoWhile(do_while) => {
            let mut out = format!("{}do ", pad);
            out.push_str(format_block(&do_while.block, indent).trim_start());
            out.push_str(&format!(
                " while {};",
                format_expression(&do_while.condition)
            ));
            out
        }
        Statement::Return(return_statement) => match &return_statement.expression {
            Some(expression) => format!("{}return {};", pad, format_expression(expression)),
            None => format!("{}return;", pad),
        },
        Statement::Declaration(declaration) => {
            format_variable_declaration(&declaration.declaration, indent)
        }
        Statement::Expression(expression) => {
            format!("{}{};", pad, format_expression(&expression.expression))
        }
    }
}

fn format_block(block: &BlockStatement, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    if block.statements.is_empty() {
        return format!("{}{{}}", pad);
    }
    let mut out = format!("{}{{\n", pad);
    push_statement_list(&mut out, &block.statements, indent + 1);
    out.push_str(&pad);
    out.push('}');
    out
}

fn format_if(if_statement: &IfStatement, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    let mut out = format!("{}if {} ", pad, format_expression(&if_statement.condition));
    out.push_str(format_block(&if_statement.block, indent).trim_start());

    if let Some(else_if) = &if_statement.else_if {
        out.push_str(" else ");
        out.push_str(format_if(else_if, indent).trim_start());
    } else if let Some(else_block) = &if_statement.else_block {
        out.push_str(" else ");
        out.push_str(format_block(else_block, indent).trim_start());
    }
    out
}

fn format_type(ty: &Type) -> String {
    match ty {
        Type::Qualified(qualified) => qualified.name.clone(),
        Type::Template(template) => {
            let args = template
                .args
                .iter()
                .map(format_type)
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}<{}>", template.head.name, args)
        }
    }
}

fn format_expression(expression: &Expression) -> String {
    match expression {
        Expression::Identifier(identifier) => identifier.id.name.clone(),
        Expression::IntLiteral(literal) => literal.text.clone(),
        Expression::FloatLiteral(literal) => literal.text.clone(),
        Expression::BoolLiteral(literal) => literal.value.to_string(),
        Expression::Binary(binary) => format!(
            "{} {} {}",
            format_operand(&binary.lhs),
            operator_spelling(binary.op),
            format_operand(&binary.rhs)
        ),
        Expression::Call(call) => {
            let args = call
                .args
                .arguments
                .iter()
                .map(format_expression)
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({})", call.callee.name, args)
        }
    }
}

fn format_operand(expression: &Expression) -> String {
    match expression {
        Expression::Binary(_) => format!("({})", format_expression(expression)),
        _ => format_expression(expression),
    }
}

fn operator_spelling(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "||",
        BinaryOp::And => "&&",
        BinaryOp::Eq => "==",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
    }
}
