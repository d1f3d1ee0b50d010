pub mod ast;
mod expr;
pub mod printer;

use std::error::Error;
use std::fmt;

use crate::lexer::{Lexer, Savepoint};
use ast::{
    BlockStatement, Declaration, DeclarationSequence, DeclarationStatement, DoWhileStatement,
    ExpressionStatement, FunctionBody, FunctionDeclaration, FunctionParameter,
    FunctionParameterList, Identifier, IfStatement, QualifiedType, ReturnStatement, SourceId,
    SourceInfo, Statement, StatementList, TemplateId, Type, VariableDeclaration, WhileStatement,
};

/// The deepest parse failure seen so far. `file_offset` is monotone: a new
/// failure replaces the stored one only when it is strictly further into the
/// file, so the first error at the maximal offset wins.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
    pub file_offset: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl Error for ParseError {}

/// Recursive-descent parser with full backtracking. Every `try_*` production
/// snapshots the lexer on entry and restores it on failure; partially built
/// children are dropped as the failing branch unwinds.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    file: SourceId,
    deepest: Option<ParseError>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::with_file(source, SourceId::default())
    }

    pub fn with_file(source: &'a str, file: SourceId) -> Self {
        Self {
            lexer: Lexer::new(source),
            file,
            deepest: None,
        }
    }

    /// Builds the root sequence, or surfaces the deepest error once no
    /// further declaration can be parsed before end of input.
    pub fn parse_program(&mut self) -> Result<DeclarationSequence, ParseError> {
        let mut sequence = DeclarationSequence::default();
        while !self.lexer.match_eof() {
            match self.try_declaration() {
                Some(declaration) => sequence.declarations.push(declaration),
                None => return Err(self.take_error()),
            }
        }
        Ok(sequence)
    }

    fn take_error(&mut self) -> ParseError {
        if let Some(error) = self.deepest.take() {
            return error;
        }
        let at = self.lexer.savepoint();
        ParseError {
            message: "expected a declaration".to_string(),
            line: at.line,
            column: at.column,
            file_offset: at.offset,
        }
    }

    pub(crate) fn set_error(&mut self, message: &str) {
        let at = self.lexer.savepoint();
        let deeper = self
            .deepest
            .as_ref()
            .map_or(true, |error| at.offset > error.file_offset);
        if deeper {
            self.deepest = Some(ParseError {
                message: message.to_string(),
                line: at.line,
                column: at.column,
                file_offset: at.offset,
            });
        }
    }

    pub(crate) fn lexer(&mut self) -> &mut Lexer<'a> {
        &mut self.lexer
    }

    pub(crate) fn info(&self, at: Savepoint) -> SourceInfo {
        SourceInfo {
            file: self.file,
            offset: at.offset,
            line: at.line,
            column: at.column,
        }
    }

    pub(crate) fn try_identifier(&mut self) -> Option<Identifier> {
        let at = self.lexer.savepoint();
        let name = self.lexer.match_identifier()?;
        Some(Identifier {
            name,
            info: self.info(at),
        })
    }

    fn try_declaration(&mut self) -> Option<Declaration> {
        if let Some(variable) = self.try_variable_declaration() {
            return Some(Declaration::Variable(variable));
        }
        if let Some(function) = self.try_function_declaration() {
            return Some(Declaration::Function(function));
        }
        None
    }

    fn try_variable_declaration(&mut self) -> Option<VariableDeclaration> {
        let at = self.lexer.savepoint();
        if !self.lexer.match_keyword("var") {
            self.set_error("expected keyword `var`");
            return None;
        }

        let Some(name) = self.try_identifier() else {
            self.set_error("expected variable name");
            self.lexer.restore(at);
            return None;
        };

        if !self.lexer.match_lexeme(":") {
            self.set_error("expected `:` after variable name");
            self.lexer.restore(at);
            return None;
        }

        let Some(ty) = self.try_type() else {
            self.set_error("expected type");
            self.lexer.restore(at);
            return None;
        };

        let initializer = if self.lexer.match_lexeme("=") {
            let Some(initializer) = self.try_expression() else {
                self.set_error("expected initializer expression");
                self.lexer.restore(at);
                return None;
            };
            Some(initializer)
        } else {
            None
        };

        if !self.lexer.match_lexeme(";") {
            self.set_error("expected `;` after variable declaration");
            self.lexer.restore(at);
            return None;
        }

        Some(VariableDeclaration {
            ty,
            name,
            initializer,
            info: self.info(at),
        })
    }

    fn try_function_declaration(&mut self) -> Option<FunctionDeclaration> {
        let at = self.lexer.savepoint();
        if !self.lexer.match_keyword("fn") {
            self.set_error("expected keyword `fn`");
            return None;
        }

        let Some(name) = self.try_identifier() else {
            self.set_error("expected function name");
            self.lexer.restore(at);
            return None;
        };

        let Some(parameters) = self.try_function_parameter_list() else {
            self.lexer.restore(at);
            return None;
        };

        if !self.lexer.match_lexeme("->") {
            self.set_error("expected `->` after parameter list");
            self.lexer.restore(at);
            return None;
        }

        let Some(return_type) = self.try_type() else {
            self.set_error("expected return type");
            self.lexer.restore(at);
            return None;
        };

        let Some(body) = self.try_function_body() else {
            self.lexer.restore(at);
            return None;
        };

        Some(FunctionDeclaration {
            name,
            parameters,
            return_type,
            body,
            info: self.info(at),
        })
    }

    fn try_function_parameter(&mut self) -> Option<FunctionParameter> {
        let at = self.lexer.savepoint();
        let Some(name) = self.try_identifier() else {
            self.set_error("expected parameter name");
            return None;
        };

        if !self.lexer.match_lexeme(":") {
            self.set_error("expected `:` after parameter name");
            self.lexer.restore(at);
            return None;
        }

        let Some(ty) = self.try_type() else {
            self.set_error("expected parameter type");
            self.lexer.restore(at);
            return None;
        };

        Some(FunctionParameter {
            name,
            ty,
            info: self.info(at),
        })
    }

    fn try_function_parameter_list(&mut self) -> Option<FunctionParameterList> {
        let at = self.lexer.savepoint();
        if !self.lexer.match_lexeme("(") {
            self.set_error("expected `(`");
            return None;
        }

        if self.lexer.match_lexeme(")") {
            return Some(FunctionParameterList::default());
        }

        let mut list = FunctionParameterList::default();
        loop {
            let Some(parameter) = self.try_function_parameter() else {
                self.lexer.restore(at);
                return None;
            };
            list.parameters.push(parameter);
            if !self.lexer.match_lexeme(",") {
                break;
            }
        }

        if !self.lexer.match_lexeme(")") {
            self.set_error("expected `)` after function parameter list");
            self.lexer.restore(at);
            return None;
        }

        Some(list)
    }

    fn try_function_body(&mut self) -> Option<FunctionBody> {
        let at = self.lexer.savepoint();
        if !self.lexer.match_lexeme("{") {
            self.set_error("expected `{` at the beginning of function body");
            return None;
        }

        if self.lexer.match_lexeme("}") {
            return Some(FunctionBody { statements: None });
        }

        let statements = self.parse_statement_list();
        if statements.is_empty() {
            self.lexer.restore(at);
            return None;
        }

        if !self.lexer.match_lexeme("}") {
            self.set_error("expected `}` at the end of the function body");
            self.lexer.restore(at);
            return None;
        }

        Some(FunctionBody {
            statements: Some(statements),
        })
    }

    /// Greedily collects statements; stops at the first position where no
    /// statement production matches. Never fails itself — the caller decides
    /// whether an empty list is acceptable.
    fn parse_statement_list(&mut self) -> StatementList {
        let mut list = StatementList::default();
        loop {
            if let Some(block) = self.try_block_statement() {
                list.statements.push(Statement::Block(block));
                continue;
            }
            if let Some(if_statement) = self.try_if_statement() {
                list.statements.push(Statement::If(if_statement));
                continue;
            }
            if let Some(while_statement) = self.try_while_statement() {
                list.statements.push(Statement::While(while_statement));
                continue;
            }
            if let Some(do_while) = self.try_do_while_statement() {
                list.statements.push(Statement::DoWhile(do_while));
                continue;
            }
            if let Some(declaration) = self.try_variable_declaration() {
                list.statements
                    .push(Statement::Declaration(DeclarationStatement { declaration }));
                continue;
            }
            if let Some(expression) = self.try_expression_statement() {
                list.statements.push(Statement::Expression(expression));
                continue;
            }
            if let Some(return_statement) = self.try_return_statement() {
                list.statements.push(Statement::Return(return_statement));
                continue;
            }
            return list;
        }
    }

    fn try_type(&mut self) -> Option<Type> {
        if let Some(template) = self.try_template_id() {
            return Some(Type::Template(template));
        }
        if let Some(qualified) = self.try_qualified_type() {
            return Some(Type::Qualified(qualified));
        }
        None
    }

    fn try_qualified_type(&mut self) -> Option<QualifiedType> {
        let at = self.lexer.savepoint();
        let Some(name) = self.lexer.match_identifier() else {
            self.set_error("expected type name");
            return None;
        };
        Some(QualifiedType {
            name,
            info: self.info(at),
        })
    }

    fn try_template_id(&mut self) -> Option<TemplateId> {
        let at = self.lexer.savepoint();
        let Some(head) = self.try_qualified_type() else {
            return None;
        };

        if !self.lexer.match_lexeme("<") {
            self.set_error("expected `<`");
            self.lexer.restore(at);
            return None;
        }

        let mut args = Vec::new();
        loop {
            let Some(arg) = self.try_type() else {
                self.set_error("expected template argument type");
                self.lexer.restore(at);
                return None;
            };
            args.push(arg);
            if !self.lexer.match_lexeme(",") {
                break;
            }
        }

        if !self.lexer.match_lexeme(">") {
            self.set_error("expected `>`");
            self.lexer.restore(at);
            return None;
        }

        Some(TemplateId {
            head,
            args,
            info: self.info(at),
        })
    }

    fn try_block_statement(&mut self) -> Option<BlockStatement> {
        let at = self.lexer.savepoint();
        if !self.lexer.match_lexeme("{") {
            self.set_error("expected `{` at the start of the block");
            return None;
        }

        if self.lexer.match_lexeme("}") {
            return Some(BlockStatement {
                statements: StatementList::default(),
                info: self.info(at),
            });
        }

        let statements = self.parse_statement_list();
        if statements.is_empty() {
            self.lexer.restore(at);
            return None;
        }

        if !self.lexer.match_lexeme("}") {
            self.set_error("expected `}` at the end of the block");
            self.lexer.restore(at);
            return None;
        }

        Some(BlockStatement {
            statements,
            info: self.info(at),
        })
    }

    fn try_if_statement(&mut self) -> Option<IfStatement> {
        let at = self.lexer.savepoint();
        if !self.lexer.match_keyword("if") {
            self.set_error("expected `if`");
            return None;
        }

        let Some(condition) = self.try_expression() else {
            self.set_error("expected condition expression");
            self.lexer.restore(at);
            return None;
        };

        let Some(block) = self.try_block_statement() else {
            self.lexer.restore(at);
            return None;
        };

        if !self.lexer.match_keyword("else") {
            return Some(IfStatement {
                condition,
                block,
                else_block: None,
                else_if: None,
                info: self.info(at),
            });
        }

        if let Some(else_if) = self.try_if_statement() {
            return Some(IfStatement {
                condition,
                block,
                else_block: None,
                else_if: Some(Box::new(else_if)),
                info: self.info(at),
            });
        }
        if let Some(else_block) = self.try_block_statement() {
            return Some(IfStatement {
                condition,
                block,
                else_block: Some(else_block),
                else_if: None,
                info: self.info(at),
            });
        }

        self.set_error("expected `if` keyword or `{` after `else`");
        self.lexer.restore(at);
        None
    }

    fn try_while_statement(&mut self) -> Option<WhileStatement> {
        let at = self.lexer.savepoint();
        if !self.lexer.match_keyword("while") {
            self.set_error("expected `while`");
            return None;
        }

        let Some(condition) = self.try_expression() else {
            self.set_error("expected condition expression");
            self.lexer.restore(at);
            return None;
        };

        let Some(block) = self.try_block_statement() else {
            self.lexer.restore(at);
            return None;
        };

        Some(WhileStatement {
            condition,
            block,
            info: self.info(at),
        })
    }

    fn try_do_while_statement(&mut self) -> Option<DoWhileStatement> {
        let at = self.lexer.savepoint();
        if !self.lexer.match_keyword("do") {
            self.set_error("expected `do`");
            return None;
        }

        let Some(block) = self.try_block_statement() else {
            self.lexer.restore(at);
            return None;
        };

        if !self.lexer.match_keyword("while") {
            self.set_error("expected `while` after do block");
            self.lexer.restore(at);
            return None;
        }

        let Some(condition) = self.try_expression() else {
            self.set_error("expected condition expression");
            self.lexer.restore(at);
            return None;
        };

        if !self.lexer.match_lexeme(";") {
            self.set_error("expected `;` after do-while statement");
            self.lexer.restore(at);
            return None;
        }

        Some(DoWhileStatement {
            block,
            condition,
            info: self.info(at),
        })
    }

    fn try_return_statement(&mut self) -> Option<ReturnStatement> {
        let at = self.lexer.savepoint();
        if !self.lexer.match_keyword("return") {
            self.set_error("expected `return`");
            return None;
        }

        let expression = self.try_expression();

        if !self.lexer.match_lexeme(";") {
            self.set_error("expected `;` at the end of statement");
            self.lexer.restore(at);
            return None;
        }

        Some(ReturnStatement {
            expression,
            info: self.info(at),
        })
    }

    fn try_expression_statement(&mut self) -> Option<ExpressionStatement> {
        let at = self.lexer.savepoint();
        let expression = self.try_expression()?;

        if !self.lexer.match_lexeme(";") {
            self.set_error("expected `;` at the end of statement");
            self.lexer.restore(at);
            return None;
        }

        Some(ExpressionStatement { expression })
    }
}
