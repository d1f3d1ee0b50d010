use crate::lexer::NumberLiteral;

use super::ast::{
    ArgumentList, BinaryExpression, BinaryOp, BoolLiteral, CallExpression, Expression,
    FloatLiteral, IdentifierExpression, IntLiteral,
};
use super::Parser;

// The precedence chain runs or -> and -> eq -> add/sub -> mul/div -> primary.
// Every level is right-associative: after the operator, the level recurses
// into itself for the tail, so `1 + 2 + 3` parses as `1 + (2 + 3)` and
// codegen treats that shape as authoritative.
impl<'a> Parser<'a> {
    pub(crate) fn try_expression(&mut self) -> Option<Expression> {
        self.try_or_expression()
    }

    fn try_or_expression(&mut self) -> Option<Expression> {
        let at = self.lexer().savepoint();
        let lhs = self.try_and_expression()?;

        if !self.lexer().match_lexeme("||") {
            return Some(lhs);
        }
        let Some(rhs) = self.try_or_expression() else {
            self.set_error("expected expression after `||`");
            self.lexer().restore(at);
            return None;
        };
        Some(self.binary(lhs, BinaryOp::Or, rhs))
    }

    fn try_and_expression(&mut self) -> Option<Expression> {
        let at = self.lexer().savepoint();
        let lhs = self.try_equality_expression()?;

        if !self.lexer().match_lexeme("&&") {
            return Some(lhs);
        }
        let Some(rhs) = self.try_and_expression() else {
            self.set_error("expected expression after `&&`");
            self.lexer().restore(at);
            return None;
        };
        Some(self.binary(lhs, BinaryOp::And, rhs))
    }

    fn try_equality_expression(&mut self) -> Option<Expression> {
        let at = self.lexer().savepoint();
        let lhs = self.try_add_sub_expression()?;

        if !self.lexer().match_lexeme("==") {
            return Some(lhs);
        }
        let Some(rhs) = self.try_equality_expression() else {
            self.set_error("expected expression after `==`");
            self.lexer().restore(at);
            return None;
        };
        Some(self.binary(lhs, BinaryOp::Eq, rhs))
    }

    fn try_add_sub_expression(&mut self) -> Option<Expression> {
        let at = self.lexer().savepoint();
        let lhs = self.try_mul_div_expression()?;

        let op = if self.lexer().match_lexeme("+") {
            BinaryOp::Add
        } else if self.lexer().match_lexeme("-") {
            BinaryOp::Sub
        } else {
            return Some(lhs);
        };
        let Some(rhs) = self.try_add_sub_expression() else {
            self.set_error("expected expression after additive operator");
            self.lexer().restore(at);
            return None;
        };
        Some(self.binary(lhs, op, rhs))
    }

    fn try_mul_div_expression(&mut self) -> Option<Expression> {
        let at = self.lexer().savepoint();
        let lhs = self.try_primary_expression()?;

        let op = if self.lexer().match_lexeme("*") {
            BinaryOp::Mul
        } else if self.lexer().match_lexeme("/") {
            BinaryOp::Div
        } else {
            return Some(lhs);
        };
        let Some(rhs) = self.try_mul_div_expression() else {
            self.set_error("expected expression after multiplicative operator");
            self.lexer().restore(at);
            return None;
        };
        Some(self.binary(lhs, op, rhs))
    }

    fn try_primary_expression(&mut self) -> Option<Expression> {
        let at = self.lexer().savepoint();
        if self.lexer().match_lexeme("(") {
            let Some(inner) = self.try_expression() else {
                self.set_error("expected expression after `(`");
                self.lexer().restore(at);
                return None;
            };
            if !self.lexer().match_lexeme(")") {
                self.set_error("expected `)`");
                self.lexer().restore(at);
                return None;
            }
            return Some(inner);
        }

        if let Some(literal) = self.try_number_literal() {
            return Some(literal);
        }
        if let Some(call) = self.try_call_expression() {
            return Some(Expression::Call(call));
        }
        if let Some(literal) = self.try_bool_literal() {
            return Some(Expression::BoolLiteral(literal));
        }
        if let Some(identifier) = self.try_identifier_expression() {
            return Some(Expression::Identifier(identifier));
        }
        None
    }

    fn try_number_literal(&mut self) -> Option<Expression> {
        let at = self.lexer().savepoint();
        let info = self.info(at);
        match self.lexer().match_number() {
            Some(NumberLiteral::Int(text)) => {
                Some(Expression::IntLiteral(IntLiteral { text, info }))
            }
            Some(NumberLiteral::Float(text)) => {
                Some(Expression::FloatLiteral(FloatLiteral { text, info }))
            }
            None => {
                self.set_error("expected expression");
                None
            }
        }
    }

    /// Committing to a call requires seeing `(` right after the identifier;
    /// otherwise the whole attempt rewinds and the identifier is re-matched
    /// as a plain identifier expression.
    fn try_call_expression(&mut self) -> Option<CallExpression> {
        let at = self.lexer().savepoint();
        let Some(callee) = self.try_identifier() else {
            self.set_error("expected function name");
            return None;
        };

        if !self.lexer().match_lexeme("(") {
            self.set_error("expected `(` after function name");
            self.lexer().restore(at);
            return None;
        }

        let mut args = ArgumentList::default();
        if self.lexer().match_lexeme(")") {
            return Some(CallExpression {
                callee,
                args,
                info: self.info(at),
            });
        }

        loop {
            let Some(argument) = self.try_expression() else {
                self.set_error("expected argument expression");
                self.lexer().restore(at);
                return None;
            };
            args.arguments.push(argument);
            if !self.lexer().match_lexeme(",") {
                break;
            }
        }

        if !self.lexer().match_lexeme(")") {
            self.set_error("expected `)` after arguments");
            self.lexer().restore(at);
            return None;
        }

        Some(CallExpression {
            callee,
            args,
            info: self.info(at),
        })
    }

    fn try_bool_literal(&mut self) -> Option<BoolLiteral> {
        let at = self.lexer().savepoint();
        let value = if self.lexer().match_keyword("true") {
            true
        } else if self.lexer().match_keyword("false") {
            false
        } else {
            self.set_error("expected bool literal");
            return None;
        };
        Some(BoolLiteral {
            value,
            info: self.info(at),
        })
    }

    fn try_identifier_expression(&mut self) -> Option<IdentifierExpression> {
        let at = self.lexer().savepoint();
        let Some(id) = self.try_identifier() else {
            self.set_error("expected an identifier");
            return None;
        };
        Some(IdentifierExpression {
            id,
            info: self.info(at),
        })
    }

    fn binary(&self, lhs: Expression, op: BinaryOp, rhs: Expression) -> Expression {
        let info = lhs.info();
        Expression::Binary(BinaryExpression {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
            info,
        })
    }
}
