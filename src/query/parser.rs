//! Recursive-descent parser for the textual query language.
//!
//! Grammar: a store reference (`store` or `space.store`) followed by zero
//! or more dot-chained operations, e.g.
//! `sales.orders.filter(status = "active" and total > 100).limit(10)`.
//!
//! The store reference is ambiguous against a bare operation chain
//! (`orders.limit(10)`): after `X.Y`, `Y` is treated as an operation name
//! when it belongs to the closed operation set, with the scanner position
//! restored so the operation parses normally.

use thiserror::Error;

use super::ir::{
    Aggregation, AggregateFunc, Direction, FilterExpr, FilterOp, LogicOp, Mutation, OrderBy,
    QueryIr, QueryType, Value,
};
use super::lexer::{Lexer, Token, TokenKind};

/// Parse failures, each pointing at the offending token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected token '{text}' at {line}:{column}")]
    UnexpectedToken { text: String, line: u32, column: u32 },
    #[error("expected identifier at {line}:{column}")]
    ExpectedIdentifier { line: u32, column: u32 },
    #[error("expected comparison operator at {line}:{column}")]
    ExpectedOperator { line: u32, column: u32 },
    #[error("expected value at {line}:{column}")]
    ExpectedValue { line: u32, column: u32 },
    #[error("expected '(' at {line}:{column}")]
    ExpectedLParen { line: u32, column: u32 },
    #[error("expected ')' at {line}:{column}")]
    ExpectedRParen { line: u32, column: u32 },
    #[error("expected ',' at {line}:{column}")]
    ExpectedComma { line: u32, column: u32 },
    #[error("expected ':' at {line}:{column}")]
    ExpectedColon { line: u32, column: u32 },
    #[error("invalid number '{text}' at {line}:{column}")]
    InvalidNumber { text: String, line: u32, column: u32 },
    #[error("unknown operation '{name}' at {line}:{column}")]
    UnknownOperation { name: String, line: u32, column: u32 },
}

impl From<ParseError> for crate::error::Error {
    fn from(e: ParseError) -> Self {
        crate::error::Error::InvalidRequest(e.to_string())
    }
}

const OPERATION_NAMES: &[&str] = &[
    "filter", "pluck", "orderBy", "limit", "skip", "groupBy", "aggregate", "insert", "set",
    "delete", "count", "get", "exists",
];

/// Parse a textual query into an IR.
pub fn parse(source: &str) -> Result<QueryIr, ParseError> {
    Parser::new(source).parse()
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
        }
    }

    pub fn parse(&mut self) -> Result<QueryIr, ParseError> {
        let mut ir = QueryIr::default();
        self.parse_store_reference(&mut ir)?;

        while self.lexer.peek().kind == TokenKind::Dot {
            self.lexer.next_token();
            self.parse_operation(&mut ir)?;
        }

        let trailing = self.lexer.next_token();
        if trailing.kind != TokenKind::Eof {
            return Err(unexpected(&trailing));
        }
        Ok(ir)
    }

    /// `store` or `space.store`, disambiguated against an operation chain
    /// by backtracking.
    fn parse_store_reference(&mut self, ir: &mut QueryIr) -> Result<(), ParseError> {
        let first = self.lexer.next_token();
        if first.kind != TokenKind::Identifier {
            return Err(ParseError::ExpectedIdentifier {
                line: first.line,
                column: first.column,
            });
        }

        if self.lexer.peek().kind == TokenKind::Dot {
            let checkpoint = self.lexer.checkpoint();
            self.lexer.next_token(); // consume the dot
            let second = self.lexer.next_token();
            if is_wordlike(second.kind) && !is_operation_name(second.text) {
                ir.space = Some(first.text.to_string());
                ir.store = Some(second.text.to_string());
                return Ok(());
            }
            // `X.limit(...)` etc: X is the store and the dot belongs to the
            // operation chain.
            self.lexer.restore(checkpoint);
        }

        ir.store = Some(first.text.to_string());
        Ok(())
    }

    fn parse_operation(&mut self, ir: &mut QueryIr) -> Result<(), ParseError> {
        let name = self.lexer.next_token();
        if !is_wordlike(name.kind) {
            return Err(ParseError::ExpectedIdentifier {
                line: name.line,
                column: name.column,
            });
        }

        match name.text {
            "filter" => self.parse_filter(ir),
            "pluck" => {
                ir.projection = self.parse_identifier_list()?;
                Ok(())
            }
            "orderBy" => self.parse_order_by(ir),
            "limit" => {
                ir.limit = Some(self.parse_u32_argument()?);
                Ok(())
            }
            "skip" => {
                ir.skip = Some(self.parse_u32_argument()?);
                Ok(())
            }
            "groupBy" => {
                ir.group_by = self.parse_identifier_list()?;
                Ok(())
            }
            "aggregate" => self.parse_aggregate(ir),
            "insert" => {
                let payload = self.parse_brace_argument()?;
                ir.mutation = Some(Mutation::Insert(payload));
                Ok(())
            }
            "set" => {
                let payload = self.parse_brace_argument()?;
                ir.mutation = Some(Mutation::Update(payload));
                Ok(())
            }
            "delete" => {
                self.parse_empty_parens()?;
                ir.mutation = Some(Mutation::Delete);
                Ok(())
            }
            "count" => {
                self.parse_empty_parens()?;
                ir.query_type = Some(QueryType::Count);
                Ok(())
            }
            "exists" => {
                self.parse_empty_parens()?;
                ir.query_type = Some(QueryType::Exists);
                Ok(())
            }
            "get" => self.parse_get(ir),
            other => Err(ParseError::UnknownOperation {
                name: other.to_string(),
                line: name.line,
                column: name.column,
            }),
        }
    }

    /// `filter( cond (and|or cond)* )`. Connectives rewrite the previous
    /// condition's logic.
    fn parse_filter(&mut self, ir: &mut QueryIr) -> Result<(), ParseError> {
        self.expect_lparen()?;
        self.parse_condition(ir)?;
        loop {
            let next = self.lexer.peek();
            let logic = match next.kind {
                TokenKind::And => LogicOp::And,
                TokenKind::Or => LogicOp::Or,
                _ => break,
            };
            self.lexer.next_token();
            if let Some(last) = ir.filters.last_mut() {
                last.logic = logic;
            }
            self.parse_condition(ir)?;
        }
        self.expect_rparen()
    }

    fn parse_condition(&mut self, ir: &mut QueryIr) -> Result<(), ParseError> {
        let field = self.lexer.next_token();
        if field.kind != TokenKind::Identifier {
            return Err(ParseError::ExpectedIdentifier {
                line: field.line,
                column: field.column,
            });
        }

        let op_token = self.lexer.next_token();
        let op = match op_token.kind {
            TokenKind::Eq => FilterOp::Eq,
            TokenKind::Ne => FilterOp::Ne,
            TokenKind::Gt => FilterOp::Gt,
            TokenKind::Gte => FilterOp::Gte,
            TokenKind::Lt => FilterOp::Lt,
            TokenKind::Lte => FilterOp::Lte,
            TokenKind::Tilde => FilterOp::Regex,
            TokenKind::In => FilterOp::In,
            TokenKind::Contains => FilterOp::Contains,
            TokenKind::Exists => FilterOp::Exists,
            _ => {
                return Err(ParseError::ExpectedOperator {
                    line: op_token.line,
                    column: op_token.column,
                })
            }
        };

        let value = self.parse_value()?;
        ir.filters.push(FilterExpr {
            field: field.text.to_string(),
            op,
            value,
            logic: LogicOp::None,
        });
        Ok(())
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        let token = self.lexer.next_token();
        match token.kind {
            TokenKind::Str => Ok(Value::Str(token.text.to_string())),
            TokenKind::Number => parse_number(&token),
            TokenKind::True => Ok(Value::Bool(true)),
            TokenKind::False => Ok(Value::Bool(false)),
            TokenKind::Null => Ok(Value::Null),
            _ => Err(ParseError::ExpectedValue {
                line: token.line,
                column: token.column,
            }),
        }
    }

    /// `orderBy(field [, asc|desc])`, defaulting to ascending. Replaces
    /// any previous ordering.
    fn parse_order_by(&mut self, ir: &mut QueryIr) -> Result<(), ParseError> {
        self.expect_lparen()?;
        let field = self.lexer.next_token();
        if field.kind != TokenKind::Identifier {
            return Err(ParseError::ExpectedIdentifier {
                line: field.line,
                column: field.column,
            });
        }
        let mut direction = Direction::Asc;
        if self.lexer.peek().kind == TokenKind::Comma {
            self.lexer.next_token();
            let dir_token = self.lexer.next_token();
            direction = match dir_token.kind {
                TokenKind::Asc => Direction::Asc,
                TokenKind::Desc => Direction::Desc,
                _ => return Err(unexpected(&dir_token)),
            };
        }
        self.expect_rparen()?;
        ir.order_by = vec![OrderBy {
            field: field.text.to_string(),
            direction,
        }];
        Ok(())
    }

    /// `aggregate(name: func[(field)], …)`.
    fn parse_aggregate(&mut self, ir: &mut QueryIr) -> Result<(), ParseError> {
        self.expect_lparen()?;
        loop {
            let name = self.lexer.next_token();
            if name.kind != TokenKind::Identifier {
                return Err(ParseError::ExpectedIdentifier {
                    line: name.line,
                    column: name.column,
                });
            }
            let colon = self.lexer.next_token();
            if colon.kind != TokenKind::Colon {
                return Err(ParseError::ExpectedColon {
                    line: colon.line,
                    column: colon.column,
                });
            }
            let func_token = self.lexer.next_token();
            let func = match func_token.kind {
                TokenKind::Count => AggregateFunc::Count,
                TokenKind::Sum => AggregateFunc::Sum,
                TokenKind::Avg => AggregateFunc::Avg,
                TokenKind::Min => AggregateFunc::Min,
                TokenKind::Max => AggregateFunc::Max,
                _ => return Err(unexpected(&func_token)),
            };

            let mut field = None;
            if self.lexer.peek().kind == TokenKind::LParen {
                self.lexer.next_token();
                let field_token = self.lexer.next_token();
                if field_token.kind != TokenKind::Identifier {
                    return Err(ParseError::ExpectedIdentifier {
                        line: field_token.line,
                        column: field_token.column,
                    });
                }
                self.expect_rparen()?;
                if func != AggregateFunc::Count {
                    field = Some(field_token.text.to_string());
                }
            }

            ir.aggregations.push(Aggregation {
                name: name.text.to_string(),
                func,
                field,
            });

            match self.lexer.next_token() {
                token if token.kind == TokenKind::Comma => continue,
                token if token.kind == TokenKind::RParen => return Ok(()),
                token => {
                    return Err(ParseError::ExpectedComma {
                        line: token.line,
                        column: token.column,
                    })
                }
            }
        }
    }

    /// `get(value)`: sugar for a `_key` equality with `limit = 1`.
    fn parse_get(&mut self, ir: &mut QueryIr) -> Result<(), ParseError> {
        self.expect_lparen()?;
        let value = self.parse_value()?;
        self.expect_rparen()?;
        ir.filters.push(FilterExpr {
            field: "_key".to_string(),
            op: FilterOp::Eq,
            value,
            logic: LogicOp::None,
        });
        ir.limit = Some(1);
        Ok(())
    }

    fn parse_identifier_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect_lparen()?;
        let mut fields = Vec::new();
        loop {
            let token = self.lexer.next_token();
            if token.kind != TokenKind::Identifier {
                return Err(ParseError::ExpectedIdentifier {
                    line: token.line,
                    column: token.column,
                });
            }
            fields.push(token.text.to_string());
            match self.lexer.next_token() {
                token if token.kind == TokenKind::Comma => continue,
                token if token.kind == TokenKind::RParen => return Ok(fields),
                token => {
                    return Err(ParseError::ExpectedComma {
                        line: token.line,
                        column: token.column,
                    })
                }
            }
        }
    }

    fn parse_u32_argument(&mut self) -> Result<u32, ParseError> {
        self.expect_lparen()?;
        let token = self.lexer.next_token();
        if token.kind != TokenKind::Number {
            return Err(ParseError::ExpectedValue {
                line: token.line,
                column: token.column,
            });
        }
        let value = token
            .text
            .parse::<u32>()
            .map_err(|_| ParseError::InvalidNumber {
                text: token.text.to_string(),
                line: token.line,
                column: token.column,
            })?;
        self.expect_rparen()?;
        Ok(value)
    }

    /// `insert({...})` / `set({...})`: raw balanced-brace text becomes the
    /// opaque mutation payload.
    fn parse_brace_argument(&mut self) -> Result<Vec<u8>, ParseError> {
        self.expect_lparen()?;
        let probe = self.lexer.peek();
        let Some(raw) = self.lexer.capture_balanced_braces() else {
            return Err(unexpected(&probe));
        };
        let payload = raw.as_bytes().to_vec();
        self.expect_rparen()?;
        Ok(payload)
    }

    fn parse_empty_parens(&mut self) -> Result<(), ParseError> {
        self.expect_lparen()?;
        self.expect_rparen()
    }

    fn expect_lparen(&mut self) -> Result<(), ParseError> {
        let token = self.lexer.next_token();
        if token.kind != TokenKind::LParen {
            return Err(ParseError::ExpectedLParen {
                line: token.line,
                column: token.column,
            });
        }
        Ok(())
    }

    fn expect_rparen(&mut self) -> Result<(), ParseError> {
        let token = self.lexer.next_token();
        if token.kind != TokenKind::RParen {
            return Err(ParseError::ExpectedRParen {
                line: token.line,
                column: token.column,
            });
        }
        Ok(())
    }
}

fn parse_number(token: &Token<'_>) -> Result<Value, ParseError> {
    let invalid = || ParseError::InvalidNumber {
        text: token.text.to_string(),
        line: token.line,
        column: token.column,
    };
    if token.text.contains('.') {
        token.text.parse::<f64>().map(Value::Float).map_err(|_| invalid())
    } else {
        token.text.parse::<i64>().map(Value::Int).map_err(|_| invalid())
    }
}

fn unexpected(token: &Token<'_>) -> ParseError {
    ParseError::UnexpectedToken {
        text: token.text.to_string(),
        line: token.line,
        column: token.column,
    }
}

fn is_operation_name(text: &str) -> bool {
    OPERATION_NAMES.contains(&text)
}

/// Keywords double as bare words in store/operation position (`count`,
/// `exists`, `min`, …), so anything with identifier shape qualifies.
fn is_wordlike(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Identifier
            | TokenKind::And
            | TokenKind::Or
            | TokenKind::Not
            | TokenKind::In
            | TokenKind::Contains
            | TokenKind::StartsWith
            | TokenKind::Exists
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Null
            | TokenKind::Asc
            | TokenKind::Desc
            | TokenKind::Count
            | TokenKind::Sum
            | TokenKind::Avg
            | TokenKind::Min
            | TokenKind::Max
    )
}
