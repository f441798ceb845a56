use log::debug;

use crate::{
    ast::{
        BinaryOp, Block, Expr, ExprType, ForKind, ForLoop, FunctionDef, Lambda, Literal,
        ModulePath, Param, PropertyChain, Stmt, StmtType, SwitchCase, TypeAnnotation, UnaryOp,
    },
    error::{parser_error, Result},
    tokenizer::{Token, TokenType},
};

/// Longest property chain accepted on the left of `=`, counting the base name.
pub const MAX_CHAIN_DEPTH: usize = 4;

pub fn parse(tokens: &[Token]) -> Result<Block> {
    assert!(
        tokens
            .last()
            .is_some_and(|t| t.token_type == TokenType::EOF),
        "Token slice must be terminated by EOF"
    );

    let (block, consumed) = parse_block(tokens)?;

    // parse_block stops at any block terminator; only EOF may remain here
    let remaining = token_at(tokens, consumed);
    if remaining.token_type != TokenType::EOF {
        return parser_error("Unexpected token outside of a block", remaining);
    }

    debug!("parsed {} top-level statements", block.len());
    Ok(block)
}

fn token_at(tokens: &[Token], index: usize) -> &Token {
    &tokens[index.min(tokens.len() - 1)]
}

fn check(tokens: &[Token], index: usize, expected: &TokenType) -> bool {
    &token_at(tokens, index).token_type == expected
}

fn expect(tokens: &[Token], consumed: usize, expected: TokenType, message: &str) -> Result<usize> {
    let token = token_at(tokens, consumed);
    if token.token_type == expected {
        Ok(consumed + 1)
    } else {
        parser_error(message, token)
    }
}

fn expect_identifier(tokens: &[Token], consumed: usize, message: &str) -> Result<(String, usize)> {
    let token = token_at(tokens, consumed);
    match &token.token_type {
        TokenType::Identifier(name) => Ok((name.clone(), consumed + 1)),
        _ => parser_error(message, token),
    }
}

fn skip_semicolon(tokens: &[Token], consumed: usize) -> usize {
    if check(tokens, consumed, &TokenType::Semicolon) {
        consumed + 1
    } else {
        consumed
    }
}

fn is_block_terminator(token_type: &TokenType) -> bool {
    matches!(
        token_type,
        TokenType::End
            | TokenType::Else
            | TokenType::Catch
            | TokenType::Case
            | TokenType::Default
            | TokenType::EOF
    )
}

// Parse statements up to (not including) a block terminator
fn parse_block(tokens: &[Token]) -> Result<(Block, usize)> {
    let mut consumed = 0;
    let mut statements = Vec::new();

    while !is_block_terminator(&token_at(tokens, consumed).token_type) {
        let (statement, statement_consumed) = parse_statement(&tokens[consumed..])?;
        statements.push(statement);
        consumed += statement_consumed;
    }

    Ok((statements, consumed))
}

// Parse a block that must be closed by `end`
fn parse_closed_block(tokens: &[Token], construct: &str) -> Result<(Block, usize)> {
    let (block, consumed) = parse_block(tokens)?;
    let consumed = expect(
        tokens,
        consumed,
        TokenType::End,
        &format!("Expected 'end' to close {}", construct),
    )?;
    Ok((block, consumed))
}

fn parse_statement(tokens: &[Token]) -> Result<(Stmt, usize)> {
    match &tokens[0].token_type {
        TokenType::Use => parse_use(tokens),
        TokenType::Func => parse_function(tokens, 1),
        TokenType::Let => parse_let(tokens),
        TokenType::If => parse_if(tokens),
        TokenType::While => parse_while(tokens),
        TokenType::For => parse_for(tokens),
        TokenType::Switch => parse_switch(tokens),
        TokenType::Try => parse_try(tokens),
        TokenType::Print => parse_print(tokens),
        TokenType::Return => parse_return(tokens),
        TokenType::Break | TokenType::Continue => {
            let stmt_type = if tokens[0].token_type == TokenType::Break {
                StmtType::Break
            } else {
                StmtType::Continue
            };
            let consumed = expect(tokens, 1, TokenType::Semicolon, "Expected ';' after loop control")?;
            Ok((
                Stmt {
                    stmt_type,
                    line: tokens[0].line,
                },
                consumed,
            ))
        }
        TokenType::Identifier(_) => parse_identifier_statement(tokens),
        _ => parse_expression_statement(tokens),
    }
}

fn parse_use(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let mut consumed = 1; // Skip 'use'

    let path = match &token_at(tokens, consumed).token_type {
        TokenType::Path(path) => ModulePath::Path(path.clone()),
        TokenType::String(path) => ModulePath::String(path.clone()),
        TokenType::Identifier(name) => ModulePath::Name(name.clone()),
        _ => return parser_error("Expected module path after 'use'", token_at(tokens, consumed)),
    };
    consumed += 1;

    consumed = expect(tokens, consumed, TokenType::As, "Expected 'as' after module path")?;
    let (alias, consumed) = expect_identifier(tokens, consumed, "Expected alias after 'as'")?;
    let consumed = skip_semicolon(tokens, consumed);

    Ok((
        Stmt {
            stmt_type: StmtType::Use { path, alias },
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_type(tokens: &[Token]) -> Result<(TypeAnnotation, usize)> {
    match &tokens[0].token_type {
        TokenType::IntType => Ok((TypeAnnotation::Int, 1)),
        TokenType::StringType => Ok((TypeAnnotation::String, 1)),
        TokenType::Identifier(name) => Ok((TypeAnnotation::Named(name.clone()), 1)),
        _ => parser_error("Expected type name", &tokens[0]),
    }
}

// tokens[0] must be '('
fn parse_params(tokens: &[Token]) -> Result<(Vec<Param>, usize)> {
    let mut consumed = 1; // Skip '('
    let mut params = Vec::new();

    while !check(tokens, consumed, &TokenType::RightParen) {
        if !params.is_empty() {
            consumed = expect(
                tokens,
                consumed,
                TokenType::Comma,
                "Expected ',' between parameters",
            )?;
        }

        let (name, after_name) = expect_identifier(tokens, consumed, "Expected parameter name")?;
        consumed = after_name;

        let annotation = if check(tokens, consumed, &TokenType::Colon) {
            let (annotation, type_consumed) = parse_type(&tokens[consumed + 1..])?;
            consumed += 1 + type_consumed;
            Some(annotation)
        } else {
            None
        };

        params.push(Param { name, annotation });
    }

    Ok((params, consumed + 1))
}

// Parse `name(params) [-> type]: body end`, where tokens[name_index] is the name
fn parse_function(tokens: &[Token], name_index: usize) -> Result<(Stmt, usize)> {
    let (name, mut consumed) =
        expect_identifier(tokens, name_index, "Expected function name")?;

    if !check(tokens, consumed, &TokenType::LeftParen) {
        return parser_error("Expected '(' after function name", token_at(tokens, consumed));
    }
    let (params, params_consumed) = parse_params(&tokens[consumed..])?;
    consumed += params_consumed;

    let return_type = if check(tokens, consumed, &TokenType::Arrow) {
        let (annotation, type_consumed) = parse_type(&tokens[consumed + 1..])?;
        consumed += 1 + type_consumed;
        Some(annotation)
    } else {
        None
    };

    consumed = expect(
        tokens,
        consumed,
        TokenType::Colon,
        "Expected ':' after function signature",
    )?;

    let (body, body_consumed) = parse_closed_block(&tokens[consumed..], "function body")?;
    consumed += body_consumed;

    Ok((
        Stmt {
            stmt_type: StmtType::Function(FunctionDef {
                name,
                params,
                return_type,
                body,
            }),
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_let(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let (name, mut consumed) = expect_identifier(tokens, 1, "Expected identifier after 'let'")?;

    // `let name(...)` declares a function
    if check(tokens, consumed, &TokenType::LeftParen) {
        return parse_function(tokens, 1);
    }

    let annotation = if check(tokens, consumed, &TokenType::Colon) {
        let (annotation, type_consumed) = parse_type(&tokens[consumed + 1..])?;
        consumed += 1 + type_consumed;
        Some(annotation)
    } else {
        None
    };

    consumed = expect(
        tokens,
        consumed,
        TokenType::Equal,
        "Expected '=' after identifier in let",
    )?;

    let (initializer, init_consumed) = if lambda_ahead(&tokens[consumed..]) {
        parse_lambda(&tokens[consumed..])?
    } else {
        parse_expression(&tokens[consumed..], 0)?
    };
    consumed += init_consumed;

    consumed = expect(
        tokens,
        consumed,
        TokenType::Semicolon,
        "Expected ';' after let binding",
    )?;

    Ok((
        Stmt {
            stmt_type: StmtType::Let {
                name,
                annotation,
                initializer,
            },
            line: tokens[0].line,
        },
        consumed,
    ))
}

// Scan for `x =>` or `(a, b) =>` without consuming anything
fn lambda_ahead(tokens: &[Token]) -> bool {
    match &tokens[0].token_type {
        TokenType::Identifier(_) => check(tokens, 1, &TokenType::FatArrow),
        TokenType::LeftParen => {
            let mut index = 1;
            while matches!(token_at(tokens, index).token_type, TokenType::Identifier(_)) {
                index += 1;
                if check(tokens, index, &TokenType::Comma) {
                    index += 1;
                }
            }
            check(tokens, index, &TokenType::RightParen)
                && check(tokens, index + 1, &TokenType::FatArrow)
        }
        _ => false,
    }
}

fn parse_lambda(tokens: &[Token]) -> Result<(Expr, usize)> {
    let line = tokens[0].line;
    let mut consumed = 0;
    let mut params = Vec::new();

    match &tokens[0].token_type {
        TokenType::Identifier(name) => {
            params.push(name.clone());
            consumed += 1;
        }
        _ => {
            consumed += 1; // Skip '('
            while !check(tokens, consumed, &TokenType::RightParen) {
                if !params.is_empty() {
                    consumed = expect(
                        tokens,
                        consumed,
                        TokenType::Comma,
                        "Expected ',' between lambda parameters",
                    )?;
                }
                let (name, after_name) =
                    expect_identifier(tokens, consumed, "Expected lambda parameter name")?;
                params.push(name);
                consumed = after_name;
            }
            consumed += 1; // Skip ')'
        }
    }

    consumed = expect(
        tokens,
        consumed,
        TokenType::FatArrow,
        "Expected '=>' after lambda parameters",
    )?;

    let (body, body_consumed) = parse_expression(&tokens[consumed..], 0)?;
    consumed += body_consumed;

    Ok((
        Expr::new(
            ExprType::Lambda(Lambda {
                params,
                body: Box::new(body),
            }),
            line,
        ),
        consumed,
    ))
}

fn parse_if(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let (stmt, consumed) = parse_if_chain(tokens)?;
    let consumed = expect(
        tokens,
        consumed,
        TokenType::End,
        "Expected 'end' to close if statement",
    )?;
    Ok((stmt, consumed))
}

// An `else if` chain shares the single `end` of the outermost `if`
fn parse_if_chain(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let mut consumed = 1; // Skip 'if'

    let (condition, cond_consumed) = parse_expression(&tokens[consumed..], 0)?;
    consumed += cond_consumed;
    consumed = expect(tokens, consumed, TokenType::Colon, "Expected ':' after if condition")?;

    let (then_branch, then_consumed) = parse_block(&tokens[consumed..])?;
    consumed += then_consumed;

    let else_branch = if check(tokens, consumed, &TokenType::Else) {
        consumed += 1;
        if check(tokens, consumed, &TokenType::If) {
            let (nested, nested_consumed) = parse_if_chain(&tokens[consumed..])?;
            consumed += nested_consumed;
            Some(vec![nested])
        } else {
            consumed = expect(tokens, consumed, TokenType::Colon, "Expected ':' after 'else'")?;
            let (block, block_consumed) = parse_block(&tokens[consumed..])?;
            consumed += block_consumed;
            Some(block)
        }
    } else {
        None
    };

    Ok((
        Stmt {
            stmt_type: StmtType::If {
                condition,
                then_branch,
                else_branch,
            },
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_while(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let mut consumed = 1; // Skip 'while'

    let (condition, cond_consumed) = parse_expression(&tokens[consumed..], 0)?;
    consumed += cond_consumed;
    consumed = expect(
        tokens,
        consumed,
        TokenType::Colon,
        "Expected ':' after while condition",
    )?;

    let (body, body_consumed) = parse_closed_block(&tokens[consumed..], "while loop")?;
    consumed += body_consumed;

    Ok((
        Stmt {
            stmt_type: StmtType::While { condition, body },
            line: tokens[0].line,
        },
        consumed,
    ))
}

// A step separator is a ':' followed by a number or by '-' and a number
fn step_follows(tokens: &[Token]) -> bool {
    check(tokens, 0, &TokenType::Colon)
        && match token_at(tokens, 1).token_type {
            TokenType::Number(_) => true,
            TokenType::Minus => matches!(token_at(tokens, 2).token_type, TokenType::Number(_)),
            _ => false,
        }
}

fn parse_for(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let (variable, mut consumed) =
        expect_identifier(tokens, 1, "Expected loop variable after 'for'")?;
    consumed = expect(tokens, consumed, TokenType::In, "Expected 'in' after loop variable")?;

    let (first, first_consumed) = parse_expression(&tokens[consumed..], 0)?;
    consumed += first_consumed;
    consumed = expect(
        tokens,
        consumed,
        TokenType::Colon,
        "Expected ':' after for-loop range start or iterable",
    )?;

    // `start:end:` is a range only when a second expression is closed by ':'
    let range_end = match parse_expression(&tokens[consumed..], 0) {
        Ok((end, end_consumed)) if check(tokens, consumed + end_consumed, &TokenType::Colon) => {
            Some((end, end_consumed))
        }
        _ => None,
    };

    let kind = match range_end {
        Some((end, end_consumed)) => {
            consumed += end_consumed;

            let kind = if step_follows(&tokens[consumed..]) {
                consumed += 1; // Skip step separator
                let (step, step_consumed) = parse_expression(&tokens[consumed..], 0)?;
                consumed += step_consumed;

                let negative = matches!(
                    step.expr_type,
                    ExprType::Unary {
                        operator: UnaryOp::Negate,
                        ..
                    }
                );
                if negative {
                    ForKind::Countdown {
                        start: first,
                        end,
                        step,
                    }
                } else {
                    ForKind::Step {
                        start: first,
                        end,
                        step,
                    }
                }
            } else {
                ForKind::Range { start: first, end }
            };

            consumed = expect(
                tokens,
                consumed,
                TokenType::Colon,
                "Expected ':' after for-loop range",
            )?;
            kind
        }
        None => ForKind::Array { iterable: first },
    };

    let (body, body_consumed) = parse_closed_block(&tokens[consumed..], "for loop")?;
    consumed += body_consumed;

    Ok((
        Stmt {
            stmt_type: StmtType::For(ForLoop {
                variable,
                kind,
                body,
            }),
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_switch(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let mut consumed = 1; // Skip 'switch'

    let (subject, subject_consumed) = parse_expression(&tokens[consumed..], 0)?;
    consumed += subject_consumed;
    consumed = expect(
        tokens,
        consumed,
        TokenType::Colon,
        "Expected ':' after switch subject",
    )?;

    let mut cases = Vec::new();
    while check(tokens, consumed, &TokenType::Case) {
        consumed += 1;
        let (value, value_consumed) = parse_expression(&tokens[consumed..], 0)?;
        consumed += value_consumed;
        consumed = expect(tokens, consumed, TokenType::Colon, "Expected ':' after case value")?;

        let (body, body_consumed) = parse_block(&tokens[consumed..])?;
        consumed += body_consumed;
        cases.push(SwitchCase { value, body });
    }

    let default = if check(tokens, consumed, &TokenType::Default) {
        consumed = expect(tokens, consumed + 1, TokenType::Colon, "Expected ':' after 'default'")?;
        let (body, body_consumed) = parse_block(&tokens[consumed..])?;
        consumed += body_consumed;
        Some(body)
    } else {
        None
    };

    consumed = expect(
        tokens,
        consumed,
        TokenType::End,
        "Expected 'case', 'default' or 'end' in switch statement",
    )?;

    Ok((
        Stmt {
            stmt_type: StmtType::Switch {
                subject,
                cases,
                default,
            },
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_try(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let mut consumed = expect(tokens, 1, TokenType::Colon, "Expected ':' after 'try'")?;

    let (body, body_consumed) = parse_block(&tokens[consumed..])?;
    consumed += body_consumed;
    consumed = expect(tokens, consumed, TokenType::Catch, "Expected 'catch' after try block")?;

    let (catch_var, after_var) =
        expect_identifier(tokens, consumed, "Expected identifier after 'catch'")?;
    consumed = expect(
        tokens,
        after_var,
        TokenType::Colon,
        "Expected ':' after catch variable",
    )?;

    let (handler, handler_consumed) = parse_closed_block(&tokens[consumed..], "try statement")?;
    consumed += handler_consumed;

    Ok((
        Stmt {
            stmt_type: StmtType::Try {
                body,
                catch_var,
                handler,
            },
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_print(tokens: &[Token]) -> Result<(Stmt, usize)> {
    if !check(tokens, 1, &TokenType::LeftParen) {
        return parser_error("Expected '(' after 'print'", token_at(tokens, 1));
    }

    let (arguments, args_consumed) = parse_arguments(&tokens[1..])?;
    let consumed = expect(
        tokens,
        1 + args_consumed,
        TokenType::Semicolon,
        "Expected ';' after print statement",
    )?;

    Ok((
        Stmt {
            stmt_type: StmtType::Print(arguments),
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_return(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let mut consumed = 1; // Skip 'return'

    let value = if check(tokens, consumed, &TokenType::Semicolon) {
        None
    } else {
        let (value, value_consumed) = parse_expression(&tokens[consumed..], 0)?;
        consumed += value_consumed;
        Some(value)
    };

    consumed = expect(
        tokens,
        consumed,
        TokenType::Semicolon,
        "Expected ';' after return statement",
    )?;

    Ok((
        Stmt {
            stmt_type: StmtType::Return(value),
            line: tokens[0].line,
        },
        consumed,
    ))
}

// Statements that start with an identifier: definitions, assignments or expressions
fn parse_identifier_statement(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let name = match &tokens[0].token_type {
        TokenType::Identifier(name) => name.clone(),
        _ => return parse_expression_statement(tokens),
    };
    let line = tokens[0].line;

    match token_at(tokens, 1).token_type {
        // `name(params): ... end` declares a function, anything else is a call
        TokenType::LeftParen => {
            let declares = match parse_params(&tokens[1..]) {
                Ok((_, params_consumed)) => matches!(
                    token_at(tokens, 1 + params_consumed).token_type,
                    TokenType::Colon | TokenType::Arrow
                ),
                Err(_) => false,
            };
            if declares {
                return parse_function(tokens, 0);
            }
        }
        TokenType::Equal => {
            let (value, value_consumed) = parse_expression(&tokens[2..], 0)?;
            let consumed = skip_semicolon(tokens, 2 + value_consumed);
            return Ok((
                Stmt {
                    stmt_type: StmtType::Assign { name, value },
                    line,
                },
                consumed,
            ));
        }
        TokenType::LeftSquare => {
            if let Ok((index, index_consumed)) = parse_expression(&tokens[2..], 0) {
                let close = 2 + index_consumed;
                if check(tokens, close, &TokenType::RightSquare)
                    && check(tokens, close + 1, &TokenType::Equal)
                {
                    let (value, value_consumed) = parse_expression(&tokens[close + 2..], 0)?;
                    let consumed = skip_semicolon(tokens, close + 2 + value_consumed);
                    return Ok((
                        Stmt {
                            stmt_type: StmtType::IndexAssign { name, index, value },
                            line,
                        },
                        consumed,
                    ));
                }
            }
        }
        TokenType::Dot => {
            let mut properties = Vec::new();
            let mut index = 1;
            while check(tokens, index, &TokenType::Dot) {
                match &token_at(tokens, index + 1).token_type {
                    TokenType::Identifier(property) => properties.push(property.clone()),
                    _ => break,
                }
                index += 2;
            }

            if check(tokens, index, &TokenType::Equal) && !properties.is_empty() {
                if properties.len() + 1 > MAX_CHAIN_DEPTH {
                    return parser_error(
                        &format!(
                            "Property assignment chain deeper than {} levels",
                            MAX_CHAIN_DEPTH
                        ),
                        &tokens[0],
                    );
                }

                let (value, value_consumed) = parse_expression(&tokens[index + 1..], 0)?;
                let consumed = skip_semicolon(tokens, index + 1 + value_consumed);
                let base = name;
                let mut properties = properties.into_iter();
                let chain = match (properties.next(), properties.next(), properties.next()) {
                    (Some(first), None, None) => PropertyChain::Two { base, first, value },
                    (Some(first), Some(second), None) => PropertyChain::Three {
                        base,
                        first,
                        second,
                        value,
                    },
                    (Some(first), Some(second), Some(third)) => PropertyChain::Four {
                        base,
                        first,
                        second,
                        third,
                        value,
                    },
                    _ => return parser_error("Malformed property assignment", &tokens[0]),
                };

                return Ok((
                    Stmt {
                        stmt_type: StmtType::PropertyAssign(chain),
                        line,
                    },
                    consumed,
                ));
            }
        }
        _ => (),
    }

    parse_expression_statement(tokens)
}

fn parse_expression_statement(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let (expr, consumed) = parse_expression(tokens, 0)?;
    let consumed = skip_semicolon(tokens, consumed);

    Ok((
        Stmt {
            line: expr.line,
            stmt_type: StmtType::Expression(expr),
        },
        consumed,
    ))
}

fn binary_operator(token_type: &TokenType) -> Option<BinaryOp> {
    match token_type {
        TokenType::Plus => Some(BinaryOp::Add),
        TokenType::Minus => Some(BinaryOp::Subtract),
        TokenType::Star => Some(BinaryOp::Multiply),
        TokenType::Slash => Some(BinaryOp::Divide),
        TokenType::Percent => Some(BinaryOp::Modulo),
        TokenType::EqualEqual => Some(BinaryOp::Equal),
        TokenType::BangEqual => Some(BinaryOp::NotEqual),
        TokenType::Less => Some(BinaryOp::Less),
        TokenType::LessEqual => Some(BinaryOp::LessEqual),
        TokenType::Greater => Some(BinaryOp::Greater),
        TokenType::GreaterEqual => Some(BinaryOp::GreaterEqual),
        TokenType::And => Some(BinaryOp::And),
        TokenType::Or => Some(BinaryOp::Or),
        _ => None,
    }
}

pub fn parse_expression(tokens: &[Token], precedence: u8) -> Result<(Expr, usize)> {
    let (mut left, mut consumed) = parse_postfix(tokens)?;

    // Climb while the next operator binds tighter than the caller's
    while let Some(operator) = binary_operator(&token_at(tokens, consumed).token_type) {
        let op_precedence = operator.precedence();
        if precedence >= op_precedence {
            break;
        }

        let (right, right_consumed) = parse_expression(&tokens[consumed + 1..], op_precedence)?;
        let line = left.line;
        left = Expr::new(
            ExprType::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            },
            line,
        );
        consumed += 1 + right_consumed;
    }

    Ok((left, consumed))
}

fn parse_postfix(tokens: &[Token]) -> Result<(Expr, usize)> {
    let (mut expr, mut consumed) = parse_primary(tokens)?;

    loop {
        let line = expr.line;
        match token_at(tokens, consumed).token_type {
            TokenType::Dot => {
                let (name, after_name) = expect_identifier(
                    tokens,
                    consumed + 1,
                    "Expected property name after '.'",
                )?;
                expr = Expr::new(
                    ExprType::Member {
                        object: Box::new(expr),
                        name,
                    },
                    line,
                );
                consumed = after_name;
            }
            TokenType::LeftSquare => {
                let (index, index_consumed) = parse_expression(&tokens[consumed + 1..], 0)?;
                consumed = expect(
                    tokens,
                    consumed + 1 + index_consumed,
                    TokenType::RightSquare,
                    "Expected ']' after index",
                )?;
                expr = Expr::new(
                    ExprType::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                );
            }
            TokenType::LeftParen => {
                let (arguments, args_consumed) = parse_arguments(&tokens[consumed..])?;
                consumed += args_consumed;
                expr = Expr::new(
                    ExprType::Call {
                        callee: Box::new(expr),
                        arguments,
                    },
                    line,
                );
            }
            _ => break,
        }
    }

    Ok((expr, consumed))
}

// tokens[0] must be '('
fn parse_arguments(tokens: &[Token]) -> Result<(Vec<Expr>, usize)> {
    let mut consumed = 1; // Skip '('
    let mut arguments = Vec::new();

    while !check(tokens, consumed, &TokenType::RightParen) {
        if !arguments.is_empty() {
            consumed = expect(
                tokens,
                consumed,
                TokenType::Comma,
                "Expected ',' between arguments",
            )?;
        }

        let (arg, arg_consumed) = parse_expression(&tokens[consumed..], 0)?;
        arguments.push(arg);
        consumed += arg_consumed;
    }

    Ok((arguments, consumed + 1))
}

fn parse_primary(tokens: &[Token]) -> Result<(Expr, usize)> {
    let line = tokens[0].line;
    let literal = |literal: Literal| -> Result<(Expr, usize)> {
        Ok((Expr::new(ExprType::Literal(literal), line), 1))
    };

    match &tokens[0].token_type {
        TokenType::Number(n) => literal(Literal::Number(*n)),
        TokenType::String(s) => literal(Literal::String(s.clone())),
        TokenType::True => literal(Literal::Boolean(true)),
        TokenType::False => literal(Literal::Boolean(false)),
        TokenType::Identifier(name) => Ok((Expr::new(ExprType::Variable(name.clone()), line), 1)),
        TokenType::Minus => match token_at(tokens, 1).token_type {
            TokenType::Number(n) => Ok((
                Expr::new(
                    ExprType::Unary {
                        operator: UnaryOp::Negate,
                        operand: Box::new(Expr::new(ExprType::Literal(Literal::Number(n)), line)),
                    },
                    line,
                ),
                2,
            )),
            _ => parser_error(
                "Unary minus is only supported before numeric literals",
                token_at(tokens, 1),
            ),
        },
        TokenType::LeftParen => {
            let (expr, expr_consumed) = parse_expression(&tokens[1..], 0)?;
            let consumed = expect(
                tokens,
                1 + expr_consumed,
                TokenType::RightParen,
                "Expected ')' after expression",
            )?;
            Ok((expr, consumed))
        }
        TokenType::LeftSquare => parse_array(tokens),
        TokenType::LeftBrace => parse_object(tokens),
        _ => parser_error("Expected expression", &tokens[0]),
    }
}

fn parse_array(tokens: &[Token]) -> Result<(Expr, usize)> {
    let mut consumed = 1; // Skip '['
    let mut elements = Vec::new();

    if !check(tokens, consumed, &TokenType::RightSquare) {
        loop {
            let (element, element_consumed) = parse_expression(&tokens[consumed..], 0)?;
            elements.push(element);
            consumed += element_consumed;

            match token_at(tokens, consumed).token_type {
                TokenType::Comma => {
                    consumed += 1;
                    if check(tokens, consumed, &TokenType::RightSquare) {
                        return parser_error(
                            "Trailing comma in array literal",
                            token_at(tokens, consumed),
                        );
                    }
                }
                TokenType::RightSquare => break,
                _ => {
                    return parser_error(
                        "Expected ',' or ']' in array literal",
                        token_at(tokens, consumed),
                    )
                }
            }
        }
    }

    Ok((Expr::new(ExprType::Array(elements), tokens[0].line), consumed + 1))
}

fn parse_object(tokens: &[Token]) -> Result<(Expr, usize)> {
    let mut consumed = 1; // Skip '{'
    let mut fields = Vec::new();

    if !check(tokens, consumed, &TokenType::RightBrace) {
        loop {
            let key = match &token_at(tokens, consumed).token_type {
                TokenType::Identifier(key) | TokenType::String(key) => key.clone(),
                _ => {
                    return parser_error(
                        "Expected property name in object literal",
                        token_at(tokens, consumed),
                    )
                }
            };
            consumed = expect(
                tokens,
                consumed + 1,
                TokenType::Colon,
                "Expected ':' after property name",
            )?;

            let (value, value_consumed) = parse_expression(&tokens[consumed..], 0)?;
            fields.push((key, value));
            consumed += value_consumed;

            match token_at(tokens, consumed).token_type {
                TokenType::Comma => {
                    consumed += 1;
                    if check(tokens, consumed, &TokenType::RightBrace) {
                        return parser_error(
                            "Trailing comma in object literal",
                            token_at(tokens, consumed),
                        );
                    }
                }
                TokenType::RightBrace => break,
                _ => {
                    return parser_error(
                        "Expected ',' or '}' in object literal",
                        token_at(tokens, consumed),
                    )
                }
            }
        }
    }

    Ok((Expr::new(ExprType::Object(fields), tokens[0].line), consumed + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tokenizer::tokenize, value::Number};
    use pretty_assertions::assert_eq;

    // Helper function to tokenize and parse a string
    fn parse_str(input: &str) -> Result<Block> {
        let tokens = tokenize(input.as_bytes())?;
        parse(&tokens)
    }

    fn parse_single(input: &str) -> Result<StmtType> {
        let mut block = parse_str(input)?;
        assert_eq!(block.len(), 1, "expected exactly one statement");
        Ok(block.remove(0).stmt_type)
    }

    fn parse_expr(input: &str) -> Result<ExprType> {
        match parse_single(input)? {
            StmtType::Expression(expr) => Ok(expr.expr_type),
            other => panic!("Expected expression statement, got {:?}", other),
        }
    }

    fn number(value: i64) -> ExprType {
        ExprType::Literal(Literal::Number(Number::from_int(value).unwrap()))
    }

    #[test]
    fn test_literals() -> Result<()> {
        assert_eq!(parse_expr("42;")?, number(42));
        assert_eq!(
            parse_expr("\"hello\";")?,
            ExprType::Literal(Literal::String("hello".to_string()))
        );
        assert_eq!(parse_expr("True;")?, ExprType::Literal(Literal::Boolean(true)));
        assert_eq!(parse_expr("false;")?, ExprType::Literal(Literal::Boolean(false)));
        Ok(())
    }

    #[test]
    fn test_operator_precedence() -> Result<()> {
        // 1 + 2 * 3 == 7 and x groups as ((1 + (2 * 3)) == 7) and x
        if let ExprType::Binary {
            left, operator, ..
        } = parse_expr("1 + 2 * 3 == 7 and x;")?
        {
            assert_eq!(operator, BinaryOp::And);
            if let ExprType::Binary { left, operator, .. } = left.expr_type {
                assert_eq!(operator, BinaryOp::Equal);
                if let ExprType::Binary { right, operator, .. } = left.expr_type {
                    assert_eq!(operator, BinaryOp::Add);
                    assert!(matches!(
                        right.expr_type,
                        ExprType::Binary {
                            operator: BinaryOp::Multiply,
                            ..
                        }
                    ));
                } else {
                    panic!("Expected addition");
                }
            } else {
                panic!("Expected equality");
            }
        } else {
            panic!("Expected binary expression");
        }

        // Same precedence associates to the left: (10 - 4) - 3
        if let ExprType::Binary { left, right, .. } = parse_expr("10 - 4 - 3;")? {
            assert!(matches!(
                left.expr_type,
                ExprType::Binary {
                    operator: BinaryOp::Subtract,
                    ..
                }
            ));
            assert_eq!(right.expr_type, number(3));
        } else {
            panic!("Expected binary expression");
        }

        // Parentheses override precedence
        if let ExprType::Binary { left, operator, .. } = parse_expr("(1 + 2) * 3;")? {
            assert_eq!(operator, BinaryOp::Multiply);
            assert!(matches!(
                left.expr_type,
                ExprType::Binary {
                    operator: BinaryOp::Add,
                    ..
                }
            ));
        } else {
            panic!("Expected binary expression");
        }
        Ok(())
    }

    #[test]
    fn test_unary_minus_only_on_numbers() -> Result<()> {
        assert!(matches!(
            parse_expr("-5;")?,
            ExprType::Unary {
                operator: UnaryOp::Negate,
                ..
            }
        ));
        assert!(matches!(
            parse_expr("3 - -2;")?,
            ExprType::Binary {
                operator: BinaryOp::Subtract,
                ..
            }
        ));
        assert!(parse_str("-x;").is_err());
        assert!(parse_str("-(1 + 2);").is_err());
        Ok(())
    }

    #[test]
    fn test_array_and_object_literals() -> Result<()> {
        if let ExprType::Array(elements) = parse_expr("[1, \"two\", [3]];")? {
            assert_eq!(elements.len(), 3);
            assert!(matches!(elements[2].expr_type, ExprType::Array(_)));
        } else {
            panic!("Expected array literal");
        }

        assert_eq!(parse_expr("[];")?, ExprType::Array(Vec::new()));

        if let ExprType::Object(fields) = parse_expr("{name: \"myco\", \"version\": 2};")? {
            let keys: Vec<&str> = fields.iter().map(|(key, _)| key.as_str()).collect();
            assert_eq!(keys, vec!["name", "version"]);
        } else {
            panic!("Expected object literal");
        }

        assert!(parse_str("[1, 2,];").is_err());
        assert!(parse_str("[1 2];").is_err());
        assert!(parse_str("[1, 2").is_err());
        assert!(parse_str("{a: 1,};").is_err());
        assert!(parse_str("{a 1};").is_err());
        assert!(parse_str("{a: 1").is_err());
        Ok(())
    }

    #[test]
    fn test_postfix_chains() -> Result<()> {
        // m.items[0](1) is Call(Index(Member(m, items), 0), [1])
        if let ExprType::Call { callee, arguments } = parse_expr("m.items[0](1);")? {
            assert_eq!(arguments.len(), 1);
            if let ExprType::Index { object, .. } = callee.expr_type {
                assert!(matches!(
                    object.expr_type,
                    ExprType::Member { ref name, .. } if name == "items"
                ));
            } else {
                panic!("Expected index access");
            }
        } else {
            panic!("Expected call");
        }

        assert!(parse_str("a.;").is_err());
        assert!(parse_str("a[1;").is_err());
        assert!(parse_str("f(1, 2;").is_err());
        assert!(parse_str("f(1,);").is_err());
        Ok(())
    }

    #[test]
    fn test_let_and_lambdas() -> Result<()> {
        assert!(matches!(
            parse_single("let x = 1 + 2;")?,
            StmtType::Let { ref name, annotation: None, .. } if name == "x"
        ));
        assert!(matches!(
            parse_single("let count: int = 0;")?,
            StmtType::Let {
                annotation: Some(TypeAnnotation::Int),
                ..
            }
        ));

        if let StmtType::Let { initializer, .. } = parse_single("let double = x => x * 2;")? {
            if let ExprType::Lambda(lambda) = initializer.expr_type {
                assert_eq!(lambda.params, vec!["x"]);
            } else {
                panic!("Expected lambda");
            }
        }

        if let StmtType::Let { initializer, .. } = parse_single("let add = (a, b) => a + b;")? {
            if let ExprType::Lambda(lambda) = initializer.expr_type {
                assert_eq!(lambda.params, vec!["a", "b"]);
            } else {
                panic!("Expected lambda");
            }
        }

        // A parenthesized expression is not a lambda
        if let StmtType::Let { initializer, .. } = parse_single("let y = (a + b);")? {
            assert!(matches!(initializer.expr_type, ExprType::Binary { .. }));
        }

        assert!(parse_str("let;").is_err());
        assert!(parse_str("let x;").is_err());
        assert!(parse_str("let x = ;").is_err());
        assert!(parse_str("let x = 1\nprint(x);").is_err());
        Ok(())
    }

    #[test]
    fn test_function_forms() -> Result<()> {
        let forms = [
            "func add(a, b): return a + b; end",
            "let add(a, b): return a + b; end",
            "add(a, b): return a + b; end",
        ];
        for source in forms {
            if let StmtType::Function(function) = parse_single(source)? {
                assert_eq!(function.name, "add");
                assert_eq!(function.params.len(), 2);
                assert_eq!(function.body.len(), 1);
            } else {
                panic!("Expected function definition for {}", source);
            }
        }

        if let StmtType::Function(function) =
            parse_single("func greet(name: string, times: int) -> string: return name; end")?
        {
            assert_eq!(function.params[0].annotation, Some(TypeAnnotation::String));
            assert_eq!(function.params[1].annotation, Some(TypeAnnotation::Int));
            assert_eq!(function.return_type, Some(TypeAnnotation::String));
        } else {
            panic!("Expected function definition");
        }

        // Without a trailing ':' the same shape is a call
        assert!(matches!(
            parse_single("add(1, 2);")?,
            StmtType::Expression(Expr {
                expr_type: ExprType::Call { .. },
                ..
            })
        ));

        assert!(parse_str("func f(1): end").is_err());
        assert!(parse_str("func f(a,): end").is_err());
        assert!(parse_str("func f(a) return a; end").is_err());
        assert!(parse_str("func f(a): return a;").is_err());
        Ok(())
    }

    #[test]
    fn test_for_loop_variants() -> Result<()> {
        let kind = |source: &str| -> Result<ForKind> {
            match parse_single(source)? {
                StmtType::For(for_loop) => Ok(for_loop.kind),
                other => panic!("Expected for loop, got {:?}", other),
            }
        };

        assert!(matches!(kind("for i in 1:10: print(i); end")?, ForKind::Range { .. }));
        assert!(matches!(kind("for i in 0:10:2: print(i); end")?, ForKind::Step { .. }));
        assert!(matches!(
            kind("for i in 10:0:-2: print(i); end")?,
            ForKind::Countdown { .. }
        ));
        assert!(matches!(
            kind("for item in items: print(item); end")?,
            ForKind::Array { .. }
        ));
        assert!(matches!(
            kind("for item in items: total = total + item; end")?,
            ForKind::Array { .. }
        ));
        assert!(matches!(
            kind("for i in 1:n + 1: print(i); end")?,
            ForKind::Range { .. }
        ));

        assert!(parse_str("for i 1:10: end").is_err());
        assert!(parse_str("for i in 1 10: print(i); end").is_err());
        assert!(parse_str("for i in 1:10: print(i);").is_err());
        Ok(())
    }

    #[test]
    fn test_if_else_chains() -> Result<()> {
        let source = r#"
            if x > 10:
                print("big");
            else if x > 5:
                print("medium");
            else:
                print("small");
            end"#;

        if let StmtType::If {
            then_branch,
            else_branch: Some(else_branch),
            ..
        } = parse_single(source)?
        {
            assert_eq!(then_branch.len(), 1);
            assert_eq!(else_branch.len(), 1);
            assert!(matches!(
                else_branch[0].stmt_type,
                StmtType::If {
                    else_branch: Some(_),
                    ..
                }
            ));
        } else {
            panic!("Expected if with else branch");
        }

        assert!(parse_str("if x print(x); end").is_err());
        assert!(parse_str("if x: print(x);").is_err());
        assert!(parse_str("if x: print(x); else print(y); end").is_err());
        Ok(())
    }

    #[test]
    fn test_while_switch_try() -> Result<()> {
        assert!(matches!(
            parse_single("while i < 10: i = i + 1; end")?,
            StmtType::While { .. }
        ));

        let source = r#"
            switch day:
                case 1: print("mon");
                case 2: print("tue");
                default: print("other");
            end"#;
        if let StmtType::Switch { cases, default, .. } = parse_single(source)? {
            assert_eq!(cases.len(), 2);
            assert!(default.is_some());
        } else {
            panic!("Expected switch");
        }

        if let StmtType::Try {
            body,
            catch_var,
            handler,
        } = parse_single("try: let x = 1 / 0; catch e: print(e); end")?
        {
            assert_eq!(body.len(), 1);
            assert_eq!(catch_var, "e");
            assert_eq!(handler.len(), 1);
        } else {
            panic!("Expected try");
        }

        assert!(parse_str("switch x: print(x); end").is_err());
        assert!(parse_str("try: print(1); end").is_err());
        assert!(parse_str("try: print(1); catch: end").is_err());
        Ok(())
    }

    #[test]
    fn test_use_statements() -> Result<()> {
        assert_eq!(
            parse_single("use ./lib/util as u;")?,
            StmtType::Use {
                path: ModulePath::Path("./lib/util".to_string()),
                alias: "u".to_string(),
            }
        );
        assert_eq!(
            parse_single("use \"m\" as m")?,
            StmtType::Use {
                path: ModulePath::String("m".to_string()),
                alias: "m".to_string(),
            }
        );
        assert_eq!(
            parse_single("use math as m;")?,
            StmtType::Use {
                path: ModulePath::Name("math".to_string()),
                alias: "m".to_string(),
            }
        );
        assert!(parse_str("use math;").is_err());
        assert!(parse_str("use 5 as m;").is_err());
        Ok(())
    }

    #[test]
    fn test_assignments() -> Result<()> {
        assert!(matches!(parse_single("x = 5;")?, StmtType::Assign { .. }));
        assert!(matches!(
            parse_single("items[i + 1] = 5;")?,
            StmtType::IndexAssign { .. }
        ));
        // Without '=' an index is just an expression
        assert!(matches!(parse_single("items[0];")?, StmtType::Expression(_)));
        Ok(())
    }

    #[test]
    fn test_chained_property_assignment() -> Result<()> {
        assert!(matches!(
            parse_single("a.b = 1;")?,
            StmtType::PropertyAssign(PropertyChain::Two { .. })
        ));
        assert!(matches!(
            parse_single("a.b.c = 1;")?,
            StmtType::PropertyAssign(PropertyChain::Three { .. })
        ));

        if let StmtType::PropertyAssign(chain) = parse_single("a.b.c.d = 7;")? {
            assert_eq!(chain.depth(), 4);
            assert_eq!(chain.base(), "a");
            assert_eq!(chain.properties(), vec!["b", "c", "d"]);
            assert_eq!(chain.value().expr_type, number(7));
        } else {
            panic!("Expected property assignment");
        }

        assert!(parse_str("a.b.c.d.e = 7;").is_err());
        // A member read is still an ordinary expression
        assert!(matches!(parse_single("a.b.c;")?, StmtType::Expression(_)));
        Ok(())
    }

    #[test]
    fn test_statement_terminators() -> Result<()> {
        assert!(parse_str("print(1)").is_err());
        assert!(parse_str("return 1").is_err());
        assert!(parse_str("break").is_err());
        assert!(parse_str("end").is_err());
        assert!(parse_str("print 1;").is_err());
        assert_eq!(parse_str("")?.len(), 0);
        Ok(())
    }

    #[test]
    fn test_reparse_is_identical() -> Result<()> {
        let source = r#"
            use "m" as m;
            let xs = [1, 2, 3];
            func total(values):
                let sum = 0;
                for v in values: sum = sum + v; end
                return sum;
            end
            a.b.c = {k: total(xs)};
            try: print(1 / 0); catch e: print(e); end
        "#;
        let tokens = tokenize(source.as_bytes())?;
        let first = parse(&tokens)?;
        let second = parse(&tokens)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_error_lines() {
        let err = parse_str("let x = 1;\nlet y = [1, 2,];").unwrap_err();
        assert!(matches!(err, crate::error::Error::Parser { line: 2, .. }));
    }
}
