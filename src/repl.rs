use nu_ansi_term::{Color, Style};
use reedline::{
    Highlighter, Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus,
    StyledText, ValidationResult, Validator,
};
use std::borrow::Cow;

use crate::{
    error::Error,
    tokenizer::{tokenize, Token, TokenType},
};

#[derive(Clone)]
pub struct REPLPrompt;

impl Prompt for REPLPrompt {
    fn render_prompt_left(&self) -> Cow<str> {
        Cow::Borrowed("myco")
    }

    fn render_prompt_right(&self) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _edit_mode: PromptEditMode) -> Cow<str> {
        Cow::Borrowed("❯ ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<str> {
        Cow::Borrowed("  ... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        Cow::Owned(format!(
            "({}reverse-search: {}) ",
            prefix, history_search.term
        ))
    }
}

/// Keeps the buffer open while a `:` block lacks its `end` or a bracket is unclosed.
pub struct REPLValidator;

impl Validator for REPLValidator {
    fn validate(&self, line: &str) -> ValidationResult {
        if line.trim().is_empty() {
            return ValidationResult::Complete;
        }

        let tokens = match tokenize(line.as_bytes()) {
            Ok(tokens) => tokens,
            Err(Error::Tokenizer { message, .. }) if message.starts_with("Unterminated") => {
                return ValidationResult::Incomplete;
            }
            // Let the parser report everything else
            Err(_) => return ValidationResult::Complete,
        };

        let mut blocks = 0_i64;
        let mut brackets = 0_i64;

        for (i, token) in tokens.iter().enumerate() {
            let previous = i.checked_sub(1).map(|p| &tokens[p]);

            match token.token_type {
                // `else if` shares the `end` of its chain
                TokenType::If => {
                    if !previous.is_some_and(|p| p.token_type == TokenType::Else) {
                        blocks += 1;
                    }
                }
                TokenType::While
                | TokenType::For
                | TokenType::Switch
                | TokenType::Try
                | TokenType::Func => blocks += 1,
                TokenType::End => blocks -= 1,
                TokenType::Identifier(_) if opens_definition(&tokens, i, previous) => blocks += 1,
                TokenType::LeftParen | TokenType::LeftSquare | TokenType::LeftBrace => {
                    brackets += 1
                }
                TokenType::RightParen | TokenType::RightSquare | TokenType::RightBrace => {
                    brackets -= 1
                }
                _ => {}
            }
        }

        if blocks > 0 || brackets > 0 {
            ValidationResult::Incomplete
        } else {
            ValidationResult::Complete
        }
    }
}

/// `name(params):` or `let name(params) -> type:` at the start of a statement.
fn opens_definition(tokens: &[Token], index: usize, previous: Option<&Token>) -> bool {
    let statement_start = previous.map_or(true, |p| {
        p.line != tokens[index].line
            || matches!(
                p.token_type,
                TokenType::Semicolon | TokenType::End | TokenType::Let
            )
    });
    if !statement_start || tokens.get(index + 1).map(|t| &t.token_type) != Some(&TokenType::LeftParen) {
        return false;
    }

    let mut depth = 0;
    for (offset, token) in tokens[index + 1..].iter().enumerate() {
        match token.token_type {
            TokenType::LeftParen => depth += 1,
            TokenType::RightParen => {
                depth -= 1;
                if depth == 0 {
                    return matches!(
                        tokens.get(index + offset + 2).map(|t| &t.token_type),
                        Some(TokenType::Colon | TokenType::Arrow)
                    );
                }
            }
            _ => {}
        }
    }
    false
}

pub static KEYWORD_COLOR: Color = Color::LightBlue;
pub static LITERAL_COLOR: Color = Color::Yellow;
pub static DEFAULT_COLOR: Color = Color::White;
pub static OPERATOR_COLOR: Color = Color::DarkGray;

pub struct SyntaxHighlighter;

impl Highlighter for SyntaxHighlighter {
    fn highlight(&self, line: &str, _cursor: usize) -> StyledText {
        let mut styled_text = StyledText::new();

        let tokens = match tokenize(line.as_bytes()) {
            Ok(t) => t,
            Err(_) => {
                styled_text.push((Style::new().fg(DEFAULT_COLOR), line.to_string()));
                return styled_text;
            }
        };

        let mut remaining = line;

        for token in tokens {
            if token.token_type == TokenType::EOF {
                break;
            }

            let Some(pos) = remaining.find(&token.lexeme) else {
                continue;
            };

            if pos > 0 {
                styled_text.push((Style::new().fg(DEFAULT_COLOR), remaining[..pos].to_string()));
            }

            let color = match &token.token_type {
                t if t.is_keyword() => KEYWORD_COLOR,
                TokenType::String(_) | TokenType::Number(_) | TokenType::Path(_) => LITERAL_COLOR,
                TokenType::Identifier(_) => DEFAULT_COLOR,
                _ => OPERATOR_COLOR,
            };

            styled_text.push((Style::new().fg(color), token.lexeme.clone()));
            remaining = &remaining[pos + token.lexeme.len()..];
        }

        if !remaining.is_empty() {
            styled_text.push((Style::new().fg(DEFAULT_COLOR), remaining.to_string()));
        }

        styled_text
    }
}
