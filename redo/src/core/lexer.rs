//! Tokenizer for success conditions.

use crate::core::predicate::PredicateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl Token {
    /// Short human-readable name used in syntax errors.
    pub fn describe(&self) -> String {
        match self {
            Token::Int(value) => format!("integer {value}"),
            Token::Str(value) => format!("string {value:?}"),
            Token::Ident(name) => format!("`{name}`"),
            Token::Eq => "`==`".to_string(),
            Token::Ne => "`!=`".to_string(),
            Token::Lt => "`<`".to_string(),
            Token::Le => "`<=`".to_string(),
            Token::Gt => "`>`".to_string(),
            Token::Ge => "`>=`".to_string(),
            Token::And => "`and`".to_string(),
            Token::Or => "`or`".to_string(),
            Token::Not => "`not`".to_string(),
            Token::LParen => "`(`".to_string(),
            Token::RParen => "`)`".to_string(),
        }
    }
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Split `src` into tokens.
///
/// Keywords `and`/`or`/`not` (and their `&&`/`||`/`!` spellings) become
/// dedicated tokens; every other word is an `Ident` resolved by the parser.
pub fn tokenize(src: &str) -> Result<Vec<Spanned>, PredicateError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        let token = match ch {
            '(' => {
                chars.next();
                Token::LParen
            }
            ')' => {
                chars.next();
                Token::RParen
            }
            '=' => {
                chars.next();
                if chars.next_if(|&(_, c)| c == '=').is_none() {
                    return Err(syntax(offset, "expected `==`, found `=`"));
                }
                Token::Eq
            }
            '!' => {
                chars.next();
                if chars.next_if(|&(_, c)| c == '=').is_some() {
                    Token::Ne
                } else {
                    Token::Not
                }
            }
            '<' => {
                chars.next();
                if chars.next_if(|&(_, c)| c == '=').is_some() {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                chars.next();
                if chars.next_if(|&(_, c)| c == '=').is_some() {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '&' | '|' => {
                chars.next();
                if chars.next_if(|&(_, c)| c == ch).is_none() {
                    return Err(syntax(offset, format!("expected `{ch}{ch}`")));
                }
                if ch == '&' { Token::And } else { Token::Or }
            }
            '"' | '\'' => {
                chars.next();
                Token::Str(read_string(&mut chars, ch, offset)?)
            }
            '-' | '0'..='9' => {
                let mut digits = String::new();
                if ch == '-' {
                    chars.next();
                    digits.push('-');
                }
                while let Some((_, c)) = chars.next_if(|&(_, c)| c.is_ascii_digit()) {
                    digits.push(c);
                }
                if digits == "-" {
                    return Err(syntax(offset, "expected digits after `-`"));
                }
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| syntax(offset, format!("integer out of range: {digits}")))?;
                Token::Int(value)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some((_, c)) =
                    chars.next_if(|&(_, c)| c.is_alphanumeric() || c == '_')
                {
                    word.push(c);
                }
                match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                }
            }
            other => return Err(syntax(offset, format!("unexpected character {other:?}"))),
        };

        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    quote: char,
    start: usize,
) -> Result<String, PredicateError> {
    let mut out = String::new();
    loop {
        let Some((offset, c)) = chars.next() else {
            return Err(syntax(start, "unterminated string literal"));
        };
        match c {
            c if c == quote => return Ok(out),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, '"')) => out.push('"'),
                Some((_, '\'')) => out.push('\''),
                Some((_, other)) => {
                    return Err(syntax(offset, format!("unknown escape `\\{other}`")));
                }
                None => return Err(syntax(start, "unterminated string literal")),
            },
            c => out.push(c),
        }
    }
}

fn syntax(offset: usize, message: impl Into<String>) -> PredicateError {
    PredicateError::Syntax {
        offset,
        message: message.into(),
    }
}
