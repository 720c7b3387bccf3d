//! Path expression tokenizer

use crate::error::{NetconfError, Result};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A path token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Slash,
    SlashSlash,
    Dot,
    DotDot,
    Colon,
    ColonColon,
    /// `+`, `-` or `*`
    Op(char),
    Compare(CmpOp),
    /// Name, keyword or function name
    Atom(String),
    /// `@name`
    Attr(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Slash => f.write_str("/"),
            Token::SlashSlash => f.write_str("//"),
            Token::Dot => f.write_str("."),
            Token::DotDot => f.write_str(".."),
            Token::Colon => f.write_str(":"),
            Token::ColonColon => f.write_str("::"),
            Token::Op(c) => write!(f, "{}", c),
            Token::Compare(op) => f.write_str(match op {
                CmpOp::Eq => "=",
                CmpOp::Ne => "!=",
                CmpOp::Gt => ">",
                CmpOp::Ge => ">=",
                CmpOp::Lt => "<",
                CmpOp::Le => "<=",
            }),
            Token::Atom(s) => f.write_str(s),
            Token::Attr(s) => write!(f, "@{}", s),
            Token::Int(i) => write!(f, "{}", i),
            Token::Float(x) => write!(f, "{}", x),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::LBracket => f.write_str("["),
            Token::RBracket => f.write_str("]"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic()
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'-' || c == b'_'
}

/// Split a path expression into tokens.
///
/// Names may contain a backslash to escape the following character, which
/// lets a name carry characters like `.` or `/`. `=>` and `=<` are accepted
/// as `>=` and `<=`.
pub fn tokenize(s: &str) -> Result<Vec<Token>> {
    let buf = s.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < buf.len() {
        let curr = buf[i];
        let next = buf.get(i + 1).copied().unwrap_or(0);

        match curr {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            c if is_name_start(c) || c == b'\\' => {
                let mut name = String::new();
                let mut escape = false;
                let mut j = i;
                while j < buf.len() && (escape || is_name_char(buf[j]) || buf[j] == b'\\') {
                    if buf[j] == b'\\' && !escape {
                        escape = true;
                        j += 1;
                    } else if let Some(c) = s[j..].chars().next() {
                        // an escaped character may be multi-byte
                        escape = false;
                        name.push(c);
                        j += c.len_utf8();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Atom(name));
                i = j;
            }
            b'@' if is_name_start(next) => {
                let start = i + 1;
                let mut j = start + 1;
                while j < buf.len() && is_name_char(buf[j]) {
                    j += 1;
                }
                tokens.push(Token::Attr(s[start..j].to_string()));
                i = j;
            }
            b'\'' | b'"' => {
                let start = i + 1;
                let end = buf[start..]
                    .iter()
                    .position(|&b| b == curr)
                    .map(|p| start + p)
                    .ok_or_else(|| {
                        NetconfError::Path(format!("unterminated value: {}", &s[start..]))
                    })?;
                tokens.push(Token::Str(s[start..end].to_string()));
                i = end + 1;
            }
            b'0'..=b'9' => {
                let mut j = i + 1;
                while j < buf.len() && buf[j].is_ascii_digit() {
                    j += 1;
                }
                if j + 1 < buf.len() && buf[j] == b'.' && buf[j + 1].is_ascii_digit() {
                    j += 1;
                    while j < buf.len() && buf[j].is_ascii_digit() {
                        j += 1;
                    }
                    let text = &s[i..j];
                    let f = text
                        .parse::<f64>()
                        .map_err(|e| NetconfError::Path(format!("bad number {}: {}", text, e)))?;
                    tokens.push(Token::Float(f));
                } else {
                    let text = &s[i..j];
                    let n = text
                        .parse::<i64>()
                        .map_err(|e| NetconfError::Path(format!("bad number {}: {}", text, e)))?;
                    tokens.push(Token::Int(n));
                }
                i = j;
            }
            b'!' if next == b'=' => {
                tokens.push(Token::Compare(CmpOp::Ne));
                i += 2;
            }
            _ => {
                let (token, width) = match (curr, next) {
                    (b'[', _) => (Token::LBracket, 1),
                    (b']', _) => (Token::RBracket, 1),
                    (b'(', _) => (Token::LParen, 1),
                    (b')', _) => (Token::RParen, 1),
                    (b'/', b'/') => (Token::SlashSlash, 2),
                    (b'/', _) => (Token::Slash, 1),
                    (b':', b':') => (Token::ColonColon, 2),
                    (b':', _) => (Token::Colon, 1),
                    (b'.', b'.') => (Token::DotDot, 2),
                    (b'.', _) => (Token::Dot, 1),
                    (b',', _) => (Token::Comma, 1),
                    (b'+' | b'-' | b'*', _) => (Token::Op(curr as char), 1),
                    (b'=', b'>') | (b'>', b'=') => (Token::Compare(CmpOp::Ge), 2),
                    (b'=', b'<') | (b'<', b'=') => (Token::Compare(CmpOp::Le), 2),
                    (b'=', _) => (Token::Compare(CmpOp::Eq), 1),
                    (b'>', _) => (Token::Compare(CmpOp::Gt), 1),
                    (b'<', _) => (Token::Compare(CmpOp::Lt), 1),
                    _ => {
                        let c = s[i..].chars().next().unwrap_or(curr as char);
                        return Err(NetconfError::Path(format!(
                            "illegal character in expression: {}",
                            c
                        )));
                    }
                };
                tokens.push(token);
                i += width;
            }
        }
    }

    tracing::trace!(?tokens, "tokenized path");
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_tokens() {
        let tokens = tokenize("/a:hosts/host[name='joe']").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Slash,
                Token::Atom("a".into()),
                Token::Colon,
                Token::Atom("hosts".into()),
                Token::Slash,
                Token::Atom("host".into()),
                Token::LBracket,
                Token::Atom("name".into()),
                Token::Compare(CmpOp::Eq),
                Token::Str("joe".into()),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn test_operators_and_numbers() {
        let tokens = tokenize("@id>=2 and x=<1.5 or y != -3").unwrap();
        assert_eq!(tokens[0], Token::Attr("id".into()));
        assert_eq!(tokens[1], Token::Compare(CmpOp::Ge));
        assert_eq!(tokens[2], Token::Int(2));
        assert_eq!(tokens[5], Token::Compare(CmpOp::Le));
        assert_eq!(tokens[6], Token::Float(1.5));
        assert_eq!(tokens[9], Token::Compare(CmpOp::Ne));
        assert_eq!(tokens[10], Token::Op('-'));
    }

    #[test]
    fn test_escaped_name() {
        let tokens = tokenize(r"a\.b/c").unwrap();
        assert_eq!(tokens[0], Token::Atom("a.b".into()));
    }

    #[test]
    fn test_escaped_multibyte_char() {
        let tokens = tokenize("a\\é/b").unwrap();
        assert_eq!(tokens[0], Token::Atom("aé".into()));
        assert_eq!(tokens[2], Token::Atom("b".into()));
        assert!(crate::path::Path::parse("a\\é").is_ok());

        let err = tokenize("a é").unwrap_err();
        assert!(err.to_string().contains("illegal character in expression: é"));
    }

    #[test]
    fn test_errors() {
        let err = tokenize("a[b='x]").unwrap_err();
        assert!(err.to_string().contains("unterminated value"));

        let err = tokenize("a#b").unwrap_err();
        assert!(err.to_string().contains("illegal character in expression: #"));
    }
}
