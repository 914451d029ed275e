//! Tokenizer for the minir dialect.

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Inf,
    Function,
    If,
    Else,
    While,
    For,
    In,
    Repeat,
    Break,
    Next,
    LArrow,
    SuperArrow,
    Eq,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Mod,
    Bang,
    AndAnd,
    And,
    OrOr,
    Or,
    Colon,
    Dollar,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub offset: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c == b'\n' {
            tokens.push(Token { tok: Tok::Newline, start, end: i + 1 });
            i += 1;
            continue;
        }
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == b'#' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())) {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < bytes.len() && bytes[j].is_ascii_digit() {
                    i = j;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text = &src[start..i];
            let value = text.parse::<f64>().map_err(|_| LexError {
                message: format!("malformed number '{}'", text),
                offset: start,
            })?;
            // Integer suffix, as in `1L`.
            if i < bytes.len() && bytes[i] == b'L' {
                i += 1;
            }
            tokens.push(Token { tok: Tok::Num(value), start, end: i });
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'.' {
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.' || bytes[i] == b'_')
            {
                i += 1;
            }
            let word = &src[start..i];
            let tok = match word {
                "TRUE" => Tok::True,
                "FALSE" => Tok::False,
                "NULL" => Tok::Null,
                "Inf" => Tok::Inf,
                "function" => Tok::Function,
                "if" => Tok::If,
                "else" => Tok::Else,
                "while" => Tok::While,
                "for" => Tok::For,
                "in" => Tok::In,
                "repeat" => Tok::Repeat,
                "break" => Tok::Break,
                "next" => Tok::Next,
                _ => Tok::Ident(word.to_string()),
            };
            tokens.push(Token { tok, start, end: i });
            continue;
        }

        if c == b'"' || c == b'\'' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            loop {
                let Some(&b) = bytes.get(i) else {
                    return Err(LexError {
                        message: "unexpected end of input in string".to_string(),
                        offset: start,
                    });
                };
                if b == quote {
                    i += 1;
                    break;
                }
                if b == b'\\' {
                    let escaped = bytes.get(i + 1).copied().ok_or_else(|| LexError {
                        message: "unexpected end of input in string".to_string(),
                        offset: start,
                    })?;
                    value.push(match escaped {
                        b'n' => '\n',
                        b't' => '\t',
                        b'\\' => '\\',
                        b'"' => '"',
                        b'\'' => '\'',
                        other => other as char,
                    });
                    i += 2;
                    continue;
                }
                // Copy one UTF-8 scalar.
                let ch = src[i..].chars().next().unwrap_or('\u{fffd}');
                value.push(ch);
                i += ch.len_utf8();
            }
            tokens.push(Token { tok: Tok::Str(value), start, end: i });
            continue;
        }

        if c == b'`' {
            let close = src[i + 1..].find('`').ok_or_else(|| LexError {
                message: "unterminated backtick name".to_string(),
                offset: start,
            })?;
            let name = src[i + 1..i + 1 + close].to_string();
            i += close + 2;
            tokens.push(Token { tok: Tok::Ident(name), start, end: i });
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let (tok, len) = match (c, next) {
            (b'<', Some(b'<')) if bytes.get(i + 2) == Some(&b'-') => (Tok::SuperArrow, 3),
            (b'<', Some(b'-')) => (Tok::LArrow, 2),
            (b'<', Some(b'=')) => (Tok::Le, 2),
            (b'<', _) => (Tok::Lt, 1),
            (b'>', Some(b'=')) => (Tok::Ge, 2),
            (b'>', _) => (Tok::Gt, 1),
            (b'=', Some(b'=')) => (Tok::EqEq, 2),
            (b'=', _) => (Tok::Eq, 1),
            (b'!', Some(b'=')) => (Tok::NotEq, 2),
            (b'!', _) => (Tok::Bang, 1),
            (b'&', Some(b'&')) => (Tok::AndAnd, 2),
            (b'&', _) => (Tok::And, 1),
            (b'|', Some(b'|')) => (Tok::OrOr, 2),
            (b'|', _) => (Tok::Or, 1),
            (b'%', Some(b'%')) => (Tok::Mod, 2),
            (b'+', _) => (Tok::Plus, 1),
            (b'-', _) => (Tok::Minus, 1),
            (b'*', _) => (Tok::Star, 1),
            (b'/', _) => (Tok::Slash, 1),
            (b'^', _) => (Tok::Caret, 1),
            (b':', _) => (Tok::Colon, 1),
            (b'$', _) => (Tok::Dollar, 1),
            (b'(', _) => (Tok::LParen, 1),
            (b')', _) => (Tok::RParen, 1),
            (b'{', _) => (Tok::LBrace, 1),
            (b'}', _) => (Tok::RBrace, 1),
            (b'[', _) => (Tok::LBracket, 1),
            (b']', _) => (Tok::RBracket, 1),
            (b',', _) => (Tok::Comma, 1),
            (b';', _) => (Tok::Semi, 1),
            _ => {
                let ch = src[i..].chars().next().unwrap_or('\u{fffd}');
                return Err(LexError {
                    message: format!("unexpected input '{}'", ch),
                    offset: start,
                });
            }
        };
        i += len;
        tokens.push(Token { tok, start, end: i });
    }

    tokens.push(Token { tok: Tok::Eof, start: src.len(), end: src.len() });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn assignment_arrows() {
        assert_eq!(
            kinds("x <- 1; y <<- x"),
            vec![
                Tok::Ident("x".into()),
                Tok::LArrow,
                Tok::Num(1.0),
                Tok::Semi,
                Tok::Ident("y".into()),
                Tok::SuperArrow,
                Tok::Ident("x".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn less_than_negative_is_not_an_arrow_when_spaced() {
        assert_eq!(
            kinds("x < -1"),
            vec![Tok::Ident("x".into()), Tok::Lt, Tok::Minus, Tok::Num(1.0), Tok::Eof]
        );
    }

    #[test]
    fn strings_and_comments() {
        assert_eq!(
            kinds("'a\\'b' # trailing\n\"c\""),
            vec![
                Tok::Str("a'b".into()),
                Tok::Newline,
                Tok::Str("c".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn placeholder_underscores_are_rejected() {
        let err = tokenize("x <- ______").unwrap_err();
        assert!(err.message.contains("unexpected input '_'"));
    }

    #[test]
    fn unterminated_string() {
        assert!(tokenize("\"abc").is_err());
    }
}
