use crate::compiler::lexer::{Lexer, TokenKind};

fn kinds(source: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(source);
    let mut out = Vec::new();
    loop {
        let tok = lexer.next_token();
        if tok.kind == TokenKind::Eof {
            break;
        }
        out.push(tok.kind);
    }
    out
}

#[test]
fn keywords_and_names_are_distinct() {
    let toks = kinds("local x = function end");
    assert_eq!(
        toks,
        vec![
            TokenKind::Local,
            TokenKind::Name,
            TokenKind::Assign,
            TokenKind::Function,
            TokenKind::End,
        ]
    );
}

#[test]
fn numbers_cover_int_float_hex_and_exponent() {
    let mut lexer = Lexer::new("1 3.14 0xFF 1e10 1.5e-3");
    let mut lexemes = Vec::new();
    loop {
        let tok = lexer.next_token();
        if tok.kind == TokenKind::Eof {
            break;
        }
        assert_eq!(tok.kind, TokenKind::Number);
        lexemes.push(tok.lexeme);
    }
    assert_eq!(lexemes, vec!["1", "3.14", "0xFF", "1e10", "1.5e-3"]);
}

#[test]
fn short_string_escapes_decode() {
    let mut lexer = Lexer::new(r#""a\nb\tc\65""#);
    let tok = lexer.next_token();
    assert_eq!(tok.kind, TokenKind::String);
    assert_eq!(tok.lexeme, "a\nb\tcA");
}

#[test]
fn long_bracket_strings_ignore_embedded_quotes() {
    let mut lexer = Lexer::new(r#"[[hello "world"]]"#);
    let tok = lexer.next_token();
    assert_eq!(tok.kind, TokenKind::String);
    assert_eq!(tok.lexeme, r#"hello "world""#);
}

#[test]
fn long_bracket_level_matching_skips_inner_close_of_lower_level() {
    let mut lexer = Lexer::new("[=[ ]] still inside ]=]");
    let tok = lexer.next_token();
    assert_eq!(tok.kind, TokenKind::String);
    assert_eq!(tok.lexeme, " ]] still inside ");
}

#[test]
fn comments_and_long_comments_are_skipped() {
    let toks = kinds("-- line comment\nlocal x --[[ long\ncomment ]] = 1");
    assert_eq!(toks, vec![TokenKind::Local, TokenKind::Name, TokenKind::Assign, TokenKind::Number]);
}

#[test]
fn column_resets_after_newline() {
    let mut lexer = Lexer::new("a\nbb");
    let first = lexer.next_token();
    let second = lexer.next_token();
    assert_eq!(first.line, 1);
    assert_eq!(second.line, 2);
    assert_eq!(second.column, 1);
}

#[test]
fn unterminated_string_is_an_error_token() {
    let mut lexer = Lexer::new("\"abc");
    let tok = lexer.next_token();
    assert_eq!(tok.kind, TokenKind::Error);
}
