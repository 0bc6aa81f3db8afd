use crate::compiler::ast::{BinOp, Expr, Stmt};
use crate::compiler::parser::Parser;

fn parse_ok(source: &str) -> Vec<Stmt> {
    let parser = Parser::new(source, "test");
    let (block, errors) = parser.parse_chunk();
    assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors);
    block
}

#[test]
fn local_assignment_binds_names_to_exprs() {
    let block = parse_ok("local a, b = 1, 2");
    match &block[0] {
        Stmt::Local(names, exprs) => {
            assert_eq!(names, &["a", "b"]);
            assert_eq!(exprs.len(), 2);
        }
        other => panic!("expected Local, got {:?}", other),
    }
}

#[test]
fn elseif_chain_rewrites_to_nested_binary_if() {
    let block = parse_ok("if a then b() elseif c then d() else e() end");
    match &block[0] {
        Stmt::If(_, _, Some(else_block)) => match &else_block[0] {
            Stmt::If(_, _, Some(inner_else)) => {
                assert_eq!(inner_else.len(), 1);
            }
            other => panic!("expected nested If for elseif, got {:?}", other),
        },
        other => panic!("expected If with else branch, got {:?}", other),
    }
}

#[test]
fn precedence_binds_pow_tighter_than_unary_minus() {
    // -2^2 parses as -(2^2), matching Lua's precedence table.
    let block = parse_ok("return -2^2");
    match &block[0] {
        Stmt::Return(exprs) => match &exprs[0] {
            Expr::Unary(crate::compiler::ast::UnOp::Neg, inner) => {
                assert!(matches!(**inner, Expr::Binary(BinOp::Pow, _, _)));
            }
            other => panic!("expected Unary(Neg, Binary(Pow, ..)), got {:?}", other),
        },
        other => panic!("expected Return, got {:?}", other),
    }
}

#[test]
fn concat_is_right_associative() {
    let block = parse_ok(r#"return "a" .. "b" .. "c""#);
    match &block[0] {
        Stmt::Return(exprs) => match &exprs[0] {
            Expr::Binary(BinOp::Concat, left, right) => {
                assert!(matches!(**left, Expr::Str(_)));
                assert!(matches!(**right, Expr::Binary(BinOp::Concat, _, _)));
            }
            other => panic!("expected right-associative Concat, got {:?}", other),
        },
        other => panic!("expected Return, got {:?}", other),
    }
}

#[test]
fn method_call_sugar_prepends_self_parameter() {
    let block = parse_ok("function obj:method(x) end");
    match &block[0] {
        Stmt::FunctionDecl { body, .. } => {
            assert_eq!(body.params[0], "self");
            assert_eq!(body.params[1], "x");
        }
        other => panic!("expected FunctionDecl, got {:?}", other),
    }
}

#[test]
fn syntax_error_recovers_to_next_statement() {
    let parser = Parser::new("local x = ; local y = 1", "test");
    let (block, errors) = parser.parse_chunk();
    assert!(!errors.is_empty());
    assert!(block.iter().any(|s| matches!(s, Stmt::Local(names, _) if names == &["y"])));
}
