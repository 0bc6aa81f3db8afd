//! Recursive-descent parser with one token of lookahead, collecting
//! diagnostics rather than aborting on the first syntax error.

use super::ast::*;
use super::lexer::{Lexer, Token, TokenKind};
use crate::lua_vm::error::{ErrorKind, LuaError};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    lookahead: Token,
    source_name: String,
    errors: Vec<LuaError>,
}

/// Statement-starting tokens used as synchronization points during
/// error recovery.
fn is_stmt_start(kind: TokenKind) -> bool {
    use TokenKind::*;
    matches!(
        kind,
        Function | Local | If | While | For | Repeat | Return | Break | Do | End | Eof
    )
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, source_name: &str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        let lookahead = lexer.next_token();
        Parser {
            lexer,
            current,
            lookahead,
            source_name: source_name.to_string(),
            errors: Vec::new(),
        }
    }

    /// Parses the top-level chunk; returns the block plus any
    /// accumulated diagnostics, since recovery preserves the ability to
    /// report multiple errors per input.
    pub fn parse_chunk(mut self) -> (Block, Vec<LuaError>) {
        let block = self.block();
        if self.current.kind != TokenKind::Eof {
            self.error_at_current("expected end of file");
        }
        (block, self.errors)
    }

    fn advance(&mut self) -> Token {
        let next = self.lexer.next_token();
        let old = std::mem::replace(&mut self.current, std::mem::replace(&mut self.lookahead, next));
        old
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Token {
        if self.check(kind) {
            self.advance()
        } else {
            self.error_at_current(&format!("expected {}", what));
            self.current.clone()
        }
    }

    fn error_at_current(&mut self, message: &str) {
        self.errors.push(
            LuaError::new(ErrorKind::Syntactic, message.to_string())
                .at(&self.source_name, self.current.line),
        );
    }

    /// Skips to the next statement-starting token or `Eof`.
    fn synchronize(&mut self) {
        while !is_stmt_start(self.current.kind) {
            self.advance();
        }
    }

    // ---- statements ------------------------------------------------

    fn block(&mut self) -> Block {
        let mut stmts = Vec::new();
        while !self.block_follow() {
            if self.check(TokenKind::Return) {
                stmts.push(self.return_stat());
                break;
            }
            let before = self.errors.len();
            let stmt = self.statement();
            if self.errors.len() > before {
                self.synchronize();
            }
            if let Some(s) = stmt {
                stmts.push(s);
            }
        }
        stmts
    }

    fn block_follow(&self) -> bool {
        use TokenKind::*;
        matches!(self.current.kind, Eof | End | Else | Elseif | Until)
    }

    fn statement(&mut self) -> Option<Stmt> {
        use TokenKind::*;
        match self.current.kind {
            Semi => {
                self.advance();
                None
            }
            If => Some(self.if_stat()),
            While => Some(self.while_stat()),
            Do => {
                self.advance();
                let b = self.block();
                self.expect(End, "'end' to close 'do'");
                Some(Stmt::Do(b))
            }
            For => Some(self.for_stat()),
            Repeat => Some(self.repeat_stat()),
            Function => Some(self.function_stat()),
            Local => Some(self.local_stat()),
            Break => {
                self.advance();
                Some(Stmt::Break)
            }
            _ => Some(self.expr_or_assign_stat()),
        }
    }

    fn return_stat(&mut self) -> Stmt {
        self.advance();
        let mut exprs = Vec::new();
        if !self.block_follow() && !self.check(TokenKind::Semi) {
            exprs = self.expr_list();
        }
        self.matches(TokenKind::Semi);
        Stmt::Return(exprs)
    }

    fn if_stat(&mut self) -> Stmt {
        self.advance();
        let cond = self.expr();
        self.expect(TokenKind::Then, "'then'");
        let then_block = self.block();
        let else_block = if self.matches(TokenKind::Elseif) {
            // Rewrite elseif chains into nested two-way `If` nodes.
            Some(vec![self.if_stat_from_elseif()])
        } else if self.matches(TokenKind::Else) {
            let b = self.block();
            self.expect(TokenKind::End, "'end' to close 'if'");
            Some(b)
        } else {
            self.expect(TokenKind::End, "'end' to close 'if'");
            None
        };
        Stmt::If(cond, then_block, else_block)
    }

    /// Parses the body of an already-consumed `elseif` as if it were a
    /// fresh `if`, without re-consuming the `end`/`else` that the outer
    /// call already owns responsibility for via recursion.
    fn if_stat_from_elseif(&mut self) -> Stmt {
        let cond = self.expr();
        self.expect(TokenKind::Then, "'then'");
        let then_block = self.block();
        let else_block = if self.matches(TokenKind::Elseif) {
            Some(vec![self.if_stat_from_elseif()])
        } else if self.matches(TokenKind::Else) {
            let b = self.block();
            self.expect(TokenKind::End, "'end' to close 'if'");
            Some(b)
        } else {
            self.expect(TokenKind::End, "'end' to close 'if'");
            None
        };
        Stmt::If(cond, then_block, else_block)
    }

    fn while_stat(&mut self) -> Stmt {
        self.advance();
        let cond = self.expr();
        self.expect(TokenKind::Do, "'do'");
        let body = self.block();
        self.expect(TokenKind::End, "'end' to close 'while'");
        Stmt::While(cond, body)
    }

    fn repeat_stat(&mut self) -> Stmt {
        self.advance();
        let body = self.block();
        self.expect(TokenKind::Until, "'until'");
        let cond = self.expr();
        Stmt::Repeat(body, cond)
    }

    fn for_stat(&mut self) -> Stmt {
        self.advance();
        let first_name = self.name();
        if self.matches(TokenKind::Assign) {
            let start = self.expr();
            self.expect(TokenKind::Comma, "','");
            let stop = self.expr();
            let step = if self.matches(TokenKind::Comma) {
                Some(self.expr())
            } else {
                None
            };
            self.expect(TokenKind::Do, "'do'");
            let body = self.block();
            self.expect(TokenKind::End, "'end' to close 'for'");
            Stmt::NumericFor {
                var: first_name,
                start,
                stop,
                step,
                body,
            }
        } else {
            let mut names = vec![first_name];
            while self.matches(TokenKind::Comma) {
                names.push(self.name());
            }
            self.expect(TokenKind::In, "'in'");
            let exprs = self.expr_list();
            self.expect(TokenKind::Do, "'do'");
            let body = self.block();
            self.expect(TokenKind::End, "'end' to close 'for'");
            Stmt::GenericFor { names, exprs, body }
        }
    }

    fn function_stat(&mut self) -> Stmt {
        self.advance();
        let mut target = Expr::Name(self.name());
        let mut is_method = false;
        loop {
            if self.matches(TokenKind::Dot) {
                let field = self.name();
                target = Expr::Field(Box::new(target), field);
            } else if self.matches(TokenKind::Colon) {
                let field = self.name();
                target = Expr::Field(Box::new(target), field);
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let mut body = self.function_body();
        if is_method {
            body.params.insert(0, "self".to_string());
        }
        Stmt::FunctionDecl { target, body }
    }

    fn local_stat(&mut self) -> Stmt {
        self.advance();
        if self.matches(TokenKind::Function) {
            let name = self.name();
            let body = self.function_body();
            return Stmt::LocalFunction { name, body };
        }
        let mut names = vec![self.name()];
        while self.matches(TokenKind::Comma) {
            names.push(self.name());
        }
        let exprs = if self.matches(TokenKind::Assign) {
            self.expr_list()
        } else {
            Vec::new()
        };
        Stmt::Local(names, exprs)
    }

    fn expr_or_assign_stat(&mut self) -> Stmt {
        let first = self.suffixed_expr();
        if self.check(TokenKind::Assign) || self.check(TokenKind::Comma) {
            let mut targets = vec![first];
            while self.matches(TokenKind::Comma) {
                targets.push(self.suffixed_expr());
            }
            self.expect(TokenKind::Assign, "'='");
            let values = self.expr_list();
            Stmt::Assign(targets, values)
        } else {
            Stmt::ExprStat(first)
        }
    }

    fn name(&mut self) -> String {
        if self.check(TokenKind::Name) {
            self.advance().lexeme
        } else {
            self.error_at_current("expected identifier");
            String::new()
        }
    }

    fn function_body(&mut self) -> FunctionBody {
        let line = self.current.line;
        self.expect(TokenKind::LParen, "'('");
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(TokenKind::RParen) {
            loop {
                if self.matches(TokenKind::Ellipsis) {
                    is_vararg = true;
                    break;
                }
                params.push(self.name());
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'");
        let body = self.block();
        self.expect(TokenKind::End, "'end' to close function body");
        FunctionBody {
            params,
            is_vararg,
            body,
            line,
        }
    }

    // ---- expressions -------------------------------------------------

    fn expr_list(&mut self) -> Vec<Expr> {
        let mut exprs = vec![self.expr()];
        while self.matches(TokenKind::Comma) {
            exprs.push(self.expr());
        }
        exprs
    }

    pub fn expr(&mut self) -> Expr {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Expr {
        let mut left = self.and_expr();
        while self.matches(TokenKind::Or) {
            let right = self.and_expr();
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        left
    }

    fn and_expr(&mut self) -> Expr {
        let mut left = self.compare_expr();
        while self.matches(TokenKind::And) {
            let right = self.compare_expr();
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        left
    }

    fn compare_expr(&mut self) -> Expr {
        let mut left = self.concat_expr();
        loop {
            let op = match self.current.kind {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::LtEq => BinOp::Le,
                TokenKind::GtEq => BinOp::Ge,
                TokenKind::NotEq => BinOp::NotEq,
                TokenKind::Eq => BinOp::Eq,
                _ => break,
            };
            self.advance();
            let right = self.concat_expr();
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        left
    }

    /// Right-associative: recurses into itself on the
    /// right rather than looping.
    fn concat_expr(&mut self) -> Expr {
        let left = self.additive_expr();
        if self.matches(TokenKind::DotDot) {
            let right = self.concat_expr();
            Expr::Binary(BinOp::Concat, Box::new(left), Box::new(right))
        } else {
            left
        }
    }

    fn additive_expr(&mut self) -> Expr {
        let mut left = self.multiplicative_expr();
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.multiplicative_expr();
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        left
    }

    fn multiplicative_expr(&mut self) -> Expr {
        let mut left = self.unary_expr();
        loop {
            let op = match self.current.kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.unary_expr();
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        left
    }

    fn unary_expr(&mut self) -> Expr {
        let op = match self.current.kind {
            TokenKind::Not => Some(UnOp::Not),
            TokenKind::Hash => Some(UnOp::Len),
            TokenKind::Minus => Some(UnOp::Neg),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary_expr();
            Expr::Unary(op, Box::new(operand))
        } else {
            self.pow_expr()
        }
    }

    /// Right-associative.
    fn pow_expr(&mut self) -> Expr {
        let left = self.suffixed_expr();
        if self.matches(TokenKind::Caret) {
            let right = self.unary_expr();
            Expr::Binary(BinOp::Pow, Box::new(left), Box::new(right))
        } else {
            left
        }
    }

    fn suffixed_expr(&mut self) -> Expr {
        let mut e = self.primary_expr();
        loop {
            match self.current.kind {
                TokenKind::Dot => {
                    self.advance();
                    let field = self.name();
                    e = Expr::Field(Box::new(e), field);
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expr();
                    self.expect(TokenKind::RBracket, "']'");
                    e = Expr::Index(Box::new(e), Box::new(index));
                }
                TokenKind::Colon => {
                    self.advance();
                    let method = self.name();
                    let args = self.call_args();
                    e = Expr::MethodCall(Box::new(e), method, args);
                }
                TokenKind::LParen | TokenKind::String | TokenKind::LBrace => {
                    let args = self.call_args();
                    e = Expr::Call(Box::new(e), args);
                }
                _ => break,
            }
        }
        e
    }

    fn call_args(&mut self) -> Vec<Expr> {
        match self.current.kind {
            TokenKind::LParen => {
                self.advance();
                let args = if self.check(TokenKind::RParen) {
                    Vec::new()
                } else {
                    self.expr_list()
                };
                self.expect(TokenKind::RParen, "')'");
                args
            }
            TokenKind::String => {
                let s = self.advance().lexeme;
                vec![Expr::Str(s)]
            }
            TokenKind::LBrace => vec![self.table_constructor()],
            _ => {
                self.error_at_current("expected function arguments");
                Vec::new()
            }
        }
    }

    fn table_constructor(&mut self) -> Expr {
        self.expect(TokenKind::LBrace, "'{'");
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::LBracket) {
                self.advance();
                let key = self.expr();
                self.expect(TokenKind::RBracket, "']'");
                self.expect(TokenKind::Assign, "'='");
                let value = self.expr();
                fields.push(TableField::Computed(key, value));
            } else if self.check(TokenKind::Name) && self.lookahead.kind == TokenKind::Assign {
                let name = self.name();
                self.advance(); // '='
                let value = self.expr();
                fields.push(TableField::Named(name, value));
            } else {
                fields.push(TableField::Positional(self.expr()));
            }
            if !self.matches(TokenKind::Comma) && !self.matches(TokenKind::Semi) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}'");
        Expr::Table(fields)
    }

    fn primary_expr(&mut self) -> Expr {
        match self.current.kind {
            TokenKind::Nil => {
                self.advance();
                Expr::Nil
            }
            TokenKind::True => {
                self.advance();
                Expr::True
            }
            TokenKind::False => {
                self.advance();
                Expr::False
            }
            TokenKind::Ellipsis => {
                self.advance();
                Expr::Vararg
            }
            TokenKind::Number => {
                let t = self.advance();
                Expr::Number(parse_number(&t.lexeme))
            }
            TokenKind::String => {
                let t = self.advance();
                Expr::Str(t.lexeme)
            }
            TokenKind::Name => {
                let t = self.advance();
                Expr::Name(t.lexeme)
            }
            TokenKind::LParen => {
                self.advance();
                let e = self.expr();
                self.expect(TokenKind::RParen, "')'");
                Expr::Paren(Box::new(e))
            }
            TokenKind::LBrace => self.table_constructor(),
            TokenKind::Function => {
                self.advance();
                Expr::Function(self.function_body())
            }
            _ => {
                self.error_at_current("unexpected token");
                self.advance();
                Expr::Nil
            }
        }
    }
}

/// Decimal/scientific/hex literal parsing.
fn parse_number(lexeme: &str) -> f64 {
    if let Some(hex) = lexeme.strip_prefix("0x").or_else(|| lexeme.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map(|n| n as f64).unwrap_or(f64::NAN);
    }
    lexeme.parse::<f64>().unwrap_or(f64::NAN)
}
