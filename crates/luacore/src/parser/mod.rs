//! Parser: token stream -> `ast::Chunk` (spec.md §4.2).
//!
//! Recursive descent for statements, Pratt-style precedence climbing for
//! expressions, structurally grounded on the teacher's
//! `crates/luars/src/compiler/{statement,expr_parser,expression}.rs` split
//! (statement parsing, precedence-climbing expression parsing, and the
//! primary/suffixed-expression grammar kept as separate concerns here too).

use crate::ast::*;
use crate::lexer::{Literal, Token, TokenKind};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source_name: String,
}

type PResult<T> = Result<T, ParseError>;

pub fn parse(tokens: &[Token], source_name: impl Into<String>) -> PResult<Chunk> {
    let mut p = Parser { tokens, pos: 0, source_name: source_name.into() };
    let body = p.block()?;
    p.expect(TokenKind::Eof)?;
    Ok(Chunk { body })
}

impl<'a> Parser<'a> {
    fn cur(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn cur_kind(&self) -> TokenKind {
        self.cur().kind
    }

    fn at(&self, k: TokenKind) -> bool {
        self.cur_kind() == k
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn check(&mut self, k: TokenKind) -> bool {
        if self.at(k) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn err_here(&self, message: impl Into<String>) -> ParseError {
        let tok = self.cur();
        ParseError {
            message: format!(
                "{}:{}: {} near {}",
                display_name(&self.source_name),
                tok.line,
                message.into(),
                tok.near_text()
            ),
            line: tok.line,
        }
    }

    fn expect(&mut self, k: TokenKind) -> PResult<Token> {
        if self.at(k) {
            Ok(self.advance())
        } else {
            Err(self.err_here(format!("'{}' expected", k.describe())))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        if self.at(TokenKind::Name) {
            Ok(self.advance().lexeme)
        } else {
            Err(self.err_here("<name> expected"))
        }
    }

    // ---------------------------------------------------------------
    // Blocks / statements
    // ---------------------------------------------------------------

    fn block_end(&self) -> bool {
        matches!(
            self.cur_kind(),
            TokenKind::Eof | TokenKind::End | TokenKind::Else | TokenKind::Elseif | TokenKind::Until
        )
    }

    fn block(&mut self) -> PResult<Block> {
        let mut stmts = Vec::new();
        while !self.block_end() {
            if self.at(TokenKind::Return) {
                stmts.push(self.return_stmt()?);
                break;
            }
            if let Some(s) = self.statement()? {
                stmts.push(s);
            }
        }
        Ok(Block { stmts })
    }

    fn statement(&mut self) -> PResult<Option<Stmt>> {
        match self.cur_kind() {
            TokenKind::Semi => {
                self.advance();
                Ok(None)
            }
            TokenKind::If => Ok(Some(self.if_stmt()?)),
            TokenKind::While => Ok(Some(self.while_stmt()?)),
            TokenKind::Do => {
                self.advance();
                let b = self.block()?;
                self.expect(TokenKind::End)?;
                Ok(Some(Stmt::Do(b)))
            }
            TokenKind::For => Ok(Some(self.for_stmt()?)),
            TokenKind::Repeat => Ok(Some(self.repeat_stmt()?)),
            TokenKind::Function => Ok(Some(self.function_stmt()?)),
            TokenKind::Local => Ok(Some(self.local_stmt()?)),
            TokenKind::DColon => Ok(Some(self.label_stmt()?)),
            TokenKind::Break => {
                let line = self.advance().line;
                Ok(Some(Stmt::Break { line }))
            }
            TokenKind::Goto => {
                let line = self.advance().line;
                let label = self.expect_name()?;
                Ok(Some(Stmt::Goto { label, line }))
            }
            _ => Ok(Some(self.expr_stmt()?)),
        }
    }

    fn return_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let mut exprs = Vec::new();
        if !self.block_end() && !self.at(TokenKind::Semi) {
            exprs = self.expr_list()?;
        }
        self.check(TokenKind::Semi);
        Ok(Stmt::Return { exprs, line })
    }

    fn label_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let name = self.expect_name()?;
        self.expect(TokenKind::DColon)?;
        Ok(Stmt::Label { name, line })
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let mut arms = Vec::new();
        let cond = self.expr()?;
        self.expect(TokenKind::Then)?;
        let body = self.block()?;
        arms.push((cond, body));
        while self.at(TokenKind::Elseif) {
            self.advance();
            let cond = self.expr()?;
            self.expect(TokenKind::Then)?;
            let body = self.block()?;
            arms.push((cond, body));
        }
        let else_block = if self.check(TokenKind::Else) {
            Some(self.block()?)
        } else {
            None
        };
        self.expect(TokenKind::End)?;
        Ok(Stmt::If { arms, else_block, line })
    }

    fn while_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let cond = self.expr()?;
        self.expect(TokenKind::Do)?;
        let body = self.block()?;
        self.expect(TokenKind::End)?;
        Ok(Stmt::While { cond, body, line })
    }

    fn repeat_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let body = self.block()?;
        self.expect(TokenKind::Until)?;
        let cond = self.expr()?;
        Ok(Stmt::Repeat { body, cond, line })
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let first = self.expect_name()?;
        if self.at(TokenKind::Assign) {
            self.advance();
            let start = self.expr()?;
            self.expect(TokenKind::Comma)?;
            let stop = self.expr()?;
            let step = if self.check(TokenKind::Comma) {
                Some(self.expr()?)
            } else {
                None
            };
            self.expect(TokenKind::Do)?;
            let body = self.block()?;
            self.expect(TokenKind::End)?;
            Ok(Stmt::NumericFor { var: first, start, stop, step, body, line })
        } else {
            let mut names = vec![first];
            while self.check(TokenKind::Comma) {
                names.push(self.expect_name()?);
            }
            self.expect(TokenKind::In)?;
            let exprs = self.expr_list()?;
            self.expect(TokenKind::Do)?;
            let body = self.block()?;
            self.expect(TokenKind::End)?;
            Ok(Stmt::GenericFor { names, exprs, body, line })
        }
    }

    fn function_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let base = self.expect_name()?;
        let mut path = Vec::new();
        while self.check(TokenKind::Dot) {
            path.push(self.expect_name()?);
        }
        let method = if self.check(TokenKind::Colon) {
            Some(self.expect_name()?)
        } else {
            None
        };
        let name_hint = Some(function_name_hint(&base, &path, &method));
        let mut body = self.func_body(name_hint)?;
        if method.is_some() {
            body.params.insert(0, "self".to_string());
        }
        Ok(Stmt::FunctionDecl { target: FuncTarget { base, path, method, line }, body, line })
    }

    fn local_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        if self.check(TokenKind::Function) {
            let name = self.expect_name()?;
            let body = self.func_body(Some(format!("local '{name}'")))?;
            return Ok(Stmt::LocalFunction { name, body, line });
        }
        let mut names = vec![self.attrib_name()?];
        while self.check(TokenKind::Comma) {
            names.push(self.attrib_name()?);
        }
        let values = if self.check(TokenKind::Assign) {
            self.expr_list()?
        } else {
            Vec::new()
        };
        Ok(Stmt::Local { names, values, line })
    }

    fn attrib_name(&mut self) -> PResult<AttribName> {
        let line = self.cur().line;
        let name = self.expect_name()?;
        let attrib = if self.check(TokenKind::Lt) {
            let a = self.expect_name()?;
            let attrib = match a.as_str() {
                "const" => LocalAttrib::Const,
                "close" => LocalAttrib::Close,
                other => {
                    return Err(self.err_here(format!("unknown attribute '{other}'")));
                }
            };
            self.expect(TokenKind::Gt)?;
            attrib
        } else {
            LocalAttrib::None
        };
        Ok(AttribName { name, attrib, line })
    }

    fn expr_stmt(&mut self) -> PResult<Stmt> {
        let line = self.cur().line;
        let first = self.suffixed_expr()?;
        if self.at(TokenKind::Assign) || self.at(TokenKind::Comma) {
            let mut targets = vec![first];
            while self.check(TokenKind::Comma) {
                targets.push(self.suffixed_expr()?);
            }
            self.expect(TokenKind::Assign)?;
            let values = self.expr_list()?;
            for t in &targets {
                if !matches!(t, Expr::Name(..) | Expr::Field { .. } | Expr::Index { .. }) {
                    return Err(self.err_here("syntax error"));
                }
            }
            Ok(Stmt::Assign { targets, values, line })
        } else {
            match &first {
                Expr::Call { .. } | Expr::MethodCall { .. } => Ok(Stmt::Call(first)),
                _ => Err(self.err_here("syntax error")),
            }
        }
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn expr_list(&mut self) -> PResult<Vec<Expr>> {
        let mut out = vec![self.expr()?];
        while self.check(TokenKind::Comma) {
            out.push(self.expr()?);
        }
        Ok(out)
    }

    fn expr(&mut self) -> PResult<Expr> {
        self.binop_expr(0)
    }

    /// Left/right binding powers per spec.md §4.2's precedence table
    /// (lowest to highest): or, and, comparisons, `|`, `~`, `&`, shifts,
    /// `..` (right-assoc), `+ -`, `* / // %`, unary, `^` (right-assoc).
    fn binop_expr(&mut self, min_bp: u8) -> PResult<Expr> {
        let mut lhs = self.unary_expr()?;
        loop {
            let Some((op, lbp, rbp)) = binop_of(self.cur_kind()) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            let line = self.advance().line;
            let rhs = self.binop_expr(rbp)?;
            lhs = Expr::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self) -> PResult<Expr> {
        let op = match self.cur_kind() {
            TokenKind::Not => Some(UnOp::Not),
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Hash => Some(UnOp::Len),
            TokenKind::Tilde => Some(UnOp::BNot),
            _ => None,
        };
        if let Some(op) = op {
            let line = self.advance().line;
            // Unary binds tighter than every binary operator except `^`,
            // which is right-associative and allowed to apply to the
            // unary's own operand (`-x^2 == -(x^2)`, `2^-2` is legal).
            const UNARY_BP: u8 = 21;
            let expr = self.binop_expr(UNARY_BP)?;
            Ok(Expr::UnOp { op, expr: Box::new(expr), line })
        } else {
            self.pow_expr()
        }
    }

    fn pow_expr(&mut self) -> PResult<Expr> {
        let base = self.suffixed_or_primary()?;
        if self.at(TokenKind::Caret) {
            let line = self.advance().line;
            let rhs = self.unary_expr()?; // right-assoc, allows unary on RHS
            Ok(Expr::BinOp { op: BinOp::Pow, lhs: Box::new(base), rhs: Box::new(rhs), line })
        } else {
            Ok(base)
        }
    }

    fn suffixed_or_primary(&mut self) -> PResult<Expr> {
        match self.cur_kind() {
            TokenKind::Nil | TokenKind::True | TokenKind::False | TokenKind::Number | TokenKind::String
            | TokenKind::Ellipsis | TokenKind::Function | TokenKind::LBrace => self.simple_expr(),
            _ => self.suffixed_expr(),
        }
    }

    fn simple_expr(&mut self) -> PResult<Expr> {
        let tok = self.cur().clone();
        match tok.kind {
            TokenKind::Nil => { self.advance(); Ok(Expr::Nil(tok.line)) }
            TokenKind::True => { self.advance(); Ok(Expr::True(tok.line)) }
            TokenKind::False => { self.advance(); Ok(Expr::False(tok.line)) }
            TokenKind::Ellipsis => { self.advance(); Ok(Expr::Vararg(tok.line)) }
            TokenKind::Number => {
                self.advance();
                match tok.literal {
                    Some(Literal::Integer(i)) => Ok(Expr::Int(i, tok.line)),
                    Some(Literal::Float(f)) => Ok(Expr::Float(f, tok.line)),
                    _ => unreachable!("number token without numeric literal"),
                }
            }
            TokenKind::String => {
                self.advance();
                match tok.literal {
                    Some(Literal::Str(b)) => Ok(Expr::Str(b, tok.line)),
                    _ => unreachable!("string token without string literal"),
                }
            }
            TokenKind::Function => {
                self.advance();
                Ok(Expr::Function(Box::new(self.func_body(None)?)))
            }
            TokenKind::LBrace => self.table_constructor(),
            _ => self.suffixed_expr(),
        }
    }

    fn primary_expr(&mut self) -> PResult<Expr> {
        match self.cur_kind() {
            TokenKind::Name => {
                let tok = self.advance();
                Ok(Expr::Name(tok.lexeme, tok.line))
            }
            TokenKind::LParen => {
                let line = self.advance().line;
                let e = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Paren(Box::new(e), line))
            }
            _ => Err(self.err_here("unexpected symbol")),
        }
    }

    /// A primary expression followed by zero or more `.field`, `[expr]`,
    /// `:method(...)`, `(...)`/`"str"`/`{...}` call suffixes, honoring the
    /// line-break disambiguation rule of spec.md §4.2: a `(`/`{` on the
    /// following source line only continues the chain when the primary so
    /// far is chainable.
    fn suffixed_expr(&mut self) -> PResult<Expr> {
        let mut e = self.primary_expr()?;
        loop {
            match self.cur_kind() {
                TokenKind::Dot => {
                    let line = self.advance().line;
                    let name = self.expect_name()?;
                    e = Expr::Field { obj: Box::new(e), name, line };
                }
                TokenKind::LBracket => {
                    let line = self.advance().line;
                    let key = self.expr()?;
                    self.expect(TokenKind::RBracket)?;
                    e = Expr::Index { obj: Box::new(e), key: Box::new(key), line };
                }
                TokenKind::Colon => {
                    let line = self.advance().line;
                    let method = self.expect_name()?;
                    let args = self.call_args()?;
                    e = Expr::MethodCall { obj: Box::new(e), method, args, line };
                }
                TokenKind::LParen | TokenKind::String | TokenKind::LBrace => {
                    if !e.is_chainable_primary() {
                        break;
                    }
                    let line = self.cur().line;
                    let args = self.call_args()?;
                    e = Expr::Call { func: Box::new(e), args, line };
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn call_args(&mut self) -> PResult<Vec<Expr>> {
        match self.cur_kind() {
            TokenKind::LParen => {
                self.advance();
                let args = if self.at(TokenKind::RParen) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.expect(TokenKind::RParen)?;
                Ok(args)
            }
            TokenKind::String => {
                let tok = self.advance();
                match tok.literal {
                    Some(Literal::Str(b)) => Ok(vec![Expr::Str(b, tok.line)]),
                    _ => unreachable!(),
                }
            }
            TokenKind::LBrace => Ok(vec![self.table_constructor()?]),
            _ => Err(self.err_here("function arguments expected")),
        }
    }

    fn table_constructor(&mut self) -> PResult<Expr> {
        let line = self.expect(TokenKind::LBrace)?.line;
        let mut fields = Vec::new();
        while !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::LBracket) {
                self.advance();
                let key = self.expr()?;
                self.expect(TokenKind::RBracket)?;
                self.expect(TokenKind::Assign)?;
                let value = self.expr()?;
                fields.push(TableField::Indexed { key, value });
            } else if self.at(TokenKind::Name) && self.peek_kind(1) == TokenKind::Assign {
                let name = self.advance().lexeme;
                self.advance(); // '='
                let value = self.expr()?;
                fields.push(TableField::Named { name, value });
            } else {
                fields.push(TableField::Positional(self.expr()?));
            }
            if !self.check(TokenKind::Comma) && !self.check(TokenKind::Semi) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::Table { fields, line })
    }

    fn peek_kind(&self, ahead: usize) -> TokenKind {
        self.tokens.get(self.pos + ahead).map(|t| t.kind).unwrap_or(TokenKind::Eof)
    }

    fn func_body(&mut self, name_hint: Option<String>) -> PResult<FuncBody> {
        let line = self.cur().line;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.at(TokenKind::RParen) {
            loop {
                if self.check(TokenKind::Ellipsis) {
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?);
                if !self.check(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let block = self.block()?;
        let end_line = self.cur().line;
        self.expect(TokenKind::End)?;
        Ok(FuncBody { params, is_vararg, block, line, end_line, name_hint })
    }
}

fn function_name_hint(base: &str, path: &[String], method: &Option<String>) -> String {
    let mut s = base.to_string();
    for p in path {
        s.push('.');
        s.push_str(p);
    }
    if let Some(m) = method {
        s.push(':');
        s.push_str(m);
    }
    format!("function '{s}'")
}

/// `(op, left_binding_power, right_binding_power)`. Right-associative
/// operators (`..`, and `^` handled separately in `pow_expr`) give the
/// recursive call a *lower* right bp than their own left bp.
fn binop_of(k: TokenKind) -> Option<(BinOp, u8, u8)> {
    use TokenKind::*;
    Some(match k {
        Or => (BinOp::Or, 1, 2),
        And => (BinOp::And, 3, 4),
        Lt => (BinOp::Lt, 5, 6),
        Gt => (BinOp::Gt, 5, 6),
        Le => (BinOp::Le, 5, 6),
        Ge => (BinOp::Ge, 5, 6),
        Ne => (BinOp::Ne, 5, 6),
        Eq => (BinOp::Eq, 5, 6),
        Pipe => (BinOp::BOr, 7, 8),
        Tilde => (BinOp::BXor, 9, 10),
        Amp => (BinOp::BAnd, 11, 12),
        LShift => (BinOp::Shl, 13, 14),
        RShift => (BinOp::Shr, 13, 14),
        Concat => (BinOp::Concat, 16, 15), // right-assoc, binds tighter than shifts, looser than +-
        Plus => (BinOp::Add, 17, 18),
        Minus => (BinOp::Sub, 17, 18),
        Star => (BinOp::Mul, 19, 20),
        Slash => (BinOp::Div, 19, 20),
        DSlash => (BinOp::IDiv, 19, 20),
        Percent => (BinOp::Mod, 19, 20),
        _ => return None,
    })
}

pub fn display_name(source_name: &str) -> String {
    crate::value::proto::display_source_name(source_name)
}
