use crate::error::{Error, Location, Result};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::model::{EntryKind, Kconfig, Symbol, SymbolId, ValueType};
use crate::tri::Tri;

/// Operand of an expression node: either a symbol handle into the arena or
/// a nested expression.
#[derive(Debug, Clone)]
pub enum ExprData {
    Symbol(SymbolId),
    Expr(Box<Expr>),
}

/// Tri-valued Kconfig expression. `Const` interns the `n`/`m`/`y`
/// literals; `None` wraps a bare operand so callers always hold an
/// expression node.
#[derive(Debug, Clone)]
pub enum Expr {
    Const(Tri),
    None(ExprData),
    Not(ExprData),
    And(ExprData, ExprData),
    Or(ExprData, ExprData),
    Equal(ExprData, ExprData),
    NotEqual(ExprData, ExprData),
}

impl ExprData {
    fn tri(&self, model: &Kconfig) -> Tri {
        match self {
            ExprData::Symbol(id) => model.symbol(*id).tri_value(),
            ExprData::Expr(e) => e.calculate(model),
        }
    }

    /// The symbol behind this operand when it is one, for string-typed
    /// equality and single-symbol defaults.
    pub fn as_symbol(&self) -> Option<SymbolId> {
        match self {
            ExprData::Symbol(id) => Some(*id),
            ExprData::Expr(_) => None,
        }
    }
}

impl Expr {
    pub fn calculate(&self, model: &Kconfig) -> Tri {
        match self {
            Expr::Const(t) => *t,
            Expr::None(d) => d.tri(model),
            Expr::Not(d) => d.tri(model).not(),
            Expr::And(a, b) => a.tri(model).and(b.tri(model)),
            Expr::Or(a, b) => a.tri(model).or(b.tri(model)),
            Expr::Equal(a, b) => compare(a, b, model),
            Expr::NotEqual(a, b) => compare(a, b, model).not(),
        }
    }
}

/// Equality on string-typed symbol pairs compares value strings exactly;
/// every other pairing compares on the lattice.
fn compare(a: &ExprData, b: &ExprData, model: &Kconfig) -> Tri {
    if let (Some(left), Some(right)) = (a.as_symbol(), b.as_symbol()) {
        let left = model.symbol(left);
        let right = model.symbol(right);
        if left.value_type == ValueType::String && right.value_type == ValueType::String {
            let eq = left.state.read().value == right.state.read().value;
            return if eq { Tri::Y } else { Tri::N };
        }
    }
    if a.tri(model) == b.tri(model) {
        Tri::Y
    } else {
        Tri::N
    }
}

/// Output of a successful compile: the root expression (absent for empty
/// input) and the non-constant symbols it references, in discovery order.
#[derive(Debug, Default)]
pub struct Compiled {
    pub expr: Option<Expr>,
    pub deps: Vec<SymbolId>,
}

/// Intern every quoted literal of `text` as a const string symbol so that
/// the parallel compile pass can run against a read-only arena. Mismatched
/// quotes fail here.
pub(crate) fn intern_literals(text: &str, model: &mut Kconfig, loc: &Location) -> Result<()> {
    for token in Lexer::new(text).tokenize() {
        match token.kind {
            TokenKind::StringLit(lit) => {
                if model.literals.contains_key(&lit) {
                    continue;
                }
                let mut symbol = Symbol::new(EntryKind::Config, lit.clone(), loc.clone());
                symbol.is_const = true;
                symbol.value_type = ValueType::String;
                symbol.state.get_mut().value = lit.clone();
                symbol.state.get_mut().base = lit.clone();
                let id = model.alloc(symbol);
                model.literals.insert(lit, id);
            }
            TokenKind::BadString(_) => {
                return Err(Error::Expr {
                    loc: loc.clone(),
                    text: text.to_string(),
                    msg: "unbalanced quotes".into(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

/// Compile raw expression text against the arena.
///
/// Precedence, highest to lowest: `!`, `=`/`!=`, `&&`, `||`,
/// left-associative. `n`/`m`/`y` resolve case-insensitively to constants;
/// quoted literals resolve to previously interned const symbols; every
/// other identifier must name a known symbol.
pub fn compile(text: &str, model: &Kconfig, loc: &Location) -> Result<Compiled> {
    let tokens = Lexer::new(text).tokenize();
    if matches!(tokens.first().map(|t| &t.kind), Some(TokenKind::Eof) | None) {
        return Ok(Compiled::default());
    }

    let mut parser = ExprParser {
        tokens,
        pos: 0,
        model,
        deps: Vec::new(),
        text,
        loc,
    };
    let data = parser.parse_or()?;
    if parser.peek() != &TokenKind::Eof {
        return Err(parser.error("unexpected trailing tokens"));
    }

    let expr = match data {
        ExprData::Expr(e) => *e,
        data @ ExprData::Symbol(_) => Expr::None(data),
    };
    Ok(Compiled {
        expr: Some(expr),
        deps: parser.deps,
    })
}

struct ExprParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    model: &'a Kconfig,
    deps: Vec<SymbolId>,
    text: &'a str,
    loc: &'a Location,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        Error::Expr {
            loc: self.loc.clone(),
            text: self.text.to_string(),
            msg: msg.into(),
        }
    }

    fn parse_or(&mut self) -> Result<ExprData> {
        let mut left = self.parse_and()?;
        while *self.peek() == TokenKind::Or {
            self.pos += 1;
            let right = self.parse_and()?;
            left = ExprData::Expr(Box::new(Expr::Or(left, right)));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ExprData> {
        let mut left = self.parse_eq()?;
        while *self.peek() == TokenKind::And {
            self.pos += 1;
            let right = self.parse_eq()?;
            left = ExprData::Expr(Box::new(Expr::And(left, right)));
        }
        Ok(left)
    }

    fn parse_eq(&mut self) -> Result<ExprData> {
        let left = self.parse_unary()?;
        match self.peek() {
            TokenKind::Eq => {
                self.pos += 1;
                let right = self.parse_unary()?;
                Ok(ExprData::Expr(Box::new(Expr::Equal(left, right))))
            }
            TokenKind::NotEq => {
                self.pos += 1;
                let right = self.parse_unary()?;
                Ok(ExprData::Expr(Box::new(Expr::NotEqual(left, right))))
            }
            _ => Ok(left),
        }
    }

    fn parse_unary(&mut self) -> Result<ExprData> {
        if *self.peek() == TokenKind::Not {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(ExprData::Expr(Box::new(Expr::Not(inner))));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ExprData> {
        match self.peek().clone() {
            TokenKind::OpenParen => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if *self.peek() != TokenKind::CloseParen {
                    return Err(self.error("expected `)`"));
                }
                self.pos += 1;
                Ok(inner)
            }
            TokenKind::StringLit(lit) => {
                self.pos += 1;
                let id = self
                    .model
                    .literals
                    .get(&lit)
                    .copied()
                    .ok_or_else(|| self.error(format!("literal `{lit}` was not interned")))?;
                Ok(ExprData::Symbol(id))
            }
            TokenKind::BadString(_) => Err(self.error("unbalanced quotes")),
            TokenKind::Ident(name) => {
                self.pos += 1;
                if let Some(t) = Tri::from_literal(&name) {
                    return Ok(ExprData::Expr(Box::new(Expr::Const(t))));
                }
                match self.model.lookup(&name) {
                    Some(id) => {
                        if !self.model.symbol(id).is_const && !self.deps.contains(&id) {
                            self.deps.push(id);
                        }
                        Ok(ExprData::Symbol(id))
                    }
                    None => Err(self.error(format!("unknown symbol `{name}`"))),
                }
            }
            TokenKind::Eof => Err(self.error("expected expression")),
            other => Err(self.error(format!("unexpected token {other:?}"))),
        }
    }
}
