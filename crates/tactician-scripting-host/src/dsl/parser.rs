use std::sync::Arc;

use tactician_events::{LogLevel, Value};

use super::lexer::{Tok, Token, tokenize};
use crate::ScriptError;
use crate::event_bus::Delivery;

/// Functions callable from scripts
pub const BUILTINS: &[&str] = &[
    "len", "find", "contains", "lower", "upper", "str", "num", "floor", "min", "max",
];

const KEYWORDS: &[&str] = &[
    "let", "if", "else", "for", "in", "return", "fail", "stop_trade", "start_trade", "info",
    "warn", "error", "debug", "emit", "on", "when", "cleanup", "fn", "and", "or", "not", "true",
    "false", "null",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Var(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionKind {
    Player,
    Team,
    Clan,
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let(String, Expr),
    Assign(String, Expr),
    SetState(String, Expr),
    If {
        branches: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },
    For {
        var: String,
        iter: Expr,
        body: Block,
    },
    Return(Option<Expr>),
    Fail(Expr),
    Trade {
        stop: bool,
        target: Expr,
    },
    Log {
        level: LogLevel,
        message: Expr,
        mentions: Vec<(MentionKind, Expr)>,
    },
    Emit {
        event: String,
        payload: Option<Expr>,
    },
    On {
        event: String,
        delivery: Delivery,
        filter: Option<Arc<Expr>>,
        body: Arc<Block>,
    },
    Cleanup(Arc<Block>),
    Expr(Expr),
}

/// A parsed script: top-level statements plus the optional entry points
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Block,
    pub run: Option<Block>,
    pub default: Option<Block>,
}

/// Deepest block or expression nesting a script may use
pub const MAX_NESTING: usize = 128;

pub fn parse(source: &str) -> Result<Program, ScriptError> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Enter one nesting level. Callers unwind with `self.depth -= n` on
    /// success; a failed parse is abandoned so errors need no unwinding.
    fn nest(&mut self) -> Result<(), ScriptError> {
        if self.depth >= MAX_NESTING {
            return self.error(format!("nesting deeper than {} levels", MAX_NESTING));
        }
        self.depth += 1;
        Ok(())
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ScriptError> {
        Err(ScriptError::compile(self.line(), message))
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(w) if w == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.is_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), ScriptError> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            self.error(format!("expected {}, found {}", what, describe(self.peek())))
        }
    }

    fn ident(&mut self) -> Result<String, ScriptError> {
        match self.peek().clone() {
            Tok::Ident(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                Ok(name)
            }
            other => self.error(format!("expected a name, found {}", describe(&other))),
        }
    }

    fn string(&mut self) -> Result<String, ScriptError> {
        match self.peek().clone() {
            Tok::Str(s) => {
                self.advance();
                Ok(s)
            }
            other => self.error(format!("expected a string, found {}", describe(&other))),
        }
    }

    fn skip_newlines(&mut self) {
        while *self.peek() == Tok::Newline {
            self.advance();
        }
    }

    fn end_of_statement(&mut self) -> Result<(), ScriptError> {
        match self.peek() {
            Tok::Newline => {
                self.skip_newlines();
                Ok(())
            }
            Tok::RBrace | Tok::Eof => Ok(()),
            other => self.error(format!("expected end of statement, found {}", describe(other))),
        }
    }

    fn program(mut self) -> Result<Program, ScriptError> {
        let mut program = Program::default();
        self.skip_newlines();
        while *self.peek() != Tok::Eof {
            if self.is_word("fn") {
                self.advance();
                let line = self.line();
                let name = self.ident()?;
                let body = self.block()?;
                let slot = match name.as_str() {
                    "run" => &mut program.run,
                    "default" => &mut program.default,
                    _ => {
                        return Err(ScriptError::compile(
                            line,
                            format!("unknown entry point '{}', expected run or default", name),
                        ));
                    }
                };
                if slot.is_some() {
                    return Err(ScriptError::compile(line, format!("duplicate fn {}", name)));
                }
                *slot = Some(body);
                self.end_of_statement()?;
            } else {
                program.body.push(self.statement()?);
            }
        }
        Ok(program)
    }

    fn block(&mut self) -> Result<Block, ScriptError> {
        self.expect(Tok::LBrace, "'{'")?;
        self.nest()?;
        self.skip_newlines();
        let mut stmts = Vec::new();
        while *self.peek() != Tok::RBrace {
            if *self.peek() == Tok::Eof {
                return self.error("unclosed block, expected '}'");
            }
            if self.is_word("fn") {
                return self.error("fn is only allowed at the top level");
            }
            stmts.push(self.statement()?);
        }
        self.advance();
        self.depth -= 1;
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        let kind = self.statement_kind()?;
        self.end_of_statement()?;
        Ok(Stmt { line, kind })
    }

    fn statement_kind(&mut self) -> Result<StmtKind, ScriptError> {
        let Tok::Ident(word) = self.peek().clone() else {
            return Ok(StmtKind::Expr(self.expr()?));
        };

        match word.as_str() {
            "let" => {
                self.advance();
                let name = self.ident()?;
                self.expect(Tok::Assign, "'='")?;
                Ok(StmtKind::Let(name, self.expr()?))
            }
            "if" => {
                self.advance();
                self.if_statement()
            }
            "for" => {
                self.advance();
                let var = self.ident()?;
                if !self.eat_word("in") {
                    return self.error("expected 'in'");
                }
                let iter = self.expr()?;
                let body = self.block()?;
                Ok(StmtKind::For { var, iter, body })
            }
            "return" => {
                self.advance();
                if matches!(self.peek(), Tok::Newline | Tok::RBrace | Tok::Eof) {
                    Ok(StmtKind::Return(None))
                } else {
                    Ok(StmtKind::Return(Some(self.expr()?)))
                }
            }
            "fail" => {
                self.advance();
                Ok(StmtKind::Fail(self.expr()?))
            }
            "stop_trade" | "start_trade" => {
                self.advance();
                Ok(StmtKind::Trade {
                    stop: word == "stop_trade",
                    target: self.expr()?,
                })
            }
            "info" | "warn" | "error" | "debug" => {
                self.advance();
                let level = match word.as_str() {
                    "info" => LogLevel::Info,
                    "warn" => LogLevel::Warn,
                    "error" => LogLevel::Error,
                    _ => LogLevel::Debug,
                };
                let message = self.expr()?;
                let mut mentions = Vec::new();
                while *self.peek() == Tok::At {
                    self.advance();
                    let kind = match self.ident()?.as_str() {
                        "player" => MentionKind::Player,
                        "team" => MentionKind::Team,
                        "clan" => MentionKind::Clan,
                        other => {
                            return self.error(format!(
                                "unknown mention '@{}', expected @player, @team or @clan",
                                other
                            ));
                        }
                    };
                    self.expect(Tok::LParen, "'('")?;
                    let target = self.expr()?;
                    self.expect(Tok::RParen, "')'")?;
                    mentions.push((kind, target));
                }
                Ok(StmtKind::Log {
                    level,
                    message,
                    mentions,
                })
            }
            "emit" => {
                self.advance();
                let event = self.string()?;
                let payload = if matches!(self.peek(), Tok::Newline | Tok::RBrace | Tok::Eof) {
                    None
                } else {
                    Some(self.expr()?)
                };
                Ok(StmtKind::Emit { event, payload })
            }
            "on" => {
                self.advance();
                let event = self.string()?;
                let delivery = if self.eat_word("once") {
                    Delivery::Once
                } else if self.eat_word("per_team") {
                    Delivery::OncePerTeam
                } else if self.eat_word("per_clan") {
                    Delivery::OncePerClan
                } else {
                    Delivery::Every
                };
                let filter = if self.eat_word("when") {
                    Some(Arc::new(self.expr()?))
                } else {
                    None
                };
                let body = Arc::new(self.block()?);
                Ok(StmtKind::On {
                    event,
                    delivery,
                    filter,
                    body,
                })
            }
            "cleanup" => {
                self.advance();
                Ok(StmtKind::Cleanup(Arc::new(self.block()?)))
            }
            "state" if *self.peek_at(1) == Tok::Dot && *self.peek_at(3) == Tok::Assign => {
                self.advance();
                self.advance();
                let key = self.ident()?;
                self.expect(Tok::Assign, "'='")?;
                Ok(StmtKind::SetState(key, self.expr()?))
            }
            _ if *self.peek_at(1) == Tok::Assign => {
                let name = self.ident()?;
                self.advance();
                Ok(StmtKind::Assign(name, self.expr()?))
            }
            _ => Ok(StmtKind::Expr(self.expr()?)),
        }
    }

    fn if_statement(&mut self) -> Result<StmtKind, ScriptError> {
        let mut branches = vec![(self.expr()?, self.block()?)];
        let mut otherwise = None;
        loop {
            // `else` may start the next line
            let mut lookahead = 0;
            while *self.peek_at(lookahead) == Tok::Newline {
                lookahead += 1;
            }
            if !matches!(self.peek_at(lookahead), Tok::Ident(w) if w == "else") {
                break;
            }
            self.skip_newlines();
            self.advance();
            if self.eat_word("if") {
                branches.push((self.expr()?, self.block()?));
            } else {
                otherwise = Some(self.block()?);
                break;
            }
        }
        Ok(StmtKind::If {
            branches,
            otherwise,
        })
    }

    fn expr(&mut self) -> Result<Expr, ScriptError> {
        self.nest()?;
        let expr = self.or_expr()?;
        self.depth -= 1;
        Ok(expr)
    }

    // Operator chains build left-deep trees, so every link counts as a level

    fn or_expr(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.and_expr()?;
        let mut links = 0;
        while self.eat_word("or") {
            self.nest()?;
            links += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.not_expr()?;
        let mut links = 0;
        while self.eat_word("and") {
            self.nest()?;
            links += 1;
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_word("not") {
            self.nest()?;
            let inner = self.not_expr()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.additive()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Tok::Eq => BinOp::Eq,
                Tok::NotEq => BinOp::NotEq,
                Tok::Lt => BinOp::Lt,
                Tok::LtEq => BinOp::LtEq,
                Tok::Gt => BinOp::Gt,
                Tok::GtEq => BinOp::GtEq,
                _ => break,
            };
            self.advance();
            self.nest()?;
            links += 1;
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.multiplicative()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.nest()?;
            links += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Rem,
                _ => break,
            };
            self.advance();
            self.nest()?;
            links += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        if *self.peek() == Tok::Minus {
            self.advance();
            self.nest()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        let mut links = 0;
        loop {
            if matches!(self.peek(), Tok::Dot | Tok::LBracket) {
                self.nest()?;
                links += 1;
            }
            match self.peek() {
                Tok::Dot => {
                    self.advance();
                    let field = match self.advance() {
                        Tok::Ident(name) => name,
                        other => return self.error(format!("expected a field name, found {}", describe(&other))),
                    };
                    expr = Expr::Member(Box::new(expr), field);
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.expr()?;
                    self.expect(Tok::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        self.depth -= links;
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        match self.peek().clone() {
            Tok::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Number(n)))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Text(s)))
            }
            Tok::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while *self.peek() != Tok::RBracket {
                    items.push(self.expr()?);
                    if *self.peek() != Tok::Comma {
                        break;
                    }
                    self.advance();
                }
                self.expect(Tok::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            Tok::LBrace => {
                self.advance();
                self.skip_newlines();
                let mut entries = Vec::new();
                while *self.peek() != Tok::RBrace {
                    let key = match self.advance() {
                        Tok::Ident(name) => name,
                        Tok::Str(s) => s,
                        other => return self.error(format!("expected a map key, found {}", describe(&other))),
                    };
                    self.expect(Tok::Colon, "':'")?;
                    entries.push((key, self.expr()?));
                    self.skip_newlines();
                    if *self.peek() != Tok::Comma {
                        break;
                    }
                    self.advance();
                    self.skip_newlines();
                }
                self.expect(Tok::RBrace, "'}'")?;
                Ok(Expr::Map(entries))
            }
            Tok::Ident(word) => match word.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Literal(Value::Bool(true)))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Literal(Value::Bool(false)))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Literal(Value::Null))
                }
                _ if *self.peek_at(1) == Tok::LParen => {
                    let line = self.line();
                    self.advance();
                    if !BUILTINS.contains(&word.as_str()) {
                        return Err(ScriptError::compile(line, format!("unknown function '{}'", word)));
                    }
                    self.advance();
                    let mut args = Vec::new();
                    while *self.peek() != Tok::RParen {
                        args.push(self.expr()?);
                        if *self.peek() != Tok::Comma {
                            break;
                        }
                        self.advance();
                    }
                    self.expect(Tok::RParen, "')'")?;
                    Ok(Expr::Call(word.clone(), args))
                }
                _ => Ok(Expr::Var(self.ident()?)),
            },
            other => self.error(format!("unexpected {}", describe(&other))),
        }
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Ident(name) => format!("'{}'", name),
        Tok::Number(n) => format!("number {}", n),
        Tok::Str(_) => "a string".to_string(),
        Tok::Newline => "end of line".to_string(),
        Tok::Eof => "end of script".to_string(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let program = parse("1 + 2 * 3 == 7 and not false").unwrap();
        let StmtKind::Expr(Expr::And(left, right)) = &program.body[0].kind else {
            panic!("expected and, got {:?}", program.body[0].kind);
        };
        assert!(matches!(**left, Expr::Binary(BinOp::Eq, _, _)));
        assert!(matches!(**right, Expr::Not(_)));
    }

    #[test]
    fn test_entry_points_and_top_level() {
        let program = parse("let a = 1\nfn run {\n  return a\n}\nfn default { 2 }").unwrap();
        assert_eq!(program.body.len(), 1);
        assert_eq!(program.run.as_ref().map(Vec::len), Some(1));
        assert!(program.default.is_some());
    }

    #[test]
    fn test_else_on_next_line() {
        let program = parse("if x {\n  1\n}\nelse if y {\n  2\n}\nelse {\n  3\n}").unwrap();
        let StmtKind::If { branches, otherwise } = &program.body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert!(otherwise.is_some());
    }

    #[test]
    fn test_subscription_statement() {
        let program = parse("on \"structureBuilt\" per_team when event.isSelf == false {\n  info \"built\" @team(event.team)\n}").unwrap();
        let StmtKind::On { event, delivery, filter, body } = &program.body[0].kind else {
            panic!("expected on");
        };
        assert_eq!(event, "structureBuilt");
        assert_eq!(*delivery, Delivery::OncePerTeam);
        assert!(filter.is_some());
        let StmtKind::Log { mentions, .. } = &body[0].kind else {
            panic!("expected log");
        };
        assert_eq!(mentions[0].0, MentionKind::Team);
    }

    #[test]
    fn test_state_assignment_and_map_literal() {
        let program = parse("state.count = {total: 1, \"by name\": [1, 2]}").unwrap();
        assert!(matches!(&program.body[0].kind, StmtKind::SetState(key, Expr::Map(_)) if key == "count"));
    }

    #[test]
    fn test_compile_errors_carry_line() {
        assert_eq!(
            parse("let a = 1\nlet = 2"),
            Err(ScriptError::compile(2, "expected a name, found Assign"))
        );
        assert!(matches!(
            parse("\n\nexplode(1)"),
            Err(ScriptError::Compile { line: 3, .. })
        ));
        assert!(matches!(parse("fn helper { }"), Err(ScriptError::Compile { .. })));
        assert!(matches!(parse("if x { 1"), Err(ScriptError::Compile { .. })));
    }

    #[test]
    fn test_deep_parentheses_are_rejected() {
        let source = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(
            parse(&source),
            Err(ScriptError::compile(1, "nesting deeper than 128 levels"))
        );
        assert!(matches!(
            parse(&format!("let a = {}1", "-".repeat(100_000))),
            Err(ScriptError::Compile { .. })
        ));
        assert!(matches!(
            parse(&format!("{}true", "not ".repeat(100_000))),
            Err(ScriptError::Compile { .. })
        ));
    }

    #[test]
    fn test_long_chains_and_nested_blocks_are_rejected() {
        let chain = vec!["1"; 100_000].join(" + ");
        assert!(matches!(parse(&chain), Err(ScriptError::Compile { line: 1, .. })));
        let members = format!("me{}", ".x".repeat(100_000));
        assert!(matches!(parse(&members), Err(ScriptError::Compile { .. })));
        let blocks = format!("{}1{}", "if true {\n".repeat(10_000), "\n}".repeat(10_000));
        assert!(matches!(parse(&blocks), Err(ScriptError::Compile { .. })));
    }

    #[test]
    fn test_moderate_nesting_still_parses() {
        let source = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert!(parse(&source).is_ok());
        assert!(parse(&vec!["\"a\""; 60].join(" + ")).is_ok());
        assert!(parse("if a { if b { if c { for x in [[1, 2], [3]] { state.v = x[0] } } } }").is_ok());
    }
}
