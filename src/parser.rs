use std::path::{Path, PathBuf};

use crate::env::{EnvProvider, ProcessEnv};
use crate::error::{Error, Location, Result};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::model::{AttrKind, Attribute, EntryKind, Kconfig, Symbol, SymbolId, ValueType};
use crate::reader::{Line, SourceReader};

impl Kconfig {
    /// Load a Kconfig tree, build its dependency graph, and materialize
    /// default values.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(path, 4, &ProcessEnv).await
    }

    pub async fn load_with(
        path: impl AsRef<Path>,
        tab_width: usize,
        env: &dyn EnvProvider,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut model = Kconfig::new();
        let cwd = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let root = model.root();
        {
            let mut parser = Parser {
                model: &mut model,
                env,
                cwd,
                tab_width,
            };
            parser.parse_file(path, root).await?;
        }
        model.build_graph()?;
        model.load_defaults()?;
        Ok(model)
    }
}

/// Parser context: the arena under construction plus the ambient state the
/// original design threaded implicitly (working directory, environment).
struct Parser<'a> {
    model: &'a mut Kconfig,
    env: &'a dyn EnvProvider,
    cwd: PathBuf,
    tab_width: usize,
}

/// Which attribute set an entry's attribute loop accepts.
#[derive(Clone, Copy, PartialEq, Eq)]
enum AttrContext {
    Config,
    Choice,
    Menu,
    Comment,
}

impl<'a> Parser<'a> {
    async fn parse_file(&mut self, path: &Path, parent: SymbolId) -> Result<()> {
        let mut reader = SourceReader::open(path, self.tab_width).await?;
        self.parse_entries(&mut reader, parent, None).await
    }

    /// Parse entries until the matching terminator (or end of file at the
    /// top level). Terminators pair LIFO; a stray or missing one is fatal.
    async fn parse_entries(
        &mut self,
        reader: &mut SourceReader,
        parent: SymbolId,
        terminator: Option<TokenKind>,
    ) -> Result<()> {
        let mut last_menuconfig: Option<SymbolId> = None;
        loop {
            let Some(line) = reader.next_line(self.env).await? else {
                if let Some(term) = &terminator {
                    return Err(Error::Parse {
                        loc: reader.location(),
                        msg: format!("missing `{}`", terminator_name(term)),
                    });
                }
                return Ok(());
            };
            let tokens = Lexer::new(&line.text).tokenize();
            let first = tokens[0].kind.clone();

            if Some(&first) == terminator.as_ref() {
                return Ok(());
            }
            if matches!(
                first,
                TokenKind::EndMenu | TokenKind::EndChoice | TokenKind::EndIf
            ) {
                return Err(Error::Parse {
                    loc: reader.location_of(&line),
                    msg: format!("unpaired `{}`", terminator_name(&first)),
                });
            }

            let created = self.parse_entry(reader, parent, &line, &tokens).await?;
            if let Some(id) = created {
                self.apply_menuconfig_nesting(parent, id, &mut last_menuconfig);
            }
        }
    }

    /// The hanging-block idiom: a sibling that is `if M` or carries
    /// `depends on M` right after `menuconfig M` nests under M.
    fn apply_menuconfig_nesting(
        &mut self,
        parent: SymbolId,
        id: SymbolId,
        last_menuconfig: &mut Option<SymbolId>,
    ) {
        if let Some(m) = *last_menuconfig {
            let mname = self.model.symbol(m).name.clone();
            let entry = self.model.symbol(id);
            let is_if = entry.kind == EntryKind::If;
            let hangs = entry
                .attributes
                .iter()
                .any(|a| a.kind() == AttrKind::DependsOn && a.value.trim() == mname);
            if hangs {
                if is_if {
                    // Splice the block's children directly under M; the
                    // condition already flows through nest_depends_on.
                    let children = std::mem::take(&mut self.model.symbol_mut(id).children);
                    self.model.symbol_mut(parent).children.retain(|&c| c != id);
                    for child in children {
                        self.model.symbol_mut(child).parent = Some(m);
                        self.model.symbol_mut(m).children.push(child);
                    }
                } else {
                    self.model.symbol_mut(parent).children.retain(|&c| c != id);
                    self.model.symbol_mut(id).parent = Some(m);
                    self.model.symbol_mut(m).children.push(id);
                }
                return;
            }
        }
        *last_menuconfig = (self.model.symbol(id).kind == EntryKind::MenuConfig).then_some(id);
    }

    async fn parse_entry(
        &mut self,
        reader: &mut SourceReader,
        parent: SymbolId,
        line: &Line,
        tokens: &[Token],
    ) -> Result<Option<SymbolId>> {
        let loc = reader.location_of(line);
        match &tokens[0].kind {
            TokenKind::MainMenu => {
                let prompt = self.expect_string(&tokens[1], &loc)?;
                let root = self.model.root();
                self.model.symbol_mut(root).name = prompt;
                self.model.symbol_mut(root).loc = loc;
                Ok(None)
            }

            TokenKind::Menu => {
                let prompt = self.expect_string(&tokens[1], &loc)?;
                let id = self.create_entry(EntryKind::Menu, prompt, parent, loc);
                self.parse_attributes(reader, id, AttrContext::Menu).await?;
                Box::pin(self.parse_entries(reader, id, Some(TokenKind::EndMenu))).await?;
                Ok(Some(id))
            }

            TokenKind::Config | TokenKind::MenuConfig => {
                let kind = if tokens[0].kind == TokenKind::MenuConfig {
                    EntryKind::MenuConfig
                } else {
                    EntryKind::Config
                };
                let name = self.expect_ident(&tokens[1], &loc)?;
                let id = self.create_entry(kind, name, parent, loc);
                self.parse_attributes(reader, id, AttrContext::Config)
                    .await?;
                self.apply_env_option(id);
                Ok(Some(id))
            }

            TokenKind::Choice => {
                let name = match &tokens[1].kind {
                    TokenKind::Ident(n) => n.clone(),
                    _ => String::new(),
                };
                let id = self.create_entry(EntryKind::Choice, name, parent, loc.clone());
                self.parse_attributes(reader, id, AttrContext::Choice)
                    .await?;
                Box::pin(self.parse_entries(reader, id, Some(TokenKind::EndChoice))).await?;
                self.validate_choice(id, &loc)?;
                Ok(Some(id))
            }

            TokenKind::If => {
                let condition = rest_of(&line.text, tokens, 1);
                if condition.is_empty() {
                    return Err(Error::Parse {
                        loc,
                        msg: "`if` without a condition".into(),
                    });
                }
                let id = self.create_entry(EntryKind::If, String::new(), parent, loc);
                let line_no = self.model.symbol(id).loc.line;
                let mut attr = Attribute::new(AttrKind::DependsOn, line_no);
                attr.value = condition;
                self.model.symbol_mut(id).attributes.push(attr);
                Box::pin(self.parse_entries(reader, id, Some(TokenKind::EndIf))).await?;
                Ok(Some(id))
            }

            TokenKind::CommentKw => {
                let prompt = self.expect_string(&tokens[1], &loc)?;
                let id = self.create_entry(EntryKind::Comment, prompt, parent, loc);
                self.parse_attributes(reader, id, AttrContext::Comment)
                    .await?;
                Ok(Some(id))
            }

            TokenKind::Source => {
                let path = match &tokens[1].kind {
                    TokenKind::StringLit(s) => s.clone(),
                    TokenKind::Ident(s) => s.clone(),
                    _ => {
                        return Err(Error::Parse {
                            loc,
                            msg: "expected path after `source`".into(),
                        });
                    }
                };
                let id = self.create_entry(EntryKind::Source, path.clone(), parent, loc.clone());
                let resolved = self.cwd.join(&path);
                match SourceReader::open(&resolved, self.tab_width).await {
                    Ok(mut nested) => {
                        // The sourced file parses into the same parent; the
                        // source entry stays as a childless marker.
                        Box::pin(self.parse_entries(&mut nested, parent, None)).await?;
                    }
                    Err(err) => {
                        log::warn!("{loc}: cannot source `{}`: {err}", resolved.display());
                    }
                }
                Ok(Some(id))
            }

            other => Err(Error::Parse {
                loc,
                msg: format!("unexpected {} at entry position", token_name(other)),
            }),
        }
    }

    fn create_entry(
        &mut self,
        kind: EntryKind,
        name: String,
        parent: SymbolId,
        loc: Location,
    ) -> SymbolId {
        let nest = {
            let p = self.model.symbol(parent);
            match p.kind {
                EntryKind::If => {
                    let cond = p
                        .attr(AttrKind::DependsOn)
                        .map(|a| a.value.clone())
                        .unwrap_or_default();
                    Some(and_texts(p.nest_depends_on.as_deref(), &cond))
                }
                _ => p.nest_depends_on.clone(),
            }
        };
        let mut symbol = Symbol::new(kind, name.clone(), loc);
        symbol.parent = Some(parent);
        symbol.nest_depends_on = nest;
        let id = self.model.alloc(symbol);
        self.model.symbol_mut(parent).children.push(id);
        if kind.is_config_like() && !name.is_empty() {
            self.model.by_name.entry(name).or_insert(id);
        }
        id
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    /// Consume attribute lines until something else appears, which is then
    /// pushed back for the entry loop.
    async fn parse_attributes(
        &mut self,
        reader: &mut SourceReader,
        entry: SymbolId,
        ctx: AttrContext,
    ) -> Result<()> {
        loop {
            let Some(line) = reader.next_line(self.env).await? else {
                return Ok(());
            };
            let tokens = Lexer::new(&line.text).tokenize();
            let consumed = self.parse_attribute(reader, entry, ctx, &line, &tokens).await?;
            if !consumed {
                reader.push_back(line);
                return Ok(());
            }
        }
    }

    async fn parse_attribute(
        &mut self,
        reader: &mut SourceReader,
        entry: SymbolId,
        ctx: AttrContext,
        line: &Line,
        tokens: &[Token],
    ) -> Result<bool> {
        let loc = reader.location_of(line);
        let first = &tokens[0].kind;

        match first {
            TokenKind::Bool
            | TokenKind::Tristate
            | TokenKind::StringType
            | TokenKind::Hex
            | TokenKind::Int => {
                let tristate_only = matches!(first, TokenKind::Bool | TokenKind::Tristate);
                if ctx == AttrContext::Choice && !tristate_only {
                    return Ok(false);
                }
                if !matches!(ctx, AttrContext::Config | AttrContext::Choice) {
                    return Ok(false);
                }
                let vt = type_of(first);
                self.push_type(entry, vt, line.number);
                // Optional inline prompt with optional condition.
                if let TokenKind::StringLit(text) = &tokens[1].kind {
                    let condition = condition_after(&line.text, tokens, 2);
                    self.push_attr(entry, AttrKind::Prompt, text.clone(), condition, line.number);
                }
                Ok(true)
            }

            TokenKind::DefBool | TokenKind::DefTristate => {
                if ctx != AttrContext::Config {
                    return Ok(false);
                }
                let vt = if *first == TokenKind::DefBool {
                    ValueType::Bool
                } else {
                    ValueType::Tristate
                };
                self.push_type(entry, vt, line.number);
                let (value, condition) = split_on_if(&line.text, tokens, 1);
                if value.is_empty() {
                    return Err(Error::Parse {
                        loc,
                        msg: "expected expression after `def_bool`/`def_tristate`".into(),
                    });
                }
                self.push_attr(entry, AttrKind::Default, value, condition, line.number);
                Ok(true)
            }

            TokenKind::Prompt => {
                if ctx == AttrContext::Menu || ctx == AttrContext::Comment {
                    return Ok(false);
                }
                let text = self.expect_string(&tokens[1], &loc)?;
                let condition = condition_after(&line.text, tokens, 2);
                self.push_attr(entry, AttrKind::Prompt, text, condition, line.number);
                Ok(true)
            }

            TokenKind::Default => {
                if ctx == AttrContext::Menu || ctx == AttrContext::Comment {
                    return Ok(false);
                }
                let (value, condition) = split_on_if(&line.text, tokens, 1);
                if value.is_empty() {
                    return Err(Error::Parse {
                        loc,
                        msg: "expected expression after `default`".into(),
                    });
                }
                self.push_attr(entry, AttrKind::Default, value, condition, line.number);
                Ok(true)
            }

            TokenKind::Depends => {
                let mut idx = 1;
                if tokens[idx].kind == TokenKind::On {
                    idx += 1;
                }
                let expr = rest_of(&line.text, tokens, idx);
                if expr.is_empty() {
                    return Err(Error::Parse {
                        loc,
                        msg: "expected expression after `depends on`".into(),
                    });
                }
                self.push_attr(entry, AttrKind::DependsOn, expr, None, line.number);
                Ok(true)
            }

            TokenKind::Select | TokenKind::Imply => {
                if ctx != AttrContext::Config {
                    return Ok(false);
                }
                let kind = if *first == TokenKind::Select {
                    AttrKind::Select
                } else {
                    AttrKind::Imply
                };
                let target = self.expect_ident(&tokens[1], &loc)?;
                let condition = condition_after(&line.text, tokens, 2);
                self.push_attr(entry, kind, target, condition, line.number);
                Ok(true)
            }

            TokenKind::Visible => {
                if ctx != AttrContext::Menu {
                    return Ok(false);
                }
                let mut idx = 1;
                if tokens[idx].kind == TokenKind::If {
                    idx += 1;
                }
                let expr = rest_of(&line.text, tokens, idx);
                if expr.is_empty() {
                    return Err(Error::Parse {
                        loc,
                        msg: "expected expression after `visible if`".into(),
                    });
                }
                self.push_attr(entry, AttrKind::VisibleIf, expr, None, line.number);
                Ok(true)
            }

            TokenKind::Range => {
                if ctx != AttrContext::Config {
                    return Ok(false);
                }
                let low = match tokens.get(1).map(|t| &t.kind) {
                    Some(TokenKind::Ident(s)) => s.clone(),
                    _ => {
                        return Err(Error::Parse {
                            loc,
                            msg: "malformed `range`: expected lower bound".into(),
                        });
                    }
                };
                let high = match tokens.get(2).map(|t| &t.kind) {
                    Some(TokenKind::Ident(s)) => s.clone(),
                    _ => {
                        return Err(Error::Parse {
                            loc,
                            msg: "malformed `range`: expected upper bound".into(),
                        });
                    }
                };
                let condition = condition_after(&line.text, tokens, 3);
                let mut attr = Attribute::new(AttrKind::Range, line.number);
                attr.value = format!("{low} {high}");
                attr.low = Some(low);
                attr.high = Some(high);
                attr.condition = condition;
                self.model.symbol_mut(entry).attributes.push(attr);
                Ok(true)
            }

            TokenKind::Help => {
                let text = self.consume_help(reader).await?;
                let mut attr = Attribute::new(AttrKind::Help, line.number);
                attr.value = text.clone();
                self.model.symbol_mut(entry).attributes.push(attr);
                self.model.symbol_mut(entry).help = Some(text);
                Ok(true)
            }

            TokenKind::OptionKw => {
                if ctx != AttrContext::Config {
                    return Ok(false);
                }
                let body = rest_of(&line.text, tokens, 1);
                if body.is_empty() {
                    return Err(Error::Parse {
                        loc,
                        msg: "expected name after `option`".into(),
                    });
                }
                self.push_attr(entry, AttrKind::Option, body, None, line.number);
                Ok(true)
            }

            TokenKind::Optional => {
                if ctx != AttrContext::Choice {
                    return Ok(false);
                }
                self.push_attr(entry, AttrKind::Optional, String::new(), None, line.number);
                Ok(true)
            }

            _ => Ok(false),
        }
    }

    fn push_type(&mut self, entry: SymbolId, vt: ValueType, line: u32) {
        let mut attr = Attribute::new(AttrKind::Type, line);
        attr.value_type = vt;
        let symbol = self.model.symbol_mut(entry);
        if symbol.value_type == ValueType::Invalid {
            symbol.value_type = vt;
        }
        symbol.attributes.push(attr);
    }

    fn push_attr(
        &mut self,
        entry: SymbolId,
        kind: AttrKind,
        value: String,
        condition: Option<String>,
        line: u32,
    ) {
        let mut attr = Attribute::new(kind, line);
        attr.value = value;
        attr.condition = condition;
        self.model.symbol_mut(entry).attributes.push(attr);
    }

    /// `option env=VAR`: export the entry's default under the entry's name
    /// (leading `$` stripped) when VAR is not already set.
    fn apply_env_option(&mut self, entry: SymbolId) {
        let symbol = self.model.symbol(entry);
        let Some(body) = symbol
            .attr(AttrKind::Option)
            .map(|a| a.value.trim().to_string())
        else {
            return;
        };
        let Some(var) = body.strip_prefix("env=").map(str::trim) else {
            return;
        };
        if self.env.get(var).is_some() {
            return;
        }
        let Some(default) = symbol.attr(AttrKind::Default).map(|a| unquote(&a.value)) else {
            return;
        };
        let key = symbol.name.trim_start_matches('$').to_string();
        self.env.set(&key, &default);
    }

    // -----------------------------------------------------------------------
    // Help blocks
    // -----------------------------------------------------------------------

    /// Capture indented text until a non-empty line at a strictly shallower
    /// indent than the first help line, which is pushed back.
    async fn consume_help(&mut self, reader: &mut SourceReader) -> Result<String> {
        let mut lines: Vec<String> = Vec::new();
        let mut base_indent: Option<usize> = None;

        loop {
            let Some(raw) = reader.next_raw_line().await? else {
                break;
            };
            let trimmed = raw.text.trim_start();
            if trimmed.is_empty() {
                if base_indent.is_some() {
                    lines.push(String::new());
                }
                continue;
            }
            let indent = raw.text.len() - trimmed.len();
            match base_indent {
                None => base_indent = Some(indent),
                Some(bi) => {
                    if indent < bi {
                        reader.push_back(raw);
                        break;
                    }
                }
            }
            let bi = base_indent.unwrap_or(0);
            lines.push(raw.text[bi.min(raw.text.len())..].to_string());
        }

        Ok(lines.join("\n").trim_end().to_string())
    }

    // -----------------------------------------------------------------------
    // Choice validation
    // -----------------------------------------------------------------------

    /// Every config reachable under the choice (descending through `if`
    /// blocks) must be boolish and agree on one type, which the choice
    /// adopts.
    fn validate_choice(&mut self, choice: SymbolId, loc: &Location) -> Result<()> {
        let mut agreed: Option<ValueType> = None;
        let mut stack: Vec<SymbolId> = self.model.symbol(choice).children.clone();
        while let Some(id) = stack.pop() {
            let child = self.model.symbol(id);
            match child.kind {
                EntryKind::If => stack.extend(child.children.iter().copied()),
                EntryKind::Config => {
                    if !child.value_type.is_boolish() {
                        return Err(Error::Parse {
                            loc: loc.clone(),
                            msg: format!(
                                "choice member `{}` must be bool or tristate, found {}",
                                child.name,
                                child.value_type.as_str()
                            ),
                        });
                    }
                    match agreed {
                        None => agreed = Some(child.value_type),
                        Some(t) if t == child.value_type => {}
                        Some(t) => {
                            return Err(Error::Parse {
                                loc: loc.clone(),
                                msg: format!(
                                    "choice mixes {} and {} members",
                                    t.as_str(),
                                    child.value_type.as_str()
                                ),
                            });
                        }
                    }
                }
                _ => {
                    return Err(Error::Parse {
                        loc: loc.clone(),
                        msg: format!("`{}` entry is not allowed inside a choice", kind_name(child.kind)),
                    });
                }
            }
        }
        if let Some(t) = agreed {
            self.model.symbol_mut(choice).value_type = t;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------------

    fn expect_string(&self, token: &Token, loc: &Location) -> Result<String> {
        match &token.kind {
            TokenKind::StringLit(s) => Ok(s.clone()),
            TokenKind::BadString(_) => Err(Error::Parse {
                loc: loc.clone(),
                msg: "unbalanced quotes".into(),
            }),
            _ => Err(Error::Parse {
                loc: loc.clone(),
                msg: "expected quoted string".into(),
            }),
        }
    }

    fn expect_ident(&self, token: &Token, loc: &Location) -> Result<String> {
        match &token.kind {
            TokenKind::Ident(s) => Ok(s.clone()),
            _ => Err(Error::Parse {
                loc: loc.clone(),
                msg: "expected identifier".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------

/// Raw text from the start of `tokens[idx]` to the end of the line.
fn rest_of(text: &str, tokens: &[Token], idx: usize) -> String {
    match tokens.get(idx) {
        Some(t) if t.kind != TokenKind::Eof => text[t.span.start..].trim().to_string(),
        _ => String::new(),
    }
}

/// Split `VALUE [if COND]` starting at `tokens[idx]`.
fn split_on_if(text: &str, tokens: &[Token], idx: usize) -> (String, Option<String>) {
    let start = match tokens.get(idx) {
        Some(t) if t.kind != TokenKind::Eof => t.span.start,
        _ => return (String::new(), None),
    };
    for (i, t) in tokens.iter().enumerate().skip(idx) {
        if t.kind == TokenKind::If {
            let value = text[start..t.span.start].trim().to_string();
            let condition = tokens
                .get(i + 1)
                .filter(|n| n.kind != TokenKind::Eof)
                .map(|n| text[n.span.start..].trim().to_string());
            return (value, condition);
        }
    }
    (text[start..].trim().to_string(), None)
}

/// Raw `if` condition text when `tokens[idx]` is the `if` keyword.
fn condition_after(text: &str, tokens: &[Token], idx: usize) -> Option<String> {
    match tokens.get(idx) {
        Some(t) if t.kind == TokenKind::If => tokens
            .get(idx + 1)
            .filter(|n| n.kind != TokenKind::Eof)
            .map(|n| text[n.span.start..].trim().to_string()),
        _ => None,
    }
}

/// AND-compose two raw condition texts.
pub(crate) fn and_texts(a: Option<&str>, b: &str) -> String {
    match a {
        Some(a) if !a.is_empty() => format!("({a}) && ({b})"),
        _ => b.to_string(),
    }
}

fn type_of(kind: &TokenKind) -> ValueType {
    match kind {
        TokenKind::Bool => ValueType::Bool,
        TokenKind::Tristate => ValueType::Tristate,
        TokenKind::StringType => ValueType::String,
        TokenKind::Hex => ValueType::Hex,
        TokenKind::Int => ValueType::Int,
        _ => ValueType::Invalid,
    }
}

fn terminator_name(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::EndMenu => "endmenu",
        TokenKind::EndChoice => "endchoice",
        TokenKind::EndIf => "endif",
        _ => "end",
    }
}

fn token_name(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(s) => format!("`{s}`"),
        TokenKind::StringLit(_) => "string literal".to_string(),
        other => format!("{other:?}"),
    }
}

fn kind_name(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::MainMenu => "mainmenu",
        EntryKind::Menu => "menu",
        EntryKind::MenuConfig => "menuconfig",
        EntryKind::Config => "config",
        EntryKind::Choice => "choice",
        EntryKind::Comment => "comment",
        EntryKind::If => "if",
        EntryKind::Source => "source",
    }
}

/// Strip one layer of matching quotes, if present.
pub(crate) fn unquote(text: &str) -> String {
    let t = text.trim();
    if t.len() >= 2 {
        let bytes = t.as_bytes();
        if (bytes[0] == b'"' && bytes[t.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[t.len() - 1] == b'\'')
        {
            return t[1..t.len() - 1].to_string();
        }
    }
    t.to_string()
}
