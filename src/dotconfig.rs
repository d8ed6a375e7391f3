use std::path::Path;

use crate::error::Result;
use crate::model::{EntryKind, Kconfig, SymbolId, ValueType};
use crate::tri::Tri;

const BANNER: &str = "# Automatically generated file; DO NOT EDIT.";

/// One parsed `.config` record. The on-disk type is inferred from the
/// right-hand side and must match the symbol's type to be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DotValue {
    NotSet,
    Boolish(Tri),
    Int(String),
    Hex(String),
    Str(String),
}

impl Kconfig {
    /// Serialize the current selection. Document order, so output is
    /// stable across runs.
    pub async fn write_dot_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = {
            let _guard = self.op_lock.lock();
            self.render_dot_config()
        };
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Overlay a previously written `.config`: values are matched by name,
    /// installed when the on-disk type agrees, and the whole universe is
    /// re-evaluated. Unknown names are silently ignored.
    pub async fn read_dot_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = tokio::fs::read_to_string(path).await?;
        self.overlay_dot_config(&content)
    }

    pub(crate) fn render_dot_config(&self) -> String {
        let mut out = String::new();
        out.push_str(BANNER);
        out.push('\n');

        let root = self.symbol(self.root());
        if !root.name.is_empty() {
            out.push_str(&format!("#\n# {}\n#\n", root.name));
        }
        for &child in &root.children {
            self.render_entry(child, &mut out);
        }
        out
    }

    fn render_entry(&self, id: SymbolId, out: &mut String) {
        let symbol = self.symbol(id);
        match symbol.kind {
            EntryKind::Menu => {
                if symbol.state.read().is_enable {
                    out.push_str(&format!("\n#\n# {}\n#\n", symbol.name));
                    for &child in &symbol.children {
                        self.render_entry(child, out);
                    }
                }
            }
            EntryKind::Config | EntryKind::MenuConfig => {
                self.render_symbol_line(id, out);
                for &child in &symbol.children {
                    self.render_entry(child, out);
                }
            }
            EntryKind::Choice | EntryKind::If | EntryKind::MainMenu => {
                for &child in &symbol.children {
                    self.render_entry(child, out);
                }
            }
            EntryKind::Comment | EntryKind::Source => {}
        }
    }

    fn render_symbol_line(&self, id: SymbolId, out: &mut String) {
        let symbol = self.symbol(id);
        // `$`-named symbols are environment pass-throughs.
        if symbol.is_const || symbol.name.starts_with('$') {
            return;
        }
        let state = symbol.state.read();
        if !state.is_enable {
            return;
        }
        match symbol.value_type {
            ValueType::Bool | ValueType::Tristate => match Tri::from_value(&state.value) {
                Tri::N => out.push_str(&format!("# CONFIG_{} is not set\n", symbol.name)),
                t => out.push_str(&format!("CONFIG_{}={}\n", symbol.name, t)),
            },
            ValueType::Int | ValueType::Hex => {
                if !state.value.is_empty() {
                    out.push_str(&format!("CONFIG_{}={}\n", symbol.name, state.value));
                }
            }
            ValueType::String => {
                out.push_str(&format!(
                    "CONFIG_{}=\"{}\"\n",
                    symbol.name,
                    escape(&state.value)
                ));
            }
            ValueType::Invalid => {}
        }
    }

    pub(crate) fn overlay_dot_config(&self, content: &str) -> Result<()> {
        {
            let _guard = self.op_lock.lock();
            for line in content.lines() {
                let Some((name, value)) = parse_line(line) else {
                    continue;
                };
                let Some(id) = self.lookup(&name) else {
                    continue;
                };
                self.install(id, value);
            }
        }
        self.sweep(None, false)
    }

    /// Install one on-disk record when its type matches the symbol's. A
    /// bool symbol also accepts a tristate record, down-cast to `y`.
    fn install(&self, id: SymbolId, value: DotValue) {
        let symbol = self.symbol(id);
        let text = match (symbol.value_type, &value) {
            (ValueType::Bool | ValueType::Tristate, DotValue::NotSet) => "n".to_string(),
            (ValueType::Bool, DotValue::Boolish(t)) => match t {
                Tri::N => "n".to_string(),
                _ => "y".to_string(),
            },
            (ValueType::Tristate, DotValue::Boolish(t)) => t.as_str().to_string(),
            (ValueType::Int, DotValue::Int(v)) => v.clone(),
            (ValueType::Hex, DotValue::Hex(v)) => v.clone(),
            (ValueType::String, DotValue::Str(v)) => v.clone(),
            _ => {
                log::debug!(
                    "ignoring .config record for `{}`: type mismatch ({:?} vs {})",
                    symbol.name,
                    value,
                    symbol.value_type.as_str()
                );
                return;
            }
        };

        // A set record for a choice member selects it in the parent.
        if let Some(parent) = symbol.choice_parent {
            if Tri::from_value(&text) == Tri::Y {
                let mut pstate = self.symbol(parent).state.write();
                pstate.base = symbol.name.clone();
                return;
            }
            if Tri::from_value(&text) == Tri::N {
                return;
            }
        }

        let mut state = symbol.state.write();
        state.base = text;
        state.invalid = None;
    }
}

fn parse_line(line: &str) -> Option<(String, DotValue)> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("# CONFIG_") {
        let name = rest.strip_suffix(" is not set")?;
        return Some((name.to_string(), DotValue::NotSet));
    }
    if line.starts_with('#') || line.is_empty() {
        return None;
    }
    let rest = line.strip_prefix("CONFIG_")?;
    let (name, rhs) = rest.split_once('=')?;
    let value = classify(rhs)?;
    Some((name.to_string(), value))
}

fn classify(rhs: &str) -> Option<DotValue> {
    match rhs {
        "y" => return Some(DotValue::Boolish(Tri::Y)),
        "m" => return Some(DotValue::Boolish(Tri::M)),
        "n" => return Some(DotValue::Boolish(Tri::N)),
        _ => {}
    }
    if let Some(inner) = rhs.strip_prefix('"') {
        let inner = inner.strip_suffix('"')?;
        return Some(DotValue::Str(unescape(inner)));
    }
    if rhs.starts_with("0x") || rhs.starts_with("0X") {
        return Some(DotValue::Hex(rhs.to_string()));
    }
    let digits = rhs.strip_prefix('-').unwrap_or(rhs);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return Some(DotValue::Int(rhs.to_string()));
    }
    None
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch == '\\' || ch == '"' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}
