use dashmap::DashMap;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::expr::{Expr, ExprData};
use crate::model::{AttrKind, Change, EntryKind, Kconfig, SymbolId, ValueType};
use crate::parser::unquote;
use crate::tri::Tri;

/// Collects failures raised while a layer evaluates in parallel; the sweep
/// surfaces them as one composite error after the layer drains.
#[derive(Default)]
struct LayerErrors {
    inner: DashMap<usize, Vec<String>>,
}

impl LayerErrors {
    fn push(&self, layer: usize, msg: String) {
        self.inner.entry(layer).or_default().push(msg);
    }

    fn drain(&self, layer: usize) -> Result<()> {
        match self.inner.remove(&layer) {
            Some((_, messages)) if !messages.is_empty() => {
                Err(Error::Evaluation { layer, messages })
            }
            _ => Ok(()),
        }
    }
}

impl Kconfig {
    /// Initial pass: materialize default values layer by layer.
    pub(crate) fn load_defaults(&self) -> Result<()> {
        self.sweep(None, true)
    }

    /// Recompute the whole universe in layer order. Used after a `.config`
    /// overlay installs values out of band.
    pub(crate) fn sweep(&self, source: Option<SymbolId>, load_defaults: bool) -> Result<()> {
        let errors = LayerErrors::default();
        for (idx, layer) in self.layers.iter().enumerate() {
            layer.par_iter().for_each(|&id| {
                if let Err(msg) = self.calculate(id, source, load_defaults) {
                    errors.push(idx, msg);
                }
            });
            errors.drain(idx)?;
        }
        Ok(())
    }

    /// Set a symbol's value through validation and cascade the change
    /// through its controls frontiers. Invalid values are recorded on the
    /// symbol and do not cascade.
    pub fn set_value(&self, id: SymbolId, value: &str) -> Result<()> {
        let symbol = self.symbol(id);

        // Choice children are driven, not user-assigned: route the edit to
        // the choice parent (tristate `m` is taken directly).
        if let Some(parent) = symbol.choice_parent {
            match value {
                "y" => return self.set_value(parent, &symbol.name),
                "n" => {
                    let p = self.symbol(parent);
                    let selected = p.state.read().value == symbol.name;
                    if selected && p.has_attr(AttrKind::Optional) {
                        return self.set_value(parent, "");
                    }
                    if selected {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }

        if let Err(msg) = self.validate(id, value) {
            let mut state = symbol.state.write();
            state.base = value.to_string();
            state.value = value.to_string();
            state.invalid = Some(msg);
            drop(state);
            self.notify(id, Change::Value);
            return Ok(());
        }

        let before = symbol.state.read().value.clone();
        {
            let mut state = symbol.state.write();
            state.base = value.to_string();
            state.invalid = None;
        }
        if let Err(msg) = self.calculate(id, Some(id), false) {
            return Err(Error::Evaluation {
                layer: symbol.level.unwrap_or(0),
                messages: vec![msg],
            });
        }
        self.propagate(id, Some(id))?;
        if symbol.state.read().value != before {
            self.notify(id, Change::Value);
        }
        Ok(())
    }

    /// Recompute every controls frontier of `id` in ascending layer order,
    /// parallel within each frontier.
    fn propagate(&self, id: SymbolId, source: Option<SymbolId>) -> Result<()> {
        let errors = LayerErrors::default();
        for (layer, members) in &self.symbol(id).controls {
            members.par_iter().for_each(|&member| {
                if let Err(msg) = self.calculate(member, source, false) {
                    errors.push(*layer, msg);
                }
            });
            errors.drain(*layer)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Per-symbol evaluation
    // -----------------------------------------------------------------------

    /// The unified evaluation step. Reads only symbols in lower layers and
    /// writes only its own state, so a layer may run it in parallel.
    fn calculate(
        &self,
        id: SymbolId,
        source: Option<SymbolId>,
        load_defaults: bool,
    ) -> std::result::Result<(), String> {
        let symbol = self.symbol(id);

        let depends_result = symbol
            .depends_expr
            .as_ref()
            .map(|e| e.calculate(self))
            .unwrap_or(Tri::Y);
        let is_enable = depends_result != Tri::N;

        let conds: Vec<Tri> = symbol
            .attributes
            .iter()
            .map(|a| {
                a.condition_expr
                    .as_ref()
                    .map(|e| e.calculate(self))
                    .unwrap_or(Tri::Y)
            })
            .collect();

        let prev = symbol.state.read().clone();
        let mut next = prev.clone();
        next.is_enable = is_enable;
        next.attr_conditions = conds.clone();

        let mut driving_error: Option<String> = None;

        match symbol.kind {
            EntryKind::Menu | EntryKind::MainMenu => {
                next.prompt = Some(symbol.name.clone());
                let mut has_visible_if = false;
                let mut visible_result = Tri::Y;
                for attr in &symbol.attributes {
                    if attr.kind() == AttrKind::VisibleIf {
                        has_visible_if = true;
                        let r = attr
                            .value_expr
                            .as_ref()
                            .map(|e| e.calculate(self))
                            .unwrap_or(Tri::Y);
                        visible_result = visible_result.and(r);
                    }
                }
                next.is_visible = is_enable && (!has_visible_if || visible_result != Tri::N);
            }

            EntryKind::Comment => {
                next.prompt = Some(symbol.name.clone());
                next.is_visible = is_enable;
            }

            EntryKind::Config | EntryKind::MenuConfig | EntryKind::Choice => {
                next.prompt = symbol
                    .attributes
                    .iter()
                    .zip(&conds)
                    .find(|(a, c)| a.kind() == AttrKind::Prompt && **c == Tri::Y)
                    .map(|(a, _)| a.value.clone());

                next.default = self.computed_default(id, &conds);

                if load_defaults {
                    // Silent overwrite, no change notification.
                    next.base = self.default_store_value(id, &next.default);
                } else if next.prompt.is_none() {
                    // Hidden symbols are driven, never user-typed: the value
                    // goes through validation, and the enclosing sweep
                    // provides the cascade.
                    let driven = self.default_store_value(id, &next.default);
                    match self.validate_with(id, &driven, Some(&conds)) {
                        Ok(()) => {
                            next.base = driven;
                            next.invalid = None;
                        }
                        Err(msg) => {
                            next.base = driven;
                            next.invalid = Some(msg.clone());
                            driving_error = Some(format!("{}: {msg}", symbol.loc));
                        }
                    }
                }

                next.is_visible =
                    is_enable && next.prompt.as_deref().is_some_and(|p| !p.is_empty());

                if let Some(parent) = symbol.choice_parent {
                    self.apply_choice_rule(id, parent, &mut next);
                }

                if symbol.value_type.is_boolish() && symbol.kind != EntryKind::Choice {
                    self.apply_clamp(id, source, &mut next);
                } else {
                    next.value = next.base.clone();
                }
            }

            // Structural scaffolding never reaches the evaluator.
            EntryKind::If | EntryKind::Source => {}
        }

        let mut changes: Vec<Change> = Vec::new();
        if next.is_enable != prev.is_enable {
            changes.push(Change::IsEnable);
        }
        if next.is_visible != prev.is_visible {
            changes.push(Change::IsVisible);
        }
        if next.prompt != prev.prompt {
            changes.push(Change::Prompt);
        }
        if next.default != prev.default {
            changes.push(Change::Default);
        }
        if next.is_selected != prev.is_selected {
            changes.push(Change::IsSelected);
        }
        let value_changed = next.value != prev.value;

        *symbol.state.write() = next;

        self.notify_all(id, &changes);
        // The defaults pass installs values silently; a clamp adjustment
        // stays quiet from the edit source's own perspective.
        if value_changed && !load_defaults && source != Some(id) {
            self.notify(id, Change::Value);
        }

        match driving_error {
            Some(msg) => Err(msg),
            None => Ok(()),
        }
    }

    /// Choice-child value rule: the child's value is a function of the
    /// parent's selection. The backing value feeds the tristate branch, so
    /// a direct `m` assignment survives and a deselected `y` demotes to `m`.
    fn apply_choice_rule(
        &self,
        id: SymbolId,
        parent: SymbolId,
        next: &mut crate::model::SymbolState,
    ) {
        let symbol = self.symbol(id);
        let p = self.symbol(parent);
        let selected = p.state.read().value == symbol.name;
        next.is_selected = selected;
        next.base = if selected {
            "y".to_string()
        } else if p.value_type != ValueType::Tristate {
            "n".to_string()
        } else if Tri::from_value(&next.base) == Tri::N {
            "n".to_string()
        } else {
            "m".to_string()
        };
    }

    /// Reverse-dependency floor: `select` clamps unconditionally, `imply`
    /// only when the recomputation did not originate at this symbol.
    fn apply_clamp(
        &self,
        id: SymbolId,
        source: Option<SymbolId>,
        next: &mut crate::model::SymbolState,
    ) {
        let symbol = self.symbol(id);
        let mut floor = self.reverse_floor(id, &symbol.selected_by, AttrKind::Select);
        if source != Some(id) {
            floor = floor.or(self.reverse_floor(id, &symbol.implied_by, AttrKind::Imply));
        }

        let mut val = Tri::from_value(&next.base);
        if val < floor {
            val = floor;
        }
        if symbol.value_type == ValueType::Bool && val == Tri::M {
            val = Tri::Y;
        }
        // Invalid text on a boolish symbol is preserved verbatim unless the
        // clamp forces it upward.
        if val == Tri::from_value(&next.base) && next.invalid.is_some() {
            next.value = next.base.clone();
        } else {
            next.value = val.as_str().to_string();
        }
    }

    /// Highest tri-value among enabled reverse-dependency owners whose
    /// select/imply condition holds. Conditions are evaluated here rather
    /// than read from the owner's stored results: a condition like
    /// `select A if B` on B itself must see B's freshly stored value.
    fn reverse_floor(&self, id: SymbolId, owners: &[SymbolId], kind: AttrKind) -> Tri {
        let mut floor = Tri::N;
        for &owner in owners {
            let r = self.symbol(owner);
            let (enabled, value) = {
                let state = r.state.read();
                (state.is_enable, state.value.clone())
            };
            if !enabled {
                continue;
            }
            for attr in &r.attributes {
                if attr.kind() == kind && attr.reverse_dep == Some(id) {
                    let cond = attr
                        .condition_expr
                        .as_ref()
                        .map(|e| e.calculate(self))
                        .unwrap_or(Tri::Y);
                    if cond != Tri::N {
                        floor = floor.or(Tri::from_value(&value));
                    }
                }
            }
        }
        floor
    }

    // -----------------------------------------------------------------------
    // Defaults
    // -----------------------------------------------------------------------

    /// First active `default` attribute, with the type-directed fallbacks:
    /// int/hex fall back to the active range's low bound (else "0"), a
    /// non-optional choice to its first member.
    fn computed_default(&self, id: SymbolId, conds: &[Tri]) -> Option<String> {
        let symbol = self.symbol(id);
        let active = symbol
            .attributes
            .iter()
            .zip(conds)
            .find(|(a, c)| a.kind() == AttrKind::Default && **c == Tri::Y)
            .map(|(a, _)| a);

        if symbol.kind == EntryKind::Choice {
            let named = active.map(|a| a.value.trim().to_string());
            if let Some(name) = named {
                if self.choice_member(id, &name).is_some() {
                    return Some(name);
                }
            }
            if symbol.has_attr(AttrKind::Optional) {
                return None;
            }
            return self.first_choice_member(id);
        }

        if let Some(attr) = active {
            return Some(self.default_value_of(id, attr));
        }

        match symbol.value_type {
            ValueType::Int | ValueType::Hex => Some(
                self.active_range(id, Some(conds))
                    .map(|(low, _)| low)
                    .unwrap_or_else(|| "0".to_string()),
            ),
            _ => None,
        }
    }

    /// Resolve one default attribute to a value string.
    fn default_value_of(&self, id: SymbolId, attr: &crate::model::Attribute) -> String {
        let symbol = self.symbol(id);
        match &attr.value_expr {
            Some(expr) => {
                if symbol.value_type.is_boolish() {
                    return expr.calculate(self).as_str().to_string();
                }
                // String/int/hex defaults referencing a single symbol copy
                // that symbol's value; anything else collapses on the
                // lattice.
                if let Expr::None(ExprData::Symbol(s)) = expr {
                    return self.symbol(*s).state.read().value.clone();
                }
                expr.calculate(self).as_str().to_string()
            }
            None => unquote(&attr.value),
        }
    }

    /// The value the defaults pass or hidden-symbol driving installs. An
    /// optional choice with no default stores the empty selection.
    fn default_store_value(&self, id: SymbolId, default: &Option<String>) -> String {
        match default {
            Some(v) => v.clone(),
            None => {
                let symbol = self.symbol(id);
                if symbol.kind == EntryKind::Choice {
                    return String::new();
                }
                match symbol.value_type {
                    ValueType::Bool | ValueType::Tristate => "n".to_string(),
                    _ => String::new(),
                }
            }
        }
    }

    fn first_choice_member(&self, choice: SymbolId) -> Option<String> {
        let mut stack: Vec<SymbolId> = self
            .symbol(choice)
            .children
            .iter()
            .rev()
            .copied()
            .collect();
        while let Some(id) = stack.pop() {
            let child = self.symbol(id);
            match child.kind {
                EntryKind::Config => return Some(child.name.clone()),
                EntryKind::If => stack.extend(child.children.iter().rev().copied()),
                _ => {}
            }
        }
        None
    }

    fn choice_member(&self, choice: SymbolId, name: &str) -> Option<SymbolId> {
        let mut stack: Vec<SymbolId> = self.symbol(choice).children.clone();
        while let Some(id) = stack.pop() {
            let child = self.symbol(id);
            match child.kind {
                EntryKind::Config if child.name == name => return Some(id),
                EntryKind::If => stack.extend(child.children.iter().copied()),
                _ => {}
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Active range bounds, endpoints resolved through referenced symbols.
    /// `conds` carries the condition results of the evaluation in flight;
    /// outside an evaluation the stored results are used.
    fn active_range(&self, id: SymbolId, conds: Option<&[Tri]>) -> Option<(String, String)> {
        let symbol = self.symbol(id);
        let stored;
        let conds = match conds {
            Some(c) => c,
            None => {
                stored = symbol.state.read().attr_conditions.clone();
                &stored
            }
        };
        for (idx, attr) in symbol.attributes.iter().enumerate() {
            if attr.kind() != AttrKind::Range {
                continue;
            }
            if conds.get(idx).copied().unwrap_or(Tri::Y) != Tri::Y {
                continue;
            }
            let low = resolve_bound(self, attr.low_expr.as_ref(), attr.low.as_deref());
            let high = resolve_bound(self, attr.high_expr.as_ref(), attr.high.as_deref());
            return Some((low, high));
        }
        None
    }

    fn validate(&self, id: SymbolId, value: &str) -> std::result::Result<(), String> {
        self.validate_with(id, value, None)
    }

    fn validate_with(
        &self,
        id: SymbolId,
        value: &str,
        conds: Option<&[Tri]>,
    ) -> std::result::Result<(), String> {
        let symbol = self.symbol(id);

        if symbol.kind == EntryKind::Choice {
            if value.is_empty() {
                if symbol.has_attr(AttrKind::Optional) {
                    return Ok(());
                }
                return Err("choice requires a selection".to_string());
            }
            if self.choice_member(id, value).is_none() {
                return Err(format!("`{value}` is not a member of this choice"));
            }
            return Ok(());
        }

        match symbol.value_type {
            ValueType::Bool => match value {
                "n" | "y" => Ok(()),
                _ => Err(format!("`{value}` is not a bool value (n/y)")),
            },
            ValueType::Tristate => match value {
                "n" | "m" | "y" => Ok(()),
                _ => Err(format!("`{value}` is not a tristate value (n/m/y)")),
            },
            ValueType::Int => {
                let parsed = parse_int(value)
                    .ok_or_else(|| format!("`{value}` is not a decimal integer"))?;
                self.check_range(id, parsed, value, conds)
            }
            ValueType::Hex => {
                let parsed = parse_hex(value)
                    .ok_or_else(|| format!("`{value}` is not a hex value (0x...)"))?;
                self.check_range(id, parsed, value, conds)
            }
            ValueType::String | ValueType::Invalid => Ok(()),
        }
    }

    fn check_range(
        &self,
        id: SymbolId,
        parsed: i64,
        value: &str,
        conds: Option<&[Tri]>,
    ) -> std::result::Result<(), String> {
        let Some((low, high)) = self.active_range(id, conds) else {
            return Ok(());
        };
        let low_n = parse_int(&low).or_else(|| parse_hex(&low));
        let high_n = parse_int(&high).or_else(|| parse_hex(&high));
        if let (Some(lo), Some(hi)) = (low_n, high_n) {
            if parsed < lo || parsed > hi {
                return Err(format!("`{value}` is outside the range [{low}, {high}]"));
            }
        }
        Ok(())
    }
}

fn resolve_bound(model: &Kconfig, expr: Option<&Expr>, literal: Option<&str>) -> String {
    if let Some(Expr::None(ExprData::Symbol(s))) = expr {
        return model.symbol(*s).state.read().value.clone();
    }
    literal.unwrap_or("0").trim().to_string()
}

fn parse_int(s: &str) -> Option<i64> {
    let t = s.strip_prefix('-').unwrap_or(s);
    if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_hex(s: &str) -> Option<i64> {
    let t = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if t.is_empty() || !t.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    i64::from_str_radix(t, 16).ok()
}
