//! Transcription of an Opti instance into a backend problem.
//!
//! The builder works in two passes. [`Layout`] fixes the structure: which
//! variables and parameters take part, where their elements live in the
//! backend vectors and which constraint rows become general rows versus
//! folded variable bounds. [`Transcription`] then fills in numbers and
//! expressions:
//!
//! ```text
//! x = o + s .* x_hat          (per variable element)
//! g_hat = middle / c          (per general row, bounds lb/c, ub/c)
//! f_hat = f / f_scale
//! ```
//!
//! Multipliers come back through the inverse maps: a general row reports
//! `sign * f_scale * lam_g_hat / c`, a folded bound
//! `sign * f_scale * lam_x_hat / s` on the first row whose bound is the
//! active one.

use std::collections::{HashMap, HashSet};
use std::panic::Location;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::registry::{Domain, Registry};
use super::Record;
use crate::atoms::{dot, reshape, vertcat};
use crate::error::{OptiError, Result};
use crate::expr::{
    constant, constant_vec, eval_f64, zeros, Bindings, Expr, Shape, SymbolData, SymbolId,
    SymbolKind,
};
use crate::solver::{FunctionCache, NlpArgs, NlpFunction, NlpProblem, ProblemClass};

/// Borrowed view of the instance state the builder reads.
pub(crate) struct Model<'a> {
    pub registry: &'a Registry,
    pub objective: Option<&'a Expr>,
    pub f_scale: f64,
    pub records: &'a [Record],
    pub class: ProblemClass,
    pub detect_simple_bounds: bool,
}

impl Model<'_> {
    /// Symbols of `kind` used by the objective or a constraint, in
    /// declaration order.
    pub fn active(&self, kind: SymbolKind) -> Vec<Arc<SymbolData>> {
        let mut used: HashSet<SymbolId> = HashSet::new();
        if let Some(f) = self.objective {
            used.extend(f.symbols().iter().map(|s| s.id));
        }
        for record in self.records {
            used.extend(record.canon.source.symbols().iter().map(|s| s.id));
        }
        self.registry
            .of_kind(kind)
            .filter(|e| used.contains(&e.symbol.id))
            .map(|e| e.symbol.clone())
            .collect()
    }
}

/// A symbol and the position of its first element in a backend vector.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub symbol: Arc<SymbolData>,
    pub start: usize,
}

fn slots(symbols: Vec<Arc<SymbolData>>) -> (Vec<Slot>, usize) {
    let mut start = 0;
    let slots = symbols
        .into_iter()
        .map(|symbol| {
            let slot = Slot { symbol, start };
            start += slot.symbol.size();
            slot
        })
        .collect();
    (slots, start)
}

/// Where one user row ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// General backend row.
    General(usize),
    /// Bound on backend variable element.
    Folded(usize),
}

/// A general backend row and the user row it comes from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GeneralRow {
    pub user_row: usize,
    pub sign: f64,
    pub scale: f64,
}

/// Structure of the transcription; needs no numbers.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub variables: Vec<Slot>,
    pub parameters: Vec<Slot>,
    pub nx: usize,
    pub np: usize,
    /// Per record, per row.
    pub placement: Vec<Vec<Placement>>,
    pub general: Vec<GeneralRow>,
    pub user_rows: usize,
    pub x_scale: Vec<f64>,
    pub x_offset: Vec<f64>,
    pub f_scale: f64,
}

impl Layout {
    pub fn new(model: &Model<'_>) -> Self {
        let (variables, nx) = slots(model.active(SymbolKind::Variable));
        let (parameters, np) = slots(model.active(SymbolKind::Parameter));
        let starts: HashMap<SymbolId, usize> =
            variables.iter().map(|s| (s.symbol.id, s.start)).collect();

        let mut x_scale = Vec::with_capacity(nx);
        let mut x_offset = Vec::with_capacity(nx);
        for slot in &variables {
            if let Some(entry) = model.registry.get(slot.symbol.id) {
                x_scale.extend_from_slice(&entry.scale);
                x_offset.extend_from_slice(&entry.offset);
            }
        }

        let mut placement = Vec::with_capacity(model.records.len());
        let mut general = Vec::new();
        let mut user_row = 0;
        for record in model.records {
            let canon = &record.canon;
            let folded = model
                .detect_simple_bounds
                .then(|| canon.simple())
                .flatten()
                .and_then(|(sym, elements)| starts.get(&sym.id).map(|&k| (k, elements)));
            let rows = match folded {
                Some((start, elements)) => elements
                    .iter()
                    .map(|&e| Placement::Folded(start + e))
                    .collect(),
                None => (0..canon.rows())
                    .map(|r| {
                        general.push(GeneralRow {
                            user_row: user_row + r,
                            sign: canon.sign(),
                            scale: canon.scale,
                        });
                        Placement::General(general.len() - 1)
                    })
                    .collect(),
            };
            user_row += canon.rows();
            placement.push(rows);
        }

        Layout {
            variables,
            parameters,
            nx,
            np,
            placement,
            general,
            user_rows: user_row,
            x_scale,
            x_offset,
            f_scale: model.f_scale,
        }
    }

    /// Number of general backend rows.
    pub fn ng(&self) -> usize {
        self.general.len()
    }

    /// Variable slot and element offset holding element `i` of the decision
    /// vector.
    pub fn variable_at(&self, i: usize) -> Option<(&Slot, usize)> {
        self.variables
            .iter()
            .find(|s| i >= s.start && i < s.start + s.symbol.size())
            .map(|s| (s, i - s.start))
    }

    /// Record and row holding user row `i`.
    pub fn record_at(&self, i: usize) -> Option<(usize, usize)> {
        let mut start = 0;
        for (r, rows) in self.placement.iter().enumerate() {
            if i < start + rows.len() {
                return Some((r, i - start));
            }
            start += rows.len();
        }
        None
    }

    /// Map between user-space and backend-space derivative functions.
    pub fn scale_map(&self) -> ScaleMap {
        ScaleMap {
            x_scale: DVector::from_column_slice(&self.x_scale),
            x_offset: DVector::from_column_slice(&self.x_offset),
            f_scale: self.f_scale,
            general: self.general.clone(),
            user_rows: self.user_rows,
        }
    }
}

fn internal_symbol(name: &str, n: usize) -> Arc<SymbolData> {
    Arc::new(SymbolData::new(
        SymbolKind::Free,
        None,
        Shape::vector(n),
        name,
        Location::caller(),
    ))
}

fn shaped(e: Expr, shape: Shape) -> Expr {
    if shape.is_column() {
        e
    } else {
        reshape(&e, shape)
    }
}

/// Per-record data the inverse maps need.
#[derive(Debug, Clone)]
struct RecordInfo {
    dual: Arc<SymbolData>,
    sign: f64,
    scale: f64,
    /// Backend-space bounds of each folded row.
    folded_bounds: Vec<(f64, f64)>,
}

/// A filled-in transcription.
#[derive(Debug, Clone)]
pub(crate) struct Transcription {
    pub layout: Layout,
    pub problem: NlpProblem,
    records: Vec<RecordInfo>,
}

impl Transcription {
    pub fn build(model: &Model<'_>, cache: FunctionCache) -> Result<Self> {
        let layout = Layout::new(model);
        if layout.nx == 0 {
            return Err(OptiError::InvalidProblem(
                "the problem has no decision variables".into(),
            ));
        }
        let (nx, ng) = (layout.nx, layout.ng());

        let mut p_value = Vec::with_capacity(layout.np);
        let mut parameters = Bindings::new();
        for slot in &layout.parameters {
            let value = model
                .registry
                .get(slot.symbol.id)
                .and_then(|e| e.finite_value())
                .ok_or_else(|| OptiError::UnsetParameter {
                    symbol: slot.symbol.describe(),
                })?;
            p_value.extend_from_slice(value);
            parameters.insert(slot.symbol.id, value.to_vec());
        }

        let x = internal_symbol("x", nx);
        let p = internal_symbol("p", layout.np);
        let lam_f = internal_symbol("lam_f", 1);
        let lam_g = internal_symbol("lam_g", ng);

        let mut map: HashMap<SymbolId, Expr> = HashMap::new();
        for slot in &layout.variables {
            let range = slot.start..slot.start + slot.symbol.size();
            let part = Expr::Symbol(x.clone()).slice(range.clone());
            let (s, o) = (&layout.x_scale[range.clone()], &layout.x_offset[range]);
            let user = if s.iter().all(|&v| v == 1.0) && o.iter().all(|&v| v == 0.0) {
                part
            } else {
                constant_vec(o.to_vec()) + constant_vec(s.to_vec()) * part
            };
            map.insert(slot.symbol.id, shaped(user, slot.symbol.shape));
        }
        for slot in &layout.parameters {
            let part = Expr::Symbol(p.clone()).slice(slot.start..slot.start + slot.symbol.size());
            map.insert(slot.symbol.id, shaped(part, slot.symbol.shape));
        }

        let fs = layout.f_scale;
        let f = match model.objective {
            Some(obj) if fs == 1.0 => obj.substitute(&map),
            Some(obj) => obj.substitute(&map) / fs,
            None => constant(0.0),
        };

        let mut lbx = vec![f64::NEG_INFINITY; nx];
        let mut ubx = vec![f64::INFINITY; nx];
        let mut lam_x0 = vec![0.0; nx];
        let mut lbg = Vec::with_capacity(ng);
        let mut ubg = Vec::with_capacity(ng);
        let mut lam_g0 = Vec::with_capacity(ng);
        let mut rows = Vec::new();
        let mut records = Vec::with_capacity(model.records.len());

        for (record, placement) in model.records.iter().zip(&layout.placement) {
            let canon = &record.canon;
            let lower = eval_f64(&canon.lower, &parameters)?;
            let upper = eval_f64(&canon.upper, &parameters)?;
            let initial = model
                .registry
                .get(record.dual.id)
                .map(|e| e.initial.clone())
                .unwrap_or_else(|| vec![0.0; canon.rows()]);
            let (sign, c) = (canon.sign(), canon.scale);
            let mut folded_bounds = vec![(f64::NEG_INFINITY, f64::INFINITY); canon.rows()];
            let mut general = false;

            for (row, place) in placement.iter().enumerate() {
                match *place {
                    Placement::Folded(k) => {
                        let (s, o) = (layout.x_scale[k], layout.x_offset[k]);
                        let (mut lo, mut hi) = ((lower[row] - o) / s, (upper[row] - o) / s);
                        if s < 0.0 {
                            std::mem::swap(&mut lo, &mut hi);
                        }
                        lbx[k] = lbx[k].max(lo);
                        ubx[k] = ubx[k].min(hi);
                        folded_bounds[row] = (lo, hi);
                        lam_x0[k] += sign * initial[row] * s / fs;
                    }
                    Placement::General(_) => {
                        let (mut lo, mut hi) = (lower[row] / c, upper[row] / c);
                        if c < 0.0 {
                            std::mem::swap(&mut lo, &mut hi);
                        }
                        lbg.push(lo);
                        ubg.push(hi);
                        lam_g0.push(sign * initial[row] * c / fs);
                        general = true;
                    }
                }
            }
            if general {
                let middle = canon.middle.substitute(&map);
                rows.push(if c == 1.0 { middle } else { middle / c });
            }
            records.push(RecordInfo {
                dual: record.dual.clone(),
                sign,
                scale: c,
                folded_bounds,
            });
        }

        let g = if rows.is_empty() {
            zeros(Shape::vector(0))
        } else {
            vertcat(&rows)
        };
        let mut lagrangian = Expr::Symbol(lam_f.clone()).at(0) * &f;
        if ng > 0 {
            lagrangian = lagrangian + dot(&Expr::Symbol(lam_g.clone()), &g);
        }

        let mut x0 = Vec::with_capacity(nx);
        let mut discrete = Vec::with_capacity(nx);
        for slot in &layout.variables {
            if let Some(entry) = model.registry.get(slot.symbol.id) {
                for (i, &v) in entry.initial.iter().enumerate() {
                    let k = slot.start + i;
                    x0.push((v - layout.x_offset[k]) / layout.x_scale[k]);
                }
                discrete.extend(entry.domain.iter().map(|&d| d == Domain::Integer));
            }
        }

        debug!(
            nx,
            ng,
            np = layout.np,
            folded = layout.user_rows - ng,
            class = %model.class,
            "transcribed problem"
        );

        let problem = NlpProblem {
            x,
            p,
            lam_f,
            lam_g,
            f,
            g,
            lagrangian,
            p_value: DVector::from_vec(p_value),
            x0: DVector::from_vec(x0),
            lbx: DVector::from_vec(lbx),
            ubx: DVector::from_vec(ubx),
            lbg: DVector::from_vec(lbg),
            ubg: DVector::from_vec(ubg),
            lam_g0: DVector::from_vec(lam_g0),
            lam_x0: DVector::from_vec(lam_x0),
            discrete,
            x_scale: DVector::from_column_slice(&layout.x_scale),
            x_offset: DVector::from_column_slice(&layout.x_offset),
            class: model.class,
            cache,
        };
        Ok(Transcription {
            layout,
            problem,
            records,
        })
    }

    /// User-space values of the active variables and of every registered
    /// dual, for a backend iterate.
    pub fn user_bindings(
        &self,
        x: &DVector<f64>,
        lam_g: &DVector<f64>,
        lam_x: &DVector<f64>,
    ) -> Bindings {
        let layout = &self.layout;
        let mut bindings = Bindings::new();
        for slot in &layout.variables {
            let values = (slot.start..slot.start + slot.symbol.size())
                .map(|k| layout.x_offset[k] + layout.x_scale[k] * x[k])
                .collect();
            bindings.insert(slot.symbol.id, values);
        }

        let fs = layout.f_scale;
        let (lbx, ubx) = (&self.problem.lbx, &self.problem.ubx);
        let mut claimed = vec![false; layout.nx];
        for (info, placement) in self.records.iter().zip(&layout.placement) {
            let values = placement
                .iter()
                .enumerate()
                .map(|(row, place)| match *place {
                    Placement::General(j) => info.sign * fs * lam_g[j] / info.scale,
                    Placement::Folded(k) => {
                        let (lo, hi) = info.folded_bounds[row];
                        let active = (lam_x[k] > 0.0 && hi == ubx[k])
                            || (lam_x[k] < 0.0 && lo == lbx[k]);
                        if active && !claimed[k] {
                            claimed[k] = true;
                            info.sign * fs * lam_x[k] / layout.x_scale[k]
                        } else {
                            0.0
                        }
                    }
                })
                .collect();
            bindings.insert(info.dual.id, values);
        }
        bindings
    }
}

/// Converts user-space derivative functions into backend-space ones.
#[derive(Debug, Clone)]
pub(crate) struct ScaleMap {
    x_scale: DVector<f64>,
    x_offset: DVector<f64>,
    f_scale: f64,
    general: Vec<GeneralRow>,
    user_rows: usize,
}

impl ScaleMap {
    fn user_args(&self, args: &NlpArgs) -> NlpArgs {
        let mut lam_g = DVector::zeros(self.user_rows);
        for (j, row) in self.general.iter().enumerate() {
            if let Some(&l) = args.lam_g.get(j) {
                lam_g[row.user_row] += row.sign * l / row.scale;
            }
        }
        NlpArgs {
            x: &self.x_offset + self.x_scale.component_mul(&args.x),
            p: args.p.clone(),
            lam_f: args.lam_f / self.f_scale,
            lam_g,
        }
    }

    fn rows(&self, g: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let mut out = DMatrix::zeros(self.general.len(), g.ncols());
        for (j, row) in self.general.iter().enumerate() {
            if row.user_row >= g.nrows() {
                return Err(OptiError::Inconsistent(format!(
                    "expected {} constraint rows, got {}",
                    self.user_rows,
                    g.nrows()
                )));
            }
            out.set_row(j, &(g.row(row.user_row) * (row.sign / row.scale)));
        }
        Ok(out)
    }

    fn columns(&self, m: DMatrix<f64>) -> DMatrix<f64> {
        let mut m = m;
        for (k, &s) in self.x_scale.iter().enumerate().take(m.ncols()) {
            m.column_mut(k).scale_mut(s);
        }
        m
    }

    fn output(outputs: &[DMatrix<f64>], index: usize, name: &str) -> Result<DMatrix<f64>> {
        outputs.get(index).cloned().ok_or_else(|| {
            OptiError::Inconsistent(format!(
                "function '{name}' returned {} outputs, expected at least {}",
                outputs.len(),
                index + 1
            ))
        })
    }

    /// Wrap `function` so it reads and writes backend-space quantities.
    pub fn wrap(self, function: NlpFunction) -> Result<NlpFunction> {
        let name = function.name().to_string();
        if !crate::solver::nlp::FUNCTION_NAMES.contains(&name.as_str()) {
            return Err(OptiError::Capability(format!(
                "cannot scale unknown function '{name}'"
            )));
        }
        let label = name.clone();
        Ok(NlpFunction::new(name, move |args| {
            let out = function.call(&self.user_args(args))?;
            let fs = self.f_scale;
            match label.as_str() {
                "nlp_f" => Ok(vec![Self::output(&out, 0, &label)? / fs]),
                "nlp_g" => Ok(vec![self.rows(&Self::output(&out, 0, &label)?)?]),
                "nlp_grad_f" => {
                    let grad = Self::output(&out, 1, &label)?;
                    let grad = self.columns(grad.transpose()).transpose() / fs;
                    Ok(vec![Self::output(&out, 0, &label)? / fs, grad])
                }
                "nlp_jac_g" => {
                    let g = self.rows(&Self::output(&out, 0, &label)?)?;
                    let jac = self.columns(self.rows(&Self::output(&out, 1, &label)?)?);
                    Ok(vec![g, jac])
                }
                _ => {
                    let h = self.columns(Self::output(&out, 0, &label)?);
                    Ok(vec![self.columns(h.transpose()).transpose()])
                }
            }
        }))
    }
}
