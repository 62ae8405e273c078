//! Tactic states, transparency-gated head reduction, and first-order apply.

use crate::lemma::{BackwardLemma, HeadSymbol, head_symbol};
use crate::tt::{Env, Expr, Name, Object, ObjectDef, mk_app, mk_const};
use std::collections::HashMap;
use std::fmt::Display;
use thiserror::Error;

/// Declaration of a goal metavariable: the proposition to prove.
#[derive(Debug, Clone)]
pub struct MetavarDecl {
    pub name: Name,
    pub target: Expr,
}

/// Metavariable declarations and assignments. Goal metavariables appear in
/// terms as constants carrying their fresh name, so the expression language
/// needs no dedicated metavariable case.
#[derive(Debug, Clone, Default)]
pub struct MetavarContext {
    decls: HashMap<Name, MetavarDecl>,
    assignments: HashMap<Name, Expr>,
}

impl MetavarContext {
    pub fn declare(&mut self, target: Expr) -> Name {
        let name = Name::fresh_with_name("?m");
        self.decls.insert(name, MetavarDecl { name, target });
        name
    }

    pub fn decl(&self, name: Name) -> Option<&MetavarDecl> {
        self.decls.get(&name)
    }

    pub fn assign(&mut self, name: Name, value: Expr) {
        self.assignments.insert(name, value);
    }

    pub fn assignment(&self, name: Name) -> Option<&Expr> {
        self.assignments.get(&name)
    }

    pub fn is_assigned(&self, name: Name) -> bool {
        self.assignments.contains_key(&name)
    }
}

/// A value-like snapshot of the proof search: the metavariable context and
/// the ordered list of open goals.
#[derive(Debug, Clone)]
pub struct TacticState {
    pub mctx: MetavarContext,
    pub goals: Vec<Name>,
}

impl TacticState {
    /// A fresh state with a single goal for `target`.
    pub fn main(target: Expr) -> TacticState {
        let mut mctx = MetavarContext::default();
        let goal = mctx.declare(target);
        TacticState {
            mctx,
            goals: vec![goal],
        }
    }

    pub fn main_goal_decl(&self) -> Option<&MetavarDecl> {
        self.goals.first().and_then(|&g| self.mctx.decl(g))
    }

    /// The same metavariable context with a replaced goal list.
    pub fn set_goals(&self, goals: Vec<Name>) -> TacticState {
        TacticState {
            mctx: self.mctx.clone(),
            goals,
        }
    }
}

impl Display for TacticState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.goals.is_empty() {
            return write!(f, "no goals");
        }
        for (i, &goal) in self.goals.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match self.mctx.decl(goal) {
                Some(decl) => write!(f, "{} : {}", goal, decl.target)?,
                None => write!(f, "{} : ?", goal)?,
            }
        }
        Ok(())
    }
}

/// Negative answer from a leaf tactic. Not an error: it drives backtracking.
#[derive(Error, Debug, Clone)]
#[error("tactic failed: {message}")]
pub struct TacticFailure {
    pub message: String,
}

impl TacticFailure {
    pub fn new(message: impl Into<String>) -> TacticFailure {
        TacticFailure {
            message: message.into(),
        }
    }
}

/// A leaf tactic is an opaque state transformer: it receives a state whose
/// goal list is the singleton of the current goal and either returns a new
/// state or fails. Side effects must be contained in the returned state.
pub type LeafTactic<'a> = dyn FnMut(TacticState) -> Result<TacticState, TacticFailure> + 'a;

/// Which definitions head reduction may unfold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transparency {
    All,
    #[default]
    Semireducible,
    Instances,
    Reducible,
    None,
}

impl Transparency {
    fn may_unfold(self, def: &ObjectDef) -> bool {
        use crate::tt::Reducibility;
        if def.opaque {
            return false;
        }
        match self {
            Transparency::All => true,
            Transparency::Semireducible | Transparency::Instances => matches!(
                def.reducibility,
                Reducibility::Reducible | Reducibility::Semireducible
            ),
            Transparency::Reducible => def.reducibility == Reducibility::Reducible,
            Transparency::None => false,
        }
    }
}

/// Reduction and matching services for the proof search, under a fixed
/// transparency policy.
pub struct TypeContext<'e> {
    env: &'e Env,
    transparency: Transparency,
}

impl<'e> TypeContext<'e> {
    pub fn new(env: &'e Env, transparency: Transparency) -> TypeContext<'e> {
        TypeContext { env, transparency }
    }

    pub fn env(&self) -> &'e Env {
        self.env
    }

    /// Weak head normal form: head beta, transparency-gated head delta,
    /// let elimination and builtin reduction at the head. Sub-terms are left
    /// untouched.
    pub fn whnf(&self, e: &Expr) -> Expr {
        let mut e = e.clone();
        loop {
            let next = self.head_step(&e);
            match next {
                Some(reduced) => e = reduced,
                None => return e,
            }
        }
    }

    /// A single head reduction step, or `None` when the head is stuck.
    fn head_step(&self, e: &Expr) -> Option<Expr> {
        match e {
            Expr::Let(inner) => Some(inner.body.instantiate(&[inner.value.clone()])),
            Expr::Const(inner) => self.unfold_def(inner.name),
            Expr::App(app) => match &app.fun {
                Expr::Lambda(binder) => {
                    let body = binder.body.instantiate(&[app.args[0].clone()]);
                    Some(mk_app(body, app.args[1..].to_vec()))
                }
                Expr::Let(inner) => Some(mk_app(
                    inner.body.instantiate(&[inner.value.clone()]),
                    app.args.clone(),
                )),
                Expr::Const(inner) => self
                    .unfold_def(inner.name)
                    .map(|value| mk_app(value, app.args.clone())),
                Expr::Value(head) => head.value.normalize(&app.args),
                _ => None,
            },
            _ => None,
        }
    }

    fn unfold_def(&self, name: Name) -> Option<Expr> {
        match self.env.get(name) {
            Some(Object::Def(def)) if self.transparency.may_unfold(def) => {
                Some(def.value.clone())
            }
            _ => None,
        }
    }

    /// First-order matching-by-apply.
    ///
    /// The lemma's statement is split into a Pi-telescope and a conclusion;
    /// the conclusion is matched against the weak head normal form of the
    /// main goal's target, binding telescope variables to sub-terms of the
    /// target. Telescope entries left unbound become fresh metavariable
    /// subgoals, the goal metavariable is assigned the lemma head applied to
    /// the resolved arguments, and the subgoals replace the main goal.
    ///
    /// Returns `None` when the lemma does not apply; this is a candidate
    /// miss, never an error.
    pub fn apply(
        &self,
        lemma: &BackwardLemma,
        state: &TacticState,
        use_instances: bool,
    ) -> Option<TacticState> {
        let goal = *state.goals.first()?;
        let decl = state.mctx.decl(goal)?;
        let statement = lemma.statement(self.env)?;

        let mut premises = Vec::new();
        let mut concl = statement;
        while let Expr::Pi(inner) = concl {
            premises.push(&inner.domain);
            concl = &inner.body;
        }
        let n = premises.len();

        let target = self.whnf(&decl.target);
        let mut bindings: Vec<Option<Expr>> = vec![None; n];
        if !match_first_order(concl, &target, n, &mut bindings) {
            return None;
        }

        let mut mctx = state.mctx.clone();
        let mut args: Vec<Expr> = Vec::with_capacity(n);
        let mut new_goals = Vec::new();
        for (t, premise) in premises.iter().enumerate() {
            // The conclusion-relative index of telescope entry `t`.
            let j = n - 1 - t;
            if let Some(bound) = &bindings[j] {
                args.push(bound.clone());
                continue;
            }
            // Unbound entry: its premise, instantiated with the arguments
            // resolved so far, becomes a fresh subgoal.
            let inst: Vec<Expr> = args.iter().rev().cloned().collect();
            let ty = premise.instantiate(&inst);
            if use_instances {
                match self.resolve_instance(&ty) {
                    InstanceResult::Resolved(witness) => {
                        args.push(witness);
                        continue;
                    }
                    InstanceResult::Failed => return None,
                    InstanceResult::NotAnInstance => {}
                }
            }
            let m = mctx.declare(ty);
            args.push(mk_const(m));
            new_goals.push(m);
        }

        mctx.assign(goal, mk_app(mk_const(lemma.name), args));
        let mut goals = new_goals;
        goals.extend_from_slice(&state.goals[1..]);
        Some(TacticState { mctx, goals })
    }

    fn resolve_instance(&self, ty: &Expr) -> InstanceResult {
        let target = self.whnf(ty);
        let Some(HeadSymbol::Const(class_head)) = head_symbol(&target) else {
            return InstanceResult::NotAnInstance;
        };
        let candidates = self.env.instances_for(class_head);
        if candidates.is_empty() {
            return InstanceResult::NotAnInstance;
        }
        for &inst in candidates {
            let Some(object) = self.env.get(inst) else {
                continue;
            };
            if self.whnf(object.ty()) == target {
                return InstanceResult::Resolved(mk_const(inst));
            }
        }
        InstanceResult::Failed
    }
}

enum InstanceResult {
    Resolved(Expr),
    Failed,
    NotAnInstance,
}

/// Match `pattern` (with `n` telescope variables) against the closed
/// `target`, growing `bindings`. A variable bound twice must bind the same
/// term; there is no descent under binders on the pattern side.
fn match_first_order(
    pattern: &Expr,
    target: &Expr,
    n: usize,
    bindings: &mut Vec<Option<Expr>>,
) -> bool {
    match pattern {
        Expr::Var(v) if v.index < n => match &bindings[v.index] {
            Some(bound) => bound == target,
            None => {
                bindings[v.index] = Some(target.clone());
                true
            }
        },
        Expr::App(pa) => {
            let Expr::App(ta) = target else {
                return false;
            };
            if pa.args.len() != ta.args.len() {
                return false;
            }
            if !match_first_order(&pa.fun, &ta.fun, n, bindings) {
                return false;
            }
            for (p, t) in pa.args.iter().zip(&ta.args) {
                if !match_first_order(p, t, n, bindings) {
                    return false;
                }
            }
            true
        }
        Expr::Eq(pe) => {
            let Expr::Eq(te) = target else {
                return false;
            };
            match_first_order(&pe.lhs, &te.lhs, n, bindings)
                && match_first_order(&pe.rhs, &te.rhs, n, bindings)
        }
        _ => pattern == target,
    }
}
