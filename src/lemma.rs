//! Backward-lemma index keyed by the head symbol of a goal.

use crate::tt::{Env, Expr, Name};
use std::collections::HashMap;
use thiserror::Error;

/// The identifier at the head of an application spine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeadSymbol {
    Const(Name),
    Value(Name),
}

/// The head symbol of `e`, if it has one. Call on a term already reduced to
/// weak head normal form; binders, variables and equations are unindexed.
pub fn head_symbol(e: &Expr) -> Option<HeadSymbol> {
    match e.head() {
        Expr::Const(inner) => Some(HeadSymbol::Const(inner.name)),
        Expr::Value(inner) => Some(HeadSymbol::Value(inner.value.name())),
        _ => None,
    }
}

/// The target of a Pi-telescope.
pub fn telescope_target(e: &Expr) -> &Expr {
    let mut t = e;
    while let Expr::Pi(inner) = t {
        t = &inner.body;
    }
    t
}

#[derive(Error, Debug, Clone)]
pub enum IndexError {
    #[error("unknown lemma: {name}")]
    UnknownLemma { name: Name },
    #[error("lemma target has no head symbol: {name}")]
    Headless { name: Name },
    #[error("not a lemma reference: {expr}")]
    NotAReference { expr: Expr },
}

/// A registered backward lemma: a named axiom or definition whose statement
/// closes goals headed by the statement target's head symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackwardLemma {
    pub name: Name,
}

impl BackwardLemma {
    /// The lemma's statement against the given environment.
    pub fn statement<'e>(&self, env: &'e Env) -> Option<&'e Expr> {
        env.get(self.name).map(|obj| obj.ty())
    }
}

impl std::fmt::Display for BackwardLemma {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Candidate lemmas grouped by head symbol, in insertion-preserving
/// priority order. Constructed per invocation from the environment's
/// registry; extras are appended behind the seeded entries.
#[derive(Debug, Default)]
pub struct BackwardLemmaIndex {
    entries: HashMap<HeadSymbol, Vec<BackwardLemma>>,
}

impl BackwardLemmaIndex {
    pub fn new(env: &Env) -> BackwardLemmaIndex {
        let mut index = BackwardLemmaIndex::default();
        for &name in env.backward_lemmas() {
            // The registry only holds declared names; a headless statement
            // was never a backward lemma to begin with.
            let _ = index.insert(env, name);
        }
        index
    }

    pub fn insert(&mut self, env: &Env, name: Name) -> Result<(), IndexError> {
        let Some(object) = env.get(name) else {
            return Err(IndexError::UnknownLemma { name });
        };
        let Some(head) = head_symbol(telescope_target(object.ty())) else {
            return Err(IndexError::Headless { name });
        };
        self.entries
            .entry(head)
            .or_default()
            .push(BackwardLemma { name });
        Ok(())
    }

    /// Insert a lemma given as an expression; only constant references are
    /// accepted.
    pub fn insert_expr(&mut self, env: &Env, e: &Expr) -> Result<(), IndexError> {
        match e {
            Expr::Const(inner) => self.insert(env, inner.name),
            _ => Err(IndexError::NotAReference { expr: e.clone() }),
        }
    }

    /// Candidates for a goal with the given head, highest priority first.
    pub fn find(&self, head: HeadSymbol) -> Vec<BackwardLemma> {
        self.entries.get(&head).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tt::{Level, mk_app, mk_const, mk_pi, mk_sort, mk_var};

    fn name(s: &str) -> Name {
        Name::intern(s).unwrap()
    }

    fn prop() -> Expr {
        mk_sort(Level::base())
    }

    fn simple_env() -> Env {
        let mut env = Env::new();
        // le : Π x : Prop, Π y : Prop, Prop
        env.add_axiom(name("le"), mk_pi(name("x"), prop(), mk_pi(name("y"), prop(), prop())))
            .unwrap();
        // le_refl : Π x : Prop, le x x
        env.add_axiom(
            name("le_refl"),
            mk_pi(
                name("x"),
                prop(),
                mk_app(mk_const(name("le")), vec![mk_var(0), mk_var(0)]),
            ),
        )
        .unwrap();
        // le_step : Π x : Prop, Π h : le x x, le x x
        env.add_axiom(
            name("le_step"),
            mk_pi(
                name("x"),
                prop(),
                mk_pi(
                    name("h"),
                    mk_app(mk_const(name("le")), vec![mk_var(0), mk_var(0)]),
                    mk_app(mk_const(name("le")), vec![mk_var(1), mk_var(1)]),
                ),
            ),
        )
        .unwrap();
        env
    }

    #[test]
    fn head_symbol_walks_the_spine() {
        let e = mk_app(mk_const(name("le")), vec![mk_var(0), mk_var(1)]);
        assert_eq!(head_symbol(&e), Some(HeadSymbol::Const(name("le"))));
        assert_eq!(head_symbol(&mk_var(0)), None);
        assert_eq!(head_symbol(&prop()), None);
    }

    #[test]
    fn seeded_index_preserves_registration_order() {
        let mut env = simple_env();
        env.register_backward_lemma(name("le_refl")).unwrap();
        env.register_backward_lemma(name("le_step")).unwrap();
        let index = BackwardLemmaIndex::new(&env);
        let found = index.find(HeadSymbol::Const(name("le")));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, name("le_refl"));
        assert_eq!(found[1].name, name("le_step"));
    }

    #[test]
    fn insert_rejects_unknown_and_headless() {
        let env = simple_env();
        let mut index = BackwardLemmaIndex::default();
        assert!(matches!(
            index.insert(&env, name("nonsense")),
            Err(IndexError::UnknownLemma { .. })
        ));
        let mut env = env;
        // A statement whose target is a bare Sort has no head symbol.
        env.add_axiom(name("headless"), mk_pi(name("x"), prop(), prop()))
            .unwrap();
        assert!(matches!(
            index.insert(&env, name("headless")),
            Err(IndexError::Headless { .. })
        ));
    }

    #[test]
    fn extras_append_behind_seeded_entries() {
        let mut env = simple_env();
        env.register_backward_lemma(name("le_refl")).unwrap();
        let mut index = BackwardLemmaIndex::new(&env);
        index
            .insert_expr(&env, &mk_const(name("le_step")))
            .unwrap();
        let found = index.find(HeadSymbol::Const(name("le")));
        assert_eq!(found[0].name, name("le_refl"));
        assert_eq!(found[1].name, name("le_step"));
        assert!(
            index
                .insert_expr(&env, &mk_var(0))
                .is_err()
        );
    }

    #[test]
    fn find_on_unindexed_head_is_empty() {
        let env = simple_env();
        let index = BackwardLemmaIndex::new(&env);
        assert!(index.find(HeadSymbol::Const(name("le"))).is_empty());
    }
}
