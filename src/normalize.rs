//! Call-by-need normalization over de Bruijn terms with explicit closures.

use crate::tt::{
    Context, Env, Expr, Object, cache_ptr, is_shared, mk_app, mk_bool_type, mk_bool_value, mk_eq,
    mk_lambda, mk_pi, mk_var,
};
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("normalizer maximum recursion depth exceeded")]
    DepthExceeded { env: Box<Env> },
    #[error("normalizer interrupted")]
    Interrupted,
}

/// Stack value: residual expressions, closures, and bound variables.
///
/// A bound variable is pinned at its binder depth (a level counted from the
/// outside), not at a de Bruijn index; [Normalizer::reify] converts back.
#[derive(Debug, Clone)]
pub enum SValue {
    Expr(Expr),
    BVar(usize),
    /// A suspended lambda together with the value stack in force at the
    /// point of suspension.
    Closure(Expr, Stack),
}

/// Normalization stack: a persistent list of [SValue]s grown at the head
/// when crossing binders. Index 0 is the innermost binder.
#[derive(Debug, Clone, Default)]
pub struct Stack(Option<Arc<StackNode>>);

#[derive(Debug)]
struct StackNode {
    value: SValue,
    tail: Stack,
}

impl Stack {
    pub fn extend(&self, value: SValue) -> Stack {
        Stack(Some(Arc::new(StackNode {
            value,
            tail: self.clone(),
        })))
    }
}

/// Scoped map from node identity to the [SValue] it normalized to.
///
/// Entries are only meaningful under the value stack and binder depth in
/// force at insertion, so every binder descent runs under a fresh scope and
/// context switches clear the whole map. The keyed expression is retained to
/// keep its allocation (and thus the key) alive.
#[derive(Debug, Default)]
struct Cache {
    map: HashMap<usize, (Expr, SValue)>,
    trail: Vec<(usize, Option<(Expr, SValue)>)>,
    scopes: Vec<usize>,
}

impl Cache {
    fn find(&self, e: &Expr) -> Option<&SValue> {
        self.map.get(&cache_ptr(e)).map(|(_, v)| v)
    }

    fn insert(&mut self, e: &Expr, v: SValue) {
        let key = cache_ptr(e);
        let old = self.map.insert(key, (e.clone(), v));
        if !self.scopes.is_empty() {
            self.trail.push((key, old));
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(self.trail.len());
    }

    fn pop_scope(&mut self) {
        let mark = self.scopes.pop().expect("cache scope underflow");
        while self.trail.len() > mark {
            let (key, old) = self.trail.pop().unwrap();
            match old {
                Some(entry) => {
                    self.map.insert(key, entry);
                }
                None => {
                    self.map.remove(&key);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.map.clear();
        self.trail.clear();
        self.scopes.clear();
    }
}

/// Expression normalizer.
///
/// Owns one read-only environment reference, one mutable context slot and
/// one mutable cache; it must not be entered re-entrantly. Nested
/// normalization of context-entry bodies goes through the internal
/// save-context discipline, which stashes the context and cache and
/// restores both afterwards.
pub struct Normalizer<'e> {
    env: &'e Env,
    ctx: Context,
    cache: Cache,
    max_depth: usize,
    depth: usize,
    interrupted: Arc<AtomicBool>,
}

impl<'e> Normalizer<'e> {
    pub fn new(env: &'e Env) -> Self {
        Normalizer::with_max_depth(env, usize::MAX)
    }

    pub fn with_max_depth(env: &'e Env, max_depth: usize) -> Self {
        Normalizer {
            env,
            ctx: Context::default(),
            cache: Cache::default(),
            max_depth,
            depth: 0,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Normalize `e` in the given context.
    pub fn normalize_expr(&mut self, e: &Expr, ctx: &Context) -> Result<Expr, NormalizeError> {
        self.set_ctx(ctx);
        let k = self.ctx.size();
        let r = match self.normalize(e, &Stack::default(), k) {
            Ok(v) => self.reify(&v, k),
            Err(err) => Err(err),
        };
        if r.is_err() {
            self.cache.clear();
        }
        r
    }

    /// Decide convertibility of `given` against `expected`, up to reduction,
    /// universe cumulativity and the Sort/Bool rule.
    pub fn is_convertible(
        &mut self,
        expected: &Expr,
        given: &Expr,
        ctx: &Context,
    ) -> Result<bool, NormalizeError> {
        if self.is_convertible_core(expected, given) {
            return Ok(true);
        }
        let e_n = self.normalize_expr(expected, ctx)?;
        let g_n = self.normalize_expr(given, ctx)?;
        Ok(self.is_convertible_core(&e_n, &g_n))
    }

    pub fn clear(&mut self) {
        self.ctx = Context::default();
        self.cache.clear();
    }

    pub fn set_interrupt(&self, flag: bool) {
        self.interrupted.store(flag, Ordering::Relaxed);
    }

    /// Shared handle for cooperative cancellation from another thread.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    fn set_ctx(&mut self, ctx: &Context) {
        if !ctx.ptr_eq(&self.ctx) {
            self.ctx = ctx.clone();
            self.cache.clear();
        }
    }

    /// Normalize `a` in a context composed of stack `s` and `k` binders.
    fn normalize(&mut self, a: &Expr, s: &Stack, k: usize) -> Result<SValue, NormalizeError> {
        self.depth += 1;
        let r = self.normalize_core(a, s, k);
        self.depth -= 1;
        r
    }

    fn normalize_core(&mut self, a: &Expr, s: &Stack, k: usize) -> Result<SValue, NormalizeError> {
        if self.interrupted.load(Ordering::Relaxed) {
            return Err(NormalizeError::Interrupted);
        }
        if self.depth > self.max_depth {
            return Err(NormalizeError::DepthExceeded {
                env: Box::new(self.env.clone()),
            });
        }
        let shared = is_shared(a);
        if shared {
            if let Some(v) = self.cache.find(a) {
                return Ok(v.clone());
            }
        }

        let r = match a {
            Expr::Var(inner) => self.lookup(s, inner.index)?,
            Expr::Const(inner) => {
                let unfolded = match self.env.get(inner.name) {
                    Some(Object::Def(def)) if !def.opaque => Some(def.value.clone()),
                    _ => None,
                };
                match unfolded {
                    Some(value) => self.normalize(&value, &Stack::default(), 0)?,
                    None => SValue::Expr(a.clone()),
                }
            }
            Expr::Sort(_) | Expr::Value(_) => SValue::Expr(a.clone()),
            Expr::App(app) => {
                let mut f = self.normalize(&app.fun, s, k)?;
                let n = app.args.len();
                let mut i = 0;
                loop {
                    if let SValue::Closure(lam, fs) = &f {
                        // beta reduction
                        let (lam, fs) = (lam.clone(), fs.clone());
                        let Expr::Lambda(binder) = &lam else {
                            unreachable!("closure head must be a lambda");
                        };
                        self.cache.push_scope();
                        let r = match self.normalize(&app.args[i], s, k) {
                            Ok(arg) => self.normalize(&binder.body, &fs.extend(arg), k),
                            Err(err) => Err(err),
                        };
                        self.cache.pop_scope();
                        f = r?;
                        if i == n - 1 {
                            break f;
                        }
                        i += 1;
                    } else {
                        let new_f = self.reify(&f, k)?;
                        let mut new_args = Vec::with_capacity(n - i);
                        for arg in &app.args[i..] {
                            let v = self.normalize(arg, s, k)?;
                            new_args.push(self.reify(&v, k)?);
                        }
                        if let Expr::Value(head) = &new_f {
                            if let Some(m) = head.value.normalize(&new_args) {
                                debug_assert!(
                                    m.is_closed_below(k),
                                    "builtin reduction returned an open term"
                                );
                                break self.normalize(&m, s, k)?;
                            }
                        }
                        break SValue::Expr(mk_app(new_f, new_args));
                    }
                }
            }
            Expr::Eq(inner) => {
                let lv = self.normalize(&inner.lhs, s, k)?;
                let new_lhs = self.reify(&lv, k)?;
                let rv = self.normalize(&inner.rhs, s, k)?;
                let new_rhs = self.reify(&rv, k)?;
                if new_lhs == new_rhs {
                    SValue::Expr(mk_bool_value(true))
                } else if matches!(new_lhs, Expr::Value(_)) && matches!(new_rhs, Expr::Value(_)) {
                    SValue::Expr(mk_bool_value(false))
                } else {
                    SValue::Expr(mk_eq(new_lhs, new_rhs))
                }
            }
            Expr::Lambda(_) => SValue::Closure(a.clone(), s.clone()),
            Expr::Pi(inner) => {
                let dv = self.normalize(&inner.domain, s, k)?;
                let new_t = self.reify(&dv, k)?;
                self.cache.push_scope();
                let r = match self.normalize(&inner.body, &s.extend(SValue::BVar(k)), k + 1) {
                    Ok(v) => self.reify(&v, k + 1),
                    Err(err) => Err(err),
                };
                self.cache.pop_scope();
                SValue::Expr(mk_pi(inner.name, new_t, r?))
            }
            Expr::Let(inner) => {
                let v = self.normalize(&inner.value, s, k)?;
                self.cache.push_scope();
                let r = self.normalize(&inner.body, &s.extend(v), k + 1);
                self.cache.pop_scope();
                r?
            }
        };

        if shared {
            self.cache.insert(a, r.clone());
        }
        Ok(r)
    }

    /// Resolve a variable: first in the value stack, then in the outer
    /// context. A context entry with a body is normalized in its own scope
    /// under a saved normalizer state; a body-less entry is a pinned bound
    /// variable.
    fn lookup(&mut self, s: &Stack, i: usize) -> Result<SValue, NormalizeError> {
        let mut j = i;
        let mut it = s;
        while let Some(node) = it.0.as_deref() {
            if j == 0 {
                return Ok(node.value.clone());
            }
            j -= 1;
            it = &node.tail;
        }
        let (body, prefix, prefix_size) = {
            let (entry, prefix) = self
                .ctx
                .lookup_ext(j)
                .expect("de Bruijn index out of scope");
            (entry.body.clone(), prefix.clone(), prefix.size())
        };
        match body {
            Some(body) => {
                // Values of one context are not portable to another: stash
                // the context and cache, normalize in the entry's own scope,
                // then restore both.
                let saved_ctx = mem::replace(&mut self.ctx, prefix);
                let saved_cache = mem::take(&mut self.cache);
                let k = self.ctx.size();
                let r = match self.normalize(&body, &Stack::default(), k) {
                    Ok(v) => self.reify(&v, k),
                    Err(err) => Err(err),
                };
                self.ctx = saved_ctx;
                self.cache = saved_cache;
                Ok(SValue::Expr(r?))
            }
            None => Ok(SValue::BVar(prefix_size)),
        }
    }

    /// Convert a stack value back into an expression under `k` binders.
    fn reify(&mut self, v: &SValue, k: usize) -> Result<Expr, NormalizeError> {
        match v {
            SValue::Expr(e) => Ok(e.clone()),
            SValue::BVar(level) => Ok(mk_var(k - level - 1)),
            SValue::Closure(lam, s) => self.reify_closure(lam, s, k),
        }
    }

    fn reify_closure(&mut self, lam: &Expr, s: &Stack, k: usize) -> Result<Expr, NormalizeError> {
        let Expr::Lambda(binder) = lam else {
            unreachable!("closure head must be a lambda");
        };
        let dv = self.normalize(&binder.domain, s, k)?;
        let new_t = self.reify(&dv, k)?;
        self.cache.push_scope();
        let r = match self.normalize(&binder.body, &s.extend(SValue::BVar(k)), k + 1) {
            Ok(v) => self.reify(&v, k + 1),
            Err(err) => Err(err),
        };
        self.cache.pop_scope();
        Ok(mk_lambda(binder.name, new_t, r?))
    }

    /// Structural convertibility: pointer-fast equality, universe
    /// cumulativity in the expected position, the Sort/Bool rule, and Pi
    /// congruence when the domains are syntactically equal. No
    /// sub-convertibility in domains, and no eta: eta-reduction together
    /// with cumulativity is unsound under a set-theoretic interpretation.
    fn is_convertible_core(&self, expected: &Expr, given: &Expr) -> bool {
        if expected == given {
            return true;
        }
        let mut e = expected;
        let mut g = given;
        loop {
            if let (Expr::Sort(es), Expr::Sort(gs)) = (e, g) {
                if es.level.is_ge(gs.level) {
                    return true;
                }
            }
            if matches!(e, Expr::Sort(_)) && *g == mk_bool_type() {
                return true;
            }
            match (e, g) {
                (Expr::Pi(ei), Expr::Pi(gi)) if ei.domain == gi.domain => {
                    e = &ei.body;
                    g = &gi.body;
                }
                _ => return false,
            }
        }
    }
}

/// Normalize `e` with a throwaway normalizer.
pub fn normalize(env: &Env, ctx: &Context, e: &Expr) -> Result<Expr, NormalizeError> {
    Normalizer::new(env).normalize_expr(e, ctx)
}

/// Convertibility check with a throwaway normalizer.
pub fn is_convertible(
    env: &Env,
    ctx: &Context,
    expected: &Expr,
    given: &Expr,
) -> Result<bool, NormalizeError> {
    Normalizer::new(env).is_convertible(expected, given, ctx)
}
