//! Terms over de Bruijn indices, environments, and binder contexts.

use regex::Regex;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Name(usize);

static NAME_COUNTER: AtomicUsize = AtomicUsize::new(0);
static NAME_TABLE: LazyLock<Mutex<HashMap<String, Name>>> = LazyLock::new(Default::default);
static NAME_REV_TABLE: LazyLock<Mutex<HashMap<Name, String>>> = LazyLock::new(Default::default);

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(nickname) = self.nickname() else {
            return write!(f, "{}", self.0);
        };
        if Name::intern(&nickname).ok() == Some(*self) {
            write!(f, "{}", nickname)
        } else {
            write!(f, "{}{}", nickname, self.0)
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("invalid name")]
pub struct InvalidNameError;

impl TryFrom<&str> for Name {
    type Error = InvalidNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Name::intern(value)
    }
}

impl Name {
    pub fn fresh() -> Self {
        let id = NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
        Name(id)
    }

    pub fn fresh_with_name(name: &str) -> Self {
        let value = name.to_owned();
        let new_name = Name::fresh();
        NAME_REV_TABLE.lock().unwrap().insert(new_name, value);
        new_name
    }

    pub fn intern(value: &str) -> Result<Name, InvalidNameError> {
        static RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^[\p{Cased_Letter}_][\p{Cased_Letter}\p{Number}_]*(\.[\p{Cased_Letter}_][\p{Cased_Letter}\p{Number}_]*)*$").unwrap()
        });
        if !RE.is_match(value) {
            return Err(InvalidNameError);
        }
        let mut name_table = NAME_TABLE.lock().unwrap();
        if let Some(&name) = name_table.get(value) {
            return Ok(name);
        }
        let name = Name::fresh();
        name_table.insert(value.to_owned(), name);
        drop(name_table);
        // No one but this function knows of the value of `name` yet, so this
        // insert may happen outside the critical section of NAME_TABLE.
        NAME_REV_TABLE
            .lock()
            .unwrap()
            .insert(name, value.to_owned());
        Ok(name)
    }

    fn nickname(&self) -> Option<String> {
        NAME_REV_TABLE.lock().unwrap().get(self).cloned()
    }
}

/// Universe level. Levels are preordered by [Level::is_ge]; on this concrete
/// representation the preorder coincides with the numeric order.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Level(pub usize);

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Level {
    pub const fn base() -> Self {
        Level(0)
    }

    pub fn succ(self) -> Self {
        Level(self.0 + 1)
    }

    pub fn is_ge(self, other: Level) -> bool {
        self.0 >= other.0
    }
}

/// An opaque built-in carrying an internal reduction rule.
///
/// `normalize` receives the arguments of the application (the value itself
/// excluded) and returns the replacement term when the application reduces.
/// It must be pure and total, and the replacement must be closed: the
/// normalizer asserts that no free de Bruijn variable escapes.
pub trait BuiltinValue: std::fmt::Debug + Send + Sync {
    fn name(&self) -> Name;

    fn normalize(&self, args: &[Expr]) -> Option<Expr>;

    /// Symbol used to display a saturated binary application infix.
    fn infix(&self) -> Option<&'static str> {
        None
    }

    fn as_nat(&self) -> Option<u128> {
        None
    }

    fn as_bool(&self) -> Option<bool> {
        None
    }
}

pub type Value = Arc<dyn BuiltinValue>;

#[derive(Clone, Debug)]
pub enum Expr {
    Var(Arc<ExprVar>),
    Const(Arc<ExprConst>),
    Sort(Arc<ExprSort>),
    Value(Arc<ExprValue>),
    App(Arc<ExprApp>),
    Lambda(Arc<ExprBinder>),
    Pi(Arc<ExprBinder>),
    Let(Arc<ExprLet>),
    Eq(Arc<ExprEq>),
}

#[derive(Debug)]
pub struct ExprVar {
    pub index: usize,
}

#[derive(Debug)]
pub struct ExprConst {
    pub name: Name,
}

#[derive(Debug)]
pub struct ExprSort {
    pub level: Level,
}

#[derive(Debug)]
pub struct ExprValue {
    pub value: Value,
}

/// `args` is always non-empty and `fun` is never itself an application.
#[derive(Debug)]
pub struct ExprApp {
    pub fun: Expr,
    pub args: Vec<Expr>,
}

/// Binder with a display hint name and an explicit domain.
/// Used by both [Expr::Lambda] and [Expr::Pi].
#[derive(Debug)]
pub struct ExprBinder {
    pub name: Name,
    pub domain: Expr,
    pub body: Expr,
}

#[derive(Debug)]
pub struct ExprLet {
    pub name: Name,
    pub value: Expr,
    pub body: Expr,
}

#[derive(Debug)]
pub struct ExprEq {
    pub lhs: Expr,
    pub rhs: Expr,
}

#[inline]
pub fn mk_var(index: usize) -> Expr {
    Expr::Var(Arc::new(ExprVar { index }))
}

#[inline]
pub fn mk_const(name: Name) -> Expr {
    Expr::Const(Arc::new(ExprConst { name }))
}

#[inline]
pub fn mk_sort(level: Level) -> Expr {
    Expr::Sort(Arc::new(ExprSort { level }))
}

#[inline]
pub fn mk_value(value: Value) -> Expr {
    Expr::Value(Arc::new(ExprValue { value }))
}

/// Build an application. A nested application head is flattened so that
/// `fun` of the result is never an [Expr::App]; an empty `args` returns
/// `fun` unchanged.
pub fn mk_app(fun: Expr, args: Vec<Expr>) -> Expr {
    if args.is_empty() {
        return fun;
    }
    match fun {
        Expr::App(inner) => {
            let mut all_args = inner.args.clone();
            all_args.extend(args);
            Expr::App(Arc::new(ExprApp {
                fun: inner.fun.clone(),
                args: all_args,
            }))
        }
        _ => Expr::App(Arc::new(ExprApp { fun, args })),
    }
}

#[inline]
pub fn mk_lambda(name: Name, domain: Expr, body: Expr) -> Expr {
    Expr::Lambda(Arc::new(ExprBinder { name, domain, body }))
}

#[inline]
pub fn mk_pi(name: Name, domain: Expr, body: Expr) -> Expr {
    Expr::Pi(Arc::new(ExprBinder { name, domain, body }))
}

#[inline]
pub fn mk_let(name: Name, value: Expr, body: Expr) -> Expr {
    Expr::Let(Arc::new(ExprLet { name, value, body }))
}

#[inline]
pub fn mk_eq(lhs: Expr, rhs: Expr) -> Expr {
    Expr::Eq(Arc::new(ExprEq { lhs, rhs }))
}

/// Observable sharing: true when the node is pointed to from more than one
/// parent. This is the cache-key eligibility signal of the normalizer.
pub fn is_shared(e: &Expr) -> bool {
    match e {
        Expr::Var(a) => Arc::strong_count(a) > 1,
        Expr::Const(a) => Arc::strong_count(a) > 1,
        Expr::Sort(a) => Arc::strong_count(a) > 1,
        Expr::Value(a) => Arc::strong_count(a) > 1,
        Expr::App(a) => Arc::strong_count(a) > 1,
        Expr::Lambda(a) => Arc::strong_count(a) > 1,
        Expr::Pi(a) => Arc::strong_count(a) > 1,
        Expr::Let(a) => Arc::strong_count(a) > 1,
        Expr::Eq(a) => Arc::strong_count(a) > 1,
    }
}

/// Node identity, usable as a cache key while the expression is alive.
pub fn cache_ptr(e: &Expr) -> usize {
    match e {
        Expr::Var(a) => Arc::as_ptr(a) as usize,
        Expr::Const(a) => Arc::as_ptr(a) as usize,
        Expr::Sort(a) => Arc::as_ptr(a) as usize,
        Expr::Value(a) => Arc::as_ptr(a) as usize,
        Expr::App(a) => Arc::as_ptr(a) as usize,
        Expr::Lambda(a) => Arc::as_ptr(a) as usize,
        Expr::Pi(a) => Arc::as_ptr(a) as usize,
        Expr::Let(a) => Arc::as_ptr(a) as usize,
        Expr::Eq(a) => Arc::as_ptr(a) as usize,
    }
}

/// Structural equality. Binder hint names are display-only under de Bruijn
/// indexing and are ignored; values compare by name.
impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        if cache_ptr(self) == cache_ptr(other) {
            return true;
        }
        match (self, other) {
            (Expr::Var(a), Expr::Var(b)) => a.index == b.index,
            (Expr::Const(a), Expr::Const(b)) => a.name == b.name,
            (Expr::Sort(a), Expr::Sort(b)) => a.level == b.level,
            (Expr::Value(a), Expr::Value(b)) => a.value.name() == b.value.name(),
            (Expr::App(a), Expr::App(b)) => a.fun == b.fun && a.args == b.args,
            (Expr::Lambda(a), Expr::Lambda(b)) => a.domain == b.domain && a.body == b.body,
            (Expr::Pi(a), Expr::Pi(b)) => a.domain == b.domain && a.body == b.body,
            (Expr::Let(a), Expr::Let(b)) => a.value == b.value && a.body == b.body,
            (Expr::Eq(a), Expr::Eq(b)) => a.lhs == b.lhs && a.rhs == b.rhs,
            _ => false,
        }
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Expr::Var(a) => a.index.hash(state),
            Expr::Const(a) => a.name.hash(state),
            Expr::Sort(a) => a.level.hash(state),
            Expr::Value(a) => a.value.name().hash(state),
            Expr::App(a) => {
                a.fun.hash(state);
                a.args.hash(state);
            }
            Expr::Lambda(a) | Expr::Pi(a) => {
                a.domain.hash(state);
                a.body.hash(state);
            }
            Expr::Let(a) => {
                a.value.hash(state);
                a.body.hash(state);
            }
            Expr::Eq(a) => {
                a.lhs.hash(state);
                a.rhs.hash(state);
            }
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const PREC_BINDER: u8 = 0;
        const PREC_EQ: u8 = 1;
        const PREC_APP: u8 = 2;
        const PREC_ATOM: u8 = 3;

        fn fmt_expr(e: &Expr, f: &mut std::fmt::Formatter<'_>, prec: u8) -> std::fmt::Result {
            match e {
                Expr::Var(inner) => write!(f, "#{}", inner.index),
                Expr::Const(inner) => write!(f, "{}", inner.name),
                Expr::Sort(inner) => {
                    if inner.level == Level::base() {
                        write!(f, "Type")
                    } else {
                        write!(f, "Type {}", inner.level)
                    }
                }
                Expr::Value(inner) => match inner.value.as_nat() {
                    Some(n) => write!(f, "{}", n),
                    None => write!(f, "{}", inner.value.name()),
                },
                Expr::App(inner) => {
                    if let Expr::Value(head) = &inner.fun {
                        if let Some(op) = head.value.infix() {
                            if inner.args.len() == 2 {
                                let needs_paren = prec > PREC_EQ;
                                if needs_paren {
                                    write!(f, "(")?;
                                }
                                fmt_expr(&inner.args[0], f, PREC_APP)?;
                                write!(f, " {} ", op)?;
                                fmt_expr(&inner.args[1], f, PREC_APP)?;
                                if needs_paren {
                                    write!(f, ")")?;
                                }
                                return Ok(());
                            }
                        }
                    }
                    let needs_paren = prec > PREC_APP;
                    if needs_paren {
                        write!(f, "(")?;
                    }
                    fmt_expr(&inner.fun, f, PREC_APP)?;
                    for arg in &inner.args {
                        write!(f, " ")?;
                        fmt_expr(arg, f, PREC_ATOM)?;
                    }
                    if needs_paren {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
                Expr::Lambda(inner) => {
                    let needs_paren = prec > PREC_BINDER;
                    if needs_paren {
                        write!(f, "(")?;
                    }
                    write!(f, "λ {} : ", inner.name)?;
                    fmt_expr(&inner.domain, f, PREC_EQ)?;
                    write!(f, ", ")?;
                    fmt_expr(&inner.body, f, PREC_BINDER)?;
                    if needs_paren {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
                Expr::Pi(inner) => {
                    let needs_paren = prec > PREC_BINDER;
                    if needs_paren {
                        write!(f, "(")?;
                    }
                    write!(f, "Π {} : ", inner.name)?;
                    fmt_expr(&inner.domain, f, PREC_EQ)?;
                    write!(f, ", ")?;
                    fmt_expr(&inner.body, f, PREC_BINDER)?;
                    if needs_paren {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
                Expr::Let(inner) => {
                    let needs_paren = prec > PREC_BINDER;
                    if needs_paren {
                        write!(f, "(")?;
                    }
                    write!(f, "let {} := ", inner.name)?;
                    fmt_expr(&inner.value, f, PREC_EQ)?;
                    write!(f, " in ")?;
                    fmt_expr(&inner.body, f, PREC_BINDER)?;
                    if needs_paren {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
                Expr::Eq(inner) => {
                    let needs_paren = prec > PREC_EQ;
                    if needs_paren {
                        write!(f, "(")?;
                    }
                    fmt_expr(&inner.lhs, f, PREC_APP)?;
                    write!(f, " = ")?;
                    fmt_expr(&inner.rhs, f, PREC_APP)?;
                    if needs_paren {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
            }
        }

        fmt_expr(self, f, PREC_BINDER)
    }
}

impl Expr {
    /// The head of the application spine (`self` when not an application).
    pub fn head(&self) -> &Expr {
        match self {
            Expr::App(inner) => &inner.fun,
            _ => self,
        }
    }

    /// Split into spine head and arguments.
    pub fn unfold_app(&self) -> (&Expr, &[Expr]) {
        match self {
            Expr::App(inner) => (&inner.fun, &inner.args),
            _ => (self, &[]),
        }
    }

    /// Shift every variable with index ≥ `cutoff` up by `n`.
    pub fn lift(&self, n: usize) -> Expr {
        if n == 0 {
            return self.clone();
        }
        self.lift_at(n, 0)
    }

    fn lift_at(&self, n: usize, cutoff: usize) -> Expr {
        match self {
            Expr::Var(inner) => {
                if inner.index >= cutoff {
                    mk_var(inner.index + n)
                } else {
                    self.clone()
                }
            }
            Expr::Const(_) | Expr::Sort(_) | Expr::Value(_) => self.clone(),
            Expr::App(inner) => mk_app(
                inner.fun.lift_at(n, cutoff),
                inner.args.iter().map(|a| a.lift_at(n, cutoff)).collect(),
            ),
            Expr::Lambda(inner) => mk_lambda(
                inner.name,
                inner.domain.lift_at(n, cutoff),
                inner.body.lift_at(n, cutoff + 1),
            ),
            Expr::Pi(inner) => mk_pi(
                inner.name,
                inner.domain.lift_at(n, cutoff),
                inner.body.lift_at(n, cutoff + 1),
            ),
            Expr::Let(inner) => mk_let(
                inner.name,
                inner.value.lift_at(n, cutoff),
                inner.body.lift_at(n, cutoff + 1),
            ),
            Expr::Eq(inner) => mk_eq(inner.lhs.lift_at(n, cutoff), inner.rhs.lift_at(n, cutoff)),
        }
    }

    /// Substitute the innermost binders: variable `depth + i` becomes
    /// `subst[i]` (lifted past `depth` binders); variables above the window
    /// shift down by `subst.len()`.
    pub fn instantiate(&self, subst: &[Expr]) -> Expr {
        if subst.is_empty() {
            return self.clone();
        }
        self.instantiate_at(subst, 0)
    }

    fn instantiate_at(&self, subst: &[Expr], depth: usize) -> Expr {
        match self {
            Expr::Var(inner) => {
                let i = inner.index;
                if i < depth {
                    self.clone()
                } else if i - depth < subst.len() {
                    subst[i - depth].lift(depth)
                } else {
                    mk_var(i - subst.len())
                }
            }
            Expr::Const(_) | Expr::Sort(_) | Expr::Value(_) => self.clone(),
            Expr::App(inner) => mk_app(
                inner.fun.instantiate_at(subst, depth),
                inner
                    .args
                    .iter()
                    .map(|a| a.instantiate_at(subst, depth))
                    .collect(),
            ),
            Expr::Lambda(inner) => mk_lambda(
                inner.name,
                inner.domain.instantiate_at(subst, depth),
                inner.body.instantiate_at(subst, depth + 1),
            ),
            Expr::Pi(inner) => mk_pi(
                inner.name,
                inner.domain.instantiate_at(subst, depth),
                inner.body.instantiate_at(subst, depth + 1),
            ),
            Expr::Let(inner) => mk_let(
                inner.name,
                inner.value.instantiate_at(subst, depth),
                inner.body.instantiate_at(subst, depth + 1),
            ),
            Expr::Eq(inner) => mk_eq(
                inner.lhs.instantiate_at(subst, depth),
                inner.rhs.instantiate_at(subst, depth),
            ),
        }
    }

    /// True when every variable index is below `depth`.
    pub fn is_closed_below(&self, depth: usize) -> bool {
        match self {
            Expr::Var(inner) => inner.index < depth,
            Expr::Const(_) | Expr::Sort(_) | Expr::Value(_) => true,
            Expr::App(inner) => {
                inner.fun.is_closed_below(depth)
                    && inner.args.iter().all(|a| a.is_closed_below(depth))
            }
            Expr::Lambda(inner) | Expr::Pi(inner) => {
                inner.domain.is_closed_below(depth) && inner.body.is_closed_below(depth + 1)
            }
            Expr::Let(inner) => {
                inner.value.is_closed_below(depth) && inner.body.is_closed_below(depth + 1)
            }
            Expr::Eq(inner) => inner.lhs.is_closed_below(depth) && inner.rhs.is_closed_below(depth),
        }
    }
}

#[derive(Debug)]
struct BoolTypeValue;

impl BuiltinValue for BoolTypeValue {
    fn name(&self) -> Name {
        *BOOL_TYPE_NAME
    }

    fn normalize(&self, _args: &[Expr]) -> Option<Expr> {
        None
    }
}

#[derive(Debug)]
struct BoolValue(bool);

impl BuiltinValue for BoolValue {
    fn name(&self) -> Name {
        if self.0 { *TRUE_NAME } else { *FALSE_NAME }
    }

    fn normalize(&self, _args: &[Expr]) -> Option<Expr> {
        None
    }

    fn as_bool(&self) -> Option<bool> {
        Some(self.0)
    }
}

#[derive(Debug)]
struct NatTypeValue;

impl BuiltinValue for NatTypeValue {
    fn name(&self) -> Name {
        *NAT_TYPE_NAME
    }

    fn normalize(&self, _args: &[Expr]) -> Option<Expr> {
        None
    }
}

#[derive(Debug)]
struct NatValue(u128);

static NAT_VALUE_NAMES: LazyLock<Mutex<HashMap<u128, Name>>> = LazyLock::new(Default::default);

fn nat_value_name(n: u128) -> Name {
    let mut table = NAT_VALUE_NAMES.lock().unwrap();
    if let Some(&name) = table.get(&n) {
        return name;
    }
    let name = Name::fresh_with_name(&n.to_string());
    table.insert(n, name);
    name
}

impl BuiltinValue for NatValue {
    fn name(&self) -> Name {
        nat_value_name(self.0)
    }

    fn normalize(&self, _args: &[Expr]) -> Option<Expr> {
        None
    }

    fn as_nat(&self) -> Option<u128> {
        Some(self.0)
    }
}

#[derive(Debug)]
struct NatArith {
    op: &'static str,
    apply: fn(u128, u128) -> Option<u128>,
}

impl BuiltinValue for NatArith {
    fn name(&self) -> Name {
        match self.op {
            "+" => *NAT_ADD_NAME,
            _ => *NAT_MUL_NAME,
        }
    }

    fn normalize(&self, args: &[Expr]) -> Option<Expr> {
        let [a, b] = args else {
            return None;
        };
        let a = as_nat_value(a)?;
        let b = as_nat_value(b)?;
        Some(mk_nat_value((self.apply)(a, b)?))
    }

    fn infix(&self) -> Option<&'static str> {
        Some(self.op)
    }
}

static BOOL_TYPE_NAME: LazyLock<Name> = LazyLock::new(|| Name::intern("Bool").unwrap());
static TRUE_NAME: LazyLock<Name> = LazyLock::new(|| Name::intern("true").unwrap());
static FALSE_NAME: LazyLock<Name> = LazyLock::new(|| Name::intern("false").unwrap());
static NAT_TYPE_NAME: LazyLock<Name> = LazyLock::new(|| Name::intern("Nat").unwrap());
static NAT_ADD_NAME: LazyLock<Name> = LazyLock::new(|| Name::intern("Nat.add").unwrap());
static NAT_MUL_NAME: LazyLock<Name> = LazyLock::new(|| Name::intern("Nat.mul").unwrap());

static BOOL_TYPE: LazyLock<Expr> = LazyLock::new(|| mk_value(Arc::new(BoolTypeValue)));
static TRUE_VALUE: LazyLock<Expr> = LazyLock::new(|| mk_value(Arc::new(BoolValue(true))));
static FALSE_VALUE: LazyLock<Expr> = LazyLock::new(|| mk_value(Arc::new(BoolValue(false))));
static NAT_TYPE: LazyLock<Expr> = LazyLock::new(|| mk_value(Arc::new(NatTypeValue)));
static NAT_ADD: LazyLock<Expr> = LazyLock::new(|| {
    mk_value(Arc::new(NatArith {
        op: "+",
        apply: u128::checked_add,
    }))
});
static NAT_MUL: LazyLock<Expr> = LazyLock::new(|| {
    mk_value(Arc::new(NatArith {
        op: "*",
        apply: u128::checked_mul,
    }))
});

pub fn mk_bool_type() -> Expr {
    BOOL_TYPE.clone()
}

pub fn mk_bool_value(b: bool) -> Expr {
    if b {
        TRUE_VALUE.clone()
    } else {
        FALSE_VALUE.clone()
    }
}

pub fn mk_nat_type() -> Expr {
    NAT_TYPE.clone()
}

pub fn mk_nat_value(n: u128) -> Expr {
    mk_value(Arc::new(NatValue(n)))
}

pub fn mk_nat_add(a: Expr, b: Expr) -> Expr {
    mk_app(NAT_ADD.clone(), vec![a, b])
}

pub fn mk_nat_mul(a: Expr, b: Expr) -> Expr {
    mk_app(NAT_MUL.clone(), vec![a, b])
}

pub fn as_nat_value(e: &Expr) -> Option<u128> {
    match e {
        Expr::Value(inner) => inner.value.as_nat(),
        _ => None,
    }
}

pub fn as_bool_value(e: &Expr) -> Option<bool> {
    match e {
        Expr::Value(inner) => inner.value.as_bool(),
        _ => None,
    }
}

#[derive(Error, Debug, Clone)]
pub enum EnvError {
    #[error("already declared: {name}")]
    AlreadyDeclared { name: Name },
    #[error("unknown declaration: {name}")]
    Unknown { name: Name },
}

/// How aggressively elaboration-level reduction may unfold a definition.
/// The kernel normalizer consults only the `opaque` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reducibility {
    Reducible,
    #[default]
    Semireducible,
    Irreducible,
}

#[derive(Debug, Clone)]
pub enum Object {
    Axiom(Arc<ObjectAxiom>),
    Def(Arc<ObjectDef>),
}

#[derive(Debug)]
pub struct ObjectAxiom {
    pub ty: Expr,
}

#[derive(Debug)]
pub struct ObjectDef {
    pub ty: Expr,
    pub value: Expr,
    pub opaque: bool,
    pub reducibility: Reducibility,
}

impl Object {
    pub fn ty(&self) -> &Expr {
        match self {
            Object::Axiom(inner) => &inner.ty,
            Object::Def(inner) => &inner.ty,
        }
    }

    pub fn as_def(&self) -> Option<&ObjectDef> {
        match self {
            Object::Axiom(_) => None,
            Object::Def(inner) => Some(inner.as_ref()),
        }
    }
}

/// Read-only mapping from names to objects, plus the backward-lemma
/// registry and the instance table consulted by `apply`.
#[derive(Debug, Clone, Default)]
pub struct Env {
    objects: HashMap<Name, Object>,
    backward_lemmas: Vec<Name>,
    instances: HashMap<Name, Vec<Name>>,
}

impl Env {
    pub fn new() -> Env {
        Env::default()
    }

    pub fn get(&self, name: Name) -> Option<&Object> {
        self.objects.get(&name)
    }

    pub fn add_axiom(&mut self, name: Name, ty: Expr) -> Result<(), EnvError> {
        self.insert(name, Object::Axiom(Arc::new(ObjectAxiom { ty })))
    }

    pub fn add_def(&mut self, name: Name, ty: Expr, value: Expr) -> Result<(), EnvError> {
        self.insert(
            name,
            Object::Def(Arc::new(ObjectDef {
                ty,
                value,
                opaque: false,
                reducibility: Reducibility::default(),
            })),
        )
    }

    pub fn add_opaque_def(&mut self, name: Name, ty: Expr, value: Expr) -> Result<(), EnvError> {
        self.insert(
            name,
            Object::Def(Arc::new(ObjectDef {
                ty,
                value,
                opaque: true,
                reducibility: Reducibility::Irreducible,
            })),
        )
    }

    pub fn add_reducible_def(&mut self, name: Name, ty: Expr, value: Expr) -> Result<(), EnvError> {
        self.insert(
            name,
            Object::Def(Arc::new(ObjectDef {
                ty,
                value,
                opaque: false,
                reducibility: Reducibility::Reducible,
            })),
        )
    }

    fn insert(&mut self, name: Name, object: Object) -> Result<(), EnvError> {
        if self.objects.contains_key(&name) {
            return Err(EnvError::AlreadyDeclared { name });
        }
        self.objects.insert(name, object);
        Ok(())
    }

    /// Register a declared axiom or definition for backward chaining.
    /// Registration order is the trial priority order.
    pub fn register_backward_lemma(&mut self, name: Name) -> Result<(), EnvError> {
        if !self.objects.contains_key(&name) {
            return Err(EnvError::Unknown { name });
        }
        self.backward_lemmas.push(name);
        Ok(())
    }

    pub fn backward_lemmas(&self) -> &[Name] {
        &self.backward_lemmas
    }

    /// Register `name` as an instance for goals headed by `class_head`.
    pub fn register_instance(&mut self, class_head: Name, name: Name) -> Result<(), EnvError> {
        if !self.objects.contains_key(&name) {
            return Err(EnvError::Unknown { name });
        }
        self.instances.entry(class_head).or_default().push(name);
        Ok(())
    }

    pub fn instances_for(&self, class_head: Name) -> &[Name] {
        self.instances
            .get(&class_head)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// An entry of the binder context above a term: a declared or let-bound
/// variable. `body` is present for let entries only.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub name: Name,
    pub ty: Expr,
    pub body: Option<Expr>,
}

/// Persistent sequence of context entries, innermost first. Cloning is O(1);
/// extending never invalidates older handles.
#[derive(Debug, Clone, Default)]
pub struct Context(Option<Arc<ContextNode>>);

#[derive(Debug)]
struct ContextNode {
    entry: ContextEntry,
    tail: Context,
    size: usize,
}

impl Context {
    pub fn size(&self) -> usize {
        match &self.0 {
            Some(node) => node.size,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn extend(&self, entry: ContextEntry) -> Context {
        Context(Some(Arc::new(ContextNode {
            entry,
            tail: self.clone(),
            size: self.size() + 1,
        })))
    }

    /// The entry `j` steps in from the innermost end, together with the
    /// prefix context in force at the point of its introduction.
    pub fn lookup_ext(&self, j: usize) -> Option<(&ContextEntry, &Context)> {
        let mut j = j;
        let mut ctx = self;
        loop {
            let node = ctx.0.as_deref()?;
            if j == 0 {
                return Some((&node.entry, &node.tail));
            }
            j -= 1;
            ctx = &node.tail;
        }
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}
