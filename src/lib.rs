//! Evaluation core of a dependently typed prover: a call-by-need term
//! normalizer with convertibility checking, and a backward-chaining proof
//! search over a head-indexed lemma library.

pub mod chain;
pub mod lemma;
pub mod normalize;
pub mod tactic;
pub mod tt;

pub use chain::{ChainError, DEFAULT_BACK_CHAINING_MAX_DEPTH, back_chaining};
pub use lemma::{BackwardLemma, BackwardLemmaIndex, HeadSymbol, IndexError, head_symbol};
pub use normalize::{NormalizeError, Normalizer, SValue, Stack, is_convertible, normalize};
pub use tactic::{
    LeafTactic, MetavarContext, MetavarDecl, TacticFailure, TacticState, Transparency, TypeContext,
};
pub use tt::{
    BuiltinValue, Context, ContextEntry, Env, EnvError, Expr, Level, Name, Object, Reducibility,
    Value,
};
