//! Backward chaining: close goals by repeatedly applying backward lemmas,
//! falling back to a user-supplied leaf tactic.

use crate::lemma::{BackwardLemma, BackwardLemmaIndex, head_symbol};
use crate::tactic::{LeafTactic, TacticState, Transparency, TypeContext};
use crate::tt::{Env, Expr};
use thiserror::Error;

pub const DEFAULT_BACK_CHAINING_MAX_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("back chaining requires at least one goal")]
    NoGoals,
    #[error(
        "back_chaining failed, enable the 'tactic.back_chaining' trace target to obtain more details"
    )]
    Failed { state: TacticState },
}

macro_rules! back_trace {
    ($($arg:tt)*) => {
        if log::log_enabled!(target: "tactic.back_chaining", log::Level::Trace) {
            log::trace!(target: "tactic.back_chaining", $($arg)*);
        }
    };
}

/// A backtracking point: the state before a lemma was committed, plus the
/// candidates that were not yet tried.
struct Choice {
    state: TacticState,
    remaining: Vec<BackwardLemma>,
}

struct BackChaining<'e, 'l> {
    initial_state: TacticState,
    tc: TypeContext<'e>,
    use_instances: bool,
    max_depth: usize,
    leaf_tactic: &'l mut LeafTactic<'l>,
    lemmas: BackwardLemmaIndex,
    state: TacticState,
    choices: Vec<Choice>,
}

impl<'e, 'l> BackChaining<'e, 'l> {
    /// Run the leaf tactic on the current goal in isolation. On success its
    /// goals are spliced in front of the held-aside remainder.
    fn invoke_leaf_tactic(&mut self) -> bool {
        debug_assert!(!self.state.goals.is_empty());
        let current = self.state.goals[0];
        let sub_state = self.state.set_goals(vec![current]);
        match (self.leaf_tactic)(sub_state) {
            Ok(new_state) => {
                let mut goals = new_state.goals.clone();
                goals.extend_from_slice(&self.state.goals[1..]);
                self.state = new_state.set_goals(goals);
                true
            }
            Err(_) => false,
        }
    }

    /// Walk the candidates in priority order; the first that applies wins
    /// and the untried suffix survives as a choice point.
    fn try_lemmas(&mut self, lemmas: &[BackwardLemma]) -> bool {
        for (i, lemma) in lemmas.iter().enumerate() {
            back_trace!("[{}] trying lemma {}", self.choices.len(), lemma);
            if let Some(new_state) = self.tc.apply(lemma, &self.state, self.use_instances) {
                back_trace!("succeed");
                let remaining = lemmas[i + 1..].to_vec();
                if !remaining.is_empty() {
                    self.choices.push(Choice {
                        state: self.state.clone(),
                        remaining,
                    });
                }
                self.state = new_state;
                return true;
            }
        }
        false
    }

    fn backtrack(&mut self) -> bool {
        while !self.choices.is_empty() {
            back_trace!("[{}] backtracking", self.choices.len());
            let choice = self.choices.pop().unwrap();
            self.state = choice.state;
            if self.try_lemmas(&choice.remaining) {
                return true;
            }
        }
        false
    }

    fn run(&mut self) -> bool {
        loop {
            back_trace!("current state:\n{}", self.state);
            if self.state.goals.is_empty() {
                return true;
            }
            if self.choices.len() >= self.max_depth {
                back_trace!("maximum depth reached\n{}", self.state);
                if !self.backtrack() {
                    return false;
                }
                continue;
            }
            let Some(decl) = self.state.main_goal_decl() else {
                return false;
            };
            let target = self.tc.whnf(&decl.target);
            let candidates = match head_symbol(&target) {
                Some(head) => self.lemmas.find(head),
                None => Vec::new(),
            };
            if candidates.is_empty() {
                if !self.invoke_leaf_tactic() && !self.backtrack() {
                    return false;
                }
            } else if !self.try_lemmas(&candidates) && !self.backtrack() {
                return false;
            }
        }
    }
}

/// Close the first goal of `state` by backward chaining and return the
/// resulting state, whose goal list is exactly the remaining tail.
///
/// Lemmas are drawn from the environment's backward-lemma registry plus
/// `extra_lemmas` (constant references, appended behind the registry).
/// Goals whose head has no candidate lemma go to `leaf_tactic`; its failure,
/// like a failed apply, triggers backtracking. The search keeps at most
/// `max_depth` live choice points.
pub fn back_chaining<'l>(
    env: &Env,
    state: TacticState,
    md: Transparency,
    use_instances: bool,
    max_depth: usize,
    leaf_tactic: &'l mut LeafTactic<'l>,
    extra_lemmas: &[Expr],
) -> Result<TacticState, ChainError> {
    if state.main_goal_decl().is_none() {
        return Err(ChainError::NoGoals);
    }
    let mut lemmas = BackwardLemmaIndex::new(env);
    for extra in extra_lemmas {
        if let Err(err) = lemmas.insert_expr(env, extra) {
            back_trace!("ignoring extra lemma: {}", err);
        }
    }
    let goals = state.goals.clone();
    let focused = state.set_goals(vec![goals[0]]);
    let mut engine = BackChaining {
        initial_state: state,
        tc: TypeContext::new(env, md),
        use_instances,
        max_depth,
        leaf_tactic,
        lemmas,
        state: focused,
        choices: Vec::new(),
    };
    if engine.run() {
        Ok(engine.state.set_goals(goals[1..].to_vec()))
    } else {
        Err(ChainError::Failed {
            state: engine.initial_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tactic::TacticFailure;
    use crate::tt::{Level, Name, mk_app, mk_const, mk_pi, mk_sort, mk_var};

    fn name(s: &str) -> Name {
        Name::intern(s).unwrap()
    }

    fn prop() -> Expr {
        mk_sort(Level::base())
    }

    /// Leaf tactic closing exactly the goals in `provable`.
    fn leaf_solving(provable: Vec<Expr>) -> impl FnMut(TacticState) -> Result<TacticState, TacticFailure> {
        move |state: TacticState| {
            let decl = state
                .main_goal_decl()
                .ok_or_else(|| TacticFailure::new("no goal"))?;
            if provable.contains(&decl.target) {
                let goal = state.goals[0];
                let target = decl.target.clone();
                let mut closed = state.set_goals(vec![]);
                closed.mctx.assign(goal, target);
                Ok(closed)
            } else {
                Err(TacticFailure::new("goal not provable by leaf"))
            }
        }
    }

    fn leaf_failing() -> impl FnMut(TacticState) -> Result<TacticState, TacticFailure> {
        |_state: TacticState| Err(TacticFailure::new("leaf always fails"))
    }

    fn and_env() -> Env {
        let mut env = Env::new();
        env.add_axiom(
            name("and"),
            mk_pi(name("a"), prop(), mk_pi(name("b"), prop(), prop())),
        )
        .unwrap();
        env.add_axiom(name("P"), prop()).unwrap();
        env.add_axiom(name("Q"), prop()).unwrap();
        env.add_axiom(
            name("and_intro"),
            mk_pi(
                name("a"),
                prop(),
                mk_pi(
                    name("b"),
                    prop(),
                    mk_pi(
                        name("ha"),
                        mk_var(1),
                        mk_pi(
                            name("hb"),
                            mk_var(1),
                            mk_app(mk_const(name("and")), vec![mk_var(3), mk_var(2)]),
                        ),
                    ),
                ),
            ),
        )
        .unwrap();
        env.register_backward_lemma(name("and_intro")).unwrap();
        env
    }

    #[test]
    fn closes_a_conjunction_through_the_leaf_tactic() {
        let env = and_env();
        let target = mk_app(
            mk_const(name("and")),
            vec![mk_const(name("P")), mk_const(name("Q"))],
        );
        let state = TacticState::main(target);
        let goal = state.goals[0];
        let mut leaf = leaf_solving(vec![mk_const(name("P")), mk_const(name("Q"))]);
        let result = back_chaining(
            &env,
            state,
            Transparency::Semireducible,
            false,
            DEFAULT_BACK_CHAINING_MAX_DEPTH,
            &mut leaf,
            &[],
        )
        .unwrap();
        assert!(result.goals.is_empty());
        // The main goal is closed by and_intro applied to leaf-closed subgoals.
        let proof = result.mctx.assignment(goal).unwrap();
        let (head, args) = proof.unfold_app();
        assert_eq!(*head, mk_const(name("and_intro")));
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn no_goals_is_rejected_upfront() {
        let env = and_env();
        let state = TacticState::main(mk_const(name("P"))).set_goals(vec![]);
        let mut leaf = leaf_failing();
        let err = back_chaining(
            &env,
            state,
            Transparency::Semireducible,
            false,
            DEFAULT_BACK_CHAINING_MAX_DEPTH,
            &mut leaf,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::NoGoals));
    }

    #[test]
    fn held_aside_goals_are_restored_on_success() {
        let env = and_env();
        let mut state = TacticState::main(mk_const(name("P")));
        let second = state.mctx.declare(mk_const(name("Q")));
        state.goals.push(second);
        let mut leaf = leaf_solving(vec![mk_const(name("P"))]);
        let result = back_chaining(
            &env,
            state,
            Transparency::Semireducible,
            false,
            DEFAULT_BACK_CHAINING_MAX_DEPTH,
            &mut leaf,
            &[],
        )
        .unwrap();
        // Only the first goal is processed; the tail comes back untouched.
        assert_eq!(result.goals, vec![second]);
    }

    fn le_env() -> Env {
        let mut env = Env::new();
        env.add_axiom(name("Bad"), prop()).unwrap();
        env.add_axiom(name("T"), prop()).unwrap();
        env.add_axiom(
            name("le"),
            mk_pi(name("x"), prop(), mk_pi(name("y"), prop(), prop())),
        )
        .unwrap();
        // le_by_bad : Π x : Prop, Π h : Bad, le x x -- applies, but Bad is hopeless
        env.add_axiom(
            name("le_by_bad"),
            mk_pi(
                name("x"),
                prop(),
                mk_pi(
                    name("h"),
                    mk_const(name("Bad")),
                    mk_app(mk_const(name("le")), vec![mk_var(1), mk_var(1)]),
                ),
            ),
        )
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
        env.register_backward_lemma(name("le_by_bad")).unwrap();
        env.register_backward_lemma(name("le_refl")).unwrap();
        env
    }

    #[test]
    fn backtracks_to_the_second_lemma() {
        let env = le_env();
        let target = mk_app(
            mk_const(name("le")),
            vec![mk_const(name("T")), mk_const(name("T"))],
        );
        let state = TacticState::main(target);
        let goal = state.goals[0];
        let mut leaf = leaf_failing();
        let result = back_chaining(
            &env,
            state,
            Transparency::Semireducible,
            false,
            DEFAULT_BACK_CHAINING_MAX_DEPTH,
            &mut leaf,
            &[],
        )
        .unwrap();
        assert!(result.goals.is_empty());
        // The first candidate was abandoned; the proof uses le_refl.
        let proof = result.mctx.assignment(goal).unwrap();
        let (head, _) = proof.unfold_app();
        assert_eq!(*head, mk_const(name("le_refl")));
    }

    #[test]
    fn lemmas_are_tried_in_registration_order() {
        let env = le_env();
        let target = mk_app(
            mk_const(name("le")),
            vec![mk_const(name("T")), mk_const(name("T"))],
        );
        let state = TacticState::main(target);
        let goal = state.goals[0];
        // A leaf that proves Bad lets the first registered lemma win.
        let mut leaf = leaf_solving(vec![mk_const(name("Bad"))]);
        let result = back_chaining(
            &env,
            state,
            Transparency::Semireducible,
            false,
            DEFAULT_BACK_CHAINING_MAX_DEPTH,
            &mut leaf,
            &[],
        )
        .unwrap();
        let proof = result.mctx.assignment(goal).unwrap();
        let (head, _) = proof.unfold_app();
        assert_eq!(*head, mk_const(name("le_by_bad")));
    }

    fn g_of(arg: &str) -> Expr {
        mk_app(mk_const(name("g")), vec![mk_const(name(arg))])
    }

    /// Environment with a three-step chain
    /// `g a0 ← g a1 ← g a2 ← base`.  Every step is followed by a decoy
    /// indexed under the same head `g` whose conclusion `g other` never
    /// matches, so each successful apply stores a choice point.
    fn chain_env() -> Env {
        let mut env = Env::new();
        env.add_axiom(name("g"), mk_pi(name("p"), prop(), prop()))
            .unwrap();
        for p in ["a0", "a1", "a2", "other", "base"] {
            env.add_axiom(name(p), prop()).unwrap();
        }
        for (step, from, to) in [("s0", "a0", "a1"), ("s1", "a1", "a2")] {
            env.add_axiom(name(step), mk_pi(name("h"), g_of(to), g_of(from)))
                .unwrap();
            env.register_backward_lemma(name(step)).unwrap();
            let decoy = format!("{step}_decoy");
            env.add_axiom(name(&decoy), mk_pi(name("h"), g_of("other"), g_of("other")))
                .unwrap();
            env.register_backward_lemma(name(&decoy)).unwrap();
        }
        // The last step leaves a goal whose head has no candidates at all,
        // so it falls to the leaf tactic.
        env.add_axiom(
            name("s2"),
            mk_pi(name("h"), mk_const(name("base")), g_of("a2")),
        )
        .unwrap();
        env.register_backward_lemma(name("s2")).unwrap();
        env.add_axiom(
            name("s2_decoy"),
            mk_pi(name("h"), g_of("other"), g_of("other")),
        )
        .unwrap();
        env.register_backward_lemma(name("s2_decoy")).unwrap();
        env
    }

    #[test]
    fn deep_chains_succeed_with_enough_depth() {
        let env = chain_env();
        let mut leaf = leaf_solving(vec![mk_const(name("base"))]);
        let state = TacticState::main(g_of("a0"));
        let result = back_chaining(
            &env,
            state,
            Transparency::Semireducible,
            false,
            8,
            &mut leaf,
            &[],
        )
        .unwrap();
        assert!(result.goals.is_empty());
    }

    #[test]
    fn depth_cap_fails_a_three_step_chain() {
        let env = chain_env();
        let state = TacticState::main(g_of("a0"));
        let initial_goals = state.goals.clone();
        // The leaf could close `base`, but the choice stack fills up first.
        let mut leaf = leaf_solving(vec![mk_const(name("base"))]);
        let err = back_chaining(
            &env,
            state,
            Transparency::Semireducible,
            false,
            2,
            &mut leaf,
            &[],
        )
        .unwrap_err();
        let ChainError::Failed { state } = err else {
            panic!("expected the failure to carry the initial state");
        };
        assert_eq!(state.goals, initial_goals);
    }

    #[test]
    fn extra_lemmas_are_consulted() {
        let mut env = Env::new();
        env.add_axiom(name("R"), prop()).unwrap();
        env.add_axiom(name("r_intro"), mk_const(name("R"))).unwrap();
        let state = TacticState::main(mk_const(name("R")));
        let goal = state.goals[0];
        let mut leaf = leaf_failing();
        let result = back_chaining(
            &env,
            state,
            Transparency::Semireducible,
            false,
            DEFAULT_BACK_CHAINING_MAX_DEPTH,
            &mut leaf,
            &[mk_const(name("r_intro"))],
        )
        .unwrap();
        assert!(result.goals.is_empty());
        assert_eq!(
            result.mctx.assignment(goal),
            Some(&mk_const(name("r_intro")))
        );
    }

    #[test]
    fn failure_without_lemmas_or_leaf() {
        let mut env = Env::new();
        env.add_axiom(name("S"), prop()).unwrap();
        let state = TacticState::main(mk_const(name("S")));
        let mut leaf = leaf_failing();
        let err = back_chaining(
            &env,
            state,
            Transparency::Semireducible,
            false,
            DEFAULT_BACK_CHAINING_MAX_DEPTH,
            &mut leaf,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::Failed { .. }));
    }
}
