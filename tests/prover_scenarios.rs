//! End-to-end scenarios: the normalizer acting as a decision procedure
//! inside the backward-chaining engine.

use kanna::chain::{ChainError, DEFAULT_BACK_CHAINING_MAX_DEPTH, back_chaining};
use kanna::normalize::normalize;
use kanna::tactic::{TacticFailure, TacticState, Transparency};
use kanna::tt::{
    Context, Env, Expr, Level, Name, mk_app, mk_bool_value, mk_const, mk_eq, mk_nat_add,
    mk_nat_mul, mk_nat_value, mk_pi, mk_sort, mk_var,
};

fn name(s: &str) -> Name {
    Name::intern(s).unwrap()
}

fn prop() -> Expr {
    mk_sort(Level::base())
}

/// Close goals whose target normalizes to the `true` value.
fn decide(env: &Env) -> impl FnMut(TacticState) -> Result<TacticState, TacticFailure> + '_ {
    move |state: TacticState| {
        let decl = state
            .main_goal_decl()
            .ok_or_else(|| TacticFailure::new("no goal"))?;
        let ctx = Context::default();
        match normalize(env, &ctx, &decl.target) {
            Ok(n) if n == mk_bool_value(true) => {
                let goal = state.goals[0];
                let mut closed = state.set_goals(vec![]);
                closed.mctx.assign(goal, mk_bool_value(true));
                Ok(closed)
            }
            _ => Err(TacticFailure::new("not decidably true")),
        }
    }
}

fn and_env() -> Env {
    let mut env = Env::new();
    env.add_axiom(
        name("and"),
        mk_pi(name("a"), prop(), mk_pi(name("b"), prop(), prop())),
    )
    .unwrap();
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
fn conjunction_of_arithmetic_facts_is_closed_by_decide() {
    let env = and_env();
    // and (2 + 2 = 4) (3 * 3 = 9)
    let target = mk_app(
        mk_const(name("and")),
        vec![
            mk_eq(mk_nat_add(mk_nat_value(2), mk_nat_value(2)), mk_nat_value(4)),
            mk_eq(mk_nat_mul(mk_nat_value(3), mk_nat_value(3)), mk_nat_value(9)),
        ],
    );
    let state = TacticState::main(target);
    let goal = state.goals[0];
    let mut leaf = decide(&env);
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

    let proof = result.mctx.assignment(goal).expect("main goal assigned");
    let (head, args) = proof.unfold_app();
    assert_eq!(*head, mk_const(name("and_intro")));
    assert_eq!(args.len(), 4);

    let report = format!(
        "ok\nmain goal closed by: {}\nremaining goals: {}",
        match head {
            Expr::Const(inner) => inner.name.to_string(),
            _ => "?".to_string(),
        },
        result.goals.len()
    );
    insta::assert_snapshot!("conjunction_of_arithmetic_facts", report);
}

#[test]
fn a_false_fact_fails_the_whole_chain() {
    let env = and_env();
    // and (2 + 2 = 4) (3 * 3 = 8): the second conjunct is refutable.
    let target = mk_app(
        mk_const(name("and")),
        vec![
            mk_eq(mk_nat_add(mk_nat_value(2), mk_nat_value(2)), mk_nat_value(4)),
            mk_eq(mk_nat_mul(mk_nat_value(3), mk_nat_value(3)), mk_nat_value(8)),
        ],
    );
    let state = TacticState::main(target);
    let mut leaf = decide(&env);
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

#[test]
fn rerunning_on_a_finished_state_reports_no_goals() {
    let env = and_env();
    let target = mk_eq(mk_nat_value(1), mk_nat_value(1));
    let state = TacticState::main(target);
    let mut leaf = decide(&env);
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

    // All goals are gone; a second invocation has nothing to chain on and
    // leaves the state untouched.
    let mut leaf = decide(&env);
    let err = back_chaining(
        &env,
        result,
        Transparency::Semireducible,
        false,
        DEFAULT_BACK_CHAINING_MAX_DEPTH,
        &mut leaf,
        &[],
    )
    .unwrap_err();
    assert!(matches!(err, ChainError::NoGoals));
}
