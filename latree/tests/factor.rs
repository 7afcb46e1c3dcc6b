use latree::{Evidence, Factor, VarList};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

const TOL: f64 = 1e-12;

fn factor(ids: &[usize], cards: &[usize], values: &[f64]) -> Factor {
    let mut f = Factor::new(VarList::with_cards(ids, cards));
    f.set_values(values);
    f
}

fn assert_close(got: &[f64], want: &[f64]) {
    assert_eq!(got.len(), want.len(), "length mismatch: {:?} vs {:?}", got, want);
    for (i, (g, w)) in got.iter().zip(want.iter()).enumerate() {
        assert!((g - w).abs() < TOL, "[{}] {} != {}", i, g, w);
    }
}

#[test]
fn plus_realigns_scopes() {
    let mut f = factor(&[1, 3], &[2, 3], &[5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
    let g = factor(&[1], &[2], &[1.0, 2.0]);
    f.plus(&g);
    assert_close(f.values(), &[6.0, 8.0, 8.0, 10.0, 10.0, 12.0]);
}

#[test]
fn plus_then_minus_is_identity() {
    let f = factor(&[1, 3], &[2, 3], &[5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
    let g = factor(&[1], &[2], &[1.0, 2.0]);
    let mut h = f.clone();
    h.plus(&g).minus(&g);
    assert!(h.equal(&f));
}

#[test]
fn times_same_scope() {
    let mut f = factor(&[1, 3], &[2, 2], &[5.0, 6.0, 7.0, 8.0]);
    let g = factor(&[1, 3], &[2, 2], &[1.0, 2.0, 3.0, 4.0]);
    f.times(&g);
    assert_close(f.values(), &[5.0, 12.0, 21.0, 32.0]);
}

#[test]
fn times_disjoint_scopes() {
    let mut f = factor(&[3], &[3], &[5.0, 6.0, 7.0]);
    let g = factor(&[1], &[2], &[1.0, 2.0]);
    f.times(&g);
    assert_eq!(f.variables(), &VarList::with_cards(&[1, 3], &[2, 3]));
    assert_close(f.values(), &[5.0, 10.0, 6.0, 12.0, 7.0, 14.0]);
}

#[test]
fn times_overlapping_scopes() {
    let mut f = factor(
        &[0, 1],
        &[3, 2],
        &[0.5, 0.1, 0.3, 0.8, 0.0, 0.9],
    );
    let g = factor(&[1, 2], &[2, 2], &[0.5, 0.1, 0.7, 0.2]);
    f.times(&g);
    assert_eq!(f.variables(), &VarList::with_cards(&[0, 1, 2], &[3, 2, 2]));
    assert_close(
        f.values(),
        &[
            0.25, 0.05, 0.15, 0.08, 0.00, 0.09, 0.35, 0.07, 0.21, 0.16, 0.00, 0.18,
        ],
    );
}

#[test]
fn product_marginal_identity() {
    // marginalizing a product onto one operand's scope equals summing out
    // the complement directly
    let f = factor(&[0, 1], &[3, 2], &[0.5, 0.1, 0.3, 0.8, 0.0, 0.9]);
    let g = factor(&[1, 2], &[2, 2], &[0.5, 0.1, 0.7, 0.2]);
    let mut lhs = f.clone();
    lhs.times(&g);
    let complement = lhs.variables().diff(f.variables());
    lhs.marginalize(f.variables());
    let mut rhs = f.clone();
    rhs.times(&g).sum_out(&complement);
    assert!(lhs.equal(&rhs));
}

#[test]
fn sum_out_rebuilds_reduced_table() {
    let vals = [
        0.25, 0.05, 0.15, 0.08, 0.00, 0.09, 0.35, 0.07, 0.21, 0.16, 0.00, 0.18,
    ];
    let mut f = factor(&[0, 1, 2], &[3, 2, 2], &vals);
    f.sum_out(&VarList::with_cards(&[1], &[2]));
    assert_close(f.values(), &[0.33, 0.05, 0.24, 0.51, 0.07, 0.39]);

    let mut f = factor(&[0, 1, 2], &[3, 2, 2], &vals);
    f.sum_out(&VarList::with_cards(&[0], &[3]));
    assert_close(f.values(), &[0.45, 0.17, 0.63, 0.34]);

    // summing out everything leaves the scalar total
    let mut f = factor(&[0, 1, 2], &[], &[0.25, 0.25, 0.25, 0.25, 0.5, 0.5, 1.0, 1.0]);
    f.sum_out(&VarList::with_cards(&[0, 1, 2], &[]));
    assert_close(f.values(), &[4.0]);
}

#[test]
fn marginalize_ignores_foreign_vars() {
    let vals = [
        0.25, 0.05, 0.15, 0.08, 0.00, 0.09, 0.35, 0.07, 0.21, 0.16, 0.00, 0.18,
    ];
    let mut f = factor(&[0, 1, 2], &[3, 2, 2], &vals);
    f.marginalize(&VarList::with_cards(&[0, 2, 4], &[3, 2, 2]));
    assert_eq!(f.variables(), &VarList::with_cards(&[0, 2], &[3, 2]));
    assert_close(f.values(), &[0.33, 0.05, 0.24, 0.51, 0.07, 0.39]);
}

#[test]
fn normalize_whole_table() {
    let mut f = factor(&[0, 1], &[2, 2], &[10.0, 20.0, 30.0, 40.0]);
    f.normalize().unwrap();
    assert_close(f.values(), &[0.1, 0.2, 0.3, 0.4]);
    assert!((f.values().iter().sum::<f64>() - 1.0).abs() < TOL);
}

#[test]
fn normalize_conditional() {
    let mut f = factor(
        &[0, 1, 2],
        &[3, 2, 2],
        &[10.0, 3.0, 7.0, 2.0, 3.0, 5.0, 4.0, 4.0, 12.0, 6.0, 2.0, 2.0],
    );
    f.normalize_over(&VarList::with_cards(&[0], &[3])).unwrap();
    assert_close(
        f.values(),
        &[0.5, 0.15, 0.35, 0.2, 0.3, 0.5, 0.2, 0.2, 0.6, 0.6, 0.2, 0.2],
    );
}

#[test]
fn normalize_conditional_against_hand_sums() {
    let mut f = factor(
        &[1, 2, 4],
        &[2, 2, 2],
        &[
            0.136787, 0.155550, 0.111151, 0.157961, 0.105447, 0.122897, 0.092158, 0.118050,
        ],
    );
    f.normalize_over(&VarList::with_cards(&[4], &[2])).unwrap();
    assert_close(
        f.values(),
        &[
            0.136787 / 0.242234,
            0.155550 / 0.278447,
            0.111151 / 0.203309,
            0.157961 / 0.276011,
            0.105447 / 0.242234,
            0.122897 / 0.278447,
            0.092158 / 0.203309,
            0.118050 / 0.276011,
        ],
    );
}

#[test]
fn normalize_zero_table_reports_sentinel() {
    let mut f = Factor::zeros(VarList::with_cards(&[0, 1], &[2, 2]));
    assert!(f.normalize().is_err());
    assert_close(f.values(), &[0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn normalize_zero_group_is_zero_filled() {
    // group x1=0 sums to zero, group x1=1 is fine
    let mut f = factor(&[0, 1], &[2, 2], &[0.0, 0.0, 1.0, 3.0]);
    assert!(f.normalize_over(&VarList::with_cards(&[0], &[2])).is_err());
    assert_close(f.values(), &[0.0, 0.0, 0.25, 0.75]);
}

#[test]
fn reduce_zeroes_inconsistent_entries() {
    let mut f = factor(&[0, 1], &[2, 2], &[10.0, 20.0, 30.0, 40.0]);
    f.reduce(&Evidence::new());
    assert_close(f.values(), &[10.0, 20.0, 30.0, 40.0]);

    let mut f = factor(&[0, 1], &[2, 2], &[10.0, 20.0, 30.0, 40.0]);
    f.reduce(&Evidence::from([(1, 0)]));
    assert_close(f.values(), &[10.0, 20.0, 0.0, 0.0]);

    // full-scope evidence, foreign ids ignored
    let mut f = factor(&[0, 1], &[2, 2], &[10.0, 20.0, 30.0, 40.0]);
    f.reduce(&Evidence::from([(0, 1), (1, 0), (2, 1)]));
    assert_close(f.values(), &[0.0, 20.0, 0.0, 0.0]);

    let mut f = factor(
        &[0, 1, 2],
        &[3, 2, 2],
        &[10.0, 3.0, 7.0, 2.0, 3.0, 5.0, 4.0, 4.0, 12.0, 6.0, 2.0, 2.0],
    );
    f.reduce(&Evidence::from([(0, 1), (2, 1), (4, 1)]));
    assert_close(
        f.values(),
        &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 2.0, 0.0],
    );
}

#[test]
fn get_looks_up_full_assignments() {
    let f = factor(
        &[0, 1, 2],
        &[3, 2, 2],
        &[10.0, 3.0, 7.0, 2.0, 3.0, 5.0, 4.0, 4.0, 12.0, 6.0, 2.0, 2.0],
    );
    assert_eq!(f.get(&Evidence::from([(0, 1), (1, 0), (2, 1)])), 4.0);
}

#[test]
#[should_panic(expected = "evidence does not assign")]
fn get_panics_on_partial_assignment() {
    let f = factor(&[0, 1], &[2, 2], &[1.0, 2.0, 3.0, 4.0]);
    f.get(&Evidence::from([(0, 1)]));
}

#[test]
fn random_distribute_normalizes() {
    let mut rng = Xoshiro256StarStar::seed_from_u64(17);
    let vars = VarList::with_cards(&[1, 3], &[4, 2]);
    let mut f = Factor::new(vars.clone());
    f.random_distribute(&mut rng);
    assert!((f.values().iter().sum::<f64>() - 1.0).abs() < TOL);
    assert!(f.values().iter().all(|&v| v > 0.0));

    let before = f.values().to_vec();
    f.random_distribute(&mut rng);
    assert_ne!(before, f.values());

    // conditioned on x1: one unit of mass per state of x3
    let sub = VarList::with_cards(&[1], &[4]);
    f.random_distribute_over(&mut rng, &sub);
    assert!((f.values().iter().sum::<f64>() - 2.0).abs() < TOL);
}

#[test]
fn random_distribute_is_reproducible() {
    let vars = VarList::with_cards(&[0, 2], &[2, 3]);
    let mut f = Factor::new(vars.clone());
    let mut g = Factor::new(vars);
    f.random_distribute(&mut Xoshiro256StarStar::seed_from_u64(99));
    g.random_distribute(&mut Xoshiro256StarStar::seed_from_u64(99));
    assert_eq!(f.values(), g.values());
}

#[test]
fn uniform_distribute_conditioned() {
    let mut f = factor(&[0, 1], &[2, 2], &[10.0, 20.0, 30.0, 40.0]);
    f.uniform_distribute_over(&VarList::with_cards(&[0], &[2]));
    assert_close(f.values(), &[0.5, 0.5, 0.5, 0.5]);
}
