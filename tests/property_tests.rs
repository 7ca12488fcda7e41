/// Property-based tests using proptest
/// Tests invariants of document pricing and status machines for all inputs
use bigdecimal::{BigDecimal, Zero};
use proptest::prelude::*;
use quote_to_cash::calculator::{price_document, reprice_items, round_to_cents, LineItemInput};
use quote_to_cash::status::{
    plan_transition, InvoiceStatus, LeadStatus, ProjectStatus, ProposalStatus, StatusMachine,
    SubcontractorStatus,
};
use quote_to_cash::validation::{is_valid_email, normalize_email};
use std::str::FromStr;

fn money(whole: u32, cents: u32) -> BigDecimal {
    BigDecimal::from_str(&format!("{}.{:02}", whole, cents)).unwrap()
}

fn line_strategy() -> impl Strategy<Value = LineItemInput> {
    (0u32..500, 0u32..100, 0u32..10_000, 0u32..100).prop_map(|(qw, qc, pw, pc)| LineItemInput {
        description: "Work".to_string(),
        quantity: money(qw, qc),
        unit_price: money(pw, pc),
        notes: None,
    })
}

fn rate_strategy() -> impl Strategy<Value = BigDecimal> {
    (0u32..100, 0u32..1000)
        .prop_map(|(whole, frac)| BigDecimal::from_str(&format!("{}.{:03}", whole, frac)).unwrap())
}

// Property: document totals follow from the items alone
proptest! {
    #[test]
    fn subtotal_is_sum_of_quantity_times_price(
        lines in prop::collection::vec(line_strategy(), 0..12),
        rate in rate_strategy()
    ) {
        let priced = price_document(&lines, &rate).unwrap();
        let expected = lines
            .iter()
            .fold(BigDecimal::zero(), |acc, l| acc + &l.quantity * &l.unit_price);

        prop_assert_eq!(&priced.totals.subtotal, &expected);
        prop_assert_eq!(priced.items.len(), lines.len());
    }

    #[test]
    fn tax_is_rounded_to_cents_and_total_adds_up(
        lines in prop::collection::vec(line_strategy(), 1..12),
        rate in rate_strategy()
    ) {
        let priced = price_document(&lines, &rate).unwrap();
        let totals = &priced.totals;

        prop_assert_eq!(&totals.tax, &round_to_cents(&totals.tax));
        let exact = &totals.subtotal * &rate / BigDecimal::from(100);
        let half_cent = BigDecimal::from_str("0.005").unwrap();
        prop_assert!((&totals.tax - &exact).abs() <= half_cent);
        prop_assert_eq!(&totals.total, &(&totals.subtotal + &totals.tax));
        prop_assert!(totals.total >= BigDecimal::zero());
    }

    #[test]
    fn repricing_priced_items_is_stable(
        lines in prop::collection::vec(line_strategy(), 0..8),
        rate in rate_strategy()
    ) {
        let first = price_document(&lines, &rate).unwrap();
        let second = reprice_items(first.items.clone(), &rate).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn negative_quantity_is_always_rejected(whole in 1u32..1000, price in 0u32..1000) {
        let line = LineItemInput {
            description: "Refund".to_string(),
            quantity: -money(whole, 0),
            unit_price: money(price, 0),
            notes: None,
        };
        let err = price_document(&[line], &BigDecimal::from(7)).unwrap_err();
        prop_assert!(err.is_validation());
    }
}

fn terminal_states_never_move<S: StatusMachine>(all: &[S]) {
    for &from in all.iter().filter(|s| s.is_terminal()) {
        for &to in all {
            if from != to && from.can_transition(to) {
                // Cancelled projects may be reopened; nothing else leaves a terminal state.
                assert_eq!(S::ENTITY, "project", "{:?} -> {:?}", from, to);
            }
        }
    }
}

#[test]
fn terminal_states_are_final() {
    terminal_states_never_move(LeadStatus::ALL);
    terminal_states_never_move(ProposalStatus::ALL);
    terminal_states_never_move(ProjectStatus::ALL);
    terminal_states_never_move(SubcontractorStatus::ALL);
    terminal_states_never_move(InvoiceStatus::ALL);
}

proptest! {
    #[test]
    fn same_status_is_always_unchanged(index in 0usize..5) {
        let status = ProposalStatus::ALL[index % ProposalStatus::ALL.len()];
        prop_assert!(plan_transition(status, status).is_ok());
    }

    #[test]
    fn email_validation_never_panics(email in "\\PC*") {
        let _ = is_valid_email(&email);
        let _ = normalize_email(&email);
    }

    #[test]
    fn normalized_email_is_lowercase_and_stable(
        local in "[a-zA-Z]{1,10}",
        domain in "[a-zA-Z]{1,10}",
        tld in "[a-z]{2,4}"
    ) {
        let email = format!("{}@{}.{}", local, domain, tld);
        let normalized = normalize_email(&email).unwrap();
        prop_assert_eq!(&normalized, &normalized.to_lowercase());
        prop_assert_eq!(normalize_email(&normalized).unwrap(), normalized);
    }
}

#[test]
fn seven_percent_on_five_hundred() {
    let lines = vec![
        LineItemInput {
            description: "Trim".to_string(),
            quantity: BigDecimal::from(2),
            unit_price: BigDecimal::from(75),
            notes: None,
        },
        LineItemInput {
            description: "Vanity".to_string(),
            quantity: BigDecimal::from(1),
            unit_price: BigDecimal::from(350),
            notes: None,
        },
    ];
    let priced = price_document(&lines, &BigDecimal::from(7)).unwrap();
    assert_eq!(priced.totals.subtotal, BigDecimal::from(500));
    assert_eq!(priced.totals.tax, BigDecimal::from(35));
    assert_eq!(priced.totals.total, BigDecimal::from(535));
}
