use crate::allocator::{Allocator, MinWasteStrategy, UsageHistory, allocate};
use crate::tests::utils::{expect_error_message, fixed, test_worker};
use crate::{
    AllocationMode, CategoryRegistry, CategorySpec, PartialResources, ResourceKind,
    ResourceVector,
};

fn capacities() -> Vec<ResourceVector> {
    vec![
        test_worker(),
        ResourceVector::new(1, 1000, 1000, 0),
        ResourceVector::new(64, 256_000, 1_000_000, 8),
        ResourceVector::new(3, 7001, 12345, 1),
    ]
}

fn empty() -> PartialResources {
    PartialResources::new()
}

#[test]
fn test_all_specified() {
    let r = empty().cores(1).memory(2).disk(3).gpus(4);
    assert_eq!(
        allocate(&fixed("all_specified", r, empty()), &test_worker(), None).unwrap(),
        ResourceVector::new(1, 2, 3, 4)
    );
}

#[test]
fn test_all_specified_no_gpu() {
    let max = empty().cores(1).memory(2).disk(3);
    assert_eq!(
        allocate(&fixed("no_gpu", max, empty()), &test_worker(), None).unwrap(),
        ResourceVector::new(1, 2, 3, 0)
    );
}

#[test]
fn test_all_specified_no_cores() {
    // 4000 slots along memory, so every slot gets less than one core
    let max = empty().gpus(4).memory(2).disk(3);
    assert_eq!(
        allocate(&fixed("no_cores", max, empty()), &test_worker(), None).unwrap(),
        ResourceVector::new(0, 2, 3, 4)
    );
}

#[test]
fn test_all_zero_is_whole_worker() {
    let max = empty().cores(0).memory(0).disk(0).gpus(0);
    for capacity in capacities() {
        let whole = allocate(&fixed("empty", empty(), empty()), &capacity, None).unwrap();
        assert_eq!(whole, capacity.without_gpus());
        assert_eq!(
            allocate(&fixed("all_zero", max, empty()), &capacity, None).unwrap(),
            whole
        );
    }
}

#[test]
fn test_only_memory() {
    let max = empty().memory(4000);
    assert_eq!(
        allocate(&fixed("only_memory", max, empty()), &test_worker(), None).unwrap(),
        ResourceVector::new(2, 4000, 8000, 0)
    );
}

#[test]
fn test_only_cores() {
    let max = empty().cores(4);
    assert_eq!(
        allocate(&fixed("only_cores", max, empty()), &test_worker(), None).unwrap(),
        ResourceVector::new(4, 8000, 16000, 0)
    );
}

#[test]
fn test_only_memory_with_minimum() {
    let max = empty().memory(4000);
    let min = empty().cores(3).gpus(2);
    assert_eq!(
        allocate(&fixed("only_memory_w_minimum", max, min), &test_worker(), None).unwrap(),
        ResourceVector::new(3, 4000, 8000, 2)
    );
}

#[test]
fn test_fully_specified_is_returned_as_is() {
    let cases = [
        ResourceVector::new(1, 1, 1, 1),
        ResourceVector::new(2, 512, 2048, 1),
        ResourceVector::new(100, 1, 100_000, 3),
    ];
    for capacity in capacities() {
        for v in cases {
            let spec = fixed("full", v.into(), empty());
            assert_eq!(allocate(&spec, &capacity, None).unwrap(), v);
        }
    }
}

#[test]
fn test_single_pinned_dimension_shares_the_rest() {
    for capacity in capacities() {
        for kind in ResourceKind::SLOTTED {
            let total = capacity.get(kind);
            for x in [1, total / 3, total / 2, total].into_iter().filter(|&x| x > 0) {
                let mut max = empty();
                max.set(kind, Some(x as i64));
                let n = total / x;
                let allocation = allocate(&fixed("single", max, empty()), &capacity, None).unwrap();
                for other in ResourceKind::SLOTTED {
                    let expected = if other == kind { x } else { capacity.get(other) / n };
                    assert_eq!(allocation.get(other), expected, "{kind}={x} on {capacity}");
                }
                assert_eq!(allocation.gpus, 0);
            }
        }
    }
}

#[test]
fn test_floor_law() {
    let envelopes = [
        empty(),
        empty().memory(2000),
        empty().cores(1).disk(100),
        empty().cores(2).memory(4000).disk(100).gpus(1),
    ];
    let minimums = [
        empty(),
        empty().cores(3),
        empty().memory(7000).gpus(1),
        empty().cores(1).memory(1).disk(1).gpus(1),
    ];
    for capacity in capacities() {
        for max in envelopes {
            for min in minimums {
                let spec = fixed("floor", max, min);
                if spec.validate().is_err() {
                    continue;
                }
                let allocation = allocate(&spec, &capacity, None).unwrap();
                for kind in ResourceKind::ALL {
                    if let Some(floor) = min.amount(kind) {
                        assert!(allocation.get(kind) >= floor, "{kind} below {floor}");
                    }
                }
            }
        }
    }
}

#[test]
fn test_explicit_zero_gpus_equals_absent() {
    for capacity in capacities() {
        assert_eq!(
            allocate(&fixed("g0", empty().gpus(0), empty()), &capacity, None).unwrap(),
            allocate(&fixed("g", empty(), empty()), &capacity, None).unwrap()
        );
        assert_eq!(
            allocate(
                &fixed("g0m", empty().memory(500).gpus(0), empty()),
                &capacity,
                None
            )
            .unwrap(),
            allocate(&fixed("gm", empty().memory(500), empty()), &capacity, None).unwrap()
        );
    }
}

#[test]
fn test_zero_dimension_next_to_nonzero_is_kept() {
    let max = empty().cores(0).memory(4000);
    assert_eq!(
        allocate(&fixed("zero_cores", max, empty()), &test_worker(), None).unwrap(),
        ResourceVector::new(0, 4000, 8000, 0)
    );
}

#[test]
fn test_min_waste_whole_worker() {
    let spec = CategorySpec::default_for("auto_whole_worker").with_mode(AllocationMode::MinWaste);
    for capacity in capacities() {
        assert_eq!(
            allocate(&spec, &capacity, None).unwrap(),
            capacity.without_gpus()
        );
    }
}

#[test]
fn test_min_waste_first_guess() {
    let spec = CategorySpec::default_for("auto_with_guess")
        .with_mode(AllocationMode::MinWaste)
        .with_first_guess(empty().cores(1).memory(2).disk(3));
    for capacity in capacities() {
        assert_eq!(
            allocate(&spec, &capacity, None).unwrap(),
            ResourceVector::new(1, 2, 3, 0)
        );
    }
}

#[test]
fn test_min_waste_default_strategy_ignores_history() {
    let spec = CategorySpec::default_for("auto")
        .with_mode(AllocationMode::MinWaste)
        .with_first_guess(empty().cores(2).memory(100));
    let mut history = UsageHistory::default();
    history.record(&ResourceVector::new(1, 10, 10, 0));
    assert_eq!(
        allocate(&spec, &test_worker(), Some(&history)).unwrap(),
        ResourceVector::new(2, 100, 0, 0)
    );
}

struct PeakStrategy;

impl MinWasteStrategy for PeakStrategy {
    fn refine(
        &self,
        _spec: &CategorySpec,
        _capacity: &ResourceVector,
        history: &UsageHistory,
    ) -> Option<ResourceVector> {
        Some(*history.peak())
    }
}

#[test]
fn test_min_waste_pluggable_strategy() {
    let allocator = Allocator::new(Box::new(PeakStrategy));
    let spec = CategorySpec::default_for("auto")
        .with_mode(AllocationMode::MinWaste)
        .with_first_guess(empty().cores(2));

    // No history yet: the strategy is not consulted
    assert_eq!(
        allocator.allocate(&spec, &test_worker(), None).unwrap(),
        ResourceVector::new(2, 0, 0, 0)
    );
    assert_eq!(
        allocator
            .allocate(&spec, &test_worker(), Some(&UsageHistory::default()))
            .unwrap(),
        ResourceVector::new(2, 0, 0, 0)
    );

    let mut history = UsageHistory::default();
    history.record(&ResourceVector::new(1, 300, 20, 0));
    history.record(&ResourceVector::new(1, 500, 10, 0));
    assert_eq!(
        allocator
            .allocate(&spec, &test_worker(), Some(&history))
            .unwrap(),
        ResourceVector::new(1, 500, 20, 0)
    );
}

#[test]
fn test_fixed_mode_ignores_first_guess() {
    let spec = fixed("fixed_guess", empty().memory(4000), empty())
        .with_first_guess(empty().cores(1).memory(2).disk(3));
    assert_eq!(
        allocate(&spec, &test_worker(), None).unwrap(),
        ResourceVector::new(2, 4000, 8000, 0)
    );
}

#[test]
fn test_invalid_spec() {
    expect_error_message(
        allocate(&fixed("neg", empty().cores(-1), empty()), &test_worker(), None),
        "max cores is negative",
    );
    expect_error_message(
        allocate(&fixed("neg_min", empty(), empty().gpus(-2)), &test_worker(), None),
        "min gpus is negative",
    );
    expect_error_message(
        allocate(
            &fixed("min_over_max", empty().memory(10), empty().memory(11)),
            &test_worker(),
            None,
        ),
        "min memory (11) exceeds max memory (10)",
    );
    expect_error_message(
        allocate(
            &CategorySpec::default_for("bad_guess")
                .with_mode(AllocationMode::MinWaste)
                .with_first_guess(empty().disk(-5)),
            &test_worker(),
            None,
        ),
        "first guess disk is negative",
    );
}

#[test]
fn test_registry_idempotence() {
    let registry = CategoryRegistry::new();
    let spec = fixed("same", empty().memory(2000), empty().cores(1));
    registry.set_category(spec.clone()).unwrap();
    let first = allocate(&registry.get_category("same"), &test_worker(), None).unwrap();
    registry.set_category(spec).unwrap();
    let second = allocate(&registry.get_category("same"), &test_worker(), None).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, ResourceVector::new(1, 2000, 4000, 0));
}

#[test]
fn test_unconfigured_category_gets_whole_worker() {
    let registry = CategoryRegistry::new();
    assert_eq!(
        allocate(&registry.get_category("missing"), &test_worker(), None).unwrap(),
        test_worker().without_gpus()
    );
}
